use thiserror::Error;

/// Main error type for the sheet mapper.
/// Aggregates errors from the standard library, the decoders, and the mapping engine.
#[derive(Error, Debug)]
pub enum SheetMapperError {
    #[error("{0}")]
    WithContextError(String),

    /// Invalid mapper options, reported before any file is opened
    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    // Standard library errors
    #[error("{0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    ParseIntError(#[from] std::num::ParseIntError),

    // Third-party library errors
    #[error("{0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("{0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("{0}")]
    XmlEncodingError(#[from] quick_xml::encoding::EncodingError),

    #[error("{0}")]
    XmlAttributeError(#[from] quick_xml::events::attributes::AttrError),

    // Helper module errors
    #[error("{0}")]
    CfbHelperError(#[from] crate::helpers::cfb::CfbError),

    #[error("{0}")]
    XmlHelperError(#[from] crate::helpers::xml::XmlError),

    #[error("{0}")]
    Biff8HelperError(#[from] crate::helpers::biff8::Biff8Error),

    #[error("{0}")]
    FormulaHelperError(#[from] crate::helpers::formula::FormulaError),

    // Spreadsheet module errors
    #[error("{0}")]
    SpreadsheetError(#[from] crate::spreadsheet::SpreadsheetError),

    #[error("{0}")]
    XlsError(#[from] crate::spreadsheet::xls::XlsError),

    // Mapper module errors
    #[error("{0}")]
    FieldAccessError(#[from] crate::mapper::field::FieldValueError),
}

impl SheetMapperError {
    /// Returns true for errors raised while validating options rather than reading data.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::ConfigurationError(_))
    }
}

pub(crate) trait ResultOptionChain {
    fn ok_none_else<F>(self, f: F) -> Self
    where
        F: FnOnce() -> Self;
}

impl<T, E> ResultOptionChain for Result<Option<T>, E> {
    fn ok_none_else<F>(self, f: F) -> Self
    where
        F: FnOnce() -> Self,
    {
        match self {
            Ok(None) => f(),
            _ => self,
        }
    }
}

pub(crate) trait ResultMessage {
    fn with_prefix(self, message: &str) -> Self;
}

impl<T> ResultMessage for Result<T, SheetMapperError> {
    fn with_prefix(self, message: &str) -> Self {
        self.map_err(|e| SheetMapperError::WithContextError(format!("{}: {}", message, e)))
    }
}
