//! Workbook decoders.
//!
//! Every format is exposed through the [`Workbook`] trait, which hands out whole
//! sheets of decoded [`Cell`](cell::Cell)s. `.xlsx` files are read from their
//! zipped XML parts and legacy `.xls` files from the BIFF8 stream of their
//! compound file container.
pub mod cell;
mod excel;
pub mod memory;
pub mod reference;
pub mod sheet;
pub mod xls;
pub mod xlsx;

use crate::error::SheetMapperError;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::xls::XlsWorkbook;
use crate::spreadsheet::xlsx::XlsxWorkbook;
use std::ffi::OsStr;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

pub(crate) type FileReader = BufReader<File>;

#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("Missing part '{0}'")]
    FileError(String),

    #[error("Password-protected spreadsheets are not supported: '{0}'")]
    SpreadsheetPasswordProtectedError(String),

    #[error("No sheets found in '{0}'")]
    SpreadsheetEmptyError(String),

    #[error("Invalid cell value at '{0}': '{1}'")]
    CellValueError(String, String),

    #[error("No shared formula '{1}' found for the cell at '{0}'")]
    SharedFormulaError(String, String),
}

/// Read access to a workbook's sheets.
pub trait Workbook {
    /// File name or other identifier, used in messages.
    fn name(&self) -> String;

    /// Sheet names in workbook order.
    fn sheet_names(&self) -> Vec<String>;

    /// Decodes the sheet named `name`; `None` when the workbook has no such sheet.
    fn read_sheet(&mut self, name: &str) -> Result<Option<Sheet>, SheetMapperError>;
}

impl<W: Workbook + ?Sized> Workbook for Box<W> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn sheet_names(&self) -> Vec<String> {
        (**self).sheet_names()
    }

    fn read_sheet(&mut self, name: &str) -> Result<Option<Sheet>, SheetMapperError> {
        (**self).read_sheet(name)
    }
}

/// Opens a workbook, choosing the decoder by the file's last extension:
/// `xlsx` (any case) selects the zipped XML reader, everything else the legacy reader.
pub fn open_workbook(path: impl AsRef<Path>) -> Result<Box<dyn Workbook>, SheetMapperError> {
    let path = path.as_ref();
    if is_xlsx(path) {
        debug!(file = %path.display(), "using xlsx decoder");
        Ok(Box::new(XlsxWorkbook::open(path)?))
    } else {
        debug!(file = %path.display(), "using xls decoder");
        Ok(Box::new(XlsWorkbook::open(path)?))
    }
}

fn is_xlsx(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|extension| extension.eq_ignore_ascii_case("xlsx"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_decoder_by_last_extension() {
        assert!(is_xlsx(Path::new("report.xlsx")));
        assert!(is_xlsx(Path::new("REPORT.XLSX")));
        assert!(is_xlsx(Path::new("report.v2.xlsx")));
        assert!(!is_xlsx(Path::new("report.xlsx.xls")));
        assert!(!is_xlsx(Path::new("report.xls")));
        assert!(!is_xlsx(Path::new("report")));
    }

    #[test]
    fn opens_both_formats() {
        let dir = tempfile::tempdir().unwrap();
        let xlsx = dir.path().join("book.v1.xlsx");
        xlsx::tests::write_workbook(&xlsx, "Sheet1", "", &[], false);
        assert_eq!(open_workbook(&xlsx).unwrap().sheet_names(), vec!["Sheet1".to_owned()]);

        let xls = dir.path().join("book.xls");
        std::fs::write(&xls, b"plain text").unwrap();
        assert!(open_workbook(&xls).is_err());
        assert!(open_workbook(dir.path().join("missing.xlsx")).is_err());
    }
}
