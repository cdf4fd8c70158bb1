use crate::error::SheetMapperError;
use crate::spreadsheet::reference::index_to_reference;
use crate::spreadsheet::SpreadsheetError;
use chrono::Datelike;
use chrono::Duration;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::Timelike;
use std::fmt::Display;

const MILLISECONDS_PER_DAY: f64 = 86_400_000f64;
/// Day number of 1899-12-30, counted from 0001-01-01
const EPOCH_DAYS_FROM_CE: i32 = 693_594;

/// How a decoder stored a cell, before it is interpreted.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CellType {
    /// Present in the row but holds no value
    #[default]
    Empty,
    /// "1" or "0"
    Boolean,
    /// Plain number
    Number,
    /// Number whose format marks it as a date/time, 1900 date system
    Date1900,
    /// Number whose format marks it as a date/time, 1904 date system
    Date1904,
    /// ISO 8601 date/time text
    IsoDateTime,
    /// Text value
    String,
    /// Formula text without the leading '='
    Formula,
    /// Error literal such as "#DIV/0!"
    Error,
}

impl CellType {
    /// Maps built-in number format ids to date types.
    pub(crate) fn parse_builtin_number_format_id(id: &str, is_1904: bool) -> Option<Self> {
        match id {
            "14" | "15" | "16" | "17" | "18" | "19" | "20" | "21" | "22" | "45" | "46" | "47" => {
                Some(Self::date(is_1904))
            }
            _ => None,
        }
    }

    /// Scans a custom number format for date or time tokens outside literals and brackets.
    pub(crate) fn parse_custom_number_format(format: &str, is_1904: bool) -> Self {
        let mut is_escaped = false;
        let mut is_literal = false;
        let mut is_bracket = false;
        let mut is_date = false;
        for character in format.chars() {
            match character {
                _ if is_escaped => is_escaped = false,
                '_' | '\\' => is_escaped = true,

                '"' if is_literal => is_literal = false,
                '"' if !is_bracket => is_literal = true,

                ']' if is_bracket => is_bracket = false,
                '[' if !is_literal => is_bracket = true,
                _ if is_literal || is_bracket => (),

                'Y' | 'y' | 'D' | 'd' | 'H' | 'h' | 'S' | 's' => is_date = true,
                _ => (),
            }
        }

        if is_date {
            Self::date(is_1904)
        } else {
            Self::Number
        }
    }

    fn date(is_1904: bool) -> Self {
        if is_1904 {
            Self::Date1904
        } else {
            Self::Date1900
        }
    }
}

/// Spreadsheet error literals and their codes.
const ERROR_CODES: [(u8, &str); 8] = [
    (0x00, "#NULL!"),
    (0x07, "#DIV/0!"),
    (0x0F, "#VALUE!"),
    (0x17, "#REF!"),
    (0x1D, "#NAME?"),
    (0x24, "#NUM!"),
    (0x2A, "#N/A"),
    (0x2B, "#GETTING_DATA"),
];

pub(crate) fn to_error_value(code: u8) -> &'static str {
    ERROR_CODES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, literal)| *literal)
        .unwrap_or("#ERROR!")
}

pub(crate) fn to_error_code(literal: &str) -> u8 {
    ERROR_CODES
        .iter()
        .find(|(_, known)| *known == literal)
        .map(|(code, _)| *code)
        .unwrap_or(0x0F)
}

/// Converts a date serial to a date/time, rounding the time to milliseconds.
/// Serials below 60 in the 1900 system are shifted by one day for the phantom 1900-02-29.
pub fn serial_to_datetime(serial: f64, is_1904: bool) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let days = serial.trunc();
    let milliseconds = ((serial - days) * MILLISECONDS_PER_DAY).round() as i64;
    let days = days as i64
        + if is_1904 {
            1462
        } else if days < 60.0 {
            1
        } else {
            0
        };
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    epoch
        .checked_add_signed(Duration::try_days(days)?)?
        .checked_add_signed(Duration::milliseconds(milliseconds))
}

/// Inverse of `serial_to_datetime`.
pub fn datetime_to_serial(datetime: NaiveDateTime, is_1904: bool) -> f64 {
    let mut days = (datetime.date().num_days_from_ce() - EPOCH_DAYS_FROM_CE) as i64;
    if is_1904 {
        days -= 1462;
    } else if days < 61 {
        days -= 1;
    }
    let time = datetime.time();
    let milliseconds = time.num_seconds_from_midnight() as f64 * 1000.0 + (time.nanosecond() / 1_000_000) as f64;
    days as f64 + milliseconds / MILLISECONDS_PER_DAY
}

/// Interpreted cell content.
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Blank,
    Boolean(bool),
    /// `text` is the decoder's textual form of `value`; `date_time` is set for date-formatted cells.
    Numeric {
        value: f64,
        text: String,
        date_time: Option<NaiveDateTime>,
    },
    Formula(String),
    String(String),
    Error(u8),
}

impl Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blank => Ok(()),
            Self::Boolean(value) => write!(f, "{}", if *value { "TRUE" } else { "FALSE" }),
            Self::Numeric { date_time: Some(date_time), .. } => write!(f, "{}", date_time.format("%Y-%m-%d %H:%M:%S")),
            Self::Numeric { text, .. } => write!(f, "{}", text),
            Self::Formula(text) | Self::String(text) => write!(f, "{}", text),
            Self::Error(code) => write!(f, "{}", to_error_value(*code)),
        }
    }
}

/// One cell as read from a sheet.
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    /// Row index (0-based)
    pub row: usize,
    /// Column index (0-based)
    pub col: usize,
    pub kind: CellType,
    /// Raw value as text
    pub value: String,
}

impl Cell {
    pub fn new(row: usize, col: usize, kind: CellType, value: impl Into<String>) -> Self {
        Cell { row, col, kind, value: value.into() }
    }

    /// Returns the A1-style reference of the cell.
    pub fn reference(&self) -> String {
        index_to_reference(self.row, self.col)
    }

    /// Interprets the raw value according to the cell type.
    pub fn value(&self) -> Result<CellValue, SheetMapperError> {
        let value = match self.kind {
            CellType::Empty => CellValue::Blank,
            CellType::Boolean => CellValue::Boolean(self.value == "1" || self.value.eq_ignore_ascii_case("true")),
            CellType::Number => CellValue::Numeric {
                value: self.to_double()?,
                text: self.value.trim().to_owned(),
                date_time: None,
            },
            CellType::Date1900 | CellType::Date1904 => {
                let value = self.to_double()?;
                CellValue::Numeric {
                    value,
                    text: self.value.trim().to_owned(),
                    date_time: serial_to_datetime(value, self.kind == CellType::Date1904),
                }
            }
            CellType::IsoDateTime => {
                let date_time = self.to_iso_datetime()?;
                let value = datetime_to_serial(date_time, false);
                CellValue::Numeric {
                    value,
                    text: value.to_string(),
                    date_time: Some(date_time),
                }
            }
            CellType::String => CellValue::String(self.value.to_owned()),
            CellType::Formula => CellValue::Formula(self.value.to_owned()),
            CellType::Error => CellValue::Error(to_error_code(&self.value)),
        };
        Ok(value)
    }

    /// Textual rendering of the value, as read from header rows.
    pub fn text(&self) -> Result<String, SheetMapperError> {
        Ok(self.value()?.to_string())
    }

    fn to_double(&self) -> Result<f64, SheetMapperError> {
        self.value
            .trim()
            .parse::<f64>()
            .map_err(|_| self.value_error().into())
    }

    fn to_iso_datetime(&self) -> Result<NaiveDateTime, SheetMapperError> {
        let value = self.value.trim();
        let parsed = if value.contains('T') {
            NaiveDateTime::parse_from_str(value.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f").ok()
        } else {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        };
        parsed.ok_or_else(|| self.value_error().into())
    }

    fn value_error(&self) -> SpreadsheetError {
        SpreadsheetError::CellValueError(self.reference(), self.value.to_owned())
    }
}
