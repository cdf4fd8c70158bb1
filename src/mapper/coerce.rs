//! Cell value to field value conversion.
use crate::mapper::field::FieldType;
use crate::mapper::field::FieldValue;
use crate::mapper::field::FieldValueError;
use crate::mapper::BlankCellPolicy;
use crate::spreadsheet::cell::CellValue;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::fmt::Write;
use std::str::FromStr;

/// Per-parse conversion settings.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Coercion<'a> {
    pub(crate) date_format: &'a str,
    pub(crate) blank_cells: BlankCellPolicy,
}

impl Coercion<'_> {
    /// Converts a cell value for a field of `field_type`.
    /// `None` leaves the field at its default.
    pub(crate) fn coerce(&self, value: CellValue, field_type: FieldType) -> Result<Option<FieldValue>, FieldValueError> {
        let value = match value {
            CellValue::Blank => match self.blank_cells {
                BlankCellPolicy::EmptyString => FieldValue::String(String::new()),
                BlankCellPolicy::FieldDefault => return Ok(None),
            },
            CellValue::Boolean(value) => FieldValue::Boolean(value),
            CellValue::Error(code) => FieldValue::Byte(code as i8),
            CellValue::Formula(text) | CellValue::String(text) => FieldValue::String(text),
            CellValue::Numeric { date_time: Some(date_time), .. } => match field_type {
                FieldType::DateTime => FieldValue::DateTime(date_time),
                _ => FieldValue::String(format_date_time(date_time, self.date_format)?),
            },
            // Narrow integers go through i32 and keep its low bits
            CellValue::Numeric { value, text, date_time: None } => match field_type {
                FieldType::Int => FieldValue::Int(value as i32),
                FieldType::Short => FieldValue::Short(value as i32 as i16),
                FieldType::Float => FieldValue::Float(value as f32),
                FieldType::Byte => FieldValue::Byte(value as i32 as i8),
                FieldType::Long => FieldValue::Long(value as i64),
                FieldType::String => FieldValue::String(to_plain_text(&text, value)),
                FieldType::Decimal => FieldValue::Decimal(to_decimal(&text)?),
                _ => FieldValue::Double(value),
            },
        };
        Ok(Some(value))
    }
}

pub(crate) fn format_date_time(date_time: NaiveDateTime, pattern: &str) -> Result<String, FieldValueError> {
    let mut text = String::new();
    write!(text, "{}", date_time.format(pattern))
        .map_err(|_| FieldValueError::DateFormatError(pattern.to_owned()))?;
    Ok(text)
}

/// Rewrites exponential notation as a plain decimal. Values a `Decimal` cannot hold
/// (28 digits) fall back to the `f64` rendering, exact to about 17 significant digits.
fn to_plain_text(text: &str, value: f64) -> String {
    if text.is_empty() {
        value.to_string()
    } else if text.contains(['e', 'E']) {
        Decimal::from_scientific(&text.to_ascii_lowercase())
            .map(|decimal| decimal.normalize().to_string())
            .unwrap_or_else(|_| value.to_string())
    } else {
        text.to_owned()
    }
}

fn to_decimal(text: &str) -> Result<Decimal, FieldValueError> {
    let decimal = if text.contains(['e', 'E']) {
        Decimal::from_scientific(&text.to_ascii_lowercase())
    } else {
        Decimal::from_str(text)
    };
    decimal.map_err(|_| FieldValueError::DecimalError(text.to_owned()))
}
