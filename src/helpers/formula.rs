//! Renders the parsed formula tokens (`rgce`) of BIFF8 FORMULA, SHRFMLA and ARRAY records
//! as formula text without the leading '='.
//!
//! Tokens are postfix: operands push their text, operators and functions pop theirs.

use crate::helpers::string::to_f64;
use crate::helpers::string::to_u16;
use crate::helpers::string::to_u32;
use crate::spreadsheet::cell::to_error_value;
use crate::spreadsheet::reference::col_to_letters;
use encoding_rs::UTF_16LE;
use thiserror::Error;

/// Function id used for add-in and newer functions, whose name is the first argument.
const USER_DEFINED_FUNCTION: u16 = 255;

/// Built-in functions by id, with the argument count of fixed-arity functions.
const FUNCTIONS: [(u16, &str, Option<usize>); 106] = [
    (0, "COUNT", None),
    (1, "IF", None),
    (2, "ISNA", Some(1)),
    (3, "ISERROR", Some(1)),
    (4, "SUM", None),
    (5, "AVERAGE", None),
    (6, "MIN", None),
    (7, "MAX", None),
    (8, "ROW", None),
    (9, "COLUMN", None),
    (10, "NA", Some(0)),
    (11, "NPV", None),
    (15, "SIN", Some(1)),
    (16, "COS", Some(1)),
    (17, "TAN", Some(1)),
    (18, "ATAN", Some(1)),
    (19, "PI", Some(0)),
    (20, "SQRT", Some(1)),
    (21, "EXP", Some(1)),
    (22, "LN", Some(1)),
    (23, "LOG10", Some(1)),
    (24, "ABS", Some(1)),
    (25, "INT", Some(1)),
    (26, "SIGN", Some(1)),
    (27, "ROUND", Some(2)),
    (28, "LOOKUP", None),
    (29, "INDEX", None),
    (30, "REPT", Some(2)),
    (31, "MID", Some(3)),
    (32, "LEN", Some(1)),
    (33, "VALUE", Some(1)),
    (34, "TRUE", Some(0)),
    (35, "FALSE", Some(0)),
    (36, "AND", None),
    (37, "OR", None),
    (38, "NOT", Some(1)),
    (39, "MOD", Some(2)),
    (48, "TEXT", Some(2)),
    (63, "RAND", Some(0)),
    (64, "MATCH", None),
    (65, "DATE", Some(3)),
    (66, "TIME", Some(3)),
    (67, "DAY", Some(1)),
    (68, "MONTH", Some(1)),
    (69, "YEAR", Some(1)),
    (70, "WEEKDAY", None),
    (71, "HOUR", Some(1)),
    (72, "MINUTE", Some(1)),
    (73, "SECOND", Some(1)),
    (74, "NOW", Some(0)),
    (76, "ROWS", Some(1)),
    (77, "COLUMNS", Some(1)),
    (78, "OFFSET", None),
    (82, "SEARCH", None),
    (83, "TRANSPOSE", Some(1)),
    (97, "ATAN2", Some(2)),
    (100, "CHOOSE", None),
    (101, "HLOOKUP", None),
    (102, "VLOOKUP", None),
    (109, "LOG", None),
    (111, "CHAR", Some(1)),
    (112, "LOWER", Some(1)),
    (113, "UPPER", Some(1)),
    (114, "PROPER", Some(1)),
    (115, "LEFT", None),
    (116, "RIGHT", None),
    (117, "EXACT", Some(2)),
    (118, "TRIM", Some(1)),
    (119, "REPLACE", Some(4)),
    (120, "SUBSTITUTE", None),
    (121, "CODE", Some(1)),
    (124, "FIND", None),
    (125, "CELL", None),
    (126, "ISERR", Some(1)),
    (127, "ISTEXT", Some(1)),
    (128, "ISNUMBER", Some(1)),
    (129, "ISBLANK", Some(1)),
    (130, "T", Some(1)),
    (131, "N", Some(1)),
    (148, "INDIRECT", None),
    (162, "CLEAN", Some(1)),
    (165, "MMULT", Some(2)),
    (169, "COUNTA", None),
    (183, "PRODUCT", None),
    (184, "FACT", Some(1)),
    (190, "ISNONTEXT", Some(1)),
    (193, "STDEVP", None),
    (197, "TRUNC", None),
    (198, "ISLOGICAL", Some(1)),
    (212, "ROUNDUP", Some(2)),
    (213, "ROUNDDOWN", Some(2)),
    (216, "RANK", None),
    (220, "DAYS360", None),
    (221, "TODAY", Some(0)),
    (227, "MEDIAN", None),
    (228, "SUMPRODUCT", None),
    (285, "FLOOR", Some(2)),
    (288, "CEILING", Some(2)),
    (336, "CONCATENATE", None),
    (337, "POWER", Some(2)),
    (342, "RADIANS", Some(1)),
    (343, "DEGREES", Some(1)),
    (344, "SUBTOTAL", None),
    (345, "SUMIF", None),
    (346, "COUNTIF", Some(2)),
    (347, "COUNTBLANK", Some(1)),
];

#[derive(Error, Debug)]
pub enum FormulaError {
    #[error("Unsupported formula token 0x{0:02X} at offset {1}")]
    UnsupportedTokenError(u8, usize),

    #[error("Formula token 0x{0:02X} at offset {1} is truncated")]
    TruncatedTokenError(u8, usize),

    #[error("Formula token 0x{0:02X} at offset {1} is missing operands")]
    MissingOperandError(u8, usize),

    #[error("Formula leaves {0} expressions instead of one")]
    UnbalancedFormulaError(usize),

    #[error("Unknown function id {0}")]
    UnknownFunctionError(u16),

    #[error("Unknown defined name index {0}")]
    UnknownNameError(usize),

    #[error("Unknown sheet reference index {0}")]
    UnknownSheetError(u16),
}

/// Workbook globals that formula tokens refer to by index.
#[derive(Clone, Debug, Default)]
pub(crate) struct FormulaContext {
    /// Sheet names in workbook order
    pub(crate) sheets: Vec<String>,
    /// EXTERNSHEET entries as (first, last) sheet index
    pub(crate) external_sheets: Vec<(u16, u16)>,
    /// Defined names in NAME record order
    pub(crate) names: Vec<String>,
}

impl FormulaContext {
    /// Renders `rgce` for the cell at (`row`, `col`); relative tokens of shared formulas
    /// are resolved against that cell.
    pub(crate) fn decode(&self, rgce: &[u8], row: usize, col: usize) -> Result<String, FormulaError> {
        let mut decoder = FormulaDecoder {
            context: self,
            rgce,
            position: 0,
            ptg: 0,
            offset: 0,
            stack: Vec::new(),
            base: (row, col),
        };
        decoder.run()
    }

    fn sheet_prefix(&self, index: u16) -> Result<String, FormulaError> {
        let (first, last) = self.external_sheets
            .get(index as usize)
            .copied()
            .ok_or(FormulaError::UnknownSheetError(index))?;
        let name = |sheet: u16| self.sheets
            .get(sheet as usize)
            .ok_or(FormulaError::UnknownSheetError(index));
        let name = if first == last {
            name(first)?.to_owned()
        } else {
            format!("{}:{}", name(first)?, name(last)?)
        };
        let is_plain = name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == ':')
            && !name.starts_with(|c: char| c.is_ascii_digit());
        if is_plain {
            Ok(format!("{}!", name))
        } else {
            Ok(format!("'{}'!", name.replace('\'', "''")))
        }
    }
}

struct FormulaDecoder<'a> {
    context: &'a FormulaContext,
    rgce: &'a [u8],
    position: usize,
    /// Current token and its offset, for error messages
    ptg: u8,
    offset: usize,
    stack: Vec<String>,
    base: (usize, usize),
}

impl<'a> FormulaDecoder<'a> {
    fn run(&mut self) -> Result<String, FormulaError> {
        let context = self.context;
        while self.position < self.rgce.len() {
            self.offset = self.position;
            self.ptg = self.rgce[self.position];
            self.position += 1;
            match self.ptg {
                0x03..=0x11 => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    let operator = match self.ptg {
                        0x03 => "+",
                        0x04 => "-",
                        0x05 => "*",
                        0x06 => "/",
                        0x07 => "^",
                        0x08 => "&",
                        0x09 => "<",
                        0x0A => "<=",
                        0x0B => "=",
                        0x0C => ">=",
                        0x0D => ">",
                        0x0E => "<>",
                        0x0F => " ",
                        0x10 => ",",
                        _ => ":",
                    };
                    self.stack.push(format!("{}{}{}", left, operator, right));
                }
                0x12 => {
                    let operand = self.pop()?;
                    self.stack.push(format!("+{}", operand));
                }
                0x13 => {
                    let operand = self.pop()?;
                    self.stack.push(format!("-{}", operand));
                }
                0x14 => {
                    let operand = self.pop()?;
                    self.stack.push(format!("{}%", operand));
                }
                0x15 => {
                    let operand = self.pop()?;
                    self.stack.push(format!("({})", operand));
                }
                0x16 => self.stack.push(String::new()),
                0x17 => {
                    let chars = self.take(1)?[0] as usize;
                    let is_high_byte = (self.take(1)?[0] & 0x01) != 0;
                    let text = if is_high_byte {
                        let (text, _, _) = UTF_16LE.decode(self.take(chars * 2)?);
                        text.into_owned()
                    } else {
                        // Compressed strings hold the low byte of each UTF-16 code unit.
                        self.take(chars)?.iter().map(|byte| char::from(*byte)).collect()
                    };
                    self.stack.push(format!("\"{}\"", text.replace('"', "\"\"")));
                }
                0x19 => {
                    let options = self.take(1)?[0];
                    let data = to_u16(self.take(2)?) as usize;
                    if (options & 0x04) != 0 {
                        // CHOOSE jump table
                        self.take((data + 1) * 2)?;
                    }
                    if (options & 0x10) != 0 {
                        let operand = self.pop()?;
                        self.stack.push(format!("SUM({})", operand));
                    }
                }
                0x1C => {
                    let code = self.take(1)?[0];
                    self.stack.push(to_error_value(code).to_owned());
                }
                0x1D => {
                    let value = self.take(1)?[0];
                    self.stack.push(if value == 0 { "FALSE" } else { "TRUE" }.to_owned());
                }
                0x1E => {
                    let value = to_u16(self.take(2)?);
                    self.stack.push(value.to_string());
                }
                0x1F => {
                    let value = to_f64(self.take(8)?);
                    self.stack.push(value.to_string());
                }
                0x21 | 0x41 | 0x61 => {
                    let id = to_u16(self.take(2)?);
                    let (name, arguments) = function(id)?;
                    let arguments = arguments.ok_or(FormulaError::UnknownFunctionError(id))?;
                    self.call(name.to_owned(), arguments)?;
                }
                0x22 | 0x42 | 0x62 => {
                    let arguments = (self.take(1)?[0] & 0x7F) as usize;
                    let id = to_u16(self.take(2)?) & 0x7FFF;
                    if id == USER_DEFINED_FUNCTION {
                        let mut arguments = self.pop_n(arguments)?;
                        if arguments.is_empty() {
                            Err(FormulaError::MissingOperandError(self.ptg, self.offset))?
                        }
                        let name = arguments.remove(0);
                        self.stack.push(format!("{}({})", name, arguments.join(",")));
                    } else {
                        let (name, _) = function(id)?;
                        self.call(name.to_owned(), arguments)?;
                    }
                }
                0x23 | 0x43 | 0x63 => {
                    let index = to_u32(self.take(4)?) as usize;
                    let name = index
                        .checked_sub(1)
                        .and_then(|index| context.names.get(index))
                        .cloned()
                        .ok_or(FormulaError::UnknownNameError(index))?;
                    self.stack.push(name);
                }
                0x24 | 0x44 | 0x64 => {
                    let reference = self.read_reference(false)?;
                    self.stack.push(reference);
                }
                0x25 | 0x45 | 0x65 => {
                    let area = self.read_area(false)?;
                    self.stack.push(area);
                }
                // Memory tokens only wrap the tokens that follow them.
                0x26 | 0x46 | 0x66 | 0x27 | 0x47 | 0x67 | 0x28 | 0x48 | 0x68 => {
                    self.take(6)?;
                }
                0x29 | 0x49 | 0x69 => {
                    self.take(2)?;
                }
                0x2A | 0x4A | 0x6A => {
                    self.take(4)?;
                    self.stack.push("#REF!".to_owned());
                }
                0x2B | 0x4B | 0x6B => {
                    self.take(8)?;
                    self.stack.push("#REF!".to_owned());
                }
                0x2C | 0x4C | 0x6C => {
                    let reference = self.read_reference(true)?;
                    self.stack.push(reference);
                }
                0x2D | 0x4D | 0x6D => {
                    let area = self.read_area(true)?;
                    self.stack.push(area);
                }
                0x3A | 0x5A | 0x7A => {
                    let sheet = context.sheet_prefix(to_u16(self.take(2)?))?;
                    let reference = self.read_reference(false)?;
                    self.stack.push(format!("{}{}", sheet, reference));
                }
                0x3B | 0x5B | 0x7B => {
                    let sheet = context.sheet_prefix(to_u16(self.take(2)?))?;
                    let area = self.read_area(false)?;
                    self.stack.push(format!("{}{}", sheet, area));
                }
                0x3C | 0x5C | 0x7C => {
                    let sheet = context.sheet_prefix(to_u16(self.take(2)?))?;
                    self.take(4)?;
                    self.stack.push(format!("{}#REF!", sheet));
                }
                0x3D | 0x5D | 0x7D => {
                    let sheet = context.sheet_prefix(to_u16(self.take(2)?))?;
                    self.take(8)?;
                    self.stack.push(format!("{}#REF!", sheet));
                }
                ptg => Err(FormulaError::UnsupportedTokenError(ptg, self.offset))?,
            }
        }
        match self.stack.len() {
            1 => Ok(self.stack.pop().unwrap_or_default()),
            depth => Err(FormulaError::UnbalancedFormulaError(depth)),
        }
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8], FormulaError> {
        let bytes = self.rgce
            .get(self.position..self.position + length)
            .ok_or(FormulaError::TruncatedTokenError(self.ptg, self.offset))?;
        self.position += length;
        Ok(bytes)
    }

    fn pop(&mut self) -> Result<String, FormulaError> {
        self.stack.pop().ok_or(FormulaError::MissingOperandError(self.ptg, self.offset))
    }

    fn pop_n(&mut self, count: usize) -> Result<Vec<String>, FormulaError> {
        if count > self.stack.len() {
            Err(FormulaError::MissingOperandError(self.ptg, self.offset))?
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn call(&mut self, name: String, arguments: usize) -> Result<(), FormulaError> {
        let arguments = self.pop_n(arguments)?;
        self.stack.push(format!("{}({})", name, arguments.join(",")));
        Ok(())
    }

    fn read_reference(&mut self, is_shared: bool) -> Result<String, FormulaError> {
        let row = to_u16(self.take(2)?);
        let col = to_u16(self.take(2)?);
        Ok(self.render_reference(row, col, is_shared))
    }

    fn read_area(&mut self, is_shared: bool) -> Result<String, FormulaError> {
        let first_row = to_u16(self.take(2)?);
        let last_row = to_u16(self.take(2)?);
        let first_col = to_u16(self.take(2)?);
        let last_col = to_u16(self.take(2)?);
        Ok(format!(
            "{}:{}",
            self.render_reference(first_row, first_col, is_shared),
            self.render_reference(last_row, last_col, is_shared),
        ))
    }

    /// The column field carries the column in its low bits, bit 14 for a relative column
    /// and bit 15 for a relative row. In shared formulas relative parts are signed offsets
    /// from the cell being decoded.
    fn render_reference(&self, row: u16, col: u16, is_shared: bool) -> String {
        let is_row_relative = (col & 0x8000) != 0;
        let is_col_relative = (col & 0x4000) != 0;
        let mut row_index = row as usize;
        let mut col_index = (col & 0x3FFF) as usize;
        if is_shared {
            let (base_row, base_col) = self.base;
            if is_row_relative {
                row_index = (base_row as i64 + row as i16 as i64).rem_euclid(0x10000) as usize;
            }
            if is_col_relative {
                col_index = (base_col as i64 + (col & 0xFF) as u8 as i8 as i64).rem_euclid(0x100) as usize;
            }
        }
        format!(
            "{}{}{}{}",
            if is_col_relative { "" } else { "$" },
            col_to_letters(col_index),
            if is_row_relative { "" } else { "$" },
            row_index + 1,
        )
    }
}

fn function(id: u16) -> Result<(&'static str, Option<usize>), FormulaError> {
    FUNCTIONS
        .iter()
        .find(|(known, _, _)| *known == id)
        .map(|(_, name, arguments)| (*name, *arguments))
        .ok_or(FormulaError::UnknownFunctionError(id))
}
