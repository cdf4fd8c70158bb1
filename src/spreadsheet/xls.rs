use crate::error::ResultOptionChain;
use crate::error::SheetMapperError;
use crate::helpers::biff8::Biff8Reader;
use crate::helpers::cfb::Cfb;
use crate::helpers::formula::FormulaContext;
use crate::match_biff8_record;
use crate::spreadsheet::cell::to_error_value;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::excel::load_number_formats;
use crate::spreadsheet::reference::index_to_reference;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::SpreadsheetError;
use crate::spreadsheet::Workbook;
use either::Either;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

// BIFF8 record types
const FORMULA: u16 = 6;
const EOF: u16 = 10;
const EXTERN_SHEET: u16 = 23;
const NAME: u16 = 24;
const DATE1904: u16 = 34;
const FILE_PASS: u16 = 47;
const BOUND_SHEET8: u16 = 133;
const MUL_RK: u16 = 189;
const MUL_BLANK: u16 = 190;
const XF: u16 = 224;
const SST: u16 = 252;
const LABEL_SST: u16 = 253;
const BLANK: u16 = 513;
const NUMBER: u16 = 515;
const LABEL: u16 = 516;
const BOOL_ERR: u16 = 517;
const ROW: u16 = 520;
const ARRAY: u16 = 545;
const RK: u16 = 638;
const FORMAT: u16 = 1054;
const SHARED_FORMULA: u16 = 1212;
const BOF: u16 = 2057;

/// Names of built-in defined names by their one-character code.
const BUILTIN_NAMES: [&str; 14] = [
    "Consolidate_Area",
    "Auto_Open",
    "Auto_Close",
    "Extract",
    "Database",
    "Criteria",
    "Print_Area",
    "Print_Titles",
    "Recorder",
    "Data_Form",
    "Auto_Activate",
    "Auto_Deactivate",
    "Sheet_Title",
    "_FilterDatabase",
];

#[derive(Error, Debug)]
pub enum XlsError {
    #[error("No shared formula found for the cell at '{0}'")]
    SharedFormulaError(String),

    #[error("Shared string index '{0}' out of range")]
    SharedStringIndexError(usize),
}

/// Legacy BIFF8 workbook (`.xls`).
pub struct XlsWorkbook {
    name: String,
    reader: Biff8Reader,
    shared_strings: Vec<String>,
    /// Cell type per XF index
    number_formats: Vec<CellType>,
    /// Sheet names with the stream offset of their BOF record
    sheets: Vec<(String, usize)>,
    /// Sheet, external sheet and defined names used to render formulas
    formulas: FormulaContext,
}

impl XlsWorkbook {
    /// Loads the workbook globals: date system, formats, shared strings and the sheet directory.
    pub fn open(path: impl AsRef<Path>) -> Result<XlsWorkbook, SheetMapperError> {
        let path = path.as_ref();
        let file_name = path.display().to_string();
        let mut buf_reader = BufReader::new(File::open(path)?);
        let cfb = Cfb::new(&mut buf_reader)?;
        let mut reader = cfb.read("Workbook")
            .ok_none_else(|| cfb.read("Book"))?
            .map(Biff8Reader::new)
            .ok_or_else(|| SpreadsheetError::SpreadsheetEmptyError(file_name.to_owned()))?;
        let mut is_1904 = false;
        let mut shared_strings = Vec::new();
        let mut custom_formats: HashMap<String, CellType> = HashMap::new();
        let mut format_indexes: Vec<String> = Vec::new();
        let mut sheets: Vec<(String, usize)> = Vec::new();
        let mut formulas = FormulaContext::default();
        match_biff8_record!(reader => {
            EOF => break,
            FILE_PASS if reader.read_u16()? != 0 => Err(SpreadsheetError::SpreadsheetPasswordProtectedError(file_name.to_owned()))?,
            DATE1904 if reader.read_u16()? == 1 => is_1904 = true,
            FORMAT => {
                let id = reader.read_u16()?;
                let format = reader.read_xl_unicode_string()?;
                custom_formats.insert(id.to_string(), CellType::parse_custom_number_format(&format, is_1904));
            }
            XF => {
                reader.skip(2)?;
                let id = reader.read_u16()?;
                format_indexes.push(id.to_string());
            }
            SST => shared_strings = load_shared_strings(&mut reader)?,
            BOUND_SHEET8 => {
                let pointer = reader.read_usize()?;
                reader.skip(2)?;
                let sheet_name = reader.read_short_xl_unicode_string()?;
                sheets.push((sheet_name, pointer));
            }
            EXTERN_SHEET => {
                let count = reader.read_u16()?;
                for _ in 0..count {
                    reader.skip(2)?;
                    let first = reader.read_u16()?;
                    let last = reader.read_u16()?;
                    formulas.external_sheets.push((first, last));
                }
            }
            NAME => formulas.names.push(read_defined_name(&mut reader)?),
        });
        if sheets.is_empty() {
            Err(SpreadsheetError::SpreadsheetEmptyError(file_name.to_owned()))?
        }

        formulas.sheets = sheets.iter().map(|(name, _)| name.to_owned()).collect();
        let number_formats = load_number_formats(format_indexes, custom_formats, is_1904);
        debug!(file = %file_name, sheets = sheets.len(), "opened xls workbook");

        Ok(XlsWorkbook {
            name: file_name,
            reader,
            shared_strings,
            number_formats,
            sheets,
            formulas,
        })
    }

    fn number_format(&self, index: usize) -> CellType {
        self.number_formats.get(index).copied().unwrap_or(CellType::Number)
    }
}

impl Workbook for XlsWorkbook {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.to_owned()).collect()
    }

    fn read_sheet(&mut self, name: &str) -> Result<Option<Sheet>, SheetMapperError> {
        let Some((sheet_name, pointer)) = self.sheets.iter().find(|(sheet_name, _)| sheet_name == name).cloned() else {
            return Ok(None);
        };

        self.reader.goto(pointer);
        self.reader.next()?;
        let mut sheet = Sheet::new(&sheet_name);
        // Shared and array formula bodies by their anchor cell, and the cells pointing at them
        let mut shared_formulas: HashMap<(usize, usize), Vec<u8>> = HashMap::new();
        let mut shared_cells: Vec<(usize, usize, (usize, usize))> = Vec::new();
        while let Some(tag) = self.reader.next()? {
            match tag {
                BOF | EOF => break,
                ROW => sheet.touch_row(self.reader.read_u16()? as usize),
                MUL_RK => {
                    let row = self.reader.read_u16()? as usize;
                    let col_lower_bound = self.reader.read_u16()? as usize;
                    let col_upper_bound = self.reader.get_u16_back(2)? as usize;
                    for col in col_lower_bound..=col_upper_bound {
                        let index = self.reader.read_u16()? as usize;
                        let value = self.reader.read_rk_number()?;
                        sheet.push(Cell::new(row, col, self.number_format(index), value));
                    }
                }
                MUL_BLANK => {
                    let row = self.reader.read_u16()? as usize;
                    let col_lower_bound = self.reader.read_u16()? as usize;
                    let col_upper_bound = self.reader.get_u16_back(2)? as usize;
                    for col in col_lower_bound..=col_upper_bound {
                        sheet.push(Cell::new(row, col, CellType::Empty, ""));
                    }
                }
                FORMULA => {
                    let row = self.reader.read_u16()? as usize;
                    let col = self.reader.read_u16()? as usize;
                    let rgce = read_formula_tokens(&mut self.reader, 16)?;
                    match shared_formula_anchor(&rgce) {
                        Some(anchor) => shared_cells.push((row, col, anchor)),
                        None => {
                            let formula = self.formulas.decode(&rgce, row, col)?;
                            sheet.push(Cell::new(row, col, CellType::Formula, formula));
                        }
                    }
                }
                SHARED_FORMULA | ARRAY => {
                    let row = self.reader.read_u16()? as usize;
                    self.reader.skip(2)?;
                    let col = self.reader.read_u8()? as usize;
                    self.reader.skip(1)?;
                    let skipped = if tag == SHARED_FORMULA { 2 } else { 6 };
                    shared_formulas.insert((row, col), read_formula_tokens(&mut self.reader, skipped)?);
                }
                BLANK | BOOL_ERR | NUMBER | RK | LABEL_SST | LABEL => {
                    let row = self.reader.read_u16()? as usize;
                    let col = self.reader.read_u16()? as usize;
                    let (either, value) = match tag {
                        BLANK => (Either::Left(CellType::Empty), String::new()),
                        BOOL_ERR => read_bool_or_error_cell(&mut self.reader)?,
                        NUMBER => read_number_cell(&mut self.reader)?,
                        RK => read_rk_cell(&mut self.reader)?,
                        LABEL_SST => read_label_sst_cell(&mut self.reader, &self.shared_strings)?,
                        _ => read_label_cell(&mut self.reader)?,
                    };
                    let kind = match either {
                        Either::Left(kind) => kind,
                        Either::Right(index) => self.number_format(index),
                    };
                    sheet.push(Cell::new(row, col, kind, value));
                }
                _ => (),
            }
        }
        for (row, col, anchor) in shared_cells {
            let rgce = shared_formulas
                .get(&anchor)
                .ok_or_else(|| XlsError::SharedFormulaError(index_to_reference(row, col)))?;
            let formula = self.formulas.decode(rgce, row, col)?;
            sheet.push(Cell::new(row, col, CellType::Formula, formula));
        }
        debug!(sheet = %sheet.name, last_row = ?sheet.last_row(), "read xls sheet");
        Ok(Some(sheet))
    }
}

fn load_shared_strings(reader: &mut Biff8Reader) -> Result<Vec<String>, SheetMapperError> {
    let mut shared_strings: Vec<String> = Vec::new();
    reader.skip(4)?;
    let count = reader.read_usize()?;
    for _ in 0..count {
        let string = reader.read_xl_unicode_rich_extended_string()?;
        shared_strings.push(string);
    }
    Ok(shared_strings)
}

/// A flag byte of 0 marks a boolean, otherwise the byte before it is an error code.
fn read_bool_or_error_cell(reader: &mut Biff8Reader) -> Result<(Either<CellType, usize>, String), SheetMapperError> {
    reader.skip(2)?;
    let value = reader.read_u8()?;
    let flag = reader.read_u8()?;
    if flag == 0 {
        Ok((Either::Left(CellType::Boolean), value.to_string()))
    } else {
        Ok((Either::Left(CellType::Error), to_error_value(value).to_owned()))
    }
}

fn read_number_cell(reader: &mut Biff8Reader) -> Result<(Either<CellType, usize>, String), SheetMapperError> {
    let index = reader.read_u16()? as usize;
    let value = reader.read_f64()?;
    Ok((Either::Right(index), value.to_string()))
}

fn read_rk_cell(reader: &mut Biff8Reader) -> Result<(Either<CellType, usize>, String), SheetMapperError> {
    let index = reader.read_u16()? as usize;
    let value = reader.read_rk_number()?;
    Ok((Either::Right(index), value))
}

fn read_label_sst_cell(reader: &mut Biff8Reader, shared_strings: &[String]) -> Result<(Either<CellType, usize>, String), SheetMapperError> {
    reader.skip(2)?;
    let index = reader.read_usize()?;
    let value = shared_strings
        .get(index)
        .ok_or(XlsError::SharedStringIndexError(index))?;
    Ok((Either::Left(CellType::String), value.to_owned()))
}

fn read_label_cell(reader: &mut Biff8Reader) -> Result<(Either<CellType, usize>, String), SheetMapperError> {
    reader.skip(2)?;
    let value = reader.read_xl_unicode_string()?;
    Ok((Either::Left(CellType::String), value))
}

/// Skips `skipped` bytes of record fields, then reads the token length and the tokens.
fn read_formula_tokens(reader: &mut Biff8Reader, skipped: usize) -> Result<Vec<u8>, SheetMapperError> {
    reader.skip(skipped)?;
    let length = reader.read_u16()? as usize;
    reader.read_bytes(length)
}

/// A formula made of a single PtgExp token points at the anchor cell of a shared or array formula.
fn shared_formula_anchor(rgce: &[u8]) -> Option<(usize, usize)> {
    match rgce {
        [0x01, row_low, row_high, col_low, col_high, ..] => Some((
            u16::from_le_bytes([*row_low, *row_high]) as usize,
            u16::from_le_bytes([*col_low, *col_high]) as usize,
        )),
        _ => None,
    }
}

/// Reads a NAME record; built-in names store a one-character code instead of their text.
fn read_defined_name(reader: &mut Biff8Reader) -> Result<String, SheetMapperError> {
    let options = reader.read_u16()?;
    reader.skip(1)?;
    let chars = reader.read_u8()? as usize;
    reader.skip(10)?;
    let name = reader.read_xl_unicode_string_no_cch(chars)?;
    if (options & 0x0020) != 0 {
        let code = name.chars().next().map(|c| c as usize).unwrap_or_default();
        Ok(BUILTIN_NAMES.get(code).map(|builtin| builtin.to_string()).unwrap_or(name))
    } else {
        Ok(name)
    }
}
