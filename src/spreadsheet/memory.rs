use crate::error::SheetMapperError;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::Workbook;

/// Workbook assembled in memory, for callers whose rows do not come from a file.
#[derive(Clone, Debug, Default)]
pub struct MemoryWorkbook {
    name: String,
    sheets: Vec<Sheet>,
}

impl MemoryWorkbook {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            sheets: Vec::new(),
        }
    }

    /// Adds a sheet; a sheet with the same name is replaced.
    pub fn with_sheet(mut self, sheet: Sheet) -> Self {
        self.sheets.retain(|existing| existing.name != sheet.name);
        self.sheets.push(sheet);
        self
    }

    /// Builds a sheet from rows of `(cell type, raw value)` starting at row 0, column 0.
    /// `CellType::Empty` entries leave the position unpopulated.
    pub fn with_rows<'a, R>(self, name: &str, rows: R) -> Self
    where
        R: IntoIterator<Item = &'a [(CellType, &'a str)]>,
    {
        let mut sheet = Sheet::new(name);
        for (row, cells) in rows.into_iter().enumerate() {
            for (col, (kind, value)) in cells.iter().enumerate() {
                if *kind != CellType::Empty {
                    sheet.push(Cell::new(row, col, *kind, *value));
                }
            }
        }
        self.with_sheet(sheet)
    }
}

impl Workbook for MemoryWorkbook {
    fn name(&self) -> String {
        self.name.to_owned()
    }

    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|sheet| sheet.name.to_owned()).collect()
    }

    fn read_sheet(&mut self, name: &str) -> Result<Option<Sheet>, SheetMapperError> {
        Ok(self.sheets.iter().find(|sheet| sheet.name == name).cloned())
    }
}
