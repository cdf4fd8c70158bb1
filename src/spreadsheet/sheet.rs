use crate::spreadsheet::cell::Cell;
use std::collections::BTreeMap;

/// Cells of one sheet grouped by row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sheet {
    /// Sheet name
    pub name: String,
    /// Populated rows keyed by row index (0-based); cells within a row are kept in column order
    rows: BTreeMap<usize, Vec<Cell>>,
    /// Highest row index seen, including rows declared without cells
    last_row: Option<usize>,
}

impl Sheet {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            rows: BTreeMap::new(),
            last_row: None,
        }
    }

    /// Returns true if the sheet contains no cells.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Adds a cell, replacing any earlier cell at the same position.
    pub fn push(&mut self, cell: Cell) {
        self.touch_row(cell.row);
        let row = self.rows.entry(cell.row).or_default();
        match row.binary_search_by_key(&cell.col, |existing| existing.col) {
            Ok(index) => row[index] = cell,
            Err(index) => row.insert(index, cell),
        }
    }

    /// Marks a row as present even when it holds no cells.
    pub fn touch_row(&mut self, index: usize) {
        self.last_row = self.last_row.max(Some(index));
    }

    /// Index of the last row present in the sheet, with or without cells.
    pub fn last_row(&self) -> Option<usize> {
        self.last_row
    }

    /// Cells of a row in column order; empty for a missing row.
    pub fn row(&self, index: usize) -> &[Cell] {
        self.rows.get(&index).map(Vec::as_slice).unwrap_or_default()
    }

    /// Looks up a single cell.
    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        let cells = self.row(row);
        cells
            .binary_search_by_key(&col, |cell| cell.col)
            .ok()
            .map(|index| &cells[index])
    }
}
