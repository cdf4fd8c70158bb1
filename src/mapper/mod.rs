//! Row to record mapping.
//!
//! A [`SheetMapper`] reads the header row of one sheet, matches its titles
//! against the headers bound on a [`Record`] type and builds one record per
//! row below it.
pub(crate) mod coerce;
pub mod correspondence;
pub mod field;

use crate::error::ResultMessage;
use crate::error::SheetMapperError;
use crate::mapper::coerce::Coercion;
use crate::mapper::correspondence::column_correspondence;
use crate::mapper::correspondence::header_correspondence;
use crate::mapper::field::FieldDescriptor;
use crate::mapper::field::Record;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::open_workbook;
use crate::spreadsheet::Workbook;
use chrono::format::Item;
use chrono::format::StrftimeItems;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

pub const DEFAULT_SHEET_NAME: &str = "Sheet1";
/// 1-based header row
pub const DEFAULT_START_ROW: usize = 1;
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// 12-hour rendering kept for output that must match older exports.
pub const LEGACY_DATE_FORMAT: &str = "%Y-%m-%d %I:%M:%S";

/// What a blank cell assigns to its field.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BlankCellPolicy {
    /// Assign an empty string; fails for fields that are not strings.
    #[default]
    EmptyString,
    /// Leave the field at its default value.
    FieldDefault,
}

/// What happens when a cell cannot be assigned.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RowErrorPolicy {
    /// Fail the whole parse.
    #[default]
    Abort,
    /// Drop the row's record and continue.
    SkipRow,
    /// Leave the field untouched and continue with the row.
    SkipCell,
}

/// Maps the rows of one sheet to records.
///
/// ```no_run
/// use sheet_mapper::SheetMapper;
///
/// #[derive(Default)]
/// struct Person {
///     name: String,
///     age: i32,
/// }
///
/// sheet_mapper::impl_record!(Person {
///     name => "Name",
///     age => "Age",
/// });
///
/// let people = SheetMapper::new("people.xlsx")
///     .sheet_name("People")
///     .start_row(2)?
///     .parse::<Person>()?;
/// # Ok::<(), sheet_mapper::SheetMapperError>(())
/// ```
#[derive(Clone, Debug)]
pub struct SheetMapper {
    path: PathBuf,
    sheet_name: String,
    /// 1-based header row; data starts on the row below
    start_row: usize,
    date_format: String,
    blank_cells: BlankCellPolicy,
    on_row_error: RowErrorPolicy,
}

impl SheetMapper {
    pub fn new(path: impl AsRef<Path>) -> Self {
        SheetMapper {
            path: path.as_ref().to_path_buf(),
            sheet_name: DEFAULT_SHEET_NAME.to_owned(),
            start_row: DEFAULT_START_ROW,
            date_format: DEFAULT_DATE_FORMAT.to_owned(),
            blank_cells: BlankCellPolicy::default(),
            on_row_error: RowErrorPolicy::default(),
        }
    }

    pub fn sheet_name(mut self, sheet_name: &str) -> Self {
        self.sheet_name = sheet_name.to_owned();
        self
    }

    /// Sets the 1-based header row.
    pub fn start_row(mut self, start_row: usize) -> Result<Self, SheetMapperError> {
        if start_row < 1 {
            Err(SheetMapperError::ConfigurationError(format!(
                "start row must be at least 1, got {}",
                start_row
            )))?
        }
        self.start_row = start_row;
        Ok(self)
    }

    /// Sets the strftime pattern used when a date cell lands in a string field.
    pub fn date_format(mut self, pattern: &str) -> Result<Self, SheetMapperError> {
        if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            Err(SheetMapperError::ConfigurationError(format!(
                "invalid date format '{}'",
                pattern
            )))?
        }
        self.date_format = pattern.to_owned();
        Ok(self)
    }

    pub fn blank_cells(mut self, policy: BlankCellPolicy) -> Self {
        self.blank_cells = policy;
        self
    }

    pub fn on_row_error(mut self, policy: RowErrorPolicy) -> Self {
        self.on_row_error = policy;
        self
    }

    /// Reads the file and maps the sheet.
    ///
    /// Returns `Ok(None)` when the sheet does not exist and also when reading or
    /// assigning fails; those failures are logged. Only configuration errors
    /// are returned as `Err`.
    pub fn parse<T: Record>(&self) -> Result<Option<Vec<T>>, SheetMapperError> {
        match self.try_parse() {
            Ok(records) => Ok(records),
            Err(e) if e.is_configuration() => Err(e),
            Err(e) => {
                error!(file = %self.path.display(), sheet = %self.sheet_name, "failed to parse sheet: {}", e);
                Ok(None)
            }
        }
    }

    /// Like [`parse`](Self::parse), but returns every error to the caller.
    pub fn try_parse<T: Record>(&self) -> Result<Option<Vec<T>>, SheetMapperError> {
        let mut workbook = open_workbook(&self.path).with_prefix(&self.path.display().to_string())?;
        self.parse_workbook(&mut workbook)
    }

    /// Maps a sheet of an already opened workbook.
    pub fn parse_workbook<T: Record, W: Workbook + ?Sized>(&self, workbook: &mut W) -> Result<Option<Vec<T>>, SheetMapperError> {
        let headers = header_correspondence::<T>();
        let Some(sheet) = workbook.read_sheet(&self.sheet_name)? else {
            info!(workbook = %workbook.name(), sheet = %self.sheet_name, "sheet not found");
            return Ok(None);
        };
        let columns = column_correspondence(sheet.row(self.start_row - 1))?;
        debug!(sheet = %sheet.name, headers = headers.len(), columns = columns.len(), "resolved header row");

        let coercion = Coercion {
            date_format: &self.date_format,
            blank_cells: self.blank_cells,
        };
        let mut records = Vec::new();
        if let Some(last_row) = sheet.last_row() {
            for row in self.start_row..=last_row {
                if let Some(record) = self.map_row(sheet.row(row), &headers, &columns, &coercion)? {
                    records.push(record);
                }
            }
        }
        debug!(sheet = %sheet.name, records = records.len(), "mapped sheet");
        Ok(Some(records))
    }

    /// Builds one record; `None` when the row is skipped by policy.
    fn map_row<T: Record>(
        &self,
        cells: &[Cell],
        headers: &HashMap<String, FieldDescriptor<T>>,
        columns: &HashMap<usize, String>,
        coercion: &Coercion,
    ) -> Result<Option<T>, SheetMapperError> {
        let mut record = T::default();
        for cell in cells {
            let Some(descriptor) = columns.get(&cell.col).and_then(|header| headers.get(header)) else {
                continue;
            };
            if let Err(e) = assign(&mut record, cell, descriptor, coercion) {
                match self.on_row_error {
                    RowErrorPolicy::Abort => return Err(e),
                    RowErrorPolicy::SkipRow => {
                        warn!(cell = %cell.reference(), "skipping row: {}", e);
                        return Ok(None);
                    }
                    RowErrorPolicy::SkipCell => warn!(cell = %cell.reference(), "skipping cell: {}", e),
                }
            }
        }
        Ok(Some(record))
    }
}

fn assign<T>(record: &mut T, cell: &Cell, descriptor: &FieldDescriptor<T>, coercion: &Coercion) -> Result<(), SheetMapperError> {
    let value = cell.value()?;
    if let Some(value) = coercion.coerce(value, descriptor.field_type())? {
        descriptor.assign(record, value)?;
    }
    Ok(())
}

/// Maps `sheet_name` of the file at `path`, taking headers from the 1-based `start_row`.
/// Behaves like [`SheetMapper::parse`].
pub fn parse<T: Record>(path: impl AsRef<Path>, sheet_name: &str, start_row: usize) -> Result<Option<Vec<T>>, SheetMapperError> {
    SheetMapper::new(path)
        .sheet_name(sheet_name)
        .start_row(start_row)?
        .parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::cell::CellType;
    use crate::spreadsheet::memory::MemoryWorkbook;
    use crate::spreadsheet::xls::tests::compound_file;
    use crate::spreadsheet::xls::tests::workbook_stream;
    use crate::spreadsheet::xlsx::tests::write_workbook;
    use chrono::NaiveDate;
    use chrono::NaiveDateTime;
    use rust_decimal::Decimal;

    #[derive(Default, Debug, PartialEq)]
    struct Person {
        name: String,
        age: i32,
        score: f64,
        active: bool,
        note: String,
        unmapped: String,
    }

    crate::impl_record!(Person {
        name => "Name",
        age => "Age",
        score => "Score",
        active => "Active",
        note => "Note",
    });

    #[derive(Default, Debug, PartialEq)]
    struct Values {
        text: String,
        count: i32,
        long: i64,
        short: i16,
        byte: i8,
        float: f32,
        amount: Option<Decimal>,
        when: Option<NaiveDateTime>,
    }

    crate::impl_record!(Values {
        text => "Text",
        count => "Count",
        long => "Long",
        short => "Short",
        byte => "Byte",
        float => "Float",
        amount => "Amount",
        when => "When",
    });

    #[derive(Default, Debug, PartialEq)]
    struct Nothing {
        name: String,
    }

    crate::impl_record!(Nothing {});

    fn string(value: &str) -> (CellType, &str) {
        (CellType::String, value)
    }

    fn number(value: &str) -> (CellType, &str) {
        (CellType::Number, value)
    }

    fn people() -> MemoryWorkbook {
        MemoryWorkbook::new("memory").with_rows("Sheet1", [
            &[string("Name"), string("Age"), string("Score"), string("Active"), string("Extra")][..],
            &[string("Ada"), number("36"), number("9.5"), (CellType::Boolean, "1"), string("x")][..],
            &[][..],
            &[string("Bob")][..],
        ])
    }

    fn mapper() -> SheetMapper {
        SheetMapper::new("unused.xlsx")
    }

    #[test]
    fn one_record_per_row_including_blank_rows() {
        let records: Vec<Person> = mapper().parse_workbook(&mut people()).unwrap().unwrap();
        assert_eq!(records, vec![
            Person { name: "Ada".to_owned(), age: 36, score: 9.5, active: true, ..Default::default() },
            Person::default(),
            Person { name: "Bob".to_owned(), ..Default::default() },
        ]);
    }

    #[test]
    fn unbound_record_stays_default() {
        let records: Vec<Nothing> = mapper().parse_workbook(&mut people()).unwrap().unwrap();
        assert_eq!(records, vec![Nothing::default(), Nothing::default(), Nothing::default()]);
    }

    #[test]
    fn header_row_can_move_down() {
        let mut workbook = MemoryWorkbook::new("memory").with_rows("Data", [
            &[string("Report")][..],
            &[string("Name"), string("Age")][..],
            &[string("Ada"), number("36")][..],
        ]);
        let mapper = mapper().sheet_name("Data").start_row(2).unwrap();
        let records: Vec<Person> = mapper.parse_workbook(&mut workbook).unwrap().unwrap();
        assert_eq!(records, vec![Person { name: "Ada".to_owned(), age: 36, ..Default::default() }]);

        let mapper = mapper.start_row(5).unwrap();
        let records: Vec<Person> = mapper.parse_workbook(&mut workbook).unwrap().unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn missing_sheet_is_none() {
        let records: Option<Vec<Person>> = mapper().sheet_name("Other").parse_workbook(&mut people()).unwrap();
        assert!(records.is_none());
    }

    #[test]
    fn rejects_invalid_configuration_before_reading() {
        let error = SheetMapper::new("missing.xlsx").start_row(0).unwrap_err();
        assert!(error.is_configuration());
        let error = parse::<Person>("missing.xlsx", DEFAULT_SHEET_NAME, 0).unwrap_err();
        assert_eq!(error.to_string(), "Invalid configuration: start row must be at least 1, got 0");
        assert!(SheetMapper::new("missing.xlsx").date_format("%Y-%Q").unwrap_err().is_configuration());
    }

    #[test]
    fn data_errors_are_swallowed_by_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.xlsx");
        assert_eq!(parse::<Person>(&path, DEFAULT_SHEET_NAME, 1).unwrap(), None);
        let error = SheetMapper::new(&path).try_parse::<Person>().unwrap_err();
        assert!(matches!(error, SheetMapperError::WithContextError(_)));
    }

    #[test]
    fn blank_cells_follow_policy() {
        let mut workbook = MemoryWorkbook::new("memory").with_rows("Sheet1", [
            &[string("Name"), string("Age")][..],
            &[(CellType::Empty, ""), number("1")][..],
        ]);
        let mut sheet = workbook.read_sheet("Sheet1").unwrap().unwrap();
        sheet.push(Cell::new(1, 0, CellType::Empty, ""));
        sheet.push(Cell::new(2, 1, CellType::Empty, ""));
        let mut workbook = MemoryWorkbook::new("memory").with_sheet(sheet);

        let error = mapper().parse_workbook::<Person, _>(&mut workbook).unwrap_err();
        assert!(matches!(error, SheetMapperError::FieldAccessError(_)));

        let records: Vec<Person> = mapper()
            .blank_cells(BlankCellPolicy::FieldDefault)
            .parse_workbook(&mut workbook)
            .unwrap()
            .unwrap();
        assert_eq!(records, vec![Person { age: 1, ..Default::default() }, Person::default()]);
    }

    #[test]
    fn row_errors_follow_policy() {
        let mut workbook = MemoryWorkbook::new("memory").with_rows("Sheet1", [
            &[string("Name"), string("Active")][..],
            &[string("Ada"), string("yes")][..],
            &[string("Bob"), (CellType::Boolean, "0")][..],
        ]);

        assert!(mapper().parse_workbook::<Person, _>(&mut workbook).is_err());

        let records: Vec<Person> = mapper()
            .on_row_error(RowErrorPolicy::SkipRow)
            .parse_workbook(&mut workbook)
            .unwrap()
            .unwrap();
        assert_eq!(records, vec![Person { name: "Bob".to_owned(), ..Default::default() }]);

        let records: Vec<Person> = mapper()
            .on_row_error(RowErrorPolicy::SkipCell)
            .parse_workbook(&mut workbook)
            .unwrap()
            .unwrap();
        assert_eq!(records, vec![
            Person { name: "Ada".to_owned(), ..Default::default() },
            Person { name: "Bob".to_owned(), ..Default::default() },
        ]);
    }

    #[test]
    fn maps_xlsx_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.XLSX");
        let header = r#"<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1" t="s"><v>2</v></c><c r="D1" t="s"><v>3</v></c><c r="E1" t="s"><v>4</v></c><c r="F1" t="s"><v>5</v></c><c r="G1" t="s"><v>6</v></c><c r="H1" t="s"><v>7</v></c></row>"#;
        let first = r#"<row r="2"><c r="A2"><v>42</v></c><c r="B2"><v>42</v></c><c r="C2"><v>1.23E10</v></c><c r="D2"><v>-7.9</v></c><c r="E2" t="e"><v>#N/A</v></c><c r="F2"><v>0.25</v></c><c r="G2"><v>12.345</v></c><c r="H2" s="1"><v>43832.627835648148</v></c></row>"#;
        let second = r#"<row r="4"><c r="A4"><v>1.23E10</v></c><c r="B4"><f>SUM(B2,1)</f><v>43</v></c><c r="H4" s="2"><v>43832.627835648148</v></c></row>"#;
        let rows = format!("{}{}{}", header, first, second);
        write_workbook(&path, "Values", &rows, &["Text", "Count", "Long", "Short", "Byte", "Float", "Amount", "When"], false);

        let records: Vec<Values> = SheetMapper::new(&path)
            .sheet_name("Values")
            .blank_cells(BlankCellPolicy::FieldDefault)
            .on_row_error(RowErrorPolicy::SkipCell)
            .parse()
            .unwrap()
            .unwrap();
        let when = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap().and_hms_opt(15, 4, 5).unwrap();
        assert_eq!(records, vec![
            Values {
                text: "42".to_owned(),
                count: 42,
                long: 12_300_000_000,
                short: -7,
                byte: 0x2A,
                float: 0.25,
                amount: Some(Decimal::new(12345, 3)),
                when: Some(when),
            },
            Values::default(),
            Values { text: "12300000000".to_owned(), when: Some(when), ..Default::default() },
        ]);
    }

    #[test]
    fn renders_dates_into_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dates.xlsx");
        let rows = r#"<row r="1"><c r="A1" t="inlineStr"><is><t>Text</t></is></c></row><row r="2"><c r="A2" s="1"><v>43832.627835648148</v></c></row>"#;
        write_workbook(&path, DEFAULT_SHEET_NAME, rows, &[], false);

        let records: Vec<Values> = crate::parse(&path, crate::DEFAULT_SHEET_NAME, crate::DEFAULT_START_ROW).unwrap().unwrap();
        assert_eq!(records[0].text, "2020-01-02 15:04:05");

        let records: Vec<Values> = SheetMapper::new(&path)
            .date_format(LEGACY_DATE_FORMAT)
            .unwrap()
            .parse()
            .unwrap()
            .unwrap();
        assert_eq!(records[0].text, "2020-01-02 03:04:05");

        assert_eq!(parse::<Values>(&path, "Missing", 1).unwrap(), None);
    }

    #[test]
    fn formula_text_reaches_string_fields() {
        let mut workbook = MemoryWorkbook::new("memory").with_rows("Sheet1", [
            &[string("Note")][..],
            &[(CellType::Formula, "CONCAT(A1,\"!\")")][..],
        ]);
        let records: Vec<Person> = mapper().parse_workbook(&mut workbook).unwrap().unwrap();
        assert_eq!(records[0].note, "CONCAT(A1,\"!\")");
    }

    #[test]
    fn declared_rows_without_cells_become_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("declared.xlsx");
        let rows = r#"<row r="1"><c r="A1" t="inlineStr"><is><t>Name</t></is></c></row><row r="2"><c r="A2" t="inlineStr"><is><t>Ann</t></is></c></row><row r="3"/><row r="4"/>"#;
        write_workbook(&path, DEFAULT_SHEET_NAME, rows, &[], false);

        let records: Vec<Person> = parse(&path, DEFAULT_SHEET_NAME, 1).unwrap().unwrap();
        assert_eq!(records, vec![
            Person { name: "Ann".to_owned(), ..Default::default() },
            Person::default(),
            Person::default(),
        ]);
    }

    #[test]
    fn maps_xls_files() {
        #[derive(Default, Debug, PartialEq)]
        struct Entry {
            name: String,
            when: String,
        }

        crate::impl_record!(Entry {
            name => "name",
            when => "when",
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entries.xls");
        std::fs::write(&path, compound_file(&workbook_stream())).unwrap();

        let records: Vec<Entry> = parse(&path, "Data", 1).unwrap().unwrap();
        assert_eq!(records, vec![
            Entry { name: "42".to_owned(), when: "2020-01-02 12:00:00".to_owned() },
            Entry::default(),
        ]);
    }

    #[test]
    fn mapper_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SheetMapper>();
    }
}
