use crate::error::SheetMapperError;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::xml::XmlReader;
use crate::helpers::xml::XmlTextContextHelper;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::excel;
use crate::spreadsheet::excel::load_relationships;
use crate::spreadsheet::reference::index_to_reference;
use crate::spreadsheet::reference::reference_to_index;
use crate::spreadsheet::reference::shift_formula;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::FileReader;
use crate::spreadsheet::SpreadsheetError;
use crate::spreadsheet::Workbook;
use quick_xml::events::Event;
use quick_xml::name::QName;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::BufRead;
use std::io::Read;
use std::io::Seek;
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

const TAG_CUSTOM_FORMATS: QName = QName(b"numFmts");
const TAG_CUSTOM_FORMAT: QName = QName(b"numFmt");
const TAG_FORMAT_INDEXES: QName = QName(b"cellXfs");
const TAG_FORMAT_INDEX: QName = QName(b"xf");
const TAG_SHARED_STRING_ITEM: QName = QName(b"si");
const TAG_PHONETIC_TEXT: QName = QName(b"rPh");
const TAG_TEXT: QName = QName(b"t");
const TAG_WORKBOOK_PROPERTIES: QName = QName(b"workbookPr");
const TAG_SHEET: QName = QName(b"sheet");
const TAG_ROW: QName = QName(b"row");
const TAG_CELL: QName = QName(b"c");
const TAG_FORMULA: QName = QName(b"f");
const TAG_INLINE_STRING: QName = QName(b"is");
const TAG_VALUE: QName = QName(b"v");

/// Office Open XML workbook (`.xlsx`, `.xlsm`).
pub struct XlsxWorkbook {
    name: String,
    zip: ZipArchive<FileReader>,
    /// Cell type per style index
    number_formats: Vec<CellType>,
    /// (sheet name, part path) in workbook order
    sheets: Vec<(String, String)>,
    /// Loaded on the first sheet read
    shared_strings: Option<Vec<String>>,
}

impl XlsxWorkbook {
    pub fn open(path: impl AsRef<Path>) -> Result<XlsxWorkbook, SheetMapperError> {
        let path = path.as_ref();
        let (zip, number_formats, sheets) = excel::open(path, load_workbook, load_number_formats)?;
        debug!(file = %path.display(), sheets = sheets.len(), "opened xlsx workbook");
        Ok(XlsxWorkbook {
            name: path.display().to_string(),
            zip,
            number_formats,
            sheets,
            shared_strings: None,
        })
    }
}

impl Workbook for XlsxWorkbook {
    fn name(&self) -> String {
        self.name.to_owned()
    }

    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.to_owned()).collect()
    }

    fn read_sheet(&mut self, name: &str) -> Result<Option<Sheet>, SheetMapperError> {
        let Some((sheet_name, zip_path)) = self.sheets.iter().find(|(sheet_name, _)| sheet_name == name) else {
            return Ok(None);
        };
        if self.shared_strings.is_none() {
            self.shared_strings = Some(load_shared_strings(&mut self.zip)?);
        }
        let shared_strings = self.shared_strings.as_deref().unwrap_or_default();

        let mut sheet = Sheet::new(sheet_name);
        let mut row_count = 0usize;
        let mut col_count = 0usize;
        let mut row = 0usize;
        let mut col = 0usize;
        let mut kind = CellType::default();
        let mut is_shared_string = false;
        let mut formula = String::new();
        // Shared formula text by its index, with the anchor cell it was written for
        let mut shared_formulas: HashMap<String, (usize, usize, String)> = HashMap::new();
        let mut value = String::new();
        let mut reader = self.zip.xml_reader(zip_path)?
            .ok_or_else(|| SpreadsheetError::FileError(zip_path.to_owned()))?;
        match_xml_events!(reader => {
            Event::Start(event) if event.name() == TAG_ROW => {
                if let Some(index) = event.get_attribute_value("r")? {
                    row_count = index.parse::<usize>()?.saturating_sub(1);
                }
                sheet.touch_row(row_count);
                col_count = 0;
            }
            Event::End(event) if event.name() == TAG_ROW => {
                row_count += 1;
            }
            Event::Start(event) if event.name() == TAG_CELL => {
                (row, col) = event.get_attribute_value("r")?
                    .and_then(|reference| reference_to_index(&reference))
                    .unwrap_or((row_count, col_count));
                col_count = col + 1;
                is_shared_string = false;
                kind = match event.get_attribute_value("t")?.as_deref() {
                    Some("inlineStr") | Some("str") => CellType::String,
                    Some("s") => {
                        is_shared_string = true;
                        CellType::String
                    }
                    Some("d") => CellType::IsoDateTime,
                    Some("b") => CellType::Boolean,
                    Some("e") => CellType::Error,
                    _ => CellType::Number,
                };
                if let Some(format_id) = event.get_attribute_value("s")? {
                    if kind == CellType::Number && !format_id.is_empty() {
                        let index = format_id.parse::<usize>()?;
                        kind = self.number_formats.get(index).copied().unwrap_or(CellType::Number);
                    }
                }
                formula.clear();
                value.clear();
            }
            Event::Start(event) if event.name() == TAG_FORMULA => {
                let is_shared = event.get_attribute_value("t")?.as_deref() == Some("shared");
                let shared_index = event.get_attribute_value("si")?.map(Cow::into_owned);
                formula = read_string_value(&mut reader, TAG_FORMULA, true)?;
                if let (true, Some(shared_index)) = (is_shared, shared_index) {
                    if !formula.is_empty() {
                        shared_formulas.insert(shared_index, (row, col, formula.to_owned()));
                    } else {
                        let (anchor_row, anchor_col, text) = shared_formulas.get(&shared_index)
                            .ok_or_else(|| SpreadsheetError::SharedFormulaError(index_to_reference(row, col), shared_index.to_owned()))?;
                        let rows = row as isize - *anchor_row as isize;
                        let cols = col as isize - *anchor_col as isize;
                        formula = shift_formula(text, rows, cols);
                    }
                }
            }
            Event::Start(event) if event.name() == TAG_INLINE_STRING => {
                value = read_string_value(&mut reader, TAG_INLINE_STRING, false)?;
            }
            Event::Start(event) if event.name() == TAG_VALUE => {
                value = read_string_value(&mut reader, TAG_VALUE, true)?;
            }
            Event::End(event) if event.name() == TAG_CELL => {
                let cell = if !formula.is_empty() {
                    Cell::new(row, col, CellType::Formula, formula.to_owned())
                } else if is_shared_string && !value.is_empty() {
                    let index = value.trim().parse::<usize>()?;
                    let string = shared_strings.get(index)
                        .ok_or_else(|| SpreadsheetError::CellValueError(
                            index_to_reference(row, col),
                            value.to_owned(),
                        ))?;
                    Cell::new(row, col, CellType::String, string.to_owned())
                } else if value.is_empty() && kind != CellType::String {
                    Cell::new(row, col, CellType::Empty, "")
                } else {
                    Cell::new(row, col, kind, value.to_owned())
                };
                sheet.push(cell);
            }
        });
        debug!(sheet = %sheet.name, last_row = ?sheet.last_row(), "read xlsx sheet");
        Ok(Some(sheet))
    }
}

/// Reads sheet names, their part paths and the date system from `xl/workbook.xml`.
fn load_workbook<RS: Read + Seek>(zip: &mut ZipArchive<RS>) -> Result<(Vec<(String, String)>, bool), SheetMapperError> {
    let relationships = load_relationships(zip, "xl/_rels/workbook.xml.rels")?;
    let mut reader = zip.xml_reader("xl/workbook.xml")?
        .ok_or_else(|| SpreadsheetError::FileError("xl/workbook.xml".to_string()))?;
    let mut sheets: Vec<(String, String)> = Vec::new();
    let mut is_1904 = false;
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHEET => {
            let mut name = None::<Cow<str>>;
            let mut id = None::<Cow<str>>;
            for result in event.attributes() {
                let attribute = result?;
                // The relationship id carries a namespace prefix that varies between writers
                let key = attribute.key.local_name();
                if key.as_ref() == b"name" {
                    name = Some(attribute.unescape_value()?);
                } else if key.as_ref() == b"id" {
                    id = Some(attribute.unescape_value()?);
                }
            }
            if let Some((name, id)) = name.zip(id) {
                if let Some(path) = relationships.get(id.as_ref()) {
                    sheets.push((name.to_string(), path.to_owned()));
                }
            }
        }
        Event::Start(event) if event.name() == TAG_WORKBOOK_PROPERTIES => {
            is_1904 = event.get_attribute_value("date1904")?
                .map(|value| value == "1" || value == "true")
                .unwrap_or(false);
        }
    });
    Ok((sheets, is_1904))
}

/// Reads `xl/styles.xml` into a cell type per style index.
fn load_number_formats<RS: Read + Seek>(zip: &mut ZipArchive<RS>, is_1904: bool) -> Result<Vec<CellType>, SheetMapperError> {
    let mut reader = match zip.xml_reader("xl/styles.xml")? {
        Some(reader) => reader,
        None => return Ok(Vec::new()),
    };

    let mut custom_formats_context = false;
    let mut custom_formats = HashMap::<String, CellType>::new();
    let mut format_indexes_context = false;
    let mut format_indexes = Vec::<String>::new();

    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_CUSTOM_FORMATS => custom_formats_context = true,
        Event::End(event) if event.name() == TAG_CUSTOM_FORMATS => custom_formats_context = false,
        Event::Start(event) if custom_formats_context && event.name() == TAG_CUSTOM_FORMAT => {
            let id = event.get_attribute_value("numFmtId")?;
            let format = event.get_attribute_value("formatCode")?;
            if let Some((id, format)) = id.zip(format) {
                custom_formats.insert(id.to_string(), CellType::parse_custom_number_format(&format, is_1904));
            }
        }
        Event::Start(event) if event.name() == TAG_FORMAT_INDEXES => format_indexes_context = true,
        Event::End(event) if event.name() == TAG_FORMAT_INDEXES => format_indexes_context = false,
        Event::Start(event) if format_indexes_context && event.name() == TAG_FORMAT_INDEX => {
            let id = event.get_attribute_value("numFmtId")?;
            format_indexes.push(id.map(|id| id.to_string()).unwrap_or_else(|| "0".to_owned()));
        }
    });

    Ok(excel::load_number_formats(format_indexes, custom_formats, is_1904))
}

fn load_shared_strings<RS: Read + Seek>(zip: &mut ZipArchive<RS>) -> Result<Vec<String>, SheetMapperError> {
    let mut shared_strings = Vec::<String>::new();
    let mut reader = match zip.xml_reader("xl/sharedStrings.xml")? {
        Some(reader) => reader,
        None => return Ok(shared_strings),
    };
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHARED_STRING_ITEM => {
            shared_strings.push(read_string_value(&mut reader, TAG_SHARED_STRING_ITEM, false)?);
        }
    });
    Ok(shared_strings)
}

/// Collects text up to `end_tag`, skipping phonetic runs.
/// With `is_text_content` the element's own text counts; otherwise only `<t>` children do.
fn read_string_value<R: BufRead>(reader: &mut XmlReader<R>, end_tag: QName, is_text_content: bool) -> Result<String, SheetMapperError> {
    let mut is_phonetic_text = false;
    let mut is_text = is_text_content;
    let mut text = String::new();
    match_xml_events!(reader => {
        Event::End(event) if event.name() == end_tag => break,
        Event::Start(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = true,
        Event::End(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = false,
        Event::Start(event) if !is_phonetic_text && event.name() == TAG_TEXT => is_text = true,
        Event::End(event) if is_text && event.name() == TAG_TEXT => is_text = false,
        Event::Text(event) if is_text => text.push_str(&event.xml_content()?),
        Event::CData(event) if is_text => text.push_str(&event.xml_content()?),
        Event::GeneralRef(event) if is_text => text.push_bytes_ref(&event)?,
    });
    Ok(text)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::spreadsheet::cell::CellValue;
    use std::io::Write;
    use std::path::PathBuf;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/></Types>"#;

    const RELATIONSHIPS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId9" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

    /// Cell style 1 is a built-in date format, style 2 a custom date format, style 3 plain.
    const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><numFmts count="2"><numFmt numFmtId="164" formatCode="yyyy-mm-dd hh:mm:ss"/><numFmt numFmtId="165" formatCode="0.000"/></numFmts><cellXfs count="4"><xf numFmtId="0"/><xf numFmtId="22"/><xf numFmtId="164"/><xf numFmtId="165"/></cellXfs></styleSheet>"#;

    /// Writes a single-sheet workbook named `sheet_name` whose `<sheetData>` body is `rows`.
    pub(crate) fn write_workbook(path: &Path, sheet_name: &str, rows: &str, shared_strings: &[&str], is_1904: bool) {
        let workbook = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><workbookPr date1904="{}"/><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
            if is_1904 { 1 } else { 0 },
            sheet_name,
        );
        let worksheet = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{}</sheetData></worksheet>"#,
            rows,
        );
        let items: String = shared_strings.iter().map(|s| format!("<si><t>{}</t></si>", s)).collect();
        let strings = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{0}" uniqueCount="{0}">{1}</sst>"#,
            shared_strings.len(),
            items,
        );

        let file = std::fs::File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (name, content) in [
            ("[Content_Types].xml", CONTENT_TYPES),
            ("xl/workbook.xml", workbook.as_str()),
            ("xl/_rels/workbook.xml.rels", RELATIONSHIPS),
            ("xl/styles.xml", STYLES),
            ("xl/sharedStrings.xml", strings.as_str()),
            ("xl/worksheets/sheet1.xml", worksheet.as_str()),
        ] {
            zip.start_file(name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn fixture(dir: &tempfile::TempDir, rows: &str, shared_strings: &[&str]) -> PathBuf {
        let path = dir.path().join("book.xlsx");
        write_workbook(&path, "Data", rows, shared_strings, false);
        path
    }

    #[test]
    fn lists_sheets() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir, "", &[]);
        let mut workbook = XlsxWorkbook::open(&path).unwrap();
        assert_eq!(workbook.sheet_names(), vec!["Data".to_owned()]);
        assert!(workbook.read_sheet("Sheet1").unwrap().is_none());
        assert!(workbook.read_sheet("Data").unwrap().unwrap().is_empty());
    }

    #[test]
    fn decodes_cell_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let rows = r#"<row r="1"><c r="A1" t="s"><v>1</v></c><c r="B1" t="inlineStr"><is><t>inline &amp; more</t></is></c><c r="C1" t="b"><v>1</v></c><c r="D1" t="e"><v>#DIV/0!</v></c></row><row r="3"><c r="A3"><v>42</v></c><c r="B3" s="1"><v>43832.5</v></c><c r="C3"><f>SUM(A3,1)</f><v>43</v></c><c r="D3" s="3"/><c r="E3" s="3"><v>1.5</v></c></row>"#;
        let path = fixture(&dir, rows, &["first", "second"]);
        let mut workbook = XlsxWorkbook::open(&path).unwrap();
        let sheet = workbook.read_sheet("Data").unwrap().unwrap();

        assert_eq!(sheet.last_row(), Some(2));
        assert!(sheet.row(1).is_empty());
        let values: Vec<CellValue> = sheet.row(0).iter().map(|cell| cell.value().unwrap()).collect();
        assert_eq!(values, vec![
            CellValue::String("second".to_owned()),
            CellValue::String("inline & more".to_owned()),
            CellValue::Boolean(true),
            CellValue::Error(0x07),
        ]);

        let cells = sheet.row(2);
        assert_eq!(cells[0].value().unwrap(), CellValue::Numeric { value: 42.0, text: "42".to_owned(), date_time: None });
        match cells[1].value().unwrap() {
            CellValue::Numeric { date_time, .. } => assert_eq!(date_time.unwrap().to_string(), "2020-01-02 12:00:00"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(cells[2].value().unwrap(), CellValue::Formula("SUM(A3,1)".to_owned()));
        assert_eq!(cells[3].value().unwrap(), CellValue::Blank);
        assert_eq!(cells[4].kind, CellType::Number);
    }

    #[test]
    fn falls_back_to_positions_without_references() {
        let dir = tempfile::tempdir().unwrap();
        let rows = r#"<row><c t="inlineStr"><is><t>a</t></is></c><c t="inlineStr"><is><t>b</t></is></c></row><row><c><v>1</v></c></row>"#;
        let path = fixture(&dir, rows, &[]);
        let mut workbook = XlsxWorkbook::open(&path).unwrap();
        let sheet = workbook.read_sheet("Data").unwrap().unwrap();
        assert_eq!(sheet.cell(0, 1).map(|cell| cell.value.as_str()), Some("b"));
        assert_eq!(sheet.cell(1, 0).map(|cell| cell.value.as_str()), Some("1"));
    }

    #[test]
    fn expands_shared_formulas() {
        let dir = tempfile::tempdir().unwrap();
        let rows = r#"<row r="2"><c r="A2"><v>1</v></c><c r="B2"><f t="shared" ref="B2:C3" si="0">A2*2+$A$1</f><v>2</v></c><c r="C2"><f t="shared" si="0"/><v>4</v></c></row><row r="3"><c r="B3"><f t="shared" si="0"/><v>0</v></c></row>"#;
        let path = fixture(&dir, rows, &[]);
        let mut workbook = XlsxWorkbook::open(&path).unwrap();
        let sheet = workbook.read_sheet("Data").unwrap().unwrap();
        let formula = |row, col| sheet.cell(row, col).unwrap().value().unwrap();
        assert_eq!(formula(1, 1), CellValue::Formula("A2*2+$A$1".to_owned()));
        assert_eq!(formula(1, 2), CellValue::Formula("B2*2+$A$1".to_owned()));
        assert_eq!(formula(2, 1), CellValue::Formula("A3*2+$A$1".to_owned()));

        let orphan = dir.path().join("orphan.xlsx");
        write_workbook(&orphan, "Data", r#"<row r="1"><c r="A1"><f t="shared" si="7"/><v>0</v></c></row>"#, &[], false);
        let error = XlsxWorkbook::open(&orphan).unwrap().read_sheet("Data").unwrap_err();
        assert_eq!(error.to_string(), "No shared formula '7' found for the cell at 'A1'");
    }

    #[test]
    fn rows_without_cells_extend_the_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let rows = r#"<row r="1"><c r="A1"><v>1</v></c></row><row r="3"/><row r="4"></row>"#;
        let path = fixture(&dir, rows, &[]);
        let mut workbook = XlsxWorkbook::open(&path).unwrap();
        let sheet = workbook.read_sheet("Data").unwrap().unwrap();
        assert_eq!(sheet.last_row(), Some(3));
        assert!(sheet.row(3).is_empty());
    }

    #[test]
    fn reads_1904_date_system() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        write_workbook(&path, "Data", r#"<row r="1"><c r="A1" s="2"><v>0</v></c></row>"#, &[], true);
        let mut workbook = XlsxWorkbook::open(&path).unwrap();
        let sheet = workbook.read_sheet("Data").unwrap().unwrap();
        assert_eq!(sheet.row(0)[0].kind, CellType::Date1904);
        match sheet.row(0)[0].value().unwrap() {
            CellValue::Numeric { date_time, .. } => assert_eq!(date_time.unwrap().to_string(), "1904-01-01 00:00:00"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_non_zip_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.xlsx");
        std::fs::write(&path, b"not a workbook").unwrap();
        assert!(XlsxWorkbook::open(&path).is_err());
    }
}
