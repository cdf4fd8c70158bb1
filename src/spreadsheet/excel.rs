//! Parts shared by the Office Open XML reader.
use crate::error::SheetMapperError;
use crate::helpers::cfb::Cfb;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::FileReader;
use crate::spreadsheet::SpreadsheetError;
use quick_xml::events::Event;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use std::path::Path;
use zip::ZipArchive;

const TAG_RELATIONSHIP: &[u8] = b"Relationship";

/// Opens a zipped workbook and loads its sheet list and number formats.
///
/// `load_workbook` yields `(sheet name, part path)` pairs plus the 1904 flag;
/// `load_number_formats` maps style indexes to cell types.
pub(super) fn open<W, F>(path: &Path, load_workbook: W, load_number_formats: F) -> Result<(
    ZipArchive<FileReader>,
    Vec<CellType>,
    Vec<(String, String)>,
), SheetMapperError>
where
    W: Fn(&mut ZipArchive<FileReader>) -> Result<(Vec<(String, String)>, bool), SheetMapperError>,
    F: Fn(&mut ZipArchive<FileReader>, bool) -> Result<Vec<CellType>, SheetMapperError>,
{
    let file_name = path.display().to_string();
    let mut reader = BufReader::new(File::open(path)?);

    // Encrypted packages are wrapped in a compound file instead of a zip
    if is_password_protected(&mut reader) {
        Err(SpreadsheetError::SpreadsheetPasswordProtectedError(file_name.to_owned()))?;
    }

    let mut zip = ZipArchive::new(reader)?;
    let (sheets, is_1904) = load_workbook(&mut zip)?;
    if sheets.is_empty() {
        Err(SpreadsheetError::SpreadsheetEmptyError(file_name))?
    }

    let number_formats = load_number_formats(&mut zip, is_1904)?;
    Ok((zip, number_formats, sheets))
}

/// Maps worksheet relationship ids to part paths.
pub(super) fn load_relationships<RS: Read + Seek>(zip: &mut ZipArchive<RS>, path: &str) -> Result<HashMap<String, String>, SheetMapperError> {
    let mut reader = zip.xml_reader(path)?
        .ok_or_else(|| SpreadsheetError::FileError(path.to_string()))?;
    let mut relationships: HashMap<String, String> = HashMap::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_RELATIONSHIP => {
            let id = event.get_attribute_value("Id")?;
            let kind = event.get_attribute_value("Type")?;
            let target = event.get_attribute_value("Target")?;
            if kind.map(|it| it.ends_with("/worksheet")).unwrap_or(true) {
                if let Some((id, target)) = id.zip(target) {
                    relationships.insert(id.to_string(), to_zip_path(&target));
                }
            }
        }
    });
    Ok(relationships)
}

/// Resolves each style's number format to a cell type; unknown ids are plain numbers.
pub(super) fn load_number_formats(format_indexes: Vec<String>, custom_formats: HashMap<String, CellType>, is_1904: bool) -> Vec<CellType> {
    format_indexes
        .iter()
        .map(|id| {
            custom_formats
                .get(id)
                .copied()
                .or_else(|| CellType::parse_builtin_number_format_id(id, is_1904))
                .unwrap_or(CellType::Number)
        })
        .collect()
}

/// Relationship targets are relative to `xl/` unless absolute.
pub(crate) fn to_zip_path(path: &str) -> String {
    if let Some(absolute) = path.strip_prefix('/') {
        absolute.to_string()
    } else if path.starts_with("xl/") {
        path.to_string()
    } else {
        format!("xl/{path}")
    }
}

fn is_password_protected<RS: Read + Seek>(reader: &mut RS) -> bool {
    match Cfb::new(reader) {
        Ok(cfb) => cfb.exists("EncryptedPackage"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_relationship_targets() {
        assert_eq!(to_zip_path("worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(to_zip_path("/xl/worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(to_zip_path("xl/worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
    }

    #[test]
    fn custom_formats_override_builtin_ids() {
        let mut custom_formats = HashMap::new();
        custom_formats.insert("14".to_owned(), CellType::Number);
        custom_formats.insert("164".to_owned(), CellType::Date1900);
        let formats = load_number_formats(
            vec!["0".to_owned(), "14".to_owned(), "22".to_owned(), "164".to_owned()],
            custom_formats,
            false,
        );
        assert_eq!(formats, vec![CellType::Number, CellType::Number, CellType::Date1900, CellType::Date1900]);
    }
}
