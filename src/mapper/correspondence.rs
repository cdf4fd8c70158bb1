use crate::error::SheetMapperError;
use crate::mapper::field::FieldDescriptor;
use crate::mapper::field::Record;
use crate::spreadsheet::cell::Cell;
use std::collections::HashMap;

/// Header text to field descriptor for every field bound to a non-empty header.
/// When two fields share a header, the one declared later wins.
pub fn header_correspondence<T: Record>() -> HashMap<String, FieldDescriptor<T>> {
    let mut headers = HashMap::new();
    for descriptor in T::fields() {
        if !descriptor.header().is_empty() {
            headers.insert(descriptor.header().to_owned(), descriptor);
        }
    }
    headers
}

/// Column index to header text for the non-empty cells of a header row.
pub fn column_correspondence(header_row: &[Cell]) -> Result<HashMap<usize, String>, SheetMapperError> {
    let mut columns = HashMap::new();
    for cell in header_row {
        let text = cell.text()?;
        if !text.is_empty() {
            columns.insert(cell.col, text);
        }
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::field::FieldType;
    use crate::spreadsheet::cell::CellType;

    #[derive(Default)]
    struct Duplicated {
        first: String,
        second: i32,
        ignored: String,
    }

    crate::impl_record!(Duplicated {
        first => "Name",
        second => "Name",
        ignored => "",
    });

    #[derive(Default)]
    struct Unbound;

    crate::impl_record!(Unbound {});

    #[test]
    fn later_binding_wins() {
        let headers = header_correspondence::<Duplicated>();
        assert_eq!(headers.len(), 1);
        let descriptor = &headers["Name"];
        assert_eq!(descriptor.name(), "second");
        assert_eq!(descriptor.field_type(), FieldType::Int);
    }

    #[test]
    fn unbound_type_has_no_headers() {
        assert!(header_correspondence::<Unbound>().is_empty());
    }

    #[test]
    fn header_row_skips_empty_cells() {
        let row = vec![
            Cell::new(0, 0, CellType::String, "Name"),
            Cell::new(0, 1, CellType::Empty, ""),
            Cell::new(0, 2, CellType::String, ""),
            Cell::new(0, 3, CellType::String, " Age "),
            Cell::new(0, 4, CellType::Number, "2020"),
        ];
        let columns = column_correspondence(&row).unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[&0], "Name");
        assert_eq!(columns[&3], " Age ");
        assert_eq!(columns[&4], "2020");
    }
}
