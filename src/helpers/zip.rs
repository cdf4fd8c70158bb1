//! Lookup helpers for parts inside a `.xlsx` package.

use crate::error::SheetMapperError;
use crate::helpers::xml::XmlReader;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use zip::read::ZipFile;
use zip::result::ZipError;
use zip::ZipArchive;

pub(crate) trait ZipHelper<RS: Read + Seek> {
    /// Finds a part by name, ignoring ASCII case and backslash separators.
    fn file(&'_ mut self, name: &str) -> Result<Option<ZipFile<'_, RS>>, SheetMapperError>;

    fn xml_reader(&'_ mut self, name: &str) -> Result<Option<XmlReader<BufReader<ZipFile<'_, RS>>>>, SheetMapperError>;
}

impl<RS: Read + Seek> ZipHelper<RS> for ZipArchive<RS> {
    fn file(&'_ mut self, name: &str) -> Result<Option<ZipFile<'_, RS>>, SheetMapperError> {
        let pattern = name.replace('\\', "/");
        let Some(path) = self
            .file_names()
            .find(|file_name| pattern.eq_ignore_ascii_case(&file_name.replace('\\', "/")))
            .map(str::to_owned)
        else {
            return Ok(None);
        };
        match self.by_name(&path) {
            Ok(file) => Ok(Some(file)),
            Err(ZipError::FileNotFound) => Ok(None),
            Err(error) => Err(error)?,
        }
    }

    fn xml_reader(&'_ mut self, name: &str) -> Result<Option<XmlReader<BufReader<ZipFile<'_, RS>>>>, SheetMapperError> {
        Ok(self.file(name)?.map(|file| XmlReader::new(BufReader::new(file))))
    }
}
