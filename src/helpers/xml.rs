//! Thin wrapper over `quick-xml` used by the `.xlsx` reader.

use crate::error::SheetMapperError;
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::BytesRef;
use quick_xml::events::BytesStart;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use std::io::BufRead;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("Unknown entity '&{0};'")]
    ParseEntityError(String),
}

pub(crate) struct XmlReader<R: BufRead> {
    reader: Reader<R>,
    buffer: Vec<u8>,
}

impl<R: BufRead> XmlReader<R> {
    /// `<a/>` is reported as a Start/End pair so every element closes the same way.
    pub(crate) fn new(buf_reader: R) -> XmlReader<R> {
        let mut reader = Reader::from_reader(buf_reader);
        let config = reader.config_mut();
        config.check_comments = false;
        config.check_end_names = false;
        config.expand_empty_elements = true;
        config.trim_text(false);

        XmlReader { reader, buffer: Vec::with_capacity(1024) }
    }

    pub(crate) fn next(&'_ mut self) -> Result<Option<Event<'_>>, SheetMapperError> {
        self.buffer.clear();
        match self.reader.read_event_into(&mut self.buffer)? {
            Event::Eof => Ok(None),
            event => Ok(Some(event)),
        }
    }
}

pub(crate) trait XmlNodeHelper<'a> {
    /// Unescaped value of the attribute `name`, if present.
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, SheetMapperError>;
}

impl<'a> XmlNodeHelper<'a> for BytesStart<'a> {
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, SheetMapperError> {
        match self.try_get_attribute(name)? {
            Some(attribute) => Ok(Some(attribute.unescape_value()?)),
            None => Ok(None),
        }
    }
}

pub(crate) trait XmlTextContextHelper {
    /// Appends the character for a general or numeric entity reference.
    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), SheetMapperError>;
}

impl XmlTextContextHelper for String {
    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), SheetMapperError> {
        let raw = bytes.xml_content()?;
        if let Some(number) = raw.strip_prefix('#') {
            let code = match number.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16)?,
                None => number.parse::<u32>()?,
            };
            if let Some(character) = char::from_u32(code) {
                self.push(character);
            }
        } else if let Some(entity) = resolve_xml_entity(&raw) {
            self.push_str(entity);
        } else {
            Err(XmlError::ParseEntityError(raw.to_string()))?;
        }
        Ok(())
    }
}

#[macro_export]
macro_rules! match_xml_events {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(result) = $reader.next()? {
            match result {
                Event::Eof => break,
                $($arms)*
                _ => (),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_text(xml: &str) -> Result<String, SheetMapperError> {
        let mut reader = XmlReader::new(xml.as_bytes());
        let mut text = String::new();
        match_xml_events!(reader => {
            Event::Text(event) => text.push_str(&event.xml_content()?),
            Event::GeneralRef(event) => text.push_bytes_ref(&event)?,
        });
        Ok(text)
    }

    #[test]
    fn resolves_entities() {
        assert_eq!(collect_text("<t>a &amp; b &#65;&#x42;</t>").unwrap(), "a & b AB");
    }

    #[test]
    fn rejects_unknown_entities() {
        assert!(collect_text("<t>&bogus;</t>").is_err());
    }

    #[test]
    fn expands_empty_elements() -> Result<(), SheetMapperError> {
        let mut reader = XmlReader::new(r#"<c r="A1" t="s"/>"#.as_bytes());
        let mut events = Vec::new();
        match_xml_events!(reader => {
            Event::Start(event) => {
                assert_eq!(event.get_attribute_value("r")?.as_deref(), Some("A1"));
                assert_eq!(event.get_attribute_value("missing")?, None);
                events.push("start");
            }
            Event::End(_) => events.push("end"),
        });
        assert_eq!(events, vec!["start", "end"]);
        Ok(())
    }
}
