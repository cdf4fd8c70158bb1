//! BIFF8 record reader for the `Workbook` stream of legacy `.xls` files.
//! Records may be split across CONTINUE records; reads walk those chunks transparently.

use crate::error::SheetMapperError;
use crate::helpers::string::to_f64;
use crate::helpers::string::to_u16;
use crate::helpers::string::to_u32;
use crate::helpers::string::to_u64;
use crate::helpers::string::to_usize;
use encoding_rs::UTF_16LE;
use thiserror::Error;

const CONTINUE: u16 = 60;

#[derive(Error, Debug)]
pub enum Biff8Error {
    #[error("Fewer than {0} bytes remaining in record")]
    NoEnoughDataError(usize),
}

pub(crate) struct Biff8Reader {
    buffer: Vec<u8>,
    /// Start of the next record header
    pointer: usize,
    /// Byte ranges of the current record and its CONTINUE records
    chunks: Vec<(usize, usize)>,
    index: usize,
    offset: usize,
}

impl Biff8Reader {
    pub(crate) fn new(data: Vec<u8>) -> Biff8Reader {
        Biff8Reader {
            buffer: data,
            pointer: 0,
            chunks: Vec::new(),
            index: 0,
            offset: 0,
        }
    }

    /// Advances to the next record and returns its type, or None at the end of the stream.
    pub(crate) fn next(&mut self) -> Result<Option<u16>, SheetMapperError> {
        if self.pointer + 4 > self.buffer.len() {
            return Ok(None);
        }
        self.index = 0;
        self.offset = 0;
        self.chunks.clear();

        let kind = self.get_u16_at(self.pointer)?;
        self.push_chunk()?;
        while self.pointer + 4 <= self.buffer.len() && self.get_u16_at(self.pointer)? == CONTINUE {
            self.push_chunk()?;
        }
        Ok(Some(kind))
    }

    /// Records the body of the record whose header starts at `pointer`.
    fn push_chunk(&mut self) -> Result<(), SheetMapperError> {
        let size = self.get_u16_at(self.pointer + 2)? as usize;
        let lower = self.pointer + 4;
        let upper = (lower + size).min(self.buffer.len());
        self.chunks.push((lower, upper));
        self.pointer = lower + size;
        Ok(())
    }

    /// Moves to an absolute stream offset, such as a sheet's BOF.
    pub(crate) fn goto(&mut self, pointer: usize) {
        self.pointer = pointer;
        self.chunks.clear();
    }

    fn read_exact(&mut self, length: usize) -> Result<&[u8], SheetMapperError> {
        let (lower, upper) = self.read(length);
        if upper - lower == length {
            Ok(&self.buffer[lower..upper])
        } else {
            Err(Biff8Error::NoEnoughDataError(length))?
        }
    }

    /// Takes up to `length` bytes from the current chunk; never crosses a chunk boundary.
    fn read(&mut self, length: usize) -> (usize, usize) {
        if let Some((lower, upper)) = self.chunks.get(self.index).copied() {
            let source = upper.min(lower + self.offset);
            let target = upper.min(source + length);
            if target == upper {
                self.index += 1;
                self.offset = 0;
            } else {
                self.offset += target - source;
            }
            (source, target)
        } else {
            (0, 0)
        }
    }

    pub(crate) fn skip(&mut self, length: usize) -> Result<(), SheetMapperError> {
        let mut remaining = length;
        while remaining > 0 {
            let (lower, upper) = self.read(remaining);
            if lower == upper {
                Err(Biff8Error::NoEnoughDataError(length))?;
            }
            remaining -= upper - lower;
        }
        Ok(())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, SheetMapperError> {
        self.read_exact(1).map(|data| data[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, SheetMapperError> {
        self.read_exact(2).map(to_u16)
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, SheetMapperError> {
        self.read_exact(4).map(to_u32)
    }

    pub(crate) fn read_usize(&mut self) -> Result<usize, SheetMapperError> {
        self.read_exact(4).map(to_usize)
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, SheetMapperError> {
        self.read_exact(8).map(to_u64)
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64, SheetMapperError> {
        self.read_exact(8).map(to_f64)
    }

    /// Reads a u16 located `offset` bytes before the end of the current record.
    pub(crate) fn get_u16_back(&self, offset: usize) -> Result<u16, SheetMapperError> {
        let mut offset = offset;
        for (lower, upper) in self.chunks.iter().rev() {
            if *lower + offset <= *upper {
                return self.get_u16_at(*upper - offset);
            }
            offset -= *upper - *lower;
        }
        Err(Biff8Error::NoEnoughDataError(2))?
    }

    fn get_u16_at(&self, index: usize) -> Result<u16, SheetMapperError> {
        if index + 2 <= self.buffer.len() {
            Ok(to_u16(&self.buffer[index..index + 2]))
        } else {
            Err(Biff8Error::NoEnoughDataError(2))?
        }
    }

    /// Reads raw bytes, following the record into its CONTINUE chunks.
    pub(crate) fn read_bytes(&mut self, length: usize) -> Result<Vec<u8>, SheetMapperError> {
        let mut bytes = Vec::with_capacity(length);
        while bytes.len() < length {
            let (lower, upper) = self.read(length - bytes.len());
            if lower == upper {
                Err(Biff8Error::NoEnoughDataError(length))?;
            }
            bytes.extend_from_slice(&self.buffer[lower..upper]);
        }
        Ok(bytes)
    }

    /// Decodes an RK value: a 30-bit integer or the high bits of a double, optionally divided by 100.
    pub(crate) fn read_rk_number(&mut self) -> Result<String, SheetMapperError> {
        let value = self.read_u32()?;
        let is_percentage = (value & 0x01) != 0;
        let is_integer = (value & 0x02) != 0;

        let mut number = if is_integer {
            ((value as i32) >> 2) as f64
        } else {
            f64::from_bits(((value & 0xFFFF_FFFC) as u64) << 32)
        };
        if is_percentage {
            number /= 100.0;
        }
        Ok(number.to_string())
    }

    /// ShortXLUnicodeString: 1-byte character count.
    pub(crate) fn read_short_xl_unicode_string(&mut self) -> Result<String, SheetMapperError> {
        let chars = self.read_u8()? as usize;
        let mut string = String::new();
        self.read_string_into(chars, false, &mut string)?;
        Ok(string)
    }

    /// XLUnicodeString: 2-byte character count.
    pub(crate) fn read_xl_unicode_string(&mut self) -> Result<String, SheetMapperError> {
        let chars = self.read_u16()? as usize;
        let mut string = String::new();
        self.read_string_into(chars, false, &mut string)?;
        Ok(string)
    }

    /// XLUnicodeStringNoCch: the character count comes from elsewhere in the record.
    pub(crate) fn read_xl_unicode_string_no_cch(&mut self, chars: usize) -> Result<String, SheetMapperError> {
        let mut string = String::new();
        self.read_string_into(chars, false, &mut string)?;
        Ok(string)
    }

    /// XLUnicodeRichExtendedString as stored in the SST; may continue into the next chunk
    /// with a fresh option flag byte.
    pub(crate) fn read_xl_unicode_rich_extended_string(&mut self) -> Result<String, SheetMapperError> {
        let mut string = String::new();
        let mut expected = self.read_u16()? as usize;
        let mut actual = self.read_string_into(expected, true, &mut string)?;
        while actual < expected {
            expected -= actual;
            actual = self.read_string_into(expected, false, &mut string)?;
            if actual == 0 {
                Err(Biff8Error::NoEnoughDataError(expected))?;
            }
        }
        Ok(string)
    }

    fn read_string_into(&mut self, chars: usize, is_extended: bool, content: &mut String) -> Result<usize, SheetMapperError> {
        let flag = self.read_u8()?;
        let is_high_byte = (flag & 0x1) != 0;
        let rich_runs = if is_extended && (flag & 0x8) != 0 {
            self.read_u16()? as usize
        } else {
            0
        };
        let phonetic_size = if is_extended && (flag & 0x4) != 0 {
            self.read_usize()?
        } else {
            0
        };
        let expected = if is_high_byte { chars * 2 } else { chars };
        let (lower, upper) = self.read(expected);
        let bytes = &self.buffer[lower..upper];
        if is_high_byte {
            let (string, _, _) = UTF_16LE.decode(bytes);
            content.push_str(&string);
        } else {
            // Compressed strings hold the low byte of each UTF-16 code unit.
            content.extend(bytes.iter().map(|byte| char::from(*byte)));
        }
        let actual = upper - lower;
        self.skip(4 * rich_runs)?;
        self.skip(phonetic_size)?;
        Ok(if is_high_byte { actual / 2 } else { actual })
    }
}

#[macro_export]
macro_rules! match_biff8_record {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(kind) = $reader.next()? {
            match kind {
                $($arms)*
                _ => (),
            }
        }
    };
}
