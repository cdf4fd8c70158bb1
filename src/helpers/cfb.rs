//! OLE Compound File Binary (CFB) container used by legacy `.xls` workbooks.
//! The whole container is loaded into memory and streams are resolved by name.

use crate::error::SheetMapperError;
use crate::helpers::string::to_u16;
use crate::helpers::string::to_u64;
use crate::helpers::string::to_usize;
use crate::helpers::string::to_usize_iter;
use encoding_rs::UTF_16LE;
use std::collections::HashMap;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use thiserror::Error;

/// Sector ids at or above this value are markers (free, end of chain, FAT, DIFAT).
const MAX_REGULAR_SECTOR: usize = 0xFFFF_FFFB;
/// Streams smaller than this live in the mini stream.
const MINI_STREAM_CUTOFF: usize = 4096;
const MINI_SECTOR_SIZE: usize = 64;
const HEADER_SIZE: usize = 512;
const DIRECTORY_ENTRY_SIZE: usize = 128;
const SIGNATURE: u64 = 0xE11A_B1A1_E011_CFD0;

#[derive(Error, Debug)]
pub enum CfbError {
    #[error("The file is corrupted or has an invalid CFB structure")]
    FileFormatError,

    #[error("Invalid OLE signature (not an office document?)")]
    OleSignatureError,

    #[error("Invalid sector size '2 ^ {1}' for major version '{0}'")]
    SectorSizeError(u16, u16),

    #[error("Sector chain points outside the file at sector '{0}'")]
    SectorChainError(usize),

    #[error("Empty root directory")]
    RootDirectoryError,
}

/// In-memory view over a compound file.
pub(crate) struct Cfb {
    entries: HashMap<String, Entry>,
    fat: Vec<usize>,
    sectors: Sectors,
    mini_fat: Vec<usize>,
    mini_sectors: Sectors,
}

impl Cfb {
    /// Loads and indexes the compound file behind `reader`.
    pub(crate) fn new<RS: Read + Seek>(reader: &mut RS) -> Result<Cfb, SheetMapperError> {
        let size = reader.seek(SeekFrom::End(0))? as usize;
        if size < HEADER_SIZE {
            Err(CfbError::FileFormatError)?;
        }
        reader.seek(SeekFrom::Start(0))?;
        let mut data = vec![0u8; size];
        reader.read_exact(&mut data)?;

        let header = Header::parse(&data[..HEADER_SIZE])?;
        let sectors = Sectors { data, size: header.sector_size()? };
        let fat = load_fat(&sectors, &header)?;
        let entries = load_entries(&fat, &sectors, header.first_directory_sector)?;
        let mini_fat = if header.mini_fat_sector_count > 0 {
            let bytes = read_chain(&fat, &sectors, header.first_mini_fat_sector)?;
            to_usize_iter(&bytes).collect()
        } else {
            Vec::new()
        };
        let mini_sectors = match entries.get("Root Entry") {
            Some(root) => {
                let mut data = read_chain(&fat, &sectors, root.start)?;
                data.truncate(root.size);
                // Mini sectors have no header block in front of them.
                Sectors { data, size: MINI_SECTOR_SIZE }.without_header()
            }
            None => Sectors { data: Vec::new(), size: MINI_SECTOR_SIZE }.without_header(),
        };

        Ok(Cfb { entries, fat, sectors, mini_fat, mini_sectors })
    }

    /// Returns true when a stream or storage named `name` exists.
    pub(crate) fn exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Reads a whole stream by name.
    pub(crate) fn read(&self, name: &str) -> Result<Option<Vec<u8>>, SheetMapperError> {
        let Some(entry) = self.entries.get(name) else {
            return Ok(None);
        };
        let mut bytes = if entry.size < MINI_STREAM_CUTOFF {
            read_chain(&self.mini_fat, &self.mini_sectors, entry.start)?
        } else {
            read_chain(&self.fat, &self.sectors, entry.start)?
        };
        bytes.truncate(entry.size);
        Ok(Some(bytes))
    }
}

/// Collects the file allocation table, following the DIFAT chain past the header.
fn load_fat(sectors: &Sectors, header: &Header) -> Result<Vec<usize>, SheetMapperError> {
    let mut difat: Vec<usize> = to_usize_iter(&sectors.data[76..HEADER_SIZE]).collect();
    let mut next = header.first_difat_sector;
    let mut visited = 0usize;
    while next < MAX_REGULAR_SECTOR {
        if visited > header.difat_sector_count {
            Err(CfbError::FileFormatError)?;
        }
        let sector = sectors.get(next).ok_or(CfbError::SectorChainError(next))?;
        difat.extend(to_usize_iter(sector));
        // The last slot of a DIFAT sector links to the next one.
        next = difat.pop().ok_or(CfbError::FileFormatError)?;
        visited += 1;
    }

    let mut fat = Vec::<usize>::new();
    for index in difat.into_iter().filter(|index| *index < MAX_REGULAR_SECTOR) {
        let sector = sectors.get(index).ok_or(CfbError::SectorChainError(index))?;
        fat.extend(to_usize_iter(sector));
    }
    Ok(fat)
}

/// Reads the directory stream and indexes entries by name.
fn load_entries(fat: &[usize], sectors: &Sectors, start: usize) -> Result<HashMap<String, Entry>, SheetMapperError> {
    let bytes = read_chain(fat, sectors, start)?;
    let entries: HashMap<String, Entry> = bytes
        .chunks_exact(DIRECTORY_ENTRY_SIZE)
        .filter_map(Entry::parse)
        .collect();
    if entries.is_empty() {
        Err(CfbError::RootDirectoryError)?
    }
    Ok(entries)
}

/// Concatenates the sectors of a chain starting at `start`.
fn read_chain(table: &[usize], sectors: &Sectors, start: usize) -> Result<Vec<u8>, SheetMapperError> {
    let mut content = Vec::<u8>::new();
    let mut index = start;
    let mut hops = 0usize;
    while index < MAX_REGULAR_SECTOR {
        // A chain longer than the table is a cycle.
        if hops > table.len() {
            Err(CfbError::FileFormatError)?;
        }
        content.extend_from_slice(sectors.get(index).ok_or(CfbError::SectorChainError(index))?);
        index = *table.get(index).ok_or(CfbError::SectorChainError(index))?;
        hops += 1;
    }
    Ok(content)
}

struct Sectors {
    data: Vec<u8>,
    size: usize,
}

impl Sectors {
    /// Mini stream sectors are addressed from offset zero; regular sectors skip the header.
    fn without_header(self) -> Sectors {
        let mut data = Vec::with_capacity(self.data.len() + self.size);
        data.resize(self.size, 0);
        data.extend(self.data);
        Sectors { data, size: self.size }
    }

    fn get(&self, index: usize) -> Option<&[u8]> {
        let lower = (index + 1).checked_mul(self.size)?;
        let upper = self.data.len().min(lower + self.size);
        if lower < upper {
            Some(&self.data[lower..upper])
        } else {
            None
        }
    }
}

struct Header {
    major_version: u16,
    sector_shift: u16,
    first_directory_sector: usize,
    first_mini_fat_sector: usize,
    mini_fat_sector_count: usize,
    first_difat_sector: usize,
    difat_sector_count: usize,
}

impl Header {
    fn parse(data: &[u8]) -> Result<Header, SheetMapperError> {
        if to_u64(&data[0..8]) != SIGNATURE {
            Err(CfbError::OleSignatureError)?;
        }
        Ok(Header {
            major_version: to_u16(&data[26..28]),
            sector_shift: to_u16(&data[30..32]),
            first_directory_sector: to_usize(&data[48..52]),
            first_mini_fat_sector: to_usize(&data[60..64]),
            mini_fat_sector_count: to_usize(&data[64..68]),
            first_difat_sector: to_usize(&data[68..72]),
            difat_sector_count: to_usize(&data[72..76]),
        })
    }

    fn sector_size(&self) -> Result<usize, SheetMapperError> {
        match (self.major_version, self.sector_shift) {
            (3, 9) => Ok(512),
            // Version 4 pads the header out to a full 4096-byte sector.
            (4, 12) => Ok(4096),
            (version, shift) => Err(CfbError::SectorSizeError(version, shift))?,
        }
    }
}

struct Entry {
    start: usize,
    size: usize,
}

impl Entry {
    fn parse(bytes: &[u8]) -> Option<(String, Entry)> {
        let name_size = (to_u16(&bytes[64..66]) as usize).min(64);
        if name_size == 0 {
            return None;
        }
        let (name, _, _) = UTF_16LE.decode(&bytes[..name_size]);
        let name = name.split('\0').next().unwrap_or_default().to_owned();
        let start = to_usize(&bytes[116..120]);
        let size = to_u64(&bytes[120..128]) as usize;
        Some((name, Entry { start, size }))
    }
}
