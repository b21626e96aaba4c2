use std::io::{Cursor, Read};
use std::path::Path;
use std::time::SystemTime;

use chrono::{NaiveDate, TimeZone, Utc};

use crate::error::{ArchiveFsError, Result};

use super::{ArchiveFormat, ArchiveReader, RawEntry};

/// RAR decoding goes through the bundled `unrar` C library rather than a
/// pure-Rust decoder, so this adapter works from the archive's path
/// instead of an arbitrary `Read + Seek` source (matching the
/// `unrar` crate's own interface) and re-opens the underlying archive
/// handle for each entry it's asked to stream, since the library's
/// cursor is a forward-only, single-pass walk over the whole archive.
pub struct RarReader {
    path: std::path::PathBuf,
    password: Option<String>,
    entries: Vec<RawEntry>,
}

impl RarReader {
    pub fn open(path: &Path, password: Option<&str>) -> Result<Self> {
        let archive = match password {
            Some(pw) => unrar::Archive::with_password(path, pw),
            None => unrar::Archive::new(path),
        };
        let mut open = archive.open_for_listing()?;
        let mut entries = Vec::new();
        let mut index = 0;
        while let Some(header) = open.next() {
            let header = header?;
            entries.push(RawEntry {
                key: header.filename.to_string_lossy().replace('\\', "/"),
                is_directory: header.is_directory(),
                size: Some(header.unpacked_size),
                modified: rar_time_to_system_time(header.file_time),
                created: None,
                encrypted: header.is_encrypted(),
                index,
            });
            index += 1;
        }
        Ok(Self {
            path: path.to_path_buf(),
            password: password.map(str::to_string),
            entries,
        })
    }
}

/// Converts a 32-bit MS-DOS date/time (5 bits seconds/2, 6 bits minute,
/// 5 bits hour, 5 bits day, 4 bits month, 7 bits year-since-1980) into a
/// `SystemTime`, the same DOS format and UTC treatment the ZIP reader
/// applies to its own `zip::DateTime`.
fn rar_time_to_system_time(dos_time: u32) -> Option<SystemTime> {
    let seconds = (dos_time & 0x1f) * 2;
    let minute = (dos_time >> 5) & 0x3f;
    let hour = (dos_time >> 11) & 0x1f;
    let day = (dos_time >> 16) & 0x1f;
    let month = (dos_time >> 21) & 0x0f;
    let year = 1980 + ((dos_time >> 25) & 0x7f);

    let date = NaiveDate::from_ymd_opt(year as i32, month, day)?;
    let time = date.and_hms_opt(hour, minute, seconds)?;
    Some(SystemTime::from(Utc.from_utc_datetime(&time)))
}

impl ArchiveReader for RarReader {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Rar
    }

    fn entries(&self) -> &[RawEntry] {
        &self.entries
    }

    fn open_entry_stream(&mut self, index: usize) -> Result<Box<dyn Read + '_>> {
        let target = self.entries[index].key.clone();
        let archive = match &self.password {
            Some(pw) => unrar::Archive::with_password(&self.path, pw),
            None => unrar::Archive::new(&self.path),
        };
        let mut open = archive.open_for_processing()?;
        while let Some(header) = open.read_header()? {
            let name = header.entry().filename.to_string_lossy().replace('\\', "/");
            if name == target {
                let (data, _rest) = header.read()?;
                return Ok(Box::new(Cursor::new(data)));
            }
            open = header.skip()?;
        }
        Err(ArchiveFsError::Internal(format!(
            "rar entry disappeared between enumeration and read: {target}"
        )))
    }

    fn byte_length(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|m| m.len())
    }
}
