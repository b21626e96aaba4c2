use std::io::{Cursor, Read, Seek};
use std::time::SystemTime;

use crate::error::{ArchiveFsError, Result};

use super::{ArchiveFormat, ArchiveReader, RawEntry};

/// 7Z archives are commonly solid-compressed: entries inside the same
/// folder share a single compressed stream. `sevenz-rust` only exposes
/// sequential, whole-archive iteration (`for_each_entries`), so unlike
/// the ZIP reader this adapter eagerly decompresses on first access and
/// serves subsequent reads for the same entry from that materialization.
/// The entry is still handed to the Hybrid Entry Cache as a plain
/// forward-only stream, same as the other two formats.
pub struct SevenZipReader<R> {
    source: R,
    password: sevenz_rust::Password,
    entries: Vec<RawEntry>,
}

impl<R: Read + Seek> SevenZipReader<R> {
    pub fn open(mut source: R, password: Option<&str>) -> Result<Self> {
        let pw = match password {
            Some(p) => sevenz_rust::Password::from(p),
            None => sevenz_rust::Password::empty(),
        };
        source.rewind()?;
        let archive = sevenz_rust::Archive::read(&mut source, &pw)?;
        let entries = archive
            .files
            .iter()
            .enumerate()
            .map(|(index, f)| RawEntry {
                key: f.name().to_string(),
                is_directory: f.is_directory(),
                size: if f.has_stream() { Some(f.size()) } else { None },
                modified: f.last_modified_date().and_then(sevenz_time_to_system_time),
                created: None,
                encrypted: archive.is_encrypted(),
                index,
            })
            .collect();
        source.rewind()?;
        Ok(Self {
            source,
            password: pw,
            entries,
        })
    }
}

/// `NtTime` is the crate's wrapper around the Windows FILETIME epoch
/// (100ns ticks since 1601-01-01); it converts to `SystemTime` directly.
fn sevenz_time_to_system_time(t: sevenz_rust::NtTime) -> Option<SystemTime> {
    Some(SystemTime::from(t))
}

impl<R: Read + Seek + Send> ArchiveReader for SevenZipReader<R> {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::SevenZip
    }

    fn entries(&self) -> &[RawEntry] {
        &self.entries
    }

    fn open_entry_stream(&mut self, index: usize) -> Result<Box<dyn Read + '_>> {
        let target = self.entries[index].key.clone();
        let mut extracted = None;
        self.source.rewind()?;
        sevenz_rust::Archive::read(&mut self.source, &self.password).and_then(|archive| {
            sevenz_rust::reader::for_each_entries(&mut self.source, &archive, &self.password, |entry, reader| {
                if entry.name() == target {
                    let mut buf = Vec::new();
                    reader.read_to_end(&mut buf)?;
                    extracted = Some(buf);
                    return Ok(false);
                }
                Ok(true)
            })
        })?;
        let bytes = extracted.ok_or_else(|| {
            ArchiveFsError::Internal(format!("7z entry disappeared between enumeration and read: {target}"))
        })?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn byte_length(&self) -> Option<u64> {
        None
    }
}
