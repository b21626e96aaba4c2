use std::io::{Read, Seek};
use std::time::SystemTime;

use chrono::{NaiveDate, TimeZone, Utc};
use zip::ZipArchive;

use crate::error::Result;

use super::{ArchiveFormat, ArchiveReader, RawEntry};

pub struct ZipReader<R> {
    archive: ZipArchive<R>,
    entries: Vec<RawEntry>,
}

impl<R: Read + Seek> ZipReader<R> {
    pub fn open(reader: R, password: Option<&str>) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let file = match password {
                Some(pw) => archive.by_index_decrypt(i, pw.as_bytes())?,
                None => archive.by_index(i)?,
            };
            entries.push(RawEntry {
                key: file.name().to_string(),
                is_directory: file.is_dir(),
                size: Some(file.size()),
                modified: zip_datetime_to_system_time(&file.last_modified()),
                created: None,
                encrypted: file.encrypted(),
                index: i,
            });
        }
        Ok(Self { archive, entries })
    }
}

fn zip_datetime_to_system_time(dt: &zip::DateTime) -> Option<SystemTime> {
    let date = NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)?;
    let time = date.and_hms_opt(dt.hour() as u32, dt.minute() as u32, dt.second() as u32)?;
    Some(SystemTime::from(Utc.from_utc_datetime(&time)))
}

impl<R: Read + Seek + Send> ArchiveReader for ZipReader<R> {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn entries(&self) -> &[RawEntry] {
        &self.entries
    }

    fn open_entry_stream(&mut self, index: usize) -> Result<Box<dyn Read + '_>> {
        let file = self.archive.by_index(index)?;
        Ok(Box::new(file))
    }

    fn byte_length(&self) -> Option<u64> {
        None
    }
}
