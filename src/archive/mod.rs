//! The archive reader abstraction (§9: "archive reader as an
//! interface"). The Archive Index depends only on this trait; it never
//! knows whether it is looking at a ZIP, a 7Z, or a RAR.

mod rar_reader;
mod sevenzip_reader;
mod zip_reader;

pub use rar_reader::RarReader;
pub use sevenzip_reader::SevenZipReader;
pub use zip_reader::ZipReader;

use std::io::Read;
use std::time::SystemTime;

use crate::error::Result;

/// One entry as reported by the underlying decoder, before the Archive
/// Index turns it into a catalog record.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub key: String,
    pub is_directory: bool,
    /// `None` when the format doesn't report a size up front (matches
    /// "uncompressed size may be unknown/negative" in the data model).
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
    pub encrypted: bool,
    /// Index into the decoder's own entry table, used to re-open the
    /// entry's stream later without re-parsing the central structure.
    pub index: usize,
}

/// The recognised archive container formats.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ArchiveFormat {
    Zip,
    SevenZip,
    Rar,
}

impl ArchiveFormat {
    /// Detects a format from a file extension, per §6 (drag-and-drop
    /// mode restricts itself to these three).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "zip" => Some(ArchiveFormat::Zip),
            "7z" => Some(ArchiveFormat::SevenZip),
            "rar" => Some(ArchiveFormat::Rar),
            _ => None,
        }
    }

    /// The fixed probe order used when a format can't be determined
    /// from the extension (explicit mount mode, §4.B supplement).
    pub fn probe_order() -> [ArchiveFormat; 3] {
        [ArchiveFormat::Zip, ArchiveFormat::SevenZip, ArchiveFormat::Rar]
    }
}

/// Supplies a password when the decoder reports an entry is encrypted.
/// A synchronous callback so that console, GUI, and headless hosts can
/// each plug in their own retrieval strategy (§6, §9 open question).
pub type PasswordProvider<'a> = dyn Fn() -> String + 'a;

/// Implemented once per supported container format. `open` must reset
/// the underlying stream to position 0 between a no-password attempt
/// and a password-supplied retry (§4.B step 1).
pub trait ArchiveReader: Send {
    fn format(&self) -> ArchiveFormat;

    fn entries(&self) -> &[RawEntry];

    /// Opens a forward-only decompressed byte stream for the entry at
    /// `index`. Never thread-safe to call concurrently across entries
    /// of the same reader; callers must serialize under a single lock
    /// (the Hybrid Entry Cache's decoder lock).
    fn open_entry_stream(&mut self, index: usize) -> Result<Box<dyn Read + '_>>;

    /// Total archive byte length, when known (used by `free_space`).
    fn byte_length(&self) -> Option<u64>;
}
