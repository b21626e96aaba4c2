//! Executable Redirector (component D): recognises "host wants to
//! execute this file" access patterns and extracts the entry to a
//! dedicated, delete-shareable temp file so the image loader can
//! memory-map it.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::archive::ArchiveReader;
use crate::catalog::ArchiveEntry;
use crate::error::Result;

/// Extensions the host commonly loads and maps rather than just reads
/// (GLOSSARY: "Executable extension set").
pub const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "dll", "sys", "drv", "com", "bat", "cmd", "msi", "msp", "mst", "ps1", "vbs", "js",
    "wsf", "jar", "py", "rb", "pl", "sh",
];

/// Windows access-mask bits this module cares about. Kept local rather
/// than imported from `windows-sys` so the heuristic reads as what it
/// is: a pattern match over a handful of named bits, not raw FFI.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessIntent {
    pub execute: bool,
    pub read_data: bool,
    pub write_data: bool,
    pub append_data: bool,
    pub generic_other: bool,
}

impl AccessIntent {
    /// §4.D: "an execute-data bit set, or a read-data access paired
    /// only with synchronize/read-attributes". `generic_other` captures
    /// any bit beyond read-data/synchronize/read-attributes; when set,
    /// the read-data branch of the heuristic doesn't fire.
    pub fn wants_execution(&self) -> bool {
        self.execute || (self.read_data && !self.generic_other)
    }
}

pub fn has_executable_extension(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => EXECUTABLE_EXTENSIONS
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

pub struct ExecutableRedirector {
    dir: PathBuf,
    extracted: Mutex<HashMap<String, PathBuf>>,
}

impl ExecutableRedirector {
    pub fn new(session_temp_dir: &Path) -> Result<Self> {
        let dir = session_temp_dir.join("Executables");
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            extracted: Mutex::new(HashMap::new()),
        })
    }

    /// Extracts `entry` (keyed by its canonical path) under this
    /// component's dedicated subdirectory, reusing a prior extraction
    /// if one already exists, and opens it with a sharing mode that
    /// permits concurrent read/write/delete by other handles — the
    /// host image loader requires delete-sharing to memory-map it.
    pub fn extract_and_open(
        &self,
        entry: &ArchiveEntry,
        decoder: &Arc<Mutex<Box<dyn ArchiveReader>>>,
    ) -> Result<File> {
        let key = entry.path.fold_key();
        {
            let table = self.extracted.lock().unwrap();
            if let Some(path) = table.get(&key) {
                return open_execute_shared(path).map_err(Into::into);
            }
        }

        let mut table = self.extracted.lock().unwrap();
        if let Some(path) = table.get(&key) {
            return open_execute_shared(path).map_err(Into::into);
        }

        let name = entry.path.file_name().unwrap_or("file");
        let token: u64 = rand::rng().random();
        let dest = self.dir.join(format!("{token:016x}_{name}"));

        {
            let mut decoder = decoder.lock().unwrap();
            let mut stream = decoder.open_entry_stream(entry.reader_index)?;
            let mut out = File::create(&dest)?;
            std::io::copy(&mut stream, &mut out)?;
        }

        table.insert(key, dest.clone());
        drop(table);
        Ok(open_execute_shared(&dest)?)
    }

    pub fn dispose(&self) {
        let mut table = self.extracted.lock().unwrap();
        for (_, path) in table.drain() {
            let _ = fs::remove_file(path);
        }
        let _ = fs::remove_dir(&self.dir);
    }
}

#[cfg(windows)]
fn open_execute_shared(path: &Path) -> std::io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;
    const FILE_SHARE_ALL: u32 = 0x1 | 0x2 | 0x4; // read | write | delete
    OpenOptions::new().read(true).share_mode(FILE_SHARE_ALL).open(path)
}

#[cfg(not(windows))]
fn open_execute_shared(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().read(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_executable_extensions() {
        assert!(has_executable_extension(Path::new("/bin/tool.EXE")));
        assert!(has_executable_extension(Path::new("/scripts/run.sh")));
        assert!(!has_executable_extension(Path::new("/data/readme.txt")));
    }

    #[test]
    fn access_intent_heuristic() {
        let execute_bit = AccessIntent { execute: true, ..Default::default() };
        assert!(execute_bit.wants_execution());

        let read_only = AccessIntent { read_data: true, ..Default::default() };
        assert!(read_only.wants_execution());

        let read_plus_write = AccessIntent { read_data: true, generic_other: true, ..Default::default() };
        assert!(!read_plus_write.wants_execution());
    }
}
