//! Archive Index (component B): parses the archive once and materializes
//! the entry catalog plus the synthesized-directory set. Immutable after
//! construction (invariant 1).

use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek};
use std::time::SystemTime;

use crate::archive::{ArchiveFormat, ArchiveReader, RarReader, SevenZipReader, ZipReader};
use crate::error::{ArchiveFsError, Result};
use crate::path::CanonicalPath;

/// An immutable archive entry record (§3).
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub path: CanonicalPath,
    pub is_directory: bool,
    pub size: Option<u64>,
    pub modified: SystemTime,
    pub created: Option<SystemTime>,
    pub encrypted: bool,
    pub reader_index: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamps {
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
}

/// Catalog: canonical path -> archive entry, plus the set of
/// synthesized directories implied by deeper entries (§3, §4.B).
#[derive(Debug)]
pub struct Catalog {
    entries: HashMap<String, ArchiveEntry>,
    synthesized: HashMap<String, Timestamps>,
}

impl Catalog {
    /// Builds the catalog from an already-opened reader's entry table.
    /// Entries with empty keys are skipped (some archivers emit a
    /// degenerate root entry).
    pub fn build(raw_entries: &[crate::archive::RawEntry]) -> Self {
        let mut entries = HashMap::new();
        let mut synthesized: HashMap<String, Timestamps> = HashMap::new();

        for raw in raw_entries {
            if raw.key.is_empty() {
                continue;
            }
            let canonical = CanonicalPath::normalize(&raw.key);
            let modified = raw.modified.unwrap_or(SystemTime::UNIX_EPOCH);
            let entry = ArchiveEntry {
                path: canonical.clone(),
                is_directory: raw.is_directory,
                size: raw.size,
                modified,
                created: raw.created,
                encrypted: raw.encrypted,
                reader_index: raw.index,
            };
            entries.insert(canonical.fold_key(), entry);
            // The same path may have already been synthesized as an
            // ancestor of an earlier raw entry; an explicit record
            // always preempts it (invariant 2, "not both").
            synthesized.remove(&canonical.fold_key());

            let stamps = Timestamps {
                modified: Some(modified),
                created: raw.created,
                accessed: Some(modified),
            };
            // For file entries the final component is excluded from the
            // synthesized walk (it's the file itself); for directory
            // entries it's included (ensures the explicit directory's
            // own ancestors are still synthesized even if the directory
            // itself never appears as anyone's "deeper" entry).
            let ancestors = if raw.is_directory {
                let mut v = vec![canonical.clone()];
                v.extend(canonical.ancestors());
                v
            } else {
                canonical.ancestors()
            };
            for ancestor in ancestors {
                let key = ancestor.fold_key();
                if entries.contains_key(&key) {
                    continue;
                }
                synthesized.entry(key).or_insert(stamps);
            }
        }

        synthesized.entry(CanonicalPath::root().fold_key()).or_insert(Timestamps::default());

        Catalog { entries, synthesized }
    }

    pub fn lookup(&self, path: &CanonicalPath) -> Option<&ArchiveEntry> {
        self.entries.get(&path.fold_key())
    }

    pub fn is_directory(&self, path: &CanonicalPath) -> bool {
        let key = path.fold_key();
        if let Some(entry) = self.entries.get(&key) {
            return entry.is_directory;
        }
        self.synthesized.contains_key(&key)
    }

    pub fn exists(&self, path: &CanonicalPath) -> bool {
        let key = path.fold_key();
        self.entries.contains_key(&key) || self.synthesized.contains_key(&key) || path.is_root()
    }

    pub fn timestamps(&self, path: &CanonicalPath) -> Option<Timestamps> {
        let key = path.fold_key();
        if let Some(entry) = self.entries.get(&key) {
            return Some(Timestamps {
                modified: Some(entry.modified),
                created: entry.created,
                accessed: Some(entry.modified),
            });
        }
        self.synthesized.get(&key).copied()
    }

    /// Direct children of `path`: catalog entries and synthesized
    /// directories whose parent is exactly `path`, de-duplicated by
    /// name with catalog entries preferred over their synthesized twin.
    pub fn children(&self, path: &CanonicalPath) -> Vec<ArchiveEntry> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();

        for entry in self.entries.values() {
            if entry.path.parent() == *path && !entry.path.is_root() {
                if let Some(name) = entry.path.file_name() {
                    if seen.insert(name.to_ascii_lowercase()) {
                        out.push(entry.clone());
                    }
                }
            }
        }

        for (key, stamps) in &self.synthesized {
            let candidate = CanonicalPath::normalize(key);
            if candidate.is_root() {
                continue;
            }
            if candidate.parent() == *path {
                if let Some(name) = candidate.file_name() {
                    if seen.insert(name.to_ascii_lowercase()) {
                        out.push(ArchiveEntry {
                            path: candidate,
                            is_directory: true,
                            size: Some(0),
                            modified: stamps.modified.unwrap_or(SystemTime::UNIX_EPOCH),
                            created: stamps.created,
                            encrypted: false,
                            reader_index: usize::MAX,
                        });
                    }
                }
            }
        }

        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Opens the archive reader appropriate for `format`, retrying once with
/// a password when the decoder reports the archive is encrypted
/// (§4.B step 1).
pub fn open_reader<R: Read + Seek + Send + 'static>(
    format: ArchiveFormat,
    mut make_stream: impl FnMut() -> std::io::Result<R>,
    path_hint: &std::path::Path,
    password_provider: &dyn Fn() -> String,
) -> Result<Box<dyn ArchiveReader>> {
    match format {
        ArchiveFormat::Zip => {
            let stream = make_stream()?;
            match ZipReader::open(stream, None) {
                Ok(r) => Ok(Box::new(r)),
                Err(ArchiveFsError::Password) => {
                    let stream = make_stream()?;
                    let password = password_provider();
                    Ok(Box::new(ZipReader::open(stream, Some(&password))?))
                }
                Err(e) => Err(e),
            }
        }
        ArchiveFormat::SevenZip => {
            let stream = make_stream()?;
            match SevenZipReader::open(stream, None) {
                Ok(r) => Ok(Box::new(r)),
                Err(ArchiveFsError::Password) => {
                    let stream = make_stream()?;
                    let password = password_provider();
                    Ok(Box::new(SevenZipReader::open(stream, Some(&password))?))
                }
                Err(e) => Err(e),
            }
        }
        ArchiveFormat::Rar => match RarReader::open(path_hint, None) {
            Ok(r) => Ok(Box::new(r)),
            Err(ArchiveFsError::Password) => {
                let password = password_provider();
                Ok(Box::new(RarReader::open(path_hint, Some(&password))?))
            }
            Err(e) => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::RawEntry;

    fn raw(key: &str, is_dir: bool) -> RawEntry {
        RawEntry {
            key: key.to_string(),
            is_directory: is_dir,
            size: if is_dir { None } else { Some(10) },
            modified: Some(SystemTime::UNIX_EPOCH),
            created: None,
            encrypted: false,
            index: 0,
        }
    }

    #[test]
    fn synthesizes_parent_directories() {
        let catalog = Catalog::build(&[raw("a/b/c.dat", false)]);
        let root = CanonicalPath::root();
        assert!(catalog.is_directory(&root));
        assert!(catalog.is_directory(&CanonicalPath::from("/a")));
        assert!(catalog.is_directory(&CanonicalPath::from("/a/b")));
        assert!(!catalog.is_directory(&CanonicalPath::from("/a/b/c.dat")));
        assert_eq!(catalog.children(&root).len(), 1);
        assert_eq!(catalog.children(&CanonicalPath::from("/a")).len(), 1);
        assert_eq!(catalog.children(&CanonicalPath::from("/a/b")).len(), 1);
    }

    #[test]
    fn explicit_directory_preempts_synthesized_twin() {
        let catalog = Catalog::build(&[raw("a/", true), raw("a/b.txt", false)]);
        let entries_for_a: Vec<_> = catalog
            .entries
            .values()
            .filter(|e| e.path.as_str() == "/a")
            .collect();
        assert_eq!(entries_for_a.len(), 1);
        assert!(!catalog.synthesized.contains_key(&CanonicalPath::from("/a").fold_key()));
    }

    #[test]
    fn explicit_directory_preempts_synthesized_twin_regardless_of_order() {
        // The child arrives first, so its ancestor walk synthesizes
        // `/a` before `a`'s own explicit directory entry is seen.
        let catalog = Catalog::build(&[raw("a/b.txt", false), raw("a/", true)]);
        let entries_for_a: Vec<_> = catalog
            .entries
            .values()
            .filter(|e| e.path.as_str() == "/a")
            .collect();
        assert_eq!(entries_for_a.len(), 1);
        assert!(!catalog.synthesized.contains_key(&CanonicalPath::from("/a").fold_key()));
    }

    #[test]
    fn root_is_always_present() {
        let catalog = Catalog::build(&[]);
        assert!(catalog.exists(&CanonicalPath::root()));
        assert!(catalog.is_directory(&CanonicalPath::root()));
    }
}
