//! Namespace View (component F): answers directory enumeration,
//! per-path metadata, volume info, and pattern search against the
//! Archive Index.

use std::time::SystemTime;

use crate::catalog::Catalog;
use crate::error::{ArchiveFsError, Result};
use crate::path::{glob_match, CanonicalPath};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Attributes {
    Directory,
    ArchiveReadOnly,
}

#[derive(Debug, Clone)]
pub struct FileInfo {
    pub attributes: Attributes,
    pub size: u64,
    pub modified: SystemTime,
    pub created: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub info: FileInfo,
}

pub const VOLUME_LABEL: &str = "SimpleZipDrive";
pub const FILESYSTEM_NAME: &str = "ZipFS";
pub const MAX_COMPONENT_LENGTH: u32 = 255;

#[derive(Debug, Clone, Copy)]
pub struct VolumeFeatures {
    pub read_only: bool,
    pub case_preserved_names: bool,
    pub unicode_on_disk: bool,
}

#[derive(Debug, Clone)]
pub struct VolumeInfo {
    pub label: &'static str,
    pub filesystem_name: &'static str,
    pub max_component_length: u32,
    pub features: VolumeFeatures,
}

pub struct NamespaceView<'a> {
    catalog: &'a Catalog,
    archive_byte_length: Option<u64>,
}

impl<'a> NamespaceView<'a> {
    pub fn new(catalog: &'a Catalog, archive_byte_length: Option<u64>) -> Self {
        Self { catalog, archive_byte_length }
    }

    pub fn get_info(&self, path: &CanonicalPath) -> Result<FileInfo> {
        let timestamps = self
            .catalog
            .timestamps(path)
            .ok_or_else(|| ArchiveFsError::PathNotFound(path.to_string()))?;

        let is_dir = self.catalog.is_directory(path);
        let size = if is_dir {
            0
        } else {
            self.catalog.lookup(path).and_then(|e| e.size).unwrap_or(0)
        };

        Ok(FileInfo {
            attributes: if is_dir { Attributes::Directory } else { Attributes::ArchiveReadOnly },
            size,
            modified: timestamps.modified.unwrap_or(SystemTime::UNIX_EPOCH),
            created: timestamps.created,
            accessed: timestamps.accessed,
        })
    }

    pub fn list(&self, path: &CanonicalPath) -> Result<Vec<DirEntry>> {
        if !self.catalog.is_directory(path) {
            return Err(ArchiveFsError::PathNotFound(path.to_string()));
        }
        let mut out = Vec::new();
        for child in self.catalog.children(path) {
            let name = child.path.file_name().unwrap_or_default().to_string();
            let info = self.get_info(&child.path)?;
            out.push(DirEntry { name, info });
        }
        out.sort_by(|a, b| a.name.to_ascii_lowercase().cmp(&b.name.to_ascii_lowercase()));
        Ok(out)
    }

    pub fn list_pattern(&self, path: &CanonicalPath, pattern: &str) -> Result<Vec<DirEntry>> {
        let all = self.list(path)?;
        Ok(all.into_iter().filter(|e| glob_match(pattern, &e.name)).collect())
    }

    pub fn volume_info(&self) -> VolumeInfo {
        VolumeInfo {
            label: VOLUME_LABEL,
            filesystem_name: FILESYSTEM_NAME,
            max_component_length: MAX_COMPONENT_LENGTH,
            features: VolumeFeatures {
                read_only: true,
                case_preserved_names: true,
                unicode_on_disk: true,
            },
        }
    }

    /// Zero free space; total capacity is the archive's own byte
    /// length when known, else zero (§4.F).
    pub fn free_space(&self) -> (u64, u64) {
        (0, self.archive_byte_length.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::RawEntry;

    fn sample_catalog() -> Catalog {
        Catalog::build(&[
            RawEntry {
                key: "readme.txt".into(),
                is_directory: false,
                size: Some(13),
                modified: Some(SystemTime::UNIX_EPOCH),
                created: None,
                encrypted: false,
                index: 0,
            },
            RawEntry {
                key: "docs/notes.md".into(),
                is_directory: false,
                size: Some(42),
                modified: Some(SystemTime::UNIX_EPOCH),
                created: None,
                encrypted: false,
                index: 1,
            },
        ])
    }

    #[test]
    fn list_root_matches_s1() {
        let catalog = sample_catalog();
        let ns = NamespaceView::new(&catalog, Some(1024));
        let listing = ns.list(&CanonicalPath::root()).unwrap();
        let names: Vec<&str> = listing.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"readme.txt"));
        assert!(names.contains(&"docs"));
    }

    #[test]
    fn glob_pattern_filters_like_list() {
        let catalog = sample_catalog();
        let ns = NamespaceView::new(&catalog, None);
        let all = ns.list(&CanonicalPath::from("/docs")).unwrap();
        let star = ns.list_pattern(&CanonicalPath::from("/docs"), "*").unwrap();
        assert_eq!(all.len(), star.len());

        let filtered = ns.list_pattern(&CanonicalPath::from("/docs"), "*.md").unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "notes.md");
    }

    #[test]
    fn volume_info_fixed_fields() {
        let catalog = sample_catalog();
        let ns = NamespaceView::new(&catalog, None);
        let info = ns.volume_info();
        assert_eq!(info.label, "SimpleZipDrive");
        assert_eq!(info.filesystem_name, "ZipFS");
        assert_eq!(info.max_component_length, 255);
    }
}
