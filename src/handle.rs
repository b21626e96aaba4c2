//! Handle State Machine (component E): the lifecycle of a single open
//! handle — Created -> Open -> Drained -> Closed — and the tagged
//! byte source it owns.

use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use crate::cache::{into_seekable, HybridEntryCache, SeekableSource};
use crate::catalog::{ArchiveEntry, Catalog};
use crate::error::{ArchiveFsError, Result};
use crate::executable::{has_executable_extension, AccessIntent, ExecutableRedirector};
use crate::path::CanonicalPath;

/// Creation dispositions, named the way the kernel bridge names them
/// rather than after any particular FFI constant.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CreationDisposition {
    CreateNew,
    Create,
    Open,
    OpenIf,
    Truncate,
    Append,
}

/// Per-handle payload: exactly one of a directory marker or a seekable
/// byte source (§9, "handle context as a tagged source").
pub enum HandleContext {
    Directory,
    File(SeekableSource),
}

pub struct OpenHandle {
    pub path: CanonicalPath,
    pub context: HandleContext,
}

/// Creates a handle for `path`, choosing the byte source per §4.E.
pub fn create_handle(
    catalog: &Catalog,
    cache: &HybridEntryCache,
    redirector: &ExecutableRedirector,
    decoder: &Arc<Mutex<Box<dyn crate::archive::ArchiveReader>>>,
    path: &CanonicalPath,
    disposition: CreationDisposition,
    access: AccessIntent,
) -> Result<OpenHandle> {
    let is_dir = catalog.is_directory(path);
    let exists = catalog.exists(path);

    if is_dir {
        if access.write_data || access.append_data {
            return Err(ArchiveFsError::AccessDenied);
        }
        return match disposition {
            CreationDisposition::Open | CreationDisposition::OpenIf | CreationDisposition::Create => {
                Ok(OpenHandle { path: path.clone(), context: HandleContext::Directory })
            }
            CreationDisposition::CreateNew => Err(ArchiveFsError::AlreadyExists(path.to_string())),
            CreationDisposition::Truncate | CreationDisposition::Append => {
                Err(ArchiveFsError::AccessDenied)
            }
        };
    }

    if !exists {
        return Err(ArchiveFsError::PathNotFound(path.to_string()));
    }

    match disposition {
        CreationDisposition::CreateNew => {
            return Err(ArchiveFsError::AlreadyExists(path.to_string()))
        }
        CreationDisposition::Truncate | CreationDisposition::Append => {
            return Err(ArchiveFsError::AccessDenied)
        }
        CreationDisposition::Create | CreationDisposition::Open | CreationDisposition::OpenIf => {}
    }

    let entry: &ArchiveEntry = catalog
        .lookup(path)
        .ok_or_else(|| ArchiveFsError::PathNotFound(path.to_string()))?;

    let wants_exec = has_executable_extension(std::path::Path::new(path.as_str())) && access.wants_execution();

    let source = if wants_exec {
        let file = redirector.extract_and_open(entry, decoder)?;
        SeekableSource::Disk(file)
    } else {
        into_seekable(cache.materialize(entry)?)
    };

    Ok(OpenHandle {
        path: path.clone(),
        context: HandleContext::File(source),
    })
}

/// Reads up to `len` bytes starting at offset `offset`. Directory
/// handles always fail with access-denied.
pub fn read_handle(handle: &mut OpenHandle, offset: i64, len: usize) -> Result<Vec<u8>> {
    if offset < 0 {
        return Err(ArchiveFsError::InvalidParameter);
    }
    match &mut handle.context {
        HandleContext::Directory => Err(ArchiveFsError::AccessDenied),
        HandleContext::File(source) => {
            let total_len = source.seek(SeekFrom::End(0))?;
            if offset as u64 >= total_len {
                return Ok(Vec::new());
            }
            source.seek(SeekFrom::Start(offset as u64))?;
            let mut buf = vec![0u8; len];
            let mut read_total = 0;
            while read_total < len {
                let n = source.read(&mut buf[read_total..])?;
                if n == 0 {
                    break;
                }
                read_total += n;
            }
            buf.truncate(read_total);
            Ok(buf)
        }
    }
}

/// Cleanup is a deliberate no-op: some kernel bridges issue a read
/// between cleanup and close, so the byte source must survive it
/// (§4.E, §9 "cleanup vs close split").
pub fn cleanup_handle(_handle: &OpenHandle) {}

/// Releases the byte source and lets the handle drop.
pub fn close_handle(_handle: OpenHandle) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::RawEntry;
    use std::time::SystemTime;

    struct FakeReader(Vec<u8>);
    impl crate::archive::ArchiveReader for FakeReader {
        fn format(&self) -> crate::archive::ArchiveFormat {
            crate::archive::ArchiveFormat::Zip
        }
        fn entries(&self) -> &[RawEntry] {
            &[]
        }
        fn open_entry_stream(&mut self, _index: usize) -> Result<Box<dyn Read + '_>> {
            Ok(Box::new(std::io::Cursor::new(self.0.clone())))
        }
        fn byte_length(&self) -> Option<u64> {
            Some(self.0.len() as u64)
        }
    }

    #[test]
    fn directory_create_and_new_conflict() {
        let catalog = Catalog::build(&[RawEntry {
            key: "a/b.txt".into(),
            is_directory: false,
            size: Some(13),
            modified: Some(SystemTime::UNIX_EPOCH),
            created: None,
            encrypted: false,
            index: 0,
        }]);
        let decoder: Arc<Mutex<Box<dyn crate::archive::ArchiveReader>>> =
            Arc::new(Mutex::new(Box::new(FakeReader(b"Hello, world!".to_vec()))));
        let redirector = ExecutableRedirector::new(&std::env::temp_dir().join("shf_test_exec")).unwrap();
        let cache = HybridEntryCache::new(
            std::env::temp_dir().join("shf_test_cache"),
            decoder.clone(),
        )
        .unwrap();

        let path = CanonicalPath::from("/a");
        let result = create_handle(
            &catalog,
            &cache,
            &redirector,
            &decoder,
            &path,
            CreationDisposition::CreateNew,
            AccessIntent::default(),
        );
        assert!(matches!(result, Err(ArchiveFsError::AlreadyExists(_))));
    }
}
