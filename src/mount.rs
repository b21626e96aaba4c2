//! Mount Lifecycle (component H): session temp directory setup, drive
//! selection, mount/unmount, and teardown.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rand::Rng;
use widestring::U16CString;

use crate::archive::{ArchiveFormat, ArchiveReader};
use crate::cache::HybridEntryCache;
use crate::catalog::{self, Catalog};
use crate::dispatcher::ArchiveFsDispatcher;
use crate::error::{ArchiveFsError, Result};
use crate::executable::ExecutableRedirector;

/// Drive letters tried in order for drag-and-drop mounting (§6).
pub const DRAG_AND_DROP_DRIVES: &[char] = &['M', 'N', 'O', 'P', 'Q'];

/// A session's private corner of `%TEMP%`, torn down on unmount.
pub struct SessionTempDir {
    root: PathBuf,
    session: PathBuf,
}

impl SessionTempDir {
    /// Creates `%TEMP%\SimpleZipDrive\<pid>_<token>\` and its
    /// `Executables` subdirectory.
    pub fn create() -> Result<Self> {
        let root = std::env::temp_dir().join("SimpleZipDrive");
        fs::create_dir_all(&root)?;
        let token: u64 = rand::rng().random();
        let session = root.join(format!("{}_{token:016x}", std::process::id()));
        fs::create_dir_all(&session)?;
        Ok(Self { root, session })
    }

    pub fn path(&self) -> &Path {
        &self.session
    }

    /// Deletes the session directory, then the root if it's now empty.
    /// Safe to call even if nothing under it was ever populated.
    pub fn teardown(self) {
        let _ = fs::remove_dir_all(&self.session);
        let _ = fs::remove_dir(&self.root);
    }
}

/// The order in which to attempt opening `extension`-tagged archives.
/// A recognised extension is tried first (the fast path); the other
/// two formats follow, since explicit mount mode is not restricted to
/// the three known extensions (§3).
pub fn format_attempt_order(extension: Option<&str>) -> Vec<ArchiveFormat> {
    let mut order: Vec<ArchiveFormat> = Vec::new();
    if let Some(hinted) = extension.and_then(ArchiveFormat::from_extension) {
        order.push(hinted);
    }
    for candidate in ArchiveFormat::probe_order() {
        if !order.contains(&candidate) {
            order.push(candidate);
        }
    }
    order
}

/// Opens `archive_path`, builds the catalog, cache, and redirector, and
/// returns a dispatcher ready to be mounted. `formats` is tried in
/// order until one succeeds (§4.B supplement).
pub fn prepare_dispatcher(
    archive_path: &Path,
    formats: &[ArchiveFormat],
    session_dir: &Path,
    password_provider: &dyn Fn() -> String,
) -> Result<ArchiveFsDispatcher> {
    let mut last_err = None;
    let mut opened = None;
    for &candidate in formats {
        let path = archive_path.to_path_buf();
        let result = catalog::open_reader(
            candidate,
            move || std::fs::File::open(&path),
            archive_path,
            password_provider,
        );
        match result {
            Ok(reader) => {
                opened = Some(reader);
                break;
            }
            Err(e) => last_err = Some(e),
        }
    }

    let reader = opened.ok_or_else(|| {
        last_err.unwrap_or_else(|| ArchiveFsError::ArchiveFormat(archive_path.display().to_string()))
    })?;

    let archive_byte_length = reader.byte_length().or_else(|| fs::metadata(archive_path).ok().map(|m| m.len()));
    let catalog = Catalog::build(reader.entries());
    let decoder: Arc<Mutex<Box<dyn ArchiveReader>>> = Arc::new(Mutex::new(reader));

    let cache = HybridEntryCache::new(session_dir.join("Cache"), decoder.clone())?;
    let redirector = ExecutableRedirector::new(session_dir)?;

    ArchiveFsDispatcher::new(catalog, cache, redirector, decoder, archive_byte_length)
        .map_err(ArchiveFsError::from)
}

/// Formats a drive letter as the `X:\` form the bridge expects.
pub fn drive_mount_point(letter: char) -> U16CString {
    U16CString::from_str(format!("{letter}:\\")).expect("drive letter has no interior NUL")
}

/// Disposes the cache and redirector and removes the session temp
/// directory. Ordered so a partially constructed mount (e.g. the
/// dispatcher failed to build) can still be unwound safely: each step
/// tolerates the previous one having been a no-op.
pub fn teardown(cache: &HybridEntryCache, redirector: &ExecutableRedirector, session_dir: SessionTempDir) {
    cache.dispose();
    redirector.dispose();
    session_dir.teardown();
}

#[cfg(windows)]
pub mod signal {
    use std::sync::Mutex;

    use widestring::U16CString;
    use windows_sys::Win32::Foundation::BOOL;
    use windows_sys::Win32::System::Console::{SetConsoleCtrlHandler, CTRL_C_EVENT};

    static MOUNT_POINT: Mutex<Option<U16CString>> = Mutex::new(None);

    unsafe extern "system" fn handler(ctrl_type: u32) -> BOOL {
        if ctrl_type == CTRL_C_EVENT {
            if let Some(mount_point) = MOUNT_POINT.lock().unwrap().as_ref() {
                // Unblocks the thread sitting in `dokan::mount`; returning
                // TRUE below then suppresses the default terminate action
                // so that thread gets to run `session.teardown()`.
                dokan::unmount(mount_point);
            }
            1
        } else {
            0
        }
    }

    /// Installs a Ctrl+C handler and records `mount_point` as the drive
    /// to unmount when it fires. Must be called after the mount point is
    /// known and before `dokan::mount` blocks the calling thread.
    pub fn install(mount_point: &U16CString) {
        *MOUNT_POINT.lock().unwrap() = Some(mount_point.clone());
        unsafe {
            SetConsoleCtrlHandler(Some(handler), 1);
        }
    }
}

#[cfg(not(windows))]
pub mod signal {
    pub fn install(_mount_point: &widestring::U16CString) {}
}
