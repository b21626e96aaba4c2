//! Hybrid Entry Cache (component C): materializes an entry's
//! decompressed bytes into a seekable source attached to a handle,
//! routing small entries through memory and large (or unknown-size)
//! entries through a temp file, under a global memory budget.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::archive::ArchiveReader;
use crate::catalog::ArchiveEntry;
use crate::error::{ArchiveFsError, Result};

/// Entries at or above this size always go to the disk tier.
pub const MEM_LIMIT_PER_ENTRY: u64 = 512 * 1024 * 1024;
/// Global ceiling on bytes held across all live memory-tier buffers.
pub const MEM_BUDGET_TOTAL: u64 = 1024 * 1024 * 1024;

/// A seekable byte source handed to a handle. Shared behind an `Arc` so
/// multiple concurrent handles for the same disk-cached entry reuse one
/// underlying temp file while getting independent read positions.
pub enum EntrySource {
    Memory(Arc<MemoryBuffer>),
    Disk(File),
}

/// A fully materialized small-entry buffer. Decrements the global
/// memory counter exactly once, on drop, however many handles reference
/// the same path concurrently (invariant 4).
pub struct MemoryBuffer {
    pub bytes: Vec<u8>,
    budget: Arc<MemoryBudget>,
}

impl Drop for MemoryBuffer {
    fn drop(&mut self) {
        self.budget.release(self.bytes.len() as u64);
    }
}

impl AsRef<[u8]> for MemoryBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

#[derive(Default)]
struct MemoryBudget {
    live: Mutex<u64>,
}

impl MemoryBudget {
    fn try_reserve(&self, amount: u64) -> bool {
        let mut live = self.live.lock().unwrap();
        if *live + amount > MEM_BUDGET_TOTAL {
            return false;
        }
        *live += amount;
        true
    }

    fn release(&self, amount: u64) {
        let mut live = self.live.lock().unwrap();
        *live = live.saturating_sub(amount);
    }

    fn live_bytes(&self) -> u64 {
        *self.live.lock().unwrap()
    }
}

/// Tracks which canonical paths already have a disk-tier temp file, so
/// concurrent handles for the same cold entry observe a single
/// extraction (property 7, "disk-tier singleton").
struct DiskCacheTable {
    files: HashMap<String, PathBuf>,
}

pub struct HybridEntryCache {
    temp_dir: PathBuf,
    budget: Arc<MemoryBudget>,
    disk_cache: Mutex<DiskCacheTable>,
    /// The one decoder instance shared with the Executable Redirector
    /// and the Mount Lifecycle. Not thread-safe on its own; every call
    /// into it goes through this lock, which also serializes
    /// `disk_cache`'s check-then-extract sequence, per §4.C
    /// "Concurrency".
    decoder: Arc<Mutex<Box<dyn ArchiveReader>>>,
}

impl HybridEntryCache {
    pub fn new(temp_dir: PathBuf, decoder: Arc<Mutex<Box<dyn ArchiveReader>>>) -> Result<Self> {
        fs::create_dir_all(&temp_dir)?;
        Ok(Self {
            temp_dir,
            budget: Arc::new(MemoryBudget::default()),
            disk_cache: Mutex::new(DiskCacheTable { files: HashMap::new() }),
            decoder,
        })
    }

    pub fn live_memory_bytes(&self) -> u64 {
        self.budget.live_bytes()
    }

    /// Materializes `entry` into a source suitable for a handle,
    /// choosing the tier per the rules in §4.C.
    pub fn materialize(&self, entry: &ArchiveEntry) -> Result<EntrySource> {
        let goes_to_disk = match entry.size {
            None => true,
            Some(s) if s >= MEM_LIMIT_PER_ENTRY => true,
            Some(s) => !self.budget.try_reserve(s),
        };

        if goes_to_disk {
            self.materialize_disk(entry)
        } else {
            self.materialize_memory(entry)
        }
    }

    fn materialize_memory(&self, entry: &ArchiveEntry) -> Result<EntrySource> {
        let reserved = entry.size.expect("memory tier requires a known size");
        let mut decoder = self.decoder.lock().unwrap();
        let mut stream = decoder.open_entry_stream(entry.reader_index)?;
        let mut buf = Vec::with_capacity(reserved as usize);
        stream.read_to_end(&mut buf)?;
        drop(stream);
        drop(decoder);

        // The decompressed size can differ slightly from the declared
        // size (e.g. streaming formats); true up the reservation.
        let actual = buf.len() as u64;
        if actual != reserved {
            self.budget.release(reserved);
            if !self.budget.try_reserve(actual) {
                // Back off to disk rather than violate the budget.
                return self.store_bytes_on_disk(entry, &buf);
            }
        }

        Ok(EntrySource::Memory(Arc::new(MemoryBuffer {
            bytes: buf,
            budget: self.budget.clone(),
        })))
    }

    fn materialize_disk(&self, entry: &ArchiveEntry) -> Result<EntrySource> {
        let key = entry.path.fold_key();
        {
            let table = self.disk_cache.lock().unwrap();
            if let Some(path) = table.files.get(&key) {
                return Ok(EntrySource::Disk(open_shared_read(path)?));
            }
        }

        // Check-then-extract must be atomic: hold the same lock across
        // both the existence check and the insert.
        let mut table = self.disk_cache.lock().unwrap();
        if let Some(path) = table.files.get(&key) {
            return Ok(EntrySource::Disk(open_shared_read(path)?));
        }

        if let Some(declared) = entry.size {
            ensure_free_space(&self.temp_dir, declared)?;
        }

        let temp_path = self.fresh_temp_path();
        {
            let mut decoder = self.decoder.lock().unwrap();
            let mut stream = decoder.open_entry_stream(entry.reader_index)?;
            let mut out = File::create(&temp_path)?;
            std::io::copy(&mut stream, &mut out)?;
        }
        table.files.insert(key, temp_path.clone());
        drop(table);

        Ok(EntrySource::Disk(open_shared_read(&temp_path)?))
    }

    fn store_bytes_on_disk(&self, entry: &ArchiveEntry, bytes: &[u8]) -> Result<EntrySource> {
        let key = entry.path.fold_key();
        let mut table = self.disk_cache.lock().unwrap();
        if let Some(path) = table.files.get(&key) {
            return Ok(EntrySource::Disk(open_shared_read(path)?));
        }
        let temp_path = self.fresh_temp_path();
        File::create(&temp_path)?.write_all(bytes)?;
        table.files.insert(key, temp_path.clone());
        Ok(EntrySource::Disk(open_shared_read(&temp_path)?))
    }

    fn fresh_temp_path(&self) -> PathBuf {
        let token: u64 = rand::rng().random();
        self.temp_dir.join(format!("{token:016x}.tmp"))
    }

    /// Deletes every temp file created for the disk tier. Called once,
    /// from the Mount Lifecycle's teardown.
    pub fn dispose(&self) {
        let mut table = self.disk_cache.lock().unwrap();
        for (_, path) in table.files.drain() {
            let _ = fs::remove_file(path);
        }
    }
}

#[cfg(windows)]
fn open_shared_read(path: &Path) -> Result<File> {
    use std::os::windows::fs::OpenOptionsExt;
    // FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE: other
    // handles to the same temp file must be able to open it too, since
    // the disk tier is shared across concurrent handles (§4.C).
    const FILE_SHARE_ALL: u32 = 0x1 | 0x2 | 0x4;
    OpenOptions::new()
        .read(true)
        .share_mode(FILE_SHARE_ALL)
        .open(path)
        .map_err(ArchiveFsError::from)
}

#[cfg(not(windows))]
fn open_shared_read(path: &Path) -> Result<File> {
    OpenOptions::new().read(true).open(path).map_err(ArchiveFsError::from)
}

fn ensure_free_space(dir: &Path, needed: u64) -> Result<()> {
    // `fs4`-style statvfs queries aren't portable enough to depend on
    // here; a conservative probe is to attempt to preallocate nothing
    // and instead trust the eventual write to fail with a disk-full IO
    // error, which the `From<std::io::Error>` conversion on
    // `ArchiveFsError` already distinguishes at the source-io boundary.
    // We still perform a best-effort check when the platform exposes
    // one, failing closed only when we're certain there isn't room.
    match fs2_available_space(dir) {
        Some(available) if available < needed => {
            Err(ArchiveFsError::DiskFull { needed })
        }
        _ => Ok(()),
    }
}

#[cfg(windows)]
fn fs2_available_space(dir: &Path) -> Option<u64> {
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::GetDiskFreeSpaceExW;

    let wide: Vec<u16> = dir.as_os_str().encode_wide().chain(std::iter::once(0)).collect();
    let mut free_available: u64 = 0;
    let ok = unsafe {
        GetDiskFreeSpaceExW(
            wide.as_ptr(),
            &mut free_available,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
    if ok != 0 {
        Some(free_available)
    } else {
        None
    }
}

#[cfg(not(windows))]
fn fs2_available_space(_dir: &Path) -> Option<u64> {
    None
}

/// A thin seekable wrapper so the Handle State Machine has one type to
/// hold regardless of tier (§9, "handle context as a tagged source").
pub enum SeekableSource {
    Memory(Cursor<Arc<MemoryBuffer>>),
    Disk(File),
}

impl std::io::Read for SeekableSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            SeekableSource::Memory(c) => c.read(buf),
            SeekableSource::Disk(f) => f.read(buf),
        }
    }
}

impl std::io::Seek for SeekableSource {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        match self {
            SeekableSource::Memory(c) => c.seek(pos),
            SeekableSource::Disk(f) => f.seek(pos),
        }
    }
}

pub fn into_seekable(source: EntrySource) -> SeekableSource {
    match source {
        EntrySource::Memory(buf) => SeekableSource::Memory(Cursor::new(buf)),
        EntrySource::Disk(f) => SeekableSource::Disk(f),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveFormat, ArchiveReader, RawEntry};
    use crate::path::CanonicalPath;
    use std::io::Cursor as IoCursor;
    use std::time::SystemTime;

    struct FakeReader(Vec<Vec<u8>>);
    impl ArchiveReader for FakeReader {
        fn format(&self) -> ArchiveFormat {
            ArchiveFormat::Zip
        }
        fn entries(&self) -> &[RawEntry] {
            &[]
        }
        fn open_entry_stream(&mut self, index: usize) -> Result<Box<dyn Read + '_>> {
            Ok(Box::new(IoCursor::new(self.0[index].clone())))
        }
        fn byte_length(&self) -> Option<u64> {
            None
        }
    }

    fn entry(index: usize, size: u64, path: &str) -> ArchiveEntry {
        ArchiveEntry {
            path: CanonicalPath::from(path),
            is_directory: false,
            size: Some(size),
            modified: SystemTime::UNIX_EPOCH,
            created: None,
            encrypted: false,
            reader_index: index,
        }
    }

    fn cache_with(bytes: Vec<Vec<u8>>, dir_name: &str) -> HybridEntryCache {
        let decoder: Arc<Mutex<Box<dyn ArchiveReader>>> = Arc::new(Mutex::new(Box::new(FakeReader(bytes))));
        HybridEntryCache::new(std::env::temp_dir().join(dir_name), decoder).unwrap()
    }

    #[test]
    fn entry_at_the_disk_threshold_materializes_to_disk_and_dispose_removes_it() {
        // Property 6 / scenario S3: an entry at or above
        // MEM_LIMIT_PER_ENTRY always goes to the disk tier, and `dispose`
        // deletes whatever temp files it created.
        let contents = b"stand-in for a large entry's bytes".to_vec();
        let cache = cache_with(vec![contents.clone()], "szd_cache_disk_threshold");
        let e = entry(0, MEM_LIMIT_PER_ENTRY, "/big.bin");

        let source = cache.materialize(&e).unwrap();
        assert!(matches!(source, EntrySource::Disk(_)));
        drop(source);

        let temp_dir = std::env::temp_dir().join("szd_cache_disk_threshold");
        assert_eq!(fs::read_dir(&temp_dir).unwrap().count(), 1);

        cache.dispose();
        assert_eq!(fs::read_dir(&temp_dir).unwrap().count(), 0);
    }

    #[test]
    fn unknown_size_entry_materializes_to_disk() {
        let cache = cache_with(vec![b"whatever".to_vec()], "szd_cache_unknown_size");
        let mut e = entry(0, 0, "/unknown.bin");
        e.size = None;
        let source = cache.materialize(&e).unwrap();
        assert!(matches!(source, EntrySource::Disk(_)));
        cache.dispose();
    }

    #[test]
    fn disk_tier_materializes_once_for_concurrent_handles() {
        // Property 7: N concurrent handles to the same cold entry share
        // one temp file.
        let contents = b"cold entry bytes, read by two concurrent handles".to_vec();
        let cache = cache_with(vec![contents.clone()], "szd_cache_singleton");
        let e = entry(0, MEM_LIMIT_PER_ENTRY, "/cold.bin");

        let first = cache.materialize(&e).unwrap();
        let second = cache.materialize(&e).unwrap();

        fn read_all(source: EntrySource) -> Vec<u8> {
            match source {
                EntrySource::Disk(mut f) => {
                    let mut buf = Vec::new();
                    f.read_to_end(&mut buf).unwrap();
                    buf
                }
                EntrySource::Memory(_) => panic!("expected disk tier"),
            }
        }
        assert_eq!(read_all(first), contents);
        assert_eq!(read_all(second), contents);

        let temp_dir = std::env::temp_dir().join("szd_cache_singleton");
        assert_eq!(
            fs::read_dir(&temp_dir).unwrap().count(),
            1,
            "two concurrent materializations of the same entry must share one temp file"
        );

        cache.dispose();
    }

    #[test]
    fn memory_budget_forces_overflow_to_disk_under_concurrent_pressure() {
        // Property 5 / scenario S4: two 400MiB entries fit in memory
        // together; a third pushes the live total past MEM_BUDGET_TOTAL
        // and is routed to disk instead. Freeing the first two brings the
        // live total back to zero.
        const CHUNK: u64 = 400 * 1024 * 1024;
        let bytes = vec![0u8; CHUNK as usize];
        let cache = cache_with(vec![bytes.clone(), bytes.clone(), bytes], "szd_cache_budget");

        let first = cache.materialize(&entry(0, CHUNK, "/a.bin")).unwrap();
        let second = cache.materialize(&entry(1, CHUNK, "/b.bin")).unwrap();
        assert!(matches!(first, EntrySource::Memory(_)));
        assert!(matches!(second, EntrySource::Memory(_)));
        assert_eq!(cache.live_memory_bytes(), 2 * CHUNK);

        let third = cache.materialize(&entry(2, CHUNK, "/c.bin")).unwrap();
        assert!(matches!(third, EntrySource::Disk(_)), "third entry should overflow to the disk tier");

        drop(first);
        drop(second);
        assert_eq!(cache.live_memory_bytes(), 0, "memory is released once every live buffer drops");

        cache.dispose();
    }
}
