//! End-to-end coverage across the Archive Index, Hybrid Entry Cache,
//! Executable Redirector, and Handle State Machine, built on small
//! in-memory ZIP fixtures rather than a network fixture repository.

use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use simplezipdrive::archive::{ArchiveReader, ZipReader};
use simplezipdrive::cache::HybridEntryCache;
use simplezipdrive::catalog::Catalog;
use simplezipdrive::error::ArchiveFsError;
use simplezipdrive::executable::{AccessIntent, ExecutableRedirector};
use simplezipdrive::handle::{self, CreationDisposition};
use simplezipdrive::namespace::NamespaceView;
use simplezipdrive::path::CanonicalPath;

fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, contents) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap();
    }
    buf.into_inner()
}

fn open_zip(bytes: Vec<u8>) -> Box<dyn ArchiveReader> {
    Box::new(ZipReader::open(Cursor::new(bytes), None).unwrap())
}

#[test]
fn namespace_completeness_matches_property_3() {
    let bytes = build_zip(&[
        ("readme.txt", b"hello"),
        ("docs/guide.md", b"guide contents"),
        ("docs/images/logo.png", b"\x89PNG"),
    ]);
    let reader = open_zip(bytes);
    let catalog = Catalog::build(reader.entries());
    let ns = NamespaceView::new(&catalog, None);

    let mut discovered = std::collections::HashSet::new();
    let mut stack = vec![CanonicalPath::root()];
    while let Some(dir) = stack.pop() {
        for entry in ns.list(&dir).unwrap() {
            let child = dir.join(&entry.name);
            discovered.insert(child.to_string().to_ascii_lowercase());
            if matches!(entry.info.attributes, simplezipdrive::namespace::Attributes::Directory) {
                stack.push(child);
            }
        }
    }

    assert!(discovered.contains("/readme.txt"));
    assert!(discovered.contains("/docs"));
    assert!(discovered.contains("/docs/guide.md"));
    assert!(discovered.contains("/docs/images"));
    assert!(discovered.contains("/docs/images/logo.png"));
}

#[test]
fn read_round_trip_matches_property_1() {
    let contents = b"the quick brown fox jumps over the lazy dog";
    let bytes = build_zip(&[("fox.txt", contents)]);
    let reader = open_zip(bytes);
    let catalog = Catalog::build(reader.entries());
    let decoder: Arc<Mutex<Box<dyn ArchiveReader>>> = Arc::new(Mutex::new(reader));

    let cache = HybridEntryCache::new(std::env::temp_dir().join("szd_rt_cache"), decoder.clone()).unwrap();
    let redirector = ExecutableRedirector::new(&std::env::temp_dir().join("szd_rt_exec")).unwrap();

    let path = CanonicalPath::from("/fox.txt");
    let mut handle = handle::create_handle(
        &catalog,
        &cache,
        &redirector,
        &decoder,
        &path,
        CreationDisposition::Open,
        AccessIntent { read_data: true, ..Default::default() },
    )
    .unwrap();

    for offset in [0usize, 4, 20, contents.len()] {
        for len in [0usize, 3, 100] {
            let got = handle::read_handle(&mut handle, offset as i64, len).unwrap();
            let expected_end = (offset + len).min(contents.len());
            let expected = if offset >= contents.len() { &[][..] } else { &contents[offset..expected_end] };
            assert_eq!(got, expected, "offset={offset} len={len}");
        }
    }

    cache.dispose();
    redirector.dispose();
}

#[test]
fn mutating_dispositions_are_rejected_per_property_2() {
    let bytes = build_zip(&[("readme.txt", b"hello")]);
    let reader = open_zip(bytes);
    let catalog = Catalog::build(reader.entries());
    let decoder: Arc<Mutex<Box<dyn ArchiveReader>>> = Arc::new(Mutex::new(reader));
    let cache = HybridEntryCache::new(std::env::temp_dir().join("szd_mut_cache"), decoder.clone()).unwrap();
    let redirector = ExecutableRedirector::new(&std::env::temp_dir().join("szd_mut_exec")).unwrap();

    let path = CanonicalPath::from("/readme.txt");
    let result = handle::create_handle(
        &catalog,
        &cache,
        &redirector,
        &decoder,
        &path,
        CreationDisposition::Truncate,
        AccessIntent::default(),
    );
    assert!(matches!(result, Err(ArchiveFsError::AccessDenied)));

    cache.dispose();
    redirector.dispose();
}

#[test]
fn session_teardown_removes_temp_directory_per_property_6() {
    use simplezipdrive::mount::SessionTempDir;

    let session = SessionTempDir::create().unwrap();
    let dir = session.path().to_path_buf();
    assert!(dir.exists());
    std::fs::write(dir.join("marker.txt"), b"x").unwrap();

    session.teardown();
    assert!(!dir.exists());
}

#[test]
fn encrypted_entry_requires_password() {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .with_aes_encryption(zip::AesMode::Aes256, "correct horse");
        writer.start_file("secret.txt", options).unwrap();
        writer.write_all(b"top secret").unwrap();
        writer.finish().unwrap();
    }
    let bytes = buf.into_inner();

    assert!(ZipReader::open(Cursor::new(bytes.clone()), None).is_err());

    let reader = ZipReader::open(Cursor::new(bytes), Some("correct horse")).unwrap();
    assert_eq!(reader.entries().len(), 1);
}
