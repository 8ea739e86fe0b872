mod common;

use std::io::Write;

use common::ArchiveBuilder;
use tempfile::NamedTempFile;
use ziplinter::{Error, LocalFileReader, parse_bytes, parse_file, parse_reader};

fn archive() -> Vec<u8> {
    ArchiveBuilder::new()
        .stored("one.txt", b"one")
        .deflated("two.txt", &b"two ".repeat(50))
        .comment(b"on disk")
        .finish()
}

#[test]
fn file_matches_bytes() {
    let buf = archive();
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&buf).unwrap();
    file.flush().unwrap();

    let report = parse_file(file.path()).unwrap();
    assert_eq!(report, parse_bytes(&buf));
    assert_eq!(report.comment, "on disk");
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.zip");

    let err = parse_file(&path).unwrap_err();
    let Error::Io { path: reported, source } = &err;
    assert_eq!(reported, &path);
    assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
    assert!(err.to_string().contains("missing.zip"));
}

#[test]
fn empty_file_is_not_an_error() {
    let file = NamedTempFile::new().unwrap();
    let report = parse_file(file.path()).unwrap();
    assert!(report.parsed_ranges.is_empty());
}

#[tokio::test]
async fn reader_matches_bytes() {
    let buf = archive();
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&buf).unwrap();
    file.flush().unwrap();

    let reader = LocalFileReader::new(file.path()).unwrap();
    let report = parse_reader(&reader).await.unwrap();
    assert_eq!(report, parse_bytes(&buf));
    assert_eq!(report.entries.len(), 2);
}
