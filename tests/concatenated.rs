mod common;

use common::{ArchiveBuilder, assert_covers, two_archives};
use ziplinter::{AnomalyKind, RangeKind, parse_bytes};

#[test]
fn second_archive_wins() {
    let (a, b) = two_archives();
    let boundary = a.len() as u64;
    let joined = [a.clone(), b].concat();
    let report = parse_bytes(&joined);

    assert_covers(&report, joined.len());

    // the backward interpretation lands on the second archive
    assert!(
        report
            .parsed_ranges
            .iter()
            .any(|r| r.contains == RangeKind::LocalFileHeader && r.start == boundary)
    );
    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.entries[0].name, "second.txt");
    assert_eq!(report.entries[0].header_offset, boundary);

    let multiple: Vec<_> = report
        .anomalies_of(AnomalyKind::MultipleEndOfCentralDirectoryCandidates)
        .collect();
    assert_eq!(multiple.len(), 1);
    assert!(multiple[0].range.as_ref().unwrap().start >= boundary);

    assert_ne!(report, parse_bytes(&a));
}

#[test]
fn first_archive_is_left_over() {
    let (a, b) = two_archives();
    let boundary = a.len() as u64;
    let joined = [a, b].concat();
    let report = parse_bytes(&joined);

    let unreferenced: Vec<_> = report
        .anomalies_of(AnomalyKind::UnreferencedLocalHeader)
        .collect();
    assert_eq!(unreferenced.len(), 1);
    assert_eq!(unreferenced[0].range.as_ref().unwrap().start, 0);

    // the first archive's directory and end record belong to nobody
    let leftover = report
        .parsed_ranges
        .iter()
        .find(|r| r.contains == RangeKind::Unaccounted)
        .unwrap();
    assert_eq!(leftover.end, boundary);
    assert!(!report.has_anomaly(AnomalyKind::TrailingUnaccountedBytes));
    assert!(!report.has_anomaly(AnomalyKind::OrphanCentralDirectoryEntry));
}

#[test]
fn each_half_alone_is_consistent() {
    let (a, b) = two_archives();
    for archive in [a, b] {
        let report = parse_bytes(&archive);
        assert_covers(&report, archive.len());
        assert!(report.is_consistent(), "{:#?}", report.anomalies);
    }
}

#[test]
fn large_second_archive_is_still_flagged() {
    // the first end record falls outside the search window
    let a = ArchiveBuilder::new()
        .stored("first.txt", b"the first archive")
        .finish();
    let b = ArchiveBuilder::new()
        .stored("big.bin", &vec![b'z'; 100_000])
        .finish();
    let boundary = a.len() as u64;
    let joined = [a, b].concat();
    let report = parse_bytes(&joined);

    assert_covers(&report, joined.len());
    assert!(!report.has_anomaly(AnomalyKind::MultipleEndOfCentralDirectoryCandidates));

    let header = report
        .parsed_ranges
        .iter()
        .find(|r| r.contains == RangeKind::LocalFileHeader && r.start == boundary)
        .unwrap();
    assert!(header.flags.contains(&AnomalyKind::UnreachableLocalHeader));

    let unreachable: Vec<_> = report
        .anomalies_of(AnomalyKind::UnreachableLocalHeader)
        .collect();
    assert_eq!(unreachable.len(), 1);
    assert_eq!(unreachable[0].range.as_ref().unwrap().start, boundary);
}
