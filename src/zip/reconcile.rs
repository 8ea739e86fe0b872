//! Merging the two interpretations into one range map.
//!
//! Ranges both sides agree on collapse into one. Everything else is kept
//! and explained: gaps become `unaccounted` ranges, collisions are
//! trimmed and flagged, and references that do not line up between the
//! local headers and the central directory are reported.

use std::collections::BTreeSet;
use tracing::debug;

use super::central::CentralDirectory;
use super::forward::ForwardScan;
use super::range::{ByteRange, RangeKind};
use super::report::{AnomalyKind, AnomalyRecord, Report};
use super::tail::TailScan;

/// Merge both interpretations of a buffer of `buffer_len` bytes.
pub fn reconcile(
    forward: ForwardScan,
    tail: TailScan,
    central: CentralDirectory,
    buffer_len: u64,
) -> Report {
    let mut anomalies = Vec::new();
    anomalies.extend(forward.anomalies.iter().cloned());
    anomalies.extend(tail.anomalies);
    anomalies.extend(central.anomalies.iter().cloned());
    let eocd = tail.eocd;

    let referenced: BTreeSet<u64> = central
        .entries
        .iter()
        .filter_map(|entry| entry.header_offset)
        .collect();
    let local_starts: BTreeSet<u64> = forward
        .ranges
        .iter()
        .chain(&central.local_ranges)
        .filter(|r| r.contains == RangeKind::LocalFileHeader)
        .map(|r| r.start)
        .collect();

    let mut candidates = Vec::new();

    for range in &forward.ranges {
        let mut range = range.clone();
        if range.contains == RangeKind::LocalFileHeader && !referenced.contains(&range.start) {
            range = range.flagged(AnomalyKind::UnreferencedLocalHeader);
            anomalies.push(AnomalyRecord::new(
                AnomalyKind::UnreferencedLocalHeader,
                Some(range.clone()),
                format!(
                    "local file header \"{}\" at {} is not referenced by the central directory",
                    range.description.as_deref().unwrap_or_default(),
                    range.start
                ),
            ));
        }
        candidates.push(range);
    }

    if let Some(eocd) = &eocd {
        candidates.extend(eocd.ranges.iter().cloned());
    }

    for entry in &central.entries {
        let mut range = entry.range.clone();
        let lands = entry
            .header_offset
            .is_some_and(|offset| local_starts.contains(&offset));
        if !lands {
            range = range.flagged(AnomalyKind::OrphanCentralDirectoryEntry);
            anomalies.push(AnomalyRecord::new(
                AnomalyKind::OrphanCentralDirectoryEntry,
                Some(range.clone()),
                format!(
                    "central directory entry \"{}\" points at {}, where no local file header starts",
                    entry.name,
                    entry.values.lfh_offset
                ),
            ));
        }
        candidates.push(range);
    }

    // A forward walk that found nothing is a prefixed archive; one that
    // found headers but not these was led elsewhere
    let forward_starts: BTreeSet<u64> = forward
        .ranges
        .iter()
        .filter(|r| r.contains == RangeKind::LocalFileHeader)
        .map(|r| r.start)
        .collect();
    for range in &central.local_ranges {
        let mut range = range.clone();
        if range.contains == RangeKind::LocalFileHeader
            && !forward_starts.is_empty()
            && !forward_starts.contains(&range.start)
        {
            range = range.flagged(AnomalyKind::UnreachableLocalHeader);
            anomalies.push(AnomalyRecord::new(
                AnomalyKind::UnreachableLocalHeader,
                Some(range.clone()),
                format!(
                    "local file header \"{}\" at {} is only reachable through the central directory; the forward walk stopped at {}",
                    range.description.as_deref().unwrap_or_default(),
                    range.start,
                    forward.stopped_at
                ),
            ));
        }
        candidates.push(range);
    }

    let merged = merge(candidates, buffer_len, &mut anomalies);

    let trailing_from = forward
        .stopped_at
        .max(eocd.as_ref().map_or(0, |e| e.directory.end()));
    let parsed_ranges = fill_gaps(merged, buffer_len, trailing_from, &mut anomalies);

    dedup_anomalies(&mut anomalies);

    let report = Report {
        comment: eocd.map(|e| e.comment).unwrap_or_default(),
        parsed_ranges,
        anomalies,
        entries: central.summaries(),
    };
    debug!(
        ranges = report.parsed_ranges.len(),
        anomalies = report.anomalies.len(),
        "reconciled"
    );
    report
}

/// Sort, collapse agreeing duplicates and trim collisions.
///
/// The result is sorted and non-overlapping but may have gaps.
fn merge(
    mut candidates: Vec<ByteRange>,
    buffer_len: u64,
    anomalies: &mut Vec<AnomalyRecord>,
) -> Vec<ByteRange> {
    // Stable sort: on identical extents the forward interpretation's copy
    // comes first and is the one kept.
    candidates.sort_by_key(ByteRange::extent);

    let mut merged: Vec<ByteRange> = Vec::with_capacity(candidates.len());
    // Index of the merged range reaching furthest so far
    let mut cover: Option<usize> = None;
    let mut covered_end = 0u64;
    // Untrimmed extent of the previous candidate and where it ended up
    let mut previous: Option<((u64, u64, RangeKind), Option<usize>)> = None;

    for mut range in candidates {
        if range.start >= buffer_len {
            continue;
        }
        range.end = range.end.min(buffer_len);
        let extent = range.extent();

        if let Some((last_extent, slot)) = previous {
            if last_extent == extent {
                if let Some(index) = slot {
                    let kept = &mut merged[index];
                    kept.flags.extend(range.flags);
                    if kept.description.is_none() {
                        kept.description = range.description;
                    }
                }
                continue;
            }
        }

        if range.start < covered_end {
            let Some(index) = cover else {
                previous = Some((extent, None));
                continue;
            };
            let covering = &mut merged[index];
            covering.flags.insert(AnomalyKind::Overlap);
            anomalies.push(AnomalyRecord::new(
                AnomalyKind::Overlap,
                Some(range.clone()),
                format!("{} overlaps {}", range, covering),
            ));

            if range.end <= covered_end {
                // Fully covered: only the anomaly record keeps its span
                previous = Some((extent, None));
                continue;
            }
            range.start = covered_end;
            range.flags.insert(AnomalyKind::Overlap);
        }

        covered_end = range.end;
        merged.push(range);
        cover = Some(merged.len() - 1);
        previous = Some((extent, cover));
    }

    merged
}

/// Insert `unaccounted` ranges so the map covers `[0, buffer_len)`.
///
/// Gaps at or after `trailing_from` lie beyond both the forward scan and
/// the central directory and are reported as trailing bytes.
fn fill_gaps(
    merged: Vec<ByteRange>,
    buffer_len: u64,
    trailing_from: u64,
    anomalies: &mut Vec<AnomalyRecord>,
) -> Vec<ByteRange> {
    let mut out = Vec::with_capacity(merged.len() * 2 + 1);
    let mut cursor = 0u64;

    let mut gap = |start: u64, end: u64, out: &mut Vec<ByteRange>| {
        let mut range = ByteRange::new(start, end, RangeKind::Unaccounted);
        if start >= trailing_from {
            range = range.flagged(AnomalyKind::TrailingUnaccountedBytes);
            anomalies.push(AnomalyRecord::new(
                AnomalyKind::TrailingUnaccountedBytes,
                Some(range.clone()),
                format!(
                    "{} bytes after the end of both the local headers and the central directory",
                    end - start
                ),
            ));
        }
        out.push(range);
    };

    for range in merged {
        if range.start > cursor {
            gap(cursor, range.start, &mut out);
        }
        cursor = range.end;
        out.push(range);
    }
    if cursor < buffer_len {
        gap(cursor, buffer_len, &mut out);
    }

    out
}

/// Order anomalies by position and drop exact repeats, which happen when
/// both interpretations trip over the same record.
fn dedup_anomalies(anomalies: &mut Vec<AnomalyRecord>) {
    anomalies.sort_by(|a, b| {
        let key = |r: &AnomalyRecord| (r.range.as_ref().map(|range| (range.start, range.end)), r.kind);
        key(a).cmp(&key(b)).then_with(|| a.detail.cmp(&b.detail))
    });
    anomalies.dedup();
}
