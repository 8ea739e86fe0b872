//! Backward interpretation, part one: locating the end of central directory.
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) near the file's end
//! 2. If a ZIP64 locator precedes it, follow it to the ZIP64 EOCD
//! 3. Work out where the central directory really starts
//!
//! The search window is bounded by the largest comment the format allows,
//! and when several signatures fall inside it the last one wins.

use tracing::{debug, trace};

use super::range::{ByteRange, RangeKind};
use super::report::{AnomalyKind, AnomalyRecord};
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Where the central directory lives according to the tail records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directory {
    /// Offset of the first entry, with `global_offset` applied
    pub offset: u64,
    pub size: u64,
    pub entries: u64,
    /// Shift between declared and actual offsets, for archives with
    /// bytes prepended to them
    pub global_offset: i64,
}

impl Directory {
    /// Declared end of the central directory.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    /// Apply the global offset to a declared offset.
    pub fn adjust(&self, declared: u64) -> Option<u64> {
        u64::try_from(declared as i128 + self.global_offset as i128).ok()
    }
}

/// Everything learned from the end of the buffer
#[derive(Debug, Clone)]
pub struct EocdInfo {
    /// Offset of the authoritative (last) EOCD record
    pub offset: u64,
    pub record: EndOfCentralDirectory,
    /// Every offset in the search window carrying the EOCD signature
    pub candidates: Vec<u64>,
    pub zip64: Option<Zip64EOCD>,
    pub comment: String,
    pub directory: Directory,
    /// EOCD, comment and ZIP64 ranges
    pub ranges: Vec<ByteRange>,
}

/// Outcome of the backward search
#[derive(Debug, Clone, Default)]
pub struct TailScan {
    /// `None` when no end of central directory record was found
    pub eocd: Option<EocdInfo>,
    pub anomalies: Vec<AnomalyRecord>,
}

/// Records whose signature sits so close to the end that their fixed
/// fields cannot fit.
const CUT_OFF_RECORDS: [(&[u8], usize, RangeKind); 5] = [
    (LocalFileHeader::SIGNATURE, LocalFileHeader::SIZE, RangeKind::LocalFileHeader),
    (
        CentralDirectoryHeader::SIGNATURE,
        CentralDirectoryHeader::SIZE,
        RangeKind::CentralDirectoryEntry,
    ),
    (
        Zip64EOCD::SIGNATURE,
        Zip64EOCD::MIN_SIZE,
        RangeKind::Zip64EndOfCentralDirectoryRecord,
    ),
    (
        Zip64EOCDLocator::SIGNATURE,
        Zip64EOCDLocator::SIZE,
        RangeKind::Zip64EndOfCentralDirectoryLocator,
    ),
    (
        EndOfCentralDirectory::SIGNATURE,
        EndOfCentralDirectory::SIZE,
        RangeKind::EndOfCentralDirectory,
    ),
];

/// Report records cut off by the end of the buffer, looking no earlier
/// than `from`.
fn cut_off_records(buffer: &[u8], from: u64) -> Vec<AnomalyRecord> {
    let len = buffer.len() as u64;
    let mut found = Vec::new();

    for (signature, size, kind) in CUT_OFF_RECORDS {
        let start = from.max(len.saturating_sub(size as u64 - 1));
        for offset in start..len {
            if has_signature_at(buffer, offset, signature) {
                found.push(AnomalyRecord::truncated(kind, offset, size as u64, len));
            }
        }
    }

    found.sort_by_key(|a| a.range.as_ref().map(|r| r.start));
    found
}

/// Offsets of every EOCD signature that could start a full record,
/// in ascending order.
fn find_candidates(buffer: &[u8]) -> Vec<u64> {
    let len = buffer.len() as u64;
    if len < EndOfCentralDirectory::SIZE as u64 {
        return Vec::new();
    }

    let last = len - EndOfCentralDirectory::SIZE as u64;
    let first = last.saturating_sub(MAX_COMMENT_SIZE);

    (first..=last)
        .filter(|&offset| has_signature_at(buffer, offset, EndOfCentralDirectory::SIGNATURE))
        .collect()
}

/// Locate the end of central directory record and everything it points at.
///
/// `eocd` is `None` when no signature exists in the search window; a
/// record cut off by the end of the buffer is still reported.
pub fn locate(buffer: &[u8]) -> TailScan {
    let mut anomalies = Vec::new();
    let eocd = locate_eocd(buffer, &mut anomalies);

    // Only bytes past the comment can hold a cut-off record; a comment is
    // free-form and may contain anything.
    let from = match &eocd {
        Some(info) => info.ranges.iter().map(|r| r.end).max().unwrap_or(info.offset),
        None => 0,
    };
    anomalies.extend(cut_off_records(buffer, from));

    if eocd.is_none() {
        debug!(anomalies = anomalies.len(), "no end of central directory record");
    }
    TailScan { eocd, anomalies }
}

fn locate_eocd(buffer: &[u8], anomalies: &mut Vec<AnomalyRecord>) -> Option<EocdInfo> {
    let len = buffer.len() as u64;
    let candidates = find_candidates(buffer);
    let offset = *candidates.last()?;

    // candidates always leave room for the fixed record
    let start = offset as usize;
    let record =
        EndOfCentralDirectory::from_bytes(&buffer[start..start + EndOfCentralDirectory::SIZE])
            .ok()?;
    trace!(offset, ?record, "end of central directory record");

    let mut ranges = Vec::new();

    let mut eocd_range = ByteRange::new(
        offset,
        offset + EndOfCentralDirectory::SIZE as u64,
        RangeKind::EndOfCentralDirectory,
    );
    if candidates.len() > 1 {
        eocd_range = eocd_range.flagged(AnomalyKind::MultipleEndOfCentralDirectoryCandidates);
        let listed: Vec<String> = candidates.iter().map(|c| c.to_string()).collect();
        anomalies.push(AnomalyRecord::new(
            AnomalyKind::MultipleEndOfCentralDirectoryCandidates,
            Some(eocd_range.clone()),
            format!(
                "{} end of central directory signatures at offsets [{}]; using the last one at {}",
                candidates.len(),
                listed.join(", "),
                offset
            ),
        ));
    }
    ranges.push(eocd_range);

    // Trailing comment
    let comment_start = offset + EndOfCentralDirectory::SIZE as u64;
    let available = len - comment_start;
    let declared = record.comment_len as u64;
    if declared > available {
        anomalies.push(AnomalyRecord::new(
            AnomalyKind::DeclaredSizeExceedsBuffer,
            ByteRange::with_len(comment_start, available, RangeKind::Comment),
            format!(
                "comment declares {} bytes, only {} remain",
                declared, available
            ),
        ));
    }
    let comment_len = declared.min(available);
    let comment_bytes = &buffer[comment_start as usize..(comment_start + comment_len) as usize];
    let comment = String::from_utf8_lossy(comment_bytes).to_string();
    if let Some(range) = ByteRange::with_len(comment_start, comment_len, RangeKind::Comment) {
        ranges.push(range);
    }

    let zip64 = read_zip64(buffer, offset, &mut ranges, anomalies);

    let (declared_offset, size, entries, located) = match &zip64 {
        Some((eocd64, eocd64_offset)) => (
            eocd64.cd_offset,
            eocd64.cd_size,
            eocd64.total_entries,
            *eocd64_offset,
        ),
        None => (
            record.cd_offset as u64,
            record.cd_size as u64,
            record.total_entries as u64,
            offset,
        ),
    };

    let directory = place_directory(buffer, declared_offset, size, entries, located);
    debug!(
        offset,
        candidates = candidates.len(),
        zip64 = zip64.is_some(),
        directory_offset = directory.offset,
        directory_size = directory.size,
        directory_entries = directory.entries,
        global_offset = directory.global_offset,
        "located end of central directory"
    );

    Some(EocdInfo {
        offset,
        record,
        candidates,
        zip64: zip64.map(|(eocd64, _)| eocd64),
        comment,
        directory,
        ranges,
    })
}

/// Look for a ZIP64 locator right before the EOCD and follow it.
///
/// A missing locator is normal. A locator pointing at something that is
/// not a ZIP64 record is reported and the 32-bit values are used instead.
fn read_zip64(
    buffer: &[u8],
    eocd_offset: u64,
    ranges: &mut Vec<ByteRange>,
    anomalies: &mut Vec<AnomalyRecord>,
) -> Option<(Zip64EOCD, u64)> {
    let len = buffer.len() as u64;
    let locator_offset = eocd_offset.checked_sub(Zip64EOCDLocator::SIZE as u64)?;
    if !has_signature_at(buffer, locator_offset, Zip64EOCDLocator::SIGNATURE) {
        return None;
    }

    let start = locator_offset as usize;
    let locator =
        Zip64EOCDLocator::from_bytes(&buffer[start..start + Zip64EOCDLocator::SIZE]).ok()?;
    trace!(locator_offset, ?locator, "zip64 end of central directory locator");
    ranges.push(ByteRange::new(
        locator_offset,
        eocd_offset,
        RangeKind::Zip64EndOfCentralDirectoryLocator,
    ));

    // The record normally sits right before the locator; prepended data
    // shifts it away from the declared offset.
    let adjacent = locator_offset.checked_sub(Zip64EOCD::MIN_SIZE as u64);
    let record_offset = if has_signature_at(buffer, locator.eocd64_offset, Zip64EOCD::SIGNATURE) {
        locator.eocd64_offset
    } else if let Some(adjacent) =
        adjacent.filter(|&a| has_signature_at(buffer, a, Zip64EOCD::SIGNATURE))
    {
        adjacent
    } else {
        let (kind, detail) = if locator.eocd64_offset >= len {
            (
                AnomalyKind::DeclaredSizeExceedsBuffer,
                format!(
                    "zip64 locator points at {}, buffer ends at {}",
                    locator.eocd64_offset, len
                ),
            )
        } else {
            (
                AnomalyKind::TruncatedHeader,
                format!(
                    "zip64 locator points at {}, which holds no zip64 end of central directory record",
                    locator.eocd64_offset
                ),
            )
        };
        anomalies.push(AnomalyRecord::new(kind, None, detail));
        return None;
    };

    let fixed_end = record_offset.saturating_add(Zip64EOCD::MIN_SIZE as u64);
    if fixed_end > len {
        anomalies.push(AnomalyRecord::new(
            AnomalyKind::TruncatedHeader,
            Some(ByteRange::new(
                record_offset,
                len,
                RangeKind::Zip64EndOfCentralDirectoryRecord,
            )),
            format!(
                "zip64 end of central directory record at {} is cut off by the end of the buffer",
                record_offset
            ),
        ));
        return None;
    }

    let start = record_offset as usize;
    let eocd64 = Zip64EOCD::from_bytes(&buffer[start..start + Zip64EOCD::MIN_SIZE]).ok()?;
    trace!(record_offset, ?eocd64, "zip64 end of central directory record");

    let mut record_end = record_offset.saturating_add(eocd64.record_len());
    if record_end > len {
        anomalies.push(AnomalyRecord::new(
            AnomalyKind::DeclaredSizeExceedsBuffer,
            Some(ByteRange::new(
                record_offset,
                len,
                RangeKind::Zip64EndOfCentralDirectoryRecord,
            )),
            format!(
                "zip64 end of central directory record at {} declares {} bytes, buffer ends at {}",
                record_offset,
                eocd64.record_len(),
                len
            ),
        ));
        record_end = len;
    }
    ranges.push(ByteRange::new(
        record_offset,
        record_end,
        RangeKind::Zip64EndOfCentralDirectoryRecord,
    ));

    Some((eocd64, record_offset))
}

/// Work out where the central directory starts.
///
/// The directory ends where the record following it begins. When the
/// declared offset holds no central directory header but the computed
/// one does, the archive was shifted (prepended data, concatenation) and
/// the difference becomes the global offset.
fn place_directory(
    buffer: &[u8],
    declared_offset: u64,
    size: u64,
    entries: u64,
    located: u64,
) -> Directory {
    let declared = Directory {
        offset: declared_offset,
        size,
        entries,
        global_offset: 0,
    };

    if size == 0 || has_signature_at(buffer, declared_offset, CentralDirectoryHeader::SIGNATURE) {
        return declared;
    }

    let Some(computed) = located.checked_sub(size) else {
        return declared;
    };
    if computed == declared_offset
        || !has_signature_at(buffer, computed, CentralDirectoryHeader::SIGNATURE)
    {
        return declared;
    }

    let Ok(global_offset) = i64::try_from(computed as i128 - declared_offset as i128) else {
        return declared;
    };
    trace!(computed, declared_offset, global_offset, "central directory shifted");

    Directory {
        offset: computed,
        size,
        entries,
        global_offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eocd(entries: u16, cd_size: u32, cd_offset: u32, comment: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(EndOfCentralDirectory::SIGNATURE);
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&entries.to_le_bytes());
        out.extend_from_slice(&entries.to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        out.extend_from_slice(comment);
        out
    }

    #[test]
    fn empty_archive() {
        let buf = eocd(0, 0, 0, b"");
        let scan = locate(&buf);
        assert!(scan.anomalies.is_empty());
        let info = scan.eocd.unwrap();
        assert_eq!(info.offset, 0);
        assert_eq!(info.comment, "");
        assert_eq!(info.ranges.len(), 1);
        assert_eq!(info.directory.end(), 0);
    }

    #[test]
    fn comment_range_follows_fixed_fields() {
        let buf = eocd(0, 0, 0, b"hello");
        let info = locate(&buf).eocd.unwrap();
        assert_eq!(info.comment, "hello");
        assert_eq!(info.ranges[1].contains, RangeKind::Comment);
        assert_eq!((info.ranges[1].start, info.ranges[1].end), (22, 27));
    }

    #[test]
    fn last_signature_wins() {
        // a comment that itself contains a signature
        let inner = eocd(0, 0, 0, b"tail");
        let buf = eocd(0, 0, 0, &inner);
        let scan = locate(&buf);
        let info = scan.eocd.unwrap();
        assert_eq!(info.candidates, vec![0, 22]);
        assert_eq!(info.offset, 22);
        assert_eq!(info.comment, "tail");
        assert_eq!(
            scan.anomalies[0].kind,
            AnomalyKind::MultipleEndOfCentralDirectoryCandidates
        );
    }

    #[test]
    fn comment_longer_than_buffer() {
        let mut buf = eocd(0, 0, 0, b"abc");
        buf[20..22].copy_from_slice(&100u16.to_le_bytes());
        let scan = locate(&buf);
        assert_eq!(scan.eocd.unwrap().comment, "abc");
        assert_eq!(
            scan.anomalies[0].kind,
            AnomalyKind::DeclaredSizeExceedsBuffer
        );
    }

    #[test]
    fn no_signature() {
        let scan = locate(b"definitely not a zip file at all");
        assert!(scan.eocd.is_none());
        assert!(scan.anomalies.is_empty());
    }

    #[test]
    fn cut_off_record_is_truncated() {
        let mut buf = eocd(0, 0, 0, b"");
        buf.truncate(15);
        let scan = locate(&buf);
        assert!(scan.eocd.is_none());
        assert_eq!(scan.anomalies.len(), 1);
        assert_eq!(scan.anomalies[0].kind, AnomalyKind::TruncatedHeader);
        let range = scan.anomalies[0].range.as_ref().unwrap();
        assert_eq!((range.start, range.end), (0, 15));
        assert_eq!(range.contains, RangeKind::EndOfCentralDirectory);
    }

    #[test]
    fn cut_off_header_after_archive() {
        let mut buf = eocd(0, 0, 0, b"");
        buf.extend_from_slice(b"PK\x03\x04\x14\x00");
        let scan = locate(&buf);
        assert!(scan.eocd.is_some());
        assert_eq!(scan.anomalies.len(), 1);
        let range = scan.anomalies[0].range.as_ref().unwrap();
        assert_eq!((range.start, range.end), (22, 28));
        assert_eq!(range.contains, RangeKind::LocalFileHeader);
    }

    #[test]
    fn comment_is_not_searched() {
        let buf = eocd(0, 0, 0, b"PK\x01\x02");
        let scan = locate(&buf);
        assert!(scan.anomalies.is_empty());
    }

    #[test]
    fn signature_beyond_window_is_ignored() {
        let mut buf = eocd(0, 0, 0, b"");
        buf.extend(std::iter::repeat_n(0u8, MAX_COMMENT_SIZE as usize + 1));
        assert!(locate(&buf).eocd.is_none());
    }

    #[test]
    fn shifted_directory_gets_global_offset() {
        let mut buf = b"prefix".to_vec();
        let cd_start = buf.len() as u32;
        buf.extend_from_slice(CentralDirectoryHeader::SIGNATURE);
        buf.extend_from_slice(&[0; 42]);
        buf.extend(eocd(1, 46, 0, b""));
        // declared offset 0 holds "prefix", not a central directory header
        let info = locate(&buf).eocd.unwrap();
        assert_eq!(info.directory.offset, cd_start as u64);
        assert_eq!(info.directory.global_offset, 6);
        assert_eq!(info.directory.adjust(0), Some(6));
    }
}
