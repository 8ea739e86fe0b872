//! The structural report handed back to callers.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;

use super::range::{ByteRange, RangeKind};
use super::structures::CompressionMethod;

/// Kinds of structural irregularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnomalyKind {
    MultipleEndOfCentralDirectoryCandidates,
    UnreferencedLocalHeader,
    OrphanCentralDirectoryEntry,
    TrailingUnaccountedBytes,
    TruncatedHeader,
    DeclaredSizeExceedsBuffer,
    Overlap,
    LocalHeaderMismatch,
    /// Reached through the central directory but not by walking local
    /// headers from offset 0, while that walk did find headers
    UnreachableLocalHeader,
}

impl AnomalyKind {
    pub fn label(&self) -> &'static str {
        match self {
            AnomalyKind::MultipleEndOfCentralDirectoryCandidates => {
                "multiple end of central directory candidates"
            }
            AnomalyKind::UnreferencedLocalHeader => "unreferenced local header",
            AnomalyKind::OrphanCentralDirectoryEntry => "orphan central directory entry",
            AnomalyKind::TrailingUnaccountedBytes => "trailing unaccounted bytes",
            AnomalyKind::TruncatedHeader => "truncated header",
            AnomalyKind::DeclaredSizeExceedsBuffer => "declared size exceeds buffer",
            AnomalyKind::Overlap => "overlap",
            AnomalyKind::LocalHeaderMismatch => "local header mismatch",
            AnomalyKind::UnreachableLocalHeader => "unreachable local header",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for AnomalyKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// One detected irregularity, optionally pinned to a byte range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyRecord {
    pub kind: AnomalyKind,
    pub range: Option<ByteRange>,
    pub detail: String,
}

impl AnomalyRecord {
    pub fn new(kind: AnomalyKind, range: Option<ByteRange>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            range,
            detail: detail.into(),
        }
    }

    /// A record of `needed` fixed bytes starting at `offset` that the end
    /// of the buffer cuts off.
    pub fn truncated(contains: RangeKind, offset: u64, needed: u64, buffer_len: u64) -> Self {
        Self::new(
            AnomalyKind::TruncatedHeader,
            Some(ByteRange::new(offset, buffer_len, contains)),
            format!(
                "{} at {} needs {} bytes, only {} remain",
                contains,
                offset,
                needed,
                buffer_len.saturating_sub(offset)
            ),
        )
    }
}

impl Serialize for AnomalyRecord {
    // flattens the optional range into optional start/end fields
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let field_count = if self.range.is_some() { 4 } else { 2 };
        let mut record = serializer.serialize_struct("AnomalyRecord", field_count)?;
        record.serialize_field("kind", &self.kind)?;
        match &self.range {
            Some(range) => {
                record.serialize_field("start", &range.start)?;
                record.serialize_field("end", &range.end)?;
            }
            None => {
                record.skip_field("start")?;
                record.skip_field("end")?;
            }
        }
        record.serialize_field("detail", &self.detail)?;
        record.end()
    }
}

impl fmt::Display for AnomalyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.range {
            Some(range) => write!(
                f,
                "{} [{}, {}): {}",
                self.kind, range.start, range.end, self.detail
            ),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}

/// Declared metadata of one central directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
    pub name: String,
    pub method: CompressionMethod,
    pub flags: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// Offset of the local file header, with any global offset applied
    pub header_offset: u64,
    /// Name recorded in the local file header, when it could be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_name: Option<String>,
}

/// Structural map of an archive.
///
/// Equality only considers the comment and the parsed ranges: the same
/// bytes parsed the same way always give equal reports.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub comment: String,
    pub parsed_ranges: Vec<ByteRange>,
    pub anomalies: Vec<AnomalyRecord>,
    pub entries: Vec<EntrySummary>,
}

impl Report {
    /// No anomalies at all.
    pub fn is_consistent(&self) -> bool {
        self.anomalies.is_empty()
    }

    pub fn has_anomaly(&self, kind: AnomalyKind) -> bool {
        self.anomalies.iter().any(|a| a.kind == kind)
    }

    pub fn anomalies_of(&self, kind: AnomalyKind) -> impl Iterator<Item = &AnomalyRecord> {
        self.anomalies.iter().filter(move |a| a.kind == kind)
    }
}

impl PartialEq for Report {
    fn eq(&self, other: &Self) -> bool {
        self.comment == other.comment && self.parsed_ranges == other.parsed_ranges
    }
}

impl Eq for Report {}
