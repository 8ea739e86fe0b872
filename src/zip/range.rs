//! Byte ranges and their classification.

use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use super::report::AnomalyKind;

/// What a byte range was parsed as
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RangeKind {
    LocalFileHeader,
    FileData,
    DataDescriptor,
    CentralDirectoryEntry,
    Zip64EndOfCentralDirectoryRecord,
    Zip64EndOfCentralDirectoryLocator,
    EndOfCentralDirectory,
    Comment,
    Unaccounted,
}

impl RangeKind {
    pub fn label(&self) -> &'static str {
        match self {
            RangeKind::LocalFileHeader => "local file header",
            RangeKind::FileData => "file data",
            RangeKind::DataDescriptor => "data descriptor",
            RangeKind::CentralDirectoryEntry => "central directory entry",
            RangeKind::Zip64EndOfCentralDirectoryRecord => "zip64 end of central directory record",
            RangeKind::Zip64EndOfCentralDirectoryLocator => {
                "zip64 end of central directory locator"
            }
            RangeKind::EndOfCentralDirectory => "end of central directory",
            RangeKind::Comment => "comment",
            RangeKind::Unaccounted => "unaccounted",
        }
    }
}

impl fmt::Display for RangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for RangeKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// A classified span `[start, end)` of the input buffer.
///
/// Ranges order by `start`, then `end`, then kind, so a sorted sequence
/// is stable no matter which interpretation produced each range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
    pub contains: RangeKind,
    /// Entry name for per-entry ranges
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub flags: BTreeSet<AnomalyKind>,
}

impl ByteRange {
    /// Callers guarantee `start < end`.
    pub fn new(start: u64, end: u64, contains: RangeKind) -> Self {
        debug_assert!(start < end, "empty range {start}..{end}");
        Self {
            start,
            end,
            contains,
            description: None,
            flags: BTreeSet::new(),
        }
    }

    /// Build from an offset and a length, or `None` when the length is zero.
    pub fn with_len(start: u64, len: u64, contains: RangeKind) -> Option<Self> {
        if len == 0 {
            return None;
        }
        Some(Self::new(start, start.saturating_add(len), contains))
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn flagged(mut self, flag: AnomalyKind) -> Self {
        self.flags.insert(flag);
        self
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Span and classification, ignoring description and flags.
    pub fn extent(&self) -> (u64, u64, RangeKind) {
        (self.start, self.end, self.contains)
    }
}

impl PartialOrd for ByteRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByteRange {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .cmp(&other.start)
            .then(self.end.cmp(&other.end))
            .then(self.contains.cmp(&other.contains))
            .then_with(|| self.description.cmp(&other.description))
            .then_with(|| self.flags.cmp(&other.flags))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}, {})", self.contains, self.start, self.end)
    }
}
