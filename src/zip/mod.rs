//! ZIP structural analysis.
//!
//! This module maps every byte of a ZIP archive to the structure that
//! claims it, and reports where the archive's two sources of truth
//! disagree.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`range`]: Classified byte ranges
//! - [`forward`]: Local file headers walked from offset 0
//! - [`tail`]: End of central directory located from the end of the buffer
//! - [`central`]: Central directory entries and the local headers they point at
//! - [`reconcile`]: Merging both interpretations into a [`Report`]
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Streaming readers follow (1) from the front; most other readers start
//! from (3) and trust (2). A file crafted so the two disagree is read
//! differently by different tools, so both views are built independently
//! from the same read-only buffer and only compared at the end.

pub mod central;
pub mod forward;
pub mod range;
pub mod reconcile;
pub mod report;
pub mod structures;
pub mod tail;

pub use range::{ByteRange, RangeKind};
pub use report::{AnomalyKind, AnomalyRecord, EntrySummary, Report};
pub use structures::CompressionMethod;

use tracing::debug;

/// Analyze an in-memory archive.
///
/// Never fails: malformed structure is reported through the report's
/// anomalies and `unaccounted` ranges.
pub fn analyze(buffer: &[u8]) -> Report {
    debug!(len = buffer.len(), "analyzing buffer");

    let forward = forward::scan(buffer);
    let mut tail = tail::locate(buffer);
    if tail.eocd.is_none() {
        // A directory cut short is only visible by following it from
        // where the local headers end
        tail.anomalies
            .extend(central::cut_off_entry(buffer, forward.stopped_at));
    }
    let central = match &tail.eocd {
        Some(info) => central::walk(buffer, &info.directory),
        None => central::CentralDirectory::default(),
    };

    reconcile::reconcile(forward, tail, central, buffer.len() as u64)
}
