//! # ziplinter
//!
//! Structural analysis of ZIP archives for security and forensics tooling.
//!
//! A ZIP archive can be read two ways: front to back by following local
//! file headers, or back to front by finding the end of central directory
//! record and trusting the central directory it points at. Archives
//! crafted so that the two disagree (appended archives, hidden payloads,
//! conflicting end records, orphaned headers) are read differently by
//! different tools. This library builds both interpretations and maps
//! every byte of the input to what claims it, flagging every place they
//! disagree.
//!
//! ## Features
//!
//! - Byte-exact range map: local headers, file data, data descriptors,
//!   central directory entries, end of central directory records, comment
//! - ZIP64 end of central directory locator and record
//! - Anomalies for duplicate end records, unreferenced or orphaned headers,
//!   trailing bytes, truncation, out-of-bounds sizes and overlaps
//! - Never fails on malformed input: every irregularity is data
//! - Local files and HTTP URLs (via Range requests) from the command line
//!
//! ## Example
//!
//! ```no_run
//! use ziplinter::{AnomalyKind, parse_file};
//!
//! fn main() -> anyhow::Result<()> {
//!     let report = parse_file("archive.zip")?;
//!     for range in &report.parsed_ranges {
//!         println!("{:>10} {:>10}  {}", range.start, range.end, range.contains);
//!     }
//!     if report.has_anomaly(AnomalyKind::TrailingUnaccountedBytes) {
//!         eprintln!("archive carries trailing bytes");
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{HttpRangeReader, LocalFileReader, ReadAt};
pub use zip::{
    AnomalyKind, AnomalyRecord, ByteRange, CompressionMethod, EntrySummary, RangeKind, Report,
};

use std::path::Path;
use tracing::debug;

/// Analyze an archive held in memory.
///
/// Never fails for malformed input; inspect [`Report::anomalies`] to learn
/// whether the structure was consistent.
pub fn parse_bytes(buffer: &[u8]) -> Report {
    zip::analyze(buffer)
}

/// Read a file fully and analyze it.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file is missing or cannot be read.
pub fn parse_file(path: impl AsRef<Path>) -> Result<Report> {
    let path = path.as_ref();
    let buffer = std::fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), len = buffer.len(), "read archive");
    Ok(parse_bytes(&buffer))
}

/// Load a random-access source fully and analyze it.
///
/// Used for remote archives fetched through HTTP Range requests.
pub async fn parse_reader<R: ReadAt + ?Sized>(reader: &R) -> anyhow::Result<Report> {
    let buffer = io::read_all(reader).await?;
    Ok(parse_bytes(&buffer))
}
