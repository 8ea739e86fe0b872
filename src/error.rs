use std::path::PathBuf;

/// Errors surfaced by the library's file entry point.
///
/// Structural problems in an archive are never errors; they are reported
/// as anomalies inside the [`Report`](crate::Report).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
