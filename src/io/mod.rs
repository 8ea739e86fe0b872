mod http;
mod local;

pub use http::HttpRangeReader;
pub use local::LocalFileReader;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tracing::trace;

/// Largest single read issued when loading a whole source
const CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

/// Load an entire source into memory, chunk by chunk.
///
/// The analyzer needs the whole archive: both ends and everything in
/// between are interpreted.
pub async fn read_all<R: ReadAt + ?Sized>(reader: &R) -> Result<Vec<u8>> {
    let size = reader.size();
    let Ok(capacity) = usize::try_from(size) else {
        bail!("Source of {} bytes does not fit in memory", size);
    };

    let mut data = vec![0u8; capacity];
    let mut offset = 0u64;
    while offset < size {
        let chunk = CHUNK_SIZE.min(size - offset) as usize;
        let start = offset as usize;
        let n = reader
            .read_at(offset, &mut data[start..start + chunk])
            .await?;
        if n == 0 {
            bail!("Unexpected end of data at offset {} of {}", offset, size);
        }
        trace!(offset, n, "read chunk");
        offset += n as u64;
    }

    Ok(data)
}
