use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::ReadAt;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 10;
/// Back-off grows linearly with the attempt number
const RETRY_STEP: Duration = Duration::from_millis(500);

/// Remote archive read through HTTP Range requests
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
}

impl HttpRangeReader {
    /// Inspect `url` with a HEAD request.
    ///
    /// Fails unless the server advertises byte ranges and a content length.
    pub async fn new(url: String) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let size = head_size(&client, &url)
            .await
            .with_context(|| format!("HEAD request to {} failed", url))?;
        debug!(%url, size, "remote archive");

        Ok(Self {
            client,
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
        })
    }

    /// Bytes received from the network so far
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }
}

async fn head_size(client: &Client, url: &str) -> Result<u64> {
    let resp = client.head(url).send().await?;
    if !resp.status().is_success() {
        bail!("HEAD request failed with status: {}", resp.status());
    }

    let headers = resp.headers();
    let ranges = headers
        .get(header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none");
    if !ranges.contains("bytes") {
        bail!("Remote server does not support Range requests");
    }

    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow!("Remote server did not return Content-Length"))
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        // Inclusive end, as Range headers are
        let last = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let wanted = (last - offset + 1) as usize;
        let mut received = 0;
        let mut attempt = 0;

        while received < wanted {
            let range = format!("bytes={}-{}", offset + received as u64, last);
            let resp = match self
                .client
                .get(&self.url)
                .header(header::RANGE, &range)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    attempt += 1;
                    if attempt >= MAX_RETRIES {
                        bail!("Max retries exceeded fetching {}", range);
                    }
                    warn!(attempt, max = MAX_RETRIES, error = %e, "connection error, retrying");
                    tokio::time::sleep(RETRY_STEP * attempt).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if resp.status() != StatusCode::PARTIAL_CONTENT {
                bail!("Range request {} failed with status: {}", range, resp.status());
            }
            let bytes = resp.bytes().await?;
            if bytes.is_empty() {
                bail!("Empty response for range {}", range);
            }

            let n = bytes.len().min(wanted - received);
            buf[received..received + n].copy_from_slice(&bytes[..n]);
            received += n;
            self.transferred_bytes.fetch_add(n as u64, Ordering::Relaxed);
            trace!(%range, n, "range fetched");
        }

        Ok(received)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
