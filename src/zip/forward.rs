//! Forward interpretation: local file headers walked from offset 0.
//!
//! This is how streaming readers see an archive. The scan never looks at
//! the central directory; it follows each header's declared sizes (or
//! searches for the data descriptor when sizes are deferred) until the
//! bytes at the cursor stop looking like a local file header.

use std::collections::HashMap;
use tracing::{debug, trace};

use super::range::{ByteRange, RangeKind};
use super::report::{AnomalyKind, AnomalyRecord};
use super::structures::*;

/// Result of walking local file headers from the start of the buffer
#[derive(Debug, Clone, Default)]
pub struct ForwardScan {
    /// Header, data and descriptor ranges in file order
    pub ranges: Vec<ByteRange>,
    /// Offset at which scanning halted
    pub stopped_at: u64,
    pub anomalies: Vec<AnomalyRecord>,
}

/// A local file header decoded at some offset
#[derive(Debug, Clone)]
pub(crate) struct LocalHeader {
    pub header: LocalFileHeader,
    pub name: String,
    /// Header + file name + extra field
    pub range: ByteRange,
    /// Sizes with the ZIP64 extra field applied
    pub values: Zip64Values,
}

impl LocalHeader {
    pub fn data_start(&self) -> u64 {
        self.range.end
    }
}

/// Outcome of trying to decode a local file header
#[derive(Debug)]
pub(crate) enum LocalHeaderRead {
    Parsed(LocalHeader),
    /// No local file header signature at the offset
    NotAHeader,
    Failed(AnomalyRecord),
}

/// Decode the local file header at `offset`, bounds-checking every field.
pub(crate) fn read_local_header(buffer: &[u8], offset: u64) -> LocalHeaderRead {
    let len = buffer.len() as u64;
    if !has_signature_at(buffer, offset, LocalFileHeader::SIGNATURE) {
        return LocalHeaderRead::NotAHeader;
    }

    // has_signature_at guarantees offset < len, so it fits in usize
    let start = offset as usize;
    let fixed_end = offset.saturating_add(LocalFileHeader::SIZE as u64);
    if fixed_end > len {
        return LocalHeaderRead::Failed(AnomalyRecord::truncated(
            RangeKind::LocalFileHeader,
            offset,
            LocalFileHeader::SIZE as u64,
            len,
        ));
    }

    let header = match LocalFileHeader::from_bytes(&buffer[start..start + LocalFileHeader::SIZE]) {
        Ok(header) => header,
        Err(e) => {
            return LocalHeaderRead::Failed(AnomalyRecord::new(
                AnomalyKind::TruncatedHeader,
                Some(ByteRange::new(offset, fixed_end, RangeKind::LocalFileHeader)),
                format!("local file header at {}: {}", offset, e),
            ));
        }
    };

    let end = offset.saturating_add(header.total_len());
    if end > len {
        return LocalHeaderRead::Failed(AnomalyRecord::new(
            AnomalyKind::TruncatedHeader,
            Some(ByteRange::new(offset, len, RangeKind::LocalFileHeader)),
            format!(
                "local file header at {} declares {} bytes of name and extra field, buffer ends at {}",
                offset,
                header.file_name_length as u64 + header.extra_field_length as u64,
                len
            ),
        ));
    }

    let name_start = start + LocalFileHeader::SIZE;
    let name_end = name_start + header.file_name_length as usize;
    let name = String::from_utf8_lossy(&buffer[name_start..name_end]).to_string();
    let extra = &buffer[name_end..end as usize];
    let values = apply_zip64_extra(extra, header.uncompressed_size, header.compressed_size, 0);

    trace!(offset, %name, flags = header.flags, "local file header");

    LocalHeaderRead::Parsed(LocalHeader {
        range: ByteRange::new(offset, end, RangeKind::LocalFileHeader).described(name.clone()),
        header,
        name,
        values,
    })
}

/// A data descriptor located after streamed file data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DescriptorHit {
    offset: u64,
    len: u64,
}

/// Every data descriptor signature in the buffer, built once per scan so
/// each streamed entry is resolved without rescanning the buffer.
#[derive(Debug, Default)]
struct DescriptorIndex {
    /// Signature offsets, ascending
    offsets: Vec<u64>,
    /// Data start implied by the 32-bit compressed size, to the first
    /// signature implying it
    by_start32: HashMap<u64, u64>,
    by_start64: HashMap<u64, u64>,
    /// For each signature, the first one at or after it that another
    /// record directly follows
    boundary: Vec<Option<DescriptorHit>>,
}

impl DescriptorIndex {
    fn build(buffer: &[u8]) -> Self {
        let mut index = Self::default();
        let implied = |at: usize, size: Option<u64>| {
            let offset = at as u64;
            size.filter(|&size| size <= offset).map(|size| offset - size)
        };

        for (at, window) in buffer.windows(4).enumerate() {
            if window != DATA_DESCRIPTOR_SIGNATURE {
                continue;
            }
            let offset = at as u64;
            index.offsets.push(offset);

            let size32 = read_u32_at(buffer, at + 8)
                .filter(|_| read_u32_at(buffer, at + 12).is_some())
                .map(u64::from);
            if let Some(start) = implied(at, size32) {
                index.by_start32.entry(start).or_insert(offset);
            }
            let size64 =
                read_u64_at(buffer, at + 8).filter(|_| read_u64_at(buffer, at + 16).is_some());
            if let Some(start) = implied(at, size64) {
                index.by_start64.entry(start).or_insert(offset);
            }
        }

        let mut next = None;
        index.boundary = vec![None; index.offsets.len()];
        for (i, &offset) in index.offsets.iter().enumerate().rev() {
            for zip64 in [false, true] {
                let len = data_descriptor_len(true, zip64);
                let after = offset.saturating_add(len);
                if has_signature_at(buffer, after, LocalFileHeader::SIGNATURE)
                    || has_signature_at(buffer, after, CentralDirectoryHeader::SIGNATURE)
                {
                    next = Some(DescriptorHit { offset, len });
                    break;
                }
            }
            index.boundary[i] = next;
        }

        trace!(signatures = index.offsets.len(), "data descriptor index");
        index
    }

    /// Descriptor ending the data that starts at `data_start`.
    ///
    /// A signature whose recorded compressed size matches the distance from
    /// `data_start` wins, in the layout the local header announces first.
    /// Otherwise the first signature directly followed by another record,
    /// then the first signature at all.
    fn find(&self, data_start: u64, zip64: bool) -> Option<DescriptorHit> {
        let (preferred, other) = if zip64 {
            (&self.by_start64, &self.by_start32)
        } else {
            (&self.by_start32, &self.by_start64)
        };
        if let Some(&offset) = preferred.get(&data_start) {
            return Some(DescriptorHit {
                offset,
                len: data_descriptor_len(true, zip64),
            });
        }
        if let Some(&offset) = other.get(&data_start) {
            return Some(DescriptorHit {
                offset,
                len: data_descriptor_len(true, !zip64),
            });
        }

        let first = self.offsets.partition_point(|&offset| offset < data_start);
        if let Some(&Some(hit)) = self.boundary.get(first) {
            return Some(hit);
        }
        self.offsets.get(first).map(|&offset| DescriptorHit {
            offset,
            len: data_descriptor_len(true, zip64),
        })
    }
}

/// Walk local file headers sequentially from offset 0.
///
/// Stops without error at the first offset that does not carry a local
/// file header signature; records an anomaly and stops when a record
/// cannot be fully read or declares more bytes than the buffer holds.
pub fn scan(buffer: &[u8]) -> ForwardScan {
    let len = buffer.len() as u64;
    let mut scan = ForwardScan::default();
    let mut cursor = 0u64;
    let mut descriptors: Option<DescriptorIndex> = None;

    loop {
        let local = match read_local_header(buffer, cursor) {
            LocalHeaderRead::Parsed(local) => local,
            LocalHeaderRead::NotAHeader => break,
            LocalHeaderRead::Failed(anomaly) => {
                scan.anomalies.push(anomaly);
                break;
            }
        };

        let data_start = local.data_start();
        scan.ranges.push(local.range.clone());

        if local.header.has_data_descriptor() {
            // Sizes are deferred: the descriptor marks the end of the data
            let index = descriptors.get_or_insert_with(|| DescriptorIndex::build(buffer));
            let Some(hit) = index.find(data_start, local.values.present) else {
                scan.anomalies.push(AnomalyRecord::new(
                    AnomalyKind::TruncatedHeader,
                    ByteRange::with_len(data_start, len - data_start, RangeKind::FileData),
                    format!(
                        "no data descriptor follows streamed entry \"{}\" at {}",
                        local.name, local.range.start
                    ),
                ));
                cursor = data_start;
                break;
            };

            if let Some(data) =
                ByteRange::with_len(data_start, hit.offset - data_start, RangeKind::FileData)
            {
                scan.ranges.push(data.described(local.name.clone()));
            }

            let descriptor_end = hit.offset.saturating_add(hit.len);
            if descriptor_end > len {
                scan.anomalies.push(AnomalyRecord::new(
                    AnomalyKind::TruncatedHeader,
                    Some(ByteRange::new(hit.offset, len, RangeKind::DataDescriptor)),
                    format!(
                        "data descriptor of \"{}\" at {} is cut off by the end of the buffer",
                        local.name, hit.offset
                    ),
                ));
                cursor = hit.offset;
                break;
            }

            scan.ranges.push(
                ByteRange::new(hit.offset, descriptor_end, RangeKind::DataDescriptor)
                    .described(local.name.clone()),
            );
            cursor = descriptor_end;
        } else {
            let data_end = data_start.saturating_add(local.values.compressed_size);
            if data_end > len {
                scan.anomalies.push(AnomalyRecord::new(
                    AnomalyKind::DeclaredSizeExceedsBuffer,
                    ByteRange::with_len(data_start, len - data_start, RangeKind::FileData),
                    format!(
                        "entry \"{}\" declares {} bytes of data at {}, buffer ends at {}",
                        local.name, local.values.compressed_size, data_start, len
                    ),
                ));
                cursor = data_start;
                break;
            }

            if let Some(data) =
                ByteRange::with_len(data_start, local.values.compressed_size, RangeKind::FileData)
            {
                scan.ranges.push(data.described(local.name.clone()));
            }
            cursor = data_end;
        }
    }

    scan.stopped_at = cursor;
    debug!(
        ranges = scan.ranges.len(),
        stopped_at = scan.stopped_at,
        anomalies = scan.anomalies.len(),
        "forward scan finished"
    );
    scan
}
