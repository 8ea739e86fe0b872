//! Backward interpretation, part two: the central directory.
//!
//! The walker reads exactly as many entries as the tail records declare,
//! never past the declared directory end. Each entry's local file header
//! is then resolved so the backward interpretation covers file data the
//! same way a central-directory-driven reader would extract it.

use tracing::{debug, trace};

use super::forward::{LocalHeaderRead, read_local_header};
use super::range::{ByteRange, RangeKind};
use super::report::{AnomalyKind, AnomalyRecord, EntrySummary};
use super::structures::*;
use super::tail::Directory;

/// One parsed central directory file header
#[derive(Debug, Clone)]
pub struct CentralEntry {
    pub header: CentralDirectoryHeader,
    pub name: String,
    /// Sizes and local header offset with the ZIP64 extra field applied
    pub values: Zip64Values,
    /// Local header offset with the global offset applied
    pub header_offset: Option<u64>,
    pub range: ByteRange,
}

/// The backward interpretation's per-entry view of the archive
#[derive(Debug, Clone, Default)]
pub struct CentralDirectory {
    pub entries: Vec<CentralEntry>,
    /// Local header, file data and data descriptor ranges reached
    /// through the entries
    pub local_ranges: Vec<ByteRange>,
    /// Local header names, parallel to `entries`
    pub local_names: Vec<Option<String>>,
    pub anomalies: Vec<AnomalyRecord>,
}

impl CentralDirectory {
    pub fn summaries(&self) -> Vec<EntrySummary> {
        self.entries
            .iter()
            .zip(&self.local_names)
            .map(|(entry, local_name)| EntrySummary {
                name: entry.name.clone(),
                method: entry.header.compression_method,
                flags: entry.header.flags,
                crc32: entry.header.crc32,
                compressed_size: entry.values.compressed_size,
                uncompressed_size: entry.values.uncompressed_size,
                header_offset: entry
                    .header_offset
                    .unwrap_or(entry.values.lfh_offset),
                local_name: local_name.clone(),
            })
            .collect()
    }
}

/// Walk the central directory described by `directory`.
pub fn walk(buffer: &[u8], directory: &Directory) -> CentralDirectory {
    let len = buffer.len() as u64;
    let mut cd = CentralDirectory::default();

    if directory.entries == 0 {
        return cd;
    }

    if directory.offset >= len {
        cd.anomalies.push(AnomalyRecord::new(
            AnomalyKind::DeclaredSizeExceedsBuffer,
            None,
            format!(
                "central directory declared at {}, buffer ends at {}",
                directory.offset, len
            ),
        ));
        return cd;
    }

    let declared_end = directory.end();
    if declared_end > len {
        cd.anomalies.push(AnomalyRecord::new(
            AnomalyKind::DeclaredSizeExceedsBuffer,
            Some(ByteRange::new(
                directory.offset,
                len,
                RangeKind::CentralDirectoryEntry,
            )),
            format!(
                "central directory declares {} bytes at {}, buffer ends at {}",
                directory.size, directory.offset, len
            ),
        ));
    }
    let limit = declared_end.min(len);

    // Entries are at least CentralDirectoryHeader::SIZE bytes each, so the
    // byte budget bounds the allocation no matter what the count says.
    let fit = (limit - directory.offset) / CentralDirectoryHeader::SIZE as u64;
    cd.entries.reserve(directory.entries.min(fit) as usize);

    let mut cursor = directory.offset;
    for index in 0..directory.entries {
        if cursor + CentralDirectoryHeader::SIZE as u64 > limit {
            if cursor < limit {
                cd.anomalies.push(AnomalyRecord::new(
                    AnomalyKind::TruncatedHeader,
                    Some(ByteRange::new(cursor, limit, RangeKind::CentralDirectoryEntry)),
                    format!(
                        "central directory entry {} at {} does not fit before {}",
                        index, cursor, limit
                    ),
                ));
            }
            break;
        }

        let start = cursor as usize;
        let Ok(header) =
            CentralDirectoryHeader::from_bytes(&buffer[start..start + CentralDirectoryHeader::SIZE])
        else {
            // Not a central directory header: the count was wrong
            break;
        };

        let end = cursor.saturating_add(header.total_len());
        if end > limit {
            cd.anomalies.push(AnomalyRecord::new(
                AnomalyKind::TruncatedHeader,
                Some(ByteRange::new(cursor, limit, RangeKind::CentralDirectoryEntry)),
                format!(
                    "central directory entry {} at {} spans {} bytes, past the directory end at {}",
                    index,
                    cursor,
                    header.total_len(),
                    limit
                ),
            ));
            break;
        }

        let name_start = start + CentralDirectoryHeader::SIZE;
        let name_end = name_start + header.file_name_length as usize;
        let extra_end = name_end + header.extra_field_length as usize;
        let name = String::from_utf8_lossy(&buffer[name_start..name_end]).to_string();
        let values = apply_zip64_extra(
            &buffer[name_end..extra_end],
            header.uncompressed_size,
            header.compressed_size,
            header.lfh_offset,
        );
        let header_offset = directory.adjust(values.lfh_offset);

        trace!(index, cursor, %name, ?header_offset, "central directory entry");

        cd.entries.push(CentralEntry {
            range: ByteRange::new(cursor, end, RangeKind::CentralDirectoryEntry)
                .described(name.clone()),
            header,
            name,
            values,
            header_offset,
        });
        cursor = end;
    }

    if (cd.entries.len() as u64) < directory.entries {
        cd.anomalies.push(AnomalyRecord::new(
            AnomalyKind::OrphanCentralDirectoryEntry,
            None,
            format!(
                "central directory declares {} entries, {} could be read",
                directory.entries,
                cd.entries.len()
            ),
        ));
    }

    resolve_local_headers(buffer, &mut cd);

    debug!(
        entries = cd.entries.len(),
        local_ranges = cd.local_ranges.len(),
        anomalies = cd.anomalies.len(),
        "central directory walked"
    );
    cd
}

/// Follow central directory headers laid end to end from `from` and
/// report the one the end of the buffer cuts off.
///
/// Only meaningful when no end record survived to say where the
/// directory is.
pub fn cut_off_entry(buffer: &[u8], from: u64) -> Option<AnomalyRecord> {
    let len = buffer.len() as u64;
    let fixed = CentralDirectoryHeader::SIZE as u64;
    let mut cursor = from;

    while has_signature_at(buffer, cursor, CentralDirectoryHeader::SIGNATURE) {
        if cursor + fixed > len {
            return Some(AnomalyRecord::truncated(
                RangeKind::CentralDirectoryEntry,
                cursor,
                fixed,
                len,
            ));
        }
        let start = cursor as usize;
        let header =
            CentralDirectoryHeader::from_bytes(&buffer[start..start + CentralDirectoryHeader::SIZE])
                .ok()?;
        let end = cursor.saturating_add(header.total_len());
        if end > len {
            return Some(AnomalyRecord::truncated(
                RangeKind::CentralDirectoryEntry,
                cursor,
                header.total_len(),
                len,
            ));
        }
        cursor = end;
    }

    None
}

/// Follow every entry to its local file header and emit the ranges a
/// central-directory-driven reader would consume.
fn resolve_local_headers(buffer: &[u8], cd: &mut CentralDirectory) {
    let len = buffer.len() as u64;

    for entry in &cd.entries {
        let local = match entry.header_offset.map(|offset| read_local_header(buffer, offset)) {
            Some(LocalHeaderRead::Parsed(local)) => local,
            Some(LocalHeaderRead::Failed(anomaly)) => {
                cd.anomalies.push(anomaly);
                cd.local_names.push(None);
                continue;
            }
            // Reported as an orphan once all interpretations are merged
            Some(LocalHeaderRead::NotAHeader) | None => {
                cd.local_names.push(None);
                continue;
            }
        };

        if let Some(detail) = describe_mismatch(entry, &local.header, &local.name, &local.values) {
            cd.anomalies.push(AnomalyRecord::new(
                AnomalyKind::LocalHeaderMismatch,
                Some(local.range.clone()),
                detail,
            ));
        }

        cd.local_names.push(Some(local.name.clone()));
        cd.local_ranges.push(local.range.clone());

        // The central directory's size is authoritative on this side
        let data_start = local.data_start();
        let data_end = data_start.saturating_add(entry.values.compressed_size);
        if data_end > len {
            cd.anomalies.push(AnomalyRecord::new(
                AnomalyKind::DeclaredSizeExceedsBuffer,
                ByteRange::with_len(data_start, len - data_start, RangeKind::FileData),
                format!(
                    "central directory entry \"{}\" declares {} bytes of data at {}, buffer ends at {}",
                    entry.name, entry.values.compressed_size, data_start, len
                ),
            ));
            continue;
        }
        if let Some(data) =
            ByteRange::with_len(data_start, entry.values.compressed_size, RangeKind::FileData)
        {
            cd.local_ranges.push(data.described(entry.name.clone()));
        }

        if !local.header.has_data_descriptor() {
            continue;
        }

        let has_signature = has_signature_at(buffer, data_end, DATA_DESCRIPTOR_SIGNATURE);
        // The local header announces the descriptor layout
        let zip64 = local.values.present;
        let descriptor_end = data_end.saturating_add(data_descriptor_len(has_signature, zip64));
        if descriptor_end > len {
            cd.anomalies.push(AnomalyRecord::new(
                AnomalyKind::TruncatedHeader,
                ByteRange::with_len(data_end, len - data_end, RangeKind::DataDescriptor),
                format!(
                    "data descriptor of \"{}\" at {} is cut off by the end of the buffer",
                    entry.name, data_end
                ),
            ));
            continue;
        }
        cd.local_ranges.push(
            ByteRange::new(data_end, descriptor_end, RangeKind::DataDescriptor)
                .described(entry.name.clone()),
        );
    }
}

/// Compare a central directory entry with the local header it points at.
fn describe_mismatch(
    entry: &CentralEntry,
    local: &LocalFileHeader,
    local_name: &str,
    local_values: &Zip64Values,
) -> Option<String> {
    let mut differences = Vec::new();

    if entry.name != local_name {
        differences.push(format!("name \"{}\" vs \"{}\"", entry.name, local_name));
    }
    if entry.header.compression_method != local.compression_method {
        differences.push(format!(
            "method {} vs {}",
            entry.header.compression_method.label(),
            local.compression_method.label()
        ));
    }
    // Streamed entries leave these to the data descriptor
    if !local.has_data_descriptor() && !local.has_zip64_sentinel() {
        if entry.header.crc32 != local.crc32 {
            differences.push(format!(
                "crc32 {:08x} vs {:08x}",
                entry.header.crc32, local.crc32
            ));
        }
        if entry.values.compressed_size != local_values.compressed_size {
            differences.push(format!(
                "compressed size {} vs {}",
                entry.values.compressed_size, local_values.compressed_size
            ));
        }
        if entry.values.uncompressed_size != local_values.uncompressed_size {
            differences.push(format!(
                "uncompressed size {} vs {}",
                entry.values.uncompressed_size, local_values.uncompressed_size
            ));
        }
    }

    if differences.is_empty() {
        None
    } else {
        Some(format!(
            "central directory and local header disagree: {}",
            differences.join(", ")
        ))
    }
}
