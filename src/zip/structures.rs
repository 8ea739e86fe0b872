use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Serialize, Serializer};
use std::io::Cursor;

use anyhow::{Result, bail};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Deflate64,
    Bzip2,
    Lzma,
    Zstd,
    Xz,
    Aes,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            9 => CompressionMethod::Deflate64,
            12 => CompressionMethod::Bzip2,
            14 => CompressionMethod::Lzma,
            93 => CompressionMethod::Zstd,
            95 => CompressionMethod::Xz,
            99 => CompressionMethod::Aes,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Deflate64 => 9,
            CompressionMethod::Bzip2 => 12,
            CompressionMethod::Lzma => 14,
            CompressionMethod::Zstd => 93,
            CompressionMethod::Xz => 95,
            CompressionMethod::Aes => 99,
            CompressionMethod::Unknown(v) => *v,
        }
    }

    pub fn label(&self) -> String {
        match self {
            CompressionMethod::Stored => "stored".to_string(),
            CompressionMethod::Deflate => "deflate".to_string(),
            CompressionMethod::Deflate64 => "deflate64".to_string(),
            CompressionMethod::Bzip2 => "bzip2".to_string(),
            CompressionMethod::Lzma => "lzma".to_string(),
            CompressionMethod::Zstd => "zstd".to_string(),
            CompressionMethod::Xz => "xz".to_string(),
            CompressionMethod::Aes => "aes".to_string(),
            CompressionMethod::Unknown(v) => format!("unknown({})", v),
        }
    }
}

impl Serialize for CompressionMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

/// General purpose flag bit 3: sizes and CRC follow the data in a data descriptor
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// Extra field header ID for ZIP64 extended information
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            bail!("Invalid End of Central Directory");
        }

        // Verify signature
        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid End of Central Directory");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            bail!("Invalid ZIP64 format");
        }

        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid ZIP64 format");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE {
            bail!("Invalid ZIP64 format");
        }

        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid ZIP64 format");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    /// Full record length: the size field counts everything after itself.
    pub fn record_len(&self) -> u64 {
        self.eocd64_size
            .saturating_add(12)
            .max(Self::MIN_SIZE as u64)
    }
}

/// Local File Header (LFH) fixed fields - 30 bytes
#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub const SIGNATURE: &'static [u8] = b"PK\x03\x04";
    pub const SIZE: usize = 30;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            bail!("Invalid Local File Header");
        }

        // Verify LFH signature (PK\x03\x04)
        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid Local File Header");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            version_needed: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            compression_method: CompressionMethod::from_u16(cursor.read_u16::<LittleEndian>()?),
            last_mod_time: cursor.read_u16::<LittleEndian>()?,
            last_mod_date: cursor.read_u16::<LittleEndian>()?,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            file_name_length: cursor.read_u16::<LittleEndian>()?,
            extra_field_length: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    pub fn has_zip64_sentinel(&self) -> bool {
        self.compressed_size == 0xFFFFFFFF || self.uncompressed_size == 0xFFFFFFFF
    }

    /// Length of the header including file name and extra field.
    pub fn total_len(&self) -> u64 {
        Self::SIZE as u64 + self.file_name_length as u64 + self.extra_field_length as u64
    }
}

/// Central Directory File Header (CDFH) fixed fields - 46 bytes
#[derive(Debug, Clone)]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
    pub file_comment_length: u16,
    pub disk_number_start: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub lfh_offset: u32,
}

impl CentralDirectoryHeader {
    pub const SIGNATURE: &'static [u8] = b"PK\x01\x02";
    pub const SIZE: usize = 46;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            bail!("Invalid Central Directory File Header");
        }

        // Read and verify the signature (PK\x01\x02)
        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid Central Directory File Header");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            compression_method: CompressionMethod::from_u16(cursor.read_u16::<LittleEndian>()?),
            last_mod_time: cursor.read_u16::<LittleEndian>()?,
            last_mod_date: cursor.read_u16::<LittleEndian>()?,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            file_name_length: cursor.read_u16::<LittleEndian>()?,
            extra_field_length: cursor.read_u16::<LittleEndian>()?,
            file_comment_length: cursor.read_u16::<LittleEndian>()?,
            disk_number_start: cursor.read_u16::<LittleEndian>()?,
            internal_attrs: cursor.read_u16::<LittleEndian>()?,
            external_attrs: cursor.read_u32::<LittleEndian>()?,
            lfh_offset: cursor.read_u32::<LittleEndian>()?,
        })
    }

    /// Length of the entry including file name, extra field and comment.
    pub fn total_len(&self) -> u64 {
        Self::SIZE as u64
            + self.file_name_length as u64
            + self.extra_field_length as u64
            + self.file_comment_length as u64
    }
}

/// Data descriptor signature (PK\x07\x08). Writers may omit it.
pub const DATA_DESCRIPTOR_SIGNATURE: &[u8] = b"PK\x07\x08";

/// Data descriptor length: optional signature, CRC-32, then 32-bit or 64-bit sizes.
pub fn data_descriptor_len(has_signature: bool, zip64: bool) -> u64 {
    let sizes = if zip64 { 16 } else { 8 };
    let signature = if has_signature { 4 } else { 0 };
    signature + 4 + sizes
}

/// Sizes and offset after applying a ZIP64 extended information extra field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64Values {
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub lfh_offset: u64,
    /// Whether a ZIP64 extra field was present at all
    pub present: bool,
}

/// Walk an extra field block and substitute the 64-bit values.
///
/// Fields are present only if the corresponding header field is 0xFFFFFFFF,
/// in the fixed order uncompressed size, compressed size, header offset.
/// Malformed or short blocks are tolerated: whatever fits is used.
pub fn apply_zip64_extra(
    extra: &[u8],
    uncompressed_size: u32,
    compressed_size: u32,
    lfh_offset: u32,
) -> Zip64Values {
    let mut values = Zip64Values {
        uncompressed_size: uncompressed_size as u64,
        compressed_size: compressed_size as u64,
        lfh_offset: lfh_offset as u64,
        present: false,
    };

    let mut cursor = Cursor::new(extra);
    let extra_end = extra.len() as u64;

    while cursor.position() + 4 <= extra_end {
        let (Ok(header_id), Ok(field_size)) = (
            cursor.read_u16::<LittleEndian>(),
            cursor.read_u16::<LittleEndian>(),
        ) else {
            break;
        };
        let field_end = (cursor.position() + field_size as u64).min(extra_end);

        if header_id == ZIP64_EXTRA_ID {
            values.present = true;
            if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                if let Ok(v) = cursor.read_u64::<LittleEndian>() {
                    values.uncompressed_size = v;
                }
            }
            if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                if let Ok(v) = cursor.read_u64::<LittleEndian>() {
                    values.compressed_size = v;
                }
            }
            if lfh_offset == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                if let Ok(v) = cursor.read_u64::<LittleEndian>() {
                    values.lfh_offset = v;
                }
            }
        }

        // Skip to the next field regardless of what was consumed
        cursor.set_position(field_end);
    }

    values
}

/// Read a little-endian u32 at `offset`, if it fits.
pub fn read_u32_at(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Cursor::new(bytes).read_u32::<LittleEndian>().ok()
}

/// Read a little-endian u64 at `offset`, if it fits.
pub fn read_u64_at(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset.checked_add(8)?)?;
    Cursor::new(bytes).read_u64::<LittleEndian>().ok()
}

/// Whether `data` carries `signature` at `offset`.
pub fn has_signature_at(data: &[u8], offset: u64, signature: &[u8]) -> bool {
    let Ok(start) = usize::try_from(offset) else {
        return false;
    };
    start
        .checked_add(signature.len())
        .and_then(|end| data.get(start..end))
        .is_some_and(|bytes| bytes == signature)
}
