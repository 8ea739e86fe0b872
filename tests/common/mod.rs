//! Hand-rolled archive writer for tests.
//!
//! Writes exactly the records asked for, so tests know every offset.

#![allow(dead_code)]

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Compression;
use flate2::Crc;
use flate2::write::DeflateEncoder;
use std::io::Write;

const LFH_SIGNATURE: u32 = 0x04034b50;
const CDFH_SIGNATURE: u32 = 0x02014b50;
const EOCD_SIGNATURE: u32 = 0x06054b50;
const ZIP64_EOCD_SIGNATURE: u32 = 0x06064b50;
const ZIP64_LOCATOR_SIGNATURE: u32 = 0x07064b50;
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;

struct Written {
    name: String,
    method: u16,
    flags: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    header_offset: u32,
}

/// Where an entry records its sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Sized,
    Streamed,
    StreamedZip64,
}

/// Builds an archive entry by entry.
#[derive(Default)]
pub struct ArchiveBuilder {
    out: Vec<u8>,
    entries: Vec<Written>,
    comment: Vec<u8>,
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(data);
    crc.sum()
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw bytes before the first entry (e.g. a self-extractor stub).
    pub fn prefix(mut self, bytes: &[u8]) -> Self {
        self.out.extend_from_slice(bytes);
        self
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.entry(name, 0, data.to_vec(), crc32(data), data.len() as u32, Layout::Sized)
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        let compressed = encoder.finish().unwrap();
        self.entry(name, 8, compressed, crc32(data), data.len() as u32, Layout::Sized)
    }

    /// Stored entry whose sizes and CRC follow the data in a descriptor.
    pub fn streamed(self, name: &str, data: &[u8]) -> Self {
        self.entry(name, 0, data.to_vec(), crc32(data), data.len() as u32, Layout::Streamed)
    }

    /// Streamed entry written the way ZIP64-forcing streaming writers do:
    /// sentinel sizes, a ZIP64 extra field and a 24-byte descriptor.
    pub fn streamed_zip64(self, name: &str, data: &[u8]) -> Self {
        self.entry(
            name,
            0,
            data.to_vec(),
            crc32(data),
            data.len() as u32,
            Layout::StreamedZip64,
        )
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Offset the next local file header will be written at.
    pub fn position(&self) -> u64 {
        self.out.len() as u64
    }

    fn entry(
        mut self,
        name: &str,
        method: u16,
        payload: Vec<u8>,
        crc32: u32,
        uncompressed_size: u32,
        layout: Layout,
    ) -> Self {
        let streamed = layout != Layout::Sized;
        let flags = if streamed { 1 << 3 } else { 0 };
        let header_offset = self.out.len() as u32;
        let compressed_size = payload.len() as u32;
        let (header_crc, header_compressed, header_uncompressed) = match layout {
            Layout::Sized => (crc32, compressed_size, uncompressed_size),
            Layout::Streamed => (0, 0, 0),
            Layout::StreamedZip64 => (0, u32::MAX, u32::MAX),
        };
        let extra_len: u16 = if layout == Layout::StreamedZip64 { 20 } else { 0 };

        let out = &mut self.out;
        out.write_u32::<LittleEndian>(LFH_SIGNATURE).unwrap();
        out.write_u16::<LittleEndian>(20).unwrap();
        out.write_u16::<LittleEndian>(flags).unwrap();
        out.write_u16::<LittleEndian>(method).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0x21).unwrap();
        out.write_u32::<LittleEndian>(header_crc).unwrap();
        out.write_u32::<LittleEndian>(header_compressed).unwrap();
        out.write_u32::<LittleEndian>(header_uncompressed).unwrap();
        out.write_u16::<LittleEndian>(name.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(extra_len).unwrap();
        out.extend_from_slice(name.as_bytes());
        if layout == Layout::StreamedZip64 {
            out.write_u16::<LittleEndian>(0x0001).unwrap();
            out.write_u16::<LittleEndian>(16).unwrap();
            out.write_u64::<LittleEndian>(0).unwrap();
            out.write_u64::<LittleEndian>(0).unwrap();
        }
        out.extend_from_slice(&payload);

        match layout {
            Layout::Sized => {}
            Layout::Streamed => {
                out.write_u32::<LittleEndian>(DATA_DESCRIPTOR_SIGNATURE).unwrap();
                out.write_u32::<LittleEndian>(crc32).unwrap();
                out.write_u32::<LittleEndian>(compressed_size).unwrap();
                out.write_u32::<LittleEndian>(uncompressed_size).unwrap();
            }
            Layout::StreamedZip64 => {
                out.write_u32::<LittleEndian>(DATA_DESCRIPTOR_SIGNATURE).unwrap();
                out.write_u32::<LittleEndian>(crc32).unwrap();
                out.write_u64::<LittleEndian>(compressed_size as u64).unwrap();
                out.write_u64::<LittleEndian>(uncompressed_size as u64).unwrap();
            }
        }

        self.entries.push(Written {
            name: name.to_string(),
            method,
            flags,
            crc32,
            compressed_size,
            uncompressed_size,
            header_offset,
        });
        self
    }

    fn write_central_directory(&mut self) -> (u64, u64) {
        let cd_offset = self.out.len() as u64;
        let out = &mut self.out;
        for entry in &self.entries {
            out.write_u32::<LittleEndian>(CDFH_SIGNATURE).unwrap();
            out.write_u16::<LittleEndian>(0x031e).unwrap();
            out.write_u16::<LittleEndian>(20).unwrap();
            out.write_u16::<LittleEndian>(entry.flags).unwrap();
            out.write_u16::<LittleEndian>(entry.method).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.write_u16::<LittleEndian>(0x21).unwrap();
            out.write_u32::<LittleEndian>(entry.crc32).unwrap();
            out.write_u32::<LittleEndian>(entry.compressed_size).unwrap();
            out.write_u32::<LittleEndian>(entry.uncompressed_size).unwrap();
            out.write_u16::<LittleEndian>(entry.name.len() as u16).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.write_u32::<LittleEndian>(0o100644 << 16).unwrap();
            out.write_u32::<LittleEndian>(entry.header_offset).unwrap();
            out.extend_from_slice(entry.name.as_bytes());
        }
        let cd_size = self.out.len() as u64 - cd_offset;
        (cd_offset, cd_size)
    }

    fn write_eocd(&mut self, entries: u16, cd_size: u32, cd_offset: u32) {
        let out = &mut self.out;
        out.write_u32::<LittleEndian>(EOCD_SIGNATURE).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(entries).unwrap();
        out.write_u16::<LittleEndian>(entries).unwrap();
        out.write_u32::<LittleEndian>(cd_size).unwrap();
        out.write_u32::<LittleEndian>(cd_offset).unwrap();
        out.write_u16::<LittleEndian>(self.comment.len() as u16).unwrap();
        out.extend_from_slice(&self.comment);
    }

    /// Central directory, then a plain end of central directory record.
    ///
    /// Offsets are relative to the first local header, as an archiver
    /// unaware of any prefix would write them.
    pub fn finish(mut self) -> Vec<u8> {
        let base = self.entries.first().map_or(0, |e| e.header_offset);
        for entry in &mut self.entries {
            entry.header_offset -= base;
        }
        let (cd_offset, cd_size) = self.write_central_directory();
        let count = self.entries.len() as u16;
        self.write_eocd(count, cd_size as u32, cd_offset as u32 - base);
        self.out
    }

    /// Central directory, ZIP64 record and locator, then an end of
    /// central directory record with sentinel values.
    pub fn finish_zip64(mut self) -> Vec<u8> {
        let (cd_offset, cd_size) = self.write_central_directory();
        let count = self.entries.len() as u64;

        let record_offset = self.out.len() as u64;
        let out = &mut self.out;
        out.write_u32::<LittleEndian>(ZIP64_EOCD_SIGNATURE).unwrap();
        out.write_u64::<LittleEndian>(44).unwrap();
        out.write_u16::<LittleEndian>(45).unwrap();
        out.write_u16::<LittleEndian>(45).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u64::<LittleEndian>(count).unwrap();
        out.write_u64::<LittleEndian>(count).unwrap();
        out.write_u64::<LittleEndian>(cd_size).unwrap();
        out.write_u64::<LittleEndian>(cd_offset).unwrap();

        out.write_u32::<LittleEndian>(ZIP64_LOCATOR_SIGNATURE).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u64::<LittleEndian>(record_offset).unwrap();
        out.write_u32::<LittleEndian>(1).unwrap();

        self.write_eocd(0xFFFF, 0xFFFFFFFF, 0xFFFFFFFF);
        self.out
    }
}

/// Two small archives that differ in size, as `cat a.zip b.zip` would join them.
pub fn two_archives() -> (Vec<u8>, Vec<u8>) {
    let a = ArchiveBuilder::new()
        .stored("first.txt", b"the first archive")
        .finish();
    let b = ArchiveBuilder::new()
        .deflated("second.txt", &b"the second archive, a bit longer ".repeat(8))
        .stored("third.txt", b"third")
        .finish();
    (a, b)
}

/// Check the range map is sorted, gap-free and covers the whole buffer.
pub fn assert_covers(report: &ziplinter::Report, len: usize) {
    let mut cursor = 0u64;
    for range in &report.parsed_ranges {
        assert_eq!(range.start, cursor, "gap or overlap at {}: {:?}", cursor, range);
        assert!(range.start < range.end, "empty range {:?}", range);
        cursor = range.end;
    }
    assert_eq!(cursor, len as u64, "map ends before the buffer does");
}
