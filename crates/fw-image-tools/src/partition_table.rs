//! Binary partition table image.
//!
//! Layout, all little-endian:
//!
//! ```text
//! header  magic:u32 version:u32 crc32:u32 blksz:u32 number:u32     (20 bytes)
//! record  start:u64 size:u64 name:[u8;32] bootable:i32 has_image:i32 (56 bytes each)
//! ```
//!
//! `start` and `size` are in 512-byte blocks. The CRC-32 covers `blksz`,
//! `number` and every record, i.e. everything after the crc field.

use std::path::Path;

use crc32fast::Hasher;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fsutil;
use crate::layout::{Document, Strictness};

/// `"PART"` when read as little-endian bytes.
pub const MAGIC: u32 = 0x5452_4150;
pub const VERSION: u32 = 1;
pub const BLOCK_SIZE: u32 = 512;
pub const NAME_LEN: usize = 32;
pub const HEADER_SIZE: usize = 20;
pub const RECORD_SIZE: usize = 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub magic: u32,
    pub version: u32,
    pub crc32: u32,
    pub block_size: u32,
    pub count: u32,
}

impl ImageHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.crc32.to_le_bytes());
        buf[12..16].copy_from_slice(&self.block_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.count.to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let Some(buf) = data.first_chunk::<HEADER_SIZE>() else {
            return Err(Error::BadImage(format!(
                "image is {} bytes, header needs {HEADER_SIZE}",
                data.len()
            )));
        };
        Ok(Self {
            magic: le_u32(buf, 0),
            version: le_u32(buf, 4),
            crc32: le_u32(buf, 8),
            block_size: le_u32(buf, 12),
            count: le_u32(buf, 16),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRecord {
    pub start: u64,
    pub size: u64,
    pub name: [u8; NAME_LEN],
    pub bootable: i32,
    pub has_image: i32,
}

impl PartitionRecord {
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.start.to_le_bytes());
        buf[8..16].copy_from_slice(&self.size.to_le_bytes());
        buf[16..48].copy_from_slice(&self.name);
        buf[48..52].copy_from_slice(&self.bootable.to_le_bytes());
        buf[52..56].copy_from_slice(&self.has_image.to_le_bytes());
        buf
    }

    fn from_chunk(buf: &[u8; RECORD_SIZE]) -> Self {
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&buf[16..48]);
        Self {
            start: u64::from_le_bytes(array_at(buf, 0)),
            size: u64::from_le_bytes(array_at(buf, 8)),
            name,
            bootable: i32::from_le_bytes(array_at(buf, 48)),
            has_image: i32::from_le_bytes(array_at(buf, 52)),
        }
    }

    /// Name up to the first NUL, invalid UTF-8 replaced.
    pub fn name_str(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }
}

/// Truncates to at most `NAME_LEN - 1` bytes on a char boundary and NUL-pads.
pub fn encode_name(name: &str) -> [u8; NAME_LEN] {
    let mut end = name.len().min(NAME_LEN - 1);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = [0u8; NAME_LEN];
    out[..end].copy_from_slice(&name.as_bytes()[..end]);
    out
}

/// Blocks needed to hold `bytes`, rounded up.
pub fn blocks_for(bytes: u64) -> u64 {
    bytes.div_ceil(u64::from(BLOCK_SIZE))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    pub header: ImageHeader,
    pub records: Vec<PartitionRecord>,
}

impl PartitionTable {
    pub fn from_document(doc: &Document) -> Result<Self> {
        if doc.partitions.is_empty() {
            return Err(Error::MissingPartitions("partition list is empty".into()));
        }

        let mut records = Vec::with_capacity(doc.partitions.len());
        let mut cursor = 0u64;
        for spec in &doc.partitions {
            let bytes = spec.size_bytes(doc.unit).ok_or_else(|| Error::SizeParse {
                name: spec.name.clone(),
                value: format!("{} x {} bytes overflows u64", spec.size_units, doc.unit.multiplier()),
            })?;
            let size = blocks_for(bytes);
            let record = PartitionRecord {
                start: cursor,
                size,
                name: encode_name(&spec.name),
                bootable: 0,
                has_image: i32::from(spec.has_image()),
            };
            debug!(
                name = %spec.name,
                start = record.start,
                size = record.size,
                has_image = record.has_image,
                "partition record"
            );
            cursor = cursor.checked_add(size).ok_or_else(|| Error::SizeParse {
                name: spec.name.clone(),
                value: format!("end block {cursor} + {size} overflows u64"),
            })?;
            records.push(record);
        }

        let count = u32::try_from(records.len()).map_err(|_| {
            Error::InputFormat(format!("{} partitions do not fit a u32 count", records.len()))
        })?;
        let header = ImageHeader {
            magic: MAGIC,
            version: VERSION,
            crc32: checksum(BLOCK_SIZE, count, &records),
            block_size: BLOCK_SIZE,
            count,
        };
        Ok(Self { header, records })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + RECORD_SIZE * self.records.len());
        out.extend_from_slice(&self.header.to_bytes());
        for r in &self.records {
            out.extend_from_slice(&r.to_bytes());
        }
        out
    }

    /// Parses an image and verifies magic, version, length and CRC.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = ImageHeader::from_bytes(data)?;
        if header.magic != MAGIC {
            return Err(Error::BadImage(format!(
                "magic {:#010x}, expected {MAGIC:#010x}",
                header.magic
            )));
        }
        if header.version != VERSION {
            return Err(Error::BadImage(format!(
                "unsupported version {}",
                header.version
            )));
        }

        let body = &data[HEADER_SIZE..];
        let expected = (header.count as usize).checked_mul(RECORD_SIZE);
        if expected != Some(body.len()) {
            return Err(Error::BadImage(format!(
                "{} partitions need {} record bytes, found {}",
                header.count,
                u64::from(header.count) * RECORD_SIZE as u64,
                body.len()
            )));
        }

        let records: Vec<_> = body
            .chunks_exact(RECORD_SIZE)
            .filter_map(|c| c.first_chunk::<RECORD_SIZE>())
            .map(PartitionRecord::from_chunk)
            .collect();

        let actual = checksum(header.block_size, header.count, &records);
        if actual != header.crc32 {
            return Err(Error::BadImage(format!(
                "crc32 mismatch: header {:#010x}, computed {actual:#010x}",
                header.crc32
            )));
        }

        Ok(Self { header, records })
    }
}

/// Encodes a layout document into the binary image.
pub fn encode(doc: &Document) -> Result<Vec<u8>> {
    Ok(PartitionTable::from_document(doc)?.to_bytes())
}

/// Loads `json`, encodes it and writes the image to `out`.
///
/// Nothing is written unless the whole document encodes.
pub fn encode_file(json: &Path, out: &Path, mode: Strictness) -> Result<PartitionTable> {
    let doc = Document::load(json, mode)?;
    let table = PartitionTable::from_document(&doc)?;
    fsutil::write_atomic(out, &table.to_bytes())?;
    info!(
        out = %out.display(),
        partitions = table.records.len(),
        crc32 = %format!("{:#010x}", table.header.crc32),
        "wrote partition image"
    );
    Ok(table)
}

pub fn checksum(block_size: u32, count: u32, records: &[PartitionRecord]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&block_size.to_le_bytes());
    hasher.update(&count.to_le_bytes());
    for r in records {
        hasher.update(&r.to_bytes());
    }
    hasher.finalize()
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(array_at(buf, at))
}

fn array_at<const N: usize>(buf: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{PartitionSpec, Unit};

    fn doc(unit: Unit, parts: Vec<PartitionSpec>) -> Document {
        Document::new(unit, parts)
    }

    #[test]
    fn header_bytes_start_with_part_magic() {
        let bytes = encode(&doc(Unit::Byte, vec![PartitionSpec::new("a", 1)])).unwrap();
        assert_eq!(&bytes[0..4], b"PART");
        assert_eq!(le_u32(&bytes, 4), VERSION);
        assert_eq!(le_u32(&bytes, 12), BLOCK_SIZE);
        assert_eq!(le_u32(&bytes, 16), 1);
    }

    #[test]
    fn block_rounding() {
        assert_eq!(blocks_for(0), 0);
        assert_eq!(blocks_for(1), 1);
        assert_eq!(blocks_for(512), 1);
        assert_eq!(blocks_for(513), 2);
    }

    #[test]
    fn zero_sized_partition_keeps_cursor() {
        let table = PartitionTable::from_document(&doc(
            Unit::Byte,
            vec![
                PartitionSpec::new("a", 0),
                PartitionSpec::new("b", 513),
                PartitionSpec::new("c", 1),
            ],
        ))
        .unwrap();
        let spans: Vec<_> = table.records.iter().map(|r| (r.start, r.size)).collect();
        assert_eq!(spans, [(0, 0), (0, 2), (2, 1)]);
    }

    #[test]
    fn name_is_truncated_to_31_bytes() {
        let long = "abcdefghijklmnopqrstuvwxyz0123456789ABCD";
        assert_eq!(long.len(), 40);
        let name = encode_name(long);
        assert_eq!(&name[..31], &long.as_bytes()[..31]);
        assert_eq!(name[31], 0);
    }

    #[test]
    fn name_truncation_respects_char_boundaries() {
        // 30 ASCII bytes followed by a 3-byte char: only 30 bytes fit.
        let s = format!("{}\u{20ac}", "x".repeat(30));
        let name = encode_name(&s);
        assert_eq!(&name[..30], "x".repeat(30).as_bytes());
        assert_eq!(name[30], 0);
        assert_eq!(name[31], 0);
    }

    #[test]
    fn short_name_is_nul_padded() {
        let name = encode_name("boot");
        assert_eq!(&name[..4], b"boot");
        assert!(name[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn overflow_is_rejected() {
        let err = encode(&doc(Unit::GiB, vec![PartitionSpec::new("huge", u64::MAX)])).unwrap_err();
        assert!(matches!(err, Error::SizeParse { .. }), "{err}");
    }

    #[test]
    fn empty_document_is_rejected() {
        let err = encode(&doc(Unit::Byte, Vec::new())).unwrap_err();
        assert!(matches!(err, Error::MissingPartitions(_)), "{err}");
    }

    #[test]
    fn decoder_accepts_encoder_output() {
        let d = doc(
            Unit::KiB,
            vec![
                PartitionSpec::new("uboot", 1024),
                PartitionSpec::new("rootfs", 65536).with_flag("no-image"),
            ],
        );
        let bytes = encode(&d).unwrap();
        let table = PartitionTable::from_bytes(&bytes).unwrap();
        assert_eq!(table, PartitionTable::from_document(&d).unwrap());
        assert_eq!(table.records[1].name_str(), "rootfs");
        assert_eq!(table.records[1].has_image, 0);
    }

    #[test]
    fn decoder_rejects_corruption() {
        let bytes = encode(&doc(Unit::Byte, vec![PartitionSpec::new("a", 4096)])).unwrap();

        let mut flipped = bytes.clone();
        flipped[HEADER_SIZE + 20] ^= 0x01;
        let err = PartitionTable::from_bytes(&flipped).unwrap_err().to_string();
        assert!(err.contains("crc32 mismatch"), "unexpected err: {err}");

        let err = PartitionTable::from_bytes(&bytes[..bytes.len() - 1])
            .unwrap_err()
            .to_string();
        assert!(err.contains("record bytes"), "unexpected err: {err}");

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        let err = PartitionTable::from_bytes(&bad_magic).unwrap_err().to_string();
        assert!(err.contains("magic"), "unexpected err: {err}");

        let err = PartitionTable::from_bytes(&bytes[..10]).unwrap_err().to_string();
        assert!(err.contains("header needs 20"), "unexpected err: {err}");
    }
}
