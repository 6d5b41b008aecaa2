use crate::error::{EvtxError, Result};
use crate::utils::{crc32, BinaryCursor};
use bitflags::bitflags;

pub const FILE_HEADER_MAGIC: [u8; 8] = *b"ElfFile\0";
pub const FILE_HEADER_SIZE: usize = 4096;
pub const CHUNK_SIZE: usize = 0x10000;

bitflags! {
    /// File header status flags (spec §4.1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileFlags: u32 {
        /// The writer did not shut down cleanly; the last chunk may be incomplete.
        const IS_DIRTY = 0x1;
        /// The log reached its configured maximum size and began overwriting.
        const IS_FULL = 0x2;
    }
}

/// The 4096-byte EVTX file header (spec §3/§4.1, C2).
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub oldest_chunk: u64,
    pub current_chunk_number: u64,
    pub next_record_id: u64,
    pub header_block_size: u16,
    pub number_of_chunks: u16,
    pub major_version: u16,
    pub minor_version: u16,
    pub flags: FileFlags,
    pub checksum: u32,
}

impl FileHeader {
    /// Parse and validate the file header from the first `FILE_HEADER_SIZE`
    /// bytes of the file. The checksum covers bytes `0..120` (spec §4.1).
    pub fn parse(bytes: &[u8]) -> Result<FileHeader> {
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(EvtxError::InvalidFileHeader {
                reason: "file shorter than the fixed 4096-byte header",
            });
        }

        let mut cursor = BinaryCursor::new(bytes);
        let magic_bytes = cursor.bytes(8)?;
        let mut magic = [0u8; 8];
        magic.copy_from_slice(magic_bytes);
        if magic != FILE_HEADER_MAGIC {
            return Err(EvtxError::InvalidFileHeaderMagic { magic });
        }

        let oldest_chunk = cursor.u64le()?;
        let current_chunk_number = cursor.u64le()?;
        let next_record_id = cursor.u64le()?;
        let header_size = cursor.u32le()?;
        let minor_version = cursor.u16le()?;
        let major_version = cursor.u16le()?;
        let header_block_size = cursor.u16le()?;
        let number_of_chunks = cursor.u16le()?;
        cursor.skip(76)?; // unused
        let flags = FileFlags::from_bits_truncate(cursor.u32le()?);
        let checksum = cursor.u32le()?;

        if header_size != 0x80 {
            return Err(EvtxError::InvalidFileHeader {
                reason: "header_size field must be 0x80",
            });
        }
        if major_version != 3 {
            return Err(EvtxError::InvalidFileHeader {
                reason: "major_version must be 3",
            });
        }
        if minor_version != 1 && minor_version != 2 {
            return Err(EvtxError::InvalidFileHeader {
                reason: "minor_version must be 1 or 2",
            });
        }
        if header_block_size != 0x1000 {
            return Err(EvtxError::InvalidFileHeader {
                reason: "header_block_size field must be 0x1000",
            });
        }

        let computed = crc32(&bytes[0..120]);
        if computed != checksum {
            return Err(EvtxError::InvalidFileHeader {
                reason: "file header checksum mismatch",
            });
        }

        Ok(FileHeader {
            oldest_chunk,
            current_chunk_number,
            next_record_id,
            header_block_size,
            number_of_chunks,
            major_version,
            minor_version,
            flags,
            checksum,
        })
    }

    /// Whether this file was closed cleanly (spec §4.1: bit 0 of `flags`
    /// marks "dirty", meaning the writer may not have flushed the last chunk).
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(FileFlags::IS_DIRTY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_valid_header() -> Vec<u8> {
        let mut buf = vec![0u8; FILE_HEADER_SIZE];
        buf[0..8].copy_from_slice(&FILE_HEADER_MAGIC);
        buf[8..16].copy_from_slice(&1u64.to_le_bytes()); // oldest_chunk
        buf[16..24].copy_from_slice(&0u64.to_le_bytes()); // current_chunk_number
        buf[24..32].copy_from_slice(&5u64.to_le_bytes()); // next_record_id
        buf[32..36].copy_from_slice(&0x80u32.to_le_bytes()); // header_size
        buf[36..38].copy_from_slice(&1u16.to_le_bytes()); // minor
        buf[38..40].copy_from_slice(&3u16.to_le_bytes()); // major
        buf[40..42].copy_from_slice(&0x1000u16.to_le_bytes()); // header_block_size
        buf[42..44].copy_from_slice(&1u16.to_le_bytes()); // number_of_chunks
        let checksum = crc32(&buf[0..120]);
        buf[124..128].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    #[test]
    fn parses_valid_header() {
        let buf = build_valid_header();
        let header = FileHeader::parse(&buf).unwrap();
        assert_eq!(header.next_record_id, 5);
        assert_eq!(header.number_of_chunks, 1);
        assert!(!header.is_dirty());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = build_valid_header();
        buf[0] = b'X';
        assert!(matches!(
            FileHeader::parse(&buf),
            Err(EvtxError::InvalidFileHeaderMagic { .. })
        ));
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut buf = build_valid_header();
        buf[124] ^= 0xFF;
        assert!(FileHeader::parse(&buf).is_err());
    }
}
