use crate::binxml::parser::ChunkContext;
use crate::error::{EvtxError, Result};
use crate::record::Record;
use crate::string_cache::StringCache;
use crate::template::TemplateDefinition;
use crate::utils::{crc32, BinaryCursor};
use hashbrown::HashMap;
use std::cell::RefCell;
use std::rc::Rc;

pub const CHUNK_HEADER_MAGIC: [u8; 8] = *b"ElfChnk\0";

/// Chunk-relative offset of the 64-bucket string table (spec §3/§4.2).
pub const STRING_TABLE_OFFSET: usize = 0x80;
pub const STRING_TABLE_BUCKETS: usize = 64;
/// Chunk-relative offset of the 32-bucket template table.
pub const TEMPLATE_TABLE_OFFSET: usize = 0x180;
pub const TEMPLATE_TABLE_BUCKETS: usize = 32;
/// Record data begins immediately after both interning tables.
pub const RECORD_DATA_OFFSET: usize = 0x200;

/// One parsed 64KiB chunk (spec §3/§4.2, C3). Owns the chunk's interned
/// string/template caches; callers drive record iteration through
/// `records()`.
pub struct ChunkHeader<'a> {
    slab: &'a [u8],
    pub file_first_record_number: u64,
    pub file_last_record_number: u64,
    pub log_first_record_number: u64,
    pub log_last_record_number: u64,
    pub last_record_offset: u32,
    pub next_record_offset: u32,
    pub event_records_checksum: u32,
    pub flags: u32,
    strings: StringCache,
    templates: RefCell<HashMap<u32, Rc<TemplateDefinition>>>,
}

impl<'a> ChunkHeader<'a> {
    /// Parse and validate a chunk header from a `CHUNK_SIZE`-byte slab,
    /// verifying both the header checksum and the record-data checksum
    /// (spec §4.2; a checksum failure skips the chunk, it does not abort
    /// the file per spec §7's recovery table).
    pub fn parse(slab: &'a [u8]) -> Result<ChunkHeader<'a>> {
        let mut cursor = BinaryCursor::new(slab);
        let magic_bytes = cursor.bytes(8)?;
        let mut magic = [0u8; 8];
        magic.copy_from_slice(magic_bytes);
        if magic != CHUNK_HEADER_MAGIC {
            return Err(EvtxError::InvalidChunkMagic { magic });
        }

        let file_first_record_number = cursor.u64le()?;
        let file_last_record_number = cursor.u64le()?;
        let log_first_record_number = cursor.u64le()?;
        let log_last_record_number = cursor.u64le()?;
        let header_size = cursor.u32le()?;
        let last_record_offset = cursor.u32le()?;
        let next_record_offset = cursor.u32le()?;
        let event_records_checksum = cursor.u32le()?;
        cursor.skip(64)?; // unused, reserved
        let flags = cursor.u32le()?;
        let header_checksum = cursor.u32le()?;

        if header_size != 0x80 {
            return Err(EvtxError::InvalidChunkHeaderChecksum {
                expected: header_checksum,
                computed: 0,
            });
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&slab[0..120]);
        hasher.update(&slab[128..RECORD_DATA_OFFSET]);
        let computed_header_checksum = hasher.finalize();
        if computed_header_checksum != header_checksum {
            return Err(EvtxError::InvalidChunkHeaderChecksum {
                expected: header_checksum,
                computed: computed_header_checksum,
            });
        }

        let data_end = (next_record_offset as usize).min(slab.len());
        if data_end > RECORD_DATA_OFFSET {
            let computed_data_checksum = crc32(&slab[RECORD_DATA_OFFSET..data_end]);
            if computed_data_checksum != event_records_checksum {
                return Err(EvtxError::InvalidChunkDataChecksum {
                    expected: event_records_checksum,
                    computed: computed_data_checksum,
                });
            }
        }

        let strings = StringCache::new();
        let bucket_heads = Self::read_bucket_table(
            slab,
            STRING_TABLE_OFFSET,
            STRING_TABLE_BUCKETS,
        )?;
        strings.load_buckets(slab, &bucket_heads, slab.len() as u32)?;

        Ok(ChunkHeader {
            slab,
            file_first_record_number,
            file_last_record_number,
            log_first_record_number,
            log_last_record_number,
            last_record_offset,
            next_record_offset,
            event_records_checksum,
            flags,
            strings,
            templates: RefCell::new(HashMap::new()),
        })
    }

    fn read_bucket_table(slab: &[u8], offset: usize, count: usize) -> Result<Vec<u32>> {
        let mut cursor = BinaryCursor::at(slab, offset);
        let mut heads = Vec::with_capacity(count);
        for _ in 0..count {
            heads.push(cursor.u32le()?);
        }
        Ok(heads)
    }

    /// The template bucket heads, read on demand by `get_template` misses.
    fn template_bucket_heads(&self) -> Result<Vec<u32>> {
        Self::read_bucket_table(self.slab, TEMPLATE_TABLE_OFFSET, TEMPLATE_TABLE_BUCKETS)
    }

    /// Iterate records in this chunk, from `RECORD_DATA_OFFSET` up to
    /// `next_record_offset` (the free-space boundary). Stops (without error)
    /// the first time record framing fails to validate, since everything
    /// after a corrupt record's boundary is unreliable (spec §7).
    pub fn records(&self) -> impl Iterator<Item = Result<Record>> + '_ {
        RecordIter {
            chunk: self,
            pos: RECORD_DATA_OFFSET,
            done: false,
        }
    }
}

impl<'a> ChunkContext for ChunkHeader<'a> {
    fn chunk_slab(&self) -> &[u8] {
        self.slab
    }

    fn resolve_name(&self, offset: u32) -> Result<Rc<str>> {
        self.strings.resolve(self.slab, offset)
    }

    fn insert_inline_name(&self, offset: u32, name: Rc<str>) {
        self.strings.insert_inline(offset, name);
    }

    fn get_template(&self, offset: u32) -> Result<Rc<TemplateDefinition>> {
        if let Some(t) = self.templates.borrow().get(&offset) {
            return Ok(Rc::clone(t));
        }
        // Fall back to a direct parse; bucket chains are only a shortcut for
        // discovery, not required for resolving a known offset.
        let def = Rc::new(TemplateDefinition::parse_at(self, offset)?);
        self.templates.borrow_mut().insert(offset, Rc::clone(&def));
        Ok(def)
    }

    fn add_resident_template(&self, offset: u32, def: TemplateDefinition) -> Rc<TemplateDefinition> {
        let rc = Rc::new(def);
        self.templates.borrow_mut().insert(offset, Rc::clone(&rc));
        rc
    }
}

struct RecordIter<'a, 'c> {
    chunk: &'c ChunkHeader<'a>,
    pos: usize,
    done: bool,
}

impl<'a, 'c> Iterator for RecordIter<'a, 'c> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.chunk.next_record_offset as usize {
            return None;
        }
        match Record::parse(self.chunk, self.pos) {
            Ok(record) => {
                self.pos += record.size as usize;
                Some(Ok(record))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_header::CHUNK_SIZE;

    fn build_empty_chunk() -> Vec<u8> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        buf[0..8].copy_from_slice(&CHUNK_HEADER_MAGIC);
        buf[40..44].copy_from_slice(&0x80u32.to_le_bytes()); // header_size
        buf[44..48].copy_from_slice(&(RECORD_DATA_OFFSET as u32).to_le_bytes()); // last_record_offset
        buf[48..52].copy_from_slice(&(RECORD_DATA_OFFSET as u32).to_le_bytes()); // next_record_offset
        let data_checksum = crc32(&[]);
        buf[52..56].copy_from_slice(&data_checksum.to_le_bytes());

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf[0..120]);
        hasher.update(&buf[128..RECORD_DATA_OFFSET]);
        let header_checksum = hasher.finalize();
        buf[124..128].copy_from_slice(&header_checksum.to_le_bytes());
        buf
    }

    #[test]
    fn parses_empty_chunk_with_no_records() {
        let buf = build_empty_chunk();
        let chunk = ChunkHeader::parse(&buf).unwrap();
        assert_eq!(chunk.records().count(), 0);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = build_empty_chunk();
        buf[0] = b'X';
        assert!(matches!(
            ChunkHeader::parse(&buf),
            Err(EvtxError::InvalidChunkMagic { .. })
        ));
    }

    #[test]
    fn rejects_bad_header_checksum() {
        let mut buf = build_empty_chunk();
        buf[124] ^= 0xFF;
        assert!(ChunkHeader::parse(&buf).is_err());
    }
}
