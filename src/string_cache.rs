use crate::error::Result;
use crate::utils::BinaryCursor;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// One entry of the chunk's interned-string linked lists (spec §3 `NameString`).
#[derive(Debug, Clone)]
pub struct NameString {
    pub next_offset: u32,
    pub hash: u16,
    pub name: Rc<str>,
}

/// Total on-disk length of a `NameString` node: `8 + 2*length + 2`
/// (next_offset u32, hash u16, length u16, UTF-16LE payload, NUL terminator).
pub fn name_string_node_length(name: &str) -> usize {
    8 + 2 * name.encode_utf16().count() + 2
}

/// Parse one `NameString` node at `offset` within `chunk_slab`.
pub fn parse_name_string(chunk_slab: &[u8], offset: u32) -> Result<NameString> {
    let mut cursor = BinaryCursor::at(chunk_slab, offset as usize);
    let next_offset = cursor.u32le()?;
    let hash = cursor.u16le()?;
    let length = cursor.u16le()? as usize;
    let name = cursor.read_utf16_exact(length * 2)?;
    // Trailing NUL terminator code unit.
    let _ = cursor.u16le();
    Ok(NameString {
        next_offset,
        hash,
        name: Rc::from(name),
    })
}

/// Per-chunk cache of interned names, keyed by chunk-relative offset. Loading
/// is lazy and idempotent: bucket chains are walked once and individual
/// offsets may also be resolved on demand as the BXML parser encounters
/// references to strings it hasn't seen yet (spec §4.3).
#[derive(Debug, Default)]
pub struct StringCache {
    by_offset: RefCell<HashMap<u32, Rc<str>>>,
}

impl StringCache {
    pub fn new() -> Self {
        StringCache {
            by_offset: RefCell::new(HashMap::new()),
        }
    }

    /// Walk the 64 bucket chains rooted at `bucket_heads`, stopping each
    /// chain on a cycle, a zero offset, or an offset past `limit`.
    pub fn load_buckets(&self, chunk_slab: &[u8], bucket_heads: &[u32], limit: u32) -> Result<()> {
        for &head in bucket_heads {
            let mut offset = head;
            let mut visited = hashbrown::HashSet::new();
            while offset != 0 && offset < limit {
                if !visited.insert(offset) {
                    break;
                }
                if self.by_offset.borrow().contains_key(&offset) {
                    break;
                }
                let entry = parse_name_string(chunk_slab, offset)?;
                let next = entry.next_offset;
                self.by_offset.borrow_mut().insert(offset, entry.name);
                offset = next;
            }
        }
        Ok(())
    }

    /// Resolve a chunk-relative string offset, parsing and caching it on
    /// demand if it was not already interned. Uses an independent cursor so
    /// it never disturbs a caller's in-progress BXML parse (spec §9).
    pub fn resolve(&self, chunk_slab: &[u8], offset: u32) -> Result<Rc<str>> {
        if let Some(s) = self.by_offset.borrow().get(&offset) {
            return Ok(Rc::clone(s));
        }
        let entry = parse_name_string(chunk_slab, offset)?;
        let name = entry.name;
        self.by_offset
            .borrow_mut()
            .insert(offset, Rc::clone(&name));
        Ok(name)
    }

    /// Insert a name that was read inline (e.g. an `OpenStartElement` whose
    /// `string_offset` pointed at itself) so later references resolve from
    /// cache instead of re-parsing.
    pub fn insert_inline(&self, offset: u32, name: Rc<str>) {
        self.by_offset.borrow_mut().insert(offset, name);
    }

    pub fn len(&self) -> usize {
        self.by_offset.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_chain(names: &[&str]) -> (Vec<u8>, Vec<u32>) {
        let mut buf = vec![0u8; 0x200];
        let mut offsets = Vec::new();
        for (i, name) in names.iter().enumerate() {
            let offset = buf.len() as u32;
            offsets.push(offset);
            let next = if i + 1 < names.len() {
                offset + name_string_node_length(name) as u32
            } else {
                0
            };
            buf.extend_from_slice(&next.to_le_bytes());
            buf.extend_from_slice(&0u16.to_le_bytes()); // hash
            let units: Vec<u16> = name.encode_utf16().collect();
            buf.extend_from_slice(&(units.len() as u16).to_le_bytes());
            for u in units {
                buf.extend_from_slice(&u.to_le_bytes());
            }
            buf.extend_from_slice(&0u16.to_le_bytes()); // terminator
        }
        (buf, offsets)
    }

    #[test]
    fn loads_bucket_chain() {
        let (buf, offsets) = build_chain(&["Provider", "EventID"]);
        let cache = StringCache::new();
        cache
            .load_buckets(&buf, &[offsets[0]], buf.len() as u32)
            .unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(&*cache.resolve(&buf, offsets[1]).unwrap(), "EventID");
    }

    #[test]
    fn resolve_is_idempotent_and_lazy() {
        let (buf, offsets) = build_chain(&["Data"]);
        let cache = StringCache::new();
        let first = cache.resolve(&buf, offsets[0]).unwrap();
        let second = cache.resolve(&buf, offsets[0]).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn cycle_guard_stops_chain() {
        let mut buf = vec![0u8; 0x20];
        // A node at offset 0x10 whose next_offset points back at itself.
        buf[0x10..0x14].copy_from_slice(&0x10u32.to_le_bytes());
        let cache = StringCache::new();
        assert!(cache.load_buckets(&buf, &[0x10], buf.len() as u32).is_ok());
        assert_eq!(cache.len(), 1);
    }
}
