use crate::error::{EvtxError, Result};

/// A bounds-checked cursor over an immutable byte slab.
///
/// `BinaryCursor` never panics on a short read; every primitive returns
/// `EvtxError::OutOfBounds` instead. Cloning is cheap (a slice reference plus
/// a `usize` position) and is the mechanism chunk interning uses to look up
/// strings/templates without disturbing the cursor driving the active BXML
/// parse (spec §4.3, §9 "side-effect-free interning").
#[derive(Clone, Copy, Debug)]
pub struct BinaryCursor<'a> {
    slab: &'a [u8],
    pos: usize,
}

impl<'a> BinaryCursor<'a> {
    pub fn new(slab: &'a [u8]) -> Self {
        BinaryCursor { slab, pos: 0 }
    }

    pub fn at(slab: &'a [u8], pos: usize) -> Self {
        BinaryCursor { slab, pos }
    }

    pub fn slab(&self) -> &'a [u8] {
        self.slab
    }

    pub fn tell(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn remaining(&self) -> usize {
        self.slab.len().saturating_sub(self.pos)
    }

    fn require(&self, offset: usize, n: usize) -> Result<()> {
        if offset.checked_add(n).is_none_or(|end| end > self.slab.len()) {
            return Err(EvtxError::OutOfBounds {
                offset: offset as u64,
                need: n,
                have: self.slab.len().saturating_sub(offset.min(self.slab.len())),
            });
        }
        Ok(())
    }

    /// Peek `n` bytes at `offset` without moving the cursor.
    pub fn peek(&self, offset: usize, n: usize) -> Result<&'a [u8]> {
        self.require(offset, n)?;
        Ok(&self.slab[offset..offset + n])
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        self.require(self.pos, n)?;
        let out = &self.slab[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    // -- random access --

    pub fn u8_at(&self, offset: usize) -> Result<u8> {
        Ok(self.peek(offset, 1)?[0])
    }

    pub fn u16le_at(&self, offset: usize) -> Result<u16> {
        let b = self.peek(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32le_at(&self, offset: usize) -> Result<u32> {
        let b = self.peek(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u32be_at(&self, offset: usize) -> Result<u32> {
        let b = self.peek(offset, 4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64le_at(&self, offset: usize) -> Result<u64> {
        let b = self.peek(offset, 8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    // -- sequential access --

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub fn u16le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn i16le(&mut self) -> Result<i16> {
        Ok(self.u16le()? as i16)
    }

    pub fn u32le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32le(&mut self) -> Result<i32> {
        Ok(self.u32le()? as i32)
    }

    pub fn u32be(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64le(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn i64le(&mut self) -> Result<i64> {
        Ok(self.u64le()? as i64)
    }

    pub fn f32le(&mut self) -> Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f64le(&mut self) -> Result<f64> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n)?;
        Ok(())
    }

    /// Read a `u16`-prefixed run of UTF-16LE code units (no trailing NUL consumed).
    pub fn read_wstring_prefixed(&mut self) -> Result<String> {
        let len = self.u16le()? as usize;
        let bytes = self.take(len * 2)?;
        Ok(decode_utf16le(bytes))
    }

    /// Decode exactly `n_bytes` as UTF-16LE, stripping any trailing NUL code units.
    pub fn read_utf16_exact(&mut self, n_bytes: usize) -> Result<String> {
        let bytes = self.take(n_bytes)?;
        let mut s = decode_utf16le(bytes);
        while s.ends_with('\u{0}') {
            s.pop();
        }
        Ok(s)
    }
}

/// Decode a UTF-16LE byte run into a `String`, substituting U+FFFD for unpaired surrogates.
pub fn decode_utf16le(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or('\u{FFFD}'))
        .collect()
}

/// IEEE CRC-32 over an arbitrary byte slice, returned as unsigned 32-bit.
pub fn crc32(slice: &[u8]) -> u32 {
    crc32fast::hash(slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_bounds_on_short_read() {
        let buf = [1u8, 2, 3];
        let mut c = BinaryCursor::new(&buf);
        assert!(c.u32le().is_err());
        assert_eq!(c.tell(), 0);
    }

    #[test]
    fn sequential_reads_advance_position() {
        let buf = [0x01, 0x00, 0x00, 0x00, 0x02, 0x00];
        let mut c = BinaryCursor::new(&buf);
        assert_eq!(c.u32le().unwrap(), 1);
        assert_eq!(c.u16le().unwrap(), 2);
    }

    #[test]
    fn wstring_prefixed_roundtrip() {
        let mut buf = vec![3, 0]; // length = 3 code units
        for ch in "abc".encode_utf16() {
            buf.extend_from_slice(&ch.to_le_bytes());
        }
        let mut c = BinaryCursor::new(&buf);
        assert_eq!(c.read_wstring_prefixed().unwrap(), "abc");
    }

    #[test]
    fn utf16_exact_strips_trailing_nul() {
        let mut buf = Vec::new();
        for ch in "hi".encode_utf16() {
            buf.extend_from_slice(&ch.to_le_bytes());
        }
        buf.extend_from_slice(&0u16.to_le_bytes());
        let mut c = BinaryCursor::new(&buf);
        assert_eq!(c.read_utf16_exact(6).unwrap(), "hi");
    }

    #[test]
    fn crc32_matches_known_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn clone_is_independent() {
        let buf = [1u8, 2, 3, 4];
        let mut c = BinaryCursor::new(&buf);
        let mut clone = c;
        clone.u32le().unwrap();
        assert_eq!(c.tell(), 0);
        assert_eq!(clone.tell(), 4);
    }
}
