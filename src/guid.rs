use crate::error::Result;
use crate::utils::BinaryCursor;
use std::fmt::{self, Debug, Display, Write};

/// A 16-byte Windows GUID.
///
/// `data1/data2/data3` are little-endian; `data4` is read as raw bytes and
/// rendered big-endian-ordered hex per spec §4.5.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Guid {
    data1: u32,
    data2: u16,
    data3: u16,
    data4: [u8; 8],
}

impl Guid {
    /// The first 4 bytes of the GUID. Template headers encode their
    /// `template_id` by overlapping it with this field rather than storing
    /// a separate one (spec §3 "Template definition").
    pub fn data1(&self) -> u32 {
        self.data1
    }

    pub fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Guid {
        Guid {
            data1,
            data2,
            data3,
            data4,
        }
    }

    pub fn from_cursor(cursor: &mut BinaryCursor<'_>) -> Result<Guid> {
        let data1 = cursor.u32le()?;
        let data2 = cursor.u16le()?;
        let data3 = cursor.u16le()?;
        let data4 = {
            let bytes = cursor.bytes(8)?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            arr
        };
        Ok(Guid::new(data1, data2, data3, data4))
    }
}

impl Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7],
        )
    }
}

impl Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Format directly into a caller-provided buffer, avoiding an intermediate
/// `String` on the rendering hot path.
pub fn write_guid(guid: &Guid, out: &mut String) {
    let _ = write!(out, "{guid}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_uppercase_braced() {
        let guid = Guid::new(
            0x0123_4567,
            0x89AB,
            0xCDEF,
            [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF],
        );
        assert_eq!(
            guid.to_string(),
            "{01234567-89AB-CDEF-0123-456789ABCDEF}"
        );
    }

    #[test]
    fn from_cursor_reads_little_endian_groups() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x0123_4567u32.to_le_bytes());
        bytes.extend_from_slice(&0x89ABu16.to_le_bytes());
        bytes.extend_from_slice(&0xCDEFu16.to_le_bytes());
        bytes.extend_from_slice(&[0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF]);
        let mut cursor = BinaryCursor::new(&bytes);
        let guid = Guid::from_cursor(&mut cursor).unwrap();
        assert_eq!(guid.to_string(), "{01234567-89AB-CDEF-0123-456789ABCDEF}");
    }
}
