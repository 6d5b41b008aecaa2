use crate::error::Result;
use crate::utils::BinaryCursor;
use std::fmt::{self, Debug, Display, Write};

/// A Windows security identifier, rendered as `S-{revision}-{authority}[-{sub}]*`
/// (spec §4.5). The 6-byte identifier authority is read big-endian; only its
/// low 4 bytes are used to build the authority component.
#[derive(Clone, PartialEq, Eq)]
pub struct Sid {
    revision: u8,
    authority: u32,
    sub_authorities: Vec<u32>,
}

impl Sid {
    pub fn from_cursor(cursor: &mut BinaryCursor<'_>) -> Result<Sid> {
        let revision = cursor.u8()?;
        let sub_authority_count = cursor.u8()?;
        let authority_bytes = cursor.bytes(6)?;
        let authority64 = authority_bytes
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | b as u64);
        let authority = (authority64 & 0xFFFF_FFFF) as u32;

        let mut sub_authorities = Vec::with_capacity(sub_authority_count as usize);
        for _ in 0..sub_authority_count {
            sub_authorities.push(cursor.u32le()?);
        }

        Ok(Sid {
            revision,
            authority,
            sub_authorities,
        })
    }
}

impl Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.authority)?;
        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

impl Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

pub fn write_sid(sid: &Sid, out: &mut String) {
    let _ = write!(out, "{sid}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_well_known_sid() {
        // S-1-5-18 (LocalSystem): revision 1, authority 5, one sub-authority 18.
        let mut bytes = vec![1u8, 1, 0, 0, 0, 0, 0, 5];
        bytes.extend_from_slice(&18u32.to_le_bytes());
        let mut cursor = BinaryCursor::new(&bytes);
        let sid = Sid::from_cursor(&mut cursor).unwrap();
        assert_eq!(sid.to_string(), "S-1-5-18");
    }

    #[test]
    fn formats_multiple_sub_authorities() {
        let mut bytes = vec![1u8, 2, 0, 0, 0, 0, 0, 5];
        bytes.extend_from_slice(&21u32.to_le_bytes());
        bytes.extend_from_slice(&1000u32.to_le_bytes());
        let mut cursor = BinaryCursor::new(&bytes);
        let sid = Sid::from_cursor(&mut cursor).unwrap();
        assert_eq!(sid.to_string(), "S-1-5-21-1000");
    }
}
