use crate::error::{EvtxError, Result};
use crate::guid::Guid;
use crate::sid::Sid;
use crate::utils::cursor::decode_utf16le;
use crate::utils::time::{format_iso8601, timestamp_from_filetime, SystemTimeFields};
use crate::utils::BinaryCursor;
use std::fmt::Write;

/// The 24 variant type codes recognized by the decoder (spec §3/§4.5).
///
/// Codes match the real EVTX on-disk encoding; `WStringArray` reuses the
/// `WString` base code with the array flag bit (`0x80`) set, the same
/// convention the format uses for every array-typed substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantType {
    Null,
    WString,
    String,
    SByte,
    Byte,
    SWord,
    Word,
    SDWord,
    DWord,
    SQWord,
    QWord,
    Float,
    Double,
    Boolean,
    Binary,
    Guid,
    Size,
    FileTime,
    SystemTime,
    Sid,
    Hex32,
    Hex64,
    BXml,
    WStringArray,
}

const ARRAY_FLAG: u8 = 0x80;

impl VariantType {
    pub fn from_byte(byte: u8) -> Option<VariantType> {
        if byte == (0x01 | ARRAY_FLAG) {
            return Some(VariantType::WStringArray);
        }
        match byte {
            0x00 => Some(VariantType::Null),
            0x01 => Some(VariantType::WString),
            0x02 => Some(VariantType::String),
            0x03 => Some(VariantType::SByte),
            0x04 => Some(VariantType::Byte),
            0x05 => Some(VariantType::SWord),
            0x06 => Some(VariantType::Word),
            0x07 => Some(VariantType::SDWord),
            0x08 => Some(VariantType::DWord),
            0x09 => Some(VariantType::SQWord),
            0x0a => Some(VariantType::QWord),
            0x0b => Some(VariantType::Float),
            0x0c => Some(VariantType::Double),
            0x0d => Some(VariantType::Boolean),
            0x0e => Some(VariantType::Binary),
            0x0f => Some(VariantType::Guid),
            0x10 => Some(VariantType::Size),
            0x11 => Some(VariantType::FileTime),
            0x12 => Some(VariantType::SystemTime),
            0x13 => Some(VariantType::Sid),
            0x14 => Some(VariantType::Hex32),
            0x15 => Some(VariantType::Hex64),
            0x21 => Some(VariantType::BXml),
            _ => None,
        }
    }
}

/// An embedded BXML fragment, retained as a byte range into the owning
/// chunk rather than a copied blob (spec §4.5, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedBXml {
    pub base_offset: u32,
    pub length: u32,
}

/// A decoded substitution/value (spec §3 "Variant value").
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Null,
    WString(String),
    String(String),
    SByte(i8),
    Byte(u8),
    SWord(i16),
    Word(u16),
    SDWord(i32),
    DWord(u32),
    SQWord(i64),
    QWord(u64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    Binary(Vec<u8>),
    Guid(Guid),
    Size(u64),
    FileTime(jiff::Timestamp),
    SystemTime(jiff::Timestamp),
    Sid(Sid),
    Hex32(u32),
    Hex64(u64),
    BXml(EmbeddedBXml),
    WStringArray(Vec<String>),
}

impl Variant {
    pub fn variant_type(&self) -> VariantType {
        match self {
            Variant::Null => VariantType::Null,
            Variant::WString(_) => VariantType::WString,
            Variant::String(_) => VariantType::String,
            Variant::SByte(_) => VariantType::SByte,
            Variant::Byte(_) => VariantType::Byte,
            Variant::SWord(_) => VariantType::SWord,
            Variant::Word(_) => VariantType::Word,
            Variant::SDWord(_) => VariantType::SDWord,
            Variant::DWord(_) => VariantType::DWord,
            Variant::SQWord(_) => VariantType::SQWord,
            Variant::QWord(_) => VariantType::QWord,
            Variant::Float(_) => VariantType::Float,
            Variant::Double(_) => VariantType::Double,
            Variant::Boolean(_) => VariantType::Boolean,
            Variant::Binary(_) => VariantType::Binary,
            Variant::Guid(_) => VariantType::Guid,
            Variant::Size(_) => VariantType::Size,
            Variant::FileTime(_) => VariantType::FileTime,
            Variant::SystemTime(_) => VariantType::SystemTime,
            Variant::Sid(_) => VariantType::Sid,
            Variant::Hex32(_) => VariantType::Hex32,
            Variant::Hex64(_) => VariantType::Hex64,
            Variant::BXml(_) => VariantType::BXml,
            Variant::WStringArray(_) => VariantType::WStringArray,
        }
    }

    /// Render this value the way the template renderer would expand it into
    /// element/attribute content (spec §4.7). Embedded BXML is not rendered
    /// here; callers handle it separately because it requires chunk context.
    pub fn render_to(&self, out: &mut String) {
        match self {
            Variant::Null => {}
            Variant::WString(s) | Variant::String(s) => out.push_str(s),
            Variant::SByte(v) => {
                let _ = write!(out, "{v}");
            }
            Variant::Byte(v) => {
                let _ = write!(out, "{v}");
            }
            Variant::SWord(v) => {
                let _ = write!(out, "{v}");
            }
            Variant::Word(v) => {
                let _ = write!(out, "{v}");
            }
            Variant::SDWord(v) => {
                let _ = write!(out, "{v}");
            }
            Variant::DWord(v) => {
                let _ = write!(out, "{v}");
            }
            Variant::SQWord(v) => {
                let _ = write!(out, "{v}");
            }
            Variant::QWord(v) => {
                let _ = write!(out, "{v}");
            }
            Variant::Float(v) => {
                let _ = write!(out, "{v}");
            }
            Variant::Double(v) => {
                let _ = write!(out, "{v}");
            }
            Variant::Boolean(v) => {
                out.push_str(if *v { "true" } else { "false" });
            }
            Variant::Binary(bytes) => {
                for b in bytes {
                    let _ = write!(out, "{b:02X}");
                }
            }
            Variant::Guid(g) => {
                let _ = write!(out, "{g}");
            }
            Variant::Size(v) => {
                let _ = write!(out, "{v}");
            }
            Variant::FileTime(ts) | Variant::SystemTime(ts) => {
                out.push_str(&format_iso8601(*ts));
            }
            Variant::Sid(s) => {
                let _ = write!(out, "{s}");
            }
            Variant::Hex32(v) => {
                let _ = write!(out, "0x{v:x}");
            }
            Variant::Hex64(v) => {
                let _ = write!(out, "0x{v:x}");
            }
            Variant::BXml(_) => {}
            Variant::WStringArray(items) => {
                out.push_str(&items.join(", "));
            }
        }
    }

    pub fn render(&self) -> String {
        let mut s = String::new();
        self.render_to(&mut s);
        s
    }

    /// Render this value as a message-catalog argument string (spec §4.8/§4.9):
    /// arrays are expanded into the joined representation used for a single arg slot
    /// unless the caller has already expanded the array element-by-element.
    pub fn as_arg_string(&self) -> String {
        self.render()
    }
}

/// Decodes variant values. Two modes (spec §4.5):
/// - `top_level`: length-prefixed, used from a `Value` token.
/// - substitution mode: the caller supplies an authoritative declared size and
///   the decoder MUST consume exactly that many bytes, repositioning at
///   `start + declared_size` even if the payload logically needed fewer bytes.
pub struct VariantDecoder;

impl VariantDecoder {
    /// Decode a top-level, length-prefixed value (from a `Value` BXML token).
    pub fn decode_top_level(cursor: &mut BinaryCursor<'_>, ty: VariantType) -> Result<Variant> {
        match ty {
            VariantType::WString => Ok(Variant::WString(cursor.read_wstring_prefixed()?)),
            VariantType::String => {
                let len = cursor.u16le()? as usize;
                let bytes = cursor.bytes(len)?;
                Ok(Variant::String(String::from_utf8_lossy(bytes).into_owned()))
            }
            VariantType::Binary => {
                let len = cursor.u32le()? as usize;
                Ok(Variant::Binary(cursor.bytes(len)?.to_vec()))
            }
            VariantType::BXml => {
                let base_offset = cursor.tell() as u32;
                let len = cursor.u32le()? as usize;
                cursor.skip(len)?;
                Ok(Variant::BXml(EmbeddedBXml {
                    base_offset,
                    length: len as u32,
                }))
            }
            _ => Self::decode_fixed_width(cursor, ty),
        }
    }

    /// Decode a substitution value whose size is authoritative: exactly
    /// `declared_size` bytes are consumed, and the cursor is repositioned to
    /// `start + declared_size` regardless of what the value parser itself needed.
    pub fn decode_substitution(
        cursor: &mut BinaryCursor<'_>,
        ty: VariantType,
        declared_size: u16,
    ) -> Result<Variant> {
        let start = cursor.tell();
        let declared = declared_size as usize;

        let value = match ty {
            VariantType::Null => {
                Variant::Null
            }
            VariantType::WString => {
                let mut s = cursor.read_utf16_exact(declared)?;
                while s.ends_with('\u{0}') {
                    s.pop();
                }
                Variant::WString(s)
            }
            VariantType::String => {
                let bytes = cursor.peek(cursor.tell(), declared.min(cursor.remaining()))?;
                Variant::String(String::from_utf8_lossy(bytes).into_owned())
            }
            VariantType::Binary => {
                let n = declared.min(cursor.remaining());
                Variant::Binary(cursor.peek(cursor.tell(), n)?.to_vec())
            }
            VariantType::BXml => {
                let base_offset = cursor.tell() as u32;
                Variant::BXml(EmbeddedBXml {
                    base_offset,
                    length: declared as u32,
                })
            }
            VariantType::WStringArray => {
                let n = declared.min(cursor.remaining());
                let bytes = cursor.peek(cursor.tell(), n)?;
                Variant::WStringArray(split_utf16_array(bytes))
            }
            _ => Self::decode_fixed_width(cursor, ty)?,
        };

        // Authoritative repositioning: always land exactly on start + declared,
        // independent of how many bytes the value parser itself consumed.
        cursor.seek(start + declared);
        Ok(value)
    }

    fn decode_fixed_width(cursor: &mut BinaryCursor<'_>, ty: VariantType) -> Result<Variant> {
        Ok(match ty {
            VariantType::Null => Variant::Null,
            VariantType::SByte => Variant::SByte(cursor.i8()?),
            VariantType::Byte => Variant::Byte(cursor.u8()?),
            VariantType::SWord => Variant::SWord(cursor.i16le()?),
            VariantType::Word => Variant::Word(cursor.u16le()?),
            VariantType::SDWord => Variant::SDWord(cursor.i32le()?),
            VariantType::DWord => Variant::DWord(cursor.u32le()?),
            VariantType::SQWord => Variant::SQWord(cursor.i64le()?),
            VariantType::QWord => Variant::QWord(cursor.u64le()?),
            VariantType::Float => Variant::Float(cursor.f32le()?),
            VariantType::Double => Variant::Double(cursor.f64le()?),
            VariantType::Boolean => Variant::Boolean(cursor.u32le()? != 0),
            VariantType::Guid => Variant::Guid(Guid::from_cursor(cursor)?),
            VariantType::Size => Variant::Size(cursor.u64le()?),
            VariantType::FileTime => Variant::FileTime(timestamp_from_filetime(cursor.u64le()?)),
            VariantType::SystemTime => {
                let fields = SystemTimeFields {
                    year: cursor.u16le()?,
                    month: cursor.u16le()?,
                    day_of_week: cursor.u16le()?,
                    day: cursor.u16le()?,
                    hour: cursor.u16le()?,
                    minute: cursor.u16le()?,
                    second: cursor.u16le()?,
                    milliseconds: cursor.u16le()?,
                };
                Variant::SystemTime(
                    fields
                        .to_timestamp()
                        .unwrap_or(jiff::Timestamp::UNIX_EPOCH),
                )
            }
            VariantType::Sid => Variant::Sid(Sid::from_cursor(cursor)?),
            VariantType::Hex32 => Variant::Hex32(cursor.u32le()?),
            VariantType::Hex64 => Variant::Hex64(cursor.u64le()?),
            VariantType::WString
            | VariantType::String
            | VariantType::Binary
            | VariantType::BXml
            | VariantType::WStringArray => {
                // Callers special-case these before falling back to fixed-width decoding.
                return Err(EvtxError::UnknownVariant {
                    value: 0xff,
                    offset: cursor.tell() as u64,
                });
            }
        })
    }
}

/// Split a declared-length UTF-16LE blob on NUL code units, trimming trailing
/// NULs first so no spurious empty tail is produced (spec §4.5).
fn split_utf16_array(bytes: &[u8]) -> Vec<String> {
    let mut units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    while units.last() == Some(&0) {
        units.pop();
    }
    units
        .split(|&u| u == 0)
        .map(|chunk| {
            let bytes: Vec<u8> = chunk.iter().flat_map(|u| u.to_le_bytes()).collect();
            decode_utf16le(&bytes)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex32_formats_lowercase_with_prefix() {
        assert_eq!(Variant::Hex32(0xDEAD_BEEF).render(), "0xdeadbeef");
    }

    #[test]
    fn hex64_formats_lowercase_with_prefix() {
        assert_eq!(Variant::Hex64(0xFF).render(), "0xff");
    }

    #[test]
    fn binary_renders_uppercase_hex() {
        assert_eq!(Variant::Binary(vec![0xDE, 0xAD]).render(), "DEAD");
    }

    #[test]
    fn wstring_array_drops_trailing_nul_tail() {
        let mut bytes = Vec::new();
        for s in ["a", "b"] {
            for u in s.encode_utf16() {
                bytes.extend_from_slice(&u.to_le_bytes());
            }
            bytes.extend_from_slice(&0u16.to_le_bytes());
        }
        // trailing NUL beyond the last separator must not create an empty 3rd entry
        let items = split_utf16_array(&bytes);
        assert_eq!(items, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn null_substitution_advances_by_declared_size() {
        let buf = [0u8; 8];
        let mut cursor = BinaryCursor::new(&buf);
        let v = VariantDecoder::decode_substitution(&mut cursor, VariantType::Null, 8).unwrap();
        assert_eq!(v, Variant::Null);
        assert_eq!(cursor.tell(), 8);
    }

    #[test]
    fn wstring_substitution_strips_trailing_nulls() {
        let mut bytes = Vec::new();
        for u in "hi".encode_utf16() {
            bytes.extend_from_slice(&u.to_le_bytes());
        }
        bytes.extend_from_slice(&0u16.to_le_bytes());
        let mut cursor = BinaryCursor::new(&bytes);
        let v =
            VariantDecoder::decode_substitution(&mut cursor, VariantType::WString, bytes.len() as u16)
                .unwrap();
        assert_eq!(v, Variant::WString("hi".to_string()));
        assert_eq!(cursor.tell(), bytes.len());
    }
}
