pub mod cursor;
pub mod escape;
pub mod time;

pub use cursor::{crc32, decode_utf16le, BinaryCursor};
