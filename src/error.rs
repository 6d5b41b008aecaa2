use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvtxError>;

/// Errors produced while parsing an EVTX file.
///
/// Most variants carry the byte offset at which the problem was observed, so that
/// callers debugging a malformed file don't have to re-derive it.
#[derive(Debug, Error)]
pub enum EvtxError {
    #[error("an I/O error occurred")]
    Io(#[from] std::io::Error),

    #[error("offset {offset}: out of bounds, needed {need} bytes but only {have} remained")]
    OutOfBounds {
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error(
        "invalid EVTX file header magic, expected `ElfFile\\0`, found `{magic:02x?}`"
    )]
    InvalidFileHeaderMagic { magic: [u8; 8] },

    #[error("invalid EVTX file header: {reason}")]
    InvalidFileHeader { reason: &'static str },

    #[error(
        "invalid EVTX chunk header magic, expected `ElfChnk\\0`, found `{magic:02x?}`"
    )]
    InvalidChunkMagic { magic: [u8; 8] },

    #[error("chunk header CRC32 mismatch: expected {expected:08x}, computed {computed:08x}")]
    InvalidChunkHeaderChecksum { expected: u32, computed: u32 },

    #[error("chunk data CRC32 mismatch: expected {expected:08x}, computed {computed:08x}")]
    InvalidChunkDataChecksum { expected: u32, computed: u32 },

    #[error(
        "invalid EVTX record header magic at offset {offset}, expected `0x00002a2a`, found `{magic:#010x}`"
    )]
    InvalidRecordMagic { offset: u64, magic: u32 },

    #[error("record at offset {offset} declares size {size:#x}, exceeding the 0x10000 limit")]
    RecordTooLarge { offset: u64, size: u32 },

    #[error("record at offset {offset}: leading size {leading} does not match trailing size {trailing}")]
    RecordSizeMismatch {
        offset: u64,
        leading: u32,
        trailing: u32,
    },

    #[error("offset {offset}: `{value:#04x}` is not a valid BXML token")]
    UnknownToken { value: u8, offset: u64 },

    #[error("offset {offset}: `{value:#04x}` is not a valid variant type")]
    UnknownVariant { value: u8, offset: u64 },

    #[error("offset {offset}: template at this offset was never interned and cannot be resolved")]
    TemplateMissing { offset: u32 },

    #[error("substitution header at offset {offset} failed sanity checks: {reason}")]
    SubstitutionHeaderInvalid { offset: u64, reason: &'static str },

    #[error("catalog lookup for provider `{provider}` failed")]
    CatalogError {
        provider: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("no message template resolved for provider `{provider}`, event id {event_id}")]
    MessageRequiredMissing { provider: String, event_id: u32 },

    #[error("failed to render XML")]
    XmlOutput(#[from] quick_xml::Error),

    #[error("file is {size} bytes, exceeding the configured maximum of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },
}

/// A non-fatal condition observed during parsing or resolution.
///
/// Warnings are attached to the structures they apply to (chunk iteration,
/// message resolution) rather than aborting the parse; see `spec §7`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning(pub String);

impl Warning {
    pub fn new(msg: impl Into<String>) -> Self {
        Warning(msg.into())
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
