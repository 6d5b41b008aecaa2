use crate::binxml::model::{Node, TemplateInstanceRef};
use crate::binxml::parser::{parse_envelope, parse_substitution_array, ChunkContext, EnvelopeMode};
use crate::binxml::value::Variant;
use crate::error::{EvtxError, Result, Warning};
use crate::utils::time::timestamp_from_filetime;
use crate::utils::BinaryCursor;

pub const RECORD_MAGIC: u32 = 0x0000_2a2a;
/// Record header: magic(4) + size(4) + record_id(8) + timestamp(8).
const RECORD_HEADER_LENGTH: usize = 24;

/// One event record's framing (spec §3/§4.4, C4). `root()` drives the BXML
/// parse of the record body; `Record` itself only knows the byte range and
/// framing fields.
#[derive(Debug, Clone, Copy)]
pub struct Record {
    pub offset: usize,
    pub size: u32,
    pub record_id: u64,
    pub timestamp: jiff::Timestamp,
    data_start: usize,
    data_end: usize,
}

/// The decoded body of a record: its BXML children (spec §4.6 envelope) and
/// the substitution values following the Phase-2 header, if any.
#[derive(Debug, Clone)]
pub struct RecordBody {
    pub children: Vec<Node>,
    pub substitutions: Vec<Variant>,
    pub template_instance: Option<TemplateInstanceRef>,
}

impl Record {
    /// Parse and validate record framing at `offset` within the chunk slab.
    pub fn parse(chunk_ctx: &dyn ChunkContext, offset: usize) -> Result<Record> {
        let slab = chunk_ctx.chunk_slab();
        let mut cursor = BinaryCursor::at(slab, offset);
        let magic = cursor.u32le()?;
        if magic != RECORD_MAGIC {
            return Err(EvtxError::InvalidRecordMagic {
                offset: offset as u64,
                magic,
            });
        }
        let size = cursor.u32le()?;
        if size as usize > crate::file_header::CHUNK_SIZE || size < RECORD_HEADER_LENGTH as u32 + 4 {
            return Err(EvtxError::RecordTooLarge {
                offset: offset as u64,
                size,
            });
        }
        let record_id = cursor.u64le()?;
        let timestamp_ticks = cursor.u64le()?;

        let trailing_offset = offset + size as usize - 4;
        let trailing_size = cursor.u32le_at(trailing_offset)?;
        if trailing_size != size {
            return Err(EvtxError::RecordSizeMismatch {
                offset: offset as u64,
                leading: size,
                trailing: trailing_size,
            });
        }

        Ok(Record {
            offset,
            size,
            record_id,
            timestamp: timestamp_from_filetime(timestamp_ticks),
            data_start: offset + RECORD_HEADER_LENGTH,
            data_end: trailing_offset,
        })
    }

    /// Parse this record's BXML body: the envelope's children plus any
    /// substitution values (spec §4.6 Phase 1/Phase 2). The substitution
    /// header sits at `data_start + declared_bytes - 1` for top-level
    /// records (spec §9's `-1` correction — the header overlaps the final
    /// byte of the declared region rather than starting just past it).
    pub fn body(&self, ctx: &dyn ChunkContext, warnings: &mut Vec<Warning>) -> Result<RecordBody> {
        let mut cursor = BinaryCursor::at(ctx.chunk_slab(), self.data_start);
        let parsed = parse_envelope(
            &mut cursor,
            ctx,
            self.data_end,
            EnvelopeMode::TopLevel,
            warnings,
        )?;

        let substitutions = if parsed.template_instance.is_some() {
            let header_offset = self.data_start + parsed.declared_bytes - 1;
            let mut sub_cursor = BinaryCursor::at(ctx.chunk_slab(), header_offset);
            parse_substitution_array(&mut sub_cursor, header_offset)?
        } else {
            Vec::new()
        };

        Ok(RecordBody {
            template_instance: parsed.template_instance,
            children: parsed.children,
            substitutions,
        })
    }
}
