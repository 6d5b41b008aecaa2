use crate::binxml::model::Element;
use crate::binxml::parser::{parse_envelope, ChunkContext, EnvelopeMode};
use crate::error::{EvtxError, Result, Warning};
use crate::guid::Guid;
use crate::utils::BinaryCursor;

/// On-disk template header: `next_offset(u32) guid(16) data_length(u32)`.
/// `template_id` is not a separate field: it overlaps the GUID's first 4
/// bytes (spec §3 "Template definition").
const TEMPLATE_HEADER_LENGTH: usize = 24;

/// A cached, fully-parsed template definition (spec §3 `TemplateDefinition`,
/// §4.9 C7). The BXML content between the header and `data_length` is parsed
/// once, on first encounter, and reused for every later `TemplateInstance`
/// that references the same chunk-relative offset.
#[derive(Debug, Clone)]
pub struct TemplateDefinition {
    pub template_id: u32,
    pub guid: Guid,
    pub data_length: u32,
    pub root: Element,
    warnings: Vec<Warning>,
}

impl TemplateDefinition {
    /// Parse the template header and its BXML body at `offset` within the
    /// owning chunk. `offset` points at the header's `next_offset` field.
    pub fn parse_at(ctx: &dyn ChunkContext, offset: u32) -> Result<TemplateDefinition> {
        let slab = ctx.chunk_slab();
        let mut cursor = BinaryCursor::at(slab, offset as usize);
        let _next_offset = cursor.u32le()?;
        let guid = Guid::from_cursor(&mut cursor)?;
        let template_id = guid.data1();
        let data_length = cursor.u32le()?;

        let data_start = offset as usize + TEMPLATE_HEADER_LENGTH;
        let data_end = data_start + data_length as usize;

        let mut body_cursor = BinaryCursor::at(slab, data_start);
        let mut warnings = Vec::new();
        let parsed = parse_envelope(
            &mut body_cursor,
            ctx,
            data_end,
            EnvelopeMode::TopLevel,
            &mut warnings,
        )?;

        let root = parsed
            .children
            .into_iter()
            .find_map(|node| match node {
                crate::binxml::model::Node::Element(e) => Some(e),
                _ => None,
            })
            .ok_or(EvtxError::TemplateMissing { offset })?;

        Ok(TemplateDefinition {
            template_id,
            guid,
            data_length,
            root,
            warnings,
        })
    }

    /// Total on-disk length of this template: header plus body.
    pub fn on_disk_length(&self) -> usize {
        TEMPLATE_HEADER_LENGTH + self.data_length as usize
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct TestCtx {
        slab: Vec<u8>,
    }

    impl ChunkContext for TestCtx {
        fn chunk_slab(&self) -> &[u8] {
            &self.slab
        }
        fn resolve_name(&self, offset: u32) -> Result<Rc<str>> {
            let entry = crate::string_cache::parse_name_string(&self.slab, offset)?;
            Ok(entry.name)
        }
        fn insert_inline_name(&self, _offset: u32, _name: Rc<str>) {}
        fn get_template(&self, offset: u32) -> Result<Rc<TemplateDefinition>> {
            Ok(Rc::new(TemplateDefinition::parse_at(self, offset)?))
        }
        fn add_resident_template(
            &self,
            _offset: u32,
            def: TemplateDefinition,
        ) -> Rc<TemplateDefinition> {
            Rc::new(def)
        }
    }

    fn build_minimal_template() -> Vec<u8> {
        let mut buf = vec![0u8; 0x40];
        // header at offset 0: next_offset(4) + guid(16, data1 doubles as
        // template_id) + data_length(4) = 24 bytes.
        buf[0..4].copy_from_slice(&0u32.to_le_bytes()); // next_offset
        buf[4..8].copy_from_slice(&7u32.to_le_bytes()); // guid.data1 == template_id
                                                         // remaining guid bytes 8..20 left zero
        let body_start = 24usize;
        let mut body = Vec::new();
        body.push(0x0F); // StartOfStream
        body.extend_from_slice(&[1, 1, 0]);
        body.push(0x10); // FragmentHeader
        body.extend_from_slice(&[1, 1, 0, 0]);
        // Minimal empty element: OpenStartElement, CloseEmptyElement
        let name_offset = (body_start + body.len() + 11) as u32;
        body.push(0x41); // OpenStartElement with extra-flag
        body.extend_from_slice(&[0, 0]); // unknown0
        let size_patch_index = body.len();
        body.extend_from_slice(&0u32.to_le_bytes()); // size, patched below
        body.extend_from_slice(&name_offset.to_le_bytes()); // string_offset == self (inline)
        body.extend_from_slice(&[0, 0, 0, 0]); // extra flag bytes
                                                // inline name "Root"
        let name = "Root";
        body.extend_from_slice(&0u32.to_le_bytes()); // next_offset
        body.extend_from_slice(&0u16.to_le_bytes()); // hash
        let units: Vec<u16> = name.encode_utf16().collect();
        body.extend_from_slice(&(units.len() as u16).to_le_bytes());
        for u in &units {
            body.extend_from_slice(&u.to_le_bytes());
        }
        body.extend_from_slice(&0u16.to_le_bytes()); // terminator
        let elem_tag_start = size_patch_index - 7; // token byte position of OpenStartElement
        body.push(0x03); // CloseEmptyElement
        let elem_size = (body.len() - elem_tag_start - 11) as u32;
        body[size_patch_index..size_patch_index + 4].copy_from_slice(&elem_size.to_le_bytes());
        body.push(0x00); // EndOfStream

        let data_length = body.len() as u32;
        buf[20..24].copy_from_slice(&data_length.to_le_bytes());
        buf.truncate(body_start);
        buf.extend_from_slice(&body);
        buf
    }

    #[test]
    fn parses_header_and_root_element() {
        let buf = build_minimal_template();
        let ctx = TestCtx { slab: buf };
        let def = TemplateDefinition::parse_at(&ctx, 0).unwrap();
        assert_eq!(def.template_id, 7);
        assert_eq!(def.root.name, "Root");
    }
}
