use crate::binxml::model::{
    inline_name_length, Attribute, Element, Node, SubstitutionDeclaration, TemplateInstanceRef,
};
use crate::binxml::token::{
    split_token_byte, TokenKind, FRAGMENT_HEADER_BYTE, OPEN_START_ELEMENT_EXTRA_FLAG,
};
use crate::binxml::value::{Variant, VariantDecoder, VariantType};
use crate::error::{EvtxError, Result, Warning};
use crate::template::TemplateDefinition;
use crate::utils::BinaryCursor;
use std::rc::Rc;

/// Everything the BXML parser needs from the owning chunk: the raw byte
/// range, and side-effect-free string/template interning (spec §4.3, §9).
/// Lookups MUST use a cloned cursor so they never disturb the cursor driving
/// the active parse.
pub trait ChunkContext {
    fn chunk_slab(&self) -> &[u8];
    fn resolve_name(&self, offset: u32) -> Result<Rc<str>>;
    fn insert_inline_name(&self, offset: u32, name: Rc<str>);
    fn get_template(&self, offset: u32) -> Result<Rc<TemplateDefinition>>;
    fn add_resident_template(&self, offset: u32, def: TemplateDefinition) -> Rc<TemplateDefinition>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeMode {
    TopLevel,
    Embedded,
}

#[derive(Debug, Clone)]
pub struct EnvelopeParse {
    pub children: Vec<Node>,
    pub declared_bytes: usize,
    pub template_instance: Option<TemplateInstanceRef>,
}

/// Sanity bound on substitution counts (spec §5): a higher count indicates a
/// misaligned substitution header, not a real event.
const MAX_SUBSTITUTIONS: u32 = 1024;

/// Parse a BXML envelope (`StartOfStream` + `FragmentHeader` + content tokens)
/// starting at the cursor's current position, stopping at `end_bound` or the
/// terminating `EndOfStream` (spec §4.6 "Root node"). In `Embedded` mode,
/// parsing stops immediately after a `TemplateInstance` child — the
/// substitution header follows directly and must not be misread as a token.
pub fn parse_envelope(
    cursor: &mut BinaryCursor<'_>,
    ctx: &dyn ChunkContext,
    end_bound: usize,
    mode: EnvelopeMode,
    warnings: &mut Vec<Warning>,
) -> Result<EnvelopeParse> {
    let mut children = Vec::new();
    let mut declared_bytes = 0usize;
    let mut template_instance = None;

    // StartOfStream: token nibble 0x0F, 4 bytes total.
    {
        let node_start = cursor.tell();
        let b = cursor.u8()?;
        let (_, nibble) = split_token_byte(b);
        if TokenKind::from_nibble(nibble) != Some(TokenKind::StartOfStream) {
            return Err(EvtxError::UnknownToken {
                value: b,
                offset: node_start as u64,
            });
        }
        cursor.skip(3)?; // major, minor, flags
        children.push(Node::StartOfStream);
        declared_bytes += Node::StartOfStream.declared_length();
    }

    // FragmentHeader: literal byte 0x10, 5 bytes total.
    {
        let node_start = cursor.tell();
        let b = cursor.u8()?;
        if b != FRAGMENT_HEADER_BYTE {
            return Err(EvtxError::UnknownToken {
                value: b,
                offset: node_start as u64,
            });
        }
        cursor.skip(4)?;
        children.push(Node::FragmentHeader);
        declared_bytes += Node::FragmentHeader.declared_length();
    }

    loop {
        if cursor.tell() >= end_bound {
            break;
        }

        let node_start = cursor.tell();
        let b = match cursor.u8() {
            Ok(b) => b,
            Err(_) => break,
        };

        if b == FRAGMENT_HEADER_BYTE {
            warnings.push(Warning::new(format!(
                "offset {node_start}: unexpected fragment-header byte mid-stream"
            )));
            break;
        }

        let (flags, nibble) = split_token_byte(b);
        let kind = match TokenKind::from_nibble(nibble) {
            Some(TokenKind::EndOfStream) => break,
            Some(kind) => kind,
            None => {
                warnings.push(Warning::new(format!(
                    "offset {node_start}: unknown BXML token {b:#04x}"
                )));
                break;
            }
        };

        let node = match parse_node_body(cursor, ctx, kind, flags, node_start, warnings) {
            Ok(node) => node,
            Err(e) => {
                warnings.push(Warning::new(format!(
                    "offset {node_start}: {e}; truncating sibling list"
                )));
                break;
            }
        };

        declared_bytes += node.declared_length();
        if let Node::TemplateInstance(t) = &node {
            template_instance = Some(*t);
        }
        let was_template_instance = matches!(node, Node::TemplateInstance(_));
        children.push(node);

        if mode == EnvelopeMode::Embedded && was_template_instance {
            break;
        }
    }

    Ok(EnvelopeParse {
        children,
        declared_bytes,
        template_instance,
    })
}

/// Dispatch a single sibling node body, given its already-consumed token
/// byte's `(kind, flags)`.
fn parse_node_body(
    cursor: &mut BinaryCursor<'_>,
    ctx: &dyn ChunkContext,
    kind: TokenKind,
    flags: u8,
    node_start: usize,
    warnings: &mut Vec<Warning>,
) -> Result<Node> {
    match kind {
        TokenKind::OpenStartElement => parse_open_start_element(cursor, ctx, flags, node_start, warnings)
            .map(Node::Element),
        TokenKind::Value => parse_value_node(cursor),
        TokenKind::CDataSection => parse_cdata_node(cursor),
        TokenKind::CharacterReference => parse_character_reference(cursor),
        TokenKind::EntityReference => parse_entity_reference(cursor, ctx, node_start),
        TokenKind::PIProcTarget => parse_pi_target(cursor, ctx, node_start),
        TokenKind::PIProcData => parse_pi_data(cursor),
        TokenKind::TemplateInstance => parse_template_instance(cursor, ctx, node_start),
        TokenKind::NormalSubstitution => parse_substitution(cursor, false),
        TokenKind::OptionalSubstitution => parse_substitution(cursor, true),
        other => Err(EvtxError::UnknownToken {
            value: other_token_marker(other),
            offset: node_start as u64,
        }),
    }
}

fn other_token_marker(kind: TokenKind) -> u8 {
    // Only reachable for tokens that cannot appear as a standalone sibling
    // (CloseStartElement/CloseEmptyElement/CloseElement/StartOfStream), which
    // are consumed by their owning element's content loop instead.
    match kind {
        TokenKind::CloseStartElement => 0x02,
        TokenKind::CloseEmptyElement => 0x03,
        TokenKind::CloseElement => 0x04,
        _ => 0xFF,
    }
}

/// Resolve an element/attribute name: inline if `string_offset` points
/// forward of `node_start` (into bytes not yet consumed), otherwise an
/// interned back-reference (spec §4.6).
fn resolve_element_name(
    cursor: &mut BinaryCursor<'_>,
    ctx: &dyn ChunkContext,
    string_offset: u32,
    node_start: usize,
) -> Result<(Rc<str>, usize)> {
    if string_offset as usize > node_start {
        let inline_start = cursor.tell();
        let inline_entry_offset = string_offset;
        let mut name_cursor = BinaryCursor::at(ctx.chunk_slab(), inline_start);
        let _next_offset = name_cursor.u32le()?;
        let _hash = name_cursor.u16le()?;
        let length = name_cursor.u16le()? as usize;
        let name = name_cursor.read_utf16_exact(length * 2)?;
        let _terminator = name_cursor.u16le()?;
        let consumed = name_cursor.tell() - inline_start;
        cursor.seek(name_cursor.tell());
        let name: Rc<str> = Rc::from(name);
        ctx.insert_inline_name(inline_entry_offset, Rc::clone(&name));
        Ok((name, consumed))
    } else {
        Ok((ctx.resolve_name(string_offset)?, 0))
    }
}

fn parse_open_start_element(
    cursor: &mut BinaryCursor<'_>,
    ctx: &dyn ChunkContext,
    flags: u8,
    node_start: usize,
    warnings: &mut Vec<Warning>,
) -> Result<Element> {
    let _unknown0 = cursor.u16le()?;
    let size = cursor.u32le()? as usize;
    let string_offset = cursor.u32le()?;

    let has_extra = flags & OPEN_START_ELEMENT_EXTRA_FLAG != 0;
    if has_extra {
        cursor.skip(4)?;
    }

    let (name, inline_len) = resolve_element_name(cursor, ctx, string_offset, node_start)?;

    let tag_length = 11 + if has_extra { 4 } else { 0 } + inline_len;
    let content_start = node_start + tag_length;
    cursor.seek(content_start);
    let content_end = content_start + size;

    let mut attributes = Vec::new();
    let mut children = Vec::new();

    loop {
        if cursor.tell() >= content_end {
            break;
        }
        let marker_start = cursor.tell();
        let b = cursor.u8()?;
        let (sub_flags, nibble) = split_token_byte(b);
        match TokenKind::from_nibble(nibble) {
            Some(TokenKind::CloseStartElement) => break,
            Some(TokenKind::CloseEmptyElement) => break,
            Some(TokenKind::Attribute) => {
                attributes.push(parse_attribute(cursor, ctx, marker_start)?);
            }
            _ => {
                cursor.seek(marker_start);
                match parse_node_body(cursor, ctx, TokenKind::from_nibble(nibble).unwrap_or(TokenKind::EndOfStream), sub_flags, marker_start, warnings) {
                    Ok(node) => children.push(node),
                    Err(e) => {
                        warnings.push(Warning::new(format!(
                            "offset {marker_start}: {e}; truncating element content"
                        )));
                        break;
                    }
                }
            }
        }
    }

    // Content continues after CloseStartElement/CloseEmptyElement until CloseElement/EndOfStream,
    // bounded by content_end.
    loop {
        if cursor.tell() >= content_end {
            break;
        }
        let marker_start = cursor.tell();
        let b = cursor.u8()?;
        let (sub_flags, nibble) = split_token_byte(b);
        match TokenKind::from_nibble(nibble) {
            Some(TokenKind::CloseElement) | Some(TokenKind::EndOfStream) => break,
            Some(kind) => match parse_node_body(cursor, ctx, kind, sub_flags, marker_start, warnings) {
                Ok(node) => children.push(node),
                Err(e) => {
                    warnings.push(Warning::new(format!(
                        "offset {marker_start}: {e}; truncating element content"
                    )));
                    break;
                }
            },
            None => {
                warnings.push(Warning::new(format!(
                    "offset {marker_start}: unknown BXML token {b:#04x} in element content"
                )));
                break;
            }
        }
    }

    cursor.seek(content_end);

    Ok(Element {
        name: name.to_string(),
        attributes,
        children,
        tag_length,
    })
}

fn parse_attribute(
    cursor: &mut BinaryCursor<'_>,
    ctx: &dyn ChunkContext,
    node_start: usize,
) -> Result<Attribute> {
    let string_offset = cursor.u32le()?;
    let (name, _inline_len) = resolve_element_name(cursor, ctx, string_offset, node_start)?;

    let value_start = cursor.tell();
    let value_byte = cursor.u8()?;
    let (value_flags, value_nibble) = split_token_byte(value_byte);
    let kind = TokenKind::from_nibble(value_nibble).ok_or(EvtxError::UnknownToken {
        value: value_byte,
        offset: value_start as u64,
    })?;
    let mut dummy_warnings = Vec::new();
    let value = parse_node_body(cursor, ctx, kind, value_flags, value_start, &mut dummy_warnings)?;

    Ok(Attribute {
        name: name.to_string(),
        value: Box::new(value),
    })
}

fn parse_value_node(cursor: &mut BinaryCursor<'_>) -> Result<Node> {
    let ty_byte = cursor.u8()?;
    let ty = VariantType::from_byte(ty_byte).ok_or(EvtxError::UnknownVariant {
        value: ty_byte,
        offset: cursor.tell() as u64,
    })?;
    let value = VariantDecoder::decode_top_level(cursor, ty)?;
    Ok(Node::Value(value))
}

fn parse_cdata_node(cursor: &mut BinaryCursor<'_>) -> Result<Node> {
    let text = cursor.read_wstring_prefixed()?;
    Ok(Node::CData(text))
}

fn parse_character_reference(cursor: &mut BinaryCursor<'_>) -> Result<Node> {
    let code = cursor.u16le()?;
    Ok(Node::CharacterReference(
        char::from_u32(code as u32).unwrap_or('\u{FFFD}'),
    ))
}

fn parse_entity_reference(
    cursor: &mut BinaryCursor<'_>,
    ctx: &dyn ChunkContext,
    node_start: usize,
) -> Result<Node> {
    let string_offset = cursor.u32le()?;
    let (name, _) = resolve_element_name(cursor, ctx, string_offset, node_start)?;
    Ok(Node::EntityReference(name.to_string()))
}

fn parse_pi_target(
    cursor: &mut BinaryCursor<'_>,
    ctx: &dyn ChunkContext,
    node_start: usize,
) -> Result<Node> {
    let string_offset = cursor.u32le()?;
    let (name, _) = resolve_element_name(cursor, ctx, string_offset, node_start)?;
    Ok(Node::PITarget(name.to_string()))
}

fn parse_pi_data(cursor: &mut BinaryCursor<'_>) -> Result<Node> {
    let text = cursor.read_wstring_prefixed()?;
    Ok(Node::PIData(text))
}

fn parse_substitution(cursor: &mut BinaryCursor<'_>, optional: bool) -> Result<Node> {
    let index = cursor.u16le()?;
    let _ty = cursor.u8()?;
    Ok(Node::Substitution { index, optional })
}

fn parse_template_instance(
    cursor: &mut BinaryCursor<'_>,
    ctx: &dyn ChunkContext,
    node_start: usize,
) -> Result<Node> {
    let _unknown = cursor.u8()?;
    let template_id = cursor.u32le()?;
    let template_offset = cursor.u32le()?;

    let resident = template_offset as usize > node_start;
    if resident {
        let def = TemplateDefinition::parse_at(ctx, template_offset)?;
        ctx.add_resident_template(template_offset, def);
        // In top-level records the main cursor advances past the resident bytes;
        // in embedded BXML those bytes are not physically present, so don't seek.
        if cursor.tell() <= template_offset as usize {
            let def = ctx.get_template(template_offset)?;
            cursor.seek(template_offset as usize + def.on_disk_length());
        }
    }

    let declared_length = 9;
    Ok(Node::TemplateInstance(TemplateInstanceRef {
        template_id,
        template_offset,
        resident,
        declared_length,
    }))
}

/// Parse the substitution declaration table and values, given the
/// authoritative header offset (spec §4.6 Phase 2 / §4.7 embedded variant).
pub fn parse_substitution_array(
    cursor: &mut BinaryCursor<'_>,
    header_offset: usize,
) -> Result<Vec<Variant>> {
    cursor.seek(header_offset);
    let count = cursor.u32le()?;
    if count > MAX_SUBSTITUTIONS {
        return Err(EvtxError::SubstitutionHeaderInvalid {
            offset: header_offset as u64,
            reason: "declared substitution count exceeds sanity bound",
        });
    }

    let mut declarations = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let size = cursor.u16le()?;
        let ty_byte = cursor.u8()?;
        let _reserved = cursor.u8()?;
        let value_type = VariantType::from_byte(ty_byte).unwrap_or(VariantType::Null);
        declarations.push(SubstitutionDeclaration { size, value_type });
    }

    let mut values = Vec::with_capacity(declarations.len());
    for decl in declarations {
        let value = VariantDecoder::decode_substitution(cursor, decl.value_type, decl.size)?;
        values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateDefinition;
    use std::cell::RefCell;

    struct TestCtx {
        slab: Vec<u8>,
        names: RefCell<hashbrown::HashMap<u32, Rc<str>>>,
        templates: RefCell<hashbrown::HashMap<u32, Rc<TemplateDefinition>>>,
    }

    impl ChunkContext for TestCtx {
        fn chunk_slab(&self) -> &[u8] {
            &self.slab
        }
        fn resolve_name(&self, offset: u32) -> Result<Rc<str>> {
            if let Some(n) = self.names.borrow().get(&offset) {
                return Ok(Rc::clone(n));
            }
            let entry = crate::string_cache::parse_name_string(&self.slab, offset)?;
            self.names.borrow_mut().insert(offset, Rc::clone(&entry.name));
            Ok(entry.name)
        }
        fn insert_inline_name(&self, offset: u32, name: Rc<str>) {
            self.names.borrow_mut().insert(offset, name);
        }
        fn get_template(&self, offset: u32) -> Result<Rc<TemplateDefinition>> {
            if let Some(t) = self.templates.borrow().get(&offset) {
                return Ok(Rc::clone(t));
            }
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

    fn push_start_of_stream(buf: &mut Vec<u8>) {
        buf.push(0x0F);
        buf.extend_from_slice(&[1, 1, 0]);
    }

    fn push_fragment_header(buf: &mut Vec<u8>) {
        buf.push(0x10);
        buf.extend_from_slice(&[1, 1, 0, 0]);
    }

    #[test]
    fn parses_minimal_envelope_with_no_content() {
        let mut buf = Vec::new();
        push_start_of_stream(&mut buf);
        push_fragment_header(&mut buf);
        buf.push(0x00); // EndOfStream

        let ctx = TestCtx {
            slab: buf.clone(),
            names: RefCell::new(hashbrown::HashMap::new()),
            templates: RefCell::new(hashbrown::HashMap::new()),
        };
        let mut cursor = BinaryCursor::new(&buf);
        let mut warnings = Vec::new();
        let parsed =
            parse_envelope(&mut cursor, &ctx, buf.len(), EnvelopeMode::TopLevel, &mut warnings)
                .unwrap();
        assert!(warnings.is_empty());
        assert_eq!(parsed.children.len(), 2); // StartOfStream + FragmentHeader only
    }

    #[test]
    fn unknown_token_emits_warning_and_stops() {
        let mut buf = Vec::new();
        push_start_of_stream(&mut buf);
        push_fragment_header(&mut buf);
        buf.push(0xFF); // not a valid token (nibble 0xF would be StartOfStream, flags 0xF)

        let ctx = TestCtx {
            slab: buf.clone(),
            names: RefCell::new(hashbrown::HashMap::new()),
            templates: RefCell::new(hashbrown::HashMap::new()),
        };
        let mut cursor = BinaryCursor::new(&buf);
        let mut warnings = Vec::new();
        let parsed =
            parse_envelope(&mut cursor, &ctx, buf.len(), EnvelopeMode::TopLevel, &mut warnings)
                .unwrap();
        // 0xFF nibble is 0x0F => StartOfStream again, which is not dispatched as a
        // sibling kind by parse_node_body, so it surfaces as an error -> warning.
        assert!(!warnings.is_empty());
        assert_eq!(parsed.children.len(), 2);
    }
}
