use crate::binxml::model::{Element, Node};
use crate::binxml::parser::{parse_substitution_array, ChunkContext, EnvelopeMode};
use crate::binxml::value::{EmbeddedBXml, Variant};
use crate::error::{EvtxError, Result, Warning};
use crate::utils::escape::escape_xml_text;
use crate::utils::BinaryCursor;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::rc::Rc;

/// Renders a parsed BXML document (its template root plus substitutions)
/// into the UTF-8 XML text EVTX tools display (spec §4.7 C8).
pub struct Renderer;

impl Renderer {
    /// Render `root` against `substitutions`, recursively expanding embedded
    /// BXML substitutions by parsing them against the full chunk byte range.
    pub fn render(
        root: &Element,
        substitutions: &[Variant],
        ctx: &dyn ChunkContext,
        warnings: &mut Vec<Warning>,
    ) -> Result<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        render_element(root, substitutions, ctx, &mut writer, warnings)?;
        let bytes = writer.into_inner().into_inner();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn render_element(
    element: &Element,
    subs: &[Variant],
    ctx: &dyn ChunkContext,
    writer: &mut Writer<Cursor<Vec<u8>>>,
    warnings: &mut Vec<Warning>,
) -> Result<()> {
    // Attribute values are escaped by `render_node_text`/`render_variant` up
    // front (spec §4.7's exact entity table, including the control-character
    // strip quick-xml doesn't perform on its own). Building the tag through
    // `BytesStart::from_content` instead of `push_attribute` writes that
    // escaped text verbatim rather than escaping it a second time.
    let mut tag_content = element.name.clone();
    for attr in &element.attributes {
        let value = render_node_text(&attr.value, subs, ctx, warnings)?;
        tag_content.push(' ');
        tag_content.push_str(&attr.name);
        tag_content.push_str("=\"");
        tag_content.push_str(&value);
        tag_content.push('"');
    }
    let start = BytesStart::from_content(tag_content, element.name.len());

    if element.children.is_empty() {
        writer.write_event(Event::Empty(start)).map_err(EvtxError::XmlOutput)?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(start))
        .map_err(EvtxError::XmlOutput)?;

    for child in &element.children {
        render_child(child, subs, ctx, writer, warnings)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new(element.name.clone())))
        .map_err(EvtxError::XmlOutput)?;
    Ok(())
}

fn render_child(
    node: &Node,
    subs: &[Variant],
    ctx: &dyn ChunkContext,
    writer: &mut Writer<Cursor<Vec<u8>>>,
    warnings: &mut Vec<Warning>,
) -> Result<()> {
    match node {
        Node::Element(e) => render_element(e, subs, ctx, writer, warnings),
        Node::CData(s) => {
            writer
                .write_event(Event::CData(quick_xml::events::BytesCData::new(s.as_str())))
                .map_err(EvtxError::XmlOutput)?;
            Ok(())
        }
        Node::StartOfStream | Node::FragmentHeader | Node::EndOfStream | Node::TemplateInstance(_) => {
            Ok(())
        }
        _ => {
            let text = render_node_text(node, subs, ctx, warnings)?;
            if !text.is_empty() {
                writer
                    .write_event(Event::Text(BytesText::from_escaped(text)))
                    .map_err(EvtxError::XmlOutput)?;
            }
            Ok(())
        }
    }
}

/// Render a leaf node (value, substitution, reference) to escaped text.
pub(crate) fn render_node_text(
    node: &Node,
    subs: &[Variant],
    ctx: &dyn ChunkContext,
    warnings: &mut Vec<Warning>,
) -> Result<String> {
    match node {
        Node::Value(v) => Ok(render_variant(v, ctx, warnings)?),
        Node::Substitution { index, optional } => {
            match subs.get(*index as usize) {
                Some(v) => render_variant(v, ctx, warnings),
                None if *optional => Ok(String::new()),
                None => {
                    warnings.push(Warning::new(format!(
                        "substitution index {index} out of range ({} available)",
                        subs.len()
                    )));
                    Ok(String::new())
                }
            }
        }
        Node::CharacterReference(ch) => Ok(ch.to_string()),
        Node::EntityReference(name) => Ok(format!("&{name};")),
        Node::Element(e) => {
            // Should not occur as text content; callers route elements through render_element.
            Ok(escape_xml_text(&e.name))
        }
        _ => Ok(String::new()),
    }
}

pub(crate) fn render_variant(
    variant: &Variant,
    ctx: &dyn ChunkContext,
    warnings: &mut Vec<Warning>,
) -> Result<String> {
    match variant {
        Variant::BXml(embedded) => render_embedded_bxml(*embedded, ctx, warnings),
        Variant::WString(s) | Variant::String(s) => Ok(escape_xml_text(s)),
        other => Ok(escape_xml_text(&other.render())),
    }
}

/// Parse an embedded BXML fragment against the full chunk byte range (spec
/// §4.7, §9): its own `TemplateInstance` plus substitution table, with the
/// substitution header sitting directly at `base_offset + declared_bytes` —
/// no `-1` correction, unlike a top-level record (spec §9). Shared by the
/// renderer and the EventData/UserData layout extractor (spec §4.8), since
/// both need to descend into the same embedded template + substitutions.
pub(crate) fn resolve_embedded_bxml(
    embedded: EmbeddedBXml,
    ctx: &dyn ChunkContext,
    warnings: &mut Vec<Warning>,
) -> Result<Option<(Rc<crate::template::TemplateDefinition>, Vec<Variant>)>> {
    let slab = ctx.chunk_slab();
    let mut cursor = BinaryCursor::at(slab, embedded.base_offset as usize);
    let end_bound = (embedded.base_offset + embedded.length) as usize;
    let parsed = crate::binxml::parser::parse_envelope(
        &mut cursor,
        ctx,
        end_bound.min(slab.len()),
        EnvelopeMode::Embedded,
        warnings,
    )?;

    let Some(template_ref) = parsed.template_instance else {
        return Ok(None);
    };

    let header_offset = embedded.base_offset as usize + parsed.declared_bytes;
    let mut sub_cursor = BinaryCursor::at(slab, header_offset);
    let substitutions = parse_substitution_array(&mut sub_cursor, header_offset)?;

    let template = ctx.get_template(template_ref.template_offset)?;
    Ok(Some((template, substitutions)))
}

fn render_embedded_bxml(
    embedded: EmbeddedBXml,
    ctx: &dyn ChunkContext,
    warnings: &mut Vec<Warning>,
) -> Result<String> {
    match resolve_embedded_bxml(embedded, ctx, warnings)? {
        Some((template, substitutions)) => {
            Renderer::render(&template.root, &substitutions, ctx, warnings)
        }
        None => Ok(String::new()),
    }
}
