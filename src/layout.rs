use crate::binxml::model::{Element, Node};
use crate::binxml::parser::ChunkContext;
use crate::binxml::value::{EmbeddedBXml, Variant};
use crate::error::{Result, Warning};
use crate::render::{render_node_text, resolve_embedded_bxml};

/// One positional or named field pulled from a record's `EventData`/`UserData`
/// section (spec §4.8, C9).
#[derive(Debug, Clone)]
pub struct LayoutField {
    pub name: Option<String>,
    pub value: String,
}

/// Which section a layout was built from (spec §3 `data.source`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    EventData,
    UserData,
}

impl DataSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DataSource::EventData => "EventData",
            DataSource::UserData => "UserData",
        }
    }
}

/// The flattened argument layout of one event, in document order.
#[derive(Debug, Clone)]
pub struct EventLayout {
    pub source: DataSource,
    pub fields: Vec<LayoutField>,
}

impl Default for EventLayout {
    fn default() -> Self {
        EventLayout {
            source: DataSource::EventData,
            fields: Vec::new(),
        }
    }
}

impl EventLayout {
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Positional argument list, in the order message format strings expect
    /// (`%1`, `%2`, ...).
    pub fn args(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.value.clone()).collect()
    }

    pub fn named(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.as_deref() == Some(name))
            .map(|f| f.value.as_str())
    }

    /// First field whose name matches any of `names`, tried in order (spec
    /// §4.10's `A|B|C` reorder lookups).
    pub fn named_any(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|n| self.named(n))
    }
}

/// Locate the `EventData`/`UserData` section under `root` (an `Event`
/// element) and extract its fields (spec §4.8).
///
/// - `EventData`: each `<Data Name="...">value</Data>` child is one named
///   field; `Data` elements without a `Name` attribute are positional.
/// - `UserData`: provider-defined, free-form XML. Each immediate child
///   element is treated as one field, named after the element, with its
///   full descendant text flattened into the value.
pub fn extract_layout(
    root: &Element,
    subs: &[Variant],
    ctx: &dyn ChunkContext,
    warnings: &mut Vec<Warning>,
) -> Result<EventLayout> {
    // §4.8 step 1: EventData wins if present at all, even if empty.
    if let Some(section) = find_section(root, subs, ctx, warnings, "EventData")? {
        let mut fields = Vec::new();
        extract_event_data(&section, subs, ctx, warnings, &mut fields)?;
        return Ok(EventLayout {
            source: DataSource::EventData,
            fields,
        });
    }

    // §4.8 step 2: fall back to the first child element of UserData.
    if let Some(section) = find_section(root, subs, ctx, warnings, "UserData")? {
        if let Some(Node::Element(inner)) = section.children.iter().find(|n| matches!(n, Node::Element(_))) {
            let mut fields = Vec::new();
            extract_user_data(inner, subs, ctx, warnings, &mut fields)?;
            return Ok(EventLayout {
                source: DataSource::UserData,
                fields,
            });
        }
    }

    Ok(EventLayout::default())
}

/// Find the named top-level section, descending through any `BXml`-typed
/// substitution standing in for it (spec §4.8 step 1c/2).
fn find_section(
    root: &Element,
    subs: &[Variant],
    ctx: &dyn ChunkContext,
    warnings: &mut Vec<Warning>,
    name: &str,
) -> Result<Option<Element>> {
    for child in &root.children {
        match child {
            Node::Element(e) if e.name == name => return Ok(Some(e.clone())),
            other => {
                if let Some(embedded) = as_embedded_bxml(other, subs) {
                    if let Some((template, inner_subs)) = resolve_embedded_bxml(embedded, ctx, warnings)? {
                        if let Some(found) = find_section(&template.root, &inner_subs, ctx, warnings, name)? {
                            return Ok(Some(found));
                        }
                    }
                }
            }
        }
    }
    Ok(None)
}

/// If `node` is (or resolves through `subs` to) a `BXml`-typed value,
/// return the embedded fragment it points at.
fn as_embedded_bxml(node: &Node, subs: &[Variant]) -> Option<EmbeddedBXml> {
    match node {
        Node::Value(Variant::BXml(e)) => Some(*e),
        Node::Substitution { index, .. } => match subs.get(*index as usize) {
            Some(Variant::BXml(e)) => Some(*e),
            _ => None,
        },
        _ => None,
    }
}

/// Parse an embedded BXML fragment and flatten its own `<Data>` children (or
/// `UserData` children) into `fields`, resolving its substitutions against
/// its own (inner) substitution vector (spec §4.8 "flatten").
fn descend_embedded(
    embedded: EmbeddedBXml,
    ctx: &dyn ChunkContext,
    warnings: &mut Vec<Warning>,
    fields: &mut Vec<LayoutField>,
) -> Result<()> {
    if let Some((template, inner_subs)) = resolve_embedded_bxml(embedded, ctx, warnings)? {
        extract_event_data(&template.root, &inner_subs, ctx, warnings, fields)?;
    }
    Ok(())
}

fn extract_event_data(
    section: &Element,
    subs: &[Variant],
    ctx: &dyn ChunkContext,
    warnings: &mut Vec<Warning>,
    fields: &mut Vec<LayoutField>,
) -> Result<()> {
    for child in &section.children {
        let Node::Element(data) = child else {
            continue;
        };
        if data.name != "Data" {
            continue;
        }
        if let Some(embedded) = data
            .children
            .iter()
            .find_map(|n| as_embedded_bxml(n, subs))
        {
            descend_embedded(embedded, ctx, warnings, fields)?;
            continue;
        }
        let name = data
            .attributes
            .iter()
            .find(|a| a.name == "Name")
            .map(|a| render_node_text(&a.value, subs, ctx, warnings))
            .transpose()?;
        let value = flatten_element_text(data, subs, ctx, warnings)?;
        fields.push(LayoutField { name, value });
    }
    Ok(())
}

fn extract_user_data(
    section: &Element,
    subs: &[Variant],
    ctx: &dyn ChunkContext,
    warnings: &mut Vec<Warning>,
    fields: &mut Vec<LayoutField>,
) -> Result<()> {
    for child in &section.children {
        let Node::Element(e) = child else {
            continue;
        };
        if let Some(embedded) = e.children.iter().find_map(|n| as_embedded_bxml(n, subs)) {
            descend_embedded(embedded, ctx, warnings, fields)?;
            continue;
        }
        let value = flatten_element_text(e, subs, ctx, warnings)?;
        fields.push(LayoutField {
            name: Some(e.name.clone()),
            value,
        });
    }
    Ok(())
}

/// Concatenate every leaf text value under `element`, in document order.
fn flatten_element_text(
    element: &Element,
    subs: &[Variant],
    ctx: &dyn ChunkContext,
    warnings: &mut Vec<Warning>,
) -> Result<String> {
    let mut out = String::new();
    for child in &element.children {
        match child {
            Node::Element(e) => out.push_str(&flatten_element_text(e, subs, ctx, warnings)?),
            Node::StartOfStream | Node::FragmentHeader | Node::EndOfStream | Node::TemplateInstance(_) => {}
            other => out.push_str(&render_node_text(other, subs, ctx, warnings)?),
        }
    }
    Ok(out)
}

/// Build message-argument strings from a layout (spec §4.8
/// `build_args_from_layout`): literal-only entries emit their joined text
/// (even when empty, to preserve `%1..%n` positional alignment); entries
/// with at least one substitution just emit the already-flattened value.
/// Truncates to `max` when given.
pub fn build_args_from_layout(layout: &EventLayout, max: Option<usize>) -> Vec<String> {
    let mut args = layout.args();
    if let Some(max) = max {
        args.truncate(max);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binxml::model::Attribute;
    use crate::error::EvtxError;
    use std::rc::Rc;

    struct EmptyCtx;
    impl ChunkContext for EmptyCtx {
        fn chunk_slab(&self) -> &[u8] {
            &[]
        }
        fn resolve_name(&self, _offset: u32) -> Result<Rc<str>> {
            Ok(Rc::from("x"))
        }
        fn insert_inline_name(&self, _offset: u32, _name: Rc<str>) {}
        fn get_template(&self, offset: u32) -> Result<Rc<crate::template::TemplateDefinition>> {
            Err(EvtxError::TemplateMissing { offset })
        }
        fn add_resident_template(
            &self,
            _offset: u32,
            def: crate::template::TemplateDefinition,
        ) -> Rc<crate::template::TemplateDefinition> {
            Rc::new(def)
        }
    }

    fn data_element(name: &str, value: &str) -> Element {
        Element {
            name: "Data".to_string(),
            attributes: vec![Attribute {
                name: "Name".to_string(),
                value: Box::new(Node::Value(Variant::String(name.to_string()))),
            }],
            children: vec![Node::Value(Variant::String(value.to_string()))],
            tag_length: 0,
        }
    }

    #[test]
    fn extracts_named_event_data_fields() {
        let root = Element {
            name: "Event".to_string(),
            attributes: vec![],
            children: vec![Node::Element(Element {
                name: "EventData".to_string(),
                attributes: vec![],
                children: vec![
                    Node::Element(data_element("Param1", "alpha")),
                    Node::Element(data_element("Param2", "beta")),
                ],
                tag_length: 0,
            })],
            tag_length: 0,
        };
        let mut warnings = Vec::new();
        let layout = extract_layout(&root, &[], &EmptyCtx, &mut warnings).unwrap();
        assert_eq!(layout.source, DataSource::EventData);
        assert_eq!(layout.named("Param1"), Some("alpha"));
        assert_eq!(layout.args(), vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn falls_back_to_user_data_when_no_event_data() {
        let root = Element {
            name: "Event".to_string(),
            attributes: vec![],
            children: vec![Node::Element(Element {
                name: "UserData".to_string(),
                attributes: vec![],
                children: vec![Node::Element(Element {
                    name: "CustomEvent".to_string(),
                    attributes: vec![],
                    children: vec![Node::Element(Element {
                        name: "Field1".to_string(),
                        attributes: vec![],
                        children: vec![Node::Value(Variant::String("v1".to_string()))],
                        tag_length: 0,
                    })],
                    tag_length: 0,
                })],
                tag_length: 0,
            })],
            tag_length: 0,
        };
        let mut warnings = Vec::new();
        let layout = extract_layout(&root, &[], &EmptyCtx, &mut warnings).unwrap();
        assert_eq!(layout.source, DataSource::UserData);
        assert_eq!(layout.named("Field1"), Some("v1"));
    }
}
