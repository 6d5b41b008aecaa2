use crate::binxml::value::{Variant, VariantType};

/// One parsed BXML node. `declared_length` is the logical span a parent uses
/// to locate its next sibling or the substitution header — for
/// `OpenStartElement` this is the *tag header* length, not the element's full
/// extent (spec §4.6, §9 "declared vs consumed bytes").
#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    Value(Variant),
    CData(String),
    CharacterReference(char),
    EntityReference(String),
    PITarget(String),
    PIData(String),
    TemplateInstance(TemplateInstanceRef),
    Substitution { index: u16, optional: bool },
    StartOfStream,
    FragmentHeader,
    EndOfStream,
}

impl Node {
    pub fn declared_length(&self) -> usize {
        match self {
            Node::Element(e) => e.tag_length,
            Node::Value(v) => 1 + 1 + value_top_level_payload_len(v),
            Node::CData(s) => 1 + 2 + s.encode_utf16().count() * 2,
            Node::CharacterReference(_) => 3,
            Node::EntityReference(name) => 5 + inline_name_length(name),
            Node::PITarget(name) => 1 + 4 + inline_name_length(name),
            Node::PIData(s) => 1 + 2 + s.encode_utf16().count() * 2,
            Node::TemplateInstance(t) => t.declared_length,
            Node::Substitution { .. } => 4,
            Node::StartOfStream => 4,
            Node::FragmentHeader => 5,
            Node::EndOfStream => 0,
        }
    }
}

fn value_top_level_payload_len(v: &Variant) -> usize {
    match v {
        Variant::WString(s) | Variant::String(s) => 2 + s.encode_utf16().count() * 2,
        Variant::Binary(b) => 4 + b.len(),
        _ => 0,
    }
}

/// `NameString` inline length: `10 + 2 * length` (next-offset u32, hash u16,
/// length u16, UTF-16LE payload, NUL terminator u16) (spec §4.6).
pub fn inline_name_length(name: &str) -> usize {
    10 + 2 * name.encode_utf16().count()
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub value: Box<Node>,
}

impl Attribute {
    /// `5 + inline_name_length + child.declared_length` (spec §4.6). Callers
    /// that resolved the name from the interned string table (not inline)
    /// pass `inline_name_len = 0`.
    pub fn declared_length(&self, inline_name_len: usize) -> usize {
        5 + inline_name_len + self.value.declared_length()
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
    /// Tag header length: `11 + (flag_0x04 ? 4 : 0) + inline_name_length`.
    pub tag_length: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct TemplateInstanceRef {
    pub template_id: u32,
    pub template_offset: u32,
    pub resident: bool,
    pub declared_length: usize,
}

/// A declared substitution-table entry (spec §4.6 Phase 2).
#[derive(Debug, Clone, Copy)]
pub struct SubstitutionDeclaration {
    pub size: u16,
    pub value_type: VariantType,
}
