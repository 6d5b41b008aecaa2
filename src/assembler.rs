use crate::binxml::model::{Element, Node};
use crate::binxml::parser::ChunkContext;
use crate::binxml::value::Variant;
use crate::error::{EvtxError, Result, Warning};
use crate::layout::{extract_layout, DataSource, LayoutField};
use crate::message::{MessageProvider, MessageResolution, MessageResolver, MessageStrategy, ResolveOptions};
use crate::record::Record;
use crate::render::Renderer;

/// How many `data.items` entries to retain (spec §3/§6 `include_data_items`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataItemsMode {
    None,
    #[default]
    Summary,
    Full,
}

const SUMMARY_ITEM_CAP: usize = 10;

/// Knobs controlling one `assemble()` call (spec §6's config table, the
/// subset that shapes `ResolvedEvent` rather than file-level iteration).
#[derive(Debug, Clone)]
pub struct AssemblerOptions {
    pub include_raw_xml: bool,
    pub include_data_items: DataItemsMode,
    pub resolve: ResolveOptions,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        AssemblerOptions {
            include_raw_xml: false,
            include_data_items: DataItemsMode::default(),
            resolve: ResolveOptions::default(),
        }
    }
}

/// A provider's identifying attributes from `System/Provider` (spec §3
/// `provider`).
#[derive(Debug, Clone, Default)]
pub struct ProviderInfo {
    pub name: String,
    pub alias: Option<String>,
    pub guid: Option<String>,
}

/// Thread/process identifiers from `System/Execution` (spec §3
/// `core.execution`).
#[derive(Debug, Clone, Default)]
pub struct Execution {
    pub pid: Option<u32>,
    pub tid: Option<u32>,
}

/// `System/Security` (spec §3 `core.security`).
#[derive(Debug, Clone, Default)]
pub struct Security {
    pub user_id: Option<String>,
}

/// `System/Correlation` (spec §3 `core.correlation`).
#[derive(Debug, Clone, Default)]
pub struct Correlation {
    pub activity_id: Option<String>,
    pub related_activity_id: Option<String>,
}

/// Everything from `System` beyond the identifying/header fields already
/// promoted to top-level `ResolvedEvent` members (spec §3 `core`).
#[derive(Debug, Clone, Default)]
pub struct CoreFields {
    pub task: Option<u32>,
    pub opcode: Option<u32>,
    pub keywords: Option<String>,
    pub execution: Option<Execution>,
    pub security: Option<Security>,
    pub correlation: Option<Correlation>,
}

/// One entry of `data.items` (spec §3 `data.items[]`).
#[derive(Debug, Clone)]
pub struct DataItem {
    pub name: Option<String>,
    pub value: String,
}

/// The event's `EventData`/`UserData` section (spec §3 `data`).
#[derive(Debug, Clone)]
pub struct EventDataSection {
    pub source: DataSource,
    pub field_count: usize,
    pub items: Vec<DataItem>,
}

/// Optionally-attached raw rendering (spec §3 `raw`).
#[derive(Debug, Clone, Default)]
pub struct RawSection {
    pub xml: Option<String>,
}

/// A fully resolved event: identifying fields pulled from its `System`
/// section, its `EventData`/`UserData` layout, and a resolved
/// human-readable message (spec §3 `ResolvedEvent`, §4.11 C11).
#[derive(Debug, Clone)]
pub struct ResolvedEvent {
    pub id: u64,
    pub timestamp: jiff::Timestamp,
    pub provider: ProviderInfo,
    pub event_id: u32,
    pub level: Option<u8>,
    pub level_name: Option<String>,
    pub channel: Option<String>,
    pub computer: Option<String>,
    pub core: CoreFields,
    pub data: EventDataSection,
    pub message_resolution: MessageResolution,
    pub raw: RawSection,
    pub warnings: Vec<Warning>,
}

/// Assembles a `Record` into a `ResolvedEvent` (spec §4.11 C11): renders the
/// BXML body to XML, pulls the `System` section's identifying fields, builds
/// the `EventData`/`UserData` argument layout, and resolves a message via
/// the supplied catalog.
pub struct EventAssembler<'a> {
    catalog: &'a dyn MessageProvider,
    options: AssemblerOptions,
}

impl<'a> EventAssembler<'a> {
    pub fn new(catalog: &'a dyn MessageProvider) -> Self {
        EventAssembler {
            catalog,
            options: AssemblerOptions::default(),
        }
    }

    pub fn with_options(catalog: &'a dyn MessageProvider, options: AssemblerOptions) -> Self {
        EventAssembler { catalog, options }
    }

    pub fn assemble(&self, record: &Record, ctx: &dyn ChunkContext) -> Result<ResolvedEvent> {
        let mut warnings = Vec::new();
        let body = record.body(ctx, &mut warnings)?;

        let root: Element = if let Some(template_ref) = body.template_instance {
            let def = ctx.get_template(template_ref.template_offset)?;
            def.root.clone()
        } else {
            body.children
                .iter()
                .find_map(|n| match n {
                    Node::Element(e) => Some(e.clone()),
                    _ => None,
                })
                .ok_or(EvtxError::TemplateMissing { offset: 0 })?
        };

        let xml = Renderer::render(&root, &body.substitutions, ctx, &mut warnings)?;
        let system = find_child_element(&root, "System");

        let provider_element = system.and_then(|s| find_child_element(s, "Provider"));
        let provider_name = provider_attr(provider_element, "Name").unwrap_or_else(|| "Unknown".to_string());
        let provider_guid = provider_attr(provider_element, "Guid");
        let alias = provider_attr(provider_element, "EventSourceName")
            .or_else(|| strip_microsoft_windows_prefix(&provider_name));
        let provider = ProviderInfo {
            name: provider_name.clone(),
            alias: alias.clone(),
            guid: provider_guid,
        };

        let event_id = system
            .and_then(|s| find_child_element(s, "EventID"))
            .and_then(element_inline_u32)
            .unwrap_or(0);

        let level = system
            .and_then(|s| find_child_element(s, "Level"))
            .and_then(element_inline_u32)
            .map(|v| v as u8);

        let channel = system
            .and_then(|s| find_child_element(s, "Channel"))
            .and_then(element_inline_string);
        let computer = system
            .and_then(|s| find_child_element(s, "Computer"))
            .and_then(element_inline_string);

        let core = system.map(extract_core_fields).unwrap_or_default();

        let layout = extract_layout(&root, &body.substitutions, ctx, &mut warnings)?;
        let resolver = MessageResolver::new(self.catalog);
        let message_resolution = resolver.resolve(
            &provider_name,
            alias.as_deref(),
            event_id,
            &layout,
            &self.options.resolve,
        );

        if self.options.resolve.strategy == MessageStrategy::Required
            && !message_resolution.errors.is_empty()
        {
            return Err(EvtxError::MessageRequiredMissing {
                provider: provider_name,
                event_id,
            });
        }

        let items = build_data_items(&layout.fields, self.options.include_data_items);
        let data = EventDataSection {
            source: layout.source,
            field_count: layout.len(),
            items,
        };

        let raw = RawSection {
            xml: self.options.include_raw_xml.then(|| xml.clone()),
        };

        Ok(ResolvedEvent {
            id: record.record_id,
            timestamp: record.timestamp,
            provider,
            event_id,
            level_name: level.map(level_name),
            level,
            channel,
            computer,
            core,
            data,
            message_resolution,
            raw,
            warnings,
        })
    }
}

fn build_data_items(fields: &[LayoutField], mode: DataItemsMode) -> Vec<DataItem> {
    let cap = match mode {
        DataItemsMode::None => 0,
        DataItemsMode::Summary => SUMMARY_ITEM_CAP,
        DataItemsMode::Full => usize::MAX,
    };
    fields
        .iter()
        .take(cap)
        .map(|f| DataItem {
            name: f.name.clone(),
            value: f.value.clone(),
        })
        .collect()
}

/// Derive the Windows-convention alias (`Microsoft-Windows-` prefix
/// stripped) when no `EventSourceName` attribute is present (spec §4.9/§9
/// Open Questions: the attribute is authoritative when present).
fn strip_microsoft_windows_prefix(provider_name: &str) -> Option<String> {
    provider_name
        .strip_prefix("Microsoft-Windows-")
        .map(|s| s.to_string())
}

fn provider_attr(element: Option<&Element>, attr_name: &str) -> Option<String> {
    element.and_then(|p| {
        p.attributes.iter().find(|a| a.name == attr_name).and_then(|a| match a.value.as_ref() {
            Node::Value(Variant::String(s) | Variant::WString(s)) => Some(s.clone()),
            _ => None,
        })
    })
}

fn extract_core_fields(system: &Element) -> CoreFields {
    let task = find_child_element(system, "Task").and_then(element_inline_u32);
    let opcode = find_child_element(system, "Opcode").and_then(element_inline_u32);
    let keywords = find_child_element(system, "Keywords").and_then(element_inline_string);

    let execution = find_child_element(system, "Execution").map(|e| Execution {
        pid: element_attr_u32(e, "ProcessID"),
        tid: element_attr_u32(e, "ThreadID"),
    });

    let security = find_child_element(system, "Security").map(|e| Security {
        user_id: element_attr_string(e, "UserID"),
    });

    let correlation = find_child_element(system, "Correlation").map(|e| Correlation {
        activity_id: element_attr_string(e, "ActivityID"),
        related_activity_id: element_attr_string(e, "RelatedActivityID"),
    });

    CoreFields {
        task,
        opcode,
        keywords,
        execution,
        security,
        correlation,
    }
}

fn element_attr_string(element: &Element, attr_name: &str) -> Option<String> {
    element.attributes.iter().find(|a| a.name == attr_name).and_then(|a| match a.value.as_ref() {
        Node::Value(Variant::String(s) | Variant::WString(s)) => Some(s.clone()),
        _ => None,
    })
}

fn element_attr_u32(element: &Element, attr_name: &str) -> Option<u32> {
    element_attr_string(element, attr_name).and_then(|s| s.parse().ok())
}

fn find_child_element<'e>(element: &'e Element, name: &str) -> Option<&'e Element> {
    element.children.iter().find_map(|n| match n {
        Node::Element(e) if e.name == name => Some(e),
        _ => None,
    })
}

fn element_inline_string(element: &Element) -> Option<String> {
    element.children.iter().find_map(|n| match n {
        Node::Value(Variant::String(s) | Variant::WString(s)) => Some(s.clone()),
        _ => None,
    })
}

fn element_inline_u32(element: &Element) -> Option<u32> {
    element_inline_string(element).and_then(|s| s.parse().ok())
}

/// Standard Windows event levels (spec §4.11). Unrecognized values render
/// as `Unknown(N)`.
fn level_name(level: u8) -> String {
    match level {
        0 => "LogAlways".to_string(),
        1 => "Critical".to_string(),
        2 => "Error".to_string(),
        3 => "Warning".to_string(),
        4 => "Information".to_string(),
        5 => "Verbose".to_string(),
        n => format!("Unknown({n})"),
    }
}
