use std::collections::HashMap;

/// One candidate message format string for a `(provider, event_id, locale)`
/// pair (spec §4.9/§6, C10). A provider's catalog may carry more than one
/// candidate across tool/log versions; `arg_count_hint` lets the resolver
/// pick the best fit for the arguments actually present on a record.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    pub format: String,
    pub arg_count_hint: Option<usize>,
}

impl MessageTemplate {
    pub fn new(format: impl Into<String>, arg_count_hint: Option<usize>) -> Self {
        MessageTemplate {
            format: format.into(),
            arg_count_hint,
        }
    }
}

/// Metadata about a catalog's backing store (spec §6 `info()`), surfaced to
/// callers for diagnostics; entirely optional.
#[derive(Debug, Clone, Default)]
pub struct CatalogInfo {
    pub source: String,
    pub locale: Option<String>,
    pub entry_count: Option<usize>,
}

/// Message-catalog lookup surface (spec §6 interfaces). Implementations may
/// be backed by an embedded resource table, a sidecar file, or (on Windows)
/// the registered provider's message-table DLL; this crate ships an
/// in-memory implementation and leaves the rest to embedders. Providers may
/// be chained; a chain returns the first non-empty result (spec §6).
pub trait MessageProvider {
    /// All candidate templates registered for `provider_name`/`event_id`
    /// under `locale`, most-preferred first (merges the spec's
    /// `get`/`get_candidates` collaborators into one call). Empty if none
    /// are registered.
    fn candidates(&self, provider_name: &str, event_id: u32, locale: &str) -> Vec<MessageTemplate>;

    /// Alternate provider names to retry under, in order, when the canonical
    /// name has no candidates (spec §4.9 alias fallback) — e.g. a publisher
    /// GUID resolving to a friendly name, or a renamed provider's old name.
    fn alias_providers(&self, provider_name: &str) -> Vec<String>;

    /// Optional backing-store metadata (spec §6 `info()`).
    fn info(&self) -> Option<CatalogInfo> {
        None
    }
}

/// A simple in-memory catalog, keyed by `(provider, event_id, locale)`, with
/// an explicit alias table. Suitable for tests and for embedders that load a
/// catalog from their own configuration rather than a Windows message-table
/// resource.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    entries: HashMap<(String, u32, String), Vec<MessageTemplate>>,
    aliases: HashMap<String, Vec<String>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        InMemoryCatalog::default()
    }

    pub fn register(&mut self, provider: impl Into<String>, event_id: u32, template: MessageTemplate) {
        self.register_locale(provider, event_id, "en-US", template);
    }

    pub fn register_locale(
        &mut self,
        provider: impl Into<String>,
        event_id: u32,
        locale: impl Into<String>,
        template: MessageTemplate,
    ) {
        self.entries
            .entry((provider.into(), event_id, locale.into()))
            .or_default()
            .push(template);
    }

    pub fn register_alias(&mut self, provider: impl Into<String>, alias_of: impl Into<String>) {
        self.aliases
            .entry(provider.into())
            .or_default()
            .push(alias_of.into());
    }
}

impl MessageProvider for InMemoryCatalog {
    fn candidates(&self, provider_name: &str, event_id: u32, locale: &str) -> Vec<MessageTemplate> {
        self.entries
            .get(&(provider_name.to_string(), event_id, locale.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn alias_providers(&self, provider_name: &str) -> Vec<String> {
        self.aliases.get(provider_name).cloned().unwrap_or_default()
    }

    fn info(&self) -> Option<CatalogInfo> {
        Some(CatalogInfo {
            source: "in-memory".to_string(),
            locale: None,
            entry_count: Some(self.entries.values().map(|v| v.len()).sum()),
        })
    }
}
