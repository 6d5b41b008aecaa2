use crate::layout::EventLayout;

const MAX_FALLBACK_ITEMS: usize = 10;

/// Build a readable message when no catalog entry resolves (spec §4.10
/// fallback builder): up to the first 10 layout entries, each rendered as
/// `Name=Value` when a name is present or just `Value` otherwise, joined
/// with `" | "`. Entries with an empty value are skipped entirely.
pub fn build_fallback_message(layout: &EventLayout) -> String {
    layout
        .fields
        .iter()
        .take(MAX_FALLBACK_ITEMS)
        .filter(|field| !field.value.is_empty())
        .map(|field| match &field.name {
            Some(name) => format!("{name}={}", field.value),
            None => field.value.clone(),
        })
        .collect::<Vec<_>>()
        .join(" | ")
}
