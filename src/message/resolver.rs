use crate::layout::{build_args_from_layout, EventLayout};
use crate::message::catalog::{MessageProvider, MessageTemplate};
use crate::message::fallback::build_fallback_message;
use crate::message::reorder::reorder_args;

/// How much of the resolution lifecycle to retain (spec §4.9/§6
/// `include_diagnostics`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagnosticsLevel {
    /// No `attempts`, no `selection`.
    None,
    /// Attempts summary, `selection` without `args`, first warning only.
    #[default]
    Basic,
    /// Everything: attempts, `selection.args`, all warnings and errors.
    Full,
}

/// Escalation policy when no template resolves (spec §4.9/§6
/// `message_strategy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageStrategy {
    /// Skip resolution entirely; every event is `unresolved` with no
    /// fallback built.
    None,
    /// Surface whatever was found, falling back to the field dump.
    #[default]
    BestEffort,
    /// Surface an error instead of emitting an event when nothing resolves.
    Required,
}

/// Final lifecycle state of one resolution attempt (spec §3
/// `messageResolution.status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionStatus {
    Resolved,
    Fallback,
    #[default]
    Unresolved,
}

/// Why an attempt was (or wasn't) selected (spec §3 `attempts[].reason`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptReason {
    AliasFallback,
    BestFit,
    NoCandidates,
}

/// One provider name tried during resolution (spec §3 `attempts[]`).
#[derive(Debug, Clone)]
pub struct Attempt {
    pub provider: String,
    pub candidate_count: usize,
    pub selected: bool,
    pub reason: Option<AttemptReason>,
}

/// Relation between placeholder count and argument count (spec §3/GLOSSARY
/// `fit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    Exact,
    Underflow,
    Overflow,
}

/// The winning candidate template and how it was applied (spec §3
/// `selection`).
#[derive(Debug, Clone)]
pub struct Selection {
    pub template_text: String,
    pub placeholders: usize,
    pub fit: Fit,
    pub args_used: usize,
    pub args: Option<Vec<String>>,
}

/// Where the final message text came from (spec §3 `final.from`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSource {
    Template,
    Fallback,
}

/// The message text ultimately attached to the event (spec §3 `final`).
#[derive(Debug, Clone)]
pub struct FinalMessage {
    pub message: String,
    pub from: MessageSource,
}

/// Detail recorded when a fallback message was built (spec §3 `fallback`).
#[derive(Debug, Clone)]
pub struct FallbackInfo {
    pub built_from: &'static str,
    pub item_count: usize,
    pub message: String,
}

/// The full message-resolution lifecycle record attached to a
/// `ResolvedEvent` (spec §3 `MessageResolution`).
#[derive(Debug, Clone, Default)]
pub struct MessageResolution {
    pub status: ResolutionStatus,
    pub attempts: Vec<Attempt>,
    pub selection: Option<Selection>,
    pub final_message: Option<FinalMessage>,
    pub fallback: Option<FallbackInfo>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Options governing one resolution call (spec §6 config surface subset
/// that reaches the resolver).
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub locale: String,
    pub enable_alias_lookup: bool,
    pub candidate_limit: Option<usize>,
    pub diagnostics: DiagnosticsLevel,
    pub strategy: MessageStrategy,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            locale: "en-US".to_string(),
            enable_alias_lookup: true,
            candidate_limit: None,
            diagnostics: DiagnosticsLevel::Basic,
            strategy: MessageStrategy::BestEffort,
        }
    }
}

/// Resolves a record's rendered layout into a human-readable message,
/// trying the canonical provider name, then (if enabled) an alias name,
/// then falling back to a synthesized field dump (spec §4.9/§4.10).
pub struct MessageResolver<'a> {
    catalog: &'a dyn MessageProvider,
}

impl<'a> MessageResolver<'a> {
    pub fn new(catalog: &'a dyn MessageProvider) -> Self {
        MessageResolver { catalog }
    }

    pub fn resolve(
        &self,
        provider_name: &str,
        provider_alias: Option<&str>,
        event_id: u32,
        layout: &EventLayout,
        opts: &ResolveOptions,
    ) -> MessageResolution {
        if opts.strategy == MessageStrategy::None {
            return MessageResolution::default();
        }

        let mut attempts = Vec::new();
        let mut provider_names = vec![provider_name.to_string()];
        if opts.enable_alias_lookup {
            if let Some(alias) = provider_alias {
                provider_names.push(alias.to_string());
            }
        }

        let layout_count = layout.len();
        let baseline_args = build_args_from_layout(layout, None);

        let mut winner: Option<(usize, MessageTemplate, bool)> = None; // (provider_index, template, is_alias)
        for (idx, name) in provider_names.iter().enumerate() {
            let mut candidates = self.catalog.candidates(name, event_id, &opts.locale);
            if let Some(limit) = opts.candidate_limit {
                candidates.truncate(limit);
            }
            let candidate_count = candidates.len();
            if candidate_count == 0 {
                attempts.push(Attempt {
                    provider: name.clone(),
                    candidate_count,
                    selected: false,
                    reason: Some(AttemptReason::NoCandidates),
                });
                continue;
            }

            attempts.push(Attempt {
                provider: name.clone(),
                candidate_count,
                selected: false,
                reason: None,
            });

            if let Some(best) = pick_best_fit(&candidates, layout_count, &baseline_args) {
                winner = Some((idx, best.clone(), idx > 0));
                break;
            }
        }

        let Some((winner_idx, template, is_alias)) = winner else {
            return self.build_fallback_resolution(provider_name, layout, attempts, opts);
        };

        attempts[winner_idx].selected = true;
        attempts[winner_idx].reason = Some(if is_alias {
            AttemptReason::AliasFallback
        } else {
            AttemptReason::BestFit
        });

        let winning_provider = &provider_names[winner_idx];
        let need = count_placeholders(&template.format);
        let ordered = reorder_args(winning_provider, event_id, layout).unwrap_or_else(|| baseline_args.clone());
        let args_used = ordered.len();
        let fit = fit_relation(need, args_used);
        let final_args = pad_or_truncate(ordered, need);
        let message = apply_template(&template.format, &final_args);

        let selection_args = matches!(opts.diagnostics, DiagnosticsLevel::Full).then(|| final_args.clone());

        MessageResolution {
            status: ResolutionStatus::Resolved,
            attempts: gate_attempts(attempts, opts.diagnostics),
            selection: gate_selection(
                Selection {
                    template_text: template.format.clone(),
                    placeholders: need,
                    fit,
                    args_used,
                    args: selection_args,
                },
                opts.diagnostics,
            ),
            final_message: Some(FinalMessage {
                message,
                from: MessageSource::Template,
            }),
            fallback: None,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn build_fallback_resolution(
        &self,
        provider_name: &str,
        layout: &EventLayout,
        attempts: Vec<Attempt>,
        opts: &ResolveOptions,
    ) -> MessageResolution {
        if opts.strategy == MessageStrategy::None {
            return MessageResolution::default();
        }

        let message = build_fallback_message(layout);
        let (status, final_message, fallback) = if message.is_empty() {
            (ResolutionStatus::Unresolved, None, None)
        } else {
            (
                ResolutionStatus::Fallback,
                Some(FinalMessage {
                    message: message.clone(),
                    from: MessageSource::Fallback,
                }),
                Some(FallbackInfo {
                    built_from: layout.source.as_str(),
                    item_count: layout.len(),
                    message,
                }),
            )
        };

        let errors = if opts.strategy == MessageStrategy::Required {
            vec![format!(
                "no message template resolved for provider `{provider_name}` and strategy is `required`"
            )]
        } else {
            Vec::new()
        };

        MessageResolution {
            status,
            attempts: gate_attempts(attempts, opts.diagnostics),
            selection: None,
            final_message,
            fallback,
            warnings: Vec::new(),
            errors,
        }
    }
}

fn gate_attempts(attempts: Vec<Attempt>, level: DiagnosticsLevel) -> Vec<Attempt> {
    match level {
        DiagnosticsLevel::None => Vec::new(),
        _ => attempts,
    }
}

fn gate_selection(selection: Selection, level: DiagnosticsLevel) -> Option<Selection> {
    match level {
        DiagnosticsLevel::None => None,
        _ => Some(selection),
    }
}

fn fit_relation(need: usize, args_used: usize) -> Fit {
    match need.cmp(&args_used) {
        std::cmp::Ordering::Equal => Fit::Exact,
        std::cmp::Ordering::Greater => Fit::Underflow,
        std::cmp::Ordering::Less => Fit::Overflow,
    }
}

fn pad_or_truncate(mut args: Vec<String>, need: usize) -> Vec<String> {
    if args.len() < need {
        args.resize(need, String::new());
    } else {
        args.truncate(need);
    }
    args
}

/// Highest `%N` placeholder index appearing in `format` (spec §4.9 step 2),
/// including `%N!fmt!`-style entries.
fn count_placeholders(format: &str) -> usize {
    let mut max_index = 0usize;
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        if let Some(d) = chars.peek() {
            if d.is_ascii_digit() {
                let mut num = String::new();
                while let Some(d) = chars.peek() {
                    if d.is_ascii_digit() {
                        num.push(*d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if let Ok(n) = num.parse::<usize>() {
                    max_index = max_index.max(n);
                }
            }
        }
    }
    max_index
}

/// Pick the candidate that scores highest against the spec §4.9 step 2
/// formula: an exact match on the layout's raw field count wins outright;
/// otherwise prefer a placeholder count matching the flattened argument
/// count, then any count the args can satisfy (favoring more placeholders
/// used), and only as a last resort the closest under/overflow.
fn pick_best_fit<'c>(
    candidates: &'c [MessageTemplate],
    layout_count: usize,
    baseline_args: &[String],
) -> Option<&'c MessageTemplate> {
    candidates
        .iter()
        .max_by_key(|c| score_candidate(count_placeholders(&c.format), layout_count, baseline_args.len()))
}

fn score_candidate(need: usize, layout_count: usize, baseline_len: usize) -> i64 {
    if need == layout_count {
        1000
    } else if need == baseline_len {
        500
    } else if need <= baseline_len {
        200 + need as i64
    } else {
        50 - (need as i64 - baseline_len as i64).abs()
    }
}

/// Apply a resolved template's placeholders against `args` (spec §4.9 step
/// 4): `%N!fmt!` and bare `%N` both substitute `args[N-1]` (1-indexed,
/// format spec discarded); `%n` is a literal newline; `{N}` substitutes
/// `args[N]` (0-indexed); any residual `!fmt!` left over from a substitution
/// whose `%N` wasn't recognized as such is stripped at the end.
fn apply_template(format: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '%' => match chars.peek() {
                Some('%') => {
                    chars.next();
                    out.push('%');
                }
                Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                Some(d) if d.is_ascii_digit() => {
                    let mut num = String::new();
                    while let Some(d) = chars.peek() {
                        if d.is_ascii_digit() {
                            num.push(*d);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if let Ok(index) = num.parse::<usize>() {
                        if index >= 1 {
                            if let Some(arg) = args.get(index - 1) {
                                out.push_str(arg);
                            }
                        }
                    }
                    // Optional `!fmt!` suffix (format spec is not applied).
                    if chars.peek() == Some(&'!') {
                        chars.next();
                        for d in chars.by_ref() {
                            if d == '!' {
                                break;
                            }
                        }
                    }
                }
                _ => out.push('%'),
            },
            '{' => {
                let mut num = String::new();
                let mut lookahead = chars.clone();
                while let Some(d) = lookahead.peek() {
                    if d.is_ascii_digit() {
                        num.push(*d);
                        lookahead.next();
                    } else {
                        break;
                    }
                }
                if !num.is_empty() && lookahead.peek() == Some(&'}') {
                    lookahead.next();
                    chars = lookahead;
                    if let Ok(index) = num.parse::<usize>() {
                        if let Some(arg) = args.get(index) {
                            out.push_str(arg);
                        }
                    }
                } else {
                    out.push('{');
                }
            }
            other => out.push(other),
        }
    }
    strip_residual_fmt_tokens(&out)
}

/// Remove any leftover `!fmt!` token not already consumed as part of a
/// recognized `%N!fmt!` substitution (spec §4.9 step 4, §8 property 8).
fn strip_residual_fmt_tokens(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '!' {
            let mut lookahead = chars.clone();
            let mut body = String::new();
            let mut closed = false;
            for d in lookahead.by_ref() {
                if d == '!' {
                    closed = true;
                    break;
                }
                if !d.is_ascii_alphanumeric() {
                    break;
                }
                body.push(d);
            }
            if closed && !body.is_empty() {
                chars = lookahead;
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{DataSource, LayoutField};
    use crate::message::catalog::InMemoryCatalog;

    fn layout_with(values: &[&str]) -> EventLayout {
        EventLayout {
            source: DataSource::EventData,
            fields: values
                .iter()
                .map(|v| LayoutField {
                    name: None,
                    value: v.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn resolves_exact_provider_match() {
        let mut catalog = InMemoryCatalog::new();
        catalog.register("MyProvider", 1, MessageTemplate::new("Hello %1!", Some(1)));
        let resolver = MessageResolver::new(&catalog);
        let resolution = resolver.resolve(
            "MyProvider",
            None,
            1,
            &layout_with(&["World"]),
            &ResolveOptions::default(),
        );
        assert_eq!(resolution.status, ResolutionStatus::Resolved);
        assert_eq!(resolution.final_message.unwrap().message, "Hello World!");
    }

    #[test]
    fn falls_back_to_alias_provider() {
        let mut catalog = InMemoryCatalog::new();
        catalog.register(
            "Software Protection Platform Service",
            16384,
            MessageTemplate::new(
                "Successfully scheduled Software Protection service for re-start at %1. Reason: %2.",
                Some(2),
            ),
        );
        let resolver = MessageResolver::new(&catalog);
        let layout = layout_with(&["2024-01-01T00:00:00Z", "scheduled task"]);
        let resolution = resolver.resolve(
            "Microsoft-Windows-Security-SPP",
            Some("Software Protection Platform Service"),
            16384,
            &layout,
            &ResolveOptions::default(),
        );
        assert_eq!(resolution.status, ResolutionStatus::Resolved);
        assert_eq!(
            resolution.final_message.unwrap().message,
            "Successfully scheduled Software Protection service for re-start at 2024-01-01T00:00:00Z. Reason: scheduled task."
        );
        assert_eq!(resolution.attempts.len(), 2);
        assert!(!resolution.attempts[0].selected);
        assert_eq!(resolution.attempts[0].reason, Some(AttemptReason::NoCandidates));
        assert!(resolution.attempts[1].selected);
        assert_eq!(resolution.attempts[1].reason, Some(AttemptReason::AliasFallback));
    }

    #[test]
    fn restart_manager_10010_reorders_by_name() {
        let mut catalog = InMemoryCatalog::new();
        catalog.register(
            "Microsoft-Windows-RestartManager",
            10010,
            MessageTemplate::new("Application '%1' (pid %2) cannot be restarted - %3.", Some(3)),
        );
        let layout = EventLayout {
            source: DataSource::EventData,
            fields: vec![
                LayoutField {
                    name: Some("FullPath".to_string()),
                    value: "C:\\x.exe".to_string(),
                },
                LayoutField {
                    name: Some("Pid".to_string()),
                    value: "1234".to_string(),
                },
                LayoutField {
                    name: Some("Reason".to_string()),
                    value: "Hang".to_string(),
                },
            ],
        };
        let resolver = MessageResolver::new(&catalog);
        let resolution = resolver.resolve(
            "Microsoft-Windows-RestartManager",
            None,
            10010,
            &layout,
            &ResolveOptions::default(),
        );
        assert_eq!(
            resolution.final_message.unwrap().message,
            "Application 'C:\\x.exe' (pid 1234) cannot be restarted - Hang."
        );
    }

    #[test]
    fn builds_fallback_when_nothing_resolves() {
        let catalog = InMemoryCatalog::new();
        let resolver = MessageResolver::new(&catalog);
        let layout = EventLayout {
            source: DataSource::EventData,
            fields: vec![
                LayoutField {
                    name: Some("A".to_string()),
                    value: "x".to_string(),
                },
                LayoutField {
                    name: Some("B".to_string()),
                    value: "y".to_string(),
                },
            ],
        };
        let resolution = resolver.resolve("Unknown", None, 99, &layout, &ResolveOptions::default());
        assert_eq!(resolution.status, ResolutionStatus::Fallback);
        assert_eq!(resolution.final_message.as_ref().unwrap().message, "A=x | B=y");
        assert_eq!(resolution.fallback.unwrap().item_count, 2);
    }

    #[test]
    fn unresolved_when_fallback_has_nothing_to_say() {
        let catalog = InMemoryCatalog::new();
        let resolver = MessageResolver::new(&catalog);
        let resolution = resolver.resolve(
            "Unknown",
            None,
            99,
            &EventLayout::default(),
            &ResolveOptions::default(),
        );
        assert_eq!(resolution.status, ResolutionStatus::Unresolved);
        assert!(resolution.final_message.is_none());
    }

    #[test]
    fn required_strategy_records_an_error_when_unresolved() {
        let catalog = InMemoryCatalog::new();
        let resolver = MessageResolver::new(&catalog);
        let opts = ResolveOptions {
            strategy: MessageStrategy::Required,
            ..ResolveOptions::default()
        };
        let resolution = resolver.resolve("Unknown", None, 99, &EventLayout::default(), &opts);
        assert!(!resolution.errors.is_empty());
    }

    #[test]
    fn none_strategy_skips_resolution() {
        let mut catalog = InMemoryCatalog::new();
        catalog.register("P", 1, MessageTemplate::new("Hello %1", Some(1)));
        let resolver = MessageResolver::new(&catalog);
        let opts = ResolveOptions {
            strategy: MessageStrategy::None,
            ..ResolveOptions::default()
        };
        let resolution = resolver.resolve("P", None, 1, &layout_with(&["x"]), &opts);
        assert_eq!(resolution.status, ResolutionStatus::Unresolved);
        assert!(resolution.attempts.is_empty());
    }

    #[test]
    fn literal_percent_and_newline_and_residual_fmt_stripped() {
        assert_eq!(apply_template("100%% done%n", &[]), "100% done\n");
        assert_eq!(apply_template("%1!s! logged in", &["bob".to_string()]), "bob logged in");
        assert_eq!(apply_template("{0} says hi", &["alice".to_string()]), "alice says hi");
    }

    #[test]
    fn diagnostics_none_hides_attempts_and_selection() {
        let mut catalog = InMemoryCatalog::new();
        catalog.register("P", 1, MessageTemplate::new("Hello %1", Some(1)));
        let resolver = MessageResolver::new(&catalog);
        let opts = ResolveOptions {
            diagnostics: DiagnosticsLevel::None,
            ..ResolveOptions::default()
        };
        let resolution = resolver.resolve("P", None, 1, &layout_with(&["x"]), &opts);
        assert!(resolution.attempts.is_empty());
        assert!(resolution.selection.is_none());
    }

    #[test]
    fn diagnostics_full_includes_selection_args() {
        let mut catalog = InMemoryCatalog::new();
        catalog.register("P", 1, MessageTemplate::new("Hello %1", Some(1)));
        let resolver = MessageResolver::new(&catalog);
        let opts = ResolveOptions {
            diagnostics: DiagnosticsLevel::Full,
            ..ResolveOptions::default()
        };
        let resolution = resolver.resolve("P", None, 1, &layout_with(&["x"]), &opts);
        assert!(resolution.selection.unwrap().args.is_some());
    }
}
