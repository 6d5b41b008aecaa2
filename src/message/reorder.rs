use crate::layout::EventLayout;

/// Provider-specific positional-argument reordering (spec §4.10).
///
/// A handful of providers log `EventData` fields under names that don't
/// match the positional order their message-table format string expects.
/// Reordering here is purely name-driven: build a name→value lookup from
/// the layout (spec §4.8) and pick named fields in the order the format
/// string wants them, trying a short list of historically-observed aliases
/// per field since the exact attribute name has drifted across Windows
/// builds (spec §9 Open Questions).
///
/// Returns `None` when the provider/event id pair has no registered
/// reordering, or when the expected named fields aren't all present — the
/// caller should fall back to the layout's natural positional order.
pub fn reorder_args(provider_name: &str, event_id: u32, layout: &EventLayout) -> Option<Vec<String>> {
    if provider_name != "Microsoft-Windows-RestartManager" {
        return None;
    }

    let names: &[&[&str]] = match event_id {
        10000 => &[&["RmSessionId", "Session"], &["UTCStartTime", "Time", "StartTime"]],
        10001 => &[&["RmSessionId", "Session"], &["UTCStartTime", "StartTime", "Time"]],
        10010 => &[
            &["FullPath", "Application", "AppPath", "DisplayName"],
            &["Pid", "ProcessId"],
            &["Reason", "Message", "Status"],
        ],
        _ => return None,
    };

    let mut ordered = Vec::with_capacity(names.len());
    for candidates in names {
        ordered.push(layout.named_any(candidates)?.to_string());
    }
    Some(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{DataSource, LayoutField};

    fn layout_of(pairs: &[(&str, &str)]) -> EventLayout {
        EventLayout {
            source: DataSource::EventData,
            fields: pairs
                .iter()
                .map(|(n, v)| LayoutField {
                    name: Some(n.to_string()),
                    value: v.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn reorders_restart_manager_10010_by_name() {
        let layout = layout_of(&[
            ("FullPath", "C:\\x.exe"),
            ("Pid", "1234"),
            ("Reason", "Hang"),
        ]);
        let ordered = reorder_args("Microsoft-Windows-RestartManager", 10010, &layout).unwrap();
        assert_eq!(ordered, vec!["C:\\x.exe".to_string(), "1234".to_string(), "Hang".to_string()]);
    }

    #[test]
    fn accepts_alias_field_names() {
        let layout = layout_of(&[("Session", "s1"), ("StartTime", "t1")]);
        let ordered = reorder_args("Microsoft-Windows-RestartManager", 10000, &layout).unwrap();
        assert_eq!(ordered, vec!["s1".to_string(), "t1".to_string()]);
    }

    #[test]
    fn none_when_fields_missing() {
        let layout = layout_of(&[("Other", "v")]);
        assert!(reorder_args("Microsoft-Windows-RestartManager", 10010, &layout).is_none());
    }

    #[test]
    fn none_for_unrelated_provider() {
        let layout = layout_of(&[("FullPath", "x"), ("Pid", "1"), ("Reason", "r")]);
        assert!(reorder_args("Microsoft-Windows-Kernel-General", 10010, &layout).is_none());
    }
}
