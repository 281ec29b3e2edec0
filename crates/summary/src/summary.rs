const GOAL_DECISIONS_LINE_CAP: usize = 300;
const DOCUMENT_CAP: usize = 4000;
const TRUNCATED_MARKER: &str = "[truncated]";

/// Inputs the run worker gathers after a turn completes, fed into
/// `build_summary` to produce the session's new rolling summary document.
#[derive(Debug, Clone, Default)]
pub struct SummaryInputs<'a> {
    pub previous_summary: &'a str,
    pub user_text: &'a str,
    pub assistant_text: &'a str,
    pub command_notes: &'a [String],
    pub error_text: Option<&'a str>,
}

/// Builds the fixed-section markdown rolling summary: `## Previous Summary`,
/// `## Goal`, `## Decisions`, `## Constraints`, `## Open Issues`,
/// `## Key Artifacts`. Pure function — no I/O, no randomness.
pub fn build_summary(inputs: &SummaryInputs<'_>) -> String {
    let previous = truncate_line(inputs.previous_summary);
    let goal = truncate_line(inputs.user_text);
    let decisions = truncate_line(inputs.assistant_text);
    let constraints = if inputs.command_notes.is_empty() {
        "(none)".to_string()
    } else {
        inputs
            .command_notes
            .iter()
            .map(|n| format!("- {}", truncate_line(n)))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let open_issues = match inputs.error_text {
        Some(err) if !err.is_empty() => format!("- {}", truncate_line(err)),
        _ => "(none)".to_string(),
    };
    let artifacts = extract_artifact_mentions(inputs.assistant_text);

    let doc = format!(
        "## Previous Summary\n{previous}\n\n\
         ## Goal\n{goal}\n\n\
         ## Decisions\n- {decisions}\n\n\
         ## Constraints\n{constraints}\n\n\
         ## Open Issues\n{open_issues}\n\n\
         ## Key Artifacts\n{artifacts}"
    );

    truncate_document(&doc)
}

fn truncate_line(text: &str) -> String {
    if text.chars().count() <= GOAL_DECISIONS_LINE_CAP {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(GOAL_DECISIONS_LINE_CAP).collect();
        format!("{truncated}{TRUNCATED_MARKER}")
    }
}

fn truncate_document(doc: &str) -> String {
    if doc.chars().count() <= DOCUMENT_CAP {
        doc.to_string()
    } else {
        let keep = DOCUMENT_CAP.saturating_sub(TRUNCATED_MARKER.len());
        let truncated: String = doc.chars().take(keep).collect();
        format!("{truncated}{TRUNCATED_MARKER}")
    }
}

fn extract_artifact_mentions(assistant_text: &str) -> String {
    let mentions: Vec<&str> = assistant_text
        .split_whitespace()
        .filter(|w| {
            let w = w.trim_matches(|c: char| matches!(c, '(' | ')' | '"' | '\'' | '.' | ','));
            w.starts_with("./") || w.starts_with('/') && w.contains('.')
        })
        .collect();
    if mentions.is_empty() {
        "(none)".to_string()
    } else {
        mentions
            .iter()
            .map(|m| format!("- {m}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// `"" if empty else "[Session Memory Summary]\n" + trimmed summary`.
/// Fed to the adapter as the turn's `preamble`.
pub fn build_recovery_preamble(summary: &str) -> String {
    if summary.trim().is_empty() {
        String::new()
    } else {
        format!("[Session Memory Summary]\n{summary}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_all_fixed_sections() {
        let inputs = SummaryInputs {
            previous_summary: "",
            user_text: "build a widget",
            assistant_text: "done, see ./out/widget.png",
            command_notes: &["ran cargo build".to_string()],
            error_text: None,
        };
        let doc = build_summary(&inputs);
        assert!(doc.contains("## Previous Summary"));
        assert!(doc.contains("## Goal"));
        assert!(doc.contains("## Decisions"));
        assert!(doc.contains("## Constraints"));
        assert!(doc.contains("## Open Issues"));
        assert!(doc.contains("## Key Artifacts"));
        assert!(doc.contains("./out/widget.png"));
    }

    #[test]
    fn long_goal_line_is_truncated_with_marker() {
        let long = "x".repeat(500);
        let inputs = SummaryInputs {
            user_text: &long,
            ..Default::default()
        };
        let doc = build_summary(&inputs);
        assert!(doc.contains(TRUNCATED_MARKER));
    }

    #[test]
    fn whole_document_is_capped_at_4000_chars() {
        let huge = "y".repeat(10_000);
        let inputs = SummaryInputs {
            previous_summary: &huge,
            ..Default::default()
        };
        let doc = build_summary(&inputs);
        assert!(doc.chars().count() <= DOCUMENT_CAP);
        assert!(doc.ends_with(TRUNCATED_MARKER));
    }

    #[test]
    fn empty_summary_produces_empty_preamble() {
        assert_eq!(build_recovery_preamble(""), "");
        assert_eq!(build_recovery_preamble("   "), "");
    }

    #[test]
    fn nonempty_summary_is_wrapped_with_header() {
        let preamble = build_recovery_preamble("## Goal\nfoo");
        assert!(preamble.starts_with("[Session Memory Summary]\n"));
        assert!(preamble.contains("## Goal"));
    }

    #[test]
    fn error_text_populates_open_issues() {
        let inputs = SummaryInputs {
            error_text: Some("disk full"),
            ..Default::default()
        };
        let doc = build_summary(&inputs);
        assert!(doc.contains("disk full"));
    }
}
