use cb_domain::event::{CliEvent, CliEventKind};

/// `[<seq>][<hh:mm:ss UTC>][<type>] <body>`, chunked with a trailing
/// `(n/m)` label if the body alone would blow the per-message cap.
pub fn format_event_lines(event: &CliEvent, cap: usize) -> Vec<String> {
    let prefix = format!(
        "[{}][{}][{}] ",
        event.seq,
        event.ts.format("%H:%M:%S UTC"),
        event.kind.type_name()
    );
    let body = body_for_event(&event.kind);
    let body_cap = cap.saturating_sub(prefix.len());
    chunk_body(&body, body_cap.max(1))
        .into_iter()
        .map(|chunk| format!("{prefix}{chunk}"))
        .collect()
}

fn body_for_event(kind: &CliEventKind) -> String {
    match kind {
        CliEventKind::ThreadStarted { thread_id } => format!("thread {thread_id}"),
        CliEventKind::TurnStarted => "turn started".to_string(),
        CliEventKind::AssistantMessage { text } => text.clone(),
        CliEventKind::Reasoning { text, raw } => text.clone().unwrap_or_else(|| {
            raw.as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "(reasoning)".to_string())
        }),
        CliEventKind::CommandStarted { command } => format!("$ {command}"),
        CliEventKind::CommandCompleted {
            command,
            exit_code,
            aggregated_output,
        } => {
            let rc = exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "?".to_string());
            match aggregated_output {
                Some(out) if !out.is_empty() => format!("$ {command} (exit {rc})\n{out}"),
                _ => format!("$ {command} (exit {rc})"),
            }
        }
        CliEventKind::TurnCompleted { status } => format!("turn {}", status.as_str()),
        CliEventKind::Error { message, detail } => match detail {
            Some(d) => format!("{message} ({d})"),
            None => message.clone(),
        },
        CliEventKind::DeliveryError { message } => format!("delivery error: {message}"),
    }
}

/// Splits an oversized body into pieces labelled `(n/m)`, reserving enough
/// room in each piece for the worst-case label width.
fn chunk_body(body: &str, cap: usize) -> Vec<String> {
    if body.len() <= cap {
        return vec![body.to_string()];
    }
    const LABEL_RESERVE: usize = 10;
    let piece_cap = cap.saturating_sub(LABEL_RESERVE).max(1);
    let chars: Vec<char> = body.chars().collect();
    let total = chars.len().div_ceil(piece_cap);
    chars
        .chunks(piece_cap)
        .enumerate()
        .map(|(i, chunk)| {
            let piece: String = chunk.iter().collect();
            format!("{piece} ({}/{total})", i + 1)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(kind: CliEventKind) -> CliEvent {
        CliEvent { seq: 1, ts: Utc::now(), kind }
    }

    #[test]
    fn formats_a_single_short_line() {
        let lines = format_event_lines(
            &event(CliEventKind::AssistantMessage { text: "hello".into() }),
            3800,
        );
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("[assistant_message] hello"));
    }

    #[test]
    fn oversized_body_is_split_into_labelled_chunks() {
        let long = "x".repeat(9000);
        let lines = format_event_lines(&event(CliEventKind::AssistantMessage { text: long }), 3800);
        assert!(lines.len() > 1);
        assert!(lines[0].contains(&format!("(1/{})", lines.len())));
        assert!(lines.last().unwrap().contains(&format!("({}/{})", lines.len(), lines.len())));
    }

    #[test]
    fn command_completed_includes_exit_code_and_output() {
        let lines = format_event_lines(
            &event(CliEventKind::CommandCompleted {
                command: "ls".into(),
                exit_code: Some(0),
                aggregated_output: Some("a.txt".into()),
            }),
            3800,
        );
        assert!(lines[0].contains("$ ls (exit 0)"));
        assert!(lines[0].contains("a.txt"));
    }
}
