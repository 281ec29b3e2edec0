use regex::Regex;
use std::sync::OnceLock;

use cb_domain::model::{Session, Turn};

const MAX_REFERENCE_URLS: usize = 6;

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s]+").expect("static regex"))
}

/// Asks the agent to summarize progress so far and state what remains.
pub fn build_summary_prompt(session: &Session, _origin_turn: &Turn, _latest: Option<&Turn>) -> String {
    format!(
        "Summarize progress so far on this task and state clearly what remains to be done. \
         Current project: {}.",
        session.project_root.as_deref().unwrap_or("(none set)")
    )
}

/// Asks the agent to retry the origin turn's request, incorporating
/// anything learned since.
pub fn build_regen_prompt(_session: &Session, origin_turn: &Turn, _latest: Option<&Turn>) -> String {
    format!(
        "Please retry the following request, incorporating anything you've learned since \
         then:\n\n{}",
        origin_turn.user_text
    )
}

/// Asks the agent to propose the next actionable step, referencing up to
/// 6 deduplicated URLs pulled out of the latest completed turn's assistant
/// text.
pub fn build_next_prompt(_session: &Session, _origin_turn: &Turn, latest: Option<&Turn>) -> String {
    let mut prompt =
        "Propose the next actionable step to move this task forward.".to_string();

    let Some(latest) = latest else {
        return prompt;
    };
    let Some(assistant_text) = latest.assistant_text.as_deref() else {
        return prompt;
    };

    let urls = extract_urls(assistant_text);
    if !urls.is_empty() {
        prompt.push_str("\n\nReference links from the previous turn:\n");
        for url in urls {
            prompt.push_str("- ");
            prompt.push_str(&url);
            prompt.push('\n');
        }
    }
    prompt
}

/// Scans for `https?://` URLs, strips trailing punctuation, deduplicates,
/// and caps the result at `MAX_REFERENCE_URLS`.
fn extract_urls(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut urls = Vec::new();
    for m in url_regex().find_iter(text) {
        let cleaned = m
            .as_str()
            .trim_end_matches(|c: char| matches!(c, '.' | ',' | ')' | ']' | '"' | '\''))
            .to_string();
        if seen.insert(cleaned.clone()) {
            urls.push(cleaned);
            if urls.len() >= MAX_REFERENCE_URLS {
                break;
            }
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_domain::model::{SessionStatus, TurnStatus};

    fn session() -> Session {
        Session {
            session_id: "s1".into(),
            bot_id: "bot1".into(),
            chat_id: "chat1".into(),
            adapter_name: "codex".into(),
            adapter_model: None,
            project_root: Some("/work".into()),
            unsafe_until: None,
            adapter_thread_id: None,
            status: SessionStatus::Active,
            rolling_summary_md: String::new(),
            last_turn_at: None,
        }
    }

    fn turn(text: &str, assistant_text: Option<&str>) -> Turn {
        Turn {
            turn_id: "t1".into(),
            session_id: "s1".into(),
            bot_id: "bot1".into(),
            chat_id: "chat1".into(),
            user_text: text.into(),
            assistant_text: assistant_text.map(|s| s.to_string()),
            status: TurnStatus::Completed,
            error_text: None,
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn summary_prompt_mentions_project_root() {
        let prompt = build_summary_prompt(&session(), &turn("x", None), None);
        assert!(prompt.contains("/work"));
    }

    #[test]
    fn regen_prompt_echoes_origin_text() {
        let origin = turn("build a widget", None);
        let prompt = build_regen_prompt(&session(), &origin, None);
        assert!(prompt.contains("build a widget"));
    }

    #[test]
    fn next_prompt_extracts_deduplicated_urls_capped_at_six() {
        let text = (0..8)
            .map(|i| format!("https://example.com/{i}/"))
            .collect::<Vec<_>>()
            .join(" and ");
        let latest = turn("x", Some(&text));
        let prompt = build_next_prompt(&session(), &turn("x", None), Some(&latest));
        let count = prompt.matches("https://example.com").count();
        assert_eq!(count, MAX_REFERENCE_URLS);
    }

    #[test]
    fn next_prompt_strips_trailing_punctuation() {
        let latest = turn("x", Some("see https://example.com/page."));
        let prompt = build_next_prompt(&session(), &turn("x", None), Some(&latest));
        assert!(prompt.contains("https://example.com/page\n") || prompt.ends_with("https://example.com/page"));
        assert!(!prompt.contains("page.\n"));
    }

    #[test]
    fn next_prompt_with_no_latest_turn_has_no_links_section() {
        let prompt = build_next_prompt(&session(), &turn("x", None), None);
        assert!(!prompt.contains("Reference links"));
    }
}
