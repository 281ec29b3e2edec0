use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cb_domain::event::CliEvent;
use cb_domain::{Error, Result};
use tokio::sync::Mutex;

use crate::format::format_event_lines;
use crate::render::{has_fenced_code_block, render_html};
use crate::sink::ChatSink;

/// Messages stay under ~3800 bytes so a Telegram edit never needs to split
/// what the platform itself would reject.
pub const MAX_MESSAGE_BYTES: usize = 3800;
const MAX_SEND_ATTEMPTS: u32 = 5;
const CONTINUATION_MARKER: &str = "[continued]\n";

struct TurnState {
    chat_id: String,
    message_id: String,
    lines: Vec<String>,
}

/// Live-edits one chat message per turn as events arrive, opening a
/// continuation message once the running text would exceed the per-message
/// cap. Holds no knowledge of the concrete chat platform beyond [`ChatSink`].
pub struct EventStreamer {
    sink: Arc<dyn ChatSink>,
    turns: Mutex<HashMap<String, TurnState>>,
}

impl EventStreamer {
    pub fn new(sink: Arc<dyn ChatSink>) -> Self {
        Self { sink, turns: Mutex::new(HashMap::new()) }
    }

    /// Appends one event's rendered line(s) to the turn's message, editing
    /// in place where it fits and opening a continuation message otherwise.
    pub async fn append_event(&self, turn_id: &str, chat_id: &str, event: &CliEvent) -> Result<()> {
        for line in format_event_lines(event, MAX_MESSAGE_BYTES) {
            self.append_line(turn_id, chat_id, line).await?;
        }
        Ok(())
    }

    async fn append_line(&self, turn_id: &str, chat_id: &str, line: String) -> Result<()> {
        let existing_lines = {
            let turns = self.turns.lock().await;
            turns.get(turn_id).map(|s| s.lines.clone())
        };

        match existing_lines {
            None => {
                let (rendered, html) = render_for_cap(&[line.clone()], MAX_MESSAGE_BYTES);
                let message_id = with_retry(|| self.sink.send_message(chat_id, &rendered, html)).await?;
                let mut turns = self.turns.lock().await;
                turns.insert(
                    turn_id.to_string(),
                    TurnState { chat_id: chat_id.to_string(), message_id, lines: vec![line] },
                );
                Ok(())
            }
            Some(mut lines) => {
                lines.push(line.clone());
                let (rendered, html) = render_for_cap(&lines, MAX_MESSAGE_BYTES);
                if rendered.len() <= MAX_MESSAGE_BYTES {
                    let (message_id, existing_chat_id) = {
                        let turns = self.turns.lock().await;
                        let state = turns.get(turn_id).expect("checked Some above");
                        (state.message_id.clone(), state.chat_id.clone())
                    };
                    with_retry(|| {
                        self.sink.edit_message_text(&existing_chat_id, &message_id, &rendered, html)
                    })
                    .await?;
                    let mut turns = self.turns.lock().await;
                    if let Some(state) = turns.get_mut(turn_id) {
                        state.lines = lines;
                    }
                    Ok(())
                } else {
                    let continued = vec![line.clone()];
                    let cap_after_marker = MAX_MESSAGE_BYTES.saturating_sub(CONTINUATION_MARKER.len());
                    let (rendered, html) = render_for_cap(&continued, cap_after_marker);
                    let with_marker = format!("{CONTINUATION_MARKER}{rendered}");
                    let message_id = with_retry(|| self.sink.send_message(chat_id, &with_marker, html)).await?;
                    let mut turns = self.turns.lock().await;
                    turns.insert(
                        turn_id.to_string(),
                        TurnState { chat_id: chat_id.to_string(), message_id, lines: continued },
                    );
                    Ok(())
                }
            }
        }
    }

    /// Discards per-turn state; the chat message itself is left as-is.
    pub async fn close_turn(&self, turn_id: &str) {
        self.turns.lock().await.remove(turn_id);
    }
}

/// Joins `lines` and picks HTML-with-code-rendering versus plain text: HTML
/// only if the text has a fenced code block AND the rendered form still
/// fits the cap, else plain (even if that means losing the code styling).
fn render_for_cap(lines: &[String], cap: usize) -> (String, bool) {
    let plain = lines.join("\n");
    if has_fenced_code_block(&plain) {
        let html = render_html(&plain);
        if html.len() <= cap {
            return (html, true);
        }
        tracing::debug!("HTML rendering exceeds cap, falling back to plain text");
    }
    (plain, false)
}

async fn with_retry<F, Fut, T>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(Error::RateLimit { retry_after_secs }) if attempt < MAX_SEND_ATTEMPTS => {
                tracing::debug!(attempt, retry_after_secs, "rate limited, retrying");
                tokio::time::sleep(Duration::from_secs_f64(retry_after_secs.max(0.0))).await;
            }
            Err(Error::ChatApi(ref message)) if attempt < MAX_SEND_ATTEMPTS => {
                let backoff = 0.5 * (attempt as f64 + 1.0);
                tracing::debug!(attempt, backoff, message, "transient chat API error, retrying");
                tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cb_domain::event::{CliEventKind, TurnOutcome};
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakeSink {
        next_id: AtomicU32,
        sent: StdMutex<Vec<(String, String, bool)>>,
        edits: StdMutex<Vec<(String, String, String, bool)>>,
        rate_limit_then_ok: AtomicUsize,
    }

    impl FakeSink {
        fn new() -> Self {
            Self {
                next_id: AtomicU32::new(1),
                sent: StdMutex::new(Vec::new()),
                edits: StdMutex::new(Vec::new()),
                rate_limit_then_ok: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatSink for FakeSink {
        async fn send_message(&self, chat_id: &str, text: &str, html: bool) -> Result<String> {
            if self.rate_limit_then_ok.load(Ordering::SeqCst) > 0 {
                self.rate_limit_then_ok.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::RateLimit { retry_after_secs: 0 });
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
            self.sent.lock().unwrap().push((chat_id.to_string(), text.to_string(), html));
            Ok(id)
        }

        async fn edit_message_text(
            &self,
            chat_id: &str,
            message_id: &str,
            text: &str,
            html: bool,
        ) -> Result<()> {
            self.edits
                .lock()
                .unwrap()
                .push((chat_id.to_string(), message_id.to_string(), text.to_string(), html));
            Ok(())
        }
    }

    fn event(seq: i64, kind: CliEventKind) -> CliEvent {
        CliEvent { seq, ts: chrono::Utc::now(), kind }
    }

    #[tokio::test]
    async fn first_event_sends_a_new_message() {
        let sink = Arc::new(FakeSink::new());
        let streamer = EventStreamer::new(sink.clone());
        streamer
            .append_event("t1", "c1", &event(1, CliEventKind::TurnStarted))
            .await
            .unwrap();
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_event_edits_the_same_message() {
        let sink = Arc::new(FakeSink::new());
        let streamer = EventStreamer::new(sink.clone());
        streamer
            .append_event("t1", "c1", &event(1, CliEventKind::TurnStarted))
            .await
            .unwrap();
        streamer
            .append_event(
                "t1",
                "c1",
                &event(2, CliEventKind::AssistantMessage { text: "hi".into() }),
            )
            .await
            .unwrap();
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
        assert_eq!(sink.edits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oversized_running_text_opens_a_continuation_message() {
        let sink = Arc::new(FakeSink::new());
        let streamer = EventStreamer::new(sink.clone());
        streamer
            .append_event(
                "t1",
                "c1",
                &event(1, CliEventKind::AssistantMessage { text: "x".repeat(3000) }),
            )
            .await
            .unwrap();
        streamer
            .append_event(
                "t1",
                "c1",
                &event(2, CliEventKind::AssistantMessage { text: "y".repeat(3000) }),
            )
            .await
            .unwrap();
        assert_eq!(sink.sent.lock().unwrap().len(), 2);
        let (_, second_text, _) = &sink.sent.lock().unwrap()[1];
        assert!(second_text.starts_with("[continued]\n"));
    }

    #[tokio::test]
    async fn rate_limited_send_is_retried_and_eventually_succeeds() {
        let sink = Arc::new(FakeSink::new());
        sink.rate_limit_then_ok.store(2, Ordering::SeqCst);
        let streamer = EventStreamer::new(sink.clone());
        streamer
            .append_event("t1", "c1", &event(1, CliEventKind::TurnStarted))
            .await
            .unwrap();
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn close_turn_drops_state_so_next_event_starts_a_new_message() {
        let sink = Arc::new(FakeSink::new());
        let streamer = EventStreamer::new(sink.clone());
        streamer
            .append_event("t1", "c1", &event(1, CliEventKind::TurnStarted))
            .await
            .unwrap();
        streamer.close_turn("t1").await;
        streamer
            .append_event(
                "t1",
                "c1",
                &event(1, CliEventKind::TurnCompleted { status: TurnOutcome::Success }),
            )
            .await
            .unwrap();
        assert_eq!(sink.sent.lock().unwrap().len(), 2);
    }
}
