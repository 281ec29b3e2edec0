use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cb_adapters::{AdapterRegistry, CancelFlag, RunRequest};
use cb_domain::config::BotConfig;
use cb_domain::event::{CliEvent, CliEventKind, TurnOutcome};
use cb_domain::model::now_ms;
use cb_domain::trace::TraceEvent;
use cb_domain::{Error, Result};
use cb_sessions::SessionService;
use cb_store::Store;
use cb_streamer::EventStreamer;
use cb_summary::{build_recovery_preamble, build_summary, SummaryInputs};
use futures_util::StreamExt;

use crate::model_presets::resolve_selected_model;
use crate::telegram::TelegramClient;

const LEASE_MS: i64 = 60_000;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Keyword hints that make the run worker nudge the adapter toward writing
/// a file to disk instead of inlining an image or HTML page.
const ARTIFACT_HINTS: &[&str] = &["image", "diagram", "picture", "html page", "webpage", "screenshot"];
const ARTIFACT_INSTRUCTION: &str = "\n\nIf you produce an image or an HTML page, write it to a file under the project root rather than inlining it.";
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];
const DOCUMENT_EXTENSIONS: &[&str] = &["html", "htm", "pdf", "txt", "md"];

pub struct RunWorker {
    store: Store,
    sessions: SessionService,
    adapters: Arc<AdapterRegistry>,
    streamer: Arc<EventStreamer>,
    telegram: Arc<TelegramClient>,
    bot_config: BotConfig,
}

impl RunWorker {
    pub fn new(
        store: Store,
        sessions: SessionService,
        adapters: Arc<AdapterRegistry>,
        streamer: Arc<EventStreamer>,
        telegram: Arc<TelegramClient>,
        bot_config: BotConfig,
    ) -> Self {
        Self { store, sessions, adapters, streamer, telegram, bot_config }
    }

    pub async fn run(&self) {
        let owner = format!("run-{}", uuid::Uuid::new_v4());
        let mut last_heartbeat = std::time::Instant::now();

        loop {
            if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                if let Err(e) = self.store.increment_metric(&self.bot_config.bot_id, "worker_heartbeat.run_worker", 1, now_ms()).await {
                    tracing::warn!(bot_id = %self.bot_config.bot_id, error = %e, "heartbeat failed");
                }
                last_heartbeat = std::time::Instant::now();
            }

            let leased = match self.store.lease_next_run_job(&self.bot_config.bot_id, &owner, now_ms(), LEASE_MS).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(bot_id = %self.bot_config.bot_id, error = %e, "lease_next_run_job failed");
                    tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                    continue;
                }
            };

            let renew_store = self.store.clone();
            let renew_owner = owner.clone();
            let renew_job_id = leased.id.clone();
            let renewal = tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis((LEASE_MS / 2) as u64)).await;
                    if renew_store.renew_run_lease(&renew_job_id, &renew_owner, now_ms(), LEASE_MS).await.unwrap_or(false) {
                        continue;
                    }
                    break;
                }
            });

            if let Err(e) = self.process(&leased.id, &leased.turn_id, &leased.chat_id).await {
                tracing::warn!(turn_id = %leased.turn_id, error = %e, "run job failed");
                let _ = self.store.fail_run(&leased.id, &leased.turn_id, &e.to_string(), now_ms()).await;
            }

            renewal.abort();

            if let Ok(Some(promoted)) = self.store.promote_next(&self.bot_config.bot_id, &leased.chat_id, now_ms()).await {
                TraceEvent::DeferredActionPromoted {
                    chat_id: leased.chat_id.clone(),
                    action_type: promoted.action_type.as_str().to_string(),
                    turn_id: promoted.turn_id,
                }
                .emit();
            }
        }
    }

    async fn process(&self, job_id: &str, turn_id: &str, chat_id: &str) -> Result<()> {
        let started = now_ms();
        let turn = self.store.get_turn(turn_id).await?.ok_or_else(|| Error::Store(format!("turn {turn_id} not found")))?;
        let session = self.store.get_session(&turn.session_id).await?.ok_or_else(|| Error::Store(format!("session {} not found", turn.session_id)))?;

        self.store.mark_in_flight(job_id, turn_id, started).await?;

        let preamble = build_recovery_preamble(&session.rolling_summary_md);
        let adapter = self
            .adapters
            .get(&session.adapter_name)
            .ok_or_else(|| Error::AdapterSpawn { provider: session.adapter_name.clone(), message: "unknown adapter".to_string() })?;

        let model = resolve_selected_model(&session.adapter_name, session.adapter_model.as_deref(), &self.bot_config);
        let sandbox = if session.adapter_name == "codex" {
            if session.unsafe_until.map(|until| until > now_ms()).unwrap_or(false) { "danger-full-access".to_string() } else { "workspace-write".to_string() }
        } else {
            String::new()
        };
        let prompt = augment_prompt_for_artifacts(&turn.user_text);

        let req = RunRequest { prompt, model, sandbox, preamble };

        let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
        let monitor_done = Arc::new(AtomicBool::new(false));
        let monitor = {
            let store = self.store.clone();
            let cancel = cancel.clone();
            let monitor_done = monitor_done.clone();
            let turn_id = turn_id.to_string();
            tokio::spawn(async move {
                while !monitor_done.load(Ordering::Relaxed) {
                    tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
                    if store.is_turn_cancelled(&turn_id).await.unwrap_or(false) {
                        cancel.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            })
        };

        let resumed = session.adapter_thread_id.is_some();
        TraceEvent::AdapterSpawned { provider: session.adapter_name.clone(), bot_id: self.bot_config.bot_id.clone(), turn_id: turn_id.to_string(), resumed }.emit();

        let mut stream = if let Some(thread_id) = &session.adapter_thread_id {
            adapter.run_resume(thread_id, req, cancel.clone()).await?
        } else {
            adapter.run_new(req, cancel.clone()).await?
        };

        let mut seq = self.store.get_turn_events_count(turn_id).await?;
        let mut assistant_parts: Vec<String> = Vec::new();
        let mut command_notes: Vec<String> = Vec::new();
        let mut error_text: Option<String> = None;
        let mut outcome = TurnOutcome::Success;

        while let Some(event) = stream.next().await {
            let kind = match event {
                Ok(ev) => ev.kind,
                Err(e) => CliEventKind::Error { message: e.to_string(), detail: None },
            };

            seq += 1;
            let event = CliEvent::now(seq, kind.clone());
            let payload_json = serde_json::to_string(&event.kind)?;
            self.store.append_event(turn_id, &self.bot_config.bot_id, seq, event.kind.type_name(), &payload_json, now_ms()).await?;
            TraceEvent::EventPersisted { turn_id: turn_id.to_string(), seq, event_type: event.kind.type_name().to_string() }.emit();

            if let Some(thread_id) = adapter.extract_thread_id(&event.kind) {
                self.sessions.set_thread_id(&session.session_id, &thread_id).await?;
            }

            match &event.kind {
                CliEventKind::AssistantMessage { text } => assistant_parts.push(text.clone()),
                CliEventKind::CommandCompleted { command, exit_code, .. } => {
                    command_notes.push(format!("{command} (exit {})", exit_code.unwrap_or(-1)));
                }
                CliEventKind::TurnCompleted { status } => outcome = *status,
                CliEventKind::Error { message, .. } => error_text = Some(message.clone()),
                _ => {}
            }

            if let Err(e) = self.streamer.append_event(turn_id, chat_id, &event).await {
                TraceEvent::DeliveryError { chat_id: chat_id.to_string(), method: "append_event", message: e.to_string() }.emit();
                seq += 1;
                let delivery_event = CliEvent::now(seq, CliEventKind::DeliveryError { message: e.to_string() });
                let payload_json = serde_json::to_string(&delivery_event.kind)?;
                self.store.append_event(turn_id, &self.bot_config.bot_id, seq, delivery_event.kind.type_name(), &payload_json, now_ms()).await?;
            }
        }

        monitor_done.store(true, Ordering::Relaxed);
        monitor.abort();
        self.streamer.close_turn(turn_id).await;

        TraceEvent::AdapterExited { provider: session.adapter_name.clone(), turn_id: turn_id.to_string(), exit_code: None }.emit();

        let assistant_text = assistant_parts.join("\n");
        let now = now_ms();
        match outcome {
            TurnOutcome::Cancelled => {
                self.store.cancel_run(job_id, turn_id, now).await?;
            }
            TurnOutcome::Error => {
                self.store.fail_run(job_id, turn_id, error_text.as_deref().unwrap_or("turn failed"), now).await?;
            }
            TurnOutcome::Success => {
                self.store.complete_run(job_id, turn_id, &assistant_text, now).await?;
                if let Some(root) = &session.project_root {
                    self.deliver_artifacts(chat_id, root, started).await;
                }
            }
        }
        TraceEvent::TurnCompleted { turn_id: turn_id.to_string(), status: outcome.as_str(), duration_ms: (now - started).max(0) as u64 }.emit();

        let summary_inputs = SummaryInputs {
            previous_summary: &session.rolling_summary_md,
            user_text: &turn.user_text,
            assistant_text: &assistant_text,
            command_notes: &command_notes,
            error_text: error_text.as_deref(),
        };
        let summary_md = build_summary(&summary_inputs);
        self.store.update_summary(&session.session_id, turn_id, &summary_md, now).await?;
        TraceEvent::SummaryBuilt { session_id: session.session_id.clone(), chars: summary_md.chars().count(), truncated: summary_md.ends_with("[truncated]") }.emit();

        Ok(())
    }

    /// Best-effort scan of the project root for image/document files
    /// modified since the turn started, delivered once each via Telegram.
    async fn deliver_artifacts(&self, chat_id: &str, project_root: &str, started_at_ms: i64) {
        let Ok(chat_id_num) = chat_id.parse::<i64>() else { return };
        let Ok(mut entries) = tokio::fs::read_dir(project_root).await else { return };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else { continue };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else { continue };
            let modified_ms = modified.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0);
            if modified_ms < started_at_ms {
                continue;
            }

            let Some(ext) = path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()) else { continue };
            let result = if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                self.telegram.send_photo(chat_id_num, &path).await.map(|_| "photo")
            } else if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
                self.telegram.send_document(chat_id_num, &path).await.map(|_| "document")
            } else {
                continue;
            };

            match result {
                Ok(kind) => {
                    TraceEvent::ArtifactDelivered { chat_id: chat_id.to_string(), kind, path: path_display(&path) }.emit();
                }
                Err(e) => {
                    TraceEvent::DeliveryError { chat_id: chat_id.to_string(), method: "send_artifact", message: e.to_string() }.emit();
                }
            }
        }
    }
}

fn augment_prompt_for_artifacts(user_text: &str) -> String {
    let lower = user_text.to_lowercase();
    if ARTIFACT_HINTS.iter().any(|hint| lower.contains(hint)) {
        format!("{user_text}{ARTIFACT_INSTRUCTION}")
    } else {
        user_text.to_string()
    }
}

fn path_display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn augments_prompt_when_an_artifact_hint_is_present() {
        let out = augment_prompt_for_artifacts("draw me a diagram of the pipeline");
        assert!(out.contains(ARTIFACT_INSTRUCTION));
    }

    #[test]
    fn leaves_ordinary_prompts_unmodified() {
        let out = augment_prompt_for_artifacts("what's 2 + 2?");
        assert_eq!(out, "what's 2 + 2?");
    }
}
