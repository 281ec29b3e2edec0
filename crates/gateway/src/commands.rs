use cb_adapters::{AdapterRegistry, SUPPORTED_CLI_PROVIDERS};
use cb_domain::config::BotConfig;
use cb_domain::model::{now_ms, ActionType, CreateTurnResult, IncomingUpdate};
use cb_domain::trace::TraceEvent;
use cb_domain::Result;
use cb_sessions::SessionService;
use cb_store::Store;
use std::sync::Arc;

use crate::action_tokens;
use crate::model_presets;
use crate::telegram::ReplySink;
use crate::youtube::YoutubeSearch;

const MAX_DEFERRED_QUEUE: i64 = 10;
const MAX_SUMMARY_CHARS: usize = 3500;

const HELP_TEXT: &str = "\
Commands:
/new - start a fresh session
/status - show session status
/reset - end the active session
/summary - show the rolling summary
/mode <codex|gemini|claude> - switch provider
/model <name> - set the model for the current provider
/project <dir> - set the session's project root
/unsafe on [minutes] | off - toggle unsafe mode
/providers - list providers and whether their CLI is installed
/stop - cancel the active run
/echo <text> - echo text back
/youtube <query>, /yt <query> - search YouTube
/help - show this text";

const YOUTUBE_VERB_HINTS: &[&str] = &["find", "search", "show me", "look up", "look for"];
const YOUTUBE_PLATFORM_HINTS: &[&str] = &["video", "videos", "youtube", "유튜브"];

pub struct CommandHandler {
    store: Store,
    sessions: SessionService,
    adapters: Arc<AdapterRegistry>,
    reply: Arc<dyn ReplySink>,
    youtube: Arc<dyn YoutubeSearch>,
    bot_config: BotConfig,
}

impl CommandHandler {
    pub fn new(
        store: Store,
        sessions: SessionService,
        adapters: Arc<AdapterRegistry>,
        reply: Arc<dyn ReplySink>,
        youtube: Arc<dyn YoutubeSearch>,
        bot_config: BotConfig,
    ) -> Self {
        Self { store, sessions, adapters, reply, youtube, bot_config }
    }

    pub async fn handle(&self, update: &IncomingUpdate) -> Result<()> {
        let chat_id = update.chat_id.to_string();

        if let Some(owner) = self.bot_config.owner_user_id {
            if update.user_id != owner {
                return self.deny(update, &chat_id).await;
            }
        }

        if let Some(callback_data) = update.callback_data.clone() {
            return self.handle_callback(update, &chat_id, &callback_data).await;
        }

        let Some(text) = update.text.as_deref() else {
            return Ok(());
        };
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        if let Some(query) = detect_youtube_intent(text) {
            return self.handle_youtube(&chat_id, &query).await;
        }

        if let Some(rest) = text.strip_prefix('/') {
            return self.handle_slash_command(&chat_id, rest).await;
        }

        self.handle_free_text(&chat_id, text).await
    }

    async fn deny(&self, update: &IncomingUpdate, chat_id: &str) -> Result<()> {
        if let Some(callback_query_id) = &update.callback_query_id {
            self.reply.ack_callback(callback_query_id, Some("Access denied")).await?;
        } else {
            self.reply.send(chat_id, "Access denied", &[]).await?;
        }
        Ok(())
    }

    // ---- Callback dispatch -------------------------------------------------

    async fn handle_callback(
        &self,
        update: &IncomingUpdate,
        chat_id: &str,
        callback_data: &str,
    ) -> Result<()> {
        let callback_query_id = update.callback_query_id.as_deref().unwrap_or_default();

        if callback_data == "stop_run" {
            let cancelled = self.store.cancel_active_turn(&self.bot_config.bot_id, chat_id, now_ms()).await?;
            let text = if cancelled { "Stopping..." } else { "No active run" };
            self.reply.ack_callback(callback_query_id, Some(text)).await?;
            return Ok(());
        }

        let Some(token) = action_tokens::token_from_callback_data(callback_data) else {
            self.reply.ack_callback(callback_query_id, Some("Unknown action")).await?;
            return Ok(());
        };

        let Some(payload) = self.store.consume_token(token, &self.bot_config.bot_id, chat_id, now_ms()).await? else {
            self.reply.ack_callback(callback_query_id, Some("Action expired")).await?;
            return Ok(());
        };
        TraceEvent::ActionTokenConsumed {
            token_id: token.to_string(),
            action_type: payload.action_type.clone(),
        }
        .emit();

        if payload.action_type == "stop" || payload.run_source == "direct_cancel" {
            let cancelled = self.store.cancel_active_turn(&self.bot_config.bot_id, chat_id, now_ms()).await?;
            let text = if cancelled { "Stopping..." } else { "No active run" };
            self.reply.ack_callback(callback_query_id, Some(text)).await?;
            return Ok(());
        }

        let Some(action_type) = ActionType::from_str(&payload.action_type) else {
            self.reply.ack_callback(callback_query_id, Some("Unknown action")).await?;
            return Ok(());
        };

        let Some(session) = self.store.get_session(&payload.session_id).await? else {
            self.reply.ack_callback(callback_query_id, Some("Session not found")).await?;
            return Ok(());
        };
        let Some(origin_turn) = self.store.get_turn(&payload.origin_turn_id).await? else {
            self.reply.ack_callback(callback_query_id, Some("Origin turn not found")).await?;
            return Ok(());
        };

        let prompt = match action_type {
            ActionType::Summary => cb_summary::build_summary_prompt(&session, &origin_turn, Some(&origin_turn)),
            ActionType::Regen => cb_summary::build_regen_prompt(&session, &origin_turn, Some(&origin_turn)),
            ActionType::Next => cb_summary::build_next_prompt(&session, &origin_turn, Some(&origin_turn)),
            ActionType::Stop => unreachable!("stop handled above"),
        };

        if self.store.has_active_run(&self.bot_config.bot_id, chat_id).await? {
            self.store
                .enqueue_deferred(
                    &self.bot_config.bot_id,
                    chat_id,
                    &payload.session_id,
                    action_type.as_str(),
                    &prompt,
                    &payload.origin_turn_id,
                    MAX_DEFERRED_QUEUE,
                    now_ms(),
                )
                .await?;
            let depth = self
                .store
                .queue_depth(&self.bot_config.bot_id, "deferred_button_actions", &["queued"])
                .await?;
            TraceEvent::DeferredActionEnqueued {
                chat_id: chat_id.to_string(),
                action_type: action_type.as_str().to_string(),
                queue_depth: depth.max(0) as usize,
            }
            .emit();
            self.reply.ack_callback(callback_query_id, Some("Queued behind the active run")).await?;
            return Ok(());
        }

        match self.store.create_turn_and_job(&session, &prompt, now_ms()).await? {
            CreateTurnResult::Ok { turn_id } => {
                TraceEvent::TurnCreated { bot_id: self.bot_config.bot_id.clone(), chat_id: chat_id.to_string(), turn_id }
                    .emit();
                self.reply.ack_callback(callback_query_id, Some("Queued")).await?;
            }
            CreateTurnResult::ActiveRunExists => {
                self.reply.ack_callback(callback_query_id, Some("A run is already active")).await?;
            }
        }
        Ok(())
    }

    // ---- YouTube NL intent --------------------------------------------------

    async fn handle_youtube(&self, chat_id: &str, query: &str) -> Result<()> {
        match self.youtube.search(query).await? {
            Some(url) => self.reply.send(chat_id, &url, &[]).await,
            None => self.reply.send(chat_id, "No results found.", &[]).await,
        }
    }

    // ---- Slash commands ------------------------------------------------------

    async fn handle_slash_command(&self, chat_id: &str, rest: &str) -> Result<()> {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let cmd = parts.next().unwrap_or_default().to_lowercase();
        let arg = parts.next().unwrap_or_default().trim();

        match cmd.as_str() {
            "start" | "help" => self.reply.send(chat_id, HELP_TEXT, &[]).await,
            "new" => self.cmd_new(chat_id).await,
            "status" => self.cmd_status(chat_id).await,
            "reset" => self.cmd_reset(chat_id).await,
            "summary" => self.cmd_summary(chat_id).await,
            "mode" => self.cmd_mode(chat_id, arg).await,
            "model" => self.cmd_model(chat_id, arg).await,
            "project" => self.cmd_project(chat_id, arg).await,
            "unsafe" => self.cmd_unsafe(chat_id, arg).await,
            "providers" => self.cmd_providers(chat_id).await,
            "stop" => self.cmd_stop(chat_id).await,
            "echo" => self.reply.send(chat_id, arg, &[]).await,
            "youtube" | "yt" => self.handle_youtube(chat_id, arg).await,
            _ => self.reply.send(chat_id, HELP_TEXT, &[]).await,
        }
    }

    async fn cmd_new(&self, chat_id: &str) -> Result<()> {
        let session = self.sessions.create_new(&self.bot_config.bot_id, chat_id, &self.bot_config.adapter).await?;
        self.reply
            .send(chat_id, &format!("New session: {}", session.session_id), &[])
            .await
    }

    async fn cmd_status(&self, chat_id: &str) -> Result<()> {
        let Some(session) = self.sessions.get_active(&self.bot_config.bot_id, chat_id).await? else {
            return self.reply.send(chat_id, "No active session. Send a message to start one.", &[]).await;
        };
        let model = model_presets::resolve_selected_model(
            &session.adapter_name,
            session.adapter_model.as_deref(),
            &self.bot_config,
        );
        let preview = truncate(&session.rolling_summary_md, 200);
        let text = format!(
            "adapter: {}\nmodel: {}\nproject: {}\nunsafe_until: {}\nsession: {}\nthread: {}\nsummary: {}",
            session.adapter_name,
            model,
            session.project_root.as_deref().unwrap_or("(none)"),
            session.unsafe_until.map(|t| t.to_string()).unwrap_or_else(|| "off".to_string()),
            session.session_id,
            session.adapter_thread_id.as_deref().unwrap_or("(none)"),
            if preview.is_empty() { "(empty)".to_string() } else { preview },
        );
        self.reply.send(chat_id, &text, &[]).await
    }

    async fn cmd_reset(&self, chat_id: &str) -> Result<()> {
        self.sessions.reset(&self.bot_config.bot_id, chat_id).await?;
        let session = self.sessions.create_new(&self.bot_config.bot_id, chat_id, &self.bot_config.adapter).await?;
        self.reply
            .send(chat_id, &format!("Session reset. New session: {}", session.session_id), &[])
            .await
    }

    async fn cmd_summary(&self, chat_id: &str) -> Result<()> {
        let Some(session) = self.sessions.get_active(&self.bot_config.bot_id, chat_id).await? else {
            return self.reply.send(chat_id, "No active session.", &[]).await;
        };
        let text = if session.rolling_summary_md.is_empty() {
            "No summary yet.".to_string()
        } else {
            truncate(&session.rolling_summary_md, MAX_SUMMARY_CHARS)
        };
        self.reply.send(chat_id, &text, &[]).await
    }

    async fn cmd_mode(&self, chat_id: &str, arg: &str) -> Result<()> {
        if !SUPPORTED_CLI_PROVIDERS.contains(&arg) {
            return self
                .reply
                .send(chat_id, &format!("Unknown provider. Choose one of: {}", SUPPORTED_CLI_PROVIDERS.join(", ")), &[])
                .await;
        }
        let session = self.sessions.get_or_create_active(&self.bot_config.bot_id, chat_id, &self.bot_config.adapter).await?;
        if self.store.has_active_run(&self.bot_config.bot_id, chat_id).await? {
            return self.reply.send(chat_id, "A run is already active. Use /stop first.", &[]).await;
        }
        self.sessions.set_adapter(&session.session_id, arg).await?;
        self.reply.send(chat_id, &format!("Switched to {arg}"), &[]).await
    }

    async fn cmd_model(&self, chat_id: &str, arg: &str) -> Result<()> {
        let session = self.sessions.get_or_create_active(&self.bot_config.bot_id, chat_id, &self.bot_config.adapter).await?;
        if !model_presets::is_allowed_model(&session.adapter_name, arg) {
            return self.reply.send(chat_id, &format!("Unsupported model for {}", session.adapter_name), &[]).await;
        }
        if self.store.has_active_run(&self.bot_config.bot_id, chat_id).await? {
            return self.reply.send(chat_id, "A run is already active. Use /stop first.", &[]).await;
        }
        self.sessions.set_model(&session.session_id, arg).await?;
        self.reply.send(chat_id, &format!("Model set to {arg}"), &[]).await
    }

    async fn cmd_project(&self, chat_id: &str, arg: &str) -> Result<()> {
        if arg.is_empty() {
            return self.reply.send(chat_id, "Usage: /project <dir>", &[]).await;
        }
        let session = self.sessions.get_or_create_active(&self.bot_config.bot_id, chat_id, &self.bot_config.adapter).await?;
        if self.store.has_active_run(&self.bot_config.bot_id, chat_id).await? {
            return self.reply.send(chat_id, "A run is already active. Use /stop first.", &[]).await;
        }
        self.sessions.set_project_root(&session.session_id, arg).await?;
        self.reply.send(chat_id, &format!("Project root set to {arg}"), &[]).await
    }

    async fn cmd_unsafe(&self, chat_id: &str, arg: &str) -> Result<()> {
        let session = self.sessions.get_or_create_active(&self.bot_config.bot_id, chat_id, &self.bot_config.adapter).await?;
        if self.store.has_active_run(&self.bot_config.bot_id, chat_id).await? {
            return self.reply.send(chat_id, "A run is already active. Use /stop first.", &[]).await;
        }

        let mut tokens = arg.split_whitespace();
        match tokens.next() {
            Some("off") => {
                self.sessions.set_unsafe_until(&session.session_id, None).await?;
                self.reply.send(chat_id, "Unsafe mode off", &[]).await
            }
            Some("on") => {
                let minutes: i64 = tokens.next().and_then(|s| s.parse().ok()).unwrap_or(30);
                let until = now_ms() + minutes * 60_000;
                self.sessions.set_unsafe_until(&session.session_id, Some(until)).await?;
                self.reply.send(chat_id, &format!("Unsafe mode on until {until}"), &[]).await
            }
            _ => self.reply.send(chat_id, "Usage: /unsafe on [minutes] | off", &[]).await,
        }
    }

    async fn cmd_providers(&self, chat_id: &str) -> Result<()> {
        let mut lines = Vec::new();
        for name in self.adapters.list() {
            if name == "echo" {
                continue;
            }
            let installed = is_on_path(name).await;
            let preset = model_presets::preset_for(name);
            let default_model = preset.map(|p| p.preferred_default).unwrap_or("(none)");
            lines.push(format!("{name}: {} (default model: {default_model})", if installed { "installed" } else { "not found" }));
        }
        self.reply.send(chat_id, &lines.join("\n"), &[]).await
    }

    async fn cmd_stop(&self, chat_id: &str) -> Result<()> {
        let cancelled = self.store.cancel_active_turn(&self.bot_config.bot_id, chat_id, now_ms()).await?;
        let text = if cancelled { "Stopping..." } else { "No active run" };
        self.reply.send(chat_id, text, &[]).await
    }

    // ---- Free text -------------------------------------------------------

    async fn handle_free_text(&self, chat_id: &str, text: &str) -> Result<()> {
        let session = self
            .sessions
            .get_or_create_active(&self.bot_config.bot_id, chat_id, &self.bot_config.adapter)
            .await?;

        match self.store.create_turn_and_job(&session, text, now_ms()).await? {
            CreateTurnResult::ActiveRunExists => {
                self.reply.send(chat_id, "A run is already active. Use /stop first.", &[]).await
            }
            CreateTurnResult::Ok { turn_id } => {
                TraceEvent::TurnCreated {
                    bot_id: self.bot_config.bot_id.clone(),
                    chat_id: chat_id.to_string(),
                    turn_id: turn_id.clone(),
                }
                .emit();

                let now = now_ms();
                let mut buttons = Vec::with_capacity(4);
                for (label, action_type) in [("Summary", "summary"), ("Regenerate", "regen"), ("Next step", "next"), ("Stop", "stop")]
                {
                    let data = action_tokens::issue(
                        &self.store,
                        &self.bot_config.bot_id,
                        chat_id,
                        action_type,
                        "button",
                        &session.session_id,
                        &turn_id,
                        now,
                    )
                    .await?;
                    buttons.push((label.to_string(), data));
                }

                let text = format!("Queued turn: {turn_id}\nsession={}\nagent={}", session.session_id, session.adapter_name);
                self.reply.send(chat_id, &text, &buttons).await
            }
        }
    }
}

/// Detects a YouTube-search intent: a verb hint combined with a platform
/// hint, case-insensitively. Strips the matched tokens and returns what's
/// left as the search query.
fn detect_youtube_intent(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let has_verb = YOUTUBE_VERB_HINTS.iter().any(|v| lower.contains(v));
    let has_platform = YOUTUBE_PLATFORM_HINTS.iter().any(|p| lower.contains(p));
    if !has_verb || !has_platform {
        return None;
    }

    let mut remaining = lower;
    for hint in YOUTUBE_VERB_HINTS.iter().chain(YOUTUBE_PLATFORM_HINTS.iter()) {
        remaining = remaining.replace(hint, " ");
    }
    let query = remaining.split_whitespace().collect::<Vec<_>>().join(" ");
    let query = query.trim().to_string();
    if query.is_empty() {
        None
    } else {
        Some(query)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("\n[truncated]");
    out
}

async fn is_on_path(bin: &str) -> bool {
    tokio::process::Command::new("sh")
        .arg("-lc")
        .arg(format!("command -v {bin}"))
        .output()
        .await
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cb_domain::model::BotMode;
    use cb_domain::Result as DomainResult;
    use sqlx::any::{install_default_drivers, AnyPoolOptions};
    use std::sync::Mutex as StdMutex;

    struct FakeReply {
        sent: StdMutex<Vec<(String, String, Vec<(String, String)>)>>,
        acks: StdMutex<Vec<(String, Option<String>)>>,
    }

    impl FakeReply {
        fn new() -> Self {
            Self { sent: StdMutex::new(Vec::new()), acks: StdMutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ReplySink for FakeReply {
        async fn send(&self, chat_id: &str, text: &str, buttons: &[(String, String)]) -> DomainResult<()> {
            self.sent.lock().unwrap().push((chat_id.to_string(), text.to_string(), buttons.to_vec()));
            Ok(())
        }

        async fn ack_callback(&self, callback_query_id: &str, text: Option<&str>) -> DomainResult<()> {
            self.acks.lock().unwrap().push((callback_query_id.to_string(), text.map(|s| s.to_string())));
            Ok(())
        }
    }

    struct CannedYoutube(Option<&'static str>);

    #[async_trait]
    impl YoutubeSearch for CannedYoutube {
        async fn search(&self, _query: &str) -> DomainResult<Option<String>> {
            Ok(self.0.map(|s| s.to_string()))
        }
    }

    fn bot_config(owner: Option<i64>) -> BotConfig {
        BotConfig {
            bot_id: "bot1".into(),
            name: "Bot".into(),
            mode: BotMode::Embedded,
            telegram_token: "t".into(),
            adapter: "echo".into(),
            webhook: None,
            codex: None,
            gemini: None,
            claude: None,
            owner_user_id: owner,
            database_url: None,
        }
    }

    async fn handler(owner: Option<i64>, reply: Arc<FakeReply>) -> CommandHandler {
        install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect in-memory sqlite");
        sqlx::raw_sql(cb_store::schema::SCHEMA_SQL).execute(&pool).await.expect("apply schema");
        let store = Store::new(pool, false);
        let sessions = SessionService::new(store.clone());
        CommandHandler::new(
            store,
            sessions,
            Arc::new(AdapterRegistry::with_defaults()),
            reply,
            Arc::new(CannedYoutube(Some("https://www.youtube.com/watch?v=test"))),
            bot_config(owner),
        )
    }

    fn update(user_id: i64, text: Option<&str>, callback_data: Option<&str>) -> IncomingUpdate {
        IncomingUpdate {
            update_id: 1,
            chat_id: 42,
            user_id,
            text: text.map(|s| s.to_string()),
            callback_query_id: callback_data.map(|_| "cbq1".to_string()),
            callback_data: callback_data.map(|s| s.to_string()),
        }
    }

    #[tokio::test]
    async fn owner_gate_denies_non_owner() {
        let reply = Arc::new(FakeReply::new());
        let h = handler(Some(999), reply.clone()).await;
        h.handle(&update(1, Some("/help"), None)).await.unwrap();
        let sent = reply.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Access denied");
    }

    #[tokio::test]
    async fn help_command_sends_help_text() {
        let reply = Arc::new(FakeReply::new());
        let h = handler(None, reply.clone()).await;
        h.handle(&update(1, Some("/help"), None)).await.unwrap();
        let sent = reply.sent.lock().unwrap();
        assert_eq!(sent[0].1, HELP_TEXT);
    }

    #[tokio::test]
    async fn unrecognized_command_falls_back_to_help() {
        let reply = Arc::new(FakeReply::new());
        let h = handler(None, reply.clone()).await;
        h.handle(&update(1, Some("/nonsense"), None)).await.unwrap();
        let sent = reply.sent.lock().unwrap();
        assert_eq!(sent[0].1, HELP_TEXT);
    }

    #[tokio::test]
    async fn echo_command_echoes_argument() {
        let reply = Arc::new(FakeReply::new());
        let h = handler(None, reply.clone()).await;
        h.handle(&update(1, Some("/echo hello there"), None)).await.unwrap();
        let sent = reply.sent.lock().unwrap();
        assert_eq!(sent[0].1, "hello there");
    }

    #[tokio::test]
    async fn youtube_slash_command_replies_with_url() {
        let reply = Arc::new(FakeReply::new());
        let h = handler(None, reply.clone()).await;
        h.handle(&update(1, Some("/yt rust async"), None)).await.unwrap();
        let sent = reply.sent.lock().unwrap();
        assert_eq!(sent[0].1, "https://www.youtube.com/watch?v=test");
    }

    #[tokio::test]
    async fn natural_language_youtube_intent_is_detected() {
        let reply = Arc::new(FakeReply::new());
        let h = handler(None, reply.clone()).await;
        h.handle(&update(1, Some("find me a video about rust"), None)).await.unwrap();
        let sent = reply.sent.lock().unwrap();
        assert_eq!(sent[0].1, "https://www.youtube.com/watch?v=test");
    }

    #[tokio::test]
    async fn free_text_queues_a_turn_with_four_action_buttons() {
        let reply = Arc::new(FakeReply::new());
        let h = handler(None, reply.clone()).await;
        h.handle(&update(1, Some("what's the weather like"), None)).await.unwrap();
        let sent = reply.sent.lock().unwrap();
        assert!(sent[0].1.starts_with("Queued turn:"));
        assert_eq!(sent[0].2.len(), 4);
    }

    #[tokio::test]
    async fn free_text_while_a_run_is_active_is_rejected() {
        let reply = Arc::new(FakeReply::new());
        let h = handler(None, reply.clone()).await;
        h.handle(&update(1, Some("first message"), None)).await.unwrap();
        h.handle(&update(1, Some("second message"), None)).await.unwrap();
        let sent = reply.sent.lock().unwrap();
        assert_eq!(sent[1].1, "A run is already active. Use /stop first.");
    }

    #[tokio::test]
    async fn stop_command_cancels_the_active_run() {
        let reply = Arc::new(FakeReply::new());
        let h = handler(None, reply.clone()).await;
        h.handle(&update(1, Some("do something"), None)).await.unwrap();
        h.handle(&update(1, Some("/stop"), None)).await.unwrap();
        let sent = reply.sent.lock().unwrap();
        assert_eq!(sent[1].1, "Stopping...");
    }

    #[tokio::test]
    async fn status_reports_no_active_session_before_any_message() {
        let reply = Arc::new(FakeReply::new());
        let h = handler(None, reply.clone()).await;
        h.handle(&update(1, Some("/status"), None)).await.unwrap();
        let sent = reply.sent.lock().unwrap();
        assert!(sent[0].1.contains("No active session"));
    }

    #[tokio::test]
    async fn mode_switch_is_rejected_for_unknown_provider() {
        let reply = Arc::new(FakeReply::new());
        let h = handler(None, reply.clone()).await;
        h.handle(&update(1, Some("/mode not-a-provider"), None)).await.unwrap();
        let sent = reply.sent.lock().unwrap();
        assert!(sent[0].1.starts_with("Unknown provider"));
    }

    #[tokio::test]
    async fn callback_with_stop_run_literal_cancels_active_turn() {
        let reply = Arc::new(FakeReply::new());
        let h = handler(None, reply.clone()).await;
        h.handle(&update(1, Some("do something"), None)).await.unwrap();
        h.handle(&update(1, None, Some("stop_run"))).await.unwrap();
        let acks = reply.acks.lock().unwrap();
        assert_eq!(acks[0].1.as_deref(), Some("Stopping..."));
    }

    #[tokio::test]
    async fn callback_with_unknown_token_acks_action_expired() {
        let reply = Arc::new(FakeReply::new());
        let h = handler(None, reply.clone()).await;
        h.handle(&update(1, None, Some("act:deadbeefdeadbeefdeadbeefdeadbeef"))).await.unwrap();
        let acks = reply.acks.lock().unwrap();
        assert_eq!(acks[0].1.as_deref(), Some("Action expired"));
    }

    #[tokio::test]
    async fn summary_button_callback_enqueues_a_follow_up_turn() {
        let reply = Arc::new(FakeReply::new());
        let h = handler(None, reply.clone()).await;
        h.handle(&update(1, Some("do something"), None)).await.unwrap();

        let turn_id = {
            let sent = reply.sent.lock().unwrap();
            let (_, _, buttons) = &sent[0];
            buttons.iter().find(|(label, _)| label == "Summary").unwrap().1.clone()
        };
        let token = action_tokens::token_from_callback_data(&turn_id).unwrap().to_string();

        h.store.cancel_active_turn("bot1", "42", now_ms()).await.unwrap();
        h.handle(&update(1, None, Some(&format!("act:{token}")))).await.unwrap();

        let acks = reply.acks.lock().unwrap();
        assert_eq!(acks.last().unwrap().1.as_deref(), Some("Queued"));
    }
}
