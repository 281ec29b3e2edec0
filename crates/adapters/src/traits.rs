use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use cb_domain::event::CliEventKind;
use cb_domain::Result;
use futures_core::stream::BoxStream;

/// Set to `true` by a cancel-monitor task polling `Store::is_turn_cancelled`
/// roughly every 500ms; adapters check it between reads of the child's stdout.
pub type CancelFlag = Arc<AtomicBool>;

/// What the run worker hands to an adapter to start or resume a turn.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// The (possibly artifact-hinted) prompt text.
    pub prompt: String,
    /// Resolved model name for this turn, already passed through model presets.
    pub model: String,
    /// Sandbox mode string, only meaningful to the Codex adapter; empty elsewhere.
    pub sandbox: String,
    /// Recovery preamble built from the session's rolling summary ("" if none).
    pub preamble: String,
}

/// A normalized event yielded by an adapter's stream.
#[derive(Debug, Clone)]
pub struct AdapterEvent {
    pub kind: CliEventKind,
}

/// Trait every CLI adapter must implement: one concrete type per provider
/// (Codex/Gemini/Claude) plus the `echo` test adapter. The run worker and
/// command handler depend only on this interface, never on a provider name.
#[async_trait]
pub trait CliAdapter: Send + Sync {
    /// Provider name as stored in `Session.adapter_name` ("codex", "gemini", "claude", "echo").
    fn provider_name(&self) -> &'static str;

    /// Spawn a fresh agent-side thread and stream its normalized events.
    async fn run_new(
        &self,
        req: RunRequest,
        cancel: CancelFlag,
    ) -> Result<BoxStream<'static, Result<AdapterEvent>>>;

    /// Resume an existing agent-side thread identified by `thread_id`.
    async fn run_resume(
        &self,
        thread_id: &str,
        req: RunRequest,
        cancel: CancelFlag,
    ) -> Result<BoxStream<'static, Result<AdapterEvent>>>;

    /// Normalize one raw stdout line into zero or more vocabulary events.
    /// Unknown lines become `reasoning{raw}`; invalid JSON becomes `error`.
    fn normalize(&self, raw_line: &str) -> Vec<CliEventKind>;

    /// Pull a `thread_id` out of an already-normalized event, if present.
    fn extract_thread_id(&self, kind: &CliEventKind) -> Option<String>;
}
