use async_trait::async_trait;
use async_stream::stream;
use cb_domain::event::{CliEventKind, TurnOutcome};
use cb_domain::Result;
use futures_core::stream::BoxStream;
use uuid::Uuid;

use crate::traits::{AdapterEvent, CancelFlag, CliAdapter, RunRequest};

/// No subprocess: yields the fixed `thread_started -> turn_started ->
/// assistant_message -> turn_completed` sequence with the prompt echoed
/// back, immediately. Used by in-process worker/store tests and as a
/// smoke-test adapter that needs no external CLI installed.
pub struct EchoAdapter;

impl EchoAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EchoAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CliAdapter for EchoAdapter {
    fn provider_name(&self) -> &'static str {
        "echo"
    }

    async fn run_new(
        &self,
        req: RunRequest,
        cancel: CancelFlag,
    ) -> Result<BoxStream<'static, Result<AdapterEvent>>> {
        self.run(Uuid::new_v4().to_string(), req, cancel)
    }

    async fn run_resume(
        &self,
        thread_id: &str,
        req: RunRequest,
        cancel: CancelFlag,
    ) -> Result<BoxStream<'static, Result<AdapterEvent>>> {
        self.run(thread_id.to_string(), req, cancel)
    }

    fn normalize(&self, raw_line: &str) -> Vec<CliEventKind> {
        vec![CliEventKind::AssistantMessage {
            text: raw_line.to_string(),
        }]
    }

    fn extract_thread_id(&self, kind: &CliEventKind) -> Option<String> {
        match kind {
            CliEventKind::ThreadStarted { thread_id } => Some(thread_id.clone()),
            _ => None,
        }
    }
}

impl EchoAdapter {
    fn run(
        &self,
        thread_id: String,
        req: RunRequest,
        cancel: CancelFlag,
    ) -> Result<BoxStream<'static, Result<AdapterEvent>>> {
        let echoed = req.prompt;
        let s = stream! {
            if cancel.load(std::sync::atomic::Ordering::Relaxed) {
                yield Ok(AdapterEvent { kind: CliEventKind::Error { message: "cancelled".into(), detail: None } });
                yield Ok(AdapterEvent { kind: CliEventKind::TurnCompleted { status: TurnOutcome::Cancelled } });
                return;
            }
            yield Ok(AdapterEvent { kind: CliEventKind::ThreadStarted { thread_id } });
            yield Ok(AdapterEvent { kind: CliEventKind::TurnStarted });
            yield Ok(AdapterEvent { kind: CliEventKind::AssistantMessage { text: echoed } });
            yield Ok(AdapterEvent { kind: CliEventKind::TurnCompleted { status: TurnOutcome::Success } });
        };
        Ok(Box::pin(s))
    }
}
