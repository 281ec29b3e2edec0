use async_trait::async_trait;
use cb_domain::event::{CliEventKind, TurnOutcome};
use cb_domain::Result;
use futures_core::stream::BoxStream;

use crate::process::spawn_and_stream;
use crate::traits::{AdapterEvent, CancelFlag, CliAdapter, RunRequest};

pub struct GeminiAdapter;

impl GeminiAdapter {
    pub fn new() -> Self {
        Self
    }

    fn argv(&self, req: &RunRequest, resume_thread: Option<&str>) -> Vec<String> {
        let mut argv = Vec::new();
        if let Some(thread_id) = resume_thread {
            argv.push("--resume".to_string());
            argv.push(thread_id.to_string());
        }
        argv.insert(0, "gemini".to_string());
        argv.push("--approval-mode".to_string());
        argv.push("yolo".to_string());
        argv.push("-o".to_string());
        argv.push("stream-json".to_string());
        if !req.model.is_empty() {
            argv.push("--model".to_string());
            argv.push(req.model.clone());
        }
        argv.push("-p".to_string());
        argv.push(full_prompt(req));
        argv
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn full_prompt(req: &RunRequest) -> String {
    if req.preamble.is_empty() {
        req.prompt.clone()
    } else {
        format!("{}\n\n{}", req.preamble, req.prompt)
    }
}

#[async_trait]
impl CliAdapter for GeminiAdapter {
    fn provider_name(&self) -> &'static str {
        "gemini"
    }

    async fn run_new(
        &self,
        req: RunRequest,
        cancel: CancelFlag,
    ) -> Result<BoxStream<'static, Result<AdapterEvent>>> {
        let argv = self.argv(&req, None);
        spawn_and_stream("gemini", argv, cancel, normalize)
    }

    async fn run_resume(
        &self,
        thread_id: &str,
        req: RunRequest,
        cancel: CancelFlag,
    ) -> Result<BoxStream<'static, Result<AdapterEvent>>> {
        let argv = self.argv(&req, Some(thread_id));
        spawn_and_stream("gemini", argv, cancel, normalize)
    }

    fn normalize(&self, raw_line: &str) -> Vec<CliEventKind> {
        normalize(raw_line)
    }

    fn extract_thread_id(&self, kind: &CliEventKind) -> Option<String> {
        match kind {
            CliEventKind::ThreadStarted { thread_id } => Some(thread_id.clone()),
            _ => None,
        }
    }
}

/// Maps Gemini's `init` / `message{role,content}` / `result{status}` / `error`
/// vocabulary onto the normalized events. Gemini has no distinct thread-id
/// line; `init` doubles as both `thread_started` (using the process's own
/// generated id, since Gemini doesn't expose one independently) and `turn_started`.
fn normalize(raw_line: &str) -> Vec<CliEventKind> {
    let value: serde_json::Value = match serde_json::from_str(raw_line) {
        Ok(v) => v,
        Err(e) => {
            return vec![CliEventKind::Error {
                message: e.to_string(),
                detail: Some(serde_json::json!({ "raw_line": raw_line })),
            }]
        }
    };

    let event_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match event_type {
        "init" => {
            let thread_id = value
                .get("session_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            vec![
                CliEventKind::ThreadStarted { thread_id },
                CliEventKind::TurnStarted,
            ]
        }
        "message" => {
            let role = value.get("role").and_then(|v| v.as_str()).unwrap_or("");
            let content = value
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if role == "assistant" {
                vec![CliEventKind::AssistantMessage { text: content }]
            } else {
                vec![CliEventKind::Reasoning {
                    text: Some(content),
                    raw: None,
                }]
            }
        }
        "result" => {
            let status = value.get("status").and_then(|v| v.as_str()).unwrap_or("");
            let outcome = match status {
                "error" => TurnOutcome::Error,
                "cancelled" => TurnOutcome::Cancelled,
                _ => TurnOutcome::Success,
            };
            vec![CliEventKind::TurnCompleted { status: outcome }]
        }
        "error" => vec![CliEventKind::Error {
            message: value
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("gemini error")
                .to_string(),
            detail: Some(value),
        }],
        _ => vec![CliEventKind::Reasoning {
            text: None,
            raw: Some(value),
        }],
    }
}
