use async_trait::async_trait;
use cb_domain::event::{CliEventKind, TurnOutcome};
use cb_domain::Result;
use futures_core::stream::BoxStream;

use crate::process::spawn_and_stream;
use crate::traits::{AdapterEvent, CancelFlag, CliAdapter, RunRequest};

pub struct ClaudeAdapter;

impl ClaudeAdapter {
    pub fn new() -> Self {
        Self
    }

    fn argv(&self, req: &RunRequest, resume_thread: Option<&str>) -> Vec<String> {
        let mut argv = vec!["claude".to_string(), "-p".to_string()];
        if let Some(thread_id) = resume_thread {
            argv.push("-r".to_string());
            argv.push(thread_id.to_string());
        }
        argv.push("--verbose".to_string());
        argv.push("--output-format".to_string());
        argv.push("stream-json".to_string());
        if !req.model.is_empty() {
            argv.push("--model".to_string());
            argv.push(req.model.clone());
        }
        argv.push(full_prompt(req));
        argv
    }
}

impl Default for ClaudeAdapter {
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
impl CliAdapter for ClaudeAdapter {
    fn provider_name(&self) -> &'static str {
        "claude"
    }

    async fn run_new(
        &self,
        req: RunRequest,
        cancel: CancelFlag,
    ) -> Result<BoxStream<'static, Result<AdapterEvent>>> {
        let argv = self.argv(&req, None);
        spawn_and_stream("claude", argv, cancel, normalize)
    }

    async fn run_resume(
        &self,
        thread_id: &str,
        req: RunRequest,
        cancel: CancelFlag,
    ) -> Result<BoxStream<'static, Result<AdapterEvent>>> {
        let argv = self.argv(&req, Some(thread_id));
        spawn_and_stream("claude", argv, cancel, normalize)
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

/// Maps Claude's `system{subtype:init, session_id}` / `assistant{message.content[].text}`
/// / `result{is_error, subtype}` / `error` vocabulary onto the normalized events.
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
        "system" => {
            if value.get("subtype").and_then(|v| v.as_str()) == Some("init") {
                let thread_id = value
                    .get("session_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                vec![
                    CliEventKind::ThreadStarted { thread_id },
                    CliEventKind::TurnStarted,
                ]
            } else {
                vec![CliEventKind::Reasoning {
                    text: None,
                    raw: Some(value),
                }]
            }
        }
        "assistant" => {
            let text = value
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array())
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                        .collect::<Vec<_>>()
                        .join("")
                })
                .unwrap_or_default();
            vec![CliEventKind::AssistantMessage { text }]
        }
        "result" => {
            let is_error = value
                .get("is_error")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let subtype = value.get("subtype").and_then(|v| v.as_str()).unwrap_or("");
            let outcome = if subtype == "cancelled" {
                TurnOutcome::Cancelled
            } else if is_error {
                TurnOutcome::Error
            } else {
                TurnOutcome::Success
            };
            vec![CliEventKind::TurnCompleted { status: outcome }]
        }
        "error" => vec![CliEventKind::Error {
            message: value
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("claude error")
                .to_string(),
            detail: Some(value),
        }],
        _ => vec![CliEventKind::Reasoning {
            text: None,
            raw: Some(value),
        }],
    }
}
