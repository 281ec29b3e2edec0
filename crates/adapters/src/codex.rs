use async_trait::async_trait;
use cb_domain::event::{CliEventKind, TurnOutcome};
use cb_domain::Result;
use futures_core::stream::BoxStream;

use crate::process::spawn_and_stream;
use crate::traits::{AdapterEvent, CancelFlag, CliAdapter, RunRequest};

pub struct CodexAdapter;

impl CodexAdapter {
    pub fn new() -> Self {
        Self
    }

    fn argv(&self, req: &RunRequest, resume_thread: Option<&str>) -> Vec<String> {
        let mut argv = vec!["codex".to_string(), "exec".to_string()];
        if let Some(thread_id) = resume_thread {
            argv.push("resume".to_string());
            argv.push(thread_id.to_string());
        }
        argv.push("--json".to_string());
        argv.push("--skip-git-repo-check".to_string());
        if !req.model.is_empty() {
            argv.push("-m".to_string());
            argv.push(req.model.clone());
        }
        if !req.sandbox.is_empty() {
            argv.push("-s".to_string());
            argv.push(req.sandbox.clone());
        }
        argv.push("-c".to_string());
        argv.push("model_reasoning_effort=\"high\"".to_string());
        argv.push(full_prompt(req));
        argv
    }
}

impl Default for CodexAdapter {
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
impl CliAdapter for CodexAdapter {
    fn provider_name(&self) -> &'static str {
        "codex"
    }

    async fn run_new(
        &self,
        req: RunRequest,
        cancel: CancelFlag,
    ) -> Result<BoxStream<'static, Result<AdapterEvent>>> {
        let argv = self.argv(&req, None);
        spawn_and_stream("codex", argv, cancel, normalize)
    }

    async fn run_resume(
        &self,
        thread_id: &str,
        req: RunRequest,
        cancel: CancelFlag,
    ) -> Result<BoxStream<'static, Result<AdapterEvent>>> {
        let argv = self.argv(&req, Some(thread_id));
        spawn_and_stream("codex", argv, cancel, normalize)
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

/// Maps Codex's `thread.started` / `turn.started` / `item.started|completed`
/// / `turn.completed` / `error` vocabulary onto the normalized events.
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
        "thread.started" => {
            let thread_id = value
                .get("thread_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            vec![
                CliEventKind::ThreadStarted { thread_id },
                CliEventKind::TurnStarted,
            ]
        }
        "turn.started" => vec![CliEventKind::TurnStarted],
        "item.started" | "item.completed" => normalize_item(&value),
        "turn.completed" => vec![CliEventKind::TurnCompleted {
            status: TurnOutcome::Success,
        }],
        "error" => vec![CliEventKind::Error {
            message: value
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("codex error")
                .to_string(),
            detail: Some(value),
        }],
        _ => vec![CliEventKind::Reasoning {
            text: None,
            raw: Some(value),
        }],
    }
}

fn normalize_item(value: &serde_json::Value) -> Vec<CliEventKind> {
    let item = value.get("item").unwrap_or(value);
    match item.get("type").and_then(|v| v.as_str()) {
        Some("reasoning") => vec![CliEventKind::Reasoning {
            text: item
                .get("text")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            raw: None,
        }],
        Some("agent_message") => vec![CliEventKind::AssistantMessage {
            text: item
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }],
        Some("command_execution") => {
            let command = item
                .get("command")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if item.get("exit_code").is_some() {
                vec![CliEventKind::CommandCompleted {
                    command,
                    exit_code: item.get("exit_code").and_then(|v| v.as_i64()),
                    aggregated_output: item
                        .get("aggregated_output")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                }]
            } else {
                vec![CliEventKind::CommandStarted { command }]
            }
        }
        _ => vec![CliEventKind::Reasoning {
            text: None,
            raw: Some(value.clone()),
        }],
    }
}
