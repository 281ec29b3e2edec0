use std::process::Stdio;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_stream::try_stream;
use cb_domain::event::CliEventKind;
use cb_domain::{Error, Result};
use futures_core::stream::BoxStream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::traits::{AdapterEvent, CancelFlag};

const CANCEL_POLL: Duration = Duration::from_millis(500);
const STDERR_TAIL_BYTES: usize = 4096;

/// Spawns `argv[0]` with the remaining entries as arguments, stdin closed,
/// stdout/stderr piped, and turns its stdout into a stream of normalized
/// events via `normalize`. Shared by every `CliAdapter` implementation so
/// the spawn/cancel/exit-classification logic lives in exactly one place.
pub fn spawn_and_stream(
    provider: &'static str,
    argv: Vec<String>,
    cancel: CancelFlag,
    normalize: impl Fn(&str) -> Vec<CliEventKind> + Send + Sync + 'static,
) -> Result<BoxStream<'static, Result<AdapterEvent>>> {
    let mut command = Command::new(&argv[0]);
    command
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| Error::AdapterSpawn {
        provider: provider.to_string(),
        message: e.to_string(),
    })?;

    let stdout = child.stdout.take().ok_or_else(|| Error::AdapterSpawn {
        provider: provider.to_string(),
        message: "child has no stdout pipe".into(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| Error::AdapterSpawn {
        provider: provider.to_string(),
        message: "child has no stderr pipe".into(),
    })?;

    let stream = try_stream! {
        let mut lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut stderr_tail = String::new();
        let mut cancelled = false;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line.map_err(|e| Error::AdapterStream { provider: provider.to_string(), message: e.to_string() })? {
                        Some(raw) => {
                            for kind in normalize(&raw) {
                                yield AdapterEvent { kind };
                            }
                        }
                        None => break,
                    }
                }
                line = stderr_lines.next_line() => {
                    if let Ok(Some(raw)) = line {
                        stderr_tail.push_str(&raw);
                        stderr_tail.push('\n');
                        if stderr_tail.len() > STDERR_TAIL_BYTES {
                            let cut = stderr_tail.len() - STDERR_TAIL_BYTES;
                            stderr_tail.drain(..cut);
                        }
                    }
                }
                _ = tokio::time::sleep(CANCEL_POLL) => {
                    if cancel.load(Ordering::Relaxed) {
                        cancelled = true;
                        let _ = child.start_kill();
                        break;
                    }
                }
            }
        }

        let status = child.wait().await.map_err(|e| Error::AdapterStream {
            provider: provider.to_string(),
            message: e.to_string(),
        })?;

        if cancelled {
            yield AdapterEvent { kind: CliEventKind::Error { message: "cancelled".into(), detail: None } };
            yield AdapterEvent { kind: CliEventKind::TurnCompleted { status: cb_domain::event::TurnOutcome::Cancelled } };
        } else if !status.success() {
            let tail: String = stderr_tail.chars().rev().take(STDERR_TAIL_BYTES).collect::<String>().chars().rev().collect();
            yield AdapterEvent {
                kind: CliEventKind::Error {
                    message: format!("exited rc={}", status.code().unwrap_or(-1)),
                    detail: Some(serde_json::json!({ "stderr": tail })),
                },
            };
            yield AdapterEvent { kind: CliEventKind::TurnCompleted { status: cb_domain::event::TurnOutcome::Error } };
        }
        // On a clean exit the provider's own stream is expected to have
        // already yielded a `turn_completed` event; nothing synthesized here.
    };

    Ok(Box::pin(stream))
}
