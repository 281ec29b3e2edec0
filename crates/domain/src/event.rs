use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The normalized event vocabulary every [`CliAdapter`] implementation maps
/// its provider-native wire format onto. This is the sole channel between
/// an adapter subprocess and the rest of the system — nothing downstream
/// branches on provider name again once an event reaches this shape.
///
/// [`CliAdapter`]: https://docs.rs/cb-adapters (crate boundary, not a doc link)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum CliEventKind {
    ThreadStarted { thread_id: String },
    TurnStarted,
    AssistantMessage { text: String },
    Reasoning {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw: Option<serde_json::Value>,
    },
    CommandStarted { command: String },
    CommandCompleted {
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        aggregated_output: Option<String>,
    },
    TurnCompleted { status: TurnOutcome },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<serde_json::Value>,
    },
    DeliveryError { message: String },
}

impl CliEventKind {
    /// The `snake_case` discriminant string, used as the `CliEvent.event_type`
    /// column value and as the streamer's line-prefix label.
    pub fn type_name(&self) -> &'static str {
        match self {
            CliEventKind::ThreadStarted { .. } => "thread_started",
            CliEventKind::TurnStarted => "turn_started",
            CliEventKind::AssistantMessage { .. } => "assistant_message",
            CliEventKind::Reasoning { .. } => "reasoning",
            CliEventKind::CommandStarted { .. } => "command_started",
            CliEventKind::CommandCompleted { .. } => "command_completed",
            CliEventKind::TurnCompleted { .. } => "turn_completed",
            CliEventKind::Error { .. } => "error",
            CliEventKind::DeliveryError { .. } => "delivery_error",
        }
    }
}

/// Terminal status carried by a `turn_completed` event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Success,
    Error,
    Cancelled,
}

impl TurnOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnOutcome::Success => "success",
            TurnOutcome::Error => "error",
            TurnOutcome::Cancelled => "cancelled",
        }
    }
}

/// One event in a turn's stream: a sequence number (assigned by the worker
/// at persist time, monotone and 1-based), a UTC timestamp, and the
/// normalized payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliEvent {
    pub seq: i64,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: CliEventKind,
}

impl CliEvent {
    pub fn now(seq: i64, kind: CliEventKind) -> Self {
        Self { seq, ts: Utc::now(), kind }
    }
}
