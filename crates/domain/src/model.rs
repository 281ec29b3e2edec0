use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bot operating mode: `embedded` runs the adapter runtime in the same
/// process as the chat client loop; `gateway` is a standalone process that
/// a supervisor fans out alongside others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotMode {
    Embedded,
    Gateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Leased,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Leased => "leased",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Reset,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Queued,
    InFlight,
    Completed,
    Failed,
    Cancelled,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStatus::Queued => "queued",
            TurnStatus::InFlight => "in_flight",
            TurnStatus::Completed => "completed",
            TurnStatus::Failed => "failed",
            TurnStatus::Cancelled => "cancelled",
        }
    }
}

/// `CliRunJob.status`. A partial-unique index enforces at most one row per
/// `(bot_id, chat_id)` whose status is in the non-terminal set
/// `{queued, leased, in_flight}` — the exclusive-active-run invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunJobStatus {
    Queued,
    Leased,
    InFlight,
    Completed,
    Failed,
    Cancelled,
}

impl RunJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunJobStatus::Queued => "queued",
            RunJobStatus::Leased => "leased",
            RunJobStatus::InFlight => "in_flight",
            RunJobStatus::Completed => "completed",
            RunJobStatus::Failed => "failed",
            RunJobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunJobStatus::Completed | RunJobStatus::Failed | RunJobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredActionStatus {
    Queued,
    Promoted,
    Cancelled,
}

impl DeferredActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeferredActionStatus::Queued => "queued",
            DeferredActionStatus::Promoted => "promoted",
            DeferredActionStatus::Cancelled => "cancelled",
        }
    }
}

/// The four inline button / deferred-action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Summary,
    Regen,
    Next,
    Stop,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Summary => "summary",
            ActionType::Regen => "regen",
            ActionType::Next => "next",
            ActionType::Stop => "stop",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "summary" => Some(ActionType::Summary),
            "regen" => Some(ActionType::Regen),
            "next" => Some(ActionType::Next),
            "stop" => Some(ActionType::Stop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bot {
    pub bot_id: String,
    pub name: String,
    pub mode: BotMode,
    pub owner_user_id: Option<i64>,
    pub adapter_name: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub bot_id: String,
    pub chat_id: String,
    pub adapter_name: String,
    pub adapter_model: Option<String>,
    pub project_root: Option<String>,
    pub unsafe_until: Option<i64>,
    pub adapter_thread_id: Option<String>,
    pub status: SessionStatus,
    pub rolling_summary_md: String,
    pub last_turn_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub turn_id: String,
    pub session_id: String,
    pub bot_id: String,
    pub chat_id: String,
    pub user_text: String,
    pub assistant_text: Option<String>,
    pub status: TurnStatus,
    pub error_text: Option<String>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

/// Result of `Store::create_turn_and_job`. Replaces throwing an exception
/// for the expected "a run is already active" case with an explicit variant
/// the caller must match on.
#[derive(Debug, Clone)]
pub enum CreateTurnResult {
    Ok { turn_id: String },
    ActiveRunExists,
}

/// A job claimed off either queue, with enough bookkeeping for the worker
/// to renew its lease and know how many attempts it has seen.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub id: String,
    pub bot_id: String,
    pub attempts: i64,
}

/// A leased `CliRunJob`, carrying the `turn_id`/`chat_id` the worker needs
/// without a second round-trip to the store.
#[derive(Debug, Clone)]
pub struct LeasedRunJob {
    pub id: String,
    pub bot_id: String,
    pub turn_id: String,
    pub chat_id: String,
    pub attempts: i64,
}

#[derive(Debug, Clone)]
pub struct DeferredButtonAction {
    pub id: String,
    pub bot_id: String,
    pub chat_id: String,
    pub session_id: String,
    pub action_type: ActionType,
    pub prompt_text: String,
    pub origin_turn_id: String,
    pub status: DeferredActionStatus,
}

/// A promoted deferred action: enough to log it and for the caller to know
/// which new turn it became.
#[derive(Debug, Clone)]
pub struct PromotedAction {
    pub action_type: ActionType,
    pub turn_id: String,
}

#[derive(Debug, Clone)]
pub struct ActionTokenRow {
    pub payload_json: String,
}

/// Decoded, validated payload of a one-shot action token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTokenPayload {
    pub action_type: String,
    pub run_source: String,
    pub chat_id: String,
    pub session_id: String,
    pub origin_turn_id: String,
}

/// An inbound chat update, already classified into message-or-callback.
#[derive(Debug, Clone)]
pub struct IncomingUpdate {
    pub update_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub text: Option<String>,
    pub callback_query_id: Option<String>,
    pub callback_data: Option<String>,
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn to_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}
