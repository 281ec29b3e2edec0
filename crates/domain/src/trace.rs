use serde::Serialize;

/// Structured trace events emitted across all crates in this workspace.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    UpdateIngested {
        bot_id: String,
        update_id: i64,
        duplicate: bool,
    },
    JobLeased {
        queue: &'static str,
        bot_id: String,
        job_id: String,
        attempts: i64,
    },
    LeaseRenewed {
        queue: &'static str,
        job_id: String,
    },
    LeaseLost {
        queue: &'static str,
        job_id: String,
    },
    LeaseExpiredReclaimed {
        queue: &'static str,
        job_id: String,
        bot_id: String,
    },
    TurnCreated {
        bot_id: String,
        chat_id: String,
        turn_id: String,
    },
    ActiveRunRejected {
        bot_id: String,
        chat_id: String,
    },
    SessionResolved {
        bot_id: String,
        chat_id: String,
        session_id: String,
        is_new: bool,
    },
    SessionReset {
        bot_id: String,
        chat_id: String,
        session_id: String,
    },
    AdapterSpawned {
        provider: String,
        bot_id: String,
        turn_id: String,
        resumed: bool,
    },
    AdapterExited {
        provider: String,
        turn_id: String,
        exit_code: Option<i32>,
    },
    AdapterStreamError {
        provider: String,
        turn_id: String,
        message: String,
    },
    EventPersisted {
        turn_id: String,
        seq: i64,
        event_type: String,
    },
    DeliveryError {
        chat_id: String,
        method: &'static str,
        message: String,
    },
    TelegramRateLimited {
        method: String,
        retry_after_secs: f64,
    },
    ArtifactDelivered {
        chat_id: String,
        kind: &'static str,
        path: String,
    },
    SummaryBuilt {
        session_id: String,
        chars: usize,
        truncated: bool,
    },
    ActionTokenIssued {
        token_id: String,
        action_type: String,
        chat_id: String,
    },
    ActionTokenConsumed {
        token_id: String,
        action_type: String,
    },
    DeferredActionEnqueued {
        chat_id: String,
        action_type: String,
        queue_depth: usize,
    },
    DeferredActionPromoted {
        chat_id: String,
        action_type: String,
        turn_id: String,
    },
    TurnCompleted {
        turn_id: String,
        status: &'static str,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cb_event");
    }
}
