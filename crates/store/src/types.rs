use cb_domain::model::{
    DeferredActionStatus, DeferredButtonAction, RunJobStatus, Session, SessionStatus, Turn,
    TurnStatus,
};
use sqlx::FromRow;

#[derive(Debug, FromRow)]
pub struct SessionRow {
    pub session_id: String,
    pub bot_id: String,
    pub chat_id: String,
    pub adapter_name: String,
    pub adapter_model: Option<String>,
    pub project_root: Option<String>,
    pub unsafe_until: Option<i64>,
    pub adapter_thread_id: Option<String>,
    pub status: String,
    pub rolling_summary_md: String,
    pub last_turn_at: Option<i64>,
}

impl SessionRow {
    pub fn into_domain(self) -> Session {
        Session {
            session_id: self.session_id,
            bot_id: self.bot_id,
            chat_id: self.chat_id,
            adapter_name: self.adapter_name,
            adapter_model: self.adapter_model,
            project_root: self.project_root,
            unsafe_until: self.unsafe_until,
            adapter_thread_id: self.adapter_thread_id,
            status: parse_session_status(&self.status),
            rolling_summary_md: self.rolling_summary_md,
            last_turn_at: self.last_turn_at,
        }
    }
}

pub fn parse_session_status(s: &str) -> SessionStatus {
    match s {
        "active" => SessionStatus::Active,
        _ => SessionStatus::Reset,
    }
}

#[derive(Debug, FromRow)]
pub struct TurnRow {
    pub turn_id: String,
    pub session_id: String,
    pub bot_id: String,
    pub chat_id: String,
    pub user_text: String,
    pub assistant_text: Option<String>,
    pub status: String,
    pub error_text: Option<String>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl TurnRow {
    pub fn into_domain(self) -> Turn {
        Turn {
            turn_id: self.turn_id,
            session_id: self.session_id,
            bot_id: self.bot_id,
            chat_id: self.chat_id,
            user_text: self.user_text,
            assistant_text: self.assistant_text,
            status: parse_turn_status(&self.status),
            error_text: self.error_text,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

pub fn parse_turn_status(s: &str) -> TurnStatus {
    match s {
        "queued" => TurnStatus::Queued,
        "in_flight" => TurnStatus::InFlight,
        "completed" => TurnStatus::Completed,
        "failed" => TurnStatus::Failed,
        _ => TurnStatus::Cancelled,
    }
}

#[derive(Debug, FromRow)]
pub struct RunJobRow {
    pub id: String,
    pub turn_id: String,
    pub bot_id: String,
    pub chat_id: String,
    pub status: String,
    pub attempts: i64,
}

pub fn parse_run_job_status(s: &str) -> RunJobStatus {
    match s {
        "queued" => RunJobStatus::Queued,
        "leased" => RunJobStatus::Leased,
        "in_flight" => RunJobStatus::InFlight,
        "completed" => RunJobStatus::Completed,
        "failed" => RunJobStatus::Failed,
        _ => RunJobStatus::Cancelled,
    }
}

#[derive(Debug, FromRow)]
pub struct UpdateJobRow {
    pub id: String,
    pub bot_id: String,
    pub update_id: i64,
    pub attempts: i64,
}

#[derive(Debug, FromRow)]
pub struct DeferredActionRow {
    pub id: String,
    pub bot_id: String,
    pub chat_id: String,
    pub session_id: String,
    pub action_type: String,
    pub prompt_text: String,
    pub origin_turn_id: String,
    pub status: String,
}

impl DeferredActionRow {
    pub fn into_domain(self) -> DeferredButtonAction {
        DeferredButtonAction {
            id: self.id,
            bot_id: self.bot_id,
            chat_id: self.chat_id,
            session_id: self.session_id,
            action_type: cb_domain::model::ActionType::from_str(&self.action_type)
                .unwrap_or(cb_domain::model::ActionType::Summary),
            prompt_text: self.prompt_text,
            origin_turn_id: self.origin_turn_id,
            status: parse_deferred_status(&self.status),
        }
    }
}

pub fn parse_deferred_status(s: &str) -> DeferredActionStatus {
    match s {
        "promoted" => DeferredActionStatus::Promoted,
        "cancelled" => DeferredActionStatus::Cancelled,
        _ => DeferredActionStatus::Queued,
    }
}

#[derive(Debug, FromRow)]
pub struct ActionTokenRow {
    pub token: String,
    pub payload_json: String,
}
