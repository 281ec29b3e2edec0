/// Idempotent schema script. One version, no migration history — run once at
/// pool construction. Kept ANSI-ish so it works verbatim against both the
/// Postgres and SQLite backends `sqlx::any::AnyPool` may be pointed at.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS bots (
    bot_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    mode TEXT NOT NULL,
    owner_user_id BIGINT,
    adapter_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS telegram_updates (
    bot_id TEXT NOT NULL,
    update_id BIGINT NOT NULL,
    chat_id TEXT,
    payload_json TEXT NOT NULL,
    received_at BIGINT NOT NULL,
    PRIMARY KEY (bot_id, update_id)
);

CREATE TABLE IF NOT EXISTS telegram_update_jobs (
    id TEXT PRIMARY KEY,
    bot_id TEXT NOT NULL,
    update_id BIGINT NOT NULL,
    status TEXT NOT NULL,
    lease_owner TEXT,
    lease_expires_at BIGINT,
    available_at BIGINT NOT NULL,
    attempts BIGINT NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at BIGINT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_update_jobs_bot_update
    ON telegram_update_jobs (bot_id, update_id);

CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    bot_id TEXT NOT NULL,
    chat_id TEXT NOT NULL,
    adapter_name TEXT NOT NULL,
    adapter_model TEXT,
    project_root TEXT,
    unsafe_until BIGINT,
    adapter_thread_id TEXT,
    status TEXT NOT NULL,
    rolling_summary_md TEXT NOT NULL DEFAULT '',
    last_turn_at BIGINT,
    updated_at BIGINT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_sessions_active
    ON sessions (bot_id, chat_id)
    WHERE status = 'active';

CREATE TABLE IF NOT EXISTS turns (
    turn_id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    bot_id TEXT NOT NULL,
    chat_id TEXT NOT NULL,
    user_text TEXT NOT NULL,
    assistant_text TEXT,
    status TEXT NOT NULL,
    error_text TEXT,
    started_at BIGINT,
    finished_at BIGINT,
    created_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS cli_run_jobs (
    id TEXT PRIMARY KEY,
    turn_id TEXT NOT NULL UNIQUE,
    bot_id TEXT NOT NULL,
    chat_id TEXT NOT NULL,
    status TEXT NOT NULL,
    lease_owner TEXT,
    lease_expires_at BIGINT,
    available_at BIGINT NOT NULL,
    attempts BIGINT NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at BIGINT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_run_jobs_active
    ON cli_run_jobs (bot_id, chat_id)
    WHERE status IN ('queued', 'leased', 'in_flight');

CREATE TABLE IF NOT EXISTS cli_events (
    id TEXT PRIMARY KEY,
    turn_id TEXT NOT NULL,
    bot_id TEXT NOT NULL,
    seq BIGINT NOT NULL,
    event_type TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at BIGINT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_events_turn_seq
    ON cli_events (turn_id, seq);

CREATE TABLE IF NOT EXISTS session_summaries (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    turn_id TEXT NOT NULL,
    summary_md TEXT NOT NULL,
    created_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS deferred_button_actions (
    id TEXT PRIMARY KEY,
    bot_id TEXT NOT NULL,
    chat_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    action_type TEXT NOT NULL,
    prompt_text TEXT NOT NULL,
    origin_turn_id TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS action_tokens (
    token TEXT PRIMARY KEY,
    bot_id TEXT NOT NULL,
    chat_id TEXT NOT NULL,
    action TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    expires_at BIGINT NOT NULL,
    consumed_at BIGINT
);

CREATE TABLE IF NOT EXISTS runtime_metric_counters (
    bot_id TEXT NOT NULL,
    metric_key TEXT NOT NULL,
    metric_value BIGINT NOT NULL DEFAULT 0,
    updated_at BIGINT NOT NULL,
    PRIMARY KEY (bot_id, metric_key)
);

CREATE TABLE IF NOT EXISTS audit_log (
    id TEXT PRIMARY KEY,
    bot_id TEXT NOT NULL,
    chat_id TEXT NOT NULL,
    action TEXT NOT NULL,
    result TEXT NOT NULL,
    created_at BIGINT NOT NULL
);
"#;
