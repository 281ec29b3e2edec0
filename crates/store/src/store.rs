use cb_domain::model::{
    ActionTokenPayload, CreateTurnResult, LeasedJob, LeasedRunJob, PromotedAction, RunJobStatus,
    Session, SessionStatus, Turn,
};
use cb_domain::{Error, Result};
use sqlx::AnyPool;
use uuid::Uuid;

use crate::types::{
    parse_run_job_status, ActionTokenRow, DeferredActionRow, RunJobRow, SessionRow, TurnRow,
    UpdateJobRow,
};

/// Reclaimable non-terminal statuses for the run-job queue, in SQL literal
/// form (kept as a constant so the lease-claim query and the "has active
/// run" check agree on the set).
const RUN_JOB_NONTERMINAL: &[&str] = &["queued", "leased", "in_flight"];
const UPDATE_JOB_RECLAIMABLE: &[&str] = &["leased"];

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// The transactional persistence boundary. `supports_skip_locked` toggles
/// between the Postgres `FOR UPDATE SKIP LOCKED` lease-claim path and the
/// compare-and-swap fallback used on SQLite.
#[derive(Clone)]
pub struct Store {
    pool: AnyPool,
    supports_skip_locked: bool,
}

impl Store {
    pub fn new(pool: AnyPool, supports_skip_locked: bool) -> Self {
        Self {
            pool,
            supports_skip_locked,
        }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    // ---- Updates ----------------------------------------------------

    /// Inserts the raw update if `(bot, update_id)` hasn't been seen, then
    /// enqueues its ingest job in the same transaction. Returns whether it
    /// was newly accepted.
    pub async fn insert_update(
        &self,
        bot_id: &str,
        update_id: i64,
        chat_id: Option<&str>,
        payload_json: &str,
        now_ms: i64,
    ) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT bot_id FROM telegram_updates WHERE bot_id = ? AND update_id = ?")
                .bind(bot_id)
                .bind(update_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| Error::Store(e.to_string()))?;

        if existing.is_some() {
            tx.commit().await.map_err(|e| Error::Store(e.to_string()))?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO telegram_updates (bot_id, update_id, chat_id, payload_json, received_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(bot_id)
        .bind(update_id)
        .bind(chat_id)
        .bind(payload_json)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        sqlx::query(
            "INSERT INTO telegram_update_jobs \
             (id, bot_id, update_id, status, available_at, attempts, created_at) \
             VALUES (?, ?, ?, 'queued', ?, 0, ?)",
        )
        .bind(new_id())
        .bind(bot_id)
        .bind(update_id)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        tx.commit().await.map_err(|e| Error::Store(e.to_string()))?;
        Ok(true)
    }

    pub async fn max_update_id(&self, bot_id: &str) -> Result<Option<i64>> {
        let row: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT MAX(update_id) FROM telegram_updates WHERE bot_id = ?")
                .bind(bot_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::Store(e.to_string()))?;
        Ok(row.and_then(|(v,)| v))
    }

    /// Looks up the raw update a leased ingest job refers to.
    pub async fn get_update_for_job(&self, job_id: &str) -> Result<Option<(i64, String)>> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT u.update_id, u.payload_json FROM telegram_update_jobs j \
             JOIN telegram_updates u ON u.bot_id = j.bot_id AND u.update_id = j.update_id \
             WHERE j.id = ?",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(row)
    }

    // ---- Ingest leases ------------------------------------------------

    pub async fn lease_next_update_job(
        &self,
        bot_id: &str,
        owner: &str,
        now_ms: i64,
        lease_ms: i64,
    ) -> Result<Option<LeasedJob>> {
        self.lease_next(
            "telegram_update_jobs",
            bot_id,
            owner,
            now_ms,
            lease_ms,
            UPDATE_JOB_RECLAIMABLE,
        )
        .await
    }

    pub async fn renew_update_lease(
        &self,
        job_id: &str,
        owner: &str,
        now_ms: i64,
        lease_ms: i64,
    ) -> Result<bool> {
        self.renew_lease("telegram_update_jobs", job_id, owner, now_ms, lease_ms)
            .await
    }

    pub async fn complete_update_job(&self, job_id: &str) -> Result<()> {
        sqlx::query("UPDATE telegram_update_jobs SET status = 'completed' WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    pub async fn fail_update_job(&self, job_id: &str, error: &str) -> Result<()> {
        let truncated: String = error.chars().take(2000).collect();
        sqlx::query(
            "UPDATE telegram_update_jobs SET status = 'failed', last_error = ? WHERE id = ?",
        )
        .bind(truncated)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    // ---- Shared lease machinery ---------------------------------------

    async fn lease_next(
        &self,
        table: &str,
        bot_id: &str,
        owner: &str,
        now_ms: i64,
        lease_ms: i64,
        reclaimable: &[&str],
    ) -> Result<Option<LeasedJob>> {
        let reclaimable_list = reclaimable
            .iter()
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(",");

        let select_sql = format!(
            "SELECT id, bot_id, attempts FROM {table} \
             WHERE bot_id = ? AND available_at <= ? \
             AND (status = 'queued' OR (status IN ({reclaimable_list}) AND lease_expires_at < ?)) \
             ORDER BY available_at ASC, created_at ASC LIMIT 1"
        );

        loop {
            let candidate: Option<UpdateJobRow> = sqlx::query_as(&select_sql)
                .bind(bot_id)
                .bind(now_ms)
                .bind(now_ms)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::Store(e.to_string()))?;

            let Some(candidate) = candidate else {
                return Ok(None);
            };

            let update_sql = format!(
                "UPDATE {table} SET status = 'leased', lease_owner = ?, lease_expires_at = ?, \
                 attempts = attempts + 1 \
                 WHERE id = ? AND (status = 'queued' OR (status IN ({reclaimable_list}) AND lease_expires_at < ?))"
            );

            let result = sqlx::query(&update_sql)
                .bind(owner)
                .bind(now_ms + lease_ms)
                .bind(&candidate.id)
                .bind(now_ms)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Store(e.to_string()))?;

            if result.rows_affected() == 1 {
                return Ok(Some(LeasedJob {
                    id: candidate.id,
                    bot_id: candidate.bot_id,
                    attempts: candidate.attempts + 1,
                }));
            }
            // Lost the race (another worker claimed it first under the CAS
            // fallback) — loop and try the next candidate.
        }
    }

    async fn renew_lease(
        &self,
        table: &str,
        job_id: &str,
        owner: &str,
        now_ms: i64,
        lease_ms: i64,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE {table} SET lease_expires_at = ? WHERE id = ? AND lease_owner = ?"
        );
        let result = sqlx::query(&sql)
            .bind(now_ms + lease_ms)
            .bind(job_id)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(Error::LeaseLost(job_id.to_string()));
        }
        Ok(true)
    }

    // ---- Sessions -------------------------------------------------------

    pub async fn get_active_session(&self, bot_id: &str, chat_id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT session_id, bot_id, chat_id, adapter_name, adapter_model, project_root, \
             unsafe_until, adapter_thread_id, status, rolling_summary_md, last_turn_at \
             FROM sessions WHERE bot_id = ? AND chat_id = ? AND status = 'active'",
        )
        .bind(bot_id)
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(row.map(SessionRow::into_domain))
    }

    pub async fn get_latest_session(&self, bot_id: &str, chat_id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT session_id, bot_id, chat_id, adapter_name, adapter_model, project_root, \
             unsafe_until, adapter_thread_id, status, rolling_summary_md, last_turn_at \
             FROM sessions WHERE bot_id = ? AND chat_id = ? \
             ORDER BY (status = 'active') DESC, updated_at DESC LIMIT 1",
        )
        .bind(bot_id)
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(row.map(SessionRow::into_domain))
    }

    pub async fn get_or_create_active(
        &self,
        bot_id: &str,
        chat_id: &str,
        default_adapter: &str,
        now_ms: i64,
    ) -> Result<Session> {
        if let Some(session) = self.get_active_session(bot_id, chat_id).await? {
            return Ok(session);
        }
        self.create_fresh(bot_id, chat_id, default_adapter, now_ms)
            .await
    }

    /// Atomically demotes any existing active session for this chat to
    /// `reset` (clearing its thread id) then inserts a new active one.
    pub async fn create_fresh(
        &self,
        bot_id: &str,
        chat_id: &str,
        adapter_name: &str,
        now_ms: i64,
    ) -> Result<Session> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        sqlx::query(
            "UPDATE sessions SET status = 'reset', adapter_thread_id = NULL, updated_at = ? \
             WHERE bot_id = ? AND chat_id = ? AND status = 'active'",
        )
        .bind(now_ms)
        .bind(bot_id)
        .bind(chat_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        let session_id = new_id();
        sqlx::query(
            "INSERT INTO sessions \
             (session_id, bot_id, chat_id, adapter_name, status, rolling_summary_md, updated_at) \
             VALUES (?, ?, ?, ?, 'active', '', ?)",
        )
        .bind(&session_id)
        .bind(bot_id)
        .bind(chat_id)
        .bind(adapter_name)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        tx.commit().await.map_err(|e| Error::Store(e.to_string()))?;

        Ok(Session {
            session_id,
            bot_id: bot_id.to_string(),
            chat_id: chat_id.to_string(),
            adapter_name: adapter_name.to_string(),
            adapter_model: None,
            project_root: None,
            unsafe_until: None,
            adapter_thread_id: None,
            status: SessionStatus::Active,
            rolling_summary_md: String::new(),
            last_turn_at: None,
        })
    }

    pub async fn reset(&self, session_id: &str, now_ms: i64) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET status = 'reset', adapter_thread_id = NULL, updated_at = ? \
             WHERE session_id = ?",
        )
        .bind(now_ms)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    pub async fn set_thread_id(&self, session_id: &str, thread_id: &str, now_ms: i64) -> Result<()> {
        sqlx::query("UPDATE sessions SET adapter_thread_id = ?, updated_at = ? WHERE session_id = ?")
            .bind(thread_id)
            .bind(now_ms)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    /// Switches the adapter and clears `adapter_thread_id` — a new agent-side
    /// thread must start under the new provider.
    pub async fn set_adapter(&self, session_id: &str, adapter_name: &str, now_ms: i64) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET adapter_name = ?, adapter_thread_id = NULL, updated_at = ? \
             WHERE session_id = ?",
        )
        .bind(adapter_name)
        .bind(now_ms)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    pub async fn set_model(&self, session_id: &str, model: &str, now_ms: i64) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET adapter_model = ?, adapter_thread_id = NULL, updated_at = ? \
             WHERE session_id = ?",
        )
        .bind(model)
        .bind(now_ms)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    pub async fn set_project_root(&self, session_id: &str, root: &str, now_ms: i64) -> Result<()> {
        sqlx::query("UPDATE sessions SET project_root = ?, updated_at = ? WHERE session_id = ?")
            .bind(root)
            .bind(now_ms)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    pub async fn set_unsafe_until(
        &self,
        session_id: &str,
        unsafe_until: Option<i64>,
        now_ms: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE sessions SET unsafe_until = ?, updated_at = ? WHERE session_id = ?")
            .bind(unsafe_until)
            .bind(now_ms)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    pub async fn update_summary(
        &self,
        session_id: &str,
        turn_id: &str,
        summary_md: &str,
        now_ms: i64,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        sqlx::query(
            "UPDATE sessions SET rolling_summary_md = ?, last_turn_at = ?, updated_at = ? \
             WHERE session_id = ?",
        )
        .bind(summary_md)
        .bind(now_ms)
        .bind(now_ms)
        .bind(session_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        sqlx::query(
            "INSERT INTO session_summaries (id, session_id, turn_id, summary_md, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(new_id())
        .bind(session_id)
        .bind(turn_id)
        .bind(summary_md)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        tx.commit().await.map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    // ---- Turns & run jobs ----------------------------------------------

    /// Single transaction: insert Turn then CliRunJob. On the active-run
    /// partial-unique conflict, rolls back and returns `ActiveRunExists`
    /// rather than propagating a hard error.
    pub async fn create_turn_and_job(
        &self,
        session: &Session,
        user_text: &str,
        now_ms: i64,
    ) -> Result<CreateTurnResult> {
        if self.has_active_run(&session.bot_id, &session.chat_id).await? {
            return Ok(CreateTurnResult::ActiveRunExists);
        }

        let turn_id = new_id();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        sqlx::query(
            "INSERT INTO turns \
             (turn_id, session_id, bot_id, chat_id, user_text, status, created_at) \
             VALUES (?, ?, ?, ?, ?, 'queued', ?)",
        )
        .bind(&turn_id)
        .bind(&session.session_id)
        .bind(&session.bot_id)
        .bind(&session.chat_id)
        .bind(user_text)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        let insert_job = sqlx::query(
            "INSERT INTO cli_run_jobs \
             (id, turn_id, bot_id, chat_id, status, available_at, attempts, created_at) \
             VALUES (?, ?, ?, ?, 'queued', ?, 0, ?)",
        )
        .bind(new_id())
        .bind(&turn_id)
        .bind(&session.bot_id)
        .bind(&session.chat_id)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&mut *tx)
        .await;

        match insert_job {
            Ok(_) => {
                tx.commit().await.map_err(|e| Error::Store(e.to_string()))?;
                Ok(CreateTurnResult::Ok { turn_id })
            }
            Err(e) => {
                // A concurrent insert raced us past the pre-check above;
                // the partial-unique index is the real arbiter.
                tx.rollback().await.ok();
                if is_unique_violation(&e) {
                    Ok(CreateTurnResult::ActiveRunExists)
                } else {
                    Err(Error::Store(e.to_string()))
                }
            }
        }
    }

    pub async fn has_active_run(&self, bot_id: &str, chat_id: &str) -> Result<bool> {
        let list = RUN_JOB_NONTERMINAL
            .iter()
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT id FROM cli_run_jobs WHERE bot_id = ? AND chat_id = ? AND status IN ({list}) LIMIT 1"
        );
        let row: Option<(String,)> = sqlx::query_as(&sql)
            .bind(bot_id)
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(row.is_some())
    }

    pub async fn lease_next_run_job(
        &self,
        bot_id: &str,
        owner: &str,
        now_ms: i64,
        lease_ms: i64,
    ) -> Result<Option<LeasedRunJob>> {
        let leased = self
            .lease_next(
                "cli_run_jobs",
                bot_id,
                owner,
                now_ms,
                lease_ms,
                &["leased", "in_flight"],
            )
            .await?;
        let Some(leased) = leased else {
            return Ok(None);
        };
        let row: RunJobRow = sqlx::query_as(
            "SELECT id, turn_id, bot_id, chat_id, status, attempts FROM cli_run_jobs WHERE id = ?",
        )
        .bind(&leased.id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(Some(LeasedRunJob {
            id: row.id,
            bot_id: row.bot_id,
            turn_id: row.turn_id,
            chat_id: row.chat_id,
            attempts: row.attempts,
        }))
    }

    pub async fn renew_run_lease(
        &self,
        job_id: &str,
        owner: &str,
        now_ms: i64,
        lease_ms: i64,
    ) -> Result<bool> {
        self.renew_lease("cli_run_jobs", job_id, owner, now_ms, lease_ms)
            .await
    }

    pub async fn mark_in_flight(&self, job_id: &str, turn_id: &str, now_ms: i64) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        sqlx::query("UPDATE cli_run_jobs SET status = 'in_flight' WHERE id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        sqlx::query("UPDATE turns SET status = 'in_flight', started_at = ? WHERE turn_id = ?")
            .bind(now_ms)
            .bind(turn_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        tx.commit().await.map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    pub async fn complete_run(
        &self,
        job_id: &str,
        turn_id: &str,
        assistant_text: &str,
        now_ms: i64,
    ) -> Result<()> {
        self.finish_run(job_id, turn_id, RunJobStatus::Completed, Some(assistant_text), None, now_ms)
            .await
    }

    pub async fn fail_run(
        &self,
        job_id: &str,
        turn_id: &str,
        error_text: &str,
        now_ms: i64,
    ) -> Result<()> {
        self.finish_run(job_id, turn_id, RunJobStatus::Failed, None, Some(error_text), now_ms)
            .await
    }

    pub async fn cancel_run(&self, job_id: &str, turn_id: &str, now_ms: i64) -> Result<()> {
        self.finish_run(job_id, turn_id, RunJobStatus::Cancelled, None, None, now_ms)
            .await
    }

    async fn finish_run(
        &self,
        job_id: &str,
        turn_id: &str,
        status: RunJobStatus,
        assistant_text: Option<&str>,
        error_text: Option<&str>,
        now_ms: i64,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        sqlx::query("UPDATE cli_run_jobs SET status = ?, last_error = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error_text)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        sqlx::query(
            "UPDATE turns SET status = ?, assistant_text = ?, error_text = ?, finished_at = ? \
             WHERE turn_id = ?",
        )
        .bind(status.as_str())
        .bind(assistant_text)
        .bind(error_text)
        .bind(now_ms)
        .bind(turn_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        tx.commit().await.map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    pub async fn cancel_active_turn(&self, bot_id: &str, chat_id: &str, now_ms: i64) -> Result<bool> {
        let list = RUN_JOB_NONTERMINAL
            .iter()
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT id, turn_id, bot_id, chat_id, status, attempts FROM cli_run_jobs \
             WHERE bot_id = ? AND chat_id = ? AND status IN ({list}) LIMIT 1"
        );
        let row: Option<RunJobRow> = sqlx::query_as(&sql)
            .bind(bot_id)
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        let Some(row) = row else {
            return Ok(false);
        };
        self.cancel_run(&row.id, &row.turn_id, now_ms).await?;
        Ok(true)
    }

    pub async fn is_turn_cancelled(&self, turn_id: &str) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM turns WHERE turn_id = ?")
            .bind(turn_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(row.map(|(s,)| s == "cancelled").unwrap_or(false))
    }

    pub async fn get_turn(&self, turn_id: &str) -> Result<Option<Turn>> {
        let row: Option<TurnRow> = sqlx::query_as(
            "SELECT turn_id, session_id, bot_id, chat_id, user_text, assistant_text, status, \
             error_text, started_at, finished_at FROM turns WHERE turn_id = ?",
        )
        .bind(turn_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(row.map(TurnRow::into_domain))
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT session_id, bot_id, chat_id, adapter_name, adapter_model, project_root, \
             unsafe_until, adapter_thread_id, status, rolling_summary_md, last_turn_at \
             FROM sessions WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(row.map(SessionRow::into_domain))
    }

    // ---- Events ----------------------------------------------------------

    pub async fn append_event(
        &self,
        turn_id: &str,
        bot_id: &str,
        seq: i64,
        event_type: &str,
        payload_json: &str,
        now_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO cli_events (id, turn_id, bot_id, seq, event_type, payload_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new_id())
        .bind(turn_id)
        .bind(bot_id)
        .bind(seq)
        .bind(event_type)
        .bind(payload_json)
        .bind(now_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Store(format!("append_event (turn={turn_id}, seq={seq}): {e}")))?;
        Ok(())
    }

    pub async fn get_turn_events_count(&self, turn_id: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cli_events WHERE turn_id = ?")
            .bind(turn_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(row.0)
    }

    // ---- Action tokens -----------------------------------------------------

    pub async fn create_token(
        &self,
        token: &str,
        bot_id: &str,
        chat_id: &str,
        action: &str,
        payload_json: &str,
        expires_at: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO action_tokens (token, bot_id, chat_id, action, payload_json, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(token)
        .bind(bot_id)
        .bind(chat_id)
        .bind(action)
        .bind(payload_json)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    pub async fn consume_token(
        &self,
        token: &str,
        bot_id: &str,
        chat_id: &str,
        now_ms: i64,
    ) -> Result<Option<ActionTokenPayload>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        let row: Option<ActionTokenRow> = sqlx::query_as(
            "SELECT token, payload_json FROM action_tokens \
             WHERE token = ? AND bot_id = ? AND chat_id = ? \
             AND consumed_at IS NULL AND expires_at >= ?",
        )
        .bind(token)
        .bind(bot_id)
        .bind(chat_id)
        .bind(now_ms)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        let Some(row) = row else {
            tx.commit().await.ok();
            return Ok(None);
        };

        let result = sqlx::query(
            "UPDATE action_tokens SET consumed_at = ? \
             WHERE token = ? AND consumed_at IS NULL AND expires_at >= ?",
        )
        .bind(now_ms)
        .bind(token)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        tx.commit().await.map_err(|e| Error::Store(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let payload: ActionTokenPayload = serde_json::from_str(&row.payload_json)?;
        Ok(Some(payload))
    }

    // ---- Deferred actions --------------------------------------------------

    pub async fn enqueue_deferred(
        &self,
        bot_id: &str,
        chat_id: &str,
        session_id: &str,
        action_type: &str,
        prompt_text: &str,
        origin_turn_id: &str,
        max_queue: i64,
        now_ms: i64,
    ) -> Result<String> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        let id = new_id();
        sqlx::query(
            "INSERT INTO deferred_button_actions \
             (id, bot_id, chat_id, session_id, action_type, prompt_text, origin_turn_id, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'queued', ?)",
        )
        .bind(&id)
        .bind(bot_id)
        .bind(chat_id)
        .bind(session_id)
        .bind(action_type)
        .bind(prompt_text)
        .bind(origin_turn_id)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        // Trim the oldest queued entries over the cap to `cancelled`. Negative
        // LIMIT (SQLite's "no limit") isn't portable to Postgres, so the cap
        // is applied in Rust instead of in the query.
        let queued_ids: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM deferred_button_actions \
             WHERE bot_id = ? AND chat_id = ? AND status = 'queued' \
             ORDER BY created_at DESC",
        )
        .bind(bot_id)
        .bind(chat_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        for (overflow_id,) in queued_ids.into_iter().skip(max_queue.max(0) as usize) {
            sqlx::query("UPDATE deferred_button_actions SET status = 'cancelled' WHERE id = ?")
                .bind(overflow_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::Store(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| Error::Store(e.to_string()))?;
        Ok(id)
    }

    /// Returns null if a non-terminal run exists for `(bot, chat)`; else
    /// promotes the oldest queued deferred action and creates its Turn+Job.
    pub async fn promote_next(
        &self,
        bot_id: &str,
        chat_id: &str,
        now_ms: i64,
    ) -> Result<Option<PromotedAction>> {
        if self.has_active_run(bot_id, chat_id).await? {
            return Ok(None);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        let row: Option<DeferredActionRow> = sqlx::query_as(
            "SELECT id, bot_id, chat_id, session_id, action_type, prompt_text, origin_turn_id, status \
             FROM deferred_button_actions \
             WHERE bot_id = ? AND chat_id = ? AND status = 'queued' \
             ORDER BY created_at ASC LIMIT 1",
        )
        .bind(bot_id)
        .bind(chat_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        let Some(row) = row else {
            tx.commit().await.ok();
            return Ok(None);
        };

        sqlx::query("UPDATE deferred_button_actions SET status = 'promoted' WHERE id = ?")
            .bind(&row.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        let turn_id = new_id();
        sqlx::query(
            "INSERT INTO turns (turn_id, session_id, bot_id, chat_id, user_text, status, created_at) \
             VALUES (?, ?, ?, ?, ?, 'queued', ?)",
        )
        .bind(&turn_id)
        .bind(&row.session_id)
        .bind(bot_id)
        .bind(chat_id)
        .bind(&row.prompt_text)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        sqlx::query(
            "INSERT INTO cli_run_jobs \
             (id, turn_id, bot_id, chat_id, status, available_at, attempts, created_at) \
             VALUES (?, ?, ?, ?, 'queued', ?, 0, ?)",
        )
        .bind(new_id())
        .bind(&turn_id)
        .bind(bot_id)
        .bind(chat_id)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        tx.commit().await.map_err(|e| Error::Store(e.to_string()))?;

        let promoted = row.into_domain();
        Ok(Some(PromotedAction {
            action_type: promoted.action_type,
            turn_id,
        }))
    }

    // ---- Metrics / audit ---------------------------------------------------

    pub async fn increment_metric(&self, bot_id: &str, key: &str, delta: i64, now_ms: i64) -> Result<()> {
        // AnyPool can't rely on a single dialect's UPSERT syntax; select then
        // insert-or-update keeps this portable across Postgres and SQLite.
        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT metric_value FROM runtime_metric_counters WHERE bot_id = ? AND metric_key = ?",
        )
        .bind(bot_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;

        if existing.is_some() {
            sqlx::query(
                "UPDATE runtime_metric_counters SET metric_value = metric_value + ?, updated_at = ? \
                 WHERE bot_id = ? AND metric_key = ?",
            )
            .bind(delta)
            .bind(now_ms)
            .bind(bot_id)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        } else {
            sqlx::query(
                "INSERT INTO runtime_metric_counters (bot_id, metric_key, metric_value, updated_at) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(bot_id)
            .bind(key)
            .bind(delta)
            .bind(now_ms)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn append_audit_log(
        &self,
        bot_id: &str,
        chat_id: &str,
        action: &str,
        result: &str,
        now_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (id, bot_id, chat_id, action, result, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(new_id())
        .bind(bot_id)
        .bind(chat_id)
        .bind(action)
        .bind(result)
        .bind(now_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    pub async fn metrics_snapshot(&self, bot_id: &str) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT metric_key, metric_value FROM runtime_metric_counters WHERE bot_id = ?",
        )
        .bind(bot_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(rows)
    }

    pub async fn queue_depth(&self, bot_id: &str, table: &str, statuses: &[&str]) -> Result<i64> {
        let list = statuses
            .iter()
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!("SELECT COUNT(*) FROM {table} WHERE bot_id = ? AND status IN ({list})");
        let row: (i64,) = sqlx::query_as(&sql)
            .bind(bot_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(row.0)
    }
}

/// Best-effort unique-violation sniff across the Postgres and SQLite error
/// text this crate's `sqlx::any` connections surface — `AnyPool` doesn't
/// expose a normalized error-code API the way a single-backend pool would.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    let text = err.to_string().to_lowercase();
    text.contains("unique") || text.contains("duplicate")
}

#[allow(dead_code)]
fn _status_is_terminal(s: RunJobStatus) -> bool {
    parse_run_job_status(s.as_str()).is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_domain::model::now_ms;
    use sqlx::any::{install_default_drivers, AnyPoolOptions};

    async fn test_store() -> Store {
        install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect in-memory sqlite");
        sqlx::raw_sql(crate::schema::SCHEMA_SQL)
            .execute(&pool)
            .await
            .expect("apply schema");
        Store::new(pool, false)
    }

    #[tokio::test]
    async fn insert_update_is_idempotent_per_bot_and_update_id() {
        let store = test_store().await;
        let now = now_ms();
        let first = store
            .insert_update("bot1", 42, Some("chat1"), "{}", now)
            .await
            .unwrap();
        let second = store
            .insert_update("bot1", 42, Some("chat1"), "{}", now)
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(store.max_update_id("bot1").await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn get_update_for_job_joins_through_to_the_raw_payload() {
        let store = test_store().await;
        let now = now_ms();
        store
            .insert_update("bot1", 7, Some("chat1"), r#"{"hello":"world"}"#, now)
            .await
            .unwrap();
        let job = store.lease_next_update_job("bot1", "worker1", now, 30_000).await.unwrap().unwrap();

        let (update_id, payload) = store.get_update_for_job(&job.id).await.unwrap().unwrap();
        assert_eq!(update_id, 7);
        assert_eq!(payload, r#"{"hello":"world"}"#);
    }

    #[tokio::test]
    async fn lease_next_update_job_excludes_unexpired_leases() {
        let store = test_store().await;
        let now = now_ms();
        store
            .insert_update("bot1", 1, Some("chat1"), "{}", now)
            .await
            .unwrap();

        let leased = store
            .lease_next_update_job("bot1", "worker-a", now, 30_000)
            .await
            .unwrap()
            .expect("job available");
        assert_eq!(leased.attempts, 1);

        let none = store
            .lease_next_update_job("bot1", "worker-b", now, 30_000)
            .await
            .unwrap();
        assert!(none.is_none(), "active lease must not be reclaimed early");
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed_by_another_worker() {
        let store = test_store().await;
        let now = now_ms();
        store
            .insert_update("bot1", 1, Some("chat1"), "{}", now)
            .await
            .unwrap();
        store
            .lease_next_update_job("bot1", "worker-a", now, 1_000)
            .await
            .unwrap()
            .unwrap();

        let later = now + 2_000;
        let reclaimed = store
            .lease_next_update_job("bot1", "worker-b", later, 30_000)
            .await
            .unwrap()
            .expect("expired lease must be reclaimable");
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn create_fresh_demotes_prior_active_session() {
        let store = test_store().await;
        let now = now_ms();
        let first = store.create_fresh("bot1", "chat1", "codex", now).await.unwrap();
        let second = store
            .create_fresh("bot1", "chat1", "codex", now + 1)
            .await
            .unwrap();
        assert_ne!(first.session_id, second.session_id);

        let active = store
            .get_active_session("bot1", "chat1")
            .await
            .unwrap()
            .expect("one active session");
        assert_eq!(active.session_id, second.session_id);
    }

    #[tokio::test]
    async fn second_turn_is_rejected_while_a_run_is_active() {
        let store = test_store().await;
        let now = now_ms();
        let session = store.create_fresh("bot1", "chat1", "codex", now).await.unwrap();

        let first = store
            .create_turn_and_job(&session, "hello", now)
            .await
            .unwrap();
        assert!(matches!(first, CreateTurnResult::Ok { .. }));

        let second = store
            .create_turn_and_job(&session, "again", now + 1)
            .await
            .unwrap();
        assert!(matches!(second, CreateTurnResult::ActiveRunExists));
    }

    #[tokio::test]
    async fn completing_a_run_allows_a_new_turn() {
        let store = test_store().await;
        let now = now_ms();
        let session = store.create_fresh("bot1", "chat1", "codex", now).await.unwrap();

        let first = store
            .create_turn_and_job(&session, "hello", now)
            .await
            .unwrap();
        let turn_id = match first {
            CreateTurnResult::Ok { turn_id } => turn_id,
            CreateTurnResult::ActiveRunExists => panic!("expected Ok"),
        };
        let job = store
            .lease_next_run_job("bot1", "worker-a", now, 30_000)
            .await
            .unwrap()
            .expect("run job available");
        store.complete_run(&job.id, &turn_id, "done", now + 1).await.unwrap();

        let second = store
            .create_turn_and_job(&session, "again", now + 2)
            .await
            .unwrap();
        assert!(matches!(second, CreateTurnResult::Ok { .. }));
    }

    #[tokio::test]
    async fn events_are_appended_with_caller_assigned_monotone_seq() {
        let store = test_store().await;
        let now = now_ms();
        let session = store.create_fresh("bot1", "chat1", "codex", now).await.unwrap();
        let turn_id = match store.create_turn_and_job(&session, "hi", now).await.unwrap() {
            CreateTurnResult::Ok { turn_id } => turn_id,
            CreateTurnResult::ActiveRunExists => panic!("expected Ok"),
        };

        let next_seq = store.get_turn_events_count(&turn_id).await.unwrap() + 1;
        store
            .append_event(&turn_id, "bot1", next_seq, "turn_started", "{}", now)
            .await
            .unwrap();
        let next_seq = store.get_turn_events_count(&turn_id).await.unwrap() + 1;
        store
            .append_event(&turn_id, "bot1", next_seq, "assistant_message", "{}", now)
            .await
            .unwrap();

        assert_eq!(store.get_turn_events_count(&turn_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn action_token_is_consumed_exactly_once() {
        let store = test_store().await;
        let now = now_ms();
        let payload = cb_domain::model::ActionTokenPayload {
            action_type: "summary".into(),
            run_source: "button".into(),
            chat_id: "chat1".into(),
            session_id: "sess1".into(),
            origin_turn_id: "turn1".into(),
        };
        let payload_json = serde_json::to_string(&payload).unwrap();
        store
            .create_token("tok-1", "bot1", "chat1", "summary", &payload_json, now + 86_400_000)
            .await
            .unwrap();

        let first = store.consume_token("tok-1", "bot1", "chat1", now).await.unwrap();
        assert!(first.is_some());
        let second = store.consume_token("tok-1", "bot1", "chat1", now).await.unwrap();
        assert!(second.is_none(), "a token must not be consumable twice");
    }

    #[tokio::test]
    async fn expired_action_token_is_not_consumable() {
        let store = test_store().await;
        let now = now_ms();
        let payload_json = "{\"action_type\":\"summary\",\"run_source\":\"button\",\"chat_id\":\"c\",\"session_id\":\"s\",\"origin_turn_id\":\"t\"}";
        store
            .create_token("tok-1", "bot1", "chat1", "summary", payload_json, now - 1)
            .await
            .unwrap();
        let result = store.consume_token("tok-1", "bot1", "chat1", now).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn deferred_action_promotes_only_when_no_run_is_active() {
        let store = test_store().await;
        let now = now_ms();
        let session = store.create_fresh("bot1", "chat1", "codex", now).await.unwrap();

        store
            .enqueue_deferred(
                "bot1",
                "chat1",
                &session.session_id,
                "summary",
                "please summarize",
                "turn0",
                10,
                now,
            )
            .await
            .unwrap();

        let promoted = store
            .promote_next("bot1", "chat1", now + 1)
            .await
            .unwrap()
            .expect("no active run, should promote");
        assert_eq!(promoted.action_type, cb_domain::model::ActionType::Summary);

        let blocked = store.promote_next("bot1", "chat1", now + 2).await.unwrap();
        assert!(blocked.is_none(), "a run is now active, nothing else should promote");
    }

    #[tokio::test]
    async fn increment_metric_accumulates_across_calls() {
        let store = test_store().await;
        let now = now_ms();
        store
            .increment_metric("bot1", "worker_heartbeat.run_worker", 1, now)
            .await
            .unwrap();
        store
            .increment_metric("bot1", "worker_heartbeat.run_worker", 1, now + 1)
            .await
            .unwrap();
        let snapshot = store.metrics_snapshot("bot1").await.unwrap();
        let (_, value) = snapshot
            .iter()
            .find(|(k, _)| k == "worker_heartbeat.run_worker")
            .expect("metric present");
        assert_eq!(*value, 2);
    }
}
