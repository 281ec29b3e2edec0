use cb_domain::model::{now_ms, Session};
use cb_domain::Result;
use cb_store::Store;

/// Thin façade over [`Store`]'s session operations. The partial-unique
/// "at most one active session per (bot, chat)" invariant is actually
/// enforced inside `Store::create_fresh`'s single transaction; this service
/// exists so the command handler never touches raw store methods directly
/// and so provider/model switches consistently clear `adapter_thread_id`
/// in one place.
#[derive(Clone)]
pub struct SessionService {
    store: Store,
}

impl SessionService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn get_active(&self, bot_id: &str, chat_id: &str) -> Result<Option<Session>> {
        self.store.get_active_session(bot_id, chat_id).await
    }

    /// Prefers the active session; if none, falls back to the most recently
    /// updated one regardless of status.
    pub async fn get_latest(&self, bot_id: &str, chat_id: &str) -> Result<Option<Session>> {
        self.store.get_latest_session(bot_id, chat_id).await
    }

    pub async fn get_or_create_active(
        &self,
        bot_id: &str,
        chat_id: &str,
        default_adapter: &str,
    ) -> Result<Session> {
        self.store
            .get_or_create_active(bot_id, chat_id, default_adapter, now_ms())
            .await
    }

    /// `/new`: demotes any existing active session to `reset`, then creates
    /// a fresh active one under the given adapter.
    pub async fn create_new(
        &self,
        bot_id: &str,
        chat_id: &str,
        adapter_name: &str,
    ) -> Result<Session> {
        self.store
            .create_fresh(bot_id, chat_id, adapter_name, now_ms())
            .await
    }

    /// `/reset`: ends the active session (if any) without starting a new one.
    pub async fn reset(&self, bot_id: &str, chat_id: &str) -> Result<()> {
        if let Some(session) = self.store.get_active_session(bot_id, chat_id).await? {
            self.store.reset(&session.session_id, now_ms()).await?;
        }
        Ok(())
    }

    pub async fn set_thread_id(&self, session_id: &str, thread_id: &str) -> Result<()> {
        self.store
            .set_thread_id(session_id, thread_id, now_ms())
            .await
    }

    /// `/mode`: switching provider clears `adapter_thread_id` — the prior
    /// agent-side thread is meaningless under a different CLI.
    pub async fn set_adapter(&self, session_id: &str, adapter_name: &str) -> Result<()> {
        self.store.set_adapter(session_id, adapter_name, now_ms()).await
    }

    /// `/model`: switching model also clears `adapter_thread_id`, for the
    /// same reason as a provider switch.
    pub async fn set_model(&self, session_id: &str, model: &str) -> Result<()> {
        self.store.set_model(session_id, model, now_ms()).await
    }

    pub async fn set_project_root(&self, session_id: &str, root: &str) -> Result<()> {
        self.store.set_project_root(session_id, root, now_ms()).await
    }

    pub async fn set_unsafe_until(&self, session_id: &str, unsafe_until: Option<i64>) -> Result<()> {
        self.store
            .set_unsafe_until(session_id, unsafe_until, now_ms())
            .await
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::any::{install_default_drivers, AnyPoolOptions};

    async fn test_service() -> SessionService {
        install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect in-memory sqlite");
        sqlx::raw_sql(cb_store::schema::SCHEMA_SQL)
            .execute(&pool)
            .await
            .expect("apply schema");
        SessionService::new(Store::new(pool, false))
    }

    #[tokio::test]
    async fn create_new_demotes_prior_active_and_clears_thread_id() {
        let service = test_service().await;
        let first = service.create_new("bot1", "chat1", "codex").await.unwrap();
        service.set_thread_id(&first.session_id, "t1").await.unwrap();

        let second = service.create_new("bot1", "chat1", "codex").await.unwrap();
        assert_ne!(first.session_id, second.session_id);

        let active = service.get_active("bot1", "chat1").await.unwrap().unwrap();
        assert_eq!(active.session_id, second.session_id);
        assert!(active.adapter_thread_id.is_none());
    }

    #[tokio::test]
    async fn switching_adapter_clears_thread_id() {
        let service = test_service().await;
        let session = service.create_new("bot1", "chat1", "codex").await.unwrap();
        service.set_thread_id(&session.session_id, "t1").await.unwrap();

        service.set_adapter(&session.session_id, "gemini").await.unwrap();

        let active = service.get_active("bot1", "chat1").await.unwrap().unwrap();
        assert_eq!(active.adapter_name, "gemini");
        assert!(active.adapter_thread_id.is_none());
    }

    #[tokio::test]
    async fn reset_clears_active_without_creating_a_new_session() {
        let service = test_service().await;
        service.create_new("bot1", "chat1", "codex").await.unwrap();
        service.reset("bot1", "chat1").await.unwrap();
        assert!(service.get_active("bot1", "chat1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_or_create_active_reuses_existing_session() {
        let service = test_service().await;
        let first = service
            .get_or_create_active("bot1", "chat1", "codex")
            .await
            .unwrap();
        let second = service
            .get_or_create_active("bot1", "chat1", "codex")
            .await
            .unwrap();
        assert_eq!(first.session_id, second.session_id);
    }
}
