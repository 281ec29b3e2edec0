use async_trait::async_trait;
use cb_domain::Result;

use super::TelegramClient;

/// One-shot command replies: plain text, optionally with a row of
/// inline-keyboard buttons, plus acknowledging a callback query. Distinct
/// from `cb_streamer::ChatSink`, which only knows how to send/edit the
/// live-updating per-turn message and has no concept of buttons or acks.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(&self, chat_id: &str, text: &str, buttons: &[(String, String)]) -> Result<()>;

    async fn ack_callback(&self, callback_query_id: &str, text: Option<&str>) -> Result<()>;
}

#[async_trait]
impl ReplySink for TelegramClient {
    async fn send(&self, chat_id: &str, text: &str, buttons: &[(String, String)]) -> Result<()> {
        self.send_message_with_buttons(chat_id, text, buttons).await?;
        Ok(())
    }

    async fn ack_callback(&self, callback_query_id: &str, text: Option<&str>) -> Result<()> {
        self.answer_callback_query(callback_query_id, text).await
    }
}
