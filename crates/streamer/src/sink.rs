use async_trait::async_trait;
use cb_domain::Result;

/// The outbound surface the streamer needs from a chat platform: send a new
/// message and get its id back, or edit one already sent. `html` selects
/// `HTML` parse mode versus plain text — the concrete client translates that
/// into whatever its platform calls it.
#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn send_message(&self, chat_id: &str, text: &str, html: bool) -> Result<String>;
    async fn edit_message_text(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
        html: bool,
    ) -> Result<()>;
}
