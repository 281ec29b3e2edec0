use serde::{Deserialize, Serialize};

use cb_domain::model::IncomingUpdate;

/// The slice of the Telegram Bot API's `Update` object this gateway cares
/// about. Anything else (edited_message, channel_post, polls, ...) is
/// ignored — `parse` returns `None` for updates with no message or
/// callback_query. Also re-serialized verbatim as the stored raw-update
/// payload for the polling ingest path, so it round-trips through its own
/// shape rather than the platform's full `Update` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GetUpdatesResponse {
    pub result: Vec<Update>,
}

impl Update {
    /// Normalizes a message or callback_query update into the shape the
    /// command handler consumes. Returns `None` for update kinds outside
    /// that pair (edited posts, polls, etc.).
    pub fn into_incoming(self) -> Option<IncomingUpdate> {
        if let Some(msg) = self.message {
            return Some(IncomingUpdate {
                update_id: self.update_id,
                chat_id: msg.chat.id,
                user_id: msg.from.map(|u| u.id).unwrap_or_default(),
                text: msg.text,
                callback_query_id: None,
                callback_data: None,
            });
        }
        if let Some(cb) = self.callback_query {
            let chat_id = cb.message.as_ref().map(|m| m.chat.id).unwrap_or_default();
            return Some(IncomingUpdate {
                update_id: self.update_id,
                chat_id,
                user_id: cb.from.id,
                text: None,
                callback_query_id: Some(cb.id),
                callback_data: cb.data,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_update_parses_into_incoming() {
        let raw = r#"{"update_id":1,"message":{"chat":{"id":42},"from":{"id":7},"text":"/start"}}"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        let incoming = update.into_incoming().unwrap();
        assert_eq!(incoming.chat_id, 42);
        assert_eq!(incoming.user_id, 7);
        assert_eq!(incoming.text.as_deref(), Some("/start"));
    }

    #[test]
    fn callback_query_update_parses_into_incoming() {
        let raw = r#"{"update_id":2,"callback_query":{"id":"cb1","from":{"id":9},"message":{"chat":{"id":5}},"data":"act:tok"}}"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        let incoming = update.into_incoming().unwrap();
        assert_eq!(incoming.chat_id, 5);
        assert_eq!(incoming.callback_query_id.as_deref(), Some("cb1"));
        assert_eq!(incoming.callback_data.as_deref(), Some("act:tok"));
    }

    #[test]
    fn update_with_neither_kind_is_none() {
        let raw = r#"{"update_id":3}"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        assert!(update.into_incoming().is_none());
    }
}
