use std::time::Duration;

use async_trait::async_trait;
use cb_domain::{Error, Result};
use cb_streamer::ChatSink;
use serde_json::json;

use super::types::{GetUpdatesResponse, Update};

/// Thin wrapper over the Telegram Bot HTTP API. One short-lived request per
/// call; no connection pool tuning beyond `reqwest::Client`'s own defaults.
/// Cheap to clone: `reqwest::Client` is itself a cheap `Arc`-backed handle.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(serde::Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(serde::Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<f64>,
}

#[derive(serde::Deserialize)]
struct SentMessage {
    message_id: i64,
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("building telegram HTTP client: {e}")))?;
        Ok(Self { http, base_url: format!("https://api.telegram.org/bot{token}") })
    }

    pub async fn answer_callback_query(&self, callback_query_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call::<serde_json::Value>("answerCallbackQuery", &body).await?;
        Ok(())
    }

    pub async fn send_document(&self, chat_id: i64, path: &std::path::Path) -> Result<()> {
        self.send_file(chat_id, path, "sendDocument", "document").await
    }

    pub async fn send_photo(&self, chat_id: i64, path: &std::path::Path) -> Result<()> {
        self.send_file(chat_id, path, "sendPhoto", "photo").await
    }

    async fn send_file(
        &self,
        chat_id: i64,
        path: &std::path::Path,
        method: &str,
        field: &str,
    ) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part(field.to_string(), part);

        let url = format!("{}/{method}", self.base_url);
        let resp = self.http.post(&url).multipart(form).send().await.map_err(|e| {
            Error::ChatApi(format!("{method}: {e}"))
        })?;
        self.classify::<serde_json::Value>(method, resp).await?;
        Ok(())
    }

    /// Sends a message with a single row of inline-keyboard buttons. Each
    /// pair is `(label, callback_data)`.
    pub async fn send_message_with_buttons(
        &self,
        chat_id: &str,
        text: &str,
        buttons: &[(String, String)],
    ) -> Result<String> {
        let mut body = json!({ "chat_id": chat_id_value(chat_id), "text": text });
        if !buttons.is_empty() {
            let row: Vec<serde_json::Value> = buttons
                .iter()
                .map(|(label, data)| json!({ "text": label, "callback_data": data }))
                .collect();
            body["reply_markup"] = json!({ "inline_keyboard": [row] });
        }
        let sent: SentMessage = self.call("sendMessage", &body).await?;
        Ok(sent.message_id.to_string())
    }

    pub async fn set_webhook(&self, url: &str, secret_token: &str) -> Result<()> {
        let body = json!({ "url": url, "secret_token": secret_token });
        self.call::<bool>("setWebhook", &body).await?;
        Ok(())
    }

    pub async fn delete_webhook(&self) -> Result<()> {
        self.call::<bool>("deleteWebhook", &json!({})).await?;
        Ok(())
    }

    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let body = json!({ "offset": offset, "timeout": timeout_secs });
        let url = format!("{}/getUpdates", self.base_url);
        let resp = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(timeout_secs + 10))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ChatApi(format!("getUpdates: {e}")))?;
        let parsed: GetUpdatesResponse = self.classify(&url, resp).await?;
        Ok(parsed.result)
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, method: &str, body: &serde_json::Value) -> Result<T> {
        let url = format!("{}/{method}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::ChatApi(format!("{method}: {e}")))?;
        self.classify(method, resp).await
    }

    /// Classifies the HTTP response: 429 becomes a retryable `RateLimit`
    /// carrying the platform's own `retry_after` hint, other non-2xx is
    /// fatal for that call.
    async fn classify<T: serde::de::DeserializeOwned>(&self, what: &str, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::ChatApi(format!("{what}: reading body: {e}")))?;

        if status.as_u16() == 429 {
            let retry_after = serde_json::from_str::<ApiResponse<serde_json::Value>>(&text)
                .ok()
                .and_then(|r| r.parameters)
                .and_then(|p| p.retry_after)
                .unwrap_or(1.0);
            return Err(Error::RateLimit { retry_after_secs: retry_after });
        }

        let parsed: ApiResponse<T> = serde_json::from_str(&text)
            .map_err(|e| Error::ChatApi(format!("{what}: parsing response: {e} (body: {text})")))?;

        if !parsed.ok {
            return Err(Error::ChatApi(format!(
                "{what}: {} ({})",
                parsed.description.unwrap_or_default(),
                parsed.error_code.unwrap_or_default()
            )));
        }

        parsed.result.ok_or_else(|| Error::ChatApi(format!("{what}: empty result")))
    }
}

/// Telegram accepts `chat_id` as either an integer or a `@username` string;
/// numeric chat ids are sent as JSON numbers so they round-trip cleanly.
fn chat_id_value(chat_id: &str) -> serde_json::Value {
    chat_id
        .parse::<i64>()
        .map(serde_json::Value::from)
        .unwrap_or_else(|_| serde_json::Value::from(chat_id))
}

#[async_trait]
impl ChatSink for TelegramClient {
    async fn send_message(&self, chat_id: &str, text: &str, html: bool) -> Result<String> {
        let mut body = json!({ "chat_id": chat_id_value(chat_id), "text": text });
        if html {
            body["parse_mode"] = json!("HTML");
        }
        let sent: SentMessage = self.call("sendMessage", &body).await?;
        Ok(sent.message_id.to_string())
    }

    async fn edit_message_text(&self, chat_id: &str, message_id: &str, text: &str, html: bool) -> Result<()> {
        let mut body =
            json!({ "chat_id": chat_id_value(chat_id), "message_id": message_id, "text": text });
        if html {
            body["parse_mode"] = json!("HTML");
        }
        self.call::<serde_json::Value>("editMessageText", &body).await?;
        Ok(())
    }
}
