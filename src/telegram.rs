use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("telegram transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram api error on {method}: {description}")]
    Api { method: &'static str, description: String },
}

/// Markup flavour for outgoing text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Markdown,
    MarkdownV2,
}

impl ParseMode {
    fn as_str(self) -> &'static str {
        match self {
            ParseMode::Markdown => "Markdown",
            ParseMode::MarkdownV2 => "MarkdownV2",
        }
    }
}

/// Outbound side of the chat platform
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str, parse_mode: Option<ParseMode>) -> Result<(), TransportError>;

    async fn send_image(&self, chat_id: i64, png: Vec<u8>, caption: &str) -> Result<(), TransportError>;

    /// Reply quoting the sender's message
    async fn reply_to(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TgUser>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgUser {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Bot API client over HTTPS
pub struct TelegramClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(client: reqwest::Client, api_base: &str, token: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Long poll for new updates starting at `offset`
    pub async fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>, TransportError> {
        let response = self
            .client
            .get(self.endpoint("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout.as_secs().to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            // leave room for the server-side long poll
            .timeout(timeout + Duration::from_secs(20))
            .send()
            .await?;
        let updates: Vec<Update> = unwrap_api("getUpdates", response.json().await?)?;
        if !updates.is_empty() {
            debug!(count = updates.len(), offset, "received updates");
        }
        Ok(updates)
    }

    async fn call(&self, method: &'static str, body: Value) -> Result<(), TransportError> {
        let response = self.client.post(self.endpoint(method)).json(&body).send().await?;
        unwrap_api::<Value>(method, response.json().await?)?;
        Ok(())
    }
}

fn unwrap_api<T>(method: &'static str, response: ApiResponse<T>) -> Result<T, TransportError> {
    match response {
        ApiResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        ApiResponse { description, .. } => Err(TransportError::Api {
            method,
            description: description.unwrap_or_else(|| "no description".to_string()),
        }),
    }
}

fn text_body(chat_id: i64, text: &str, parse_mode: Option<ParseMode>) -> Value {
    let mut body = json!({ "chat_id": chat_id, "text": text });
    if let Some(mode) = parse_mode {
        body["parse_mode"] = json!(mode.as_str());
    }
    body
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str, parse_mode: Option<ParseMode>) -> Result<(), TransportError> {
        self.call("sendMessage", text_body(chat_id, text, parse_mode)).await
    }

    async fn send_image(&self, chat_id: i64, png: Vec<u8>, caption: &str) -> Result<(), TransportError> {
        let photo = Part::bytes(png).file_name("stats.png").mime_str("image/png")?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("photo", photo);

        let response = self
            .client
            .post(self.endpoint("sendPhoto"))
            .multipart(form)
            .send()
            .await?;
        unwrap_api::<Value>("sendPhoto", response.json().await?)?;
        Ok(())
    }

    async fn reply_to(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        parse_mode: Option<ParseMode>,
    ) -> Result<(), TransportError> {
        let mut body = text_body(chat_id, text, parse_mode);
        body["reply_parameters"] = json!({ "message_id": message_id, "allow_sending_without_reply": true });
        self.call("sendMessage", body).await
    }
}

/// Escape text for MarkdownV2 messages
pub fn escape_markdown_v2(text: &str) -> String {
    const SPECIAL: &[char] = &[
        '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    ];
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if SPECIAL.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_markdown_v2() {
        assert_eq!(escape_markdown_v2("john_doe"), "john\\_doe");
        assert_eq!(escape_markdown_v2("a.b-c!"), "a\\.b\\-c\\!");
        assert_eq!(escape_markdown_v2("алиса"), "алиса");
    }

    #[test]
    fn test_update_parsing() {
        let raw = r#"{
            "ok": true,
            "result": [
                {"update_id": 10, "message": {"message_id": 5, "from": {"id": 42, "is_bot": false, "first_name": "A"}, "chat": {"id": 42, "type": "private"}, "date": 0, "text": "/stats 01-03-2024 07-03-2024"}},
                {"update_id": 11, "edited_message": {"message_id": 6}}
            ]
        }"#;
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        let updates = unwrap_api("getUpdates", response).unwrap();

        assert_eq!(updates.len(), 2);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.from.as_ref().unwrap().id, 42);
        assert_eq!(message.text.as_deref(), Some("/stats 01-03-2024 07-03-2024"));
        assert!(updates[1].message.is_none());
    }

    #[test]
    fn test_api_error_is_surfaced() {
        let response: ApiResponse<Value> =
            serde_json::from_str(r#"{"ok": false, "error_code": 401, "description": "Unauthorized"}"#).unwrap();
        let err = unwrap_api("sendMessage", response).unwrap_err();
        assert_eq!(err.to_string(), "telegram api error on sendMessage: Unauthorized");
    }

    #[test]
    fn test_text_body_parse_mode() {
        assert!(text_body(1, "hi", None).get("parse_mode").is_none());
        assert_eq!(text_body(1, "hi", Some(ParseMode::MarkdownV2))["parse_mode"], "MarkdownV2");
    }

    #[test]
    fn test_endpoint_trims_base() {
        let client = TelegramClient::new(reqwest::Client::new(), "https://api.telegram.org/ ", "T0K");
        assert_eq!(client.endpoint("getUpdates"), "https://api.telegram.org/botT0K/getUpdates");
    }
}
