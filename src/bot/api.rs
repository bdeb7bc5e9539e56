//! Telegram Bot API client: long-poll getUpdates and best-effort sendMessage.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors talking to the Telegram Bot API.
#[derive(Debug)]
pub enum TransportError {
    /// Network or HTTP-level failure.
    Request(reqwest::Error),
    /// The response body could not be deserialized.
    Decode(serde_json::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(e) => write!(f, "telegram request failed: {e}"),
            Self::Decode(e) => write!(f, "telegram response did not decode: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(e) => Some(e),
            Self::Decode(e) => Some(e),
        }
    }
}

/// A Telegram user or bot (subset of fields).
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// A chat (subset of fields).
#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// A message (subset of fields). Non-text messages decode with empty text,
/// which matches no command.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub date: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: String,
}

/// One inbound update. `message` absent means the update carries nothing
/// actionable for the session.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

/// Response body of getUpdates. `ok` is the API-level failure flag; the
/// caller interprets it.
#[derive(Debug, Clone, Deserialize)]
pub struct GetUpdatesResponse {
    pub ok: bool,
    #[serde(default)]
    pub result: Vec<Update>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Response body of sendMessage.
#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageResponse {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<Message>,
    #[serde(default)]
    pub description: Option<String>,
}

impl SendMessageResponse {
    fn not_ok() -> Self {
        Self { ok: false, result: None, description: None }
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

/// The slice of the Bot API the session driver depends on. Tests substitute
/// a scripted client.
pub trait BotApi {
    async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<GetUpdatesResponse, TransportError>;

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
    ) -> Result<SendMessageResponse, TransportError>;
}

impl<T: BotApi> BotApi for std::sync::Arc<T> {
    async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<GetUpdatesResponse, TransportError> {
        (**self).get_updates(offset, timeout_secs).await
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
    ) -> Result<SendMessageResponse, TransportError> {
        (**self).send_message(chat_id, text).await
    }
}

/// Slack on top of the long-poll timeout so the HTTP client does not cut a
/// poll short while the server is still holding the connection.
const LONG_POLL_SLACK_SECS: u64 = 15;

const SEND_TIMEOUT_SECS: u64 = 30;

/// Low-level client for the two Bot API methods the session uses.
pub struct TgClient {
    http: reqwest::Client,
    base_url: String,
}

impl TgClient {
    pub fn new(token: &str) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(TransportError::Request)?;
        Ok(Self {
            http,
            base_url: format!("https://api.telegram.org/bot{token}"),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }
}

impl BotApi for TgClient {
    /// Long poll for updates. Blocks server-side up to `timeout_secs`; an
    /// empty `result` on timeout is a normal response, not an error. The
    /// body is decoded strictly: anything unparseable is a `TransportError`.
    async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<GetUpdatesResponse, TransportError> {
        let response = self
            .http
            .get(self.method_url("getUpdates"))
            .timeout(Duration::from_secs(timeout_secs + LONG_POLL_SLACK_SECS))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout_secs.to_string()),
            ])
            .send()
            .await
            .map_err(TransportError::Request)?;

        let body = response.text().await.map_err(TransportError::Request)?;
        serde_json::from_str(&body).map_err(TransportError::Decode)
    }

    /// Best-effort send. Network failure is a `TransportError`; a response
    /// body we cannot model is tolerated and mapped to a not-ok response.
    /// Callers never retry.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
    ) -> Result<SendMessageResponse, TransportError> {
        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .json(&SendMessageRequest { chat_id, text })
            .send()
            .await
            .map_err(TransportError::Request)?;

        let body = response.text().await.map_err(TransportError::Request)?;
        match serde_json::from_str(&body) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                debug!("sendMessage response did not decode: {e}");
                Ok(SendMessageResponse::not_ok())
            }
        }
    }
}
