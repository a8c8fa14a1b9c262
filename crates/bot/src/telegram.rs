//! Telegram Bot API wire types and the outbound transport.
//!
//! Incoming updates arrive over the webhook as JSON; every field a client
//! could omit is optional so a partial update deserializes instead of
//! failing the whole request. Outbound calls go through [`ChatTransport`],
//! which reports success as a plain `bool`: a dropped reply must never roll
//! back ledger state that was already committed.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ─────────────────────────────────────────────────────────────────────────────
// Incoming update types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub update_id: Option<i64>,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<Sender>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Sender {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl Sender {
    /// Display name for registration: full name, falling back to the
    /// username, falling back to a generic label.
    #[must_use]
    pub fn display_name(&self) -> String {
        let full = match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.to_string(),
            (None, Some(last)) => last.to_string(),
            (None, None) => String::new(),
        };
        let full = full.trim().to_string();
        if !full.is_empty() {
            return full;
        }
        match self.username.as_deref() {
            Some(username) if !username.is_empty() => username.to_string(),
            _ => "Usuario".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: Sender,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

/// Outbound side of the bot.
///
/// Every method returns whether the call succeeded; failures are logged by
/// the implementation and never propagated, because by the time a reply is
/// sent the ledger write has already happened.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<InlineKeyboardMarkup>,
    ) -> bool;

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        reply_markup: Option<InlineKeyboardMarkup>,
    ) -> bool;

    async fn answer_callback(&self, callback_query_id: &str, text: &str, show_alert: bool)
    -> bool;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP implementation
// ─────────────────────────────────────────────────────────────────────────────

/// [`ChatTransport`] backed by the Telegram Bot API over HTTPS.
#[derive(Clone, Debug)]
pub struct TelegramApi {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramApi {
    pub fn new(token: &str) -> Result<Self, reqwest::Error> {
        Self::with_base_url(token, TELEGRAM_API_BASE)
    }

    /// Points the client at a different API host, for tests against a stub.
    pub fn with_base_url(token: &str, base: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{token}", base.trim_end_matches('/')),
        })
    }

    async fn call(&self, method: &str, payload: serde_json::Value) -> bool {
        let url = format!("{}/{method}", self.base_url);
        match self.client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                tracing::error!(method, %status, body, "telegram api rejected call");
                false
            }
            Err(err) => {
                tracing::error!(method, %err, "telegram api call failed");
                false
            }
        }
    }
}

#[async_trait]
impl ChatTransport for TelegramApi {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<InlineKeyboardMarkup>,
    ) -> bool {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let (Some(markup), Some(map)) = (reply_markup, payload.as_object_mut()) {
            map.insert("reply_markup".to_string(), json!(markup));
        }
        self.call("sendMessage", payload).await
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        reply_markup: Option<InlineKeyboardMarkup>,
    ) -> bool {
        let mut payload = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let (Some(markup), Some(map)) = (reply_markup, payload.as_object_mut()) {
            map.insert("reply_markup".to_string(), json!(markup));
        }
        self.call("editMessageText", payload).await
    }

    async fn answer_callback(
        &self,
        callback_query_id: &str,
        text: &str,
        show_alert: bool,
    ) -> bool {
        let payload = json!({
            "callback_query_id": callback_query_id,
            "text": text,
            "show_alert": show_alert,
        });
        self.call("answerCallbackQuery", payload).await
    }
}
