//! Webhook HTTP surface.
//!
//! Telegram redelivers any update that is not acknowledged with a 200, so
//! `/webhook` always answers `{"status": "ok"}` once a request reaches the
//! handler; a payload that does not look like an update is logged and
//! acknowledged anyway rather than bounced back into a retry loop.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use bot::BotContext;
use serde_json::{Value, json};

pub type ServerState = State<Arc<BotContext>>;

pub fn router(bot: Arc<BotContext>) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/health", get(health))
        .with_state(bot)
}

pub async fn run_with_listener(
    bot: Arc<BotContext>,
    listener: tokio::net::TcpListener,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "webhook server listening");
    axum::serve(listener, router(bot)).await
}

async fn webhook(State(bot): ServerState, Json(payload): Json<Value>) -> Json<Value> {
    let update = match serde_json::from_value::<bot::telegram::Update>(payload) {
        Ok(update) => update,
        Err(err) => {
            tracing::warn!(%err, "undecodable webhook payload");
            return Json(json!({"status": "ok"}));
        }
    };
    bot.handle_update(update).await;
    Json(json!({"status": "ok"}))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "message": "Bot is running"}))
}
