//! Telegram bot layer: update routing, LLM extraction and reply formatting.
//!
//! The crate exposes two seams for testing and wiring: [`telegram::ChatTransport`]
//! for outbound Telegram calls and [`extract::Extractor`] for turning free
//! text into a structured expense. [`BotContext`] ties both to the ledger.

pub use handlers::BotContext;

pub mod extract;
pub mod handlers;
pub mod routing;
pub mod telegram;
mod ui;
