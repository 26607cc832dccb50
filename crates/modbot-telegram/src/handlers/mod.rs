//! Telegram update handlers.
//!
//! Each handler stays thin: validate the update shape, resolve the privilege
//! gate where needed, then call into `modbot-core`. Verdict application
//! (bans, mutes, deletions) lives with the worker's consumers, not here.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use crate::router::AppState;

mod callback;
mod commands;
mod message;

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    callback::handle_callback(q, state).await
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(msg, state).await;
        }
    }

    // Only group traffic is moderated.
    if msg.text().is_some() && (msg.chat.is_group() || msg.chat.is_supergroup()) {
        return message::handle_text(msg, state).await;
    }

    Ok(())
}
