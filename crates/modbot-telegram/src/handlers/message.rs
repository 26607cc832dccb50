use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use modbot_core::{
    domain::{ChatId, UserId},
    moderation::Disposition,
};

use crate::router::AppState;

/// Inbound group text: admin bypass, then hand off to the pipeline.
///
/// The request path never waits on classification; it only enqueues. Nothing
/// here may error out to the dispatcher.
pub async fn handle_text(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let chat_id = ChatId(msg.chat.id.0);
    let user_id = UserId(user.id.0 as i64);

    // Admins are never auto-moderated.
    if state.admin_cache.is_admin_cached(chat_id, user_id).await {
        return Ok(());
    }

    let disposition = state
        .pipeline
        .handle_message(
            chat_id,
            user_id,
            user.username.as_deref(),
            msg.chat.title(),
            text,
        )
        .await;

    match disposition {
        Disposition::SkippedApproved => {
            tracing::debug!("user {} approved in chat {}, skipping", user_id.0, chat_id.0);
        }
        Disposition::Enqueued(handle) => {
            tracing::debug!("queued moderation job {} for chat {}", handle.id, chat_id.0);
        }
        Disposition::DispatchFailed => {
            tracing::warn!("moderation dispatch failed for chat {}", chat_id.0);
        }
    }

    Ok(())
}
