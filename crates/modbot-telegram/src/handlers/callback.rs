use std::sync::Arc;

use teloxide::prelude::*;

use modbot_core::{
    appeals::ApprovalToken,
    domain::{ChatId, MessageId, MessageRef, UserId},
    errors::Error,
    messaging::MessagingPort,
};

use crate::router::AppState;
use crate::TelegramMessenger;

/// Reviewer pressed the approval button.
///
/// `resolve_approval` is idempotent, so double-taps and Telegram callback
/// retries are safe. On success the engine edits the escalation message
/// itself; bad payloads are reported back on the same message, never raised
/// out of the handler.
pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let data = q.data.clone().unwrap_or_default();
    let messenger = state.messenger.clone();

    if !ApprovalToken::matches(&data) {
        let _ = messenger.answer_callback_query(&cb_id, None).await;
        return Ok(());
    }

    let reviewer = UserId(q.from.id.0 as i64);
    let notification = q.message.as_ref().map(|m| MessageRef {
        chat_id: ChatId(m.chat.id.0),
        message_id: MessageId(m.id.0),
    });

    match state
        .appeals
        .resolve_approval(&data, notification, reviewer)
        .await
    {
        Ok(_) => {
            let _ = messenger.answer_callback_query(&cb_id, Some("Approved")).await;
        }
        Err(Error::MalformedToken(_)) => {
            report(&messenger, notification, "Invalid callback payload.").await;
            let _ = messenger.answer_callback_query(&cb_id, None).await;
        }
        Err(Error::InvalidId(_)) => {
            report(&messenger, notification, "Invalid user/chat id in callback.").await;
            let _ = messenger.answer_callback_query(&cb_id, None).await;
        }
        Err(e) => {
            // Counter reset failed; leave the button in place so the
            // reviewer can retry once the store is back.
            tracing::error!("approval resolution failed: {e}");
            let _ = messenger
                .answer_callback_query(&cb_id, Some("Storage unavailable, try again."))
                .await;
        }
    }

    Ok(())
}

async fn report(
    messenger: &TelegramMessenger,
    notification: Option<MessageRef>,
    text: &str,
) {
    if let Some(msg) = notification {
        if let Err(e) = messenger.edit_html(msg, text).await {
            tracing::warn!("failed to report callback error: {e}");
        }
    }
}
