use std::sync::Arc;

use teloxide::prelude::*;

use modbot_core::{
    domain::{ChatId, UserId},
    messaging::MessagingPort,
};

use crate::router::AppState;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

async fn reply(state: &AppState, chat_id: i64, html: &str) {
    if let Err(e) = state.messenger.send_html(ChatId(chat_id), html).await {
        tracing::warn!("failed to send reply in chat {chat_id}: {e}");
    }
}

pub async fn handle_command(
    msg: teloxide::types::Message,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let Some(sender) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let chat_id = msg.chat.id.0;
    let sender_id = UserId(sender.id.0 as i64);
    let (cmd, args) = parse_command(text);

    match cmd.as_str() {
        "approve" | "unapprove" | "unapprove_all" | "addrule" => {
            // Privilege gate goes through the TTL cache; a platform error
            // here denies, never grants.
            if !state
                .admin_cache
                .is_admin_cached(ChatId(chat_id), sender_id)
                .await
            {
                reply(&state, chat_id, "<b>❌ Only admins can use this command.</b>").await;
                return Ok(());
            }

            match cmd.as_str() {
                "approve" => approve_cmd(&msg, &state, sender_id).await,
                "unapprove" => unapprove_cmd(&msg, &state).await,
                "unapprove_all" => unapprove_all_cmd(&msg, &state).await,
                _ => add_rule_cmd(&msg, &state, &args).await,
            }
        }
        "appeal" => appeal_cmd(&msg, &state, sender_id, &args).await,
        _ => {}
    }

    Ok(())
}

async fn approve_cmd(msg: &teloxide::types::Message, state: &AppState, approver: UserId) {
    let chat_id = msg.chat.id.0;
    let Some(target) = msg.reply_to_message().and_then(|m| m.from()) else {
        reply(
            state,
            chat_id,
            "<b>Usage:</b> Reply to a user's message with /approve",
        )
        .await;
        return;
    };
    let target_id = UserId(target.id.0 as i64);

    if let Err(e) = state
        .approvals
        .approve(ChatId(chat_id), target_id, approver)
        .await
    {
        tracing::error!("approve failed in chat {chat_id}: {e}");
        reply(state, chat_id, "<b>❌ Could not save the approval, try again.</b>").await;
        return;
    }

    let total = state
        .approvals
        .count_approved(ChatId(chat_id))
        .await
        .unwrap_or(0);

    let html = format!(
        "<b>✅ User approved:</b> {}\n<b>User ID:</b> <code>{}</code>\n<b>Total approved:</b> <code>{total}</code>",
        escape_html(&target.first_name),
        target_id.0
    );
    reply(state, chat_id, &html).await;
}

async fn unapprove_cmd(msg: &teloxide::types::Message, state: &AppState) {
    let chat_id = msg.chat.id.0;
    let Some(target) = msg.reply_to_message().and_then(|m| m.from()) else {
        reply(
            state,
            chat_id,
            "<b>Usage:</b> Reply to a user's message with /unapprove",
        )
        .await;
        return;
    };
    let target_id = UserId(target.id.0 as i64);

    if let Err(e) = state.approvals.unapprove(ChatId(chat_id), target_id).await {
        tracing::error!("unapprove failed in chat {chat_id}: {e}");
        reply(state, chat_id, "<b>❌ Could not remove the approval, try again.</b>").await;
        return;
    }

    let html = format!(
        "<b>🚫 User unapproved:</b> {}",
        escape_html(&target.first_name)
    );
    reply(state, chat_id, &html).await;
}

async fn unapprove_all_cmd(msg: &teloxide::types::Message, state: &AppState) {
    let chat_id = msg.chat.id.0;
    match state.approvals.unapprove_all(ChatId(chat_id)).await {
        Ok(removed) => {
            let html =
                format!("<b>🧹 All approvals cleared.</b>\nRemoved: <code>{removed}</code>");
            reply(state, chat_id, &html).await;
        }
        Err(e) => {
            tracing::error!("unapprove_all failed in chat {chat_id}: {e}");
            reply(state, chat_id, "<b>❌ Could not clear approvals, try again.</b>").await;
        }
    }
}

async fn add_rule_cmd(msg: &teloxide::types::Message, state: &AppState, args: &str) {
    let chat_id = msg.chat.id.0;
    let rule = args.trim();
    if rule.is_empty() {
        reply(state, chat_id, "<b>Usage:</b> /addrule &lt;rule text&gt;").await;
        return;
    }

    if let Err(e) = state.rules.add_rule(ChatId(chat_id), rule).await {
        tracing::error!("addrule failed in chat {chat_id}: {e}");
        reply(state, chat_id, "<b>❌ Could not save the rule, try again.</b>").await;
        return;
    }

    let html = format!("<b>📋 Rule added:</b> {}", escape_html(rule));
    reply(state, chat_id, &html).await;
}

async fn appeal_cmd(
    msg: &teloxide::types::Message,
    state: &AppState,
    sender_id: UserId,
    args: &str,
) {
    let chat_id = msg.chat.id.0;

    if args.trim().is_empty() {
        reply(state, chat_id, "<b>Usage:</b> /appeal &lt;why you should be unbanned&gt;").await;
        return;
    }

    if state.cfg.owner_id == 0 {
        tracing::warn!("appeal received but OWNER_ID is not configured");
        reply(state, chat_id, "Appeals are not configured for this bot.").await;
        return;
    }

    let outcome = state
        .appeals
        .submit_appeal(
            sender_id,
            ChatId(chat_id),
            args.trim(),
            ChatId(state.cfg.owner_id),
        )
        .await;

    let html = if outcome.handled {
        "📨 Your appeal was forwarded for manual review."
    } else {
        "📝 Your appeal has been recorded."
    };
    reply(state, chat_id, html).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bot_mention_and_lowercases() {
        assert_eq!(
            parse_command("/Approve@ModBot some args"),
            ("approve".to_string(), "some args".to_string())
        );
        assert_eq!(parse_command("/unapprove_all"), ("unapprove_all".to_string(), String::new()));
    }

    #[test]
    fn keeps_full_argument_tail() {
        let (cmd, args) = parse_command("/appeal I was muted unfairly, twice");
        assert_eq!(cmd, "appeal");
        assert_eq!(args, "I was muted unfairly, twice");
    }

    #[test]
    fn escapes_html_metacharacters() {
        assert_eq!(escape_html("<b>&x</b>"), "&lt;b&gt;&amp;x&lt;/b&gt;");
    }
}
