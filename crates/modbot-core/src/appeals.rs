//! Appeal escalation: durable per-user counters, reviewer notification on
//! threshold crossing, and the idempotent approval callback.
//!
//! `submit_appeal` is an explicit sequence of independently guarded steps
//! (log, enqueue, increment, notify). The outcome is composed from the
//! state-mutating steps only; a logging or notification failure never masks a
//! counter failure and vice versa.

use std::sync::Arc;

use crate::{
    domain::{ChatId, MessageRef, UserId},
    errors::Error,
    messaging::{types::InlineKeyboard, MessagingPort},
    moderation::AppealJobArgs,
    ports::{tasks, JobDispatcher},
    store::{AppealLog, CounterStore},
    Result,
};

/// Opaque reviewer-action payload encoding (user, chat).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApprovalToken {
    pub user_id: UserId,
    pub chat_id: ChatId,
}

impl ApprovalToken {
    pub const PREFIX: &'static str = "approve";

    pub fn new(user_id: UserId, chat_id: ChatId) -> Self {
        Self { user_id, chat_id }
    }

    /// `approve:<user_id>:<chat_id>`
    pub fn callback_data(&self) -> String {
        format!("{}:{}:{}", Self::PREFIX, self.user_id.0, self.chat_id.0)
    }

    /// Quick routing check for the callback handler.
    pub fn matches(data: &str) -> bool {
        data.strip_prefix(Self::PREFIX)
            .is_some_and(|rest| rest.starts_with(':'))
    }

    pub fn parse(data: &str) -> Result<Self> {
        let mut parts = data.split(':');
        let prefix = parts.next().unwrap_or("");
        let (Some(user_raw), Some(chat_raw)) = (parts.next(), parts.next()) else {
            return Err(Error::MalformedToken(data.to_string()));
        };
        if prefix != Self::PREFIX {
            return Err(Error::MalformedToken(data.to_string()));
        }

        let user_id = user_raw
            .parse::<i64>()
            .map_err(|_| Error::InvalidId(user_raw.to_string()))?;
        let chat_id = chat_raw
            .parse::<i64>()
            .map_err(|_| Error::InvalidId(chat_raw.to_string()))?;

        Ok(Self {
            user_id: UserId(user_id),
            chat_id: ChatId(chat_id),
        })
    }
}

/// Result of one `submit_appeal` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Post-increment count (1 when the counter store was unreachable).
    pub count: i64,
    /// True only when the threshold was crossed AND the reviewer
    /// notification was delivered.
    pub handled: bool,
    /// True when the counter increment failed and the count above is a
    /// fallback, not the stored value.
    pub degraded: bool,
}

pub struct AppealEngine {
    counters: Arc<dyn CounterStore>,
    log: Arc<dyn AppealLog>,
    dispatcher: Arc<dyn JobDispatcher>,
    messenger: Arc<dyn MessagingPort>,
    threshold: i64,
}

impl AppealEngine {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        log: Arc<dyn AppealLog>,
        dispatcher: Arc<dyn JobDispatcher>,
        messenger: Arc<dyn MessagingPort>,
        threshold: i64,
    ) -> Self {
        Self {
            counters,
            log,
            dispatcher,
            messenger,
            threshold: threshold.max(1),
        }
    }

    /// Handle one submitted appeal.
    ///
    /// The escalation notification is attempted exactly once per threshold
    /// crossing; delivery failure is logged and reported via
    /// `handled = false`, never retried here.
    pub async fn submit_appeal(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        reason: &str,
        reviewer: ChatId,
    ) -> SubmitOutcome {
        // Audit trail first (best-effort).
        if let Err(e) = self
            .log
            .log_appeal(user_id, chat_id, reason, false)
            .await
        {
            tracing::warn!("failed to log appeal for user {}: {e}", user_id.0);
        }

        // Background appeal-quality evaluation (best-effort).
        let args = AppealJobArgs {
            user_id: user_id.0,
            text: reason.to_string(),
        };
        match serde_json::to_value(&args) {
            Ok(args) => {
                if let Err(e) = self.dispatcher.enqueue(tasks::EVALUATE_APPEAL, args).await {
                    tracing::warn!("failed to enqueue appeal evaluation: {e}");
                }
            }
            Err(e) => tracing::warn!("failed to serialize appeal job: {e}"),
        }

        // Authoritative step: atomic increment. On store failure fall back to
        // a count of 1 so the appeal still surfaces instead of being
        // silently dropped.
        let (count, degraded) = match self.counters.increment_appeals(user_id).await {
            Ok(c) => (c, false),
            Err(e) => {
                tracing::error!("failed to increment appeal count for user {}: {e}", user_id.0);
                (1, true)
            }
        };

        if count < self.threshold {
            return SubmitOutcome {
                count,
                handled: false,
                degraded,
            };
        }

        let token = ApprovalToken::new(user_id, chat_id);
        let text = format!(
            "⚠️ Appeal limit reached ({count})\n\nUser: {}\nChat: {}\nReason: {reason}\n\nClick to approve the user.",
            user_id.0, chat_id.0
        );
        let keyboard = InlineKeyboard::single("Approve User", token.callback_data());

        let handled = match self
            .messenger
            .send_inline_keyboard(reviewer, &text, keyboard)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("failed to notify reviewer about appeal: {e}");
                false
            }
        };

        SubmitOutcome {
            count,
            handled,
            degraded,
        }
    }

    /// Resolve a reviewer's approval action.
    ///
    /// Idempotent: replaying a token after the counter was already reset is a
    /// no-op success. Token errors (`MalformedToken` / `InvalidId`) are
    /// returned for display in the reviewer UI; a counter-store failure is
    /// returned as `StoreUnavailable` because it changes later escalation
    /// decisions. When `notification` carries the escalation message, it is
    /// edited in place to acknowledge the resolution (best-effort).
    pub async fn resolve_approval(
        &self,
        data: &str,
        notification: Option<MessageRef>,
        reviewer: UserId,
    ) -> Result<ApprovalToken> {
        let token = ApprovalToken::parse(data)?;

        // Audit the approval (best-effort).
        if let Err(e) = self
            .log
            .log_appeal(token.user_id, token.chat_id, "Approved by admin", true)
            .await
        {
            tracing::warn!("failed to log approval for user {}: {e}", token.user_id.0);
        }

        // Clear the slate: full reset, not a decrement.
        self.counters.reset_appeals(token.user_id).await?;

        if let Some(msg) = notification {
            let text = format!(
                "User {} approved by admin {}.",
                token.user_id.0, reviewer.0
            );
            if let Err(e) = self.messenger.edit_html(msg, &text).await {
                tracing::warn!("failed to edit approval notification: {e}");
            }
        }

        Ok(token)
    }
}
