use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ChatId, UserId},
    Result,
};

/// Durable per-user appeal counter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppealCounter {
    pub user_id: i64,
    pub count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit entry for a submitted or approved appeal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppealLogEntry {
    pub user_id: i64,
    pub chat_id: i64,
    pub appeal_text: String,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}

/// One (chat, user) allowlist entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub chat_id: i64,
    pub user_id: i64,
    pub approved_by: i64,
    pub approved_at: DateTime<Utc>,
}

/// Per-(chat, user) warning counter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WarningRecord {
    pub chat_id: i64,
    pub user_id: i64,
    pub warnings: i64,
    pub created_at: DateTime<Utc>,
}

/// Durable counters (appeals, warnings).
///
/// Appeal counters are scoped per user across all chats; approvals are scoped
/// per chat. That asymmetry mirrors observed product behavior and is a named
/// choice, not an accident (see DESIGN.md).
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomic increment-with-upsert; returns the post-increment count.
    ///
    /// Must be a single storage-level read-modify-write: concurrent calls for
    /// the same user must not lose increments.
    async fn increment_appeals(&self, user_id: UserId) -> Result<i64>;

    /// Full reset. Deleting an absent counter is a no-op success.
    async fn reset_appeals(&self, user_id: UserId) -> Result<()>;

    /// Atomic warning increment for a (chat, user) pair.
    async fn increment_warnings(&self, chat_id: ChatId, user_id: UserId) -> Result<i64>;

    async fn reset_warnings(&self, chat_id: ChatId, user_id: UserId) -> Result<()>;
}

/// Append-only appeal audit trail.
#[async_trait]
pub trait AppealLog: Send + Sync {
    async fn log_appeal(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        appeal_text: &str,
        approved: bool,
    ) -> Result<()>;
}

/// Durable (chat, user) moderation-exempt allowlist.
///
/// `is_approved` must reflect the latest completed `approve` / `unapprove`
/// for the same key; it gates moderation entirely, so no staleness here.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Idempotent upsert; repeat calls overwrite approver and timestamp.
    async fn approve(&self, chat_id: ChatId, user_id: UserId, approver: UserId) -> Result<()>;

    /// Idempotent delete; no error if absent.
    async fn unapprove(&self, chat_id: ChatId, user_id: UserId) -> Result<()>;

    /// Deletes every record for the chat; returns the number removed.
    async fn unapprove_all(&self, chat_id: ChatId) -> Result<u64>;

    async fn is_approved(&self, chat_id: ChatId, user_id: UserId) -> Result<bool>;

    async fn count_approved(&self, chat_id: ChatId) -> Result<u64>;
}

/// Per-chat custom rules fed into the moderation prompt.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn add_rule(&self, chat_id: ChatId, rule: &str) -> Result<()>;

    /// All rules for the chat joined into one prompt-ready block
    /// (empty string when none are set).
    async fn rules_text(&self, chat_id: ChatId) -> Result<String>;
}
