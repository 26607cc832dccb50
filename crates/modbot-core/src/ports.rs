use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ChatId, UserId},
    Result,
};

/// Well-known task names understood by the worker pool.
pub mod tasks {
    pub const PROCESS_MESSAGE: &str = "moderation.process_message";
    pub const EVALUATE_APPEAL: &str = "moderation.evaluate_appeal";
}

/// A serializable unit of work handed to the worker pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub task: String,
    pub args: serde_json::Value,
}

/// Handle returned from a successful enqueue.
#[derive(Clone, Debug)]
pub struct JobHandle {
    pub id: String,
    pub queue: String,
}

/// Fire-and-forget handoff to an out-of-process worker pool.
///
/// Callers on the moderation path must treat a failed enqueue as non-fatal:
/// catch it, log it, and continue without classification for that message.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn enqueue(&self, task: &str, args: serde_json::Value) -> Result<JobHandle>;
}

/// One-shot text generation against the external classification service.
///
/// Returns the raw model text; verdict parsing (and the default-on-failure
/// rule) lives in `moderation`.
#[async_trait]
pub trait ClassifierClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Narrow view of the chat platform's membership API.
#[async_trait]
pub trait AdminApi: Send + Sync {
    /// Full administrator set for a chat.
    async fn chat_administrators(&self, chat_id: ChatId) -> Result<Vec<UserId>>;

    /// Single-member status lookup (admin or owner).
    async fn is_chat_admin(&self, chat_id: ChatId, user_id: UserId) -> Result<bool>;
}
