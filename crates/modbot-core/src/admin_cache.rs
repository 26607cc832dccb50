//! Time-bounded cache of chat administrator sets.
//!
//! Gates privileged actions without a platform round-trip per call. The TTL
//! is a staleness bound, not a correctness bound: a demotion during the TTL
//! window stays invisible to this process until expiry. The cache is
//! process-local and unsynchronized across instances; the live platform
//! membership remains the source of truth.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

use crate::{
    domain::{ChatId, UserId},
    ports::AdminApi,
};

struct CacheEntry {
    admins: HashSet<i64>,
    expires: Instant,
}

pub struct AdminCache {
    api: Arc<dyn AdminApi>,
    ttl: Duration,
    entries: Mutex<HashMap<i64, CacheEntry>>,
    refresh_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl AdminCache {
    pub fn new(api: Arc<dyn AdminApi>, ttl: Duration) -> Self {
        Self {
            api,
            ttl,
            entries: Mutex::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Uncached single-member lookup. Any platform error returns `false`:
    /// an error must never grant elevated privilege.
    pub async fn is_admin(&self, chat_id: ChatId, user_id: UserId) -> bool {
        match self.api.is_chat_admin(chat_id, user_id).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("admin lookup failed for chat {}: {e}", chat_id.0);
                false
            }
        }
    }

    /// Cached membership check.
    ///
    /// Hit within TTL: no external call. Miss or expiry: one full
    /// administrator-set refresh per chat at a time (concurrent lookups
    /// against the same expired chat wait for the first refresh instead of
    /// each issuing their own). Refresh failure falls back to the uncached
    /// single-member lookup.
    pub async fn is_admin_cached(&self, chat_id: ChatId, user_id: UserId) -> bool {
        self.is_admin_cached_at(chat_id, user_id, Instant::now())
            .await
    }

    async fn is_admin_cached_at(&self, chat_id: ChatId, user_id: UserId, now: Instant) -> bool {
        if let Some(hit) = self.lookup(chat_id, user_id, now).await {
            return hit;
        }

        let gate = self.refresh_gate(chat_id.0).await;
        let _guard = gate.lock().await;

        // A contender may have refreshed while we waited on the gate.
        if let Some(hit) = self.lookup(chat_id, user_id, now).await {
            return hit;
        }

        match self.api.chat_administrators(chat_id).await {
            Ok(admins) => {
                let set: HashSet<i64> = admins.iter().map(|u| u.0).collect();
                let is_admin = set.contains(&user_id.0);
                self.entries.lock().await.insert(
                    chat_id.0,
                    CacheEntry {
                        admins: set,
                        expires: now + self.ttl,
                    },
                );
                is_admin
            }
            Err(e) => {
                tracing::warn!("admin list refresh failed for chat {}: {e}", chat_id.0);
                self.is_admin(chat_id, user_id).await
            }
        }
    }

    /// Drop the cached set for a chat (e.g. after promoting someone).
    pub async fn invalidate(&self, chat_id: ChatId) {
        self.entries.lock().await.remove(&chat_id.0);
    }

    async fn lookup(&self, chat_id: ChatId, user_id: UserId, now: Instant) -> Option<bool> {
        let entries = self.entries.lock().await;
        let entry = entries.get(&chat_id.0)?;
        if entry.expires > now {
            Some(entry.admins.contains(&user_id.0))
        } else {
            None
        }
    }

    async fn refresh_gate(&self, chat_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry(chat_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
