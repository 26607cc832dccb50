//! MongoDB adapter for the durable stores (counters, appeal log, approvals,
//! warnings, rules).
//!
//! Counter increments use `find_one_and_update` with `$inc` + upsert, so the
//! read-modify-write happens server-side in a single operation; concurrent
//! submissions across bot instances cannot lose increments.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::{
    bson::{doc, DateTime, Document},
    options::{
        ClientOptions, FindOneAndUpdateOptions, IndexOptions, ReturnDocument, UpdateOptions,
    },
    Client, Collection, Database, IndexModel,
};

use modbot_core::{
    domain::{ChatId, UserId},
    errors::Error,
    store::{AppealLog, ApprovalStore, CounterStore, RuleStore},
    Result,
};

fn store_err(e: mongodb::error::Error) -> Error {
    Error::StoreUnavailable(e.to_string())
}

/// One handle over all collections; clones share the connection pool.
#[derive(Clone)]
pub struct MongoStores {
    db: Database,
}

impl MongoStores {
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let mut opts = ClientOptions::parse(uri).await.map_err(store_err)?;
        // Fail fast if the cluster is unreachable at startup.
        opts.server_selection_timeout = Some(Duration::from_secs(5));
        opts.connect_timeout = Some(Duration::from_secs(10));
        opts.retry_writes = Some(true);

        let client = Client::with_options(opts).map_err(store_err)?;
        Ok(Self {
            db: client.database(db_name),
        })
    }

    fn appeal_counts(&self) -> Collection<Document> {
        self.db.collection("appeal_counts")
    }

    fn appeals(&self) -> Collection<Document> {
        self.db.collection("appeals")
    }

    fn approved_users(&self) -> Collection<Document> {
        self.db.collection("approved_users")
    }

    fn warnings(&self) -> Collection<Document> {
        self.db.collection("warnings")
    }

    fn rules(&self) -> Collection<Document> {
        self.db.collection("rules")
    }

    /// Create the unique indexes the stores rely on. Call once at startup
    /// (both bot and worker processes may call; creation is idempotent).
    pub async fn ensure_indexes(&self) -> Result<()> {
        let unique = |keys: Document| {
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build()
        };
        let plain = |keys: Document| IndexModel::builder().keys(keys).build();

        self.appeal_counts()
            .create_index(unique(doc! { "user_id": 1 }), None)
            .await
            .map_err(store_err)?;
        self.approved_users()
            .create_index(unique(doc! { "chat_id": 1, "user_id": 1 }), None)
            .await
            .map_err(store_err)?;
        self.warnings()
            .create_index(unique(doc! { "chat_id": 1, "user_id": 1 }), None)
            .await
            .map_err(store_err)?;
        self.appeals()
            .create_index(plain(doc! { "user_id": 1 }), None)
            .await
            .map_err(store_err)?;
        self.appeals()
            .create_index(plain(doc! { "chat_id": 1 }), None)
            .await
            .map_err(store_err)?;
        self.rules()
            .create_index(plain(doc! { "chat_id": 1 }), None)
            .await
            .map_err(store_err)?;

        Ok(())
    }

    async fn increment(&self, coll: Collection<Document>, filter: Document, field: &str) -> Result<i64> {
        let now = DateTime::now();
        let opts = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let updated = coll
            .find_one_and_update(
                filter.clone(),
                doc! {
                    "$inc": { field: 1_i64 },
                    "$set": { "updated_at": now },
                    "$setOnInsert": { "created_at": now },
                },
                opts,
            )
            .await
            .map_err(store_err)?;

        match updated.and_then(|d| d.get_i64(field).ok()) {
            Some(count) => Ok(count),
            // Should not happen with upsert + After; re-read to be sure.
            None => {
                let found = coll.find_one(filter, None).await.map_err(store_err)?;
                Ok(found.and_then(|d| d.get_i64(field).ok()).unwrap_or(1))
            }
        }
    }
}

#[async_trait]
impl CounterStore for MongoStores {
    async fn increment_appeals(&self, user_id: UserId) -> Result<i64> {
        self.increment(self.appeal_counts(), doc! { "user_id": user_id.0 }, "count")
            .await
    }

    async fn reset_appeals(&self, user_id: UserId) -> Result<()> {
        // delete_one on an absent document is a no-op success, which is what
        // makes the approval callback replay-safe.
        self.appeal_counts()
            .delete_one(doc! { "user_id": user_id.0 }, None)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn increment_warnings(&self, chat_id: ChatId, user_id: UserId) -> Result<i64> {
        self.increment(
            self.warnings(),
            doc! { "chat_id": chat_id.0, "user_id": user_id.0 },
            "warnings",
        )
        .await
    }

    async fn reset_warnings(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        self.warnings()
            .delete_one(doc! { "chat_id": chat_id.0, "user_id": user_id.0 }, None)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl AppealLog for MongoStores {
    async fn log_appeal(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        appeal_text: &str,
        approved: bool,
    ) -> Result<()> {
        self.appeals()
            .insert_one(
                doc! {
                    "user_id": user_id.0,
                    "chat_id": chat_id.0,
                    "appeal_text": appeal_text,
                    "approved": approved,
                    "created_at": DateTime::now(),
                },
                None,
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl ApprovalStore for MongoStores {
    async fn approve(&self, chat_id: ChatId, user_id: UserId, approver: UserId) -> Result<()> {
        let opts = UpdateOptions::builder().upsert(true).build();
        self.approved_users()
            .update_one(
                doc! { "chat_id": chat_id.0, "user_id": user_id.0 },
                doc! {
                    "$set": {
                        "chat_id": chat_id.0,
                        "user_id": user_id.0,
                        "approved_by": approver.0,
                        "approved_at": DateTime::now(),
                    }
                },
                opts,
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn unapprove(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        self.approved_users()
            .delete_one(doc! { "chat_id": chat_id.0, "user_id": user_id.0 }, None)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn unapprove_all(&self, chat_id: ChatId) -> Result<u64> {
        let res = self
            .approved_users()
            .delete_many(doc! { "chat_id": chat_id.0 }, None)
            .await
            .map_err(store_err)?;
        Ok(res.deleted_count)
    }

    async fn is_approved(&self, chat_id: ChatId, user_id: UserId) -> Result<bool> {
        let found = self
            .approved_users()
            .find_one(doc! { "chat_id": chat_id.0, "user_id": user_id.0 }, None)
            .await
            .map_err(store_err)?;
        Ok(found.is_some())
    }

    async fn count_approved(&self, chat_id: ChatId) -> Result<u64> {
        self.approved_users()
            .count_documents(doc! { "chat_id": chat_id.0 }, None)
            .await
            .map_err(store_err)
    }
}

#[async_trait]
impl RuleStore for MongoStores {
    async fn add_rule(&self, chat_id: ChatId, rule: &str) -> Result<()> {
        self.rules()
            .insert_one(
                doc! {
                    "chat_id": chat_id.0,
                    "rule": rule,
                    "created_at": DateTime::now(),
                },
                None,
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn rules_text(&self, chat_id: ChatId) -> Result<String> {
        let mut cursor = self
            .rules()
            .find(doc! { "chat_id": chat_id.0 }, None)
            .await
            .map_err(store_err)?;

        let mut lines = Vec::new();
        while let Some(d) = cursor.try_next().await.map_err(store_err)? {
            if let Ok(rule) = d.get_str("rule") {
                lines.push(format!("- {rule}"));
            }
        }
        Ok(lines.join("\n"))
    }
}
