//! Classification worker process.
//!
//! Consumes jobs from the broker and runs the (potentially slow) classifier
//! calls the request-serving process must never wait on. Verdicts are logged
//! here; applying them is the command layer's concern.

use std::sync::Arc;

use modbot_core::{
    config::Config,
    domain::{ChatId, UserId},
    moderation::{self, AppealJobArgs, ModAction, ModerationJobArgs},
    ports::{tasks, ClassifierClient, Job},
    store::{CounterStore, RuleStore},
};
use modbot_gemini::GeminiClient;
use modbot_mongo::MongoStores;
use modbot_queue::QueueConsumer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    modbot_core::logging::init("modbot_worker")?;

    let cfg = Config::load()?;
    let api_key = cfg.gemini_api_key.clone().ok_or_else(|| {
        anyhow::anyhow!("GEMINI_API_KEY is required for the worker process")
    })?;
    let classifier = Arc::new(GeminiClient::new(api_key));

    let stores = MongoStores::connect(&cfg.mongo_uri, &cfg.db_name).await?;
    stores.ensure_indexes().await?;
    let stores = Arc::new(stores);

    let consumer = QueueConsumer::connect(&cfg.redis_url, &cfg.queue_name).await?;
    tracing::info!(queue = %cfg.queue_name, "worker listening");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
            job = consumer.next_job() => {
                match job {
                    Ok(Some(delivery)) => {
                        run_job(
                            delivery.job.clone(),
                            classifier.as_ref(),
                            stores.as_ref(),
                            cfg.max_warnings,
                        )
                        .await;
                        // Ack only after the work is done so a crash mid-job
                        // re-delivers on the next startup.
                        if let Err(e) = consumer.ack(&delivery).await {
                            tracing::warn!("failed to ack job {}: {e}", delivery.job.id);
                        }
                    }
                    Ok(None) => {} // poll timeout
                    Err(e) => {
                        tracing::warn!("broker read failed, backing off: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    Ok(())
}

/// A bad job affects only itself: argument or classifier problems are logged
/// and the loop moves on.
async fn run_job(
    job: Job,
    classifier: &dyn ClassifierClient,
    stores: &MongoStores,
    max_warnings: u32,
) {
    match job.task.as_str() {
        tasks::PROCESS_MESSAGE => {
            let args: ModerationJobArgs = match serde_json::from_value(job.args) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("job {}: bad moderation args: {e}", job.id);
                    return;
                }
            };

            let rules = match stores.rules_text(ChatId(args.chat_id)).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("job {}: rules lookup failed: {e}", job.id);
                    String::new()
                }
            };

            let user_label = match &args.username {
                Some(name) => format!("@{name} (ID: {})", args.user_id),
                None => format!("ID: {}", args.user_id),
            };
            let chat_label = args
                .chat_title
                .clone()
                .unwrap_or_else(|| args.chat_id.to_string());

            let verdict =
                moderation::classify_message(classifier, &args.text, &user_label, &chat_label, &rules)
                    .await;

            tracing::info!(
                job = %job.id,
                chat_id = args.chat_id,
                user_id = args.user_id,
                action = ?verdict.action,
                severity = verdict.severity,
                should_delete = verdict.should_delete,
                reason = %verdict.reason,
                "message classified"
            );

            if verdict.action == ModAction::Warn {
                match stores
                    .increment_warnings(ChatId(args.chat_id), UserId(args.user_id))
                    .await
                {
                    Ok(n) => {
                        tracing::info!(
                            chat_id = args.chat_id,
                            user_id = args.user_id,
                            warnings = n,
                            "warning recorded"
                        );
                        if n >= i64::from(max_warnings) {
                            tracing::warn!(
                                chat_id = args.chat_id,
                                user_id = args.user_id,
                                warnings = n,
                                limit = max_warnings,
                                "warning limit reached"
                            );
                        }
                    }
                    Err(e) => tracing::warn!("job {}: warning write failed: {e}", job.id),
                }
            }
        }
        tasks::EVALUATE_APPEAL => {
            let args: AppealJobArgs = match serde_json::from_value(job.args) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("job {}: bad appeal args: {e}", job.id);
                    return;
                }
            };

            let verdict = moderation::classify_appeal(classifier, &args.text).await;
            tracing::info!(
                job = %job.id,
                user_id = args.user_id,
                approve = verdict.approve,
                reason = %verdict.reason,
                "appeal evaluated"
            );
        }
        other => {
            tracing::warn!("job {}: unknown task {other}", job.id);
        }
    }
}
