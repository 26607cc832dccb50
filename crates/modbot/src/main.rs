use std::sync::Arc;

use modbot_core::config::Config;
use modbot_mongo::MongoStores;
use modbot_queue::RedisDispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    modbot_core::logging::init("modbot")?;

    let cfg = Arc::new(Config::load()?);

    let stores = MongoStores::connect(&cfg.mongo_uri, &cfg.db_name).await?;
    stores.ensure_indexes().await?;
    let stores = Arc::new(stores);

    let dispatcher = Arc::new(RedisDispatcher::connect(&cfg.redis_url, &cfg.queue_name).await?);

    tracing::info!(
        environment = %cfg.environment,
        threshold = cfg.appeal_notify_threshold,
        "starting request-serving process"
    );

    modbot_telegram::router::run_polling(
        cfg,
        stores.clone(),
        stores.clone(),
        stores.clone(),
        stores.clone(),
        dispatcher,
    )
    .await?;

    Ok(())
}
