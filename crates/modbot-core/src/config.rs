use std::{env, fs, path::Path, time::Duration};

use crate::{errors::Error, Result};

/// Typed configuration for the bot and worker processes.
///
/// Everything comes from the environment (or a local `.env` file); required
/// keys fail fast at startup.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub bot_token: String,
    pub mongo_uri: String,
    pub db_name: String,
    pub redis_url: String,
    pub queue_name: String,
    pub gemini_api_key: Option<String>,

    // Reviewer routing
    pub owner_id: i64,

    // Escalation / moderation behavior
    pub appeal_notify_threshold: i64,
    pub admin_cache_ttl: Duration,
    pub max_warnings: u32,

    pub environment: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let bot_token = env_str("BOT_TOKEN").and_then(non_empty).ok_or_else(|| {
            Error::Config("BOT_TOKEN environment variable is required".to_string())
        })?;
        let mongo_uri = env_str("MONGO_URI").and_then(non_empty).ok_or_else(|| {
            Error::Config("MONGO_URI environment variable is required".to_string())
        })?;

        let db_name = env_str("DB_NAME").unwrap_or_else(|| "modbot".to_string());
        let redis_url =
            env_str("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string());
        let queue_name = env_str("QUEUE_NAME").unwrap_or_else(|| "default".to_string());

        // Either common name for the Gemini key works.
        let gemini_api_key = env_str("GEMINI_API_KEY")
            .or_else(|| env_str("GOOGLE_GENAI_KEY"))
            .and_then(non_empty);

        let owner_id = env_i64("OWNER_ID").unwrap_or(0);

        let appeal_notify_threshold = env_i64("APPEAL_NOTIFY_THRESHOLD").unwrap_or(4).max(1);
        let admin_cache_ttl =
            Duration::from_secs(env_u64("ADMIN_CACHE_TTL_SECS").unwrap_or(120));
        let max_warnings = env_u32("MAX_WARNINGS").unwrap_or(3);

        let environment = env_str("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        Ok(Self {
            bot_token,
            mongo_uri,
            db_name,
            redis_url,
            queue_name,
            gemini_api_key,
            owner_id,
            appeal_notify_threshold,
            admin_cache_ttl,
            max_warnings,
            environment,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
