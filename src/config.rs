use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "https://ballchasing.com/api";
const DEFAULT_DATA_DIR: &str = "data/temp";
const DEFAULT_DB_PATH: &str = "data/rocket_league.db";
const DEFAULT_DOWNLOAD_DELAY_MS: u64 = 550;
const DEFAULT_RATE_LIMIT_COOLDOWN_MS: u64 = 2_000;
const DEFAULT_RATE_LIMIT_RETRIES: u32 = 3;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub api_key: String,
    pub base_url: String,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub http_timeout: Duration,
    pub download_delay: Duration,
    pub rate_limit_cooldown: Duration,
    pub rate_limit_retries: u32,
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = env::var("BALLCHASING_API_KEY")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        let base_url = env::var("BALLCHASING_BASE_URL")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "BALLCHASING_BASE_URL",
                value: base_url,
            });
        }

        let data_dir = env_path("REPLAY_INGEST_DATA_DIR", DEFAULT_DATA_DIR);
        let db_path = db_path_from_env();
        let http_timeout_secs =
            env_u64("REPLAY_INGEST_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS).clamp(1, 300);
        let download_delay_ms =
            env_u64("REPLAY_INGEST_DOWNLOAD_DELAY_MS", DEFAULT_DOWNLOAD_DELAY_MS);
        let cooldown_ms = env_u64(
            "REPLAY_INGEST_RATE_LIMIT_COOLDOWN_MS",
            DEFAULT_RATE_LIMIT_COOLDOWN_MS,
        );
        let rate_limit_retries = env_u64(
            "REPLAY_INGEST_RATE_LIMIT_RETRIES",
            u64::from(DEFAULT_RATE_LIMIT_RETRIES),
        )
        .min(10) as u32;

        Ok(Self {
            api_key,
            base_url,
            data_dir,
            db_path,
            http_timeout: Duration::from_secs(http_timeout_secs),
            download_delay: Duration::from_millis(download_delay_ms),
            rate_limit_cooldown: Duration::from_millis(cooldown_ms),
            rate_limit_retries,
        })
    }
}

/// SQLite path alone, for tools that never talk to the upstream API.
pub fn db_path_from_env() -> PathBuf {
    env_path("REPLAY_INGEST_DB_PATH", DEFAULT_DB_PATH)
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env vars are process-global, so every case lives in one test.
    #[test]
    fn from_env_requires_key_and_applies_defaults() {
        unsafe {
            env::remove_var("BALLCHASING_API_KEY");
            env::remove_var("BALLCHASING_BASE_URL");
            env::remove_var("REPLAY_INGEST_RATE_LIMIT_RETRIES");
            env::remove_var("REPLAY_INGEST_DOWNLOAD_DELAY_MS");
        }
        assert_eq!(
            IngestConfig::from_env().unwrap_err(),
            ConfigError::MissingApiKey
        );
        unsafe { env::set_var("REPLAY_INGEST_DB_PATH", "/tmp/elsewhere.db") };
        assert_eq!(db_path_from_env(), PathBuf::from("/tmp/elsewhere.db"));
        unsafe { env::remove_var("REPLAY_INGEST_DB_PATH") };
        assert_eq!(db_path_from_env(), PathBuf::from(DEFAULT_DB_PATH));

        unsafe { env::set_var("BALLCHASING_API_KEY", "   ") };
        assert_eq!(
            IngestConfig::from_env().unwrap_err(),
            ConfigError::MissingApiKey
        );

        unsafe {
            env::set_var("BALLCHASING_API_KEY", " secret ");
            env::set_var("REPLAY_INGEST_RATE_LIMIT_RETRIES", "99");
        }
        let cfg = IngestConfig::from_env().expect("config should load");
        assert_eq!(cfg.api_key, "secret");
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.download_delay, Duration::from_millis(550));
        assert_eq!(cfg.rate_limit_retries, 10);

        unsafe { env::set_var("BALLCHASING_BASE_URL", "ftp://nope") };
        assert!(matches!(
            IngestConfig::from_env(),
            Err(ConfigError::InvalidValue { .. })
        ));

        unsafe {
            env::remove_var("BALLCHASING_API_KEY");
            env::remove_var("BALLCHASING_BASE_URL");
            env::remove_var("REPLAY_INGEST_RATE_LIMIT_RETRIES");
        }
    }
}
