use thiserror::Error;

/// Faults in process configuration. Raised before a pipeline run starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("env var 'BALLCHASING_API_KEY' is not set")]
    MissingApiKey,
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Faults in how the ingestion trigger was called.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("either a player id or a player name is required")]
    MissingTarget,
    #[error("player id {0:?} must look like 'platform:id'")]
    MalformedPlayerId(String),
    #[error("created-after {0:?} is not an RFC 3339 timestamp")]
    InvalidCreatedAfter(String),
    #[error("match count must be at least 1")]
    ZeroCount,
}
