use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::error::UsageError;
use crate::http_client::http_client;
use crate::replay::list_entries;
use crate::staging::StagingArea;

/// Upstream caps `count` per page.
pub const MAX_PAGE_SIZE: usize = 200;
const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerTarget {
    Id { platform: String, id: String },
    Name(String),
}

impl PlayerTarget {
    /// The identity wins when both are given.
    pub fn from_parts(
        player_id: Option<&str>,
        player_name: Option<&str>,
    ) -> Result<Self, UsageError> {
        let player_id = player_id.map(str::trim).filter(|s| !s.is_empty());
        let player_name = player_name.map(str::trim).filter(|s| !s.is_empty());
        match (player_id, player_name) {
            (Some(raw), name) => {
                if name.is_some() {
                    warn!(player_id = raw, "both player id and name given, searching by id");
                }
                let Some((platform, id)) = raw.split_once(':') else {
                    return Err(UsageError::MalformedPlayerId(raw.to_string()));
                };
                if platform.is_empty() || id.is_empty() {
                    return Err(UsageError::MalformedPlayerId(raw.to_string()));
                }
                Ok(PlayerTarget::Id {
                    platform: platform.to_ascii_lowercase(),
                    id: id.to_string(),
                })
            }
            (None, Some(name)) => Ok(PlayerTarget::Name(name.to_string())),
            (None, None) => Err(UsageError::MissingTarget),
        }
    }

    fn query_pair(&self) -> (&'static str, String) {
        match self {
            PlayerTarget::Id { platform, id } => ("player-id", format!("{platform}:{id}")),
            PlayerTarget::Name(name) => ("player-name", name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub target: PlayerTarget,
    /// Normalized to UTC, second precision.
    pub created_after: String,
    pub count: usize,
}

impl SearchQuery {
    pub fn new(target: PlayerTarget, created_after: &str, count: usize) -> Result<Self, UsageError> {
        if count == 0 {
            return Err(UsageError::ZeroCount);
        }
        let parsed = DateTime::parse_from_rfc3339(created_after.trim())
            .map_err(|_| UsageError::InvalidCreatedAfter(created_after.to_string()))?;
        Ok(Self {
            target,
            created_after: parsed
                .with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            count,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Staged { found: usize },
    RateLimited,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Downloaded,
    AlreadyStaged,
    RateLimited,
    Failed(String),
}

impl FetchOutcome {
    /// Whether producing this outcome involved an upstream request.
    pub fn hit_network(&self) -> bool {
        !matches!(self, FetchOutcome::AlreadyStaged)
    }
}

/// Where replays come from. Implementations stage what they fetch.
pub trait ReplaySource {
    /// Writes the raw search payload to the raw staging file.
    fn search(&self, query: &SearchQuery) -> SearchOutcome;

    /// Writes `<id>.json` into the dump directory unless already present.
    fn fetch_replay(&self, replay_id: &str) -> FetchOutcome;
}

pub struct SourceClient {
    http: Client,
    base_url: String,
    staging: StagingArea,
    rate_limit_cooldown: Duration,
}

enum Reply {
    Json(Value),
    RateLimited,
    Failed(String),
}

impl SourceClient {
    pub fn new(cfg: &IngestConfig, staging: StagingArea) -> Result<Self> {
        let http = http_client(&cfg.api_key, cfg.http_timeout)?;
        Ok(Self::with_client(
            http,
            &cfg.base_url,
            staging,
            cfg.rate_limit_cooldown,
        ))
    }

    pub fn with_client(
        http: Client,
        base_url: &str,
        staging: StagingArea,
        rate_limit_cooldown: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            staging,
            rate_limit_cooldown,
        }
    }

    fn get_json(&self, url: &str, query: &[(&str, String)]) -> Reply {
        let resp = match self.http.get(url).query(query).send() {
            Ok(resp) => resp,
            Err(err) => return Reply::Failed(format!("request failed: {err}")),
        };
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(
                cooldown_ms = self.rate_limit_cooldown.as_millis() as u64,
                "rate limited by upstream, cooling down"
            );
            thread::sleep(self.rate_limit_cooldown);
            return Reply::RateLimited;
        }
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            let snippet = body.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();
            return Reply::Failed(format!("http {status}: {snippet}"));
        }
        match resp.json::<Value>() {
            Ok(value) => Reply::Json(value),
            Err(err) => Reply::Failed(format!("invalid json body: {err}")),
        }
    }

    fn resolve_next(&self, next: &str) -> String {
        if next.starts_with("http://") || next.starts_with("https://") {
            next.to_string()
        } else {
            format!("{}/{}", self.base_url, next.trim_start_matches('/'))
        }
    }
}

impl ReplaySource for SourceClient {
    fn search(&self, query: &SearchQuery) -> SearchOutcome {
        let (target_key, target_value) = query.target.query_pair();
        info!(
            player = %target_value,
            created_after = %query.created_after,
            count = query.count,
            "searching replays"
        );
        let first_page = vec![
            ("created-after", query.created_after.clone()),
            ("count", query.count.min(MAX_PAGE_SIZE).to_string()),
            (target_key, target_value),
            ("sort-by", "replay-date".to_string()),
            ("sort-dir", "asc".to_string()),
        ];

        let mut url = format!("{}/replays", self.base_url);
        let mut params = first_page;
        let mut entries: Vec<Value> = Vec::new();
        loop {
            let page = match self.get_json(&url, &params) {
                Reply::Json(page) => page,
                Reply::RateLimited => return SearchOutcome::RateLimited,
                Reply::Failed(reason) => {
                    warn!(%reason, "replay search failed");
                    return SearchOutcome::Failed(reason);
                }
            };
            let batch = list_entries(&page);
            debug!(page_len = batch.len(), "received search page");
            entries.extend(batch.iter().cloned());
            if entries.len() >= query.count || batch.is_empty() {
                break;
            }
            let Some(next) = page.get("next").and_then(|v| v.as_str()) else {
                break;
            };
            url = self.resolve_next(next);
            params = Vec::new();
        }
        entries.truncate(query.count);

        let found = entries.len();
        let payload = json!({ "count": found, "list": entries });
        if let Err(err) = self.staging.write_raw_list(&payload) {
            return SearchOutcome::Failed(format!("{err:#}"));
        }
        info!(found, "search results staged");
        SearchOutcome::Staged { found }
    }

    fn fetch_replay(&self, replay_id: &str) -> FetchOutcome {
        if self.staging.has_replay(replay_id) {
            debug!(replay_id, "replay already staged");
            return FetchOutcome::AlreadyStaged;
        }
        if let Err(err) = self.staging.replay_path(replay_id) {
            return FetchOutcome::Failed(err.to_string());
        }

        let url = format!("{}/replays/{replay_id}", self.base_url);
        match self.get_json(&url, &[]) {
            Reply::Json(doc) => match self.staging.write_replay(replay_id, &doc) {
                Ok(_) => {
                    info!(replay_id, "replay downloaded");
                    FetchOutcome::Downloaded
                }
                Err(err) => FetchOutcome::Failed(format!("{err:#}")),
            },
            Reply::RateLimited => FetchOutcome::RateLimited,
            Reply::Failed(reason) => {
                warn!(replay_id, %reason, "replay download failed");
                FetchOutcome::Failed(reason)
            }
        }
    }
}
