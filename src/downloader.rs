use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::source_client::{FetchOutcome, ReplaySource};
use crate::staging::{StageResult, StagingArea};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadPolicy {
    /// Minimum pause after every call that reached the network.
    pub delay: Duration,
    /// Extra attempts for an id that came back rate limited.
    pub rate_limit_retries: u32,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(550),
            rate_limit_retries: 3,
        }
    }
}

impl DownloadPolicy {
    pub fn from_config(cfg: &IngestConfig) -> Self {
        Self {
            delay: cfg.download_delay,
            rate_limit_retries: cfg.rate_limit_retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFailure {
    pub replay_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub requested: usize,
    pub downloaded: usize,
    pub already_staged: usize,
    pub failures: Vec<DownloadFailure>,
}

/// Fetches every staged candidate into the dump directory. Failures are
/// recorded per id and never stop the batch.
pub fn download_candidates<S: ReplaySource + ?Sized>(
    source: &S,
    staging: &StagingArea,
    policy: &DownloadPolicy,
) -> Result<StageResult<DownloadReport>> {
    let Some(candidates) = staging.read_candidates()? else {
        let path = staging.candidates_path();
        warn!(path = %path.display(), "no staged candidates to download");
        return Ok(StageResult::MissingInput(path));
    };

    let mut report = DownloadReport {
        requested: candidates.len(),
        ..DownloadReport::default()
    };
    for candidate in &candidates {
        match fetch_with_retry(source, &candidate.id, policy) {
            FetchOutcome::Downloaded => report.downloaded += 1,
            FetchOutcome::AlreadyStaged => report.already_staged += 1,
            FetchOutcome::RateLimited => report.failures.push(DownloadFailure {
                replay_id: candidate.id.clone(),
                reason: "still rate limited after retries".to_string(),
            }),
            FetchOutcome::Failed(reason) => report.failures.push(DownloadFailure {
                replay_id: candidate.id.clone(),
                reason,
            }),
        }
    }

    info!(
        requested = report.requested,
        downloaded = report.downloaded,
        already_staged = report.already_staged,
        failed = report.failures.len(),
        "downloads finished"
    );
    Ok(StageResult::Completed(report))
}

fn fetch_with_retry<S: ReplaySource + ?Sized>(
    source: &S,
    replay_id: &str,
    policy: &DownloadPolicy,
) -> FetchOutcome {
    let mut attempt = 0u32;
    loop {
        let outcome = source.fetch_replay(replay_id);
        if outcome.hit_network() && !policy.delay.is_zero() {
            thread::sleep(policy.delay);
        }
        if outcome != FetchOutcome::RateLimited || attempt >= policy.rate_limit_retries {
            return outcome;
        }
        attempt += 1;
        warn!(replay_id, attempt, "retrying rate limited download");
    }
}
