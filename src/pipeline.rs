//! One trigger, one run: search, filter, download, import everything staged,
//! then clean the staging area.

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::candidate_filter::{FilterReport, filter_candidates};
use crate::downloader::{DownloadPolicy, DownloadReport, download_candidates};
use crate::importer::{ImportCounters, MatchImporter};
use crate::source_client::{ReplaySource, SearchOutcome, SearchQuery};
use crate::staging::{StageResult, StagingArea};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Searching,
    Filtering,
    Downloading,
    Importing,
    Cleaning,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunStatus {
    /// Search failed or matched nothing; no later stage ran.
    #[default]
    NoCandidates,
    Completed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    pub found: usize,
    pub filter: FilterReport,
    pub download: DownloadReport,
    pub import: ImportCounters,
}

pub struct UpdatePipeline<S> {
    conn: Connection,
    source: S,
    staging: StagingArea,
    importer: MatchImporter,
    policy: DownloadPolicy,
    stage: PipelineStage,
}

impl<S: ReplaySource> UpdatePipeline<S> {
    pub fn new(conn: Connection, source: S, staging: StagingArea, policy: DownloadPolicy) -> Self {
        Self {
            conn,
            source,
            staging,
            importer: MatchImporter::new(),
            policy,
            stage: PipelineStage::Idle,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Runs every stage once. Staging is cleaned whenever the search found
    /// something, even when a later stage fails; that failure is returned
    /// after cleaning.
    pub fn run(&mut self, query: &SearchQuery) -> Result<RunReport> {
        self.importer.reset();
        let mut report = RunReport::default();

        self.enter(PipelineStage::Searching);
        match self.search_with_retry(query) {
            SearchOutcome::Staged { found } if found > 0 => report.found = found,
            outcome => {
                info!(?outcome, "no candidates, run finished early");
                self.enter(PipelineStage::Idle);
                return Ok(report);
            }
        }

        let processed = self.process_staged(&mut report);

        self.enter(PipelineStage::Cleaning);
        let cleaned = self.staging.reset().context("clean staging area");
        self.enter(PipelineStage::Idle);
        processed?;
        cleaned?;

        report.status = RunStatus::Completed;
        info!(
            found = report.found,
            analyzed = report.filter.analyzed,
            already_present = report.filter.already_present,
            new = report.filter.new_count(),
            downloaded = report.download.downloaded,
            already_staged = report.download.already_staged,
            download_failed = report.download.failures.len(),
            imported = report.import.imported,
            duplicate = report.import.duplicate,
            failed = report.import.failed,
            "update run finished"
        );
        Ok(report)
    }

    fn process_staged(&mut self, report: &mut RunReport) -> Result<()> {
        self.enter(PipelineStage::Filtering);
        if let StageResult::Completed(filter) = filter_candidates(&self.conn, &self.staging)? {
            report.filter = filter;
        }

        self.enter(PipelineStage::Downloading);
        if let StageResult::Completed(download) =
            download_candidates(&self.source, &self.staging, &self.policy)?
        {
            report.download = download;
        }

        self.enter(PipelineStage::Importing);
        let files = self.staging.staged_replays()?;
        report.import = self.importer.import_files(&mut self.conn, &files);
        Ok(())
    }

    fn search_with_retry(&self, query: &SearchQuery) -> SearchOutcome {
        let mut attempt = 0u32;
        loop {
            let outcome = self.source.search(query);
            if outcome != SearchOutcome::RateLimited || attempt >= self.policy.rate_limit_retries {
                return outcome;
            }
            attempt += 1;
            warn!(attempt, "retrying rate limited search");
        }
    }

    fn enter(&mut self, stage: PipelineStage) {
        debug!(from = ?self.stage, to = ?stage, "pipeline stage");
        self.stage = stage;
    }
}
