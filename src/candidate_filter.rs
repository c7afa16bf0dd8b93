use std::collections::HashSet;

use anyhow::Result;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::match_hash::match_hash;
use crate::replay::{self, CandidateRef};
use crate::staging::{StageResult, StagingArea};
use crate::store;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterReport {
    pub analyzed: usize,
    pub already_present: usize,
    pub candidates: Vec<CandidateRef>,
}

impl FilterReport {
    pub fn new_count(&self) -> usize {
        self.candidates.len()
    }
}

/// Drops search entries whose match is already stored and stages the rest.
/// Read-only against the store.
pub fn filter_candidates(conn: &Connection, staging: &StagingArea) -> Result<StageResult<FilterReport>> {
    let Some(payload) = staging.read_raw_list()? else {
        let path = staging.raw_list_path();
        warn!(path = %path.display(), "no staged search results to filter");
        return Ok(StageResult::MissingInput(path));
    };

    let mut report = FilterReport::default();
    let mut seen = HashSet::new();
    for entry in replay::list_entries(&payload) {
        report.analyzed += 1;
        let Some(id) = replay::str_at(Some(entry), "id").filter(|s| !s.is_empty()) else {
            warn!("search entry without id skipped");
            continue;
        };

        let hash = match_hash(entry);
        if !seen.insert(hash.clone()) || store::match_exists(conn, &hash)? {
            debug!(replay_id = %id, match_id = %hash, "match already present");
            report.already_present += 1;
            continue;
        }
        report.candidates.push(CandidateRef {
            id,
            date: replay::str_at(Some(entry), "date"),
        });
    }

    staging.write_candidates(&report.candidates)?;
    info!(
        analyzed = report.analyzed,
        already_present = report.already_present,
        new = report.new_count(),
        "candidates filtered"
    );
    Ok(StageResult::Completed(report))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entry(id: &str, blue: &[&str], duration: i64) -> serde_json::Value {
        let players = blue
            .iter()
            .map(|p| json!({ "id": { "platform": "steam", "id": p } }))
            .collect::<Vec<_>>();
        json!({
            "id": id,
            "date": "2024-05-01T10:00:00Z",
            "duration": duration,
            "blue": { "goals": 1, "players": players },
            "orange": { "goals": 0, "players": [] }
        })
    }

    #[test]
    fn skips_stored_and_repeated_matches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let staging = StagingArea::open(dir.path()).expect("staging");
        let conn = store::open_in_memory().expect("db");

        let stored = entry("r1", &["a"], 300);
        conn.execute(
            "INSERT INTO matches (id, date_upload) VALUES (?1, '2024-05-01T00:00:00Z')",
            [match_hash(&stored)],
        )
        .expect("seed match");

        staging
            .write_raw_list(&json!({ "list": [
                stored,
                entry("r2", &["b"], 310),
                entry("r2-copy", &["b"], 310),
                { "duration": 5 },
                entry("r3", &["c"], 320),
            ]}))
            .expect("write raw");

        let report = filter_candidates(&conn, &staging)
            .expect("filter")
            .completed()
            .expect("completed");
        assert_eq!(report.analyzed, 5);
        assert_eq!(report.already_present, 2);
        let ids = report.candidates.iter().map(|c| c.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["r2", "r3"]);
        assert_eq!(
            staging.read_candidates().expect("read"),
            Some(report.candidates.clone())
        );
        assert_eq!(store::count_rows(&conn, store::Table::Matches).expect("count"), 1);
    }

    #[test]
    fn missing_raw_list_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let staging = StagingArea::new(dir.path());
        let conn = store::open_in_memory().expect("db");
        assert_eq!(
            filter_candidates(&conn, &staging).expect("filter"),
            StageResult::MissingInput(staging.raw_list_path())
        );
    }
}
