use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use crate::replay::CandidateRef;

pub const RAW_LIST_FILE: &str = "raw_game_list.json";
pub const CANDIDATE_LIST_FILE: &str = "id-date-list-temp.json";
pub const DUMP_DIR: &str = "file-dump-tmp";

/// Result of a stage that reads its input from a staging file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult<T> {
    Completed(T),
    /// The staging file the stage reads was absent; nothing was done.
    MissingInput(PathBuf),
}

impl<T> StageResult<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            StageResult::Completed(v) => Some(v),
            StageResult::MissingInput(_) => None,
        }
    }
}

/// Transient files shared by the stages of one run.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the root and the dump directory if they are missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let staging = Self::new(root);
        fs::create_dir_all(staging.dump_dir())
            .with_context(|| format!("create staging dir {}", staging.dump_dir().display()))?;
        Ok(staging)
    }

    pub fn raw_list_path(&self) -> PathBuf {
        self.root.join(RAW_LIST_FILE)
    }

    pub fn candidates_path(&self) -> PathBuf {
        self.root.join(CANDIDATE_LIST_FILE)
    }

    pub fn dump_dir(&self) -> PathBuf {
        self.root.join(DUMP_DIR)
    }

    pub fn replay_path(&self, replay_id: &str) -> Result<PathBuf> {
        if !is_safe_replay_id(replay_id) {
            return Err(anyhow!("refusing unsafe replay id {replay_id:?}"));
        }
        Ok(self.dump_dir().join(format!("{replay_id}.json")))
    }

    pub fn has_replay(&self, replay_id: &str) -> bool {
        self.replay_path(replay_id).is_ok_and(|p| p.exists())
    }

    pub fn write_raw_list(&self, payload: &Value) -> Result<()> {
        write_json_atomic(&self.raw_list_path(), payload)
    }

    /// `None` when no search has staged anything yet.
    pub fn read_raw_list(&self) -> Result<Option<Value>> {
        read_json_if_exists(&self.raw_list_path())
    }

    pub fn write_candidates(&self, candidates: &[CandidateRef]) -> Result<()> {
        write_json_atomic(&self.candidates_path(), &candidates)
    }

    pub fn read_candidates(&self) -> Result<Option<Vec<CandidateRef>>> {
        let Some(value) = read_json_if_exists(&self.candidates_path())? else {
            return Ok(None);
        };
        let candidates = serde_json::from_value::<Vec<CandidateRef>>(value)
            .context("invalid candidate staging file")?;
        Ok(Some(candidates))
    }

    pub fn write_replay(&self, replay_id: &str, document: &Value) -> Result<PathBuf> {
        let path = self.replay_path(replay_id)?;
        fs::create_dir_all(self.dump_dir())
            .with_context(|| format!("create dump dir {}", self.dump_dir().display()))?;
        write_json_atomic(&path, document)?;
        Ok(path)
    }

    /// Every staged replay in file-name order, including leftovers from an
    /// interrupted run.
    pub fn staged_replays(&self) -> Result<Vec<PathBuf>> {
        let dir = self.dump_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
            let path = entry.context("read dump dir entry")?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Empties the dump directory and resets both staging files to `[]`.
    pub fn reset(&self) -> Result<()> {
        let dir = self.dump_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
        }
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        let empty = Value::Array(Vec::new());
        write_json_atomic(&self.raw_list_path(), &empty)?;
        write_json_atomic(&self.candidates_path(), &empty)?;
        Ok(())
    }
}

/// Parses one full replay file. Used by every reader of staged or bulk
/// replays so they accept the same files. A UTF-8 byte order mark and
/// surrounding whitespace are ignored.
pub fn read_replay_file(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str::<Value>(raw.trim_start_matches('\u{feff}').trim())
        .context("invalid replay json")
}

fn is_safe_replay_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

fn read_json_if_exists(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value = serde_json::from_str::<Value>(raw.trim())
        .with_context(|| format!("invalid json in {}", path.display()))?;
    Ok(Some(value))
}

fn write_json_atomic<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(value).context("serialize staging json")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("swap {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reset_clears_dump_and_staging_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let staging = StagingArea::open(dir.path()).expect("open staging");
        staging
            .write_raw_list(&json!({ "list": [ { "id": "a" } ] }))
            .expect("write raw");
        staging
            .write_replay("abc-123", &json!({ "duration": 1 }))
            .expect("write replay");
        assert_eq!(staging.staged_replays().expect("list").len(), 1);

        staging.reset().expect("reset");
        assert!(staging.staged_replays().expect("list").is_empty());
        assert_eq!(staging.read_raw_list().expect("read"), Some(json!([])));
        assert_eq!(staging.read_candidates().expect("read"), Some(Vec::new()));
    }

    #[test]
    fn missing_inputs_read_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let staging = StagingArea::new(dir.path().join("nothing-here"));
        assert!(staging.read_raw_list().expect("read").is_none());
        assert!(staging.read_candidates().expect("read").is_none());
        assert!(staging.staged_replays().expect("list").is_empty());
    }

    #[test]
    fn replay_reader_tolerates_bom_and_padding() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bom.json");
        fs::write(&path, "\u{feff}\n  { \"duration\": 300 }\n\n").expect("write");
        assert_eq!(read_replay_file(&path).expect("read")["duration"], 300);

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ \"duration\": ").expect("write");
        assert!(read_replay_file(&bad).is_err());
        assert!(read_replay_file(&dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn unsafe_ids_are_rejected() {
        let staging = StagingArea::new("/tmp/x");
        assert!(staging.replay_path("../etc/passwd").is_err());
        assert!(staging.replay_path("").is_err());
        assert!(!staging.has_replay("a/b"));
        assert!(staging.replay_path("0f1e-ab_9").is_ok());
    }
}
