use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::{debug, info};

use crate::replay::{self, TeamColor};
use crate::staging::read_replay_file;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankInfo {
    pub name: String,
    pub tier: i64,
    pub division: i64,
}

impl RankInfo {
    /// `None` when the player carries no rank name.
    pub fn from_player(player: &Value) -> Option<Self> {
        let rank = player.get("rank")?;
        let name = replay::str_at(Some(rank), "name").filter(|s| !s.is_empty())?;
        Some(Self {
            name,
            tier: replay::i64_at(Some(rank), "tier"),
            division: replay::i64_at(Some(rank), "division"),
        })
    }
}

/// Distinct ranks across `docs`, first sighting wins.
pub fn collect_ranks<'a>(docs: impl IntoIterator<Item = &'a Value>) -> Vec<RankInfo> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for doc in docs {
        for color in TeamColor::ALL {
            for player in replay::team_players(doc, color) {
                if let Some(rank) = RankInfo::from_player(player)
                    && seen.insert(rank.name.clone())
                {
                    out.push(rank);
                }
            }
        }
    }
    out
}

/// Unreadable or malformed files are skipped; the import reports them.
pub fn collect_ranks_from_files(files: &[PathBuf]) -> Vec<RankInfo> {
    let docs = files
        .iter()
        .filter_map(|path| read_replay_file(path).ok())
        .collect::<Vec<_>>();
    collect_ranks(&docs)
}

/// Inserts ranks not yet in the catalog, ordered by (tier, division), so the
/// row ids follow rank order. Existing rows keep their ids.
pub fn seed_ranks(conn: &mut Connection, ranks: &[RankInfo]) -> Result<usize> {
    let mut sorted = ranks.to_vec();
    sorted.sort_by(|a, b| {
        (a.tier, a.division, &a.name).cmp(&(b.tier, b.division, &b.name))
    });

    let tx = conn.transaction().context("begin rank seed transaction")?;
    let mut inserted = 0usize;
    for rank in &sorted {
        if rank_id_by_name(&tx, &rank.name)?.is_some() {
            continue;
        }
        insert_rank(&tx, rank)?;
        inserted += 1;
    }
    tx.commit().context("commit rank seed transaction")?;
    info!(inserted, seen = sorted.len(), "rank catalog seeded");
    Ok(inserted)
}

pub fn rank_id_by_name(conn: &Connection, name: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM ranks WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .optional()
    .context("query rank by name")
}

pub fn insert_rank(conn: &Connection, rank: &RankInfo) -> Result<i64> {
    conn.execute(
        "INSERT INTO ranks (tier, division, name) VALUES (?1, ?2, ?3)",
        params![rank.tier, rank.division, rank.name],
    )
    .with_context(|| format!("insert rank {}", rank.name))?;
    let id = conn.last_insert_rowid();
    debug!(rank = %rank.name, id, "rank appended to catalog");
    Ok(id)
}
