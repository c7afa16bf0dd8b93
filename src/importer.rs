use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::match_hash::match_hash;
use crate::rank_catalog::{self, RankInfo};
use crate::replay::{self, TeamColor};
use crate::staging::read_replay_file;
use crate::store::{self, Table};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported { match_id: String },
    Duplicate { match_id: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFailure {
    pub file: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportCounters {
    pub imported: usize,
    pub duplicate: usize,
    pub failed: usize,
    pub failures: Vec<ImportFailure>,
}

impl ImportCounters {
    pub fn record(&mut self, file: &str, outcome: &ImportOutcome) {
        match outcome {
            ImportOutcome::Imported { .. } => self.imported += 1,
            ImportOutcome::Duplicate { .. } => self.duplicate += 1,
            ImportOutcome::Failed { reason } => {
                self.failed += 1;
                self.failures.push(ImportFailure {
                    file: file.to_string(),
                    reason: reason.clone(),
                });
            }
        }
    }

    pub fn total(&self) -> usize {
        self.imported + self.duplicate + self.failed
    }
}

/// Memo that only keeps what a committed transaction created.
#[derive(Debug)]
struct TxCache<K, V> {
    committed: HashMap<K, V>,
    pending: HashMap<K, V>,
}

impl<K: Eq + Hash, V: Clone> TxCache<K, V> {
    fn new() -> Self {
        Self {
            committed: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        self.pending
            .get(key)
            .or_else(|| self.committed.get(key))
            .cloned()
    }

    fn insert(&mut self, key: K, value: V) {
        self.pending.insert(key, value);
    }

    fn commit(&mut self) {
        self.committed.extend(self.pending.drain());
    }

    fn rollback(&mut self) {
        self.pending.clear();
    }

    fn clear(&mut self) {
        self.committed.clear();
        self.pending.clear();
    }

    fn len(&self) -> usize {
        self.committed.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CachedPlayer {
    id: i64,
    name: String,
}

#[derive(Debug)]
struct ResolveCache {
    platforms: TxCache<String, i64>,
    players: TxCache<(String, String), CachedPlayer>,
    ranks: TxCache<String, i64>,
}

impl ResolveCache {
    fn new() -> Self {
        Self {
            platforms: TxCache::new(),
            players: TxCache::new(),
            ranks: TxCache::new(),
        }
    }

    fn commit(&mut self) {
        self.platforms.commit();
        self.players.commit();
        self.ranks.commit();
    }

    fn rollback(&mut self) {
        self.platforms.rollback();
        self.players.rollback();
        self.ranks.rollback();
    }

    fn clear(&mut self) {
        self.platforms.clear();
        self.players.clear();
        self.ranks.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSizes {
    pub platforms: usize,
    pub players: usize,
    pub ranks: usize,
}

/// Imports full replay documents, one transaction per match. Entity lookups
/// are memoized for the lifetime of one run; call [`MatchImporter::reset`]
/// between runs.
#[derive(Debug)]
pub struct MatchImporter {
    cache: ResolveCache,
}

impl Default for MatchImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchImporter {
    pub fn new() -> Self {
        Self {
            cache: ResolveCache::new(),
        }
    }

    pub fn reset(&mut self) {
        self.cache.clear();
    }

    pub fn cache_sizes(&self) -> CacheSizes {
        CacheSizes {
            platforms: self.cache.platforms.len(),
            players: self.cache.players.len(),
            ranks: self.cache.ranks.len(),
        }
    }

    pub fn import_files(&mut self, conn: &mut Connection, files: &[PathBuf]) -> ImportCounters {
        let mut counters = ImportCounters::default();
        for path in files {
            let outcome = self.import_file(conn, path);
            counters.record(&file_label(path), &outcome);
        }
        counters
    }

    pub fn import_file(&mut self, conn: &mut Connection, path: &Path) -> ImportOutcome {
        let file = file_label(path);
        let doc = match read_replay_file(path) {
            Ok(doc) => doc,
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(%file, %reason, "replay file rejected");
                return ImportOutcome::Failed { reason };
            }
        };
        let outcome = self.import_document(conn, &doc);
        match &outcome {
            ImportOutcome::Imported { match_id } => info!(%file, %match_id, "match imported"),
            ImportOutcome::Duplicate { match_id } => {
                info!(%file, %match_id, "match already stored, skipped")
            }
            ImportOutcome::Failed { reason } => warn!(%file, %reason, "match import rolled back"),
        }
        outcome
    }

    pub fn import_document(&mut self, conn: &mut Connection, doc: &Value) -> ImportOutcome {
        if !doc.is_object() {
            return ImportOutcome::Failed {
                reason: "replay document is not a json object".to_string(),
            };
        }
        let match_id = match_hash(doc);
        match self.try_import(conn, doc, &match_id) {
            Ok(outcome) => {
                if matches!(outcome, ImportOutcome::Imported { .. }) {
                    self.cache.commit();
                } else {
                    self.cache.rollback();
                }
                outcome
            }
            Err(err) => {
                self.cache.rollback();
                ImportOutcome::Failed {
                    reason: format!("{err:#}"),
                }
            }
        }
    }

    fn try_import(
        &mut self,
        conn: &mut Connection,
        doc: &Value,
        match_id: &str,
    ) -> Result<ImportOutcome> {
        let tx = conn.transaction().context("begin import transaction")?;
        if store::match_exists(&tx, match_id)? {
            tx.rollback().context("rollback duplicate import")?;
            return Ok(ImportOutcome::Duplicate {
                match_id: match_id.to_string(),
            });
        }

        insert_match(&tx, doc, match_id)?;
        for color in TeamColor::ALL {
            let team_id = insert_team(&tx, doc, match_id, color)?;
            for player in replay::team_players(doc, color) {
                self.insert_participation(&tx, team_id, player)?;
            }
        }

        tx.commit().context("commit import transaction")?;
        Ok(ImportOutcome::Imported {
            match_id: match_id.to_string(),
        })
    }

    fn insert_participation(&mut self, tx: &Transaction<'_>, team_id: i64, player: &Value) -> Result<()> {
        let player_id = self.resolve_player(tx, player)?;
        let rank_id = self.resolve_rank(tx, player)?;
        let p = Some(player);

        tx.execute(
            "INSERT INTO match_participation
                (match_team_id, player_id, rank_id, car_id, car_name, mvp, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                team_id,
                player_id,
                rank_id,
                player.get("car_id").and_then(replay::as_i64_any),
                replay::str_at(p, "car_name")
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "Unknown".to_string()),
                replay::bool_at(p, "mvp"),
                replay::f64_at(p, "start_time"),
                replay::f64_at(p, "end_time"),
            ],
        )
        .context("insert match participation")?;
        let participation_id = tx.last_insert_rowid();

        let stats = player.get("stats");
        for table in STAT_TABLES {
            insert_stats(tx, participation_id, stats, table)?;
        }
        Ok(())
    }

    fn resolve_platform(&mut self, tx: &Transaction<'_>, name: &str) -> Result<i64> {
        if let Some(id) = self.cache.platforms.get(&name.to_string()) {
            return Ok(id);
        }
        let existing = tx
            .query_row(
                "SELECT id FROM platforms WHERE name = ?1",
                params![name],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .context("query platform")?;
        let id = match existing {
            Some(id) => id,
            None => {
                tx.execute("INSERT INTO platforms (name) VALUES (?1)", params![name])
                    .with_context(|| format!("insert platform {name}"))?;
                debug!(platform = name, "platform created");
                tx.last_insert_rowid()
            }
        };
        self.cache.platforms.insert(name.to_string(), id);
        Ok(id)
    }

    fn resolve_player(&mut self, tx: &Transaction<'_>, player: &Value) -> Result<i64> {
        let platform = replay::player_platform(player);
        let user_id =
            replay::player_platform_user_id(player).unwrap_or_else(|| "unknown".to_string());
        let name = replay::str_at(Some(player), "name")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());
        let key = (platform, user_id);

        let mut known = match self.cache.players.get(&key) {
            Some(cached) => cached,
            None => {
                let platform_id = self.resolve_platform(tx, &key.0)?;
                let stored = tx
                    .query_row(
                        "SELECT id, name FROM players WHERE platform_id = ?1 AND platform_user_id = ?2",
                        params![platform_id, key.1],
                        |row| {
                            Ok(CachedPlayer {
                                id: row.get(0)?,
                                name: row.get(1)?,
                            })
                        },
                    )
                    .optional()
                    .context("query player")?;
                match stored {
                    Some(p) => p,
                    None => {
                        tx.execute(
                            "INSERT INTO players (platform_id, platform_user_id, name) VALUES (?1, ?2, ?3)",
                            params![platform_id, key.1, name],
                        )
                        .with_context(|| format!("insert player {}:{}", key.0, key.1))?;
                        let id = tx.last_insert_rowid();
                        debug!(platform = %key.0, user_id = %key.1, id, "player created");
                        self.cache.players.insert(key, CachedPlayer { id, name });
                        return Ok(id);
                    }
                }
            }
        };

        if known.name != name {
            tx.execute(
                "UPDATE players SET name = ?1 WHERE id = ?2",
                params![name, known.id],
            )
            .context("refresh player name")?;
            known.name = name;
        }
        let id = known.id;
        self.cache.players.insert(key, known);
        Ok(id)
    }

    fn resolve_rank(&mut self, tx: &Transaction<'_>, player: &Value) -> Result<Option<i64>> {
        let Some(rank) = RankInfo::from_player(player) else {
            return Ok(None);
        };
        if let Some(id) = self.cache.ranks.get(&rank.name) {
            return Ok(Some(id));
        }
        let id = match rank_catalog::rank_id_by_name(tx, &rank.name)? {
            Some(id) => id,
            None => rank_catalog::insert_rank(tx, &rank)?,
        };
        self.cache.ranks.insert(rank.name, id);
        Ok(Some(id))
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn insert_match(tx: &Transaction<'_>, doc: &Value, match_id: &str) -> Result<()> {
    let d = Some(doc);
    let date_upload = replay::str_at(d, "created")
        .or_else(|| replay::str_at(d, "date"))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    tx.execute(
        "INSERT INTO matches (id, playlist_id, season, duration, overtime, date_upload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            match_id,
            replay::str_at(d, "playlist_id"),
            replay::i64_at(d, "season"),
            replay::duration(doc),
            replay::bool_at(d, "overtime"),
            date_upload,
        ],
    )
    .context("insert match")?;
    Ok(())
}

fn insert_team(tx: &Transaction<'_>, doc: &Value, match_id: &str, color: TeamColor) -> Result<i64> {
    let ball = replay::team(doc, color).and_then(|t| replay::path(t, &["stats", "ball"]));
    tx.execute(
        "INSERT INTO match_teams (match_id, color, score, possession_time, time_in_side)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            match_id,
            color.as_str(),
            replay::team_goals(doc, color),
            replay::f64_at(ball, "possession_time"),
            replay::f64_at(ball, "time_in_side"),
        ],
    )
    .with_context(|| format!("insert {} team", color.as_str()))?;
    Ok(tx.last_insert_rowid())
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int,
    Real,
}

/// One stats column and where its value lives under a player's `stats`.
#[derive(Debug, Clone, Copy)]
struct StatField {
    column: &'static str,
    section: &'static str,
    key: &'static str,
    num: Num,
}

const fn int(column: &'static str, section: &'static str, key: &'static str) -> StatField {
    StatField {
        column,
        section,
        key,
        num: Num::Int,
    }
}

const fn real(column: &'static str, section: &'static str, key: &'static str) -> StatField {
    StatField {
        column,
        section,
        key,
        num: Num::Real,
    }
}

struct StatTable {
    table: Table,
    fields: &'static [StatField],
}

const CORE_FIELDS: &[StatField] = &[
    int("shots", "core", "shots"),
    int("goals", "core", "goals"),
    int("saves", "core", "saves"),
    int("assists", "core", "assists"),
    int("score", "core", "score"),
    real("shooting_percentage", "core", "shooting_percentage"),
    int("demo_inflicted", "demo", "inflicted"),
    int("demo_taken", "demo", "taken"),
];

const BOOST_FIELDS: &[StatField] = &[
    real("boost_per_minute", "boost", "bpm"),
    real("boost_consumed_per_minute", "boost", "bcpm"),
    real("average_amount", "boost", "avg_amount"),
    int("amount_collected", "boost", "amount_collected"),
    int("amount_stolen", "boost", "amount_stolen"),
    int("amount_collected_big", "boost", "amount_collected_big"),
    int("amount_stolen_big", "boost", "amount_stolen_big"),
    int("amount_collected_small", "boost", "amount_collected_small"),
    int("amount_stolen_small", "boost", "amount_stolen_small"),
    int("count_collected_big", "boost", "count_collected_big"),
    int("count_stolen_big", "boost", "count_stolen_big"),
    int("count_collected_small", "boost", "count_collected_small"),
    int("count_stolen_small", "boost", "count_stolen_small"),
    int("amount_overfill", "boost", "amount_overfill"),
    int("amount_overfill_stolen", "boost", "amount_overfill_stolen"),
    int("amount_used_while_supersonic", "boost", "amount_used_while_supersonic"),
    real("time_zero_boost", "boost", "time_zero_boost"),
    real("percent_zero_boost", "boost", "percent_zero_boost"),
    real("time_full_boost", "boost", "time_full_boost"),
    real("percent_full_boost", "boost", "percent_full_boost"),
    real("time_boost_0_25", "boost", "time_boost_0_25"),
    real("time_boost_25_50", "boost", "time_boost_25_50"),
    real("time_boost_50_75", "boost", "time_boost_50_75"),
    real("time_boost_75_100", "boost", "time_boost_75_100"),
    real("percent_boost_0_25", "boost", "percent_boost_0_25"),
    real("percent_boost_25_50", "boost", "percent_boost_25_50"),
    real("percent_boost_50_75", "boost", "percent_boost_50_75"),
    real("percent_boost_75_100", "boost", "percent_boost_75_100"),
];

const MOVEMENT_FIELDS: &[StatField] = &[
    int("avg_speed", "movement", "avg_speed"),
    int("total_distance", "movement", "total_distance"),
    real("time_supersonic_speed", "movement", "time_supersonic_speed"),
    real("time_boost_speed", "movement", "time_boost_speed"),
    real("time_slow_speed", "movement", "time_slow_speed"),
    real("time_ground", "movement", "time_ground"),
    real("time_low_air", "movement", "time_low_air"),
    real("time_high_air", "movement", "time_high_air"),
    real("time_powerslide", "movement", "time_powerslide"),
    int("count_powerslide", "movement", "count_powerslide"),
    real("avg_powerslide_duration", "movement", "avg_powerslide_duration"),
    real("avg_speed_percentage", "movement", "avg_speed_percentage"),
    real("percent_slow_speed", "movement", "percent_slow_speed"),
    real("percent_boost_speed", "movement", "percent_boost_speed"),
    real("percent_supersonic_speed", "movement", "percent_supersonic_speed"),
    real("percent_ground", "movement", "percent_ground"),
    real("percent_low_air", "movement", "percent_low_air"),
    real("percent_high_air", "movement", "percent_high_air"),
];

const POSITIONING_FIELDS: &[StatField] = &[
    int("average_distance_to_ball", "positioning", "avg_distance_to_ball"),
    int("average_distance_to_mates", "positioning", "avg_distance_to_mates"),
    real("time_defensive_third", "positioning", "time_defensive_third"),
    real("time_neutral_third", "positioning", "time_neutral_third"),
    real("time_offensive_third", "positioning", "time_offensive_third"),
    real("time_behind_ball", "positioning", "time_behind_ball"),
    real("time_infront_ball", "positioning", "time_infront_ball"),
    real("time_most_back", "positioning", "time_most_back"),
    real("time_most_forward", "positioning", "time_most_forward"),
    int("goals_against_while_last_defender", "positioning", "goals_against_while_last_defender"),
    real("time_closest_to_ball", "positioning", "time_closest_to_ball"),
    real("time_farthest_to_ball", "positioning", "time_farthest_to_ball"),
    real("percent_defensive_third", "positioning", "percent_defensive_third"),
    real("percent_neutral_third", "positioning", "percent_neutral_third"),
    real("percent_offensive_third", "positioning", "percent_offensive_third"),
    real("percent_defensive_half", "positioning", "percent_defensive_half"),
    real("percent_offensive_half", "positioning", "percent_offensive_half"),
    real("percent_behind_ball", "positioning", "percent_behind_ball"),
    real("percent_infront_ball", "positioning", "percent_infront_ball"),
    real("percent_most_back", "positioning", "percent_most_back"),
    real("percent_most_forward", "positioning", "percent_most_forward"),
    real("percent_closest_to_ball", "positioning", "percent_closest_to_ball"),
    real("percent_farthest_from_ball", "positioning", "percent_farthest_from_ball"),
];

const STAT_TABLES: &[StatTable] = &[
    StatTable {
        table: Table::StatsCore,
        fields: CORE_FIELDS,
    },
    StatTable {
        table: Table::StatsBoost,
        fields: BOOST_FIELDS,
    },
    StatTable {
        table: Table::StatsMovement,
        fields: MOVEMENT_FIELDS,
    },
    StatTable {
        table: Table::StatsPositioning,
        fields: POSITIONING_FIELDS,
    },
];

fn insert_stats(
    tx: &Transaction<'_>,
    participation_id: i64,
    stats: Option<&Value>,
    table: &StatTable,
) -> Result<()> {
    let columns = table
        .fields
        .iter()
        .map(|f| f.column)
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=table.fields.len() + 1)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} (participation_id, {columns}) VALUES ({placeholders})",
        table.table.name()
    );

    let mut values = Vec::with_capacity(table.fields.len() + 1);
    values.push(SqlValue::Integer(participation_id));
    for field in table.fields {
        let section = stats.and_then(|s| s.get(field.section));
        values.push(match field.num {
            Num::Int => SqlValue::Integer(replay::i64_at(section, field.key)),
            Num::Real => SqlValue::Real(replay::f64_at(section, field.key)),
        });
    }

    tx.prepare_cached(&sql)
        .with_context(|| format!("prepare {} insert", table.table.name()))?
        .execute(params_from_iter(values))
        .with_context(|| format!("insert {}", table.table.name()))?;
    Ok(())
}
