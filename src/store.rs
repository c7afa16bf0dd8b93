use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create db dir {}", parent.display()))?;
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS platforms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS ranks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tier INTEGER NOT NULL DEFAULT 0,
            division INTEGER NOT NULL DEFAULT 0,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS players (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform_id INTEGER NOT NULL REFERENCES platforms(id),
            platform_user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            UNIQUE (platform_id, platform_user_id)
        );

        CREATE TABLE IF NOT EXISTS matches (
            id TEXT PRIMARY KEY,
            playlist_id TEXT NULL,
            season INTEGER NOT NULL DEFAULT 0,
            duration INTEGER NOT NULL DEFAULT 0,
            overtime INTEGER NOT NULL DEFAULT 0,
            date_upload TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_playlist ON matches(playlist_id);
        CREATE INDEX IF NOT EXISTS idx_matches_season ON matches(season);

        CREATE TABLE IF NOT EXISTS match_teams (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            match_id TEXT NOT NULL REFERENCES matches(id) ON DELETE CASCADE,
            color TEXT NOT NULL CHECK (color IN ('blue', 'orange')),
            score INTEGER NOT NULL DEFAULT 0,
            possession_time REAL NOT NULL DEFAULT 0,
            time_in_side REAL NOT NULL DEFAULT 0,
            UNIQUE (match_id, color)
        );

        CREATE TABLE IF NOT EXISTS match_participation (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            match_team_id INTEGER NOT NULL REFERENCES match_teams(id) ON DELETE CASCADE,
            player_id INTEGER NOT NULL REFERENCES players(id),
            rank_id INTEGER NULL REFERENCES ranks(id),
            car_id INTEGER NULL,
            car_name TEXT NOT NULL,
            mvp INTEGER NOT NULL DEFAULT 0,
            start_time REAL NOT NULL DEFAULT 0,
            end_time REAL NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_participation_player ON match_participation(player_id);
        CREATE INDEX IF NOT EXISTS idx_participation_team ON match_participation(match_team_id);

        CREATE TABLE IF NOT EXISTS stats_core (
            participation_id INTEGER PRIMARY KEY
                REFERENCES match_participation(id) ON DELETE CASCADE,
            shots INTEGER NOT NULL DEFAULT 0,
            goals INTEGER NOT NULL DEFAULT 0,
            saves INTEGER NOT NULL DEFAULT 0,
            assists INTEGER NOT NULL DEFAULT 0,
            score INTEGER NOT NULL DEFAULT 0,
            shooting_percentage REAL NOT NULL DEFAULT 0,
            demo_inflicted INTEGER NOT NULL DEFAULT 0,
            demo_taken INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS stats_boost (
            participation_id INTEGER PRIMARY KEY
                REFERENCES match_participation(id) ON DELETE CASCADE,
            boost_per_minute REAL NOT NULL DEFAULT 0,
            boost_consumed_per_minute REAL NOT NULL DEFAULT 0,
            average_amount REAL NOT NULL DEFAULT 0,
            amount_collected INTEGER NOT NULL DEFAULT 0,
            amount_stolen INTEGER NOT NULL DEFAULT 0,
            amount_collected_big INTEGER NOT NULL DEFAULT 0,
            amount_stolen_big INTEGER NOT NULL DEFAULT 0,
            amount_collected_small INTEGER NOT NULL DEFAULT 0,
            amount_stolen_small INTEGER NOT NULL DEFAULT 0,
            count_collected_big INTEGER NOT NULL DEFAULT 0,
            count_stolen_big INTEGER NOT NULL DEFAULT 0,
            count_collected_small INTEGER NOT NULL DEFAULT 0,
            count_stolen_small INTEGER NOT NULL DEFAULT 0,
            amount_overfill INTEGER NOT NULL DEFAULT 0,
            amount_overfill_stolen INTEGER NOT NULL DEFAULT 0,
            amount_used_while_supersonic INTEGER NOT NULL DEFAULT 0,
            time_zero_boost REAL NOT NULL DEFAULT 0,
            percent_zero_boost REAL NOT NULL DEFAULT 0,
            time_full_boost REAL NOT NULL DEFAULT 0,
            percent_full_boost REAL NOT NULL DEFAULT 0,
            time_boost_0_25 REAL NOT NULL DEFAULT 0,
            time_boost_25_50 REAL NOT NULL DEFAULT 0,
            time_boost_50_75 REAL NOT NULL DEFAULT 0,
            time_boost_75_100 REAL NOT NULL DEFAULT 0,
            percent_boost_0_25 REAL NOT NULL DEFAULT 0,
            percent_boost_25_50 REAL NOT NULL DEFAULT 0,
            percent_boost_50_75 REAL NOT NULL DEFAULT 0,
            percent_boost_75_100 REAL NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS stats_movement (
            participation_id INTEGER PRIMARY KEY
                REFERENCES match_participation(id) ON DELETE CASCADE,
            avg_speed INTEGER NOT NULL DEFAULT 0,
            total_distance INTEGER NOT NULL DEFAULT 0,
            time_supersonic_speed REAL NOT NULL DEFAULT 0,
            time_boost_speed REAL NOT NULL DEFAULT 0,
            time_slow_speed REAL NOT NULL DEFAULT 0,
            time_ground REAL NOT NULL DEFAULT 0,
            time_low_air REAL NOT NULL DEFAULT 0,
            time_high_air REAL NOT NULL DEFAULT 0,
            time_powerslide REAL NOT NULL DEFAULT 0,
            count_powerslide INTEGER NOT NULL DEFAULT 0,
            avg_powerslide_duration REAL NOT NULL DEFAULT 0,
            avg_speed_percentage REAL NOT NULL DEFAULT 0,
            percent_slow_speed REAL NOT NULL DEFAULT 0,
            percent_boost_speed REAL NOT NULL DEFAULT 0,
            percent_supersonic_speed REAL NOT NULL DEFAULT 0,
            percent_ground REAL NOT NULL DEFAULT 0,
            percent_low_air REAL NOT NULL DEFAULT 0,
            percent_high_air REAL NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS stats_positioning (
            participation_id INTEGER PRIMARY KEY
                REFERENCES match_participation(id) ON DELETE CASCADE,
            average_distance_to_ball INTEGER NOT NULL DEFAULT 0,
            average_distance_to_mates INTEGER NOT NULL DEFAULT 0,
            time_defensive_third REAL NOT NULL DEFAULT 0,
            time_neutral_third REAL NOT NULL DEFAULT 0,
            time_offensive_third REAL NOT NULL DEFAULT 0,
            time_behind_ball REAL NOT NULL DEFAULT 0,
            time_infront_ball REAL NOT NULL DEFAULT 0,
            time_most_back REAL NOT NULL DEFAULT 0,
            time_most_forward REAL NOT NULL DEFAULT 0,
            goals_against_while_last_defender INTEGER NOT NULL DEFAULT 0,
            time_closest_to_ball REAL NOT NULL DEFAULT 0,
            time_farthest_to_ball REAL NOT NULL DEFAULT 0,
            percent_defensive_third REAL NOT NULL DEFAULT 0,
            percent_neutral_third REAL NOT NULL DEFAULT 0,
            percent_offensive_third REAL NOT NULL DEFAULT 0,
            percent_defensive_half REAL NOT NULL DEFAULT 0,
            percent_offensive_half REAL NOT NULL DEFAULT 0,
            percent_behind_ball REAL NOT NULL DEFAULT 0,
            percent_infront_ball REAL NOT NULL DEFAULT 0,
            percent_most_back REAL NOT NULL DEFAULT 0,
            percent_most_forward REAL NOT NULL DEFAULT 0,
            percent_closest_to_ball REAL NOT NULL DEFAULT 0,
            percent_farthest_from_ball REAL NOT NULL DEFAULT 0
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

pub fn match_exists(conn: &Connection, match_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM matches WHERE id = ?1",
            params![match_id],
            |_| Ok(()),
        )
        .optional()
        .context("query match by id")?;
    Ok(found.is_some())
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredPlayer {
    pub id: i64,
    pub platform: String,
    pub platform_user_id: String,
    pub name: String,
}

/// Typed replacement for column-name lookups on `players`.
#[derive(Debug, Clone, Copy)]
pub enum PlayerLookup<'a> {
    Id(i64),
    Identity {
        platform: &'a str,
        platform_user_id: &'a str,
    },
    Name(&'a str),
}

pub fn find_player(conn: &Connection, lookup: PlayerLookup<'_>) -> Result<Option<StoredPlayer>> {
    const SELECT: &str = "SELECT p.id, pl.name, p.platform_user_id, p.name
        FROM players p JOIN platforms pl ON pl.id = p.platform_id";
    let found = match lookup {
        PlayerLookup::Id(id) => conn
            .query_row(&format!("{SELECT} WHERE p.id = ?1"), params![id], player_from_row)
            .optional(),
        PlayerLookup::Identity {
            platform,
            platform_user_id,
        } => conn
            .query_row(
                &format!("{SELECT} WHERE pl.name = ?1 AND p.platform_user_id = ?2"),
                params![platform, platform_user_id],
                player_from_row,
            )
            .optional(),
        PlayerLookup::Name(name) => conn
            .query_row(
                &format!("{SELECT} WHERE p.name = ?1 ORDER BY p.id LIMIT 1"),
                params![name],
                player_from_row,
            )
            .optional(),
    };
    found.context("query player")
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatch {
    pub id: String,
    pub playlist_id: Option<String>,
    pub season: i64,
    pub duration: i64,
    pub overtime: bool,
    pub date_upload: String,
}

fn player_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredPlayer> {
    Ok(StoredPlayer {
        id: row.get(0)?,
        platform: row.get(1)?,
        platform_user_id: row.get(2)?,
        name: row.get(3)?,
    })
}

/// Typed replacement for column-name lookups on `matches`.
#[derive(Debug, Clone, Copy)]
pub enum MatchLookup<'a> {
    Id(&'a str),
    Playlist(&'a str),
    Season(i64),
}

pub fn find_matches(conn: &Connection, lookup: MatchLookup<'_>) -> Result<Vec<StoredMatch>> {
    const SELECT: &str =
        "SELECT id, playlist_id, season, duration, overtime, date_upload FROM matches";
    let (sql, param): (String, rusqlite::types::Value) = match lookup {
        MatchLookup::Id(id) => (format!("{SELECT} WHERE id = ?1"), id.to_string().into()),
        MatchLookup::Playlist(p) => (
            format!("{SELECT} WHERE playlist_id = ?1 ORDER BY date_upload"),
            p.to_string().into(),
        ),
        MatchLookup::Season(s) => (
            format!("{SELECT} WHERE season = ?1 ORDER BY date_upload"),
            s.into(),
        ),
    };
    let mut stmt = conn.prepare(&sql).context("prepare match lookup")?;
    let rows = stmt
        .query_map(params![param], |row| {
            Ok(StoredMatch {
                id: row.get(0)?,
                playlist_id: row.get(1)?,
                season: row.get(2)?,
                duration: row.get(3)?,
                overtime: row.get::<_, i64>(4)? != 0,
                date_upload: row.get(5)?,
            })
        })
        .context("query match lookup")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode match row")?);
    }
    Ok(out)
}

/// Administrative removal; teams, participations and stats cascade.
pub fn delete_match(conn: &Connection, match_id: &str) -> Result<bool> {
    let removed = conn
        .execute("DELETE FROM matches WHERE id = ?1", params![match_id])
        .context("delete match")?;
    Ok(removed > 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Platforms,
    Ranks,
    Players,
    Matches,
    MatchTeams,
    MatchParticipation,
    StatsCore,
    StatsBoost,
    StatsMovement,
    StatsPositioning,
}

impl Table {
    pub const ALL: [Table; 10] = [
        Table::Platforms,
        Table::Ranks,
        Table::Players,
        Table::Matches,
        Table::MatchTeams,
        Table::MatchParticipation,
        Table::StatsCore,
        Table::StatsBoost,
        Table::StatsMovement,
        Table::StatsPositioning,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Platforms => "platforms",
            Table::Ranks => "ranks",
            Table::Players => "players",
            Table::Matches => "matches",
            Table::MatchTeams => "match_teams",
            Table::MatchParticipation => "match_participation",
            Table::StatsCore => "stats_core",
            Table::StatsBoost => "stats_boost",
            Table::StatsMovement => "stats_movement",
            Table::StatsPositioning => "stats_positioning",
        }
    }
}

pub fn count_rows(conn: &Connection, table: Table) -> Result<i64> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", table.name()),
        [],
        |row| row.get(0),
    )
    .with_context(|| format!("count rows in {}", table.name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(conn: &Connection) {
        conn.execute_batch(
            r#"
            INSERT INTO platforms (name) VALUES ('steam');
            INSERT INTO players (platform_id, platform_user_id, name) VALUES (1, '7656', 'rizzo');
            INSERT INTO matches (id, playlist_id, season, duration, overtime, date_upload)
                VALUES ('h1', 'ranked-doubles', 14, 300, 0, '2024-05-01T00:00:00Z');
            INSERT INTO match_teams (match_id, color) VALUES ('h1', 'blue');
            INSERT INTO match_participation (match_team_id, player_id, car_name) VALUES (1, 1, 'Octane');
            INSERT INTO stats_core (participation_id) VALUES (1);
            "#,
        )
        .expect("seed");
    }

    #[test]
    fn lookups_are_typed() {
        let conn = open_in_memory().expect("db");
        seed(&conn);
        assert!(match_exists(&conn, "h1").expect("exists"));
        assert!(!match_exists(&conn, "nope").expect("exists"));

        let by_identity = find_player(
            &conn,
            PlayerLookup::Identity {
                platform: "steam",
                platform_user_id: "7656",
            },
        )
        .expect("query")
        .expect("player");
        assert_eq!(by_identity.name, "rizzo");
        assert_eq!(
            find_player(&conn, PlayerLookup::Name("rizzo"))
                .expect("query")
                .map(|p| p.id),
            Some(by_identity.id)
        );
        assert!(
            find_player(
                &conn,
                PlayerLookup::Identity {
                    platform: "epic",
                    platform_user_id: "7656"
                }
            )
            .expect("query")
            .is_none()
        );

        assert_eq!(find_matches(&conn, MatchLookup::Season(14)).expect("q").len(), 1);
        assert_eq!(
            find_matches(&conn, MatchLookup::Playlist("ranked-duels"))
                .expect("q")
                .len(),
            0
        );
    }

    #[test]
    fn delete_match_cascades() {
        let conn = open_in_memory().expect("db");
        seed(&conn);
        assert!(delete_match(&conn, "h1").expect("delete"));
        for table in [
            Table::Matches,
            Table::MatchTeams,
            Table::MatchParticipation,
            Table::StatsCore,
        ] {
            assert_eq!(count_rows(&conn, table).expect("count"), 0, "{}", table.name());
        }
        assert_eq!(count_rows(&conn, Table::Players).expect("count"), 1);
    }
}
