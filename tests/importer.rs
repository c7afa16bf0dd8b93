use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};
use serde_json::{Value, json};

use replay_ingest::importer::{ImportOutcome, MatchImporter};
use replay_ingest::match_hash::match_hash;
use replay_ingest::rank_catalog;
use replay_ingest::store::{self, MatchLookup, PlayerLookup, Table, count_rows};

fn read_fixture(name: &str) -> Value {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    let raw = fs::read_to_string(path).expect("fixture file should be readable");
    serde_json::from_str(&raw).expect("fixture should be valid json")
}

fn write_doc(dir: &Path, name: &str, doc: &Value) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string(doc).expect("serialize")).expect("write doc");
    path
}

fn counts(conn: &Connection) -> Vec<i64> {
    Table::ALL
        .iter()
        .map(|t| count_rows(conn, *t).expect("count"))
        .collect()
}

fn small_match(duration: i64, blue: (&str, &str, &str), orange: (&str, &str, &str)) -> Value {
    let player = |(platform, id, name): (&str, &str, &str)| {
        json!({ "id": { "platform": platform, "id": id }, "name": name })
    };
    json!({
        "date": "2024-06-01T12:00:00Z",
        "duration": duration,
        "blue": { "players": [player(blue)], "stats": { "core": { "goals": 1 } } },
        "orange": { "players": [player(orange)], "stats": { "core": { "goals": 0 } } }
    })
}

#[test]
fn imports_full_replay_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut conn = store::open_in_memory().expect("db");
    let doc = read_fixture("full_replay.json");
    let path = write_doc(dir.path(), "a.json", &doc);

    let mut importer = MatchImporter::new();
    let first = importer.import_file(&mut conn, &path);
    assert_eq!(
        first,
        ImportOutcome::Imported {
            match_id: match_hash(&doc)
        }
    );
    assert_eq!(count_rows(&conn, Table::Matches).expect("count"), 1);
    assert_eq!(count_rows(&conn, Table::MatchTeams).expect("count"), 2);
    assert_eq!(count_rows(&conn, Table::MatchParticipation).expect("count"), 3);
    for table in [
        Table::StatsCore,
        Table::StatsBoost,
        Table::StatsMovement,
        Table::StatsPositioning,
    ] {
        assert_eq!(count_rows(&conn, table).expect("count"), 3, "{}", table.name());
    }
    assert_eq!(count_rows(&conn, Table::Players).expect("count"), 3);
    assert_eq!(count_rows(&conn, Table::Platforms).expect("count"), 2);
    assert_eq!(count_rows(&conn, Table::Ranks).expect("count"), 2);

    let before = counts(&conn);
    let again = write_doc(dir.path(), "b.json", &doc);
    assert_eq!(
        importer.import_file(&mut conn, &again),
        ImportOutcome::Duplicate {
            match_id: match_hash(&doc)
        }
    );
    assert_eq!(counts(&conn), before);

    // A fresh run with cold caches still sees the stored match.
    importer.reset();
    assert!(matches!(
        importer.import_file(&mut conn, &again),
        ImportOutcome::Duplicate { .. }
    ));
}

#[test]
fn match_and_team_columns_follow_payload() {
    let mut conn = store::open_in_memory().expect("db");
    let doc = read_fixture("full_replay.json");
    let mut importer = MatchImporter::new();
    importer.import_document(&mut conn, &doc);

    let stored = store::find_matches(&conn, MatchLookup::Id(&match_hash(&doc)))
        .expect("query")
        .pop()
        .expect("match row");
    assert_eq!(stored.playlist_id.as_deref(), Some("ranked-standard"));
    assert_eq!(stored.season, 14);
    assert_eq!(stored.duration, 300);
    assert!(!stored.overtime);
    assert_eq!(stored.date_upload, "2024-05-01T18:32:10Z");

    let (score, possession): (i64, f64) = conn
        .query_row(
            "SELECT score, possession_time FROM match_teams WHERE color = 'blue'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("blue team");
    assert_eq!(score, 2);
    assert!((possession - 151.2).abs() < 1e-9);
}

#[test]
fn stats_use_renamed_columns_and_default_to_zero() {
    let mut conn = store::open_in_memory().expect("db");
    let doc = read_fixture("full_replay.json");
    MatchImporter::new().import_document(&mut conn, &doc);

    let stats_for = |user_id: &str| -> (f64, f64, i64, i64, i64) {
        conn.query_row(
            "SELECT b.boost_per_minute, b.average_amount, p.average_distance_to_ball,
                    c.demo_inflicted, m.count_powerslide
             FROM match_participation mp
             JOIN players pl ON pl.id = mp.player_id
             JOIN stats_boost b ON b.participation_id = mp.id
             JOIN stats_positioning p ON p.participation_id = mp.id
             JOIN stats_core c ON c.participation_id = mp.id
             JOIN stats_movement m ON m.participation_id = mp.id
             WHERE pl.platform_user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .expect("stats row")
    };

    assert_eq!(stats_for("p2"), (402.5, 45.3, 2410, 2, 31));
    assert_eq!(stats_for("p3"), (0.0, 0.0, 0, 0, 0));

    let (car_id, car_name, mvp, rank_id): (Option<i64>, String, bool, Option<i64>) = conn
        .query_row(
            "SELECT mp.car_id, mp.car_name, mp.mvp, mp.rank_id
             FROM match_participation mp JOIN players pl ON pl.id = mp.player_id
             WHERE pl.platform_user_id = 'p3'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .expect("participation row");
    assert_eq!(car_id, Some(4284));
    assert_eq!(car_name, "Dominus");
    assert!(!mvp);
    assert_eq!(rank_id, None);
}

#[test]
fn players_are_shared_and_names_refresh() {
    let mut conn = store::open_in_memory().expect("db");
    let mut importer = MatchImporter::new();

    let first = small_match(200, ("steam", "u1", "Old Name"), ("epic", "u2", "Other"));
    let second = small_match(210, ("steam", "u1", "New Name"), ("epic", "u3", "Third"));
    assert!(matches!(
        importer.import_document(&mut conn, &first),
        ImportOutcome::Imported { .. }
    ));
    assert!(matches!(
        importer.import_document(&mut conn, &second),
        ImportOutcome::Imported { .. }
    ));

    assert_eq!(count_rows(&conn, Table::Players).expect("count"), 3);
    assert_eq!(count_rows(&conn, Table::Platforms).expect("count"), 2);
    let u1 = store::find_player(
        &conn,
        PlayerLookup::Identity {
            platform: "steam",
            platform_user_id: "u1",
        },
    )
    .expect("query")
    .expect("player");
    assert_eq!(u1.name, "New Name");

    let sizes = importer.cache_sizes();
    assert_eq!((sizes.platforms, sizes.players), (2, 3));
}

#[test]
fn malformed_file_fails_without_stopping_the_batch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut conn = store::open_in_memory().expect("db");
    let good = write_doc(
        dir.path(),
        "1.json",
        &small_match(100, ("steam", "a", "A"), ("steam", "b", "B")),
    );
    let bad = dir.path().join("2.json");
    fs::write(&bad, "{ \"duration\": 12, ").expect("write bad");
    let not_object = write_doc(dir.path(), "3.json", &json!([1, 2, 3]));
    let also_good = write_doc(
        dir.path(),
        "4.json",
        &small_match(101, ("steam", "a", "A"), ("steam", "c", "C")),
    );

    let counters =
        MatchImporter::new().import_files(&mut conn, &[good, bad, not_object, also_good]);
    assert_eq!(
        (counters.imported, counters.duplicate, counters.failed),
        (2, 0, 2)
    );
    let failed_files = counters
        .failures
        .iter()
        .map(|f| f.file.as_str())
        .collect::<Vec<_>>();
    assert_eq!(failed_files, ["2.json", "3.json"]);
    assert_eq!(count_rows(&conn, Table::Matches).expect("count"), 2);
}

#[test]
fn failed_match_leaves_no_rows_or_stale_cache() {
    let mut conn = store::open_in_memory().expect("db");
    conn.execute_batch(
        "CREATE TRIGGER reject_marked_movement BEFORE INSERT ON stats_movement
         WHEN NEW.avg_speed = 666
         BEGIN SELECT RAISE(ABORT, 'rejected movement row'); END;",
    )
    .expect("trigger");

    let mut doomed = small_match(120, ("switch", "n1", "Newcomer"), ("steam", "s1", "Regular"));
    doomed["blue"]["players"][0]["rank"] = json!({ "name": "Gold I Division 1", "tier": 7, "division": 1 });
    doomed["orange"]["players"][0]["stats"] = json!({ "movement": { "avg_speed": 666 } });

    let mut importer = MatchImporter::new();
    let outcome = importer.import_document(&mut conn, &doomed);
    let ImportOutcome::Failed { reason } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(reason.contains("rejected movement row"), "{reason}");
    assert_eq!(counts(&conn), vec![0; Table::ALL.len()]);
    assert_eq!(importer.cache_sizes().players, 0);

    // Same entities in a clean match must be recreated, not served from cache.
    let mut fine = doomed.clone();
    fine["orange"]["players"][0]["stats"] = json!({});
    assert!(matches!(
        importer.import_document(&mut conn, &fine),
        ImportOutcome::Imported { .. }
    ));
    assert_eq!(count_rows(&conn, Table::Players).expect("count"), 2);
    assert_eq!(count_rows(&conn, Table::Ranks).expect("count"), 1);
}

#[test]
fn upload_date_falls_back_to_replay_date() {
    let mut conn = store::open_in_memory().expect("db");
    let doc = small_match(90, ("steam", "x", "X"), ("steam", "y", "Y"));
    MatchImporter::new().import_document(&mut conn, &doc);
    let stored = store::find_matches(&conn, MatchLookup::Id(&match_hash(&doc)))
        .expect("query")
        .pop()
        .expect("match row");
    assert_eq!(stored.date_upload, "2024-06-01T12:00:00Z");
    assert_eq!(stored.playlist_id, None);
    assert_eq!(stored.season, 0);
}

#[test]
fn seeded_ranks_keep_order_and_late_ranks_append() {
    let mut conn = store::open_in_memory().expect("db");
    let doc = read_fixture("full_replay.json");
    let ranks = rank_catalog::collect_ranks([&doc]);
    assert_eq!(rank_catalog::seed_ranks(&mut conn, &ranks).expect("seed"), 2);
    assert_eq!(
        rank_catalog::rank_id_by_name(&conn, "Diamond II Division 2").expect("query"),
        Some(1)
    );

    let mut late = small_match(77, ("steam", "r1", "R"), ("steam", "r2", "S"));
    late["blue"]["players"][0]["rank"] = json!({ "name": "Bronze I Division 1", "tier": 1, "division": 1 });
    let mut importer = MatchImporter::new();
    importer.import_document(&mut conn, &doc);
    importer.import_document(&mut conn, &late);
    assert_eq!(
        rank_catalog::rank_id_by_name(&conn, "Bronze I Division 1").expect("query"),
        Some(3)
    );
    assert_eq!(count_rows(&conn, Table::Ranks).expect("count"), 3);
}

#[test]
fn primary_key_rejects_a_match_that_appears_after_the_check() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("race.db");
    let mut conn = store::open_db(&db_path).expect("importer db");
    let observer = store::open_db(&db_path).expect("second connection");

    let mut importer = MatchImporter::new();
    let earlier = small_match(50, ("steam", "e1", "Early"), ("steam", "e2", "Bird"));
    assert!(matches!(
        importer.import_document(&mut conn, &earlier),
        ImportOutcome::Imported { .. }
    ));
    let sizes_before = importer.cache_sizes();

    // Another writer lands the same match id between the existence check and
    // the insert.
    let doc = small_match(60, ("steam", "e1", "Early"), ("epic", "late", "Late"));
    let hash = match_hash(&doc);
    observer
        .execute_batch(&format!(
            "CREATE TRIGGER concurrent_writer BEFORE INSERT ON matches
             WHEN NEW.id = '{hash}'
             BEGIN
                 INSERT INTO matches (id, date_upload) VALUES (NEW.id, 'elsewhere');
             END;"
        ))
        .expect("trigger");

    let outcome = importer.import_document(&mut conn, &doc);
    let ImportOutcome::Failed { reason } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(reason.contains("matches.id"), "{reason}");

    assert_eq!(count_rows(&observer, Table::Matches).expect("count"), 1);
    assert_eq!(count_rows(&observer, Table::MatchTeams).expect("count"), 2);
    assert_eq!(count_rows(&observer, Table::MatchParticipation).expect("count"), 2);
    assert_eq!(count_rows(&observer, Table::Players).expect("count"), 2);
    assert!(!store::match_exists(&observer, &hash).expect("exists"));
    assert_eq!(importer.cache_sizes(), sizes_before);
}
