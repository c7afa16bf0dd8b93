//! Accessors over the two upstream payload shapes.
//!
//! A search returns a compact list entry per match, a single-replay fetch
//! returns the full document. Both nest teams under `blue`/`orange` with a
//! `players` array, but goals live at `team.goals` in the list shape and at
//! `team.stats.core.goals` in the full shape. Everything here reads from
//! `serde_json::Value` and defaults missing or mistyped fields instead of
//! failing, so a partially populated payload never blocks an import.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeamColor {
    Blue,
    Orange,
}

impl TeamColor {
    pub const ALL: [TeamColor; 2] = [TeamColor::Blue, TeamColor::Orange];

    pub fn as_str(self) -> &'static str {
        match self {
            TeamColor::Blue => "blue",
            TeamColor::Orange => "orange",
        }
    }
}

/// A filtered search candidate, as written to the candidate staging file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRef {
    pub id: String,
    #[serde(default)]
    pub date: Option<String>,
}

pub fn team(doc: &Value, color: TeamColor) -> Option<&Value> {
    doc.get(color.as_str())
}

pub fn team_players(doc: &Value, color: TeamColor) -> &[Value] {
    team(doc, color)
        .and_then(|t| t.get("players"))
        .and_then(|p| p.as_array())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Goals scored by `color`, whichever shape `doc` is in.
pub fn team_goals(doc: &Value, color: TeamColor) -> i64 {
    let Some(team) = team(doc, color) else {
        return 0;
    };
    team.get("goals")
        .and_then(as_i64_any)
        .or_else(|| path(team, &["stats", "core", "goals"]).and_then(as_i64_any))
        .unwrap_or(0)
}

pub fn duration(doc: &Value) -> i64 {
    doc.get("duration").and_then(as_i64_any).unwrap_or(0)
}

/// Platform-native user id (`players[].id.id`). Empty ids count as missing.
pub fn player_platform_user_id(player: &Value) -> Option<String> {
    player
        .get("id")
        .and_then(|id| id.get("id"))
        .and_then(as_string_any)
        .filter(|s| !s.is_empty())
}

pub fn player_platform(player: &Value) -> String {
    player
        .get("id")
        .and_then(|id| id.get("platform"))
        .and_then(as_string_any)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Entries of a search payload. A bare array is accepted too, which is what
/// the raw staging file holds after a cleanup.
pub fn list_entries(payload: &Value) -> &[Value] {
    if let Some(arr) = payload.as_array() {
        return arr;
    }
    payload
        .get("list")
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn path<'a>(v: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().try_fold(v, |cur, key| cur.get(*key))
}

pub fn i64_at(obj: Option<&Value>, key: &str) -> i64 {
    obj.and_then(|o| o.get(key))
        .and_then(as_i64_any)
        .unwrap_or(0)
}

pub fn f64_at(obj: Option<&Value>, key: &str) -> f64 {
    obj.and_then(|o| o.get(key))
        .and_then(as_f64_any)
        .unwrap_or(0.0)
}

pub fn bool_at(obj: Option<&Value>, key: &str) -> bool {
    obj.and_then(|o| o.get(key))
        .and_then(as_bool_any)
        .unwrap_or(false)
}

pub fn str_at(obj: Option<&Value>, key: &str) -> Option<String> {
    obj.and_then(|o| o.get(key)).and_then(as_string_any)
}

/// Integers, floats and numeric strings. Fractional values truncate toward
/// zero; non-finite ones are `None`.
pub fn as_i64_any(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    if let Some(f) = v.as_f64() {
        return f.is_finite().then_some(f as i64);
    }
    let s = v.as_str()?.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
}

pub fn as_f64_any(v: &Value) -> Option<f64> {
    if let Some(f) = v.as_f64() {
        return Some(f);
    }
    v.as_str()?.trim().parse::<f64>().ok()
}

pub fn as_bool_any(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn as_string_any(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
