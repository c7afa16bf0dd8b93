use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::replay::{self, TeamColor};

/// The fields a match id is derived from. Nothing else about a replay
/// affects its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashInputs {
    pub player_ids: Vec<String>,
    pub duration: i64,
    pub blue_goals: i64,
    pub orange_goals: i64,
}

impl HashInputs {
    /// Works on both the list shape and the full shape.
    pub fn from_document(doc: &Value) -> Self {
        let mut player_ids = TeamColor::ALL
            .iter()
            .flat_map(|color| replay::team_players(doc, *color))
            .filter_map(replay::player_platform_user_id)
            .collect::<Vec<_>>();
        player_ids.sort();

        Self {
            player_ids,
            duration: replay::duration(doc),
            blue_goals: replay::team_goals(doc, TeamColor::Blue),
            orange_goals: replay::team_goals(doc, TeamColor::Orange),
        }
    }

    pub fn canonical_string(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.player_ids.concat(),
            self.duration,
            self.blue_goals,
            self.orange_goals
        )
    }

    pub fn digest(&self) -> String {
        let digest = Sha256::digest(self.canonical_string().as_bytes());
        format!("{digest:x}")
    }
}

pub fn match_hash(doc: &Value) -> String {
    HashInputs::from_document(doc).digest()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn canonical_string_sorts_ids() {
        let doc = json!({
            "duration": 300,
            "blue": { "goals": 2, "players": [
                { "id": { "platform": "steam", "id": "p2" } },
                { "id": { "platform": "epic", "id": "p1" } }
            ]},
            "orange": { "goals": 1, "players": [
                { "id": { "platform": "steam", "id": "p3" } }
            ]}
        });
        let inputs = HashInputs::from_document(&doc);
        assert_eq!(inputs.canonical_string(), "p1p2p3_300_2_1");
        assert_eq!(inputs.digest().len(), 64);
    }

    #[test]
    fn players_without_ids_are_ignored() {
        let doc = json!({
            "duration": 10,
            "blue": { "players": [ { "name": "bot" }, { "id": { "id": "a" } } ] },
        });
        assert_eq!(HashInputs::from_document(&doc).canonical_string(), "a_10_0_0");
    }

    #[test]
    fn fractional_numbers_truncate_toward_zero() {
        let doc = json!({
            "duration": 300.9,
            "blue": { "goals": "2.0", "players": [ { "id": { "id": "a" } } ] },
            "orange": { "stats": { "core": { "goals": 1.5 } } }
        });
        assert_eq!(HashInputs::from_document(&doc).canonical_string(), "a_300_2_1");
    }
}
