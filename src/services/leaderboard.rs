//! Leaderboard derivation.
//!
//! Every client runs [`compute`] on its own copy of the room, so two clients holding the same
//! players and scores always produce the same rows.

use indexmap::IndexMap;
use serde::Serialize;

use crate::session::model::{CONTROLLER_ID, Player};

/// One ranked line of the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRow {
    /// 1-based position.
    pub rank: usize,
    /// Key under `players`.
    pub player_id: String,
    /// Display name.
    pub name: String,
    /// Avatar key.
    pub avatar: String,
    /// Ledger total; zero when absent.
    pub score: u64,
}

/// Rank online players by score, highest first.
///
/// Ties keep the order in which players appear in the store, which is the order they first
/// registered. The controller's synthetic identity never appears.
pub fn compute(players: &IndexMap<String, Player>, scores: &IndexMap<String, u64>) -> Vec<LeaderboardRow> {
    let mut standings = players
        .iter()
        .filter(|(id, player)| player.online && id.as_str() != CONTROLLER_ID)
        .map(|(id, player)| (id, player, scores.get(id).copied().unwrap_or(0)))
        .collect::<Vec<_>>();

    // Stable sort, so equal scores stay in store order.
    standings.sort_by(|(_, _, a), (_, _, b)| b.cmp(a));

    standings
        .into_iter()
        .enumerate()
        .map(|(position, (id, player, score))| LeaderboardRow {
            rank: position + 1,
            player_id: id.clone(),
            name: player.name.clone(),
            avatar: player.avatar.clone(),
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(name: &str, online: bool) -> Player {
        Player {
            name: name.to_owned(),
            avatar: String::new(),
            online,
            last_seen: 0,
        }
    }

    fn players(entries: &[(&str, bool)]) -> IndexMap<String, Player> {
        entries
            .iter()
            .map(|(id, online)| ((*id).to_owned(), player(id, *online)))
            .collect()
    }

    fn scores(entries: &[(&str, u64)]) -> IndexMap<String, u64> {
        entries
            .iter()
            .map(|(id, score)| ((*id).to_owned(), *score))
            .collect()
    }

    fn order(rows: &[LeaderboardRow]) -> Vec<&str> {
        rows.iter().map(|row| row.player_id.as_str()).collect()
    }

    #[test]
    fn sorts_by_score_descending() {
        let rows = compute(
            &players(&[("a", true), ("b", true), ("c", true)]),
            &scores(&[("a", 50), ("b", 138), ("c", 88)]),
        );
        assert_eq!(order(&rows), ["b", "c", "a"]);
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[2].rank, 3);
    }

    #[test]
    fn missing_score_counts_as_zero() {
        let rows = compute(&players(&[("a", true), ("b", true)]), &scores(&[("b", 1)]));
        assert_eq!(order(&rows), ["b", "a"]);
        assert_eq!(rows[1].score, 0);
    }

    #[test]
    fn excludes_offline_players_and_the_controller() {
        let rows = compute(
            &players(&[(CONTROLLER_ID, true), ("gone", false), ("here", true)]),
            &scores(&[("gone", 500), ("here", 10), (CONTROLLER_ID, 999)]),
        );
        assert_eq!(order(&rows), ["here"]);
    }

    #[test]
    fn ties_keep_store_order() {
        let rows = compute(
            &players(&[("zed", true), ("amy", true), ("bob", true)]),
            &scores(&[("amy", 40), ("zed", 40), ("bob", 90)]),
        );
        assert_eq!(order(&rows), ["bob", "zed", "amy"]);
    }

    #[test]
    fn two_clients_with_the_same_snapshot_agree() {
        let roster = players(&[("a", true), ("b", true), ("c", false), ("d", true)]);
        let ledger = scores(&[("a", 10), ("b", 10), ("c", 70), ("d", 30)]);

        let first = compute(&roster, &ledger);
        let second = compute(&roster.clone(), &ledger.clone());
        assert_eq!(first, second);
    }
}
