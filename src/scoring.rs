//! Nightly score aggregation.
//!
//! A player's score on a night is built from three sources: the active votes they received that
//! night, manual point adjustments, and an escalating penalty for every run of consecutive nights
//! on which they cast no vote. Everything here is pure and works on collections already loaded
//! from the database.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::{ManualVote, Player, VoteRecord};
use crate::utils::{continuous_runs, n_largest};

/// Number of entries kept in each leaderboard of a night summary.
pub const LEADERBOARD_SIZE: usize = 3;

/// Penalty for the night at `position` within a run of missed nights, where the third missed
/// night of a run is position 0. Earlier nights are free, then the penalty doubles every night.
pub fn no_vote_penalty(position: i32) -> i32 {
    match position {
        p if p < 0 => 0,
        p if p >= 31 => i32::MAX,
        p => 1 << p,
    }
}

/// Splits the nights up to `night` on which the player cast no vote into runs of consecutive
/// nights, and converts each run into its per-night penalties.
pub fn no_vote_penalties(night_ids: &[i32], voted_nights: &HashSet<i32>, night: i32) -> Vec<Vec<i32>> {
    let missed = night_ids
        .iter()
        .copied()
        .filter(|id| *id <= night && !voted_nights.contains(id));

    continuous_runs(missed)
        .iter()
        .map(|run| {
            let first = run[0];
            run.iter()
                .map(|id| no_vote_penalty(id - first - 2))
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoVoteTally {
    /// Penalty for `night` itself, or 0 if the player voted that night.
    pub today: i32,
    /// Every penalty accrued from the first night through `night`.
    pub total: i32,
}

pub fn no_vote_tally(night_ids: &[i32], voted_nights: &HashSet<i32>, night: i32) -> NoVoteTally {
    let penalties = no_vote_penalties(night_ids, voted_nights, night);

    let today = if voted_nights.contains(&night) {
        0
    } else {
        penalties
            .last()
            .and_then(|run| run.last())
            .copied()
            .unwrap_or(0)
    };
    let total = penalties.iter().flatten().copied().fold(0, i32::saturating_add);

    NoVoteTally { today, total }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub died_on: Option<i32>,
    pub today: i32,
    pub manual: i32,
    pub no_votes: i32,
    /// Count of received votes per point value.
    pub choices: BTreeMap<i32, i32>,
    /// Number of distinct players who voted for this player.
    pub players: i32,
    pub total: i32,
    pub votes: Vec<VoteRecord>,
}

/// Builds the summary of one player for one night.
///
/// `today` only counts active votes, while `total` counts every vote received through `night`
/// regardless of whether it is active, plus the accumulated no-vote penalties. Manual votes only
/// contribute to `today`.
pub fn summarize_player(
    player: &Player,
    night: i32,
    votes: &[VoteRecord],
    manual_votes: &[ManualVote],
    night_ids: &[i32],
) -> PlayerSummary {
    let votes_for: Vec<&VoteRecord> = votes
        .iter()
        .filter(|v| v.night == night && v.for_player == player.id)
        .collect();
    let voted_nights: HashSet<i32> = votes
        .iter()
        .filter(|v| v.by_player == player.id)
        .map(|v| v.night)
        .collect();

    let mut choices = BTreeMap::new();
    for vote in &votes_for {
        *choices.entry(vote.points).or_insert(0) += 1;
    }
    let players = votes_for
        .iter()
        .map(|v| v.by_player)
        .collect::<HashSet<i64>>()
        .len() as i32;

    let no_votes = no_vote_tally(night_ids, &voted_nights, night);

    let manual: i32 = manual_votes
        .iter()
        .filter(|m| m.for_player_id == player.id && m.night_id == night)
        .map(|m| m.points)
        .fold(0, i32::saturating_add);
    let today_raw: i32 = votes_for
        .iter()
        .filter(|v| v.is_active)
        .map(|v| v.points)
        .fold(0, i32::saturating_add);
    let total_raw: i32 = votes
        .iter()
        .filter(|v| v.for_player == player.id && v.night <= night)
        .map(|v| v.points)
        .fold(0, i32::saturating_add);

    PlayerSummary {
        id: player.id,
        died_on: player.died_on,
        today: today_raw
            .saturating_add(manual)
            .saturating_add(no_votes.today),
        manual,
        no_votes: no_votes.today,
        choices,
        players,
        total: total_raw.saturating_add(no_votes.total),
        votes: votes_for.into_iter().cloned().collect(),
    }
}

/// Leaderboards across every player of a night, each holding the top distinct non-zero values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalSummary {
    pub today: Vec<i32>,
    pub manual: Vec<i32>,
    pub no_votes: Vec<i32>,
    pub choices: BTreeMap<i32, Vec<i32>>,
    pub players: Vec<i32>,
    pub total: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightSummary {
    /// Per-player summaries keyed by player name.
    pub summary: BTreeMap<String, PlayerSummary>,
    pub total: TotalSummary,
    /// Never populated: dead players are filtered out before summarizing.
    pub dead: Vec<String>,
}

/// Summarizes every player alive as of `night` and ranks them per metric.
pub fn summarize_night(
    night: i32,
    players: &[Player],
    votes: &[VoteRecord],
    manual_votes: &[ManualVote],
    night_ids: &[i32],
) -> NightSummary {
    let mut alive: Vec<&Player> = players.iter().filter(|p| p.is_alive_on(night)).collect();
    alive.sort_by(|a, b| a.name.cmp(&b.name));

    let count = alive.len();
    let mut today = Vec::with_capacity(count);
    let mut manual = Vec::with_capacity(count);
    let mut no_votes = Vec::with_capacity(count);
    let mut players_count = Vec::with_capacity(count);
    let mut total = Vec::with_capacity(count);
    let mut choices: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
    let mut summary = BTreeMap::new();

    for player in alive {
        let player_summary = summarize_player(player, night, votes, manual_votes, night_ids);

        for (&points, &n) in &player_summary.choices {
            choices.entry(points).or_default().push(n);
        }
        today.push(player_summary.today);
        manual.push(player_summary.manual);
        no_votes.push(player_summary.no_votes);
        players_count.push(player_summary.players);
        total.push(player_summary.total);

        summary.insert(player.name.clone(), player_summary);
    }

    NightSummary {
        summary,
        total: TotalSummary {
            today: n_largest(&today, LEADERBOARD_SIZE),
            manual: n_largest(&manual, LEADERBOARD_SIZE),
            no_votes: n_largest(&no_votes, LEADERBOARD_SIZE),
            choices: choices
                .into_iter()
                .map(|(points, counts)| (points, n_largest(&counts, LEADERBOARD_SIZE)))
                .collect(),
            players: n_largest(&players_count, LEADERBOARD_SIZE),
            total: n_largest(&total, LEADERBOARD_SIZE),
        },
        dead: Vec::new(),
    }
}
