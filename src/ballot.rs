//! Rank bookkeeping for the votes one player casts on one night.
//!
//! The ranks used by a voter on a night always form the range `1..=n`. Casting may only append
//! the next rank or retarget an existing one, and retracting a vote shifts every later rank down
//! by one.

use crate::error::SurvivalError;
use crate::model::Vote;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BallotEntry {
    pub vote_id: i32,
    pub for_player: i64,
    pub rank: i32,
}

impl From<&Vote> for BallotEntry {
    fn from(vote: &Vote) -> Self {
        BallotEntry {
            vote_id: vote.id,
            for_player: vote.for_player_id,
            rank: vote.choice_rank,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastPlan {
    /// A vote already holds this rank: point it at the new target.
    Retarget { vote_id: i32 },
    /// The rank is the next free one: insert a new vote.
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retraction {
    pub removed: BallotEntry,
    /// Later entries with their rank already lowered by one, in ascending rank order.
    pub shifted: Vec<BallotEntry>,
}

#[derive(Debug, Clone)]
pub struct Ballot {
    by_player: i64,
    entries: Vec<BallotEntry>,
}

impl Ballot {
    pub fn new(by_player: i64, mut entries: Vec<BallotEntry>) -> Self {
        entries.sort_by_key(|e| e.rank);
        Ballot { by_player, entries }
    }

    pub fn entries(&self) -> &[BallotEntry] {
        &self.entries
    }

    /// Highest rank in use, or 0 for an empty ballot.
    pub fn max_rank(&self) -> i32 {
        self.entries.iter().map(|e| e.rank).max().unwrap_or(0)
    }

    pub fn plan_cast(&self, for_player: i64, rank: i32) -> Result<CastPlan, SurvivalError> {
        // The same target can't be held at two ranks at once.
        if let Some(other) = self
            .entries
            .iter()
            .find(|e| e.for_player == for_player && e.rank != rank)
        {
            return Err(SurvivalError::DuplicateVoteRank {
                by_id: self.by_player,
                for_id: for_player,
                choice: rank,
                other_choice: other.rank,
            });
        }

        if let Some(existing) = self.entries.iter().find(|e| e.rank == rank) {
            return Ok(CastPlan::Retarget {
                vote_id: existing.vote_id,
            });
        }

        let max_rank = self.max_rank();
        if rank != max_rank + 1 {
            return Err(SurvivalError::NonSequentialVote {
                by_id: self.by_player,
                rank,
                prev_rank: max_rank,
            });
        }

        Ok(CastPlan::Append)
    }

    /// Plans removal of the vote for `for_player`, or `None` if there is no such vote.
    pub fn plan_retract(&self, for_player: i64) -> Option<Retraction> {
        let removed = *self.entries.iter().find(|e| e.for_player == for_player)?;
        let shifted = self
            .entries
            .iter()
            .filter(|e| e.vote_id != removed.vote_id && e.rank > removed.rank)
            .map(|e| BallotEntry {
                rank: e.rank - 1,
                ..*e
            })
            .collect();

        Some(Retraction { removed, shifted })
    }
}
