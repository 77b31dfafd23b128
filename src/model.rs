use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sqlite::Sqlite;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NightStatus {
    NotStarted = 0,
    Current = 1,
    Ended = 2,
}

impl NightStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(NightStatus::NotStarted),
            1 => Some(NightStatus::Current),
            2 => Some(NightStatus::Ended),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            NightStatus::NotStarted => "Not Started",
            NightStatus::Current => "Current",
            NightStatus::Ended => "Ended",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable)]
#[diesel(table_name = crate::schema::nights)]
#[diesel(check_for_backend(Sqlite))]
pub struct Night {
    pub id: i32,
    pub status: i32,
}

impl Night {
    pub fn state(&self) -> Option<NightStatus> {
        NightStatus::from_code(self.status)
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::nights)]
pub struct NewNight {
    pub id: i32,
    pub status: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable)]
#[diesel(table_name = crate::schema::players)]
#[diesel(check_for_backend(Sqlite))]
pub struct Player {
    pub id: i64,
    pub name: String,
    pub died_on: Option<i32>,
}

impl Player {
    /// A player is alive as of a night if they never died, or died on that night or later.
    pub fn is_alive_on(&self, night_id: i32) -> bool {
        self.died_on.map_or(true, |died| died >= night_id)
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::players)]
pub struct NewPlayer<'a> {
    pub id: i64,
    pub name: &'a str,
    // died_on stays NULL
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Queryable, Selectable, Insertable,
)]
#[diesel(table_name = crate::schema::choices)]
#[diesel(check_for_backend(Sqlite))]
pub struct Choice {
    pub rank: i32,
    pub points: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable)]
#[diesel(table_name = crate::schema::votes)]
#[diesel(check_for_backend(Sqlite))]
pub struct Vote {
    pub id: i32,
    pub is_active: bool,
    pub choice_rank: i32,
    pub night_id: i32,
    pub by_player_id: i64,
    pub for_player_id: i64,
    pub cast_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::votes)]
pub struct NewVote {
    pub is_active: bool,
    pub choice_rank: i32,
    pub night_id: i32,
    pub by_player_id: i64,
    pub for_player_id: i64,
    pub cast_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable)]
#[diesel(table_name = crate::schema::manual_votes)]
#[diesel(check_for_backend(Sqlite))]
pub struct ManualVote {
    pub id: i32,
    pub points: i32,
    pub description: String,
    pub night_id: i32,
    pub for_player_id: i64,
    pub awarded_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::manual_votes)]
pub struct NewManualVote {
    pub points: i32,
    pub description: String,
    pub night_id: i32,
    pub for_player_id: i64,
    pub awarded_at: NaiveDateTime,
}

/// Result of a write that either inserted a new row or modified an existing one.
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert<T> {
    Created(T),
    Updated(T),
}

impl<T> Upsert<T> {
    pub fn is_created(&self) -> bool {
        matches!(self, Upsert::Created(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Upsert::Created(value) | Upsert::Updated(value) => value,
        }
    }
}

// Views returned to API clients.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightView {
    pub number: i32,
    pub state: i32,
    pub status: String,
}

impl From<&Night> for NightView {
    fn from(night: &Night) -> Self {
        NightView {
            number: night.id,
            state: night.status,
            status: night
                .state()
                .map_or("Unknown", NightStatus::description)
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: i64,
    pub name: String,
    pub total_votes: i32,
    pub total_manual_votes: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub died_on: Option<i32>,
}

/// A vote joined with its choice and both players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    #[serde(rename = "by")]
    pub by_player: i64,
    #[serde(rename = "for")]
    pub for_player: i64,
    pub by_name: String,
    pub for_name: String,
    pub night: i32,
    pub choice: i32,
    pub points: i32,
    pub is_active: bool,
}

impl VoteRecord {
    pub fn new(vote: &Vote, choice: &Choice, by: &Player, target: &Player) -> Self {
        VoteRecord {
            by_player: by.id,
            for_player: target.id,
            by_name: by.name.clone(),
            for_name: target.name.clone(),
            night: vote.night_id,
            choice: choice.rank,
            points: choice.points,
            is_active: vote.is_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualVoteView {
    pub id: i32,
    #[serde(rename = "for")]
    pub for_player: i64,
    pub night: i32,
    pub points: i32,
    pub description: String,
}

impl From<&ManualVote> for ManualVoteView {
    fn from(manual_vote: &ManualVote) -> Self {
        ManualVoteView {
            id: manual_vote.id,
            for_player: manual_vote.for_player_id,
            night: manual_vote.night_id,
            points: manual_vote.points,
            description: manual_vote.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightPlayersPart {
    pub count: usize,
    pub players: Vec<PlayerView>,
}

impl NightPlayersPart {
    fn new(players: Vec<PlayerView>) -> Self {
        NightPlayersPart {
            count: players.len(),
            players,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightPlayersSplit {
    pub count: usize,
    pub alive: NightPlayersPart,
    pub dead: NightPlayersPart,
}

/// Players of a night, split into those still alive and those already dead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightPlayers {
    pub night: i32,
    pub players: NightPlayersSplit,
}

impl NightPlayers {
    pub fn new(night: i32, alive: Vec<PlayerView>, dead: Vec<PlayerView>) -> Self {
        NightPlayers {
            night,
            players: NightPlayersSplit {
                count: alive.len() + dead.len(),
                alive: NightPlayersPart::new(alive),
                dead: NightPlayersPart::new(dead),
            },
        }
    }
}

/// Every vote touching one player on one night.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerVotes {
    pub by: Vec<VoteRecord>,
    pub received: Vec<VoteRecord>,
    pub all: Vec<VoteRecord>,
    pub manual: Vec<ManualVoteView>,
}
