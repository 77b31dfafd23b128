pub mod app;
pub mod ballot;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod schema;
pub mod scoring;
pub mod utils;

use std::collections::HashMap;

use chrono::Utc;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::SqliteConnection;
use tracing::info;

use crate::ballot::{Ballot, BallotEntry, CastPlan, Retraction};
use crate::config::DatabaseConfig;
use crate::error::SurvivalError;
use crate::model::{
    Choice, ManualVote, ManualVoteView, NewManualVote, NewNight, NewPlayer, NewVote, Night,
    NightPlayers, NightStatus, Player, PlayerVotes, PlayerView, Upsert, Vote, VoteRecord,
};
use crate::schema::{choices, manual_votes, nights, players, votes};
use crate::scoring::{summarize_night, summarize_player, NightSummary, PlayerSummary};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

// WAL mode allows concurrent reads during writes, and the timeout retries locked operations.
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON; \
    PRAGMA journal_mode = WAL; \
    PRAGMA synchronous = NORMAL; \
    PRAGMA busy_timeout = 10000;";

const SCHEMA: &str = include_str!("../migrations/2025-10-01-000000_create_survival/up.sql");

pub fn establish_connection(config: &DatabaseConfig) -> Result<SqliteConnection, SurvivalError> {
    let mut conn = SqliteConnection::establish(&config.url)?;
    conn.batch_execute(CONNECTION_PRAGMAS)?;
    Ok(conn)
}

#[derive(Debug)]
struct ConnectionPragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionPragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(CONNECTION_PRAGMAS)
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Builds the connection pool and makes sure the schema exists.
pub fn init_pool(config: &DatabaseConfig) -> Result<DbPool, SurvivalError> {
    let manager = ConnectionManager::<SqliteConnection>::new(&config.url);
    let pool = Pool::builder()
        .max_size(config.pool_size.max(1))
        .connection_customizer(Box::new(ConnectionPragmas))
        .build(manager)?;

    let mut conn = pool.get()?;
    run_migrations(&mut conn)?;
    info!("Database ready at {}", config.url);

    Ok(pool)
}

/// Creates any missing tables. Safe to run against an existing database.
pub fn run_migrations(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    conn.batch_execute(SCHEMA)
}

/// Deletes all players, nights and votes. Choices are kept.
pub fn reset_database(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::delete(manual_votes::table).execute(conn)?;
        diesel::delete(votes::table).execute(conn)?;
        diesel::delete(players::table).execute(conn)?;
        diesel::delete(nights::table).execute(conn)?;
        Ok(())
    })
}

fn find_night(conn: &mut SqliteConnection, night_id: i32) -> Result<Night, SurvivalError> {
    nights::table
        .find(night_id)
        .select(Night::as_select())
        .first(conn)
        .optional()?
        .ok_or(SurvivalError::NightNotFound { night_id })
}

fn find_current_night(conn: &mut SqliteConnection) -> Result<Option<Night>, SurvivalError> {
    Ok(nights::table
        .filter(nights::status.eq(NightStatus::Current.code()))
        .select(Night::as_select())
        .first(conn)
        .optional()?)
}

fn find_player(conn: &mut SqliteConnection, player_id: i64) -> Result<Player, SurvivalError> {
    players::table
        .find(player_id)
        .select(Player::as_select())
        .first(conn)
        .optional()?
        .ok_or(SurvivalError::PlayerNotFound { player_id })
}

fn find_choice(conn: &mut SqliteConnection, rank: i32) -> Result<Choice, SurvivalError> {
    choices::table
        .find(rank)
        .select(Choice::as_select())
        .first(conn)
        .optional()?
        .ok_or(SurvivalError::ChoiceNotFound { rank })
}

fn set_night_status(
    conn: &mut SqliteConnection,
    night_id: i32,
    status: NightStatus,
) -> Result<Night, diesel::result::Error> {
    diesel::update(nights::table.find(night_id))
        .set(nights::status.eq(status.code()))
        .execute(conn)?;
    Ok(Night {
        id: night_id,
        status: status.code(),
    })
}

fn night_ids(conn: &mut SqliteConnection) -> Result<Vec<i32>, diesel::result::Error> {
    nights::table
        .select(nights::id)
        .order(nights::id.asc())
        .load(conn)
}

// Choices

pub fn get_all_choices(conn: &mut SqliteConnection) -> Result<Vec<Choice>, diesel::result::Error> {
    choices::table
        .select(Choice::as_select())
        .order(choices::rank.asc())
        .load(conn)
}

pub fn get_choice(conn: &mut SqliteConnection, rank: i32) -> Result<Choice, SurvivalError> {
    find_choice(conn, rank)
}

/// Inserts a choice, or updates the points of the choice with the same rank.
pub fn put_choice(
    conn: &mut SqliteConnection,
    choice: Choice,
) -> Result<Upsert<Choice>, SurvivalError> {
    conn.transaction::<_, SurvivalError, _>(|conn| {
        let existing: Option<Choice> = choices::table
            .find(choice.rank)
            .select(Choice::as_select())
            .first(conn)
            .optional()?;

        if existing.is_some() {
            diesel::update(choices::table.find(choice.rank))
                .set(choices::points.eq(choice.points))
                .execute(conn)?;
            return Ok(Upsert::Updated(choice));
        }

        diesel::insert_into(choices::table)
            .values(&choice)
            .execute(conn)?;
        Ok(Upsert::Created(choice))
    })
}

// Nights

pub fn get_nights(
    conn: &mut SqliteConnection,
    status: Option<NightStatus>,
) -> Result<Vec<Night>, diesel::result::Error> {
    let mut query = nights::table
        .select(Night::as_select())
        .order(nights::id.asc())
        .into_boxed::<diesel::sqlite::Sqlite>();
    if let Some(status) = status {
        query = query.filter(nights::status.eq(status.code()));
    }
    query.load(conn)
}

pub fn get_night(conn: &mut SqliteConnection, night_id: i32) -> Result<Night, SurvivalError> {
    find_night(conn, night_id)
}

pub fn get_current_night(conn: &mut SqliteConnection) -> Result<Night, SurvivalError> {
    find_current_night(conn)?.ok_or(SurvivalError::NoCurrentNight)
}

/// Ends the current night and starts the following one, creating it if it doesn't exist yet.
/// Without a current night, night 1 becomes current.
pub fn next_night(conn: &mut SqliteConnection) -> Result<Upsert<Night>, SurvivalError> {
    conn.transaction::<_, SurvivalError, _>(|conn| {
        let next_id = match find_current_night(conn)? {
            Some(current) => {
                set_night_status(conn, current.id, NightStatus::Ended)?;
                current.id + 1
            }
            None => 1,
        };

        let existing: Option<Night> = nights::table
            .find(next_id)
            .select(Night::as_select())
            .first(conn)
            .optional()?;
        if existing.is_some() {
            let night = set_night_status(conn, next_id, NightStatus::Current)?;
            info!("Night {next_id} resumed");
            return Ok(Upsert::Updated(night));
        }

        let new_night = NewNight {
            id: next_id,
            status: NightStatus::Current.code(),
        };
        diesel::insert_into(nights::table)
            .values(&new_night)
            .execute(conn)?;
        info!("Night {next_id} started");

        Ok(Upsert::Created(Night {
            id: next_id,
            status: new_night.status,
        }))
    })
}

/// Moves the current night back to "not started" and makes the previous night current again.
/// Returns the new current night, or `None` if the current night was the first one.
pub fn prev_night(conn: &mut SqliteConnection) -> Result<Option<Night>, SurvivalError> {
    conn.transaction::<_, SurvivalError, _>(|conn| {
        let current = find_current_night(conn)?.ok_or(SurvivalError::NoCurrentNight)?;
        set_night_status(conn, current.id, NightStatus::NotStarted)?;

        let previous: Option<Night> = nights::table
            .find(current.id - 1)
            .select(Night::as_select())
            .first(conn)
            .optional()?;
        match previous {
            Some(previous) => Ok(Some(set_night_status(
                conn,
                previous.id,
                NightStatus::Current,
            )?)),
            None => Ok(None),
        }
    })
}

pub fn get_night_players(
    conn: &mut SqliteConnection,
    night_id: i32,
) -> Result<NightPlayers, SurvivalError> {
    let night = find_night(conn, night_id)?;
    let all = players::table
        .select(Player::as_select())
        .order(players::id.asc())
        .load(conn)?;
    split_night_players(conn, night.id, all)
}

/// Like [`get_night_players`] for the current night, but players who died on the current night
/// are left out entirely.
pub fn get_current_night_players(
    conn: &mut SqliteConnection,
) -> Result<NightPlayers, SurvivalError> {
    let night = get_current_night(conn)?;
    let candidates = players::table
        .filter(players::died_on.is_null().or(players::died_on.gt(night.id)))
        .select(Player::as_select())
        .order(players::id.asc())
        .load(conn)?;
    split_night_players(conn, night.id, candidates)
}

fn split_night_players(
    conn: &mut SqliteConnection,
    night_id: i32,
    candidates: Vec<Player>,
) -> Result<NightPlayers, SurvivalError> {
    let (alive, dead): (Vec<Player>, Vec<Player>) = candidates
        .into_iter()
        .partition(|p| p.is_alive_on(night_id));
    Ok(NightPlayers::new(
        night_id,
        player_views(conn, alive)?,
        player_views(conn, dead)?,
    ))
}

pub fn get_night_summary(
    conn: &mut SqliteConnection,
    night_id: i32,
) -> Result<NightSummary, SurvivalError> {
    let night = find_night(conn, night_id)?;
    let night_ids = night_ids(conn)?;
    let records = load_all_vote_records(conn)?;
    let manual: Vec<ManualVote> = manual_votes::table
        .filter(manual_votes::night_id.eq(night.id))
        .select(ManualVote::as_select())
        .load(conn)?;
    let alive: Vec<Player> = players::table
        .filter(players::died_on.is_null().or(players::died_on.ge(night.id)))
        .select(Player::as_select())
        .load(conn)?;

    Ok(summarize_night(
        night.id, &alive, &records, &manual, &night_ids,
    ))
}

// Players

/// Attaches received-vote totals to players: the points of every active vote and the sum of
/// every manual vote, over all nights.
fn player_views(
    conn: &mut SqliteConnection,
    players: Vec<Player>,
) -> Result<Vec<PlayerView>, diesel::result::Error> {
    if players.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = players.iter().map(|p| p.id).collect();
    let active_points: Vec<(i64, i32)> = votes::table
        .inner_join(choices::table)
        .filter(votes::is_active.eq(true))
        .filter(votes::for_player_id.eq_any(&ids))
        .select((votes::for_player_id, choices::points))
        .load(conn)?;
    let manual_points: Vec<(i64, i32)> = manual_votes::table
        .filter(manual_votes::for_player_id.eq_any(&ids))
        .select((manual_votes::for_player_id, manual_votes::points))
        .load(conn)?;

    let mut vote_totals: HashMap<i64, i32> = HashMap::new();
    for (player_id, points) in active_points {
        *vote_totals.entry(player_id).or_insert(0) += points;
    }
    let mut manual_totals: HashMap<i64, i32> = HashMap::new();
    for (player_id, points) in manual_points {
        *manual_totals.entry(player_id).or_insert(0) += points;
    }

    Ok(players
        .into_iter()
        .map(|p| PlayerView {
            id: p.id,
            total_votes: vote_totals.get(&p.id).copied().unwrap_or(0),
            total_manual_votes: manual_totals.get(&p.id).copied().unwrap_or(0),
            died_on: p.died_on,
            name: p.name,
        })
        .collect())
}

fn player_view(
    conn: &mut SqliteConnection,
    player: Player,
) -> Result<PlayerView, diesel::result::Error> {
    let mut views = player_views(conn, vec![player])?;
    views.pop().ok_or(diesel::result::Error::NotFound)
}

pub fn get_all_players(
    conn: &mut SqliteConnection,
) -> Result<Vec<PlayerView>, diesel::result::Error> {
    let all = players::table
        .select(Player::as_select())
        .order(players::id.asc())
        .load(conn)?;
    player_views(conn, all)
}

pub fn get_player(conn: &mut SqliteConnection, player_id: i64) -> Result<PlayerView, SurvivalError> {
    let player = find_player(conn, player_id)?;
    Ok(player_view(conn, player)?)
}

pub fn add_player(
    conn: &mut SqliteConnection,
    player_id: i64,
    name: Option<&str>,
) -> Result<PlayerView, SurvivalError> {
    let name = name.ok_or_else(|| SurvivalError::MissingParameter {
        param_name: "name".to_string(),
    })?;

    conn.transaction::<_, SurvivalError, _>(|conn| {
        let existing: i64 = players::table
            .filter(players::id.eq(player_id))
            .count()
            .get_result(conn)?;
        if existing > 0 {
            return Err(SurvivalError::DuplicatePlayerId { id: player_id });
        }

        diesel::insert_into(players::table)
            .values(&NewPlayer {
                id: player_id,
                name,
            })
            .execute(conn)?;
        info!("Player {player_id} ({name}) joined");

        Ok(PlayerView {
            id: player_id,
            name: name.to_string(),
            total_votes: 0,
            total_manual_votes: 0,
            died_on: None,
        })
    })
}

pub fn rename_player(
    conn: &mut SqliteConnection,
    player_id: i64,
    name: &str,
) -> Result<(), SurvivalError> {
    let updated = diesel::update(players::table.find(player_id))
        .set(players::name.eq(name))
        .execute(conn)?;
    if updated == 0 {
        return Err(SurvivalError::PlayerNotFound { player_id });
    }
    Ok(())
}

/// Removes a player together with every vote they cast or received and their manual votes.
/// Ballots that voted for the player are compacted so their ranks stay contiguous.
pub fn delete_player(
    conn: &mut SqliteConnection,
    player_id: i64,
) -> Result<PlayerView, SurvivalError> {
    conn.transaction::<_, SurvivalError, _>(|conn| {
        let player = find_player(conn, player_id)?;
        let view = player_view(conn, player)?;

        let received: Vec<Vote> = votes::table
            .filter(votes::for_player_id.eq(player_id))
            .filter(votes::by_player_id.ne(player_id))
            .select(Vote::as_select())
            .load(conn)?;
        for vote in received {
            let ballot = load_ballot(conn, vote.by_player_id, vote.night_id)?;
            if let Some(retraction) = ballot.plan_retract(player_id) {
                apply_retraction(conn, &retraction)?;
            }
        }

        diesel::delete(
            votes::table.filter(
                votes::by_player_id
                    .eq(player_id)
                    .or(votes::for_player_id.eq(player_id)),
            ),
        )
        .execute(conn)?;
        diesel::delete(manual_votes::table.filter(manual_votes::for_player_id.eq(player_id)))
            .execute(conn)?;
        diesel::delete(players::table.find(player_id)).execute(conn)?;
        info!("Player {player_id} deleted");

        Ok(view)
    })
}

/// Marks a player as having died on the current night.
pub fn kill_player(conn: &mut SqliteConnection, player_id: i64) -> Result<PlayerView, SurvivalError> {
    conn.transaction::<_, SurvivalError, _>(|conn| {
        let player = find_player(conn, player_id)?;
        let night = get_current_night(conn)?;

        diesel::update(players::table.find(player_id))
            .set(players::died_on.eq(Some(night.id)))
            .execute(conn)?;
        info!("Player {player_id} died on night {}", night.id);

        Ok(player_view(
            conn,
            Player {
                died_on: Some(night.id),
                ..player
            },
        )?)
    })
}

pub fn revive_player(
    conn: &mut SqliteConnection,
    player_id: i64,
) -> Result<PlayerView, SurvivalError> {
    conn.transaction::<_, SurvivalError, _>(|conn| {
        let player = find_player(conn, player_id)?;

        diesel::update(players::table.find(player_id))
            .set(players::died_on.eq(None::<i32>))
            .execute(conn)?;
        info!("Player {player_id} revived");

        Ok(player_view(
            conn,
            Player {
                died_on: None,
                ..player
            },
        )?)
    })
}

/// Summary of one player at `night_id`, or at the current night when no night is given.
pub fn get_player_summary(
    conn: &mut SqliteConnection,
    player_id: i64,
    night_id: Option<i32>,
) -> Result<PlayerSummary, SurvivalError> {
    let player = find_player(conn, player_id)?;
    let night = match night_id {
        Some(night_id) => find_night(conn, night_id)?,
        None => get_current_night(conn)?,
    };

    let night_ids = night_ids(conn)?;
    let records = load_all_vote_records(conn)?;
    let manual: Vec<ManualVote> = manual_votes::table
        .filter(manual_votes::night_id.eq(night.id))
        .filter(manual_votes::for_player_id.eq(player.id))
        .select(ManualVote::as_select())
        .load(conn)?;

    Ok(summarize_player(
        &player, night.id, &records, &manual, &night_ids,
    ))
}

// Votes

/// Joins votes with their choice and both players.
fn vote_records(
    conn: &mut SqliteConnection,
    votes: &[Vote],
) -> Result<Vec<VoteRecord>, diesel::result::Error> {
    if votes.is_empty() {
        return Ok(Vec::new());
    }

    let players: HashMap<i64, Player> = players::table
        .select(Player::as_select())
        .load(conn)?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();
    let choices: HashMap<i32, Choice> = get_all_choices(conn)?
        .into_iter()
        .map(|c| (c.rank, c))
        .collect();

    votes
        .iter()
        .map(|vote| {
            match (
                choices.get(&vote.choice_rank),
                players.get(&vote.by_player_id),
                players.get(&vote.for_player_id),
            ) {
                (Some(choice), Some(by), Some(target)) => {
                    Ok(VoteRecord::new(vote, choice, by, target))
                }
                _ => Err(diesel::result::Error::NotFound),
            }
        })
        .collect()
}

fn load_all_vote_records(
    conn: &mut SqliteConnection,
) -> Result<Vec<VoteRecord>, diesel::result::Error> {
    let all: Vec<Vote> = votes::table
        .select(Vote::as_select())
        .order((
            votes::night_id.asc(),
            votes::by_player_id.asc(),
            votes::choice_rank.asc(),
        ))
        .load(conn)?;
    vote_records(conn, &all)
}

fn load_ballot(
    conn: &mut SqliteConnection,
    by_player_id: i64,
    night_id: i32,
) -> Result<Ballot, diesel::result::Error> {
    let cast: Vec<Vote> = votes::table
        .filter(votes::by_player_id.eq(by_player_id))
        .filter(votes::night_id.eq(night_id))
        .select(Vote::as_select())
        .load(conn)?;
    Ok(Ballot::new(
        by_player_id,
        cast.iter().map(BallotEntry::from).collect(),
    ))
}

fn apply_retraction(
    conn: &mut SqliteConnection,
    retraction: &Retraction,
) -> Result<(), diesel::result::Error> {
    // Delete first and shift upwards from the lowest rank so no two votes share a rank.
    diesel::delete(votes::table.find(retraction.removed.vote_id)).execute(conn)?;
    for entry in &retraction.shifted {
        diesel::update(votes::table.find(entry.vote_id))
            .set(votes::choice_rank.eq(entry.rank))
            .execute(conn)?;
    }
    Ok(())
}

/// Every vote cast or received by a player on a night, every vote of that night, and the
/// player's manual votes for that night.
pub fn get_player_votes(
    conn: &mut SqliteConnection,
    night_id: i32,
    player_id: i64,
) -> Result<PlayerVotes, SurvivalError> {
    let night = find_night(conn, night_id)?;
    let player = find_player(conn, player_id)?;

    let night_votes: Vec<Vote> = votes::table
        .filter(votes::night_id.eq(night.id))
        .select(Vote::as_select())
        .order((votes::by_player_id.asc(), votes::choice_rank.asc()))
        .load(conn)?;
    let all = vote_records(conn, &night_votes)?;
    let manual: Vec<ManualVote> = manual_votes::table
        .filter(manual_votes::night_id.eq(night.id))
        .filter(manual_votes::for_player_id.eq(player.id))
        .select(ManualVote::as_select())
        .order(manual_votes::id.asc())
        .load(conn)?;

    Ok(PlayerVotes {
        by: all
            .iter()
            .filter(|v| v.by_player == player.id)
            .cloned()
            .collect(),
        received: all
            .iter()
            .filter(|v| v.for_player == player.id)
            .cloned()
            .collect(),
        manual: manual.iter().map(ManualVoteView::from).collect(),
        all,
    })
}

pub fn get_vote(
    conn: &mut SqliteConnection,
    night_id: i32,
    by_id: i64,
    for_id: i64,
) -> Result<VoteRecord, SurvivalError> {
    let night = find_night(conn, night_id)?;
    let by = find_player(conn, by_id)?;
    let target = find_player(conn, for_id)?;

    let vote: Vote = votes::table
        .filter(votes::night_id.eq(night.id))
        .filter(votes::by_player_id.eq(by.id))
        .filter(votes::for_player_id.eq(target.id))
        .select(Vote::as_select())
        .first(conn)
        .optional()?
        .ok_or(SurvivalError::VoteNotFound {
            by_id,
            for_id,
            night: night.id,
        })?;
    let choice = find_choice(conn, vote.choice_rank)?;

    Ok(VoteRecord::new(&vote, &choice, &by, &target))
}

/// Casts the vote of `by_id` for `for_id` on a night using the choice of the given rank.
///
/// If the voter already uses that rank on the night, the existing vote is pointed at the new
/// target (and its active flag updated when given). Otherwise the rank must be the next one after
/// the highest rank already used. New votes are active unless stated otherwise.
pub fn cast_vote(
    conn: &mut SqliteConnection,
    night_id: i32,
    by_id: i64,
    for_id: i64,
    rank: i32,
    is_active: Option<bool>,
) -> Result<Upsert<VoteRecord>, SurvivalError> {
    conn.transaction::<_, SurvivalError, _>(|conn| {
        let night = find_night(conn, night_id)?;
        let by = find_player(conn, by_id)?;
        let target = find_player(conn, for_id)?;
        let choice = find_choice(conn, rank)?;

        let ballot = load_ballot(conn, by.id, night.id)?;
        match ballot.plan_cast(target.id, choice.rank)? {
            CastPlan::Retarget { vote_id } => {
                diesel::update(votes::table.find(vote_id))
                    .set(votes::for_player_id.eq(target.id))
                    .execute(conn)?;
                if let Some(active) = is_active {
                    diesel::update(votes::table.find(vote_id))
                        .set(votes::is_active.eq(active))
                        .execute(conn)?;
                }
                let vote: Vote = votes::table
                    .find(vote_id)
                    .select(Vote::as_select())
                    .first(conn)?;
                info!(
                    "Vote {vote_id} of {} on night {} now targets {}",
                    by.id, night.id, target.id
                );
                Ok(Upsert::Updated(VoteRecord::new(
                    &vote, &choice, &by, &target,
                )))
            }
            CastPlan::Append => {
                let new_vote = NewVote {
                    is_active: is_active.unwrap_or(true),
                    choice_rank: choice.rank,
                    night_id: night.id,
                    by_player_id: by.id,
                    for_player_id: target.id,
                    cast_at: Utc::now().naive_utc(),
                };
                let vote: Vote = diesel::insert_into(votes::table)
                    .values(&new_vote)
                    .returning(Vote::as_returning())
                    .get_result(conn)?;
                info!(
                    "{} voted for {} with choice {} on night {}",
                    by.id, target.id, choice.rank, night.id
                );
                Ok(Upsert::Created(VoteRecord::new(
                    &vote, &choice, &by, &target,
                )))
            }
        }
    })
}

/// Removes the vote of `by_id` for `for_id` on a night and moves the voter's later choices up
/// by one rank.
pub fn retract_vote(
    conn: &mut SqliteConnection,
    night_id: i32,
    by_id: i64,
    for_id: i64,
) -> Result<(), SurvivalError> {
    conn.transaction::<_, SurvivalError, _>(|conn| {
        let night = find_night(conn, night_id)?;
        let by = find_player(conn, by_id)?;
        let target = find_player(conn, for_id)?;

        let ballot = load_ballot(conn, by.id, night.id)?;
        let retraction = ballot
            .plan_retract(target.id)
            .ok_or(SurvivalError::VoteNotFound {
                by_id,
                for_id,
                night: night.id,
            })?;
        apply_retraction(conn, &retraction)?;
        info!(
            "{} retracted their vote for {} on night {}",
            by.id, target.id, night.id
        );

        Ok(())
    })
}

// Manual votes

fn find_manual_vote(conn: &mut SqliteConnection, id: i32) -> Result<ManualVote, SurvivalError> {
    manual_votes::table
        .find(id)
        .select(ManualVote::as_select())
        .first(conn)
        .optional()?
        .ok_or(SurvivalError::ManualVoteNotFound { manual_vote_id: id })
}

/// Grants (or, with negative points, deducts) points to a player on a night.
pub fn add_manual_vote(
    conn: &mut SqliteConnection,
    night_id: i32,
    for_id: i64,
    points: i32,
    description: Option<&str>,
) -> Result<ManualVoteView, SurvivalError> {
    conn.transaction::<_, SurvivalError, _>(|conn| {
        let night = find_night(conn, night_id)?;
        let target = find_player(conn, for_id)?;

        let new_manual_vote = NewManualVote {
            points,
            description: description.unwrap_or_default().to_string(),
            night_id: night.id,
            for_player_id: target.id,
            awarded_at: Utc::now().naive_utc(),
        };
        let manual_vote: ManualVote = diesel::insert_into(manual_votes::table)
            .values(&new_manual_vote)
            .returning(ManualVote::as_returning())
            .get_result(conn)?;
        info!(
            "Manual vote of {points} for {} on night {}",
            target.id, night.id
        );

        Ok(ManualVoteView::from(&manual_vote))
    })
}

pub fn get_manual_vote(conn: &mut SqliteConnection, id: i32) -> Result<ManualVoteView, SurvivalError> {
    Ok(ManualVoteView::from(&find_manual_vote(conn, id)?))
}

pub fn delete_manual_vote(conn: &mut SqliteConnection, id: i32) -> Result<(), SurvivalError> {
    let deleted = diesel::delete(manual_votes::table.find(id)).execute(conn)?;
    if deleted == 0 {
        return Err(SurvivalError::ManualVoteNotFound { manual_vote_id: id });
    }
    Ok(())
}

/// Changes the points and/or description of a manual vote. Missing values are left untouched.
pub fn update_manual_vote(
    conn: &mut SqliteConnection,
    id: i32,
    points: Option<i32>,
    description: Option<&str>,
) -> Result<ManualVoteView, SurvivalError> {
    conn.transaction::<_, SurvivalError, _>(|conn| {
        let mut manual_vote = find_manual_vote(conn, id)?;

        if let Some(points) = points {
            diesel::update(manual_votes::table.find(id))
                .set(manual_votes::points.eq(points))
                .execute(conn)?;
            manual_vote.points = points;
        }
        if let Some(description) = description {
            diesel::update(manual_votes::table.find(id))
                .set(manual_votes::description.eq(description))
                .execute(conn)?;
            manual_vote.description = description.to_string();
        }

        Ok(ManualVoteView::from(&manual_vote))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    // Runs a test against a fresh in-memory database inside a transaction that is always rolled
    // back.
    fn run_test_in_transaction<F>(test_fn: F)
    where
        F: FnOnce(&mut SqliteConnection) -> Result<(), SurvivalError>,
    {
        let mut conn = establish_connection(&DatabaseConfig::new(":memory:"))
            .expect("Failed to open in-memory database");
        run_migrations(&mut conn).expect("Failed to create schema");

        let result: Result<(), SurvivalError> = conn.transaction(|conn| {
            test_fn(conn)?;
            // Force rollback on test success by returning an error.
            Err(diesel::result::Error::RollbackTransaction.into())
        });
        match result {
            Err(SurvivalError::Database(diesel::result::Error::RollbackTransaction)) => {}
            Err(e) => panic!("Test failed: {e}"),
            Ok(()) => unreachable!(),
        }
    }

    // Choices worth 3, 2 and 1 points, the first night started, and four players.
    fn seed_game(conn: &mut SqliteConnection) -> Result<(), SurvivalError> {
        for (rank, points) in [(1, 3), (2, 2), (3, 1)] {
            put_choice(conn, Choice { rank, points })?;
        }
        next_night(conn)?;
        for (id, name) in [(1, "Alice"), (2, "Bob"), (3, "Carol"), (4, "Dave")] {
            add_player(conn, id, Some(name))?;
        }
        Ok(())
    }

    fn ranks_of(conn: &mut SqliteConnection, by_id: i64, night_id: i32) -> Vec<(i64, i32)> {
        let mut ranks: Vec<(i64, i32)> = votes::table
            .filter(votes::by_player_id.eq(by_id))
            .filter(votes::night_id.eq(night_id))
            .select((votes::for_player_id, votes::choice_rank))
            .load(conn)
            .expect("Query failed");
        ranks.sort_by_key(|(_, rank)| *rank);
        ranks
    }

    #[test]
    fn test_run_migrations_is_idempotent() {
        run_test_in_transaction(|conn| {
            run_migrations(conn)?;
            assert!(get_all_choices(conn)?.is_empty());
            Ok(())
        });
    }

    #[test]
    fn test_put_choice() {
        run_test_in_transaction(|conn| {
            let created = put_choice(conn, Choice { rank: 1, points: 3 })?;
            assert!(created.is_created());

            let updated = put_choice(conn, Choice { rank: 1, points: 5 })?;
            assert_eq!(updated, Upsert::Updated(Choice { rank: 1, points: 5 }));
            assert_eq!(get_choice(conn, 1)?.points, 5);

            put_choice(conn, Choice { rank: 2, points: 1 })?;
            let ranks: Vec<i32> = get_all_choices(conn)?.iter().map(|c| c.rank).collect();
            assert_eq!(ranks, vec![1, 2]);

            let err = get_choice(conn, 9).expect_err("Choice 9 doesn't exist");
            assert!(matches!(err, SurvivalError::ChoiceNotFound { rank: 9 }));

            Ok(())
        });
    }

    #[test]
    fn test_next_and_prev_night() {
        run_test_in_transaction(|conn| {
            let err = get_current_night(conn).expect_err("No night has started");
            assert!(matches!(err, SurvivalError::NoCurrentNight));
            assert!(matches!(
                prev_night(conn),
                Err(SurvivalError::NoCurrentNight)
            ));

            let first = next_night(conn)?;
            assert!(first.is_created());
            assert_eq!(get_current_night(conn)?.id, 1);

            let second = next_night(conn)?.into_inner();
            assert_eq!(second.id, 2);
            assert_eq!(get_night(conn, 1)?.state(), Some(NightStatus::Ended));
            assert_eq!(get_night(conn, 2)?.state(), Some(NightStatus::Current));

            let back = prev_night(conn)?.expect("Night 1 exists");
            assert_eq!(back.id, 1);
            assert_eq!(get_night(conn, 2)?.state(), Some(NightStatus::NotStarted));

            // Moving forward again re-uses night 2.
            let again = next_night(conn)?;
            assert_eq!(
                again,
                Upsert::Updated(Night {
                    id: 2,
                    status: NightStatus::Current.code()
                })
            );

            let ended = get_nights(conn, Some(NightStatus::Ended))?;
            assert_eq!(ended.iter().map(|n| n.id).collect::<Vec<_>>(), vec![1]);
            assert_eq!(get_nights(conn, None)?.len(), 2);

            assert!(matches!(
                get_night(conn, 7),
                Err(SurvivalError::NightNotFound { night_id: 7 })
            ));

            Ok(())
        });
    }

    #[test]
    fn test_prev_night_from_first_night() {
        run_test_in_transaction(|conn| {
            next_night(conn)?;
            assert_eq!(prev_night(conn)?, None);
            assert!(matches!(
                get_current_night(conn),
                Err(SurvivalError::NoCurrentNight)
            ));
            Ok(())
        });
    }

    #[test]
    fn test_add_player() {
        run_test_in_transaction(|conn| {
            let player = add_player(conn, 42, Some("Alice"))?;
            assert_eq!(player.name, "Alice");
            assert_eq!(get_player(conn, 42)?, player);

            let err = add_player(conn, 42, Some("Other")).expect_err("Id already used");
            assert!(matches!(err, SurvivalError::DuplicatePlayerId { id: 42 }));

            let err = add_player(conn, 43, None).expect_err("Name is required");
            assert!(matches!(err, SurvivalError::MissingParameter { .. }));

            rename_player(conn, 42, "Alicia")?;
            assert_eq!(get_player(conn, 42)?.name, "Alicia");
            assert!(matches!(
                rename_player(conn, 7, "Nobody"),
                Err(SurvivalError::PlayerNotFound { player_id: 7 })
            ));

            Ok(())
        });
    }

    #[test]
    fn test_kill_and_revive_player() {
        run_test_in_transaction(|conn| {
            add_player(conn, 1, Some("Alice"))?;
            let err = kill_player(conn, 1).expect_err("No current night");
            assert!(matches!(err, SurvivalError::NoCurrentNight));

            next_night(conn)?;
            next_night(conn)?;
            let killed = kill_player(conn, 1)?;
            assert_eq!(killed.died_on, Some(2));
            assert_eq!(get_player(conn, 1)?.died_on, Some(2));

            let revived = revive_player(conn, 1)?;
            assert_eq!(revived.died_on, None);

            assert!(matches!(
                kill_player(conn, 99),
                Err(SurvivalError::PlayerNotFound { player_id: 99 })
            ));

            Ok(())
        });
    }

    #[test]
    fn test_night_players() {
        run_test_in_transaction(|conn| {
            seed_game(conn)?;
            next_night(conn)?;
            kill_player(conn, 2)?;
            next_night(conn)?;
            kill_player(conn, 3)?;

            // Bob died on night 2, so he is still alive on night 2.
            let night_two = get_night_players(conn, 2)?;
            assert_eq!(night_two.players.count, 4);
            assert_eq!(night_two.players.alive.count, 4);

            let night_three = get_night_players(conn, 3)?;
            assert_eq!(night_three.players.alive.count, 3);
            assert_eq!(night_three.players.dead.players[0].name, "Bob");

            // Carol died on the current night and is left out.
            let current = get_current_night_players(conn)?;
            assert_eq!(current.night, 3);
            assert_eq!(current.players.count, 2);
            assert_eq!(current.players.dead.count, 0);

            assert!(matches!(
                get_night_players(conn, 9),
                Err(SurvivalError::NightNotFound { night_id: 9 })
            ));

            Ok(())
        });
    }

    #[test]
    fn test_cast_vote_sequential_ranks() {
        run_test_in_transaction(|conn| {
            seed_game(conn)?;

            for (target, rank) in [(2, 1), (3, 2), (4, 3)] {
                let vote = cast_vote(conn, 1, 1, target, rank, None)?;
                assert!(vote.is_created());
                let vote = vote.into_inner();
                assert_eq!(vote.choice, rank);
                assert!(vote.is_active);
            }

            put_choice(conn, Choice { rank: 5, points: 1 })?;
            let err = cast_vote(conn, 1, 1, 1, 5, None).expect_err("Rank 4 was skipped");
            assert!(matches!(
                err,
                SurvivalError::NonSequentialVote {
                    by_id: 1,
                    rank: 5,
                    prev_rank: 3
                }
            ));
            assert_eq!(ranks_of(conn, 1, 1), vec![(2, 1), (3, 2), (4, 3)]);

            Ok(())
        });
    }

    #[test]
    fn test_cast_vote_validates_references() {
        run_test_in_transaction(|conn| {
            seed_game(conn)?;

            assert!(matches!(
                cast_vote(conn, 5, 1, 2, 1, None),
                Err(SurvivalError::NightNotFound { night_id: 5 })
            ));
            assert!(matches!(
                cast_vote(conn, 1, 9, 2, 1, None),
                Err(SurvivalError::PlayerNotFound { player_id: 9 })
            ));
            assert!(matches!(
                cast_vote(conn, 1, 1, 9, 1, None),
                Err(SurvivalError::PlayerNotFound { player_id: 9 })
            ));
            assert!(matches!(
                cast_vote(conn, 1, 1, 2, 8, None),
                Err(SurvivalError::ChoiceNotFound { rank: 8 })
            ));

            Ok(())
        });
    }

    #[test]
    fn test_cast_vote_duplicate_rank() {
        run_test_in_transaction(|conn| {
            seed_game(conn)?;
            cast_vote(conn, 1, 1, 3, 1, None)?;
            cast_vote(conn, 1, 1, 2, 2, None)?;

            let err = cast_vote(conn, 1, 1, 2, 3, None).expect_err("Bob already holds rank 2");
            assert!(matches!(
                err,
                SurvivalError::DuplicateVoteRank {
                    by_id: 1,
                    for_id: 2,
                    choice: 3,
                    other_choice: 2
                }
            ));

            Ok(())
        });
    }

    #[test]
    fn test_cast_vote_retargets_existing_rank() {
        run_test_in_transaction(|conn| {
            seed_game(conn)?;
            cast_vote(conn, 1, 1, 2, 1, None)?;

            let vote = cast_vote(conn, 1, 1, 3, 1, Some(false))?;
            assert!(!vote.is_created());
            let vote = vote.into_inner();
            assert_eq!(vote.for_player, 3);
            assert_eq!(vote.for_name, "Carol");
            assert!(!vote.is_active);
            assert_eq!(ranks_of(conn, 1, 1), vec![(3, 1)]);

            // Leaving the flag out keeps it as it was.
            let vote = cast_vote(conn, 1, 1, 4, 1, None)?.into_inner();
            assert!(!vote.is_active);

            let fetched = get_vote(conn, 1, 1, 4)?;
            assert_eq!(fetched, vote);
            assert!(matches!(
                get_vote(conn, 1, 1, 2),
                Err(SurvivalError::VoteNotFound {
                    by_id: 1,
                    for_id: 2,
                    night: 1
                })
            ));

            Ok(())
        });
    }

    #[test]
    fn test_retract_vote_compacts_ranks() {
        run_test_in_transaction(|conn| {
            seed_game(conn)?;
            cast_vote(conn, 1, 1, 2, 1, None)?;
            cast_vote(conn, 1, 1, 3, 2, None)?;
            cast_vote(conn, 1, 1, 4, 3, None)?;
            // Another night's ballot is left alone.
            next_night(conn)?;
            cast_vote(conn, 2, 1, 2, 1, None)?;
            cast_vote(conn, 2, 1, 4, 2, None)?;

            retract_vote(conn, 1, 1, 3)?;
            assert_eq!(ranks_of(conn, 1, 1), vec![(2, 1), (4, 2)]);
            assert_eq!(ranks_of(conn, 1, 2), vec![(2, 1), (4, 2)]);

            // The freed rank is the next one to cast.
            cast_vote(conn, 1, 1, 3, 3, None)?;
            assert_eq!(ranks_of(conn, 1, 1), vec![(2, 1), (4, 2), (3, 3)]);

            let err = retract_vote(conn, 2, 1, 3).expect_err("No such vote");
            assert!(matches!(err, SurvivalError::VoteNotFound { night: 2, .. }));

            Ok(())
        });
    }

    #[test]
    fn test_player_votes() {
        run_test_in_transaction(|conn| {
            seed_game(conn)?;
            cast_vote(conn, 1, 1, 2, 1, None)?;
            cast_vote(conn, 1, 2, 1, 1, None)?;
            cast_vote(conn, 1, 3, 1, 1, None)?;
            add_manual_vote(conn, 1, 1, 4, Some("Bonus"))?;

            let votes = get_player_votes(conn, 1, 1)?;
            assert_eq!(votes.by.len(), 1);
            assert_eq!(votes.by[0].for_name, "Bob");
            assert_eq!(votes.received.len(), 2);
            assert_eq!(votes.all.len(), 3);
            assert_eq!(votes.manual.len(), 1);
            assert_eq!(votes.manual[0].description, "Bonus");

            assert!(matches!(
                get_player_votes(conn, 1, 77),
                Err(SurvivalError::PlayerNotFound { player_id: 77 })
            ));

            Ok(())
        });
    }

    #[test]
    fn test_manual_votes() {
        run_test_in_transaction(|conn| {
            seed_game(conn)?;

            let manual = add_manual_vote(conn, 1, 2, -3, None)?;
            assert_eq!(manual.description, "");
            assert_eq!(get_manual_vote(conn, manual.id)?, manual);

            let updated = update_manual_vote(conn, manual.id, Some(5), Some("Forfeit"))?;
            assert_eq!(updated.points, 5);
            assert_eq!(updated.description, "Forfeit");

            let updated = update_manual_vote(conn, manual.id, None, Some("Reversed"))?;
            assert_eq!(updated.points, 5);
            assert_eq!(get_manual_vote(conn, manual.id)?, updated);

            delete_manual_vote(conn, manual.id)?;
            assert!(matches!(
                get_manual_vote(conn, manual.id),
                Err(SurvivalError::ManualVoteNotFound { .. })
            ));
            assert!(matches!(
                delete_manual_vote(conn, manual.id),
                Err(SurvivalError::ManualVoteNotFound { .. })
            ));
            assert!(matches!(
                add_manual_vote(conn, 3, 2, 1, None),
                Err(SurvivalError::NightNotFound { night_id: 3 })
            ));

            Ok(())
        });
    }

    #[test]
    fn test_player_totals() {
        run_test_in_transaction(|conn| {
            seed_game(conn)?;
            cast_vote(conn, 1, 1, 2, 1, None)?;
            cast_vote(conn, 1, 3, 2, 1, Some(false))?;
            cast_vote(conn, 1, 4, 2, 1, None)?;
            add_manual_vote(conn, 1, 2, 2, None)?;
            add_manual_vote(conn, 1, 2, -5, None)?;

            let bob = get_player(conn, 2)?;
            assert_eq!(bob.total_votes, 6);
            assert_eq!(bob.total_manual_votes, -3);

            let all = get_all_players(conn)?;
            assert_eq!(all.len(), 4);
            assert_eq!(all[0].total_votes, 0);

            Ok(())
        });
    }

    #[test]
    fn test_delete_player_compacts_ballots() {
        run_test_in_transaction(|conn| {
            seed_game(conn)?;
            cast_vote(conn, 1, 1, 2, 1, None)?;
            cast_vote(conn, 1, 1, 3, 2, None)?;
            cast_vote(conn, 1, 1, 4, 3, None)?;
            cast_vote(conn, 1, 2, 1, 1, None)?;
            add_manual_vote(conn, 1, 2, 2, None)?;

            let deleted = delete_player(conn, 2)?;
            assert_eq!(deleted.name, "Bob");
            assert!(matches!(
                get_player(conn, 2),
                Err(SurvivalError::PlayerNotFound { player_id: 2 })
            ));

            assert_eq!(ranks_of(conn, 1, 1), vec![(3, 1), (4, 2)]);
            assert!(ranks_of(conn, 2, 1).is_empty());
            let remaining_manual: i64 = manual_votes::table.count().get_result(conn)?;
            assert_eq!(remaining_manual, 0);

            Ok(())
        });
    }

    #[test]
    fn test_night_summary() {
        run_test_in_transaction(|conn| {
            seed_game(conn)?;
            // Night 1: Alice votes Bob first; nobody else votes.
            cast_vote(conn, 1, 1, 2, 1, None)?;
            add_manual_vote(conn, 1, 3, 4, Some("Challenge"))?;

            let summary = get_night_summary(conn, 1)?;
            assert_eq!(summary.summary.len(), 4);
            let bob = &summary.summary["Bob"];
            assert_eq!(bob.today, 3);
            assert_eq!(bob.total, 3);
            assert_eq!(bob.players, 1);
            assert_eq!(bob.choices, BTreeMap::from([(3, 1)]));
            assert_eq!(bob.votes.len(), 1);
            assert_eq!(summary.summary["Carol"].today, 4);
            assert_eq!(summary.summary["Carol"].manual, 4);
            assert_eq!(summary.total.today, vec![4, 3]);
            assert_eq!(summary.total.manual, vec![4]);
            assert!(summary.dead.is_empty());

            // Three nights in, only Alice has ever voted and Dave died on night 2.
            next_night(conn)?;
            kill_player(conn, 4)?;
            next_night(conn)?;
            let summary = get_night_summary(conn, 3)?;
            assert_eq!(
                summary.summary.keys().cloned().collect::<Vec<_>>(),
                vec!["Alice", "Bob", "Carol"]
            );
            assert_eq!(summary.summary["Carol"].no_votes, 1);
            assert_eq!(summary.summary["Carol"].today, 1);
            assert_eq!(summary.summary["Carol"].total, 1);
            assert_eq!(summary.summary["Bob"].total, 4);
            assert_eq!(summary.summary["Alice"].no_votes, 0);
            assert_eq!(summary.total.no_votes, vec![1]);

            assert!(matches!(
                get_night_summary(conn, 9),
                Err(SurvivalError::NightNotFound { night_id: 9 })
            ));

            Ok(())
        });
    }

    #[test]
    fn test_player_summary_defaults_to_current_night() {
        run_test_in_transaction(|conn| {
            seed_game(conn)?;
            cast_vote(conn, 1, 1, 2, 1, None)?;
            next_night(conn)?;
            cast_vote(conn, 2, 1, 2, 1, Some(false))?;

            // Bob never votes, but the first two nights of a missed run are free.
            let current = get_player_summary(conn, 2, None)?;
            assert_eq!(current.no_votes, 0);
            assert_eq!(current.today, 0);
            assert_eq!(current.total, 6);

            let first = get_player_summary(conn, 2, Some(1))?;
            assert_eq!(first.today, 3);
            assert_eq!(first.total, 3);

            assert!(matches!(
                get_player_summary(conn, 2, Some(4)),
                Err(SurvivalError::NightNotFound { night_id: 4 })
            ));

            // The third missed night in a row is the first one that costs a point.
            next_night(conn)?;
            let third = get_player_summary(conn, 2, None)?;
            assert_eq!(third.no_votes, 1);
            assert_eq!(third.today, 1);
            assert_eq!(third.total, 7);

            Ok(())
        });
    }

    #[test]
    fn test_reset_database() {
        run_test_in_transaction(|conn| {
            seed_game(conn)?;
            cast_vote(conn, 1, 1, 2, 1, None)?;
            add_manual_vote(conn, 1, 2, 2, None)?;

            reset_database(conn)?;
            assert!(get_all_players(conn)?.is_empty());
            assert!(get_nights(conn, None)?.is_empty());
            assert_eq!(get_all_choices(conn)?.len(), 3);

            Ok(())
        });
    }
}
