//! HTTP surface: routes, request bodies and response envelopes.

use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use diesel::SqliteConnection;
use serde::{Deserialize, Serialize};

use crate::config::LogOptions;
use crate::error::SurvivalError;
use crate::logging::log_traffic;
use crate::model::{
    Choice, ManualVoteView, NightPlayers, NightStatus, NightView, PlayerView, Upsert, VoteRecord,
};
use crate::scoring::{NightSummary, PlayerSummary};
use crate::DbPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
}

impl AppState {
    pub fn new(pool: DbPool) -> Self {
        AppState { pool }
    }
}

// Extractors that report malformed input through the regular error body.

#[derive(FromRequest)]
#[from_request(via(Json), rejection(SurvivalError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(SurvivalError))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(SurvivalError))]
pub struct ApiQuery<T>(pub T);

/// Runs Diesel work on the blocking pool with a pooled connection.
async fn run_blocking<T, F>(state: &AppState, f: F) -> Result<T, SurvivalError>
where
    F: FnOnce(&mut SqliteConnection) -> Result<T, SurvivalError> + Send + 'static,
    T: Send + 'static,
{
    let pool = state.pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await
    .map_err(|e| SurvivalError::Internal(e.to_string()))?
}

pub fn router(state: AppState, logging: LogOptions) -> Router {
    Router::new()
        .route("/choice", get(list_choices).put(upsert_choice))
        .route("/choice/{rank}", get(show_choice))
        .route("/night", get(list_nights))
        .route("/night/current", get(show_current_night))
        .route("/night/current/players", get(current_night_players))
        .route("/night/next", post(advance_night))
        .route("/night/prev", post(rewind_night))
        .route("/night/{id}", get(show_night))
        .route("/night/{id}/players", get(night_players))
        .route("/night/{id}/summary", get(night_summary))
        .route("/player", get(list_players).post(create_player))
        .route(
            "/player/{id}",
            get(show_player).delete(remove_player).patch(patch_player),
        )
        .route("/player/{id}/summary", get(player_summary))
        .route("/player/{id}/kill", post(kill))
        .route("/player/{id}/revive", post(revive))
        .route(
            "/vote/manual/{id}",
            get(show_manual_vote)
                .delete(remove_manual_vote)
                .patch(patch_manual_vote),
        )
        .route("/vote/{night}/{player}/by", get(votes_by))
        .route("/vote/{night}/{player}/for", get(votes_for))
        .route("/vote/{night}/{player}/all", get(votes_all))
        .route("/vote/{night}/{player}/full", get(votes_full))
        .route(
            "/vote/{night}/{player}/manual",
            get(manual_votes_for).put(grant_manual_vote),
        )
        .route(
            "/vote/{night}/{player}/{target}",
            put(cast).get(show_vote).delete(retract),
        )
        .layer(middleware::from_fn_with_state(logging, log_traffic))
        .with_state(state)
}

// Choices

#[derive(Serialize, Deserialize, Debug)]
pub struct ChoiceResponse {
    pub choice: Choice,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ChoicesResponse {
    pub count: usize,
    pub choices: Vec<Choice>,
}

async fn list_choices(
    State(state): State<AppState>,
) -> Result<Json<ChoicesResponse>, SurvivalError> {
    let choices = run_blocking(&state, |conn| Ok(crate::get_all_choices(conn)?)).await?;
    Ok(Json(ChoicesResponse {
        count: choices.len(),
        choices,
    }))
}

async fn show_choice(
    State(state): State<AppState>,
    ApiPath(rank): ApiPath<i32>,
) -> Result<Json<ChoiceResponse>, SurvivalError> {
    let choice = run_blocking(&state, move |conn| crate::get_choice(conn, rank)).await?;
    Ok(Json(ChoiceResponse { choice }))
}

async fn upsert_choice(
    State(state): State<AppState>,
    ApiJson(choice): ApiJson<Choice>,
) -> Result<Response, SurvivalError> {
    match run_blocking(&state, move |conn| crate::put_choice(conn, choice)).await? {
        Upsert::Created(choice) => {
            Ok((StatusCode::CREATED, Json(ChoiceResponse { choice })).into_response())
        }
        Upsert::Updated(_) => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

// Nights

#[derive(Deserialize, Debug)]
pub struct NightsQuery {
    pub status: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct NightResponse {
    pub night: NightView,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct NightsResponse {
    pub nights: Vec<NightView>,
}

async fn list_nights(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<NightsQuery>,
) -> Result<Json<NightsResponse>, SurvivalError> {
    let status = query
        .status
        .map(|code| {
            NightStatus::from_code(code).ok_or_else(|| SurvivalError::MalformedParameter {
                parameter: "status".to_string(),
            })
        })
        .transpose()?;

    let nights = run_blocking(&state, move |conn| Ok(crate::get_nights(conn, status)?)).await?;
    Ok(Json(NightsResponse {
        nights: nights.iter().map(NightView::from).collect(),
    }))
}

async fn show_night(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i32>,
) -> Result<Json<NightResponse>, SurvivalError> {
    let night = run_blocking(&state, move |conn| crate::get_night(conn, id)).await?;
    Ok(Json(NightResponse {
        night: NightView::from(&night),
    }))
}

async fn show_current_night(
    State(state): State<AppState>,
) -> Result<Json<NightResponse>, SurvivalError> {
    let night = run_blocking(&state, crate::get_current_night).await?;
    Ok(Json(NightResponse {
        night: NightView::from(&night),
    }))
}

async fn advance_night(State(state): State<AppState>) -> Result<Response, SurvivalError> {
    let upsert = run_blocking(&state, crate::next_night).await?;
    let status = if upsert.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let night = NightView::from(&upsert.into_inner());
    Ok((status, Json(NightResponse { night })).into_response())
}

async fn rewind_night(State(state): State<AppState>) -> Result<Response, SurvivalError> {
    match run_blocking(&state, crate::prev_night).await? {
        Some(night) => Ok(Json(NightResponse {
            night: NightView::from(&night),
        })
        .into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn night_players(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i32>,
) -> Result<Json<NightPlayers>, SurvivalError> {
    let players = run_blocking(&state, move |conn| crate::get_night_players(conn, id)).await?;
    Ok(Json(players))
}

async fn current_night_players(
    State(state): State<AppState>,
) -> Result<Json<NightPlayers>, SurvivalError> {
    let players = run_blocking(&state, crate::get_current_night_players).await?;
    Ok(Json(players))
}

async fn night_summary(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i32>,
) -> Result<Json<NightSummary>, SurvivalError> {
    let summary = run_blocking(&state, move |conn| crate::get_night_summary(conn, id)).await?;
    Ok(Json(summary))
}

// Players

#[derive(Deserialize, Debug)]
pub struct NewPlayerBody {
    pub id: i64,
    pub name: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ChangePlayerBody {
    pub name: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct SummaryQuery {
    pub night: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PlayerResponse {
    pub player: PlayerView,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PlayersResponse {
    pub count: usize,
    pub players: Vec<PlayerView>,
}

async fn list_players(
    State(state): State<AppState>,
) -> Result<Json<PlayersResponse>, SurvivalError> {
    let players = run_blocking(&state, |conn| Ok(crate::get_all_players(conn)?)).await?;
    Ok(Json(PlayersResponse {
        count: players.len(),
        players,
    }))
}

async fn create_player(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<NewPlayerBody>,
) -> Result<Response, SurvivalError> {
    let player = run_blocking(&state, move |conn| {
        crate::add_player(conn, body.id, body.name.as_deref())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(PlayerResponse { player })).into_response())
}

async fn show_player(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<PlayerResponse>, SurvivalError> {
    let player = run_blocking(&state, move |conn| crate::get_player(conn, id)).await?;
    Ok(Json(PlayerResponse { player }))
}

async fn remove_player(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<PlayerResponse>, SurvivalError> {
    let player = run_blocking(&state, move |conn| crate::delete_player(conn, id)).await?;
    Ok(Json(PlayerResponse { player }))
}

async fn patch_player(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<ChangePlayerBody>,
) -> Result<StatusCode, SurvivalError> {
    let name = body.name.ok_or_else(|| SurvivalError::MissingParameter {
        param_name: "name".to_string(),
    })?;
    run_blocking(&state, move |conn| crate::rename_player(conn, id, &name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn player_summary(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<SummaryQuery>,
) -> Result<Json<PlayerSummary>, SurvivalError> {
    let summary = run_blocking(&state, move |conn| {
        crate::get_player_summary(conn, id, query.night)
    })
    .await?;
    Ok(Json(summary))
}

async fn kill(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<PlayerResponse>, SurvivalError> {
    let player = run_blocking(&state, move |conn| crate::kill_player(conn, id)).await?;
    Ok(Json(PlayerResponse { player }))
}

async fn revive(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<PlayerResponse>, SurvivalError> {
    let player = run_blocking(&state, move |conn| crate::revive_player(conn, id)).await?;
    Ok(Json(PlayerResponse { player }))
}

// Votes

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteBody {
    pub choice: i32,
    pub is_active: Option<bool>,
}

#[derive(Deserialize, Debug)]
pub struct ManualVoteBody {
    pub points: i32,
    pub description: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ChangeManualVoteBody {
    pub points: Option<i32>,
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct VoteResponse {
    pub vote: VoteRecord,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct VotesResponse {
    pub count: usize,
    pub votes: Vec<VoteRecord>,
}

impl From<Vec<VoteRecord>> for VotesResponse {
    fn from(votes: Vec<VoteRecord>) -> Self {
        VotesResponse {
            count: votes.len(),
            votes,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ManualVoteResponse {
    pub manual_vote: ManualVoteView,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ManualVotesResponse {
    pub count: usize,
    pub manual_votes: Vec<ManualVoteView>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FullVotesResponse {
    pub votes: Vec<VoteRecord>,
    pub manual_votes: Vec<ManualVoteView>,
}

async fn votes_by(
    State(state): State<AppState>,
    ApiPath((night, player)): ApiPath<(i32, i64)>,
) -> Result<Json<VotesResponse>, SurvivalError> {
    let votes = run_blocking(&state, move |conn| {
        crate::get_player_votes(conn, night, player)
    })
    .await?;
    Ok(Json(votes.by.into()))
}

async fn votes_for(
    State(state): State<AppState>,
    ApiPath((night, player)): ApiPath<(i32, i64)>,
) -> Result<Json<VotesResponse>, SurvivalError> {
    let votes = run_blocking(&state, move |conn| {
        crate::get_player_votes(conn, night, player)
    })
    .await?;
    Ok(Json(votes.received.into()))
}

async fn votes_all(
    State(state): State<AppState>,
    ApiPath((night, player)): ApiPath<(i32, i64)>,
) -> Result<Json<VotesResponse>, SurvivalError> {
    let votes = run_blocking(&state, move |conn| {
        crate::get_player_votes(conn, night, player)
    })
    .await?;
    Ok(Json(votes.all.into()))
}

async fn votes_full(
    State(state): State<AppState>,
    ApiPath((night, player)): ApiPath<(i32, i64)>,
) -> Result<Json<FullVotesResponse>, SurvivalError> {
    let votes = run_blocking(&state, move |conn| {
        crate::get_player_votes(conn, night, player)
    })
    .await?;
    Ok(Json(FullVotesResponse {
        votes: votes.all,
        manual_votes: votes.manual,
    }))
}

async fn manual_votes_for(
    State(state): State<AppState>,
    ApiPath((night, player)): ApiPath<(i32, i64)>,
) -> Result<Json<ManualVotesResponse>, SurvivalError> {
    let votes = run_blocking(&state, move |conn| {
        crate::get_player_votes(conn, night, player)
    })
    .await?;
    Ok(Json(ManualVotesResponse {
        count: votes.manual.len(),
        manual_votes: votes.manual,
    }))
}

async fn grant_manual_vote(
    State(state): State<AppState>,
    ApiPath((night, player)): ApiPath<(i32, i64)>,
    ApiJson(body): ApiJson<ManualVoteBody>,
) -> Result<Response, SurvivalError> {
    let manual_vote = run_blocking(&state, move |conn| {
        crate::add_manual_vote(conn, night, player, body.points, body.description.as_deref())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(ManualVoteResponse { manual_vote })).into_response())
}

async fn show_vote(
    State(state): State<AppState>,
    ApiPath((night, player, target)): ApiPath<(i32, i64, i64)>,
) -> Result<Json<VoteResponse>, SurvivalError> {
    let vote = run_blocking(&state, move |conn| {
        crate::get_vote(conn, night, player, target)
    })
    .await?;
    Ok(Json(VoteResponse { vote }))
}

async fn cast(
    State(state): State<AppState>,
    ApiPath((night, player, target)): ApiPath<(i32, i64, i64)>,
    ApiJson(body): ApiJson<CastVoteBody>,
) -> Result<Response, SurvivalError> {
    let upsert = run_blocking(&state, move |conn| {
        crate::cast_vote(conn, night, player, target, body.choice, body.is_active)
    })
    .await?;
    let status = if upsert.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(VoteResponse {
            vote: upsert.into_inner(),
        }),
    )
        .into_response())
}

async fn retract(
    State(state): State<AppState>,
    ApiPath((night, player, target)): ApiPath<(i32, i64, i64)>,
) -> Result<StatusCode, SurvivalError> {
    run_blocking(&state, move |conn| {
        crate::retract_vote(conn, night, player, target)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn show_manual_vote(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i32>,
) -> Result<Json<ManualVoteResponse>, SurvivalError> {
    let manual_vote = run_blocking(&state, move |conn| crate::get_manual_vote(conn, id)).await?;
    Ok(Json(ManualVoteResponse { manual_vote }))
}

async fn remove_manual_vote(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i32>,
) -> Result<StatusCode, SurvivalError> {
    run_blocking(&state, move |conn| crate::delete_manual_vote(conn, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn patch_manual_vote(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i32>,
    ApiJson(body): ApiJson<ChangeManualVoteBody>,
) -> Result<StatusCode, SurvivalError> {
    run_blocking(&state, move |conn| {
        crate::update_manual_vote(conn, id, body.points, body.description.as_deref())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
