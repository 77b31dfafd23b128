use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UnknownError = -1,
    NoError = 0,
    ChoiceNotFound,
    NightNotFound,
    NoCurrentNight,
    PlayerNotFound,
    MalformedParameter,
    VoteNotFound,
    DuplicateVoteRank,
    NonSequentialVote,
    ManualVoteNotFound,
    DuplicatePlayerId,
    MissingParameter,
}

impl ErrorCode {
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::UnknownError => "Unknown Error",
            ErrorCode::NoError => "No Error",
            ErrorCode::ChoiceNotFound => "Choice Not Found",
            ErrorCode::NightNotFound => "Night Not Found",
            ErrorCode::NoCurrentNight => "No Current Night",
            ErrorCode::PlayerNotFound => "Player Not Found",
            ErrorCode::MalformedParameter => "Malformed Parameter",
            ErrorCode::VoteNotFound => "Vote Not Found",
            ErrorCode::DuplicateVoteRank => "Duplicate Vote Rank",
            ErrorCode::NonSequentialVote => "Non-Sequential Vote",
            ErrorCode::ManualVoteNotFound => "Manual Vote Not Found",
            ErrorCode::DuplicatePlayerId => "Duplicate Player Id",
            ErrorCode::MissingParameter => "Missing Parameter",
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(*self as i32)
    }
}

#[derive(Error, Debug)]
pub enum SurvivalError {
    #[error("Choice {rank} not found")]
    ChoiceNotFound { rank: i32 },

    #[error("Night {night_id} not found")]
    NightNotFound { night_id: i32 },

    #[error("No night is currently active")]
    NoCurrentNight,

    #[error("Player {player_id} not found")]
    PlayerNotFound { player_id: i64 },

    #[error("Malformed parameter: {parameter}")]
    MalformedParameter { parameter: String },

    #[error("No vote by {by_id} for {for_id} on night {night}")]
    VoteNotFound { by_id: i64, for_id: i64, night: i32 },

    #[error("Player {by_id} already votes for {for_id} with choice {other_choice}, cannot also use choice {choice}")]
    DuplicateVoteRank {
        by_id: i64,
        for_id: i64,
        choice: i32,
        other_choice: i32,
    },

    #[error("Player {by_id} cannot vote with choice {rank} after choice {prev_rank}")]
    NonSequentialVote { by_id: i64, rank: i32, prev_rank: i32 },

    #[error("Manual vote {manual_vote_id} not found")]
    ManualVoteNotFound { manual_vote_id: i32 },

    #[error("Player id {id} already exists")]
    DuplicatePlayerId { id: i64 },

    #[error("Missing parameter: {param_name}")]
    MissingParameter { param_name: String },

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SurvivalError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SurvivalError::ChoiceNotFound { .. } => ErrorCode::ChoiceNotFound,
            SurvivalError::NightNotFound { .. } => ErrorCode::NightNotFound,
            SurvivalError::NoCurrentNight => ErrorCode::NoCurrentNight,
            SurvivalError::PlayerNotFound { .. } => ErrorCode::PlayerNotFound,
            SurvivalError::MalformedParameter { .. } => ErrorCode::MalformedParameter,
            SurvivalError::VoteNotFound { .. } => ErrorCode::VoteNotFound,
            SurvivalError::DuplicateVoteRank { .. } => ErrorCode::DuplicateVoteRank,
            SurvivalError::NonSequentialVote { .. } => ErrorCode::NonSequentialVote,
            SurvivalError::ManualVoteNotFound { .. } => ErrorCode::ManualVoteNotFound,
            SurvivalError::DuplicatePlayerId { .. } => ErrorCode::DuplicatePlayerId,
            SurvivalError::MissingParameter { .. } => ErrorCode::MissingParameter,
            SurvivalError::Database(_)
            | SurvivalError::Connection(_)
            | SurvivalError::Pool(_)
            | SurvivalError::Internal(_) => ErrorCode::UnknownError,
        }
    }

    /// Structured details identifying what was searched for or which values conflicted.
    pub fn metadata(&self) -> Option<Value> {
        let metadata = match self {
            SurvivalError::ChoiceNotFound { rank } => json!({ "choiceId": rank }),
            SurvivalError::NightNotFound { night_id } => json!({ "nightId": night_id }),
            SurvivalError::PlayerNotFound { player_id } => json!({ "playerId": player_id }),
            SurvivalError::MalformedParameter { parameter } => json!({ "parameter": parameter }),
            SurvivalError::VoteNotFound {
                by_id,
                for_id,
                night,
            } => json!({ "forId": for_id, "byId": by_id, "night": night }),
            SurvivalError::DuplicateVoteRank {
                by_id,
                for_id,
                choice,
                other_choice,
            } => json!({
                "byId": by_id,
                "forId": for_id,
                "choice": choice,
                "otherChoice": other_choice,
            }),
            SurvivalError::NonSequentialVote {
                by_id,
                rank,
                prev_rank,
            } => json!({ "byId": by_id, "rank": rank, "prevRank": prev_rank }),
            SurvivalError::ManualVoteNotFound { manual_vote_id } => {
                json!({ "manualVoteId": manual_vote_id })
            }
            SurvivalError::DuplicatePlayerId { id } => json!({ "id": id }),
            SurvivalError::MissingParameter { param_name } => json!({ "paramName": param_name }),
            SurvivalError::NoCurrentNight
            | SurvivalError::Database(_)
            | SurvivalError::Connection(_)
            | SurvivalError::Pool(_)
            | SurvivalError::Internal(_) => return None,
        };
        Some(metadata)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            SurvivalError::ChoiceNotFound { .. }
            | SurvivalError::NightNotFound { .. }
            | SurvivalError::PlayerNotFound { .. }
            | SurvivalError::VoteNotFound { .. }
            | SurvivalError::ManualVoteNotFound { .. } => StatusCode::NOT_FOUND,
            SurvivalError::NoCurrentNight
            | SurvivalError::MalformedParameter { .. }
            | SurvivalError::DuplicateVoteRank { .. }
            | SurvivalError::NonSequentialVote { .. }
            | SurvivalError::MissingParameter { .. } => StatusCode::BAD_REQUEST,
            SurvivalError::DuplicatePlayerId { .. } => StatusCode::CONFLICT,
            SurvivalError::Database(_)
            | SurvivalError::Connection(_)
            | SurvivalError::Pool(_)
            | SurvivalError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct HttpError {
    pub code: ErrorCode,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: HttpError,
}

impl From<&SurvivalError> for ErrorResponse {
    fn from(err: &SurvivalError) -> Self {
        let code = err.code();
        ErrorResponse {
            error: HttpError {
                code,
                description: code.description(),
                metadata: err.metadata(),
            },
        }
    }
}

impl From<PathRejection> for SurvivalError {
    fn from(rejection: PathRejection) -> Self {
        SurvivalError::MalformedParameter {
            parameter: format!("path: {}", rejection.body_text()),
        }
    }
}

impl From<QueryRejection> for SurvivalError {
    fn from(rejection: QueryRejection) -> Self {
        SurvivalError::MalformedParameter {
            parameter: format!("query: {}", rejection.body_text()),
        }
    }
}

impl From<JsonRejection> for SurvivalError {
    fn from(rejection: JsonRejection) -> Self {
        SurvivalError::MalformedParameter {
            parameter: format!("body: {}", rejection.body_text()),
        }
    }
}

impl IntoResponse for SurvivalError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{self}");
        }

        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}
