#[cfg(feature = "server")]
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use shakmaty::{uci::Uci, Chess};

use crate::game::{GameResult, StartPosition};
use crate::mode::{InteractionMode, PlaySide};
use crate::session::AnalysisSnapshot;

/// Snapshot of the controller state, republished after every event.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BoardStatus {
    /// The tracked game position.
    #[serde(with = "crate::chess_serde::position_serde")]
    pub position: Chess,

    /// Piece placement the board is expected to show.
    pub board: String,

    pub fen: String,

    pub mode: InteractionMode,

    pub side: PlaySide,

    /// Plies played since the game started.
    pub ply: usize,

    /// Engine move waiting to be executed on the board.
    #[serde(with = "crate::chess_serde::option_uci_serde")]
    pub pending: Option<Uci>,

    /// Name the engine reported during the handshake.
    pub engine: String,

    pub game_over: Option<GameResult>,

    /// A position mismatch is on display.
    pub mismatch: bool,

    /// Session generation. Analysis from other generations is stale.
    pub generation: u64,

    /// Latest analysis of the tracked position, if any.
    pub analysis: Option<AnalysisSnapshot>,
}

/// A placement read from the board.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SensedRequest {
    pub placement: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ModeRequest {
    pub mode: InteractionMode,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewGameRequest {
    #[serde(default = "standard_start")]
    pub start: StartPosition,
}

fn standard_start() -> StartPosition {
    StartPosition::Standard
}

/// Errors relating to a submitted request, independent of the game state.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[non_exhaustive]
pub enum BoardRequestError {
    /// The placement is not the first field of a FEN string.
    MalformedPlacement { placement: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoardInternalError {
    pub error_text: String,
}

#[derive(Clone, Debug)]
pub enum BoardResult {
    RequestError(BoardRequestError),
    /// The controller is no longer running.
    Closed,
    Ok(BoardStatus),
}

#[cfg(feature = "server")]
impl IntoResponse for BoardResult {
    fn into_response(self) -> axum::response::Response {
        match self {
            BoardResult::RequestError(what) => (StatusCode::BAD_REQUEST, Json(what)).into_response(),
            BoardResult::Closed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(BoardInternalError {
                    error_text: "controller stopped".to_owned(),
                }),
            )
                .into_response(),
            BoardResult::Ok(what) => (StatusCode::OK, Json(what)).into_response(),
        }
    }
}
