use serde::{Deserialize, Serialize};
use shakmaty::{uci::Uci, Chess, Move};

/// Time budget for a directed search.
///
/// All values are milliseconds. A search with no limit set at all runs until
/// it is stopped.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchLimits {
    pub white_time: Option<u64>,
    pub black_time: Option<u64>,
    pub white_increment: Option<u64>,
    pub black_increment: Option<u64>,
    pub moves_to_go: Option<u32>,
    pub move_time: Option<u64>,
    pub depth: Option<u32>,
}

impl SearchLimits {
    pub fn move_time(ms: u64) -> Self {
        Self {
            move_time: Some(ms),
            ..Self::default()
        }
    }

    pub fn depth(depth: u32) -> Self {
        Self {
            depth: Some(depth),
            ..Self::default()
        }
    }
}

/// One directed search, as handed to an [`crate::EngineClient`].
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub position: Chess,
    pub limits: SearchLimits,
    /// Restricts the search to these moves.
    pub root_moves: Option<Vec<Move>>,
    /// Search the position in ponder mode until a ponder hit or stop arrives.
    pub ponder: bool,
}

/// Out-of-band instructions for a running search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSignal {
    /// Finish now and answer with the best move so far.
    Stop,
    /// The pondered move was played; continue as a normal search.
    PonderHit,
}

/// Final answer of a directed search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestMove {
    /// `None` when the engine had no move to offer.
    pub best: Option<Move>,
    pub ponder: Option<Move>,
    /// Last principal variation reported before the answer.
    pub info: Option<PvLine>,
}

/// Evaluation from the side to move's point of view.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Score {
    Centipawns(i32),
    Mate(i32),
}

/// One principal variation from an engine info line.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PvLine {
    /// 1-based line index when several lines are searched.
    pub multipv: u32,
    pub depth: u32,
    pub score: Option<Score>,
    pub nodes: Option<u64>,
    #[serde(with = "crate::chess_serde::uci_list_serde")]
    pub pv: Vec<Uci>,
}

/// Request for continuous analysis.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub position: Chess,
    /// Stop once this depth is reached. `None` analyses until stopped.
    pub depth: Option<u32>,
    pub multipv: u32,
}

/// Why a directed search produced no move.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SearchFailure {
    /// The background analysis did not release the engine in time.
    PauseNotAcknowledged,
    /// The engine reported an error or misbehaved.
    Engine(String),
    /// The engine had no move, e.g. because the game is over.
    NoMove,
}

/// What a directed search delivers to its caller. Exactly one per search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveResult {
    pub ticket: u64,
    /// Session generation the search was issued in.
    pub generation: u64,
    pub best: Option<Move>,
    pub ponder: Option<Move>,
    pub info: Option<PvLine>,
    pub failure: Option<SearchFailure>,
}

impl MoveResult {
    pub(crate) fn from_best(ticket: u64, generation: u64, best: BestMove) -> Self {
        let failure = best.best.is_none().then_some(SearchFailure::NoMove);
        Self {
            ticket,
            generation,
            best: best.best,
            ponder: best.ponder,
            info: best.info,
            failure,
        }
    }

    pub(crate) fn failed(ticket: u64, generation: u64, failure: SearchFailure) -> Self {
        Self {
            ticket,
            generation,
            best: None,
            ponder: None,
            info: None,
            failure: Some(failure),
        }
    }
}
