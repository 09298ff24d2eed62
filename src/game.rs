//! The tracked game: a starting position and the moves played from it.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shakmaty::{uci::Uci, CastlingMode, Chess, Color, Move, Position};

use crate::error::ReconcileError;
use crate::notation::{self, board_notation, full_fen, repetition_key};

/// How a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameResult {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    SeventyFiveMoves,
    FivefoldRepetition,
    Abort,
    Draw,
    WhiteWins,
    BlackWins,
}

/// Where a new game starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    Standard,
    Chess960(u16),
    RandomChess960,
}

/// Start position plus move stack.
///
/// The current position is always the start position with every recorded
/// move applied in order. Each intermediate position is cached so undoing a
/// ply costs nothing.
#[derive(Debug, Clone)]
pub struct GameRecord {
    castling_mode: CastlingMode,
    moves: Vec<Move>,
    positions: Vec<Chess>,
}

impl Default for GameRecord {
    fn default() -> Self {
        Self::new(Chess::default(), CastlingMode::Standard)
    }
}

impl GameRecord {
    pub fn new(start: Chess, castling_mode: CastlingMode) -> Self {
        Self {
            castling_mode,
            moves: Vec::new(),
            positions: vec![start],
        }
    }

    pub fn from_fen(fen: &str, castling_mode: CastlingMode) -> Result<Self, ReconcileError> {
        Ok(Self::new(notation::parse_fen(fen, castling_mode)?, castling_mode))
    }

    pub fn from_start(start: StartPosition) -> Result<Self, ReconcileError> {
        let index = match start {
            StartPosition::Standard => return Ok(Self::default()),
            StartPosition::Chess960(index) => index,
            StartPosition::RandomChess960 => notation::random_chess960_index(),
        };
        let fen = notation::chess960_fen(index).ok_or_else(|| ReconcileError::InvalidFen {
            fen: format!("chess960 #{index}"),
            reason: "index out of range".to_owned(),
        })?;
        Self::from_fen(&fen, CastlingMode::Chess960)
    }

    pub fn castling_mode(&self) -> CastlingMode {
        self.castling_mode
    }

    pub fn start(&self) -> &Chess {
        &self.positions[0]
    }

    pub fn current(&self) -> &Chess {
        // never empty: `pop` refuses to remove the start position
        &self.positions[self.positions.len() - 1]
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    /// Start position followed by the position after each move.
    pub fn positions(&self) -> &[Chess] {
        &self.positions
    }

    pub fn last_move(&self) -> Option<&Move> {
        self.moves.last()
    }

    pub fn ply_count(&self) -> usize {
        self.moves.len()
    }

    pub fn turn(&self) -> Color {
        self.current().turn()
    }

    pub fn notation(&self) -> String {
        board_notation(self.current())
    }

    pub fn fen(&self) -> String {
        full_fen(self.current())
    }

    /// Plays `mv`, rejecting it when it is not legal in the current position.
    pub fn push(&mut self, mv: &Move) -> Result<(), ReconcileError> {
        let next = self
            .current()
            .clone()
            .play(mv)
            .map_err(|_| ReconcileError::IllegalMove {
                uci: self.uci(mv).to_string(),
                fen: self.fen(),
            })?;
        self.moves.push(mv.clone());
        self.positions.push(next);
        Ok(())
    }

    /// Undoes the last ply.
    pub fn pop(&mut self) -> Option<Move> {
        let mv = self.moves.pop()?;
        self.positions.pop();
        Some(mv)
    }

    pub fn uci(&self, mv: &Move) -> Uci {
        mv.to_uci(self.castling_mode)
    }

    /// Resolves a UCI string against the current position.
    pub fn parse_uci(&self, uci: &str) -> Result<Move, ReconcileError> {
        let illegal = || ReconcileError::IllegalMove {
            uci: uci.to_owned(),
            fen: self.fen(),
        };
        Uci::from_str(uci)
            .map_err(|_| illegal())?
            .to_move(self.current())
            .map_err(|_| illegal())
    }

    /// Positions reached, counting the current one, with the same repetition key.
    pub fn repetitions(&self) -> usize {
        let key = repetition_key(self.current());
        self.positions
            .iter()
            .filter(|pos| repetition_key(pos) == key)
            .count()
    }

    /// Result of the game if the current position ends it on its own.
    pub fn game_end(&self) -> Option<GameResult> {
        let pos = self.current();
        if pos.is_stalemate() {
            Some(GameResult::Stalemate)
        } else if pos.is_insufficient_material() {
            Some(GameResult::InsufficientMaterial)
        } else if pos.halfmoves() >= 150 {
            Some(GameResult::SeventyFiveMoves)
        } else if self.repetitions() >= 5 {
            Some(GameResult::FivefoldRepetition)
        } else if pos.is_checkmate() {
            Some(GameResult::Checkmate)
        } else {
            None
        }
    }
}
