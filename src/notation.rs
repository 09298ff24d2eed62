//! Board notation helpers.
//!
//! A sensor board can only see which piece stands on which square, so every
//! comparison made while reconciling the board works on the piece-placement
//! field of a FEN string. Full FEN strings (side to move, castling rights,
//! en passant, clocks) are only used when talking to the engine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shakmaty::{fen::Fen, Board, CastlingMode, Chess, EnPassantMode, Move, Piece, Position, Square};

use crate::error::ReconcileError;

/// Piece placement of the standard starting arrangement.
pub const STARTING_BOARD: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR";

/// Chess960 index of the standard starting arrangement.
pub const STANDARD_CHESS960_INDEX: u16 = 518;

/// Full FEN of `pos`.
pub fn full_fen(pos: &Chess) -> String {
    Fen::from_position(pos.clone(), EnPassantMode::Legal).to_string()
}

/// Piece-placement notation of `pos`, as a sensor board would report it.
pub fn board_notation(pos: &Chess) -> String {
    placement_of(&full_fen(pos)).to_owned()
}

/// First field of a FEN string.
pub fn placement_of(fen: &str) -> &str {
    fen.split_whitespace().next().unwrap_or_default()
}

/// FEN without the halfmove and fullmove clocks.
///
/// Two positions with the same key are the same position for the purpose of
/// repetition counting.
pub fn repetition_key(pos: &Chess) -> String {
    full_fen(pos)
        .split_whitespace()
        .take(4)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses a full FEN into a position.
pub fn parse_fen(fen: &str, mode: CastlingMode) -> Result<Chess, ReconcileError> {
    let parsed = Fen::from_str(fen).map_err(|e| ReconcileError::InvalidFen {
        fen: fen.to_owned(),
        reason: e.to_string(),
    })?;
    parsed
        .into_position(mode)
        .map_err(|e| ReconcileError::InvalidFen {
            fen: fen.to_owned(),
            reason: e.to_string(),
        })
}

/// One position reachable by a single legal move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Successor {
    pub mv: Move,
    pub notation: String,
}

/// Placement notations reachable in one ply, paired with the move producing each.
///
/// Notations are unique within a set: every legal move at a single position
/// leaves a different piece placement behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuccessorSet {
    successors: Vec<Successor>,
}

impl SuccessorSet {
    /// Successors of `pos`, in legal move generation order.
    pub fn of(pos: &Chess) -> Self {
        let successors = pos
            .legal_moves()
            .into_iter()
            .map(|mv| {
                let mut next = pos.clone();
                next.play_unchecked(&mv);
                Successor {
                    notation: board_notation(&next),
                    mv,
                }
            })
            .collect();
        Self { successors }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// The move whose resulting placement equals `notation`.
    pub fn find(&self, notation: &str) -> Option<&Move> {
        self.successors
            .iter()
            .find(|s| s.notation == notation)
            .map(|s| &s.mv)
    }

    pub fn contains(&self, notation: &str) -> bool {
        self.find(notation).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.successors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.successors.len()
    }

    pub fn clear(&mut self) {
        self.successors.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Successor> {
        self.successors.iter()
    }
}

/// Parses a placement field. Returns `None` for anything a real board could
/// never produce (wrong rank count, overfull rank, unknown piece letters).
pub fn parse_placement(notation: &str) -> Option<Board> {
    Board::from_str(notation).ok()
}

/// A square whose contents differ between the tracked game and the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquareDiff {
    pub square: String,
    pub expected: Option<char>,
    pub sensed: Option<char>,
}

/// The single correction shown to the player first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Correction {
    /// Remove whatever stands on `square`.
    Clear { square: String },
    /// Put `piece` on `square`.
    Put { piece: char, square: String },
}

/// Square-level difference between a sensed placement and the tracked game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MismatchReport {
    pub sensed: String,
    pub expected: String,
    pub squares: Vec<SquareDiff>,
    pub hint: Option<Correction>,
}

/// Compares two placements square by square.
///
/// Squares that must be cleared are hinted before squares that need a piece,
/// since a piece cannot be put down on an occupied square.
pub fn diff_placements(sensed: &str, expected: &str) -> MismatchReport {
    let mut report = MismatchReport {
        sensed: sensed.to_owned(),
        expected: expected.to_owned(),
        squares: Vec::new(),
        hint: None,
    };
    let (Some(board), Some(game)) = (parse_placement(sensed), parse_placement(expected)) else {
        return report;
    };

    let mut put = None;
    for square in Square::ALL {
        let (on_board, in_game) = (board.piece_at(square), game.piece_at(square));
        if on_board == in_game {
            continue;
        }
        report.squares.push(SquareDiff {
            square: square.to_string(),
            expected: in_game.map(Piece::char),
            sensed: on_board.map(Piece::char),
        });
        match in_game {
            None if report.hint.is_none() => {
                report.hint = Some(Correction::Clear {
                    square: square.to_string(),
                })
            }
            None => {}
            Some(piece) => {
                put = Some(Correction::Put {
                    piece: piece.char(),
                    square: square.to_string(),
                })
            }
        }
    }
    if report.hint.is_none() {
        report.hint = put;
    }
    report
}

/// Back rank (white pieces, a-file first) of a Chess960 arrangement.
///
/// Uses the standard Scharnagl numbering, so index 518 is the classical
/// arrangement `RNBQKBNR`.
pub fn chess960_back_rank(index: u16) -> Option<[char; 8]> {
    if index >= 960 {
        return None;
    }
    const KNIGHTS: [(usize, usize); 10] = [
        (0, 1),
        (0, 2),
        (0, 3),
        (0, 4),
        (1, 2),
        (1, 3),
        (1, 4),
        (2, 3),
        (2, 4),
        (3, 4),
    ];

    let mut rank: [Option<char>; 8] = [None; 8];
    let n = index as usize;
    rank[(n % 4) * 2 + 1] = Some('B');
    let n = n / 4;
    rank[(n % 4) * 2] = Some('B');
    let n = n / 4;
    let queen = n % 6;
    let knights = KNIGHTS[n / 6];

    let empty = |rank: &[Option<char>; 8]| -> Vec<usize> {
        (0..8).filter(|&f| rank[f].is_none()).collect()
    };
    let free = empty(&rank);
    rank[free[queen]] = Some('Q');
    let free = empty(&rank);
    rank[free[knights.0]] = Some('N');
    rank[free[knights.1]] = Some('N');
    let free = empty(&rank);
    rank[free[0]] = Some('R');
    rank[free[1]] = Some('K');
    rank[free[2]] = Some('R');

    let mut out = ['R'; 8];
    for (slot, piece) in out.iter_mut().zip(rank) {
        *slot = piece?;
    }
    Some(out)
}

/// Full FEN of a Chess960 starting arrangement, with Shredder castling rights.
pub fn chess960_fen(index: u16) -> Option<String> {
    let back = chess960_back_rank(index)?;
    let white: String = back.iter().collect();
    let black = white.to_lowercase();
    let files: Vec<char> = back
        .iter()
        .enumerate()
        .filter(|&(_, &p)| p == 'R')
        .map(|(f, _)| (b'a' + f as u8) as char)
        .collect();
    let mut castling = String::new();
    for f in files.iter().rev() {
        castling.push(f.to_ascii_uppercase());
    }
    for f in files.iter().rev() {
        castling.push(*f);
    }
    Some(format!(
        "{black}/pppppppp/8/8/8/8/PPPPPPPP/{white} w {castling} - 0 1"
    ))
}

/// A uniformly random Chess960 index.
pub fn random_chess960_index() -> u16 {
    use rand::Rng;
    rand::thread_rng().gen_range(0..960)
}
