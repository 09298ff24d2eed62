//! Classifies sensed board placements against the tracked game.
//!
//! Every placement reported by the board is matched against a fixed ladder
//! of hypotheses, first match wins:
//!
//! 1. nothing changed
//! 2. a sliding piece briefly produced a successor of the previous position
//! 3. the player executed the engine's move and their reply in one go
//! 4. the engine's move was executed
//! 5. a legal move was made
//! 6. moves were taken back
//! 7. nothing matched, the placement is held and reported after a delay
//!
//! Successor sets are compared by placement notation only, so they are
//! recomputed after every accepted transition.

use shakmaty::{Chess, Color, Move, Position};
use tracing::{debug, info, warn};

use crate::alternatives::AlternativeMoves;
use crate::error::ReconcileError;
use crate::game::GameRecord;
use crate::notation::{
    board_notation, diff_placements, parse_placement, MismatchReport, SuccessorSet,
    STARTING_BOARD,
};

/// When the player may make a legal move on the engine's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideRule {
    Never,
    /// Only while an engine move is waiting to be executed.
    WhilePending,
    Always,
}

/// Mode-dependent switches consulted by [`Reconciler::reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Color moved by the player, `None` when the player moves both sides.
    pub human_side: Option<Color>,
    pub allow_takeback: bool,
    pub premove: bool,
    pub override_engine: OverrideRule,
}

impl Policy {
    /// Player moves both sides, takebacks allowed.
    pub fn free() -> Self {
        Self {
            human_side: None,
            allow_takeback: true,
            premove: false,
            override_engine: OverrideRule::Never,
        }
    }

    /// Player moves `color`, the engine moves the other side.
    pub fn against_engine(color: Color) -> Self {
        Self {
            human_side: Some(color),
            ..Self::free()
        }
    }

    fn player_moves(&self, turn: Color) -> bool {
        self.human_side.map_or(true, |side| side == turn)
    }
}

/// Move decided by the engine that the board does not show yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineMove {
    pub mv: Move,
    pub ponder: Option<Move>,
}

#[derive(Debug, Clone)]
struct Pending {
    engine: EngineMove,
    notation: String,
    successors: SuccessorSet,
}

/// How long an unresolved placement is held before it is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchDelay {
    First,
    /// A mismatch was already reported and not yet fixed.
    Repeat,
}

/// Result of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    SlidingUndo {
        undone: Move,
        replacement: Move,
        discarded: Option<EngineMove>,
    },
    Premove {
        engine_move: Move,
        reply: Move,
    },
    EngineMoveConfirmed {
        engine_move: EngineMove,
    },
    StandardMove {
        mv: Move,
    },
    EngineMoveOverridden {
        mv: Move,
        discarded: Option<EngineMove>,
    },
    /// Undone moves, most recent first.
    DeepTakeback {
        undone: Vec<Move>,
    },
    NewGameRequested,
    Unresolved {
        delay: MismatchDelay,
    },
}

impl Outcome {
    /// Whether the sensed placement was explained.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Outcome::Unresolved { .. })
    }
}

/// Owns the tracked game and everything keyed to its current position.
#[derive(Debug, Clone)]
pub struct Reconciler {
    game: GameRecord,
    legal: SuccessorSet,
    prior: SuccessorSet,
    pending: Option<Pending>,
    alternatives: AlternativeMoves,
    takeback_locked: bool,
    error_notation: Option<String>,
    mismatch_flagged: bool,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(GameRecord::default())
    }
}

impl Reconciler {
    pub fn new(game: GameRecord) -> Self {
        let legal = SuccessorSet::of(game.current());
        Self {
            game,
            legal,
            prior: SuccessorSet::empty(),
            pending: None,
            alternatives: AlternativeMoves::new(),
            takeback_locked: false,
            error_notation: None,
            mismatch_flagged: false,
        }
    }

    /// Replaces the game wholesale.
    ///
    /// A game set up from an arbitrary position cannot be taken back past
    /// its start, so takebacks stay locked until the first move.
    pub fn reset(&mut self, game: GameRecord, lock_takeback: bool) {
        *self = Self::new(game);
        self.takeback_locked = lock_takeback;
    }

    pub fn game(&self) -> &GameRecord {
        &self.game
    }

    pub fn position(&self) -> &Chess {
        self.game.current()
    }

    pub fn notation(&self) -> String {
        self.game.notation()
    }

    pub fn legal(&self) -> &SuccessorSet {
        &self.legal
    }

    pub fn prior(&self) -> &SuccessorSet {
        &self.prior
    }

    pub fn pending(&self) -> Option<&EngineMove> {
        self.pending.as_ref().map(|p| &p.engine)
    }

    pub fn alternatives(&self) -> &AlternativeMoves {
        &self.alternatives
    }

    pub fn alternatives_mut(&mut self) -> &mut AlternativeMoves {
        &mut self.alternatives
    }

    /// A mismatch report is currently shown and not yet resolved.
    pub fn mismatch_flagged(&self) -> bool {
        self.mismatch_flagged
    }

    /// Records the engine's decision. The move must be legal here.
    pub fn set_pending(&mut self, mv: Move, ponder: Option<Move>) -> Result<(), ReconcileError> {
        let after = self
            .position()
            .clone()
            .play(&mv)
            .map_err(|_| ReconcileError::IllegalMove {
                uci: self.game.uci(&mv).to_string(),
                fen: self.game.fen(),
            })?;
        let ponder = ponder.filter(|p| after.is_legal(p));
        self.pending = Some(Pending {
            notation: board_notation(&after),
            successors: SuccessorSet::of(&after),
            engine: EngineMove { mv, ponder },
        });
        Ok(())
    }

    pub fn discard_pending(&mut self) -> Option<EngineMove> {
        self.pending.take().map(|p| p.engine)
    }

    /// Applies `mv` without a sensed board, e.g. for a remote opponent.
    pub fn apply(&mut self, mv: &Move) -> Result<(), ReconcileError> {
        self.pending = None;
        self.apply_move(mv)
    }

    /// Undoes the last ply and any engine move waiting on top of it.
    pub fn take_back(&mut self) -> Option<Move> {
        self.pending = None;
        let undone = self.game.pop()?;
        self.after_rewind();
        Some(undone)
    }

    /// Classifies `sensed` and applies whatever it implies.
    pub fn reconcile(&mut self, sensed: &str, policy: &Policy) -> Outcome {
        let outcome = self.classify(sensed, policy);
        match &outcome {
            Outcome::Unresolved { .. } => {}
            _ => {
                if self.error_notation.take().is_some() || self.mismatch_flagged {
                    debug!("board placement resolved");
                }
                self.mismatch_flagged = false;
            }
        }
        outcome
    }

    fn classify(&mut self, sensed: &str, policy: &Policy) -> Outcome {
        if sensed == self.notation() {
            return Outcome::Unchanged;
        }

        let turn = self.game.turn();

        if self.prior.contains(sensed) && (policy.human_side.is_none() || !policy.player_moves(turn)) {
            if let Some(outcome) = self.sliding_undo(sensed) {
                return outcome;
            }
        }

        if policy.premove {
            if let Some(outcome) = self.premove(sensed) {
                return outcome;
            }
        }

        if self.pending.as_ref().map(|p| p.notation.as_str()) == Some(sensed) {
            if let Some(pending) = self.pending.take() {
                if let Err(e) = self.apply_move(&pending.engine.mv) {
                    warn!(error = %e, "pending engine move no longer applies");
                    return self.unresolved(sensed);
                }
                self.prior.clear();
                info!(mv = %self.game.uci(&pending.engine.mv), "engine move confirmed");
                return Outcome::EngineMoveConfirmed {
                    engine_move: pending.engine,
                };
            }
        }

        if let Some(mv) = self.legal.find(sensed).cloned() {
            let may_override = match policy.override_engine {
                OverrideRule::Never => false,
                OverrideRule::WhilePending => self.pending.is_some(),
                OverrideRule::Always => true,
            };
            if policy.player_moves(turn) {
                self.pending = None;
                if self.apply_move(&mv).is_ok() {
                    return Outcome::StandardMove { mv };
                }
            } else if may_override {
                let discarded = self.discard_pending();
                if self.apply_move(&mv).is_ok() {
                    info!(mv = %self.game.uci(&mv), "player moved for the engine");
                    return Outcome::EngineMoveOverridden { mv, discarded };
                }
            }
        }

        if policy.allow_takeback && !self.takeback_locked {
            if let Some(undone) = self.deep_takeback(sensed) {
                return Outcome::DeepTakeback { undone };
            }
        }

        if sensed == STARTING_BOARD {
            info!("starting arrangement sensed, new game");
            return Outcome::NewGameRequested;
        }
        self.unresolved(sensed)
    }

    fn sliding_undo(&mut self, sensed: &str) -> Option<Outcome> {
        let mut rewound = self.game.clone();
        let undone = rewound.pop()?;
        let replacement = SuccessorSet::of(rewound.current()).find(sensed).cloned()?;
        let prior = self.prior.clone();
        let discarded = self.discard_pending();

        self.game = rewound;
        self.legal = prior.clone();
        if self.apply_move(&replacement).is_err() {
            return None;
        }
        // the next sliding artifact still refers to the same base position
        self.prior = prior;
        info!(
            undone = %self.game.uci(&undone),
            replacement = %self.game.uci(&replacement),
            "sliding move corrected"
        );
        Some(Outcome::SlidingUndo {
            undone,
            replacement,
            discarded,
        })
    }

    fn premove(&mut self, sensed: &str) -> Option<Outcome> {
        let reply = self.pending.as_ref()?.successors.find(sensed).cloned()?;
        let pending = self.pending.take()?;
        if self.apply_move(&pending.engine.mv).is_err() {
            warn!("premove could not be applied");
            return None;
        }
        // the engine's ply stands on its own; a finished game takes no reply
        if let Some(result) = self.game.game_end() {
            info!(?result, "engine move ended the game, reply ignored");
            self.prior.clear();
            return Some(Outcome::EngineMoveConfirmed {
                engine_move: pending.engine,
            });
        }
        let engine_move = pending.engine.mv;
        if self.apply_move(&reply).is_err() {
            warn!("premove could not be applied");
            return None;
        }
        info!(
            engine_move = %self.game.uci(&engine_move),
            reply = %self.game.uci(&reply),
            "premove detected"
        );
        Some(Outcome::Premove { engine_move, reply })
    }

    fn deep_takeback(&mut self, sensed: &str) -> Option<Vec<Move>> {
        let mut probe = self.game.clone();
        let mut undone = Vec::new();
        while let Some(mv) = probe.pop() {
            undone.push(mv);
            if probe.notation() == sensed {
                self.game = probe;
                self.pending = None;
                self.after_rewind();
                info!(plies = undone.len(), "takeback detected");
                return Some(undone);
            }
        }
        None
    }

    fn unresolved(&mut self, sensed: &str) -> Outcome {
        if parse_placement(sensed).is_none() {
            warn!(sensed, "impossible board placement");
        }
        self.error_notation = Some(sensed.to_owned());
        let delay = if self.mismatch_flagged {
            MismatchDelay::Repeat
        } else {
            MismatchDelay::First
        };
        Outcome::Unresolved { delay }
    }

    /// Reports the held placement once its delay has elapsed.
    pub fn expire_mismatch(&mut self) -> Option<MismatchReport> {
        let sensed = self.error_notation.take()?;
        self.mismatch_flagged = true;
        let report = diff_placements(&sensed, &self.notation());
        warn!(
            sensed = %report.sensed,
            expected = %report.expected,
            squares = report.squares.len(),
            "board does not match game"
        );
        Some(report)
    }

    /// Placement currently held as unresolved.
    pub fn held_placement(&self) -> Option<&str> {
        self.error_notation.as_deref()
    }

    /// Replaces the game with the sensed placement itself.
    ///
    /// Tries the current side to move first, then the other side. Castling
    /// and en passant rights cannot be seen on the board and are dropped.
    pub fn resync(&mut self, sensed: &str) -> Result<(), ReconcileError> {
        if parse_placement(sensed).is_none() {
            return Err(ReconcileError::InvalidPlacement(sensed.to_owned()));
        }
        let turn = self.game.turn();
        let mode = self.game.castling_mode();
        let mut last_error = None;
        for color in [turn, !turn] {
            let fen = format!("{sensed} {} - - 0 1", color.char());
            match GameRecord::from_fen(&fen, mode) {
                Ok(game) => {
                    info!(%fen, "game re-synced from board");
                    self.reset(game, true);
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| ReconcileError::InvalidPlacement(sensed.to_owned())))
    }

    fn apply_move(&mut self, mv: &Move) -> Result<(), ReconcileError> {
        self.game.push(mv)?;
        self.prior = std::mem::replace(&mut self.legal, SuccessorSet::of(self.game.current()));
        self.alternatives.reset();
        self.takeback_locked = false;
        Ok(())
    }

    fn after_rewind(&mut self) {
        self.legal = SuccessorSet::of(self.game.current());
        self.prior.clear();
        self.alternatives.reset();
    }
}
