//! Interaction modes and the rules each one imposes on the board.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shakmaty::Color;

use crate::reconcile::{OverrideRule, Policy};

/// What the engine does while the player moves pieces on the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionMode {
    /// Engine plays one side.
    #[default]
    Normal,
    /// Engine plays one side and thinks on the player's time.
    Brain,
    /// Player moves both sides, engine shows its best line.
    Analysis,
    /// Player moves both sides, engine shows the evaluation.
    Kibitz,
    /// Player moves both sides, engine searches the current position.
    Ponder,
    /// Player records a game played over the board with a running clock.
    Observe,
    /// Opponent moves arrive from a remote source.
    Remote,
    /// Engine plays one side, but the player may move for it.
    Training,
}

impl InteractionMode {
    pub const ALL: [InteractionMode; 8] = [
        InteractionMode::Normal,
        InteractionMode::Brain,
        InteractionMode::Analysis,
        InteractionMode::Kibitz,
        InteractionMode::Ponder,
        InteractionMode::Observe,
        InteractionMode::Remote,
        InteractionMode::Training,
    ];

    /// Engine answers the player's moves with directed searches.
    pub fn engine_plays(self) -> bool {
        matches!(self, Self::Normal | Self::Brain | Self::Training)
    }

    /// Engine searches the expected reply while the player thinks.
    pub fn ponders(self) -> bool {
        self == Self::Brain
    }

    /// Background analysis follows the current position.
    pub fn watches(self) -> bool {
        matches!(
            self,
            Self::Analysis | Self::Kibitz | Self::Ponder | Self::Observe | Self::Remote
        )
    }

    pub fn runs_clock(self) -> bool {
        !matches!(self, Self::Analysis | Self::Kibitz | Self::Ponder)
    }

    /// Whether the player may take moves back by rebuilding an earlier position.
    pub fn allows_takeback(self) -> bool {
        self != Self::Remote
    }

    /// The opponent side is not moved by the player.
    pub fn has_opponent(self) -> bool {
        self.engine_plays() || self == Self::Remote
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Brain => "brain",
            Self::Analysis => "analysis",
            Self::Kibitz => "kibitz",
            Self::Ponder => "ponder",
            Self::Observe => "observe",
            Self::Remote => "remote",
            Self::Training => "training",
        }
    }
}

impl fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InteractionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown mode {s}"))
    }
}

/// Which color the player has in front of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaySide {
    #[default]
    UserWhite,
    UserBlack,
}

impl PlaySide {
    pub fn for_user(color: Color) -> Self {
        match color {
            Color::White => Self::UserWhite,
            Color::Black => Self::UserBlack,
        }
    }

    pub fn user(self) -> Color {
        match self {
            Self::UserWhite => Color::White,
            Self::UserBlack => Color::Black,
        }
    }

    pub fn opponent(self) -> Color {
        !self.user()
    }

    pub fn flipped(self) -> Self {
        Self::for_user(self.opponent())
    }
}

/// Current mode, side and the board options that shape reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeState {
    pub mode: InteractionMode,
    pub side: PlaySide,
    pub premove: bool,
    pub alternative_moves: bool,
}

impl ModeState {
    pub fn new(mode: InteractionMode, premove: bool, alternative_moves: bool) -> Self {
        Self {
            mode,
            side: PlaySide::UserWhite,
            premove,
            alternative_moves,
        }
    }

    /// Switches mode. Returns true when a running directed search must be
    /// drained first, which is the case whenever the engine stops playing.
    pub fn switch(&mut self, to: InteractionMode) -> bool {
        let drain = self.mode.engine_plays() && !to.engine_plays();
        self.mode = to;
        drain
    }

    /// Whether `color` is moved by the engine in the current mode.
    pub fn engine_moves(&self, color: Color) -> bool {
        self.mode.engine_plays() && color == self.side.opponent()
    }

    pub fn policy(&self) -> Policy {
        let override_engine = match self.mode {
            InteractionMode::Training => OverrideRule::Always,
            InteractionMode::Normal | InteractionMode::Brain if self.alternative_moves => {
                OverrideRule::WhilePending
            }
            _ => OverrideRule::Never,
        };
        Policy {
            human_side: self.mode.has_opponent().then(|| self.side.user()),
            allow_takeback: self.mode.allows_takeback(),
            premove: self.premove && self.mode.has_opponent(),
            override_engine,
        }
    }
}
