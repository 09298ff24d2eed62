//! TOML configuration.
//!
//! Every section and key is optional; missing values take the defaults below.
//!
//! ```toml
//! [engine]
//! path = "/usr/bin/stockfish"
//! fallback = "/usr/games/stockfish"
//! options = { Threads = "2", Hash = "64" }
//!
//! [board]
//! mode = "brain"
//! premove = true
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::mode::InteractionMode;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub engine: EngineConfig,
    pub session: SessionConfig,
    pub board: BoardConfig,
    pub clock: ClockConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Engine executable.
    pub path: String,
    pub args: Vec<String>,
    /// UCI options, only sent when the engine advertises them.
    pub options: BTreeMap<String, String>,
    pub handshake_timeout_ms: u64,
    /// Engine started instead when `path` fails to start.
    pub fallback: Option<String>,
    /// Restarts tried after the engine stops answering, before giving up.
    pub max_relaunches: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: "stockfish".to_owned(),
            args: Vec::new(),
            options: BTreeMap::new(),
            handshake_timeout_ms: 10_000,
            fallback: None,
            max_relaunches: 1,
        }
    }
}

impl EngineConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Pacing of the background analysis loop while it has nothing to do.
    pub analysis_poll_ms: u64,
    /// How long a directed search waits for the analysis loop to let go of the engine.
    pub pause_ack_timeout_ms: u64,
    pub analysis_depth: Option<u32>,
    pub multipv: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            analysis_poll_ms: 100,
            pause_ack_timeout_ms: 3_000,
            analysis_depth: Some(20),
            multipv: 1,
        }
    }
}

impl SessionConfig {
    pub fn analysis_poll(&self) -> Duration {
        Duration::from_millis(self.analysis_poll_ms)
    }

    pub fn pause_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.pause_ack_timeout_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BoardConfig {
    /// Delay before an unexplained board placement is reported.
    pub mismatch_delay_ms: u64,
    /// Shorter delay used once a mismatch is already on display.
    pub repeat_mismatch_delay_ms: u64,
    pub premove: bool,
    /// Let the player make a different move for the engine while its move is shown.
    pub alternative_moves: bool,
    pub mode: InteractionMode,
    pub chess960: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            mismatch_delay_ms: 4_000,
            repeat_mismatch_delay_ms: 1_000,
            premove: false,
            alternative_moves: false,
            mode: InteractionMode::Normal,
            chess960: false,
        }
    }
}

impl BoardConfig {
    pub fn mismatch_delay(&self) -> Duration {
        Duration::from_millis(self.mismatch_delay_ms)
    }

    pub fn repeat_mismatch_delay(&self) -> Duration {
        Duration::from_millis(self.repeat_mismatch_delay_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ClockConfig {
    /// Fixed thinking time per engine move.
    pub move_time_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { move_time_ms: 1_000 }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session.multipv == 0 {
            return Err(ConfigError::Value {
                key: "session.multipv",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.session.analysis_poll_ms == 0 {
            return Err(ConfigError::Value {
                key: "session.analysis_poll_ms",
                reason: "must be positive".to_owned(),
            });
        }
        if self.engine.path.is_empty() {
            return Err(ConfigError::Value {
                key: "engine.path",
                reason: "must not be empty".to_owned(),
            });
        }
        Ok(())
    }
}
