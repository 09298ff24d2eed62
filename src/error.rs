use thiserror::Error;

/// Failures talking to an engine process.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start engine {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine did not answer `{0}` in time")]
    Timeout(String),

    #[error("engine exited")]
    Exited,

    #[error("engine protocol error: {0}")]
    Protocol(String),

    #[error("engine sent illegal move {uci} in {fen}")]
    IllegalMove { uci: String, fen: String },
}

/// Failures of the engine session itself.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a directed search is already outstanding")]
    SearchOutstanding,

    #[error("analysis loop did not acknowledge the pause in time")]
    PauseNotAcknowledged,

    #[error("session closed")]
    Closed,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Failures reconciling the tracked game with the board or the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("illegal move {uci} in {fen}")]
    IllegalMove { uci: String, fen: String },

    #[error("invalid position {fen}: {reason}")]
    InvalidFen { fen: String, reason: String },

    #[error("impossible board placement {0}")]
    InvalidPlacement(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {key}: {reason}")]
    Value { key: &'static str, reason: String },
}
