pub mod alternatives;
pub mod chess_serde;
pub mod clock;
pub mod config;
pub mod controller;
pub mod engine_types;
pub mod error;
pub mod game;
pub mod mode;
pub mod notation;
pub mod reconcile;
#[cfg(feature = "server")]
pub mod server;
pub mod server_types;
pub mod session;
pub mod uci;

use async_trait::async_trait;
use engine_types::{AnalysisRequest, BestMove, PvLine, SearchRequest, SearchSignal};
use error::EngineError;
use tokio::sync::mpsc;

pub use shakmaty;

/// The trait that defines a connection to a chess engine process.
///
/// A client carries out exactly one engine conversation at a time. It does not
/// protect itself against being asked to search and analyse at once; that is
/// the job of [`session::EngineSession`], which owns the client and serializes
/// every call to it.
///
/// A directed search goes like this:
///
/// 1. [`EngineClient::search`] is called with the position and limits.
/// 2. The client starts the search and keeps reading the engine's output.
/// 3. Signals arriving on the `signals` channel are forwarded to the engine.
/// 4. The call returns with the engine's final answer.
///
/// Continuous analysis instead goes through [`EngineClient::start_analysis`],
/// then any number of [`EngineClient::next_info`] calls, and finally
/// [`EngineClient::stop_analysis`] unless the engine finished on its own.
///
/// ## Cancellation
/// The session races [`EngineClient::next_info`] against its own wake-ups, so
/// that future may be dropped at any await point. Implementations must not
/// lose output when that happens.
#[async_trait]
pub trait EngineClient: Send + 'static {
    /// Name the engine reported during the handshake.
    fn name(&self) -> &str;

    /// Tells the engine that the next position belongs to a different game.
    async fn new_game(&mut self) -> Result<(), EngineError>;

    /// Runs one directed search to completion.
    ///
    /// Must return after a [`SearchSignal::Stop`] arrives, with the best move
    /// found so far. A search started with `ponder` set keeps running until it
    /// receives [`SearchSignal::PonderHit`] or [`SearchSignal::Stop`].
    async fn search(
        &mut self,
        request: &SearchRequest,
        signals: &mut mpsc::UnboundedReceiver<SearchSignal>,
    ) -> Result<BestMove, EngineError>;

    /// Starts continuous analysis of a position.
    async fn start_analysis(&mut self, request: &AnalysisRequest) -> Result<(), EngineError>;

    /// Waits for the next principal variation.
    ///
    /// Returns `None` once the engine has finished the analysis by itself,
    /// for example because a depth limit was reached.
    async fn next_info(&mut self) -> Result<Option<PvLine>, EngineError>;

    /// Stops the running analysis and waits until the engine is quiet again.
    async fn stop_analysis(&mut self) -> Result<(), EngineError>;

    /// Ends the engine process.
    async fn quit(&mut self) -> Result<(), EngineError>;
}

/// Starts engine processes.
///
/// Used once at startup and again whenever the running engine stops
/// answering, so an implementation should fall back to an engine it knows
/// to work when the preferred one fails to start.
#[async_trait]
pub trait EngineLauncher: Send + Sync + 'static {
    type Client: EngineClient;

    async fn launch(&self) -> Result<Self::Client, EngineError>;
}
