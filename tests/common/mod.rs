//! Scripted engine used by the integration tests.

#![allow(dead_code)] // not every test file uses every helper

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use board_sync::engine_types::{
    AnalysisRequest, BestMove, PvLine, Score, SearchRequest, SearchSignal,
};
use board_sync::error::EngineError;
use board_sync::shakmaty::{uci::Uci, CastlingMode, Chess, Move, Position};
use board_sync::{EngineClient, EngineLauncher};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

pub const THINK: Duration = Duration::from_millis(200);
pub const INFO_INTERVAL: Duration = Duration::from_millis(20);

/// Counters shared between a [`SimEngine`] and the test that owns it.
#[derive(Debug, Default)]
pub struct Probe {
    pub searches: AtomicUsize,
    pub analyses: AtomicUsize,
    pub new_games: AtomicUsize,
    pub ponder_hits: AtomicUsize,
    pub stops: AtomicUsize,
    pub quits: AtomicUsize,
    pub launches: AtomicUsize,
    /// A search started while the engine was still analysing.
    pub overlaps: AtomicUsize,
}

impl Probe {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

struct Analysis {
    position: Chess,
    limit: Option<u32>,
    multipv: u32,
    depth: u32,
    next_line: u32,
}

/// Plays the first legal move from a preference list, else the first legal move.
pub struct SimEngine {
    probe: Arc<Probe>,
    preferences: Vec<String>,
    think: Duration,
    stop_delay: Duration,
    start_delay: Duration,
    broken: bool,
    analysis: Option<Analysis>,
}

impl SimEngine {
    pub fn new(preferences: &[&str]) -> (Self, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        (Self::with_probe(preferences, probe.clone()), probe)
    }

    pub fn with_probe(preferences: &[&str], probe: Arc<Probe>) -> Self {
        Self {
            probe,
            preferences: preferences.iter().map(|s| s.to_string()).collect(),
            think: THINK,
            stop_delay: Duration::ZERO,
            start_delay: Duration::ZERO,
            broken: false,
            analysis: None,
        }
    }

    pub fn with_think(mut self, think: Duration) -> Self {
        self.think = think;
        self
    }

    /// Makes stopping an analysis take this long.
    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    /// Makes starting an analysis hang this long after the engine took it.
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Every search fails as if the process had died.
    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    fn choose(&self, position: &Chess, allowed: Option<&[Move]>) -> Option<Move> {
        let legal: Vec<Move> = match allowed {
            Some(moves) => moves.to_vec(),
            None => position.legal_moves().into_iter().collect(),
        };
        self.preferences
            .iter()
            .filter_map(|uci| Uci::from_str(uci).ok()?.to_move(position).ok())
            .find(|mv| legal.contains(mv))
            .or_else(|| legal.first().cloned())
    }
}

pub fn uci(mv: &Move) -> String {
    mv.to_uci(CastlingMode::Standard).to_string()
}

#[async_trait]
impl EngineClient for SimEngine {
    fn name(&self) -> &str {
        "sim"
    }

    async fn new_game(&mut self) -> Result<(), EngineError> {
        self.probe.new_games.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn search(
        &mut self,
        request: &SearchRequest,
        signals: &mut mpsc::UnboundedReceiver<SearchSignal>,
    ) -> Result<BestMove, EngineError> {
        if self.analysis.is_some() {
            self.probe.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.probe.searches.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(EngineError::Exited);
        }

        let mut pondering = request.ponder;
        let deadline = sleep(self.think);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline, if !pondering => break,
                signal = signals.recv() => match signal {
                    Some(SearchSignal::PonderHit) => {
                        self.probe.ponder_hits.fetch_add(1, Ordering::SeqCst);
                        pondering = false;
                        deadline.as_mut().reset(Instant::now() + self.think);
                    }
                    Some(SearchSignal::Stop) | None => {
                        self.probe.stops.fetch_add(1, Ordering::SeqCst);
                        break;
                    }
                },
            }
        }

        let best = self.choose(&request.position, request.root_moves.as_deref());
        let ponder = best.as_ref().and_then(|mv| {
            let mut next = request.position.clone();
            next.play_unchecked(mv);
            self.choose(&next, None)
        });
        Ok(BestMove {
            best,
            ponder,
            info: None,
        })
    }

    async fn start_analysis(&mut self, request: &AnalysisRequest) -> Result<(), EngineError> {
        self.probe.analyses.fetch_add(1, Ordering::SeqCst);
        self.analysis = Some(Analysis {
            position: request.position.clone(),
            limit: request.depth,
            multipv: request.multipv.max(1),
            depth: 0,
            next_line: 1,
        });
        sleep(self.start_delay).await;
        Ok(())
    }

    async fn next_info(&mut self) -> Result<Option<PvLine>, EngineError> {
        if self.analysis.is_none() {
            return Ok(None);
        }
        sleep(INFO_INTERVAL).await;
        let Some(analysis) = self.analysis.as_mut() else {
            return Ok(None);
        };
        let multipv = analysis.next_line;
        if multipv == 1 {
            analysis.depth += 1;
        }
        if analysis.limit.map_or(false, |limit| analysis.depth > limit) {
            self.analysis = None;
            return Ok(None);
        }
        analysis.next_line = multipv % analysis.multipv + 1;
        let pv = analysis
            .position
            .legal_moves()
            .iter()
            .nth(multipv as usize - 1)
            .map(|mv| mv.to_uci(CastlingMode::Standard))
            .into_iter()
            .collect();
        Ok(Some(PvLine {
            multipv,
            depth: analysis.depth,
            score: Some(Score::Centipawns(analysis.depth as i32)),
            nodes: Some(u64::from(analysis.depth) * 1000),
            pv,
        }))
    }

    async fn stop_analysis(&mut self) -> Result<(), EngineError> {
        sleep(self.stop_delay).await;
        self.analysis = None;
        Ok(())
    }

    async fn quit(&mut self) -> Result<(), EngineError> {
        self.probe.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out fresh [`SimEngine`]s sharing one [`Probe`].
pub struct SimLauncher {
    preferences: Vec<String>,
    probe: Arc<Probe>,
    broken_engines: bool,
    fails: bool,
}

impl SimLauncher {
    pub fn new(preferences: &[&str], probe: Arc<Probe>) -> Self {
        Self {
            preferences: preferences.iter().map(|s| s.to_string()).collect(),
            probe,
            broken_engines: false,
            fails: false,
        }
    }

    /// Launched engines fail every search.
    pub fn broken_engines(mut self) -> Self {
        self.broken_engines = true;
        self
    }

    /// No engine can be started at all.
    pub fn failing(mut self) -> Self {
        self.fails = true;
        self
    }
}

#[async_trait]
impl EngineLauncher for SimLauncher {
    type Client = SimEngine;

    async fn launch(&self) -> Result<SimEngine, EngineError> {
        self.probe.launches.fetch_add(1, Ordering::SeqCst);
        if self.fails {
            return Err(EngineError::Exited);
        }
        let preferences: Vec<&str> = self.preferences.iter().map(String::as_str).collect();
        let engine = SimEngine::with_probe(&preferences, self.probe.clone());
        Ok(if self.broken_engines {
            engine.broken()
        } else {
            engine
        })
    }
}

/// Plays `moves` from the standard start position.
pub fn position_after(moves: &[&str]) -> Chess {
    let mut pos = Chess::default();
    for m in moves {
        let mv = Uci::from_str(m)
            .expect("valid uci")
            .to_move(&pos)
            .expect("legal move");
        pos.play_unchecked(&mv);
    }
    pos
}

/// Placement notation after `moves`.
pub fn placement_after(moves: &[&str]) -> String {
    board_sync::notation::board_notation(&position_after(moves))
}

/// Placement notation after playing `moves` from `fen`.
pub fn placement_from(fen: &str, moves: &[&str]) -> String {
    let mut pos = board_sync::notation::parse_fen(fen, CastlingMode::Standard).expect("valid fen");
    for m in moves {
        let mv = Uci::from_str(m)
            .expect("valid uci")
            .to_move(&pos)
            .expect("legal move");
        pos.play_unchecked(&mv);
    }
    board_sync::notation::board_notation(&pos)
}
