//! One engine process shared between directed searches and background analysis.
//!
//! The engine must never receive two searches at once. Every conversation
//! with it happens while holding the client mutex, and a directed search
//! additionally sets the [`PauseGate`] before queueing for that mutex. The
//! analysis loop checks the gate at every poll boundary: once the gate is set
//! it stops its own search, hands the engine over by releasing the mutex and
//! then waits until the gate clears again.
//!
//! Analysis results are stamped with the session generation and the FEN they
//! were computed for. Bumping the generation invalidates every snapshot taken
//! before, without restarting the engine. The engine itself only learns about
//! the new game at the start of its next search or analysis.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shakmaty::{Chess, Move, Position};
use tokio::sync::{mpsc, oneshot, watch, Mutex, Notify};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::engine_types::{
    AnalysisRequest, MoveResult, PvLine, SearchFailure, SearchLimits, SearchRequest,
    SearchSignal,
};
use crate::error::{EngineError, SessionError};
use crate::notation::full_fen;
use crate::EngineClient;

fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counting gate that holds background analysis back.
///
/// The gate is set while at least one [`PauseGuard`] is alive.
#[derive(Debug, Clone)]
pub struct PauseGate {
    holders: Arc<watch::Sender<usize>>,
}

/// Keeps the gate set until dropped.
#[derive(Debug)]
pub struct PauseGuard {
    holders: Arc<watch::Sender<usize>>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.holders.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        let (holders, _) = watch::channel(0);
        Self {
            holders: Arc::new(holders),
        }
    }

    pub fn set(&self) -> PauseGuard {
        self.holders.send_modify(|n| *n += 1);
        PauseGuard {
            holders: self.holders.clone(),
        }
    }

    pub fn is_set(&self) -> bool {
        *self.holders.borrow() > 0
    }

    /// Resolves once no guard is alive.
    pub async fn cleared(&self) {
        let mut rx = self.holders.subscribe();
        while *rx.borrow_and_update() > 0 {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Latest analysis output, stamped with what it was computed against.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AnalysisSnapshot {
    /// Principal variations ordered by their multipv index.
    pub lines: Vec<PvLine>,
    /// Depth of the first line.
    pub depth_reached: u32,
    pub fen: String,
    pub generation: u64,
}

impl AnalysisSnapshot {
    fn empty(fen: String, generation: u64) -> Self {
        Self {
            lines: Vec::new(),
            depth_reached: 0,
            fen,
            generation,
        }
    }

    /// Whether this snapshot describes `fen` in `generation`.
    pub fn is_current(&self, generation: u64, fen: &str) -> bool {
        self.generation == generation && self.fen == fen
    }

    fn insert(&mut self, line: PvLine) {
        match self.lines.iter_mut().find(|l| l.multipv == line.multipv) {
            Some(existing) => *existing = line,
            None => {
                self.lines.push(line);
                self.lines.sort_by_key(|l| l.multipv);
            }
        }
        self.depth_reached = self.lines.first().map_or(0, |l| l.depth);
    }
}

/// What [`EngineSession::run_analysis`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStart {
    /// A new analysis loop was spawned.
    Started,
    /// The running loop now follows the new position.
    Retargeted,
    /// The running loop already analyses this exact position.
    AlreadySatisfied,
}

#[derive(Debug, Clone)]
struct Target {
    position: Chess,
    fen: String,
    depth: Option<u32>,
    multipv: u32,
    generation: u64,
    epoch: u64,
}

#[derive(Debug)]
struct Outstanding {
    ticket: u64,
    signals: mpsc::UnboundedSender<SearchSignal>,
    pondering: bool,
    /// Told to stop; a new search may take its place.
    stopped: bool,
}

impl Outstanding {
    fn stop(&mut self) {
        let _ = self.signals.send(SearchSignal::Stop);
        self.stopped = true;
    }
}

struct Shared<C> {
    client: Mutex<C>,
    gate: PauseGate,
    wake: Notify,
    generation: AtomicU64,
    announced: AtomicU64,
    /// Id of the analysis loop allowed to run, 0 for none.
    analysis_task: AtomicU64,
    analysis_abort: StdMutex<Option<AbortHandle>>,
    target: StdMutex<Option<Target>>,
    snapshot: StdMutex<Option<AnalysisSnapshot>>,
    outstanding: StdMutex<Option<Outstanding>>,
    poll: Duration,
    pause_ack: Duration,
}

impl<C: EngineClient> Shared<C> {
    fn new(client: C, poll: Duration, pause_ack: Duration, generation: u64) -> Self {
        Self {
            client: Mutex::new(client),
            gate: PauseGate::new(),
            wake: Notify::new(),
            generation: AtomicU64::new(generation),
            announced: AtomicU64::new(generation),
            analysis_task: AtomicU64::new(0),
            analysis_abort: StdMutex::new(None),
            target: StdMutex::new(None),
            snapshot: StdMutex::new(None),
            outstanding: StdMutex::new(None),
            poll,
            pause_ack,
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn target(&self) -> Option<Target> {
        lock(&self.target).clone()
    }

    fn target_epoch(&self) -> Option<u64> {
        lock(&self.target).as_ref().map(|t| t.epoch)
    }

    /// The snapshot reached the depth limit of the exact current target.
    fn converged(&self) -> bool {
        let target = lock(&self.target);
        let snapshot = lock(&self.snapshot);
        match (target.as_ref(), snapshot.as_ref()) {
            (Some(t), Some(s)) => {
                s.is_current(t.generation, &t.fen)
                    && t.depth.map_or(false, |limit| s.depth_reached >= limit)
            }
            _ => false,
        }
    }

    fn record(&self, target: &Target, line: PvLine) {
        let mut slot = lock(&self.snapshot);
        let snapshot = slot.get_or_insert_with(|| {
            AnalysisSnapshot::empty(target.fen.clone(), target.generation)
        });
        if !snapshot.is_current(target.generation, &target.fen) {
            *snapshot = AnalysisSnapshot::empty(target.fen.clone(), target.generation);
        }
        snapshot.insert(line);
    }

    fn prepare_snapshot(&self, target: &Target) {
        let mut slot = lock(&self.snapshot);
        match slot.as_mut() {
            Some(s) if s.is_current(target.generation, &target.fen) => {
                s.lines.retain(|l| l.multipv <= target.multipv);
            }
            _ => *slot = Some(AnalysisSnapshot::empty(target.fen.clone(), target.generation)),
        }
    }

    /// Sends the pending new-game notice. Call with the client locked.
    async fn announce(&self, client: &mut C) -> Result<(), EngineError> {
        let current = self.generation();
        if self.announced.load(Ordering::SeqCst) != current {
            debug!(generation = current, "announcing new game to engine");
            client.new_game().await?;
            self.announced.store(current, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn idle_wait(&self) {
        tokio::select! {
            _ = self.wake.notified() => {}
            _ = sleep(self.poll * 2) => {}
        }
    }

    fn loop_active(&self, id: u64) -> bool {
        self.analysis_task.load(Ordering::SeqCst) == id
    }

    /// Kills the analysis loop wherever it is stuck, releasing the client.
    fn evict_analysis(&self) {
        self.analysis_task.store(0, Ordering::SeqCst);
        if let Some(handle) = lock(&self.analysis_abort).take() {
            handle.abort();
        }
        self.wake.notify_one();
    }

    /// Waits for the client, evicting an analysis that does not let go.
    ///
    /// An evicted analysis may have left the engine searching, so the engine
    /// is stopped explicitly before the client is handed out.
    async fn claim_client(&self, ticket: u64) -> Option<tokio::sync::MutexGuard<'_, C>> {
        if let Ok(client) = timeout(self.pause_ack, self.client.lock()).await {
            return Some(client);
        }
        warn!(ticket, "analysis did not yield the engine, evicting it");
        self.evict_analysis();
        let mut client = timeout(self.pause_ack, self.client.lock()).await.ok()?;
        match timeout(self.pause_ack, client.stop_analysis()).await {
            Ok(Ok(())) => Some(client),
            Ok(Err(e)) => {
                warn!(ticket, error = %e, "engine did not stop analysing");
                None
            }
            Err(_) => {
                warn!(ticket, "engine ignored stop");
                None
            }
        }
    }
}

fn analysable(position: &Chess) -> bool {
    !position.is_game_over() && full_fen(position) != full_fen(&Chess::default())
}

async fn analysis_loop<C: EngineClient>(shared: Arc<Shared<C>>, id: u64) {
    debug!(id, "analysis loop started");
    // epoch of a target the engine already finished by itself
    let mut settled = None;
    while shared.loop_active(id) {
        if shared.gate.is_set() {
            shared.gate.cleared().await;
            continue;
        }
        let target = match shared.target() {
            Some(t)
                if t.generation == shared.generation()
                    && settled != Some(t.epoch)
                    && analysable(&t.position)
                    && !shared.converged() =>
            {
                t
            }
            _ => {
                shared.idle_wait().await;
                continue;
            }
        };

        let mut client = shared.client.lock().await;
        // a directed search may have claimed the engine while we queued
        if shared.gate.is_set() || !shared.loop_active(id) {
            continue;
        }
        let started = match shared.announce(&mut client).await {
            Ok(()) => {
                shared.prepare_snapshot(&target);
                client
                    .start_analysis(&AnalysisRequest {
                        position: target.position.clone(),
                        depth: target.depth,
                        multipv: target.multipv,
                    })
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            warn!(error = %e, "cannot start analysis");
            drop(client);
            shared.idle_wait().await;
            continue;
        }
        debug!(fen = %target.fen, epoch = target.epoch, "analysing");

        let finished = loop {
            tokio::select! {
                biased;
                _ = shared.wake.notified() => {}
                info = client.next_info() => match info {
                    Ok(Some(line)) => shared.record(&target, line),
                    Ok(None) => break true,
                    Err(e) => {
                        warn!(error = %e, "analysis aborted");
                        break true;
                    }
                },
            }
            if !shared.loop_active(id)
                || shared.gate.is_set()
                || shared.generation() != target.generation
                || shared.target_epoch() != Some(target.epoch)
                || shared.converged()
            {
                break false;
            }
        };
        if finished {
            settled = Some(target.epoch);
        } else if let Err(e) = client.stop_analysis().await {
            warn!(error = %e, "engine did not stop analysing");
        }
    }
    debug!(id, "analysis loop exited");
}

async fn run_search<C: EngineClient>(
    shared: Arc<Shared<C>>,
    ticket: u64,
    generation: u64,
    request: SearchRequest,
    mut signals: mpsc::UnboundedReceiver<SearchSignal>,
    reply: oneshot::Sender<MoveResult>,
) {
    let pause = shared.gate.set();
    shared.wake.notify_one();

    let result = match shared.claim_client(ticket).await {
        None => {
            warn!(ticket, "engine not released for search");
            MoveResult::failed(ticket, generation, SearchFailure::PauseNotAcknowledged)
        }
        Some(mut client) => {
            let outcome = match shared.announce(&mut client).await {
                Ok(()) => client.search(&request, &mut signals).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(best) => MoveResult::from_best(ticket, generation, best),
                Err(e) => {
                    warn!(ticket, error = %e, "search failed");
                    MoveResult::failed(ticket, generation, SearchFailure::Engine(e.to_string()))
                }
            }
        }
    };

    {
        let mut slot = lock(&shared.outstanding);
        if slot.as_ref().map_or(false, |o| o.ticket == ticket) {
            *slot = None;
        }
    }
    drop(pause);
    shared.wake.notify_one();
    if reply.send(result).is_err() {
        debug!(ticket, "search result dropped");
    }
}

/// Receiving end of one directed search.
#[derive(Debug)]
pub struct PendingSearch {
    ticket: u64,
    generation: u64,
    result: oneshot::Receiver<MoveResult>,
}

impl PendingSearch {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Waits for the search to finish.
    pub async fn wait(self) -> MoveResult {
        let (ticket, generation) = (self.ticket, self.generation);
        self.result.await.unwrap_or_else(|_| {
            MoveResult::failed(
                ticket,
                generation,
                SearchFailure::Engine("search ended without an answer".to_owned()),
            )
        })
    }
}

struct PonderSearch {
    ticket: u64,
    fen: String,
    generation: u64,
    result: PendingSearch,
}

/// Serializes access to one engine.
pub struct EngineSession<C: EngineClient> {
    shared: Arc<Shared<C>>,
    name: String,
    analysis: Option<JoinHandle<()>>,
    last_task_id: u64,
    last_ticket: u64,
    ponder: Option<PonderSearch>,
}

impl<C: EngineClient> EngineSession<C> {
    pub fn new(client: C, config: &SessionConfig) -> Self {
        let name = client.name().to_owned();
        info!(engine = %name, "engine session created");
        Self {
            shared: Arc::new(Shared::new(
                client,
                config.analysis_poll(),
                config.pause_ack_timeout(),
                0,
            )),
            name,
            analysis: None,
            last_task_id: 0,
            last_ticket: 0,
            ponder: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation()
    }

    /// Invalidates all analysis and marks the next search as a new game.
    pub fn bump_generation(&self) -> u64 {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(generation, "session generation bumped");
        self.shared.wake.notify_one();
        generation
    }

    pub fn pause_gate(&self) -> &PauseGate {
        &self.shared.gate
    }

    /// A directed search may be issued: none is outstanding, or the
    /// outstanding one was already told to stop. Pondering does not count.
    pub fn idle(&self) -> bool {
        lock(&self.shared.outstanding)
            .as_ref()
            .map_or(true, |o| o.pondering || o.stopped)
    }

    pub fn pondering(&self) -> bool {
        self.ponder.is_some()
    }

    fn spawn_search(
        &mut self,
        request: SearchRequest,
        slot: &mut Option<Outstanding>,
    ) -> PendingSearch {
        self.last_ticket += 1;
        let ticket = self.last_ticket;
        let generation = self.generation();
        let (signals, signals_rx) = mpsc::unbounded_channel();
        let (reply, result) = oneshot::channel();
        *slot = Some(Outstanding {
            ticket,
            signals,
            pondering: request.ponder,
            stopped: false,
        });
        tokio::spawn(run_search(
            self.shared.clone(),
            ticket,
            generation,
            request,
            signals_rx,
            reply,
        ));
        PendingSearch {
            ticket,
            generation,
            result,
        }
    }

    /// Asks the engine for a move in `position`.
    ///
    /// Only one directed search may be outstanding; a second request fails
    /// with [`SessionError::SearchOutstanding`]. A search stopped through
    /// [`Self::force_move`] no longer counts: the new search queues behind
    /// it for the engine, and the stopped one still answers its own
    /// [`PendingSearch`]. When the engine is pondering on exactly this
    /// position the running search is taken over instead.
    pub fn request_move(
        &mut self,
        position: &Chess,
        limits: SearchLimits,
        root_moves: Option<Vec<Move>>,
    ) -> Result<PendingSearch, SessionError> {
        if !self.idle() {
            return Err(SessionError::SearchOutstanding);
        }
        let fen = full_fen(position);
        let generation = self.generation();

        if let Some(ponder) = self.ponder.take() {
            let mut slot = lock(&self.shared.outstanding);
            match slot.as_mut() {
                Some(o) if o.ticket == ponder.ticket => {
                    if ponder.fen == fen && ponder.generation == generation && root_moves.is_none() {
                        o.pondering = false;
                        let _ = o.signals.send(SearchSignal::PonderHit);
                        info!(ticket = ponder.ticket, "ponder hit");
                        return Ok(ponder.result);
                    }
                    o.stop();
                    info!(ticket = ponder.ticket, "ponder miss");
                }
                _ => debug!("ponder search already ended"),
            }
        }

        let request = SearchRequest {
            position: position.clone(),
            limits,
            root_moves,
            ponder: false,
        };
        let shared = self.shared.clone();
        let mut slot = lock(&shared.outstanding);
        let pending = self.spawn_search(request, &mut slot);
        debug!(ticket = pending.ticket, %fen, "directed search issued");
        Ok(pending)
    }

    /// Searches `position` ahead of time.
    ///
    /// `position` already contains the reply the engine expects; a later
    /// [`Self::request_move`] for the same position picks the search up.
    pub fn start_ponder(&mut self, position: &Chess, limits: SearchLimits) -> Result<(), SessionError> {
        if !self.idle() {
            return Err(SessionError::SearchOutstanding);
        }
        self.cancel_ponder();
        let request = SearchRequest {
            position: position.clone(),
            limits,
            root_moves: None,
            ponder: true,
        };
        let shared = self.shared.clone();
        let mut slot = lock(&shared.outstanding);
        let result = self.spawn_search(request, &mut slot);
        debug!(ticket = result.ticket, "pondering");
        self.ponder = Some(PonderSearch {
            ticket: result.ticket,
            fen: full_fen(position),
            generation: self.generation(),
            result,
        });
        Ok(())
    }

    /// Stops pondering. The engine's answer is discarded.
    pub fn cancel_ponder(&mut self) {
        if let Some(ponder) = self.ponder.take() {
            if let Some(o) = lock(&self.shared.outstanding).as_mut() {
                if o.ticket == ponder.ticket {
                    o.stop();
                }
            }
            debug!(ticket = ponder.ticket, "ponder cancelled");
        }
    }

    /// Makes the outstanding directed search answer now.
    ///
    /// The answer still arrives through its [`PendingSearch`]. Returns false
    /// when nothing was outstanding.
    pub fn force_move(&self) -> bool {
        match lock(&self.shared.outstanding).as_mut() {
            Some(o) if !o.pondering && !o.stopped => {
                o.stop();
                debug!(ticket = o.ticket, "forcing move");
                true
            }
            _ => false,
        }
    }

    /// Swaps in a freshly started engine.
    ///
    /// Whatever the old engine is still doing is abandoned and it is asked to
    /// quit in the background. The generation carries over, so results and
    /// snapshots keep comparing against the same game.
    pub fn relaunch(&mut self, client: C) {
        let name = client.name().to_owned();
        let (poll, pause_ack) = (self.shared.poll, self.shared.pause_ack);
        let fresh = Arc::new(Shared::new(client, poll, pause_ack, self.generation()));
        let old = std::mem::replace(&mut self.shared, fresh);
        old.evict_analysis();
        if let Some(o) = lock(&old.outstanding).as_mut() {
            o.stop();
        }
        self.analysis = None;
        self.ponder = None;
        info!(from = %self.name, to = %name, "engine relaunched");
        self.name = name;

        tokio::spawn(async move {
            match timeout(pause_ack, old.client.lock()).await {
                Ok(mut client) => {
                    if let Err(e) = client.quit().await {
                        debug!(error = %e, "old engine did not quit");
                    }
                }
                Err(_) => debug!("old engine still busy, dropping it"),
            }
        });
    }

    fn analysis_running(&self) -> bool {
        self.analysis.as_ref().map_or(false, |h| !h.is_finished())
            && self.shared.analysis_task.load(Ordering::SeqCst) == self.last_task_id
            && self.last_task_id != 0
    }

    /// Analyses `position` in the background until stopped.
    pub fn run_analysis(
        &mut self,
        position: &Chess,
        depth: Option<u32>,
        multipv: Option<u32>,
    ) -> AnalysisStart {
        let fen = full_fen(position);
        let generation = self.generation();
        let multipv = multipv.unwrap_or(1).max(1);
        let running = self.analysis_running();

        let start = {
            let mut target = lock(&self.shared.target);
            let epoch = target.as_ref().map_or(1, |t| t.epoch + 1);
            match target.as_mut() {
                Some(t) if running && t.fen == fen && t.generation == generation && t.multipv == multipv => {
                    t.depth = depth;
                    AnalysisStart::AlreadySatisfied
                }
                Some(t) if running => {
                    *t = Target {
                        position: position.clone(),
                        fen,
                        depth,
                        multipv,
                        generation,
                        epoch,
                    };
                    AnalysisStart::Retargeted
                }
                _ => {
                    *target = Some(Target {
                        position: position.clone(),
                        fen,
                        depth,
                        multipv,
                        generation,
                        epoch,
                    });
                    AnalysisStart::Started
                }
            }
        };

        if start == AnalysisStart::Started {
            self.last_task_id += 1;
            let id = self.last_task_id;
            self.shared.analysis_task.store(id, Ordering::SeqCst);
            let handle = tokio::spawn(analysis_loop(self.shared.clone(), id));
            *lock(&self.shared.analysis_abort) = Some(handle.abort_handle());
            self.analysis = Some(handle);
        }
        self.shared.wake.notify_one();
        debug!(?start, "analysis requested");
        start
    }

    /// Asks the analysis loop to stop at its next poll boundary.
    pub fn stop_analysis(&mut self) {
        if self.analysis.take().is_some() {
            debug!("stopping analysis");
        }
        self.shared.analysis_task.store(0, Ordering::SeqCst);
        *lock(&self.shared.target) = None;
        self.shared.wake.notify_one();
    }

    /// Latest snapshot, whatever it was computed for.
    pub fn read_snapshot(&self) -> Option<AnalysisSnapshot> {
        lock(&self.shared.snapshot).clone()
    }

    /// Latest snapshot if it belongs to `position` in the current generation.
    pub fn analysis_for(&self, position: &Chess) -> Option<AnalysisSnapshot> {
        let fen = full_fen(position);
        self.read_snapshot()
            .filter(|s| s.is_current(self.generation(), &fen))
    }

    /// The analysis of the current target reached its depth limit.
    pub fn limit_reached(&self) -> bool {
        self.shared.converged()
    }

    /// Stops everything and ends the engine process.
    pub async fn shutdown(mut self) -> Result<(), SessionError> {
        info!(engine = %self.name, "shutting down engine session");
        self.stop_analysis();
        self.cancel_ponder();
        self.force_move();

        let mut client = match timeout(self.shared.pause_ack, self.shared.client.lock()).await {
            Ok(client) => client,
            Err(_) => {
                warn!("engine busy at shutdown");
                return Err(SessionError::PauseNotAcknowledged);
            }
        };
        client.quit().await?;
        Ok(())
    }
}

impl<C: EngineClient> Drop for EngineSession<C> {
    fn drop(&mut self) {
        self.shared.analysis_task.store(0, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }
}
