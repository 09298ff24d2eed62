//! The single owner task that turns board and engine events into game state.
//!
//! Everything that mutates the tracked game goes through [`Controller::run`],
//! which handles one [`Event`] at a time in arrival order. Engine answers come
//! back through the same queue, so a sensed placement can never overtake the
//! search result it is supposed to confirm.

use serde::{Deserialize, Serialize};
use shakmaty::{uci::Uci, Chess, Move, Position};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::alternatives::OpeningBook;
use crate::clock::Clock;
use crate::config::{BoardConfig, Config};
use crate::engine_types::{MoveResult, SearchFailure};
use crate::error::SessionError;
use crate::game::{GameRecord, GameResult, StartPosition};
use crate::mode::{InteractionMode, ModeState, PlaySide};
use crate::notation::{full_fen, MismatchReport};
use crate::reconcile::{MismatchDelay, Outcome, Reconciler};
use crate::server_types::BoardStatus;
use crate::session::{AnalysisSnapshot, EngineSession};
use crate::{EngineClient, EngineLauncher};

/// Input to the controller.
#[derive(Debug, Clone)]
pub enum Event {
    /// Piece placement read from the board.
    Sensed(String),
    SearchDone(MoveResult),
    MismatchTimer(u64),
    SetMode(InteractionMode),
    NewGame(StartPosition),
    /// Sets up an arbitrary position given as FEN.
    SetPosition(String),
    /// Opponent move in UCI notation from a remote source.
    RemoteMove(String),
    /// Rejects the engine move on display and asks for a different one.
    AlternativeMove,
    SwitchSides,
    /// Forces the engine to move now, or toggles the clock.
    PauseResume,
    TakeBack,
    Declare(GameResult),
    Shutdown,
}

/// Who made a move that was applied to the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mover {
    Player,
    Engine,
    /// The player executed a different move for the engine.
    PlayerForEngine,
    Remote,
}

/// Output of the controller. Nothing is expected back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    MoveApplied {
        #[serde(with = "crate::chess_serde::uci_serde")]
        mv: Uci,
        mover: Mover,
        fen: String,
    },
    MoveUndone {
        /// Most recent first.
        #[serde(with = "crate::chess_serde::uci_list_serde")]
        undone: Vec<Uci>,
        #[serde(with = "crate::chess_serde::option_uci_serde")]
        replacement: Option<Uci>,
        fen: String,
    },
    GameEnded {
        result: GameResult,
    },
    EngineMovePending {
        #[serde(with = "crate::chess_serde::uci_serde")]
        mv: Uci,
        #[serde(with = "crate::chess_serde::option_uci_serde")]
        ponder: Option<Uci>,
        fen: String,
    },
    PositionMismatch {
        report: MismatchReport,
    },
    MismatchCleared,
    ModeChanged {
        mode: InteractionMode,
    },
    PlaySideChanged {
        side: PlaySide,
    },
    NewGame {
        fen: String,
    },
    AnalysisUpdate {
        snapshot: AnalysisSnapshot,
    },
    /// The engine stopped answering and was replaced by a fresh process.
    EngineRestarted {
        engine: String,
    },
    EngineFailure {
        reason: String,
    },
    /// A request could not be carried out in the current state.
    Rejected {
        reason: String,
    },
}

/// Cloneable access to a running [`Controller`].
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<Event>,
    status: watch::Receiver<BoardStatus>,
}

impl ControllerHandle {
    pub fn send(&self, event: Event) -> Result<(), SessionError> {
        self.events.send(event).map_err(|_| SessionError::Closed)
    }

    pub fn sensed(&self, placement: impl Into<String>) -> Result<(), SessionError> {
        self.send(Event::Sensed(placement.into()))
    }

    pub fn status(&self) -> BoardStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<BoardStatus> {
        self.status.clone()
    }
}

pub struct Controller<C: EngineClient, K: Clock> {
    reconciler: Reconciler,
    modes: ModeState,
    session: EngineSession<C>,
    clock: K,
    book: Option<Box<dyn OpeningBook>>,
    launcher: Option<Box<dyn EngineLauncher<Client = C>>>,
    max_relaunches: u32,
    /// Relaunches since the engine last produced a move.
    relaunches: u32,
    relaunch_due: bool,
    board: BoardConfig,
    analysis_depth: Option<u32>,
    multipv: u32,
    poll: std::time::Duration,
    events: mpsc::UnboundedReceiver<Event>,
    self_tx: mpsc::UnboundedSender<Event>,
    notifications: mpsc::UnboundedSender<Notification>,
    status: watch::Sender<BoardStatus>,
    search_ticket: Option<u64>,
    timer: Option<(u64, JoinHandle<()>)>,
    timer_seq: u64,
    game_over: Option<GameResult>,
    last_analysis: Option<AnalysisSnapshot>,
}

impl<C: EngineClient, K: Clock> Controller<C, K> {
    pub fn new(
        config: &Config,
        session: EngineSession<C>,
        clock: K,
        notifications: mpsc::UnboundedSender<Notification>,
    ) -> (Self, ControllerHandle) {
        let (self_tx, events) = mpsc::unbounded_channel();
        let modes = ModeState::new(
            config.board.mode,
            config.board.premove,
            config.board.alternative_moves,
        );
        let reconciler = Reconciler::default();
        let status = BoardStatus::describe(&reconciler, &modes, &session, None);
        let (status, status_rx) = watch::channel(status);
        let handle = ControllerHandle {
            events: self_tx.clone(),
            status: status_rx,
        };
        let controller = Self {
            reconciler,
            modes,
            session,
            clock,
            book: None,
            launcher: None,
            max_relaunches: config.engine.max_relaunches,
            relaunches: 0,
            relaunch_due: false,
            board: config.board.clone(),
            analysis_depth: config.session.analysis_depth,
            multipv: config.session.multipv,
            poll: config.session.analysis_poll(),
            events,
            self_tx,
            notifications,
            status,
            search_ticket: None,
            timer: None,
            timer_seq: 0,
            game_over: None,
            last_analysis: None,
        };
        (controller, handle)
    }

    pub fn with_book(mut self, book: Box<dyn OpeningBook>) -> Self {
        self.book = Some(book);
        self
    }

    /// Lets the controller replace an engine that stopped answering.
    pub fn with_launcher(mut self, launcher: Box<dyn EngineLauncher<Client = C>>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Processes events until [`Event::Shutdown`] arrives, then shuts the engine down.
    pub async fn run(mut self) -> Result<(), SessionError> {
        info!(mode = %self.modes.mode, engine = %self.session.name(), "controller started");
        let mut ticker = interval(self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.enter_wait_state();
        self.publish_status();

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        None | Some(Event::Shutdown) => break,
                        Some(event) => self.handle(event),
                    }
                    if std::mem::take(&mut self.relaunch_due) {
                        self.relaunch_engine().await;
                    }
                    self.publish_status();
                }
                _ = ticker.tick() => self.forward_analysis(),
            }
        }

        info!("controller shutting down");
        self.cancel_timer();
        self.clock.stop();
        self.drain_search();
        self.reconciler.discard_pending();
        self.session.shutdown().await
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Sensed(placement) => self.on_sensed(&placement),
            Event::SearchDone(result) => self.on_search_done(result),
            Event::MismatchTimer(token) => self.on_mismatch_timer(token),
            Event::SetMode(mode) => self.set_mode(mode),
            Event::NewGame(start) => self.new_game(start),
            Event::SetPosition(fen) => self.set_position(&fen),
            Event::RemoteMove(uci) => self.remote_move(&uci),
            Event::AlternativeMove => self.alternative_move(),
            Event::SwitchSides => self.switch_sides(),
            Event::PauseResume => self.pause_resume(),
            Event::TakeBack => self.take_back(),
            Event::Declare(result) => self.end_game(result),
            Event::Shutdown => {}
        }
    }

    fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            debug!("notification sink closed");
        }
    }

    fn publish_status(&self) {
        self.status.send_replace(BoardStatus::describe(
            &self.reconciler,
            &self.modes,
            &self.session,
            self.game_over,
        ));
    }

    fn uci(&self, mv: &Move) -> Uci {
        self.reconciler.game().uci(mv)
    }

    fn fen(&self) -> String {
        self.reconciler.game().fen()
    }

    fn opponent_mover(&self) -> Mover {
        if self.modes.mode == InteractionMode::Remote {
            Mover::Remote
        } else {
            Mover::Engine
        }
    }

    fn on_sensed(&mut self, placement: &str) {
        self.cancel_timer();
        let was_flagged = self.reconciler.mismatch_flagged();
        let policy = self.modes.policy();
        let outcome = self.reconciler.reconcile(placement, &policy);
        if was_flagged && outcome.is_resolved() {
            self.notify(Notification::MismatchCleared);
        }
        if !matches!(outcome, Outcome::Unchanged | Outcome::Unresolved { .. }) {
            self.game_over = None;
        }

        match outcome {
            Outcome::Unchanged => {}
            Outcome::StandardMove { mv } => self.after_player_move(&mv, false),
            Outcome::SlidingUndo {
                undone,
                replacement,
                discarded,
            } => {
                if discarded.is_some() {
                    debug!("engine move dropped by corrected player move");
                }
                self.drain_search();
                self.session.cancel_ponder();
                self.notify(Notification::MoveUndone {
                    undone: vec![self.uci(&undone)],
                    replacement: Some(self.uci(&replacement)),
                    fen: self.fen(),
                });
                self.after_player_move(&replacement, true);
            }
            Outcome::Premove { engine_move, reply } => {
                let ply = self.reconciler.game().ply_count();
                let fen = self
                    .reconciler
                    .game()
                    .positions()
                    .get(ply.saturating_sub(1))
                    .map(full_fen)
                    .unwrap_or_default();
                let mover = self.opponent_mover();
                if self.modes.mode.runs_clock() {
                    self.clock.add_increment(self.modes.side.opponent());
                }
                self.notify(Notification::MoveApplied {
                    mv: self.uci(&engine_move),
                    mover,
                    fen,
                });
                self.after_player_move(&reply, false);
            }
            Outcome::EngineMoveConfirmed { engine_move } => {
                let mover = self.opponent_mover();
                self.after_opponent_move(&engine_move.mv, engine_move.ponder, mover);
            }
            Outcome::EngineMoveOverridden { mv, discarded } => {
                if discarded.is_none() {
                    // the engine was still thinking
                    self.drain_search();
                }
                self.after_opponent_move(&mv, None, Mover::PlayerForEngine);
            }
            Outcome::DeepTakeback { undone } => {
                self.clock.stop();
                self.drain_search();
                self.session.cancel_ponder();
                self.session.bump_generation();
                let undone = undone.iter().map(|mv| self.uci(mv)).collect();
                self.notify(Notification::MoveUndone {
                    undone,
                    replacement: None,
                    fen: self.fen(),
                });
                self.enter_wait_state();
            }
            Outcome::NewGameRequested => self.new_game(StartPosition::Standard),
            Outcome::Unresolved { delay } => self.arm_timer(delay),
        }
    }

    /// Bookkeeping after the player moved their own side.
    fn after_player_move(&mut self, mv: &Move, corrected: bool) {
        let mover_color = !self.reconciler.game().turn();
        self.clock.stop();
        if !corrected && self.modes.mode.runs_clock() {
            self.clock.add_increment(mover_color);
        }
        self.notify(Notification::MoveApplied {
            mv: self.uci(mv),
            mover: Mover::Player,
            fen: self.fen(),
        });
        if self.check_game_end() {
            return;
        }
        let turn = self.reconciler.game().turn();
        if self.modes.engine_moves(turn) {
            if self.reconciler.pending().is_none() && self.search_ticket.is_none() {
                self.think(false);
            }
        } else {
            if self.modes.mode.runs_clock() {
                self.clock.start(turn);
            }
            self.refresh_analysis();
        }
    }

    /// Bookkeeping after a move for the opponent side reached the board.
    fn after_opponent_move(&mut self, mv: &Move, ponder: Option<Move>, mover: Mover) {
        let mover_color = !self.reconciler.game().turn();
        self.clock.stop();
        if self.modes.mode.runs_clock() {
            self.clock.add_increment(mover_color);
        }
        self.notify(Notification::MoveApplied {
            mv: self.uci(mv),
            mover,
            fen: self.fen(),
        });
        if self.check_game_end() {
            return;
        }
        let turn = self.reconciler.game().turn();
        if self.modes.mode.runs_clock() {
            self.clock.start(turn);
        }
        if self.modes.mode.ponders() {
            if let Some(ponder) = ponder {
                let mut expected = self.reconciler.position().clone();
                if expected.is_legal(&ponder) {
                    expected.play_unchecked(&ponder);
                    let limits = self.clock.limits(!turn);
                    if let Err(e) = self.session.start_ponder(&expected, limits) {
                        debug!(error = %e, "not pondering");
                    }
                }
            }
        }
        self.refresh_analysis();
    }

    fn check_game_end(&mut self) -> bool {
        match self.reconciler.game().game_end() {
            Some(result) => {
                self.end_game(result);
                true
            }
            None => false,
        }
    }

    fn end_game(&mut self, result: GameResult) {
        info!(?result, "game over");
        self.clock.stop();
        self.drain_search();
        self.session.cancel_ponder();
        self.session.stop_analysis();
        self.reconciler.discard_pending();
        self.game_over = Some(result);
        self.notify(Notification::GameEnded { result });
    }

    /// Starts a directed search for the side to move.
    fn think(&mut self, restricted: bool) {
        let position = self.reconciler.position().clone();
        let turn = position.turn();
        self.session.stop_analysis();
        if self.modes.mode.runs_clock() {
            self.clock.start(turn);
        }

        if let Some(book) = self.book.as_deref() {
            if let Some(choice) = self.reconciler.alternatives_mut().book(book, &position) {
                info!(mv = %self.uci(&choice.mv), "book move");
                self.accept_engine_move(choice.mv, choice.ponder);
                return;
            }
        }

        let root_moves = restricted.then(|| self.reconciler.alternatives().all(&position));
        match self
            .session
            .request_move(&position, self.clock.limits(turn), root_moves)
        {
            Ok(pending) => {
                self.search_ticket = Some(pending.ticket());
                let tx = self.self_tx.clone();
                tokio::spawn(async move {
                    let result = pending.wait().await;
                    let _ = tx.send(Event::SearchDone(result));
                });
            }
            Err(e) => {
                warn!(error = %e, "cannot start search");
                self.notify(Notification::EngineFailure {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn on_search_done(&mut self, result: MoveResult) {
        if self.search_ticket != Some(result.ticket) {
            debug!(ticket = result.ticket, "ignoring result of a drained search");
            return;
        }
        self.search_ticket = None;
        if result.generation != self.session.generation() {
            debug!(ticket = result.ticket, "ignoring result from an earlier game");
            return;
        }
        match (result.best, result.failure) {
            (Some(mv), _) => {
                self.relaunches = 0;
                self.accept_engine_move(mv, result.ponder);
            }
            (None, failure) => {
                let engine_fault = matches!(
                    failure,
                    Some(SearchFailure::PauseNotAcknowledged | SearchFailure::Engine(_))
                );
                if engine_fault && self.launcher.is_some() && self.relaunches < self.max_relaunches {
                    warn!(?failure, "engine stopped answering, relaunching");
                    self.relaunch_due = true;
                    return;
                }
                let reason = match failure {
                    Some(SearchFailure::PauseNotAcknowledged) => {
                        "engine was not released by the analysis".to_owned()
                    }
                    Some(SearchFailure::Engine(reason)) => reason,
                    Some(SearchFailure::NoMove) | None => "engine has no move".to_owned(),
                };
                warn!(%reason, "search produced no move");
                self.notify(Notification::EngineFailure { reason });
            }
        }
    }

    /// Replaces the engine and picks up where the failed one left off.
    async fn relaunch_engine(&mut self) {
        self.relaunches += 1;
        let Some(launcher) = self.launcher.as_deref() else {
            return;
        };
        let launched = launcher.launch().await;
        match launched {
            Ok(client) => {
                self.session.relaunch(client);
                self.last_analysis = None;
                self.notify(Notification::EngineRestarted {
                    engine: self.session.name().to_owned(),
                });
                self.resume_engine();
            }
            Err(e) => {
                error!(error = %e, "no engine could be started");
                self.notify(Notification::EngineFailure {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn resume_engine(&mut self) {
        if self.game_over.is_some() {
            return;
        }
        let turn = self.reconciler.game().turn();
        if self.modes.engine_moves(turn)
            && self.reconciler.pending().is_none()
            && self.search_ticket.is_none()
        {
            let restricted = !self.reconciler.alternatives().is_empty();
            self.think(restricted);
        } else {
            self.refresh_analysis();
        }
    }

    /// Shows an engine move that the player still has to execute.
    fn accept_engine_move(&mut self, mv: Move, ponder: Option<Move>) {
        self.clock.stop();
        let fen = self.fen();
        if let Err(e) = self.reconciler.set_pending(mv, ponder) {
            warn!(error = %e, "engine move rejected");
            self.notify(Notification::EngineFailure {
                reason: e.to_string(),
            });
            return;
        }
        if let Some(pending) = self.reconciler.pending() {
            let notification = Notification::EngineMovePending {
                mv: self.uci(&pending.mv),
                ponder: pending.ponder.as_ref().map(|p| self.uci(p)),
                fen,
            };
            self.notify(notification);
        }
    }

    fn arm_timer(&mut self, delay: MismatchDelay) {
        self.cancel_timer();
        let duration = match delay {
            MismatchDelay::First => self.board.mismatch_delay(),
            MismatchDelay::Repeat => self.board.repeat_mismatch_delay(),
        };
        self.timer_seq += 1;
        let token = self.timer_seq;
        let tx = self.self_tx.clone();
        let handle = tokio::spawn(async move {
            sleep(duration).await;
            let _ = tx.send(Event::MismatchTimer(token));
        });
        self.timer = Some((token, handle));
    }

    fn cancel_timer(&mut self) {
        if let Some((_, handle)) = self.timer.take() {
            handle.abort();
        }
    }

    fn on_mismatch_timer(&mut self, token: u64) {
        match &self.timer {
            Some((current, _)) if *current == token => self.timer = None,
            _ => return,
        }

        if self.modes.mode == InteractionMode::Ponder {
            if let Some(sensed) = self.reconciler.held_placement().map(str::to_owned) {
                let was_flagged = self.reconciler.mismatch_flagged();
                match self.reconciler.resync(&sensed) {
                    Ok(()) => {
                        self.session.bump_generation();
                        self.game_over = None;
                        if was_flagged {
                            self.notify(Notification::MismatchCleared);
                        }
                        self.notify(Notification::NewGame { fen: self.fen() });
                        self.refresh_analysis();
                        return;
                    }
                    Err(e) => debug!(error = %e, "placement cannot be set up"),
                }
            }
        }

        if let Some(report) = self.reconciler.expire_mismatch() {
            self.notify(Notification::PositionMismatch { report });
        }
    }

    fn set_mode(&mut self, to: InteractionMode) {
        let from = self.modes.mode;
        if self.modes.switch(to) {
            self.drain_search();
        }
        self.session.cancel_ponder();
        self.clock.stop();
        let keep_pending = from.engine_plays() && to.engine_plays();
        if !keep_pending && self.reconciler.discard_pending().is_some() {
            debug!("pending move dropped by mode change");
        }
        info!(%from, %to, "mode changed");
        self.notify(Notification::ModeChanged { mode: to });
        self.enter_wait_state();
    }

    /// Settles into waiting for the board after the game or mode changed under us.
    fn enter_wait_state(&mut self) {
        if self.game_over.is_some() {
            self.session.stop_analysis();
            return;
        }
        let turn = self.reconciler.game().turn();
        if self.modes.engine_moves(turn)
            && self.reconciler.pending().is_none()
            && self.search_ticket.is_none()
        {
            // the player keeps the side that is to move
            self.modes.side = PlaySide::for_user(turn);
            self.notify(Notification::PlaySideChanged {
                side: self.modes.side,
            });
        }
        if self.modes.mode.runs_clock()
            && !self.modes.engine_moves(turn)
            && self.reconciler.game().ply_count() > 0
        {
            self.clock.start(turn);
        }
        self.refresh_analysis();
    }

    fn refresh_analysis(&mut self) {
        if self.modes.mode.watches() && self.game_over.is_none() {
            let position = self.reconciler.position().clone();
            self.session
                .run_analysis(&position, self.analysis_depth, Some(self.multipv));
        } else {
            self.session.stop_analysis();
        }
    }

    fn forward_analysis(&mut self) {
        if !self.modes.mode.watches() {
            return;
        }
        let Some(snapshot) = self.session.analysis_for(self.reconciler.position()) else {
            return;
        };
        if snapshot.lines.is_empty() || self.last_analysis.as_ref() == Some(&snapshot) {
            return;
        }
        self.last_analysis = Some(snapshot.clone());
        self.notify(Notification::AnalysisUpdate { snapshot });
        self.publish_status();
    }

    /// Forces the outstanding search to answer. Its result is ignored.
    fn drain_search(&mut self) {
        if let Some(ticket) = self.search_ticket.take() {
            self.session.force_move();
            debug!(ticket, "search drained");
        }
    }

    fn replace_game(&mut self, game: GameRecord, lock_takeback: bool) {
        self.cancel_timer();
        self.drain_search();
        self.session.cancel_ponder();
        self.clock.stop();
        if self.game_over.is_none() && self.reconciler.game().ply_count() > 0 {
            self.notify(Notification::GameEnded {
                result: GameResult::Abort,
            });
        }
        self.reconciler.reset(game, lock_takeback);
        self.session.bump_generation();
        self.game_over = None;
        self.last_analysis = None;
        self.notify(Notification::NewGame { fen: self.fen() });
    }

    fn new_game(&mut self, start: StartPosition) {
        let game = match GameRecord::from_start(start) {
            Ok(game) => game,
            Err(e) => {
                self.notify(Notification::Rejected {
                    reason: e.to_string(),
                });
                return;
            }
        };
        info!(?start, "new game");
        self.replace_game(game, false);
        if self.modes.side != PlaySide::UserWhite {
            self.modes.side = PlaySide::UserWhite;
            self.notify(Notification::PlaySideChanged {
                side: self.modes.side,
            });
        }
        self.enter_wait_state();
    }

    fn set_position(&mut self, fen: &str) {
        let castling = if self.board.chess960 {
            shakmaty::CastlingMode::Chess960
        } else {
            shakmaty::CastlingMode::Standard
        };
        match GameRecord::from_fen(fen, castling) {
            Ok(game) => {
                info!(%fen, "position set up");
                self.replace_game(game, true);
                self.enter_wait_state();
            }
            Err(e) => self.notify(Notification::Rejected {
                reason: e.to_string(),
            }),
        }
    }

    fn remote_move(&mut self, uci: &str) {
        let turn = self.reconciler.game().turn();
        if self.modes.mode != InteractionMode::Remote || self.modes.side.user() == turn {
            self.notify(Notification::Rejected {
                reason: format!("remote move {uci} not expected"),
            });
            return;
        }
        match self.reconciler.game().parse_uci(uci) {
            Ok(mv) => self.accept_engine_move(mv, None),
            Err(e) => self.notify(Notification::Rejected {
                reason: e.to_string(),
            }),
        }
    }

    fn alternative_move(&mut self) {
        if !self.modes.mode.engine_plays() {
            return;
        }
        let Some(rejected) = self.reconciler.discard_pending() else {
            debug!("no engine move to replace");
            return;
        };
        self.reconciler.alternatives_mut().exclude(rejected.mv);
        self.think(true);
    }

    fn switch_sides(&mut self) {
        match self.modes.mode {
            InteractionMode::Ponder => self.flip_turn(),
            mode if mode.engine_plays() => {
                self.drain_search();
                self.session.cancel_ponder();
                self.clock.stop();
                if self.reconciler.discard_pending().is_some() {
                    debug!("pending move dropped by side switch");
                }
                self.modes.side = self.modes.side.flipped();
                self.notify(Notification::PlaySideChanged {
                    side: self.modes.side,
                });
                let turn = self.reconciler.game().turn();
                if self.modes.engine_moves(turn) && self.game_over.is_none() {
                    self.think(false);
                } else if self.modes.mode.runs_clock() {
                    self.clock.start(turn);
                }
            }
            _ => {
                self.modes.side = self.modes.side.flipped();
                self.notify(Notification::PlaySideChanged {
                    side: self.modes.side,
                });
            }
        }
    }

    /// Gives the move to the other side on the same placement.
    fn flip_turn(&mut self) {
        let turn = self.reconciler.game().turn();
        let fen = format!("{} {} - - 0 1", self.reconciler.notation(), (!turn).char());
        match GameRecord::from_fen(&fen, self.reconciler.game().castling_mode()) {
            Ok(game) => {
                self.replace_game(game, true);
                self.refresh_analysis();
            }
            Err(e) => self.notify(Notification::Rejected {
                reason: e.to_string(),
            }),
        }
    }

    fn pause_resume(&mut self) {
        if self.search_ticket.is_some() {
            self.session.force_move();
            return;
        }
        if self.game_over.is_some() {
            return;
        }
        let turn = self.reconciler.game().turn();
        if self.modes.engine_moves(turn) && self.reconciler.pending().is_none() {
            self.think(true);
        } else if self.clock.is_running() {
            self.clock.stop();
        } else if self.modes.mode.runs_clock() {
            self.clock.start(turn);
        }
    }

    fn take_back(&mut self) {
        if !self.modes.mode.allows_takeback() {
            self.notify(Notification::Rejected {
                reason: format!("no takebacks in {} mode", self.modes.mode),
            });
            return;
        }
        self.drain_search();
        self.session.cancel_ponder();
        self.clock.stop();
        if let Some(undone) = self.reconciler.take_back() {
            self.session.bump_generation();
            self.game_over = None;
            self.notify(Notification::MoveUndone {
                undone: vec![self.uci(&undone)],
                replacement: None,
                fen: self.fen(),
            });
            self.enter_wait_state();
        }
    }
}

impl BoardStatus {
    pub(crate) fn describe<C: EngineClient>(
        reconciler: &Reconciler,
        modes: &ModeState,
        session: &EngineSession<C>,
        game_over: Option<GameResult>,
    ) -> Self {
        let game = reconciler.game();
        let position: Chess = game.current().clone();
        Self {
            board: game.notation(),
            fen: game.fen(),
            position,
            mode: modes.mode,
            side: modes.side,
            ply: game.ply_count(),
            pending: reconciler.pending().map(|p| game.uci(&p.mv)),
            engine: session.name().to_owned(),
            game_over,
            mismatch: reconciler.mismatch_flagged(),
            generation: session.generation(),
            analysis: session.analysis_for(game.current()),
        }
    }
}
