mod common;

use std::sync::Arc;
use std::time::Duration;

use board_sync::clock::FixedMoveTime;
use board_sync::config::Config;
use board_sync::controller::{Controller, ControllerHandle, Event, Mover, Notification};
use board_sync::game::GameResult;
use board_sync::mode::{InteractionMode, PlaySide};
use board_sync::notation::STARTING_BOARD;
use board_sync::session::EngineSession;
use common::{placement_after, placement_from, Probe, SimEngine, SimLauncher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct Rig {
    handle: ControllerHandle,
    notifications: mpsc::UnboundedReceiver<Notification>,
    probe: Arc<Probe>,
    task: JoinHandle<Result<(), board_sync::error::SessionError>>,
}

impl Rig {
    fn start(config: Config, engine: SimEngine, probe: Arc<Probe>) -> Self {
        Self::start_with(config, engine, probe, None)
    }

    fn start_with(
        config: Config,
        engine: SimEngine,
        probe: Arc<Probe>,
        launcher: Option<SimLauncher>,
    ) -> Self {
        let session = EngineSession::new(engine, &config.session);
        let (tx, notifications) = mpsc::unbounded_channel();
        let clock = FixedMoveTime::new(config.clock.move_time_ms);
        let (mut controller, handle) = Controller::new(&config, session, clock, tx);
        if let Some(launcher) = launcher {
            controller = controller.with_launcher(Box::new(launcher));
        }
        let task = tokio::spawn(controller.run());
        Self {
            handle,
            notifications,
            probe,
            task,
        }
    }

    fn normal(preferences: &[&str]) -> Self {
        let (engine, probe) = SimEngine::new(preferences);
        Self::start(Config::default(), engine, probe)
    }

    fn sense(&self, moves: &[&str]) {
        self.handle.sensed(placement_after(moves)).unwrap();
    }

    /// Next notification that is not an analysis update.
    async fn next(&mut self) -> Notification {
        loop {
            let notification = timeout(Duration::from_secs(30), self.notifications.recv())
                .await
                .expect("notification in time")
                .expect("controller running");
            if !matches!(notification, Notification::AnalysisUpdate { .. }) {
                return notification;
            }
        }
    }

    /// Everything except analysis updates arriving within `window`.
    async fn drain(&mut self, window: Duration) -> Vec<Notification> {
        let mut seen = Vec::new();
        let _ = timeout(window, async {
            while let Some(notification) = self.notifications.recv().await {
                if !matches!(notification, Notification::AnalysisUpdate { .. }) {
                    seen.push(notification);
                }
            }
        })
        .await;
        seen
    }

    async fn shutdown(self) -> Arc<Probe> {
        self.handle.send(Event::Shutdown).unwrap();
        self.task.await.unwrap().unwrap();
        self.probe
    }
}

fn applied(notification: &Notification) -> Option<(String, Mover)> {
    match notification {
        Notification::MoveApplied { mv, mover, .. } => Some((mv.to_string(), *mover)),
        _ => None,
    }
}

fn pending_move(notification: &Notification) -> Option<(String, String)> {
    match notification {
        Notification::EngineMovePending { mv, fen, .. } => Some((mv.to_string(), fen.clone())),
        _ => None,
    }
}

/// Normal mode with an engine that thinks long enough to be interrupted.
fn slow_rig(preferences: &[&str], think: Duration) -> Rig {
    let (engine, probe) = SimEngine::new(preferences);
    Rig::start(Config::default(), engine.with_think(think), probe)
}

#[tokio::test(start_paused = true)]
async fn engine_reply_is_confirmed_by_the_board() {
    let mut rig = Rig::normal(&["e7e5"]);
    rig.sense(&["e2e4"]);
    assert_eq!(
        applied(&rig.next().await),
        Some(("e2e4".to_owned(), Mover::Player))
    );
    match rig.next().await {
        Notification::EngineMovePending { mv, .. } => assert_eq!(mv.to_string(), "e7e5"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(rig.handle.status().pending.map(|u| u.to_string()).as_deref(), Some("e7e5"));

    rig.sense(&["e2e4", "e7e5"]);
    assert_eq!(
        applied(&rig.next().await),
        Some(("e7e5".to_owned(), Mover::Engine))
    );
    let mut status = rig.handle.subscribe_status();
    status.wait_for(|s| s.ply == 2 && s.pending.is_none()).await.unwrap();

    let probe = rig.shutdown().await;
    assert_eq!(Probe::get(&probe.searches), 1);
    assert_eq!(Probe::get(&probe.quits), 1);
}

#[tokio::test(start_paused = true)]
async fn unexplained_board_is_reported_once() {
    let mut rig = Rig::normal(&[]);
    // e2 pawn lifted and not put down anywhere
    let lifted = "rnbqkbnr/pppppppp/8/8/8/8/PPPP1PPP/RNBQKBNR";
    rig.handle.sensed(lifted).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    // the same reading again restarts the delay
    rig.handle.sensed(lifted).unwrap();

    match rig.next().await {
        Notification::PositionMismatch { report } => {
            assert_eq!(report.expected, STARTING_BOARD);
            assert_eq!(report.squares.len(), 1);
            assert_eq!(report.squares[0].square, "e2");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(rig.drain(Duration::from_secs(10)).await.is_empty());
    assert!(rig.handle.status().mismatch);

    rig.handle.sensed(STARTING_BOARD).unwrap();
    assert_eq!(rig.next().await, Notification::MismatchCleared);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn transient_readings_are_not_reported() {
    let mut rig = Rig::normal(&["e7e5"]);
    rig.handle
        .sensed("rnbqkbnr/pppppppp/8/8/8/8/PPPP1PPP/RNBQKBNR")
        .unwrap();
    rig.sense(&["e2e4"]);
    let seen = rig.drain(Duration::from_secs(10)).await;
    assert!(seen
        .iter()
        .all(|n| !matches!(n, Notification::PositionMismatch { .. })));
    assert_eq!(applied(&seen[0]), Some(("e2e4".to_owned(), Mover::Player)));
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn mode_switch_drains_the_search() {
    let (engine, probe) = SimEngine::new(&["e7e5"]);
    let mut rig = Rig::start(
        Config::default(),
        engine.with_think(Duration::from_secs(60)),
        probe,
    );
    rig.sense(&["e2e4"]);
    assert!(applied(&rig.next().await).is_some());
    tokio::time::sleep(Duration::from_millis(50)).await;

    rig.handle
        .send(Event::SetMode(InteractionMode::Analysis))
        .unwrap();
    assert_eq!(
        rig.next().await,
        Notification::ModeChanged {
            mode: InteractionMode::Analysis
        }
    );
    let seen = rig.drain(Duration::from_secs(5)).await;
    assert!(seen
        .iter()
        .all(|n| !matches!(n, Notification::EngineMovePending { .. })));
    assert!(rig.handle.status().pending.is_none());

    let probe = rig.shutdown().await;
    assert!(Probe::get(&probe.stops) >= 1);
    assert_eq!(Probe::get(&probe.overlaps), 0);
}

#[tokio::test(start_paused = true)]
async fn analysis_mode_publishes_updates() {
    let (engine, probe) = SimEngine::new(&[]);
    let mut config = Config::default();
    config.board.mode = InteractionMode::Analysis;
    let mut rig = Rig::start(config, engine, probe);
    rig.sense(&["d2d4"]);
    assert!(applied(&rig.next().await).is_some());

    let update = timeout(Duration::from_secs(5), async {
        loop {
            if let Some(Notification::AnalysisUpdate { snapshot }) = rig.notifications.recv().await {
                return snapshot;
            }
        }
    })
    .await
    .unwrap();
    assert!(update.fen.starts_with(&placement_after(&["d2d4"])));
    assert!(!update.lines.is_empty());
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rebuilding_an_earlier_position_takes_moves_back() {
    let mut rig = Rig::normal(&["e7e5", "b8c6"]);
    rig.sense(&["e2e4"]);
    rig.next().await;
    rig.next().await;
    rig.sense(&["e2e4", "e7e5"]);
    rig.next().await;

    rig.handle.sensed(STARTING_BOARD).unwrap();
    match rig.next().await {
        Notification::MoveUndone {
            undone,
            replacement,
            ..
        } => {
            let undone: Vec<String> = undone.iter().map(|u| u.to_string()).collect();
            assert_eq!(undone, ["e7e5", "e2e4"]);
            assert!(replacement.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }
    let mut status = rig.handle.subscribe_status();
    status
        .wait_for(|s| s.ply == 0 && s.side == PlaySide::UserWhite && s.generation == 1)
        .await
        .unwrap();
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn premove_is_split_into_two_moves() {
    let (engine, probe) = SimEngine::new(&["e7e5", "b8c6"]);
    let mut config = Config::default();
    config.board.premove = true;
    let mut rig = Rig::start(config, engine, probe);
    rig.sense(&["e2e4"]);
    rig.next().await;
    rig.next().await;

    rig.sense(&["e2e4", "e7e5", "g1f3"]);
    assert_eq!(
        applied(&rig.next().await),
        Some(("e7e5".to_owned(), Mover::Engine))
    );
    assert_eq!(
        applied(&rig.next().await),
        Some(("g1f3".to_owned(), Mover::Player))
    );
    match rig.next().await {
        Notification::EngineMovePending { mv, .. } => assert_eq!(mv.to_string(), "b8c6"),
        other => panic!("unexpected {other:?}"),
    }
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn training_lets_the_player_move_for_the_engine() {
    let (engine, probe) = SimEngine::new(&["e7e5"]);
    let mut config = Config::default();
    config.board.mode = InteractionMode::Training;
    let mut rig = Rig::start(config, engine.with_think(Duration::from_secs(60)), probe);
    rig.sense(&["e2e4"]);
    rig.next().await;

    rig.sense(&["e2e4", "c7c5"]);
    assert_eq!(
        applied(&rig.next().await),
        Some(("c7c5".to_owned(), Mover::PlayerForEngine))
    );
    let seen = rig.drain(Duration::from_secs(5)).await;
    assert!(seen
        .iter()
        .all(|n| !matches!(n, Notification::EngineMovePending { .. })));
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn alternative_move_excludes_the_rejected_one() {
    let mut rig = Rig::normal(&["e7e5", "c7c5"]);
    rig.sense(&["e2e4"]);
    rig.next().await;
    rig.next().await;

    rig.handle.send(Event::AlternativeMove).unwrap();
    match rig.next().await {
        Notification::EngineMovePending { mv, .. } => assert_eq!(mv.to_string(), "c7c5"),
        other => panic!("unexpected {other:?}"),
    }
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn new_game_resets_everything() {
    let mut rig = Rig::normal(&["e7e5"]);
    rig.sense(&["e2e4"]);
    rig.next().await;
    rig.next().await;

    rig.handle
        .send(Event::NewGame(board_sync::game::StartPosition::Standard))
        .unwrap();
    assert_eq!(
        rig.next().await,
        Notification::GameEnded {
            result: board_sync::game::GameResult::Abort
        }
    );
    assert!(matches!(rig.next().await, Notification::NewGame { .. }));
    let mut status = rig.handle.subscribe_status();
    status
        .wait_for(|s| s.ply == 0 && s.pending.is_none() && s.generation == 1)
        .await
        .unwrap();
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn corrected_move_while_thinking_gets_a_fresh_reply() {
    let mut rig = slow_rig(&["e7e5"], Duration::from_secs(5));
    rig.sense(&["e2e4"]);
    assert_eq!(
        applied(&rig.next().await),
        Some(("e2e4".to_owned(), Mover::Player))
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    rig.sense(&["d2d4"]);
    match rig.next().await {
        Notification::MoveUndone {
            undone,
            replacement,
            ..
        } => {
            let undone: Vec<String> = undone.iter().map(|u| u.to_string()).collect();
            assert_eq!(undone, ["e2e4"]);
            assert_eq!(replacement.map(|u| u.to_string()).as_deref(), Some("d2d4"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        applied(&rig.next().await),
        Some(("d2d4".to_owned(), Mover::Player))
    );
    let (mv, fen) = pending_move(&rig.next().await).expect("engine move");
    assert_eq!(mv, "e7e5");
    assert!(fen.starts_with(&placement_after(&["d2d4"])));
    assert_eq!(rig.handle.status().pending.map(|u| u.to_string()).as_deref(), Some("e7e5"));

    let probe = rig.shutdown().await;
    assert_eq!(Probe::get(&probe.searches), 2);
    assert_eq!(Probe::get(&probe.overlaps), 0);
}

#[tokio::test(start_paused = true)]
async fn switching_sides_while_thinking_hands_the_move_over() {
    let mut rig = slow_rig(&["e7e5", "g1f3"], Duration::from_secs(5));
    rig.sense(&["e2e4"]);
    assert!(applied(&rig.next().await).is_some());
    tokio::time::sleep(Duration::from_millis(50)).await;

    rig.handle.send(Event::SwitchSides).unwrap();
    assert_eq!(
        rig.next().await,
        Notification::PlaySideChanged {
            side: PlaySide::UserBlack
        }
    );
    rig.sense(&["e2e4", "e7e5"]);
    assert_eq!(
        applied(&rig.next().await),
        Some(("e7e5".to_owned(), Mover::Player))
    );
    let (mv, _) = pending_move(&rig.next().await).expect("engine move");
    assert_eq!(mv, "g1f3");

    let probe = rig.shutdown().await;
    assert_eq!(Probe::get(&probe.searches), 2);
    assert_eq!(Probe::get(&probe.overlaps), 0);
}

#[tokio::test(start_paused = true)]
async fn pause_resume_makes_the_engine_move_now() {
    let mut rig = slow_rig(&["e7e5"], Duration::from_secs(60));
    rig.sense(&["e2e4"]);
    assert!(applied(&rig.next().await).is_some());
    tokio::time::sleep(Duration::from_millis(50)).await;

    rig.handle.send(Event::PauseResume).unwrap();
    let forced = timeout(Duration::from_secs(1), rig.next())
        .await
        .expect("move forced");
    assert_eq!(
        pending_move(&forced).map(|(mv, _)| mv).as_deref(),
        Some("e7e5")
    );
    let probe = rig.shutdown().await;
    assert!(Probe::get(&probe.stops) >= 1);
}

#[tokio::test(start_paused = true)]
async fn take_back_while_thinking_returns_the_move() {
    let mut rig = slow_rig(&["e7e5"], Duration::from_secs(5));
    rig.sense(&["e2e4"]);
    assert!(applied(&rig.next().await).is_some());

    rig.handle.send(Event::TakeBack).unwrap();
    match rig.next().await {
        Notification::MoveUndone {
            undone,
            replacement,
            ..
        } => {
            let undone: Vec<String> = undone.iter().map(|u| u.to_string()).collect();
            assert_eq!(undone, ["e2e4"]);
            assert!(replacement.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }

    rig.sense(&["d2d4"]);
    assert_eq!(
        applied(&rig.next().await),
        Some(("d2d4".to_owned(), Mover::Player))
    );
    let (mv, fen) = pending_move(&rig.next().await).expect("engine move");
    assert_eq!(mv, "e7e5");
    assert!(fen.starts_with(&placement_after(&["d2d4"])));
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn engine_move_that_ends_the_game_takes_no_premove() {
    let start = "8/8/8/8/4k3/8/5P2/7K w - - 0 1";
    let (engine, probe) = SimEngine::new(&["e4f3"]);
    let mut config = Config::default();
    config.board.premove = true;
    let mut rig = Rig::start(config, engine, probe);
    rig.handle.send(Event::SetPosition(start.to_owned())).unwrap();
    assert!(matches!(rig.next().await, Notification::NewGame { .. }));

    rig.handle.sensed(placement_from(start, &["f2f3"])).unwrap();
    assert_eq!(
        applied(&rig.next().await),
        Some(("f2f3".to_owned(), Mover::Player))
    );
    let (mv, _) = pending_move(&rig.next().await).expect("engine move");
    assert_eq!(mv, "e4f3");

    rig.handle
        .sensed(placement_from(start, &["f2f3", "e4f3", "h1h2"]))
        .unwrap();
    assert_eq!(
        applied(&rig.next().await),
        Some(("e4f3".to_owned(), Mover::Engine))
    );
    assert_eq!(
        rig.next().await,
        Notification::GameEnded {
            result: GameResult::InsufficientMaterial
        }
    );
    let seen = rig.drain(Duration::from_secs(5)).await;
    assert!(seen.iter().all(|n| applied(n).is_none()));
    assert_eq!(rig.handle.status().ply, 2);
    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_engine_is_relaunched_and_asked_again() {
    let (engine, probe) = SimEngine::new(&["e7e5"]);
    let launcher = SimLauncher::new(&["e7e5"], probe.clone());
    let mut rig = Rig::start_with(Config::default(), engine.broken(), probe, Some(launcher));
    rig.sense(&["e2e4"]);
    assert!(applied(&rig.next().await).is_some());
    assert_eq!(
        rig.next().await,
        Notification::EngineRestarted {
            engine: "sim".to_owned()
        }
    );
    let (mv, _) = pending_move(&rig.next().await).expect("engine move");
    assert_eq!(mv, "e7e5");

    let probe = rig.shutdown().await;
    assert_eq!(Probe::get(&probe.launches), 1);
    assert_eq!(Probe::get(&probe.searches), 2);
    // the broken engine and its replacement
    assert_eq!(Probe::get(&probe.quits), 2);
}

#[tokio::test(start_paused = true)]
async fn engine_failure_is_reported_when_nothing_starts() {
    let (engine, probe) = SimEngine::new(&[]);
    let launcher = SimLauncher::new(&[], probe.clone()).failing();
    let mut rig = Rig::start_with(Config::default(), engine.broken(), probe, Some(launcher));
    rig.sense(&["e2e4"]);
    assert!(applied(&rig.next().await).is_some());
    assert!(matches!(
        rig.next().await,
        Notification::EngineFailure { .. }
    ));
    let probe = rig.shutdown().await;
    assert_eq!(Probe::get(&probe.launches), 1);
}

#[tokio::test(start_paused = true)]
async fn relaunches_stop_at_the_limit() {
    let (engine, probe) = SimEngine::new(&[]);
    let launcher = SimLauncher::new(&[], probe.clone()).broken_engines();
    let mut rig = Rig::start_with(Config::default(), engine.broken(), probe, Some(launcher));
    rig.sense(&["e2e4"]);
    assert!(applied(&rig.next().await).is_some());
    assert!(matches!(
        rig.next().await,
        Notification::EngineRestarted { .. }
    ));
    assert!(matches!(
        rig.next().await,
        Notification::EngineFailure { .. }
    ));
    assert!(rig.drain(Duration::from_secs(5)).await.is_empty());

    let probe = rig.shutdown().await;
    assert_eq!(Probe::get(&probe.launches), 1);
    assert_eq!(Probe::get(&probe.searches), 2);
}
