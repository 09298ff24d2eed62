//! Drives a board controller from standard input.
//!
//! Each input line is either a sensed placement (first FEN field) or one of
//! the commands below. Notifications are printed to standard output as JSON,
//! one per line.
//!
//! ```text
//! mode <name>      switch interaction mode
//! new [960 [n]]    start a new game
//! fen <fen>        set up a position
//! remote <uci>     move for a remote opponent
//! alt              ask for a different engine move
//! switch           switch sides
//! go               force the engine to move now, or toggle the clock
//! back             take back one move
//! quit
//! ```

use std::path::PathBuf;

use board_sync::{
    clock::FixedMoveTime,
    config::Config,
    controller::{Controller, Event},
    error::{ConfigError, EngineError, SessionError},
    game::StartPosition,
    mode::InteractionMode,
    session::EngineSession,
    uci::UciLauncher,
    EngineLauncher,
};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "board-sync", about = "Keep a sensor board and a UCI engine in sync")]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured interaction mode.
    #[arg(short, long)]
    mode: Option<InteractionMode>,

    /// Overrides the configured engine executable.
    #[arg(short, long)]
    engine: Option<String>,

    /// Serve the board status over HTTP on this address.
    #[cfg(feature = "server")]
    #[arg(long)]
    listen: Option<std::net::SocketAddr>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("controller task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn parse_command(line: &str) -> Result<Event, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Err("empty line".to_owned());
    };
    if command.contains('/') {
        return Ok(Event::Sensed(command.to_owned()));
    }
    match command {
        "mode" => words
            .next()
            .ok_or_else(|| "mode needs a name".to_owned())?
            .parse()
            .map(Event::SetMode),
        "new" => match (words.next(), words.next()) {
            (None, _) => Ok(Event::NewGame(StartPosition::Standard)),
            (Some("960"), None) => Ok(Event::NewGame(StartPosition::RandomChess960)),
            (Some("960"), Some(index)) => index
                .parse()
                .map(|i| Event::NewGame(StartPosition::Chess960(i)))
                .map_err(|_| format!("bad chess960 index {index}")),
            (Some(other), _) => Err(format!("unknown variant {other}")),
        },
        "fen" => {
            let fen = words.collect::<Vec<_>>().join(" ");
            if fen.is_empty() {
                Err("fen needs a position".to_owned())
            } else {
                Ok(Event::SetPosition(fen))
            }
        }
        "remote" => words
            .next()
            .map(|uci| Event::RemoteMove(uci.to_owned()))
            .ok_or_else(|| "remote needs a move".to_owned()),
        "alt" => Ok(Event::AlternativeMove),
        "switch" => Ok(Event::SwitchSides),
        "go" => Ok(Event::PauseResume),
        "back" => Ok(Event::TakeBack),
        "quit" => Ok(Event::Shutdown),
        other => Err(format!("unknown command {other}")),
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "board_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading configuration");
            Config::load(path)?
        }
        None => Config::default(),
    };
    if let Some(mode) = args.mode {
        config.board.mode = mode;
    }
    if let Some(engine) = args.engine {
        config.engine.path = engine;
    }

    let launcher = UciLauncher::new(config.engine.clone(), config.board.chess960);
    let engine = launcher.launch().await?;
    let session = EngineSession::new(engine, &config.session);
    let clock = FixedMoveTime::new(config.clock.move_time_ms);
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let (controller, handle) = Controller::new(&config, session, clock, notify_tx);
    let controller = controller.with_launcher(Box::new(launcher));
    let controller = tokio::spawn(controller.run());

    tokio::spawn(async move {
        while let Some(notification) = notify_rx.recv().await {
            match serde_json::to_string(&notification) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "cannot encode notification"),
            }
        }
    });

    #[cfg(feature = "server")]
    if let Some(addr) = args.listen {
        let router = board_sync::server::board_router(handle.clone());
        tracing::info!(%addr, "serving board status");
        tokio::spawn(async move {
            if let Err(e) = axum::Server::bind(&addr)
                .serve(router.into_make_service())
                .await
            {
                tracing::error!(error = %e, "http server stopped");
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Ok(Event::Shutdown) => break,
            Ok(event) => {
                if handle.send(event).is_err() {
                    break;
                }
            }
            Err(reason) => tracing::warn!(%reason, "ignored input"),
        }
    }

    let _ = handle.send(Event::Shutdown);
    controller.await??;
    Ok(())
}
