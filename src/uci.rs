//! UCI engine running as a child process.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use shakmaty::{uci::Uci, CastlingMode, Chess, Move, Position};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::engine_types::{
    AnalysisRequest, BestMove, PvLine, Score, SearchLimits, SearchRequest, SearchSignal,
};
use crate::error::EngineError;
use crate::notation::full_fen;
use crate::{EngineClient, EngineLauncher};

pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
pub const ENGINE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Input and output of one engine process.
pub struct UciEngine {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    lines: Lines<BufReader<ChildStdout>>,
    options: HashSet<String>,
    name: String,
    castling_mode: CastlingMode,
    multipv: u32,
    analysing: bool,
    ready_timeout: Duration,
}

impl UciEngine {
    /// Starts the engine and completes the UCI handshake.
    pub async fn spawn(config: &EngineConfig, chess960: bool) -> Result<Self, EngineError> {
        let mut child = Command::new(&config.path)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                path: config.path.clone(),
                source,
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Protocol("no stdin".to_owned()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Protocol("no stdout".to_owned()))?;

        let mut engine = Self {
            child,
            stdin: BufWriter::new(stdin),
            lines: BufReader::new(stdout).lines(),
            options: HashSet::new(),
            name: config.path.clone(),
            castling_mode: if chess960 {
                CastlingMode::Chess960
            } else {
                CastlingMode::Standard
            },
            multipv: 1,
            analysing: false,
            ready_timeout: config.handshake_timeout(),
        };
        engine.initialize(config, chess960).await?;
        info!(engine = %engine.name, options = engine.options.len(), "engine ready");
        Ok(engine)
    }

    async fn initialize(&mut self, config: &EngineConfig, chess960: bool) -> Result<(), EngineError> {
        self.write_line("uci").await?;
        loop {
            let line = self.recv_line("uci", self.ready_timeout).await?;
            if let Some(rest) = line.strip_prefix("id name ") {
                self.name = rest.trim().to_owned();
            } else if let Some(rest) = line.strip_prefix("option ") {
                if let Some(name) = parse_option_name(rest) {
                    self.options.insert(name);
                }
            } else if line.trim() == "uciok" {
                break;
            }
        }
        for (name, value) in &config.options {
            self.set_option_if_available(name, value).await?;
        }
        if chess960 {
            self.set_option_if_available("UCI_Chess960", "true").await?;
        }
        self.sync_ready().await?;
        self.write_line("ucinewgame").await?;
        Ok(())
    }

    pub fn supports(&self, option: &str) -> bool {
        self.options.contains(option)
    }

    pub async fn set_option_if_available(&mut self, name: &str, value: &str) -> Result<(), EngineError> {
        // engines that advertise nothing get every option
        if self.options.is_empty() || self.options.contains(name) {
            self.write_line(&format!("setoption name {name} value {value}"))
                .await?;
        } else {
            debug!(option = name, "engine does not advertise option, skipped");
        }
        Ok(())
    }

    pub async fn sync_ready(&mut self) -> Result<(), EngineError> {
        self.write_line("isready").await?;
        loop {
            if self.recv_line("isready", self.ready_timeout).await?.trim() == "readyok" {
                return Ok(());
            }
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), EngineError> {
        write_line(&mut self.stdin, line).await
    }

    async fn recv_line(&mut self, what: &str, limit: Duration) -> Result<String, EngineError> {
        let line = timeout(limit, self.lines.next_line())
            .await
            .map_err(|_| EngineError::Timeout(what.to_owned()))??
            .ok_or(EngineError::Exited)?;
        trace!(%line, "<< engine");
        Ok(line)
    }

    async fn send_position(&mut self, position: &Chess) -> Result<(), EngineError> {
        let fen = full_fen(position);
        self.write_line(&format!("position fen {fen}")).await
    }
}

async fn write_line(stdin: &mut BufWriter<ChildStdin>, line: &str) -> Result<(), EngineError> {
    trace!(line, ">> engine");
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

#[async_trait]
impl EngineClient for UciEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn new_game(&mut self) -> Result<(), EngineError> {
        self.write_line("ucinewgame").await?;
        self.sync_ready().await
    }

    async fn search(
        &mut self,
        request: &SearchRequest,
        signals: &mut mpsc::UnboundedReceiver<SearchSignal>,
    ) -> Result<BestMove, EngineError> {
        self.send_position(&request.position).await?;
        self.write_line(&go_command(request, self.castling_mode)).await?;

        let mut info = None;
        let mut stop_sent = false;
        loop {
            tokio::select! {
                line = self.lines.next_line() => {
                    let line = line?.ok_or(EngineError::Exited)?;
                    trace!(%line, "<< engine");
                    if let Some(rest) = line.strip_prefix("bestmove") {
                        let (best, ponder) = parse_bestmove(rest, &request.position)?;
                        return Ok(BestMove { best, ponder, info });
                    }
                    if let Some(pv) = parse_info(&line) {
                        if pv.multipv == 1 {
                            info = Some(pv);
                        }
                    }
                }
                Some(signal) = signals.recv() => match signal {
                    SearchSignal::Stop if !stop_sent => {
                        write_line(&mut self.stdin, "stop").await?;
                        stop_sent = true;
                    }
                    SearchSignal::Stop => {}
                    SearchSignal::PonderHit => write_line(&mut self.stdin, "ponderhit").await?,
                },
            }
        }
    }

    async fn start_analysis(&mut self, request: &AnalysisRequest) -> Result<(), EngineError> {
        if request.multipv != self.multipv && self.supports("MultiPV") {
            self.write_line(&format!("setoption name MultiPV value {}", request.multipv))
                .await?;
            self.multipv = request.multipv;
        }
        self.send_position(&request.position).await?;
        let go = match request.depth {
            Some(depth) => format!("go depth {depth}"),
            None => "go infinite".to_owned(),
        };
        self.write_line(&go).await?;
        self.analysing = true;
        Ok(())
    }

    async fn next_info(&mut self) -> Result<Option<PvLine>, EngineError> {
        while self.analysing {
            let line = self
                .lines
                .next_line()
                .await?
                .ok_or(EngineError::Exited)?;
            if line.starts_with("bestmove") {
                self.analysing = false;
                return Ok(None);
            }
            if let Some(pv) = parse_info(&line) {
                return Ok(Some(pv));
            }
        }
        Ok(None)
    }

    async fn stop_analysis(&mut self) -> Result<(), EngineError> {
        if !self.analysing {
            return Ok(());
        }
        self.write_line("stop").await?;
        loop {
            let line = self.recv_line("stop", ENGINE_STOP_TIMEOUT).await?;
            if line.starts_with("bestmove") {
                self.analysing = false;
                return Ok(());
            }
        }
    }

    async fn quit(&mut self) -> Result<(), EngineError> {
        if let Err(e) = self.write_line("quit").await {
            debug!(error = %e, "engine gone before quit");
        }
        match timeout(ENGINE_QUIT_TIMEOUT, self.child.wait()).await {
            Ok(status) => {
                debug!(?status, "engine exited");
            }
            Err(_) => {
                warn!(engine = %self.name, "engine ignored quit, killing");
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}

/// Starts the configured engine, or the fallback engine when that fails.
#[derive(Debug, Clone)]
pub struct UciLauncher {
    config: EngineConfig,
    chess960: bool,
}

impl UciLauncher {
    pub fn new(config: EngineConfig, chess960: bool) -> Self {
        Self { config, chess960 }
    }
}

#[async_trait]
impl EngineLauncher for UciLauncher {
    type Client = UciEngine;

    async fn launch(&self) -> Result<UciEngine, EngineError> {
        let error = match UciEngine::spawn(&self.config, self.chess960).await {
            Ok(engine) => return Ok(engine),
            Err(e) => e,
        };
        let Some(fallback) = self
            .config
            .fallback
            .as_ref()
            .filter(|path| **path != self.config.path)
        else {
            return Err(error);
        };
        warn!(engine = %self.config.path, %fallback, %error, "engine failed to start, trying fallback");
        // arguments belong to the configured engine
        let config = EngineConfig {
            path: fallback.clone(),
            args: Vec::new(),
            ..self.config.clone()
        };
        UciEngine::spawn(&config, self.chess960).await
    }
}

/// Builds the `go` command for a directed search.
pub fn go_command(request: &SearchRequest, castling_mode: CastlingMode) -> String {
    let mut cmd = String::from("go");
    if request.ponder {
        cmd.push_str(" ponder");
    }
    let SearchLimits {
        white_time,
        black_time,
        white_increment,
        black_increment,
        moves_to_go,
        move_time,
        depth,
    } = &request.limits;
    let mut limited = false;
    for (key, value) in [
        ("wtime", *white_time),
        ("btime", *black_time),
        ("winc", *white_increment),
        ("binc", *black_increment),
        ("movestogo", moves_to_go.map(u64::from)),
        ("movetime", *move_time),
        ("depth", depth.map(u64::from)),
    ] {
        if let Some(value) = value {
            let _ = write!(cmd, " {key} {value}");
            limited |= key != "winc" && key != "binc" && key != "movestogo";
        }
    }
    if !limited && !request.ponder {
        cmd.push_str(" infinite");
    }
    if let Some(moves) = request.root_moves.as_ref().filter(|m| !m.is_empty()) {
        cmd.push_str(" searchmoves");
        for mv in moves {
            let _ = write!(cmd, " {}", mv.to_uci(castling_mode));
        }
    }
    cmd
}

/// Parses the remainder of a `bestmove` line against the searched position.
pub fn parse_bestmove(rest: &str, position: &Chess) -> Result<(Option<Move>, Option<Move>), EngineError> {
    let mut tokens = rest.split_whitespace();
    let best = match tokens.next() {
        None | Some("(none)") | Some("0000") => return Ok((None, None)),
        Some(token) => token,
    };
    let illegal = || EngineError::IllegalMove {
        uci: best.to_owned(),
        fen: full_fen(position),
    };
    let best = Uci::from_str(best)
        .map_err(|_| illegal())?
        .to_move(position)
        .map_err(|_| illegal())?;

    let ponder = match (tokens.next(), tokens.next()) {
        (Some("ponder"), Some(token)) => {
            let mut after = position.clone();
            after.play_unchecked(&best);
            Uci::from_str(token)
                .ok()
                .and_then(|uci| uci.to_move(&after).ok())
        }
        _ => None,
    };
    Ok((Some(best), ponder))
}

/// Parses an `info` line that carries a principal variation.
pub fn parse_info(line: &str) -> Option<PvLine> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("info") {
        return None;
    }
    let mut depth = None;
    let mut multipv = 1;
    let mut score = None;
    let mut nodes = None;
    let mut pv = Vec::new();
    while let Some(token) = tokens.next() {
        match token {
            "depth" => depth = tokens.next().and_then(|t| t.parse().ok()),
            "multipv" => multipv = tokens.next().and_then(|t| t.parse().ok()).unwrap_or(1),
            "nodes" => nodes = tokens.next().and_then(|t| t.parse().ok()),
            "score" => {
                score = match (tokens.next(), tokens.next().and_then(|t| t.parse().ok())) {
                    (Some("cp"), Some(v)) => Some(Score::Centipawns(v)),
                    (Some("mate"), Some(v)) => Some(Score::Mate(v)),
                    _ => None,
                }
            }
            "pv" => {
                pv = tokens
                    .by_ref()
                    .map_while(|t| Uci::from_str(t).ok())
                    .collect();
            }
            // the rest of the line is free text
            "string" => return None,
            _ => {}
        }
    }
    let depth = depth?;
    if pv.is_empty() {
        return None;
    }
    Some(PvLine {
        multipv,
        depth,
        score,
        nodes,
        pv,
    })
}

/// Option name from the remainder of an `option` line.
pub fn parse_option_name(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace().skip_while(|t| *t != "name").skip(1);
    let mut parts = Vec::new();
    for token in tokens.by_ref() {
        if token == "type" {
            break;
        }
        parts.push(token);
    }
    (!parts.is_empty()).then(|| parts.join(" "))
}
