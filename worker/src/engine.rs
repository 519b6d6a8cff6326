//! Driver for the UCI analysis engine subprocess.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

/// How long engine startup may take before the worker gives up.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(20);

/// Grace period between `quit` and killing the process.
const QUIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unable to spawn engine {0}: {1}")]
    Spawn(String, std::io::Error),

    #[error("engine io: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine closed its output stream")]
    Closed,

    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),

    #[error("search finished without reporting a score")]
    NoScore,
}

/// Engine evaluation, from the side to move's perspective.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Score {
    Cp(i32),
    Mate(i32),
}

impl Score {
    /// Normalized q value: centipawns over 10000, mate counted as ±100
    /// before the division.
    pub fn q(self) -> f32 {
        match self {
            Score::Cp(cp) => cp as f32 / 10000.0,
            Score::Mate(moves) if moves > 0 => 100.0 / 10000.0,
            Score::Mate(_) => -100.0 / 10000.0,
        }
    }
}

/// One principal variation of a search, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct PrincipalVariation {
    pub first_move: String,
    pub visits: u64,
}

/// Search result handed to the rescorer.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub score: Score,
    pub pvs: Vec<PrincipalVariation>,
}

/// Seam between the rescore state machine and the engine, so the machine
/// is testable without a subprocess.
#[async_trait::async_trait]
pub trait Analyzer {
    async fn analyse(&mut self, fen: &str, nodes: u32) -> Result<Analysis, EngineError>;
}

/// Options handed to the engine at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub binary: PathBuf,
    pub weights: Option<PathBuf>,
    pub backend: String,
    pub gpu_id: String,
    pub threads: u32,
    pub minibatch_size: Option<u32>,
    /// Principal variations to request; anything above one also makes the
    /// rescorer rewrite the probability vectors.
    pub multipv: u32,
}

/// A running UCI engine subprocess.
pub struct UciEngine {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl UciEngine {
    pub async fn spawn(config: &EngineConfig) -> Result<Self, EngineError> {
        let mut child = Command::new(&config.binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| EngineError::Spawn(config.binary.display().to_string(), err))?;

        let stdin = child.stdin.take().expect("stdin is piped");
        let stdout = BufReader::new(child.stdout.take().expect("stdout is piped")).lines();

        let mut engine = UciEngine {
            child,
            stdin,
            stdout,
        };
        timeout(STARTUP_TIMEOUT, engine.initialize(config))
            .await
            .map_err(|_| EngineError::Timeout(STARTUP_TIMEOUT))??;
        Ok(engine)
    }

    async fn initialize(&mut self, config: &EngineConfig) -> Result<(), EngineError> {
        self.send("uci").await?;
        self.wait_for("uciok").await?;

        if let Some(weights) = &config.weights {
            self.set_option("WeightsFile", &weights.display().to_string())
                .await?;
        }
        self.set_option("Threads", &config.threads.to_string()).await?;
        self.set_option("ScoreType", "Q").await?;
        self.set_option("Backend", &config.backend).await?;
        self.set_option("BackendOptions", &format!("gpu={}", config.gpu_id))
            .await?;
        if let Some(size) = config.minibatch_size {
            self.set_option("MinibatchSize", &size.to_string()).await?;
        }
        if config.multipv > 1 {
            self.set_option("MultiPV", &config.multipv.to_string()).await?;
        }

        self.send("isready").await?;
        self.wait_for("readyok").await
    }

    async fn set_option(&mut self, name: &str, value: &str) -> Result<(), EngineError> {
        self.send(&format!("setoption name {name} value {value}")).await
    }

    async fn send(&mut self, line: &str) -> Result<(), EngineError> {
        debug!(line, "engine <-");
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn next_line(&mut self) -> Result<String, EngineError> {
        self.stdout.next_line().await?.ok_or(EngineError::Closed)
    }

    async fn wait_for(&mut self, marker: &str) -> Result<(), EngineError> {
        loop {
            if self.next_line().await?.trim() == marker {
                return Ok(());
            }
        }
    }

    /// Ask the engine to leave, then make sure it is gone.
    pub async fn quit(mut self) {
        if self.send("quit").await.is_ok()
            && timeout(QUIT_TIMEOUT, self.child.wait()).await.is_ok()
        {
            return;
        }
        warn!("engine did not exit on quit, killing it");
        let _ = self.child.kill().await;
    }
}

#[async_trait::async_trait]
impl Analyzer for UciEngine {
    async fn analyse(&mut self, fen: &str, nodes: u32) -> Result<Analysis, EngineError> {
        self.send(&format!("position fen {fen}")).await?;
        self.send(&format!("go nodes {nodes}")).await?;

        let mut score = None;
        let mut pvs: BTreeMap<u32, PrincipalVariation> = BTreeMap::new();
        loop {
            let line = self.next_line().await?;
            if line.starts_with("info") {
                parse_info(&line, &mut score, &mut pvs);
            } else if line.starts_with("bestmove") {
                break;
            }
        }
        Ok(Analysis {
            score: score.ok_or(EngineError::NoScore)?,
            pvs: pvs.into_values().collect(),
        })
    }
}

/// Pull score, visit count and the first pv move out of one `info` line.
/// Later lines for the same multipv rank overwrite earlier ones.
fn parse_info(
    line: &str,
    score: &mut Option<Score>,
    pvs: &mut BTreeMap<u32, PrincipalVariation>,
) {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let mut multipv = 1u32;
    let mut line_score = None;
    let mut visits = 0u64;
    let mut first_move = None;

    let mut i = 1;
    while i < tokens.len() {
        match tokens[i] {
            "multipv" => {
                if let Some(value) = tokens.get(i + 1).and_then(|t| t.parse().ok()) {
                    multipv = value;
                }
                i += 2;
            }
            "nodes" => {
                if let Some(value) = tokens.get(i + 1).and_then(|t| t.parse().ok()) {
                    visits = value;
                }
                i += 2;
            }
            "score" => {
                match (
                    tokens.get(i + 1),
                    tokens.get(i + 2).and_then(|t| t.parse::<i32>().ok()),
                ) {
                    (Some(&"cp"), Some(value)) => line_score = Some(Score::Cp(value)),
                    (Some(&"mate"), Some(value)) => line_score = Some(Score::Mate(value)),
                    _ => {}
                }
                i += 3;
            }
            "pv" => {
                first_move = tokens.get(i + 1).map(|s| s.to_string());
                break;
            }
            _ => i += 1,
        }
    }

    if multipv == 1 {
        if let Some(s) = line_score {
            *score = Some(s);
        }
    }
    if let Some(first_move) = first_move {
        pvs.insert(multipv, PrincipalVariation { first_move, visits });
    }
}
