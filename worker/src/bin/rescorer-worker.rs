use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rescorer_worker::client::{self, ClientConfig};
use rescorer_worker::engine::{EngineConfig, UciEngine};

/// Rescoring worker: fetches batches of gzipped games from the dispatch
/// server and re-evaluates every position with a UCI engine.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Host of the dispatch server.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port of the dispatch server.
    #[arg(long, default_value_t = 8888)]
    port: u16,

    /// How many files to fetch per batch.
    #[arg(long, default_value_t = 10)]
    chunk_size: usize,

    /// Path to the UCI engine binary used for rescoring.
    #[arg(long)]
    engine_path: Option<PathBuf>,

    /// Path to the network weights handed to the engine.
    #[arg(long)]
    weights_path: Option<PathBuf>,

    /// Backend the engine should run on.
    #[arg(long, default_value = "cudnn")]
    backend: String,

    /// GPU the engine should run on.
    #[arg(long, default_value = "0")]
    gpu_id: String,

    /// Name this client reports to the server.
    #[arg(long, default_value = "worker")]
    client_name: String,

    /// Node budget per analyzed position. Above one, probability vectors
    /// are rewritten from the search's visit counts.
    #[arg(long, default_value_t = 1)]
    num_nodes: u32,

    /// Engine minibatch size.
    #[arg(long)]
    minibatchsize: Option<u32>,

    /// Echo the server's data back unchanged instead of scoring it.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ClientConfig {
        host: cli.host,
        port: cli.port,
        name: cli.client_name,
        chunk_size: cli.chunk_size,
        nodes: cli.num_nodes,
    };

    if cli.dry_run {
        client::run::<UciEngine>(&config, None).await?;
        return Ok(());
    }

    let engine_path = cli
        .engine_path
        .ok_or("--engine-path is required unless --dry-run is set")?;
    let engine_config = EngineConfig {
        binary: engine_path,
        weights: cli.weights_path,
        backend: cli.backend,
        gpu_id: cli.gpu_id,
        threads: 2,
        minibatch_size: cli.minibatchsize,
        multipv: if cli.num_nodes > 1 {
            cli.num_nodes.div_ceil(2)
        } else {
            1
        },
    };

    let mut engine = UciEngine::spawn(&engine_config).await?;
    info!(engine = %engine_config.binary.display(), "engine ready");

    client::run(&config, Some(&mut engine)).await?;
    engine.quit().await;
    Ok(())
}
