use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rescorer_dispatch::server::DispatchServer;
use rescorer_dispatch::sink::OutputSink;
use rescorer_dispatch::source::DirectorySource;

/// Serve a tree of gzipped game records to rescoring workers.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Folder from which to serve the games, expected in .gz format.
    #[arg(long)]
    input_folder: PathBuf,

    /// Folder the rescored games are written to, mirroring the input
    /// layout. Must differ from the input folder.
    #[arg(long)]
    output_folder: PathBuf,

    /// Only serve files whose directory path contains this substring.
    #[arg(long, default_value = "")]
    filter_text: String,

    /// Seconds between client throughput reports.
    #[arg(long, default_value_t = 30)]
    stats_period: u64,

    /// Skip input files that already have an output present.
    #[arg(long)]
    resume_mode: bool,

    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8888)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.input_folder == cli.output_folder {
        return Err("input and output folder must differ".into());
    }
    if !cli.input_folder.is_dir() {
        return Err(format!(
            "input folder {} is not a readable directory",
            cli.input_folder.display()
        )
        .into());
    }

    let filter = (!cli.filter_text.is_empty()).then(|| cli.filter_text.clone());
    let source = DirectorySource::new(
        &cli.input_folder,
        &cli.output_folder,
        filter,
        cli.resume_mode,
    );
    let sink = OutputSink::new(&cli.input_folder, &cli.output_folder);
    let server = DispatchServer::new(source, sink, Duration::from_secs(cli.stats_period));

    let listener = TcpListener::bind((cli.host.as_str(), cli.port)).await?;
    info!(host = %cli.host, port = cli.port, "dispatch server listening");
    server.serve(listener).await?;
    Ok(())
}
