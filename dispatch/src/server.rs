//! The dispatch server: accepts worker connections and feeds each one
//! chunks from the shared work queue until the input tree is exhausted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use rescorer_wire::framing::{read_item, write_payload};
use rescorer_wire::handshake::{expect_ready, Hello, HandshakeError};

use crate::sink::{OutputSink, SinkError};
use crate::source::DirectorySource;
use crate::stats::StatsRegistry;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("client disconnected during handshake")]
    ClosedDuringHandshake,

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Owns the shared work queue, output sink and stats map. Each connection
/// task borrows a handle to all three.
pub struct DispatchServer {
    queue: Arc<Mutex<DirectorySource>>,
    sink: Arc<OutputSink>,
    stats: Arc<StatsRegistry>,
    stats_period: Duration,
}

impl DispatchServer {
    pub fn new(source: DirectorySource, sink: OutputSink, stats_period: Duration) -> Self {
        Self {
            queue: Arc::new(Mutex::new(source)),
            sink: Arc::new(sink),
            stats: Arc::new(StatsRegistry::default()),
            stats_period,
        }
    }

    pub fn stats(&self) -> Arc<StatsRegistry> {
        self.stats.clone()
    }

    /// Accept loop. One task per connection; runs until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        self.spawn_stats_reporter();
        loop {
            let (socket, peer) = listener.accept().await?;
            debug!(%peer, "accepted connection");
            let queue = self.queue.clone();
            let sink = self.sink.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(err) = handle_client(socket, queue, sink, stats).await {
                    info!(%peer, %err, "connection ended");
                }
            });
        }
    }

    fn spawn_stats_reporter(&self) {
        let stats = self.stats.clone();
        let period = self.stats_period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = stats.snapshot(period);
                let mut total_rate = 0.0;
                let mut total_files = 0;
                let mut total_procs = 0;
                for client in &snapshot {
                    info!(
                        client = %client.name,
                        procs = client.connections,
                        total_files = client.rate.total_files,
                        files_per_second = client.rate.files_per_second,
                        "client throughput"
                    );
                    total_rate += client.rate.files_per_second;
                    total_files += client.rate.total_files;
                    total_procs += client.connections;
                }
                info!(
                    procs = total_procs,
                    total_files,
                    files_per_second = total_rate,
                    "aggregate throughput"
                );
            }
        });
    }
}

async fn handle_client(
    socket: TcpStream,
    queue: Arc<Mutex<DirectorySource>>,
    sink: Arc<OutputSink>,
    stats: Arc<StatsRegistry>,
) -> Result<(), ConnectionError> {
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    let ready = read_item(&mut reader)
        .await?
        .ok_or(ConnectionError::ClosedDuringHandshake)?;
    expect_ready(&ready)?;

    let hello = read_item(&mut reader)
        .await?
        .ok_or(ConnectionError::ClosedDuringHandshake)?;
    let hello = Hello::parse(&hello)?;
    info!(client = %hello.name, chunk_size = hello.chunk_size, "new client");

    stats.attach(&hello.name);
    let result = drive(&hello, &mut reader, &mut write_half, &queue, &sink, &stats).await;
    stats.detach(&hello.name);
    result
}

/// Main dispatch loop for one connection.
async fn drive(
    hello: &Hello,
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    queue: &Mutex<DirectorySource>,
    sink: &OutputSink,
    stats: &StatsRegistry,
) -> Result<(), ConnectionError> {
    let mut half_closed = false;
    loop {
        // The take is the only critical section: each path leaves the
        // queue exactly once, no matter how many connections are pulling.
        let paths: Vec<PathBuf> = queue.lock().await.take(hello.chunk_size);
        if paths.is_empty() {
            info!(client = %hello.name, "source exhausted, closing connection");
            if !half_closed {
                writer.shutdown().await?;
            }
            return Ok(());
        }

        let started = Instant::now();
        let mut files = Vec::with_capacity(paths.len());
        for path in &paths {
            files.push(tokio::fs::read(path).await?);
        }
        write_payload(writer, &files).await?;
        writer.flush().await?;
        if paths.len() < hello.chunk_size {
            // Short batch: the source just ran dry, tell the client via
            // half-close so it exits after this round.
            writer.shutdown().await?;
            half_closed = true;
        }

        // One item per dispatched file, paired by position.
        let mut outputs: Vec<Bytes> = Vec::with_capacity(paths.len());
        for _ in &paths {
            match read_item(reader).await {
                Ok(Some(item)) => outputs.push(item),
                Ok(None) => break,
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            }
        }
        let complete = outputs.len() == paths.len();
        if !complete {
            // TODO: requeue the abandoned paths instead of losing them for
            // this run; resume mode recovers them on the next one.
            warn!(
                client = %hello.name,
                received = outputs.len(),
                expected = paths.len(),
                "client disconnected mid-batch, abandoning remainder"
            );
        }

        info!(client = %hello.name, files = outputs.len(), "persisting batch");
        for (path, bytes) in paths.iter().zip(&outputs) {
            sink.persist(path, bytes).await?;
        }

        if !complete {
            return Ok(());
        }
        stats.record(&hello.name, paths.len() as u64, started.elapsed());
    }
}
