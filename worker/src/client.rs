//! Worker client: fetch batches of gzipped games from the dispatch server,
//! rescore them, send the results back in the order they arrived.

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{info, warn};

use rescorer_wire::framing::{read_item, write_item, write_payload};
use rescorer_wire::handshake::{Hello, READY};

use crate::engine::Analyzer;
use crate::score::score_file;

/// Client-side connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub chunk_size: usize,
    /// Node budget per analyzed position.
    pub nodes: u32,
}

/// Connect and process batches until the server signals it is done.
///
/// With no analyzer the client runs dry: every input is echoed back
/// unchanged, which exercises the transport without an engine.
pub async fn run<A: Analyzer + Send>(
    config: &ClientConfig,
    mut analyzer: Option<&mut A>,
) -> std::io::Result<()> {
    let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_item(&mut write_half, READY).await?;
    write_item(
        &mut write_half,
        &Hello::new(config.name.clone(), config.chunk_size).encode(),
    )
    .await?;
    write_half.flush().await?;

    loop {
        let mut batch: Vec<Bytes> = Vec::with_capacity(config.chunk_size);
        while batch.len() < config.chunk_size {
            match read_item(&mut reader).await {
                Ok(Some(item)) if !item.is_empty() => batch.push(item),
                Ok(Some(_)) | Ok(None) => break,
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    info!("server closed the stream mid-item");
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        if batch.is_empty() {
            info!("no more work, exiting");
            break;
        }

        let mut outputs: Vec<Bytes> = Vec::with_capacity(batch.len());
        for file in &batch {
            let scored = match &mut analyzer {
                None => file.clone(),
                Some(analyzer) => match score_file(file, &mut **analyzer, config.nodes).await {
                    Ok(bytes) => Bytes::from(bytes),
                    // A file that can't be walked is given up on: the empty
                    // item keeps the batch aligned and tells the server not
                    // to persist anything for it.
                    Err(err) => {
                        warn!(%err, "giving up on file");
                        Bytes::new()
                    }
                },
            };
            outputs.push(scored);
        }

        info!(files = outputs.len(), "finished scoring batch");
        write_payload(&mut write_half, &outputs).await?;
        write_half.flush().await?;
    }

    write_half.shutdown().await?;
    Ok(())
}
