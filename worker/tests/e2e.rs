//! Dry-run identity: a worker in dry-run mode must leave the output tree
//! byte-identical to the input tree.

use std::path::Path;
use std::time::Duration;

use rescorer_dispatch::server::DispatchServer;
use rescorer_dispatch::sink::OutputSink;
use rescorer_dispatch::source::DirectorySource;
use rescorer_worker::client::{self, ClientConfig};
use rescorer_worker::engine::UciEngine;

async fn wait_for(path: &Path) {
    for _ in 0..500 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never appeared", path.display());
}

#[tokio::test]
async fn test_dry_run_round_trips_the_tree() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(input.path().join("run-1")).unwrap();
    std::fs::write(input.path().join("run-1/x.gz"), [0x1f, 0x8b, 0x08, 0, 1, 2, 3]).unwrap();
    std::fs::write(input.path().join("run-1/y.gz"), vec![9u8; 4096]).unwrap();
    std::fs::write(input.path().join("z.gz"), b"not actually gzip").unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = DispatchServer::new(
        DirectorySource::new(input.path(), output.path(), None, false),
        OutputSink::new(input.path(), output.path()),
        Duration::from_secs(60),
    );
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    let config = ClientConfig {
        host: "127.0.0.1".into(),
        port,
        name: "dry".into(),
        chunk_size: 2,
        nodes: 1,
    };
    client::run::<UciEngine>(&config, None).await.unwrap();

    for rel in ["run-1/x.gz", "run-1/y.gz", "z.gz"] {
        wait_for(&output.path().join(rel)).await;
        assert_eq!(
            std::fs::read(output.path().join(rel)).unwrap(),
            std::fs::read(input.path().join(rel)).unwrap(),
            "{rel} must round-trip unchanged"
        );
    }

    // A second run finds the source exhausted and exits straight away.
    client::run::<UciEngine>(&config, None).await.unwrap();
}
