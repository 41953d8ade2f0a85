//! Serialization tests for concurrent world edits
//!
//! Every mutation funnels through the model's single event queue, so no
//! matter how clients interleave on the wire, the world must end up in a
//! state that some serial ordering of their commands could have produced.
//! These tests hammer a live server with parallel connections and check
//! that property through chunk synchronization.

use server::config::Config;
use server::Server;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

/// Concurrent clients editing disjoint cells must all land exactly once
#[tokio::test]
async fn concurrent_disjoint_edits_all_land() {
    let server = start_server().await;
    let addr = server.addr();

    let mut expected = HashSet::new();
    let mut builders = Vec::new();
    for i in 0..5 {
        for x in 3..9 {
            expected.insert(format!("B,0,0,{},1,{},{}", x, 3 + i, i + 1));
        }
        builders.push(tokio::spawn(async move {
            let mut client = TestClient::join(addr).await;
            for x in 3..9 {
                client.send(&format!("B,{},1,{},{}", x, 3 + i, i + 1)).await;
            }
            // The reply terminator proves every edit above was applied.
            client.sync_chunk(0, 0).await;
        }));
    }
    for builder in builders {
        builder.await.expect("builder task panicked");
    }

    let mut verifier = TestClient::join(addr).await;
    let chunk = verifier.sync_chunk(0, 0).await;
    let seen: HashSet<String> = chunk.blocks.iter().cloned().collect();
    assert_eq!(seen, expected, "every edit must land exactly once");
    assert_eq!(chunk.key, 30, "watermark must cover all thirty inserts");

    server.shutdown();
    server.stopped().await;
}

/// Two clients racing for the same cell must leave exactly one write
#[tokio::test]
async fn same_cell_race_keeps_one_write() {
    let server = start_server().await;
    let addr = server.addr();

    let mut racers = Vec::new();
    for w in [5, 6] {
        racers.push(tokio::spawn(async move {
            let mut client = TestClient::join(addr).await;
            client.send(&format!("B,7,1,7,{}", w)).await;
            client.sync_chunk(0, 0).await;
        }));
    }
    for racer in racers {
        racer.await.expect("racer task panicked");
    }

    let mut verifier = TestClient::join(addr).await;
    let chunk = verifier.sync_chunk(0, 0).await;
    let survivors: Vec<&String> = chunk
        .blocks
        .iter()
        .filter(|row| row.starts_with("B,0,0,7,1,7,"))
        .collect();
    assert_eq!(survivors.len(), 1, "occupied cell must reject the loser");
    assert!(
        survivors[0] == "B,0,0,7,1,7,5" || survivors[0] == "B,0,0,7,1,7,6",
        "surviving write must come from one of the racers, got {}",
        survivors[0]
    );
    assert_eq!(chunk.key, 1, "the losing edit must not consume an id");

    server.shutdown();
    server.stopped().await;
}

/// Parallel editors must reach a watching client exactly once per edit
#[tokio::test]
async fn broadcasts_reach_watcher_exactly_once() {
    let server = start_server().await;
    let addr = server.addr();
    let mut watcher = TestClient::join(addr).await;

    let mut expected = HashSet::new();
    let mut builders = Vec::new();
    for i in 0..3 {
        for x in 2..7 {
            expected.insert(format!("B,0,0,{},1,{},{}", x, 10 + i, 17 + i));
        }
        builders.push(tokio::spawn(async move {
            let mut client = TestClient::join(addr).await;
            for x in 2..7 {
                client
                    .send(&format!("B,{},1,{},{}", x, 10 + i, 17 + i))
                    .await;
            }
            client.sync_chunk(0, 0).await;
        }));
    }
    for builder in builders {
        builder.await.expect("builder task panicked");
    }

    let mut seen = HashSet::new();
    while seen.len() < expected.len() {
        seen.insert(watcher.expect("B,").await);
    }
    assert_eq!(seen, expected, "each accepted edit broadcasts exactly once");

    server.shutdown();
    server.stopped().await;
}

/// An incremental resync must return only rows newer than the watermark
#[tokio::test]
async fn incremental_resync_returns_only_new_rows() {
    let server = start_server().await;
    let mut builder = TestClient::join(server.addr()).await;
    let mut verifier = TestClient::join(server.addr()).await;

    builder.send("B,3,1,3,5").await;
    builder.sync_chunk(0, 0).await;
    // Consume the live edit broadcast so only the reply remains.
    verifier.expect("R,").await;
    let first = verifier.sync_chunk(0, 0).await;
    assert_eq!(first.blocks, vec!["B,0,0,3,1,3,5"]);
    assert_eq!(first.key, 1);

    builder.send("B,4,1,4,6").await;
    builder.sync_chunk(0, 0).await;
    verifier.expect("R,").await;
    let delta = verifier.sync_chunk_from(0, 0, first.key).await;
    assert_eq!(
        delta.blocks,
        vec!["B,0,0,4,1,4,6"],
        "resync must skip rows already known to the client"
    );
    assert_eq!(delta.key, 2);

    server.shutdown();
    server.stopped().await;
}

/// Stress tests sustained edit throughput through the event queue
#[tokio::test]
async fn stress_sustained_edit_stream() {
    let server = start_server().await;
    let mut client = TestClient::join(server.addr()).await;

    let mut burst = String::new();
    let mut edits = 0;
    for y in 1..4 {
        for x in 2..12 {
            for z in 2..12 {
                burst.push_str(&format!("B,{},{},{},33\n", x, y, z));
                edits += 1;
            }
        }
    }

    let start = Instant::now();
    client.send_raw(&burst).await;
    let chunk = client.sync_chunk(0, 0).await;
    let duration = start.elapsed();

    println!(
        "Edit stream: {} edits in {:?} ({:.2} μs/edit)",
        edits,
        duration,
        duration.as_micros() as f64 / edits as f64
    );
    assert_eq!(chunk.blocks.len(), edits);
    assert_eq!(chunk.key, edits as u64);

    // Should keep up with a full chunk rebuild in under 10 seconds
    assert!(duration.as_secs() < 10);

    server.shutdown();
    server.stopped().await;
}

// HELPER FUNCTIONS

async fn start_server() -> Server {
    let mut config = Config::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    Server::start(config).await.expect("failed to start server")
}

/// Everything the requester learned from one chunk reply.
struct ChunkSnapshot {
    blocks: Vec<String>,
    key: u64,
}

struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Connects, handshakes, and waits for the assigned client id.
    async fn join(addr: SocketAddr) -> TestClient {
        let stream = TcpStream::connect(addr).await.expect("connect failed");
        let (reader, writer) = stream.into_split();
        let mut client = TestClient {
            lines: BufReader::new(reader).lines(),
            writer,
        };
        client.send("V,2").await;
        client.send("A,tester,").await;
        client.expect("U,").await;
        client
    }

    async fn send(&mut self, frame: &str) {
        self.send_raw(&format!("{}\n", frame)).await;
    }

    async fn send_raw(&mut self, data: &str) {
        self.writer
            .write_all(data.as_bytes())
            .await
            .expect("write failed");
    }

    /// Next frame starting with `prefix`, skipping unrelated traffic.
    async fn expect(&mut self, prefix: &str) -> String {
        loop {
            let line = timeout(Duration::from_secs(5), self.lines.next_line())
                .await
                .expect("timed out waiting for frame")
                .expect("read failed")
                .expect("connection closed early");
            if line.starts_with(prefix) {
                return line;
            }
        }
    }

    async fn sync_chunk(&mut self, p: i32, q: i32) -> ChunkSnapshot {
        self.send(&format!("C,{},{}", p, q)).await;
        self.collect_chunk(p, q).await
    }

    async fn sync_chunk_from(&mut self, p: i32, q: i32, key: u64) -> ChunkSnapshot {
        self.send(&format!("C,{},{},{}", p, q, key)).await;
        self.collect_chunk(p, q).await
    }

    /// Gathers one chunk reply, ignoring interleaved broadcasts.
    async fn collect_chunk(&mut self, p: i32, q: i32) -> ChunkSnapshot {
        let done = format!("C,{},{}", p, q);
        let block_prefix = format!("B,{},{},", p, q);
        let key_prefix = format!("K,{},{},", p, q);
        let mut snapshot = ChunkSnapshot {
            blocks: Vec::new(),
            key: 0,
        };
        loop {
            let line = timeout(Duration::from_secs(5), self.lines.next_line())
                .await
                .expect("timed out waiting for chunk reply")
                .expect("read failed")
                .expect("connection closed early");
            if line == done {
                return snapshot;
            }
            if line.starts_with(&block_prefix) {
                snapshot.blocks.push(line);
            } else if let Some(key) = line.strip_prefix(&key_prefix) {
                snapshot.key = key.parse().expect("malformed watermark");
            }
        }
    }
}
