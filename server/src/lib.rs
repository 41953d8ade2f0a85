//! # VoxelWorld Server Library
//!
//! This library provides the authoritative server implementation for a
//! multiplayer voxel world. It owns the canonical copy of the world,
//! applies client edits in a single, well-defined order, and keeps every
//! connected client's view of the terrain and of each other in sync.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative World State
//! The server holds the only copy of the world that matters. Every block,
//! attachment and sign edit is validated and applied here; clients render
//! whatever the server tells them and roll back local predictions the
//! server refuses.
//!
//! ### Client Management
//! Handles the complete lifecycle of client connections including:
//! - Connection establishment and client id assignment
//! - Command framing, decoding and validation
//! - Per-connection rate budgets and slow-client eviction
//! - Disconnection handling and cleanup
//!
//! ### Incremental Chunk Sync
//! Every stored row carries a monotonically increasing insertion id.
//! Clients remember the highest id they have seen per chunk and request
//! only newer rows, so rejoining a long-lived world costs bandwidth
//! proportional to what actually changed.
//!
//! ## Architecture Design
//!
//! ### Single-Consumer Event Queue
//! All connections feed one unbounded event queue consumed by a single
//! model task. Commands take effect strictly in dequeue order, which
//! eliminates race conditions between concurrent editors without any
//! locking around world state.
//!
//! ### Line-Based TCP Protocol
//! Clients speak a newline-delimited, comma-separated text protocol over
//! TCP. Each connection gets a reader task that frames and decodes inbound
//! lines and a writer task that drains a bounded outbox, coalescing queued
//! frames into single writes.
//!
//! ### Periodic Snapshots
//! World state persists as a single snapshot file rewritten atomically
//! every few seconds while dirty, and once more at shutdown. A crash loses
//! at most one commit interval of edits.
//!
//! ## Module Organization
//!
//! ### Model Module (`model`)
//! The world model task: applies commands against current state,
//! validates edits, fans out updates and answers chunk sync requests.
//!
//! ### Connection Module (`connection`)
//! The accept loop plus the per-socket reader and writer tasks, and the
//! handle the model uses to push frames back to a client.
//!
//! ### Store Module (`store`)
//! Typed world tables with insertion-id bookkeeping and the snapshot
//! commit cycle.
//!
//! ### World Module (`world`)
//! Procedural terrain so the server can judge edits against ground that
//! was never explicitly stored, plus the default-empty generator.
//!
//! ### Config and Limiter Modules (`config`, `limiter`)
//! Runtime options with their defaults, and the token-bucket budgets that
//! keep chatty clients in check.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::Config;
//! use server::Server;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let mut config = Config::default();
//!     config.port = 4080;
//!
//!     // Bind the listener and spawn the model and accept tasks. The
//!     // returned handle is all that is needed to wind the server down.
//!     let server = Server::start(config).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown();
//!     server.stopped().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Security Considerations
//!
//! ### Input Validation
//! Malformed frames are dropped where they are decoded and never reach
//! world state. Edits are checked against item allow lists, coordinate
//! bounds and occupancy rules before they are applied.
//!
//! ### Rate Limiting
//! Position updates and general traffic are charged against separate
//! token buckets; a connection that exceeds its budget is dropped.
//!
//! ### State Authority
//! The server never trusts a client's view of the world. Rejected edits
//! are answered with the authoritative cell value so modified clients
//! cannot make their changes stick, even locally.

pub mod config;
pub mod connection;
pub mod limiter;
pub mod model;
pub mod store;
pub mod world;

mod chat;

use crate::config::Config;
use crate::connection::Event;
use crate::model::Model;
use crate::store::Store;
use crate::world::Generator;
use log::info;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A running server: the bound listener's address plus handles to the two
/// long-lived tasks.
pub struct Server {
    addr: SocketAddr,
    events: mpsc::UnboundedSender<Event>,
    model: JoinHandle<()>,
    accept: JoinHandle<()>,
}

impl Server {
    /// Opens the configured world and starts serving it. Options given on
    /// the command line are written into the store before the world's
    /// generator is chosen, so they take effect immediately and persist.
    pub async fn start(config: Config) -> io::Result<Server> {
        let mut store = Store::open(config.db_path.clone())?;
        for (name, value) in &config.startup_options {
            store.set_option(name, value);
        }
        let generator = world::generator_for(&config, &store);
        Server::start_with(config, store, generator).await
    }

    /// Starts serving an already-opened store with an explicit generator.
    pub async fn start_with(
        config: Config,
        store: Store,
        generator: Box<dyn Generator>,
    ) -> io::Result<Server> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        info!("listening on {}", addr);
        let rate_limit = config.rate_limit;
        let outbox_capacity = config.outbox_capacity;
        let (model, events) = Model::new(config, store, generator);
        let model_task = tokio::spawn(model.run());
        let accept_task = tokio::spawn(connection::accept_loop(
            listener,
            events.clone(),
            rate_limit,
            outbox_capacity,
        ));
        Ok(Server {
            addr,
            events,
            model: model_task,
            accept: accept_task,
        })
    }

    /// The address the listener actually bound, which is what you want
    /// when the configured port was 0.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting connections and asks the model to wind down. The
    /// model drains whatever is already queued first, so edits that were
    /// received before the shutdown still land in the final commit.
    pub fn shutdown(&self) {
        self.accept.abort();
        let _ = self.events.send(Event::Shutdown);
    }

    /// Waits for the model task to finish its final commit.
    pub async fn stopped(self) {
        self.accept.abort();
        let _ = self.model.await;
    }
}
