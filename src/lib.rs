//! # gedis - An In-Memory Key-Value Server
//!
//! gedis speaks a subset of RESP, the Redis wire protocol, over TCP and
//! keeps byte-string keys and values in memory with optional per-key
//! expiration.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                              gedis                              │
//! │                                                                 │
//! │  ┌─────────────┐    ┌─────────────┐    ┌───────────────────┐    │
//! │  │   Server    │───>│ Connection  │───>│ CommandDispatcher │    │
//! │  │ (Listener)  │    │  Handler    │    └─────────┬─────────┘    │
//! │  └─────────────┘    └──────┬──────┘              │              │
//! │                            │                     ▼              │
//! │                     ┌──────┴──────┐    ┌───────────────────┐    │
//! │                     │    RESP     │    │       Store       │    │
//! │                     │   Codec     │    │  values + expiry  │    │
//! │                     └─────────────┘    └─────────▲─────────┘    │
//! │                                                  │              │
//! │                                        ┌─────────┴─────────┐    │
//! │                                        │      Reaper       │    │
//! │                                        │ (Background Task) │    │
//! │                                        └───────────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use gedis::server::Server;
//! use gedis::storage::{Reaper, ReaperConfig, Store};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let store = Arc::new(Store::new());
//!     let reaper = Reaper::start(Arc::clone(&store), ReaperConfig::default());
//!
//!     let server = Server::bind("127.0.0.1:9999", store).await?;
//!     server.run(async { tokio::signal::ctrl_c().await.ok(); }).await;
//!
//!     reaper.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `SET key value` / `GET key` / `DEL key [key ...]`
//! - `SETEX key seconds value`
//! - `EXPIRE key seconds` / `TTL key`
//! - `KEYS`
//! - `FLUSHDB`
//!
//! ## Modules
//!
//! - [`protocol`]: RESP frame decoder and reply encoder
//! - [`storage`]: the shared store and its expiry reaper
//! - [`commands`]: command dispatch and validation
//! - [`connection`]: per-client request/reply loop
//! - [`server`]: accept loop and shutdown
//! - [`client`]: async client library
//! - [`config`]: command-line configuration
//!
//! ## Expiry
//!
//! An expired key is invisible from the moment its deadline passes. It is
//! physically removed either when a read touches it (lazy) or when the
//! reaper's next scan finds it (active), whichever comes first.

pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

pub use client::{Client, ClientError};
pub use commands::CommandDispatcher;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ParseError, RespParser, RespValue};
pub use server::{Server, ServerState};
pub use storage::{Reaper, ReaperConfig, Store, Ttl};

/// The default port gedis listens on
pub const DEFAULT_PORT: u16 = 9999;

/// The default host gedis binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of gedis
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
