//! Connection Module
//!
//! Per-client request/reply loop. Each accepted socket gets its own async
//! task running a [`ConnectionHandler`].
//!
//! ```text
//!            Server (accept loop)
//!                   │ spawn per client
//!                   ▼
//! ┌─────────────────────────────────────────────────┐
//! │               ConnectionHandler                 │
//! │                                                 │
//! │  ┌────────────┐   ┌────────────┐   ┌─────────┐  │
//! │  │ Read bytes │──>│ Parse RESP │──>│ Execute │  │
//! │  └────────────┘   └────────────┘   └────┬────┘  │
//! │        ▲                                │       │
//! │        │          ┌────────────┐        │       │
//! │        └──────────│ Send reply │<───────┘       │
//! │                   └────────────┘                │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use gedis::commands::CommandDispatcher;
//! use gedis::connection::{handle_connection, ConnectionStats};
//! use gedis::storage::Store;
//! use std::sync::Arc;
//!
//! let store = Arc::new(Store::new());
//! let stats = Arc::new(ConnectionStats::new());
//!
//! let (stream, addr) = listener.accept().await?;
//! let dispatcher = CommandDispatcher::new(Arc::clone(&store));
//! tokio::spawn(handle_connection(stream, addr, dispatcher, stats));
//! ```

pub mod handler;

pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats, StatsSnapshot,
};
