//! Connection Handler
//!
//! One handler per client. It owns the read buffer and the write half of
//! the stream and runs until the peer closes or an I/O error occurs.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects, handler spawned
//!        │
//!        ▼
//! 2. ┌──────────────────────────────────┐
//!    │  Main Loop                       │
//!    │                                  │
//!    │  Parse every complete frame      │
//!    │    ├─ ok     -> execute, reply   │
//!    │    └─ broken -> error reply,     │
//!    │                 drop the frame   │
//!    │  Flush replies                   │
//!    │  Read more bytes                 │
//!    │                                  │
//!    │         [Loop back]              │
//!    └──────────────────────────────────┘
//!        │
//!        ▼
//! 3. Peer closes / I/O error, handler task ends
//! ```
//!
//! ## Buffer Management
//!
//! TCP is a stream: a read may hold half a frame or several pipelined
//! frames. Bytes accumulate in a `BytesMut` and complete frames are split
//! off the front. Replies for every frame in the buffer are written before
//! the next read, in request order.
//!
//! A malformed frame is answered with `-ERR Protocol error: ...` and the
//! bytes the parser reports as belonging to it are dropped. The connection
//! stays open.

use crate::commands::CommandDispatcher;
use crate::protocol::parser::MAX_BULK_SIZE;
use crate::protocol::{RespParser, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, trace, warn};

/// Largest amount of unparsed input we hold for one client: one maximal
/// bulk payload plus its headers.
const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Per-server connection counters, shared by every handler.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    accepted: AtomicU64,
    active: AtomicU64,
    commands: AtomicU64,
    protocol_errors: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

/// Point-in-time copy of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub active_connections: u64,
    pub commands_processed: u64,
    /// Frames rejected by the parser
    pub protocol_errors: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.accepted.load(Ordering::Relaxed),
            active_connections: self.active.load(Ordering::Relaxed),
            commands_processed: self.commands.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            bytes_read: self.bytes_in.load(Ordering::Relaxed),
            bytes_written: self.bytes_out.load(Ordering::Relaxed),
        }
    }

    fn opened(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    fn closed(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
///
/// Generic over the stream so it can run on a `TcpStream` or on any other
/// duplex byte stream.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Bytes read but not yet consumed by the parser
    buffer: BytesMut,

    dispatcher: CommandDispatcher,

    parser: RespParser,

    /// Reused across replies
    reply_buf: Vec<u8>,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler and counts the connection as open.
    pub fn new(
        stream: S,
        addr: SocketAddr,
        dispatcher: CommandDispatcher,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            dispatcher,
            parser: RespParser::new(),
            reply_buf: Vec::with_capacity(256),
            stats,
        }
    }

    /// Runs the connection until the peer closes it or an error occurs.
    ///
    /// A close between frames is `Ok(())`; a close in the middle of a frame
    /// is [`ConnectionError::UnexpectedEof`].
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let mut replied = false;
            while let Some(reply) = self.next_reply() {
                self.write_reply(&reply).await?;
                replied = true;
            }
            if replied {
                self.stream.flush().await?;
            }

            if !self.read_more_data().await? {
                return Ok(());
            }
        }
    }

    /// Produces the reply for the next complete frame in the buffer, if any.
    ///
    /// Frames with no arguments are consumed silently.
    fn next_reply(&mut self) -> Option<RespValue> {
        loop {
            if self.buffer.is_empty() {
                return None;
            }

            match self.parser.parse_command(&self.buffer) {
                Ok(Some((args, consumed))) => {
                    self.buffer.advance(consumed);
                    trace!(
                        client = %self.addr,
                        consumed = consumed,
                        remaining = self.buffer.len(),
                        "Parsed command"
                    );

                    if let Some(reply) = self.dispatcher.execute(&args) {
                        ConnectionStats::add(&self.stats.commands, 1);
                        return Some(reply);
                    }
                }
                Ok(None) => {
                    trace!(
                        client = %self.addr,
                        buffered = self.buffer.len(),
                        "Incomplete command, need more data"
                    );
                    return None;
                }
                Err(e) => {
                    warn!(
                        client = %self.addr,
                        error = %e,
                        discarded = e.discard,
                        "Protocol error"
                    );
                    ConnectionStats::add(&self.stats.protocol_errors, 1);
                    let discard = e.discard.min(self.buffer.len());
                    self.buffer.advance(discard);
                    return Some(RespValue::error(format!("ERR Protocol error: {}", e)));
                }
            }
        }
    }

    /// Reads more data from the stream into the buffer.
    ///
    /// Returns `false` when the peer closed cleanly between frames.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            if self.buffer.is_empty() {
                return Ok(false);
            }
            return Err(ConnectionError::UnexpectedEof);
        }

        ConnectionStats::add(&self.stats.bytes_in, n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(true)
    }

    /// Queues a reply in the write buffer. Flushed by the main loop.
    async fn write_reply(&mut self, reply: &RespValue) -> Result<(), ConnectionError> {
        self.reply_buf.clear();
        reply.serialize_into(&mut self.reply_buf);
        self.stream.write_all(&self.reply_buf).await?;
        ConnectionStats::add(&self.stats.bytes_out, self.reply_buf.len());
        trace!(
            client = %self.addr,
            bytes = self.reply_buf.len(),
            "Queued response"
        );
        Ok(())
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed in the middle of a frame
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Runs a [`ConnectionHandler`] to completion, logging how it ended.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    dispatcher: CommandDispatcher,
    stats: Arc<ConnectionStats>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, dispatcher, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}
