//! Connection Supervisor
//!
//! Owns the listening socket. Accepts clients in a loop and spawns one
//! [`handle_connection`] task per client; all sharing between clients
//! happens through the [`Store`].
//!
//! ```text
//!   Listening ──(shutdown signal)──> ShuttingDown ──(listener closed)──> Stopped
//! ```
//!
//! On shutdown the listener is dropped, so new connections are refused.
//! Connections that were already accepted keep running on the runtime:
//! they are not drained or waited on, and nothing bounds how many may be
//! open at once.

use crate::commands::CommandDispatcher;
use crate::connection::{handle_connection, ConnectionStats};
use crate::storage::Store;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// First pause after a failed accept. Doubles on each consecutive failure.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);

const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(ACCEPT_BACKOFF_MAX)
}

/// Lifecycle of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Listening,
    ShuttingDown,
    Stopped,
}

pub struct Server {
    listener: TcpListener,
    store: Arc<Store>,
    stats: Arc<ConnectionStats>,
    state_tx: watch::Sender<ServerState>,
}

impl Server {
    /// Wraps an already-bound listener.
    pub fn new(listener: TcpListener, store: Arc<Store>) -> Self {
        let (state_tx, _) = watch::channel(ServerState::Listening);
        Self {
            listener,
            store,
            stats: Arc::new(ConnectionStats::new()),
            state_tx,
        }
    }

    /// Binds a listener on `addr` and wraps it.
    pub async fn bind<A: ToSocketAddrs>(addr: A, store: Arc<Store>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::new(listener, store))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Connection statistics shared with every spawned handler.
    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Watches state transitions. Remains readable after `run` returns.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state_tx.subscribe()
    }

    /// Accepts connections until `shutdown` completes.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let Server {
            listener,
            store,
            stats,
            state_tx,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "Accepting connections");
        }

        tokio::pin!(shutdown);
        let mut backoff = ACCEPT_BACKOFF_MIN;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        backoff = ACCEPT_BACKOFF_MIN;
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
                        }
                        let dispatcher = CommandDispatcher::new(Arc::clone(&store));
                        let stats = Arc::clone(&stats);
                        tokio::spawn(handle_connection(stream, addr, dispatcher, stats));
                    }
                    Err(e) => {
                        // EMFILE and friends persist until a socket closes
                        error!(error = %e, retry_in = ?backoff, "Failed to accept connection");
                        tokio::select! {
                            _ = &mut shutdown => break,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = next_backoff(backoff);
                    }
                },
            }
        }

        state_tx.send_replace(ServerState::ShuttingDown);
        info!("Shutdown signal received, closing listener");

        drop(listener);

        state_tx.send_replace(ServerState::Stopped);
        info!("Server stopped accepting connections");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    async fn ping(stream: &mut TcpStream) -> Vec<u8> {
        stream.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        buf[..n].to_vec()
    }

    #[test]
    fn test_accept_backoff_doubles_to_cap() {
        let mut delay = ACCEPT_BACKOFF_MIN;
        let mut steps = Vec::new();
        for _ in 0..10 {
            steps.push(delay);
            delay = next_backoff(delay);
        }
        assert_eq!(steps[0], Duration::from_millis(10));
        assert_eq!(steps[1], Duration::from_millis(20));
        assert_eq!(steps[6], Duration::from_millis(640));
        assert_eq!(steps[7], ACCEPT_BACKOFF_MAX);
        assert_eq!(steps[9], ACCEPT_BACKOFF_MAX);
    }

    #[tokio::test]
    async fn test_state_transitions_and_listener_release() {
        let server = Server::bind("127.0.0.1:0", Arc::new(Store::new()))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let mut state = server.subscribe();
        assert_eq!(*state.borrow(), ServerState::Listening);

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async {
            let _ = rx.await;
        }));

        let mut client = TcpStream::connect(addr).await.unwrap();
        assert_eq!(ping(&mut client).await, b"+PONG\r\n");

        tx.send(()).unwrap();
        task.await.unwrap();

        state.changed().await.unwrap();
        assert_eq!(*state.borrow_and_update(), ServerState::Stopped);

        // Listener is gone
        assert!(TcpStream::connect(addr).await.is_err());

        // Already-accepted connections are not torn down
        assert_eq!(ping(&mut client).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_connections_share_store() {
        let store = Arc::new(Store::new());
        let server = Server::bind("127.0.0.1:0", Arc::clone(&store))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let stats = server.stats();

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async {
            let _ = rx.await;
        }));

        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();

        a.write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        let n = a.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");

        b.write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").await.unwrap();
        let n = b.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"$1\r\nv\r\n");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(stats.snapshot().connections_accepted, 2);

        tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
