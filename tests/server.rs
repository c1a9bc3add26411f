//! End-to-end tests: a real `Server` on an ephemeral port, driven over TCP.

use gedis::client::{Client, ClientError};
use gedis::server::{Server, ServerState};
use gedis::storage::{Reaper, ReaperConfig, Store, Ttl};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

struct TestServer {
    addr: SocketAddr,
    store: Arc<Store>,
    state: watch::Receiver<ServerState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    reaper: Reaper,
}

impl TestServer {
    async fn start() -> Self {
        let store = Arc::new(Store::new());
        let reaper = Reaper::start(
            Arc::clone(&store),
            ReaperConfig {
                interval: Duration::from_millis(50),
            },
        );

        let server = Server::bind("127.0.0.1:0", Arc::clone(&store))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let state = server.subscribe();

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async {
            let _ = rx.await;
        }));

        Self {
            addr,
            store,
            state,
            shutdown: Some(tx),
            task,
            reaper,
        }
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await.unwrap();
        self.reaper.shutdown().await;
    }
}

/// Writes `request` and reads exactly `expected.len()` bytes back.
async fn exchange(stream: &mut TcpStream, request: &[u8], expected: &[u8]) {
    stream.write_all(request).await.unwrap();
    let mut buf = vec![0u8; expected.len()];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("reply timed out")
        .unwrap();
    assert_eq!(
        String::from_utf8_lossy(&buf),
        String::from_utf8_lossy(expected)
    );
}

#[tokio::test]
async fn ping_set_get_over_the_wire() {
    let server = TestServer::start().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    exchange(&mut stream, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
    exchange(
        &mut stream,
        b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n",
        b"+OK\r\n",
    )
    .await;
    exchange(&mut stream, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"$1\r\nv\r\n").await;

    server.stop().await;
}

#[tokio::test]
async fn empty_value_is_not_null() {
    let server = TestServer::start().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    exchange(
        &mut stream,
        b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n",
        b"+OK\r\n",
    )
    .await;
    exchange(&mut stream, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n", b"$0\r\n\r\n").await;
    exchange(&mut stream, b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n", b"$-1\r\n").await;

    server.stop().await;
}

#[tokio::test]
async fn framing_errors_keep_connection_open() {
    let server = TestServer::start().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    exchange(
        &mut stream,
        b"*abc\r\n*1\r\n$4\r\nPING\r\n",
        b"-ERR Protocol error: invalid integer: abc\r\n+PONG\r\n",
    )
    .await;

    exchange(
        &mut stream,
        b"*1\r\n$-5\r\n*1\r\n$4\r\nPING\r\n",
        b"-ERR Protocol error: invalid bulk string length: -5\r\n+PONG\r\n",
    )
    .await;

    exchange(
        &mut stream,
        b"PING\r\n*1\r\n$4\r\nPING\r\n",
        b"-ERR Protocol error: expected '*', got 'P'\r\n+PONG\r\n",
    )
    .await;

    server.stop().await;
}

#[tokio::test]
async fn command_errors_keep_connection_open() {
    let server = TestServer::start().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    exchange(
        &mut stream,
        b"*2\r\n$3\r\nFOO\r\n$3\r\nbar\r\n",
        b"-ERR unknown command 'FOO'\r\n",
    )
    .await;
    exchange(
        &mut stream,
        b"*2\r\n$3\r\nSET\r\n$1\r\nk\r\n",
        b"-ERR wrong number of arguments for 'set' command\r\n",
    )
    .await;
    exchange(
        &mut stream,
        b"*4\r\n$5\r\nSETEX\r\n$1\r\nk\r\n$2\r\n-1\r\n$1\r\nv\r\n",
        b"-ERR invalid expire time in 'setex' command\r\n",
    )
    .await;
    exchange(&mut stream, b"*1\r\n$4\r\nKEYS\r\n", b"*0\r\n").await;

    server.stop().await;
}

#[tokio::test]
async fn split_and_pipelined_frames() {
    let server = TestServer::start().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    stream.write_all(b"*3\r\n$3\r\nSE").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    exchange(&mut stream, b"T\r\n$1\r\na\r\n$1\r\n1\r\n", b"+OK\r\n").await;

    exchange(
        &mut stream,
        b"*3\r\n$3\r\nSET\r\n$1\r\nb\r\n$1\r\n2\r\n*1\r\n$4\r\nKEYS\r\n*3\r\n$3\r\nDEL\r\n$1\r\na\r\n$1\r\nz\r\n",
        b"+OK\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n:1\r\n",
    )
    .await;

    server.stop().await;
}

#[tokio::test]
async fn client_roundtrip() {
    let server = TestServer::start().await;
    let mut client = Client::connect(server.addr).await.unwrap();

    assert_eq!(client.ping().await.unwrap(), "PONG");
    client.set("name", "Ariz").await.unwrap();
    assert_eq!(client.get_string("name").await.unwrap(), "Ariz");
    assert_eq!(client.ttl("name").await.unwrap(), Ttl::Persistent);

    assert_eq!(client.del(&["name"]).await.unwrap(), 1);
    assert_eq!(client.del(&["name"]).await.unwrap(), 0);
    assert!(matches!(
        client.get("name").await,
        Err(ClientError::KeyNotFound(_))
    ));

    client.flush_db().await.unwrap();
    client.flush_db().await.unwrap();
    assert!(client.keys().await.unwrap().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn setex_expires_over_the_wire() {
    let server = TestServer::start().await;
    let mut client = Client::connect(server.addr).await.unwrap();

    client
        .set_ex("k", "v", Duration::from_secs(1))
        .await
        .unwrap();
    match client.ttl("k").await.unwrap() {
        Ttl::Remaining(left) => assert!(left > Duration::ZERO && left <= Duration::from_secs(1)),
        other => panic!("unexpected ttl {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(1200)).await;

    // The reaper already removed it without any read
    assert_eq!(server.store.len(), 0);
    assert!(matches!(client.get("k").await, Err(ClientError::KeyNotFound(_))));
    assert_eq!(client.ttl("k").await.unwrap(), Ttl::Missing);

    server.stop().await;
}

#[tokio::test]
async fn expire_on_absent_key_creates_nothing() {
    let server = TestServer::start().await;
    let mut client = Client::connect(server.addr).await.unwrap();

    assert!(!client.expire("ghost", Duration::from_secs(10)).await.unwrap());
    assert!(client.keys().await.unwrap().is_empty());

    client.set("k", "v").await.unwrap();
    assert!(client.expire("k", Duration::from_secs(10)).await.unwrap());
    assert_eq!(
        client.ttl("k").await.unwrap(),
        Ttl::Remaining(Duration::from_secs(10))
    );

    server.stop().await;
}

#[tokio::test]
async fn concurrent_clients_see_their_own_writes() {
    let server = TestServer::start().await;

    let tasks: Vec<_> = (0..8)
        .map(|t| {
            let addr = server.addr;
            tokio::spawn(async move {
                let mut client = Client::connect(addr).await.unwrap();
                for i in 0..50 {
                    let key = format!("c{}:{}", t, i);
                    client.set(&key, format!("{}", i)).await.unwrap();
                    assert_eq!(client.get_int(&key).await.unwrap(), i);
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(server.store.len(), 400);

    server.stop().await;
}

#[tokio::test]
async fn shutdown_releases_listener() {
    let server = TestServer::start().await;
    let addr = server.addr;
    let mut state = server.state.clone();
    let mut stream = TcpStream::connect(addr).await.unwrap();

    server.stop().await;

    state
        .wait_for(|s| *s == ServerState::Stopped)
        .await
        .unwrap();
    assert!(TcpStream::connect(addr).await.is_err());

    // The open connection still works after shutdown
    exchange(&mut stream, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
}
