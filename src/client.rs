//! Async client for a gedis server.
//!
//! Speaks the same RESP subset as the server: requests go out as arrays of
//! bulk strings, replies are decoded with [`RespParser::parse`].
//!
//! ```ignore
//! use gedis::Client;
//!
//! let mut client = Client::connect("127.0.0.1:9999").await?;
//! client.set("greeting", "hello").await?;
//! assert_eq!(client.get_string("greeting").await?, "hello");
//! ```

use crate::protocol::{encode_command, ParseError, RespParser, RespValue};
use crate::storage::Ttl;
use bytes::{Buf, Bytes, BytesMut};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The server answered with an error reply
    #[error("server error: {0}")]
    Server(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The reply had a different type than the command returns
    #[error("unexpected reply: expected {expected}, got {got:?}")]
    WrongType {
        expected: &'static str,
        got: RespValue,
    },

    #[error("value is not a number: {0:?}")]
    InvalidNumber(String),

    #[error("connection closed by server")]
    Closed,
}

pub type ClientResult<T> = Result<T, ClientError>;

/// A single connection to the server. Commands are sent one at a time.
pub struct Client {
    stream: TcpStream,
    buffer: BytesMut,
    parser: RespParser,
    write_buf: Vec<u8>,
}

impl Client {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            parser: RespParser::new(),
            write_buf: Vec::with_capacity(256),
        })
    }

    /// Sends one command and waits for its reply.
    ///
    /// Error replies are returned as [`ClientError::Server`].
    pub async fn command<A: AsRef<[u8]>>(&mut self, args: &[A]) -> ClientResult<RespValue> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;

        match self.read_reply().await? {
            RespValue::Error(msg) => Err(ClientError::Server(msg)),
            reply => Ok(reply),
        }
    }

    async fn read_reply(&mut self) -> ClientResult<RespValue> {
        loop {
            if !self.buffer.is_empty() {
                match self.parser.parse(&self.buffer) {
                    Ok(Some((value, consumed))) => {
                        self.buffer.advance(consumed);
                        return Ok(value);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // Unparseable bytes would fail every later command
                        self.buffer.clear();
                        return Err(e.into());
                    }
                }
            }

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(ClientError::Closed);
            }
        }
    }

    pub async fn ping(&mut self) -> ClientResult<String> {
        let reply = self.command(&["PING"]).await?;
        simple_string(reply)
    }

    pub async fn set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> ClientResult<()> {
        let reply = self
            .command(&[&b"SET"[..], key.as_ref(), value.as_ref()])
            .await?;
        expect_ok(reply)
    }

    /// `SETEX`. The TTL is sent in whole seconds.
    pub async fn set_ex(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        ttl: Duration,
    ) -> ClientResult<()> {
        let secs = ttl.as_secs().to_string();
        let reply = self
            .command(&[
                &b"SETEX"[..],
                key.as_ref(),
                secs.as_bytes(),
                value.as_ref(),
            ])
            .await?;
        expect_ok(reply)
    }

    /// Fetches a raw value. A missing key is [`ClientError::KeyNotFound`].
    pub async fn get(&mut self, key: impl AsRef<[u8]>) -> ClientResult<Bytes> {
        let key = key.as_ref();
        match self.command(&[&b"GET"[..], key]).await? {
            RespValue::BulkString(data) => Ok(data),
            RespValue::Null => Err(ClientError::KeyNotFound(
                String::from_utf8_lossy(key).into_owned(),
            )),
            got => Err(ClientError::WrongType {
                expected: "bulk string",
                got,
            }),
        }
    }

    pub async fn get_string(&mut self, key: impl AsRef<[u8]>) -> ClientResult<String> {
        let data = self.get(key).await?;
        String::from_utf8(data.to_vec()).map_err(|_| ClientError::WrongType {
            expected: "UTF-8 string",
            got: RespValue::BulkString(data),
        })
    }

    pub async fn get_int(&mut self, key: impl AsRef<[u8]>) -> ClientResult<i64> {
        let s = self.get_string(key).await?;
        s.trim()
            .parse()
            .map_err(|_| ClientError::InvalidNumber(s))
    }

    pub async fn get_float(&mut self, key: impl AsRef<[u8]>) -> ClientResult<f64> {
        let s = self.get_string(key).await?;
        s.trim()
            .parse()
            .map_err(|_| ClientError::InvalidNumber(s))
    }

    /// Returns how many of `keys` existed.
    pub async fn del<K: AsRef<[u8]>>(&mut self, keys: &[K]) -> ClientResult<i64> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"DEL");
        args.extend(keys.iter().map(|k| k.as_ref()));
        let reply = self.command(&args).await?;
        integer(reply)
    }

    /// Returns `true` if the key existed and now has the TTL.
    pub async fn expire(&mut self, key: impl AsRef<[u8]>, ttl: Duration) -> ClientResult<bool> {
        let secs = ttl.as_secs().to_string();
        let reply = self
            .command(&[&b"EXPIRE"[..], key.as_ref(), secs.as_bytes()])
            .await?;
        Ok(integer(reply)? == 1)
    }

    pub async fn ttl(&mut self, key: impl AsRef<[u8]>) -> ClientResult<Ttl> {
        let reply = self.command(&[&b"TTL"[..], key.as_ref()]).await?;
        Ok(Ttl::from_reply_secs(integer(reply)?))
    }

    /// All live keys, sorted.
    pub async fn keys(&mut self) -> ClientResult<Vec<String>> {
        match self.command(&["KEYS"]).await? {
            RespValue::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    RespValue::BulkString(data) => {
                        Ok(String::from_utf8_lossy(&data).into_owned())
                    }
                    got => Err(ClientError::WrongType {
                        expected: "bulk string",
                        got,
                    }),
                })
                .collect(),
            got => Err(ClientError::WrongType {
                expected: "array",
                got,
            }),
        }
    }

    pub async fn flush_db(&mut self) -> ClientResult<()> {
        let reply = self.command(&["FLUSHDB"]).await?;
        expect_ok(reply)
    }

    /// Shuts down the write half and drops the connection.
    pub async fn close(mut self) -> ClientResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

fn simple_string(reply: RespValue) -> ClientResult<String> {
    match reply {
        RespValue::SimpleString(s) => Ok(s),
        got => Err(ClientError::WrongType {
            expected: "simple string",
            got,
        }),
    }
}

fn expect_ok(reply: RespValue) -> ClientResult<()> {
    match reply {
        RespValue::SimpleString(ref s) if s == "OK" => Ok(()),
        got => Err(ClientError::WrongType {
            expected: "+OK",
            got,
        }),
    }
}

fn integer(reply: RespValue) -> ClientResult<i64> {
    match reply {
        RespValue::Integer(n) => Ok(n),
        got => Err(ClientError::WrongType {
            expected: "integer",
            got,
        }),
    }
}
