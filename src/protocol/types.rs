//! RESP Reply Types
//!
//! The values the wire protocol can carry back to a client, plus the
//! encoder that turns them into bytes.
//!
//! ## Protocol Format
//!
//! Each reply starts with a type prefix byte and ends with CRLF:
//! - `+` Simple String: `+OK\r\n`
//! - `-` Error: `-ERR unknown command 'FOO'\r\n`
//! - `:` Integer: `:1000\r\n`
//! - `$` Bulk String: `$5\r\nhello\r\n`
//! - `$-1` Null: `$-1\r\n`
//! - `*` Array (only used for `KEYS`): `*1\r\n$4\r\nname\r\n`
//!
//! An empty bulk string (`$0\r\n\r\n`) and null (`$-1\r\n`) are different
//! values and are never folded into each other.

use bytes::{BufMut, Bytes};
use std::fmt;

pub const CRLF: &[u8] = b"\r\n";

/// Type bytes that open every RESP line.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A reply value.
///
/// The store's richer results (bools, durations, counts) are projected into
/// this union by the dispatcher before they reach the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Non-binary-safe status text. Must not contain CRLF.
    SimpleString(String),

    /// Error message, conventionally starting with an upper-case code (`ERR`).
    Error(String),

    Integer(i64),

    /// Binary-safe, length-prefixed payload. May be empty.
    BulkString(Bytes),

    /// Null bulk string.
    Null,

    Array(Vec<RespValue>),
}

impl RespValue {
    /// # Example
    /// ```
    /// use gedis::protocol::RespValue;
    /// assert_eq!(RespValue::simple_string("OK").serialize(), b"+OK\r\n");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        Self::SimpleString(s.into())
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error(msg.into())
    }

    pub fn integer(n: i64) -> Self {
        Self::Integer(n)
    }

    /// # Example
    /// ```
    /// use gedis::protocol::RespValue;
    /// use bytes::Bytes;
    /// let bulk = RespValue::bulk_string(Bytes::from("hello"));
    /// assert_eq!(bulk.serialize(), b"$5\r\nhello\r\n");
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        Self::BulkString(data.into())
    }

    pub fn null() -> Self {
        Self::Null
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        Self::Array(items)
    }

    /// `+OK`
    pub fn ok() -> Self {
        Self::simple_string("OK")
    }

    /// `+PONG`
    pub fn pong() -> Self {
        Self::simple_string("PONG")
    }

    /// Encodes the value into a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_into(&mut out);
        out
    }

    /// Appends the encoded value to `out`.
    ///
    /// Encoding is total: every value produces exactly one well-formed frame.
    pub fn serialize_into<B: BufMut>(&self, out: &mut B) {
        match self {
            Self::SimpleString(text) => put_line(out, prefix::SIMPLE_STRING, text.as_bytes()),
            Self::Error(msg) => put_line(out, prefix::ERROR, msg.as_bytes()),
            Self::Integer(n) => put_line(out, prefix::INTEGER, n.to_string().as_bytes()),
            Self::BulkString(data) => put_bulk(out, data),
            Self::Null => put_line(out, prefix::BULK_STRING, b"-1"),
            Self::Array(items) => {
                put_line(out, prefix::ARRAY, items.len().to_string().as_bytes());
                items.iter().for_each(|item| item.serialize_into(out));
            }
        }
    }
}

fn put_line<B: BufMut>(out: &mut B, type_byte: u8, body: &[u8]) {
    out.put_u8(type_byte);
    out.put_slice(body);
    out.put_slice(CRLF);
}

fn put_bulk<B: BufMut>(out: &mut B, data: &[u8]) {
    put_line(out, prefix::BULK_STRING, data.len().to_string().as_bytes());
    out.put_slice(data);
    out.put_slice(CRLF);
}

/// Renders a command as a request frame: an array of bulk strings.
///
/// This is the only frame shape the server accepts, so the client and the
/// tests build requests through here.
pub fn encode_command<A: AsRef<[u8]>, B: BufMut>(args: &[A], out: &mut B) {
    put_line(out, prefix::ARRAY, args.len().to_string().as_bytes());
    for arg in args {
        put_bulk(out, arg.as_ref());
    }
}

/// Human-readable rendering in the usual `redis-cli` style.
impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SimpleString(text) => f.write_str(text),
            Self::Error(msg) => write!(f, "(error) {}", msg),
            Self::Integer(n) => write!(f, "(integer) {}", n),
            Self::BulkString(data) => match std::str::from_utf8(data) {
                Ok(text) => write!(f, "{:?}", text),
                Err(_) => write!(f, "(binary, {} bytes)", data.len()),
            },
            Self::Null => f.write_str("(nil)"),
            Self::Array(items) if items.is_empty() => f.write_str("(empty array)"),
            Self::Array(items) => {
                let mut first = true;
                for (n, item) in (1..).zip(items) {
                    if !first {
                        f.write_str("\n")?;
                    }
                    first = false;
                    write!(f, "{}) {}", n, item)?;
                }
                Ok(())
            }
        }
    }
}
