//! Command Dispatcher
//!
//! Turns a decoded argument list into a store operation and projects the
//! result onto a reply value.
//!
//! ```text
//! [name, args...] ─> arity check ─> Store op ─> RespValue
//!                         │
//!                         └─> CommandError ─> RespValue::Error
//! ```
//!
//! ## Supported Commands
//!
//! | Command               | Arity | Reply                          |
//! |-----------------------|-------|--------------------------------|
//! | `PING`                | 0     | `+PONG`                        |
//! | `SET key value`       | 2     | `+OK`                          |
//! | `GET key`             | 1     | bulk string or null            |
//! | `SETEX key secs value`| 3     | `+OK`                          |
//! | `DEL key [key ...]`   | >= 1  | integer: keys removed          |
//! | `EXPIRE key secs`     | 2     | integer `1` / `0`              |
//! | `TTL key`             | 1     | integer secs, `-1`, `-2`       |
//! | `KEYS`                | 0     | array of bulk strings          |
//! | `FLUSHDB`             | 0     | `+OK`                          |
//!
//! Command names are case-insensitive.

use crate::commands::CommandError;
use crate::protocol::RespValue;
use crate::storage::{Store, MAX_TTL};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

enum Arity {
    Exact(usize),
    AtLeast(usize),
}

/// Executes commands against a shared store.
///
/// Cheap to clone; every connection gets its own copy.
#[derive(Clone)]
pub struct CommandDispatcher {
    store: Arc<Store>,
}

impl CommandDispatcher {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Executes one decoded frame.
    ///
    /// Returns `None` for a frame with no arguments: such frames get no
    /// reply at all.
    pub fn execute(&self, frame: &[Bytes]) -> Option<RespValue> {
        let (name, args) = frame.split_first()?;
        let name = String::from_utf8_lossy(name);

        trace!(command = %name, args = args.len(), "Dispatching command");

        let reply = match self.dispatch(&name, args) {
            Ok(reply) => reply,
            Err(err) => err.into(),
        };
        Some(reply)
    }

    fn dispatch(&self, name: &str, args: &[Bytes]) -> Result<RespValue, CommandError> {
        match name.to_ascii_uppercase().as_str() {
            "PING" => self.cmd_ping(args),
            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            "SETEX" => self.cmd_setex(args),
            "DEL" => self.cmd_del(args),
            "EXPIRE" => self.cmd_expire(args),
            "TTL" => self.cmd_ttl(args),
            "KEYS" => self.cmd_keys(args),
            "FLUSHDB" => self.cmd_flushdb(args),
            _ => Err(CommandError::UnknownCommand(name.to_string())),
        }
    }

    /// PING
    fn cmd_ping(&self, args: &[Bytes]) -> Result<RespValue, CommandError> {
        check_arity("ping", args, Arity::Exact(0))?;
        Ok(RespValue::pong())
    }

    /// SET key value
    fn cmd_set(&self, args: &[Bytes]) -> Result<RespValue, CommandError> {
        check_arity("set", args, Arity::Exact(2))?;
        self.store.set(args[0].clone(), args[1].clone());
        Ok(RespValue::ok())
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> Result<RespValue, CommandError> {
        check_arity("get", args, Arity::Exact(1))?;
        Ok(match self.store.get(&args[0]) {
            Some(value) => RespValue::bulk_string(value),
            None => RespValue::null(),
        })
    }

    /// SETEX key seconds value
    fn cmd_setex(&self, args: &[Bytes]) -> Result<RespValue, CommandError> {
        check_arity("setex", args, Arity::Exact(3))?;
        let ttl = parse_ttl("setex", &args[1])?;
        self.store.set_ex(args[0].clone(), args[2].clone(), ttl);
        Ok(RespValue::ok())
    }

    /// DEL key [key ...]
    fn cmd_del(&self, args: &[Bytes]) -> Result<RespValue, CommandError> {
        check_arity("del", args, Arity::AtLeast(1))?;
        let deleted = self.store.del(args);
        Ok(RespValue::integer(deleted as i64))
    }

    /// EXPIRE key seconds
    fn cmd_expire(&self, args: &[Bytes]) -> Result<RespValue, CommandError> {
        check_arity("expire", args, Arity::Exact(2))?;
        let ttl = parse_ttl("expire", &args[1])?;
        let set = self.store.expire(&args[0], ttl);
        Ok(RespValue::integer(i64::from(set)))
    }

    /// TTL key
    fn cmd_ttl(&self, args: &[Bytes]) -> Result<RespValue, CommandError> {
        check_arity("ttl", args, Arity::Exact(1))?;
        Ok(RespValue::integer(self.store.ttl(&args[0]).to_reply_secs()))
    }

    /// KEYS
    fn cmd_keys(&self, args: &[Bytes]) -> Result<RespValue, CommandError> {
        check_arity("keys", args, Arity::Exact(0))?;
        let keys = self
            .store
            .keys()
            .into_iter()
            .map(RespValue::bulk_string)
            .collect();
        Ok(RespValue::array(keys))
    }

    /// FLUSHDB
    fn cmd_flushdb(&self, args: &[Bytes]) -> Result<RespValue, CommandError> {
        check_arity("flushdb", args, Arity::Exact(0))?;
        self.store.flush_db();
        Ok(RespValue::ok())
    }
}

fn check_arity(cmd: &'static str, args: &[Bytes], arity: Arity) -> Result<(), CommandError> {
    let ok = match arity {
        Arity::Exact(n) => args.len() == n,
        Arity::AtLeast(n) => args.len() >= n,
    };
    if ok {
        Ok(())
    } else {
        Err(CommandError::WrongArity(cmd))
    }
}

/// Parses a TTL argument: a positive whole number of seconds.
fn parse_ttl(cmd: &'static str, arg: &[u8]) -> Result<Duration, CommandError> {
    let secs = std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(CommandError::InvalidExpireTime(cmd))?;

    if secs <= 0 || secs as u64 > MAX_TTL.as_secs() {
        return Err(CommandError::InvalidExpireTime(cmd));
    }
    Ok(Duration::from_secs(secs as u64))
}
