use crate::protocol::RespValue;
use thiserror::Error;

/// A command that was framed correctly but cannot be executed.
///
/// These never touch the store and never close the connection; they are
/// sent back as error replies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    /// Non-numeric, non-positive or out-of-range TTL
    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(&'static str),
}

impl From<CommandError> for RespValue {
    fn from(err: CommandError) -> Self {
        RespValue::Error(err.to_string())
    }
}
