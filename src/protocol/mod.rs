//! RESP Protocol Codec
//!
//! Pure framing logic, with no knowledge of commands or storage.
//!
//! ## Modules
//!
//! - `types`: the `RespValue` reply union and its encoder
//! - `parser`: request-frame and reply decoders
//!
//! ## Example
//!
//! ```
//! use gedis::protocol::{RespParser, RespValue};
//! use bytes::Bytes;
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (args, consumed) = RespParser::new().parse_command(data).unwrap().unwrap();
//! assert_eq!(args.len(), 2);
//! assert_eq!(consumed, data.len());
//!
//! let reply = RespValue::bulk_string(Bytes::from("Ariz"));
//! assert_eq!(reply.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, FrameError, ParseError, ParseResult, RespParser};
pub use types::{encode_command, RespValue};
