//! RESP Frame Decoder
//!
//! Two decoders share the same line handling:
//!
//! - [`RespParser::parse_command`] is what the server runs. It accepts only
//!   request frames (`*<n>\r\n` followed by `n` bulk strings) and returns the
//!   ordered argument list.
//! - [`RespParser::parse`] decodes any reply value. The client uses it.
//!
//! Both work on a buffer that may hold a partial frame:
//! - `Ok(Some((value, consumed)))` - a complete frame, `consumed` bytes long
//! - `Ok(None)` - incomplete, read more and retry
//! - `Err(..)` - the bytes are malformed
//!
//! ## Resynchronising after a framing error
//!
//! A [`FrameError`] carries `discard`: the number of bytes, counted from the
//! start of the buffer, that belong to the malformed frame. That is the
//! frame start through the end of the offending line. For a bulk payload
//! with no CRLF right after it, that is the line the payload ran into.
//! Dropping exactly that many bytes leaves the next frame at the head of
//! the buffer. Blank lines between frames are skipped without an error.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while decoding a frame.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// A header line started with the wrong type byte
    #[error("expected '{}', got {}", show_char(.expected), show_byte(.found))]
    UnexpectedByte { expected: u8, found: u8 },

    /// Unknown type prefix byte in a reply
    #[error("unknown type prefix: {}", show_byte(.0))]
    UnknownPrefix(u8),

    /// A length or integer field did not parse
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, etc.)
    #[error("{0}")]
    ProtocolError(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// A framing error together with how many bytes to drop to get past it.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{error}")]
pub struct FrameError {
    pub error: ParseError,
    pub discard: usize,
}

impl FrameError {
    fn new(error: ParseError, discard: usize) -> Self {
        Self { error, discard }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements in one array
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Longest header line we will wait on before giving up on it
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Maximum array nesting depth when decoding replies
pub const MAX_NESTING_DEPTH: usize = 32;

/// A RESP decoder.
///
/// # Example
///
/// ```
/// use gedis::protocol::RespParser;
///
/// let mut parser = RespParser::new();
/// let buf = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
/// let (args, consumed) = parser.parse_command(buf).unwrap().unwrap();
/// assert_eq!(args, vec!["GET", "name"]);
/// assert_eq!(consumed, buf.len());
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    /// Current nesting depth (for reply arrays)
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Decodes one request frame into its argument list.
    ///
    /// A null bulk string (`$-1`) decodes to an empty argument. Blank lines
    /// between frames are consumed as an empty argument list.
    pub fn parse_command(
        &mut self,
        buf: &[u8],
    ) -> Result<Option<(Vec<Bytes>, usize)>, FrameError> {
        let blank = leading_blank_lines(buf);
        if blank > 0 {
            return Ok(Some((Vec::new(), blank)));
        }

        let (header, mut pos) = match read_line(buf, 0)? {
            Some(line) => line,
            None => return Ok(None),
        };

        if header[0] != prefix::ARRAY {
            return Err(FrameError::new(
                ParseError::UnexpectedByte {
                    expected: prefix::ARRAY,
                    found: header[0],
                },
                pos,
            ));
        }

        let count = parse_int(&header[1..]).map_err(|e| FrameError::new(e, pos))?;
        if count < 0 {
            return Err(FrameError::new(ParseError::InvalidArrayLength(count), pos));
        }
        let count = count as usize;
        if count > MAX_ARRAY_LEN {
            return Err(FrameError::new(
                ParseError::MessageTooLarge {
                    size: count,
                    max: MAX_ARRAY_LEN,
                },
                pos,
            ));
        }

        let mut args = Vec::with_capacity(count.min(64));

        for _ in 0..count {
            let (line, data_start) = match read_line(buf, pos)? {
                Some(line) => line,
                None => return Ok(None),
            };

            if line[0] != prefix::BULK_STRING {
                return Err(FrameError::new(
                    ParseError::UnexpectedByte {
                        expected: prefix::BULK_STRING,
                        found: line[0],
                    },
                    data_start,
                ));
            }

            let length = parse_int(&line[1..]).map_err(|e| FrameError::new(e, data_start))?;

            if length == -1 {
                args.push(Bytes::new());
                pos = data_start;
                continue;
            }
            if length < 0 {
                return Err(FrameError::new(
                    ParseError::InvalidBulkLength(length),
                    data_start,
                ));
            }
            let length = length as usize;
            if length > MAX_BULK_SIZE {
                return Err(FrameError::new(
                    ParseError::MessageTooLarge {
                        size: length,
                        max: MAX_BULK_SIZE,
                    },
                    data_start,
                ));
            }

            let data_end = data_start + length;
            if buf.len() < data_end + CRLF.len() {
                return Ok(None);
            }
            if &buf[data_end..data_end + CRLF.len()] != CRLF {
                // Drop through the end of the line the payload overran. The
                // payload may have swallowed the CR of that line's ending.
                let from = if length > 0 { data_end - 1 } else { data_end };
                let discard = match find_crlf(&buf[from..]) {
                    Some(i) => from + i + CRLF.len(),
                    None if buf.len() - from > MAX_LINE_LEN => buf.len(),
                    None => return Ok(None),
                };
                return Err(FrameError::new(
                    ParseError::ProtocolError("bulk string missing trailing CRLF".to_string()),
                    discard,
                ));
            }

            args.push(Bytes::copy_from_slice(&buf[data_start..data_end]));
            pos = data_end + CRLF.len();
        }

        Ok(Some((args, pos)))
    }

    /// Decodes one reply value.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        let (line, consumed) = match read_line(buf, 0).map_err(|e| e.error)? {
            Some(line) => line,
            None => return Ok(None),
        };
        let body = &line[1..];

        match line[0] {
            prefix::SIMPLE_STRING => Ok(Some((RespValue::SimpleString(utf8(body)?), consumed))),
            prefix::ERROR => Ok(Some((RespValue::Error(utf8(body)?), consumed))),
            prefix::INTEGER => Ok(Some((RespValue::Integer(parse_int(body)?), consumed))),
            prefix::BULK_STRING => parse_bulk_reply(buf, body, consumed),
            prefix::ARRAY => self.parse_array_reply(buf, body, consumed),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    fn parse_array_reply(
        &mut self,
        buf: &[u8],
        header: &[u8],
        mut consumed: usize,
    ) -> ParseResult<Option<(RespValue, usize)>> {
        let count = parse_int(header)?;

        // Null array
        if count == -1 {
            return Ok(Some((RespValue::Null, consumed)));
        }
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }
        let count = count as usize;
        if count > MAX_ARRAY_LEN {
            return Err(ParseError::MessageTooLarge {
                size: count,
                max: MAX_ARRAY_LEN,
            });
        }

        let mut elements = Vec::with_capacity(count.min(64));

        self.depth += 1;
        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => {
                    self.depth -= 1;
                    return Ok(None);
                }
            }
        }
        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

fn parse_bulk_reply(
    buf: &[u8],
    header: &[u8],
    data_start: usize,
) -> ParseResult<Option<(RespValue, usize)>> {
    let length = parse_int(header)?;

    if length == -1 {
        return Ok(Some((RespValue::Null, data_start)));
    }
    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }
    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let data_end = data_start + length;
    if buf.len() < data_end + CRLF.len() {
        return Ok(None);
    }
    if &buf[data_end..data_end + CRLF.len()] != CRLF {
        return Err(ParseError::ProtocolError(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_end]);
    Ok(Some((RespValue::BulkString(data), data_end + CRLF.len())))
}

/// Reads the CRLF-terminated line starting at `start`.
///
/// Returns the line without its terminator and the offset just past the
/// CRLF. A line with no type byte is a protocol error; so is a partial line
/// that has already grown past [`MAX_LINE_LEN`], in which case everything
/// buffered is discarded.
fn read_line(buf: &[u8], start: usize) -> Result<Option<(&[u8], usize)>, FrameError> {
    let rest = &buf[start.min(buf.len())..];
    match find_crlf(rest) {
        Some(0) => Err(FrameError::new(
            ParseError::ProtocolError("empty line".to_string()),
            start + CRLF.len(),
        )),
        Some(pos) => Ok(Some((&rest[..pos], start + pos + CRLF.len()))),
        None if rest.len() > MAX_LINE_LEN => Err(FrameError::new(
            ParseError::ProtocolError("line too long".to_string()),
            buf.len(),
        )),
        None => Ok(None),
    }
}

/// Length of the run of bare CRLFs at the start of `buf`.
fn leading_blank_lines(buf: &[u8]) -> usize {
    buf.chunks_exact(CRLF.len())
        .take_while(|pair| *pair == CRLF)
        .count()
        * CRLF.len()
}

/// Finds the position of CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

fn parse_int(digits: &[u8]) -> ParseResult<i64> {
    let s = std::str::from_utf8(digits).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    s.parse::<i64>()
        .map_err(|_| ParseError::InvalidInteger(s.to_string()))
}

fn utf8(bytes: &[u8]) -> ParseResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

fn show_char(b: &u8) -> char {
    char::from(*b)
}

fn show_byte(b: &u8) -> String {
    if b.is_ascii_graphic() || *b == b' ' {
        format!("'{}'", char::from(*b))
    } else {
        format!("{:#04x}", b)
    }
}

/// Decodes a single reply from a complete buffer.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::encode_command;

    fn command(buf: &[u8]) -> Result<Option<(Vec<Bytes>, usize)>, FrameError> {
        RespParser::new().parse_command(buf)
    }

    #[test]
    fn test_parse_ping_command() {
        let (args, consumed) = command(b"*1\r\n$4\r\nPING\r\n").unwrap().unwrap();
        assert_eq!(args, vec![Bytes::from("PING")]);
        assert_eq!(consumed, 14);
    }

    #[test]
    fn test_parse_set_command() {
        let input = b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$4\r\nAriz\r\n";
        let (args, consumed) = command(input).unwrap().unwrap();
        assert_eq!(args, vec!["SET", "user:101", "Ariz"]);
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_parse_command_consumes_exactly_one_frame() {
        let input = b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n";
        let (_, consumed) = command(input).unwrap().unwrap();
        assert_eq!(consumed, 14);
    }

    #[test]
    fn test_parse_empty_and_null_arguments() {
        let (args, _) = command(b"*3\r\n$3\r\nSET\r\n$0\r\n\r\n$-1\r\n").unwrap().unwrap();
        assert_eq!(args, vec![Bytes::from("SET"), Bytes::new(), Bytes::new()]);
    }

    #[test]
    fn test_parse_zero_argument_frame() {
        let (args, consumed) = command(b"*0\r\n").unwrap().unwrap();
        assert!(args.is_empty());
        assert_eq!(consumed, 4);
    }

    #[test]
    fn test_parse_binary_safe_argument() {
        let (args, _) = command(b"*1\r\n$5\r\nhe\r\n\x00\r\n").unwrap().unwrap();
        assert_eq!(args[0], Bytes::from_static(b"he\r\n\x00"));
    }

    #[test]
    fn test_parse_command_incomplete() {
        assert!(command(b"").unwrap().is_none());
        assert!(command(b"*2").unwrap().is_none());
        assert!(command(b"*2\r\n$3\r\nGET\r\n").unwrap().is_none());
        assert!(command(b"*2\r\n$3\r\nGET\r\n$4\r\nna").unwrap().is_none());
        assert!(command(b"*1\r\n$4\r\nPING").unwrap().is_none());
    }

    #[test]
    fn test_wrong_frame_prefix() {
        let err = command(b"hello\r\n*1\r\n$4\r\nPING\r\n").unwrap_err();
        assert_eq!(
            err.error,
            ParseError::UnexpectedByte {
                expected: b'*',
                found: b'h'
            }
        );
        assert_eq!(err.discard, 7);
        assert_eq!(err.to_string(), "expected '*', got 'h'");
    }

    #[test]
    fn test_wrong_element_prefix() {
        let input = b"*2\r\n$3\r\nGET\r\n:12\r\n";
        let err = command(input).unwrap_err();
        assert_eq!(
            err.error,
            ParseError::UnexpectedByte {
                expected: b'$',
                found: b':'
            }
        );
        assert_eq!(err.discard, input.len());
    }

    #[test]
    fn test_negative_array_length() {
        let err = command(b"*-1\r\n").unwrap_err();
        assert_eq!(err.error, ParseError::InvalidArrayLength(-1));
        assert_eq!(err.discard, 5);
    }

    #[test]
    fn test_non_numeric_length_discards_only_the_bad_line() {
        let input = b"*x\r\n*1\r\n$4\r\nPING\r\n";
        let err = command(input).unwrap_err();
        assert!(matches!(err.error, ParseError::InvalidInteger(_)));
        assert_eq!(err.discard, 4);

        let (args, _) = command(&input[err.discard..]).unwrap().unwrap();
        assert_eq!(args, vec!["PING"]);
    }

    #[test]
    fn test_bad_bulk_length() {
        let err = command(b"*1\r\n$-5\r\n").unwrap_err();
        assert_eq!(err.error, ParseError::InvalidBulkLength(-5));
        assert_eq!(err.discard, 9);

        let err = command(b"*1\r\n$abc\r\n").unwrap_err();
        assert!(matches!(err.error, ParseError::InvalidInteger(_)));
    }

    #[test]
    fn test_oversized_bulk_length() {
        let input = format!("*1\r\n${}\r\n", MAX_BULK_SIZE + 1);
        let err = command(input.as_bytes()).unwrap_err();
        assert!(matches!(err.error, ParseError::MessageTooLarge { .. }));
        assert_eq!(err.discard, input.len());
    }

    fn assert_resyncs_after(bad: &[u8]) {
        let mut input = bad.to_vec();
        input.extend_from_slice(b"*1\r\n$4\r\nPING\r\n");

        let err = command(&input).unwrap_err();
        assert!(matches!(err.error, ParseError::ProtocolError(_)));
        assert_eq!(err.discard, bad.len());

        let (args, consumed) = command(&input[err.discard..]).unwrap().unwrap();
        assert_eq!(args, vec!["PING"]);
        assert_eq!(err.discard + consumed, input.len());
    }

    #[test]
    fn test_bulk_missing_trailing_crlf() {
        // Payload longer than declared
        assert_resyncs_after(b"*1\r\n$3\r\nGETX\r\n");
        assert_resyncs_after(b"*1\r\n$4\r\nPINGxx\r\n");
        assert_resyncs_after(b"*1\r\n$3\r\nPINGX\r\n");
        // Shorter than declared, ending on the line's CR
        assert_resyncs_after(b"*1\r\n$4\r\nGET\r\n");
        // Shorter than declared, running into the following line
        assert_resyncs_after(b"*2\r\n$3\r\nGET\r\n$5\r\nkey\r\nab\r\n");
    }

    #[test]
    fn test_bulk_missing_trailing_crlf_waits_for_line_end() {
        assert!(command(b"*1\r\n$3\r\nGETXY").unwrap().is_none());
    }

    #[test]
    fn test_blank_lines_between_frames() {
        let input = b"\r\n\r\n*1\r\n$4\r\nPING\r\n";
        let (args, consumed) = command(input).unwrap().unwrap();
        assert!(args.is_empty());
        assert_eq!(consumed, 4);

        let (args, _) = command(&input[consumed..]).unwrap().unwrap();
        assert_eq!(args, vec!["PING"]);

        // A lone CR is not a blank line yet
        assert!(command(b"\r").unwrap().is_none());
    }

    #[test]
    fn test_overlong_line_is_dropped() {
        let input = vec![b'a'; MAX_LINE_LEN + 1];
        let err = command(&input).unwrap_err();
        assert_eq!(err.discard, input.len());
    }

    #[test]
    fn test_command_roundtrip() {
        let args: Vec<&[u8]> = vec![b"SET", b"", b"\x00\xff\r\n", b"value"];
        let mut buf: Vec<u8> = Vec::new();
        encode_command(&args, &mut buf);

        let (decoded, consumed) = command(&buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, args);
    }

    #[test]
    fn test_parse_simple_string_reply() {
        let (value, consumed) = parse_message(b"+OK\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::SimpleString("OK".to_string()));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_parse_error_reply() {
        let (value, _) = parse_message(b"-ERR unknown command\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Error("ERR unknown command".to_string()));
    }

    #[test]
    fn test_parse_integer_reply() {
        let (value, _) = parse_message(b":-2\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Integer(-2));
        assert!(matches!(
            parse_message(b":nope\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
    }

    #[test]
    fn test_parse_bulk_replies() {
        let (value, consumed) = parse_message(b"$5\r\nhello\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(Bytes::from("hello")));
        assert_eq!(consumed, 11);

        let (value, _) = parse_message(b"$0\r\n\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(Bytes::new()));

        let (value, consumed) = parse_message(b"$-1\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Null);
        assert_eq!(consumed, 5);

        assert!(parse_message(b"$5\r\nhel").unwrap().is_none());
    }

    #[test]
    fn test_parse_array_reply() {
        let (value, _) = parse_message(b"*2\r\n$1\r\na\r\n$1\r\nb\r\n").unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::Array(vec![
                RespValue::BulkString(Bytes::from("a")),
                RespValue::BulkString(Bytes::from("b")),
            ])
        );
        assert!(parse_message(b"*2\r\n$1\r\na\r\n").unwrap().is_none());
    }

    #[test]
    fn test_unknown_reply_prefix() {
        assert_eq!(
            parse_message(b"@what\r\n"),
            Err(ParseError::UnknownPrefix(b'@'))
        );
    }

    #[test]
    fn test_reply_roundtrip() {
        let original = RespValue::array(vec![
            RespValue::bulk_string(Bytes::from("k1")),
            RespValue::bulk_string(Bytes::new()),
        ]);
        let serialized = original.serialize();
        let (parsed, consumed) = parse_message(&serialized).unwrap().unwrap();
        assert_eq!(parsed, original);
        assert_eq!(consumed, serialized.len());
    }
}
