//! # RESP2 Server Codec
//!
//! Incremental command parser over a `BytesMut` read buffer plus reply
//! encoders.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: A partial frame leaves the buffer untouched
//!    and yields `Ok(None)`; the caller reads more bytes and tries again.
//! 2. **Bounded Frames**: Oversized lengths are rejected before any
//!    allocation.
//! 3. **Pre-Encoded Replies**: Handlers return ready-to-write byte vectors.

use bytes::BytesMut;

/// Largest bulk argument accepted (512 MiB, as in Redis).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest argument count accepted in one command.
pub const MAX_ARGS: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespError {
    /// Malformed framing; the connection should be closed.
    Protocol,
}

/// Stateless parser for client commands.
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        RespParser
    }

    /// Takes one complete command off the front of `buffer`.
    ///
    /// Accepts multibulk arrays and inline commands (`PING\r\n`).
    pub fn parse(&mut self, buffer: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        if buffer.is_empty() {
            return Ok(None);
        }
        let parsed = if buffer[0] == b'*' {
            parse_multibulk(buffer)?
        } else {
            parse_inline(buffer)
        };
        Ok(parsed.map(|(args, consumed)| {
            let _ = buffer.split_to(consumed);
            args
        }))
    }
}

fn parse_multibulk(buf: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>, RespError> {
    let Some((line, mut pos)) = read_line(buf, 1) else {
        return Ok(None);
    };
    let count = parse_len(line, MAX_ARGS)?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        if pos >= buf.len() {
            return Ok(None);
        }
        if buf[pos] != b'$' {
            return Err(RespError::Protocol);
        }
        let Some((line, next)) = read_line(buf, pos + 1) else {
            return Ok(None);
        };
        let len = parse_len(line, MAX_BULK_LEN)?;
        let end = next + len;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(RespError::Protocol);
        }
        args.push(buf[next..end].to_vec());
        pos = end + 2;
    }
    Ok(Some((args, pos)))
}

fn parse_inline(buf: &[u8]) -> Option<(Vec<Vec<u8>>, usize)> {
    let (line, consumed) = read_line(buf, 0)?;
    let args = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|word| !word.is_empty())
        .map(<[u8]>::to_vec)
        .collect();
    Some((args, consumed))
}

/// Line starting at `start`, without its CRLF, and the index after it.
fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(start..)?;
    let idx = rest.windows(2).position(|pair| pair == b"\r\n")?;
    Some((&rest[..idx], start + idx + 2))
}

fn parse_len(line: &[u8], max: usize) -> Result<usize, RespError> {
    let text = std::str::from_utf8(line).map_err(|_| RespError::Protocol)?;
    let value = text.parse::<usize>().map_err(|_| RespError::Protocol)?;
    if value > max {
        return Err(RespError::Protocol);
    }
    Ok(value)
}

// ============================================================================
// REPLY ENCODERS
// ============================================================================

pub fn resp_simple(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.push(b'+');
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

/// Error reply; `message` carries its own prefix (`ERR`, `MOVED`, ...).
pub fn resp_error(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 3);
    buf.push(b'-');
    buf.extend_from_slice(message.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_integer(value: i64) -> Vec<u8> {
    format!(":{value}\r\n").into_bytes()
}

pub fn resp_bulk(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len() + 16);
    buf.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

pub fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

pub fn resp_null_array() -> Vec<u8> {
    b"*-1\r\n".to_vec()
}

/// Array of already-encoded elements.
pub fn resp_array(items: Vec<Vec<u8>>) -> Vec<u8> {
    let mut buf = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        buf.extend_from_slice(&item);
    }
    buf
}
