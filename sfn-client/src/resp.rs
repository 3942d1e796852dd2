//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server responses straight out of
//! the connection's read buffer, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: A partial frame yields `Ok(None)` and leaves the
//!    buffer untouched so the caller can read more bytes and retry.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use bytes::{Buf, BytesMut};

use crate::client::{ClientError, ClientResult};

/// RESP response value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style responses.
    Simple(Vec<u8>),
    /// -ERR ... responses.
    Error(Vec<u8>),
    /// :123 responses.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays (KEYS replies).
    Array(Vec<RespValue>),
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Decodes one complete RESP value from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a full frame. On
/// success the consumed bytes are removed from the buffer.
pub fn decode_response(buf: &mut BytesMut) -> ClientResult<Option<RespValue>> {
    match parse_value(&buf[..], 0)? {
        Some((value, end)) => {
            buf.advance(end);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn parse_value(buf: &[u8], pos: usize) -> ClientResult<Option<(RespValue, usize)>> {
    let (line, next) = match read_line(buf, pos)? {
        Some(found) => found,
        None => return Ok(None),
    };
    if line.is_empty() {
        return Err(ClientError::Protocol);
    }

    match line[0] {
        b'+' => Ok(Some((RespValue::Simple(line[1..].to_vec()), next))),
        b'-' => Ok(Some((RespValue::Error(line[1..].to_vec()), next))),
        b':' => Ok(Some((RespValue::Integer(parse_i64(&line[1..])?), next))),
        b'$' => {
            let len = parse_i64(&line[1..])?;
            parse_bulk(buf, len, next)
        }
        b'*' => {
            let len = parse_i64(&line[1..])?;
            parse_array(buf, len, next)
        }
        _ => Err(ClientError::Protocol),
    }
}

fn parse_bulk(buf: &[u8], len: i64, start: usize) -> ClientResult<Option<(RespValue, usize)>> {
    if len < 0 {
        return Ok(Some((RespValue::Bulk(None), start)));
    }
    let end = match usize::try_from(len).ok().and_then(|len| start.checked_add(len)) {
        Some(end) if end <= usize::MAX - 2 => end,
        _ => return Err(ClientError::Protocol),
    };
    if buf.len() < end + 2 {
        return Ok(None);
    }
    if buf[end..end + 2] != [b'\r', b'\n'] {
        return Err(ClientError::Protocol);
    }
    Ok(Some((RespValue::Bulk(Some(buf[start..end].to_vec())), end + 2)))
}

fn parse_array(buf: &[u8], len: i64, start: usize) -> ClientResult<Option<(RespValue, usize)>> {
    if len <= 0 {
        return Ok(Some((RespValue::Array(Vec::new()), start)));
    }

    // The smallest element frame (`:0\r\n`) is 4 bytes; never reserve for more
    // elements than the buffered bytes can hold.
    let buffered = buf.len().saturating_sub(start) / 4;
    let mut items = Vec::with_capacity(usize::try_from(len).unwrap_or(usize::MAX).min(buffered));
    let mut cursor = start;
    for _ in 0..len {
        match parse_value(buf, cursor)? {
            Some((item, next)) => {
                items.push(item);
                cursor = next;
            }
            None => return Ok(None),
        }
    }
    Ok(Some((RespValue::Array(items), cursor)))
}

/// Finds the CRLF-terminated line starting at `pos`.
///
/// Returns the line without its terminator and the offset just past it.
fn read_line(buf: &[u8], pos: usize) -> ClientResult<Option<(&[u8], usize)>> {
    let rest = &buf[pos..];
    let idx = match rest.iter().position(|&b| b == b'\n') {
        Some(idx) => idx,
        None => return Ok(None),
    };
    if idx == 0 || rest[idx - 1] != b'\r' {
        return Err(ClientError::Protocol);
    }
    Ok(Some((&rest[..idx - 1], pos + idx + 1)))
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    if data.is_empty() {
        return Err(ClientError::Protocol);
    }
    let mut negative = false;
    let mut idx = 0;
    if data[0] == b'-' {
        negative = true;
        idx = 1;
    }

    let mut value: i64 = 0;
    while idx < data.len() {
        let b = data[idx];
        if !b.is_ascii_digit() {
            return Err(ClientError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
        idx += 1;
    }

    if negative {
        Ok(-value)
    } else {
        Ok(value)
    }
}

fn push_usize(out: &mut Vec<u8>, value: usize) {
    let (buf, len) = encode_u64(value as u64);
    out.extend_from_slice(&buf[..len]);
}

/// Formats an integer argument into a stack buffer.
///
/// Returns the buffer and the number of valid leading bytes.
pub fn encode_u64(mut value: u64) -> ([u8; 20], usize) {
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        return (buf, 1);
    }
    while value > 0 {
        buf[len] = b'0' + (value % 10) as u8;
        value /= 10;
        len += 1;
    }
    buf[..len].reverse();
    (buf, len)
}
