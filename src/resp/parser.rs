//! Streaming RESP2 reply parser.
//!
//! [`resp_frame_len`] finds where one complete reply ends without
//! building anything; the connection reader uses it to cut frames off the
//! socket buffer. [`parse`] decodes one whole [`RespValue`].
//!
//! Both return `Err(Incomplete)` when more data is needed and
//! `Err(Protocol(…))` on malformed input. Bulk strings are extracted
//! zero-copy via `Bytes::slice`.

use crate::error::{Error, Result};
use crate::resp::types::RespValue;
use bytes::Bytes;
use memchr::memchr;

/// Maximum number of elements accepted in a single multibulk header.
///
/// Keeps a hostile count (e.g. `*2147483647\r\n`) from turning into a
/// multi-GB allocation before any element has arrived.
pub const MAX_RESP_ELEMENTS: usize = 16_777_216;

/// Maximum nesting depth for multibulk replies.
pub const MAX_PARSE_DEPTH: usize = 512;

/// Parse one RESP value from the front of `buf`.
///
/// Returns `(value, bytes_consumed)` on success.
pub fn parse(buf: &Bytes) -> Result<(RespValue, usize)> {
    parse_at(buf, 0)
}

/// Convenience wrapper: parse from a byte slice (copies into `Bytes` first).
pub fn parse_slice(buf: &[u8]) -> Result<(RespValue, usize)> {
    parse(&Bytes::copy_from_slice(buf))
}

/// Compute the byte length of one complete RESP frame at the front of `buf`
/// **without allocating** or building a `RespValue` tree.
pub fn resp_frame_len(buf: &[u8]) -> Result<usize> {
    frame_len_at(buf, 0)
}

fn frame_len_at(buf: &[u8], depth: usize) -> Result<usize> {
    if buf.is_empty() {
        return Err(Error::Incomplete);
    }
    match buf[0] {
        b'+' | b'-' | b':' => {
            let (_, next) = read_line(buf, 1)?;
            Ok(next)
        }
        b'$' => {
            let (line, next) = read_line(buf, 1)?;
            let len = parse_int_from_bytes(line)?;
            if len < 0 {
                return check_null(len, next);
            }
            let total = bulk_end(next, len)? + 2;
            if buf.len() < total {
                return Err(Error::Incomplete);
            }
            if &buf[total - 2..total] != b"\r\n" {
                return Err(Error::Protocol(
                    "bulk string not terminated by \\r\\n".into(),
                ));
            }
            Ok(total)
        }
        b'*' => {
            if depth >= MAX_PARSE_DEPTH {
                return Err(Error::Protocol(format!(
                    "multibulk nesting exceeds {MAX_PARSE_DEPTH} levels"
                )));
            }
            let (line, mut next) = read_line(buf, 1)?;
            let count = parse_int_from_bytes(line)?;
            if count < 0 {
                return check_null(count, next);
            }
            check_count(count)?;
            for _ in 0..count {
                next += frame_len_at(&buf[next..], depth + 1)?;
            }
            Ok(next)
        }
        other => Err(Error::Protocol(format!(
            "unknown RESP type byte: 0x{other:02x}"
        ))),
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Find the next `\r\n` in `buf` starting at `offset`.
/// Returns the index of `\r`.
#[inline]
fn find_crlf(buf: &[u8], offset: usize) -> Result<usize> {
    let search = buf.get(offset..).ok_or(Error::Incomplete)?;
    match memchr(b'\r', search) {
        Some(pos) => {
            let abs = offset + pos;
            if abs + 1 < buf.len() && buf[abs + 1] == b'\n' {
                Ok(abs)
            } else if abs + 1 >= buf.len() {
                Err(Error::Incomplete)
            } else {
                Err(Error::Protocol("expected \\n after \\r".into()))
            }
        }
        None => Err(Error::Incomplete),
    }
}

/// Read the line starting at `buf[offset]` up to `\r\n`.
/// Returns `(line_bytes, index_after_crlf)`.
#[inline]
pub(crate) fn read_line(buf: &[u8], offset: usize) -> Result<(&[u8], usize)> {
    let cr = find_crlf(buf, offset)?;
    Ok((&buf[offset..cr], cr + 2))
}

/// Parse an integer from a byte slice (no allocations).
pub(crate) fn parse_int_from_bytes(bytes: &[u8]) -> Result<i64> {
    if bytes.is_empty() {
        return Err(Error::Protocol("empty integer".into()));
    }
    let (negative, digits) = match bytes[0] {
        b'-' => (true, &bytes[1..]),
        b'+' => (false, &bytes[1..]),
        _ => (false, bytes),
    };

    if digits.is_empty() {
        return Err(Error::Protocol("integer has no digits".into()));
    }

    // Accumulate as negative so i64::MIN parses without overflow.
    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(Error::Protocol(format!("invalid byte in integer: 0x{b:02x}")));
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_sub((b - b'0') as i64))
            .ok_or_else(|| Error::Protocol("integer overflow".into()))?;
    }

    if negative {
        Ok(n)
    } else {
        n.checked_neg()
            .ok_or_else(|| Error::Protocol("integer overflow".into()))
    }
}

/// Only `-1` marks a null bulk / null multibulk.
#[inline]
fn check_null(len: i64, next: usize) -> Result<usize> {
    if len == -1 {
        Ok(next)
    } else {
        Err(Error::Protocol(format!("invalid negative length: {len}")))
    }
}

/// Index just past the payload of a bulk string starting at `next`.
#[inline]
pub(crate) fn bulk_end(next: usize, len: i64) -> Result<usize> {
    usize::try_from(len)
        .ok()
        .and_then(|len| next.checked_add(len))
        .filter(|end| end.checked_add(2).is_some())
        .ok_or_else(|| Error::Protocol(format!("invalid bulk length: {len}")))
}

#[inline]
pub(crate) fn check_count(count: i64) -> Result<()> {
    if count as u64 > MAX_RESP_ELEMENTS as u64 {
        return Err(Error::Protocol(format!(
            "multibulk count {count} exceeds limit of {MAX_RESP_ELEMENTS}"
        )));
    }
    Ok(())
}

// ── Value parsers ──────────────────────────────────────────────────

fn parse_at(buf: &Bytes, depth: usize) -> Result<(RespValue, usize)> {
    if buf.is_empty() {
        return Err(Error::Incomplete);
    }

    match buf[0] {
        b'+' => parse_simple_string(buf),
        b'-' => parse_simple_error(buf),
        b':' => parse_integer(buf),
        b'$' => parse_bulk_string(buf),
        b'*' => parse_array(buf, depth),
        other => Err(Error::Protocol(format!(
            "unknown RESP type byte: 0x{other:02x}"
        ))),
    }
}

/// `+<string>\r\n`
fn parse_simple_string(buf: &Bytes) -> Result<(RespValue, usize)> {
    let (line, next) = read_line(buf, 1)?;
    // Fast path for common responses
    let s = match line {
        b"OK" => "OK".to_string(),
        b"PONG" => "PONG".to_string(),
        _ => std::str::from_utf8(line)
            .map_err(|e| Error::Protocol(format!("invalid UTF-8 in simple string: {e}")))?
            .to_string(),
    };
    Ok((RespValue::SimpleString(s), next))
}

/// `-<error message>\r\n`
fn parse_simple_error(buf: &Bytes) -> Result<(RespValue, usize)> {
    let (line, next) = read_line(buf, 1)?;
    Ok((RespValue::Error(String::from_utf8_lossy(line).into_owned()), next))
}

/// `:<integer>\r\n`
fn parse_integer(buf: &Bytes) -> Result<(RespValue, usize)> {
    let (line, next) = read_line(buf, 1)?;
    let i = parse_int_from_bytes(line)?;
    Ok((RespValue::Integer(i), next))
}

/// `$<length>\r\n<data>\r\n`  or  `$-1\r\n`
fn parse_bulk_string(buf: &Bytes) -> Result<(RespValue, usize)> {
    let (line, next) = read_line(buf, 1)?;
    let len = parse_int_from_bytes(line)?;

    if len < 0 {
        return check_null(len, next).map(|next| (RespValue::Null, next));
    }

    let data_end = bulk_end(next, len)?;
    if buf.len() < data_end + 2 {
        return Err(Error::Incomplete);
    }
    if buf[data_end] != b'\r' || buf[data_end + 1] != b'\n' {
        return Err(Error::Protocol(
            "bulk string not terminated by \\r\\n".into(),
        ));
    }

    let data = buf.slice(next..data_end);
    Ok((RespValue::BulkString(data), data_end + 2))
}

/// `*<count>\r\n<elements>`  or  `*-1\r\n`
fn parse_array(buf: &Bytes, depth: usize) -> Result<(RespValue, usize)> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(Error::Protocol(format!(
            "multibulk nesting exceeds {MAX_PARSE_DEPTH} levels"
        )));
    }
    let (line, mut next) = read_line(buf, 1)?;
    let count = parse_int_from_bytes(line)?;

    if count < 0 {
        return check_null(count, next).map(|next| (RespValue::Null, next));
    }
    check_count(count)?;

    let count = count as usize;
    // Cap the up-front reservation; the elements still have to arrive.
    let mut elements = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let sub = buf.slice(next..);
        let (val, consumed) = parse_at(&sub, depth + 1)?;
        elements.push(val);
        next += consumed;
    }
    Ok((RespValue::Array(elements), next))
}

// ── Tests ──────────────────────────────────────────────────────────
