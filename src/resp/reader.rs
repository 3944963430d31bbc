//! Typed reply reader.
//!
//! A [`ReplyReader`] walks exactly one complete reply frame (already cut
//! off the socket by the connection reader) and exposes the expect-style
//! operations command parsers are written against. Because the frame is
//! complete, a mismatch only fails the call that owns the frame; the
//! socket stream stays aligned for the next reply.

use crate::error::{Error, Result};
use crate::resp::parser::{bulk_end, check_count, parse, parse_int_from_bytes, read_line};
use crate::resp::types::{tag_name, RespValue};
use bytes::Bytes;

/// Cursor over a single reply frame.
pub struct ReplyReader<'a> {
    frame: &'a Bytes,
    pos: usize,
}

impl<'a> ReplyReader<'a> {
    pub fn new(frame: &'a Bytes) -> Self {
        Self { frame, pos: 0 }
    }

    /// Look at the next tag byte without consuming it.
    pub fn peek_type(&self) -> Result<u8> {
        self.frame
            .get(self.pos)
            .copied()
            .ok_or_else(|| Error::Protocol("reply ended before expected value".into()))
    }

    /// Consume the next tag byte.
    ///
    /// An error tag is never handed to the caller as a type: the error line
    /// is consumed and surfaced as `Error::Redis` carrying the server text.
    pub fn read_type(&mut self) -> Result<u8> {
        let tag = self.peek_type()?;
        self.pos += 1;
        if tag == b'-' {
            let line = self.read_line()?;
            return Err(Error::redis(String::from_utf8_lossy(line).into_owned()));
        }
        Ok(tag)
    }

    /// Consume the next tag byte and fail unless it is `expected`.
    pub fn expect_type(&mut self, expected: u8) -> Result<()> {
        let tag = self.read_type()?;
        if tag != expected {
            return Err(unexpected(expected, tag));
        }
        Ok(())
    }

    /// `:<integer>\r\n`
    pub fn read_integer(&mut self) -> Result<i64> {
        self.expect_type(b':')?;
        let line = self.read_line()?;
        parse_int_from_bytes(line)
    }

    /// `+<status>\r\n`
    pub fn read_status(&mut self) -> Result<String> {
        self.expect_type(b'+')?;
        let line = self.read_line()?;
        utf8(line, "status")
    }

    /// Strict bulk read: a null bulk is a protocol error.
    pub fn read_bulk_bytes(&mut self) -> Result<Bytes> {
        self.expect_type(b'$')?;
        self.read_bulk_body()?
            .ok_or_else(|| Error::Protocol("unexpected null bulk reply".into()))
    }

    /// Nullable bulk read.
    ///
    /// `$-1` yields `None`. Blocking commands answer "no result" with a null
    /// multibulk (`*-1`) instead, which is accepted here as well.
    pub fn read_nullable_bulk_bytes(&mut self) -> Result<Option<Bytes>> {
        match self.read_type()? {
            b'$' => self.read_bulk_body(),
            b'*' => match self.read_count_body()? {
                None => Ok(None),
                Some(n) => Err(Error::Protocol(format!(
                    "expected bulk reply, got multibulk of {n}"
                ))),
            },
            other => Err(unexpected(b'$', other)),
        }
    }

    /// Strict bulk read decoded as UTF-8.
    pub fn read_bulk_string(&mut self) -> Result<String> {
        let bytes = self.read_bulk_bytes()?;
        utf8(&bytes, "bulk string")
    }

    /// Nullable bulk read decoded as UTF-8.
    pub fn read_nullable_bulk_string(&mut self) -> Result<Option<String>> {
        match self.read_nullable_bulk_bytes()? {
            Some(bytes) => utf8(&bytes, "bulk string").map(Some),
            None => Ok(None),
        }
    }

    /// Multibulk header: `Some(count)`, or `None` for a null multibulk.
    pub fn read_count(&mut self) -> Result<Option<usize>> {
        self.expect_type(b'*')?;
        self.read_count_body()
    }

    /// Multibulk header that must be non-null and hold exactly `expected` items.
    pub fn expect_count(&mut self, expected: usize) -> Result<()> {
        match self.read_count()? {
            Some(n) if n == expected => Ok(()),
            Some(n) => Err(Error::Protocol(format!(
                "expected multibulk of {expected}, got {n}"
            ))),
            None => Err(Error::Protocol(format!(
                "expected multibulk of {expected}, got null"
            ))),
        }
    }

    /// Decode one whole value (multibulks recursively).
    ///
    /// A top-level error line is returned as `Error::Redis`; errors nested
    /// inside a multibulk stay in the tree as `RespValue::Error`.
    pub fn read_value(&mut self) -> Result<RespValue> {
        if self.peek_type()? == b'-' {
            self.read_type()?;
        }
        let rest = self.frame.slice(self.pos..);
        let (value, consumed) = parse(&rest).map_err(|e| match e {
            Error::Incomplete => Error::Protocol("reply ended before expected value".into()),
            other => other,
        })?;
        self.pos += consumed;
        Ok(value)
    }

    /// Decode a whole multibulk; `None` for a null multibulk.
    pub fn read_multibulk(&mut self) -> Result<Option<Vec<RespValue>>> {
        let tag = self.peek_type()?;
        if tag != b'*' && tag != b'-' {
            return Err(unexpected(b'*', tag));
        }
        match self.read_value()? {
            RespValue::Array(items) => Ok(Some(items)),
            RespValue::Null => Ok(None),
            other => Err(Error::Protocol(format!(
                "expected multibulk, got {}",
                other.type_name()
            ))),
        }
    }

    /// Like [`read_multibulk`](Self::read_multibulk), with every bulk
    /// string (at any depth) decoded as text into `SimpleString`.
    /// Invalid UTF-8 is a protocol error.
    pub fn read_multibulk_text(&mut self) -> Result<Option<Vec<RespValue>>> {
        self.read_multibulk()?
            .map(|items| items.into_iter().map(into_text).collect())
            .transpose()
    }

    /// True once every byte of the frame has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.frame.len()
    }

    /// Fail unless the parser consumed exactly one whole reply.
    pub fn finish(&self) -> Result<()> {
        if self.is_exhausted() {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "{} unread bytes after reply",
                self.frame.len() - self.pos
            )))
        }
    }

    // ── internals ──

    fn read_line(&mut self) -> Result<&'a [u8]> {
        let frame: &'a Bytes = self.frame;
        let (line, next) = read_line(frame, self.pos).map_err(truncated)?;
        self.pos = next;
        Ok(line)
    }

    /// Body of a bulk reply after its `$` tag.
    fn read_bulk_body(&mut self) -> Result<Option<Bytes>> {
        let len = parse_int_from_bytes(self.read_line()?)?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(Error::Protocol(format!("invalid bulk length: {len}")));
        }
        let end = bulk_end(self.pos, len)?;
        if self.frame.len() < end + 2 || &self.frame[end..end + 2] != b"\r\n" {
            return Err(Error::Protocol("malformed bulk reply".into()));
        }
        let data = self.frame.slice(self.pos..end);
        self.pos = end + 2;
        Ok(Some(data))
    }

    /// Count of a multibulk reply after its `*` tag.
    fn read_count_body(&mut self) -> Result<Option<usize>> {
        let count = parse_int_from_bytes(self.read_line()?)?;
        if count == -1 {
            return Ok(None);
        }
        if count < 0 {
            return Err(Error::Protocol(format!("invalid multibulk count: {count}")));
        }
        check_count(count)?;
        Ok(Some(count as usize))
    }
}

fn unexpected(expected: u8, got: u8) -> Error {
    Error::Protocol(format!(
        "expected {} reply, got {}",
        tag_name(expected),
        tag_name(got)
    ))
}

fn truncated(e: Error) -> Error {
    match e {
        Error::Incomplete => Error::Protocol("reply ended before expected value".into()),
        other => other,
    }
}

fn into_text(value: RespValue) -> Result<RespValue> {
    match value {
        RespValue::BulkString(bytes) => Ok(RespValue::SimpleString(utf8(&bytes, "bulk string")?)),
        RespValue::Array(items) => Ok(RespValue::Array(
            items.into_iter().map(into_text).collect::<Result<_>>()?,
        )),
        other => Ok(other),
    }
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| Error::Protocol(format!("invalid UTF-8 in {what}: {e}")))
}

// ── Tests ──────────────────────────────────────────────────────────
