//! Typed commands.
//!
//! A [`Command<T>`] pairs the request (name plus rendered arguments) with
//! the parser that turns its single reply frame into a `T`. Commands hold
//! no connection state; they are built once and may be cloned and
//! resubmitted freely.

pub mod scan;

pub use scan::ScanResult;

use crate::error::{Error, Result};
use crate::resp::reader::ReplyReader;
use crate::resp::types::RespValue;
use crate::resp::writer;
use bytes::{Bytes, BytesMut};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Reply parser shared by every clone of a command.
pub type Parser<T> = Arc<dyn Fn(&mut ReplyReader<'_>) -> Result<T> + Send + Sync>;

/// How long the server may hold a reply on purpose (`BLPOP` and friends).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Blocking {
    /// Answered right away; the plain reply timeout applies.
    #[default]
    No,
    /// The server may wait this long before answering.
    For(Duration),
    /// The server may wait indefinitely.
    Forever,
}

impl Blocking {
    /// From a server-side timeout in seconds, where 0 means forever.
    pub fn from_secs(secs: u64) -> Self {
        match secs {
            0 => Blocking::Forever,
            n => Blocking::For(Duration::from_secs(n)),
        }
    }

    /// Reply bound for a command, given the connection's reply timeout.
    pub fn reply_limit(self, read_timeout: Option<Duration>) -> Option<Duration> {
        let base = read_timeout?;
        match self {
            Blocking::No => Some(base),
            Blocking::For(wait) => Some(base.saturating_add(wait)),
            Blocking::Forever => None,
        }
    }
}

/// A request and the typed parser for its reply.
pub struct Command<T> {
    name: Cow<'static, str>,
    args: Vec<Bytes>,
    parse: Parser<T>,
    blocking: Blocking,
}

impl<T> Clone for Command<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            args: self.args.clone(),
            parse: Arc::clone(&self.parse),
            blocking: self.blocking,
        }
    }
}

impl<T> fmt::Debug for Command<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("args", &self.args.len())
            .field("blocking", &self.blocking)
            .finish()
    }
}

impl<T: 'static> Command<T> {
    /// Build a command with a custom reply parser.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, parse: F) -> Self
    where
        F: Fn(&mut ReplyReader<'_>) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            args: Vec::new(),
            parse: Arc::new(parse),
            blocking: Blocking::No,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl ToArg) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    /// Append every argument of `args`, in order.
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        self.args.extend(args.into_iter().map(|a| a.to_arg()));
        self
    }

    /// Declare that the server may hold the reply; widens the reply timeout.
    pub fn blocking(mut self, blocking: Blocking) -> Self {
        self.blocking = blocking;
        self
    }

    /// Keep the request, post-process the parsed reply.
    pub fn map<U, F>(self, f: F) -> Command<U>
    where
        U: 'static,
        F: Fn(T) -> Result<U> + Send + Sync + 'static,
    {
        let inner = self.parse;
        Command {
            name: self.name,
            args: self.args,
            parse: Arc::new(move |r: &mut ReplyReader<'_>| inner(r).and_then(&f)),
            blocking: self.blocking,
        }
    }
}

impl<T> Command<T> {
    /// The command name as given (may hold several space-separated words).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[Bytes] {
        &self.args
    }

    pub fn parser(&self) -> Parser<T> {
        Arc::clone(&self.parse)
    }

    pub fn blocking_mode(&self) -> Blocking {
        self.blocking
    }

    /// Append the wire form of this request to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        writer::encode_into(buf, &self.name, &self.args);
    }

    /// Exact size of the wire form.
    pub fn encoded_len(&self) -> usize {
        writer::encoded_len(&self.name, &self.args)
    }

    /// Decode one complete reply frame with this command's parser.
    pub fn parse_frame(&self, frame: &Bytes) -> Result<T> {
        run_parser(&self.parse, frame)
    }
}

/// Run `parse` over `frame`; the parser must consume the whole frame.
pub(crate) fn run_parser<T>(parse: &Parser<T>, frame: &Bytes) -> Result<T> {
    let mut reader = ReplyReader::new(frame);
    let value = parse(&mut reader)?;
    reader.finish()?;
    Ok(value)
}

// ── Typed constructors ─────────────────────────────────────────────

impl Command<bool> {
    /// Integer reply, `true` when it equals 1.
    pub fn boolean(name: impl Into<Cow<'static, str>>) -> Self {
        Command::new(name, |r| Ok(r.read_integer()? == 1))
    }
}

impl Command<i64> {
    pub fn integer(name: impl Into<Cow<'static, str>>) -> Self {
        Command::new(name, |r| r.read_integer())
    }
}

impl Command<String> {
    /// Status reply (`+OK`, `+PONG`).
    pub fn status(name: impl Into<Cow<'static, str>>) -> Self {
        Command::new(name, |r| r.read_status())
    }

    /// Bulk reply that must not be null.
    pub fn string(name: impl Into<Cow<'static, str>>) -> Self {
        Command::new(name, |r| r.read_bulk_string())
    }
}

impl Command<Option<String>> {
    /// Status reply, or a null bulk / null multibulk meaning "not done".
    pub fn nullable_status(name: impl Into<Cow<'static, str>>) -> Self {
        Command::new(name, |r| {
            if r.peek_type()? == b'+' {
                r.read_status().map(Some)
            } else {
                r.read_nullable_bulk_string()
            }
        })
    }

    pub fn nullable_string(name: impl Into<Cow<'static, str>>) -> Self {
        Command::new(name, |r| r.read_nullable_bulk_string())
    }
}

impl Command<Option<Bytes>> {
    /// Raw bulk reply, `None` when null.
    pub fn bytes(name: impl Into<Cow<'static, str>>) -> Self {
        Command::new(name, |r| r.read_nullable_bulk_bytes())
    }
}

impl Command<Option<f64>> {
    /// Bulk reply holding a decimal number; a null bulk is `None`.
    pub fn float(name: impl Into<Cow<'static, str>>) -> Self {
        Command::new(name, |r| match r.read_nullable_bulk_string()? {
            Some(text) => parse_float(&text).map(Some),
            None => Ok(None),
        })
    }
}

impl Command<Vec<String>> {
    /// Multibulk of non-null bulk strings. A null multibulk is empty.
    pub fn strings(name: impl Into<Cow<'static, str>>) -> Self {
        Command::new(name, |r| {
            let count = r.read_count()?.unwrap_or(0);
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(r.read_bulk_string()?);
            }
            Ok(items)
        })
    }
}

impl Command<Vec<Option<String>>> {
    /// Multibulk whose elements may be null (`MGET`).
    pub fn nullable_strings(name: impl Into<Cow<'static, str>>) -> Self {
        Command::new(name, |r| {
            let count = r.read_count()?.unwrap_or(0);
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(r.read_nullable_bulk_string()?);
            }
            Ok(items)
        })
    }
}

impl Command<HashMap<String, String>> {
    /// Flat multibulk of alternating keys and values.
    pub fn hash(name: impl Into<Cow<'static, str>>) -> Self {
        Command::new(name, |r| {
            let count = r
                .read_count()?
                .ok_or_else(|| Error::Protocol("expected key/value multibulk, got null".into()))?;
            if count % 2 != 0 {
                return Err(Error::Protocol(format!(
                    "key/value multibulk has odd length {count}"
                )));
            }
            let mut map = HashMap::with_capacity(count / 2);
            for _ in 0..count / 2 {
                let key = r.read_bulk_string()?;
                let value = r.read_bulk_string()?;
                map.insert(key, value);
            }
            Ok(map)
        })
    }
}

impl Command<Option<(String, String)>> {
    /// Two-element multibulk; a null multibulk is `None` (blocking pops).
    pub fn tuple(name: impl Into<Cow<'static, str>>) -> Self {
        Command::new(name, |r| match r.read_count()? {
            None => Ok(None),
            Some(2) => {
                let first = r.read_bulk_string()?;
                let second = r.read_bulk_string()?;
                Ok(Some((first, second)))
            }
            Some(n) => Err(Error::Protocol(format!("expected multibulk of 2, got {n}"))),
        })
    }
}

impl Command<RespValue> {
    /// Any single reply, decoded into the generic value tree.
    pub fn value(name: impl Into<Cow<'static, str>>) -> Self {
        Command::new(name, |r| r.read_value())
    }
}

fn parse_float(text: &str) -> Result<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| Error::Protocol(format!("invalid float reply: {text:?}")))
}

// ── Arguments ──────────────────────────────────────────────────────

/// Conversion of a value into one wire argument.
///
/// Text is UTF-8, byte slices pass through untouched, numbers use
/// locale-independent formatting.
pub trait ToArg {
    fn to_arg(&self) -> Bytes;
}

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Bytes {
        (**self).to_arg()
    }
}

impl ToArg for str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> ToArg for [u8; N] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        self.clone()
    }
}

impl ToArg for bool {
    fn to_arg(&self) -> Bytes {
        Bytes::from_static(if *self { b"1" } else { b"0" })
    }
}

impl ToArg for f64 {
    fn to_arg(&self) -> Bytes {
        if self.is_infinite() {
            let text: &'static [u8] = if *self > 0.0 { b"+inf" } else { b"-inf" };
            return Bytes::from_static(text);
        }
        Bytes::from(self.to_string())
    }
}

macro_rules! int_to_arg {
    ($($t:ty),*) => {
        $(
            impl ToArg for $t {
                fn to_arg(&self) -> Bytes {
                    let mut buf = itoa::Buffer::new();
                    Bytes::copy_from_slice(buf.format(*self).as_bytes())
                }
            }
        )*
    };
}

int_to_arg!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

// ── Tests ──────────────────────────────────────────────────────────
