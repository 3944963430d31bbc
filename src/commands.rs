//! Command catalog.
//!
//! Ready-made [`Command`] constructors for common server commands. Each
//! picks the typed result matching the server's reply shape. Constructors
//! that take a list validate it before building the command.

use crate::command::{Blocking, Command, ScanResult, ToArg};
use crate::error::{Error, Result};
use crate::resp::types::RespValue;
use bytes::Bytes;
use std::collections::HashMap;

// ── Connection ─────────────────────────────────────────────────────

/// `AUTH [username] password`
pub fn auth(username: Option<&str>, password: &str) -> Command<String> {
    let cmd = Command::status("AUTH");
    match username {
        Some(user) => cmd.arg(user).arg(password),
        None => cmd.arg(password),
    }
}

pub fn select(db: u16) -> Command<String> {
    Command::status("SELECT").arg(db)
}

pub fn ping() -> Command<String> {
    Command::status("PING")
}

pub fn echo(message: impl ToArg) -> Command<String> {
    Command::string("ECHO").arg(message)
}

pub fn flushdb() -> Command<String> {
    Command::status("FLUSHDB")
}

// ── Strings ────────────────────────────────────────────────────────

pub fn get(key: impl ToArg) -> Command<Option<String>> {
    Command::nullable_string("GET").arg(key)
}

pub fn get_bytes(key: impl ToArg) -> Command<Option<Bytes>> {
    Command::bytes("GET").arg(key)
}

pub fn set(key: impl ToArg, value: impl ToArg) -> Command<String> {
    Command::status("SET").arg(key).arg(value)
}

/// `SET key value EX seconds`
pub fn set_ex(key: impl ToArg, value: impl ToArg, seconds: u64) -> Command<String> {
    Command::status("SET").arg(key).arg(value).arg("EX").arg(seconds)
}

/// `SET key value NX`; `true` when the key was set.
pub fn set_nx(key: impl ToArg, value: impl ToArg) -> Command<bool> {
    Command::nullable_status("SET")
        .arg(key)
        .arg(value)
        .arg("NX")
        .map(|status| Ok(status.is_some()))
}

pub fn incr(key: impl ToArg) -> Command<i64> {
    Command::integer("INCR").arg(key)
}

pub fn incr_by(key: impl ToArg, delta: i64) -> Command<i64> {
    Command::integer("INCRBY").arg(key).arg(delta)
}

pub fn incr_by_float(key: impl ToArg, delta: f64) -> Command<Option<f64>> {
    Command::float("INCRBYFLOAT").arg(key).arg(delta)
}

/// `MGET key [key ...]`
pub fn mget<I>(keys: I) -> Result<Command<Vec<Option<String>>>>
where
    I: IntoIterator,
    I::Item: ToArg,
{
    non_empty("MGET", Command::nullable_strings("MGET").args(keys))
}

// ── Keys ───────────────────────────────────────────────────────────

/// `DEL key [key ...]`; number of keys removed.
pub fn del<I>(keys: I) -> Result<Command<i64>>
where
    I: IntoIterator,
    I::Item: ToArg,
{
    non_empty("DEL", Command::integer("DEL").args(keys))
}

pub fn exists(key: impl ToArg) -> Command<bool> {
    Command::boolean("EXISTS").arg(key)
}

pub fn expire(key: impl ToArg, seconds: u64) -> Command<bool> {
    Command::boolean("EXPIRE").arg(key).arg(seconds)
}

/// Remaining time to live in seconds (-1 no expiry, -2 missing key).
pub fn ttl(key: impl ToArg) -> Command<i64> {
    Command::integer("TTL").arg(key)
}

pub fn object_idletime(key: impl ToArg) -> Command<i64> {
    Command::integer("OBJECT IDLETIME").arg(key)
}

/// `SCAN cursor [MATCH pattern] [COUNT count]`
pub fn scan(cursor: u64, pattern: Option<&str>, count: Option<usize>) -> Command<ScanResult<Vec<String>>> {
    let mut cmd = Command::strings("SCAN").arg(cursor);
    if let Some(pattern) = pattern {
        cmd = cmd.arg("MATCH").arg(pattern);
    }
    if let Some(count) = count {
        cmd = cmd.arg("COUNT").arg(count);
    }
    Command::scan(cmd)
}

// ── Hashes ─────────────────────────────────────────────────────────

/// `HSET key field value`; `true` when the field is new.
pub fn hset(key: impl ToArg, field: impl ToArg, value: impl ToArg) -> Command<bool> {
    Command::boolean("HSET").arg(key).arg(field).arg(value)
}

pub fn hget(key: impl ToArg, field: impl ToArg) -> Command<Option<String>> {
    Command::nullable_string("HGET").arg(key).arg(field)
}

pub fn hgetall(key: impl ToArg) -> Command<HashMap<String, String>> {
    Command::hash("HGETALL").arg(key)
}

/// `HDEL key field [field ...]`
pub fn hdel<I>(key: impl ToArg, fields: I) -> Result<Command<i64>>
where
    I: IntoIterator,
    I::Item: ToArg,
{
    let cmd = Command::integer("HDEL").arg(key).args(fields);
    if cmd.arguments().len() < 2 {
        return Err(Error::InvalidArgument("HDEL requires at least one field".into()));
    }
    Ok(cmd)
}

// ── Lists ──────────────────────────────────────────────────────────

/// `LPUSH key value [value ...]`; resulting list length.
pub fn lpush<I>(key: impl ToArg, values: I) -> Result<Command<i64>>
where
    I: IntoIterator,
    I::Item: ToArg,
{
    let cmd = Command::integer("LPUSH").arg(key).args(values);
    if cmd.arguments().len() < 2 {
        return Err(Error::InvalidArgument("LPUSH requires at least one value".into()));
    }
    Ok(cmd)
}

pub fn lrange(key: impl ToArg, start: i64, stop: i64) -> Command<Vec<String>> {
    Command::strings("LRANGE").arg(key).arg(start).arg(stop)
}

/// `BLPOP key [key ...] timeout`; `None` when the timeout expired.
///
/// The reply timeout is widened by `timeout_secs`; 0 blocks without bound.
pub fn blpop<I>(keys: I, timeout_secs: u64) -> Result<Command<Option<(String, String)>>>
where
    I: IntoIterator,
    I::Item: ToArg,
{
    let cmd = non_empty("BLPOP", Command::tuple("BLPOP").args(keys))?;
    Ok(cmd
        .arg(timeout_secs)
        .blocking(Blocking::from_secs(timeout_secs)))
}

/// Arbitrary command returning the generic value tree.
pub fn raw<I>(name: impl Into<String>, args: I) -> Command<RespValue>
where
    I: IntoIterator,
    I::Item: ToArg,
{
    Command::value(name.into()).args(args)
}

fn non_empty<T>(name: &str, cmd: Command<T>) -> Result<Command<T>> {
    if cmd.arguments().is_empty() {
        return Err(Error::InvalidArgument(format!(
            "{name} requires at least one key"
        )));
    }
    Ok(cmd)
}

// ── Tests ──────────────────────────────────────────────────────────
