//! Connection configuration and URL parsing.
//!
//! Supports `redis://[user:pass@]host[:port][/db]`. Every other scheme
//! (TLS, sentinel, cluster) is rejected as a configuration error.

use crate::error::{Error, Result};
use std::time::Duration;

/// Default server port.
pub const DEFAULT_PORT: u16 = 6379;

/// Default maximum read buffer / request size (512 MB).
pub const DEFAULT_MAX_BUF_SIZE: usize = 512 * 1024 * 1024;

/// Default pool admission wait (30 s).
pub const DEFAULT_POOL_TIMEOUT_MS: u64 = 30_000;

/// Full connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Optional username (ACL).
    pub username: Option<String>,
    /// Optional password, sent with AUTH right after connect.
    pub password: Option<String>,
    /// Database index selected after connect when non-zero.
    pub db: u16,
    /// Logical instance name prepended to keys by the client facade.
    pub key_prefix: Option<String>,
    /// Pool maximum concurrency.
    pub pool_size: usize,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Reply timeout in milliseconds (0 = no timeout).
    ///
    /// A call that times out poisons its connection: the reply may still
    /// arrive later and would be matched to the wrong caller.
    pub read_timeout_ms: u64,
    /// Socket write timeout in milliseconds (0 = no timeout).
    pub write_timeout_ms: u64,
    /// Idle timeout in milliseconds (pooled connections idle longer are dropped).
    pub idle_timeout_ms: u64,
    /// How long `ConnectionPool::get` waits for an admission slot.
    pub pool_timeout_ms: u64,
    /// Reconnect attempts made by `RedisConnection::reconnect` (`None` = unlimited).
    /// Must be at least 1 when set.
    pub reconnect_attempts: Option<u32>,
    /// Fixed wait between reconnect attempts in milliseconds.
    pub reconnect_wait_ms: u64,
    /// Maximum read buffer size per connection, also the largest request accepted.
    pub max_buffer_size: usize,
    /// Number of transfer buffers per connection (caps queued encoded requests).
    pub transfer_buffers: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            db: 0,
            key_prefix: None,
            pool_size: 8,
            connect_timeout_ms: 5000,
            read_timeout_ms: 30_000,
            write_timeout_ms: 30_000,
            idle_timeout_ms: 300_000, // 5 minutes
            pool_timeout_ms: DEFAULT_POOL_TIMEOUT_MS,
            reconnect_attempts: Some(3),
            reconnect_wait_ms: 1000,
            max_buffer_size: DEFAULT_MAX_BUF_SIZE,
            transfer_buffers: 4,
        }
    }
}

impl ConnectionConfig {
    /// Parse a `redis://` URL into a ConnectionConfig.
    pub fn from_url(url: &str) -> Result<Self> {
        let mut config = Self::default();

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::Config(format!("invalid URL, missing ://: {url}")))?;

        match scheme {
            "redis" => {}
            "rediss" => {
                return Err(Error::Config(
                    "TLS connections (rediss://) are not supported".into(),
                ));
            }
            _ => {
                return Err(Error::Config(format!("unknown URL scheme: {scheme}")));
            }
        }

        parse_standalone_url(&mut config, rest)?;
        Ok(config)
    }

    /// Check the values a pool and its connections rely on.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::Config("pool_size must be > 0".into()));
        }
        if self.transfer_buffers == 0 {
            return Err(Error::Config("transfer_buffers must be > 0".into()));
        }
        if self.reconnect_attempts == Some(0) {
            return Err(Error::Config(
                "reconnect_attempts must be > 0 (use None for unlimited)".into(),
            ));
        }
        if self.max_buffer_size == 0 {
            return Err(Error::Config("max_buffer_size must be > 0".into()));
        }
        Ok(())
    }

    /// Return the address as "host:port".
    pub fn primary_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` when reply timeouts are disabled.
    pub fn read_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.read_timeout_ms)
    }

    /// `None` when write timeouts are disabled.
    pub fn write_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.write_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_timeout_ms)
    }

    pub fn reconnect_wait(&self) -> Duration {
        Duration::from_millis(self.reconnect_wait_ms)
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

// ── URL parsing helpers ────────────────────────────────────────────

/// Parse `[user:pass@]host[:port][/db]`
fn parse_standalone_url(config: &mut ConnectionConfig, rest: &str) -> Result<()> {
    let (host_part, db_part) = split_path(rest);

    if let Some(db_str) = db_part {
        config.db = db_str
            .parse()
            .map_err(|_| Error::Config(format!("invalid db number: {db_str}")))?;
    }

    let host_port = if let Some((userinfo, hp)) = host_part.rsplit_once('@') {
        parse_userinfo(config, userinfo);
        hp
    } else {
        host_part
    };

    let (host, port) = parse_host_port(host_port, DEFAULT_PORT)?;
    config.host = host;
    config.port = port;
    Ok(())
}

/// Split `rest` into (before_path, Some(path)) or (rest, None).
fn split_path(rest: &str) -> (&str, Option<&str>) {
    match rest.split_once('/') {
        Some((before, after)) if !after.is_empty() => (before, Some(after)),
        Some((before, _)) => (before, None),
        None => (rest, None),
    }
}

/// Parse `user:pass`, `:pass` or a bare password into config.
fn parse_userinfo(config: &mut ConnectionConfig, userinfo: &str) {
    match userinfo.split_once(':') {
        Some((user, pass)) => {
            if !user.is_empty() {
                config.username = Some(user.to_string());
            }
            if !pass.is_empty() {
                config.password = Some(pass.to_string());
            }
        }
        None => {
            if !userinfo.is_empty() {
                config.password = Some(userinfo.to_string());
            }
        }
    }
}

/// Parse `host[:port]` or `[ipv6]:port`.
fn parse_host_port(s: &str, default_port: u16) -> Result<(String, u16)> {
    let (host, port) = if s.starts_with('[') {
        let close = s
            .find(']')
            .ok_or_else(|| Error::Config(format!("unclosed IPv6 bracket: {s}")))?;
        let host = s[1..close].to_string();
        let port = match s[close + 1..].strip_prefix(':') {
            Some(port_str) => port_str
                .parse()
                .map_err(|_| Error::Config(format!("invalid port: {port_str}")))?,
            None => default_port,
        };
        (host, port)
    } else if let Some((h, p)) = s.rsplit_once(':') {
        match p.parse::<u16>() {
            Ok(port) => (h.to_string(), port),
            // Bare IPv6 without brackets
            Err(_) if h.contains(':') => (s.to_string(), default_port),
            Err(_) => return Err(Error::Config(format!("invalid port: {p}"))),
        }
    } else {
        (s.to_string(), default_port)
    };

    if host.is_empty() {
        return Ok(("127.0.0.1".to_string(), port));
    }
    Ok((host, port))
}

// ── Tests ──────────────────────────────────────────────────────────
