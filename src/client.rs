//! Client facade.
//!
//! [`Client`] wraps a shared [`ConnectionPool`] and exposes the two call
//! entry points every command goes through: [`Client::call`] (blocking)
//! and [`Client::call_async`]. The convenience methods below are thin
//! wrappers that build a catalog command, apply the key prefix and call
//! `call_async`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::command::{Command, ScanResult};
use crate::commands;
use crate::config::ConnectionConfig;
use crate::connection::pool::ConnectionPool;
use crate::error::Result;
use crate::observer::CallObserver;
use crate::runtime;

/// A pooled client. Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct Client {
    pool: Arc<ConnectionPool>,
    key_prefix: Option<Arc<str>>,
}

impl Client {
    /// Create a client from a validated config. No connection is opened yet.
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let key_prefix = config.key_prefix.as_deref().map(Arc::from);
        Ok(Self {
            pool: Arc::new(ConnectionPool::new(config)),
            key_prefix,
        })
    }

    /// Create a client from a `redis://` URL with default pool settings.
    pub fn from_url(url: &str) -> Result<Self> {
        Self::new(ConnectionConfig::from_url(url)?)
    }

    /// Execute a command, blocking the calling thread.
    ///
    /// Must not be called from inside an async context.
    pub fn call<T: Send + 'static>(&self, cmd: &Command<T>) -> Result<T> {
        runtime::block_on(self.call_async(cmd))
    }

    /// Execute a command on a pooled connection.
    pub async fn call_async<T: Send + 'static>(&self, cmd: &Command<T>) -> Result<T> {
        self.pool.execute(cmd).await
    }

    /// Apply the configured key prefix.
    pub fn key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}{key}"),
            None => key.to_string(),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn add_observer(&self, observer: Arc<dyn CallObserver>) {
        self.pool.add_observer(observer);
    }

    /// Dispose the shared pool; every clone of this client stops working.
    pub fn dispose(&self) {
        self.pool.dispose();
    }

    // ── Convenience wrappers ───────────────────────────────────────

    pub async fn ping(&self) -> Result<String> {
        self.call_async(&commands::ping()).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.call_async(&commands::get(self.key(key))).await
    }

    pub async fn set(&self, key: &str, value: impl crate::command::ToArg) -> Result<()> {
        self.call_async(&commands::set(self.key(key), value)).await?;
        Ok(())
    }

    /// Delete keys; number of keys removed.
    pub async fn del(&self, keys: &[&str]) -> Result<i64> {
        let cmd = commands::del(keys.iter().map(|k| self.key(k)))?;
        self.call_async(&cmd).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.call_async(&commands::exists(self.key(key))).await
    }

    pub async fn incr(&self, key: &str) -> Result<i64> {
        self.call_async(&commands::incr(self.key(key))).await
    }

    pub async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        self.call_async(&commands::expire(self.key(key), seconds)).await
    }

    pub async fn ttl(&self, key: &str) -> Result<i64> {
        self.call_async(&commands::ttl(self.key(key))).await
    }

    pub async fn hset(&self, key: &str, field: &str, value: impl crate::command::ToArg) -> Result<bool> {
        self.call_async(&commands::hset(self.key(key), field, value)).await
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.call_async(&commands::hgetall(self.key(key))).await
    }

    /// One `SCAN` batch. The pattern is prefixed; returned keys are not
    /// stripped.
    pub async fn scan(
        &self,
        cursor: u64,
        pattern: Option<&str>,
        count: Option<usize>,
    ) -> Result<ScanResult<Vec<String>>> {
        let pattern = match (pattern, &self.key_prefix) {
            (Some(p), _) => Some(self.key(p)),
            (None, Some(prefix)) => Some(format!("{prefix}*")),
            (None, None) => None,
        };
        self.call_async(&commands::scan(cursor, pattern.as_deref(), count))
            .await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("addr", &self.pool.config().primary_addr())
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
