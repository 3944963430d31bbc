//! Connection lifecycle.
//!
//! [`RedisConnection`] owns one [`Connector`] and adds the lifecycle on
//! top: explicit reconnect with bounded or unbounded retries, liveness,
//! diagnostics and the blocking call surface.

use crate::command::Command;
use crate::commands;
use crate::config::ConnectionConfig;
use crate::connection::connector::{ConnectionState, Connector, Reply};
use crate::error::{Error, Result};
use crate::runtime;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// A single pipelined connection to a server.
pub struct RedisConnection {
    connector: Connector,
    config: Arc<ConnectionConfig>,
    /// `reconnect` calls currently running.
    reconnecting: AtomicUsize,
    /// Reconnect attempts made over the connection's lifetime.
    reconnects: AtomicU32,
    last_used: Mutex<Instant>,
}

impl RedisConnection {
    /// Create a connection without touching the network.
    pub fn new(config: Arc<ConnectionConfig>) -> Self {
        Self {
            connector: Connector::new(Arc::clone(&config)),
            config,
            reconnecting: AtomicUsize::new(0),
            reconnects: AtomicU32::new(0),
            last_used: Mutex::new(Instant::now()),
        }
    }

    /// Create and connect (handshake included).
    pub async fn open(config: Arc<ConnectionConfig>) -> Result<Self> {
        let conn = Self::new(config);
        conn.connect().await?;
        Ok(conn)
    }

    /// One connect attempt, shared with any concurrent caller.
    pub async fn connect(&self) -> Result<()> {
        self.connector.connect().await.map(|_| ())
    }

    /// Drop the current link and connect again.
    ///
    /// Tries up to `reconnect_attempts` times (forever when unset) with a
    /// fixed wait between attempts, and returns the last error when every
    /// attempt failed. At least one attempt is always made.
    pub async fn reconnect(&self) -> Result<()> {
        if self.connector.state() == ConnectionState::Disposed {
            return Err(Error::Disposed);
        }
        let _running = ReconnectCount::enter(&self.reconnecting);
        self.reconnect_loop().await
    }

    async fn reconnect_loop(&self) -> Result<()> {
        self.connector.disconnect();
        let wait = self.config.reconnect_wait();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.reconnects.fetch_add(1, Ordering::Relaxed);
            match self.connector.connect().await {
                Ok(_) => {
                    info!(addr = %self.addr(), attempt, "reconnected");
                    return Ok(());
                }
                Err(Error::Disposed) => return Err(Error::Disposed),
                Err(e) => {
                    let exhausted = self
                        .config
                        .reconnect_attempts
                        .is_some_and(|max| attempt >= max);
                    warn!(addr = %self.addr(), attempt, error = %e, "reconnect attempt failed");
                    if exhausted {
                        return Err(e);
                    }
                }
            }
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connector.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        match self.connector.state() {
            ConnectionState::Disposed => ConnectionState::Disposed,
            _ if self.reconnecting.load(Ordering::SeqCst) > 0 => ConnectionState::Reconnecting,
            state => state,
        }
    }

    /// Execute a command and wait for its typed result.
    pub async fn call_async<T: Send + 'static>(&self, cmd: &Command<T>) -> Result<T> {
        self.touch();
        self.connector.call(cmd).await
    }

    /// Blocking form of [`call_async`](Self::call_async) on the global runtime.
    ///
    /// Must not be called from inside an async context.
    pub fn call<T: Send + 'static>(&self, cmd: &Command<T>) -> Result<T> {
        runtime::block_on(self.call_async(cmd))
    }

    /// Queue a command without waiting; the reply is not bounded by the
    /// reply timeout.
    pub async fn submit<T: Send + 'static>(&self, cmd: &Command<T>) -> Result<Reply<T>> {
        self.touch();
        self.connector.submit(cmd).await
    }

    /// `PING`, true when the server answered `PONG`.
    pub async fn ping(&self) -> Result<bool> {
        Ok(self.call_async(&commands::ping()).await? == "PONG")
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// `host:port`, for logs and errors.
    pub fn addr(&self) -> &str {
        self.connector.addr()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Reconnect attempts made so far.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Calls written and still waiting for their reply.
    pub fn in_flight(&self) -> usize {
        self.connector.in_flight()
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }

    /// Fail pending calls with `Disposed` and refuse further use.
    pub fn dispose(&self) {
        self.connector.dispose();
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }
}

/// Holds one count in `RedisConnection::reconnecting` until dropped, so a
/// cancelled reconnect is uncounted too.
struct ReconnectCount<'a>(&'a AtomicUsize);

impl<'a> ReconnectCount<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for ReconnectCount<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnection")
            .field("addr", &self.addr())
            .field("state", &self.state())
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
