//! Bounded connection pool.
//!
//! A semaphore caps how many connections are checked out at once, and a
//! deque holds idle connections for reuse. The idle deque uses
//! `parking_lot::Mutex` (sync, held very briefly) so connections can be
//! returned in `Drop` without needing async.

use crate::command::Command;
use crate::config::ConnectionConfig;
use crate::connection::tcp::RedisConnection;
use crate::error::{Error, Result};
use crate::observer::{CallInfo, CallObserver, Observers};
use crate::runtime;

use parking_lot::Mutex as SyncMutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info, warn};

/// An async connection pool.
pub struct ConnectionPool {
    /// Idle connections ready for reuse (sync mutex, held very briefly).
    idle: SyncMutex<VecDeque<RedisConnection>>,
    /// Admission limiter: one permit per checked-out connection.
    semaphore: Semaphore,
    config: Arc<ConnectionConfig>,
    max_size: usize,
    /// How long a connection can be idle before being dropped.
    idle_timeout: Duration,
    created: AtomicUsize,
    disposed: AtomicBool,
    observers: Observers,
}

impl ConnectionPool {
    /// Create a pool. No connection is opened until first use.
    pub fn new(config: ConnectionConfig) -> Self {
        let max_size = config.pool_size;
        let idle_timeout = config.idle_timeout();
        info!(addr = %config.primary_addr(), max_size, "connection pool created");
        Self {
            idle: SyncMutex::new(VecDeque::with_capacity(max_size)),
            semaphore: Semaphore::new(max_size),
            config: Arc::new(config),
            max_size,
            idle_timeout,
            created: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            observers: Observers::default(),
        }
    }

    /// Check out a connection.
    ///
    /// Waits at most `pool_timeout_ms` for a slot. Returns a [`PoolGuard`]
    /// which hands the connection back to the pool when dropped.
    pub async fn get(&self) -> Result<PoolGuard<'_>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        let wait = self.config.pool_timeout();
        let permit = match tokio::time::timeout(wait, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::Disposed),
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "no pooled connection available within {wait:?}"
                )))
            }
        };

        let conn = {
            let mut idle = self.idle.lock();
            self.take_healthy_connection(&mut idle)
        };
        let conn = match conn {
            Some(c) => c,
            None => self.create_connection().await?,
        };

        Ok(PoolGuard {
            conn: Some(conn),
            pool: self,
            _permit: permit,
        })
    }

    /// Run one command on a pooled connection.
    ///
    /// A connectivity failure (transport, timeout, disposal) evicts the
    /// connection instead of returning it. The error is passed through
    /// unchanged.
    pub async fn execute<T: Send + 'static>(&self, cmd: &Command<T>) -> Result<T> {
        let guard = self.get().await?;

        let call = (!self.observers.is_empty()).then(|| CallInfo {
            command: cmd.name().to_string(),
            args: cmd.arguments().len(),
            addr: guard.conn().addr().to_string(),
        });
        if let Some(call) = &call {
            self.observers.before(call);
        }
        let started = Instant::now();
        let result = guard.conn().call_async(cmd).await;
        if let Some(call) = &call {
            self.observers
                .after(call, started.elapsed(), result.as_ref().map(|_| ()));
        }

        if let Err(e) = &result {
            if e.is_connectivity() {
                let conn = guard.take();
                warn!(addr = %conn.addr(), error = %e, "evicting broken connection");
                conn.dispose();
            }
        }
        result
    }

    /// Blocking form of [`execute`](Self::execute) on the global runtime.
    pub fn execute_blocking<T: Send + 'static>(&self, cmd: &Command<T>) -> Result<T> {
        runtime::block_on(self.execute(cmd))
    }

    pub fn add_observer(&self, observer: Arc<dyn CallObserver>) {
        self.observers.add(observer);
    }

    /// Close admission and dispose every idle connection.
    ///
    /// Connections currently checked out are not reclaimed; they are
    /// dropped instead of returned when their guard goes away.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.semaphore.close();
        let drained: Vec<RedisConnection> = self.idle.lock().drain(..).collect();
        for conn in &drained {
            conn.dispose();
        }
        info!(addr = %self.config.primary_addr(), drained = drained.len(), "connection pool disposed");
    }

    /// Return the number of currently idle connections.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Return the configured max pool size.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Return the number of available permits (roughly = max_size - checked_out).
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Connections opened over the pool's lifetime.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn create_connection(&self) -> Result<RedisConnection> {
        let conn = RedisConnection::open(Arc::clone(&self.config)).await?;
        let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(addr = %conn.addr(), total, "pool opened connection");
        Ok(conn)
    }

    /// Take a healthy connection from the idle queue (LIFO for cache warmth).
    fn take_healthy_connection(
        &self,
        idle: &mut VecDeque<RedisConnection>,
    ) -> Option<RedisConnection> {
        while let Some(conn) = idle.pop_back() {
            if !conn.is_connected() || conn.idle_for() > self.idle_timeout {
                debug!(addr = %conn.addr(), "dropping stale idle connection");
                conn.dispose();
                continue;
            }
            return Some(conn);
        }
        None
    }

    /// Return a connection to the pool (sync, safe for Drop).
    fn return_connection(&self, conn: RedisConnection) {
        if self.disposed.load(Ordering::Acquire) || !conn.is_connected() {
            conn.dispose();
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_size {
            idle.push_back(conn);
        } else {
            drop(idle);
            conn.dispose();
        }
    }
}

/// RAII guard that returns the connection to the pool on drop.
///
/// Holding a guard pins every call to one connection, which keeps their
/// relative order.
pub struct PoolGuard<'a> {
    conn: Option<RedisConnection>,
    pool: &'a ConnectionPool,
    _permit: SemaphorePermit<'a>,
}

impl PoolGuard<'_> {
    /// Access the underlying connection.
    pub fn conn(&self) -> &RedisConnection {
        self.conn.as_ref().expect("connection already taken")
    }

    /// Take the connection out of the guard (it won't be returned to the pool).
    pub fn take(mut self) -> RedisConnection {
        self.conn.take().expect("connection already taken")
    }
}

impl Drop for PoolGuard<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.return_connection(conn);
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands;
    use crate::connection::mock::{self, basic_reply, Action, MockServer};

    fn test_config(server: &MockServer) -> ConnectionConfig {
        ConnectionConfig {
            pool_size: 3,
            idle_timeout_ms: 60_000,
            ..server.config()
        }
    }

    #[tokio::test]
    async fn pool_create_and_get() {
        let server = mock::serve_basic().await;
        let pool = ConnectionPool::new(test_config(&server));

        assert_eq!(pool.max_size(), 3);
        assert_eq!(pool.available(), 3);

        let guard = pool.get().await.unwrap();
        assert_eq!(pool.available(), 2);
        assert_eq!(guard.conn().call_async(&commands::ping()).await.unwrap(), "PONG");

        drop(guard);
        assert_eq!(pool.available(), 3);
        assert_eq!(pool.created(), 1);
    }

    #[tokio::test]
    async fn pool_reuses_connections() {
        let server = mock::serve_basic().await;
        let pool = ConnectionPool::new(test_config(&server));

        pool.execute(&commands::ping()).await.unwrap();
        assert_eq!(pool.idle_count(), 1);

        {
            let _guard = pool.get().await.unwrap();
            assert_eq!(pool.idle_count(), 0);
        }
        assert_eq!(pool.idle_count(), 1);

        pool.execute(&commands::ping()).await.unwrap();
        assert_eq!(pool.created(), 1);
        assert_eq!(server.accepted(), 1);
    }

    #[tokio::test]
    async fn pool_limits_connections() {
        let server = mock::serve_basic().await;
        let pool = ConnectionPool::new(test_config(&server));

        let g1 = pool.get().await.unwrap();
        let g2 = pool.get().await.unwrap();
        let g3 = pool.get().await.unwrap();
        assert_eq!(pool.available(), 0);

        let result = tokio::time::timeout(Duration::from_millis(50), pool.get()).await;
        assert!(result.is_err());

        drop(g1);
        assert_eq!(pool.available(), 1);
        let _g4 = pool.get().await.unwrap();

        drop(g2);
        drop(g3);
        assert_eq!(pool.created(), 3);
    }

    #[tokio::test]
    async fn admission_timeout_is_reported() {
        let server = mock::serve_basic().await;
        let config = ConnectionConfig {
            pool_size: 1,
            pool_timeout_ms: 50,
            ..server.config()
        };
        let pool = ConnectionPool::new(config);
        let _held = pool.get().await.unwrap();
        assert!(matches!(pool.get().await, Err(Error::Timeout(_))));
        assert!(matches!(
            pool.execute(&commands::ping()).await,
            Err(Error::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn pool_take_removes_from_pool() {
        let server = mock::serve_basic().await;
        let pool = ConnectionPool::new(test_config(&server));

        let guard = pool.get().await.unwrap();
        let conn = guard.take();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.available(), 3);
        assert!(conn.ping().await.unwrap());
    }

    #[tokio::test]
    async fn pool_idle_timeout() {
        let server = mock::serve_basic().await;
        let config = ConnectionConfig {
            idle_timeout_ms: 50,
            ..test_config(&server)
        };
        let pool = ConnectionPool::new(config);

        pool.execute(&commands::ping()).await.unwrap();
        assert_eq!(pool.idle_count(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;

        pool.execute(&commands::ping()).await.unwrap();
        assert_eq!(pool.created(), 2);
    }

    #[tokio::test]
    async fn pool_connect_failure() {
        let config = ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            pool_size: 1,
            connect_timeout_ms: 100,
            ..ConnectionConfig::default()
        };
        let pool = ConnectionPool::new(config);
        assert!(pool.get().await.is_err());
        // The permit was released.
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn broken_connection_is_evicted() {
        let server = mock::serve(|index, req| match index {
            0 => Action::Close,
            _ => Action::Reply(basic_reply(req)),
        })
        .await;
        let pool = ConnectionPool::new(test_config(&server));

        let err = pool.execute(&commands::ping()).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.available(), 3);

        assert_eq!(pool.execute(&commands::ping()).await.unwrap(), "PONG");
        assert_eq!(pool.created(), 2);
        assert_eq!(server.accepted(), 2);
    }

    #[tokio::test]
    async fn server_error_keeps_connection() {
        let server = mock::serve_basic().await;
        let pool = ConnectionPool::new(test_config(&server));

        let err = pool.execute(&Command::status("BOGUS")).await.unwrap_err();
        assert_eq!(err.server_message(), Some("ERR unknown command"));
        assert_eq!(pool.idle_count(), 1);
        pool.execute(&commands::ping()).await.unwrap();
        assert_eq!(pool.created(), 1);
    }

    #[tokio::test]
    async fn oversized_request_keeps_connection() {
        let server = mock::serve_basic().await;
        let pool = ConnectionPool::new(ConnectionConfig {
            max_buffer_size: 64,
            ..test_config(&server)
        });
        pool.execute(&commands::ping()).await.unwrap();

        let big = "x".repeat(100);
        let err = pool.execute(&commands::echo(big.as_str())).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(pool.idle_count(), 1);

        assert_eq!(pool.execute(&commands::ping()).await.unwrap(), "PONG");
        assert_eq!(pool.created(), 1);
        assert_eq!(server.accepted(), 1);
    }

    #[tokio::test]
    async fn dispose_drains_idle() {
        let server = mock::serve_basic().await;
        let pool = ConnectionPool::new(test_config(&server));

        let held = pool.get().await.unwrap();
        pool.execute(&commands::ping()).await.unwrap();
        assert_eq!(pool.idle_count(), 1);

        pool.dispose();
        assert_eq!(pool.idle_count(), 0);
        assert!(matches!(pool.get().await, Err(Error::Disposed)));

        // A checked-out connection is not returned after disposal.
        drop(held);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn observers_see_calls() {
        use std::sync::atomic::AtomicUsize;

        #[derive(Default)]
        struct Recorder {
            names: SyncMutex<Vec<String>>,
            failures: AtomicUsize,
        }
        impl CallObserver for Recorder {
            fn before_call(&self, call: &CallInfo) {
                self.names.lock().push(call.command.clone());
            }
            fn after_call(&self, _call: &CallInfo, _elapsed: Duration, outcome: std::result::Result<(), &Error>) {
                if outcome.is_err() {
                    self.failures.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let server = mock::serve_basic().await;
        let pool = ConnectionPool::new(test_config(&server));
        let recorder = Arc::new(Recorder::default());
        pool.add_observer(recorder.clone());

        pool.execute(&commands::ping()).await.unwrap();
        pool.execute(&commands::object_idletime("k")).await.unwrap_err();

        assert_eq!(
            *recorder.names.lock(),
            vec!["PING".to_string(), "OBJECT IDLETIME".to_string()]
        );
        assert_eq!(recorder.failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn execute_blocking_works() {
        let server = runtime::block_on(mock::serve_basic());
        let pool = ConnectionPool::new(test_config(&server));
        assert_eq!(pool.execute_blocking(&commands::echo("hi")).unwrap(), "hi");
        assert_eq!(pool.idle_count(), 1);
    }
}
