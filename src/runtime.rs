//! Shared runtime behind the synchronous call surface.
//!
//! `RedisConnection::call`, `ConnectionPool::execute_blocking` and
//! `Client::call` park the calling thread on this runtime. A connection
//! opened inside one of those calls spawns its writer and reader tasks
//! here, so the link keeps serving later calls (blocking or not) after
//! the first one returns.

use std::future::Future;
use std::sync::OnceLock;
use tokio::runtime::{Builder, Runtime};

const THREADS_VAR: &str = "REDPIPE_RUNTIME_THREADS";

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Worker count requested through `REDPIPE_RUNTIME_THREADS`.
///
/// Unset, unparsable and zero values all leave tokio's default in place.
fn requested_threads(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
}

/// The process-wide runtime, built on first use.
pub fn get_runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name("redpipe-rt");
        if let Some(n) = requested_threads(std::env::var(THREADS_VAR).ok().as_deref()) {
            builder.worker_threads(n);
        }
        match builder.build() {
            Ok(rt) => rt,
            Err(e) => panic!("redpipe: cannot start runtime threads: {e}"),
        }
    })
}

/// Run `future` to completion on the shared runtime.
///
/// Panics when called from inside a tokio runtime; async callers use the
/// `*_async` / `execute` variants instead.
pub fn block_on<F: Future>(future: F) -> F::Output {
    get_runtime().block_on(future)
}
