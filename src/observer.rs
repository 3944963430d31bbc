//! Call observers.
//!
//! Observers are registered on a [`ConnectionPool`](crate::ConnectionPool)
//! and run synchronously around every pooled call. They see the command
//! name and outcome only, never the reply value.

use crate::error::Error;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What an observer learns about one call.
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// Command name, e.g. `GET` or `OBJECT IDLETIME`.
    pub command: String,
    pub args: usize,
    /// Server address the call was routed to.
    pub addr: String,
}

/// Hooks invoked before and after each pooled call. Both default to no-ops.
pub trait CallObserver: Send + Sync {
    fn before_call(&self, _call: &CallInfo) {}

    fn after_call(&self, _call: &CallInfo, _elapsed: Duration, _outcome: Result<(), &Error>) {}
}

/// Logs every call at debug level.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl CallObserver for TracingObserver {
    fn after_call(&self, call: &CallInfo, elapsed: Duration, outcome: Result<(), &Error>) {
        match outcome {
            Ok(()) => debug!(
                command = %call.command,
                addr = %call.addr,
                elapsed_us = elapsed.as_micros() as u64,
                "call ok"
            ),
            Err(e) => debug!(
                command = %call.command,
                addr = %call.addr,
                elapsed_us = elapsed.as_micros() as u64,
                error = %e,
                "call failed"
            ),
        }
    }
}

/// Registered observers.
///
/// Callbacks run on a snapshot of the list, never under its lock, so an
/// observer may register further observers.
#[derive(Default)]
pub(crate) struct Observers {
    list: RwLock<Vec<Arc<dyn CallObserver>>>,
}

impl Observers {
    pub fn add(&self, observer: Arc<dyn CallObserver>) {
        self.list.write().push(observer);
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.list.read().len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn CallObserver>> {
        self.list.read().clone()
    }

    pub fn before(&self, call: &CallInfo) {
        for o in self.snapshot() {
            o.before_call(call);
        }
    }

    pub fn after(&self, call: &CallInfo, elapsed: Duration, outcome: Result<(), &Error>) {
        for o in self.snapshot() {
            o.after_call(call, elapsed, outcome);
        }
    }
}
