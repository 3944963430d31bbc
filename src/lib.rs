//! Pipelined, pooled client engine for RESP servers.
//!
//! Build a typed [`Command`] (or take one from [`commands`]), then run it
//! through a [`Client`], a [`ConnectionPool`] or a single
//! [`RedisConnection`]. Many callers can share one connection: requests
//! are pipelined and every reply is routed back to its caller in order.

pub mod client;
pub mod command;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod observer;
pub mod resp;
pub mod runtime;

pub use client::Client;
pub use command::{Blocking, Command, ScanResult, ToArg};
pub use config::ConnectionConfig;
pub use connection::{ConnectionPool, ConnectionState, PoolGuard, RedisConnection, Reply};
pub use error::{Error, RedisErrorKind, Result};
pub use observer::{CallInfo, CallObserver, TracingObserver};
pub use resp::RespValue;
