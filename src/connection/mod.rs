pub mod buffer;
pub mod connector;
pub mod framed;
pub mod pool;
pub mod tcp;

#[cfg(test)]
pub(crate) mod mock;

pub use connector::{ConnectionState, Connector, Reply};
pub use pool::{ConnectionPool, PoolGuard};
pub use tcp::RedisConnection;
