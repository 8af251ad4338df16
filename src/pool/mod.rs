mod connection;
mod stateless;

pub use connection::{BackendConnection, ConnectionError};
pub use stateless::{PooledConnection, StatelessPool, StatelessPoolConfig};
