//! Galera cluster node health check over HTTP
//!
//! A load balancer polls the HTTP endpoint; each request reads the override
//! sentinels and the node's replication state and answers 200, 404, 500
//! or 503.

pub mod config;
pub mod health;
pub mod pool;
pub mod protocol;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;
