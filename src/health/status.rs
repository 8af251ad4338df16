//! Reading node status over a pooled MySQL connection
//!
//! Two values decide a node's health:
//! 1. `wsrep_local_state` (SHOW GLOBAL STATUS), an integer state code
//! 2. `read_only` (SHOW GLOBAL VARIABLES), "ON" or "OFF"

use std::sync::Arc;

use async_trait::async_trait;

use crate::pool::{ConnectionError, PooledConnection, StatelessPool};
use crate::protocol::TextRow;

pub const LOCAL_STATE_QUERY: &str = "SHOW GLOBAL STATUS LIKE 'wsrep_local_state'";
pub const READ_ONLY_QUERY: &str = "SHOW GLOBAL VARIABLES LIKE 'read_only'";

/// Error while reading node status
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("no rows in result set")]
    NoRows,
    #[error("cannot convert {variable} value {value:?}")]
    Scan { variable: &'static str, value: String },
}

/// Where evaluations get their status readings from
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Open a probe for one evaluation; dropping it releases the connection
    async fn open(&self) -> Result<Box<dyn NodeProbe>, CheckError>;
}

/// Status queries against one borrowed connection
#[async_trait]
pub trait NodeProbe: Send {
    /// The `wsrep_local_state` code
    async fn local_state(&mut self) -> Result<i64, CheckError>;

    /// The `read_only` variable as reported ("ON"/"OFF")
    async fn read_only(&mut self) -> Result<String, CheckError>;
}

/// Status source backed by the connection pool
pub struct MySqlStatusSource {
    pool: Arc<StatelessPool>,
}

impl MySqlStatusSource {
    pub fn new(pool: Arc<StatelessPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusSource for MySqlStatusSource {
    async fn open(&self) -> Result<Box<dyn NodeProbe>, CheckError> {
        let conn = self.pool.get().await?;
        Ok(Box::new(MySqlProbe { conn }))
    }
}

struct MySqlProbe {
    conn: PooledConnection,
}

impl MySqlProbe {
    /// Run a `SHOW ... LIKE` query and return the Value column of the first row
    async fn variable(&mut self, sql: &str, variable: &'static str) -> Result<String, CheckError> {
        let rows = self.conn.query(sql).await?;
        value_column(rows, variable)
    }
}

#[async_trait]
impl NodeProbe for MySqlProbe {
    async fn local_state(&mut self) -> Result<i64, CheckError> {
        let value = self.variable(LOCAL_STATE_QUERY, "wsrep_local_state").await?;
        value.parse::<i64>().map_err(|_| CheckError::Scan {
            variable: "wsrep_local_state",
            value,
        })
    }

    async fn read_only(&mut self) -> Result<String, CheckError> {
        self.variable(READ_ONLY_QUERY, "read_only").await
    }
}

/// Extract the second (Value) column of the first row
fn value_column(rows: Vec<TextRow>, variable: &'static str) -> Result<String, CheckError> {
    let row = rows.into_iter().next().ok_or(CheckError::NoRows)?;
    match row.into_iter().nth(1) {
        Some(Some(value)) => Ok(value),
        Some(None) => Err(CheckError::Scan {
            variable,
            value: "NULL".to_string(),
        }),
        None => Err(CheckError::Scan {
            variable,
            value: String::new(),
        }),
    }
}
