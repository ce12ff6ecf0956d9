//! Data warehouse access layer.
//!
//! The server runs exactly one query, [`EVENTS_QUERY`], and passes the rows
//! through to the client untouched. Handlers only see the [`Warehouse`] trait;
//! [`SnowflakeConnection`] is the production implementation.
//!
//! # Usage
//!
//! ```ignore
//! use speedsqueak_web::warehouse::{SnowflakeConfig, SnowflakeConnection, Warehouse, EVENTS_QUERY};
//!
//! let connection = SnowflakeConnection::new(config)?;
//!
//! // Log in once at startup
//! connection.connect().await?;
//!
//! // Keep the session alive, then reuse it for every request
//! let connection = Arc::new(connection);
//! connection.spawn_session_keeper();
//! let rows = connection.query(EVENTS_QUERY).await?;
//! ```

mod snowflake;

use async_trait::async_trait;

use crate::error::WarehouseError;

pub use snowflake::{
    decode_rowset, ColumnDescriptor, ColumnType, SnowflakeConfig, SnowflakeConnection,
    DEFAULT_DATABASE, DEFAULT_SCHEMA,
};

/// The query behind `GET /api/events`.
pub const EVENTS_QUERY: &str = "SELECT * FROM events ORDER BY timestamp DESC";

/// A single result row, keyed by column name in result order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A read-only SQL endpoint.
///
/// Implementations hold a long-lived session that is shared across requests;
/// `query` must not mutate anything visible to callers.
#[async_trait]
pub trait Warehouse: Send + Sync + 'static {
    /// Run `sql` and return every row in the order the warehouse produced them.
    async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError>;
}

#[async_trait]
impl<T: Warehouse> Warehouse for std::sync::Arc<T> {
    async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
        (**self).query(sql).await
    }
}
