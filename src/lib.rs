//! # SpeedSqueak Web
//!
//! Web backend for the SpeedSqueak dashboard.
//!
//! ## Features
//!
//! - **Static frontend**: serves the dashboard from a local directory
//! - **Signed image URLs**: issues one-hour, read-only Azure Blob Storage SAS
//!   URLs so the browser fetches images straight from storage
//! - **Events proxy**: runs the events query against Snowflake and returns
//!   the rows as JSON
//!
//! ## Architecture
//!
//! - [`storage`] - Shared-key SAS signing
//! - [`warehouse`] - Snowflake session and row decoding
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use speedsqueak_web::{create_router, RouterConfig, SharedKeySigner, SnowflakeConfig,
//!     SnowflakeConnection, StorageCredential};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let signer = SharedKeySigner::new(StorageCredential::new("account", "a2V5"), "images");
//!
//!     let connection = SnowflakeConnection::new(SnowflakeConfig::new("xy12345", "user", "pass"))?;
//!     connection.connect().await?;
//!
//!     let router = create_router(signer, connection, RouterConfig::new("frontend/public"));
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3333").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod server;
pub mod storage;
pub mod warehouse;

// Re-export commonly used types
pub use config::{
    CheckConfig, Cli, Command, ServeConfig, SignConfig, SignOutputFormat, StorageArgs,
    WarehouseArgs,
};
pub use error::{SasError, WarehouseError};
pub use server::{
    create_router, events_handler, sas_url_handler, ApiError, AppState, RouterConfig,
    SasUrlParams, SasUrlResponse,
};
pub use storage::{BlobSas, SasIssuer, SasPermissions, SharedKeySigner, StorageCredential};
pub use warehouse::{Row, SnowflakeConfig, SnowflakeConnection, Warehouse, EVENTS_QUERY};
