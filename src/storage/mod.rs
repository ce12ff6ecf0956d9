//! Blob storage access layer.
//!
//! This module issues Azure Blob Storage service SAS URLs: short-lived,
//! read-only links to a single blob that the browser can fetch directly
//! without ever seeing the storage account key.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        GET /api/generate-sas-url        │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            SasIssuer Trait              │
//! │   (blob name -> signed read-only URL)   │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │           SharedKeySigner               │
//! │  (HMAC-SHA256 over the string-to-sign)  │
//! └─────────────────────────────────────────┘
//! ```

mod credential;
mod sas;

pub use credential::StorageCredential;
pub use sas::{
    string_to_sign, BlobSas, SasIssuer, SasPermissions, SharedKeySigner, DEFAULT_CONTAINER,
    DEFAULT_SAS_TTL, SAS_VERSION,
};
