//! HTTP request handlers for the SpeedSqueak API.
//!
//! # Endpoints
//!
//! - `GET /api/generate-sas-url?blobName=...` - Issue a read-only SAS URL
//! - `GET /api/events` - Recorded events, newest first

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{SasError, WarehouseError};
use crate::storage::SasIssuer;
use crate::warehouse::{Row, Warehouse, EVENTS_QUERY};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state: the signer and the warehouse session.
///
/// Both are created once at startup and shared by every request.
pub struct AppState<I: SasIssuer, W: Warehouse> {
    /// Issues SAS URLs for `/api/generate-sas-url`
    pub issuer: Arc<I>,

    /// Answers `/api/events`
    pub warehouse: Arc<W>,
}

impl<I: SasIssuer, W: Warehouse> AppState<I, W> {
    /// Create a new application state.
    pub fn new(issuer: I, warehouse: W) -> Self {
        Self {
            issuer: Arc::new(issuer),
            warehouse: Arc::new(warehouse),
        }
    }
}

impl<I: SasIssuer, W: Warehouse> Clone for AppState<I, W> {
    fn clone(&self) -> Self {
        Self {
            issuer: Arc::clone(&self.issuer),
            warehouse: Arc::clone(&self.warehouse),
        }
    }
}

// =============================================================================
// Request / Response Types
// =============================================================================

/// Query parameters for `/api/generate-sas-url`.
#[derive(Debug, Deserialize)]
pub struct SasUrlParams {
    /// Blob to sign
    #[serde(rename = "blobName", default)]
    pub blob_name: Option<String>,
}

/// Body returned by `/api/generate-sas-url`.
#[derive(Debug, Serialize)]
pub struct SasUrlResponse {
    /// Blob URL with the SAS query string appended
    #[serde(rename = "sasUrl")]
    pub sas_url: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Errors surfaced by the API handlers.
///
/// Responses carry only a status and a short plain-text body. The underlying
/// cause of a 500 is logged and never sent to the client.
#[derive(Debug)]
pub enum ApiError {
    /// `blobName` absent or empty
    MissingBlobName,

    /// Signing failed
    Sas(SasError),

    /// Warehouse query failed
    Warehouse(WarehouseError),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingBlobName => StatusCode::BAD_REQUEST,
            ApiError::Sas(_) | ApiError::Warehouse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Plain-text response body.
    pub fn message(&self) -> &'static str {
        match self {
            ApiError::MissingBlobName => "Blob name is required",
            ApiError::Sas(_) => "Failed to generate SAS URL",
            ApiError::Warehouse(_) => "Failed to fetch data from Snowflake",
        }
    }
}

impl From<SasError> for ApiError {
    fn from(err: SasError) -> Self {
        ApiError::Sas(err)
    }
}

impl From<WarehouseError> for ApiError {
    fn from(err: WarehouseError) -> Self {
        ApiError::Warehouse(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            ApiError::MissingBlobName => {
                warn!(status = status.as_u16(), "Client error: {}", self.message());
            }
            ApiError::Sas(err) => {
                error!(
                    error_type = "sas_error",
                    status = status.as_u16(),
                    "Error generating SAS URL: {}",
                    err
                );
            }
            ApiError::Warehouse(err) => {
                error!(
                    error_type = "warehouse_error",
                    status = status.as_u16(),
                    "Warehouse query error: {}",
                    err
                );
            }
        }

        (status, self.message()).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Issue a read-only SAS URL for a blob in the image container.
///
/// # Query Parameters
///
/// - `blobName` (required): the blob to sign
///
/// # Response
///
/// `200 {"sasUrl": "https://{account}.blob.core.windows.net/images/{blob}?sv=..."}`
///
/// # Errors
///
/// - `400` if `blobName` is missing or empty; the signer is not called
/// - `500` if signing fails
pub async fn sas_url_handler<I: SasIssuer, W: Warehouse>(
    State(state): State<AppState<I, W>>,
    Query(params): Query<SasUrlParams>,
) -> Result<Json<SasUrlResponse>, ApiError> {
    let blob_name = params
        .blob_name
        .filter(|name| !name.is_empty())
        .ok_or(ApiError::MissingBlobName)?;

    let sas = state.issuer.issue_read_url(&blob_name)?;
    debug!(blob = %blob_name, expires_on = %sas.expires_on, "Generated SAS URL");

    Ok(Json(SasUrlResponse { sas_url: sas.url }))
}

/// Return every row of the events table, newest first.
///
/// Rows are passed through exactly as the warehouse returned them.
///
/// # Errors
///
/// - `500` if the warehouse is not connected or the query fails
pub async fn events_handler<I: SasIssuer, W: Warehouse>(
    State(state): State<AppState<I, W>>,
) -> Result<Json<Vec<Row>>, ApiError> {
    let rows = state.warehouse.query(EVENTS_QUERY).await?;
    debug!(rows = rows.len(), "Fetched events");
    Ok(Json(rows))
}

// =============================================================================
// Tests
// =============================================================================
