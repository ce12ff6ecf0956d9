use thiserror::Error;

/// Errors that can occur while issuing a shared access signature
#[derive(Debug, Clone, Error)]
pub enum SasError {
    /// Storage account name or key was not configured
    #[error("Missing storage credential: {0}")]
    MissingCredential(&'static str),

    /// Account key is not valid base64
    #[error("Invalid storage account key: {0}")]
    InvalidAccountKey(String),

    /// Blob name is empty
    #[error("Blob name must not be empty")]
    EmptyBlobName,
}

/// Errors returned by the data warehouse client
#[derive(Debug, Clone, Error)]
pub enum WarehouseError {
    /// No session has been established (startup login failed or never ran)
    #[error("Warehouse is not connected")]
    NotConnected,

    /// Required connection setting is missing
    #[error("Missing warehouse setting: {0}")]
    MissingSetting(&'static str),

    /// Network or transport failure talking to the warehouse
    #[error("Connection error: {0}")]
    Connection(String),

    /// Warehouse rejected the login request
    #[error("Login failed ({code}): {message}")]
    Login { code: String, message: String },

    /// Warehouse rejected or failed the query
    #[error("Query failed ({code}): {message}")]
    Query { code: String, message: String },

    /// Response body did not have the expected shape
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for WarehouseError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            WarehouseError::Decode(err.to_string())
        } else {
            WarehouseError::Connection(err.to_string())
        }
    }
}
