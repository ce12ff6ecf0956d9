//! Storage account shared-key credential.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::SasError;

/// Storage account name and shared key.
///
/// Both parts are optional so the server can start without storage configured;
/// every signing attempt then fails with [`SasError::MissingCredential`].
/// The key is kept in its base64 form and decoded on each use, so a malformed
/// key surfaces as a per-request [`SasError::InvalidAccountKey`].
#[derive(Clone, Default)]
pub struct StorageCredential {
    account_name: Option<String>,
    account_key: Option<String>,
}

impl StorageCredential {
    /// Create a credential from an account name and base64 account key.
    pub fn new(account_name: impl Into<String>, account_key: impl Into<String>) -> Self {
        Self {
            account_name: Some(account_name.into()),
            account_key: Some(account_key.into()),
        }
    }

    /// Create a credential from possibly-missing configuration values.
    ///
    /// Empty strings are treated the same as missing values.
    pub fn from_parts(account_name: Option<String>, account_key: Option<String>) -> Self {
        Self {
            account_name: account_name.filter(|s| !s.is_empty()),
            account_key: account_key.filter(|s| !s.is_empty()),
        }
    }

    /// Whether both the account name and key are present.
    pub fn is_configured(&self) -> bool {
        self.account_name.is_some() && self.account_key.is_some()
    }

    /// The storage account name.
    pub fn account_name(&self) -> Result<&str, SasError> {
        self.account_name
            .as_deref()
            .ok_or(SasError::MissingCredential("AZURE_STORAGE_NAME"))
    }

    /// Decode the account key into raw HMAC key bytes.
    pub fn decoded_key(&self) -> Result<Vec<u8>, SasError> {
        let key = self
            .account_key
            .as_deref()
            .ok_or(SasError::MissingCredential("AZURE_STORAGE_KEY"))?;

        STANDARD
            .decode(key.trim())
            .map_err(|e| SasError::InvalidAccountKey(e.to_string()))
    }
}

impl std::fmt::Debug for StorageCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageCredential")
            .field("account_name", &self.account_name)
            .field("account_key", &self.account_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
