//! Azure Blob Storage service SAS generation.
//!
//! A service SAS grants access to a single blob. It is computed as an
//! HMAC-SHA256 over a newline-separated string-to-sign, keyed with the decoded
//! storage account key:
//!
//! ```text
//! sig = base64(HMAC-SHA256(base64_decode(account_key), string_to_sign))
//! ```
//!
//! The resulting URL looks like:
//!
//! ```text
//! https://{account}.blob.core.windows.net/images/cat.png?sv=2022-11-02&se=2024-05-01T13%3A00%3A00Z&sr=b&sp=r&sig=...
//! ```
//!
//! # Example
//!
//! ```rust
//! use speedsqueak_web::storage::{SasIssuer, SharedKeySigner, StorageCredential};
//!
//! // "c2VjcmV0" is base64 for "secret"
//! let credential = StorageCredential::new("myaccount", "c2VjcmV0");
//! let signer = SharedKeySigner::new(credential, "images");
//!
//! let sas = signer.issue_read_url("cat.png").unwrap();
//! assert!(sas.url.starts_with("https://myaccount.blob.core.windows.net/images/cat.png?"));
//! assert!(sas.url.contains("sp=r"));
//! ```

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SubsecRound, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;
use url::form_urlencoded;

use super::StorageCredential;
use crate::error::SasError;

// =============================================================================
// Constants
// =============================================================================

/// Storage service version the signature is computed for.
pub const SAS_VERSION: &str = "2022-11-02";

/// Container that holds the images served to the frontend.
pub const DEFAULT_CONTAINER: &str = "images";

/// Lifetime of an issued SAS (1 hour).
pub const DEFAULT_SAS_TTL: Duration = Duration::from_secs(3600);

/// Signed resource type for a single blob.
const SIGNED_RESOURCE_BLOB: &str = "b";

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Types
// =============================================================================

/// Permissions granted by a blob SAS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SasPermissions {
    pub read: bool,
    pub add: bool,
    pub create: bool,
    pub write: bool,
    pub delete: bool,
}

impl SasPermissions {
    /// Read-only access.
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }
}

/// Renders the `sp` field. The service requires the canonical `racwd` order.
impl fmt::Display for SasPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.read, 'r'),
            (self.add, 'a'),
            (self.create, 'c'),
            (self.write, 'w'),
            (self.delete, 'd'),
        ];
        for (enabled, c) in flags {
            if enabled {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

/// A signed, time-limited URL for one blob.
#[derive(Debug, Clone)]
pub struct BlobSas {
    /// Blob URL with the SAS query string appended
    pub url: String,

    /// When the signature stops being accepted
    pub expires_on: DateTime<Utc>,

    /// Permissions granted
    pub permissions: SasPermissions,
}

/// Issues read-only signed URLs for blobs.
///
/// This is the seam between the HTTP layer and the signing implementation.
pub trait SasIssuer: Send + Sync + 'static {
    /// Issue a read-only SAS URL for `blob_name`, valid from now.
    fn issue_read_url(&self, blob_name: &str) -> Result<BlobSas, SasError>;
}

// =============================================================================
// Shared Key Signer
// =============================================================================

/// Signs blob URLs with the storage account shared key.
#[derive(Debug, Clone)]
pub struct SharedKeySigner {
    credential: StorageCredential,
    container: String,
    ttl: Duration,
}

impl SharedKeySigner {
    /// Create a signer for blobs in `container` with the default 1 hour TTL.
    pub fn new(credential: StorageCredential, container: impl Into<String>) -> Self {
        Self {
            credential,
            container: container.into(),
            ttl: DEFAULT_SAS_TTL,
        }
    }

    /// Override how long issued signatures remain valid.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The container blobs are signed in.
    pub fn container(&self) -> &str {
        &self.container
    }

    /// The lifetime of issued signatures.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The storage credential.
    pub fn credential(&self) -> &StorageCredential {
        &self.credential
    }

    /// Canonical URL of a blob, without any SAS.
    ///
    /// Each `/`-separated segment of the blob name is percent-encoded so
    /// virtual directories stay intact.
    pub fn blob_url(&self, blob_name: &str) -> Result<String, SasError> {
        let account = self.credential.account_name()?;
        let encoded_name = blob_name
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        Ok(format!(
            "https://{}.blob.core.windows.net/{}/{}",
            account, self.container, encoded_name
        ))
    }

    /// Sign a read-only URL for `blob_name` as if issued at `issued_at`.
    ///
    /// Sub-second precision is dropped; the expiry is `issued_at + ttl`.
    pub fn sign_read_url_at(
        &self,
        blob_name: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<BlobSas, SasError> {
        if blob_name.is_empty() {
            return Err(SasError::EmptyBlobName);
        }

        let account = self.credential.account_name()?;
        let key = self.credential.decoded_key()?;

        let permissions = SasPermissions::read_only();
        let expires_on =
            issued_at.trunc_subsecs(0) + chrono::Duration::seconds(self.ttl.as_secs() as i64);
        let expiry = format_sas_time(&expires_on);
        let permissions_str = permissions.to_string();

        let resource = canonicalized_resource(account, &self.container, blob_name);
        let to_sign = string_to_sign(&permissions_str, &expiry, &resource);
        let signature = compute_signature(&key, &to_sign);

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        serializer.append_pair("sv", SAS_VERSION);
        serializer.append_pair("se", &expiry);
        serializer.append_pair("sr", SIGNED_RESOURCE_BLOB);
        serializer.append_pair("sp", &permissions_str);
        serializer.append_pair("sig", &signature);

        let url = format!("{}?{}", self.blob_url(blob_name)?, serializer.finish());

        debug!(
            container = %self.container,
            blob = blob_name,
            expiry = %expiry,
            "Issued blob SAS"
        );

        Ok(BlobSas {
            url,
            expires_on,
            permissions,
        })
    }
}

impl SasIssuer for SharedKeySigner {
    fn issue_read_url(&self, blob_name: &str) -> Result<BlobSas, SasError> {
        self.sign_read_url_at(blob_name, Utc::now())
    }
}

// =============================================================================
// Signature Computation
// =============================================================================

/// Build the service SAS string-to-sign for a blob.
///
/// Fields not used by this server (start time, identifier, IP range, protocol,
/// snapshot, encryption scope, response header overrides) are left empty but
/// keep their position.
pub fn string_to_sign(permissions: &str, expiry: &str, canonicalized_resource: &str) -> String {
    [
        permissions,
        "", // signed start
        expiry,
        canonicalized_resource,
        "", // signed identifier
        "", // signed IP
        "", // signed protocol
        SAS_VERSION,
        SIGNED_RESOURCE_BLOB,
        "", // snapshot time
        "", // encryption scope
        "", // rscc
        "", // rscd
        "", // rsce
        "", // rscl
        "", // rsct
    ]
    .join("\n")
}

fn canonicalized_resource(account: &str, container: &str, blob_name: &str) -> String {
    format!("/blob/{}/{}/{}", account, container, blob_name)
}

fn compute_signature(key: &[u8], string_to_sign: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

fn format_sas_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

// =============================================================================
// Tests
// =============================================================================
