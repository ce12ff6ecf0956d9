//! Configuration management for the SpeedSqueak web backend.
//!
//! Every setting can be given as a command-line flag or through the
//! environment. A `.env` file in the working directory is loaded before
//! parsing, so the usual deployment is a `.env` next to the binary.
//!
//! # Environment Variables
//!
//! - `HOST` - Server bind address (default: 0.0.0.0)
//! - `PORT` - Server port (default: 3333)
//! - `STATIC_DIR` - Frontend directory (default: frontend/public)
//! - `AZURE_STORAGE_NAME` - Storage account name
//! - `AZURE_STORAGE_KEY` - Storage account key (base64)
//! - `AZURE_STORAGE_CONTAINER` - Image container (default: images)
//! - `SNOWFLAKE_ACCOUNT` - Snowflake account identifier
//! - `SNOWFLAKE_USER` - Snowflake login name
//! - `SNOWFLAKE_PASS` - Snowflake password
//! - `SNOWFLAKE_WAREHOUSE` - Snowflake virtual warehouse
//! - `SNOWFLAKE_DATABASE` - Database (default: speedsqueak)
//! - `SNOWFLAKE_SCHEMA` - Schema (default: public)
//! - `SNOWFLAKE_URL` - Service URL override
//! - `WAREHOUSE_REQUIRED` - Exit if the startup login fails (default: false)
//! - `CORS_ORIGINS` - Comma-separated allowed origins (default: no CORS)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::storage::{SharedKeySigner, StorageCredential, DEFAULT_CONTAINER};
use crate::warehouse::{SnowflakeConfig, DEFAULT_DATABASE, DEFAULT_SCHEMA};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3333;

/// Default directory for the static frontend.
pub const DEFAULT_STATIC_DIR: &str = "frontend/public";

// =============================================================================
// CLI
// =============================================================================

/// SpeedSqueak web backend.
///
/// Serves the frontend, issues read-only SAS URLs for captured images and
/// returns recorded events from the warehouse.
#[derive(Parser, Debug)]
#[command(name = "speedsqueak-web")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Arguments for the default `serve` command
    #[command(flatten)]
    pub serve: ServeConfig,
}

impl Cli {
    /// Resolve the command to run, defaulting to `serve`.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve(ServeConfig),

    /// Issue a read-only SAS URL for a blob and print it
    Sign(SignConfig),

    /// Check storage credentials and warehouse connectivity
    Check(CheckConfig),
}

// =============================================================================
// Shared Argument Groups
// =============================================================================

/// Blob storage settings.
#[derive(Args, Debug, Clone, Default)]
pub struct StorageArgs {
    /// Storage account name.
    #[arg(long = "storage-account", env = "AZURE_STORAGE_NAME")]
    pub account_name: Option<String>,

    /// Storage account key (base64).
    #[arg(long = "storage-key", env = "AZURE_STORAGE_KEY", hide_env_values = true)]
    pub account_key: Option<String>,

    /// Container holding the images.
    #[arg(long = "storage-container", default_value = DEFAULT_CONTAINER, env = "AZURE_STORAGE_CONTAINER")]
    pub container: String,
}

impl StorageArgs {
    /// Build the shared-key signer for these settings.
    pub fn signer(&self) -> SharedKeySigner {
        let credential =
            StorageCredential::from_parts(self.account_name.clone(), self.account_key.clone());
        SharedKeySigner::new(credential, self.container.clone())
    }
}

/// Warehouse settings.
#[derive(Args, Debug, Clone, Default)]
pub struct WarehouseArgs {
    /// Snowflake account identifier.
    #[arg(long = "snowflake-account", env = "SNOWFLAKE_ACCOUNT")]
    pub account: Option<String>,

    /// Snowflake login name.
    #[arg(long = "snowflake-user", env = "SNOWFLAKE_USER")]
    pub user: Option<String>,

    /// Snowflake password.
    #[arg(long = "snowflake-password", env = "SNOWFLAKE_PASS", hide_env_values = true)]
    pub password: Option<String>,

    /// Snowflake virtual warehouse.
    #[arg(long = "snowflake-warehouse", env = "SNOWFLAKE_WAREHOUSE")]
    pub warehouse: Option<String>,

    /// Database containing the events table.
    #[arg(long = "snowflake-database", default_value = DEFAULT_DATABASE, env = "SNOWFLAKE_DATABASE")]
    pub database: String,

    /// Schema containing the events table.
    #[arg(long = "snowflake-schema", default_value = DEFAULT_SCHEMA, env = "SNOWFLAKE_SCHEMA")]
    pub schema: String,

    /// Service URL override (defaults to https://{account}.snowflakecomputing.com).
    #[arg(long = "snowflake-url", env = "SNOWFLAKE_URL")]
    pub base_url: Option<String>,
}

impl WarehouseArgs {
    /// Build the Snowflake connection settings.
    pub fn snowflake_config(&self) -> SnowflakeConfig {
        SnowflakeConfig {
            account: non_empty(&self.account),
            user: non_empty(&self.user),
            password: non_empty(&self.password),
            warehouse: non_empty(&self.warehouse),
            database: self.database.clone(),
            schema: self.schema.clone(),
            base_url: non_empty(&self.base_url),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.is_empty())
}

// =============================================================================
// Serve Command
// =============================================================================

/// Configuration for the `serve` command.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PORT")]
    pub port: u16,

    /// Directory with the static frontend.
    #[arg(long, default_value = DEFAULT_STATIC_DIR, env = "STATIC_DIR")]
    pub static_dir: PathBuf,

    // =========================================================================
    // Backends
    // =========================================================================
    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(flatten)]
    pub warehouse: WarehouseArgs,

    /// Exit at startup if the warehouse login fails.
    ///
    /// By default the server keeps running and `/api/events` answers 500
    /// until the process is restarted.
    #[arg(long, default_value_t = false, env = "WAREHOUSE_REQUIRED")]
    pub warehouse_required: bool,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, no CORS headers are sent.
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    ///
    /// Missing storage or warehouse credentials are not errors: the matching
    /// endpoint answers 500 instead. See [`ServeConfig::warnings`].
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("port must be greater than 0".to_string());
        }

        if self.host.is_empty() {
            return Err("host must not be empty. Set --host or HOST".to_string());
        }

        if self.storage.container.is_empty() {
            return Err(
                "storage container must not be empty. Set --storage-container or AZURE_STORAGE_CONTAINER"
                    .to_string(),
            );
        }

        if self.warehouse_required && !self.warehouse.snowflake_config().is_configured() {
            return Err(
                "warehouse is required but SNOWFLAKE_ACCOUNT, SNOWFLAKE_USER and SNOWFLAKE_PASS are not all set"
                    .to_string(),
            );
        }

        Ok(())
    }

    /// Non-fatal configuration problems worth logging at startup.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !self.storage.signer().credential().is_configured() {
            warnings.push(
                "AZURE_STORAGE_NAME / AZURE_STORAGE_KEY not set; /api/generate-sas-url will fail"
                    .to_string(),
            );
        }

        if !self.warehouse.snowflake_config().is_configured() {
            warnings.push(
                "SNOWFLAKE_ACCOUNT / SNOWFLAKE_USER / SNOWFLAKE_PASS not set; /api/events will fail"
                    .to_string(),
            );
        }

        if !self.static_dir.is_dir() {
            warnings.push(format!(
                "static directory {} does not exist; only API routes will respond",
                self.static_dir.display()
            ));
        }

        warnings
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Sign Command
// =============================================================================

/// Output format for the `sign` command.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignOutputFormat {
    /// The full SAS URL
    #[default]
    Url,
    /// The same JSON body `/api/generate-sas-url` returns, plus the expiry
    Json,
}

/// Configuration for the `sign` command.
#[derive(Args, Debug, Clone)]
pub struct SignConfig {
    /// Name of the blob to sign.
    pub blob_name: String,

    #[command(flatten)]
    pub storage: StorageArgs,

    /// Output format.
    #[arg(long, value_enum, default_value_t = SignOutputFormat::Url)]
    pub format: SignOutputFormat,
}

impl SignConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.blob_name.is_empty() {
            return Err("Blob name is required".to_string());
        }
        if self.storage.account_name.is_none() {
            return Err("Storage account is required. Set --storage-account or AZURE_STORAGE_NAME".to_string());
        }
        if self.storage.account_key.is_none() {
            return Err("Storage key is required. Set --storage-key or AZURE_STORAGE_KEY".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Check Command
// =============================================================================

/// Configuration for the `check` command.
#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(flatten)]
    pub warehouse: WarehouseArgs,

    /// Skip running the events query after login.
    #[arg(long, default_value_t = false)]
    pub skip_query: bool,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================
