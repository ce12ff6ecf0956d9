//! Snowflake implementation of [`Warehouse`].
//!
//! Talks to the same REST endpoints the official connectors use:
//!
//! ```text
//! POST /session/v1/login-request   - exchange user/password for session + master tokens
//! POST /session/token-request      - renew the session token with the master token
//! POST /queries/v1/query-request   - run SQL with `Authorization: Snowflake Token="..."`
//! GET  {chunk url}                 - download the remaining rows of a large result
//! ```
//!
//! Results are requested in JSON format. Each row in the `rowset` is an array
//! of strings (or nulls) which is decoded into a JSON object using the column
//! names and types from `rowtype`. Results too large to inline are split into
//! chunks that are fetched in order and appended to the first rowset.
//!
//! # Session lifetime
//!
//! Session tokens expire. [`SnowflakeConnection::spawn_session_keeper`] runs a
//! background task that renews the session shortly before it expires, and
//! keeps retrying the login while no session is held. Queries themselves never
//! log in or retry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, SecondsFormat, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Number, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Row, Warehouse};
use crate::error::WarehouseError;

// =============================================================================
// Constants
// =============================================================================

/// Database holding the `events` table.
pub const DEFAULT_DATABASE: &str = "speedsqueak";

/// Schema holding the `events` table.
pub const DEFAULT_SCHEMA: &str = "public";

const LOGIN_PATH: &str = "/session/v1/login-request";
const QUERY_PATH: &str = "/queries/v1/query-request";
const TOKEN_PATH: &str = "/session/token-request";
const CLIENT_APP_ID: &str = "speedsqueak-web";

/// Error code for an expired session token.
const SESSION_EXPIRED: &str = "390112";

/// How long before expiry the session is renewed.
const RENEW_MARGIN: Duration = Duration::from_secs(300);

/// Delay between login attempts while no session is held.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(30);

/// Session lifetime assumed when the login response does not state one.
const DEFAULT_SESSION_VALIDITY: Duration = Duration::from_secs(3600);

// Keys for SSE-C encrypted result chunks
const SSE_C_ALGORITHM: &str = "x-amz-server-side-encryption-customer-algorithm";
const SSE_C_KEY: &str = "x-amz-server-side-encryption-customer-key";

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for a Snowflake account.
#[derive(Clone)]
pub struct SnowflakeConfig {
    /// Account identifier, e.g. `xy12345` or `xy12345.us-east-1`
    pub account: Option<String>,

    /// Login name
    pub user: Option<String>,

    /// Password
    pub password: Option<String>,

    /// Virtual warehouse to run queries on (account default if unset)
    pub warehouse: Option<String>,

    /// Database for the session
    pub database: String,

    /// Schema for the session
    pub schema: String,

    /// Override for the service URL (defaults to `https://{account}.snowflakecomputing.com`)
    pub base_url: Option<String>,
}

impl SnowflakeConfig {
    /// Create a configuration with the default database and schema.
    pub fn new(
        account: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            account: Some(account.into()),
            user: Some(user.into()),
            password: Some(password.into()),
            warehouse: None,
            database: DEFAULT_DATABASE.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            base_url: None,
        }
    }

    /// Set the virtual warehouse.
    pub fn with_warehouse(mut self, warehouse: impl Into<String>) -> Self {
        self.warehouse = Some(warehouse.into());
        self
    }

    /// Point the client at a different service URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Whether account, user and password are all set and non-empty.
    pub fn is_configured(&self) -> bool {
        [&self.account, &self.user, &self.password]
            .iter()
            .all(|v| v.as_deref().is_some_and(|v| !v.is_empty()))
    }

    /// Service URL without a trailing slash.
    pub fn base_url(&self) -> Result<String, WarehouseError> {
        if let Some(ref url) = self.base_url {
            return Ok(url.trim_end_matches('/').to_string());
        }
        let account = required(&self.account, "SNOWFLAKE_ACCOUNT")?;
        Ok(format!("https://{}.snowflakecomputing.com", account))
    }

    /// Account name sent at login: the locator without any region suffix.
    pub fn account_name(&self) -> Result<&str, WarehouseError> {
        let account = required(&self.account, "SNOWFLAKE_ACCOUNT")?;
        Ok(account.split('.').next().unwrap_or(account))
    }
}

impl std::fmt::Debug for SnowflakeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeConfig")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, WarehouseError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(WarehouseError::MissingSetting(name))
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Serialize)]
struct LoginRequest<'a> {
    data: LoginData<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct LoginData<'a> {
    client_app_id: &'a str,
    client_app_version: &'a str,
    account_name: &'a str,
    login_name: &'a str,
    password: &'a str,
    session_parameters: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponseData {
    token: String,
    #[serde(default)]
    master_token: Option<String>,
    #[serde(default)]
    validity_in_seconds: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenewRequest<'a> {
    old_session_token: &'a str,
    request_type: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenewResponseData {
    session_token: String,
    #[serde(default, rename = "validityInSecondsST")]
    validity_in_seconds_st: Option<u64>,
    #[serde(default)]
    master_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    sql_text: &'a str,
    async_exec: bool,
    sequence_id: u64,
    query_submission_time: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponseData {
    #[serde(default)]
    rowtype: Vec<ColumnDescriptor>,
    #[serde(default)]
    rowset: Vec<Vec<Value>>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    returned: Option<u64>,
    #[serde(default)]
    query_result_format: Option<String>,
    #[serde(default)]
    chunks: Vec<ChunkDescriptor>,
    #[serde(default)]
    chunk_headers: Option<HashMap<String, String>>,
    #[serde(default)]
    qrmk: Option<String>,
}

/// A remote piece of a large result set.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkDescriptor {
    url: String,
    #[serde(default)]
    row_count: Option<u64>,
}

/// Envelope shared by every Snowflake REST response.
#[derive(Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn code(&self) -> String {
        match &self.code {
            Some(Value::String(s)) => s.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => "unknown".to_string(),
        }
    }

    fn message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "no message".to_string())
    }
}

/// Column metadata from a query response.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name as returned by the warehouse
    pub name: String,

    /// Snowflake type name (`fixed`, `text`, `timestamp_ntz`, ...)
    #[serde(rename = "type")]
    pub type_name: String,

    /// Digits after the decimal point for `fixed` columns
    #[serde(default)]
    pub scale: Option<i64>,
}

/// How a column's string cells are converted to JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Integer number
    Integer,
    /// Decimal or floating point number
    Float,
    /// Boolean
    Boolean,
    /// Semi-structured value holding embedded JSON
    SemiStructured,
    /// `timestamp_ntz` or `timestamp_ltz`: epoch seconds, rendered in UTC
    Timestamp,
    /// `timestamp_tz`: epoch seconds plus an encoded offset
    TimestampTz,
    /// Days since the epoch
    Date,
    /// Seconds since midnight
    Time,
    /// Everything else, passed as a string
    Text,
}

impl ColumnType {
    /// Pick the conversion for a column.
    pub fn from_descriptor(column: &ColumnDescriptor) -> Self {
        match column.type_name.to_ascii_lowercase().as_str() {
            "fixed" if column.scale.unwrap_or(0) == 0 => ColumnType::Integer,
            "fixed" | "real" => ColumnType::Float,
            "boolean" => ColumnType::Boolean,
            "variant" | "object" | "array" => ColumnType::SemiStructured,
            "timestamp_ntz" | "timestamp_ltz" => ColumnType::Timestamp,
            "timestamp_tz" => ColumnType::TimestampTz,
            "date" => ColumnType::Date,
            "time" => ColumnType::Time,
            _ => ColumnType::Text,
        }
    }

    fn decode(self, raw: &str) -> Value {
        let decoded = match self {
            ColumnType::Integer => raw.parse::<i64>().ok().map(Value::from),
            ColumnType::Float => raw
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            ColumnType::Boolean => match raw {
                "1" | "true" | "TRUE" => Some(Value::Bool(true)),
                "0" | "false" | "FALSE" => Some(Value::Bool(false)),
                _ => None,
            },
            ColumnType::SemiStructured => serde_json::from_str(raw).ok(),
            ColumnType::Timestamp => decode_timestamp(raw).map(Value::String),
            ColumnType::TimestampTz => decode_timestamp_tz(raw).map(Value::String),
            ColumnType::Date => decode_date(raw).map(Value::String),
            ColumnType::Time => decode_time(raw).map(Value::String),
            ColumnType::Text => None,
        };
        decoded.unwrap_or_else(|| Value::String(raw.to_string()))
    }
}

/// Split `seconds.fraction` into whole seconds and nanoseconds, flooring
/// negative values so the nanosecond part is always positive.
fn parse_epoch(raw: &str) -> Option<(i64, u32)> {
    let (whole, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    let mut seconds: i64 = whole.parse().ok()?;

    let digits: String = fraction.chars().take(9).collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut nanos: u32 = if digits.is_empty() {
        0
    } else {
        format!("{:0<9}", digits).parse().ok()?
    };

    if whole.starts_with('-') && nanos > 0 {
        seconds -= 1;
        nanos = 1_000_000_000 - nanos;
    }
    Some((seconds, nanos))
}

fn decode_timestamp(raw: &str) -> Option<String> {
    let (seconds, nanos) = parse_epoch(raw)?;
    let utc = DateTime::<Utc>::from_timestamp(seconds, nanos)?;
    Some(utc.to_rfc3339_opts(SecondsFormat::Millis, true))
}

// Offset is minutes east of UTC plus 1440.
fn decode_timestamp_tz(raw: &str) -> Option<String> {
    let (epoch, offset) = raw.split_once(' ')?;
    let (seconds, nanos) = parse_epoch(epoch)?;
    let minutes: i32 = offset.trim().parse().ok()?;
    let offset = FixedOffset::east_opt((minutes - 1440) * 60)?;
    let local = DateTime::<Utc>::from_timestamp(seconds, nanos)?.with_timezone(&offset);
    Some(local.to_rfc3339_opts(SecondsFormat::Millis, false))
}

fn decode_date(raw: &str) -> Option<String> {
    let days: i64 = raw.parse().ok()?;
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    let date = epoch.checked_add_signed(chrono::Duration::try_days(days)?)?;
    Some(date.format("%Y-%m-%d").to_string())
}

fn decode_time(raw: &str) -> Option<String> {
    let (seconds, nanos) = parse_epoch(raw)?;
    let seconds = u32::try_from(seconds).ok()?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(seconds, nanos)?;
    Some(time.format("%H:%M:%S%.f").to_string())
}

/// Convert a JSON-format rowset into rows keyed by column name.
///
/// Column order follows `rowtype`. Cells that fail to parse as their declared
/// type are kept as the raw string.
pub fn decode_rowset(
    rowtype: &[ColumnDescriptor],
    rowset: Vec<Vec<Value>>,
) -> Result<Vec<Row>, WarehouseError> {
    let types: Vec<ColumnType> = rowtype.iter().map(ColumnType::from_descriptor).collect();

    rowset
        .into_iter()
        .enumerate()
        .map(|(index, cells)| {
            if cells.len() != rowtype.len() {
                return Err(WarehouseError::Decode(format!(
                    "row {} has {} cells but {} columns were described",
                    index,
                    cells.len(),
                    rowtype.len()
                )));
            }

            let mut row = Row::new();
            for ((column, column_type), cell) in rowtype.iter().zip(&types).zip(cells) {
                let value = match cell {
                    Value::String(raw) => column_type.decode(&raw),
                    other => other,
                };
                row.insert(column.name.clone(), value);
            }
            Ok(row)
        })
        .collect()
}

// =============================================================================
// Connection
// =============================================================================

/// Tokens held for an open session.
#[derive(Clone)]
struct Session {
    token: String,
    master_token: Option<String>,
    validity: Duration,
}

/// A Snowflake session shared by every request.
///
/// Created once at startup. [`connect`](Self::connect) logs in and stores the
/// session token; queries issued before a successful login fail with
/// [`WarehouseError::NotConnected`]. The session is kept alive by
/// [`spawn_session_keeper`](Self::spawn_session_keeper), never from inside a
/// query.
pub struct SnowflakeConnection {
    client: Client,
    config: SnowflakeConfig,
    session: RwLock<Option<Session>>,
    sequence: AtomicU64,
}

impl SnowflakeConnection {
    /// Create an unconnected handle.
    pub fn new(config: SnowflakeConfig) -> Result<Self, WarehouseError> {
        let client = Client::builder()
            .user_agent(concat!("speedsqueak-web/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            config,
            session: RwLock::new(None),
            sequence: AtomicU64::new(0),
        })
    }

    /// The connection settings.
    pub fn config(&self) -> &SnowflakeConfig {
        &self.config
    }

    /// Whether a session token is held.
    pub async fn is_connected(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Lifetime of the current session token, as reported by the warehouse.
    pub async fn session_validity(&self) -> Option<Duration> {
        self.session.read().await.as_ref().map(|s| s.validity)
    }

    /// Log in and store the session token.
    ///
    /// Any previously held token is replaced on success and left untouched on
    /// failure.
    pub async fn connect(&self) -> Result<(), WarehouseError> {
        let base_url = self.config.base_url()?;
        let account_name = self.config.account_name()?;
        let user = required(&self.config.user, "SNOWFLAKE_USER")?;
        let password = required(&self.config.password, "SNOWFLAKE_PASS")?;

        let mut params: Vec<(&str, String)> = vec![
            ("request_id", Uuid::new_v4().to_string()),
            ("databaseName", self.config.database.clone()),
            ("schemaName", self.config.schema.clone()),
        ];
        if let Some(ref warehouse) = self.config.warehouse {
            params.push(("warehouse", warehouse.clone()));
        }

        let body = LoginRequest {
            data: LoginData {
                client_app_id: CLIENT_APP_ID,
                client_app_version: env!("CARGO_PKG_VERSION"),
                account_name,
                login_name: user,
                password,
                session_parameters: json!({ "QUERY_RESULT_FORMAT": "JSON" }),
            },
        };

        debug!(account = account_name, user = user, "Logging in to Snowflake");

        let response: ApiResponse<LoginResponseData> = self
            .client
            .post(format!("{}{}", base_url, LOGIN_PATH))
            .query(&params)
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.success {
            return Err(WarehouseError::Login {
                code: response.code(),
                message: response.message(),
            });
        }

        let data = response
            .data
            .ok_or_else(|| WarehouseError::Decode("login response has no data".to_string()))?;

        *self.session.write().await = Some(Session {
            token: data.token,
            master_token: data.master_token,
            validity: data
                .validity_in_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SESSION_VALIDITY),
        });
        info!(
            account = account_name,
            database = %self.config.database,
            schema = %self.config.schema,
            "Connected to Snowflake"
        );

        Ok(())
    }

    /// Replace the session token before it expires.
    ///
    /// Uses the master token when one is held. Falls back to a full login when
    /// there is no session yet or the warehouse refuses the renewal.
    pub async fn renew(&self) -> Result<(), WarehouseError> {
        let current = self.session.read().await.clone();
        let Some(Session {
            token,
            master_token: Some(master_token),
            ..
        }) = current
        else {
            return self.connect().await;
        };

        let base_url = self.config.base_url()?;
        let body = RenewRequest {
            old_session_token: &token,
            request_type: "RENEW",
        };

        let response: ApiResponse<RenewResponseData> = self
            .client
            .post(format!("{}{}", base_url, TOKEN_PATH))
            .query(&[("requestId", Uuid::new_v4().to_string())])
            .header(AUTHORIZATION, format!("Snowflake Token=\"{}\"", master_token))
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.success {
            warn!(
                code = %response.code(),
                message = %response.message(),
                "Session renewal refused, logging in again"
            );
            return self.connect().await;
        }
        let Some(data) = response.data else {
            warn!("Session renewal returned no data, logging in again");
            return self.connect().await;
        };

        let mut session = self.session.write().await;
        *session = Some(Session {
            token: data.session_token,
            master_token: data.master_token.or(Some(master_token)),
            validity: data
                .validity_in_seconds_st
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SESSION_VALIDITY),
        });
        debug!("Snowflake session renewed");

        Ok(())
    }

    /// Keep the session alive in the background.
    ///
    /// While a session is held the task renews it five minutes before it
    /// expires. After a failed startup login or a failed renewal it tries again
    /// every 30 seconds.
    pub fn spawn_session_keeper(self: &Arc<Self>) -> JoinHandle<()> {
        let connection = Arc::clone(self);

        tokio::spawn(async move {
            let mut delay = connection.next_upkeep().await;
            loop {
                tokio::time::sleep(delay).await;

                delay = match connection.renew().await {
                    Ok(()) => connection.next_upkeep().await,
                    Err(e) => {
                        warn!("Snowflake session upkeep failed: {}", e);
                        RECONNECT_INTERVAL
                    }
                };
            }
        })
    }

    async fn next_upkeep(&self) -> Duration {
        match self.session_validity().await {
            Some(validity) => renew_delay(validity),
            None => RECONNECT_INTERVAL,
        }
    }

    async fn fetch_chunks(
        &self,
        data: &QueryResponseData,
    ) -> Result<Vec<Vec<Value>>, WarehouseError> {
        let mut rowset = Vec::new();

        for (index, chunk) in data.chunks.iter().enumerate() {
            let mut request = self.client.get(&chunk.url);
            match (&data.chunk_headers, &data.qrmk) {
                (Some(headers), _) => {
                    for (name, value) in headers {
                        request = request.header(name.as_str(), value.as_str());
                    }
                }
                (None, Some(qrmk)) => {
                    request = request
                        .header(SSE_C_ALGORITHM, "AES256")
                        .header(SSE_C_KEY, qrmk.as_str());
                }
                (None, None) => {}
            }

            let body = request.send().await?.error_for_status()?.text().await?;

            // Chunk bodies are comma-separated rows without the enclosing brackets
            let rows: Vec<Vec<Value>> = serde_json::from_str(&format!("[{}]", body))
                .map_err(|e| WarehouseError::Decode(format!("result chunk {}: {}", index, e)))?;

            if let Some(expected) = chunk.row_count {
                if rows.len() as u64 != expected {
                    return Err(WarehouseError::Decode(format!(
                        "result chunk {} has {} rows, expected {}",
                        index,
                        rows.len(),
                        expected
                    )));
                }
            }

            debug!(chunk = index, rows = rows.len(), "Fetched result chunk");
            rowset.extend(rows);
        }

        Ok(rowset)
    }
}

/// Time to wait before renewing a session with the given lifetime.
fn renew_delay(validity: Duration) -> Duration {
    if validity > RENEW_MARGIN * 2 {
        validity - RENEW_MARGIN
    } else {
        validity / 2
    }
}

#[async_trait]
impl Warehouse for SnowflakeConnection {
    async fn query(&self, sql: &str) -> Result<Vec<Row>, WarehouseError> {
        let token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.token.clone())
            .ok_or(WarehouseError::NotConnected)?;
        let base_url = self.config.base_url()?;

        let body = QueryRequest {
            sql_text: sql,
            async_exec: false,
            sequence_id: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            query_submission_time: Utc::now().timestamp_millis(),
        };

        let response: ApiResponse<QueryResponseData> = self
            .client
            .post(format!("{}{}", base_url, QUERY_PATH))
            .query(&[("requestId", Uuid::new_v4().to_string())])
            .header(AUTHORIZATION, format!("Snowflake Token=\"{}\"", token))
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.success {
            let code = response.code();
            if code == SESSION_EXPIRED {
                warn!("Snowflake session expired before renewal");
            }
            return Err(WarehouseError::Query {
                code,
                message: response.message(),
            });
        }

        let mut data = response
            .data
            .ok_or_else(|| WarehouseError::Decode("query response has no data".to_string()))?;

        if let Some(ref format) = data.query_result_format {
            if !format.eq_ignore_ascii_case("json") {
                return Err(WarehouseError::Decode(format!(
                    "unsupported result format: {}",
                    format
                )));
            }
        }

        let mut rowset = std::mem::take(&mut data.rowset);
        if !data.chunks.is_empty() {
            rowset.extend(self.fetch_chunks(&data).await?);
        }

        if let Some(total) = data.total {
            if (rowset.len() as u64) < total {
                return Err(WarehouseError::Decode(format!(
                    "result has {} rows but the warehouse reported {}",
                    rowset.len(),
                    total
                )));
            }
        }

        let rows = decode_rowset(&data.rowtype, rowset)?;
        debug!(rows = rows.len(), chunks = data.chunks.len(), "Query completed");
        Ok(rows)
    }
}

// =============================================================================
// Tests
// =============================================================================
