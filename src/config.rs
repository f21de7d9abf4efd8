//! Server and run configuration
//!
//! [`ServerConfig`] carries everything needed to open one NNTP session.
//! [`Settings`] is the full INI-backed surface consumed by the driver:
//! endpoint, fetch range and concurrency, query filters, and NZB output
//! options.

use crate::error::{IndexError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// NNTP server configuration
///
/// # Example
///
/// ```
/// use usenet_index::ServerConfig;
///
/// let config = ServerConfig::tls("news.example.com", "user", "pass");
/// assert_eq!(config.port, 563);
/// ```
#[must_use]
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server hostname (e.g., "news.example.com")
    pub host: String,

    /// Server port (typically 119 for plain, 563 for TLS)
    pub port: u16,

    /// Use TLS encryption; plain TCP when false
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,

    /// Accept invalid TLS certificates (testing only; disables validation)
    #[serde(default)]
    pub allow_insecure_tls: bool,

    /// Username for AUTHINFO USER
    #[serde(rename = "user")]
    pub username: String,

    /// Password for AUTHINFO PASS
    pub password: String,
}

fn default_use_tls() -> bool {
    true
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(
        host: impl Into<String>,
        port: u16,
        use_tls: bool,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            use_tls,
            allow_insecure_tls: false,
            username: username.into(),
            password: password.into(),
        }
    }

    /// TLS connection on the standard secure port (563)
    pub fn tls(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(host, 563, true, username, password)
    }

    /// Plain connection on the standard port (119)
    ///
    /// **Warning:** plain connections transmit credentials in clear text.
    pub fn plain(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(host, 119, false, username, password)
    }

    /// TLS configuration that accepts self-signed certificates
    ///
    /// **Security warning:** disables certificate validation. Only for
    /// testing against servers you trust.
    pub fn tls_insecure(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut config = Self::tls(host, username, password);
        config.allow_insecure_tls = true;
        config
    }
}

/// `[fetch]` section: target group, range bounds, concurrency
#[derive(Debug, Clone, Deserialize)]
pub struct FetchSettings {
    /// Target newsgroup
    pub group: String,

    /// Concurrency cap, valid 1-64
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Articles per XOVER request
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Upper article number (inclusive); server high mark when unset
    #[serde(default)]
    pub start: Option<u64>,

    /// Lower article number (inclusive); server low mark when unset
    #[serde(default)]
    pub back_filled_up_to: Option<u64>,

    /// Cap on articles fetched; 0 means all available
    #[serde(default)]
    pub limit: u64,
}

fn default_max_workers() -> usize {
    10
}

fn default_chunk_size() -> u64 {
    100_000
}

/// `[filters]` section: query filters for NZB assembly
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterSettings {
    /// Substring match on subject, case-insensitive
    #[serde(default)]
    pub subject_like: Option<String>,

    /// Excluded subject substrings, `|`-separated alternatives
    #[serde(default)]
    pub not_subject: Option<String>,

    /// Substring match on the From header, case-insensitive
    #[serde(default)]
    pub from_like: Option<String>,

    /// ISO-8601 lower date bound, inclusive
    #[serde(default)]
    pub date_from: Option<String>,

    /// ISO-8601 upper date bound, inclusive
    #[serde(default)]
    pub date_to: Option<String>,
}

impl FilterSettings {
    /// Lower date bound as Unix seconds
    pub fn date_from_unix(&self) -> Result<Option<i64>> {
        self.date_from
            .as_deref()
            .map(|s| parse_iso_date(s, false))
            .transpose()
    }

    /// Upper date bound as Unix seconds (end of day for date-only values)
    pub fn date_to_unix(&self) -> Result<Option<i64>> {
        self.date_to
            .as_deref()
            .map(|s| parse_iso_date(s, true))
            .transpose()
    }
}

/// Parse an ISO-8601 date or datetime into Unix seconds.
///
/// Date-only values expand to the start of the day, or the end of the day
/// when used as an upper bound, so both bounds stay inclusive.
fn parse_iso_date(s: &str, end_of_day: bool) -> Result<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt.and_utc().timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let time = if end_of_day {
            chrono::NaiveTime::from_hms_opt(23, 59, 59)
        } else {
            chrono::NaiveTime::from_hms_opt(0, 0, 0)
        };
        // from_hms_opt with in-range constants never fails
        let time = time.ok_or_else(|| IndexError::Config("invalid time".into()))?;
        return Ok(date.and_time(time).and_utc().timestamp());
    }
    Err(IndexError::Config(format!(
        "invalid ISO-8601 date: {s} (expected YYYY-MM-DD or RFC 3339)"
    )))
}

/// `[nzb]` section: assembly and output options
#[derive(Debug, Clone, Deserialize)]
pub struct NzbSettings {
    /// Drop multi-part files with missing parts
    #[serde(default)]
    pub require_complete_sets: bool,

    /// Emit one NZB per (poster, collection) instead of one document
    #[serde(default)]
    pub group_by_collection: bool,

    /// Directory for NZB output
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
}

impl Default for NzbSettings {
    fn default() -> Self {
        Self {
            require_complete_sets: false,
            group_by_collection: false,
            output_path: default_output_path(),
        }
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from("./nzbs")
}

/// `[db]` section: store location
#[derive(Debug, Clone, Deserialize)]
pub struct DbSettings {
    /// Directory holding one `<group>.sqlite` database per newsgroup
    #[serde(default = "default_db_base_path")]
    pub base_path: PathBuf,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            base_path: default_db_base_path(),
        }
    }
}

fn default_db_base_path() -> PathBuf {
    PathBuf::from(".")
}

/// Full configuration surface loaded from an INI file
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// NNTP endpoint
    pub server: ServerConfig,
    /// Fetch range and concurrency
    pub fetch: FetchSettings,
    /// Query filters
    #[serde(default)]
    pub filters: FilterSettings,
    /// NZB assembly options
    #[serde(default)]
    pub nzb: NzbSettings,
    /// Store location
    #[serde(default)]
    pub db: DbSettings,
}

impl Settings {
    /// Load and validate settings from an INI file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = config::Config::builder()
            .add_source(config::File::new(
                path.to_str()
                    .ok_or_else(|| IndexError::Config("config path is not UTF-8".into()))?,
                config::FileFormat::Ini,
            ))
            .build()
            .map_err(|e| IndexError::Config(e.to_string()))?;

        let settings: Settings = raw
            .try_deserialize()
            .map_err(|e| IndexError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate option ranges and cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(IndexError::Config("server.host is required".into()));
        }
        if self.fetch.group.is_empty() {
            return Err(IndexError::Config("fetch.group is required".into()));
        }
        if !(1..=64).contains(&self.fetch.max_workers) {
            return Err(IndexError::Config(format!(
                "fetch.max_workers must be in 1-64, got {}",
                self.fetch.max_workers
            )));
        }
        if self.fetch.chunk_size == 0 {
            return Err(IndexError::Config("fetch.chunk_size must be positive".into()));
        }
        if let (Some(upper), Some(lower)) = (self.fetch.start, self.fetch.back_filled_up_to) {
            if lower > upper {
                return Err(IndexError::Config(format!(
                    "fetch.back_filled_up_to ({lower}) must not exceed fetch.start ({upper})"
                )));
            }
        }
        // Surface bad dates at config time, not at query time
        self.filters.date_from_unix()?;
        self.filters.date_to_unix()?;
        if let (Some(from), Some(to)) = (
            self.filters.date_from_unix()?,
            self.filters.date_to_unix()?,
        ) {
            if from > to {
                return Err(IndexError::Config(
                    "filters.date_from is after filters.date_to".into(),
                ));
            }
        }
        Ok(())
    }
}
