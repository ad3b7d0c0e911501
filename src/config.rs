/*!
 * Configuration types and transfer constants
 */

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum bytes buffered in memory during compression and digest
/// computation before spilling to a temporary file (128 MiB).
pub const MAX_IN_MEMORY_BUFFER: usize = 1 << 27;

/// Files larger than this are transferred one at a time so the storage
/// client may parallelize parts internally (16 MiB).
pub const BIG_FILE_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Outer client-side retry budget per storage call.
pub const CLIENT_SIDE_MAX_RETRIES: u32 = 25;

/// Retries the underlying storage client is allowed for multipart
/// operations, composed with the outer budget.
pub const TRANSFER_SDK_MAX_RETRIES: u32 = 3;

/// Minimum backoff before a retry, in milliseconds.
pub const RETRY_BACKOFF_MIN_MS: u64 = 1000;

/// Max exponent when doubling the backoff; 4 caps the sleep at 16 s.
pub const RETRY_BACKOFF_MAX_EXPONENT: u32 = 4;

/// Default worker parallelism for the small-file phase.
pub const DEFAULT_PARALLEL: usize = 10;

/// Size difference tolerated by the skip filter for uncompressed files
/// before digests are compared.
pub const SKIP_SIZE_TOLERANCE: u64 = 16;

/// Metadata key for in-memory stream sources.
pub const STREAM_SOURCE_NAME: &str = "stream";

/// Log verbosity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// HTTPS proxy settings passed through to storage clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    /// Read proxy settings from the `https.proxyHost` / `https.proxyPort`
    /// environment variables. Absent or unparsable values disable the proxy.
    pub fn from_env() -> Option<Self> {
        let host = env::var("https.proxyHost").ok()?;
        let port = env::var("https.proxyPort").ok()?.parse().ok()?;
        Some(Self { host, port })
    }
}

/// Agent-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Sort status rows ascending by source/file name
    #[serde(default)]
    pub sort: bool,

    /// Test hook: raise a simulated failure for any upload whose source
    /// path ends with this suffix
    #[serde(default)]
    pub inject_failure: Option<String>,

    /// HTTPS proxy for storage clients
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,

    /// Connection timeout handed to storage clients, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Socket timeout handed to storage clients, in seconds
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: u64,

    /// Log verbosity
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (JSON output); stdout when unset
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_socket_timeout_secs() -> u64 {
    50
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            sort: false,
            inject_failure: None,
            proxy: ProxyConfig::from_env(),
            connect_timeout_secs: default_connect_timeout_secs(),
            socket_timeout_secs: default_socket_timeout_secs(),
            log_level: LogLevel::default(),
            log_file: None,
        }
    }
}

impl AgentConfig {
    /// Connection timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Socket timeout as a `Duration`
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }
}

impl AgentConfig {
    /// Build a config from the driver's connection properties. Property
    /// values arrive as arbitrary JSON; `sort` in particular is a
    /// dynamically-typed flag and goes through the lenient conversion.
    pub fn from_connection_properties(
        properties: &std::collections::HashMap<String, serde_json::Value>,
    ) -> Self {
        let mut config = Self::default();
        if let Some(value) = properties.get("sort") {
            config.sort = Self::sort_from_value(value);
        }
        if let Some(suffix) = properties
            .get("inject_upload_failure")
            .and_then(|v| v.as_str())
        {
            config.inject_failure = Some(suffix.to_string());
        }
        config
    }

    /// Interpret a dynamically-typed `sort` connection property. Only the
    /// boolean `true` or the strings "true"/"TRUE" enable sorting; any
    /// other value leaves rows unsorted.
    pub fn sort_from_value(value: &serde_json::Value) -> bool {
        match value {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::String(s) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}
