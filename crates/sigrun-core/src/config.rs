//! Controller and HTTP client configuration.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::error::{TrustError, TrustResult};

pub(crate) const USER_AGENT_VALUE: &str = concat!("sigrun/", env!("CARGO_PKG_VERSION"));

/// Options for remote chain readers and signature sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpOptions {
    /// Request timeout in seconds. A timeout counts as a fetch failure.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

impl HttpOptions {
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Build a client with timeout and user agent applied.
    pub fn build_client(&self) -> TrustResult<reqwest::Client> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| TrustError::Config {
                message: format!("failed to create HTTP client: {}", e),
            })
    }
}

/// Admission controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Listen address for the webhook.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// JSON registry snapshot.
    #[serde(default = "default_registry_file")]
    pub registry_file: PathBuf,

    /// Base URL of an HTTP signature store.
    #[serde(default)]
    pub signature_url: Option<String>,

    /// Directory signature store, used when no URL is set.
    #[serde(default)]
    pub signature_dir: Option<PathBuf>,

    /// Timeout for signature lookups in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Registry refresh interval in seconds. Zero disables refresh.
    #[serde(default = "default_refresh")]
    pub refresh_secs: u64,

    /// Emit JSON log lines.
    #[serde(default)]
    pub log_json: bool,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_registry_file() -> PathBuf {
    PathBuf::from("/etc/sigrun/registry.json")
}

fn default_timeout() -> u64 {
    10
}

fn default_refresh() -> u64 {
    30
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            registry_file: default_registry_file(),
            signature_url: None,
            signature_dir: None,
            timeout_secs: default_timeout(),
            refresh_secs: default_refresh(),
            log_json: false,
        }
    }
}

impl ControllerConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `SIGRUN_BIND` | Listen address |
    /// | `SIGRUN_REGISTRY_FILE` | Registry snapshot path |
    /// | `SIGRUN_SIGNATURE_URL` | HTTP signature store |
    /// | `SIGRUN_SIGNATURE_DIR` | Directory signature store |
    /// | `SIGRUN_TIMEOUT` | Signature lookup timeout (seconds) |
    /// | `SIGRUN_REFRESH_SECS` | Registry refresh interval |
    /// | `SIGRUN_LOG_JSON` | JSON logs (`1`/`true`) |
    pub fn from_env() -> Self {
        Self {
            bind: std::env::var("SIGRUN_BIND").unwrap_or_else(|_| default_bind()),
            registry_file: std::env::var("SIGRUN_REGISTRY_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_registry_file()),
            signature_url: std::env::var("SIGRUN_SIGNATURE_URL").ok(),
            signature_dir: std::env::var("SIGRUN_SIGNATURE_DIR")
                .ok()
                .map(PathBuf::from),
            timeout_secs: std::env::var("SIGRUN_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout),
            refresh_secs: std::env::var("SIGRUN_REFRESH_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_refresh),
            log_json: std::env::var("SIGRUN_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    pub fn with_registry_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry_file = path.into();
        self
    }

    pub fn with_signature_url(mut self, url: impl Into<String>) -> Self {
        self.signature_url = Some(url.into());
        self
    }

    pub fn with_signature_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.signature_dir = Some(dir.into());
        self
    }

    pub fn with_refresh_secs(mut self, secs: u64) -> Self {
        self.refresh_secs = secs;
        self
    }

    pub fn http_options(&self) -> HttpOptions {
        HttpOptions::default().with_timeout_secs(self.timeout_secs)
    }

    /// Refresh interval, `None` when refresh is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_secs > 0).then(|| Duration::from_secs(self.refresh_secs))
    }

    /// Reject settings the controller cannot start with.
    pub fn validate(&self) -> TrustResult<()> {
        if self.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(TrustError::Config {
                message: format!("invalid bind address: {}", self.bind),
            });
        }
        if self.timeout_secs == 0 {
            return Err(TrustError::Config {
                message: "timeout must be at least one second".to_string(),
            });
        }
        Ok(())
    }
}
