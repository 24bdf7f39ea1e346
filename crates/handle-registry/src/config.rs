//! Client configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HandleError, HandleResult};

/// Which authentication strategy the client uses for mutating requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Establish one session and reuse it for every request.
    #[default]
    Session,
    /// Answer a fresh server challenge on every mutating request.
    KeyPair,
}

impl std::str::FromStr for AuthMode {
    type Err = HandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "session" | "sessions" => Ok(Self::Session),
            "key_pair" | "keypair" | "key" => Ok(Self::KeyPair),
            other => Err(HandleError::Config {
                message: format!("unknown auth mode '{}'", other),
            }),
        }
    }
}

/// Handle registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleConfig {
    /// Base URL for handle records; the suffix is appended verbatim.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Identifier prefix including the trailing slash (e.g. `20.5000.1025/`).
    #[serde(default)]
    pub prefix: String,

    /// Administrator identity that labels signatures (e.g. `300:0.NA/20.5000.1025`).
    #[serde(default)]
    pub admin_id: String,

    /// PEM private key used to answer challenges.
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// Host of the session endpoint.
    #[serde(default)]
    pub session_host: Option<String>,

    /// Port of the session endpoint.
    #[serde(default = "default_session_port")]
    pub session_port: u16,

    /// Full session endpoint URL; takes precedence over host and port.
    #[serde(default)]
    pub sessions_url: Option<String>,

    /// Authentication strategy.
    #[serde(default)]
    pub auth_mode: AuthMode,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Accept self-signed registry certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Upper bound on identifier candidates probed per allocation.
    #[serde(default = "default_max_allocation_attempts")]
    pub max_allocation_attempts: u32,

    /// Number of base-32 characters in a minted suffix.
    #[serde(default = "default_suffix_length")]
    pub suffix_length: usize,

    /// Insert a hyphen every N characters (0 disables grouping).
    #[serde(default = "default_suffix_group")]
    pub suffix_group: usize,

    /// Concurrent requests in batch operations.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

fn default_base_url() -> String {
    "https://localhost:8000/api/handles/".to_string()
}

fn default_session_port() -> u16 {
    8000
}

fn default_timeout() -> u64 {
    30
}

fn default_max_allocation_attempts() -> u32 {
    50
}

fn default_suffix_length() -> usize {
    8
}

fn default_suffix_group() -> usize {
    4
}

fn default_batch_concurrency() -> usize {
    4
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            prefix: String::new(),
            admin_id: String::new(),
            key_path: None,
            session_host: None,
            session_port: default_session_port(),
            sessions_url: None,
            auth_mode: AuthMode::default(),
            timeout_secs: default_timeout(),
            accept_invalid_certs: false,
            max_allocation_attempts: default_max_allocation_attempts(),
            suffix_length: default_suffix_length(),
            suffix_group: default_suffix_group(),
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

impl HandleConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `HANDLE_BASE_URL` | Base URL for handle records |
    /// | `HANDLE_PREFIX` | Identifier prefix |
    /// | `HANDLE_ADMIN_ID` | Administrator identity |
    /// | `HANDLE_KEY_PATH` | PEM private key path |
    /// | `HANDLE_SESSION_HOST` / `HANDLE_SESSION_PORT` | Session endpoint |
    /// | `HANDLE_SESSIONS_URL` | Full session endpoint URL |
    /// | `HANDLE_AUTH_MODE` | `session` or `key_pair` |
    /// | `HANDLE_TIMEOUT` | Request timeout in seconds |
    /// | `HANDLE_ACCEPT_INVALID_CERTS` | Accept self-signed certificates |
    /// | `HANDLE_MAX_ALLOCATION_ATTEMPTS` | Allocation attempt budget |
    /// | `HANDLE_BATCH_CONCURRENCY` | Batch worker count |
    pub fn from_env() -> HandleResult<Self> {
        let defaults = Self::default();
        let auth_mode = match std::env::var("HANDLE_AUTH_MODE") {
            Ok(v) if !v.is_empty() => v.parse()?,
            _ => defaults.auth_mode,
        };

        Ok(Self {
            base_url: std::env::var("HANDLE_BASE_URL").unwrap_or(defaults.base_url),
            prefix: std::env::var("HANDLE_PREFIX").unwrap_or(defaults.prefix),
            admin_id: std::env::var("HANDLE_ADMIN_ID").unwrap_or(defaults.admin_id),
            key_path: std::env::var("HANDLE_KEY_PATH").ok().map(PathBuf::from),
            session_host: std::env::var("HANDLE_SESSION_HOST").ok(),
            session_port: env_parse("HANDLE_SESSION_PORT").unwrap_or(defaults.session_port),
            sessions_url: std::env::var("HANDLE_SESSIONS_URL").ok(),
            auth_mode,
            timeout_secs: env_parse("HANDLE_TIMEOUT").unwrap_or(defaults.timeout_secs),
            accept_invalid_certs: std::env::var("HANDLE_ACCEPT_INVALID_CERTS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            max_allocation_attempts: env_parse("HANDLE_MAX_ALLOCATION_ATTEMPTS")
                .unwrap_or(defaults.max_allocation_attempts),
            suffix_length: defaults.suffix_length,
            suffix_group: defaults.suffix_group,
            batch_concurrency: env_parse("HANDLE_BATCH_CONCURRENCY")
                .unwrap_or(defaults.batch_concurrency),
        })
    }

    /// Load config from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> HandleResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| HandleError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        serde_yaml::from_str(&text).map_err(|e| HandleError::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
        })
    }

    /// Resolve the session endpoint (always ends with `/`).
    pub fn sessions_endpoint(&self) -> HandleResult<String> {
        let url = if let Some(url) = &self.sessions_url {
            url.clone()
        } else if let Some(host) = &self.session_host {
            format!("https://{}:{}/api/sessions/", host, self.session_port)
        } else {
            let base = Url::parse(&self.base_url).map_err(|e| HandleError::Config {
                message: format!("invalid base_url '{}': {}", self.base_url, e),
            })?;
            format!(
                "{}/api/sessions/",
                base.origin().ascii_serialization().trim_end_matches('/')
            )
        };

        if url.ends_with('/') {
            Ok(url)
        } else {
            Ok(format!("{}/", url))
        }
    }

    /// Check the fields every client needs.
    pub fn validate(&self) -> HandleResult<()> {
        Url::parse(&self.base_url).map_err(|e| HandleError::Config {
            message: format!("invalid base_url '{}': {}", self.base_url, e),
        })?;
        if self.admin_id.is_empty() {
            return Err(HandleError::Config {
                message: "admin_id is required".into(),
            });
        }
        if self.max_allocation_attempts == 0 {
            return Err(HandleError::Config {
                message: "max_allocation_attempts must be at least 1".into(),
            });
        }
        if self.suffix_length == 0 {
            return Err(HandleError::Config {
                message: "suffix_length must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the identifier prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the administrator identity.
    pub fn with_admin_id(mut self, admin_id: impl Into<String>) -> Self {
        self.admin_id = admin_id.into();
        self
    }

    /// Set the private key path.
    pub fn with_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// Set the full session endpoint URL.
    pub fn with_sessions_url(mut self, url: impl Into<String>) -> Self {
        self.sessions_url = Some(url.into());
        self
    }

    /// Set the authentication strategy.
    pub fn with_auth_mode(mut self, mode: AuthMode) -> Self {
        self.auth_mode = mode;
        self
    }

    /// Set the allocation attempt budget.
    pub fn with_max_allocation_attempts(mut self, attempts: u32) -> Self {
        self.max_allocation_attempts = attempts;
        self
    }

    /// Set the batch worker count.
    pub fn with_batch_concurrency(mut self, workers: usize) -> Self {
        self.batch_concurrency = workers;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
