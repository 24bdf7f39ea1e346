//! Registry client for handle records.
//!
//! Public API: no status code knowledge. All HTTP/status mapping in http.rs.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Method, StatusCode};
use tracing::info;

use crate::allocator::{ExistenceProbe, IdentifierAllocator};
use crate::auth::session::SessionManager;
use crate::auth::AuthStrategy;
use crate::config::{AuthMode, HandleConfig};
use crate::error::{HandleError, HandleResult};
use crate::record::{EntryValue, Record};
use crate::signing::{RsaSigner, SigningProvider};

mod batch;
mod helpers;
mod http;

pub use batch::{BatchItem, BatchReport};

use helpers::{join_handle, normalize_base_url};
use http::HttpBackend;

pub const USER_AGENT_VALUE: &str = concat!("handle-registry/", env!("CARGO_PKG_VERSION"));

/// Outcome of a successful create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    /// Full identifier (prefix + suffix).
    pub handle: String,
    pub suffix: String,
    pub status: StatusCode,
}

/// Registry client for handle records.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: HttpBackend,
    allocator: IdentifierAllocator,
    prefix: String,
    batch_concurrency: usize,
}

impl RegistryClient {
    /// Load the key from `config.key_path` and build the configured strategy.
    pub fn new(config: HandleConfig) -> HandleResult<Self> {
        let key_path = config.key_path.clone().ok_or_else(|| HandleError::Config {
            message: "key_path is required to sign requests".into(),
        })?;
        let signer = RsaSigner::from_pem_file(&key_path, config.admin_id.clone())?;

        Self::with_signer(config, Arc::new(signer))
    }

    pub fn from_env() -> HandleResult<Self> {
        Self::new(HandleConfig::from_env()?)
    }

    /// Build the strategy selected by `config.auth_mode` around `signer`.
    pub fn with_signer(
        config: HandleConfig,
        signer: Arc<dyn SigningProvider>,
    ) -> HandleResult<Self> {
        let client = build_http_client(&config)?;

        let auth = match config.auth_mode {
            AuthMode::Session => AuthStrategy::session(Arc::new(SessionManager::new(
                client.clone(),
                config.sessions_endpoint()?,
                signer,
            ))),
            AuthMode::KeyPair => AuthStrategy::key_pair(signer),
        };

        Self::with_auth(config, client, auth)
    }

    /// Use an explicit strategy and HTTP client.
    pub fn with_auth(
        config: HandleConfig,
        client: reqwest::Client,
        auth: AuthStrategy,
    ) -> HandleResult<Self> {
        config.validate()?;

        Ok(Self {
            http: HttpBackend {
                client,
                base_url: normalize_base_url(&config.base_url),
                auth,
            },
            allocator: IdentifierAllocator::from_config(&config),
            prefix: config.prefix,
            batch_concurrency: config.batch_concurrency.max(1),
        })
    }

    /// Replace the identifier allocator.
    pub fn with_allocator(mut self, allocator: IdentifierAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn auth(&self) -> &AuthStrategy {
        &self.http.auth
    }

    /// The session manager, in session mode. Use it to `reestablish()` after
    /// an authentication failure.
    pub fn session(&self) -> Option<&Arc<SessionManager>> {
        self.http.auth.session_manager()
    }

    pub fn base_url(&self) -> &str {
        &self.http.base_url
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full identifier for `suffix`.
    pub fn handle_for(&self, suffix: &str) -> String {
        join_handle(&self.prefix, suffix)
    }

    /// Whether a record exists for `suffix`.
    pub async fn exists(&self, suffix: &str) -> HandleResult<bool> {
        self.http.exists(suffix).await
    }

    /// Mint a suffix the registry does not know yet.
    pub async fn allocate(&self) -> HandleResult<String> {
        self.allocator.allocate(&self.http).await
    }

    /// Create `record` under `suffix`, minting one if `None`.
    ///
    /// Never replaces an existing record: if another writer took the suffix
    /// after it was checked, this fails with `AlreadyExists`.
    pub async fn create(&self, mut record: Record, suffix: Option<&str>) -> HandleResult<Created> {
        let suffix = match suffix {
            Some(s) => s.to_string(),
            None => self.allocate().await?,
        };
        let handle = self.handle_for(&suffix);

        record.handle = handle.clone();
        record.validate()?;

        let body = encode(&record)?;
        let status = self.http.put_new(&suffix, &body).await?;

        info!(operation = "create", handle = %handle, status = status.as_u16(), "record created");

        Ok(Created {
            handle,
            suffix,
            status,
        })
    }

    /// Fetch the record for `suffix`.
    pub async fn read(&self, suffix: &str) -> HandleResult<Record> {
        let record = self.http.get_record(suffix).await?;
        info!(operation = "retrieve", handle = %self.handle_for(suffix), "record fetched");
        Ok(record)
    }

    /// Replace `data.value` of the entry at sequence `position` (zero-based,
    /// not the entry's own `index`) and write the full record back.
    pub async fn update(
        &self,
        suffix: &str,
        position: usize,
        new_value: impl Into<EntryValue>,
    ) -> HandleResult<StatusCode> {
        let mut record = self.http.get_record(suffix).await?;
        record.set_value(position, new_value)?;

        let body = encode(&record)?;
        let status = self
            .http
            .send_authenticated(Method::PUT, suffix, Some(&body))
            .await?;

        info!(
            operation = "update",
            handle = %self.handle_for(suffix),
            position,
            status = status.as_u16(),
            "record updated"
        );
        Ok(status)
    }

    /// Delete the record for `suffix`.
    pub async fn delete(&self, suffix: &str) -> HandleResult<StatusCode> {
        let status = self
            .http
            .send_authenticated(Method::DELETE, suffix, None)
            .await?;

        info!(operation = "delete", handle = %self.handle_for(suffix), status = status.as_u16(), "record deleted");
        Ok(status)
    }
}

fn build_http_client(config: &HandleConfig) -> HandleResult<reqwest::Client> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .default_headers(default_headers)
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .build()
        .map_err(|e| HandleError::Network {
            message: format!("failed to create HTTP client: {}", e),
        })
}

fn encode(record: &Record) -> HandleResult<String> {
    serde_json::to_string(record).map_err(|e| HandleError::Decode {
        message: format!("failed to encode record {}: {}", record.handle, e),
    })
}
