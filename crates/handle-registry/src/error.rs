//! Error types for the handle registry client.

/// Handle registry errors.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    /// Transport-level failure (connect, TLS, timeout, body read).
    #[error("network error: {message}")]
    Network { message: String },

    /// Handle not found (404). Expected during identifier allocation.
    #[error("handle not found: {handle}")]
    NotFound { handle: String },

    /// Challenge is missing its nonce or session id, or cannot be decoded.
    #[error("malformed challenge: {reason}")]
    MalformedChallenge { reason: String },

    /// The private key could not produce a signature.
    #[error("signing failed: {reason}")]
    SigningFailure { reason: String },

    /// Key material could not be loaded.
    #[error("signing key unavailable: {reason}")]
    KeyUnavailable { reason: String },

    /// Session handshake confirmed `authenticated = false`, or the session
    /// was invalidated and has not been re-established.
    #[error("session rejected: {message}")]
    SessionRejected { message: String },

    /// Registry still answered 401 after a signed request.
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// A create targeted a handle that already holds a record.
    #[error("handle already exists: {handle}")]
    AlreadyExists { handle: String },

    /// No free identifier was found within the attempt budget.
    #[error("identifier allocation exhausted after {attempts} attempts")]
    AllocationExhausted { attempts: u32 },

    /// Response body is not valid record (or challenge) JSON.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// Record violates a structural invariant.
    #[error("invalid record: {reason}")]
    InvalidRecord { reason: String },

    /// Registry answered with an unexpected HTTP status.
    #[error("registry returned HTTP {status}: {message}")]
    Registry { status: u16, message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A batch worker died before reporting its item.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl HandleError {
    /// Whether a session caller should `reestablish()` before retrying.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::SessionRejected { .. }
        )
    }

    /// Whether a create lost the suffix to another writer.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Whether the error means the handle does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for HandleError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

/// Result type for handle registry operations.
pub type HandleResult<T> = Result<T, HandleError>;
