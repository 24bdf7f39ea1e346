//! Authentication for mutating registry requests.
//!
//! Two mutually exclusive strategies, chosen once per client:
//!
//! - [`SessionAuth`]: one handshake per client lifetime; every request then
//!   carries `Handle version="0", sessionId="..."`.
//! - [`KeyPairAuth`]: every mutating request is first sent unsigned, the
//!   registry answers 401 with a `WWW-Authenticate` challenge, and the request
//!   is resent once with a signed header.

use std::sync::Arc;

use crate::config::AuthMode;
use crate::error::HandleResult;
use crate::signing::SigningProvider;

pub mod challenge;
pub mod header;
pub mod session;

use challenge::{Challenge, ClientNonce};
use header::{AuthHeaderBuilder, KeyPairHeader};
use session::SessionManager;

/// Session-based authentication.
#[derive(Debug, Clone)]
pub struct SessionAuth {
    manager: Arc<SessionManager>,
}

impl SessionAuth {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }
}

/// Per-request challenge-response authentication.
#[derive(Debug, Clone)]
pub struct KeyPairAuth {
    signer: Arc<dyn SigningProvider>,
    header: KeyPairHeader,
}

impl KeyPairAuth {
    pub fn new(signer: Arc<dyn SigningProvider>) -> Self {
        Self {
            signer,
            header: KeyPairHeader,
        }
    }

    /// Answer `challenge` with a fresh client nonce.
    pub fn respond(&self, challenge: &Challenge) -> HandleResult<String> {
        let client_nonce = ClientNonce::generate();
        self.header.build(&*self.signer, challenge, &client_nonce)
    }
}

/// The authentication capability injected into a client.
#[derive(Debug, Clone)]
pub enum AuthStrategy {
    Session(SessionAuth),
    KeyPair(KeyPairAuth),
}

impl AuthStrategy {
    pub fn session(manager: Arc<SessionManager>) -> Self {
        Self::Session(SessionAuth::new(manager))
    }

    pub fn key_pair(signer: Arc<dyn SigningProvider>) -> Self {
        Self::KeyPair(KeyPairAuth::new(signer))
    }

    pub fn mode(&self) -> AuthMode {
        match self {
            Self::Session(_) => AuthMode::Session,
            Self::KeyPair(_) => AuthMode::KeyPair,
        }
    }

    /// The session manager, in session mode.
    pub fn session_manager(&self) -> Option<&Arc<SessionManager>> {
        match self {
            Self::Session(auth) => Some(auth.manager()),
            Self::KeyPair(_) => None,
        }
    }
}
