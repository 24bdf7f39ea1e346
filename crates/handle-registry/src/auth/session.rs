//! Session establishment and caching.
//!
//! The handshake is `POST {sessions}` (challenge) followed by
//! `PUT {sessions}this` carrying the signed session header. The slot mutex is
//! held for the whole handshake, so concurrent callers wait for the one in
//! flight instead of starting their own. The cached session is only written
//! once the handshake has finished; a cancelled handshake leaves nothing
//! behind and reports `Unestablished` again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::challenge::{Challenge, ClientNonce};
use crate::auth::header::{session_token_header, AuthHeaderBuilder, SessionHeader};
use crate::error::{HandleError, HandleResult};
use crate::signing::SigningProvider;

pub(crate) const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unestablished,
    ChallengeRequested,
    ChallengeReceived,
    Authenticated,
    Rejected,
}

/// An established registry session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub authenticated: bool,
}

#[derive(Debug)]
struct SessionSlot {
    session: Option<Session>,
}

/// Resets the phase to `Unestablished` if a handshake is dropped midway.
struct PhaseGuard<'a> {
    phase: &'a StdMutex<SessionState>,
    armed: bool,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *lock_phase(self.phase) = SessionState::Unestablished;
        }
    }
}

fn lock_phase(phase: &StdMutex<SessionState>) -> MutexGuard<'_, SessionState> {
    phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Deserialize)]
struct Confirmation {
    #[serde(default)]
    authenticated: bool,
    #[serde(default, rename = "sessionId")]
    session_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Owns the session for one client.
#[derive(Debug)]
pub struct SessionManager {
    client: reqwest::Client,
    sessions_url: String,
    signer: Arc<dyn SigningProvider>,
    header: SessionHeader,
    slot: Mutex<SessionSlot>,
    /// Readable while a handshake holds `slot`; only written under `slot`.
    phase: StdMutex<SessionState>,
    handshakes: AtomicU64,
}

impl SessionManager {
    /// `sessions_url` must end with `/`; `this` is appended for confirmation.
    pub fn new(
        client: reqwest::Client,
        sessions_url: impl Into<String>,
        signer: Arc<dyn SigningProvider>,
    ) -> Self {
        Self {
            client,
            sessions_url: sessions_url.into(),
            signer,
            header: SessionHeader,
            slot: Mutex::new(SessionSlot { session: None }),
            phase: StdMutex::new(SessionState::Unestablished),
            handshakes: AtomicU64::new(0),
        }
    }

    /// Current phase, including `ChallengeRequested` / `ChallengeReceived`
    /// while a handshake is in flight. Never waits for the handshake.
    pub async fn state(&self) -> SessionState {
        *lock_phase(&self.phase)
    }

    fn set_phase(&self, state: SessionState) {
        *lock_phase(&self.phase) = state;
    }

    /// Number of handshakes started so far.
    pub fn handshake_count(&self) -> u64 {
        self.handshakes.load(Ordering::Relaxed)
    }

    /// Establish the session if needed and return it.
    ///
    /// Returns the cached session once authenticated. After a rejection or
    /// [`invalidate`](Self::invalidate) this fails with `SessionRejected`
    /// until [`reestablish`](Self::reestablish) is called.
    pub async fn establish(&self) -> HandleResult<Session> {
        let mut slot = self.slot.lock().await;

        match self.state().await {
            SessionState::Authenticated => {
                if let Some(session) = &slot.session {
                    return Ok(session.clone());
                }
            }
            SessionState::Rejected => {
                return Err(HandleError::SessionRejected {
                    message: "session was rejected; re-establish before retrying".into(),
                });
            }
            _ => {}
        }

        let result = self.handshake().await;
        self.commit(&mut slot, result)
    }

    /// Session id for the Authorization header, establishing on first use.
    pub async fn session_id(&self) -> HandleResult<String> {
        Ok(self.establish().await?.session_id)
    }

    /// The `Handle version="0", sessionId="..."` header for the current session.
    pub async fn authorization_header(&self) -> HandleResult<(String, String)> {
        let session_id = self.session_id().await?;
        let header = session_token_header(&session_id);
        Ok((session_id, header))
    }

    /// Drop any cached session and run a fresh handshake.
    pub async fn reestablish(&self) -> HandleResult<Session> {
        let mut slot = self.slot.lock().await;
        slot.session = None;
        self.set_phase(SessionState::Unestablished);

        let result = self.handshake().await;
        self.commit(&mut slot, result)
    }

    /// Mark `session_id` unusable after the registry refused it.
    ///
    /// No-op if the cached session has already been replaced.
    pub async fn invalidate(&self, session_id: &str) {
        let mut slot = self.slot.lock().await;
        let matches = slot
            .session
            .as_ref()
            .is_some_and(|s| s.session_id == session_id);

        if matches {
            warn!(session_id = %session_id, "registry refused session; re-establish required");
            slot.session = None;
            self.set_phase(SessionState::Rejected);
        }
    }

    fn commit(&self, slot: &mut SessionSlot, result: HandleResult<Session>) -> HandleResult<Session> {
        match result {
            Ok(session) => {
                info!(session_id = %session.session_id, "session established");
                slot.session = Some(session.clone());
                self.set_phase(SessionState::Authenticated);
                Ok(session)
            }
            Err(e @ HandleError::SessionRejected { .. }) => {
                warn!(error = %e, "session handshake rejected");
                slot.session = None;
                self.set_phase(SessionState::Rejected);
                Err(e)
            }
            Err(e) => {
                slot.session = None;
                self.set_phase(SessionState::Unestablished);
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> HandleResult<Session> {
        self.handshakes.fetch_add(1, Ordering::Relaxed);

        let mut guard = PhaseGuard {
            phase: &self.phase,
            armed: true,
        };
        let result = self.run_handshake().await;
        guard.armed = false;
        result
    }

    async fn run_handshake(&self) -> HandleResult<Session> {
        self.set_phase(SessionState::ChallengeRequested);
        debug!(url = %self.sessions_url, "requesting session challenge");

        let response = self.client.post(&self.sessions_url).send().await?;
        let status = response.status();
        let body = response.text().await.map_err(|e| HandleError::Network {
            message: format!("failed to read session challenge: {}", e),
        })?;
        if !status.is_success() {
            return Err(HandleError::Registry {
                status: status.as_u16(),
                message: body,
            });
        }

        let challenge = Challenge::from_session_json(&body)?;
        self.set_phase(SessionState::ChallengeReceived);
        debug!(session_id = %challenge.session_id, "received session challenge");

        let client_nonce = ClientNonce::generate();
        let authorization = self.header.build(&*self.signer, &challenge, &client_nonce)?;

        let response = self
            .client
            .put(format!("{}this", self.sessions_url))
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.map_err(|e| HandleError::Network {
            message: format!("failed to read session confirmation: {}", e),
        })?;

        let confirmation: Confirmation = match serde_json::from_str(&body) {
            Ok(c) => c,
            Err(_) if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                return Err(HandleError::SessionRejected {
                    message: format!("HTTP {}", status.as_u16()),
                });
            }
            Err(_) if !status.is_success() => {
                return Err(HandleError::Registry {
                    status: status.as_u16(),
                    message: body,
                });
            }
            Err(e) => {
                return Err(HandleError::Decode {
                    message: format!("failed to parse session confirmation: {}", e),
                });
            }
        };

        if !confirmation.authenticated {
            return Err(HandleError::SessionRejected {
                message: confirmation
                    .error
                    .unwrap_or_else(|| "registry reported authenticated=false".into()),
            });
        }

        Ok(Session {
            session_id: confirmation
                .session_id
                .filter(|s| !s.is_empty())
                .unwrap_or(challenge.session_id),
            authenticated: true,
        })
    }
}
