//! Server challenges and client nonces.
//!
//! A challenge reaches the client in one of two shapes: the JSON body of a
//! session-open response (`{"nonce": ..., "sessionId": ...}`) or the
//! `WWW-Authenticate` header of a 401 answer to an unsigned request.

use std::collections::HashMap;
use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;

use crate::error::{HandleError, HandleResult};

/// Length of a client nonce in bytes.
pub const CLIENT_NONCE_LEN: usize = 16;

/// Single-use random client nonce. A fresh one is generated for every
/// challenge response.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientNonce([u8; CLIENT_NONCE_LEN]);

impl ClientNonce {
    #[must_use]
    pub fn generate() -> Self {
        Self(rand::random::<[u8; CLIENT_NONCE_LEN]>())
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; CLIENT_NONCE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CLIENT_NONCE_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl fmt::Debug for ClientNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientNonce([redacted])")
    }
}

/// A server-issued challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Decoded server nonce.
    pub server_nonce: Vec<u8>,

    /// Session the challenge belongs to.
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
struct ChallengeBody {
    #[serde(default)]
    nonce: Option<String>,
    #[serde(default, rename = "sessionId")]
    session_id: Option<String>,
}

impl Challenge {
    pub fn new(server_nonce: impl Into<Vec<u8>>, session_id: impl Into<String>) -> Self {
        Self {
            server_nonce: server_nonce.into(),
            session_id: session_id.into(),
        }
    }

    /// Build from a base64 nonce and a session id, either of which may be absent.
    pub fn from_parts(nonce_b64: Option<&str>, session_id: Option<&str>) -> HandleResult<Self> {
        let nonce_b64 = nonce_b64
            .filter(|n| !n.is_empty())
            .ok_or_else(|| malformed("missing nonce"))?;
        let session_id = session_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed("missing session id"))?;

        let server_nonce = BASE64
            .decode(nonce_b64)
            .map_err(|e| malformed(format!("nonce is not valid base64: {}", e)))?;

        let challenge = Self::new(server_nonce, session_id);
        challenge.validate()?;
        Ok(challenge)
    }

    /// Parse the JSON body returned when opening a session.
    pub fn from_session_json(body: &str) -> HandleResult<Self> {
        let parsed: ChallengeBody = serde_json::from_str(body).map_err(|e| HandleError::Decode {
            message: format!("failed to parse session challenge: {}", e),
        })?;
        Self::from_parts(parsed.nonce.as_deref(), parsed.session_id.as_deref())
    }

    /// Parse a `WWW-Authenticate` header value.
    ///
    /// Accepts `Handle sessionId="...", nonce="..."`, possibly combined with a
    /// `Basic realm="..."` challenge. Parameter names are case-insensitive.
    pub fn from_www_authenticate(header: &str) -> HandleResult<Self> {
        let params = parse_auth_params(header);
        Self::from_parts(
            params.get("nonce").map(String::as_str),
            params.get("sessionid").map(String::as_str),
        )
    }

    pub fn validate(&self) -> HandleResult<()> {
        if self.server_nonce.is_empty() {
            return Err(malformed("empty nonce"));
        }
        if self.session_id.is_empty() {
            return Err(malformed("empty session id"));
        }
        Ok(())
    }

    /// Bytes to sign: server nonce first, then client nonce.
    pub fn signing_input(&self, client_nonce: &ClientNonce) -> Vec<u8> {
        let mut combined = Vec::with_capacity(self.server_nonce.len() + CLIENT_NONCE_LEN);
        combined.extend_from_slice(&self.server_nonce);
        combined.extend_from_slice(client_nonce.as_bytes());
        combined
    }
}

fn malformed(reason: impl Into<String>) -> HandleError {
    HandleError::MalformedChallenge {
        reason: reason.into(),
    }
}

/// Split auth parameters on commas outside quotes; keys are lowercased and
/// stripped of a leading scheme token (`Handle sessionId` -> `sessionid`).
pub(crate) fn parse_auth_params(header: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for token in split_unquoted(header, ',') {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        let Some(key) = key.split_whitespace().last() else {
            continue;
        };
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        params.insert(key.to_ascii_lowercase(), value.to_string());
    }

    params
}

fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == sep && !in_quotes {
            parts.push(s[start..i].trim());
            start = i + c.len_utf8();
        }
    }
    parts.push(s[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}
