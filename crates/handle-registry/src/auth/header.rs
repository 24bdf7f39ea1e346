//! Authorization header grammars.
//!
//! Both modes sign the same material (`server_nonce || client_nonce`) but the
//! registry expects two different header layouts. They are separate
//! implementations of [`AuthHeaderBuilder`] and must not be merged: field
//! order, separators and even the casing of the scheme and session-id key
//! differ, and the registry parses each one literally.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::auth::challenge::{Challenge, ClientNonce};
use crate::config::AuthMode;
use crate::error::HandleResult;
use crate::signing::SigningProvider;

/// Handle auth protocol version.
pub const PROTOCOL_VERSION: &str = "0";

/// Key type of the admin credential.
pub const KEY_TYPE: &str = "HS_PUBKEY";

/// Signed challenge material, base64-encoded where the header needs it.
#[derive(Debug, Clone)]
pub struct SignedChallenge<'a> {
    pub session_id: &'a str,
    pub client_nonce: String,
    pub admin_id: &'a str,
    pub algorithm: &'a str,
    pub signature: String,
}

/// Renders a challenge response as an Authorization header value.
pub trait AuthHeaderBuilder: Send + Sync + fmt::Debug {
    fn mode(&self) -> AuthMode;

    fn render(&self, signed: &SignedChallenge<'_>) -> String;

    /// Sign `challenge` with `client_nonce` and render the header.
    fn build(
        &self,
        signer: &dyn SigningProvider,
        challenge: &Challenge,
        client_nonce: &ClientNonce,
    ) -> HandleResult<String> {
        let signed = sign_challenge(signer, challenge, client_nonce)?;
        Ok(self.render(&signed))
    }
}

/// Sign `server_nonce || client_nonce` and encode the pieces.
pub fn sign_challenge<'a>(
    signer: &'a dyn SigningProvider,
    challenge: &'a Challenge,
    client_nonce: &ClientNonce,
) -> HandleResult<SignedChallenge<'a>> {
    challenge.validate()?;

    let signature = signer.sign(&challenge.signing_input(client_nonce))?;

    Ok(SignedChallenge {
        session_id: &challenge.session_id,
        client_nonce: client_nonce.to_base64(),
        admin_id: signer.admin_id(),
        algorithm: signer.algorithm(),
        signature: BASE64.encode(signature),
    })
}

/// Header used during the session handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionHeader;

impl AuthHeaderBuilder for SessionHeader {
    fn mode(&self) -> AuthMode {
        AuthMode::Session
    }

    fn render(&self, s: &SignedChallenge<'_>) -> String {
        format!(
            "Handle version=\"{}\", sessionId=\"{}\", cnonce=\"{}\", id=\"{}\", type=\"{}\",alg=\"{}\",signature=\"{}\"",
            PROTOCOL_VERSION, s.session_id, s.client_nonce, s.admin_id, KEY_TYPE, s.algorithm, s.signature
        )
    }
}

/// Header answering a per-request challenge.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyPairHeader;

impl AuthHeaderBuilder for KeyPairHeader {
    fn mode(&self) -> AuthMode {
        AuthMode::KeyPair
    }

    fn render(&self, s: &SignedChallenge<'_>) -> String {
        format!(
            "handle sessionID=\"{}\",id=\"{}\",type=\"{}\",cnonce=\"{}\",alg=\"{}\",signature=\"{}\"",
            s.session_id, s.admin_id, KEY_TYPE, s.client_nonce, s.algorithm, s.signature
        )
    }
}

/// Header carried by every request made inside an authenticated session.
pub fn session_token_header(session_id: &str) -> String {
    format!(
        "Handle version=\"{}\", sessionId=\"{}\"",
        PROTOCOL_VERSION, session_id
    )
}
