//! Challenge signing.
//!
//! [`SigningKey`] is the credential holder: the RSA private key and the admin
//! identity that labels its signatures, loaded once and never mutated.
//! [`RsaSigner`] exposes it through the [`SigningProvider`] capability.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{HandleError, HandleResult};

/// Signature algorithm tag sent in Authorization headers.
pub const SHA256_ALG: &str = "SHA256";

/// Something that can sign challenge material on behalf of an admin identity.
pub trait SigningProvider: Send + Sync + fmt::Debug {
    /// Identity the registry uses to look up the public key.
    fn admin_id(&self) -> &str;

    /// Algorithm tag for the `alg` header field.
    fn algorithm(&self) -> &'static str {
        SHA256_ALG
    }

    /// Sign `message`, returning raw signature bytes.
    fn sign(&self, message: &[u8]) -> HandleResult<Vec<u8>>;
}

/// RSA private key plus the admin identity it signs for.
pub struct SigningKey {
    admin_id: String,
    key: RsaPrivateKey,
}

impl SigningKey {
    pub fn new(key: RsaPrivateKey, admin_id: impl Into<String>) -> Self {
        Self {
            admin_id: admin_id.into(),
            key,
        }
    }

    /// Parse a PEM private key (PKCS#8 or PKCS#1).
    pub fn from_pem(pem: &str, admin_id: impl Into<String>) -> HandleResult<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|pkcs8_err| {
                RsaPrivateKey::from_pkcs1_pem(pem).map_err(|pkcs1_err| {
                    format!("not a PKCS#8 ({}) or PKCS#1 ({}) RSA key", pkcs8_err, pkcs1_err)
                })
            })
            .map_err(|reason| HandleError::KeyUnavailable { reason })?;

        Ok(Self::new(key, admin_id))
    }

    /// Read and parse a PEM private key file.
    pub fn from_pem_file(path: impl AsRef<Path>, admin_id: impl Into<String>) -> HandleResult<Self> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|e| HandleError::KeyUnavailable {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_pem(&pem, admin_id)
    }

    pub fn admin_id(&self) -> &str {
        &self.admin_id
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.key.to_public_key()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("admin_id", &self.admin_id)
            .field("key", &"[redacted]")
            .finish()
    }
}

/// SHA-256 / PKCS#1 v1.5 signer over a shared [`SigningKey`].
#[derive(Debug, Clone)]
pub struct RsaSigner {
    credential: Arc<SigningKey>,
}

impl RsaSigner {
    pub fn new(credential: Arc<SigningKey>) -> Self {
        Self { credential }
    }

    /// Load the key file once and wrap it.
    pub fn from_pem_file(path: impl AsRef<Path>, admin_id: impl Into<String>) -> HandleResult<Self> {
        Ok(Self::new(Arc::new(SigningKey::from_pem_file(path, admin_id)?)))
    }

    pub fn credential(&self) -> &Arc<SigningKey> {
        &self.credential
    }
}

impl SigningProvider for RsaSigner {
    fn admin_id(&self) -> &str {
        self.credential.admin_id()
    }

    fn sign(&self, message: &[u8]) -> HandleResult<Vec<u8>> {
        let digest = Sha256::digest(message);
        self.credential
            .key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| HandleError::SigningFailure {
                reason: e.to_string(),
            })
    }
}

/// Check a signature produced by [`RsaSigner`].
pub fn verify_signature(
    public_key: &RsaPublicKey,
    message: &[u8],
    signature: &[u8],
) -> HandleResult<()> {
    let digest = Sha256::digest(message);
    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .map_err(|e| HandleError::SigningFailure {
            reason: format!("signature does not verify: {}", e),
        })
}
