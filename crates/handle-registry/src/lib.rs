//! Client for a Handle (persistent identifier) registry.
//!
//! This crate implements the client side of the Handle REST API, providing:
//!
//! - Create, read, update and delete of handle records
//! - Challenge-response authentication signed with an RSA private key
//! - Session authentication with a single shared handshake
//! - Minting of collision-free identifier suffixes
//! - Bounded-concurrency batch create and delete
//!
//! # Quick Start
//!
//! ```no_run
//! use handle_registry::{Record, RegistryClient, ValueEntry, DEFAULT_ADMIN_PERMISSIONS};
//!
//! # async fn example() -> anyhow::Result<()> {
//! // Create client from environment
//! let client = RegistryClient::from_env()?;
//!
//! let record = Record::new("")
//!     .with_entry(ValueEntry::string(1, "URL", "https://example.org/object/1"))
//!     .with_entry(ValueEntry::admin(100, "0.NA/20.5000.1025", DEFAULT_ADMIN_PERMISSIONS));
//!
//! // Mint a suffix and register the record under it
//! let created = client.create(record, None).await?;
//! println!("registered {}", created.handle);
//!
//! // Point the first entry somewhere else
//! client.update(&created.suffix, 0, "https://example.org/object/2").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Authentication
//!
//! Mutating requests are authenticated in one of two ways, selected by
//! `HANDLE_AUTH_MODE`:
//!
//! - `session` (default): one handshake per client, then a session header on
//!   every request. A 401 invalidates the session; call
//!   [`SessionManager::reestablish`] before retrying.
//! - `key_pair`: every request answers a fresh registry challenge.
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `HANDLE_BASE_URL` | Record endpoint (default: `https://localhost:8000/api/handles/`) |
//! | `HANDLE_PREFIX` | Identifier prefix, e.g. `20.5000.1025/` |
//! | `HANDLE_ADMIN_ID` | Administrator identity, e.g. `300:0.NA/20.5000.1025` |
//! | `HANDLE_KEY_PATH` | PEM private key (PKCS#8 or PKCS#1) |
//! | `HANDLE_SESSIONS_URL` | Session endpoint (default: derived from the base URL) |
//! | `HANDLE_AUTH_MODE` | `session` or `key_pair` |
//! | `HANDLE_TIMEOUT` | Request timeout in seconds (default: 30) |
//! | `HANDLE_MAX_ALLOCATION_ATTEMPTS` | Suffix candidates probed per create (default: 50) |

pub mod allocator;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod record;
pub mod signing;

// Re-export main types
pub use allocator::{Base32Candidates, CandidateSource, ExistenceProbe, IdentifierAllocator};
pub use auth::challenge::{Challenge, ClientNonce};
pub use auth::header::{AuthHeaderBuilder, KeyPairHeader, SessionHeader};
pub use auth::session::{Session, SessionManager, SessionState};
pub use auth::{AuthStrategy, KeyPairAuth, SessionAuth};
pub use client::{BatchItem, BatchReport, Created, RegistryClient};
pub use config::{AuthMode, HandleConfig};
pub use error::{HandleError, HandleResult};
pub use record::{
    AdminValue, EntryValue, Record, ValueData, ValueEntry, DEFAULT_ADMIN_KEY_INDEX,
    DEFAULT_ADMIN_PERMISSIONS, DEFAULT_TTL, HS_ADMIN,
};
pub use signing::{verify_signature, RsaSigner, SigningKey, SigningProvider};
