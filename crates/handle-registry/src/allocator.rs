//! Identifier minting.
//!
//! Candidates are random lowercase Crockford base-32 tokens (`k3m9-x0qa`).
//! A candidate is accepted only after the registry answers "not found" for
//! it. Accept-then-create is not atomic; a concurrent minter could take the
//! same suffix in between, in which case the registry rejects the create.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::HandleConfig;
use crate::error::{HandleError, HandleResult};

/// Crockford base-32 alphabet (no `i`, `l`, `o`, `u`), lowercase.
pub const CROCKFORD_ALPHABET: &[u8; 32] = b"0123456789abcdefghjkmnpqrstvwxyz";

/// Produces identifier candidates.
pub trait CandidateSource: Send + Sync + fmt::Debug {
    fn next_candidate(&self) -> String;
}

/// Read-only existence check against the registry.
#[async_trait]
pub trait ExistenceProbe: Send + Sync {
    /// `Ok(false)` means the registry answered "not found".
    async fn exists(&self, suffix: &str) -> HandleResult<bool>;
}

/// Random base-32 candidates, hyphenated every `group` characters.
#[derive(Debug, Clone)]
pub struct Base32Candidates {
    length: usize,
    group: usize,
}

impl Base32Candidates {
    pub fn new(length: usize, group: usize) -> Self {
        Self { length, group }
    }
}

impl Default for Base32Candidates {
    fn default() -> Self {
        Self::new(8, 4)
    }
}

impl CandidateSource for Base32Candidates {
    fn next_candidate(&self) -> String {
        let mut rng = rand::thread_rng();
        let mut out = String::with_capacity(self.length + self.length / self.group.max(1));

        for i in 0..self.length {
            if self.group > 0 && i > 0 && i % self.group == 0 {
                out.push('-');
            }
            out.push(CROCKFORD_ALPHABET[rng.gen_range(0..CROCKFORD_ALPHABET.len())] as char);
        }

        out
    }
}

/// Mints suffixes that do not yet exist in the registry.
#[derive(Debug, Clone)]
pub struct IdentifierAllocator {
    source: Arc<dyn CandidateSource>,
    max_attempts: u32,
}

impl IdentifierAllocator {
    pub fn new(source: Arc<dyn CandidateSource>, max_attempts: u32) -> Self {
        Self {
            source,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &HandleConfig) -> Self {
        Self::new(
            Arc::new(Base32Candidates::new(
                config.suffix_length,
                config.suffix_group,
            )),
            config.max_allocation_attempts,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Probe candidates until one is free, up to `max_attempts`.
    pub async fn allocate(&self, probe: &dyn ExistenceProbe) -> HandleResult<String> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.source.next_candidate();

            if probe.exists(&candidate).await? {
                debug!(candidate = %candidate, attempt, "identifier taken");
                continue;
            }

            debug!(candidate = %candidate, attempt, "identifier available");
            return Ok(candidate);
        }

        warn!(
            attempts = self.max_attempts,
            "no free identifier found within attempt budget"
        );
        Err(HandleError::AllocationExhausted {
            attempts: self.max_attempts,
        })
    }
}
