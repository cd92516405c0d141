//! Single-use write grants for backends that serve their own data plane.
//!
//! A grant is a 256-bit random token bound to one key, one content type and a size
//! cap. It is removed from the table the first time it is claimed, whether or not
//! the subsequent write succeeds.

use crate::error::{StorageError, StorageResult};
use crate::traits::GrantClaim;
use dashmap::DashMap;
use rand::RngCore;
use time::OffsetDateTime;

#[derive(Clone, Debug)]
struct PendingGrant {
    claim: GrantClaim,
    expires_at: OffsetDateTime,
}

/// In-process table of outstanding write grants.
#[derive(Debug, Default)]
pub struct GrantTable {
    grants: DashMap<String, PendingGrant>,
}

impl GrantTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a token for `claim`, valid until `expires_at`.
    pub fn issue(&self, claim: GrantClaim, expires_at: OffsetDateTime) -> String {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        self.grants
            .insert(token.clone(), PendingGrant { claim, expires_at });
        token
    }

    /// Consume a token. A token can be claimed at most once.
    pub fn claim(&self, token: &str, now: OffsetDateTime) -> StorageResult<GrantClaim> {
        let (_, grant) = self
            .grants
            .remove(token)
            .ok_or(StorageError::GrantNotFound)?;
        if grant.expires_at <= now {
            return Err(StorageError::GrantExpired);
        }
        Ok(grant.claim)
    }

    /// Drop grants that expired before `now`.
    pub fn purge_expired(&self, now: OffsetDateTime) -> usize {
        let before = self.grants.len();
        self.grants.retain(|_, grant| grant.expires_at > now);
        before.saturating_sub(self.grants.len())
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}
