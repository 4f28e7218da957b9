//! Co-signed creations waiting on the user's wallet.
//!
//! Between `prepare` and `complete` the orchestrator parks the claim, the
//! loaded credential and the co-signed transaction here, keyed by request
//! id. Entries expire; the sweeper hands expired entries back so their
//! claims can be released.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use solana_sdk::{pubkey::Pubkey, transaction::Transaction};
use tracing::{debug, warn};

use crate::credentials::Credential;
use crate::reservations::Claim;

/// Default time a user has to sign a prepared transaction.
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(300);

/// One parked creation.
#[derive(Debug)]
pub struct PendingEntry {
    pub request_id:  String,
    pub claim:       Claim,
    pub credential:  Credential,
    pub user_wallet: Pubkey,
    /// Co-signed, still missing the wallet signature.
    pub transaction: Transaction,
    pub created_at:  DateTime<Utc>,
    pub expires_at:  DateTime<Utc>,
}

impl PendingEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Request-id keyed map of [`PendingEntry`] values.
pub struct PendingCreations {
    entries: DashMap<String, PendingEntry>,
    ttl:     Duration,
}

impl PendingCreations {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Expiry for an entry created at `now`.
    pub fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_PENDING_TTL.as_secs() as i64));
        now + ttl
    }

    pub fn insert(&self, entry: PendingEntry) {
        debug!(request_id = %entry.request_id, mint = %entry.credential.pubkey(), "creation parked");
        self.entries.insert(entry.request_id.clone(), entry);
    }

    /// Remove and return an entry. Expired entries are returned too; the
    /// caller decides what to do with them.
    pub fn take(&self, request_id: &str) -> Option<PendingEntry> {
        self.entries.remove(request_id).map(|(_, entry)| entry)
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.entries.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry and return them.
    pub fn remove_expired(&self) -> Vec<PendingEntry> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired_at(now))
            .map(|e| e.key().clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.entries.remove_if(&id, |_, e| e.is_expired_at(now)))
            .map(|(id, entry)| {
                warn!(
                    request_id = %id,
                    user_wallet = %entry.user_wallet,
                    waited_secs = (now - entry.created_at).num_seconds(),
                    "pending creation expired"
                );
                entry
            })
            .collect()
    }
}

impl Default for PendingCreations {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_TTL)
    }
}
