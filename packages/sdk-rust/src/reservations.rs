//! Exclusive, expiring claims over the available keypair pool.
//!
//! A claim is a small JSON record in the claims directory, named after the
//! credential it reserves and created exclusively so exactly one writer
//! wins. States per credential:
//!
//! ```text
//! free ──claim_any──▶ claimed(owner, expires_at) ──retire──▶ consumed
//!   ▲                        │
//!   └──release / expiry──────┘
//! ```
//!
//! Records are hard-linked into place from a scratch file, so a record is
//! never observed half-written. An expired record is recycled by renaming it
//! to a unique tombstone name first; `rename` of a vanished source fails, so
//! only one recycler wins. The tombstone is deleted only if it still holds
//! the exact stale record that was read; anything else is linked back, and a
//! record that cannot be linked back is an error rather than a silent loss.
//! Holders re-check their claim with [`CredentialReservations::ensure_held`]
//! before acting on it.
//!
//! Claims never touch the keypair files themselves, so the
//! available/consumed invariant of [`CredentialStore`] is unaffected.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credentials::{is_plain_file_name, Credential, CredentialHandle, CredentialStore};
use crate::error::{Error, Result};

/// Default lifetime of an unresolved claim.
pub const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(600);

const TOMBSTONE_PREFIX: &str = ".expired-";
const SCRATCH_PREFIX: &str = ".pending-";

/// Proof that the holder reserved one credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub identifier: String,
    pub owner:      String,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Claim {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Claim ledger layered over a [`CredentialStore`].
#[derive(Debug, Clone)]
pub struct CredentialReservations {
    store:      CredentialStore,
    claims_dir: PathBuf,
    ttl:        Duration,
}

impl CredentialReservations {
    pub fn new(store: CredentialStore, claims_dir: impl Into<PathBuf>) -> Self {
        Self { store, claims_dir: claims_dir.into(), ttl: DEFAULT_CLAIM_TTL }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn claims_dir(&self) -> &Path {
        &self.claims_dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Atomically reserve one random unclaimed credential for `owner` and
    /// load it.
    pub fn claim_any(&self, owner: &str) -> Result<(Claim, Credential)> {
        let mut candidates = self.store.list_available()?;
        candidates.shuffle(&mut rand::thread_rng());

        fs::create_dir_all(&self.claims_dir).map_err(|e| Error::dir_io(&self.claims_dir, e))?;

        for handle in &candidates {
            let Some(claim) = self.try_claim(handle, owner)? else {
                continue;
            };
            match self.store.load(handle) {
                Ok(credential) => {
                    tracing::debug!(identifier = %claim.identifier, owner, "keypair claimed");
                    return Ok((claim, credential));
                }
                // Consumed between listing and loading; give the slot back.
                Err(Error::NotFound(_)) => {
                    self.remove_record(&claim.identifier)?;
                }
                Err(e) => {
                    self.remove_record(&claim.identifier)?;
                    return Err(e);
                }
            }
        }
        Err(Error::NoCredentialAvailable)
    }

    /// Consume the claimed credential. The caller must still hold the claim.
    pub fn retire(&self, claim: &Claim) -> Result<()> {
        self.verify_held(claim)?;
        self.store.consume(&claim.identifier)?;
        self.remove_record(&claim.identifier)
    }

    /// `ClaimNotHeld` unless the claim record on disk still names this owner.
    pub fn ensure_held(&self, claim: &Claim) -> Result<()> {
        self.verify_held(claim)
    }

    /// Give a held claim back without consuming the credential.
    pub fn release(&self, claim: &Claim) -> Result<()> {
        self.verify_held(claim)?;
        self.remove_record(&claim.identifier)?;
        tracing::debug!(identifier = %claim.identifier, owner = %claim.owner, "claim released");
        Ok(())
    }

    /// Current claim record for an identifier, if any (expired ones included).
    pub fn current_claim(&self, identifier: &str) -> Result<Option<Claim>> {
        if !is_plain_file_name(identifier) {
            return Ok(None);
        }
        self.read_record(&self.record_path(identifier))
    }

    /// Delete every expired claim record. Returns how many were recycled.
    pub fn recycle_expired(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.claims_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::dir_io(&self.claims_dir, e)),
        };

        let now = Utc::now();
        let mut recycled = 0;
        for entry in entries {
            let entry = entry.map_err(|e| Error::dir_io(&self.claims_dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(TOMBSTONE_PREFIX) || name.starts_with(SCRATCH_PREFIX) {
                continue;
            }
            if let Some(claim) = self.read_record(&entry.path())? {
                if claim.is_expired_at(now) && self.evict_expired(&claim)? {
                    recycled += 1;
                }
            }
        }
        if recycled > 0 {
            tracing::info!(recycled, "expired keypair claims recycled");
        }
        Ok(recycled)
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn try_claim(&self, handle: &CredentialHandle, owner: &str) -> Result<Option<Claim>> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_CLAIM_TTL.as_secs() as i64));
        let claim = Claim {
            identifier: handle.identifier.clone(),
            owner:      owner.to_string(),
            claimed_at: now,
            expires_at: now + ttl,
        };

        if self.create_record(&claim)? {
            return Ok(Some(claim));
        }

        // Someone holds a record. Recycle it only if it has expired.
        match self.read_record(&self.record_path(&handle.identifier))? {
            Some(existing) if existing.is_expired_at(now) => {
                if self.evict_expired(&existing)? && self.create_record(&claim)? {
                    return Ok(Some(claim));
                }
                Ok(None)
            }
            // Released between our create attempt and the read.
            None => Ok(self.create_record(&claim)?.then_some(claim)),
            Some(_) => Ok(None),
        }
    }

    /// Exclusive create. `Ok(false)` when a record already exists.
    ///
    /// The record is written to a scratch file and hard-linked into place, so
    /// a reader never observes a half-written claim.
    fn create_record(&self, claim: &Claim) -> Result<bool> {
        let path = self.record_path(&claim.identifier);
        let scratch = self
            .claims_dir
            .join(format!("{SCRATCH_PREFIX}{}-{}", Uuid::new_v4(), claim.identifier));

        let body = serde_json::to_vec(claim)
            .map_err(|e| Error::Serialization(format!("claim record: {e}")))?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&scratch)
            .map_err(|e| Error::dir_io(&scratch, e))?;
        file.write_all(&body)
            .and_then(|_| file.sync_all())
            .map_err(|e| Error::dir_io(&scratch, e))?;
        drop(file);

        let linked = fs::hard_link(&scratch, &path);
        let _ = fs::remove_file(&scratch);
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(Error::dir_io(&path, e)),
        }
    }

    /// Rename-then-delete so only one caller recycles a given stale record.
    /// `stale` is the record as read; a different record found under the
    /// same name is restored instead of deleted.
    fn evict_expired(&self, stale: &Claim) -> Result<bool> {
        let identifier = stale.identifier.as_str();
        let path = self.record_path(identifier);
        let tombstone = self
            .claims_dir
            .join(format!("{TOMBSTONE_PREFIX}{}-{identifier}", Uuid::new_v4()));
        match fs::rename(&path, &tombstone) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::dir_io(&path, e)),
        }

        let moved = self.read_record(&tombstone)?;
        let same = moved
            .as_ref()
            .is_some_and(|m| m.owner == stale.owner && m.claimed_at == stale.claimed_at);
        if !same {
            self.restore_record(&tombstone, identifier)?;
            return Ok(false);
        }
        fs::remove_file(&tombstone).map_err(|e| Error::dir_io(&tombstone, e))?;
        tracing::debug!(identifier, "expired claim evicted");
        Ok(true)
    }

    /// Link a tombstoned record back under its name, then drop the tombstone.
    fn restore_record(&self, tombstone: &Path, identifier: &str) -> Result<()> {
        let path = self.record_path(identifier);
        let linked = fs::hard_link(tombstone, &path);
        let _ = fs::remove_file(tombstone);
        match linked {
            Ok(()) => Ok(()),
            Err(e) => {
                // A newer claim took the slot; the displaced holder fails
                // `ensure_held` before it can use the credential.
                tracing::warn!(identifier, error = %e, "displaced claim record could not be restored");
                Err(Error::dir_io(&path, e))
            }
        }
    }

    fn verify_held(&self, claim: &Claim) -> Result<()> {
        match self.current_claim(&claim.identifier)? {
            Some(current) if current.owner == claim.owner => Ok(()),
            _ => Err(Error::ClaimNotHeld(claim.identifier.clone())),
        }
    }

    fn read_record(&self, path: &Path) -> Result<Option<Claim>> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::dir_io(path, e)),
        };
        match serde_json::from_slice(&raw) {
            Ok(claim) => Ok(Some(claim)),
            // Unreadable record (e.g. corrupted on disk); treat as long expired.
            Err(_) => Ok(Some(Claim {
                identifier: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                owner:      String::new(),
                claimed_at: DateTime::<Utc>::MIN_UTC,
                expires_at: DateTime::<Utc>::MIN_UTC,
            })),
        }
    }

    fn remove_record(&self, identifier: &str) -> Result<()> {
        let path = self.record_path(identifier);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::dir_io(&path, e)),
        }
    }

    fn record_path(&self, identifier: &str) -> PathBuf {
        self.claims_dir.join(identifier)
    }
}
