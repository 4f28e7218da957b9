//! Vanity keypair grinding for the available pool.
//!
//! Mint addresses can be given a recognisable base58 suffix by generating
//! keypairs until one matches. Expected attempts grow 58× per suffix
//! character (about 29× when case-insensitive), so keep suffixes short.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;
use solana_sdk::signature::{Keypair, Signer};
use tracing::{debug, info};

use crate::credentials::{CredentialHandle, CredentialStore};
use crate::error::{Error, Result};

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Longest suffix accepted.
pub const MAX_SUFFIX_LEN: usize = 8;

const PROGRESS_EVERY: u64 = 250_000;

/// What a ground address must end with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VanityTarget {
    suffix:           String,
    case_insensitive: bool,
}

impl VanityTarget {
    pub fn new(suffix: &str, case_insensitive: bool) -> Result<Self> {
        let suffix = suffix.trim();
        if suffix.is_empty() {
            return Err(Error::Validation("vanity suffix must not be empty".into()));
        }
        if suffix.chars().count() > MAX_SUFFIX_LEN {
            return Err(Error::Validation(format!(
                "vanity suffix must be at most {MAX_SUFFIX_LEN} characters"
            )));
        }
        for c in suffix.chars() {
            let representable = if case_insensitive {
                BASE58_ALPHABET.contains(c.to_ascii_lowercase())
                    || BASE58_ALPHABET.contains(c.to_ascii_uppercase())
            } else {
                BASE58_ALPHABET.contains(c)
            };
            if !representable {
                return Err(Error::Validation(format!(
                    "'{c}' never appears in a base58 address"
                )));
            }
        }

        let suffix = if case_insensitive { suffix.to_ascii_lowercase() } else { suffix.to_string() };
        Ok(Self { suffix, case_insensitive })
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn matches(&self, address: &str) -> bool {
        if self.case_insensitive {
            address.len() >= self.suffix.len()
                && address[address.len() - self.suffix.len()..].eq_ignore_ascii_case(&self.suffix)
        } else {
            address.ends_with(&self.suffix)
        }
    }
}

/// A matching keypair and how many were generated to find it.
#[derive(Debug)]
pub struct GrindOutcome {
    pub keypair:  Keypair,
    pub attempts: u64,
}

/// Generate keypairs on `threads` rayon workers (0 = all cores) until one
/// matches `target`. `None` once `max_attempts` is exhausted.
pub fn grind(target: &VanityTarget, threads: usize, max_attempts: Option<u64>) -> Result<Option<GrindOutcome>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| Error::Validation(format!("cannot start grinding threads: {e}")))?;

    let found = AtomicBool::new(false);
    let attempts = AtomicU64::new(0);
    let winner: Mutex<Option<Keypair>> = Mutex::new(None);
    let limit = max_attempts.unwrap_or(u64::MAX);

    pool.install(|| {
        (0..pool.current_num_threads()).into_par_iter().for_each(|_| {
            while !found.load(Ordering::Relaxed) {
                let n = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                if n > limit {
                    break;
                }
                if n % PROGRESS_EVERY == 0 {
                    info!(attempts = n, suffix = %target.suffix, "still grinding");
                }

                let keypair = Keypair::new();
                if target.matches(&keypair.pubkey().to_string())
                    && !found.swap(true, Ordering::SeqCst)
                {
                    if let Ok(mut slot) = winner.lock() {
                        *slot = Some(keypair);
                    }
                    break;
                }
            }
        });
    });

    let attempts = attempts.load(Ordering::SeqCst).min(limit);
    let keypair = winner.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
    Ok(keypair.map(|keypair| {
        debug!(address = %keypair.pubkey(), attempts, "vanity address found");
        GrindOutcome { keypair, attempts }
    }))
}

/// Grind `count` matching keypairs and provision each into `store`.
pub fn grind_into(
    store:        &CredentialStore,
    target:       &VanityTarget,
    count:        usize,
    threads:      usize,
    max_attempts: Option<u64>,
) -> Result<Vec<CredentialHandle>> {
    let mut provisioned = Vec::with_capacity(count);
    for _ in 0..count {
        let Some(outcome) = grind(target, threads, max_attempts)? else {
            break;
        };
        let handle = store.provision(&outcome.keypair)?;
        info!(
            identifier = %handle.identifier,
            attempts = outcome.attempts,
            "vanity keypair provisioned"
        );
        provisioned.push(handle);
    }
    Ok(provisioned)
}
