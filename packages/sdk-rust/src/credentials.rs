//! On-disk custody of single-use co-signer keypairs.
//!
//! Two directories hold the pools: *available* and *consumed*. Each
//! credential is one Solana keypair JSON file (a 64-byte array); the file
//! name is the credential's external identifier. A credential lives in
//! exactly one of the two directories; [`CredentialStore::consume`] moves it
//! across with a single rename.
//!
//! Selection is unguarded: two callers may pick the same entry before either
//! consumes it. The orchestrator goes through
//! [`CredentialReservations`](crate::reservations::CredentialReservations)
//! to get exclusive use.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rand::Rng;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{write_keypair_file, Keypair, Signer},
};

use crate::error::{Error, Result};

const KEYPAIR_EXT: &str = "json";

// ─── Handles ──────────────────────────────────────────────────────────────────

/// Reference to one credential file in the available pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialHandle {
    /// File name, e.g. `9xQe…chan.json`.
    pub identifier: String,
    pub path:       PathBuf,
}

/// A loaded credential: identifier plus the signing keypair.
pub struct Credential {
    pub identifier: String,
    keypair:        Keypair,
}

impl Credential {
    pub fn new(identifier: impl Into<String>, keypair: Keypair) -> Self {
        Self { identifier: identifier.into(), keypair }
    }

    /// The public identifier, used as the new token's mint address.
    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Secret material in Solana keypair-file order (secret ‖ public).
    pub fn secret_bytes(&self) -> [u8; 64] {
        self.keypair.to_bytes()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("identifier", &self.identifier)
            .field("pubkey", &self.pubkey())
            .finish_non_exhaustive()
    }
}

// ─── Store ────────────────────────────────────────────────────────────────────

/// The available / consumed keypair directories.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    available_dir: PathBuf,
    consumed_dir:  PathBuf,
}

impl CredentialStore {
    pub fn new(available_dir: impl Into<PathBuf>, consumed_dir: impl Into<PathBuf>) -> Self {
        Self {
            available_dir: available_dir.into(),
            consumed_dir:  consumed_dir.into(),
        }
    }

    pub fn available_dir(&self) -> &Path {
        &self.available_dir
    }

    pub fn consumed_dir(&self) -> &Path {
        &self.consumed_dir
    }

    /// Enumerate the available pool, sorted by identifier.
    pub fn list_available(&self) -> Result<Vec<CredentialHandle>> {
        list_keypair_files(&self.available_dir)
    }

    /// Enumerate the consumed pool. A missing consumed directory is an empty
    /// pool: it is only created on the first [`consume`](Self::consume).
    pub fn list_consumed(&self) -> Result<Vec<CredentialHandle>> {
        if !self.consumed_dir.exists() {
            return Ok(Vec::new());
        }
        list_keypair_files(&self.consumed_dir)
    }

    /// Pick one available credential uniformly at random. Does not move it.
    pub fn select_random(&self) -> Result<CredentialHandle> {
        let mut handles = self.list_available()?;
        if handles.is_empty() {
            return Err(Error::NoCredentialAvailable);
        }
        let idx = rand::thread_rng().gen_range(0..handles.len());
        Ok(handles.swap_remove(idx))
    }

    /// Read and decode the keypair behind a handle.
    pub fn load(&self, handle: &CredentialHandle) -> Result<Credential> {
        let raw = fs::read(&handle.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound(handle.identifier.clone()),
            _ => Error::dir_io(&handle.path, e),
        })?;
        let bytes: Vec<u8> = serde_json::from_slice(&raw).map_err(|e| {
            Error::Serialization(format!("keypair file {}: {e}", handle.identifier))
        })?;
        let keypair = Keypair::from_bytes(&bytes).map_err(|e| {
            Error::Serialization(format!("keypair file {}: {e}", handle.identifier))
        })?;
        Ok(Credential::new(handle.identifier.clone(), keypair))
    }

    /// Move `identifier` from the available pool to the consumed pool.
    ///
    /// Fails with [`Error::NotFound`] when the identifier is not currently
    /// available, including the second call for the same identifier.
    pub fn consume(&self, identifier: &str) -> Result<()> {
        if !is_plain_file_name(identifier) {
            return Err(Error::NotFound(identifier.to_string()));
        }
        let source = self.available_dir.join(identifier);
        if !source.is_file() {
            return Err(Error::NotFound(identifier.to_string()));
        }

        fs::create_dir_all(&self.consumed_dir)
            .map_err(|e| Error::dir_io(&self.consumed_dir, e))?;

        let destination = self.consumed_dir.join(identifier);
        fs::rename(&source, &destination).map_err(|e| match e.kind() {
            // Lost a race with another consumer between the check and the rename.
            ErrorKind::NotFound => Error::NotFound(identifier.to_string()),
            _ => Error::dir_io(&source, e),
        })?;

        tracing::info!(identifier, "keypair moved to consumed pool");
        Ok(())
    }

    pub fn is_available(&self, identifier: &str) -> bool {
        is_plain_file_name(identifier) && self.available_dir.join(identifier).is_file()
    }

    pub fn is_consumed(&self, identifier: &str) -> bool {
        is_plain_file_name(identifier) && self.consumed_dir.join(identifier).is_file()
    }

    /// Write a freshly generated keypair into the available pool as
    /// `<pubkey>.json` and return its handle.
    pub fn provision(&self, keypair: &Keypair) -> Result<CredentialHandle> {
        fs::create_dir_all(&self.available_dir)
            .map_err(|e| Error::dir_io(&self.available_dir, e))?;

        let identifier = format!("{}.{KEYPAIR_EXT}", keypair.pubkey());
        let path = self.available_dir.join(&identifier);
        if path.exists() || self.is_consumed(&identifier) {
            return Err(Error::Validation(format!("keypair {identifier} already provisioned")));
        }
        write_keypair_file(keypair, &path).map_err(|e| {
            Error::dir_io(&path, std::io::Error::new(ErrorKind::Other, e.to_string()))
        })?;
        Ok(CredentialHandle { identifier, path })
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn list_keypair_files(dir: &Path) -> Result<Vec<CredentialHandle>> {
    let entries = fs::read_dir(dir).map_err(|e| Error::dir_io(dir, e))?;

    let mut handles = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::dir_io(dir, e))?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(KEYPAIR_EXT) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            handles.push(CredentialHandle { identifier: name.to_string(), path: path.clone() });
        }
    }
    handles.sort_by(|a, b| a.identifier.cmp(&b.identifier));
    Ok(handles)
}

/// Identifiers come from HTTP callers; only bare file names are accepted.
pub(crate) fn is_plain_file_name(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier != "."
        && identifier != ".."
        && !identifier.contains('/')
        && !identifier.contains('\\')
        && !identifier.contains('\0')
}
