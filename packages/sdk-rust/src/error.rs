//! SDK error type.

use std::path::PathBuf;

/// All errors returned by the Curve Launch SDK.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // ── Input ────────────────────────────────────────────────────────────────
    /// The pool-creation request failed validation; the message is meant for
    /// the end user.
    #[error("{0}")]
    Validation(String),

    /// A lookup key is not a base58 Solana address.
    #[error("Invalid address '{0}': must be a base58 Solana public key")]
    InvalidAddress(String),

    // ── Credential store ─────────────────────────────────────────────────────
    /// The available pool is empty, or every entry is claimed by another run.
    #[error("No co-signer keypairs available")]
    NoCredentialAvailable,

    /// The identifier is not currently in the available pool.
    #[error("Keypair '{0}' not found in the available pool")]
    NotFound(String),

    /// A pool directory could not be read or written.
    #[error("Keypair directory error at {}: {source}", path.display())]
    DirectoryIo {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The caller tried to retire or release a claim it no longer holds
    /// (expired and recycled, or owned by another run).
    #[error("Claim on keypair '{0}' is not held by this request")]
    ClaimNotHeld(String),

    // ── Orchestration ────────────────────────────────────────────────────────
    /// The asset-upload collaborator failed or returned a malformed response.
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Transaction bytes are malformed, or an expected signer slot is absent.
    #[error("Transaction serialization error: {0}")]
    Serialization(String),

    /// The user declined to sign, or no wallet is connected.
    #[error("Wallet signature rejected: {0}")]
    UserRejected(String),

    /// The network (or broadcast collaborator) rejected the transaction.
    /// The remote reason is passed through verbatim.
    #[error("Broadcast failed: {0}")]
    Broadcast(String),

    /// No pending creation exists for the request id (never prepared,
    /// already completed, abandoned, or expired).
    #[error("No pending pool creation for request {0}")]
    PendingNotFound(String),

    // ── Read side ────────────────────────────────────────────────────────────
    /// Token metadata could not be fetched. Never fatal to a pool listing.
    #[error("Token metadata unavailable for {mint}: {reason}")]
    MetadataEnrichment { mint: String, reason: String },

    /// Raw account bytes could not be deserialized.
    #[error("Account parse error at offset {offset}: {reason}")]
    ParseError { offset: usize, reason: String },

    // ── Transport ────────────────────────────────────────────────────────────
    /// A Solana JSON-RPC call failed.
    #[error("RPC error: {0}")]
    Rpc(#[from] solana_client::client_error::ClientError),

    /// An HTTP collaborator call failed at the transport level.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub(crate) fn dir_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::DirectoryIo { path: path.into(), source }
    }

    /// Whether the end user can fix this by changing their input or by
    /// signing. Everything else is a service fault shown with a generic
    /// message and the underlying detail attached.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::InvalidAddress(_) | Error::UserRejected(_)
        )
    }
}

/// Convenience alias so every module can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;
