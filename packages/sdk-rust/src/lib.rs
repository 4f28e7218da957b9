//! Curve Launch Rust SDK
//!
//! Two-party pool creation for bonding-curve token launches on Solana.
//! A service-held, single-use keypair becomes the new token's mint and
//! co-signs the pool-creation transaction; the user's wallet adds the second
//! signature; the keypair is retired once the transaction is broadcast.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use curve_launch_sdk::{
//!     CredentialReservations, CredentialStore, HttpAssetUploader, HttpBroadcaster,
//!     KeypairWallet, LogoAsset, PoolCreationOrchestrator, PoolCreationRequest,
//! };
//! use solana_sdk::signature::Keypair;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = CredentialStore::new("keypairs", "used_keypairs");
//!     let orchestrator = PoolCreationOrchestrator::new(
//!         Arc::new(CredentialReservations::new(store, "claims")),
//!         Arc::new(HttpAssetUploader::new("https://launch.example/api/upload")),
//!         Arc::new(HttpBroadcaster::new("https://launch.example/api/send-transaction")),
//!     );
//!
//!     let request = PoolCreationRequest {
//!         token_name:   "Virtual Coin".into(),
//!         token_symbol: "VIRT".into(),
//!         logo:         Some(LogoAsset::from_bytes(std::fs::read("logo.png")?)),
//!         website:      None,
//!         twitter:      None,
//!     };
//!     let wallet = KeypairWallet::new(Keypair::new()); // the user's funded wallet
//!     let outcome = orchestrator.run(&request, Some(&wallet)).await?;
//!     println!("Pool created! mint: {}  tx: {}", outcome.mint, outcome.signature);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Feature Overview
//!
//! | Item | Description |
//! |------|-------------|
//! | [`CredentialStore`] | Available / consumed keypair pools on disk |
//! | [`CredentialReservations`] | Exclusive, expiring claims over the available pool |
//! | [`PoolCreationOrchestrator::run`] | Whole creation flow with a local wallet |
//! | [`PoolCreationOrchestrator::prepare`] | Co-signed transaction for an external wallet |
//! | [`PoolCreationOrchestrator::complete`] | Verify, broadcast and retire |
//! | [`PoolDirectoryReader::list_pools_by_creator`] | Pools by creator, with token metadata |
//! | [`vanity::grind_into`] | Provision keypairs with a vanity address suffix |

pub mod collaborators;
pub mod credentials;
pub mod directory;
pub mod error;
pub mod orchestrator;
pub mod pending;
pub mod reservations;
pub mod state;
pub mod transaction;
pub mod types;
pub mod vanity;

pub use collaborators::{
    AssetUploader, Broadcaster, HttpAssetUploader, HttpBroadcaster, KeypairWallet, RpcBroadcaster,
    WalletSigner,
};
pub use credentials::{Credential, CredentialHandle, CredentialStore};
pub use directory::{
    CreatorPools, JupiterTokenClient, PoolDirectoryReader, PoolEntry, PoolSource, RpcPoolSource,
    TokenMetadata, TokenMetadataSource,
};
pub use error::{Error, Result};
pub use orchestrator::PoolCreationOrchestrator;
pub use pending::{PendingCreations, PendingEntry};
pub use reservations::{Claim, CredentialReservations};
pub use state::VirtualPoolState;
pub use types::*;
