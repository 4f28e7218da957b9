//! Read side: bonding-curve pools created by a wallet, with best-effort
//! token metadata.
//!
//! Pools come from `getProgramAccounts` on the curve program; metadata comes
//! from a token registry, one request per pool, all in flight together. A
//! failed metadata lookup only drops that pool's `tokenInfo`.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use solana_account_decoder_client_types::UiAccountEncoding;
use solana_client::{
    nonblocking::rpc_client::RpcClient,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig},
    rpc_filter::{Memcmp, MemcmpEncodedBytes, RpcFilterType},
};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::state::{
    parse_virtual_pool, virtual_pool_discriminator, VirtualPoolState, CREATOR_OFFSET,
    DBC_PROGRAM_ID, VIRTUAL_POOL_LEN,
};

/// Default token registry.
pub const DEFAULT_TOKEN_API_URL: &str = "https://datapi.jup.ag";

// ─── Types ────────────────────────────────────────────────────────────────────

/// Display metadata for a pool's base token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name:     String,
    pub symbol:   String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon:     Option<String>,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website:  Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter:  Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<String>,
}

/// One pool in a listing.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolEntry {
    #[serde_as(as = "DisplayFromStr")]
    pub public_key: Pubkey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_info: Option<TokenMetadata>,
    pub account:    VirtualPoolState,
}

/// `list_pools_by_creator` result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorPools {
    pub success:    bool,
    pub creator:    String,
    pub pool_count: usize,
    pub pools:      Vec<PoolEntry>,
}

// ─── Sources ──────────────────────────────────────────────────────────────────

/// Where pool accounts come from.
#[async_trait]
pub trait PoolSource: Send + Sync {
    async fn pools_by_creator(&self, creator: &Pubkey) -> Result<Vec<(Pubkey, VirtualPoolState)>>;
}

/// Where token metadata comes from.
#[async_trait]
pub trait TokenMetadataSource: Send + Sync {
    /// `Ok(None)` when the registry does not know the mint.
    async fn token_metadata(&self, mint: &Pubkey) -> Result<Option<TokenMetadata>>;
}

/// `getProgramAccounts` against the curve program, filtered by discriminator
/// and creator.
pub struct RpcPoolSource {
    rpc_url:    String,
    program_id: Pubkey,
}

impl RpcPoolSource {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url:    rpc_url.into(),
            program_id: Pubkey::from_str(DBC_PROGRAM_ID).expect("valid program ID constant"),
        }
    }

    pub fn with_program_id(mut self, program_id: Pubkey) -> Self {
        self.program_id = program_id;
        self
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    fn rpc(&self) -> RpcClient {
        RpcClient::new_with_commitment(self.rpc_url.clone(), CommitmentConfig::confirmed())
    }
}

#[async_trait]
impl PoolSource for RpcPoolSource {
    async fn pools_by_creator(&self, creator: &Pubkey) -> Result<Vec<(Pubkey, VirtualPoolState)>> {
        let config = RpcProgramAccountsConfig {
            filters: Some(vec![
                RpcFilterType::DataSize(VIRTUAL_POOL_LEN as u64),
                RpcFilterType::Memcmp(Memcmp::new(
                    0,
                    MemcmpEncodedBytes::Bytes(virtual_pool_discriminator().to_vec()),
                )),
                RpcFilterType::Memcmp(Memcmp::new(
                    CREATOR_OFFSET,
                    MemcmpEncodedBytes::Bytes(creator.to_bytes().to_vec()),
                )),
            ]),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                ..Default::default()
            },
            ..Default::default()
        };

        let raw = self
            .rpc()
            .get_program_accounts_with_config(&self.program_id, config)
            .await?;

        Ok(raw
            .into_iter()
            .filter_map(|(pk, acc)| match parse_virtual_pool(&acc.data) {
                Ok(pool) => Some((pk, pool)),
                Err(e) => {
                    debug!(pool = %pk, error = %e, "skipping unparsable pool account");
                    None
                }
            })
            .collect())
    }
}

/// Jupiter token API (`GET {base}/v1/pools?assetIds=<mint>`).
pub struct JupiterTokenClient {
    client:   Client,
    base_url: String,
}

#[derive(Deserialize)]
struct JupiterPoolsResponse {
    #[serde(default)]
    pools: Vec<JupiterPool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JupiterPool {
    base_asset: Option<TokenMetadata>,
}

impl JupiterTokenClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: Client::new(), base_url: base_url.into() }
    }
}

impl Default for JupiterTokenClient {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_API_URL)
    }
}

#[async_trait]
impl TokenMetadataSource for JupiterTokenClient {
    async fn token_metadata(&self, mint: &Pubkey) -> Result<Option<TokenMetadata>> {
        let url = format!("{}/v1/pools", self.base_url.trim_end_matches('/'));
        let response: JupiterPoolsResponse = self
            .client
            .get(url)
            .query(&[("assetIds", mint.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.pools.into_iter().next().and_then(|p| p.base_asset))
    }
}

// ─── Reader ───────────────────────────────────────────────────────────────────

pub struct PoolDirectoryReader {
    pools:    Arc<dyn PoolSource>,
    metadata: Arc<dyn TokenMetadataSource>,
}

impl PoolDirectoryReader {
    pub fn new(pools: Arc<dyn PoolSource>, metadata: Arc<dyn TokenMetadataSource>) -> Self {
        Self { pools, metadata }
    }

    /// All pools created by `creator`, in source order, each enriched with
    /// token metadata where available.
    pub async fn list_pools_by_creator(&self, creator: &str) -> Result<CreatorPools> {
        let creator = creator.trim();
        let creator_key =
            Pubkey::from_str(creator).map_err(|_| Error::InvalidAddress(creator.to_string()))?;

        let pools = self.pools.pools_by_creator(&creator_key).await?;
        debug!(creator = %creator_key, count = pools.len(), "pools fetched");

        let enriched = join_all(pools.into_iter().map(|(public_key, account)| async move {
            let token_info = self.enrich(&account.base_mint).await;
            PoolEntry { public_key, token_info, account }
        }))
        .await;

        Ok(CreatorPools {
            success:    true,
            creator:    creator.to_string(),
            pool_count: enriched.len(),
            pools:      enriched,
        })
    }

    async fn enrich(&self, mint: &Pubkey) -> Option<TokenMetadata> {
        match self.metadata.token_metadata(mint).await {
            Ok(info) => info,
            Err(e) => {
                let e = Error::MetadataEnrichment { mint: mint.to_string(), reason: e.to_string() };
                warn!(error = %e, "continuing without token info");
                None
            }
        }
    }
}
