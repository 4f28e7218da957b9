//! Service configuration, read from the environment (and `.env` via
//! `dotenvy` in the binary).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use curve_launch_sdk::directory::DEFAULT_TOKEN_API_URL;
use curve_launch_sdk::state::DBC_PROGRAM_ID;
use solana_sdk::pubkey::Pubkey;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Enable permissive CORS
    pub cors_enabled: bool,

    /// Solana JSON-RPC endpoint for pool listings
    pub rpc_url: String,
    /// Asset-upload collaborator
    pub upload_url: String,
    /// Broadcast collaborator
    pub broadcast_url: String,
    /// Token registry used to enrich pool listings
    pub token_api_url: String,
    pub dbc_program_id: Pubkey,

    pub keypairs_dir: PathBuf,
    pub used_keypairs_dir: PathBuf,
    pub claims_dir: PathBuf,

    /// Lifetime of a credential claim
    pub claim_ttl: Duration,
    /// Time a user has to sign a prepared transaction
    pub pending_ttl: Duration,
    /// How often expired pending creations and claims are swept
    pub sweep_interval: Duration,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| {
            get(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow!("Missing required environment variable: {key}"))
        };
        let secs = |key: &str, default: u64| {
            Duration::from_secs(get(key).and_then(|s| s.parse().ok()).unwrap_or(default))
        };
        let dir = |key: &str, default: &str| PathBuf::from(get(key).unwrap_or_else(|| default.into()));

        let dbc_program_id = get("DBC_PROGRAM_ID").unwrap_or_else(|| DBC_PROGRAM_ID.to_string());
        let dbc_program_id = Pubkey::from_str(&dbc_program_id)
            .with_context(|| format!("DBC_PROGRAM_ID is not a valid public key: {dbc_program_id}"))?;

        let config = Self {
            host: get("API_HOST").unwrap_or_else(default_host),
            port: get("API_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_port),
            cors_enabled: get("API_CORS_ENABLED")
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),

            rpc_url: required("RPC_URL")?,
            upload_url: required("UPLOAD_URL")?,
            broadcast_url: required("BROADCAST_URL")?,
            token_api_url: get("TOKEN_API_URL").unwrap_or_else(|| DEFAULT_TOKEN_API_URL.into()),
            dbc_program_id,

            keypairs_dir: dir("KEYPAIRS_DIR", "keypairs"),
            used_keypairs_dir: dir("USED_KEYPAIRS_DIR", "used_keypairs"),
            claims_dir: dir("CLAIMS_DIR", "claims"),

            claim_ttl: secs("CLAIM_TTL_SECS", 600),
            pending_ttl: secs("PENDING_TTL_SECS", 300),
            sweep_interval: secs("SWEEP_INTERVAL_SECS", 30),
        };

        // A claim must outlive the pending creation holding it, or the
        // credential is recycled while the user is still signing.
        if config.claim_ttl <= config.pending_ttl {
            bail!(
                "CLAIM_TTL_SECS ({}) must be greater than PENDING_TTL_SECS ({})",
                config.claim_ttl.as_secs(),
                config.pending_ttl.as_secs()
            );
        }
        if config.sweep_interval.is_zero() {
            bail!("SWEEP_INTERVAL_SECS must be at least 1");
        }
        Ok(config)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
