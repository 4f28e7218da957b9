use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use curve_launch_sdk::{
    directory::DEFAULT_TOKEN_API_URL,
    state::DBC_PROGRAM_ID,
    vanity::{self, VanityTarget},
    Broadcaster, CredentialReservations, CredentialStore, HttpAssetUploader, HttpBroadcaster,
    JupiterTokenClient, KeypairWallet, LogoAsset, PoolCreationOrchestrator, PoolCreationRequest,
    PoolDirectoryReader, RpcBroadcaster, RpcPoolSource,
};
use serde_json::json;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair, Signer},
};
use tracing_subscriber::EnvFilter;

/// Expand `~/` to `$HOME/` in keypair paths.
fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        format!("{}/{rest}", std::env::var("HOME").unwrap_or_default())
    } else {
        path.to_string()
    }
}

fn load_keypair(path: &str) -> Result<Keypair> {
    let expanded = expand_home(path);
    read_keypair_file(&expanded)
        .map_err(|e| anyhow!(
            "Cannot load keypair from '{}': {}\n  \
             Set CURVE_KEYPAIR or pass --keypair to specify a different path.",
            expanded, e
        ))
}

/// Read a logo file. Content type comes from magic bytes, falling back to
/// the file extension.
fn load_logo(path: &Path) -> Result<LogoAsset> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Cannot read logo file '{}'", path.display()))?;
    let mut logo = LogoAsset::from_bytes(bytes);
    if logo.content_type == "application/octet-stream" {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
        logo.content_type = match ext.as_str() {
            "png"          => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif"          => "image/gif",
            "webp"         => "image/webp",
            "svg"          => "image/svg+xml",
            _ => return Err(anyhow!(
                "'{}' does not look like an image (png, jpeg, gif, webp or svg).",
                path.display()
            )),
        }
        .to_string();
    }
    Ok(logo)
}

fn short(addr: &str) -> String {
    if addr.len() <= 12 {
        return addr.to_string();
    }
    format!("{}…{}", &addr[..4], &addr[addr.len() - 4..])
}

fn print_banner() {
    let ver = env!("CARGO_PKG_VERSION");
    println!();
    println!("  Curve Launch  v{ver}  ·  bonding-curve token launches on Solana");
    println!("  {}", "─".repeat(62));
    println!("  Program   {DBC_PROGRAM_ID}");
    println!("  Network   Solana mainnet-beta");
    println!("  Signing   co-signer keypair first, then your wallet");
    println!();
}

// ─── CLI definition ───────────────────────────────────────────────────────────

/// Curve Launch: launch bonding-curve token pools on Solana.
///
/// Every command supports --json for machine-readable output.
#[derive(Parser)]
#[command(
    name        = "curve-launch",
    version     = env!("CARGO_PKG_VERSION"),
    long_version = concat!(
        env!("CARGO_PKG_VERSION"), "\n",
        "Program:  dbcij3LWUppWqq96dh6gJWwBifmcGfLSB5D4DuSMaqN\n",
        "Network:  Solana mainnet-beta\n",
        "License:  MIT",
    ),
    about   = "Launch bonding-curve token pools and manage single-use co-signer keypairs.",
    after_help = "\
ENVIRONMENT:
  CURVE_RPC_URL      Solana JSON-RPC endpoint  [default: https://api.mainnet-beta.solana.com]
  CURVE_KEYPAIR      Path to your wallet keypair JSON  [default: ~/.config/solana/id.json]
  KEYPAIRS_DIR       Available co-signer keypairs  [default: keypairs]
  USED_KEYPAIRS_DIR  Consumed co-signer keypairs  [default: used_keypairs]
  CLAIMS_DIR         Claim records  [default: claims]
  RUST_LOG           Log filter (logs go to stderr)  [default: warn]

QUICK START:
  curve-launch credentials grind --suffix chan --count 5
  curve-launch create-pool --name \"Virtual Coin\" --symbol VIRT --logo ./logo.png \\
                           --upload-url https://launch.example/api/upload
  curve-launch pools
  curve-launch credentials list"
)]
struct Cli {
    /// Solana JSON-RPC endpoint
    #[arg(
        long,
        global     = true,
        value_name = "URL",
        default_value = "https://api.mainnet-beta.solana.com",
        env = "CURVE_RPC_URL"
    )]
    rpc_url: String,

    /// Path to your wallet keypair JSON file (pays for and signs second)
    #[arg(
        long,
        global     = true,
        value_name = "PATH",
        default_value = "~/.config/solana/id.json",
        env = "CURVE_KEYPAIR"
    )]
    keypair: String,

    /// Directory of available co-signer keypairs
    #[arg(long, global = true, value_name = "DIR", default_value = "keypairs", env = "KEYPAIRS_DIR")]
    keypairs_dir: PathBuf,

    /// Directory of consumed co-signer keypairs
    #[arg(long, global = true, value_name = "DIR", default_value = "used_keypairs", env = "USED_KEYPAIRS_DIR")]
    used_keypairs_dir: PathBuf,

    /// Directory of claim records
    #[arg(long, global = true, value_name = "DIR", default_value = "claims", env = "CLAIMS_DIR")]
    claims_dir: PathBuf,

    /// Output machine-readable JSON instead of human-readable text
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new bonding-curve pool for a fresh token
    ///
    /// A co-signer keypair from the available pool becomes the token mint
    /// and signs first; your wallet signs second. The keypair is moved to
    /// the consumed pool once the transaction lands.
    #[command(
        after_help = "\
EXAMPLES:
  # Launch with the default RPC broadcaster
  curve-launch create-pool --name \"Virtual Coin\" --symbol VIRT --logo ./logo.png \\
    --upload-url https://launch.example/api/upload

  # With socials and an HTTP broadcast service
  curve-launch create-pool --name \"Virtual Coin\" --symbol VIRT --logo ./logo.png \\
    --website https://virtual.example --twitter https://x.com/virtual \\
    --upload-url https://launch.example/api/upload \\
    --broadcast-url https://launch.example/api/send-transaction

NOTES:
  Name needs at least 3 characters; symbol 1–10. Empty --website / --twitter
  are ignored. On any failure before broadcast the keypair stays available."
    )]
    CreatePool {
        /// Token name
        #[arg(long, value_name = "NAME")]
        name: String,

        /// Token symbol (ticker)
        #[arg(long, value_name = "SYMBOL")]
        symbol: String,

        /// Path to the token image (png, jpeg, gif, webp, svg)
        #[arg(long, value_name = "PATH")]
        logo: PathBuf,

        /// Project website
        #[arg(long, value_name = "URL")]
        website: Option<String>,

        /// Project Twitter / X profile
        #[arg(long, value_name = "URL")]
        twitter: Option<String>,

        /// Asset-upload service that returns the unsigned pool transaction
        #[arg(long, value_name = "URL", env = "UPLOAD_URL")]
        upload_url: String,

        /// Broadcast service; when absent the transaction is sent over --rpc-url
        #[arg(long, value_name = "URL", env = "BROADCAST_URL")]
        broadcast_url: Option<String>,
    },

    /// List bonding-curve pools created by a wallet
    #[command(
        after_help = "\
EXAMPLES:
  # Pools created by your own wallet (--keypair)
  curve-launch pools

  # Any creator, as JSON
  curve-launch pools --creator <PUBKEY> --json"
    )]
    Pools {
        /// Creator address; defaults to the --keypair wallet
        #[arg(long, value_name = "PUBKEY")]
        creator: Option<String>,

        /// Token registry used for names and symbols
        #[arg(long, value_name = "URL", default_value = DEFAULT_TOKEN_API_URL, env = "TOKEN_API_URL")]
        token_api_url: String,

        /// Bonding-curve program to query
        #[arg(long, value_name = "PUBKEY", default_value = DBC_PROGRAM_ID, env = "DBC_PROGRAM_ID")]
        program_id: String,
    },

    /// Manage the co-signer keypair pools
    #[command(subcommand)]
    Credentials(CredentialCommands),
}

#[derive(Subcommand)]
enum CredentialCommands {
    /// Show available and consumed keypairs
    List,

    /// Pick a random available keypair (does not move it)
    Select {
        /// Include the 64-byte secret in the output
        #[arg(long, default_value_t = false)]
        reveal: bool,
    },

    /// Move a keypair from the available to the consumed pool
    Retire {
        /// Keypair file name, e.g. <PUBKEY>.json
        identifier: String,
    },

    /// Generate vanity keypairs into the available pool
    #[command(
        after_help = "\
EXAMPLES:
  # Five mints ending in \"chan\"
  curve-launch credentials grind --suffix chan --count 5

  # Case-insensitive, 4 threads, give up after 50M attempts each
  curve-launch credentials grind --suffix pump --case-insensitive --threads 4 --max-attempts 50000000

NOTES:
  Each extra suffix character multiplies the expected work by 58
  (about 29 when case-insensitive)."
    )]
    Grind {
        /// Base58 suffix the address must end with
        #[arg(long, value_name = "SUFFIX")]
        suffix: String,

        /// Ignore case when matching the suffix
        #[arg(long, default_value_t = false)]
        case_insensitive: bool,

        /// How many keypairs to generate
        #[arg(long, value_name = "N", default_value_t = 1)]
        count: usize,

        /// Worker threads (0 = all cores)
        #[arg(long, value_name = "N", default_value_t = 0)]
        threads: usize,

        /// Give up on a keypair after this many attempts
        #[arg(long, value_name = "N")]
        max_attempts: Option<u64>,
    },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // When invoked with no arguments, show banner + full help and exit cleanly.
    if std::env::args().len() == 1 {
        print_banner();
        Cli::command().print_long_help().ok();
        println!();
        return Ok(());
    }

    let cli = Cli::parse();

    // Logs go to stderr so --json output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let store = CredentialStore::new(&cli.keypairs_dir, &cli.used_keypairs_dir);

    match &cli.command {
        Commands::CreatePool { name, symbol, logo, website, twitter, upload_url, broadcast_url } => {
            let request = PoolCreationRequest {
                token_name:   name.clone(),
                token_symbol: symbol.clone(),
                logo:         Some(load_logo(logo)?),
                website:      website.clone(),
                twitter:      twitter.clone(),
            };
            cmd_create_pool(&cli, store, &request, upload_url, broadcast_url.as_deref()).await?;
        }
        Commands::Pools { creator, token_api_url, program_id } => {
            cmd_pools(&cli, creator.as_deref(), token_api_url, program_id).await?;
        }
        Commands::Credentials(CredentialCommands::List) => {
            cmd_credentials_list(&store, cli.json)?;
        }
        Commands::Credentials(CredentialCommands::Select { reveal }) => {
            cmd_credentials_select(&store, *reveal, cli.json)?;
        }
        Commands::Credentials(CredentialCommands::Retire { identifier }) => {
            cmd_credentials_retire(&store, identifier, cli.json)?;
        }
        Commands::Credentials(CredentialCommands::Grind {
            suffix, case_insensitive, count, threads, max_attempts,
        }) => {
            cmd_credentials_grind(
                &store,
                suffix, *case_insensitive, *count, *threads, *max_attempts,
                cli.json,
            )?;
        }
    }

    Ok(())
}

// ─── create-pool ─────────────────────────────────────────────────────────────

async fn cmd_create_pool(
    cli:           &Cli,
    store:         CredentialStore,
    request:       &PoolCreationRequest,
    upload_url:    &str,
    broadcast_url: Option<&str>,
) -> Result<()> {
    let wallet = KeypairWallet::new(load_keypair(&cli.keypair)?);

    let broadcaster: Arc<dyn Broadcaster> = match broadcast_url {
        Some(url) => Arc::new(HttpBroadcaster::new(url)),
        None      => Arc::new(RpcBroadcaster::new(&cli.rpc_url)),
    };
    let orchestrator = PoolCreationOrchestrator::new(
        Arc::new(CredentialReservations::new(store, &cli.claims_dir)),
        Arc::new(HttpAssetUploader::new(upload_url)),
        broadcaster,
    );

    let outcome = orchestrator
        .run(request, Some(&wallet))
        .await
        .context("Pool creation failed")?;

    if cli.json {
        println!("{}", json!({
            "status":        "ok",
            "command":       "create-pool",
            "request_id":    outcome.request_id,
            "mint":          outcome.mint.to_string(),
            "tx":            outcome.signature.to_string(),
            "signing_order": outcome.signing_order.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
            "retired":       outcome.retired,
            "stage":         outcome.stage,
        }));
    } else {
        println!("─── Pool Created ─────────────────────────────────────────────────");
        println!("  Token            {}  ({})", request.token_name.trim(), request.token_symbol.trim());
        println!("  Mint             {}", outcome.mint);
        println!("  Signed by        {}  →  {}", outcome.signing_order[0], outcome.signing_order[1]);
        println!("  Transaction      {}", outcome.signature);
        if !outcome.retired {
            println!();
            println!("  Warning: the co-signer keypair could not be moved to the consumed pool.");
            println!("  Run `curve-launch credentials retire {}.json` once the issue is fixed.", outcome.mint);
        }
    }
    Ok(())
}

// ─── pools ────────────────────────────────────────────────────────────────────

async fn cmd_pools(
    cli:           &Cli,
    creator:       Option<&str>,
    token_api_url: &str,
    program_id:    &str,
) -> Result<()> {
    let creator = match creator {
        Some(c) => c.to_string(),
        None    => load_keypair(&cli.keypair)?.pubkey().to_string(),
    };
    let program_id = Pubkey::from_str(program_id)
        .map_err(|_| anyhow!("--program-id '{program_id}' is not a base-58 public key."))?;

    let reader = PoolDirectoryReader::new(
        Arc::new(RpcPoolSource::new(&cli.rpc_url).with_program_id(program_id)),
        Arc::new(JupiterTokenClient::new(token_api_url)),
    );
    let listing = reader
        .list_pools_by_creator(&creator)
        .await
        .with_context(|| format!("Failed to list pools for {creator}"))?;

    if cli.json {
        println!("{}", serde_json::to_string(&listing)?);
        return Ok(());
    }

    println!("─── Pools by Creator ─────────────────────────────────────────────");
    println!("  Creator   {}", listing.creator);
    println!();
    if listing.pools.is_empty() {
        println!("  No pools found.");
        println!("  Run `curve-launch create-pool --help` to launch one.");
        return Ok(());
    }
    for (i, pool) in listing.pools.iter().enumerate() {
        let mint = pool.account.base_mint.to_string();
        let (name, symbol) = match &pool.token_info {
            Some(info) => (info.name.clone(), info.symbol.clone()),
            None       => ("Unknown Token".to_string(), short(&mint)),
        };
        println!("  [{i:>2}]  {name}  ({symbol})");
        println!("        Pool       {}", pool.public_key);
        println!("        Mint       {mint}");
        println!("        Reserves   {} base  /  {} quote", pool.account.base_reserve, pool.account.quote_reserve);
        println!("        Migrated   {}", if pool.account.is_migrated != 0 { "yes" } else { "no" });
        if let Some(site) = pool.token_info.as_ref().and_then(|t| t.website.as_deref()) {
            println!("        Website    {site}");
        }
        println!();
    }
    println!("  Total: {} pool(s)", listing.pool_count);
    Ok(())
}

// ─── credentials ──────────────────────────────────────────────────────────────

fn cmd_credentials_list(store: &CredentialStore, json_output: bool) -> Result<()> {
    let available = store.list_available().context("Cannot list available keypairs")?;
    let consumed = store.list_consumed().context("Cannot list consumed keypairs")?;

    if json_output {
        println!("{}", json!({
            "status":    "ok",
            "command":   "credentials list",
            "available": available.iter().map(|h| &h.identifier).collect::<Vec<_>>(),
            "consumed":  consumed.iter().map(|h| &h.identifier).collect::<Vec<_>>(),
        }));
    } else {
        println!("─── Co-signer Keypairs ───────────────────────────────────────────");
        println!("  Available ({})   {}", available.len(), store.available_dir().display());
        for handle in &available {
            println!("    {}", handle.identifier);
        }
        println!();
        println!("  Consumed  ({})   {}", consumed.len(), store.consumed_dir().display());
        for handle in &consumed {
            println!("    {}", handle.identifier);
        }
        if available.is_empty() {
            println!();
            println!("  No keypairs available. Run `curve-launch credentials grind --suffix <S>`.");
        }
    }
    Ok(())
}

fn cmd_credentials_select(store: &CredentialStore, reveal: bool, json_output: bool) -> Result<()> {
    let handle = store.select_random().context("Cannot select a keypair")?;
    let credential = store.load(&handle)?;

    if json_output {
        let mut out = json!({
            "status":     "ok",
            "command":    "credentials select",
            "identifier": credential.identifier,
            "pubkey":     credential.pubkey().to_string(),
        });
        if reveal {
            out["secret"] = json!(credential.secret_bytes().to_vec());
        }
        println!("{out}");
    } else {
        println!("─── Selected Keypair ─────────────────────────────────────────────");
        println!("  Identifier   {}", credential.identifier);
        println!("  Public key   {}", credential.pubkey());
        if reveal {
            println!("  Secret       {:?}", credential.secret_bytes().to_vec());
        }
        println!();
        println!("  Still available. Selection does not reserve or consume it.");
    }
    Ok(())
}

fn cmd_credentials_retire(store: &CredentialStore, identifier: &str, json_output: bool) -> Result<()> {
    store
        .consume(identifier)
        .with_context(|| format!("Cannot retire '{identifier}'"))?;

    if json_output {
        println!("{}", json!({
            "status":     "ok",
            "command":    "credentials retire",
            "identifier": identifier,
        }));
    } else {
        println!("  Moved {identifier} to {}", store.consumed_dir().display());
    }
    Ok(())
}

fn cmd_credentials_grind(
    store:            &CredentialStore,
    suffix:           &str,
    case_insensitive: bool,
    count:            usize,
    threads:          usize,
    max_attempts:     Option<u64>,
    json_output:      bool,
) -> Result<()> {
    let target = VanityTarget::new(suffix, case_insensitive)?;
    if !json_output {
        println!("  Grinding {count} keypair(s) ending in \"{}\"…", target.suffix());
    }

    let handles = vanity::grind_into(store, &target, count, threads, max_attempts)
        .context("Vanity grinding failed")?;

    if json_output {
        println!("{}", json!({
            "status":      "ok",
            "command":     "credentials grind",
            "suffix":      target.suffix(),
            "requested":   count,
            "provisioned": handles.iter().map(|h| &h.identifier).collect::<Vec<_>>(),
        }));
    } else {
        println!("─── Vanity Keypairs ──────────────────────────────────────────────");
        for handle in &handles {
            println!("    {}", handle.identifier);
        }
        println!();
        println!("  Provisioned {} of {count} into {}", handles.len(), store.available_dir().display());
        if handles.len() < count {
            println!("  Stopped early: --max-attempts reached.");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_grind_and_globals() {
        let cli = Cli::try_parse_from([
            "curve-launch", "--json", "--keypairs-dir", "/tmp/kp",
            "credentials", "grind", "--suffix", "chan", "--count", "3",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.keypairs_dir, PathBuf::from("/tmp/kp"));
        match cli.command {
            Commands::Credentials(CredentialCommands::Grind { suffix, count, case_insensitive, .. }) => {
                assert_eq!(suffix, "chan");
                assert_eq!(count, 3);
                assert!(!case_insensitive);
            }
            _ => panic!("expected grind"),
        }
    }

    #[test]
    fn logo_type_falls_back_to_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let svg = dir.join("logo.svg");
        std::fs::write(&svg, b"<?xml version=\"1.0\"?>\n<svg xmlns=\"http://www.w3.org/2000/svg\"/>").unwrap();
        assert_eq!(load_logo(&svg).unwrap().content_type, "image/svg+xml");

        let png = dir.join("logo.png");
        std::fs::write(&png, [0u8, 1, 2, 3]).unwrap();
        assert_eq!(load_logo(&png).unwrap().content_type, "image/png");

        let txt = dir.join("notes.txt");
        std::fs::write(&txt, b"hello").unwrap();
        assert!(load_logo(&txt).is_err());
    }

    #[test]
    fn retire_moves_keypair_to_consumed_pool() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(tmp.path().join("keypairs"), tmp.path().join("used_keypairs"));
        std::fs::create_dir_all(store.available_dir()).unwrap();
        let handle = store.provision(&Keypair::new()).unwrap();

        cmd_credentials_retire(&store, &handle.identifier, true).unwrap();
        assert!(store.is_consumed(&handle.identifier));
        assert!(cmd_credentials_retire(&store, &handle.identifier, true).is_err());
    }

    #[test]
    fn shortens_addresses() {
        assert_eq!(short("So11111111111111111111111111111111111111112"), "So11…1112");
        assert_eq!(short("abc"), "abc");
    }
}
