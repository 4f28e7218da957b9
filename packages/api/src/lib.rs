// Curve Launch JSON API
//
// Co-signer keypair custody, two-phase pool creation and creator pool
// listings for a bonding-curve launchpad.
//
// ── 1. Run locally ────────────────────────────────────────────────────────────
//   export RPC_URL=https://api.mainnet-beta.solana.com
//   export UPLOAD_URL=http://localhost:3001/api/upload
//   export BROADCAST_URL=http://localhost:3001/api/send-transaction
//   cargo run -p curve-launch-api
//   # Starts at http://0.0.0.0:3000 (API_HOST / API_PORT to change).
//
// ── 2. Test all endpoints ─────────────────────────────────────────────────────
//   export BASE=http://localhost:3000
//
//   # Service info + endpoint catalogue
//   curl "$BASE/"
//   curl "$BASE/health"
//
//   # Raw keypair custody
//   curl "$BASE/api/credentials/select"
//   curl -X POST "$BASE/api/credentials/retire" \
//        -H 'Content-Type: application/json' -d '{"identifier":"<FILE>.json"}'
//
//   # Pools created by a wallet
//   curl "$BASE/api/pools/by-creator?creatorAddress=<WALLET_PUBKEY>"
//
//   # Two-phase pool creation: prepare, sign in the wallet, complete
//   curl -X POST "$BASE/api/pools/prepare" \
//        -H 'Content-Type: application/json' \
//        -d '{"tokenName":"Virtual Coin","tokenSymbol":"VIRT","tokenLogo":"data:image/png;base64,...","userWallet":"<WALLET_PUBKEY>"}'
//   curl -X POST "$BASE/api/pools/complete" \
//        -H 'Content-Type: application/json' \
//        -d '{"requestId":"<ID>","signedTransaction":"<BASE64>"}'
//   curl -X DELETE "$BASE/api/pools/pending/<ID>"

pub mod config;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use curve_launch_sdk::{
    transaction::decode_base64, CredentialReservations, CredentialStore, Error, HttpAssetUploader,
    HttpBroadcaster, JupiterTokenClient, LogoAsset, PendingCreations, PoolCreationOrchestrator,
    PoolCreationRequest, PoolDirectoryReader, RpcPoolSource,
};
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use config::ServiceConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SERVICE: &str = "curve-launch-api";

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub store:        CredentialStore,
    pub orchestrator: Arc<PoolCreationOrchestrator>,
    pub directory:    Arc<PoolDirectoryReader>,
}

impl AppState {
    pub fn new(
        store:        CredentialStore,
        orchestrator: Arc<PoolCreationOrchestrator>,
        directory:    Arc<PoolDirectoryReader>,
    ) -> Self {
        Self { store, orchestrator, directory }
    }

    /// Wire the HTTP collaborators and on-disk pools named in `config`.
    pub fn from_config(config: &ServiceConfig) -> Self {
        let store = CredentialStore::new(&config.keypairs_dir, &config.used_keypairs_dir);
        let reservations = CredentialReservations::new(store.clone(), &config.claims_dir)
            .with_ttl(config.claim_ttl);

        let orchestrator = PoolCreationOrchestrator::new(
            Arc::new(reservations),
            Arc::new(HttpAssetUploader::new(&config.upload_url)),
            Arc::new(HttpBroadcaster::new(&config.broadcast_url)),
        )
        .with_pending(PendingCreations::new(config.pending_ttl));

        let directory = PoolDirectoryReader::new(
            Arc::new(RpcPoolSource::new(&config.rpc_url).with_program_id(config.dbc_program_id)),
            Arc::new(JupiterTokenClient::new(&config.token_api_url)),
        );

        Self::new(store, Arc::new(orchestrator), Arc::new(directory))
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn router(state: AppState, cors_enabled: bool) -> Router {
    let cors = if cors_enabled {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/",                         get(handle_root))
        .route("/health",                   get(handle_health))
        .route("/api/credentials/select",   get(handle_select))
        .route("/api/credentials/retire",   post(handle_retire))
        .route("/api/pools/by-creator",     get(handle_pools_get).post(handle_pools_post))
        .route("/api/pools/prepare",        post(handle_prepare))
        .route("/api/pools/complete",       post(handle_complete))
        .route("/api/pools/pending/:id",    delete(handle_abandon))
        .fallback(handle_not_found)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Periodically expire pending creations and stale claims.
pub fn spawn_sweeper(
    orchestrator: Arc<PoolCreationOrchestrator>,
    every:        Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        // `interval` panics on a zero period.
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let expired = orchestrator.sweep_expired();
            if expired > 0 {
                info!(expired, "pending pool creations expired");
            }
        }
    })
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /  →  service welcome with endpoint catalogue
async fn handle_root() -> Response {
    json_ok(json!({
        "service": SERVICE,
        "version": VERSION,
        "endpoints": {
            "GET    /":                        "this response",
            "GET    /health":                  "liveness check",
            "GET    /api/credentials/select":  "random available co-signer keypair",
            "POST   /api/credentials/retire":  "move a keypair to the consumed pool  {identifier}",
            "GET    /api/pools/by-creator":    "pools created by a wallet  ?creatorAddress=BASE58",
            "POST   /api/pools/by-creator":    "same, with a JSON body  {creatorAddress}",
            "POST   /api/pools/prepare":       "co-signed pool transaction  {tokenName, tokenSymbol, tokenLogo, userWallet, website?, twitter?}",
            "POST   /api/pools/complete":      "broadcast the wallet-signed transaction  {requestId, signedTransaction}",
            "DELETE /api/pools/pending/:id":   "abandon a prepared creation",
        },
    }))
}

/// GET /health  →  liveness payload
async fn handle_health(State(state): State<AppState>) -> Response {
    json_ok(json!({
        "status":  "ok",
        "service": SERVICE,
        "version": VERSION,
        "pending": state.orchestrator.pending().len(),
    }))
}

// ── Credentials ───────────────────────────────────────────────────────────────

/// GET /api/credentials/select  →  `{ secret, identifier }`
async fn handle_select(State(state): State<AppState>) -> Result<Response, ApiError> {
    let handle = state.store.select_random()?;
    let credential = state.store.load(&handle)?;
    info!(identifier = %credential.identifier, "keypair selected");

    Ok(json_ok(json!({
        "secret":     credential.secret_bytes().to_vec(),
        "identifier": credential.identifier,
    })))
}

/// POST /api/credentials/retire  →  move to the consumed pool
async fn handle_retire(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body = match parse_body(&body) {
        Ok(v) => v,
        Err(res) => return Ok(res),
    };
    // `keypairFileName` is accepted for older clients.
    let identifier = body["identifier"]
        .as_str()
        .or_else(|| body["keypairFileName"].as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    if identifier.is_empty() {
        return Ok(json_error(StatusCode::BAD_REQUEST, "Keypair identifier is required"));
    }

    state.store.consume(&identifier)?;
    info!(%identifier, "keypair retired");
    Ok(json_ok(json!({ "success": true, "message": "Keypair moved to used_keypairs" })))
}

// ── Pools by creator ──────────────────────────────────────────────────────────

/// GET /api/pools/by-creator?creatorAddress=…
async fn handle_pools_get(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    list_pools(&state, query.get("creatorAddress").map(String::as_str)).await
}

/// POST /api/pools/by-creator  {creatorAddress}
async fn handle_pools_post(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body = match parse_body(&body) {
        Ok(v) => v,
        Err(res) => return Ok(res),
    };
    list_pools(&state, body["creatorAddress"].as_str()).await
}

async fn list_pools(state: &AppState, creator: Option<&str>) -> Result<Response, ApiError> {
    let creator = creator.map(str::trim).unwrap_or("");
    if creator.is_empty() {
        return Ok(json_error(StatusCode::BAD_REQUEST, "Missing required parameter: creatorAddress"));
    }

    info!(creator, "fetching pools by creator");
    match state.directory.list_pools_by_creator(creator).await {
        Ok(listing) => {
            info!(creator, pool_count = listing.pool_count, "pools listed");
            Ok(json_ok(json!(listing)))
        }
        Err(Error::InvalidAddress(_)) => Ok(json_error(
            StatusCode::BAD_REQUEST,
            "Invalid creator address format. Must be a valid Solana public key.",
        )),
        Err(e) => Err(ApiError::internal(e, "Internal server error while fetching pools")),
    }
}

// ── Pool creation ─────────────────────────────────────────────────────────────

/// POST /api/pools/prepare  →  co-signed transaction for the user's wallet
async fn handle_prepare(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body = match parse_body(&body) {
        Ok(v) => v,
        Err(res) => return Ok(res),
    };

    let user_wallet = body["userWallet"].as_str().unwrap_or("").trim();
    if user_wallet.is_empty() {
        return Ok(json_error(StatusCode::BAD_REQUEST, "Wallet not connected"));
    }
    let user_wallet: Pubkey = user_wallet
        .parse()
        .map_err(|_| Error::InvalidAddress(user_wallet.to_string()))?;

    let logo = match body["tokenLogo"].as_str().map(str::trim) {
        Some(l) if !l.is_empty() => Some(LogoAsset::from_data_url(l)?),
        _ => None,
    };
    let request = PoolCreationRequest {
        token_name:   body["tokenName"].as_str().unwrap_or("").to_string(),
        token_symbol: body["tokenSymbol"].as_str().unwrap_or("").to_string(),
        logo,
        website:      body["website"].as_str().map(str::to_string),
        twitter:      body["twitter"].as_str().map(str::to_string),
    };

    let pending = state
        .orchestrator
        .prepare(&request, user_wallet)
        .await
        .map_err(|e| ApiError::new(e, "Failed to prepare pool creation"))?;
    Ok(json_ok(json!(pending)))
}

/// POST /api/pools/complete  →  broadcast and retire
async fn handle_complete(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body = match parse_body(&body) {
        Ok(v) => v,
        Err(res) => return Ok(res),
    };

    let request_id = body["requestId"].as_str().unwrap_or("").trim();
    let signed = body["signedTransaction"].as_str().unwrap_or("").trim();
    if request_id.is_empty() || signed.is_empty() {
        return Ok(json_error(
            StatusCode::BAD_REQUEST,
            r#"required fields: "requestId", "signedTransaction""#,
        ));
    }

    let tx = decode_base64(signed)?;
    let outcome = state
        .orchestrator
        .complete(request_id, tx)
        .await
        .map_err(|e| ApiError::new(e, "Failed to create pool"))?;

    Ok(json_ok(json!({
        "success":   true,
        "signature": outcome.signature.to_string(),
        "mint":      outcome.mint.to_string(),
        "retired":   outcome.retired,
    })))
}

/// DELETE /api/pools/pending/:id
async fn handle_abandon(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Response, ApiError> {
    state.orchestrator.abandon(&request_id)?;
    Ok(json_ok(json!({ "success": true })))
}

/// Fallback for unknown routes
async fn handle_not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "not found")
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// SDK error plus the generic message shown when the detail is not meant
/// for the end user.
pub struct ApiError {
    error:   Error,
    generic: &'static str,
    status:  Option<StatusCode>,
}

impl ApiError {
    pub fn new(error: Error, generic: &'static str) -> Self {
        Self { error, generic, status: None }
    }

    /// Report every failure as `500` regardless of its kind.
    pub fn internal(error: Error, generic: &'static str) -> Self {
        Self { error, generic, status: Some(StatusCode::INTERNAL_SERVER_ERROR) }
    }

    fn status(&self) -> StatusCode {
        if let Some(status) = self.status {
            return status;
        }
        match &self.error {
            Error::Validation(_) | Error::InvalidAddress(_) | Error::UserRejected(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::Serialization(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NoCredentialAvailable | Error::NotFound(_) | Error::PendingNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Error::ClaimNotHeld(_) => StatusCode::CONFLICT,
            Error::Upload(_) | Error::Broadcast(_) | Error::Rpc(_) | Error::Http(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self::new(error, "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = if self.error.is_user_correctable() || status == StatusCode::NOT_FOUND {
            json!({ "success": false, "error": self.error.to_string() })
        } else {
            warn!(error = %self.error, status = status.as_u16(), "request failed");
            json!({ "success": false, "error": self.generic, "details": self.error.to_string() })
        };
        (status, Json(body)).into_response()
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn json_ok(body: Value) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "error": message }))).into_response()
}

/// JSON object body; empty bodies read as `{}`.
fn parse_body(bytes: &Bytes) -> Result<Value, Response> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(bytes).map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid JSON body"))
}
