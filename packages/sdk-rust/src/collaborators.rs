//! External collaborators of the orchestrator: asset upload, broadcast and
//! the user's wallet. Each is a trait so the orchestrator can be driven by
//! HTTP services, a direct RPC connection, a local keypair, or test fakes.

use std::str::FromStr;

use async_trait::async_trait;
use reqwest::{Client, Response};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};

use crate::error::{Error, Result};
use crate::transaction::{decode_base64, encode_base64};
use crate::types::{
    BroadcastReceipt, BroadcastRequest, BroadcastResponse, ErrorPayload, UploadRequest,
    UploadResponse,
};

// ─── Traits ───────────────────────────────────────────────────────────────────

/// Uploads token metadata + image and returns the unsigned pool transaction.
#[async_trait]
pub trait AssetUploader: Send + Sync {
    async fn upload(&self, request: &UploadRequest) -> Result<Transaction>;
}

/// Submits a fully signed transaction to the network.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn submit(&self, tx: &Transaction) -> Result<BroadcastReceipt>;
}

/// The requesting user's wallet.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    /// Add the wallet's signature. Returning [`Error::UserRejected`] means the
    /// user declined.
    async fn sign_transaction(&self, tx: Transaction) -> Result<Transaction>;
}

// ─── HTTP upload ──────────────────────────────────────────────────────────────

/// Upload collaborator reached over HTTP (`POST <url>` with an
/// [`UploadRequest`] body).
pub struct HttpAssetUploader {
    client: Client,
    url:    String,
}

impl HttpAssetUploader {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), url)
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl AssetUploader for HttpAssetUploader {
    async fn upload(&self, request: &UploadRequest) -> Result<Transaction> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Upload(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Upload(remote_error(response).await));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| Error::Upload(format!("malformed upload response: {e}")))?;
        decode_base64(&body.unsigned_transaction_base64)
    }
}

// ─── HTTP broadcast ───────────────────────────────────────────────────────────

/// Broadcast collaborator reached over HTTP (`POST <url>` with a
/// [`BroadcastRequest`] body).
pub struct HttpBroadcaster {
    client: Client,
    url:    String,
}

impl HttpBroadcaster {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), url)
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

#[async_trait]
impl Broadcaster for HttpBroadcaster {
    async fn submit(&self, tx: &Transaction) -> Result<BroadcastReceipt> {
        let body = BroadcastRequest { signed_transaction_base64: encode_base64(tx)? };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Broadcast(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Broadcast(remote_error(response).await));
        }

        let body: BroadcastResponse = response
            .json()
            .await
            .map_err(|e| Error::Broadcast(format!("malformed broadcast response: {e}")))?;
        if !body.success {
            let reason = body
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| "broadcast service reported failure".into());
            return Err(Error::Broadcast(reason));
        }

        // The first signature is the transaction id; prefer the service's
        // echo when it sends one.
        let signature = body
            .signature
            .as_deref()
            .and_then(|s| Signature::from_str(s).ok())
            .unwrap_or_else(|| tx.signatures[0]);
        Ok(BroadcastReceipt { signature })
    }
}

// ─── Direct RPC broadcast ─────────────────────────────────────────────────────

/// Sends straight to a Solana JSON-RPC node and waits for confirmation.
pub struct RpcBroadcaster {
    rpc_url: String,
}

impl RpcBroadcaster {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self { rpc_url: rpc_url.into() }
    }

    fn rpc(&self) -> RpcClient {
        RpcClient::new_with_commitment(self.rpc_url.clone(), CommitmentConfig::confirmed())
    }
}

#[async_trait]
impl Broadcaster for RpcBroadcaster {
    async fn submit(&self, tx: &Transaction) -> Result<BroadcastReceipt> {
        let signature = self
            .rpc()
            .send_and_confirm_transaction(tx)
            .await
            .map_err(|e| Error::Broadcast(e.to_string()))?;
        Ok(BroadcastReceipt { signature })
    }
}

// ─── Local keypair wallet ─────────────────────────────────────────────────────

/// Wallet backed by a local keypair (CLI use).
pub struct KeypairWallet {
    keypair: Keypair,
}

impl KeypairWallet {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }
}

#[async_trait]
impl WalletSigner for KeypairWallet {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign_transaction(&self, mut tx: Transaction) -> Result<Transaction> {
        let blockhash = tx.message.recent_blockhash;
        tx.try_partial_sign(&[&self.keypair], blockhash)
            .map_err(|e| Error::UserRejected(e.to_string()))?;
        Ok(tx)
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Pull the `error` field out of a failed collaborator response, falling
/// back to the status line.
async fn remote_error(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorPayload>(&text) {
        Ok(payload) => payload.error,
        Err(_) if text.trim().is_empty() => format!("HTTP {status}"),
        Err(_) => format!("HTTP {status}: {}", text.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{co_sign, tests::unsigned_pool_tx, valid_signature};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer exactly one HTTP request with `status` and a JSON `body`.
    async fn one_shot_server(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
                    let length = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}/")
    }

    fn upload_request() -> UploadRequest {
        UploadRequest {
            logo_base64:   "data:image/png;base64,AA==".into(),
            mint_identity: Pubkey::new_unique().to_string(),
            token_name:    "Virtual Coin".into(),
            token_symbol:  "VIRT".into(),
            user_wallet:   Pubkey::new_unique().to_string(),
            website:       None,
            twitter:       None,
        }
    }

    fn signed_tx() -> Transaction {
        let user = Keypair::new();
        let mint = Keypair::new();
        let mut tx = unsigned_pool_tx(&user.pubkey(), &mint.pubkey());
        let blockhash = tx.message.recent_blockhash;
        tx.try_partial_sign(&[&user, &mint], blockhash).unwrap();
        tx
    }

    #[tokio::test]
    async fn keypair_wallet_adds_second_signature() {
        let user = Keypair::new();
        let mint = Keypair::new();
        let mut tx = unsigned_pool_tx(&user.pubkey(), &mint.pubkey());
        co_sign(&mut tx, &mint, &user.pubkey()).unwrap();

        let wallet = KeypairWallet::new(user.insecure_clone());
        assert_eq!(wallet.pubkey(), user.pubkey());

        let signed = wallet.sign_transaction(tx).await.unwrap();
        assert!(valid_signature(&signed, &mint.pubkey()).is_some());
        assert!(valid_signature(&signed, &user.pubkey()).is_some());
        signed.verify().unwrap();
    }

    #[tokio::test]
    async fn wallet_outside_signer_set_rejects() {
        let user = Keypair::new();
        let mint = Keypair::new();
        let tx = unsigned_pool_tx(&user.pubkey(), &mint.pubkey());

        let wallet = KeypairWallet::new(Keypair::new());
        let err = wallet.sign_transaction(tx).await.unwrap_err();
        assert!(matches!(err, Error::UserRejected(_)));
    }

    #[tokio::test]
    async fn unreachable_upload_service_is_upload_error() {
        let uploader = HttpAssetUploader::new("http://127.0.0.1:9/upload");
        assert!(matches!(uploader.upload(&upload_request()).await, Err(Error::Upload(_))));
    }

    #[tokio::test]
    async fn upload_rejection_reason_is_verbatim() {
        let url = one_shot_server("400 Bad Request", r#"{"error":"Token symbol already taken"}"#).await;
        match HttpAssetUploader::new(url).upload(&upload_request()).await {
            Err(Error::Upload(reason)) => assert_eq!(reason, "Token symbol already taken"),
            other => panic!("expected upload error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn upload_error_without_payload_reports_status() {
        let url = one_shot_server("503 Service Unavailable", "").await;
        match HttpAssetUploader::new(url).upload(&upload_request()).await {
            Err(Error::Upload(reason)) => assert!(reason.starts_with("HTTP 503"), "{reason}"),
            other => panic!("expected upload error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_http_error_reason_is_verbatim() {
        let url = one_shot_server("500 Internal Server Error", r#"{"error":"Blockhash not found"}"#).await;
        match HttpBroadcaster::new(url).submit(&signed_tx()).await {
            Err(Error::Broadcast(reason)) => assert_eq!(reason, "Blockhash not found"),
            other => panic!("expected broadcast error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_reported_failure_keeps_remote_reason() {
        let url = one_shot_server(
            "200 OK",
            r#"{"success":false,"error":"Attempt to debit an account but found no record of a prior credit."}"#,
        )
        .await;
        match HttpBroadcaster::new(url).submit(&signed_tx()).await {
            Err(Error::Broadcast(reason)) => {
                assert_eq!(reason, "Attempt to debit an account but found no record of a prior credit.")
            }
            other => panic!("expected broadcast error, got {other:?}"),
        }

        let url = one_shot_server("200 OK", r#"{"success":false}"#).await;
        match HttpBroadcaster::new(url).submit(&signed_tx()).await {
            Err(Error::Broadcast(reason)) => assert_eq!(reason, "broadcast service reported failure"),
            other => panic!("expected broadcast error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_success_falls_back_to_first_signature() {
        let tx = signed_tx();
        let url = one_shot_server("200 OK", r#"{"success":true}"#).await;
        let receipt = HttpBroadcaster::new(url).submit(&tx).await.unwrap();
        assert_eq!(receipt.signature, tx.signatures[0]);
    }
}
