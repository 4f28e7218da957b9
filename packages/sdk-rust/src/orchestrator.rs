//! Two-party pool creation.
//!
//! ```text
//! Validating → CredentialAcquired → Uploaded → CoSigned → UserSigned → Broadcast → Retired
//! ```
//!
//! Any failure before `Retired` aborts the run and releases the credential
//! claim, so the keypair stays in the available pool. Retirement itself is
//! best effort: the pool exists on-chain at that point, so a failed move is
//! logged and reported as `retired: false`.
//!
//! The flow runs either in one call ([`PoolCreationOrchestrator::run`], with a
//! local wallet) or split around the user's wallet
//! ([`prepare`](PoolCreationOrchestrator::prepare) then
//! [`complete`](PoolCreationOrchestrator::complete)), with the co-signed
//! state parked in [`PendingCreations`] meanwhile.

use std::sync::Arc;

use chrono::Utc;
use solana_sdk::{pubkey::Pubkey, transaction::Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::collaborators::{AssetUploader, Broadcaster, WalletSigner};
use crate::credentials::Credential;
use crate::error::{Error, Result};
use crate::pending::{PendingCreations, PendingEntry};
use crate::reservations::{Claim, CredentialReservations};
use crate::transaction::{check_user_signed, co_sign, encode_base64};
use crate::types::{CreationOutcome, CreationStage, PendingCreation, PoolCreationRequest, UploadRequest};

pub struct PoolCreationOrchestrator {
    reservations: Arc<CredentialReservations>,
    uploader:     Arc<dyn AssetUploader>,
    broadcaster:  Arc<dyn Broadcaster>,
    pending:      PendingCreations,
}

impl PoolCreationOrchestrator {
    pub fn new(
        reservations: Arc<CredentialReservations>,
        uploader:     Arc<dyn AssetUploader>,
        broadcaster:  Arc<dyn Broadcaster>,
    ) -> Self {
        Self { reservations, uploader, broadcaster, pending: PendingCreations::default() }
    }

    pub fn with_pending(mut self, pending: PendingCreations) -> Self {
        self.pending = pending;
        self
    }

    pub fn reservations(&self) -> &CredentialReservations {
        &self.reservations
    }

    pub fn pending(&self) -> &PendingCreations {
        &self.pending
    }

    // ─── One-shot flow ────────────────────────────────────────────────────────

    /// Run every stage in one call. `wallet` is the user's signer; `None`
    /// fails with [`Error::UserRejected`] before any credential is claimed.
    pub async fn run(
        &self,
        request: &PoolCreationRequest,
        wallet:  Option<&dyn WalletSigner>,
    ) -> Result<CreationOutcome> {
        let Some(wallet) = wallet else {
            // Input errors still win over the missing wallet.
            request.validate()?;
            return Err(Error::UserRejected("no wallet connected".into()));
        };

        let request_id = Uuid::new_v4().to_string();
        let entry = self.co_signed(&request_id, request, wallet.pubkey()).await?;

        let user_signed = match wallet.sign_transaction(entry.transaction.clone()).await {
            Ok(tx) => tx,
            Err(e) => {
                let e = match e {
                    Error::UserRejected(_) => e,
                    other => Error::UserRejected(other.to_string()),
                };
                return Err(self.fail(&request_id, CreationStage::CoSigned, &entry.claim, e));
            }
        };

        self.finish(entry, user_signed).await
    }

    // ─── Two-phase flow ───────────────────────────────────────────────────────

    /// Validate, claim a credential, upload and co-sign. The returned
    /// transaction still needs the user's signature.
    pub async fn prepare(
        &self,
        request:     &PoolCreationRequest,
        user_wallet: Pubkey,
    ) -> Result<PendingCreation> {
        let request_id = Uuid::new_v4().to_string();
        let entry = self.co_signed(&request_id, request, user_wallet).await?;

        let transaction = match encode_base64(&entry.transaction) {
            Ok(encoded) => encoded,
            Err(e) => return Err(self.fail(&request_id, CreationStage::CoSigned, &entry.claim, e)),
        };
        let pending = PendingCreation {
            request_id:  entry.request_id.clone(),
            mint:        entry.credential.pubkey(),
            user_wallet,
            transaction,
            expires_at:  entry.expires_at,
        };
        self.pending.insert(entry);
        Ok(pending)
    }

    /// Verify the wallet-signed transaction for a prepared request, broadcast
    /// it and retire the credential.
    pub async fn complete(&self, request_id: &str, user_signed: Transaction) -> Result<CreationOutcome> {
        let entry = self
            .pending
            .take(request_id)
            .ok_or_else(|| Error::PendingNotFound(request_id.to_string()))?;

        let now = Utc::now();
        if entry.is_expired_at(now) {
            self.release_quietly(&entry.claim);
            return Err(Error::PendingNotFound(request_id.to_string()));
        }
        info!(
            request_id,
            waited_secs = (now - entry.created_at).num_seconds(),
            "signed transaction received"
        );
        self.finish(entry, user_signed).await
    }

    /// Drop a prepared request and free its credential.
    pub fn abandon(&self, request_id: &str) -> Result<()> {
        let entry = self
            .pending
            .take(request_id)
            .ok_or_else(|| Error::PendingNotFound(request_id.to_string()))?;
        info!(request_id, mint = %entry.credential.pubkey(), "pending creation abandoned");
        self.release_quietly(&entry.claim);
        Ok(())
    }

    /// Expire stale pending requests and stale claim records. Returns how
    /// many pending requests were expired.
    pub fn sweep_expired(&self) -> usize {
        let expired = self.pending.remove_expired();
        for entry in &expired {
            self.release_quietly(&entry.claim);
        }
        if let Err(e) = self.reservations.recycle_expired() {
            warn!(error = %e, "claim recycling failed");
        }
        expired.len()
    }

    // ─── Stages ───────────────────────────────────────────────────────────────

    /// Stages up to `CoSigned`. On error the claim, if any, is already released.
    async fn co_signed(
        &self,
        request_id:  &str,
        request:     &PoolCreationRequest,
        user_wallet: Pubkey,
    ) -> Result<PendingEntry> {
        info!(request_id, stage = ?CreationStage::Validating, "pool creation started");
        if let Err(e) = request.validate() {
            warn!(request_id, stage = ?CreationStage::Validating, error = %e, "pool creation failed");
            return Err(e);
        }

        let (claim, credential) = match self.reservations.claim_any(request_id) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(request_id, stage = ?CreationStage::Validating, error = %e, "pool creation failed");
                return Err(e);
            }
        };
        info!(
            request_id,
            stage = ?CreationStage::CredentialAcquired,
            mint = %credential.pubkey(),
            "credential acquired"
        );

        let upload = upload_request(request, &credential, &user_wallet);
        let mut tx = match self.uploader.upload(&upload).await {
            Ok(tx) => tx,
            Err(e) => return Err(self.fail(request_id, CreationStage::CredentialAcquired, &claim, e)),
        };
        info!(request_id, stage = ?CreationStage::Uploaded, "metadata uploaded");

        if let Err(e) = co_sign(&mut tx, credential.keypair(), &user_wallet) {
            return Err(self.fail(request_id, CreationStage::Uploaded, &claim, e));
        }
        info!(request_id, stage = ?CreationStage::CoSigned, "transaction co-signed");

        let now = Utc::now();
        Ok(PendingEntry {
            request_id: request_id.to_string(),
            claim,
            credential,
            user_wallet,
            transaction: tx,
            created_at: now,
            expires_at: self.pending.expiry_from(now),
        })
    }

    /// `UserSigned` through `Retired`.
    async fn finish(&self, entry: PendingEntry, user_signed: Transaction) -> Result<CreationOutcome> {
        let request_id = entry.request_id.as_str();
        let mint = entry.credential.pubkey();

        if let Err(e) = check_user_signed(&entry.transaction, &user_signed, &mint, &entry.user_wallet) {
            return Err(self.fail(request_id, CreationStage::CoSigned, &entry.claim, e));
        }
        info!(request_id, stage = ?CreationStage::UserSigned, "user signature verified");

        // A claim lost to expiry or recycling means another run may hold the mint.
        if let Err(e) = self.reservations.ensure_held(&entry.claim) {
            warn!(request_id, stage = ?CreationStage::UserSigned, error = %e, "pool creation failed");
            return Err(e);
        }

        let receipt = match self.broadcaster.submit(&user_signed).await {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.fail(request_id, CreationStage::UserSigned, &entry.claim, e)),
        };
        info!(
            request_id,
            stage = ?CreationStage::Broadcast,
            signature = %receipt.signature,
            "transaction broadcast"
        );

        let (retired, stage) = match self.reservations.retire(&entry.claim) {
            Ok(()) => {
                info!(request_id, stage = ?CreationStage::Retired, %mint, "credential retired");
                (true, CreationStage::Retired)
            }
            Err(e) => {
                warn!(
                    request_id,
                    identifier = %entry.claim.identifier,
                    error = %e,
                    "pool created but credential retirement failed"
                );
                (false, CreationStage::Broadcast)
            }
        };

        Ok(CreationOutcome {
            request_id: entry.request_id.clone(),
            mint,
            signature: receipt.signature,
            transaction: user_signed,
            signing_order: [mint, entry.user_wallet],
            retired,
            stage,
        })
    }

    // ─── Helpers ──────────────────────────────────────────────────────────────

    fn fail(&self, request_id: &str, stage: CreationStage, claim: &Claim, error: Error) -> Error {
        warn!(request_id, stage = ?stage, error = %error, "pool creation failed");
        self.release_quietly(claim);
        error
    }

    fn release_quietly(&self, claim: &Claim) {
        if let Err(e) = self.reservations.release(claim) {
            warn!(identifier = %claim.identifier, error = %e, "claim release failed");
        }
    }
}

fn upload_request(request: &PoolCreationRequest, credential: &Credential, user_wallet: &Pubkey) -> UploadRequest {
    UploadRequest {
        logo_base64:   request.logo.as_ref().map(|l| l.to_data_url()).unwrap_or_default(),
        mint_identity: credential.pubkey().to_string(),
        token_name:    request.token_name.trim().to_string(),
        token_symbol:  request.token_symbol.trim().to_string(),
        user_wallet:   user_wallet.to_string(),
        website:       request.website().map(str::to_string),
        twitter:       request.twitter().map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::KeypairWallet;
    use crate::credentials::tests::store_with;
    use crate::transaction::{decode_base64, tests::unsigned_pool_tx, valid_signature};
    use crate::types::{BroadcastReceipt, LogoAsset};
    use async_trait::async_trait;
    use solana_sdk::signature::{Keypair, Signer};
    use std::sync::Mutex;
    use std::time::Duration;

    // ── Fakes ──

    #[derive(Default)]
    struct FakeUploader {
        fail:     Option<String>,
        garbage:  bool,
        requests: Mutex<Vec<UploadRequest>>,
    }

    #[async_trait]
    impl AssetUploader for FakeUploader {
        async fn upload(&self, request: &UploadRequest) -> Result<Transaction> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(reason) = &self.fail {
                return Err(Error::Upload(reason.clone()));
            }
            if self.garbage {
                return decode_base64("bm90IGEgdHJhbnNhY3Rpb24=");
            }
            let mint: Pubkey = request.mint_identity.parse().unwrap();
            let user: Pubkey = request.user_wallet.parse().unwrap();
            Ok(unsigned_pool_tx(&user, &mint))
        }
    }

    #[derive(Default)]
    struct FakeBroadcaster {
        fail:      Option<String>,
        submitted: Mutex<Vec<Transaction>>,
    }

    #[async_trait]
    impl Broadcaster for FakeBroadcaster {
        async fn submit(&self, tx: &Transaction) -> Result<BroadcastReceipt> {
            if let Some(reason) = &self.fail {
                return Err(Error::Broadcast(reason.clone()));
            }
            self.submitted.lock().unwrap().push(tx.clone());
            Ok(BroadcastReceipt { signature: tx.signatures[0] })
        }
    }

    struct DecliningWallet(Pubkey);

    #[async_trait]
    impl WalletSigner for DecliningWallet {
        fn pubkey(&self) -> Pubkey {
            self.0
        }

        async fn sign_transaction(&self, _tx: Transaction) -> Result<Transaction> {
            Err(Error::UserRejected("User rejected the request".into()))
        }
    }

    struct Harness {
        _dir:        tempfile::TempDir,
        orch:        PoolCreationOrchestrator,
        uploader:    Arc<FakeUploader>,
        broadcaster: Arc<FakeBroadcaster>,
        ids:         Vec<String>,
    }

    fn harness(n: usize, uploader: FakeUploader, broadcaster: FakeBroadcaster) -> Harness {
        let (dir, store, ids) = store_with(n);
        let reservations = Arc::new(CredentialReservations::new(store, dir.path().join("claims")));
        let uploader = Arc::new(uploader);
        let broadcaster = Arc::new(broadcaster);
        let orch = PoolCreationOrchestrator::new(reservations, uploader.clone(), broadcaster.clone());
        Harness { _dir: dir, orch, uploader, broadcaster, ids }
    }

    fn request() -> PoolCreationRequest {
        PoolCreationRequest {
            token_name:   "Virtual Coin".into(),
            token_symbol: "VIRT".into(),
            logo:         Some(LogoAsset::from_bytes(vec![0x89, b'P', b'N', b'G', 0, 1])),
            website:      Some("https://virtual.example".into()),
            twitter:      None,
        }
    }

    fn assert_untouched(h: &Harness) {
        let store = h.orch.reservations().store();
        for id in &h.ids {
            assert!(store.is_available(id));
            assert!(!store.is_consumed(id));
            assert!(h.orch.reservations().current_claim(id).unwrap().is_none());
        }
    }

    // ── Happy paths ──

    #[tokio::test]
    async fn run_signs_in_order_and_retires() {
        let h = harness(1, FakeUploader::default(), FakeBroadcaster::default());
        let user = Keypair::new();
        let wallet = KeypairWallet::new(user.insecure_clone());

        let outcome = h.orch.run(&request(), Some(&wallet)).await.unwrap();

        assert_eq!(outcome.signing_order, [outcome.mint, user.pubkey()]);
        assert!(valid_signature(&outcome.transaction, &outcome.mint).is_some());
        assert!(valid_signature(&outcome.transaction, &user.pubkey()).is_some());
        assert_eq!(outcome.transaction.signatures.len(), 2);
        assert!(outcome.retired);
        assert_eq!(outcome.stage, CreationStage::Retired);

        let store = h.orch.reservations().store();
        assert!(store.is_consumed(&h.ids[0]));
        assert!(!store.is_available(&h.ids[0]));
        assert_eq!(h.broadcaster.submitted.lock().unwrap().len(), 1);

        let sent = &h.uploader.requests.lock().unwrap()[0];
        assert_eq!(sent.mint_identity, outcome.mint.to_string());
        assert!(sent.logo_base64.starts_with("data:image/png;base64,"));
        assert_eq!(sent.twitter, None);
    }

    #[tokio::test]
    async fn prepare_then_complete() {
        let h = harness(2, FakeUploader::default(), FakeBroadcaster::default());
        let user = Keypair::new();

        let pending = h.orch.prepare(&request(), user.pubkey()).await.unwrap();
        assert!(h.orch.pending().contains(&pending.request_id));

        let mut tx = decode_base64(&pending.transaction).unwrap();
        assert!(valid_signature(&tx, &pending.mint).is_some());
        let blockhash = tx.message.recent_blockhash;
        tx.try_partial_sign(&[&user], blockhash).unwrap();

        let outcome = h.orch.complete(&pending.request_id, tx).await.unwrap();
        assert_eq!(outcome.mint, pending.mint);
        assert!(outcome.retired);
        assert!(h.orch.pending().is_empty());
        assert!(matches!(
            h.orch.complete(&pending.request_id, outcome.transaction.clone()).await,
            Err(Error::PendingNotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_prepares_use_distinct_credentials() {
        let h = harness(2, FakeUploader::default(), FakeBroadcaster::default());
        let (req_a, req_b) = (request(), request());
        let (a, b) = tokio::join!(
            h.orch.prepare(&req_a, Pubkey::new_unique()),
            h.orch.prepare(&req_b, Pubkey::new_unique()),
        );
        assert_ne!(a.unwrap().mint, b.unwrap().mint);
        assert!(matches!(
            h.orch.prepare(&request(), Pubkey::new_unique()).await,
            Err(Error::NoCredentialAvailable)
        ));
    }

    // ── Failures ──

    #[tokio::test]
    async fn invalid_request_has_no_side_effects() {
        let h = harness(1, FakeUploader::default(), FakeBroadcaster::default());
        let bad = PoolCreationRequest { token_name: "ab".into(), ..request() };
        let wallet = KeypairWallet::new(Keypair::new());

        assert!(matches!(h.orch.run(&bad, Some(&wallet)).await, Err(Error::Validation(_))));
        assert!(h.uploader.requests.lock().unwrap().is_empty());
        assert_untouched(&h);
    }

    #[tokio::test]
    async fn empty_pool_is_reported() {
        let h = harness(0, FakeUploader::default(), FakeBroadcaster::default());
        let wallet = KeypairWallet::new(Keypair::new());
        assert!(matches!(
            h.orch.run(&request(), Some(&wallet)).await,
            Err(Error::NoCredentialAvailable)
        ));
    }

    #[tokio::test]
    async fn upload_failure_leaves_credential_available() {
        let uploader = FakeUploader { fail: Some("metadata service down".into()), ..Default::default() };
        let h = harness(1, uploader, FakeBroadcaster::default());
        let wallet = KeypairWallet::new(Keypair::new());

        match h.orch.run(&request(), Some(&wallet)).await {
            Err(Error::Upload(reason)) => assert_eq!(reason, "metadata service down"),
            other => panic!("expected upload error, got {other:?}"),
        }
        assert_untouched(&h);
        assert_eq!(h.orch.reservations().store().list_available().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_transaction_is_serialization_error() {
        let uploader = FakeUploader { garbage: true, ..Default::default() };
        let h = harness(1, uploader, FakeBroadcaster::default());
        let wallet = KeypairWallet::new(Keypair::new());

        assert!(matches!(
            h.orch.run(&request(), Some(&wallet)).await,
            Err(Error::Serialization(_))
        ));
        assert_untouched(&h);
    }

    #[tokio::test]
    async fn declined_or_missing_wallet_is_user_rejection() {
        let h = harness(1, FakeUploader::default(), FakeBroadcaster::default());
        let wallet = DecliningWallet(Pubkey::new_unique());

        assert!(matches!(h.orch.run(&request(), Some(&wallet)).await, Err(Error::UserRejected(_))));
        assert!(matches!(h.orch.run(&request(), None).await, Err(Error::UserRejected(_))));
        assert!(h.broadcaster.submitted.lock().unwrap().is_empty());
        assert_untouched(&h);
    }

    #[tokio::test]
    async fn broadcast_reason_is_verbatim() {
        let broadcaster = FakeBroadcaster {
            fail: Some("Transaction simulation failed: blockhash not found".into()),
            ..Default::default()
        };
        let h = harness(1, FakeUploader::default(), broadcaster);
        let wallet = KeypairWallet::new(Keypair::new());

        match h.orch.run(&request(), Some(&wallet)).await {
            Err(Error::Broadcast(reason)) => {
                assert_eq!(reason, "Transaction simulation failed: blockhash not found")
            }
            other => panic!("expected broadcast error, got {other:?}"),
        }
        assert_untouched(&h);
    }

    #[tokio::test]
    async fn retirement_failure_is_not_fatal() {
        let h = harness(1, FakeUploader::default(), FakeBroadcaster::default());
        let user = Keypair::new();

        let pending = h.orch.prepare(&request(), user.pubkey()).await.unwrap();
        // Someone moves the keypair out from under the run.
        h.orch.reservations().store().consume(&h.ids[0]).unwrap();

        let mut tx = decode_base64(&pending.transaction).unwrap();
        let blockhash = tx.message.recent_blockhash;
        tx.try_partial_sign(&[&user], blockhash).unwrap();

        let outcome = h.orch.complete(&pending.request_id, tx).await.unwrap();
        assert!(!outcome.retired);
        assert_eq!(outcome.stage, CreationStage::Broadcast);
        assert_eq!(h.broadcaster.submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lost_claim_aborts_before_broadcast() {
        let (dir, store, ids) = store_with(1);
        let claims = dir.path().join("claims");
        let reservations = Arc::new(
            CredentialReservations::new(store.clone(), &claims).with_ttl(Duration::ZERO),
        );
        let broadcaster = Arc::new(FakeBroadcaster::default());
        let orch = PoolCreationOrchestrator::new(
            reservations,
            Arc::new(FakeUploader::default()),
            broadcaster.clone(),
        );
        let user = Keypair::new();
        let pending = orch.prepare(&request(), user.pubkey()).await.unwrap();

        // The expired claim is taken over by another run.
        let rival = CredentialReservations::new(store, &claims);
        let (taken, _) = rival.claim_any("rival-run").unwrap();
        assert_eq!(taken.identifier, ids[0]);

        let mut tx = decode_base64(&pending.transaction).unwrap();
        let blockhash = tx.message.recent_blockhash;
        tx.try_partial_sign(&[&user], blockhash).unwrap();

        assert!(matches!(
            orch.complete(&pending.request_id, tx).await,
            Err(Error::ClaimNotHeld(_))
        ));
        assert!(broadcaster.submitted.lock().unwrap().is_empty());
        // The rival's claim survives and the keypair is still available.
        rival.ensure_held(&taken).unwrap();
        assert!(rival.store().is_available(&ids[0]));
    }

    #[tokio::test]
    async fn unsigned_completion_releases_claim() {
        let h = harness(1, FakeUploader::default(), FakeBroadcaster::default());
        let pending = h.orch.prepare(&request(), Pubkey::new_unique()).await.unwrap();
        let tx = decode_base64(&pending.transaction).unwrap();

        assert!(matches!(
            h.orch.complete(&pending.request_id, tx).await,
            Err(Error::UserRejected(_))
        ));
        assert_untouched(&h);
    }

    // ── Pending lifecycle ──

    #[tokio::test]
    async fn abandon_releases_claim() {
        let h = harness(1, FakeUploader::default(), FakeBroadcaster::default());
        let pending = h.orch.prepare(&request(), Pubkey::new_unique()).await.unwrap();

        h.orch.abandon(&pending.request_id).unwrap();
        assert_untouched(&h);
        assert!(matches!(h.orch.abandon(&pending.request_id), Err(Error::PendingNotFound(_))));
    }

    #[tokio::test]
    async fn expired_pending_is_swept_and_claim_released() {
        let (dir, store, ids) = store_with(1);
        let reservations = Arc::new(CredentialReservations::new(store, dir.path().join("claims")));
        let orch = PoolCreationOrchestrator::new(
            reservations,
            Arc::new(FakeUploader::default()),
            Arc::new(FakeBroadcaster::default()),
        )
        .with_pending(PendingCreations::new(Duration::from_millis(10)));

        let user = Keypair::new();
        let pending = orch.prepare(&request(), user.pubkey()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(orch.sweep_expired(), 1);
        assert!(orch.reservations().current_claim(&ids[0]).unwrap().is_none());
        assert!(orch.reservations().store().is_available(&ids[0]));

        let tx = decode_base64(&pending.transaction).unwrap();
        assert!(matches!(
            orch.complete(&pending.request_id, tx).await,
            Err(Error::PendingNotFound(_))
        ));
    }
}
