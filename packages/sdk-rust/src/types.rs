//! Public parameter and result types.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use solana_sdk::{pubkey::Pubkey, signature::Signature, transaction::Transaction};
use url::Url;

use crate::error::{Error, Result};

/// Minimum token-name length, in characters.
pub const MIN_NAME_LEN: usize = 3;
/// Maximum token-symbol length, in characters.
pub const MAX_SYMBOL_LEN: usize = 10;

// ─── Logo ─────────────────────────────────────────────────────────────────────

/// Token image, sent to the upload service as a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoAsset {
    pub content_type: String,
    pub bytes:        Vec<u8>,
}

impl LogoAsset {
    /// Wrap raw image bytes, sniffing the content type from magic bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let content_type = sniff_image_type(&bytes).to_string();
        Self { content_type, bytes }
    }

    /// Parse either a `data:<mime>;base64,<payload>` URL or bare base64.
    pub fn from_data_url(input: &str) -> Result<Self> {
        let input = input.trim();
        let (content_type, payload) = match input.strip_prefix("data:") {
            Some(rest) => {
                let (meta, payload) = rest
                    .split_once(',')
                    .ok_or_else(|| Error::Validation("Token logo is not a valid data URL".into()))?;
                let mime = meta.strip_suffix(";base64").ok_or_else(|| {
                    Error::Validation("Token logo data URL must be base64-encoded".into())
                })?;
                (Some(mime.to_string()), payload)
            }
            None => (None, input),
        };
        let bytes = STANDARD
            .decode(payload)
            .map_err(|_| Error::Validation("Token logo is not valid base64".into()))?;
        Ok(match content_type {
            Some(content_type) if !content_type.is_empty() => Self { content_type, bytes },
            _ => Self::from_bytes(bytes),
        })
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.content_type, STANDARD.encode(&self.bytes))
    }
}

fn sniff_image_type(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ if looks_like_svg(bytes) => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(256)];
    String::from_utf8_lossy(head).contains("<svg")
}

// ─── Request ──────────────────────────────────────────────────────────────────

/// Everything the user supplies for one pool-creation attempt.
#[derive(Debug, Clone)]
pub struct PoolCreationRequest {
    pub token_name:   String,
    pub token_symbol: String,
    pub logo:         Option<LogoAsset>,
    pub website:      Option<String>,
    pub twitter:      Option<String>,
}

impl PoolCreationRequest {
    /// Check the request before any side effect happens.
    ///
    /// Empty optional URLs count as absent.
    pub fn validate(&self) -> Result<()> {
        let name_len = self.token_name.trim().chars().count();
        if name_len < MIN_NAME_LEN {
            return Err(Error::Validation(format!(
                "Token name must be at least {MIN_NAME_LEN} characters"
            )));
        }

        let symbol_len = self.token_symbol.trim().chars().count();
        if symbol_len == 0 {
            return Err(Error::Validation("Token symbol is required".into()));
        }
        if symbol_len > MAX_SYMBOL_LEN {
            return Err(Error::Validation(format!(
                "Token symbol must be at most {MAX_SYMBOL_LEN} characters"
            )));
        }

        match &self.logo {
            Some(logo) if !logo.bytes.is_empty() => {}
            _ => return Err(Error::Validation("Token logo is required".into())),
        }

        check_url("website", self.website())?;
        check_url("twitter", self.twitter())?;
        Ok(())
    }

    pub fn website(&self) -> Option<&str> {
        non_empty(self.website.as_deref())
    }

    pub fn twitter(&self) -> Option<&str> {
        non_empty(self.twitter.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn check_url(field: &str, value: Option<&str>) -> Result<()> {
    let Some(value) = value else { return Ok(()) };
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
        _ => Err(Error::Validation(format!("Please enter a valid URL for {field}"))),
    }
}

// ─── Collaborator wire types ──────────────────────────────────────────────────

/// Body sent to the asset-upload service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub logo_base64:   String,
    pub mint_identity: String,
    pub token_name:    String,
    pub token_symbol:  String,
    pub user_wallet:   String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website:       Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitter:       Option<String>,
}

/// Successful upload response: the unsigned pool-creation transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub unsigned_transaction_base64: String,
}

/// Body sent to the broadcast service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub signed_transaction_base64: String,
}

/// Broadcast service response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub success:   bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Remote reason when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error:     Option<String>,
}

/// Error payload shared by the HTTP collaborators.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

/// What a broadcaster reports back on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastReceipt {
    pub signature: Signature,
}

// ─── Orchestration ────────────────────────────────────────────────────────────

/// Linear stages of one pool creation. A failure is the `Err` returned by
/// the orchestrator; the stage it left from is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationStage {
    Validating,
    CredentialAcquired,
    Uploaded,
    CoSigned,
    UserSigned,
    Broadcast,
    Retired,
}

/// Co-signed transaction waiting for the user's wallet.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCreation {
    pub request_id:  String,
    #[serde_as(as = "DisplayFromStr")]
    pub mint:        Pubkey,
    #[serde_as(as = "DisplayFromStr")]
    pub user_wallet: Pubkey,
    /// Base64 bincode of the co-signed transaction.
    pub transaction: String,
    pub expires_at:  DateTime<Utc>,
}

/// Result of a completed pool creation.
#[derive(Debug, Clone)]
pub struct CreationOutcome {
    pub request_id:    String,
    pub mint:          Pubkey,
    pub signature:     Signature,
    pub transaction:   Transaction,
    /// Signers in the order their signatures were applied.
    pub signing_order: [Pubkey; 2],
    /// `false` when the keypair could not be moved to the consumed pool; the
    /// pool itself was still created.
    pub retired:       bool,
    pub stage:         CreationStage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PoolCreationRequest {
        PoolCreationRequest {
            token_name:   "Virtual Coin".into(),
            token_symbol: "VIRT".into(),
            logo:         Some(LogoAsset::from_bytes(vec![0x89, b'P', b'N', b'G', 1, 2, 3])),
            website:      Some(String::new()),
            twitter:      Some("https://x.com/virtual".into()),
        }
    }

    fn message(err: Error) -> String {
        match err {
            Error::Validation(msg) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn accepts_well_formed_request() {
        request().validate().unwrap();
    }

    #[test]
    fn rejects_short_name() {
        let req = PoolCreationRequest { token_name: "ab".into(), ..request() };
        assert!(message(req.validate().unwrap_err()).contains("at least 3"));
    }

    #[test]
    fn name_length_counts_characters_not_bytes() {
        let req = PoolCreationRequest { token_name: "日本語".into(), ..request() };
        req.validate().unwrap();
    }

    #[test]
    fn symbol_bounds() {
        let empty = PoolCreationRequest { token_symbol: "  ".into(), ..request() };
        assert!(message(empty.validate().unwrap_err()).contains("required"));

        let long = PoolCreationRequest { token_symbol: "ABCDEFGHIJK".into(), ..request() };
        assert!(message(long.validate().unwrap_err()).contains("at most 10"));

        let max = PoolCreationRequest { token_symbol: "ABCDEFGHIJ".into(), ..request() };
        max.validate().unwrap();
    }

    #[test]
    fn logo_required() {
        let none = PoolCreationRequest { logo: None, ..request() };
        assert!(message(none.validate().unwrap_err()).contains("logo"));

        let empty = PoolCreationRequest { logo: Some(LogoAsset::from_bytes(vec![])), ..request() };
        assert!(message(empty.validate().unwrap_err()).contains("logo"));
    }

    #[test]
    fn malformed_urls_rejected() {
        let req = PoolCreationRequest { website: Some("not a url".into()), ..request() };
        assert!(message(req.validate().unwrap_err()).contains("website"));

        let req = PoolCreationRequest { twitter: Some("ftp://x.com/a".into()), ..request() };
        assert!(message(req.validate().unwrap_err()).contains("twitter"));
    }

    #[test]
    fn empty_urls_are_absent() {
        let req = request();
        assert_eq!(req.website(), None);
        assert_eq!(req.twitter(), Some("https://x.com/virtual"));
    }

    #[test]
    fn logo_data_url_parsing() {
        let logo = LogoAsset::from_data_url("data:image/png;base64,iVBORw==").unwrap();
        assert_eq!(logo.content_type, "image/png");
        assert_eq!(logo.bytes, vec![0x89, b'P', b'N', b'G']);
        assert_eq!(logo.to_data_url(), "data:image/png;base64,iVBORw==");

        let bare = LogoAsset::from_data_url("/9j/4A==").unwrap();
        assert_eq!(bare.content_type, "image/jpeg");

        assert!(LogoAsset::from_data_url("data:image/png,raw").is_err());
        assert!(LogoAsset::from_data_url("%%%").is_err());
    }

    #[test]
    fn stages_order_and_wire_names() {
        assert!(CreationStage::Validating < CreationStage::CoSigned);
        assert!(CreationStage::Broadcast < CreationStage::Retired);
        assert_eq!(serde_json::to_value(CreationStage::CredentialAcquired).unwrap(), "credential_acquired");
        assert_eq!(serde_json::to_value(CreationStage::Retired).unwrap(), "retired");
    }

    #[test]
    fn upload_request_wire_shape() {
        let body = UploadRequest {
            logo_base64:   "data:image/png;base64,AA==".into(),
            mint_identity: "Mint111".into(),
            token_name:    "Virtual Coin".into(),
            token_symbol:  "VIRT".into(),
            user_wallet:   "User111".into(),
            website:       None,
            twitter:       Some("https://x.com/v".into()),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["logoBase64"], "data:image/png;base64,AA==");
        assert_eq!(json["mintIdentity"], "Mint111");
        assert!(json.get("website").is_none());
        assert_eq!(json["twitter"], "https://x.com/v");
    }
}
