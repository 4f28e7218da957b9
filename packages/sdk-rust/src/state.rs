//! On-chain account deserialization.
//!
//! Parses raw `VirtualPool` account bytes from the dynamic bonding curve
//! program (424 bytes). Byte offsets mirror the Anchor `#[account]` layout
//! exactly. Serialized with integers and keys as strings, the shape pool
//! listings are served in.

use serde::Serialize;
use serde_with::{serde_as, DisplayFromStr};
use solana_sdk::{hash::hash, pubkey::Pubkey};

use crate::error::{Error, Result};

/// Mainnet dynamic bonding curve program.
pub const DBC_PROGRAM_ID: &str = "dbcij3LWUppWqq96dh6gJWwBifmcGfLSB5D4DuSMaqN";

/// Size of a `VirtualPool` account including the discriminator.
pub const VIRTUAL_POOL_LEN: usize = 424;

/// Offset of `creator`, used as the getProgramAccounts filter.
pub const CREATOR_OFFSET: usize = 104;

// ─── VirtualPool ──────────────────────────────────────────────────────────────

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolatilityTracker {
    #[serde_as(as = "DisplayFromStr")]
    pub last_update_timestamp:  u64,
    pub padding:                [u8; 8],
    #[serde_as(as = "DisplayFromStr")]
    pub sqrt_price_reference:   u128,
    #[serde_as(as = "DisplayFromStr")]
    pub volatility_accumulator: u128,
    #[serde_as(as = "DisplayFromStr")]
    pub volatility_reference:   u128,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetrics {
    #[serde_as(as = "DisplayFromStr")]
    pub total_protocol_base_fee:  u64,
    #[serde_as(as = "DisplayFromStr")]
    pub total_protocol_quote_fee: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub total_trading_base_fee:   u64,
    #[serde_as(as = "DisplayFromStr")]
    pub total_trading_quote_fee:  u64,
}

/// Deserialized `VirtualPool` account state.
///
/// Layout (after 8-byte Anchor discriminator):
/// ```text
/// volatility_tracker(64)  config(32)  creator(32)  base_mint(32)
/// base_vault(32)  quote_vault(32)  base_reserve(8)  quote_reserve(8)
/// protocol_base_fee(8)  protocol_quote_fee(8)  partner_base_fee(8)
/// partner_quote_fee(8)  sqrt_price(16)  activation_point(8)  flags(8 × u8)
/// metrics(32)  finish_curve_timestamp(8)  creator_base_fee(8)
/// creator_quote_fee(8)  padding_1(56)  = 424 bytes
/// ```
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualPoolState {
    pub volatility_tracker:            VolatilityTracker,
    #[serde_as(as = "DisplayFromStr")]
    pub config:                        Pubkey,
    #[serde_as(as = "DisplayFromStr")]
    pub creator:                       Pubkey,
    #[serde_as(as = "DisplayFromStr")]
    pub base_mint:                     Pubkey,
    #[serde_as(as = "DisplayFromStr")]
    pub base_vault:                    Pubkey,
    #[serde_as(as = "DisplayFromStr")]
    pub quote_vault:                   Pubkey,
    #[serde_as(as = "DisplayFromStr")]
    pub base_reserve:                  u64,
    #[serde_as(as = "DisplayFromStr")]
    pub quote_reserve:                 u64,
    #[serde_as(as = "DisplayFromStr")]
    pub protocol_base_fee:             u64,
    #[serde_as(as = "DisplayFromStr")]
    pub protocol_quote_fee:            u64,
    #[serde_as(as = "DisplayFromStr")]
    pub partner_base_fee:              u64,
    #[serde_as(as = "DisplayFromStr")]
    pub partner_quote_fee:             u64,
    /// Current price, Q64.64 fixed-point square root.
    #[serde_as(as = "DisplayFromStr")]
    pub sqrt_price:                    u128,
    #[serde_as(as = "DisplayFromStr")]
    pub activation_point:              u64,
    pub pool_type:                     u8,
    pub is_migrated:                   u8,
    pub is_partner_withdraw_surplus:   u8,
    pub is_protocol_withdraw_surplus:  u8,
    pub migration_progress:            u8,
    pub is_withdraw_leftover:          u8,
    pub is_creator_withdraw_surplus:   u8,
    pub migration_fee_withdraw_status: u8,
    pub metrics:                       PoolMetrics,
    #[serde_as(as = "DisplayFromStr")]
    pub finish_curve_timestamp:        u64,
    #[serde_as(as = "DisplayFromStr")]
    pub creator_base_fee:              u64,
    #[serde_as(as = "DisplayFromStr")]
    pub creator_quote_fee:             u64,
    #[serde_as(as = "[DisplayFromStr; 7]")]
    pub padding_1:                     [u64; 7],
}

/// Deserialize a `VirtualPool` account from raw bytes.
pub fn parse_virtual_pool(data: &[u8]) -> Result<VirtualPoolState> {
    if data.len() < VIRTUAL_POOL_LEN {
        return Err(Error::ParseError {
            offset: 0,
            reason: format!("VirtualPool account is {} bytes; expected {}", data.len(), VIRTUAL_POOL_LEN),
        });
    }
    if data[..8] != virtual_pool_discriminator() {
        return Err(Error::ParseError { offset: 0, reason: "not a VirtualPool account".into() });
    }

    let mut padding = [0u8; 8];
    padding.copy_from_slice(&data[16..24]);
    let mut padding_1 = [0u64; 7];
    for (i, slot) in padding_1.iter_mut().enumerate() {
        *slot = read_u64(data, 368 + i * 8)?;
    }

    Ok(VirtualPoolState {
        volatility_tracker: VolatilityTracker {
            last_update_timestamp:  read_u64(data, 8)?,
            padding,
            sqrt_price_reference:   read_u128(data, 24)?,
            volatility_accumulator: read_u128(data, 40)?,
            volatility_reference:   read_u128(data, 56)?,
        },
        config:                        read_pubkey(data, 72)?,
        creator:                       read_pubkey(data, CREATOR_OFFSET)?,
        base_mint:                     read_pubkey(data, 136)?,
        base_vault:                    read_pubkey(data, 168)?,
        quote_vault:                   read_pubkey(data, 200)?,
        base_reserve:                  read_u64(data, 232)?,
        quote_reserve:                 read_u64(data, 240)?,
        protocol_base_fee:             read_u64(data, 248)?,
        protocol_quote_fee:            read_u64(data, 256)?,
        partner_base_fee:              read_u64(data, 264)?,
        partner_quote_fee:             read_u64(data, 272)?,
        sqrt_price:                    read_u128(data, 280)?,
        activation_point:              read_u64(data, 296)?,
        pool_type:                     data[304],
        is_migrated:                   data[305],
        is_partner_withdraw_surplus:   data[306],
        is_protocol_withdraw_surplus:  data[307],
        migration_progress:            data[308],
        is_withdraw_leftover:          data[309],
        is_creator_withdraw_surplus:   data[310],
        migration_fee_withdraw_status: data[311],
        metrics: PoolMetrics {
            total_protocol_base_fee:  read_u64(data, 312)?,
            total_protocol_quote_fee: read_u64(data, 320)?,
            total_trading_base_fee:   read_u64(data, 328)?,
            total_trading_quote_fee:  read_u64(data, 336)?,
        },
        finish_curve_timestamp:        read_u64(data, 344)?,
        creator_base_fee:              read_u64(data, 352)?,
        creator_quote_fee:             read_u64(data, 360)?,
        padding_1,
    })
}

/// Anchor account discriminator: `sha256("account:VirtualPool")[..8]`.
pub fn virtual_pool_discriminator() -> [u8; 8] {
    let h = hash(b"account:VirtualPool").to_bytes();
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&h[..8]);
    disc
}

// ─── Byte-slice primitives ────────────────────────────────────────────────────

fn field<const N: usize>(data: &[u8], offset: usize, what: &str) -> Result<[u8; N]> {
    data.get(offset..offset + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::ParseError { offset, reason: format!("slice too short for {what}") })
}

pub(crate) fn read_pubkey(data: &[u8], offset: usize) -> Result<Pubkey> {
    field::<32>(data, offset, "Pubkey (32 bytes)").map(Pubkey::from)
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    field::<8>(data, offset, "u64").map(u64::from_le_bytes)
}

pub(crate) fn read_u128(data: &[u8], offset: usize) -> Result<u128> {
    field::<16>(data, offset, "u128").map(u128::from_le_bytes)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Encoded `VirtualPool` with recognisable field values.
    pub(crate) fn encoded_pool(creator: &Pubkey, base_mint: &Pubkey) -> Vec<u8> {
        let mut data = vec![0u8; VIRTUAL_POOL_LEN];
        data[..8].copy_from_slice(&virtual_pool_discriminator());
        data[8..16].copy_from_slice(&1_700_000_000u64.to_le_bytes());
        data[16..24].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[24..40].copy_from_slice(&(u64::MAX as u128 + 5).to_le_bytes());
        data[72..104].copy_from_slice(Pubkey::new_from_array([7; 32]).as_ref());
        data[104..136].copy_from_slice(creator.as_ref());
        data[136..168].copy_from_slice(base_mint.as_ref());
        data[232..240].copy_from_slice(&1_000_000_000_000_000u64.to_le_bytes());
        data[240..248].copy_from_slice(&42u64.to_le_bytes());
        data[280..296].copy_from_slice(&(1u128 << 64).to_le_bytes());
        data[305] = 1;
        data[308] = 3;
        data[336..344].copy_from_slice(&99u64.to_le_bytes());
        data[360..368].copy_from_slice(&11u64.to_le_bytes());
        data[416..424].copy_from_slice(&6u64.to_le_bytes());
        data
    }

    #[test]
    fn parses_layout_offsets() {
        let creator = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let pool = parse_virtual_pool(&encoded_pool(&creator, &mint)).unwrap();

        assert_eq!(pool.creator, creator);
        assert_eq!(pool.base_mint, mint);
        assert_eq!(pool.config, Pubkey::new_from_array([7; 32]));
        assert_eq!(pool.volatility_tracker.last_update_timestamp, 1_700_000_000);
        assert_eq!(pool.volatility_tracker.padding, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(pool.volatility_tracker.sqrt_price_reference, u64::MAX as u128 + 5);
        assert_eq!(pool.base_reserve, 1_000_000_000_000_000);
        assert_eq!(pool.quote_reserve, 42);
        assert_eq!(pool.sqrt_price, 1u128 << 64);
        assert_eq!(pool.is_migrated, 1);
        assert_eq!(pool.migration_progress, 3);
        assert_eq!(pool.metrics.total_trading_quote_fee, 99);
        assert_eq!(pool.creator_quote_fee, 11);
        assert_eq!(pool.padding_1[6], 6);
    }

    #[test]
    fn serializes_big_numbers_as_strings() {
        let creator = Pubkey::new_unique();
        let pool = parse_virtual_pool(&encoded_pool(&creator, &Pubkey::new_unique())).unwrap();
        let json = serde_json::to_value(&pool).unwrap();

        assert_eq!(json["creator"], creator.to_string());
        assert_eq!(json["sqrtPrice"], "18446744073709551616");
        assert_eq!(json["baseReserve"], "1000000000000000");
        assert_eq!(json["volatilityTracker"]["padding"][0], 1);
        assert_eq!(json["metrics"]["totalTradingQuoteFee"], "99");
        assert_eq!(json["isMigrated"], 1);
        assert_eq!(json["padding1"][6], "6");
    }

    #[test]
    fn rejects_short_or_foreign_accounts() {
        let data = encoded_pool(&Pubkey::new_unique(), &Pubkey::new_unique());
        assert!(matches!(parse_virtual_pool(&data[..200]), Err(Error::ParseError { .. })));

        let mut foreign = data;
        foreign[0] ^= 0xff;
        assert!(matches!(parse_virtual_pool(&foreign), Err(Error::ParseError { offset: 0, .. })));
    }
}
