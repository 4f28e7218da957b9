//! Transaction wire codec and the two-party signing checks.
//!
//! Pool-creation transactions are legacy Solana transactions that require
//! exactly two signatures: the co-signer keypair (the new mint) and the
//! user's wallet. The co-signer signs first; the wallet signs the same
//! message afterwards.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};

use crate::error::{Error, Result};

/// Signatures a pool-creation transaction must carry.
pub const REQUIRED_SIGNATURES: usize = 2;

pub fn decode_base64(encoded: &str) -> Result<Transaction> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Serialization(format!("transaction is not valid base64: {e}")))?;
    decode(&bytes)
}

pub fn decode(bytes: &[u8]) -> Result<Transaction> {
    let tx: Transaction = bincode::deserialize(bytes)
        .map_err(|e| Error::Serialization(format!("malformed transaction bytes: {e}")))?;
    if tx.signatures.len() != tx.message.header.num_required_signatures as usize {
        return Err(Error::Serialization(format!(
            "transaction carries {} signature slots but its message requires {}",
            tx.signatures.len(),
            tx.message.header.num_required_signatures
        )));
    }
    Ok(tx)
}

pub fn encode_base64(tx: &Transaction) -> Result<String> {
    let bytes = bincode::serialize(tx)
        .map_err(|e| Error::Serialization(format!("cannot serialize transaction: {e}")))?;
    Ok(STANDARD.encode(bytes))
}

/// Index of `signer` among the transaction's required signers.
pub fn signer_slot(tx: &Transaction, signer: &Pubkey) -> Option<usize> {
    let required = tx.message.header.num_required_signatures as usize;
    tx.message.account_keys.iter().take(required).position(|k| k == signer)
}

/// Check that `tx` is a two-signer transaction naming both parties, and
/// apply the co-signer's signature.
pub fn co_sign(tx: &mut Transaction, co_signer: &Keypair, user_wallet: &Pubkey) -> Result<()> {
    let required = tx.message.header.num_required_signatures as usize;
    if required != REQUIRED_SIGNATURES {
        return Err(Error::Serialization(format!(
            "pool transaction must require exactly {REQUIRED_SIGNATURES} signatures, found {required}"
        )));
    }
    if signer_slot(tx, &co_signer.pubkey()).is_none() {
        return Err(Error::Serialization(format!(
            "co-signer {} has no signer slot in the transaction",
            co_signer.pubkey()
        )));
    }
    if signer_slot(tx, user_wallet).is_none() {
        return Err(Error::Serialization(format!(
            "user wallet {user_wallet} has no signer slot in the transaction"
        )));
    }

    let blockhash = tx.message.recent_blockhash;
    tx.try_partial_sign(&[co_signer], blockhash)
        .map_err(|e| Error::Serialization(format!("co-signing failed: {e}")))
}

/// Signature currently held in `signer`'s slot, if it verifies.
pub fn valid_signature(tx: &Transaction, signer: &Pubkey) -> Option<Signature> {
    let slot = signer_slot(tx, signer)?;
    let signature = *tx.signatures.get(slot)?;
    if signature == Signature::default() {
        return None;
    }
    signature
        .verify(signer.as_ref(), &tx.message_data())
        .then_some(signature)
}

/// Verify a wallet-returned transaction against the co-signed original.
///
/// The message must be byte-identical, the co-signature must be unchanged,
/// and the wallet's slot must hold a valid signature.
pub fn check_user_signed(
    co_signed:   &Transaction,
    user_signed: &Transaction,
    co_signer:   &Pubkey,
    user_wallet: &Pubkey,
) -> Result<()> {
    if user_signed.message_data() != co_signed.message_data() {
        return Err(Error::Serialization(
            "wallet returned a transaction whose message differs from the co-signed one".into(),
        ));
    }
    let expected = valid_signature(co_signed, co_signer);
    if expected.is_none() || valid_signature(user_signed, co_signer) != expected {
        return Err(Error::Serialization(
            "co-signer signature missing from the wallet-signed transaction".into(),
        ));
    }
    if valid_signature(user_signed, user_wallet).is_none() {
        return Err(Error::UserRejected("wallet did not sign the transaction".into()));
    }
    user_signed
        .verify()
        .map_err(|e| Error::Serialization(format!("signature verification failed: {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use solana_sdk::{
        hash::Hash,
        instruction::{AccountMeta, Instruction},
        message::Message,
    };

    /// Unsigned pool-creation transaction paid by `user`, co-signed by `mint`.
    pub(crate) fn unsigned_pool_tx(user: &Pubkey, mint: &Pubkey) -> Transaction {
        let ix = Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![
                AccountMeta::new(*user, true),
                AccountMeta::new(*mint, true),
                AccountMeta::new(Pubkey::new_unique(), false),
            ],
            data: vec![1, 2, 3],
        };
        let mut message = Message::new(&[ix], Some(user));
        message.recent_blockhash = Hash::new_unique();
        Transaction::new_unsigned(message)
    }

    #[test]
    fn wire_round_trip_keeps_slots() {
        let user = Keypair::new();
        let mint = Keypair::new();
        let tx = unsigned_pool_tx(&user.pubkey(), &mint.pubkey());

        let decoded = decode_base64(&encode_base64(&tx).unwrap()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.signatures.len(), REQUIRED_SIGNATURES);
    }

    #[test]
    fn garbage_bytes_are_serialization_errors() {
        assert!(matches!(decode(&[0xff, 0x00, 0x13]), Err(Error::Serialization(_))));
        assert!(matches!(decode_base64("***"), Err(Error::Serialization(_))));
    }

    #[test]
    fn co_sign_then_user_sign() {
        let user = Keypair::new();
        let mint = Keypair::new();
        let mut tx = unsigned_pool_tx(&user.pubkey(), &mint.pubkey());

        co_sign(&mut tx, &mint, &user.pubkey()).unwrap();
        assert!(valid_signature(&tx, &mint.pubkey()).is_some());
        assert!(valid_signature(&tx, &user.pubkey()).is_none());

        let co_signed = tx.clone();
        let blockhash = tx.message.recent_blockhash;
        tx.try_partial_sign(&[&user], blockhash).unwrap();

        check_user_signed(&co_signed, &tx, &mint.pubkey(), &user.pubkey()).unwrap();
        assert!(tx.is_signed());
    }

    #[test]
    fn co_sign_requires_both_slots() {
        let user = Keypair::new();
        let mint = Keypair::new();
        let stranger = Keypair::new();

        let mut tx = unsigned_pool_tx(&user.pubkey(), &stranger.pubkey());
        assert!(matches!(co_sign(&mut tx, &mint, &user.pubkey()), Err(Error::Serialization(_))));

        let mut tx = unsigned_pool_tx(&stranger.pubkey(), &mint.pubkey());
        assert!(matches!(co_sign(&mut tx, &mint, &user.pubkey()), Err(Error::Serialization(_))));
    }

    #[test]
    fn unsigned_wallet_return_is_rejection() {
        let user = Keypair::new();
        let mint = Keypair::new();
        let mut tx = unsigned_pool_tx(&user.pubkey(), &mint.pubkey());
        co_sign(&mut tx, &mint, &user.pubkey()).unwrap();

        let err = check_user_signed(&tx, &tx, &mint.pubkey(), &user.pubkey()).unwrap_err();
        assert!(matches!(err, Error::UserRejected(_)));
    }

    #[test]
    fn tampered_message_is_detected() {
        let user = Keypair::new();
        let mint = Keypair::new();
        let mut tx = unsigned_pool_tx(&user.pubkey(), &mint.pubkey());
        co_sign(&mut tx, &mint, &user.pubkey()).unwrap();

        let mut tampered = tx.clone();
        tampered.message.recent_blockhash = Hash::new_unique();
        let blockhash = tampered.message.recent_blockhash;
        tampered.try_partial_sign(&[&user], blockhash).unwrap();

        let err = check_user_signed(&tx, &tampered, &mint.pubkey(), &user.pubkey()).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn stripped_co_signature_is_detected() {
        let user = Keypair::new();
        let mint = Keypair::new();
        let mut tx = unsigned_pool_tx(&user.pubkey(), &mint.pubkey());
        co_sign(&mut tx, &mint, &user.pubkey()).unwrap();
        let co_signed = tx.clone();

        let blockhash = tx.message.recent_blockhash;
        tx.try_partial_sign(&[&user], blockhash).unwrap();
        let slot = signer_slot(&tx, &mint.pubkey()).unwrap();
        tx.signatures[slot] = Signature::default();

        match check_user_signed(&co_signed, &tx, &mint.pubkey(), &user.pubkey()) {
            Err(Error::Serialization(reason)) => assert!(reason.contains("co-signer signature missing")),
            other => panic!("expected serialization error, got {other:?}"),
        }
    }
}
