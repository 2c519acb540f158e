pub mod merkle;

use std::str::FromStr;

use alloy::primitives::{keccak256, Address, Signature, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol_types::SolValue;

/// Commitment digest for a purchase: keccak256 of the ABI-encoded
/// `(tokenId, price, buyer, nonce)` tuple.
pub fn purchase_digest(token_id: U256, price: U256, buyer: Address, nonce: B256) -> B256 {
    keccak256((token_id, price, buyer, nonce).abi_encode())
}

/// Pure check that `signature` is the expected signer's commitment to this
/// exact purchase. No side effects; callers must run this before any write
/// and abort the whole operation on failure.
pub fn verify_purchase_signature(
    token_id: U256,
    price: U256,
    buyer: Address,
    nonce: B256,
    signature: &Signature,
    expected_signer: Address,
) -> bool {
    let digest = purchase_digest(token_id, price, buyer, nonce);
    signature
        .recover_address_from_prehash(&digest)
        .map(|recovered| recovered == expected_signer)
        .unwrap_or(false)
}

/// Holds the marketplace's signing key; issues purchase commitments.
pub struct MarketSigner {
    signer: PrivateKeySigner,
}

impl MarketSigner {
    pub fn from_hex_key(key: &str) -> eyre::Result<Self> {
        let key = key.strip_prefix("0x").unwrap_or(key);
        let signer = PrivateKeySigner::from_str(key)
            .map_err(|e| eyre::eyre!("invalid market signer key: {}", e))?;
        Ok(Self { signer })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn sign_purchase(
        &self,
        token_id: U256,
        price: U256,
        buyer: Address,
        nonce: B256,
    ) -> eyre::Result<Signature> {
        let digest = purchase_digest(token_id, price, buyer, nonce);
        Ok(self.signer.sign_hash_sync(&digest)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn commitment() -> (U256, U256, Address, B256) {
        (
            U256::from(7u64),
            U256::from(1_000_000u64),
            Address::repeat_byte(0xbb),
            B256::repeat_byte(0x11),
        )
    }

    #[test]
    fn valid_signature_verifies() {
        let signer = MarketSigner::from_hex_key(TEST_KEY).unwrap();
        let (token_id, price, buyer, nonce) = commitment();
        let sig = signer.sign_purchase(token_id, price, buyer, nonce).unwrap();

        assert!(verify_purchase_signature(
            token_id,
            price,
            buyer,
            nonce,
            &sig,
            signer.address()
        ));
    }

    #[test]
    fn tampered_signature_byte_fails_verification() {
        let signer = MarketSigner::from_hex_key(TEST_KEY).unwrap();
        let (token_id, price, buyer, nonce) = commitment();
        let sig = signer.sign_purchase(token_id, price, buyer, nonce).unwrap();

        let mut bytes = sig.as_bytes();
        bytes[3] ^= 0x01;
        // A flipped byte either recovers a different address or fails to
        // parse at all; both must reject.
        let verified = Signature::from_raw(&bytes)
            .map(|tampered| {
                verify_purchase_signature(
                    token_id,
                    price,
                    buyer,
                    nonce,
                    &tampered,
                    signer.address(),
                )
            })
            .unwrap_or(false);
        assert!(!verified);
    }

    #[test]
    fn signature_does_not_transfer_to_another_commitment() {
        let signer = MarketSigner::from_hex_key(TEST_KEY).unwrap();
        let (token_id, price, buyer, nonce) = commitment();
        let sig = signer.sign_purchase(token_id, price, buyer, nonce).unwrap();

        // Same signature, different price
        assert!(!verify_purchase_signature(
            token_id,
            U256::from(1u64),
            buyer,
            nonce,
            &sig,
            signer.address()
        ));
    }

    #[test]
    fn wrong_expected_signer_fails() {
        let signer = MarketSigner::from_hex_key(TEST_KEY).unwrap();
        let (token_id, price, buyer, nonce) = commitment();
        let sig = signer.sign_purchase(token_id, price, buyer, nonce).unwrap();

        assert!(!verify_purchase_signature(
            token_id,
            price,
            buyer,
            nonce,
            &sig,
            Address::repeat_byte(0xff)
        ));
    }
}
