use alloy::primitives::{keccak256, Address, B256};
use alloy::sol_types::SolValue;

/// Leaf for an airdrop-eligible address: keccak256 of the ABI-encoded address.
pub fn address_leaf(address: Address) -> B256 {
    keccak256(address.abi_encode())
}

/// Verify a Merkle inclusion proof with sorted-pair hashing (the layout the
/// airdrop tree is built with: each parent hashes its children in byte
/// order, so proofs carry no left/right positions).
///
/// Pure and side-effect free; the claim flow runs it before any write.
pub fn verify_merkle_proof(leaf: B256, proof: &[B256], root: B256) -> bool {
    let mut node = leaf;
    for sibling in proof {
        node = hash_sorted_pair(node, *sibling);
    }
    node == root
}

fn hash_sorted_pair(a: B256, b: B256) -> B256 {
    let mut buf = [0u8; 64];
    if a <= b {
        buf[..32].copy_from_slice(a.as_slice());
        buf[32..].copy_from_slice(b.as_slice());
    } else {
        buf[..32].copy_from_slice(b.as_slice());
        buf[32..].copy_from_slice(a.as_slice());
    }
    keccak256(buf)
}
