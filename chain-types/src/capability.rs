//! Crypto capabilities the core treats as injected dependencies: hashing,
//! signature verification and Merkle root computation. The core never
//! hard-codes an algorithm choice behind these traits; `DefaultCapabilities`
//! is the concrete implementation a node wires in by default, built from
//! ML-DSA (CRYSTALS-Dilithium) post-quantum signatures and Keccak hashing.

use crate::hash::Hash256;
use pqcrypto_dilithium::dilithium5;
use pqcrypto_traits::sign::{
    PublicKey as PqcPublicKeyTrait, SecretKey as PqcSecretKeyTrait, SignedMessage,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// `sha256(bytes) -> 32-byte digest`.
pub trait HashCapability: Send + Sync {
    fn hash(&self, data: &[u8]) -> Hash256;
}

/// `verify(pubkey, msg, sig) -> bool`.
pub trait SignatureCapability: Send + Sync {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

/// `root(list<leaf>) -> 32-byte digest`.
pub trait MerkleCapability: Send + Sync {
    fn root(&self, leaves: &[Hash256]) -> Hash256;
}

/// Bundles all three capabilities so components take one handle instead of
/// three separate trait objects.
pub trait Capabilities: Send + Sync {
    fn hash(&self) -> &dyn HashCapability;
    fn signature(&self) -> &dyn SignatureCapability;
    fn merkle(&self) -> &dyn MerkleCapability;
}

/// Default capability set: Keccak-256 for hashing/Merkle, ML-DSA-65 for
/// signature verification.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCapabilities;

impl HashCapability for DefaultCapabilities {
    fn hash(&self, data: &[u8]) -> Hash256 {
        Hash256::sha256(data)
    }
}

impl SignatureCapability for DefaultCapabilities {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(public_key) = dilithium5::PublicKey::from_bytes(public_key) else {
            return false;
        };
        let Ok(signed_message) = SignedMessage::from_bytes(signature) else {
            return false;
        };
        dilithium5::open(&signed_message, &public_key)
            .map(|opened| opened == message)
            .unwrap_or(false)
    }
}

impl MerkleCapability for DefaultCapabilities {
    /// Pairwise-Keccak binary tree, odd nodes duplicated, generalized to
    /// operate on pre-hashed leaves rather than transactions directly.
    fn root(&self, leaves: &[Hash256]) -> Hash256 {
        if leaves.is_empty() {
            return Hash256::zero();
        }
        let mut level: Vec<Hash256> = leaves.to_vec();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            for chunk in level.chunks(2) {
                let mut data = Vec::with_capacity(64);
                data.extend_from_slice(chunk[0].as_bytes());
                data.extend_from_slice(chunk.get(1).unwrap_or(&chunk[0]).as_bytes());
                next.push(Hash256::keccak256(&data));
            }
            level = next;
        }
        level[0]
    }
}

impl Capabilities for DefaultCapabilities {
    fn hash(&self) -> &dyn HashCapability {
        self
    }

    fn signature(&self) -> &dyn SignatureCapability {
        self
    }

    fn merkle(&self) -> &dyn MerkleCapability {
        self
    }
}

/// ML-DSA-65 keypair, retained for tests and tools that need to produce
/// signatures the `DefaultCapabilities::verify` implementation will accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKey {
    key_data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PrivateKey {
    key_data: Vec<u8>,
}

impl Zeroize for PrivateKey {
    fn zeroize(&mut self) {
        self.key_data.zeroize();
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: PublicKey,
    private_key: PrivateKey,
}

impl KeyPair {
    /// # Errors
    /// Returns an error if the underlying PQC library fails to produce a keypair.
    pub fn generate() -> Result<Self, String> {
        let (public_key_bytes, secret_key_bytes) = dilithium5::keypair();
        Ok(Self {
            public_key: PublicKey {
                key_data: public_key_bytes.as_bytes().to_vec(),
            },
            private_key: PrivateKey {
                key_data: secret_key_bytes.as_bytes().to_vec(),
            },
        })
    }

    #[must_use]
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key.key_data
    }

    /// # Errors
    /// Returns an error if the stored private key bytes are malformed.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, String> {
        let secret_key = dilithium5::SecretKey::from_bytes(&self.private_key.key_data)
            .map_err(|_| "invalid private key bytes".to_string())?;
        let signed = dilithium5::sign(message, &secret_key);
        Ok(signed.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trips() {
        let keypair = KeyPair::generate().unwrap();
        let message = b"block header bytes";
        let signature = keypair.sign(message).unwrap();

        let caps = DefaultCapabilities;
        assert!(caps.verify(keypair.public_key_bytes(), message, &signature));
        assert!(!caps.verify(keypair.public_key_bytes(), b"tampered", &signature));
    }

    #[test]
    fn merkle_root_is_deterministic_and_sensitive_to_order() {
        let caps = DefaultCapabilities;
        let a = Hash256::keccak256(b"a");
        let b = Hash256::keccak256(b"b");
        let root_ab = caps.root(&[a, b]);
        let root_ba = caps.root(&[b, a]);
        assert_ne!(root_ab, root_ba);
        assert_eq!(root_ab, caps.root(&[a, b]));
    }

    #[test]
    fn merkle_root_of_single_leaf_duplicates_it() {
        let caps = DefaultCapabilities;
        let a = Hash256::keccak256(b"only");
        let expected = Hash256::keccak256(&[a.as_bytes().as_slice(), a.as_bytes().as_slice()].concat());
        assert_eq!(caps.root(&[a]), expected);
    }

    #[test]
    fn empty_leaves_yield_zero_root() {
        let caps = DefaultCapabilities;
        assert_eq!(caps.root(&[]), Hash256::zero());
    }
}
