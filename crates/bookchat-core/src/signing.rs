//! Signing engine.
//!
//! Messages are hashed with a domain-separated Blake3 hasher and the 32-byte
//! digest is what Ed25519 signs. Verification cost after hashing is therefore
//! independent of content length.

use crate::crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
use crate::error::SignatureError;

/// Domain prefix mixed into every signing digest.
pub const SIGN_DOMAIN: &[u8] = b"bookchat-sign-v1:";

/// Stateless sign/verify over record messages.
pub struct SigningEngine;

impl SigningEngine {
    /// Digest of a message as signed.
    pub fn digest(message: &[u8]) -> Blake3Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(SIGN_DOMAIN);
        hasher.update(message);
        Blake3Hash::from_bytes(*hasher.finalize().as_bytes())
    }

    /// Sign a message. Always 64 bytes.
    pub fn sign(message: &[u8], keypair: &Keypair) -> Ed25519Signature {
        keypair.sign(Self::digest(message).as_bytes())
    }

    /// Verify `signature` over `message` under `key`.
    pub fn verify(
        message: &[u8],
        signature: &[u8],
        key: &Ed25519PublicKey,
    ) -> Result<(), SignatureError> {
        key.verify(Self::digest(message).as_bytes(), signature)
    }

    /// Like [`verify`](Self::verify), collapsed to a bool. Never fails.
    pub fn is_valid(message: &[u8], signature: &[u8], key: &Ed25519PublicKey) -> bool {
        Self::verify(message, signature, key).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let keypair = Keypair::generate();
        let sig = SigningEngine::sign(b"content", &keypair);

        assert!(SigningEngine::verify(b"content", sig.as_bytes(), &keypair.public_key()).is_ok());
    }

    #[test]
    fn test_wrong_key_is_mismatch() {
        let signer = Keypair::from_seed(&[1u8; 32]);
        let other = Keypair::from_seed(&[2u8; 32]);
        let sig = SigningEngine::sign(b"content", &signer);

        assert_eq!(
            SigningEngine::verify(b"content", sig.as_bytes(), &other.public_key()),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_bit_flip_is_mismatch() {
        let keypair = Keypair::from_seed(&[1u8; 32]);
        let message = b"the quick brown fox".to_vec();
        let sig = SigningEngine::sign(&message, &keypair);

        for i in 0..message.len() * 8 {
            let mut flipped = message.clone();
            flipped[i / 8] ^= 1 << (i % 8);
            assert_eq!(
                SigningEngine::verify(&flipped, sig.as_bytes(), &keypair.public_key()),
                Err(SignatureError::Mismatch)
            );
        }
    }

    #[test]
    fn test_malformed_lengths() {
        let keypair = Keypair::from_seed(&[1u8; 32]);
        for len in [0usize, 1, 63, 65, 128] {
            let sig = vec![0u8; len];
            assert_eq!(
                SigningEngine::verify(b"x", &sig, &keypair.public_key()),
                Err(SignatureError::Malformed { len })
            );
            assert!(!SigningEngine::is_valid(b"x", &sig, &keypair.public_key()));
        }
    }

    #[test]
    fn test_domain_separated() {
        // A raw Ed25519 signature over the message itself is not accepted.
        let keypair = Keypair::from_seed(&[1u8; 32]);
        let raw = keypair.sign(b"content");
        assert!(!SigningEngine::is_valid(b"content", raw.as_bytes(), &keypair.public_key()));
        assert_ne!(SigningEngine::digest(b"content"), Blake3Hash::hash(b"content"));
    }
}
