//! Cryptography Module - content encryption, signatures and key sharing
//!
//! Provides AES-256-GCM content encryption, Ed25519 signatures, BLAKE3
//! content hashes and X25519 wrapping of per-file content keys.

pub mod encryption;
mod hashing;
pub mod keywrap;

pub use encryption::{EncryptedFile, EncryptionKey, FileEncryptor};
pub use hashing::ContentHash;

use ed25519_dalek::{SigningKey, VerifyingKey};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Signature verification failed")]
    SignatureVerificationFailed,
}

/// Ed25519 keys signing auth tickets
#[derive(Clone)]
pub struct SigningKeyPair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl SigningKeyPair {
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self {
            verifying_key: signing_key.verifying_key(),
            signing_key,
        }
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        use ed25519_dalek::Signer;
        self.signing_key.sign(message).to_bytes().to_vec()
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        verify_signature(&self.verifying_key, message, signature)
    }
}

/// Check a raw 64-byte Ed25519 signature
pub fn verify_signature(
    verifying_key: &VerifyingKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    use ed25519_dalek::{Signature, Verifier};

    let signature = <[u8; 64]>::try_from(signature)
        .map(|bytes| Signature::from_bytes(&bytes))
        .map_err(|_| CryptoError::InvalidData(format!("signature of {} bytes", signature.len())))?;

    verifying_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}

/// Secure random 32-byte array
pub fn random_32_bytes() -> [u8; 32] {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
