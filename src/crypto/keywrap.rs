//! Wrapping content keys for a recipient's X25519 public key
//!
//! A fresh ephemeral key agrees a shared secret with the recipient, HKDF
//! turns it into a key-encryption key and AES-256-GCM seals the content key.
//! Wire form: base64(ephemeral public key (32 bytes) || sealed key).

use super::{CryptoError, EncryptionKey};
use base64::{engine::general_purpose::STANDARD, Engine};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

const WRAP_INFO: &[u8] = b"allocation-sdk-content-key-wrap";

fn key_encryption_key(
    shared: &[u8; 32],
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> Result<EncryptionKey, CryptoError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral.as_bytes());
    salt[32..].copy_from_slice(recipient.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut kek = [0u8; 32];
    hk.expand(WRAP_INFO, &mut kek)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    Ok(EncryptionKey::new(kek))
}

/// Seal `content_key` so only the holder of `recipient`'s secret can open it
pub fn wrap_key(recipient: &PublicKey, content_key: &EncryptionKey) -> Result<String, CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);

    let kek = key_encryption_key(shared.as_bytes(), &ephemeral_public, recipient)?;
    let sealed = kek.seal(content_key.as_bytes(), ephemeral_public.as_bytes())?;

    let mut out = Vec::with_capacity(32 + sealed.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&sealed);

    Ok(STANDARD.encode(out))
}

/// Open a key sealed by [`wrap_key`]
pub fn unwrap_key(secret: &StaticSecret, wrapped: &str) -> Result<EncryptionKey, CryptoError> {
    let raw = STANDARD
        .decode(wrapped.trim())
        .map_err(|e| CryptoError::InvalidData(e.to_string()))?;
    if raw.len() <= 32 {
        return Err(CryptoError::InvalidData("Wrapped key too short".into()));
    }

    let mut ephemeral = [0u8; 32];
    ephemeral.copy_from_slice(&raw[..32]);
    let ephemeral = PublicKey::from(ephemeral);
    let recipient = PublicKey::from(secret);

    let shared = secret.diffie_hellman(&ephemeral);
    let kek = key_encryption_key(shared.as_bytes(), &ephemeral, &recipient)?;

    let key: [u8; 32] = kek
        .open(&raw[32..], ephemeral.as_bytes())?
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("Unwrapped key has wrong length".into()))?;

    Ok(EncryptionKey::new(key))
}

/// Parse a hex encoded X25519 public key
pub fn parse_public_key(hex_key: &str) -> Result<PublicKey, CryptoError> {
    let bytes: [u8; 32] = hex::decode(hex_key.trim())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("Public key must be 32 bytes".into()))?;
    Ok(PublicKey::from(bytes))
}
