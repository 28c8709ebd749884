//! Identity Module - the client wallet an allocation is operated with
//!
//! A wallet is derived from a BIP39 mnemonic. It carries the Ed25519 keys
//! used to sign auth tickets and the X25519 keys used to receive content
//! keys of encrypted files.

mod keys;
mod seed;

pub use keys::EncryptionKeyPair;
pub use seed::SeedPhrase;

use crate::crypto::{self, keywrap, EncryptionKey, SigningKeyPair};
use ed25519_dalek::VerifyingKey;
use sha3::{Digest, Sha3_256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid seed phrase: {0}")]
    InvalidSeedPhrase(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] crypto::CryptoError),
}

/// Client wallet
#[derive(Clone)]
pub struct ClientIdentity {
    signing_keys: SigningKeyPair,
    encryption_keys: EncryptionKeyPair,
    client_id: String,
}

impl ClientIdentity {
    /// Generate a new wallet with a fresh 24 word mnemonic
    /// Returns the identity and the mnemonic (MUST be saved by the user)
    pub fn generate(password: Option<&str>) -> Result<(Self, String), IdentityError> {
        let phrase = SeedPhrase::generate(24)?.phrase();
        let identity = Self::from_seed_phrase(&phrase, password)?;
        Ok((identity, phrase))
    }

    /// Recover a wallet from its mnemonic
    pub fn from_seed_phrase(mnemonic: &str, password: Option<&str>) -> Result<Self, IdentityError> {
        let master_seed = SeedPhrase::from_phrase(mnemonic)?.to_seed(password.unwrap_or(""));

        let signing_keys = Self::derive_signing_keys(&master_seed)?;
        let encryption_keys =
            EncryptionKeyPair::from_bytes(Self::derive(&master_seed, b"x25519-encryption-key")?);
        let client_id = Self::derive_client_id(&signing_keys.verifying_key);

        Ok(Self {
            signing_keys,
            encryption_keys,
            client_id,
        })
    }

    fn derive(master_seed: &[u8; 64], info: &[u8]) -> Result<[u8; 32], IdentityError> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(b"allocation-sdk-wallet"), master_seed);
        let mut out = [0u8; 32];
        hk.expand(info, &mut out)
            .map_err(|e| IdentityError::KeyDerivation(e.to_string()))?;
        Ok(out)
    }

    fn derive_signing_keys(master_seed: &[u8; 64]) -> Result<SigningKeyPair, IdentityError> {
        Ok(SigningKeyPair::from_secret(&Self::derive(master_seed, b"ed25519-signing-key")?))
    }

    /// Client id: SHA3-256 of the public signing key, hex encoded
    fn derive_client_id(verifying_key: &VerifyingKey) -> String {
        hex::encode(Sha3_256::digest(verifying_key.as_bytes()))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Hex encoded Ed25519 public key
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_keys.verifying_key.as_bytes())
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.signing_keys.verifying_key
    }

    pub fn encryption_keys(&self) -> &EncryptionKeyPair {
        &self.encryption_keys
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_keys.sign(message)
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        self.signing_keys.verify(message, signature).is_ok()
    }

    /// Wrap a content key for this wallet
    pub fn wrap_for_self(&self, content_key: &EncryptionKey) -> Result<String, IdentityError> {
        Ok(keywrap::wrap_key(self.encryption_keys.public_key(), content_key)?)
    }

    /// Open a content key wrapped for this wallet
    pub fn unwrap(&self, wrapped: &str) -> Result<EncryptionKey, IdentityError> {
        Ok(keywrap::unwrap_key(self.encryption_keys.secret(), wrapped)?)
    }
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}
