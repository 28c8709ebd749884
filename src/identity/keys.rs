//! X25519 key pair used to receive wrapped content keys

use x25519_dalek::{PublicKey, StaticSecret};

#[derive(Clone)]
pub struct EncryptionKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EncryptionKeyPair {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Hex form handed to owners that share encrypted files with us
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }
}
