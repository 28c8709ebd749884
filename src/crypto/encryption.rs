//! Content encryption using AES-256-GCM
//!
//! Encrypted uploads are sealed chunk by chunk before erasure coding, so the
//! blobbers only ever hold ciphertext shards. Every chunk is bound to its
//! position through the associated data; reordered or truncated content
//! fails to open.

use super::CryptoError;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;

/// Plaintext bytes per sealed chunk
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// AES-256-GCM key of one file, or a key-encryption key
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    key: [u8; KEY_SIZE],
}

impl EncryptionKey {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
    }

    /// Seal under a random nonce: nonce || ciphertext || tag
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let sealed = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::DecryptionFailed("sealed data too short".into()));
        }
        let (nonce, body) = sealed.split_at(NONCE_SIZE);

        self.cipher()
            .decrypt(Nonce::from_slice(nonce), Payload { msg: body, aad })
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Associated data of chunk `index` in a file of `total` chunks
fn chunk_aad(index: usize, total: usize) -> [u8; 16] {
    let mut aad = [0u8; 16];
    aad[..8].copy_from_slice(&(index as u64).to_le_bytes());
    aad[8..].copy_from_slice(&(total as u64).to_le_bytes());
    aad
}

/// Seals whole files chunk by chunk
pub struct FileEncryptor {
    key: EncryptionKey,
    chunk_size: usize,
}

impl FileEncryptor {
    pub fn new(key: EncryptionKey) -> Self {
        Self {
            key,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn encrypt_file(&self, data: &[u8]) -> Result<EncryptedFile, CryptoError> {
        let total = data.len().div_ceil(self.chunk_size);
        let chunks = data
            .chunks(self.chunk_size)
            .enumerate()
            .map(|(i, chunk)| self.key.seal(chunk, &chunk_aad(i, total)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EncryptedFile {
            original_size: data.len() as u64,
            chunks,
        })
    }

    pub fn decrypt_file(&self, encrypted: &EncryptedFile) -> Result<Vec<u8>, CryptoError> {
        let total = encrypted.chunks.len();
        let mut plaintext = Vec::with_capacity(encrypted.original_size as usize);

        for (i, sealed) in encrypted.chunks.iter().enumerate() {
            plaintext.extend_from_slice(&self.key.open(sealed, &chunk_aad(i, total))?);
        }

        if plaintext.len() as u64 != encrypted.original_size {
            return Err(CryptoError::InvalidData(format!(
                "decrypted {} bytes, expected {}",
                plaintext.len(),
                encrypted.original_size
            )));
        }

        Ok(plaintext)
    }
}

/// Sealed chunks of one file, as stored on the blobbers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedFile {
    pub original_size: u64,
    pub chunks: Vec<Vec<u8>>,
}

impl EncryptedFile {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        bincode::serialize(self).map_err(|e| CryptoError::InvalidData(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        bincode::deserialize(bytes).map_err(|e| CryptoError::InvalidData(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let key = EncryptionKey::generate();
        let sealed = key.seal(b"shard payload", b"ctx").unwrap();

        assert_eq!(key.open(&sealed, b"ctx").unwrap(), b"shard payload");
        assert!(key.open(&sealed, b"other").is_err());
        assert!(EncryptionKey::generate().open(&sealed, b"ctx").is_err());
        assert!(key.open(&sealed[..10], b"ctx").is_err());
    }

    #[test]
    fn test_file_survives_byte_layout() {
        let encryptor = FileEncryptor::new(EncryptionKey::generate()).with_chunk_size(1024);
        let data: Vec<u8> = (0..5000).map(|i| (i % 256) as u8).collect();

        let encrypted = encryptor.encrypt_file(&data).unwrap();
        assert_eq!(encrypted.chunk_count(), 5);

        let restored = EncryptedFile::from_bytes(&encrypted.to_bytes().unwrap()).unwrap();
        assert_eq!(encryptor.decrypt_file(&restored).unwrap(), data);
    }

    #[test]
    fn test_reordered_chunks_rejected() {
        let encryptor = FileEncryptor::new(EncryptionKey::generate()).with_chunk_size(4);
        let mut encrypted = encryptor.encrypt_file(b"abcdefgh").unwrap();
        encrypted.chunks.swap(0, 1);
        assert!(encryptor.decrypt_file(&encrypted).is_err());

        let mut truncated = encryptor.encrypt_file(b"abcdefgh").unwrap();
        truncated.chunks.pop();
        truncated.original_size = 4;
        assert!(encryptor.decrypt_file(&truncated).is_err());
    }

    #[test]
    fn test_empty_file() {
        let encryptor = FileEncryptor::new(EncryptionKey::generate());
        let encrypted = encryptor.encrypt_file(&[]).unwrap();
        assert_eq!(encrypted.chunk_count(), 0);
        assert!(encryptor.decrypt_file(&encrypted).unwrap().is_empty());
    }
}
