//! Auth tickets - signed capabilities for third-party reads
//!
//! A ticket names one file or directory by its lookup hash and the client
//! allowed to read it. It travels as base64 (standard alphabet) of its JSON
//! form. For encrypted files it also carries the content key re-wrapped for
//! the recipient.

use crate::crypto::{self, CryptoError};
use crate::fileref::RefType;
use crate::identity::ClientIdentity;
use crate::SdkError;
use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AuthTicket {
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub allocation_id: String,
    #[serde(default)]
    pub file_path_hash: String,
    #[serde(default)]
    pub file_name: String,
    /// Empty means anyone holding the ticket
    #[serde(default)]
    pub recipient_client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_encryption_public_key: Option<String>,
    /// Content key wrapped for the recipient
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub re_encryption_key: Option<String>,
    #[serde(default)]
    pub reference_type: RefType,
    /// Unix seconds, 0 never expires
    #[serde(default)]
    pub expiration: i64,
    #[serde(default)]
    pub timestamp: i64,
    /// Ed25519 signature of the owner, hex
    #[serde(default)]
    pub signature: String,
}

impl AuthTicket {
    /// Digest the owner signs
    pub fn signing_payload(&self) -> Vec<u8> {
        let material = format!(
            "{}:{}:{}:{}:{}:{}:{}:{}:{}",
            self.allocation_id,
            self.recipient_client_id,
            self.owner_id,
            self.file_path_hash,
            self.file_name,
            self.reference_type,
            self.re_encryption_key.as_deref().unwrap_or_default(),
            self.expiration,
            self.timestamp,
        );
        Sha3_256::digest(material.as_bytes()).to_vec()
    }

    pub fn sign(&mut self, identity: &ClientIdentity) {
        self.signature = hex::encode(identity.sign(&self.signing_payload()));
    }

    pub fn verify(&self, owner_key: &VerifyingKey) -> Result<(), CryptoError> {
        let signature =
            hex::decode(&self.signature).map_err(|e| CryptoError::InvalidData(e.to_string()))?;
        crypto::verify_signature(owner_key, &self.signing_payload(), &signature)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expiration != 0 && self.expiration < now
    }

    pub fn encode(&self) -> Result<String, SdkError> {
        let json = serde_json::to_vec(self).map_err(|e| SdkError::Serialization(e.to_string()))?;
        Ok(STANDARD.encode(json))
    }

    /// Decode a ticket; one without a path hash is never valid
    pub fn decode(encoded: &str) -> Result<Self, SdkError> {
        let json = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SdkError::TicketDecode(format!("invalid base64: {e}")))?;
        let ticket: AuthTicket = serde_json::from_slice(&json)
            .map_err(|e| SdkError::TicketDecode(format!("invalid json: {e}")))?;

        if ticket.file_path_hash.is_empty() {
            return Err(SdkError::TicketDecode("missing file path hash".into()));
        }

        Ok(ticket)
    }
}
