//! Share: issue a signed auth ticket for a path

use super::list::ListRequest;
use super::RequestBase;
use crate::crypto::keywrap;
use crate::fileref::RefType;
use crate::identity::ClientIdentity;
use crate::status::OpKind;
use crate::ticket::AuthTicket;
use crate::transport::RefQuery;
use crate::{path, Result};
use std::sync::Arc;
use tracing::info;

pub(crate) struct ShareRequest {
    pub base: RequestBase,
    pub identity: Arc<ClientIdentity>,
    pub owner_id: String,
    pub remote_path: String,
    pub recipient_client_id: String,
    /// Hex X25519 key of the recipient, needed for encrypted files
    pub recipient_encryption_public_key: Option<String>,
    /// Unix seconds, 0 never expires
    pub expiration: i64,
}

impl ShareRequest {
    fn ticket(&self, reference_type: RefType, re_encryption_key: Option<String>) -> AuthTicket {
        let mut ticket = AuthTicket {
            owner_id: self.owner_id.clone(),
            allocation_id: self.base.allocation_id.clone(),
            file_path_hash: path::lookup_hash(&self.base.allocation_id, &self.remote_path),
            file_name: path::file_name(&self.remote_path).to_string(),
            recipient_client_id: self.recipient_client_id.clone(),
            recipient_encryption_public_key: self.recipient_encryption_public_key.clone(),
            re_encryption_key,
            reference_type,
            expiration: self.expiration,
            timestamp: chrono::Utc::now().timestamp(),
            signature: String::new(),
        };
        ticket.sign(&self.identity);
        ticket
    }

    /// Ticket without looking at the blobbers
    pub fn plain(&self, reference_type: RefType) -> Result<String> {
        self.ticket(reference_type, None).encode()
    }

    /// Ticket for the object as the blobbers currently hold it
    ///
    /// The content key of an encrypted file is re-wrapped for the recipient.
    pub async fn resolve(&self) -> Result<String> {
        let query = RefQuery::path(&self.base.allocation_id, &self.remote_path);
        let file_ref = ListRequest::new(self.base.clone(), query)
            .file_ref(OpKind::Share)
            .await?;

        let re_encryption_key = match (&file_ref.encrypted_key, &self.recipient_encryption_public_key) {
            (Some(owner_key), Some(recipient)) => {
                let content_key = self.identity.unwrap(owner_key)?;
                let recipient = keywrap::parse_public_key(recipient)?;
                Some(keywrap::wrap_key(&recipient, &content_key)?)
            }
            _ => None,
        };

        info!(
            allocation = %self.base.allocation_id,
            path = %self.remote_path,
            recipient = %self.recipient_client_id,
            encrypted = re_encryption_key.is_some(),
            "auth ticket issued"
        );

        self.ticket(file_ref.ref_type, re_encryption_key).encode()
    }
}
