//! Meta commits: record a metadata change on chain and on the blobbers

use super::{not_reached, success_mask, RequestBase};
use crate::fileref::ConsolidatedFileMeta;
use crate::status::{OpKind, StatusHandle};
use crate::transport::{RefQuery, TransportError};
use crate::{Result, SdkError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::sync::Arc;
use tracing::{error, info};

/// Submits a meta-commit payload as a transaction
#[async_trait]
pub trait MetaTxnSubmitter: Send + Sync {
    /// Returns the transaction hash
    async fn submit(&self, payload: &str) -> std::result::Result<String, TransportError>;
}

/// Uses the payload digest as transaction hash, for clients without a chain connection
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestSubmitter;

#[async_trait]
impl MetaTxnSubmitter for DigestSubmitter {
    async fn submit(&self, payload: &str) -> std::result::Result<String, TransportError> {
        Ok(hex::encode(Sha3_256::digest(payload.as_bytes())))
    }
}

/// Payload of a meta-commit transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitMetaData {
    pub crud_type: String,
    pub meta_data: ConsolidatedFileMeta,
}

pub(crate) struct CommitMetaRequest {
    pub base: RequestBase,
    pub submitter: Arc<dyn MetaTxnSubmitter>,
    pub data: CommitMetaData,
    pub query: RefQuery,
    pub status: Option<StatusHandle>,
}

impl CommitMetaRequest {
    pub async fn process(self) -> Result<()> {
        let payload =
            serde_json::to_string(&self.data).map_err(|e| SdkError::Serialization(e.to_string()))?;

        let outcome = self.run(&payload).await;

        if let Some(status) = &self.status {
            match &outcome {
                Ok(txn) => status.commit_meta_completed(&payload, txn, None),
                Err(e) => status.commit_meta_completed(&payload, "", Some(e)),
            }
        }

        outcome.map(|_| ())
    }

    async fn run(&self, payload: &str) -> Result<String> {
        let txn = self.submitter.submit(payload).await.map_err(|e| {
            error!(error = %e, "meta transaction rejected");
            SdkError::Transport(e)
        })?;

        let results = self
            .base
            .fan_out(self.base.full_mask(), |_, b| {
                self.base.transport.add_commit_meta_txn(b, &self.query, &txn)
            })
            .await;
        let recorded = success_mask(&results);

        if !self.base.consensus.is_met_by(recorded) {
            return Err(not_reached(OpKind::CommitMeta, recorded, &self.base.consensus));
        }

        info!(
            allocation = %self.base.allocation_id,
            path = %self.data.meta_data.path,
            crud = %self.data.crud_type,
            %txn,
            "meta transaction committed"
        );
        Ok(txn)
    }
}
