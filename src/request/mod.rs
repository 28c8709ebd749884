//! Requests - one single-use command per operation kind
//!
//! Every request fans its calls out to the blobbers selected by a mask,
//! gathers all results before deciding anything, and turns the successes
//! into a mask the quorum rule is applied to.

pub(crate) mod commit_meta;
pub(crate) mod copy;
pub(crate) mod delete;
pub(crate) mod download;
pub(crate) mod list;
pub(crate) mod rename;
pub(crate) mod share;
pub(crate) mod upload;

pub use commit_meta::{CommitMetaData, DigestSubmitter, MetaTxnSubmitter};

use crate::blobber::Blobber;
use crate::consensus::{Consensus, OpMask};
use crate::status::OpKind;
use crate::transport::{BlobberTransport, CommitRequest, TransportError};
use crate::{Result, SdkError};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// What every request carries about its allocation
#[derive(Clone)]
pub(crate) struct RequestBase {
    pub allocation_id: String,
    pub allocation_tx: String,
    pub blobbers: Arc<[Blobber]>,
    pub consensus: Consensus,
    pub transport: Arc<dyn BlobberTransport>,
}

impl RequestBase {
    pub fn full_mask(&self) -> OpMask {
        OpMask::all(self.blobbers.len())
    }

    /// Call `f` with the index of every blobber in `mask` concurrently and wait for all of them
    pub async fn fan_out<'a, T, F, Fut>(&'a self, mask: OpMask, f: F) -> Vec<(usize, std::result::Result<T, TransportError>)>
    where
        F: Fn(usize, &'a Blobber) -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        let calls = mask
            .iter()
            .filter_map(|i| self.blobbers.get(i).map(|b| (i, b)))
            .map(|(i, blobber)| {
                let call = f(i, blobber);
                async move { (i, call.await) }
            });

        let results = join_all(calls).await;

        for (i, result) in &results {
            if let Err(e) = result {
                warn!(blobber = %self.blobbers[*i].id, error = %e, "blobber call failed");
            }
        }

        results
    }

    /// Ask blobbers to discard what was staged under `connection_id`
    pub async fn rollback(&self, mask: OpMask, connection_id: &str) -> OpMask {
        if mask.is_empty() {
            return mask;
        }
        warn!(allocation = %self.allocation_id, %mask, connection_id, "rolling back");

        let results = self
            .fan_out(mask, |_, b| self.transport.rollback(b, &self.allocation_id, connection_id))
            .await;
        success_mask(&results)
    }

    /// Stage a change on `mask`, then commit it where the staging succeeded
    ///
    /// Both phases must reach quorum. Blobbers that staged the change are
    /// rolled back when either phase falls short.
    pub async fn act_and_commit<'a, F, Fut>(
        &'a self,
        op: OpKind,
        mask: OpMask,
        connection_id: &'a str,
        act: F,
    ) -> Result<OpMask>
    where
        F: Fn(usize, &'a Blobber) -> Fut,
        Fut: Future<Output = std::result::Result<(), TransportError>>,
    {
        let acted = success_mask(&self.fan_out(mask, act).await);
        debug!(allocation = %self.allocation_id, %op, %acted, "act phase finished");

        if !self.consensus.is_met_by(acted) {
            self.rollback(acted, connection_id).await;
            return Err(self.not_reached(op, acted));
        }

        let commit = CommitRequest {
            allocation_id: self.allocation_id.clone(),
            connection_id: connection_id.to_string(),
            upload: None,
        };
        let committed = success_mask(&self.fan_out(acted, |_, b| self.transport.commit(b, &commit)).await);

        if !self.consensus.is_met_by(committed) {
            self.rollback(acted.intersect(committed.complement(self.full_mask())), connection_id)
                .await;
            return Err(self.not_reached(op, committed));
        }

        Ok(committed)
    }

    pub fn not_reached(&self, operation: OpKind, mask: OpMask) -> SdkError {
        not_reached(operation, mask, &self.consensus)
    }
}

pub(crate) fn not_reached(operation: OpKind, mask: OpMask, consensus: &Consensus) -> SdkError {
    SdkError::ConsensusNotReached {
        operation,
        successes: mask.popcount(),
        required: consensus.required(),
    }
}

/// Mask of the blobbers whose call succeeded
pub(crate) fn success_mask<T>(results: &[(usize, std::result::Result<T, TransportError>)]) -> OpMask {
    results
        .iter()
        .filter(|(_, r)| r.is_ok())
        .map(|(i, _)| *i)
        .collect()
}

/// Fresh connection id scoping one request's staged changes
pub(crate) fn new_connection_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
