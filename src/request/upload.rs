//! Upload, update and repair of one file
//!
//! Content is (optionally) encrypted, cut into chunks of `chunk_size * D`
//! bytes and every chunk is erasure coded into one shard per blobber.
//! Blobbers that fail a chunk leave the upload mask; the mask has to keep
//! meeting the quorum after every chunk and at commit.

use super::{not_reached, success_mask, RequestBase};
use crate::consensus::{Consensus, OpMask};
use crate::crypto::{ContentHash, EncryptionKey, FileEncryptor};
use crate::erasure::{ErasureCoder, ErasureConfig};
use crate::fileref::FileRef;
use crate::identity::ClientIdentity;
use crate::status::{OpKind, StatusHandle};
use crate::transport::{CommitRequest, ShardUpload, UploadMeta};
use crate::{path, Result, SdkError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub(crate) struct UploadRequest {
    pub base: RequestBase,
    pub coder: Arc<dyn ErasureCoder>,
    pub erasure: ErasureConfig,
    pub identity: Arc<ClientIdentity>,
    /// Blobbers receiving shards
    pub mask: OpMask,
    /// Quorum the upload mask is held to; narrowed for repairs
    pub consensus: Consensus,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub thumbnail_path: Option<PathBuf>,
    pub chunk_size: usize,
    pub is_update: bool,
    pub encrypt: bool,
    /// Quorum reference of the object being repaired
    pub repair_of: Option<FileRef>,
    pub status: Option<StatusHandle>,
    pub connection_id: String,
}

/// Masks carried across the chunks of one upload
struct Progress {
    mask: OpMask,
    touched: OpMask,
    sent: u64,
}

impl UploadRequest {
    fn op(&self) -> OpKind {
        if self.repair_of.is_some() {
            OpKind::Repair
        } else {
            OpKind::Upload
        }
    }

    pub async fn process(self, token: CancellationToken) -> Result<()> {
        let op = self.op();
        let mut progress = Progress {
            mask: self.mask,
            touched: OpMask::empty(),
            sent: 0,
        };

        info!(
            allocation = %self.base.allocation_id,
            local = %self.local_path.display(),
            remote = %self.remote_path,
            mask = %self.mask,
            %op,
            "upload started"
        );

        match self.run(&token, &mut progress).await {
            Ok(meta) => {
                info!(remote = %self.remote_path, committed = %progress.mask, "upload committed");
                if let Some(status) = &self.status {
                    status.completed(
                        &self.base.allocation_id,
                        &self.remote_path,
                        op,
                        meta.actual_size,
                        &meta.mime_type,
                    );
                    if op == OpKind::Repair {
                        status.repair_completed(1);
                    }
                }
                Ok(())
            }
            Err(e) => {
                error!(remote = %self.remote_path, error = %e, "upload failed");
                self.base.rollback(progress.touched, &self.connection_id).await;
                if let Some(status) = &self.status {
                    status.error(&self.base.allocation_id, &self.remote_path, op, &e);
                }
                Err(e)
            }
        }
    }

    async fn run(&self, token: &CancellationToken, progress: &mut Progress) -> Result<UploadMeta> {
        let content = tokio::fs::read(&self.local_path)
            .await
            .map_err(|e| SdkError::LocalIo(format!("{}: {e}", self.local_path.display())))?;

        let thumbnail = match &self.thumbnail_path {
            Some(p) => match tokio::fs::read(p).await {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(thumbnail = %p.display(), error = %e, "thumbnail skipped");
                    None
                }
            },
            None => None,
        };

        let actual_hash = ContentHash::hash(&content).to_hex();
        let actual_size = content.len() as u64;

        let chunk_size = self
            .repair_of
            .as_ref()
            .map_or(self.chunk_size, |r| r.chunk_size as usize)
            .max(1);

        if let Some(existing) = &self.repair_of {
            if existing.actual_file_hash != actual_hash {
                return Err(SdkError::IntegrityCheckFailed(format!(
                    "{} differs from the stored content",
                    self.local_path.display()
                )));
            }
        }

        let (stored, encrypted_key) = if self.encrypt {
            let key = EncryptionKey::generate();
            let stored = FileEncryptor::new(key.clone()).encrypt_file(&content)?.to_bytes()?;
            (stored, Some(self.identity.wrap_for_self(&key)?))
        } else {
            (content, None)
        };

        if let Some(status) = &self.status {
            let total = stored.len() + thumbnail.as_ref().map_or(0, Vec::len);
            status.started(&self.base.allocation_id, &self.remote_path, self.op(), total as u64);
        }

        self.send(&stored, false, chunk_size, token, progress).await?;
        if let Some(thumbnail) = &thumbnail {
            self.send(thumbnail, true, chunk_size, token, progress).await?;
        }

        let mut meta = UploadMeta {
            name: path::file_name(&self.remote_path).to_string(),
            path: self.remote_path.clone(),
            mime_type: mime_guess::from_path(&self.remote_path)
                .first_or_octet_stream()
                .to_string(),
            size: stored.len() as u64,
            actual_size,
            actual_hash,
            chunk_size: chunk_size as u64,
            encrypted_key,
            is_update: self.is_update,
            is_repair: self.repair_of.is_some(),
            ..Default::default()
        };

        match (&self.repair_of, &thumbnail) {
            (Some(existing), _) => {
                meta.mime_type = existing.mime_type.clone();
                meta.thumbnail_size = existing.thumbnail_size;
                meta.actual_thumbnail_size = existing.actual_thumbnail_size;
                meta.actual_thumbnail_hash = existing.actual_thumbnail_hash.clone();
            }
            (None, Some(thumbnail)) => {
                meta.thumbnail_size = thumbnail.len() as u64;
                meta.actual_thumbnail_size = thumbnail.len() as u64;
                meta.actual_thumbnail_hash = ContentHash::hash(thumbnail).to_hex();
            }
            (None, None) => {}
        }

        self.commit(&meta, progress).await?;
        Ok(meta)
    }

    /// Erasure code `data` chunk by chunk and send every blobber its shard
    async fn send(
        &self,
        data: &[u8],
        is_thumbnail: bool,
        chunk_size: usize,
        token: &CancellationToken,
        progress: &mut Progress,
    ) -> Result<()> {
        let chunk_bytes = chunk_size * self.erasure.data_shards;

        for (index, chunk) in data.chunks(chunk_bytes).enumerate() {
            if token.is_cancelled() {
                return Err(SdkError::Cancelled);
            }

            let uploads: Vec<ShardUpload> = self
                .coder
                .encode(chunk, self.erasure)?
                .into_iter()
                .map(|shard| ShardUpload {
                    allocation_id: self.base.allocation_id.clone(),
                    connection_id: self.connection_id.clone(),
                    path: self.remote_path.clone(),
                    chunk_index: index as u64,
                    data: shard,
                    is_thumbnail,
                })
                .collect();

            let results = self
                .base
                .fan_out(progress.mask, |i, b| self.base.transport.upload_shard(b, &uploads[i]))
                .await;

            let acked = success_mask(&results);
            progress.touched = progress.touched.union(acked);
            progress.mask = acked;

            if !self.consensus.is_met_by(progress.mask) {
                return Err(not_reached(self.op(), progress.mask, &self.consensus));
            }

            progress.sent += chunk.len() as u64;
            if let Some(status) = &self.status {
                status.in_progress(&self.base.allocation_id, &self.remote_path, self.op(), progress.sent);
            }
        }

        Ok(())
    }

    async fn commit(&self, meta: &UploadMeta, progress: &mut Progress) -> Result<()> {
        let request = CommitRequest {
            allocation_id: self.base.allocation_id.clone(),
            connection_id: self.connection_id.clone(),
            upload: Some(meta.clone()),
        };

        let results = self
            .base
            .fan_out(progress.mask, |_, b| self.base.transport.commit(b, &request))
            .await;
        progress.mask = success_mask(&results);

        if !self.consensus.is_met_by(progress.mask) {
            return Err(not_reached(self.op(), progress.mask, &self.consensus));
        }

        Ok(())
    }
}
