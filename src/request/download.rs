//! Download of a file or its thumbnail
//!
//! The blobbers agreeing on the file's reference are asked for ranges of
//! blocks; every chunk is decoded as soon as D of its shards are present.

use super::list::ListRequest;
use super::{not_reached, RequestBase};
use crate::crypto::{ContentHash, EncryptedFile, FileEncryptor};
use crate::erasure::{ErasureCoder, ErasureConfig};
use crate::fileref::FileRef;
use crate::identity::ClientIdentity;
use crate::status::{OpKind, StatusHandle};
use crate::ticket::AuthTicket;
use crate::transport::{BlockRequest, RefQuery};
use crate::{Result, SdkError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub(crate) struct DownloadRequest {
    pub base: RequestBase,
    pub coder: Arc<dyn ErasureCoder>,
    pub erasure: ErasureConfig,
    pub identity: Arc<ClientIdentity>,
    pub query: RefQuery,
    /// Remote path or lookup hash, used in status reports
    pub remote_label: String,
    pub local_path: PathBuf,
    pub thumbnail: bool,
    pub blocks_per_download: u64,
    pub ticket: Option<AuthTicket>,
    pub status: Option<StatusHandle>,
}

impl DownloadRequest {
    pub async fn process(self, token: CancellationToken) -> Result<()> {
        info!(
            allocation = %self.base.allocation_id,
            remote = %self.remote_label,
            local = %self.local_path.display(),
            thumbnail = self.thumbnail,
            "download started"
        );

        match self.run(&token).await {
            Ok((size, mime_type)) => {
                info!(remote = %self.remote_label, size, "download finished");
                if let Some(status) = &self.status {
                    status.completed(
                        &self.base.allocation_id,
                        &self.remote_label,
                        OpKind::Download,
                        size,
                        &mime_type,
                    );
                }
                Ok(())
            }
            Err(e) => {
                error!(remote = %self.remote_label, error = %e, "download failed");
                if let Some(status) = &self.status {
                    status.error(&self.base.allocation_id, &self.remote_label, OpKind::Download, &e);
                }
                Err(e)
            }
        }
    }

    async fn run(&self, token: &CancellationToken) -> Result<(u64, String)> {
        let consensus = ListRequest::new(self.base.clone(), self.query.clone())
            .file_consensus(self.base.full_mask())
            .await;
        let found = consensus.found;
        let file_ref = consensus.into_ref(&self.base, OpKind::Download, &self.remote_label)?;

        if file_ref.is_dir() {
            return Err(SdkError::InvalidPath(format!("{} is a directory", file_ref.path)));
        }

        let size = if self.thumbnail {
            file_ref.thumbnail_size
        } else {
            file_ref.size
        };

        if let Some(status) = &self.status {
            status.started(&self.base.allocation_id, &self.remote_label, OpKind::Download, size);
        }

        let stored = self.fetch(&file_ref, found, size, token).await?;
        let content = self.decrypt(&file_ref, stored)?;

        let expected = if self.thumbnail {
            &file_ref.actual_thumbnail_hash
        } else {
            &file_ref.actual_file_hash
        };
        let intact = expected.is_empty()
            || ContentHash::from_hex(expected).is_ok_and(|hash| hash.matches(&content));
        if !intact {
            return Err(SdkError::IntegrityCheckFailed(format!(
                "content of {} does not match its hash",
                self.remote_label
            )));
        }

        self.write(&content).await?;
        Ok((content.len() as u64, file_ref.mime_type))
    }

    /// Fetch block ranges from the agreeing blobbers and decode them
    async fn fetch(
        &self,
        file_ref: &FileRef,
        mask: crate::consensus::OpMask,
        size: u64,
        token: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let chunk_bytes = file_ref
            .chunk_size
            .max(1)
            .saturating_mul(self.erasure.data_shards as u64);
        let num_chunks = size.div_ceil(chunk_bytes);
        let mut remaining = size;
        let range_bytes = chunk_bytes.saturating_mul(self.blocks_per_download);
        let mut content = Vec::with_capacity(size.min(range_bytes) as usize);

        let mut start_block = 0;
        while start_block < num_chunks {
            if token.is_cancelled() {
                return Err(SdkError::Cancelled);
            }

            let num_blocks = self.blocks_per_download.min(num_chunks - start_block);
            let request = BlockRequest {
                query: self.query.clone(),
                start_block,
                num_blocks,
                thumbnail: self.thumbnail,
            };

            let mut results = self
                .base
                .fan_out(mask, |_, b| self.base.transport.download_blocks(b, &request))
                .await;
            debug!(start_block, num_blocks, "block range fetched");

            for offset in 0..num_blocks as usize {
                let shards: Vec<Option<Vec<u8>>> = (0..self.erasure.total_shards())
                    .map(|i| {
                        results
                            .iter_mut()
                            .find(|(idx, _)| *idx == i)
                            .and_then(|(_, r)| r.as_mut().ok())
                            .and_then(|blocks| blocks.get_mut(offset).map(std::mem::take))
                    })
                    .collect();

                let available = shards.iter().filter(|s| s.is_some()).count();
                if available < self.erasure.data_shards {
                    let got = results
                        .iter()
                        .filter(|(_, r)| r.as_ref().is_ok_and(|b| b.len() > offset))
                        .map(|(i, _)| *i)
                        .collect();
                    return Err(not_reached(OpKind::Download, got, &self.base.consensus));
                }

                let chunk_len = remaining.min(chunk_bytes);
                let chunk = self.coder.decode(shards, self.erasure, chunk_len as usize)?;
                content.extend_from_slice(&chunk);
                remaining -= chunk_len;
            }

            start_block += num_blocks;
            if let Some(status) = &self.status {
                status.in_progress(
                    &self.base.allocation_id,
                    &self.remote_label,
                    OpKind::Download,
                    size - remaining,
                );
            }
        }

        Ok(content)
    }

    fn decrypt(&self, file_ref: &FileRef, stored: Vec<u8>) -> Result<Vec<u8>> {
        if self.thumbnail {
            return Ok(stored);
        }

        let wrapped = match (&self.ticket, &file_ref.encrypted_key) {
            (_, None) => return Ok(stored),
            (Some(ticket), Some(_)) => ticket.re_encryption_key.as_deref().ok_or_else(|| {
                SdkError::TicketDecode("ticket carries no key for an encrypted file".into())
            })?,
            (None, Some(owner_key)) => owner_key.as_str(),
        };

        let key = self.identity.unwrap(wrapped)?;
        let encrypted = EncryptedFile::from_bytes(&stored)?;
        Ok(FileEncryptor::new(key).decrypt_file(&encrypted)?)
    }

    /// Write into a new file; nothing is left behind on failure
    async fn write(&self, content: &[u8]) -> Result<()> {
        if let Some(parent) = self.local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SdkError::LocalIo(format!("{}: {e}", parent.display())))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.local_path)
            .await
            .map_err(|e| SdkError::LocalIo(format!("{}: {e}", self.local_path.display())))?;

        let written = async {
            file.write_all(content).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            let _ = tokio::fs::remove_file(&self.local_path).await;
            return Err(SdkError::LocalIo(format!("{}: {e}", self.local_path.display())));
        }

        Ok(())
    }
}
