//! Uploads and downloads: validated and registered here, run by the dispatcher

use super::{Allocation, AllocationRuntime, Job};
use crate::consensus::RepairPlan;
use crate::fileref::FileRef;
use crate::progress::{self, OperationHandle};
use crate::request::download::DownloadRequest;
use crate::request::list::ListRequest;
use crate::request::new_connection_id;
use crate::request::upload::UploadRequest;
use crate::status::{OpKind, StatusHandle};
use crate::ticket::AuthTicket;
use crate::transport::RefQuery;
use crate::{path, Result, SdkError};
use std::path::{Path, PathBuf};
use tracing::info;

/// What to upload and how
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub local_path: PathBuf,
    /// A trailing `/` names a directory the local file name is appended to
    pub remote_path: String,
    pub thumbnail_path: Option<PathBuf>,
    pub is_update: bool,
    pub is_repair: bool,
    pub encrypt: bool,
}

impl UploadOptions {
    pub fn new(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            ..Default::default()
        }
    }

    pub fn with_thumbnail(mut self, thumbnail_path: impl Into<PathBuf>) -> Self {
        self.thumbnail_path = Some(thumbnail_path.into());
        self
    }

    pub fn update(mut self) -> Self {
        self.is_update = true;
        self
    }

    pub fn repair(mut self) -> Self {
        self.is_repair = true;
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypt = true;
        self
    }
}

/// Where a download reads from
enum Source<'a> {
    Path(&'a str),
    Ticket {
        encoded: &'a str,
        ticket: AuthTicket,
        lookup_hash: String,
        file_name: String,
    },
}

impl Allocation {
    pub async fn upload_file(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        status: Option<StatusHandle>,
    ) -> Result<OperationHandle> {
        self.upload(UploadOptions::new(local_path.as_ref(), remote_path), status)
            .await
    }

    pub async fn update_file(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        status: Option<StatusHandle>,
    ) -> Result<OperationHandle> {
        self.upload(UploadOptions::new(local_path.as_ref(), remote_path).update(), status)
            .await
    }

    /// Re-upload `local_path` to the blobbers missing `remote_path`
    ///
    /// The local content must be the one the blobbers agree on. The
    /// allocation is marked under repair once the repair is queued.
    pub async fn repair_file(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        status: Option<StatusHandle>,
    ) -> Result<OperationHandle> {
        self.upload(UploadOptions::new(local_path.as_ref(), remote_path).repair(), status)
            .await
    }

    pub async fn upload_file_with_thumbnail(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        thumbnail_path: impl AsRef<Path>,
        status: Option<StatusHandle>,
    ) -> Result<OperationHandle> {
        let options = UploadOptions::new(local_path.as_ref(), remote_path)
            .with_thumbnail(thumbnail_path.as_ref());
        self.upload(options, status).await
    }

    pub async fn update_file_with_thumbnail(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        thumbnail_path: impl AsRef<Path>,
        status: Option<StatusHandle>,
    ) -> Result<OperationHandle> {
        let options = UploadOptions::new(local_path.as_ref(), remote_path)
            .with_thumbnail(thumbnail_path.as_ref())
            .update();
        self.upload(options, status).await
    }

    pub async fn encrypt_and_upload_file(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        status: Option<StatusHandle>,
    ) -> Result<OperationHandle> {
        self.upload(UploadOptions::new(local_path.as_ref(), remote_path).encrypted(), status)
            .await
    }

    pub async fn encrypt_and_update_file(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        status: Option<StatusHandle>,
    ) -> Result<OperationHandle> {
        let options = UploadOptions::new(local_path.as_ref(), remote_path)
            .encrypted()
            .update();
        self.upload(options, status).await
    }

    pub async fn encrypt_and_upload_file_with_thumbnail(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        thumbnail_path: impl AsRef<Path>,
        status: Option<StatusHandle>,
    ) -> Result<OperationHandle> {
        let options = UploadOptions::new(local_path.as_ref(), remote_path)
            .with_thumbnail(thumbnail_path.as_ref())
            .encrypted();
        self.upload(options, status).await
    }

    pub async fn encrypt_and_update_file_with_thumbnail(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        thumbnail_path: impl AsRef<Path>,
        status: Option<StatusHandle>,
    ) -> Result<OperationHandle> {
        let options = UploadOptions::new(local_path.as_ref(), remote_path)
            .with_thumbnail(thumbnail_path.as_ref())
            .encrypted()
            .update();
        self.upload(options, status).await
    }

    /// Queue an upload, update or repair
    ///
    /// Returns once the request is queued; the handle resolves with its outcome.
    pub async fn upload(
        &self,
        options: UploadOptions,
        status: Option<StatusHandle>,
    ) -> Result<OperationHandle> {
        let runtime = self.mutable_runtime()?;

        path::validate(&options.remote_path)?;
        let remote_path =
            path::validate(&path::full_remote_path(&options.local_path, &options.remote_path))?;
        if remote_path == "/" {
            return Err(SdkError::InvalidPath("the allocation root is not a file".into()));
        }

        let metadata = tokio::fs::metadata(&options.local_path)
            .await
            .map_err(|e| SdkError::LocalIo(format!("{}: {e}", options.local_path.display())))?;
        if !metadata.is_file() {
            return Err(SdkError::LocalIo(format!(
                "{} is not a file",
                options.local_path.display()
            )));
        }

        let base = runtime.base.clone();
        let (mask, consensus, repair_of) = if options.is_repair {
            let (plan, existing) = self.plan_repair(runtime, &remote_path).await?;
            (plan.mask, plan.consensus, Some(existing))
        } else {
            (base.full_mask(), base.consensus, None)
        };

        let op = if options.is_repair {
            OpKind::Repair
        } else {
            OpKind::Upload
        };
        let key = options.local_path.to_string_lossy().into_owned();
        let token = runtime.token.child_token();
        let (handle, completion) = progress::track(&runtime.uploads, &key, op, token.clone())?;

        let request = UploadRequest {
            base,
            coder: runtime.env.coder.clone(),
            erasure: runtime.erasure,
            identity: runtime.env.identity.clone(),
            mask,
            consensus,
            local_path: options.local_path,
            remote_path: remote_path.clone(),
            thumbnail_path: options.thumbnail_path,
            chunk_size: runtime.env.config.chunk_size,
            is_update: options.is_update,
            encrypt: options.encrypt && repair_of.is_none(),
            repair_of,
            status,
            connection_id: new_connection_id(),
        };

        if options.is_repair {
            self.update_repair_status(true);
        }

        let job = Job {
            request,
            token,
            completion,
        };
        if runtime.token.is_cancelled() || runtime.upload_tx.send(job).await.is_err() {
            if options.is_repair {
                self.update_repair_status(false);
            }
            return Err(SdkError::QueueClosed);
        }

        info!(allocation = %self.id, local = %key, remote = %remote_path, %op, %mask, "upload queued");
        Ok(handle)
    }

    /// Find the blobbers missing `remote_path` and the reference they should hold
    async fn plan_repair(
        &self,
        runtime: &AllocationRuntime,
        remote_path: &str,
    ) -> Result<(RepairPlan, FileRef)> {
        let base = &runtime.base;
        let query = RefQuery::path(&self.id, remote_path);
        let found = ListRequest::new(base.clone(), query)
            .file_consensus(base.full_mask())
            .await;

        let existing = match found.file_ref {
            Some(file_ref) if base.consensus.is_met_by(found.found) => file_ref,
            _ => return Err(SdkError::NotFound(remote_path.to_string())),
        };
        if existing.is_encrypted() {
            return Err(SdkError::IntegrityCheckFailed(format!(
                "{remote_path} is encrypted and cannot be rebuilt from plain content"
            )));
        }

        let plan = RepairPlan::new(base.full_mask(), found.found, base.consensus)?;
        info!(
            allocation = %self.id,
            path = remote_path,
            found = %found.found,
            targets = %plan.mask,
            "repair planned"
        );
        Ok((plan, existing))
    }

    pub async fn download_file(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        status: Option<StatusHandle>,
    ) -> Result<OperationHandle> {
        self.download(Source::Path(remote_path), local_path.as_ref(), false, status)
            .await
    }

    pub async fn download_thumbnail(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        status: Option<StatusHandle>,
    ) -> Result<OperationHandle> {
        self.download(Source::Path(remote_path), local_path.as_ref(), true, status)
            .await
    }

    /// Download a shared file
    ///
    /// An empty `remote_lookup_hash` or `remote_file_name` falls back to
    /// the ones in the ticket.
    pub async fn download_from_auth_ticket(
        &self,
        local_path: impl AsRef<Path>,
        auth_ticket: &str,
        remote_lookup_hash: &str,
        remote_file_name: &str,
        status: Option<StatusHandle>,
    ) -> Result<OperationHandle> {
        let source = self.ticket_source(auth_ticket, remote_lookup_hash, remote_file_name)?;
        self.download(source, local_path.as_ref(), false, status).await
    }

    pub async fn download_thumbnail_from_auth_ticket(
        &self,
        local_path: impl AsRef<Path>,
        auth_ticket: &str,
        remote_lookup_hash: &str,
        remote_file_name: &str,
        status: Option<StatusHandle>,
    ) -> Result<OperationHandle> {
        let source = self.ticket_source(auth_ticket, remote_lookup_hash, remote_file_name)?;
        self.download(source, local_path.as_ref(), true, status).await
    }

    fn ticket_source<'a>(
        &self,
        encoded: &'a str,
        lookup_hash: &str,
        file_name: &str,
    ) -> Result<Source<'a>> {
        self.runtime()?;
        let ticket = self.decode_ticket(encoded)?;

        let lookup_hash = if lookup_hash.is_empty() {
            ticket.file_path_hash.clone()
        } else {
            lookup_hash.to_string()
        };
        let file_name = if file_name.is_empty() {
            ticket.file_name.clone()
        } else {
            file_name.to_string()
        };

        Ok(Source::Ticket {
            encoded,
            ticket,
            lookup_hash,
            file_name,
        })
    }

    async fn download(
        &self,
        source: Source<'_>,
        local_path: &Path,
        thumbnail: bool,
        status: Option<StatusHandle>,
    ) -> Result<OperationHandle> {
        let runtime = self.repair_free_runtime()?;

        let (query, key, file_name, ticket) = match source {
            Source::Path(remote) => {
                let remote = path::validate(remote)?;
                let file_name = path::file_name(&remote).to_string();
                (RefQuery::path(&self.id, &remote), remote, file_name, None)
            }
            Source::Ticket {
                encoded,
                ticket,
                lookup_hash,
                file_name,
            } => (
                RefQuery::ticket(&self.id, &lookup_hash, encoded),
                lookup_hash,
                file_name,
                Some(ticket),
            ),
        };

        let destination = download_destination(local_path, &file_name).await?;
        self.require_redundancy()?;

        let op = OpKind::Download;
        let token = runtime.token.child_token();
        let (handle, completion) = progress::track(&runtime.downloads, &key, op, token.clone())?;

        let request = DownloadRequest {
            base: runtime.base.clone(),
            coder: runtime.env.coder.clone(),
            erasure: runtime.erasure,
            identity: runtime.env.identity.clone(),
            query,
            remote_label: key.clone(),
            local_path: destination.clone(),
            thumbnail,
            blocks_per_download: runtime.env.config.blocks_per_download,
            ticket,
            status,
        };

        let job = Job {
            request,
            token,
            completion,
        };
        if runtime.token.is_cancelled() || runtime.download_tx.send(job).await.is_err() {
            return Err(SdkError::QueueClosed);
        }

        info!(
            allocation = %self.id,
            remote = %key,
            local = %destination.display(),
            thumbnail,
            "download queued"
        );
        Ok(handle)
    }

    /// Cancel the upload registered for `local_path`
    pub fn cancel_upload(&self, local_path: impl AsRef<Path>) -> Result<()> {
        let runtime = self.runtime()?;
        let key = local_path.as_ref().to_string_lossy().into_owned();
        if runtime.uploads.cancel(&key) {
            info!(allocation = %self.id, local = %key, "upload cancelled");
            Ok(())
        } else {
            Err(SdkError::NotFound(key))
        }
    }

    /// Cancel the download registered for a remote path or lookup hash
    pub fn cancel_download(&self, remote_path: &str) -> Result<()> {
        let runtime = self.runtime()?;
        let cleaned = path::clean(remote_path);
        if runtime.downloads.cancel(remote_path) || runtime.downloads.cancel(&cleaned) {
            info!(allocation = %self.id, remote = remote_path, "download cancelled");
            Ok(())
        } else {
            Err(SdkError::NotFound(remote_path.to_string()))
        }
    }
}

/// Resolve where a download lands without overwriting anything
///
/// An existing local path must be a directory the file is placed in; a
/// missing one is the destination file itself.
async fn download_destination(local_path: &Path, file_name: &str) -> Result<PathBuf> {
    match tokio::fs::metadata(local_path).await {
        Ok(meta) if meta.is_dir() => {
            let destination = local_path.join(file_name);
            if tokio::fs::metadata(&destination).await.is_ok() {
                return Err(SdkError::LocalIo(format!(
                    "{} already exists",
                    destination.display()
                )));
            }
            Ok(destination)
        }
        Ok(_) => Err(SdkError::LocalIo(format!(
            "{} is not a directory",
            local_path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(local_path.to_path_buf()),
        Err(e) => Err(SdkError::LocalIo(format!("{}: {e}", local_path.display()))),
    }
}
