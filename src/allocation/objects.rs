//! Reads, mutations, sharing and meta commits on stored objects

use super::{spawn_job, Allocation, Job};
use crate::fileref::{ConsolidatedFileMeta, FileStats, ListResult, RefType};
use crate::progress::{self, OperationHandle};
use crate::request::commit_meta::{CommitMetaData, CommitMetaRequest};
use crate::request::copy::CopyRequest;
use crate::request::delete::DeleteRequest;
use crate::request::list::ListRequest;
use crate::request::rename::RenameRequest;
use crate::request::share::ShareRequest;
use crate::status::{OpKind, StatusHandle};
use crate::transport::{RefQuery, RefTarget};
use crate::{path, Result, SdkError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

impl Allocation {
    /// Quorum listing of a directory
    pub async fn list_dir(&self, remote_path: &str) -> Result<ListResult> {
        let runtime = self.runtime()?;
        let remote_path = path::validate(remote_path)?;
        self.require_redundancy()?;

        let query = RefQuery::path(&self.id, remote_path);
        ListRequest::new(runtime.base.clone(), query).list().await
    }

    pub async fn list_dir_from_auth_ticket(
        &self,
        auth_ticket: &str,
        lookup_hash: &str,
    ) -> Result<ListResult> {
        let runtime = self.runtime()?;
        let query = self.ticket_query(auth_ticket, lookup_hash)?;
        self.require_redundancy()?;

        ListRequest::new(runtime.base.clone(), query).list().await
    }

    /// Metadata of the version most blobbers agree on
    pub async fn get_file_meta(&self, remote_path: &str) -> Result<ConsolidatedFileMeta> {
        let runtime = self.runtime()?;
        let remote_path = path::validate(remote_path)?;

        let query = RefQuery::path(&self.id, remote_path);
        let file_ref = ListRequest::new(runtime.base.clone(), query)
            .file_ref(OpKind::List)
            .await?;
        Ok(ConsolidatedFileMeta::from(&file_ref))
    }

    pub async fn get_file_meta_from_auth_ticket(
        &self,
        auth_ticket: &str,
        lookup_hash: &str,
    ) -> Result<ConsolidatedFileMeta> {
        let runtime = self.runtime()?;
        let query = self.ticket_query(auth_ticket, lookup_hash)?;

        let file_ref = ListRequest::new(runtime.base.clone(), query)
            .file_ref(OpKind::List)
            .await?;
        Ok(ConsolidatedFileMeta::from(&file_ref))
    }

    /// Stats of every blobber that answered, disagreements included
    pub async fn get_file_stats(&self, remote_path: &str) -> Result<HashMap<String, FileStats>> {
        let runtime = self.runtime()?;
        let remote_path = path::validate(remote_path)?;

        let query = RefQuery::path(&self.id, &remote_path);
        Ok(ListRequest::new(runtime.base.clone(), query)
            .stats(&remote_path)
            .await)
    }

    pub async fn delete_file(&self, remote_path: &str) -> Result<()> {
        let runtime = self.mutable_runtime()?;
        let remote_path = path::validate(remote_path)?;

        DeleteRequest::new(runtime.base.clone(), remote_path)
            .process()
            .await
    }

    /// Rename an object in place; `new_name` is a single path segment
    pub async fn rename_object(&self, remote_path: &str, new_name: &str) -> Result<()> {
        let runtime = self.mutable_runtime()?;
        let remote_path = path::validate(remote_path)?;

        RenameRequest::new(runtime.base.clone(), remote_path, new_name.to_string())?
            .process()
            .await
    }

    pub async fn copy_object(&self, remote_path: &str, dest_dir: &str) -> Result<()> {
        let runtime = self.mutable_runtime()?;
        let remote_path = path::validate(remote_path)?;
        let dest_dir = path::validate(dest_dir)?;

        CopyRequest::new(runtime.base.clone(), remote_path, dest_dir)
            .process()
            .await
    }

    /// Copy into `dest_dir`, then delete the source
    pub async fn move_object(&self, remote_path: &str, dest_dir: &str) -> Result<()> {
        self.mutable_runtime()?;
        let remote_path = path::validate(remote_path)?;
        let dest_dir = path::validate(dest_dir)?;

        if path::parent(&remote_path) == dest_dir {
            return Err(SdkError::InvalidPath(format!(
                "{remote_path} is already in {dest_dir}"
            )));
        }

        self.copy_object(&remote_path, &dest_dir).await?;
        self.delete_file(&remote_path).await?;

        info!(allocation = %self.id, from = %remote_path, to = %dest_dir, "moved");
        Ok(())
    }

    /// Ticket for `remote_path` as the blobbers hold it
    ///
    /// With `recipient_encryption_public_key` (hex X25519) the content key
    /// of an encrypted file is re-wrapped for the recipient.
    pub async fn get_auth_ticket(
        &self,
        remote_path: &str,
        recipient_client_id: &str,
        recipient_encryption_public_key: Option<&str>,
    ) -> Result<String> {
        self.runtime()?;
        let remote_path = path::validate(remote_path)?;

        self.share_request(remote_path, recipient_client_id, recipient_encryption_public_key)?
            .resolve()
            .await
    }

    /// Ticket for a path without consulting the blobbers
    pub fn get_auth_ticket_for_share(
        &self,
        remote_path: &str,
        reference_type: RefType,
        recipient_client_id: &str,
    ) -> Result<String> {
        self.runtime()?;
        let remote_path = path::validate(remote_path)?;

        self.share_request(remote_path, recipient_client_id, None)?
            .plain(reference_type)
    }

    fn share_request(
        &self,
        remote_path: String,
        recipient_client_id: &str,
        recipient_encryption_public_key: Option<&str>,
    ) -> Result<ShareRequest> {
        let runtime = self.runtime()?;
        let identity = Arc::clone(&runtime.env.identity);
        let expiry = i64::try_from(runtime.env.config.auth_ticket_expiry_secs)
            .map_err(|_| SdkError::InvalidAllocation("ticket expiry out of range".into()))?;

        Ok(ShareRequest {
            base: runtime.base.clone(),
            owner_id: identity.client_id().to_string(),
            identity,
            remote_path,
            recipient_client_id: recipient_client_id.to_string(),
            recipient_encryption_public_key: recipient_encryption_public_key.map(str::to_string),
            expiration: chrono::Utc::now().timestamp().saturating_add(expiry),
        })
    }

    /// Record a metadata change of an object as a transaction
    ///
    /// The object is addressed by `remote_path`, or by `auth_ticket` and
    /// `lookup_hash` for shared objects. Without `file_meta` the metadata is
    /// read from the blobbers before this returns; the commit itself runs
    /// in the background.
    pub async fn commit_meta_transaction(
        &self,
        remote_path: &str,
        crud_type: &str,
        auth_ticket: Option<&str>,
        lookup_hash: Option<&str>,
        file_meta: Option<ConsolidatedFileMeta>,
        status: Option<StatusHandle>,
    ) -> Result<OperationHandle> {
        let runtime = self.mutable_runtime()?;

        let (query, key) = match auth_ticket {
            Some(ticket) => {
                let query = self.ticket_query(ticket, lookup_hash.unwrap_or_default())?;
                let key = match &query.target {
                    RefTarget::LookupHash(h) | RefTarget::Path(h) => h.clone(),
                };
                (query, key)
            }
            None => {
                let remote_path = path::validate(remote_path)?;
                (RefQuery::path(&self.id, &remote_path), remote_path)
            }
        };

        let meta_data = match file_meta {
            Some(meta) => meta,
            None => {
                let file_ref = ListRequest::new(runtime.base.clone(), query.clone())
                    .file_ref(OpKind::CommitMeta)
                    .await?;
                ConsolidatedFileMeta::from(&file_ref)
            }
        };

        let token = runtime.token.child_token();
        let (handle, completion) =
            progress::track(&runtime.meta_commits, &key, OpKind::CommitMeta, token.clone())?;

        let request = CommitMetaRequest {
            base: runtime.base.clone(),
            submitter: Arc::clone(&runtime.env.meta_submitter),
            data: CommitMetaData {
                crud_type: crud_type.to_string(),
                meta_data,
            },
            query,
            status,
        };

        if runtime.token.is_cancelled() {
            return Err(SdkError::QueueClosed);
        }
        spawn_job(
            Job {
                request,
                token,
                completion,
            },
            Arc::clone(&runtime.limiter),
            |request, _| request.process(),
        );

        info!(allocation = %self.id, object = %key, crud = crud_type, "meta commit started");
        Ok(handle)
    }

    fn ticket_query(&self, auth_ticket: &str, lookup_hash: &str) -> Result<RefQuery> {
        let ticket = self.decode_ticket(auth_ticket)?;
        let lookup_hash = if lookup_hash.is_empty() {
            ticket.file_path_hash
        } else {
            lookup_hash.to_string()
        };
        Ok(RefQuery::ticket(&self.id, lookup_hash, auth_ticket))
    }
}
