//! Blobber transport - the calls an allocation makes against one blobber
//!
//! Every call addresses a single blobber and fails independently. The
//! request layer fans calls out and turns the per-blobber results into
//! masks; nothing here knows about quorum.

pub mod memory;

use crate::blobber::Blobber;
use crate::fileref::{DirListing, FileRef, FileStats};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Blobber unreachable: {0}")]
    Unreachable(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout")]
    Timeout,
}

/// How an object is addressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefTarget {
    /// Cleaned absolute remote path (owner access)
    Path(String),
    /// Lookup hash (ticket access)
    LookupHash(String),
}

/// Address of an object plus the credentials to read it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefQuery {
    pub allocation_id: String,
    pub target: RefTarget,
    /// Encoded auth ticket for third-party reads
    pub auth_ticket: Option<String>,
}

impl RefQuery {
    pub fn path(allocation_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            allocation_id: allocation_id.into(),
            target: RefTarget::Path(path.into()),
            auth_ticket: None,
        }
    }

    pub fn ticket(
        allocation_id: impl Into<String>,
        lookup_hash: impl Into<String>,
        auth_ticket: impl Into<String>,
    ) -> Self {
        Self {
            allocation_id: allocation_id.into(),
            target: RefTarget::LookupHash(lookup_hash.into()),
            auth_ticket: Some(auth_ticket.into()),
        }
    }
}

/// One blobber's shard of one chunk, staged under a connection
#[derive(Debug, Clone)]
pub struct ShardUpload {
    pub allocation_id: String,
    pub connection_id: String,
    pub path: String,
    pub chunk_index: u64,
    pub data: Vec<u8>,
    pub is_thumbnail: bool,
}

/// Attributes of an uploaded object, sent with the commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UploadMeta {
    pub name: String,
    pub path: String,
    pub mime_type: String,
    /// Stored bytes (after encryption)
    pub size: u64,
    pub actual_size: u64,
    pub actual_hash: String,
    pub chunk_size: u64,
    pub thumbnail_size: u64,
    pub actual_thumbnail_size: u64,
    pub actual_thumbnail_hash: String,
    pub encrypted_key: Option<String>,
    pub is_update: bool,
    pub is_repair: bool,
}

/// Makes the changes staged under a connection permanent
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub allocation_id: String,
    pub connection_id: String,
    /// Present when the connection staged an upload
    pub upload: Option<UploadMeta>,
}

/// A range of blocks (one shard per chunk) of an object
#[derive(Debug, Clone)]
pub struct BlockRequest {
    pub query: RefQuery,
    pub start_block: u64,
    pub num_blocks: u64,
    pub thumbnail: bool,
}

/// Calls an allocation issues against a single blobber
#[async_trait]
pub trait BlobberTransport: Send + Sync {
    /// Current reference of a file or directory
    async fn get_file_ref(&self, blobber: &Blobber, query: &RefQuery) -> Result<FileRef, TransportError>;

    /// Directory reference and its direct children
    async fn list_dir(&self, blobber: &Blobber, query: &RefQuery) -> Result<DirListing, TransportError>;

    async fn file_stats(
        &self,
        blobber: &Blobber,
        allocation_id: &str,
        path: &str,
    ) -> Result<FileStats, TransportError>;

    async fn upload_shard(&self, blobber: &Blobber, shard: &ShardUpload) -> Result<(), TransportError>;

    /// Blocks `start_block .. start_block + num_blocks`; fewer at the end of the object
    async fn download_blocks(
        &self,
        blobber: &Blobber,
        request: &BlockRequest,
    ) -> Result<Vec<Vec<u8>>, TransportError>;

    async fn delete_object(
        &self,
        blobber: &Blobber,
        allocation_id: &str,
        connection_id: &str,
        path: &str,
    ) -> Result<(), TransportError>;

    async fn rename_object(
        &self,
        blobber: &Blobber,
        allocation_id: &str,
        connection_id: &str,
        path: &str,
        new_name: &str,
    ) -> Result<(), TransportError>;

    async fn copy_object(
        &self,
        blobber: &Blobber,
        allocation_id: &str,
        connection_id: &str,
        path: &str,
        dest_dir: &str,
    ) -> Result<(), TransportError>;

    async fn commit(&self, blobber: &Blobber, request: &CommitRequest) -> Result<(), TransportError>;

    /// Discard everything staged under a connection
    async fn rollback(
        &self,
        blobber: &Blobber,
        allocation_id: &str,
        connection_id: &str,
    ) -> Result<(), TransportError>;

    async fn add_commit_meta_txn(
        &self,
        blobber: &Blobber,
        query: &RefQuery,
        txn_id: &str,
    ) -> Result<(), TransportError>;
}
