//! Reference model - what blobbers report about stored objects

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;

/// Kind of object a reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RefType {
    #[default]
    #[serde(rename = "f")]
    File,
    #[serde(rename = "d")]
    Directory,
}

impl RefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefType::File => "f",
            RefType::Directory => "d",
        }
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metadata transaction recorded against a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMetaTxn {
    pub txn_id: String,
    pub created_at: i64,
}

/// One blobber's view of a file or directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FileRef {
    #[serde(rename = "type")]
    pub ref_type: RefType,
    pub name: String,
    pub path: String,
    pub lookup_hash: String,

    /// Identity of the object's content; blobbers that agree report the same value
    pub hash: String,

    pub mime_type: String,

    /// Bytes stored (after encryption), split across the data shards
    pub size: u64,

    /// Size of the original content
    pub actual_file_size: u64,

    /// BLAKE3 hex of the original content
    pub actual_file_hash: String,

    /// Shard bytes per chunk used at upload time
    pub chunk_size: u64,

    pub thumbnail_size: u64,
    pub actual_thumbnail_size: u64,
    pub actual_thumbnail_hash: String,

    /// Content key wrapped for the owner, present for encrypted files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_key: Option<String>,

    #[serde(default)]
    pub commit_meta_txns: Vec<CommitMetaTxn>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl FileRef {
    pub fn is_dir(&self) -> bool {
        self.ref_type == RefType::Directory
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted_key.is_some()
    }

    /// Content identity of a file reference
    pub fn compute_file_hash(&self) -> String {
        let material = format!(
            "{}:{}:{}:{}:{}",
            self.path, self.actual_file_hash, self.size, self.actual_thumbnail_hash, self.chunk_size
        );
        hex::encode(Sha3_256::digest(material.as_bytes()))
    }

    /// Content identity of a directory from its children's hashes
    pub fn compute_dir_hash<'a>(path: &str, child_hashes: impl IntoIterator<Item = &'a str>) -> String {
        let mut hasher = Sha3_256::new();
        hasher.update(path.as_bytes());
        for hash in child_hashes {
            hasher.update(b":");
            hasher.update(hash.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// A blobber's answer to a directory listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirListing {
    pub meta: FileRef,
    pub children: Vec<FileRef>,
}

/// Quorum-selected listing returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResult {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub ref_type: RefType,
    pub size: u64,
    pub hash: String,
    pub lookup_hash: String,
    pub mime_type: String,
    pub actual_file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_key: Option<String>,
    /// Number of blobbers that agreed on this entry
    pub consensus: u32,
    pub children: Vec<ListResult>,
}

impl ListResult {
    pub(crate) fn from_ref(file_ref: &FileRef, consensus: u32) -> Self {
        Self {
            name: file_ref.name.clone(),
            path: file_ref.path.clone(),
            ref_type: file_ref.ref_type,
            size: file_ref.size,
            hash: file_ref.hash.clone(),
            lookup_hash: file_ref.lookup_hash.clone(),
            mime_type: file_ref.mime_type.clone(),
            actual_file_size: file_ref.actual_file_size,
            encrypted_key: file_ref.encrypted_key.clone(),
            consensus,
            children: vec![],
        }
    }
}

/// Per-blobber statistics for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileStats {
    pub name: String,
    pub size: u64,
    pub path_hash: String,
    pub path: String,
    pub num_of_blocks: u64,
    pub num_of_updates: u64,
    pub num_of_block_downloads: u64,
    pub num_of_challenges: u64,
    pub num_of_failed_challenges: u64,
    pub last_challenge_txn: String,
    pub write_marker_txn: String,
    /// Filled in by the client with the responding blobber
    #[serde(default)]
    pub blobber_id: String,
    #[serde(default)]
    pub blobber_url: String,
}

/// Client-side projection of a quorum-selected file reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedFileMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub ref_type: RefType,
    pub path: String,
    pub lookup_hash: String,
    pub hash: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_key: Option<String>,
    pub commit_meta_txns: Vec<CommitMetaTxn>,
}

impl From<&FileRef> for ConsolidatedFileMeta {
    fn from(file_ref: &FileRef) -> Self {
        Self {
            name: file_ref.name.clone(),
            ref_type: file_ref.ref_type,
            path: file_ref.path.clone(),
            lookup_hash: file_ref.lookup_hash.clone(),
            hash: file_ref.actual_file_hash.clone(),
            mime_type: file_ref.mime_type.clone(),
            size: file_ref.actual_file_size,
            encrypted_key: file_ref.encrypted_key.clone(),
            commit_meta_txns: file_ref.commit_meta_txns.clone(),
        }
    }
}
