//! Allocation SDK - client-side orchestration of erasure-coded storage
//!
//! An allocation spreads every file over a fixed set of blobbers (storage
//! providers). This crate issues file operations against that set, keeps
//! track of which blobbers took part with bitmasks, decides success by
//! quorum and drives repair of blobbers that miss data.

pub mod allocation;
pub mod blobber;
pub mod consensus;
pub mod crypto;
pub mod erasure;
pub mod fileref;
pub mod identity;
pub mod path;
pub mod progress;
pub mod request;
pub mod status;
pub mod ticket;
pub mod transport;

pub use allocation::{Allocation, AllocationEnv, Lifecycle, UploadOptions};
pub use blobber::Blobber;
pub use consensus::{Consensus, OpMask, RepairPlan};
pub use identity::ClientIdentity;
pub use progress::{OperationHandle, ProgressRegistry};
pub use status::{OpKind, StatusCallback, StatusHandle};
pub use ticket::AuthTicket;

use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;
use thiserror::Error;

/// Main error type for allocation operations
#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Allocation is not initialized")]
    NotInitialized,

    #[error("Allocation is under repair")]
    UnderRepair,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Not enough blobbers for this operation")]
    NoBlobbers,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No repair required")]
    NoRepairNeeded,

    #[error("Consensus not reached for {operation}: {successes} of {required} required")]
    ConsensusNotReached {
        operation: OpKind,
        successes: u32,
        required: u32,
    },

    #[error("Local IO error: {0}")]
    LocalIo(String),

    #[error("Auth ticket decode error: {0}")]
    TicketDecode(String),

    #[error("Operation already in progress: {0}")]
    InProgress(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid allocation: {0}")]
    InvalidAllocation(String),

    #[error("Integrity check failed: {0}")]
    IntegrityCheckFailed(String),

    #[error("Request queue closed")]
    QueueClosed,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Identity error: {0}")]
    Identity(#[from] identity::IdentityError),

    #[error("Erasure coding error: {0}")]
    Erasure(#[from] erasure::ErasureError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SdkError>;

/// Tuning of an allocation's queues, transfers and tickets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    pub upload_queue_capacity: usize,

    pub download_queue_capacity: usize,

    /// Requests running at the same time per allocation
    pub max_concurrent_requests: usize,

    /// Bytes of one shard of one chunk
    pub chunk_size: usize,

    /// Chunks fetched per block range request
    pub blocks_per_download: u64,

    /// Lifetime of issued auth tickets
    pub auth_ticket_expiry_secs: u64,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            upload_queue_capacity: 10,
            download_queue_capacity: 10,
            max_concurrent_requests: 16,
            chunk_size: 64 * 1024, // 64 KiB
            blocks_per_download: 10,
            auth_ticket_expiry_secs: 90 * 24 * 60 * 60, // 90 days
        }
    }
}

impl SdkConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SdkError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file
    pub fn load(path: impl AsRef<FsPath>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SdkError::LocalIo(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("upload_queue_capacity", self.upload_queue_capacity as u64),
            ("download_queue_capacity", self.download_queue_capacity as u64),
            ("max_concurrent_requests", self.max_concurrent_requests as u64),
            ("chunk_size", self.chunk_size as u64),
            ("blocks_per_download", self.blocks_per_download),
            ("auth_ticket_expiry_secs", self.auth_ticket_expiry_secs),
        ];

        match fields.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(SdkError::InvalidAllocation(format!("{name} must be positive"))),
            None => Ok(()),
        }
    }
}

/// Install a fmt subscriber; `RUST_LOG` overrides `default_filter`
///
/// Only the first call in a process installs anything.
pub fn init_logging(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
