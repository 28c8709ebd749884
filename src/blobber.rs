//! Blobber descriptors and the terms an allocation was formed with
//!
//! All of these are snapshots taken when the allocation was formed and are
//! only read by file operations.

use serde::{Deserialize, Serialize};

/// Token amount in the network's smallest unit
pub type Balance = i64;

/// A storage provider taking part in an allocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blobber {
    pub id: String,
    pub url: String,
}

impl Blobber {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

/// Price range a client accepts when blobbers are selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PriceRange {
    pub min: Balance,
    pub max: Balance,
}

impl PriceRange {
    pub fn is_valid(&self) -> bool {
        0 <= self.min && self.min <= self.max
    }

    pub fn contains(&self, price: Balance) -> bool {
        self.min <= price && price <= self.max
    }
}

/// Terms a blobber offered when the allocation was signed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Terms {
    /// Tokens per GB read
    pub read_price: Balance,
    /// Tokens per GB written
    pub write_price: Balance,
    pub min_lock_demand: f64,
    /// Nanoseconds
    pub max_offer_duration: i64,
    /// Nanoseconds
    pub challenge_completion_time: i64,
}

/// Per-blobber accounting of an allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BlobberAllocation {
    pub blobber_id: String,
    pub size: i64,
    pub terms: Terms,
    pub min_lock_demand: Balance,
    pub spent: Balance,
    pub penalty: Balance,
    pub read_reward: Balance,
    pub returned: Balance,
    pub challenge_reward: Balance,
    pub final_reward: Balance,
}

/// Usage statistics of an allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AllocationStats {
    pub used_size: i64,
    #[serde(rename = "num_of_writes")]
    pub num_writes: i64,
    #[serde(rename = "num_of_reads")]
    pub num_reads: i64,
    pub total_challenges: i64,
    #[serde(rename = "num_open_challenges")]
    pub open_challenges: i64,
    #[serde(rename = "num_success_challenges")]
    pub success_challenges: i64,
    #[serde(rename = "num_failed_challenges")]
    pub failed_challenges: i64,
    #[serde(rename = "latest_closed_challenge")]
    pub latest_closed_challenge_txn: String,
}
