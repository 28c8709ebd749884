//! Erasure Coding using Reed-Solomon
//!
//! One chunk of content is split into D data shards plus P parity shards,
//! one per blobber. Any D of them reconstruct the chunk.

use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ErasureError {
    #[error("Erasure coding error: {0}")]
    ErasureCoding(String),

    #[error("Not enough shards available: have {have}, need {need}")]
    InsufficientShards { have: usize, need: usize },
}

/// Erasure parameters of an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureConfig {
    /// Number of data shards
    pub data_shards: usize,

    /// Number of parity shards
    pub parity_shards: usize,
}

impl ErasureConfig {
    pub fn new(data_shards: usize, parity_shards: usize) -> Self {
        Self {
            data_shards,
            parity_shards,
        }
    }

    /// Total number of shards, one per blobber
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Shard length for a chunk of `data_len` bytes
    pub fn shard_size(&self, data_len: usize) -> usize {
        if self.data_shards == 0 {
            return 0;
        }
        (data_len + self.data_shards - 1) / self.data_shards
    }
}

/// Splits chunks into shards and puts them back together
pub trait ErasureCoder: Send + Sync {
    /// Encode `data` into exactly `config.total_shards()` equally sized shards
    fn encode(&self, data: &[u8], config: ErasureConfig) -> Result<Vec<Vec<u8>>, ErasureError>;

    /// Rebuild the original `original_len` bytes; missing shards are `None`
    fn decode(
        &self,
        shards: Vec<Option<Vec<u8>>>,
        config: ErasureConfig,
        original_len: usize,
    ) -> Result<Vec<u8>, ErasureError>;
}

/// Reed-Solomon over GF(2^8)
#[derive(Debug, Clone, Copy, Default)]
pub struct ReedSolomonCoder;

impl ReedSolomonCoder {
    fn codec(config: ErasureConfig) -> Result<ReedSolomon, ErasureError> {
        ReedSolomon::new(config.data_shards, config.parity_shards)
            .map_err(|e| ErasureError::ErasureCoding(e.to_string()))
    }

    fn split(data: &[u8], config: ErasureConfig) -> Vec<Vec<u8>> {
        let shard_size = config.shard_size(data.len());
        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(config.total_shards());

        for i in 0..config.data_shards {
            let start = (i * shard_size).min(data.len());
            let end = (start + shard_size).min(data.len());
            let mut shard = data[start..end].to_vec();
            shard.resize(shard_size, 0);
            shards.push(shard);
        }

        for _ in 0..config.parity_shards {
            shards.push(vec![0u8; shard_size]);
        }

        shards
    }
}

impl ErasureCoder for ReedSolomonCoder {
    fn encode(&self, data: &[u8], config: ErasureConfig) -> Result<Vec<Vec<u8>>, ErasureError> {
        if config.data_shards == 0 {
            return Err(ErasureError::ErasureCoding("No data shards configured".into()));
        }

        let mut shards = Self::split(data, config);

        // The codec rejects empty shards; a zero length chunk needs no parity math
        if config.parity_shards == 0 || data.is_empty() {
            return Ok(shards);
        }

        let mut shard_refs: Vec<&mut [u8]> = shards.iter_mut().map(|s| s.as_mut_slice()).collect();
        Self::codec(config)?
            .encode(&mut shard_refs)
            .map_err(|e| ErasureError::ErasureCoding(e.to_string()))?;

        Ok(shards)
    }

    fn decode(
        &self,
        shards: Vec<Option<Vec<u8>>>,
        config: ErasureConfig,
        original_len: usize,
    ) -> Result<Vec<u8>, ErasureError> {
        if shards.len() != config.total_shards() {
            return Err(ErasureError::ErasureCoding(format!(
                "Expected {} shards, got {}",
                config.total_shards(),
                shards.len()
            )));
        }

        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < config.data_shards {
            return Err(ErasureError::InsufficientShards {
                have: available,
                need: config.data_shards,
            });
        }

        let mut shard_data = shards;
        let data_complete = shard_data[..config.data_shards].iter().all(Option::is_some);

        if !data_complete {
            Self::codec(config)?
                .reconstruct_data(&mut shard_data)
                .map_err(|e| ErasureError::ErasureCoding(e.to_string()))?;
        }

        let mut result = Vec::with_capacity(original_len);
        for shard in shard_data.into_iter().take(config.data_shards) {
            match shard {
                Some(shard) => result.extend_from_slice(&shard),
                None => return Err(ErasureError::ErasureCoding("Reconstruction failed".into())),
            }
        }

        if result.len() < original_len {
            return Err(ErasureError::ErasureCoding(format!(
                "Reconstructed {} bytes, expected {}",
                result.len(),
                original_len
            )));
        }
        result.truncate(original_len);

        Ok(result)
    }
}
