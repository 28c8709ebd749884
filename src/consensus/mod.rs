//! Quorum accounting for blobber operations
//!
//! An operation succeeds when the share of blobbers that acknowledged it
//! reaches the allocation's consensus threshold, `100 * D / (D + P)` percent.

mod mask;

pub use mask::{MaskIter, OpMask, MAX_BLOBBERS};

use crate::SdkError;

/// Percentage threshold together with the blobber count it applies to
///
/// Both values are kept as `f32` and compared the same way the storage
/// network's reference clients do, so ties at fractional thresholds
/// (D=1, P=2 gives 33.33%) resolve identically: `count * 100 / full` is
/// evaluated in `f32` and compared with `>=`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consensus {
    threshold: f32,
    full: f32,
}

impl Consensus {
    /// Consensus for an allocation with the given erasure parameters
    pub fn new(data_shards: usize, parity_shards: usize) -> Self {
        let total = (data_shards + parity_shards) as f32;
        Self {
            threshold: (data_shards as f32 * 100.0) / total,
            full: total,
        }
    }

    /// Required percentage of agreeing blobbers
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Number of blobbers the percentage is measured against
    pub fn full(&self) -> f32 {
        self.full
    }

    /// Does `successes` out of `full` reach the threshold?
    pub fn is_met(&self, successes: u32) -> bool {
        meets_threshold(successes, self.full, self.threshold)
    }

    /// Does the population of `mask` reach the threshold?
    pub fn is_met_by(&self, mask: OpMask) -> bool {
        self.is_met(mask.popcount())
    }

    /// Smallest success count that reaches the threshold
    pub fn required(&self) -> u32 {
        let full = self.full.max(0.0) as u32;
        (0..=full).find(|&n| self.is_met(n)).unwrap_or(full)
    }

    /// Shrink the blobber count by blobbers that no longer take part
    fn shrink(&mut self, satisfied: u32) {
        self.full = (self.full - satisfied as f32).max(0.0);
    }
}

/// `count * 100 / total >= threshold_percent`, evaluated in `f32`
pub fn meets_threshold(count: u32, total: f32, threshold_percent: f32) -> bool {
    if total <= 0.0 {
        return false;
    }
    (count as f32 * 100.0) / total >= threshold_percent
}

/// Target set and quorum for re-uploading an object
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepairPlan {
    /// Blobbers that must receive the object
    pub mask: OpMask,
    /// Quorum measured against the repaired subset only
    pub consensus: Consensus,
}

impl RepairPlan {
    /// Plan a repair from the blobbers that already hold the object
    ///
    /// Fails with `NoRepairNeeded` when every blobber of `full` already has it.
    pub fn new(full: OpMask, found: OpMask, consensus: Consensus) -> Result<Self, SdkError> {
        let found = found.intersect(full);
        if found == full {
            return Err(SdkError::NoRepairNeeded);
        }

        let mut consensus = consensus;
        consensus.shrink(found.popcount());

        Ok(Self {
            mask: found.complement(full),
            consensus,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_threshold_values() {
        assert_eq!(Consensus::new(2, 2).threshold(), 50.0);
        assert_eq!(Consensus::new(3, 1).threshold(), 75.0);
        assert_eq!(Consensus::new(2, 2).full(), 4.0);
    }

    #[test]
    fn test_one_failure_of_four() {
        // 3/4 = 75% >= 50%
        assert!(Consensus::new(2, 2).is_met(3));
    }

    #[test]
    fn test_exact_boundary_passes() {
        // 2/4 = 50% >= 50%
        assert!(Consensus::new(2, 2).is_met(2));
        assert!(!Consensus::new(2, 2).is_met(1));
    }

    #[test]
    fn test_high_data_ratio_fails() {
        // 2/4 = 50% < 75%
        let consensus = Consensus::new(3, 1);
        assert!(!consensus.is_met(2));
        assert!(consensus.is_met(3));
        assert_eq!(consensus.required(), 3);
    }

    #[test]
    fn test_fractional_threshold_tie() {
        // 1/3 = 33.33% >= 33.33%
        let consensus = Consensus::new(1, 2);
        assert!(consensus.is_met(1));
        assert!(!consensus.is_met(0));
        assert_eq!(consensus.required(), 1);
    }

    #[test]
    fn test_repair_plan_shrinks_full_consensus() {
        let full = OpMask::all(4);
        let found = OpMask::from_bits(0b0101);

        let plan = RepairPlan::new(full, found, Consensus::new(2, 2)).unwrap();

        assert_eq!(plan.mask.bits(), 0b1010);
        assert_eq!(plan.consensus.full(), 2.0);
        assert_eq!(plan.consensus.threshold(), 50.0);
        assert!(plan.consensus.is_met(1));
    }

    #[test]
    fn test_repair_not_needed() {
        let full = OpMask::all(4);
        let result = RepairPlan::new(full, full, Consensus::new(2, 2));
        assert!(matches!(result, Err(SdkError::NoRepairNeeded)));
    }

    #[test]
    fn test_zero_total_never_met() {
        assert!(!meets_threshold(0, 0.0, 0.0));
    }

    proptest! {
        #[test]
        fn threshold_is_monotonic(d in 1usize..16, p in 0usize..16, count in 0u32..32) {
            let consensus = Consensus::new(d, p);
            if consensus.is_met(count) {
                prop_assert!(consensus.is_met(count + 1));
            }
        }

        #[test]
        fn repair_is_noop_only_for_full_mask(n in 2usize..=32, bits in any::<u64>()) {
            let full = OpMask::all(n);
            let found = OpMask::from_bits(bits).intersect(full);
            let consensus = Consensus::new(n / 2, n - n / 2);
            let plan = RepairPlan::new(full, found, consensus);
            prop_assert_eq!(plan.is_err(), found == full);
            if let Ok(plan) = plan {
                prop_assert_eq!(plan.mask, found.complement(full));
                prop_assert_eq!(plan.consensus.full(), (n as u32 - found.popcount()) as f32);
            }
        }
    }
}
