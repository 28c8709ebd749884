//! Operation masks - one bit per blobber
//!
//! Bit `i` of a mask stands for blobber `i` of the allocation's ordered
//! blobber list. Masks are used as the active set of an operation, as the
//! "found" set of a consensus read and as the result set of a write.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Largest blobber set a mask can describe
pub const MAX_BLOBBERS: usize = 64;

/// Bitset over the blobbers of an allocation
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpMask(u64);

impl OpMask {
    /// Mask with no blobber selected
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Mask selecting every one of `count` blobbers
    pub fn all(count: usize) -> Self {
        match count {
            0 => Self(0),
            n if n >= MAX_BLOBBERS => Self(u64::MAX),
            n => Self((1u64 << n) - 1),
        }
    }

    /// Build a mask from raw bits
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bits
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Mask with only blobber `index` selected
    pub fn single(index: usize) -> Self {
        if index >= MAX_BLOBBERS {
            return Self(0);
        }
        Self(1u64 << index)
    }

    /// Select blobber `index`
    pub fn set(&mut self, index: usize) {
        *self = self.union(Self::single(index));
    }

    /// Deselect blobber `index`
    pub fn clear(&mut self, index: usize) {
        self.0 &= !Self::single(index).0;
    }

    /// Is blobber `index` selected?
    pub fn contains(self, index: usize) -> bool {
        index < MAX_BLOBBERS && self.0 & (1u64 << index) != 0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Blobbers of `full` that are not in `self`
    ///
    /// After a consensus read this yields the blobbers that must be targeted
    /// by a repair.
    pub fn complement(self, full: Self) -> Self {
        Self(!self.0 & full.0)
    }

    /// Number of selected blobbers
    pub fn popcount(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_subset_of(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    /// Indices of the selected blobbers, lowest first
    pub fn iter(self) -> MaskIter {
        MaskIter(self.0)
    }
}

impl BitOr for OpMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitAnd for OpMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersect(rhs)
    }
}

impl FromIterator<usize> for OpMask {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut mask = Self::empty();
        for index in iter {
            mask.set(index);
        }
        mask
    }
}

impl fmt::Debug for OpMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpMask({:#b})", self.0)
    }
}

impl fmt::Display for OpMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:b}", self.0)
    }
}

/// Iterator over selected blobber indices
pub struct MaskIter(u64);

impl Iterator for MaskIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let index = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_all_ones() {
        assert_eq!(OpMask::all(0).bits(), 0);
        assert_eq!(OpMask::all(4).bits(), 0b1111);
        assert_eq!(OpMask::all(64).bits(), u64::MAX);
        assert_eq!(OpMask::all(4).popcount(), 4);
    }

    #[test]
    fn test_set_clear_contains() {
        let mut mask = OpMask::empty();
        mask.set(0);
        mask.set(2);
        assert!(mask.contains(0));
        assert!(!mask.contains(1));
        assert!(mask.contains(2));
        assert!(!mask.contains(70));

        mask.clear(0);
        assert_eq!(mask.bits(), 0b100);
    }

    #[test]
    fn test_complement_for_repair() {
        let full = OpMask::all(4);
        let found = OpMask::from_bits(0b0101);

        assert_eq!(found.complement(full).bits(), 0b1010);
        assert_eq!(full.complement(full), OpMask::empty());
    }

    #[test]
    fn test_iter_indices() {
        let mask = OpMask::from_bits(0b1010_0110);
        let indices: Vec<usize> = mask.iter().collect();
        assert_eq!(indices, vec![1, 2, 5, 7]);

        let rebuilt: OpMask = indices.into_iter().collect();
        assert_eq!(rebuilt, mask);
    }

    proptest! {
        #[test]
        fn complement_is_an_involution(n in 1usize..=64, bits in any::<u64>()) {
            let full = OpMask::all(n);
            let found = OpMask::from_bits(bits).intersect(full);
            prop_assert_eq!(found.complement(full).complement(full), found);
        }

        #[test]
        fn complement_stays_inside_full(n in 1usize..=64, bits in any::<u64>()) {
            let full = OpMask::all(n);
            let missing = OpMask::from_bits(bits).complement(full);
            prop_assert!(missing.is_subset_of(full));
            prop_assert_eq!(
                missing.popcount() + OpMask::from_bits(bits).intersect(full).popcount(),
                full.popcount()
            );
        }

        #[test]
        fn union_contains_both_sides(a in any::<u64>(), b in any::<u64>()) {
            let (a, b) = (OpMask::from_bits(a), OpMask::from_bits(b));
            prop_assert!(a.is_subset_of(a | b));
            prop_assert!(b.is_subset_of(a | b));
            prop_assert!((a & b).is_subset_of(a));
        }
    }
}
