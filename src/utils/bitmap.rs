//! Bitmap data structure helper.

use std::fmt;

use crate::utils::BenchError;

use fixedbitset::FixedBitSet;

/// Compact bitmap for request window offset -> seen mapping.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap(FixedBitSet);

impl Bitmap {
    /// Creates a new bitmap of given size. If `ones` is true, all slots are
    /// marked true initially; otherwise, all slots are initially false.
    pub fn new(size: usize, ones: bool) -> Self {
        let mut bitset = FixedBitSet::with_capacity(size);
        if ones {
            bitset.set_range(.., true);
        }
        Bitmap(bitset)
    }

    /// Sets bit at index to given flag.
    #[inline]
    pub fn set(&mut self, idx: usize, flag: bool) -> Result<(), BenchError> {
        if idx >= self.0.len() {
            return Err(BenchError(format!("index {} out of bound", idx)));
        }
        self.0.set(idx, flag);
        Ok(())
    }

    /// Sets bit at index to true, returning its previous value.
    #[inline]
    pub fn test_and_set(&mut self, idx: usize) -> Result<bool, BenchError> {
        if idx >= self.0.len() {
            return Err(BenchError(format!("index {} out of bound", idx)));
        }
        Ok(self.0.put(idx))
    }

    /// Returns the size of the bitmap.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Returns the number of trues in the bitmap.
    #[inline]
    pub fn count(&self) -> usize {
        self.0.count_ones(..)
    }

    /// Merges `other` into self, returning the indices that were already
    /// true on both sides.
    pub fn merge(&mut self, other: &Bitmap) -> Result<Vec<usize>, BenchError> {
        if other.size() != self.size() {
            return Err(BenchError(format!(
                "bitmap size mismatch: {} vs. {}",
                self.size(),
                other.size()
            )));
        }
        let overlap = self.0.intersection(&other.0).collect();
        self.0.union_with(&other.0);
        Ok(overlap)
    }

    /// Iterates over indices whose bit is true.
    #[inline]
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.ones()
    }

    /// Iterates over indices whose bit is still false.
    #[inline]
    pub fn zeroes(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.0.len()).filter(move |&i| !self.0[i])
    }
}

// Prints as `{size; [true indices]}`.
impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{}; {:?}}}", self.size(), self.ones().collect::<Vec<_>>())
    }
}
