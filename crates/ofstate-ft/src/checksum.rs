//! Per-table cookie checksums for flow-state verification.
//!
//! Every logical table keeps the XOR of the cookies of its flows, split into
//! buckets by cookie prefix so that a controller can compare partial sums and
//! narrow down a divergence without dumping the whole table. XOR is its own
//! inverse, so adding and removing a cookie are the same operation.

use crate::error::{FtError, Result};
use ofstate_types::Cookie;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableChecksum {
    checksum: u64,
    shift: u32,
    buckets: Vec<u64>,
}

impl TableChecksum {
    /// Creates zeroed state with `size` buckets. `size` must be a non-zero
    /// power of two.
    pub(crate) fn new(size: u32) -> Result<Self> {
        let mut buckets = Vec::new();
        buckets.try_reserve_exact(size as usize).map_err(|err| {
            FtError::ResourceExhausted(format!("checksum buckets ({}): {}", size, err))
        })?;
        buckets.resize(size as usize, 0);
        Ok(Self {
            checksum: 0,
            shift: 64 - size.trailing_zeros(),
            buckets,
        })
    }

    /// Builds state with `size` buckets from scratch over `cookies`.
    pub(crate) fn rebuild(size: u32, cookies: impl IntoIterator<Item = Cookie>) -> Result<Self> {
        let mut state = Self::new(size)?;
        for cookie in cookies {
            state.toggle(cookie);
        }
        Ok(state)
    }

    /// Bucket a cookie falls into: its top log2(bucket count) bits.
    pub fn bucket_index(&self, cookie: Cookie) -> usize {
        cookie.checked_shr(self.shift).unwrap_or(0) as usize
    }

    /// XORs `cookie` into (or back out of) the checksum and its bucket.
    pub(crate) fn toggle(&mut self, cookie: Cookie) {
        self.checksum ^= cookie;
        let index = self.bucket_index(cookie);
        self.buckets[index] ^= cookie;
    }

    pub(crate) fn reset(&mut self) {
        self.checksum = 0;
        self.buckets.iter_mut().for_each(|bucket| *bucket = 0);
    }

    /// XOR of every member cookie.
    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Returns true if the buckets add up to the table checksum.
    pub fn is_consistent(&self) -> bool {
        self.buckets.iter().fold(0, |acc, bucket| acc ^ bucket) == self.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_bucket() {
        let mut state = TableChecksum::new(1).unwrap();
        state.toggle(0xFF00_0000_0000_0000);
        state.toggle(0x00FF_0000_0000_0000);
        assert_eq!(state.bucket_index(u64::MAX), 0);
        assert_eq!(state.checksum(), 0xFFFF_0000_0000_0000);
        assert_eq!(state.buckets(), &[0xFFFF_0000_0000_0000]);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_toggle_is_its_own_inverse() {
        let mut state = TableChecksum::new(4).unwrap();
        state.toggle(0x1234);
        state.toggle(0x8000_0000_0000_0001);
        state.toggle(0x1234);
        assert_eq!(state.checksum(), 0x8000_0000_0000_0001);
        assert_eq!(state.buckets(), &[0, 0, 0x8000_0000_0000_0001, 0]);
    }

    #[test]
    fn test_bucket_index_uses_prefix() {
        let state = TableChecksum::new(256).unwrap();
        assert_eq!(state.bucket_index(0xAB00_0000_0000_0000), 0xAB);
        assert_eq!(state.bucket_index(0x00FF_FFFF_FFFF_FFFF), 0);

        let state = TableChecksum::new(2).unwrap();
        assert_eq!(state.bucket_index(0x8000_0000_0000_0000), 1);
        assert_eq!(state.bucket_index(0x7FFF_FFFF_FFFF_FFFF), 0);
    }

    #[test]
    fn test_rebuild_matches_incremental() {
        let cookies = [1u64, 0xF000_0000_0000_0000, 0x4000_0000_0000_0042, 7];
        let mut incremental = TableChecksum::new(8).unwrap();
        cookies.iter().for_each(|c| incremental.toggle(*c));

        let rebuilt = TableChecksum::rebuild(8, cookies).unwrap();
        assert_eq!(rebuilt, incremental);
        assert!(rebuilt.is_consistent());
    }

    #[test]
    fn test_reset() {
        let mut state = TableChecksum::rebuild(2, [u64::MAX, 3]).unwrap();
        state.reset();
        assert_eq!(state.checksum(), 0);
        assert_eq!(state.buckets(), &[0, 0]);
    }
}
