#![forbid(unsafe_code)]
//! Inode and data-block allocation for FlatFS.
//!
//! ## Design
//!
//! The allocator is layered:
//!
//! 1. **Bitmap** — raw bit manipulation on the persisted bitmap byte
//!    slices. One bit per address, 1 = allocated. The bitmap is the single
//!    source of truth for allocation state.
//! 2. **FreeList** — a derived FIFO queue of free addresses, rebuilt from a
//!    full bitmap scan at format/mount time and never stored on disk.
//! 3. **allocate / release** — the only mutation paths, keeping bitmap and
//!    free list in lockstep so neither can drift from the other.
//!
//! Allocation order: the free list is seeded in ascending address order, so
//! first-time allocations proceed ascending; released addresses are reused
//! oldest-released-first rather than lowest-address-first.

use flatfs_error::{FlatFsError, Result};
use std::collections::VecDeque;

// ── Bitmap operations ───────────────────────────────────────────────────────

/// Get bit `idx` from a bitmap byte slice.
#[must_use]
pub fn bitmap_get(bitmap: &[u8], idx: u32) -> bool {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx >= bitmap.len() {
        return false;
    }
    (bitmap[byte_idx] >> bit_idx) & 1 == 1
}

/// Set bit `idx` in a bitmap byte slice.
pub fn bitmap_set(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] |= 1 << bit_idx;
    }
}

/// Clear bit `idx` in a bitmap byte slice.
pub fn bitmap_clear(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] &= !(1 << bit_idx);
    }
}

/// Count free (zero) bits in the first `count` bits of `bitmap`.
#[must_use]
#[expect(clippy::cast_possible_truncation)]
pub fn bitmap_count_free(bitmap: &[u8], count: u32) -> u32 {
    (0..count).filter(|&idx| !bitmap_get(bitmap, idx)).count() as u32
}

// ── Free list ───────────────────────────────────────────────────────────────

/// Derived FIFO queue of currently-unallocated addresses.
///
/// Addresses are appended on release and popped from the front on
/// allocation. An address appears in at most one free list at a time; any
/// unallocated address appears in exactly one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeList {
    queue: VecDeque<u32>,
}

impl FreeList {
    /// Rebuild the list by scanning the first `count` bits of `bitmap` in
    /// ascending address order, enqueueing every address whose bit is 0.
    ///
    /// Used at format time (all addresses free) and at mount time (restore
    /// in-memory state from the persisted bitmap).
    #[must_use]
    pub fn rebuild(bitmap: &[u8], count: u32) -> Self {
        let queue = (0..count).filter(|&idx| !bitmap_get(bitmap, idx)).collect();
        Self { queue }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[must_use]
    pub fn contains(&self, idx: u32) -> bool {
        self.queue.contains(&idx)
    }

    fn pop_front(&mut self) -> Option<u32> {
        self.queue.pop_front()
    }

    fn push_back(&mut self, idx: u32) {
        self.queue.push_back(idx);
    }
}

// ── Allocation paths ────────────────────────────────────────────────────────

/// Allocate the front address of the free list and mark its bitmap bit.
///
/// Returns `NoSpace` when the list is empty. A front address whose bit is
/// already 1 means the list has drifted from the bitmap and is reported as
/// corruption rather than handed out as a conflicting address.
pub fn allocate(bitmap: &mut [u8], list: &mut FreeList) -> Result<u32> {
    let idx = list.pop_front().ok_or(FlatFsError::NoSpace)?;
    if bitmap_get(bitmap, idx) {
        return Err(FlatFsError::Corruption {
            index: u64::from(idx),
            detail: "free list returned an address already allocated in the bitmap".into(),
        });
    }
    bitmap_set(bitmap, idx);
    Ok(idx)
}

/// Release an address: clear its bitmap bit and append it to the free list
/// as one step, so the bitmap and list cannot disagree in between.
///
/// Releasing an address whose bit is already 0 is a double free.
pub fn release(bitmap: &mut [u8], list: &mut FreeList, idx: u32) -> Result<()> {
    if !bitmap_get(bitmap, idx) {
        return Err(FlatFsError::Corruption {
            index: u64::from(idx),
            detail: "double free: address already free in the bitmap".into(),
        });
    }
    bitmap_clear(bitmap, idx);
    list.push_back(idx);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_get_set_clear() {
        let mut bm = vec![0u8; 4];
        assert!(!bitmap_get(&bm, 0));
        bitmap_set(&mut bm, 0);
        assert!(bitmap_get(&bm, 0));
        bitmap_clear(&mut bm, 0);
        assert!(!bitmap_get(&bm, 0));

        bitmap_set(&mut bm, 7);
        assert!(bitmap_get(&bm, 7));
        assert_eq!(bm[0], 0x80);

        bitmap_set(&mut bm, 8);
        assert!(bitmap_get(&bm, 8));
        assert_eq!(bm[1], 0x01);
    }

    #[test]
    fn bitmap_bits_are_independent() {
        let mut bm = vec![0u8; 2];
        for idx in 0..16 {
            bitmap_set(&mut bm, idx);
            assert!(bitmap_get(&bm, idx));
            bitmap_clear(&mut bm, idx);
            assert!(!bitmap_get(&bm, idx));
            // No other bit was disturbed.
            assert_eq!(bitmap_count_free(&bm, 16), 16);
        }
    }

    #[test]
    fn bitmap_count_free_partial() {
        let mut bm = vec![0u8; 2];
        bitmap_set(&mut bm, 0);
        bitmap_set(&mut bm, 5);
        bitmap_set(&mut bm, 15);
        assert_eq!(bitmap_count_free(&bm, 16), 13);
        assert_eq!(bitmap_count_free(&bm, 5), 4);
    }

    #[test]
    fn rebuild_enqueues_free_bits_ascending() {
        let mut bm = vec![0u8; 2];
        bitmap_set(&mut bm, 1);
        bitmap_set(&mut bm, 3);

        let mut bm2 = bm.clone();
        let mut list = FreeList::rebuild(&bm, 6);
        assert_eq!(list.len(), 4);

        let order: Vec<u32> = (0..4)
            .map(|_| allocate(&mut bm2, &mut list).unwrap())
            .collect();
        assert_eq!(order, vec![0, 2, 4, 5]);
    }

    #[test]
    fn allocate_exhaustion_is_no_space() {
        let mut bm = vec![0u8; 1];
        let mut list = FreeList::rebuild(&bm, 3);
        for _ in 0..3 {
            allocate(&mut bm, &mut list).unwrap();
        }
        assert!(matches!(
            allocate(&mut bm, &mut list),
            Err(FlatFsError::NoSpace)
        ));
    }

    #[test]
    fn allocate_never_returns_a_set_bit() {
        let mut bm = vec![0u8; 1];
        let mut list = FreeList::rebuild(&bm, 8);
        for _ in 0..8 {
            let idx = allocate(&mut bm, &mut list).unwrap();
            assert!(bitmap_get(&bm, idx));
        }
    }

    #[test]
    fn fifo_reuse_order_is_release_order() {
        let mut bm = vec![0u8; 1];
        let mut list = FreeList::rebuild(&bm, 8);
        for _ in 0..8 {
            allocate(&mut bm, &mut list).unwrap();
        }

        // Release [5, 2, 7]; the next three allocations return them in
        // release order, not address order.
        for idx in [5, 2, 7] {
            release(&mut bm, &mut list, idx).unwrap();
        }
        let reused: Vec<u32> = (0..3)
            .map(|_| allocate(&mut bm, &mut list).unwrap())
            .collect();
        assert_eq!(reused, vec![5, 2, 7]);
    }

    #[test]
    fn release_detects_double_free() {
        let mut bm = vec![0u8; 1];
        let mut list = FreeList::rebuild(&bm, 4);
        let idx = allocate(&mut bm, &mut list).unwrap();
        release(&mut bm, &mut list, idx).unwrap();

        let err = release(&mut bm, &mut list, idx).unwrap_err();
        assert!(matches!(err, FlatFsError::Corruption { index: 0, .. }));
    }

    #[test]
    fn allocate_detects_list_bitmap_drift() {
        let mut bm = vec![0u8; 1];
        let mut list = FreeList::rebuild(&bm, 2);
        // Corrupt: mark address 0 allocated behind the list's back.
        bitmap_set(&mut bm, 0);
        assert!(matches!(
            allocate(&mut bm, &mut list),
            Err(FlatFsError::Corruption { index: 0, .. })
        ));
    }

    #[test]
    fn rebuild_after_mutations_matches_bitmap() {
        let mut bm = vec![0u8; 2];
        let mut list = FreeList::rebuild(&bm, 16);
        for _ in 0..5 {
            allocate(&mut bm, &mut list).unwrap();
        }
        release(&mut bm, &mut list, 3).unwrap();

        // A fresh scan agrees with the live list's contents.
        let rebuilt = FreeList::rebuild(&bm, 16);
        assert_eq!(rebuilt.len(), list.len());
        for idx in 0..16 {
            assert_eq!(rebuilt.contains(idx), !bitmap_get(&bm, idx));
        }
    }
}
