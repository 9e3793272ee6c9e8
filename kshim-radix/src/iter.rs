//! Chunked radix tree iteration
//!
//! The cursor walks one leaf node ("chunk") at a time:
//! [`radix_tree_next_chunk`] finds the next leaf holding a present (or
//! tagged) slot at or after `next_index`, and [`radix_tree_next_slot`]
//! steps through that leaf. The `radix_tree_for_each_*` loops combine them
//! and are available as the fused [`Slots`] and [`Entries`] iterators.

use core::ffi::c_void;
use core::ptr::{self, NonNull};

use kshim_ffi::c_ulong;

use crate::{RadixTreeNode, RadixTreeRoot, RADIX_TREE_MAP_SIZE};

/// Low bits of the flags carry the tag number for tagged iteration.
pub const RADIX_TREE_ITER_TAG_MASK: u32 = 0x0f;
/// Visit only slots carrying the tag.
pub const RADIX_TREE_ITER_TAGGED: u32 = 0x10;
/// Stop at the first hole.
pub const RADIX_TREE_ITER_CONTIG: u32 = 0x20;

pub type Slot = *mut *mut c_void;

/// `struct radix_tree_iter`
#[repr(C)]
#[derive(Debug, Clone)]
pub struct RadixTreeIter {
    /// Index of the current slot.
    pub index: c_ulong,
    /// One past the last index of the current chunk.
    pub next_index: c_ulong,
    /// Tag bits of the current chunk, bit 0 being the current slot.
    pub tags: c_ulong,
    pub node: *mut RadixTreeNode,
}

impl RadixTreeIter {
    pub const fn new() -> Self {
        Self {
            index: 0,
            next_index: 0,
            tags: 0,
            node: ptr::null_mut(),
        }
    }

    fn chunk_size(&self) -> c_ulong {
        self.next_index.wrapping_sub(self.index)
    }
}

impl Default for RadixTreeIter {
    fn default() -> Self {
        Self::new()
    }
}

/// `radix_tree_iter_init()`: prime `iter` to start at `start`. Always
/// returns null so the first step looks up a chunk.
pub fn radix_tree_iter_init(iter: &mut RadixTreeIter, start: c_ulong) -> Slot {
    // `index = 0` with `next_index = start` lets a walk that starts at 0
    // be told apart from one that wrapped past the last index.
    iter.index = 0;
    iter.next_index = start;
    ptr::null_mut()
}

fn is_hole(node: &RadixTreeNode, offset: usize, flags: u32) -> bool {
    if flags & RADIX_TREE_ITER_TAGGED != 0 {
        !node.tag_get((flags & RADIX_TREE_ITER_TAG_MASK) as usize, offset)
    } else {
        node.slots[offset].is_null()
    }
}

fn next_present(node: &RadixTreeNode, offset: usize, flags: u32) -> usize {
    if flags & RADIX_TREE_ITER_TAGGED != 0 {
        let tag = (flags & RADIX_TREE_ITER_TAG_MASK) as usize;
        let from = offset + 1;
        if from >= RADIX_TREE_MAP_SIZE {
            return RADIX_TREE_MAP_SIZE;
        }
        let rest = node.tags[tag] >> from;
        if rest == 0 {
            RADIX_TREE_MAP_SIZE
        } else {
            from + rest.trailing_zeros() as usize
        }
    } else {
        (offset + 1..RADIX_TREE_MAP_SIZE)
            .find(|&o| !node.slots[o].is_null())
            .unwrap_or(RADIX_TREE_MAP_SIZE)
    }
}

/// `radix_tree_next_chunk()`: position `iter` on the leaf holding the next
/// matching slot at or after `iter.next_index` and return that slot, or
/// null when the walk is over.
pub fn radix_tree_next_chunk(root: &RadixTreeRoot, iter: &mut RadixTreeIter, flags: u32) -> Slot {
    let tag = (flags & RADIX_TREE_ITER_TAG_MASK) as usize;
    if flags & RADIX_TREE_ITER_TAGGED != 0 && !root.tagged(tag) {
        return ptr::null_mut();
    }

    // A zero `next_index` after a non-zero `index` means the previous
    // chunk ended at the last index, or a contiguous walk hit a hole.
    let mut index = iter.next_index;
    if index == 0 && iter.index != 0 {
        return ptr::null_mut();
    }

    'restart: loop {
        if root.rnode.is_null() || index > root.maxindex() {
            return ptr::null_mut();
        }
        // SAFETY: nodes reachable from the root are owned by the tree, and
        // the caller excludes concurrent modification.
        unsafe {
            let mut node = root.rnode;
            loop {
                let n = &*node;
                let mut offset = n.offset_of(index);
                if is_hole(n, offset, flags) {
                    if flags & RADIX_TREE_ITER_CONTIG != 0 {
                        return ptr::null_mut();
                    }
                    offset = next_present(n, offset, flags);
                    index &= !n.maxindex();
                    index = index.wrapping_add((offset as c_ulong) << n.shift);
                    if index == 0 {
                        return ptr::null_mut();
                    }
                    if offset == RADIX_TREE_MAP_SIZE {
                        continue 'restart;
                    }
                }

                let child = n.slots[offset];
                if child.is_null() {
                    continue 'restart;
                }
                if n.shift == 0 {
                    iter.index = (index & !n.maxindex()) | offset as c_ulong;
                    iter.next_index = (index | n.maxindex()).wrapping_add(1);
                    iter.node = node;
                    iter.tags = if flags & RADIX_TREE_ITER_TAGGED != 0 {
                        n.tags[tag] >> offset
                    } else {
                        0
                    };
                    return ptr::addr_of_mut!((*node).slots[offset]);
                }
                node = child.cast();
            }
        }
    }
}

/// `radix_tree_next_slot()`: the next matching slot inside the current
/// chunk, or null once the chunk is used up (or, for contiguous walks, at
/// the first hole).
///
/// # Safety
/// `slot` must be the slot last returned for `iter`, and the tree must not
/// have been modified since.
pub unsafe fn radix_tree_next_slot(mut slot: Slot, iter: &mut RadixTreeIter, flags: u32) -> Slot {
    if flags & RADIX_TREE_ITER_TAGGED != 0 {
        iter.tags >>= 1;
        if iter.tags == 0 {
            return ptr::null_mut();
        }
        if iter.tags & 1 != 0 {
            iter.index = iter.index.wrapping_add(1);
            return slot.add(1);
        }
        if flags & RADIX_TREE_ITER_CONTIG == 0 {
            let offset = iter.tags.trailing_zeros();
            iter.tags >>= offset;
            let step = offset as usize + 1;
            iter.index = iter.index.wrapping_add(step as c_ulong);
            return slot.add(step);
        }
    } else {
        let mut count = iter.chunk_size();
        while count > 1 {
            count -= 1;
            slot = slot.add(1);
            iter.index = iter.index.wrapping_add(1);
            if !(*slot).is_null() {
                return slot;
            }
            if flags & RADIX_TREE_ITER_CONTIG != 0 {
                // Forbid moving on to the next chunk.
                iter.next_index = 0;
                break;
            }
        }
    }
    ptr::null_mut()
}

/// Lazy, fused walk over slot references in increasing index order.
pub struct Slots<'a> {
    root: &'a RadixTreeRoot,
    iter: RadixTreeIter,
    slot: Slot,
    flags: u32,
    started: bool,
    done: bool,
}

impl<'a> Slots<'a> {
    pub(crate) fn new(root: &'a RadixTreeRoot, start: c_ulong, flags: u32) -> Self {
        let mut iter = RadixTreeIter::new();
        let slot = radix_tree_iter_init(&mut iter, start);
        Self {
            root,
            iter,
            slot,
            flags,
            started: false,
            done: false,
        }
    }

    /// Cursor state after the last yielded slot.
    pub fn cursor(&self) -> &RadixTreeIter {
        &self.iter
    }
}

impl<'a> Iterator for Slots<'a> {
    type Item = (c_ulong, NonNull<*mut c_void>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.started && !self.slot.is_null() {
            // SAFETY: `slot` came from this cursor and the tree is
            // borrowed shared for `'a`.
            self.slot = unsafe { radix_tree_next_slot(self.slot, &mut self.iter, self.flags) };
        }
        self.started = true;
        if self.slot.is_null() {
            self.slot = radix_tree_next_chunk(self.root, &mut self.iter, self.flags);
        }
        match NonNull::new(self.slot) {
            Some(slot) => Some((self.iter.index, slot)),
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl core::iter::FusedIterator for Slots<'_> {}

/// [`Slots`] yielding the stored entries.
pub struct Entries<'a> {
    slots: Slots<'a>,
}

impl<'a> Entries<'a> {
    pub(crate) fn new(slots: Slots<'a>) -> Self {
        Self { slots }
    }
}

impl<'a> Iterator for Entries<'a> {
    type Item = (c_ulong, *mut c_void);

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: yielded slots point into nodes kept alive by the borrow.
        self.slots
            .next()
            .map(|(index, slot)| (index, unsafe { *slot.as_ptr() }))
    }
}

impl core::iter::FusedIterator for Entries<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RADIX_TREE_MAX_TAGS;
    use kshim_ffi::GfpFlags;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn entry(v: c_ulong) -> *mut c_void {
        ((v as usize) << 3 | 0x8000) as *mut c_void
    }

    fn tree(indices: &[c_ulong]) -> RadixTreeRoot {
        let mut root = RadixTreeRoot::new(GfpFlags::GFP_KERNEL);
        for &i in indices {
            root.insert(i, entry(i)).unwrap();
        }
        root
    }

    #[test]
    fn test_visits_in_order_then_exhausts() {
        let root = tree(&[9, 2, 5]);
        let mut it = root.entries(0);
        assert_eq!(it.next(), Some((2, entry(2))));
        assert_eq!(it.next(), Some((5, entry(5))));
        assert_eq!(it.next(), Some((9, entry(9))));
        assert_eq!(it.next(), None);
        assert_eq!(it.next(), None);
    }

    #[test]
    fn test_raw_protocol() {
        let root = tree(&[2, 5, 9]);
        let mut iter = RadixTreeIter::new();
        let mut slot = radix_tree_iter_init(&mut iter, 0);
        assert!(slot.is_null());
        let mut seen = Vec::new();
        loop {
            if slot.is_null() {
                slot = radix_tree_next_chunk(&root, &mut iter, 0);
                if slot.is_null() {
                    break;
                }
            }
            seen.push(iter.index);
            slot = unsafe { radix_tree_next_slot(slot, &mut iter, 0) };
        }
        assert_eq!(seen, vec![2, 5, 9]);
    }

    #[test]
    fn test_start_skips_earlier_entries() {
        let root = tree(&[2, 5, 9, 700]);
        let got: Vec<c_ulong> = root.entries(6).map(|(i, _)| i).collect();
        assert_eq!(got, vec![9, 700]);
    }

    #[test]
    fn test_across_chunks_and_levels() {
        let idx = [0, 63, 64, 4095, 4096, 1 << 30];
        let root = tree(&idx);
        let got: Vec<c_ulong> = root.entries(0).map(|(i, _)| i).collect();
        assert_eq!(got, idx.to_vec());
    }

    #[test]
    fn test_tagged_iteration() {
        let mut root = tree(&[1, 3, 4, 100, 200]);
        root.tag_set(3, 2);
        root.tag_set(200, 2);
        root.tag_set(4, 0);
        let got: Vec<c_ulong> = root.tagged_entries(0, 2).map(|(i, _)| i).collect();
        assert_eq!(got, vec![3, 200]);
        assert_eq!(root.tagged_entries(0, 1).count(), 0);
    }

    #[test]
    fn test_contig_stops_at_hole() {
        let root = tree(&[10, 11, 12, 14, 15]);
        let got: Vec<c_ulong> = root.contig_entries(10).map(|(i, _)| i).collect();
        assert_eq!(got, vec![10, 11, 12]);
        assert_eq!(root.contig_entries(13).count(), 0);
    }

    #[test]
    fn test_contig_crosses_chunk_boundary() {
        let root = tree(&[62, 63, 64, 65]);
        let got: Vec<c_ulong> = root.contig_entries(62).map(|(i, _)| i).collect();
        assert_eq!(got, vec![62, 63, 64, 65]);
    }

    #[test]
    fn test_last_index_does_not_wrap() {
        let root = tree(&[c_ulong::MAX - 1, c_ulong::MAX]);
        let got: Vec<c_ulong> = root.entries(c_ulong::MAX - 1).map(|(i, _)| i).collect();
        assert_eq!(got, vec![c_ulong::MAX - 1, c_ulong::MAX]);
    }

    #[test]
    fn test_slot_reference_points_at_entry() {
        let root = tree(&[42]);
        let (index, slot) = root.slots(0, 0).next().unwrap();
        assert_eq!(index, 42);
        assert_eq!(unsafe { *slot.as_ptr() }, entry(42));
        assert_eq!(root.lookup_slot(42), Some(slot.as_ptr()));
    }

    proptest! {
        #[test]
        fn prop_iteration_completeness(
            indices in prop::collection::btree_set(0u64..1_000_000, 0..200),
            start in 0u64..1_000_000,
        ) {
            let list: Vec<c_ulong> = indices.iter().map(|&i| i as c_ulong).collect();
            let root = tree(&list);
            let got: Vec<c_ulong> = root.entries(start as c_ulong).map(|(i, _)| i).collect();
            let want: Vec<c_ulong> = list.iter().copied().filter(|&i| i >= start as c_ulong).collect();
            prop_assert_eq!(got, want);
        }

        #[test]
        fn prop_tagged_subset(
            indices in prop::collection::btree_set(0u64..100_000, 1..100),
            tag in 0usize..RADIX_TREE_MAX_TAGS,
            pick in any::<u64>(),
        ) {
            let list: Vec<c_ulong> = indices.iter().map(|&i| i as c_ulong).collect();
            let mut root = tree(&list);
            let tagged: BTreeSet<c_ulong> = list
                .iter()
                .enumerate()
                .filter(|(n, _)| pick >> (n % 64) & 1 == 1)
                .map(|(_, &i)| i)
                .collect();
            for &i in &tagged {
                root.tag_set(i, tag);
            }
            let got: Vec<c_ulong> = root.tagged_entries(0, tag).map(|(i, _)| i).collect();
            prop_assert_eq!(got, tagged.into_iter().collect::<Vec<_>>());
        }

        #[test]
        fn prop_delete_then_iterate(
            indices in prop::collection::btree_set(0u64..50_000, 1..100),
            drop_every in 2usize..5,
        ) {
            let list: Vec<c_ulong> = indices.iter().map(|&i| i as c_ulong).collect();
            let mut root = tree(&list);
            let mut kept = Vec::new();
            for (n, &i) in list.iter().enumerate() {
                if n % drop_every == 0 {
                    prop_assert_eq!(root.delete(i), entry(i));
                } else {
                    kept.push(i);
                }
            }
            let got: Vec<c_ulong> = root.entries(0).map(|(i, _)| i).collect();
            prop_assert_eq!(got, kept);
        }
    }
}
