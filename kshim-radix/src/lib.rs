//! Linux kernel radix tree
//!
//! A sparse map from `unsigned long` index to non-null pointer, laid out
//! like `lib/radix-tree.c`: 64-way nodes, entries in the leaves, and three
//! tag bitmaps per node whose bits are set in an interior node whenever any
//! entry below that slot carries the tag.
//!
//! The tree does no locking. Callers serialize modifications and either
//! hold the same lock or an RCU read-side section while iterating.

use core::alloc::Layout;
use core::ffi::c_void;
use core::ptr;

use kshim_core::context;
use kshim_ffi::{c_ulong, GfpFlags, KernelError, KernelResult};

pub mod iter;

pub use iter::{
    radix_tree_iter_init, radix_tree_next_chunk, radix_tree_next_slot, Entries, RadixTreeIter,
    Slots, RADIX_TREE_ITER_CONTIG, RADIX_TREE_ITER_TAGGED, RADIX_TREE_ITER_TAG_MASK,
};

pub const RADIX_TREE_MAP_SHIFT: u32 = 6;
pub const RADIX_TREE_MAP_SIZE: usize = 1 << RADIX_TREE_MAP_SHIFT;
pub const RADIX_TREE_MAP_MASK: c_ulong = (RADIX_TREE_MAP_SIZE - 1) as c_ulong;
pub const RADIX_TREE_MAX_TAGS: usize = 3;

/// `struct radix_tree_node`
#[repr(C)]
#[derive(Debug)]
pub struct RadixTreeNode {
    /// Bits of the index consumed below this node.
    pub shift: u8,
    /// Slot of this node in its parent.
    pub offset: u8,
    /// Non-empty slots.
    pub count: u8,
    pub parent: *mut RadixTreeNode,
    pub slots: [*mut c_void; RADIX_TREE_MAP_SIZE],
    pub tags: [u64; RADIX_TREE_MAX_TAGS],
}

impl RadixTreeNode {
    /// Largest index reachable below this node, relative to its base.
    pub fn maxindex(&self) -> c_ulong {
        shift_maxindex(self.shift as u32)
    }

    pub fn tag_get(&self, tag: usize, offset: usize) -> bool {
        self.tags[tag] & (1 << offset) != 0
    }

    fn offset_of(&self, index: c_ulong) -> usize {
        ((index >> self.shift) & RADIX_TREE_MAP_MASK) as usize
    }
}

pub(crate) fn shift_maxindex(shift: u32) -> c_ulong {
    let bits = shift + RADIX_TREE_MAP_SHIFT;
    if bits >= c_ulong::BITS {
        c_ulong::MAX
    } else {
        (1 << bits) - 1
    }
}

fn shift_for(index: c_ulong) -> u32 {
    let mut shift = 0;
    while index > shift_maxindex(shift) {
        shift += RADIX_TREE_MAP_SHIFT;
    }
    shift
}

/// `struct radix_tree_root`
#[repr(C)]
#[derive(Debug)]
pub struct RadixTreeRoot {
    pub gfp_mask: GfpFlags,
    pub rnode: *mut RadixTreeNode,
}

unsafe impl Send for RadixTreeRoot {}
unsafe impl Sync for RadixTreeRoot {}

impl RadixTreeRoot {
    /// `RADIX_TREE_INIT`
    pub const fn new(gfp_mask: GfpFlags) -> Self {
        Self {
            gfp_mask,
            rnode: ptr::null_mut(),
        }
    }

    /// `INIT_RADIX_TREE()`: reset to empty. Nodes of a previous tree are
    /// not freed.
    pub fn init(&mut self, gfp_mask: GfpFlags) {
        self.gfp_mask = gfp_mask;
        self.rnode = ptr::null_mut();
    }

    pub fn is_empty(&self) -> bool {
        self.rnode.is_null()
    }

    /// `root_tag_get()`: any entry carries `tag`.
    pub fn tagged(&self, tag: usize) -> bool {
        // SAFETY: a non-null root node is owned by the tree.
        !self.rnode.is_null() && unsafe { (*self.rnode).tags[tag] } != 0
    }

    /// Largest index representable without growing the tree.
    pub fn maxindex(&self) -> c_ulong {
        if self.rnode.is_null() {
            return 0;
        }
        // SAFETY: as above.
        unsafe { (*self.rnode).maxindex() }
    }

    fn alloc_node(
        &self,
        shift: u32,
        parent: *mut RadixTreeNode,
        offset: usize,
    ) -> KernelResult<*mut RadixTreeNode> {
        if self.gfp_mask.allows_blocking() {
            context::might_sleep("radix_tree_node_alloc");
        }
        // SAFETY: non-zero sized; all-zero is a valid empty node.
        let node = unsafe { std::alloc::alloc_zeroed(Layout::new::<RadixTreeNode>()) }
            .cast::<RadixTreeNode>();
        if node.is_null() {
            tracing::debug!(shift, "radix_tree_node_alloc: out of memory");
            return Err(KernelError::ENOMEM);
        }
        tracing::trace!(?node, shift, offset, "radix tree node allocated");
        // SAFETY: just allocated.
        unsafe {
            (*node).shift = shift as u8;
            (*node).offset = offset as u8;
            (*node).parent = parent;
        }
        Ok(node)
    }

    /// Grow the tree until the root covers `shift`.
    fn extend(&mut self, shift: u32) -> KernelResult<()> {
        // SAFETY: nodes reachable from the root are owned by the tree.
        unsafe {
            while ((*self.rnode).shift as u32) < shift {
                let old = self.rnode;
                let new = self.alloc_node((*old).shift as u32 + RADIX_TREE_MAP_SHIFT, ptr::null_mut(), 0)?;
                (*new).slots[0] = old.cast();
                (*new).count = 1;
                for tag in 0..RADIX_TREE_MAX_TAGS {
                    if (*old).tags[tag] != 0 {
                        (*new).tags[tag] |= 1;
                    }
                }
                (*old).parent = new;
                (*old).offset = 0;
                self.rnode = new;
            }
        }
        Ok(())
    }

    /// `radix_tree_insert()`. `EEXIST` if `index` is occupied, `ENOMEM` if
    /// a node cannot be allocated.
    pub fn insert(&mut self, index: c_ulong, item: *mut c_void) -> KernelResult<()> {
        kshim_core::bug_on!(item.is_null(), "radix_tree_insert() of a NULL entry");
        let shift = shift_for(index);
        if self.rnode.is_null() {
            self.rnode = self.alloc_node(shift, ptr::null_mut(), 0)?;
        } else {
            self.extend(shift)?;
        }

        // SAFETY: nodes reachable from the root are owned by the tree.
        unsafe {
            let mut node = self.rnode;
            while (*node).shift > 0 {
                let offset = (*node).offset_of(index);
                let mut child = (*node).slots[offset].cast::<RadixTreeNode>();
                if child.is_null() {
                    child = self.alloc_node(
                        (*node).shift as u32 - RADIX_TREE_MAP_SHIFT,
                        node,
                        offset,
                    )?;
                    (*node).slots[offset] = child.cast();
                    (*node).count += 1;
                }
                node = child;
            }
            let offset = (*node).offset_of(index);
            if !(*node).slots[offset].is_null() {
                return Err(KernelError::EEXIST);
            }
            (*node).slots[offset] = item;
            (*node).count += 1;
        }
        Ok(())
    }

    /// Leaf node and offset holding `index`, if the path exists.
    fn lookup_leaf(&self, index: c_ulong) -> Option<(*mut RadixTreeNode, usize)> {
        if self.rnode.is_null() || index > self.maxindex() {
            return None;
        }
        // SAFETY: nodes reachable from the root are owned by the tree.
        unsafe {
            let mut node = self.rnode;
            while (*node).shift > 0 {
                let child = (*node).slots[(*node).offset_of(index)].cast::<RadixTreeNode>();
                if child.is_null() {
                    return None;
                }
                node = child;
            }
            Some((node, (*node).offset_of(index)))
        }
    }

    /// `radix_tree_lookup()`: the entry at `index` or null.
    pub fn lookup(&self, index: c_ulong) -> *mut c_void {
        match self.lookup_leaf(index) {
            // SAFETY: leaf returned by `lookup_leaf`.
            Some((node, offset)) => unsafe { (*node).slots[offset] },
            None => ptr::null_mut(),
        }
    }

    /// `radix_tree_lookup_slot()`
    pub fn lookup_slot(&self, index: c_ulong) -> Option<*mut *mut c_void> {
        let (node, offset) = self.lookup_leaf(index)?;
        // SAFETY: as above.
        let slot = unsafe { ptr::addr_of_mut!((*node).slots[offset]) };
        // SAFETY: in-bounds slot.
        (!unsafe { *slot }.is_null()).then_some(slot)
    }

    /// `radix_tree_delete()`: remove and return the entry at `index`, or
    /// null if there was none.
    pub fn delete(&mut self, index: c_ulong) -> *mut c_void {
        let Some((leaf, offset)) = self.lookup_leaf(index) else {
            return ptr::null_mut();
        };
        // SAFETY: nodes reachable from the root are owned by the tree.
        unsafe {
            let item = (*leaf).slots[offset];
            if item.is_null() {
                return ptr::null_mut();
            }
            (*leaf).slots[offset] = ptr::null_mut();
            (*leaf).count -= 1;
            for tag in 0..RADIX_TREE_MAX_TAGS {
                node_tag_clear(leaf, offset, tag);
            }

            let mut node = leaf;
            while (*node).count == 0 {
                let parent = (*node).parent;
                let slot = (*node).offset as usize;
                free_node(node);
                if parent.is_null() {
                    self.rnode = ptr::null_mut();
                    break;
                }
                (*parent).slots[slot] = ptr::null_mut();
                (*parent).count -= 1;
                node = parent;
            }
            self.shrink();
            item
        }
    }

    /// Drop root levels that only lead to slot 0.
    fn shrink(&mut self) {
        // SAFETY: nodes reachable from the root are owned by the tree.
        unsafe {
            while !self.rnode.is_null() {
                let root = self.rnode;
                let child = (*root).slots[0].cast::<RadixTreeNode>();
                if (*root).shift == 0 || (*root).count != 1 || child.is_null() {
                    break;
                }
                (*child).parent = ptr::null_mut();
                (*child).offset = 0;
                self.rnode = child;
                free_node(root);
            }
        }
    }

    /// `radix_tree_tag_set()`: tag the entry at `index` and its ancestors.
    /// The entry must exist.
    pub fn tag_set(&mut self, index: c_ulong, tag: usize) -> *mut c_void {
        kshim_core::bug_on!(tag >= RADIX_TREE_MAX_TAGS, "radix tree tag {} out of range", tag);
        let item = self.lookup(index);
        let Some((leaf, offset)) = self.lookup_leaf(index).filter(|_| !item.is_null()) else {
            kshim_core::bug!("radix_tree_tag_set() on empty index {}", index);
        };
        // SAFETY: nodes reachable from the root are owned by the tree.
        unsafe {
            let mut node = leaf;
            let mut offset = offset;
            while !node.is_null() {
                (*node).tags[tag] |= 1 << offset;
                offset = (*node).offset as usize;
                node = (*node).parent;
            }
        }
        item
    }

    /// `radix_tree_tag_clear()`: returns the entry, or null if absent.
    pub fn tag_clear(&mut self, index: c_ulong, tag: usize) -> *mut c_void {
        kshim_core::bug_on!(tag >= RADIX_TREE_MAX_TAGS, "radix tree tag {} out of range", tag);
        let Some((leaf, offset)) = self.lookup_leaf(index) else {
            return ptr::null_mut();
        };
        // SAFETY: as above.
        unsafe {
            node_tag_clear(leaf, offset, tag);
            (*leaf).slots[offset]
        }
    }

    /// `radix_tree_tag_get()`
    pub fn tag_get(&self, index: c_ulong, tag: usize) -> bool {
        kshim_core::bug_on!(tag >= RADIX_TREE_MAX_TAGS, "radix tree tag {} out of range", tag);
        match self.lookup_leaf(index) {
            // SAFETY: leaf returned by `lookup_leaf`.
            Some((node, offset)) => unsafe { (*node).tag_get(tag, offset) },
            None => false,
        }
    }

    /// `radix_tree_gang_lookup()`: up to `max_items` entries from
    /// `first_index` on, in index order.
    pub fn gang_lookup(&self, first_index: c_ulong, max_items: usize) -> Vec<*mut c_void> {
        self.entries(first_index).take(max_items).map(|(_, e)| e).collect()
    }

    /// Present entries from `start`, in increasing index order
    /// (`radix_tree_for_each_slot`).
    pub fn entries(&self, start: c_ulong) -> Entries<'_> {
        Entries::new(self.slots(start, 0))
    }

    /// Entries carrying `tag` from `start` (`radix_tree_for_each_tagged`).
    pub fn tagged_entries(&self, start: c_ulong, tag: usize) -> Entries<'_> {
        kshim_core::bug_on!(tag >= RADIX_TREE_MAX_TAGS, "radix tree tag {} out of range", tag);
        Entries::new(self.slots(start, RADIX_TREE_ITER_TAGGED | tag as u32))
    }

    /// The run of present entries starting exactly at `start`
    /// (`radix_tree_for_each_contig`).
    pub fn contig_entries(&self, start: c_ulong) -> Entries<'_> {
        Entries::new(self.slots(start, RADIX_TREE_ITER_CONTIG))
    }

    /// Slot references for the given iteration flags.
    pub fn slots(&self, start: c_ulong, flags: u32) -> Slots<'_> {
        Slots::new(self, start, flags)
    }

    /// Free every node. Entries are left to their owners.
    pub fn destroy(&mut self) {
        if !self.rnode.is_null() {
            // SAFETY: the whole tree is owned and no longer reachable.
            unsafe {
                let height = (*self.rnode).shift as u32 / RADIX_TREE_MAP_SHIFT + 1;
                tracing::debug!(height, "destroying radix tree");
                free_subtree(self.rnode);
            }
            self.rnode = ptr::null_mut();
        }
    }
}

impl Drop for RadixTreeRoot {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Clear `tag` at `offset` and in every ancestor left without it.
unsafe fn node_tag_clear(mut node: *mut RadixTreeNode, mut offset: usize, tag: usize) {
    while !node.is_null() {
        if !(*node).tag_get(tag, offset) {
            return;
        }
        (*node).tags[tag] &= !(1 << offset);
        if (*node).tags[tag] != 0 {
            return;
        }
        offset = (*node).offset as usize;
        node = (*node).parent;
    }
}

unsafe fn free_node(node: *mut RadixTreeNode) {
    tracing::trace!(?node, shift = (*node).shift, "radix tree node freed");
    std::alloc::dealloc(node.cast(), Layout::new::<RadixTreeNode>());
}

unsafe fn free_subtree(node: *mut RadixTreeNode) {
    if (*node).shift > 0 {
        for slot in (*node).slots {
            if !slot.is_null() {
                free_subtree(slot.cast());
            }
        }
    }
    free_node(node);
}

static_assertions::const_assert!(RADIX_TREE_MAP_SIZE <= u64::BITS as usize);
