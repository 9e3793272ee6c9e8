//! Radix tree helpers
//!
//! `radix_tree_for_each_slot` in C expands to
//! `radix_tree_iter_init` / `radix_tree_next_chunk` / `radix_tree_next_slot`;
//! the first and last are inline and get helpers here, the middle one is an
//! ordinary kernel function and keeps its own name.

use kshim_ffi::{c_uint, c_ulong, GfpFlags};
use kshim_radix::iter::Slot;

use crate::bug::{arg, arg_mut};
use crate::types::{gfp_t, radix_tree_iter, radix_tree_root};

/// Linux equivalent: `INIT_RADIX_TREE(root, gfp_mask)`
///
/// # Safety
///
/// `root` must be valid; any nodes it referenced are forgotten.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_init_radix_tree(root: *mut radix_tree_root, gfp_mask: gfp_t) {
    arg_mut(root, "INIT_RADIX_TREE").init(GfpFlags::from_raw(gfp_mask));
}

/// Linux equivalent: `radix_tree_iter_init(iter, start)`
///
/// Always returns NULL.
///
/// # Safety
///
/// `iter` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_radix_tree_iter_init(
    iter: *mut radix_tree_iter,
    start: c_ulong,
) -> Slot {
    kshim_radix::iter::radix_tree_iter_init(arg_mut(iter, "radix_tree_iter_init"), start)
}

/// Linux equivalent: `radix_tree_next_slot(slot, iter, flags)`
///
/// # Safety
///
/// `slot` must be the last slot returned for `iter` and the tree must be
/// unchanged since.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_radix_tree_next_slot(
    slot: Slot,
    iter: *mut radix_tree_iter,
    flags: c_uint,
) -> Slot {
    kshim_radix::iter::radix_tree_next_slot(slot, arg_mut(iter, "radix_tree_next_slot"), flags)
}

/// Linux equivalent: `radix_tree_next_chunk(root, iter, flags)`
///
/// # Safety
///
/// `root` and `iter` must be valid; the tree must not change while the
/// returned chunk is in use.
#[no_mangle]
pub unsafe extern "C" fn radix_tree_next_chunk(
    root: *const radix_tree_root,
    iter: *mut radix_tree_iter,
    flags: c_uint,
) -> Slot {
    kshim_radix::iter::radix_tree_next_chunk(
        arg(root, "radix_tree_next_chunk"),
        arg_mut(iter, "radix_tree_next_chunk"),
        flags,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ffi::c_void;
    use kshim_radix::iter::{RADIX_TREE_ITER_CONTIG, RADIX_TREE_ITER_TAGGED};

    /// `radix_tree_for_each_slot` written the way a C caller expands it.
    unsafe fn for_each(root: &radix_tree_root, start: c_ulong, flags: c_uint) -> Vec<c_ulong> {
        let mut seen = Vec::new();
        let mut iter = radix_tree_iter::new();
        let mut slot = rust_helper_radix_tree_iter_init(&mut iter, start);
        loop {
            if slot.is_null() {
                slot = radix_tree_next_chunk(root, &mut iter, flags);
                if slot.is_null() {
                    break;
                }
            }
            seen.push(iter.index);
            slot = rust_helper_radix_tree_next_slot(slot, &mut iter, flags);
        }
        seen
    }

    fn item(i: usize) -> *mut c_void {
        ((i + 1) << 2) as *mut c_void
    }

    #[test]
    fn test_c_style_walk() {
        let mut root = radix_tree_root::new(GfpFlags::GFP_KERNEL);
        unsafe { rust_helper_init_radix_tree(&mut root, GfpFlags::GFP_KERNEL.bits()) };
        for i in [2usize, 5, 9, 70, 4100] {
            root.insert(i as c_ulong, item(i)).unwrap();
        }
        let seen = unsafe { for_each(&root, 0, 0) };
        assert_eq!(seen, vec![2, 5, 9, 70, 4100]);
        let from_six = unsafe { for_each(&root, 6, 0) };
        assert_eq!(from_six, vec![9, 70, 4100]);
    }

    #[test]
    fn test_c_style_tagged_and_contig() {
        let mut root = radix_tree_root::new(GfpFlags::GFP_KERNEL);
        for i in 0..4usize {
            root.insert(i as c_ulong, item(i)).unwrap();
        }
        root.insert(10, item(10)).unwrap();
        root.tag_set(1, 0);
        root.tag_set(10, 0);
        assert_eq!(unsafe { for_each(&root, 0, RADIX_TREE_ITER_TAGGED) }, vec![1, 10]);
        assert_eq!(unsafe { for_each(&root, 0, RADIX_TREE_ITER_CONTIG) }, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_empty_tree() {
        let root = radix_tree_root::new(GfpFlags::GFP_KERNEL);
        assert!(unsafe { for_each(&root, 0, 0) }.is_empty());
    }
}
