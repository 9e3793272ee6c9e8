//! Owned handles and small drivers shared by the scenarios

use std::fmt;
use std::ptr::NonNull;
use std::thread;

use kshim_ffi::{c_longlong, c_ulong, GfpFlags, KernelResult};
use kshim_fs::Inode;
use kshim_linux_compat::percpu::{
    rust_helper_alloc_percpu_longlong, rust_helper_free_percpu_longlong,
    rust_helper_num_online_cpus, rust_helper_per_cpu_ptr,
};
use kshim_linux_compat::radix::{
    radix_tree_next_chunk, rust_helper_radix_tree_iter_init, rust_helper_radix_tree_next_slot,
};
use kshim_mm::Folio;
use kshim_radix::{RadixTreeIter, RadixTreeRoot};

/// Run `f` on its own context and report whether it hit a `BUG()`.
pub fn is_fatal(f: impl FnOnce() + Send + 'static) -> bool {
    thread::spawn(f).join().is_err()
}

/// Indices visited by `radix_tree_for_each_slot(slot, root, iter, start)`,
/// driven through the exported helper symbols.
pub fn radix_indices(root: &RadixTreeRoot, start: c_ulong) -> Vec<c_ulong> {
    let mut iter = RadixTreeIter::new();
    let mut visited = Vec::new();
    // SAFETY: `root` is borrowed for the whole walk, so it cannot change.
    unsafe {
        let mut slot = rust_helper_radix_tree_iter_init(&mut iter, start);
        loop {
            if slot.is_null() {
                slot = radix_tree_next_chunk(root, &mut iter, 0);
                if slot.is_null() {
                    break;
                }
            }
            visited.push(iter.index);
            slot = rust_helper_radix_tree_next_slot(slot, &mut iter, 0);
        }
    }
    visited
}

/// A `long long` per-CPU allocation, freed on drop.
pub struct PerCpuLongLong {
    base: NonNull<c_longlong>,
}

// SAFETY: the slots are plain integers; cross-CPU access discipline is the
// scenario's business.
unsafe impl Send for PerCpuLongLong {}

impl PerCpuLongLong {
    pub fn alloc() -> Option<Self> {
        NonNull::new(rust_helper_alloc_percpu_longlong()).map(|base| Self { base })
    }

    pub fn nr_slots(&self) -> u32 {
        rust_helper_num_online_cpus()
    }

    pub fn slot(&self, cpu: u32) -> *mut c_longlong {
        rust_helper_per_cpu_ptr(self.base.as_ptr(), cpu as i32)
    }

    pub fn slots(&self) -> Vec<*mut c_longlong> {
        (0..self.nr_slots()).map(|cpu| self.slot(cpu)).collect()
    }

    pub fn sum(&self) -> c_longlong {
        // SAFETY: every slot lies inside the live allocation.
        self.slots().into_iter().map(|p| unsafe { *p }).sum()
    }
}

impl Drop for PerCpuLongLong {
    fn drop(&mut self) {
        // SAFETY: allocated above and never freed elsewhere.
        unsafe { rust_helper_free_percpu_longlong(self.base.as_ptr()) };
    }
}

impl fmt::Debug for PerCpuLongLong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerCpuLongLong")
            .field("base", &self.base)
            .finish()
    }
}

/// One folio reference, dropped with `folio_put`.
pub struct FolioRef(NonNull<Folio>);

// SAFETY: folio reference counts and flags are atomic.
unsafe impl Send for FolioRef {}

impl FolioRef {
    pub fn alloc(order: u32) -> KernelResult<Self> {
        kshim_mm::folio_alloc(GfpFlags::GFP_KERNEL, order).map(Self)
    }

    pub fn as_ptr(&self) -> *mut Folio {
        self.0.as_ptr()
    }

    pub fn get(&self) -> &Folio {
        // SAFETY: this handle owns a reference.
        unsafe { self.0.as_ref() }
    }
}

impl Drop for FolioRef {
    fn drop(&mut self) {
        // SAFETY: the handle's reference is consumed exactly once.
        unsafe { kshim_mm::folio_put(self.0) };
    }
}

impl fmt::Debug for FolioRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FolioRef")
            .field("refs", &self.get().ref_count())
            .finish()
    }
}

/// One inode reference, dropped with `iput`.
pub struct InodeRef(NonNull<Inode>);

// SAFETY: `Inode` is `Send + Sync`.
unsafe impl Send for InodeRef {}

impl InodeRef {
    pub fn alloc(ino: u64, mode: u32) -> Self {
        Self(Inode::alloc(ino, mode))
    }

    pub fn as_ptr(&self) -> *mut Inode {
        self.0.as_ptr()
    }

    /// Hand a new reference to a consumer such as `Dentry::alloc`.
    pub fn hold(&self) -> NonNull<Inode> {
        // SAFETY: this handle owns a reference.
        unsafe { kshim_fs::ihold(self.0) };
        self.0
    }

    pub fn get(&self) -> &Inode {
        // SAFETY: this handle owns a reference.
        unsafe { self.0.as_ref() }
    }
}

impl Drop for InodeRef {
    fn drop(&mut self) {
        // SAFETY: the handle's reference is consumed exactly once.
        unsafe { kshim_fs::iput(self.0) };
    }
}

impl fmt::Debug for InodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InodeRef")
            .field("ino", &self.get().i_ino)
            .field("refs", &self.get().count())
            .finish()
    }
}
