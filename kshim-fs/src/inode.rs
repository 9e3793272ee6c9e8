//! Inodes
//!
//! `i_size` is kept as two 32-bit halves published under a seqcount, the
//! way 32-bit SMP kernels do, so readers never see a torn size. Writers are
//! serialized by the caller, normally by holding `i_rwsem` exclusively.

use core::ffi::c_void;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicU32, Ordering};

use kshim_core::{Gid, Kref, Uid};
use kshim_ffi::loff_t;
use kshim_sync::{RwSemaphore, SeqCount};

/// `umode_t` file type bits.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;

/// `struct inode`
#[repr(C)]
pub struct Inode {
    pub i_mode: u32,
    i_uid: AtomicU32,
    i_gid: AtomicU32,
    pub i_ino: u64,
    i_size_lo: AtomicU32,
    i_size_hi: AtomicU32,
    i_size_seqcount: SeqCount,
    i_rwsem: RwSemaphore,
    i_count: Kref,
    pub i_private: *mut c_void,
}

// SAFETY: shared state is atomic or lock protected; `i_private` belongs to
// the filesystem.
unsafe impl Send for Inode {}
unsafe impl Sync for Inode {}

impl Inode {
    /// `new_inode()`: one reference owned by the caller.
    pub fn alloc(ino: u64, mode: u32) -> NonNull<Inode> {
        let inode = Box::new(Inode {
            i_mode: mode,
            i_uid: AtomicU32::new(0),
            i_gid: AtomicU32::new(0),
            i_ino: ino,
            i_size_lo: AtomicU32::new(0),
            i_size_hi: AtomicU32::new(0),
            i_size_seqcount: SeqCount::new(),
            i_rwsem: RwSemaphore::new(),
            i_count: Kref::new(),
            i_private: ptr::null_mut(),
        });
        tracing::trace!(ino, mode, "inode allocated");
        NonNull::from(Box::leak(inode))
    }

    pub fn count(&self) -> u32 {
        self.i_count.count()
    }

    pub fn is_dir(&self) -> bool {
        self.i_mode & S_IFMT == S_IFDIR
    }

    pub fn is_reg(&self) -> bool {
        self.i_mode & S_IFMT == S_IFREG
    }

    /// `inode_is_locked()`
    pub fn is_locked(&self) -> bool {
        self.i_rwsem.is_locked()
    }
}

/// `i_size_read()`
pub fn i_size_read(inode: &Inode) -> loff_t {
    inode.i_size_seqcount.read(|| {
        let lo = inode.i_size_lo.load(Ordering::Relaxed) as u64;
        let hi = inode.i_size_hi.load(Ordering::Relaxed) as u64;
        ((hi << 32) | lo) as loff_t
    })
}

/// `i_size_write()`: writers must be serialized, a concurrent second
/// writer is fatal.
pub fn i_size_write(inode: &Inode, size: loff_t) {
    let raw = size as u64;
    inode.i_size_seqcount.write(|| {
        inode.i_size_lo.store(raw as u32, Ordering::Relaxed);
        inode.i_size_hi.store((raw >> 32) as u32, Ordering::Relaxed);
    });
}

/// `i_uid_read()`: the raw id, `(uid_t)-1` for an invalid one.
pub fn i_uid_read(inode: &Inode) -> u32 {
    i_uid(inode).0
}

/// `i_uid_write()`. Ids map one to one; `(uid_t)-1` is `INVALID_UID`.
pub fn i_uid_write(inode: &Inode, uid: u32) {
    inode.i_uid.store(uid, Ordering::Relaxed);
}

pub fn i_uid(inode: &Inode) -> Uid {
    Uid(inode.i_uid.load(Ordering::Relaxed))
}

pub fn i_gid_read(inode: &Inode) -> u32 {
    i_gid(inode).0
}

/// `i_gid_write()`
pub fn i_gid_write(inode: &Inode, gid: u32) {
    inode.i_gid.store(gid, Ordering::Relaxed);
}

pub fn i_gid(inode: &Inode) -> Gid {
    Gid(inode.i_gid.load(Ordering::Relaxed))
}

/// `inode_lock()`. May sleep.
pub fn inode_lock(inode: &Inode) {
    inode.i_rwsem.down_write();
}

/// `inode_unlock()`
pub fn inode_unlock(inode: &Inode) {
    inode.i_rwsem.up_write();
}

/// `inode_lock_shared()`. May sleep.
pub fn inode_lock_shared(inode: &Inode) {
    inode.i_rwsem.down_read();
}

/// `inode_unlock_shared()`
pub fn inode_unlock_shared(inode: &Inode) {
    inode.i_rwsem.up_read();
}

/// `inode_trylock()`
pub fn inode_trylock(inode: &Inode) -> bool {
    inode.i_rwsem.down_write_trylock()
}

/// `inode_trylock_shared()`
pub fn inode_trylock_shared(inode: &Inode) -> bool {
    inode.i_rwsem.down_read_trylock()
}

/// `ihold()`: take another reference. The caller must already hold one.
///
/// # Safety
/// `inode` must be live.
pub unsafe fn ihold(inode: NonNull<Inode>) {
    inode.as_ref().i_count.get();
}

/// `iput()`: drop a reference, evicting the inode on the last one.
///
/// # Safety
/// The caller's reference is consumed; `inode` must not be used after.
pub unsafe fn iput(inode: NonNull<Inode>) {
    if inode.as_ref().i_count.put() {
        let inode = Box::from_raw(inode.as_ptr());
        kshim_core::bug_on!(
            inode.i_rwsem.is_locked(),
            "evicting inode {} with i_rwsem held",
            inode.i_ino
        );
        tracing::trace!(ino = inode.i_ino, "inode evicted");
    }
}
