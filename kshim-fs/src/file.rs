//! Open files

use core::ffi::c_void;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicI64, Ordering};

use kshim_core::Kref;
use kshim_ffi::loff_t;

use crate::dcache::{dget, dput, Dentry};
use crate::inode::Inode;

pub const O_RDONLY: u32 = 0o0;
pub const O_WRONLY: u32 = 0o1;
pub const O_RDWR: u32 = 0o2;

/// `struct file`
#[repr(C)]
pub struct File {
    f_count: Kref,
    pub f_flags: u32,
    f_pos: AtomicI64,
    f_dentry: NonNull<Dentry>,
    pub private_data: *mut c_void,
}

// SAFETY: the count and position are atomic, the dentry is reference
// counted.
unsafe impl Send for File {}
unsafe impl Sync for File {}

impl File {
    /// Open `dentry`, taking a new reference on it. The file starts with
    /// one reference owned by the caller.
    ///
    /// # Safety
    /// The caller must hold a reference on `dentry`.
    pub unsafe fn open(dentry: NonNull<Dentry>, flags: u32) -> NonNull<File> {
        let file = Box::new(File {
            f_count: Kref::new(),
            f_flags: flags,
            f_pos: AtomicI64::new(0),
            f_dentry: dget(dentry),
            private_data: ptr::null_mut(),
        });
        NonNull::from(Box::leak(file))
    }

    pub fn dentry(&self) -> &Dentry {
        // SAFETY: the file holds a dentry reference until freed.
        unsafe { self.f_dentry.as_ref() }
    }

    /// `file_inode()`
    pub fn inode(&self) -> Option<&Inode> {
        self.dentry().inode()
    }

    pub fn pos(&self) -> loff_t {
        self.f_pos.load(Ordering::Relaxed)
    }

    pub fn set_pos(&self, pos: loff_t) {
        self.f_pos.store(pos, Ordering::Relaxed);
    }

    /// `file_count()`
    pub fn count(&self) -> u32 {
        self.f_count.count()
    }
}

/// `get_file()`: another reference, returned for chaining.
///
/// # Safety
/// `file` must be live and the caller must hold a reference.
pub unsafe fn get_file(file: NonNull<File>) -> NonNull<File> {
    file.as_ref().f_count.get();
    file
}

/// `fput()`: the last reference frees the file and drops its dentry.
/// Release runs synchronously in the caller's context.
///
/// # Safety
/// The caller's reference is consumed.
pub unsafe fn fput(file: NonNull<File>) {
    if !file.as_ref().f_count.put() {
        return;
    }
    let file = Box::from_raw(file.as_ptr());
    tracing::trace!(name = file.dentry().name(), "file released");
    dput(file.f_dentry);
}
