//! Directory entries

use core::ptr::NonNull;

use kshim_core::Kref;
use kshim_ffi::{KernelError, KernelResult};

use crate::inode::{iput, Inode};

/// Longest name stored inline, including the terminating NUL.
pub const DNAME_INLINE_LEN: usize = 32;

/// `struct dentry`
#[repr(C)]
pub struct Dentry {
    d_count: Kref,
    d_name_len: u32,
    d_inode: *mut Inode,
    d_iname: [u8; DNAME_INLINE_LEN],
}

// SAFETY: the count is atomic, everything else is fixed at allocation.
unsafe impl Send for Dentry {}
unsafe impl Sync for Dentry {}

impl Dentry {
    /// `d_alloc()` + `d_instantiate()`: a dentry named `name`, consuming the
    /// caller's reference on `inode`. `None` makes a negative dentry.
    pub fn alloc(name: &str, inode: Option<NonNull<Inode>>) -> KernelResult<NonNull<Dentry>> {
        if name.len() >= DNAME_INLINE_LEN {
            return Err(KernelError::ENAMETOOLONG);
        }
        let mut d_iname = [0u8; DNAME_INLINE_LEN];
        d_iname[..name.len()].copy_from_slice(name.as_bytes());
        let dentry = Box::new(Dentry {
            d_count: Kref::new(),
            d_name_len: name.len() as u32,
            d_inode: inode.map_or(core::ptr::null_mut(), NonNull::as_ptr),
            d_iname,
        });
        Ok(NonNull::from(Box::leak(dentry)))
    }

    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.d_iname[..self.d_name_len as usize]).unwrap_or("")
    }

    /// `d_inode()`
    pub fn inode(&self) -> Option<&Inode> {
        // SAFETY: the dentry holds a reference on its inode.
        unsafe { self.d_inode.as_ref() }
    }

    /// `d_really_is_negative()`
    pub fn is_negative(&self) -> bool {
        self.d_inode.is_null()
    }

    pub fn count(&self) -> u32 {
        self.d_count.count()
    }
}

/// `dget()`: another reference, returned for chaining.
///
/// # Safety
/// `dentry` must be live and the caller must hold a reference.
pub unsafe fn dget(dentry: NonNull<Dentry>) -> NonNull<Dentry> {
    dentry.as_ref().d_count.get();
    dentry
}

/// `dput()`: the last reference frees the dentry and drops its inode.
///
/// # Safety
/// The caller's reference is consumed.
pub unsafe fn dput(dentry: NonNull<Dentry>) {
    if !dentry.as_ref().d_count.put() {
        return;
    }
    let dentry = Box::from_raw(dentry.as_ptr());
    tracing::trace!(name = dentry.name(), "dentry freed");
    if let Some(inode) = NonNull::new(dentry.d_inode) {
        iput(inode);
    }
}
