//! FFI compatibility layer for the helper boundary
//!
//! This crate provides the foundational C-facing types shared by every
//! helper: scalar aliases, allocation flags, errno values and the
//! error-pointer encoding used by functions that return `void *`.

#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]

use core::ffi::c_void;

pub mod err_ptr;
pub mod error;

pub use err_ptr::*;
pub use error::{errname, errname_c, KernelError, KernelResult};
pub use libc::{c_char, c_int, c_long, c_longlong, c_uint, c_ulong, size_t};

/// Kernel pointer type (matches C void*)
pub type KernelPtr = *mut c_void;

/// `pgoff_t`: page index inside a mapping.
pub type pgoff_t = c_ulong;

/// `sector_t`: 512-byte sector number.
pub type sector_t = u64;

/// `loff_t`: byte offset inside a file.
pub type loff_t = i64;

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
pub const PAGE_MASK: usize = !(PAGE_SIZE - 1);

/// Largest page order the buddy allocator hands out.
pub const MAX_ORDER: u32 = 10;

pub const SECTOR_SHIFT: u32 = 9;

/// Cache line size used to pad per-CPU units.
pub const L1_CACHE_BYTES: usize = 64;

bitflags::bitflags! {
    /// GFP (Get Free Page) flags matching Linux kernel
    ///
    /// Values follow `include/linux/gfp.h` of the kernel generation the
    /// bindings are generated against.
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct GfpFlags: u32 {
        const __GFP_DMA = 0x01;
        const __GFP_HIGHMEM = 0x02;
        const __GFP_DMA32 = 0x04;
        const __GFP_MOVABLE = 0x08;
        const __GFP_RECLAIMABLE = 0x10;
        const __GFP_HIGH = 0x20;
        const __GFP_IO = 0x40;
        const __GFP_FS = 0x80;
        const __GFP_ZERO = 0x100;
        const __GFP_ATOMIC = 0x200;
        const __GFP_DIRECT_RECLAIM = 0x400;
        const __GFP_KSWAPD_RECLAIM = 0x800;
        const __GFP_WRITE = 0x1000;
        const __GFP_NOWARN = 0x2000;
        const __GFP_RETRY_MAYFAIL = 0x4000;
        const __GFP_NOFAIL = 0x8000;
        const __GFP_NORETRY = 0x10000;
        const __GFP_MEMALLOC = 0x20000;
        const __GFP_COMP = 0x40000;
        const __GFP_NOMEMALLOC = 0x80000;
        const __GFP_HARDWALL = 0x100000;
        const __GFP_THISNODE = 0x200000;
        const __GFP_ACCOUNT = 0x400000;

        const __GFP_RECLAIM = Self::__GFP_DIRECT_RECLAIM.bits() | Self::__GFP_KSWAPD_RECLAIM.bits();

        const GFP_ATOMIC = Self::__GFP_HIGH.bits() | Self::__GFP_ATOMIC.bits() | Self::__GFP_KSWAPD_RECLAIM.bits();
        const GFP_KERNEL = Self::__GFP_RECLAIM.bits() | Self::__GFP_IO.bits() | Self::__GFP_FS.bits();
        const GFP_NOWAIT = Self::__GFP_KSWAPD_RECLAIM.bits();
        const GFP_NOIO = Self::__GFP_RECLAIM.bits();
        const GFP_NOFS = Self::__GFP_RECLAIM.bits() | Self::__GFP_IO.bits();
        const GFP_USER = Self::GFP_KERNEL.bits() | Self::__GFP_HARDWALL.bits();
        const GFP_HIGHUSER = Self::GFP_USER.bits() | Self::__GFP_HIGHMEM.bits();
    }
}

impl GfpFlags {
    /// `gfpflags_allow_blocking`: the allocation may enter direct reclaim
    /// and therefore sleep.
    pub const fn allows_blocking(self) -> bool {
        self.contains(Self::__GFP_DIRECT_RECLAIM)
    }

    /// Build from a raw C `gfp_t`, keeping unknown bits.
    pub const fn from_raw(raw: u32) -> Self {
        Self::from_bits_retain(raw)
    }
}

static_assertions::assert_eq_size!(GfpFlags, u32);
static_assertions::assert_eq_size!(size_t, usize);
