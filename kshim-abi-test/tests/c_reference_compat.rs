//! C Reference Compatibility Tests
//!
//! Compare the Rust structures against the layouts a C compiler produces
//! for the same declarations (generated by build.rs).

use kshim_abi_test::verify_struct_layout;
use kshim_block::{BioVec, BlkStatus, BvecIter};
use kshim_core::Kref;
use kshim_fs::DelayedCall;
use kshim_radix::RadixTreeIter;
use kshim_sync::RcuPointer;

extern "C" {
    fn kref_size() -> usize;
    fn rcudata_size() -> usize;
    fn bio_vec_size() -> usize;
    fn bvec_iter_size() -> usize;
    fn radix_tree_iter_size() -> usize;
    fn delayed_call_size() -> usize;

    fn rcudata_align() -> usize;
    fn bio_vec_align() -> usize;
    fn bvec_iter_align() -> usize;
    fn radix_tree_iter_align() -> usize;
    fn delayed_call_align() -> usize;

    fn bio_vec_len_offset() -> usize;
    fn bio_vec_offset_offset() -> usize;
    fn bvec_iter_size_offset() -> usize;
    fn bvec_iter_idx_offset() -> usize;
    fn bvec_iter_done_offset() -> usize;
    fn radix_tree_iter_next_index_offset() -> usize;
    fn radix_tree_iter_tags_offset() -> usize;
    fn radix_tree_iter_node_offset() -> usize;
    fn delayed_call_arg_offset() -> usize;

    static VERIFY_GFP_KERNEL: u32;
    static VERIFY_GFP_ATOMIC: u32;

    static VERIFY_EPERM: i32;
    static VERIFY_ENOENT: i32;
    static VERIFY_EINTR: i32;
    static VERIFY_EIO: i32;
    static VERIFY_EAGAIN: i32;
    static VERIFY_ENOMEM: i32;
    static VERIFY_EBUSY: i32;
    static VERIFY_EINVAL: i32;
    static VERIFY_ENOSPC: i32;
    static VERIFY_ENAMETOOLONG: i32;
    static VERIFY_EOPNOTSUPP: i32;
    static VERIFY_ETIMEDOUT: i32;
    static VERIFY_MAX_ERRNO: libc::c_long;

    static VERIFY_BLK_STS_OK: u8;
    static VERIFY_BLK_STS_NOTSUPP: u8;
    static VERIFY_BLK_STS_TIMEOUT: u8;
    static VERIFY_BLK_STS_NOSPC: u8;
    static VERIFY_BLK_STS_RESOURCE: u8;
    static VERIFY_BLK_STS_IOERR: u8;
    static VERIFY_BLK_STS_AGAIN: u8;
}

#[test]
fn test_bio_vec_vs_c() {
    unsafe {
        let result = verify_struct_layout::<BioVec>("bio_vec", bio_vec_size(), bio_vec_align());
        assert!(result.is_compatible(), "{result:?}");

        assert_eq!(
            memoffset::offset_of!(BioVec, bv_len),
            bio_vec_len_offset(),
            "BioVec.bv_len offset must match C"
        );
        assert_eq!(
            memoffset::offset_of!(BioVec, bv_offset),
            bio_vec_offset_offset(),
            "BioVec.bv_offset offset must match C"
        );
    }
}

#[test]
fn test_bvec_iter_vs_c() {
    unsafe {
        let result =
            verify_struct_layout::<BvecIter>("bvec_iter", bvec_iter_size(), bvec_iter_align());
        assert!(result.is_compatible(), "{result:?}");

        assert_eq!(memoffset::offset_of!(BvecIter, bi_sector), 0);
        assert_eq!(
            memoffset::offset_of!(BvecIter, bi_size),
            bvec_iter_size_offset(),
            "BvecIter.bi_size offset must match C"
        );
        assert_eq!(
            memoffset::offset_of!(BvecIter, bi_idx),
            bvec_iter_idx_offset(),
            "BvecIter.bi_idx offset must match C"
        );
        assert_eq!(
            memoffset::offset_of!(BvecIter, bi_bvec_done),
            bvec_iter_done_offset(),
            "BvecIter.bi_bvec_done offset must match C"
        );
    }
}

#[test]
fn test_radix_tree_iter_vs_c() {
    unsafe {
        let result = verify_struct_layout::<RadixTreeIter>(
            "radix_tree_iter",
            radix_tree_iter_size(),
            radix_tree_iter_align(),
        );
        assert!(result.is_compatible(), "{result:?}");

        assert_eq!(
            memoffset::offset_of!(RadixTreeIter, next_index),
            radix_tree_iter_next_index_offset()
        );
        assert_eq!(
            memoffset::offset_of!(RadixTreeIter, tags),
            radix_tree_iter_tags_offset()
        );
        assert_eq!(
            memoffset::offset_of!(RadixTreeIter, node),
            radix_tree_iter_node_offset()
        );
    }
}

#[test]
fn test_rcudata_vs_c() {
    unsafe {
        let result =
            verify_struct_layout::<RcuPointer>("rcudata", rcudata_size(), rcudata_align());
        assert!(result.is_compatible(), "{result:?}");
    }
}

#[test]
fn test_delayed_call_vs_c() {
    unsafe {
        let result = verify_struct_layout::<DelayedCall>(
            "delayed_call",
            delayed_call_size(),
            delayed_call_align(),
        );
        assert!(result.is_compatible(), "{result:?}");
        // fn pointer first, argument in the second word
        assert_eq!(delayed_call_arg_offset(), core::mem::size_of::<usize>());
    }
}

#[test]
fn test_kref_vs_c() {
    unsafe {
        assert_eq!(
            core::mem::size_of::<Kref>(),
            kref_size(),
            "Kref size must match C struct kref"
        );
    }
}

#[test]
fn test_gfp_flags_vs_c() {
    use kshim_ffi::GfpFlags;

    unsafe {
        assert_eq!(
            GfpFlags::GFP_KERNEL.bits(),
            VERIFY_GFP_KERNEL,
            "GFP_KERNEL must match C value"
        );
        assert_eq!(
            GfpFlags::GFP_ATOMIC.bits(),
            VERIFY_GFP_ATOMIC,
            "GFP_ATOMIC must match C value"
        );
    }
}

#[test]
fn test_error_codes_vs_c() {
    use kshim_ffi::KernelError;

    unsafe {
        let pairs = [
            (KernelError::EPERM, VERIFY_EPERM),
            (KernelError::ENOENT, VERIFY_ENOENT),
            (KernelError::EINTR, VERIFY_EINTR),
            (KernelError::EIO, VERIFY_EIO),
            (KernelError::EAGAIN, VERIFY_EAGAIN),
            (KernelError::ENOMEM, VERIFY_ENOMEM),
            (KernelError::EBUSY, VERIFY_EBUSY),
            (KernelError::EINVAL, VERIFY_EINVAL),
            (KernelError::ENOSPC, VERIFY_ENOSPC),
            (KernelError::ENAMETOOLONG, VERIFY_ENAMETOOLONG),
            (KernelError::EOPNOTSUPP, VERIFY_EOPNOTSUPP),
            (KernelError::ETIMEDOUT, VERIFY_ETIMEDOUT),
        ];
        for (err, c_value) in pairs {
            assert_eq!(err.code(), c_value, "{err:?} must match C errno");
        }
        assert_eq!(kshim_ffi::MAX_ERRNO as libc::c_long, VERIFY_MAX_ERRNO);
    }
}

#[test]
fn test_blk_status_vs_c() {
    unsafe {
        let pairs = [
            (BlkStatus::OK, VERIFY_BLK_STS_OK),
            (BlkStatus::NOTSUPP, VERIFY_BLK_STS_NOTSUPP),
            (BlkStatus::TIMEOUT, VERIFY_BLK_STS_TIMEOUT),
            (BlkStatus::NOSPC, VERIFY_BLK_STS_NOSPC),
            (BlkStatus::RESOURCE, VERIFY_BLK_STS_RESOURCE),
            (BlkStatus::IOERR, VERIFY_BLK_STS_IOERR),
            (BlkStatus::AGAIN, VERIFY_BLK_STS_AGAIN),
        ];
        for (status, c_value) in pairs {
            assert_eq!(status.as_raw(), c_value, "{status:?} must match C");
        }
    }
}
