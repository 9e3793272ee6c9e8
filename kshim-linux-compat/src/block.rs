//! Block layer helpers

use core::ffi::c_void;

use kshim_ffi::c_uint;

use crate::bug::{arg, arg_mut};
use crate::types::{bio, bvec_iter, request};

/// Linux equivalent: `blk_mq_rq_to_pdu(rq)`
///
/// The driver data placed right after the request.
#[no_mangle]
pub extern "C" fn rust_helper_blk_mq_rq_to_pdu(rq: *mut request) -> *mut c_void {
    kshim_block::blk_mq_rq_to_pdu(rq)
}

/// Linux equivalent: `blk_mq_rq_from_pdu(pdu)`
#[no_mangle]
pub extern "C" fn rust_helper_blk_mq_rq_from_pdu(pdu: *mut c_void) -> *mut request {
    kshim_block::blk_mq_rq_from_pdu(pdu)
}

/// Linux equivalent: `bio_advance_iter_single(bio, iter, bytes)`
///
/// # Safety
///
/// `bio` and `iter` must be valid and `bytes` must not cross the current
/// segment.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_bio_advance_iter_single(
    bio: *const bio,
    iter: *mut bvec_iter,
    bytes: c_uint,
) {
    kshim_block::bio_advance_iter_single(
        arg(bio, "bio_advance_iter_single"),
        arg_mut(iter, "bio_advance_iter_single"),
        bytes,
    );
}
