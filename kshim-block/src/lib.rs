//! Block layer bridge
//!
//! Requests with trailing driver data, bios with their bvec cursors and
//! the errno / `blk_status_t` translation.

pub mod bio;
pub mod request;
pub mod status;

pub use bio::{
    bio_advance_iter_single, bio_endio, bio_no_advance_iter, bvec_iter_advance, bvec_iter_bvec,
    Bio, BioVec, BvecIter, ReqOp,
};
pub use request::{
    blk_mq_rq_from_pdu, blk_mq_rq_to_pdu, BlkMqReqFlags, MqRqState, Request, RequestRef, TagSet,
};
pub use status::{blk_status_to_errno, errno_to_blk_status, BlkStatus};

static_assertions::assert_eq_size!(BlkStatus, u8);
static_assertions::const_assert_eq!(core::mem::size_of::<BvecIter>(), 24);
