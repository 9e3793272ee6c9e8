//! Helpers called from C
//!
//! Each test drives a C function from `csrc/helper_calls.c` that reaches
//! the helpers only through their exported symbol names.

use core::ffi::{c_char, c_int, c_long, c_longlong, c_uint, c_ulong, c_void, CStr};
use core::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

// links the C callers
use kshim_abi_test as _;
use kshim_block::{BlkMqReqFlags, ReqOp, Request, TagSet};
use kshim_ffi::GfpFlags;
use kshim_fs::inode::S_IFREG;
use kshim_fs::{do_delayed_call, i_size_write, i_uid, DelayedCall, Inode};
use kshim_radix::RadixTreeRoot;
use kshim_sync::{RawSpinLock, RcuPointer};

extern "C" {
    fn c_err_ptr_round_trip(code: c_long) -> c_int;
    fn c_errname(err: c_int) -> *const c_char;
    fn c_percpu_count(rounds: c_int) -> c_longlong;
    fn c_spin_cycle(lock: *mut RawSpinLock, shared: *mut c_int) -> c_int;
    fn c_rcu_publish_and_read(data: *mut RcuPointer, value: *mut c_void) -> *mut c_void;
    fn c_current_signal_pending() -> c_int;
    fn c_page_fill(byte: u8) -> c_int;
    fn c_read_mapping_round_trip(index: c_ulong, byte: u8) -> c_int;
    fn c_radix_collect(
        root: *const RadixTreeRoot,
        start: c_ulong,
        indices: *mut c_ulong,
        items: *mut *mut c_void,
        max: c_int,
    ) -> c_int;
    fn c_rq_to_pdu(rq: *mut Request) -> *mut c_void;
    fn c_pdu_to_rq(pdu: *mut c_void) -> *mut Request;
    fn c_chown_and_size(inode: *mut Inode, uid: c_uint, gid: c_uint) -> c_longlong;
    fn c_dget_null_is_null() -> c_int;
    fn c_set_delayed_call(
        call: *mut DelayedCall,
        func: unsafe extern "C" fn(*mut c_void),
        arg: *mut c_void,
    );
    fn c_access_ok(addr: *const c_void, n: c_ulong) -> c_int;
}

#[test]
fn test_err_ptr_from_c() {
    for code in [-1, -12, -4095] {
        assert_eq!(unsafe { c_err_ptr_round_trip(code) }, 0, "code {code}");
    }
}

#[test]
fn test_errname_from_c() {
    let name = unsafe { c_errname(-5) };
    assert!(!name.is_null());
    assert_eq!(unsafe { CStr::from_ptr(name) }.to_str(), Ok("EIO"));
    assert!(unsafe { c_errname(-4000) }.is_null());
}

#[test]
fn test_percpu_counter_from_c() {
    assert_eq!(unsafe { c_percpu_count(1000) }, 1000);
}

#[test]
fn test_spinlock_from_c() {
    let mut lock = RawSpinLock::new();
    let mut shared = 0;
    assert_eq!(unsafe { c_spin_cycle(&mut lock, &mut shared) }, 2);
    assert!(!lock.is_locked());
}

#[test]
fn test_rcu_publish_from_c() {
    let mut value = 7u64;
    let mut data = RcuPointer::new(ptr::null_mut());
    let published = (&mut value as *mut u64).cast::<c_void>();
    let seen = unsafe { c_rcu_publish_and_read(&mut data, published) };
    assert_eq!(seen, published);
    assert_eq!(data.dereference(), published);
}

#[test]
fn test_current_task_from_c() {
    assert_eq!(unsafe { c_current_signal_pending() }, 0);
}

#[test]
fn test_page_mapping_from_c() {
    assert_eq!(unsafe { c_page_fill(0xa5) }, 0xa5);
}

#[test]
fn test_read_mapping_folio_from_c() {
    assert_eq!(unsafe { c_read_mapping_round_trip(3, 0x5a) }, 0x5a);
    assert_eq!(unsafe { c_read_mapping_round_trip(0, 0x01) }, 0x01);
}

#[test]
fn test_radix_walk_from_c() {
    let mut items = [1u32, 2, 3, 4];
    let indices = [0 as c_ulong, 1, 63, 4100];
    let mut root = RadixTreeRoot::new(GfpFlags::GFP_KERNEL);
    for (index, item) in indices.iter().zip(items.iter_mut()) {
        root.insert(*index, (item as *mut u32).cast()).unwrap();
    }

    let mut seen_idx = [0 as c_ulong; 8];
    let mut seen_items = [ptr::null_mut::<c_void>(); 8];
    let n = unsafe {
        c_radix_collect(&root, 0, seen_idx.as_mut_ptr(), seen_items.as_mut_ptr(), 8)
    };
    assert_eq!(n, 4);
    assert_eq!(seen_idx[..4], indices);
    for (seen, item) in seen_items.iter().zip(items.iter_mut()) {
        assert_eq!(*seen, (item as *mut u32).cast::<c_void>());
    }

    // starting past the first chunk skips its entries
    let n = unsafe {
        c_radix_collect(&root, 64, seen_idx.as_mut_ptr(), seen_items.as_mut_ptr(), 8)
    };
    assert_eq!(n, 1);
    assert_eq!(seen_idx[0], 4100);
}

#[test]
fn test_request_pdu_from_c() {
    let tags = TagSet::new(4, 32).unwrap();
    let rq = tags.alloc_request(ReqOp::Read, BlkMqReqFlags::empty()).unwrap();
    let pdu = unsafe { c_rq_to_pdu(rq.as_ptr()) };
    assert_eq!(pdu, rq.pdu_ptr().as_ptr());
    assert_eq!(unsafe { c_pdu_to_rq(pdu) }, rq.as_ptr());
}

#[test]
fn test_inode_helpers_from_c() {
    let inode = Inode::alloc(42, S_IFREG | 0o600);
    unsafe {
        i_size_write(inode.as_ref(), 8192);
        assert_eq!(c_chown_and_size(inode.as_ptr(), 1000, 100), 8192);
        assert_eq!(i_uid(inode.as_ref()).0, 1000);
        assert!(!inode.as_ref().is_locked());
        kshim_fs::iput(inode);
    }
}

#[test]
fn test_dget_null_from_c() {
    assert_eq!(unsafe { c_dget_null_is_null() }, 1);
}

#[test]
fn test_delayed_call_from_c() {
    unsafe extern "C" fn bump(arg: *mut c_void) {
        (*arg.cast::<AtomicUsize>()).fetch_add(1, Ordering::SeqCst);
    }

    let counter = AtomicUsize::new(0);
    let mut call = DelayedCall::new();
    unsafe {
        c_set_delayed_call(
            &mut call,
            bump,
            (&counter as *const AtomicUsize).cast_mut().cast(),
        );
    }
    do_delayed_call(&mut call);
    do_delayed_call(&mut call);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_access_ok_from_c() {
    assert_eq!(unsafe { c_access_ok(0x1000 as *const c_void, 64) }, 1);
    assert_eq!(unsafe { c_access_ok(usize::MAX as *const c_void, 2) }, 0);
    assert_eq!(unsafe { c_access_ok(ptr::null(), 0) }, 1);
}
