//! kshim-selftest: exercise every helper once
//!
//! Loads the runtime configuration, installs tracing and the hosted
//! runtime, then calls each exported `rust_helper_*` symbol the way a
//! foreign module would and checks the result.
//!
//! ## Configuration
//! - KSHIM_CONFIG: YAML config path (default: kshim.yaml)
//! - KSHIM_ONLINE_CPUS: CPUs reported by `num_online_cpus()`
//! - KSHIM_PAGE_LIMIT: page allocation limit, or "none"
//! - KSHIM_LOG: tracing filter directive
//!
//! Exits non-zero if any check fails.

use std::ffi::{c_void, CStr};
use std::ptr::{self, NonNull};

use tracing::{error, info};

use kshim::kshim_block::{
    blk_status_to_errno, errno_to_blk_status, BlkMqReqFlags, BlkStatus, ReqOp, TagSet,
};
use kshim::kshim_ffi::{c_int, c_long, c_ulong, GfpFlags, KernelError, PAGE_SIZE};
use kshim::kshim_fs::inode::S_IFREG;
use kshim::kshim_fs::{dput, fput, i_gid, i_size_write, i_uid, Dentry, DelayedCall, File, Inode};
use kshim::kshim_linux_compat::{block, err, fs, mm, percpu, radix, sync, task};
use kshim::kshim_linux_compat::{bio, folio};
use kshim::kshim_radix::{RadixTreeIter, RadixTreeRoot};
use kshim::kshim_sync::{RawMutex, RawSpinLock, RcuPointer};
use kshim::{Config, ConfigError, InitError};

#[derive(Debug, thiserror::Error)]
enum SelftestError {
    #[error("check failed: {0}")]
    Check(&'static str),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Init(#[from] InitError),
}

macro_rules! ensure {
    ($cond:expr) => {
        if !$cond {
            return Err(SelftestError::Check(stringify!($cond)));
        }
    };
}

type Check = fn() -> Result<(), SelftestError>;

const CHECKS: &[(&str, Check)] = &[
    ("sync", check_sync),
    ("task", check_task),
    ("err_ptr", check_err_ptr),
    ("percpu", check_percpu),
    ("page", check_page),
    ("folio", check_folio),
    ("page_cache", check_page_cache),
    ("radix", check_radix),
    ("block", check_block),
    ("fs", check_fs),
];

fn check_sync() -> Result<(), SelftestError> {
    let mut lock = RawSpinLock::new();
    let mut mutex = RawMutex::new();
    let mut value = 7u64;
    let mut data = RcuPointer::new(ptr::null_mut());
    let published = (&mut value as *mut u64).cast::<c_void>();

    // SAFETY: every object lives on this frame for the whole check.
    unsafe {
        sync::rust_helper_spin_lock_init(&mut lock, ptr::null(), ptr::null_mut());
        sync::rust_helper_spin_lock(&mut lock);
        ensure!(lock.is_locked());
        sync::rust_helper_spin_unlock(&mut lock);

        let flags = sync::rust_helper_spin_lock_irqsave(&mut lock);
        sync::rust_helper_spin_unlock_irqrestore(&mut lock, flags);
        ensure!(!lock.is_locked());

        sync::rust_helper_mutex_init(&mut mutex);
        sync::rust_helper_mutex_lock(&mut mutex);
        ensure!(mutex.is_locked());
        sync::rust_helper_mutex_unlock(&mut mutex);
        ensure!(!mutex.is_locked());

        sync::rust_helper_rcu_assign_pointer(&mut data, published);
        sync::rust_helper_rcu_read_lock();
        let seen = sync::rust_helper_rcu_dereference(&mut data);
        sync::rust_helper_rcu_read_unlock();
        ensure!(seen == published);
    }
    sync::rust_helper_synchronize_rcu();
    Ok(())
}

fn check_task() -> Result<(), SelftestError> {
    let current = task::rust_helper_get_current();
    ensure!(!current.is_null());
    // SAFETY: `current` is live for the calling thread.
    unsafe {
        let before = (*current).usage();
        task::rust_helper_get_task_struct(current);
        ensure!((*current).usage() == before + 1);
        task::rust_helper_put_task_struct(current);
        ensure!((*current).usage() == before);
        ensure!(task::rust_helper_signal_pending(current) == 0);
    }
    Ok(())
}

fn check_err_ptr() -> Result<(), SelftestError> {
    let p = err::rust_helper_ERR_PTR(c_long::from(KernelError::ENOMEM.to_errno()));
    ensure!(err::rust_helper_IS_ERR(p));
    ensure!(err::rust_helper_PTR_ERR(p) == -12);

    let value = 0u32;
    ensure!(!err::rust_helper_IS_ERR((&value as *const u32).cast()));
    ensure!(!err::rust_helper_IS_ERR(ptr::null()));

    let name = err::rust_helper_errname(-12);
    ensure!(!name.is_null());
    // SAFETY: non-null names are static C strings.
    ensure!(unsafe { CStr::from_ptr(name) }.to_bytes() == b"ENOMEM");
    ensure!(err::rust_helper_errname(-4000).is_null());
    Ok(())
}

fn check_percpu() -> Result<(), SelftestError> {
    let base = percpu::rust_helper_alloc_percpu_longlong();
    let base = NonNull::new(base).ok_or(KernelError::ENOMEM)?;
    let cpus = percpu::rust_helper_num_online_cpus();
    let slot = |cpu: u32| percpu::rust_helper_per_cpu_ptr(base.as_ptr(), cpu as c_int);

    // SAFETY: every slot lies inside the allocation, freed at the end.
    let sum = unsafe {
        if (0..cpus).any(|cpu| *slot(cpu) != 0) {
            percpu::rust_helper_free_percpu_longlong(base.as_ptr());
            return Err(SelftestError::Check("fresh per-CPU slots are zero"));
        }
        for _ in 0..10 {
            let cpu = percpu::rust_helper_get_cpu();
            *slot(cpu as u32) += 1;
            percpu::rust_helper_put_cpu();
        }
        let sum: i64 = (0..cpus).map(|cpu| *slot(cpu)).sum();
        percpu::rust_helper_free_percpu_longlong(base.as_ptr());
        sum
    };
    ensure!(sum == 10);
    Ok(())
}

fn check_page() -> Result<(), SelftestError> {
    let page = mm::rust_helper_alloc_pages(GfpFlags::GFP_KERNEL.bits(), 0);
    ensure!(!page.is_null());
    // SAFETY: the page is referenced until the final put.
    unsafe {
        mm::rust_helper_get_page(page);
        let ok = (*page).ref_count() == 2;
        mm::rust_helper_put_page(page);
        ensure!(ok);

        let addr = mm::rust_helper_kmap(page).cast::<u8>();
        ptr::write_bytes(addr, 0x5a, PAGE_SIZE);
        mm::rust_helper_kunmap(page);

        let addr = mm::rust_helper_kmap_atomic(page).cast::<u8>();
        let last = *addr.add(PAGE_SIZE - 1);
        mm::rust_helper_kunmap_atomic(addr.cast());
        mm::rust_helper_put_page(page);
        ensure!(last == 0x5a);
    }
    Ok(())
}

fn check_folio() -> Result<(), SelftestError> {
    let f = mm::rust_helper_folio_alloc(GfpFlags::GFP_KERNEL.bits(), 2);
    ensure!(!f.is_null());
    // SAFETY: `f` is referenced until the final put.
    unsafe {
        let fresh = !mm::rust_helper_folio_test_uptodate(f);
        mm::rust_helper_folio_mark_uptodate(f);
        let marked = mm::rust_helper_folio_test_uptodate(f);
        mm::rust_helper_folio_get(f);
        let refs = (*f).ref_count();
        let pages = (*f).nr_pages();
        mm::rust_helper_folio_put(f);
        mm::rust_helper_folio_put(f);
        ensure!(fresh && marked);
        ensure!(refs == 2);
        ensure!(pages == 4);
    }
    Ok(())
}

/// Fills the folio with its index, like a foreign filesystem's `read_folio`.
unsafe extern "C" fn fill_with_index(_file: *mut c_void, f: *mut folio) -> c_int {
    let data = [(*f).index() as u8; 16];
    let rc = match (*f).write(0, &data) {
        Ok(()) => {
            mm::rust_helper_folio_mark_uptodate(f);
            0
        }
        Err(e) => e.to_errno(),
    };
    (*f).unlock();
    rc
}

unsafe extern "C" fn fail_with_eio(_file: *mut c_void, f: *mut folio) -> c_int {
    (*f).unlock();
    KernelError::EIO.to_errno()
}

fn check_page_cache() -> Result<(), SelftestError> {
    let mut mapping = mm::foreign_address_space(fill_with_index);
    // SAFETY: `mapping` outlives every folio taken from it.
    unsafe {
        let f = mm::rust_helper_read_mapping_folio(&mut mapping, 3, ptr::null_mut());
        ensure!(!err::rust_helper_IS_ERR(f.cast::<c_void>()));
        let mut head = [0u8; 16];
        let read = (*f).read(0, &mut head);
        mm::rust_helper_folio_put(f);
        read?;
        ensure!(head == [3u8; 16]);
    }

    let mut failing = mm::foreign_address_space(fail_with_eio);
    // SAFETY: as above.
    let f = unsafe { mm::rust_helper_read_mapping_folio(&mut failing, 0, ptr::null_mut()) };
    ensure!(err::rust_helper_IS_ERR(f.cast::<c_void>()));
    let eio = c_long::from(KernelError::EIO.to_errno());
    ensure!(err::rust_helper_PTR_ERR(f.cast::<c_void>()) == eio);
    Ok(())
}

fn check_radix() -> Result<(), SelftestError> {
    let mut items = [0u8; 3];
    let mut root = RadixTreeRoot::new(GfpFlags::GFP_ATOMIC);
    // SAFETY: `root` is valid and empty.
    unsafe { radix::rust_helper_init_radix_tree(&mut root, GfpFlags::GFP_KERNEL.bits()) };
    for (index, item) in [9, 2, 5].into_iter().zip(items.iter_mut()) {
        root.insert(index, (item as *mut u8).cast())?;
    }

    let mut iter = RadixTreeIter::new();
    let mut visited: Vec<c_ulong> = Vec::new();
    // SAFETY: the tree is not modified during the walk.
    unsafe {
        let mut slot = radix::rust_helper_radix_tree_iter_init(&mut iter, 0);
        loop {
            if slot.is_null() {
                slot = radix::radix_tree_next_chunk(&root, &mut iter, 0);
                if slot.is_null() {
                    break;
                }
            }
            visited.push(iter.index);
            slot = radix::rust_helper_radix_tree_next_slot(slot, &mut iter, 0);
        }
    }
    ensure!(visited == [2, 5, 9]);
    Ok(())
}

fn check_block() -> Result<(), SelftestError> {
    let tags = TagSet::new(4, 64)?;
    let rq = tags.alloc_request(ReqOp::Write, BlkMqReqFlags::empty())?;
    let pdu = block::rust_helper_blk_mq_rq_to_pdu(rq.as_ptr());
    ensure!(pdu == rq.pdu_ptr().as_ptr());
    ensure!(block::rust_helper_blk_mq_rq_from_pdu(pdu) == rq.as_ptr());
    drop(rq);

    let page = kshim::kshim_mm::alloc_page(GfpFlags::GFP_KERNEL)?;
    let mut b = bio::alloc(ReqOp::Read as u32, 0, 2);
    b.add_page(page, 2048, 0);
    b.add_page(page, 2048, 2048);
    let mut iter = b.bi_iter;
    // SAFETY: 2048 bytes stay within the first segment.
    unsafe { block::rust_helper_bio_advance_iter_single(&*b, &mut iter, 2048) };
    drop(b);
    // SAFETY: the bio held no reference of its own.
    unsafe { kshim::kshim_mm::put_page(page) };
    ensure!(iter.bi_idx == 1);
    ensure!(iter.bi_size == 2048);
    ensure!(iter.bi_sector == 4);

    ensure!(errno_to_blk_status(KernelError::EIO.to_errno()) == BlkStatus::IOERR);
    ensure!(blk_status_to_errno(BlkStatus::AGAIN) == KernelError::EAGAIN.to_errno());
    ensure!(blk_status_to_errno(BlkStatus::OK) == 0);
    Ok(())
}

unsafe extern "C" fn count_call(arg: *mut c_void) {
    *arg.cast::<u32>() += 1;
}

fn check_fs() -> Result<(), SelftestError> {
    let inode = Inode::alloc(11, S_IFREG | 0o644);
    // SAFETY: the inode reference moves into the dentry below.
    let size = unsafe {
        let p = inode.as_ptr();
        i_size_write(inode.as_ref(), 1 << 32);
        fs::rust_helper_inode_lock_shared(p);
        let size = fs::rust_helper_i_size_read(p);
        fs::rust_helper_inode_unlock_shared(p);
        fs::rust_helper_i_uid_write(p, 1000);
        fs::rust_helper_i_gid_write(p, 100);
        size
    };
    // SAFETY: as above.
    let (uid, gid) = unsafe { (i_uid(inode.as_ref()).0, i_gid(inode.as_ref()).0) };

    let dentry = Dentry::alloc("selftest", Some(inode))?;
    // SAFETY: every reference taken here is dropped before returning.
    let (dentry_refs, file_refs) = unsafe {
        let d = fs::rust_helper_dget(dentry.as_ptr());
        let dentry_refs = dentry.as_ref().count();
        let file = File::open(dentry, 0);
        let f = fs::rust_helper_get_file(file.as_ptr());
        let file_refs = file.as_ref().count();
        fput(file);
        fput(NonNull::new_unchecked(f));
        dput(NonNull::new_unchecked(d));
        dput(dentry);
        (dentry_refs, file_refs)
    };

    let mut hits = 0u32;
    let mut call = DelayedCall::new();
    // SAFETY: `hits` outlives the call.
    unsafe {
        fs::rust_helper_set_delayed_call(&mut call, count_call, (&mut hits as *mut u32).cast())
    };
    kshim::kshim_fs::do_delayed_call(&mut call);
    kshim::kshim_fs::do_delayed_call(&mut call);

    ensure!(size == 1 << 32);
    ensure!(uid == 1000 && gid == 100);
    ensure!(dentry_refs == 2);
    ensure!(file_refs == 2);
    ensure!(hits == 1);
    // SAFETY: `dget(NULL)` is defined to return NULL.
    ensure!(unsafe { fs::rust_helper_dget(ptr::null_mut()) }.is_null());
    Ok(())
}

fn run() -> Result<usize, SelftestError> {
    let config = Config::load()?;
    kshim::init(&config)?;
    info!(
        online_cpus = config.runtime.online_cpus,
        page_limit = ?config.runtime.page_limit,
        "kshim-selftest started"
    );

    let mut failed = 0;
    for (name, check) in CHECKS {
        match check() {
            Ok(()) => info!(check = name, "ok"),
            Err(e) => {
                error!(check = name, error = %e, "failed");
                failed += 1;
            }
        }
    }
    Ok(failed)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let failed = run()?;
    if failed > 0 {
        return Err(format!("{failed} of {} checks failed", CHECKS.len()).into());
    }
    info!(checks = CHECKS.len(), "all checks passed");
    Ok(())
}
