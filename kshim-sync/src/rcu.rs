//! Read-copy-update
//!
//! Preemptible RCU: read-side sections only forbid sleeping, they do not
//! pin a CPU. Each execution context owns a reader record holding the grace
//! period sequence it entered under, or zero when quiescent.
//! [`synchronize_rcu`] starts a new grace period and waits for every record
//! still showing an older sequence.

use core::ffi::c_void;
use core::marker::PhantomData;
use core::sync::atomic::{fence, AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;

use kshim_core::context;
use parking_lot::Mutex;

static GP_SEQ: AtomicU64 = AtomicU64::new(1);

static READERS: Mutex<Vec<Arc<ReaderRecord>>> = Mutex::new(Vec::new());

struct ReaderRecord {
    /// Grace period sequence at outermost `rcu_read_lock()`, 0 if idle.
    entered: AtomicU64,
}

struct ReaderSlot(Arc<ReaderRecord>);

impl ReaderSlot {
    fn register() -> Self {
        let record = Arc::new(ReaderRecord {
            entered: AtomicU64::new(0),
        });
        READERS.lock().push(Arc::clone(&record));
        Self(record)
    }
}

impl Drop for ReaderSlot {
    fn drop(&mut self) {
        // A context that exits inside a read-side section must not stall
        // grace periods forever.
        self.0.entered.store(0, Ordering::Release);
    }
}

thread_local! {
    static READER: ReaderSlot = ReaderSlot::register();
}

/// `rcu_read_lock()`. Nestable, never blocks.
pub fn rcu_read_lock() {
    if context::rcu_nesting_inc() == 1 {
        READER.with(|r| {
            r.0.entered
                .store(GP_SEQ.load(Ordering::SeqCst), Ordering::SeqCst);
        });
        fence(Ordering::SeqCst);
    }
}

/// `rcu_read_unlock()`. Unbalanced calls are fatal.
pub fn rcu_read_unlock() {
    if context::rcu_nesting_dec() == 0 {
        READER.with(|r| r.0.entered.store(0, Ordering::Release));
    }
}

/// `rcu_read_lock_held()`
pub fn rcu_read_lock_held() -> bool {
    context::rcu_read_lock_nesting() > 0
}

/// `synchronize_rcu()`: wait until every read-side section in progress at
/// the time of the call has ended. May sleep.
pub fn synchronize_rcu() {
    context::might_sleep("synchronize_rcu");
    let target = GP_SEQ.fetch_add(1, Ordering::SeqCst) + 1;
    fence(Ordering::SeqCst);

    let readers: Vec<Arc<ReaderRecord>> = {
        let mut readers = READERS.lock();
        readers.retain(|r| Arc::strong_count(r) > 1 || r.entered.load(Ordering::Acquire) != 0);
        readers.clone()
    };

    let mut waited = 0u64;
    for reader in &readers {
        loop {
            let entered = reader.entered.load(Ordering::Acquire);
            if entered == 0 || entered >= target {
                break;
            }
            waited += 1;
            std::thread::yield_now();
        }
    }
    tracing::trace!(gp = target, readers = readers.len(), waited, "grace period complete");
}

/// `struct rcudata`: a pointer published under RCU.
#[repr(C)]
#[derive(Debug)]
pub struct RcuPointer {
    a: AtomicPtr<c_void>,
}

impl RcuPointer {
    pub const fn new(ptr: *mut c_void) -> Self {
        Self {
            a: AtomicPtr::new(ptr),
        }
    }

    /// `rcu_assign_pointer()`: everything written before is visible to any
    /// reader that observes `ptr`.
    pub fn assign(&self, ptr: *mut c_void) {
        self.a.store(ptr, Ordering::Release);
    }

    /// `rcu_dereference()`
    pub fn dereference(&self) -> *mut c_void {
        self.a.load(Ordering::Acquire)
    }
}

/// A value read under RCU and replaced by copy.
///
/// Updates are not serialized against each other; concurrent updaters need
/// their own lock.
pub struct RcuData<T> {
    cell: RcuPointer,
    _marker: PhantomData<Box<T>>,
}

unsafe impl<T: Send + Sync> Send for RcuData<T> {}
unsafe impl<T: Send + Sync> Sync for RcuData<T> {}

impl<T> RcuData<T> {
    pub fn new(data: T) -> Self {
        Self {
            cell: RcuPointer::new(Box::into_raw(Box::new(data)).cast()),
            _marker: PhantomData,
        }
    }

    /// Run `f` on the current value inside a read-side section.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        rcu_read_lock();
        // SAFETY: the value stays allocated until a grace period after it is
        // replaced, and this section holds that grace period open.
        let r = f(unsafe { &*self.cell.dereference().cast::<T>() });
        rcu_read_unlock();
        r
    }

    /// Publish `data` and return the previous value once no reader can
    /// still see it. May sleep.
    pub fn update(&self, data: T) -> Box<T> {
        let old = self.cell.dereference();
        self.cell.assign(Box::into_raw(Box::new(data)).cast());
        synchronize_rcu();
        // SAFETY: unpublished and a grace period has elapsed.
        unsafe { Box::from_raw(old.cast::<T>()) }
    }
}

impl<T> Drop for RcuData<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out readers.
        drop(unsafe { Box::from_raw(self.cell.dereference().cast::<T>()) });
    }
}
