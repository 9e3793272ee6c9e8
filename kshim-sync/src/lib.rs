//! Kernel synchronization primitives
//!
//! Spinlocks, mutexes, rwsems, RCU and sequence counters with the kernel's
//! context rules enforced: spinlocks disable preemption, sleeping locks and
//! grace periods may sleep, read-side sections must not.

pub mod mutex;
pub mod rcu;
pub mod rwsem;
pub mod seqcount;
pub mod spinlock;

pub use mutex::{Mutex, MutexGuard, RawMutex};
pub use rcu::{rcu_read_lock, rcu_read_unlock, synchronize_rcu, RcuData, RcuPointer};
pub use rwsem::RwSemaphore;
pub use seqcount::SeqCount;
pub use spinlock::{LockClassKey, RawSpinLock, SpinLock, SpinLockGuard};

static_assertions::assert_eq_size!(rcu::RcuPointer, *mut core::ffi::c_void);
#[cfg(not(feature = "debug_spinlock"))]
static_assertions::assert_eq_size!(spinlock::RawSpinLock, u32);
