//! Read-write semaphore (`struct rw_semaphore`)
//!
//! Both acquire modes may sleep. Releasing a mode that is not held is a bug;
//! the write side is released by its owner only.

use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use kshim_core::context;
use kshim_core::task::{self, TaskStruct};
use parking_lot::lock_api::RawRwLock as _;

#[repr(C)]
pub struct RwSemaphore {
    lock: parking_lot::RawRwLock,
    readers: AtomicU32,
    owner: AtomicPtr<TaskStruct>,
}

impl RwSemaphore {
    /// `DECLARE_RWSEM` initializer
    pub const fn new() -> Self {
        Self {
            lock: parking_lot::RawRwLock::INIT,
            readers: AtomicU32::new(0),
            owner: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// `init_rwsem()`
    pub fn init(&mut self) {
        *self = Self::new();
    }

    /// `down_read()`. May sleep.
    pub fn down_read(&self) {
        context::might_sleep("down_read");
        self.lock.lock_shared();
        self.readers.fetch_add(1, Ordering::Relaxed);
    }

    /// `down_read_trylock()`
    pub fn down_read_trylock(&self) -> bool {
        if !self.lock.try_lock_shared() {
            return false;
        }
        self.readers.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// `up_read()`
    pub fn up_read(&self) {
        if self
            .readers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |r| r.checked_sub(1))
            .is_err()
        {
            kshim_core::bug!("up_read() on rwsem {:p} without readers", self);
        }
        // SAFETY: a shared hold was accounted above.
        unsafe { self.lock.unlock_shared() };
    }

    /// `down_write()`. May sleep.
    pub fn down_write(&self) {
        context::might_sleep("down_write");
        let me = task::current().as_ptr();
        if self.owner.load(Ordering::Relaxed) == me {
            kshim_core::bug!("rwsem {:p} write-locked recursively", self);
        }
        self.lock.lock_exclusive();
        self.owner.store(me, Ordering::Relaxed);
    }

    /// `down_write_trylock()`
    pub fn down_write_trylock(&self) -> bool {
        if !self.lock.try_lock_exclusive() {
            return false;
        }
        self.owner.store(task::current().as_ptr(), Ordering::Relaxed);
        true
    }

    /// `up_write()`. Must be called by the writer.
    pub fn up_write(&self) {
        let me = task::current().as_ptr();
        if self.owner.load(Ordering::Relaxed) != me {
            kshim_core::bug!("up_write() on rwsem {:p} by non-owner", self);
        }
        self.owner.store(core::ptr::null_mut(), Ordering::Relaxed);
        // SAFETY: ownership checked above.
        unsafe { self.lock.unlock_exclusive() };
    }

    /// `rwsem_is_locked()`
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Readers currently inside.
    pub fn readers(&self) -> u32 {
        self.readers.load(Ordering::Relaxed)
    }
}

impl Default for RwSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_readers_share() {
        let sem = RwSemaphore::new();
        sem.down_read();
        assert!(sem.down_read_trylock());
        assert_eq!(sem.readers(), 2);
        assert!(!sem.down_write_trylock());
        sem.up_read();
        sem.up_read();
        assert!(!sem.is_locked());
    }

    #[test]
    fn test_writer_excludes_readers() {
        let sem = Arc::new(RwSemaphore::new());
        sem.down_write();
        let entered = Arc::new(AtomicBool::new(false));
        let reader = {
            let sem = Arc::clone(&sem);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                sem.down_read();
                entered.store(true, Ordering::SeqCst);
                sem.up_read();
            })
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!entered.load(Ordering::SeqCst));
        sem.up_write();
        reader.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn test_unbalanced_up_read_is_fatal() {
        let result = thread::spawn(|| RwSemaphore::new().up_read()).join();
        assert!(result.is_err());
    }

    #[test]
    fn test_up_write_by_other_task_is_fatal() {
        let sem = Arc::new(RwSemaphore::new());
        sem.down_write();
        let other = Arc::clone(&sem);
        let result = thread::spawn(move || other.up_write()).join();
        assert!(result.is_err());
        sem.up_write();
    }

    #[test]
    fn test_down_read_in_atomic_is_fatal() {
        let result = thread::spawn(|| {
            let sem = RwSemaphore::new();
            context::preempt_disable();
            sem.down_read();
        })
        .join();
        assert!(result.is_err());
    }
}
