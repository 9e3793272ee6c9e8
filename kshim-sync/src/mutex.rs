//! Sleeping mutex
//!
//! `struct mutex` backed by a parking lot. Acquiring may sleep, so it is
//! rejected from atomic context, and only the owning task may release.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicPtr, Ordering};

use kshim_core::context;
use kshim_core::task::{self, TaskStruct};
use parking_lot::lock_api::RawMutex as _;

/// `struct mutex`
#[repr(C)]
pub struct RawMutex {
    lock: parking_lot::RawMutex,
    owner: AtomicPtr<TaskStruct>,
}

impl RawMutex {
    /// `DEFINE_MUTEX` initializer
    pub const fn new() -> Self {
        Self {
            lock: parking_lot::RawMutex::INIT,
            owner: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// `mutex_init()`
    pub fn init(&mut self) {
        *self = Self::new();
    }

    /// `mutex_lock()`. May sleep.
    pub fn lock(&self) {
        context::might_sleep("mutex_lock");
        let me = task::current().as_ptr();
        if self.owner.load(Ordering::Relaxed) == me {
            kshim_core::bug!("mutex {:p} locked recursively", self);
        }
        self.lock.lock();
        self.owner.store(me, Ordering::Relaxed);
    }

    /// `mutex_trylock()`
    pub fn try_lock(&self) -> bool {
        if !self.lock.try_lock() {
            return false;
        }
        self.owner.store(task::current().as_ptr(), Ordering::Relaxed);
        true
    }

    /// `mutex_unlock()`. Must be called by the owner.
    pub fn unlock(&self) {
        let me = task::current().as_ptr();
        if self.owner.load(Ordering::Relaxed) != me {
            kshim_core::bug!("mutex {:p} unlocked by non-owner", self);
        }
        self.owner.store(core::ptr::null_mut(), Ordering::Relaxed);
        // SAFETY: ownership checked above.
        unsafe { self.lock.unlock() };
    }

    /// `mutex_is_locked()`
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// A sleeping lock protecting `T`
pub struct Mutex<T> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.raw.try_lock().then(|| MutexGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

pub struct MutexGuard<'a, T> {
    lock: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.unlock();
    }
}

impl<T> core::ops::Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> core::ops::DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}
