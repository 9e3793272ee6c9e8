//! Spinlock implementation
//!
//! [`RawSpinLock`] is the `spinlock_t` handed across the C boundary.
//! Acquiring disables preemption and busy-waits; the holder must not sleep
//! until it releases. With the `debug_spinlock` feature every lock also
//! carries its name, class key, a magic value and owner tracking, and
//! misuse (recursion, foreign unlock, use before init) is caught.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "debug_spinlock")]
use core::sync::atomic::AtomicPtr;

use kshim_core::context::{self, IrqFlags};
#[cfg(feature = "debug_spinlock")]
use kshim_core::task::{self, TaskStruct};
use kshim_ffi::c_char;

/// `struct lock_class_key`: identity of a lock class for the lock validator.
/// Only its address matters.
#[repr(C)]
#[derive(Debug, Default)]
pub struct LockClassKey {
    _key: u8,
}

impl LockClassKey {
    pub const fn new() -> Self {
        Self { _key: 0 }
    }
}

#[cfg(feature = "debug_spinlock")]
pub const SPINLOCK_MAGIC: u32 = 0xdead_4ead;

#[cfg(feature = "debug_spinlock")]
const OWNER_CPU_NONE: u32 = u32::MAX;

/// `spinlock_t`
#[repr(C)]
pub struct RawSpinLock {
    locked: AtomicU32,
    #[cfg(feature = "debug_spinlock")]
    magic: u32,
    #[cfg(feature = "debug_spinlock")]
    owner_cpu: AtomicU32,
    #[cfg(feature = "debug_spinlock")]
    owner: AtomicPtr<TaskStruct>,
    #[cfg(feature = "debug_spinlock")]
    name: *const c_char,
    #[cfg(feature = "debug_spinlock")]
    key: *const LockClassKey,
}

// SAFETY: `name` and `key` are only written by `init`, which needs `&mut`.
unsafe impl Send for RawSpinLock {}
unsafe impl Sync for RawSpinLock {}

impl RawSpinLock {
    /// `__SPIN_LOCK_UNLOCKED`
    pub const fn new() -> Self {
        Self {
            locked: AtomicU32::new(0),
            #[cfg(feature = "debug_spinlock")]
            magic: SPINLOCK_MAGIC,
            #[cfg(feature = "debug_spinlock")]
            owner_cpu: AtomicU32::new(OWNER_CPU_NONE),
            #[cfg(feature = "debug_spinlock")]
            owner: AtomicPtr::new(core::ptr::null_mut()),
            #[cfg(feature = "debug_spinlock")]
            name: core::ptr::null(),
            #[cfg(feature = "debug_spinlock")]
            key: core::ptr::null(),
        }
    }

    /// `spin_lock_init()`. `name` and `key` are recorded only when lock
    /// debugging is built in.
    pub fn init(&mut self, name: *const c_char, key: *const LockClassKey) {
        #[cfg(not(feature = "debug_spinlock"))]
        let _ = (name, key);
        *self = Self::new();
        #[cfg(feature = "debug_spinlock")]
        {
            self.name = name;
            self.key = key;
        }
        tracing::trace!(lock = ?(self as *const Self), "spin_lock_init");
    }

    /// `spin_lock()`
    pub fn lock(&self) {
        context::preempt_disable();
        self.debug_lock_checks(true);
        self.acquire();
        self.debug_set_owner();
    }

    /// `spin_trylock()`
    pub fn try_lock(&self) -> bool {
        context::preempt_disable();
        self.debug_lock_checks(false);
        if self
            .locked
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.debug_set_owner();
            return true;
        }
        context::preempt_enable();
        false
    }

    /// `spin_unlock()`. Must be called by the holder.
    pub fn unlock(&self) {
        self.release();
        context::preempt_enable();
    }

    /// `spin_lock_irqsave()`: also disables local interrupts, returning the
    /// token [`RawSpinLock::unlock_irqrestore`] needs.
    pub fn lock_irqsave(&self) -> IrqFlags {
        let flags = context::local_irq_save();
        self.lock();
        flags
    }

    /// `spin_unlock_irqrestore()`. `flags` must be the token returned by
    /// the matching [`RawSpinLock::lock_irqsave`].
    pub fn unlock_irqrestore(&self, flags: IrqFlags) {
        self.release();
        context::local_irq_restore(flags);
        context::preempt_enable();
    }

    /// `spin_is_locked()`
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed) != 0
    }

    fn acquire(&self) {
        while self
            .locked
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) != 0 {
                core::hint::spin_loop();
            }
        }
    }

    fn release(&self) {
        self.debug_unlock_checks();
        if self.locked.swap(0, Ordering::Release) == 0 {
            kshim_core::bug!("spin_unlock() of unlocked lock {:p}", self);
        }
    }

    #[cfg(feature = "debug_spinlock")]
    pub fn name(&self) -> Option<&core::ffi::CStr> {
        if self.name.is_null() {
            return None;
        }
        // SAFETY: `spin_lock_init()` callers pass a name valid for the
        // lifetime of the lock.
        Some(unsafe { core::ffi::CStr::from_ptr(self.name) })
    }

    #[cfg(feature = "debug_spinlock")]
    pub fn key(&self) -> *const LockClassKey {
        self.key
    }

    /// A failed trylock by the holder is legal, so only blocking
    /// acquisitions check for recursion.
    #[cfg(feature = "debug_spinlock")]
    fn debug_lock_checks(&self, recursion: bool) {
        if self.magic != SPINLOCK_MAGIC {
            kshim_core::bug!("spinlock {:p} used before spin_lock_init()", self);
        }
        if recursion && self.owner.load(Ordering::Relaxed) == task::current().as_ptr() {
            kshim_core::bug!("spinlock {:p} recursion on {:?}", self, self.name());
        }
    }

    #[cfg(feature = "debug_spinlock")]
    fn debug_set_owner(&self) {
        self.owner_cpu
            .store(context::smp_processor_id(), Ordering::Relaxed);
        self.owner.store(task::current().as_ptr(), Ordering::Relaxed);
    }

    #[cfg(feature = "debug_spinlock")]
    fn debug_unlock_checks(&self) {
        if self.magic != SPINLOCK_MAGIC {
            kshim_core::bug!("spinlock {:p} used before spin_lock_init()", self);
        }
        if self.owner.load(Ordering::Relaxed) != task::current().as_ptr() {
            kshim_core::bug!("spinlock {:p} ({:?}) released by non-owner", self, self.name());
        }
        if self.owner_cpu.load(Ordering::Relaxed) != context::smp_processor_id() {
            kshim_core::bug!("spinlock {:p} released on wrong cpu", self);
        }
        self.owner.store(core::ptr::null_mut(), Ordering::Relaxed);
        self.owner_cpu.store(OWNER_CPU_NONE, Ordering::Relaxed);
    }

    #[cfg(not(feature = "debug_spinlock"))]
    #[inline(always)]
    fn debug_lock_checks(&self, _recursion: bool) {}

    #[cfg(not(feature = "debug_spinlock"))]
    #[inline(always)]
    fn debug_set_owner(&self) {}

    #[cfg(not(feature = "debug_spinlock"))]
    #[inline(always)]
    fn debug_unlock_checks(&self) {}
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// A spinlock protecting `T`
#[repr(C)]
pub struct SpinLock<T> {
    raw: RawSpinLock,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Create a new spinlock
    pub const fn new(data: T) -> Self {
        Self {
            raw: RawSpinLock::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock (busy wait). Preemption stays disabled until the
    /// guard is dropped.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.raw.lock();
        SpinLockGuard::new(self, None)
    }

    /// Acquire the lock with local interrupts disabled.
    pub fn lock_irqsave(&self) -> SpinLockGuard<'_, T> {
        let flags = self.raw.lock_irqsave();
        SpinLockGuard::new(self, Some(flags))
    }

    /// Try to acquire the lock without spinning
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.raw
            .try_lock()
            .then(|| SpinLockGuard::new(self, None))
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// RAII guard for [`SpinLock`]. Bound to the execution context that took
/// the lock.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    flags: Option<IrqFlags>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T> SpinLockGuard<'a, T> {
    fn new(lock: &'a SpinLock<T>, flags: Option<IrqFlags>) -> Self {
        Self {
            lock,
            flags,
            _not_send: PhantomData,
        }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        match self.flags {
            Some(flags) => self.lock.raw.unlock_irqrestore(flags),
            None => self.lock.raw.unlock(),
        }
    }
}

impl<T> core::ops::Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> core::ops::DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}
