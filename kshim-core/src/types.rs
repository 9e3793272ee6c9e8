//! Core kernel types

use core::sync::atomic::{fence, AtomicU32, Ordering};

/// Process ID type
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub i32);

/// User ID type
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(pub u32);

/// Group ID type
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Gid(pub u32);

impl Uid {
    /// `INVALID_UID`, what `(uid_t)-1` maps to.
    pub const INVALID: Uid = Uid(u32::MAX);

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl Gid {
    /// `INVALID_GID`
    pub const INVALID: Gid = Gid(u32::MAX);

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

/// Atomic reference counter (kref equivalent)
#[repr(transparent)]
pub struct Kref {
    refcount: AtomicU32,
}

impl Kref {
    /// Create a new reference counter with initial value of 1
    pub const fn new() -> Self {
        Self {
            refcount: AtomicU32::new(1),
        }
    }

    /// Increment the reference count. The caller must already hold a
    /// reference; taking one on a dead object is fatal.
    pub fn get(&self) {
        let prev = self.refcount.fetch_add(1, Ordering::Relaxed);
        crate::bug_on!(prev == 0, "kref_get() on an object with no references");
    }

    /// Decrement the reference count and return true if it reaches 0
    pub fn put(&self) -> bool {
        let prev = self.refcount.fetch_sub(1, Ordering::Release);
        crate::bug_on!(prev == 0, "kref_put() underflow");
        if prev == 1 {
            // Pairs with the release above so the releaser sees every
            // access made under earlier references.
            fence(Ordering::Acquire);
            return true;
        }
        false
    }

    /// Get current reference count (for debugging/testing only)
    pub fn count(&self) -> u32 {
        self.refcount.load(Ordering::Relaxed)
    }
}

impl Default for Kref {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_eq_size!(Kref, u32);
static_assertions::assert_eq_size!(Uid, u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kref() {
        let kref = Kref::new();
        assert_eq!(kref.count(), 1);

        kref.get();
        assert_eq!(kref.count(), 2);

        assert!(!kref.put());
        assert_eq!(kref.count(), 1);

        assert!(kref.put());
        assert_eq!(kref.count(), 0);
    }

    #[test]
    #[should_panic(expected = "no references")]
    fn test_kref_get_after_release() {
        let kref = Kref::new();
        assert!(kref.put());
        kref.get();
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn test_kref_underflow() {
        let kref = Kref::new();
        kref.put();
        kref.put();
    }

    #[test]
    fn test_pid() {
        let pid = Pid(1234);
        assert_eq!(pid.0, 1234);
    }

    #[test]
    fn test_invalid_ids() {
        assert!(!Uid::INVALID.is_valid());
        assert!(Uid(0).is_valid());
        assert_eq!(Gid(u32::MAX), Gid::INVALID);
    }
}
