//! User address range checks

use kshim_ffi::c_ulong;

/// Highest user address plus one (x86-64, 4-level paging).
pub const TASK_SIZE_MAX: c_ulong = (1 << 47) - 4096;

/// `access_ok()`: `[addr, addr + size)` lies inside the user half. Says
/// nothing about whether the range is mapped.
pub fn access_ok(addr: c_ulong, size: c_ulong) -> bool {
    match addr.checked_add(size) {
        Some(end) => end <= TASK_SIZE_MAX,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_range() {
        assert!(access_ok(0x1000, 4096));
        assert!(access_ok(TASK_SIZE_MAX - 8, 8));
        assert!(access_ok(0, 0));
    }

    #[test]
    fn test_kernel_or_wrapping_range() {
        assert!(!access_ok(TASK_SIZE_MAX - 8, 9));
        assert!(!access_ok(0xffff_8880_0000_0000, 1));
        assert!(!access_ok(c_ulong::MAX, 2));
    }
}
