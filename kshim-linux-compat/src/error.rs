//! Errno translation for values coming back from C

use kshim_ffi::{c_int, KernelError, KernelResult};

/// Convert a C return code to a `Result`
///
/// - 0 => Ok(())
/// - negative => Err(KernelError)
/// - positive => Err(EINVAL), not a valid kernel return
pub fn errno_to_result(errno: c_int) -> KernelResult<()> {
    match errno {
        0 => Ok(()),
        e if e > 0 => {
            tracing::warn!(errno = e, "positive value where an errno was expected");
            Err(KernelError::EINVAL)
        }
        e => Err(KernelError::from_errno(e)),
    }
}
