//! Kernel errno values
//!
//! [`KernelError`] carries a positive errno. Kernel functions return the
//! negated value, which is what [`KernelError::to_errno`] produces and what
//! [`KernelError::from_errno`] accepts.

use crate::c_int;
use crate::err_ptr::MAX_ERRNO;

/// Error codes matching Linux kernel errno values
#[derive(Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("{} (errno {})", describe(.0), .0)]
pub struct KernelError(c_int);

/// Result type for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

macro_rules! declare_err {
    ($($name:ident = $value:literal, $doc:expr;)+) => {
        impl KernelError {
            $(
                #[doc = $doc]
                pub const $name: KernelError = KernelError($value);
            )+
        }

        /// Symbolic name of an errno of either sign, if it is one of the
        /// known codes.
        pub fn errname(errno: c_int) -> Option<&'static str> {
            errname_c(errno).and_then(|name| name.to_str().ok())
        }

        /// [`errname`] as a NUL-terminated string for C callers.
        pub fn errname_c(errno: c_int) -> Option<&'static core::ffi::CStr> {
            let name: &'static [u8] = match errno.checked_abs()? {
                $($value => concat!(stringify!($name), "\0").as_bytes(),)+
                _ => return None,
            };
            core::ffi::CStr::from_bytes_with_nul(name).ok()
        }
    };
}

declare_err! {
    EPERM = 1, "Operation not permitted.";
    ENOENT = 2, "No such file or directory.";
    ESRCH = 3, "No such process.";
    EINTR = 4, "Interrupted system call.";
    EIO = 5, "I/O error.";
    ENXIO = 6, "No such device or address.";
    E2BIG = 7, "Argument list too long.";
    ENOEXEC = 8, "Exec format error.";
    EBADF = 9, "Bad file number.";
    ECHILD = 10, "No child processes.";
    EAGAIN = 11, "Try again.";
    ENOMEM = 12, "Out of memory.";
    EACCES = 13, "Permission denied.";
    EFAULT = 14, "Bad address.";
    ENOTBLK = 15, "Block device required.";
    EBUSY = 16, "Device or resource busy.";
    EEXIST = 17, "File exists.";
    EXDEV = 18, "Cross-device link.";
    ENODEV = 19, "No such device.";
    ENOTDIR = 20, "Not a directory.";
    EISDIR = 21, "Is a directory.";
    EINVAL = 22, "Invalid argument.";
    ENFILE = 23, "File table overflow.";
    EMFILE = 24, "Too many open files.";
    ENOTTY = 25, "Not a typewriter.";
    ETXTBSY = 26, "Text file busy.";
    EFBIG = 27, "File too large.";
    ENOSPC = 28, "No space left on device.";
    ESPIPE = 29, "Illegal seek.";
    EROFS = 30, "Read-only file system.";
    EMLINK = 31, "Too many links.";
    EPIPE = 32, "Broken pipe.";
    EDOM = 33, "Math argument out of domain of func.";
    ERANGE = 34, "Math result not representable.";
    ENAMETOOLONG = 36, "File name too long.";
    EBADE = 52, "Invalid exchange.";
    ENODATA = 61, "No data available.";
    ETIME = 62, "Timer expired.";
    ENOLINK = 67, "Link has been severed.";
    EOVERFLOW = 75, "Value too large for defined data type.";
    EREMCHG = 78, "Remote address changed.";
    EILSEQ = 84, "Illegal byte sequence.";
    EOPNOTSUPP = 95, "Operation not supported on transport endpoint.";
    ETOOMANYREFS = 109, "Too many references: cannot splice.";
    ETIMEDOUT = 110, "Connection timed out.";
    EREMOTEIO = 121, "Remote I/O error.";
    ERESTARTSYS = 512, "Restart the system call.";
    ENOTSUPP = 524, "Operation is not supported.";
}

fn describe(errno: &c_int) -> &'static str {
    errname(*errno).unwrap_or("unknown error")
}

impl KernelError {
    /// Creates an error from a negative kernel return value.
    ///
    /// Values outside `[-MAX_ERRNO, -1]` are not errors; they are reported
    /// and mapped to `EINVAL`.
    pub fn from_errno(errno: c_int) -> KernelError {
        if errno < -(MAX_ERRNO as c_int) || errno >= 0 {
            tracing::warn!(errno, "attempted to create KernelError with out of range errno");
            return KernelError::EINVAL;
        }
        KernelError(-errno)
    }

    /// Negative errno as returned to C callers.
    pub const fn to_errno(self) -> c_int {
        -self.0
    }

    /// Positive errno value.
    pub const fn code(self) -> c_int {
        self.0
    }

    pub fn name(self) -> Option<&'static str> {
        errname(self.0)
    }
}

impl core::fmt::Debug for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => f.debug_tuple("KernelError").field(&self.0).finish(),
        }
    }
}

impl From<core::alloc::LayoutError> for KernelError {
    fn from(_: core::alloc::LayoutError) -> Self {
        KernelError::ENOMEM
    }
}

impl From<core::num::TryFromIntError> for KernelError {
    fn from(_: core::num::TryFromIntError) -> Self {
        KernelError::EINVAL
    }
}
