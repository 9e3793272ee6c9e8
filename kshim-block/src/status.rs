//! Block layer completion status (`blk_status_t`)

use core::fmt;

use kshim_ffi::{c_int, KernelError};

/// `blk_status_t`
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct BlkStatus(u8);

struct Entry {
    status: BlkStatus,
    errno: KernelError,
    name: &'static str,
}

macro_rules! blk_status_table {
    ($($name:ident = $value:literal => $errno:ident, $desc:literal;)+) => {
        impl BlkStatus {
            $(pub const $name: BlkStatus = BlkStatus($value);)+
        }

        static TABLE: &[Entry] = &[
            $(Entry {
                status: BlkStatus($value),
                errno: KernelError::$errno,
                name: $desc,
            },)+
        ];
    };
}

blk_status_table! {
    NOTSUPP = 1 => EOPNOTSUPP, "operation not supported";
    TIMEOUT = 2 => ETIMEDOUT, "timeout";
    NOSPC = 3 => ENOSPC, "critical space allocation";
    TRANSPORT = 4 => ENOLINK, "recoverable transport";
    TARGET = 5 => EREMOTEIO, "critical target";
    RESV_CONFLICT = 6 => EBADE, "reservation conflict";
    MEDIUM = 7 => ENODATA, "critical medium";
    PROTECTION = 8 => EILSEQ, "protection";
    RESOURCE = 9 => ENOMEM, "kernel resource";
    IOERR = 10 => EIO, "I/O";
    DM_REQUEUE = 11 => EREMCHG, "dm internal retry";
    AGAIN = 12 => EAGAIN, "nonblocking retry";
    DEV_RESOURCE = 13 => EBUSY, "device resource";
    ZONE_OPEN_RESOURCE = 14 => ETOOMANYREFS, "open zones exceeded";
    ZONE_ACTIVE_RESOURCE = 15 => EOVERFLOW, "active zones exceeded";
    OFFLINE = 16 => ENODEV, "device offline";
    DURATION_LIMIT = 17 => ETIME, "duration limit exceeded";
}

impl BlkStatus {
    pub const OK: BlkStatus = BlkStatus(0);

    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u8 {
        self.0
    }

    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }

    fn entry(self) -> Option<&'static Entry> {
        TABLE.iter().find(|e| e.status == self)
    }

    /// `blk_status_to_str()`
    pub fn as_str(self) -> &'static str {
        if self.is_ok() {
            return "";
        }
        self.entry().map_or("<null>", |e| e.name)
    }
}

impl fmt::Debug for BlkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return f.write_str("BLK_STS_OK");
        }
        match self.entry() {
            Some(e) => write!(f, "BlkStatus({} error)", e.name),
            None => f.debug_tuple("BlkStatus").field(&self.0).finish(),
        }
    }
}

/// `errno_to_blk_status()`: `0` is `OK`, unknown errors become `IOERR`.
pub fn errno_to_blk_status(errno: c_int) -> BlkStatus {
    if errno == 0 {
        return BlkStatus::OK;
    }
    TABLE
        .iter()
        .find(|e| e.errno.to_errno() == errno)
        .map_or(BlkStatus::IOERR, |e| e.status)
}

/// `blk_status_to_errno()`: negative errno, `0` for `OK`.
pub fn blk_status_to_errno(status: BlkStatus) -> c_int {
    if status.is_ok() {
        return 0;
    }
    match status.entry() {
        Some(e) => e.errno.to_errno(),
        None => {
            tracing::warn!(status = status.0, "unknown blk_status_t");
            KernelError::EIO.to_errno()
        }
    }
}

impl From<KernelError> for BlkStatus {
    fn from(e: KernelError) -> Self {
        errno_to_blk_status(e.to_errno())
    }
}
