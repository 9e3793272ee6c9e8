//! Runtime oracle
//!
//! Process-wide facts ("which task is current", "how many CPUs are online")
//! are not owned by the helpers. They are answered by a [`Runtime`]
//! installed once per process. Without an explicit installation the first
//! query installs a [`HostedRuntime`] with default settings.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use parking_lot::lock_api::RawMutex as _;
use spin::Once;

use crate::task::TaskStruct;

/// Number of CPUs a default hosted runtime brings online.
pub const DEFAULT_ONLINE_CPUS: u32 = 4;

/// Upper bound on hosted CPUs, matching a typical `NR_CPUS`.
pub const MAX_CPUS: u32 = 64;

/// Queries the helpers forward to the surrounding kernel.
pub trait Runtime: Send + Sync {
    /// `num_online_cpus()`
    fn num_online_cpus(&self) -> u32;

    /// Core id for a new execution context. Stable for that context's
    /// lifetime.
    fn assign_cpu(&self) -> u32;

    /// Take exclusive occupancy of `cpu`. Called when an execution context
    /// disables preemption; blocks while another context occupies it.
    fn pin_cpu(&self, cpu: u32);

    /// Release occupancy taken by [`Runtime::pin_cpu`].
    fn unpin_cpu(&self, cpu: u32);

    /// Task descriptor of the calling execution context (borrowed).
    fn current_task(&self) -> NonNull<TaskStruct>;

    /// Account `nr` pages against the memory budget. `false` means the
    /// allocation must fail as under memory pressure.
    fn reserve_pages(&self, nr: usize) -> bool;

    /// Return pages accounted by [`Runtime::reserve_pages`].
    fn release_pages(&self, nr: usize);
}

/// Errors from runtime installation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("a runtime is already installed")]
    AlreadyInstalled,

    #[error("online cpu count {0} outside 1..={max}", max = MAX_CPUS)]
    InvalidCpuCount(u32),
}

static RUNTIME: Once<Box<dyn Runtime>> = Once::new();

/// Install the process runtime. Fails if one was installed (or implicitly
/// defaulted) before.
pub fn install(rt: Box<dyn Runtime>) -> Result<(), RuntimeError> {
    let mut installed = false;
    RUNTIME.call_once(|| {
        installed = true;
        rt
    });
    if installed {
        tracing::info!(cpus = runtime().num_online_cpus(), "runtime installed");
        Ok(())
    } else {
        Err(RuntimeError::AlreadyInstalled)
    }
}

/// The installed runtime.
pub fn runtime() -> &'static dyn Runtime {
    RUNTIME
        .call_once(|| Box::new(HostedRuntime::default()))
        .as_ref()
}

/// Userspace stand-in for the kernel: host threads are execution contexts,
/// spread round-robin across a fixed set of CPUs.
pub struct HostedRuntime {
    online: u32,
    next_cpu: AtomicU32,
    cpus: Box<[parking_lot::RawMutex]>,
    page_limit: Option<usize>,
    pages_in_use: AtomicUsize,
}

impl HostedRuntime {
    pub fn new(online_cpus: u32, page_limit: Option<usize>) -> Result<Self, RuntimeError> {
        if online_cpus == 0 || online_cpus > MAX_CPUS {
            return Err(RuntimeError::InvalidCpuCount(online_cpus));
        }
        Ok(Self::with_cpus(online_cpus, page_limit))
    }

    fn with_cpus(online: u32, page_limit: Option<usize>) -> Self {
        let cpus = (0..online)
            .map(|_| parking_lot::RawMutex::INIT)
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            online,
            next_cpu: AtomicU32::new(0),
            cpus,
            page_limit,
            pages_in_use: AtomicUsize::new(0),
        }
    }

    /// Pages currently accounted.
    pub fn pages_in_use(&self) -> usize {
        self.pages_in_use.load(Ordering::Relaxed)
    }

    fn slot(&self, cpu: u32) -> &parking_lot::RawMutex {
        match self.cpus.get(cpu as usize) {
            Some(slot) => slot,
            None => crate::bug!("cpu {} is not online ({} online)", cpu, self.online),
        }
    }
}

impl Default for HostedRuntime {
    fn default() -> Self {
        Self::with_cpus(DEFAULT_ONLINE_CPUS, None)
    }
}

impl Runtime for HostedRuntime {
    fn num_online_cpus(&self) -> u32 {
        self.online
    }

    fn assign_cpu(&self) -> u32 {
        self.next_cpu.fetch_add(1, Ordering::Relaxed) % self.online
    }

    fn pin_cpu(&self, cpu: u32) {
        self.slot(cpu).lock();
    }

    fn unpin_cpu(&self, cpu: u32) {
        // SAFETY: contexts only unpin a cpu they pinned, see `context`.
        unsafe { self.slot(cpu).unlock() };
    }

    fn current_task(&self) -> NonNull<TaskStruct> {
        crate::task::thread_task()
    }

    fn reserve_pages(&self, nr: usize) -> bool {
        let Some(limit) = self.page_limit else {
            self.pages_in_use.fetch_add(nr, Ordering::Relaxed);
            return true;
        };
        self.pages_in_use
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                used.checked_add(nr).filter(|total| *total <= limit)
            })
            .is_ok()
    }

    fn release_pages(&self, nr: usize) {
        let prev = self.pages_in_use.fetch_sub(nr, Ordering::Relaxed);
        crate::bug_on!(prev < nr, "released {} pages with only {} in use", nr, prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::lock_api::RawMutex as _;

    #[test]
    fn test_invalid_cpu_count() {
        assert_eq!(
            HostedRuntime::new(0, None).err(),
            Some(RuntimeError::InvalidCpuCount(0))
        );
        assert!(HostedRuntime::new(MAX_CPUS + 1, None).is_err());
    }

    #[test]
    fn test_round_robin_assignment() {
        let rt = HostedRuntime::new(3, None).unwrap();
        let ids: Vec<u32> = (0..6).map(|_| rt.assign_cpu()).collect();
        assert_eq!(ids, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_page_budget() {
        let rt = HostedRuntime::new(1, Some(8)).unwrap();
        assert!(rt.reserve_pages(4));
        assert!(rt.reserve_pages(4));
        assert!(!rt.reserve_pages(1));
        rt.release_pages(2);
        assert!(rt.reserve_pages(2));
        assert_eq!(rt.pages_in_use(), 8);
    }

    #[test]
    fn test_unlimited_budget() {
        let rt = HostedRuntime::new(1, None).unwrap();
        assert!(rt.reserve_pages(1 << 20));
        assert_eq!(rt.pages_in_use(), 1 << 20);
    }

    #[test]
    fn test_pin_is_exclusive() {
        let rt = HostedRuntime::new(2, None).unwrap();
        rt.pin_cpu(1);
        assert!(!rt.slot(1).try_lock());
        assert!(rt.slot(0).try_lock());
        rt.unpin_cpu(0);
        rt.unpin_cpu(1);
        assert!(rt.slot(1).try_lock());
        rt.unpin_cpu(1);
    }

    #[test]
    fn test_second_install_is_rejected() {
        let _ = runtime();
        let rt = HostedRuntime::new(2, None).unwrap();
        assert_eq!(install(Box::new(rt)), Err(RuntimeError::AlreadyInstalled));
    }
}
