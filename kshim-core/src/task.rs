//! Task descriptors
//!
//! A [`TaskStruct`] is reference counted through its `usage` [`Kref`]. The
//! hosted execution context that owns a task keeps one reference for its
//! lifetime, so `current()` can hand out a borrowed pointer.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::runtime::runtime;
use crate::types::{Kref, Pid};

pub const TASK_COMM_LEN: usize = 16;

/// Process descriptor
#[repr(C)]
pub struct TaskStruct {
    usage: Kref,
    pid: Pid,
    /// Bitmask of pending signals, bit `n - 1` for signal `n`.
    sigpending: AtomicU32,
    comm: [u8; TASK_COMM_LEN],
}

static NEXT_PID: AtomicI32 = AtomicI32::new(1);

impl TaskStruct {
    /// Allocate a task holding one reference, owned by the caller.
    pub fn alloc(comm: &str) -> NonNull<TaskStruct> {
        let mut name = [0u8; TASK_COMM_LEN];
        let len = comm.len().min(TASK_COMM_LEN - 1);
        name[..len].copy_from_slice(&comm.as_bytes()[..len]);

        let task = Box::new(TaskStruct {
            usage: Kref::new(),
            pid: Pid(NEXT_PID.fetch_add(1, Ordering::Relaxed)),
            sigpending: AtomicU32::new(0),
            comm: name,
        });
        tracing::debug!(pid = task.pid.0, comm, "task allocated");
        NonNull::from(Box::leak(task))
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn comm(&self) -> &str {
        let end = self.comm.iter().position(|&b| b == 0).unwrap_or(TASK_COMM_LEN);
        core::str::from_utf8(&self.comm[..end]).unwrap_or("?")
    }

    pub fn usage(&self) -> u32 {
        self.usage.count()
    }

    /// `signal_pending()`
    pub fn signal_pending(&self) -> bool {
        self.sigpending.load(Ordering::Acquire) != 0
    }

    /// Mark signal `sig` (1..=32) pending.
    pub fn send_signal(&self, sig: u32) {
        crate::bug_on!(sig == 0 || sig > 32, "invalid signal number {}", sig);
        self.sigpending.fetch_or(1 << (sig - 1), Ordering::Release);
    }

    /// Drop every pending signal, as after delivery.
    pub fn clear_signals(&self) {
        self.sigpending.store(0, Ordering::Release);
    }
}

/// `get_task_struct()`
///
/// # Safety
/// `task` must point to a live task the caller holds or borrows a
/// reference to.
pub unsafe fn get_task_struct(task: NonNull<TaskStruct>) -> NonNull<TaskStruct> {
    task.as_ref().usage.get();
    task
}

/// `put_task_struct()`. Frees the task on the last reference.
///
/// # Safety
/// `task` must point to a live task and the caller must own one of its
/// references, which is consumed.
pub unsafe fn put_task_struct(task: NonNull<TaskStruct>) {
    if task.as_ref().usage.put() {
        tracing::debug!(pid = task.as_ref().pid.0, "task freed");
        drop(Box::from_raw(task.as_ptr()));
    }
}

/// `get_current()`: the calling context's task, borrowed.
pub fn current() -> NonNull<TaskStruct> {
    runtime().current_task()
}

struct ThreadTask(NonNull<TaskStruct>);

impl Drop for ThreadTask {
    fn drop(&mut self) {
        // SAFETY: the context owns the reference taken at allocation.
        unsafe { put_task_struct(self.0) };
    }
}

thread_local! {
    static THREAD_TASK: ThreadTask = ThreadTask(TaskStruct::alloc(
        std::thread::current().name().unwrap_or("kworker"),
    ));
}

/// Task owned by the calling host thread, allocated on first use.
pub(crate) fn thread_task() -> NonNull<TaskStruct> {
    match THREAD_TASK.try_with(|t| t.0) {
        Ok(task) => task,
        Err(_) => crate::bug!("current task queried after its context exited"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_current_is_stable() {
        let a = current();
        let b = current();
        assert_eq!(a, b);
        let task = unsafe { a.as_ref() };
        assert!(task.pid().0 > 0);
        assert_eq!(task.usage(), 1);
    }

    #[test]
    fn test_distinct_contexts_have_distinct_tasks() {
        let here = current().as_ptr() as usize;
        let there = thread::spawn(|| current().as_ptr() as usize).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_reference_outlives_context() {
        let task = thread::spawn(|| unsafe { get_task_struct(current()) }.as_ptr() as usize)
            .join()
            .unwrap();
        let task = NonNull::new(task as *mut TaskStruct).unwrap();
        unsafe {
            assert_eq!(task.as_ref().usage(), 1);
            put_task_struct(task);
        }
    }

    #[test]
    fn test_get_put_balance() {
        let task = TaskStruct::alloc("balance");
        unsafe {
            get_task_struct(task);
            assert_eq!(task.as_ref().usage(), 2);
            put_task_struct(task);
            assert_eq!(task.as_ref().usage(), 1);
            put_task_struct(task);
        }
    }

    #[test]
    fn test_signals() {
        let task = TaskStruct::alloc("sig");
        let t = unsafe { task.as_ref() };
        assert!(!t.signal_pending());
        t.send_signal(9);
        assert!(t.signal_pending());
        t.clear_signals();
        assert!(!t.signal_pending());
        unsafe { put_task_struct(task) };
    }

    #[test]
    fn test_comm_truncated() {
        let task = TaskStruct::alloc("a-very-long-thread-name");
        assert_eq!(unsafe { task.as_ref() }.comm(), "a-very-long-thr");
        unsafe { put_task_struct(task) };
    }
}
