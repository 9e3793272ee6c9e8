//! Sequence counters (`seqcount_t`)
//!
//! Writers bump the counter to odd before touching the protected data and
//! back to even after. Readers retry if the counter was odd or moved. The
//! protected data itself must be accessed through atomics; writers must be
//! serialized by the caller.

use core::sync::atomic::{fence, AtomicU32, Ordering};

use kshim_core::context;

#[repr(C)]
#[derive(Debug, Default)]
pub struct SeqCount {
    sequence: AtomicU32,
}

impl SeqCount {
    pub const fn new() -> Self {
        Self {
            sequence: AtomicU32::new(0),
        }
    }

    /// `read_seqcount_begin()`: waits out an in-progress write.
    pub fn read_begin(&self) -> u32 {
        loop {
            let seq = self.sequence.load(Ordering::Acquire);
            if seq & 1 == 0 {
                return seq;
            }
            core::hint::spin_loop();
        }
    }

    /// `read_seqcount_retry()`: true if the read section starting at
    /// `start` overlapped a write and must be repeated.
    pub fn read_retry(&self, start: u32) -> bool {
        fence(Ordering::Acquire);
        self.sequence.load(Ordering::Relaxed) != start
    }

    /// `write_seqcount_begin()`. Disables preemption until
    /// [`SeqCount::write_end`] so readers never spin on a preempted writer.
    pub fn write_begin(&self) {
        context::preempt_disable();
        let prev = self.sequence.fetch_add(1, Ordering::Relaxed);
        kshim_core::bug_on!(prev & 1 != 0, "nested write_seqcount_begin()");
        fence(Ordering::Release);
    }

    /// `write_seqcount_end()`
    pub fn write_end(&self) {
        let prev = self.sequence.fetch_add(1, Ordering::Release);
        kshim_core::bug_on!(prev & 1 == 0, "write_seqcount_end() without begin");
        context::preempt_enable();
    }

    /// Run `f` until it observes a consistent snapshot.
    pub fn read<R>(&self, mut f: impl FnMut() -> R) -> R {
        loop {
            let start = self.read_begin();
            let r = f();
            if !self.read_retry(start) {
                return r;
            }
        }
    }

    /// Run `f` as a write section.
    pub fn write<R>(&self, f: impl FnOnce() -> R) -> R {
        self.write_begin();
        let r = f();
        self.write_end();
        r
    }

    pub fn sequence(&self) -> u32 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_write_bumps_by_two() {
        let seq = SeqCount::new();
        let start = seq.read_begin();
        seq.write(|| ());
        assert_eq!(seq.sequence(), 2);
        assert!(seq.read_retry(start));
        assert!(!seq.read_retry(seq.read_begin()));
    }

    #[test]
    fn test_end_without_begin_is_fatal() {
        let result = thread::spawn(|| SeqCount::new().write_end()).join();
        assert!(result.is_err());
    }

    #[test]
    fn test_reader_never_sees_torn_pair() {
        struct Shared {
            seq: SeqCount,
            lo: AtomicU32,
            hi: AtomicU32,
        }
        let shared = Arc::new(Shared {
            seq: SeqCount::new(),
            lo: AtomicU32::new(0),
            hi: AtomicU32::new(0),
        });
        let stop = Arc::new(AtomicBool::new(false));

        let reader = {
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let (lo, hi) = shared.seq.read(|| {
                        (
                            shared.lo.load(Ordering::Relaxed),
                            shared.hi.load(Ordering::Relaxed),
                        )
                    });
                    assert_eq!(lo, hi);
                }
            })
        };

        for i in 1..=10_000u32 {
            shared.seq.write(|| {
                shared.lo.store(i, Ordering::Relaxed);
                shared.hi.store(i, Ordering::Relaxed);
            });
        }
        stop.store(true, Ordering::Relaxed);
        reader.join().unwrap();
    }

    proptest! {
        #[test]
        fn prop_retry_iff_a_write_intervened(
            rounds in prop::collection::vec((0u32..4, any::<u32>()), 1..20)
        ) {
            let seq = SeqCount::new();
            let data = AtomicU32::new(0);
            let mut writes = 0;
            let mut last = 0;
            for (n, value) in rounds {
                let start = seq.read_begin();
                for i in 0..n {
                    seq.write(|| data.store(value.wrapping_add(i), Ordering::Relaxed));
                    last = value.wrapping_add(i);
                }
                writes += n;
                prop_assert_eq!(seq.read_retry(start), n > 0);
                prop_assert_eq!(seq.sequence(), 2 * writes);
                prop_assert_eq!(seq.read(|| data.load(Ordering::Relaxed)), last);
            }
        }
    }
}
