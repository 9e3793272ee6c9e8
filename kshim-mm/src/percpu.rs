//! Dynamic per-CPU allocator
//!
//! [`alloc_percpu`] returns the base of `num_online_cpus()` zeroed units,
//! one cache-line-aligned unit per CPU. [`per_cpu_ptr`] is pure address
//! arithmetic on that base. A unit may be touched without further locking
//! only by its own CPU inside a [`get_cpu`]/[`put_cpu`] bracket.

use core::alloc::Layout;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicI64, Ordering};
use std::collections::HashMap;

use kshim_core::context;
use kshim_core::runtime::runtime;
use kshim_ffi::{KernelError, KernelResult, L1_CACHE_BYTES, PAGE_SIZE};
use parking_lot::Mutex;

/// Live chunks by base address.
static CHUNKS: Mutex<Option<HashMap<usize, Layout>>> = Mutex::new(None);

/// `num_online_cpus()`
pub fn num_online_cpus() -> u32 {
    runtime().num_online_cpus()
}

/// Distance between two CPUs' units for a `T`.
pub const fn unit_size<T>() -> usize {
    let align = if core::mem::align_of::<T>() > L1_CACHE_BYTES {
        core::mem::align_of::<T>()
    } else {
        L1_CACHE_BYTES
    };
    let size = if core::mem::size_of::<T>() == 0 {
        1
    } else {
        core::mem::size_of::<T>()
    };
    (size + align - 1) / align * align
}

fn chunk_layout<T>() -> KernelResult<Layout> {
    let align = core::mem::align_of::<T>().max(L1_CACHE_BYTES);
    let size = unit_size::<T>()
        .checked_mul(num_online_cpus() as usize)
        .ok_or(KernelError::ENOMEM)?;
    Ok(Layout::from_size_align(size, align)?)
}

/// Pages a chunk is charged against the memory budget.
fn chunk_pages(layout: Layout) -> usize {
    layout.size().div_ceil(PAGE_SIZE)
}

/// `alloc_percpu(T)`: one zeroed `T` per online CPU. Fails with `ENOMEM`
/// when the page budget or the host allocator is exhausted.
pub fn alloc_percpu<T>() -> KernelResult<NonNull<T>> {
    let layout = chunk_layout::<T>()?;
    let nr = chunk_pages(layout);
    if !runtime().reserve_pages(nr) {
        tracing::debug!(pages = nr, "alloc_percpu: out of memory");
        return Err(KernelError::ENOMEM);
    }
    // SAFETY: non-zero size, every unit is at least one byte.
    let Some(base) = NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) }) else {
        runtime().release_pages(nr);
        return Err(KernelError::ENOMEM);
    };
    CHUNKS
        .lock()
        .get_or_insert_with(HashMap::new)
        .insert(base.as_ptr() as usize, layout);
    tracing::debug!(base = ?base, unit = unit_size::<T>(), "percpu chunk allocated");
    Ok(base.cast())
}

/// `free_percpu()`. Null is ignored; anything else must be a live chunk.
///
/// # Safety
/// No unit of the chunk may be in use, now or later.
pub unsafe fn free_percpu<T>(base: *mut T) {
    if base.is_null() {
        return;
    }
    let layout = CHUNKS
        .lock()
        .as_mut()
        .and_then(|chunks| chunks.remove(&(base as usize)));
    match layout {
        Some(layout) => {
            std::alloc::dealloc(base.cast(), layout);
            runtime().release_pages(chunk_pages(layout));
            tracing::debug!(base = ?base, "percpu chunk freed");
        }
        None => kshim_core::bug!("free_percpu({:p}): not a live percpu chunk", base),
    }
}

/// `per_cpu_ptr()`: address of `cpu`'s unit.
pub fn per_cpu_ptr<T>(base: *mut T, cpu: u32) -> *mut T {
    let online = num_online_cpus();
    if cpu >= online {
        kshim_core::bug!("per_cpu_ptr: cpu {} not online ({} online)", cpu, online);
    }
    base.cast::<u8>()
        .wrapping_add(cpu as usize * unit_size::<T>())
        .cast()
}

/// `get_cpu()`: disable preemption and return the current CPU.
pub fn get_cpu() -> u32 {
    context::preempt_disable();
    context::smp_processor_id()
}

/// `put_cpu()`
pub fn put_cpu() {
    context::preempt_enable();
}

/// Scoped [`get_cpu`]/[`put_cpu`] bracket. Sleeping while it lives is a
/// bug.
pub struct CpuGuard {
    cpu: u32,
    _not_send: PhantomData<*const ()>,
}

impl CpuGuard {
    pub fn new() -> Self {
        Self {
            cpu: get_cpu(),
            _not_send: PhantomData,
        }
    }

    pub fn cpu(&self) -> u32 {
        self.cpu
    }
}

impl Drop for CpuGuard {
    fn drop(&mut self) {
        put_cpu();
    }
}

/// Current CPU id, valid for the duration of a closure.
#[derive(Debug)]
pub struct CpuId;

impl CpuId {
    pub fn read<R>(f: impl FnOnce(u32) -> R) -> R {
        let guard = CpuGuard::new();
        f(guard.cpu())
    }
}

/// One `T` per online CPU, created with `T::default()`.
pub struct PerCpu<T> {
    base: NonNull<T>,
    nr_cpus: u32,
}

unsafe impl<T: Send> Send for PerCpu<T> {}
unsafe impl<T: Send + Sync> Sync for PerCpu<T> {}

impl<T: Default> PerCpu<T> {
    pub fn new() -> KernelResult<Self> {
        let base = alloc_percpu::<T>()?;
        let nr_cpus = num_online_cpus();
        for cpu in 0..nr_cpus {
            // SAFETY: in-bounds unit of a fresh chunk.
            unsafe { ptr::write(per_cpu_ptr(base.as_ptr(), cpu), T::default()) };
        }
        Ok(Self { base, nr_cpus })
    }
}

impl<T> PerCpu<T> {
    /// Run `f` on this CPU's instance with preemption disabled.
    pub fn with_current<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        CpuId::read(|cpu| f(self.get(cpu)))
    }

    /// `cpu`'s instance.
    pub fn get(&self, cpu: u32) -> &T {
        // SAFETY: initialized in `new`, shared access only.
        unsafe { &*per_cpu_ptr(self.base.as_ptr(), cpu) }
    }

    pub fn get_mut(&mut self, cpu: u32) -> &mut T {
        // SAFETY: `&mut self` excludes every other accessor.
        unsafe { &mut *per_cpu_ptr(self.base.as_ptr(), cpu) }
    }

    /// `for_each_possible_cpu` over the instances.
    pub fn for_each_cpu(&self, mut f: impl FnMut(u32, &T)) {
        for cpu in 0..self.nr_cpus {
            f(cpu, self.get(cpu));
        }
    }

    pub fn as_ptr(&self) -> *mut T {
        self.base.as_ptr()
    }
}

impl<T> Drop for PerCpu<T> {
    fn drop(&mut self) {
        for cpu in 0..self.nr_cpus {
            // SAFETY: every unit was initialized and is dropped once.
            unsafe { ptr::drop_in_place(per_cpu_ptr(self.base.as_ptr(), cpu)) };
        }
        // SAFETY: allocated by `alloc_percpu`, no references remain.
        unsafe { free_percpu(self.base.as_ptr()) };
    }
}

/// Per-CPU `long long` counter.
pub struct PerCpuCounter {
    counts: PerCpu<AtomicI64>,
}

impl PerCpuCounter {
    pub fn new() -> KernelResult<Self> {
        Ok(Self {
            counts: PerCpu::new()?,
        })
    }

    /// This CPU's value.
    pub fn get(&self) -> i64 {
        self.counts.with_current(|c| c.load(Ordering::Relaxed))
    }

    /// Set this CPU's value.
    pub fn set(&self, value: i64) {
        self.counts.with_current(|c| c.store(value, Ordering::Relaxed));
    }

    /// Add to this CPU's value.
    pub fn add(&self, delta: i64) {
        self.counts.with_current(|c| c.fetch_add(delta, Ordering::Relaxed));
    }

    /// Sum over all CPUs. Not a snapshot under concurrent updates.
    pub fn sum(&self) -> i64 {
        let mut sum = 0;
        self.counts
            .for_each_cpu(|_, c| sum += c.load(Ordering::Relaxed));
        sum
    }
}
