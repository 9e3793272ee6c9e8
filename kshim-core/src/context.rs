//! Execution context bookkeeping
//!
//! Each host thread stands in for one kernel execution context. The state
//! kept here is what `preempt_count()`, `irqs_disabled()` and the RCU
//! nesting depth would be in the kernel, and it is what [`might_sleep`]
//! consults before any operation that can block.
//!
//! Disabling preemption takes exclusive occupancy of the context's CPU
//! through the runtime, so two contexts never run "on" the same CPU with
//! preemption off at the same time.

use core::cell::Cell;

use crate::runtime::runtime;
use kshim_ffi::c_ulong;

/// Saved interrupt state returned by [`local_irq_save`].
///
/// Bit 0 records whether interrupts were enabled, the remaining bits the
/// save depth, so a token restored out of order is detected.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IrqFlags(c_ulong);

impl IrqFlags {
    pub const fn from_raw(raw: c_ulong) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> c_ulong {
        self.0
    }

    fn encode(depth: u32, enabled: bool) -> Self {
        Self(((depth as c_ulong) << 1) | enabled as c_ulong)
    }

    fn depth(self) -> c_ulong {
        self.0 >> 1
    }

    fn enabled(self) -> bool {
        self.0 & 1 != 0
    }
}

struct ExecContext {
    preempt: Cell<u32>,
    irq_depth: Cell<u32>,
    irqs_enabled: Cell<bool>,
    hardirq: Cell<u32>,
    rcu_nesting: Cell<u32>,
    cpu: Cell<Option<u32>>,
    pinned: Cell<Option<u32>>,
}

impl ExecContext {
    const fn new() -> Self {
        Self {
            preempt: Cell::new(0),
            irq_depth: Cell::new(0),
            irqs_enabled: Cell::new(true),
            hardirq: Cell::new(0),
            rcu_nesting: Cell::new(0),
            cpu: Cell::new(None),
            pinned: Cell::new(None),
        }
    }

    fn cpu(&self) -> u32 {
        match self.cpu.get() {
            Some(cpu) => cpu,
            None => {
                let cpu = runtime().assign_cpu();
                self.cpu.set(Some(cpu));
                cpu
            }
        }
    }

    fn atomic(&self) -> bool {
        self.preempt.get() > 0 || self.hardirq.get() > 0 || !self.irqs_enabled.get()
    }
}

impl Drop for ExecContext {
    fn drop(&mut self) {
        // A context that dies with preemption disabled (a BUG unwinding
        // through it) must not keep its CPU occupied.
        if let Some(cpu) = self.pinned.take() {
            runtime().unpin_cpu(cpu);
        }
    }
}

thread_local! {
    static CONTEXT: ExecContext = const { ExecContext::new() };
}

/// `smp_processor_id()`: the CPU this context runs on.
pub fn smp_processor_id() -> u32 {
    CONTEXT.with(|c| c.cpu())
}

/// `preempt_count()`
pub fn preempt_count() -> u32 {
    CONTEXT.with(|c| c.preempt.get())
}

/// `preempt_disable()`. The outermost call pins the context to its CPU.
pub fn preempt_disable() {
    CONTEXT.with(|c| {
        let count = c.preempt.get();
        if count == 0 {
            let cpu = c.cpu();
            runtime().pin_cpu(cpu);
            c.pinned.set(Some(cpu));
        }
        c.preempt.set(count + 1);
    });
}

/// `preempt_enable()`. Unbalanced calls are fatal.
pub fn preempt_enable() {
    CONTEXT.with(|c| {
        let count = c.preempt.get();
        if count == 0 {
            crate::bug!("preempt_enable() without matching preempt_disable()");
        }
        c.preempt.set(count - 1);
        if count == 1 {
            if let Some(cpu) = c.pinned.take() {
                runtime().unpin_cpu(cpu);
            }
        }
    });
}

/// `local_irq_save()`: disable local interrupts and return the token that
/// restores the previous state.
pub fn local_irq_save() -> IrqFlags {
    CONTEXT.with(|c| {
        let depth = c.irq_depth.get();
        let flags = IrqFlags::encode(depth, c.irqs_enabled.get());
        c.irq_depth.set(depth + 1);
        c.irqs_enabled.set(false);
        flags
    })
}

/// `local_irq_restore(flags)`. `flags` must come from the innermost
/// outstanding [`local_irq_save`].
pub fn local_irq_restore(flags: IrqFlags) {
    CONTEXT.with(|c| {
        let depth = c.irq_depth.get();
        if depth == 0 || flags.depth() != (depth - 1) as c_ulong {
            crate::bug!(
                "local_irq_restore() with flags {:#x} at irq save depth {}",
                flags.as_raw(),
                depth
            );
        }
        c.irq_depth.set(depth - 1);
        c.irqs_enabled.set(flags.enabled());
    });
}

/// `irqs_disabled()`
pub fn irqs_disabled() -> bool {
    CONTEXT.with(|c| !c.irqs_enabled.get())
}

/// Enter hard interrupt context on this execution context.
pub fn irq_enter() {
    CONTEXT.with(|c| c.hardirq.set(c.hardirq.get() + 1));
}

/// Leave hard interrupt context.
pub fn irq_exit() {
    CONTEXT.with(|c| {
        let depth = c.hardirq.get();
        if depth == 0 {
            crate::bug!("irq_exit() outside interrupt context");
        }
        c.hardirq.set(depth - 1);
    });
}

/// `in_irq()` / `in_hardirq()`
pub fn in_irq() -> bool {
    CONTEXT.with(|c| c.hardirq.get() > 0)
}

/// `in_interrupt()`
pub fn in_interrupt() -> bool {
    in_irq()
}

/// `in_atomic()`: sleeping is not allowed.
pub fn in_atomic() -> bool {
    CONTEXT.with(|c| c.atomic())
}

/// Current RCU read-side nesting depth.
pub fn rcu_read_lock_nesting() -> u32 {
    CONTEXT.with(|c| c.rcu_nesting.get())
}

/// Record entry into an RCU read-side critical section. Returns the depth
/// after entering.
pub fn rcu_nesting_inc() -> u32 {
    CONTEXT.with(|c| {
        let depth = c.rcu_nesting.get() + 1;
        c.rcu_nesting.set(depth);
        depth
    })
}

/// Record exit from an RCU read-side critical section. Returns the depth
/// after leaving; exiting at depth zero is fatal.
pub fn rcu_nesting_dec() -> u32 {
    CONTEXT.with(|c| {
        let depth = c.rcu_nesting.get();
        if depth == 0 {
            crate::bug!("rcu_read_unlock() without matching rcu_read_lock()");
        }
        c.rcu_nesting.set(depth - 1);
        depth - 1
    })
}

/// `might_sleep()`: `op` is about to block. Fatal from atomic context,
/// interrupt context or inside an RCU read-side critical section.
pub fn might_sleep(op: &'static str) {
    CONTEXT.with(|c| {
        if c.atomic() || c.rcu_nesting.get() > 0 {
            crate::bug!(
                "sleeping function {} called from invalid context: preempt_count={}, irqs_disabled={}, in_irq={}, rcu_nesting={}",
                op,
                c.preempt.get(),
                !c.irqs_enabled.get(),
                c.hardirq.get() > 0,
                c.rcu_nesting.get()
            );
        }
    });
}
