//! Core kernel types and the hosted execution model
//!
//! Everything the helper crates need to know about "where" they run lives
//! here: the [`runtime`] oracle answering process-wide questions (online
//! CPUs, the current task, memory pressure), the per-context bookkeeping in
//! [`context`] that decides whether sleeping is legal, and the shared
//! reference-counted types.

pub mod bug;
pub mod context;
pub mod runtime;
pub mod task;
pub mod types;
pub mod uaccess;

pub use context::IrqFlags;
pub use runtime::{install, runtime, HostedRuntime, Runtime, RuntimeError};
pub use task::TaskStruct;
pub use types::*;
