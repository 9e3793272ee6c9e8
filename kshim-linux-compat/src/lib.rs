//! Linux helper boundary
//!
//! Kernel primitives that only exist as inline functions or macros in C
//! headers have no linkable symbol. This crate gives each one a fixed
//! `rust_helper_*` name with the C calling convention so a module written in
//! another language can call it.
//!
//! # Architecture
//!
//! ```text
//! Foreign module
//!      ↓
//! Helper layer (this crate) - forwarding only
//!      ↓
//! kshim subsystems (sync, mm, radix, block, fs)
//! ```
//!
//! # Design Principles
//!
//! - **Forwarding Only**: no buffering, retries or state of its own
//! - **Stable Names**: symbol names and argument order never change
//! - **Same Contract**: blocking rules and reference counting are exactly
//!   those of the wrapped primitive
//! - **Safety Boundary**: raw pointers are checked or documented here and
//!   nowhere else
//!
//! A broken invariant (unbalanced unlock, sleeping in atomic context)
//! panics, and a panic cannot unwind across `extern "C"`, so it stops the
//! process the way `BUG()` stops the kernel.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

pub mod block;
pub mod bug;
pub mod err;
pub mod error;
pub mod fs;
pub mod mm;
pub mod percpu;
pub mod radix;
pub mod sync;
pub mod task;
pub mod types;

pub use error::errno_to_result;
pub use types::*;
