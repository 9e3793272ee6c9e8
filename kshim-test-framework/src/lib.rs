//! Test framework for the kshim helper boundary
//!
//! Owned handles for the reference-counted objects the scenarios create,
//! plus drivers that reach the subsystems the way a C caller would.

pub mod helpers;

pub use helpers::{is_fatal, radix_indices, FolioRef, InodeRef, PerCpuLongLong};
