//! ABI Compatibility Testing for kshim
//!
//! Checks that the structures handed across the helper boundary have the
//! layout C callers expect, and that the `rust_helper_*` symbols link and
//! behave when called from C. The C side lives in `build.rs` (reference
//! layouts) and `csrc/` (callers).

#![allow(non_camel_case_types)]

use core::mem::{align_of, size_of};

// The helper symbols are only referenced from C; keep the crate linked.
extern crate kshim_linux_compat;

/// Macro to verify structure size matches expected value
#[macro_export]
macro_rules! verify_size {
    ($rust_type:ty, $expected_size:expr) => {
        const _: () = {
            const SIZE: usize = ::core::mem::size_of::<$rust_type>();
            const EXPECTED: usize = $expected_size;

            assert!(SIZE == EXPECTED, "Size mismatch");
        };
    };
}

/// Macro to verify field offset matches expected value
#[macro_export]
macro_rules! verify_offset {
    ($type:ty, $field:ident, $expected_offset:expr) => {
        const _: () = {
            const OFFSET: usize = ::memoffset::offset_of!($type, $field);
            const EXPECTED: usize = $expected_offset;

            assert!(OFFSET == EXPECTED, "Offset mismatch");
        };
    };
}

/// Macro to verify type alignment
#[macro_export]
macro_rules! verify_align {
    ($type:ty, $expected_align:expr) => {
        const _: () = {
            const ALIGN: usize = ::core::mem::align_of::<$type>();
            const EXPECTED: usize = $expected_align;

            assert!(ALIGN == EXPECTED, "Alignment mismatch");
        };
    };
}

/// Outcome of comparing one Rust structure with its C counterpart.
#[derive(Debug, PartialEq, Eq)]
pub struct AbiCompatResult {
    pub struct_name: &'static str,
    pub size_match: bool,
    pub align_match: bool,
}

impl AbiCompatResult {
    pub fn is_compatible(&self) -> bool {
        self.size_match && self.align_match
    }
}

/// Compare the layout of `T` with the size and alignment C reports.
pub fn verify_struct_layout<T>(
    name: &'static str,
    c_size: usize,
    c_align: usize,
) -> AbiCompatResult {
    AbiCompatResult {
        struct_name: name,
        size_match: size_of::<T>() == c_size,
        align_match: align_of::<T>() == c_align,
    }
}
