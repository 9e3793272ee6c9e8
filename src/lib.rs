//! kshim: kernel primitives behind stable symbols
//!
//! Inline kernel functions and macros have no address a foreign-language
//! module can link against. kshim gives each one a fixed `rust_helper_*`
//! entry point (see [`kshim_linux_compat`]) and backs them with hosted
//! subsystems that keep the kernel's blocking and reference-counting
//! rules.
//!
//! # Crates
//!
//! - [`kshim_ffi`]: C scalar types, GFP flags, errno and error pointers
//! - [`kshim_core`]: runtime oracle, execution context, `BUG()`
//! - [`kshim_sync`]: spinlock, mutex, rw-semaphore, RCU, seqcount
//! - [`kshim_mm`]: pages, folios, page cache, per-CPU allocator
//! - [`kshim_radix`]: radix tree and its chunk iterator
//! - [`kshim_block`]: requests with driver PDUs, bios, block status
//! - [`kshim_fs`]: inode, dentry, file, delayed call
//! - [`kshim_linux_compat`]: the exported helper symbols
//!
//! Call [`init`] once at startup to configure logging and the runtime.

pub mod bootstrap;
pub mod config;

pub use kshim_block;
pub use kshim_core;
pub use kshim_ffi;
pub use kshim_fs;
pub use kshim_linux_compat;
pub use kshim_mm;
pub use kshim_radix;
pub use kshim_sync;

pub use bootstrap::{init, InitError};
pub use config::{Config, ConfigError};
