//! Filesystem objects
//!
//! Inodes with their size, ownership and `i_rwsem`; the dentry and file
//! reference chain; delayed calls.

pub mod dcache;
pub mod delayed_call;
pub mod file;
pub mod inode;

pub use dcache::{dget, dput, Dentry};
pub use delayed_call::{
    clear_delayed_call, do_delayed_call, set_delayed_call, DelayedCall, DelayedFn,
};
pub use file::{fput, get_file, File};
pub use inode::{
    i_gid, i_gid_read, i_gid_write, i_size_read, i_size_write, i_uid, i_uid_read, i_uid_write,
    ihold, inode_lock, inode_lock_shared, inode_trylock, inode_trylock_shared, inode_unlock,
    inode_unlock_shared, iput, Inode,
};

static_assertions::assert_eq_size!(DelayedCall, [usize; 2]);
