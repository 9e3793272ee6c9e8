//! C type names used in helper signatures

use kshim_ffi::{c_int, c_uint};

pub type pid_t = c_int;
pub type uid_t = u32;
pub type gid_t = u32;
pub type gfp_t = c_uint;
pub type blk_status_t = u8;

pub type spinlock_t = kshim_sync::RawSpinLock;
pub type lock_class_key = kshim_sync::LockClassKey;
pub type mutex = kshim_sync::RawMutex;
pub type rcudata = kshim_sync::RcuPointer;
pub type task_struct = kshim_core::TaskStruct;
pub type page = kshim_mm::Page;
pub type folio = kshim_mm::Folio;
pub type address_space = kshim_mm::AddressSpace;
pub type radix_tree_root = kshim_radix::RadixTreeRoot;
pub type radix_tree_iter = kshim_radix::RadixTreeIter;
pub type request = kshim_block::Request;
pub type bio = kshim_block::Bio;
pub type bvec_iter = kshim_block::BvecIter;
pub type inode = kshim_fs::Inode;
pub type dentry = kshim_fs::Dentry;
pub type file = kshim_fs::File;
pub type delayed_call = kshim_fs::DelayedCall;
