//! Build script for ABI compatibility testing
//!
//! Generates C reference definitions of the structures shared with C
//! callers, compiles them together with the C caller shims under `csrc/`,
//! and links both into the test binaries.

use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=csrc/helper_calls.c");

    let c_code = generate_c_reference();
    let c_file = out_dir.join("linux_reference.c");
    fs::write(&c_file, c_code).expect("Failed to write C reference code");

    cc::Build::new()
        .file(&c_file)
        .file("csrc/helper_calls.c")
        .warnings(false)
        .compile("linux_reference");
}

fn generate_c_reference() -> String {
    r#"
// Structure definitions as seen by C callers of the helpers

#include <stddef.h>
#include <stdint.h>

typedef uint64_t sector_t;

// include/linux/kref.h (refcount_t is a 32-bit counter)
struct kref {
    unsigned int refcount;
};

// rcudata wrapper used by the RCU pointer helpers
struct rcudata {
    void *a;
};

struct page;

// include/linux/bvec.h
struct bio_vec {
    struct page *bv_page;
    unsigned int bv_len;
    unsigned int bv_offset;
};

struct bvec_iter {
    sector_t bi_sector;
    unsigned int bi_size;
    unsigned int bi_idx;
    unsigned int bi_bvec_done;
};

struct radix_tree_node;

// include/linux/radix-tree.h
struct radix_tree_iter {
    unsigned long index;
    unsigned long next_index;
    unsigned long tags;
    struct radix_tree_node *node;
};

// include/linux/delayed_call.h
struct delayed_call {
    void (*fn)(void *);
    void *arg;
};

// Size functions
size_t kref_size(void) { return sizeof(struct kref); }
size_t rcudata_size(void) { return sizeof(struct rcudata); }
size_t bio_vec_size(void) { return sizeof(struct bio_vec); }
size_t bvec_iter_size(void) { return sizeof(struct bvec_iter); }
size_t radix_tree_iter_size(void) { return sizeof(struct radix_tree_iter); }
size_t delayed_call_size(void) { return sizeof(struct delayed_call); }

// Alignment functions
size_t rcudata_align(void) { return _Alignof(struct rcudata); }
size_t bio_vec_align(void) { return _Alignof(struct bio_vec); }
size_t bvec_iter_align(void) { return _Alignof(struct bvec_iter); }
size_t radix_tree_iter_align(void) { return _Alignof(struct radix_tree_iter); }
size_t delayed_call_align(void) { return _Alignof(struct delayed_call); }

// Offset functions
size_t bio_vec_len_offset(void) { return offsetof(struct bio_vec, bv_len); }
size_t bio_vec_offset_offset(void) { return offsetof(struct bio_vec, bv_offset); }
size_t bvec_iter_size_offset(void) { return offsetof(struct bvec_iter, bi_size); }
size_t bvec_iter_idx_offset(void) { return offsetof(struct bvec_iter, bi_idx); }
size_t bvec_iter_done_offset(void) { return offsetof(struct bvec_iter, bi_bvec_done); }
size_t radix_tree_iter_next_index_offset(void) { return offsetof(struct radix_tree_iter, next_index); }
size_t radix_tree_iter_tags_offset(void) { return offsetof(struct radix_tree_iter, tags); }
size_t radix_tree_iter_node_offset(void) { return offsetof(struct radix_tree_iter, node); }
size_t delayed_call_arg_offset(void) { return offsetof(struct delayed_call, arg); }

// GFP flags (include/linux/gfp.h)
#define ___GFP_HIGH             0x20u
#define ___GFP_IO               0x40u
#define ___GFP_FS               0x80u
#define ___GFP_ATOMIC           0x200u
#define ___GFP_DIRECT_RECLAIM   0x400u
#define ___GFP_KSWAPD_RECLAIM   0x800u
#define __GFP_RECLAIM (___GFP_DIRECT_RECLAIM | ___GFP_KSWAPD_RECLAIM)
#define GFP_ATOMIC (___GFP_HIGH | ___GFP_ATOMIC | ___GFP_KSWAPD_RECLAIM)
#define GFP_KERNEL (__GFP_RECLAIM | ___GFP_IO | ___GFP_FS)

const unsigned int VERIFY_GFP_KERNEL = GFP_KERNEL;
const unsigned int VERIFY_GFP_ATOMIC = GFP_ATOMIC;

// Error codes (include/uapi/asm-generic/errno-base.h, errno.h)
const int VERIFY_EPERM = 1;
const int VERIFY_ENOENT = 2;
const int VERIFY_EINTR = 4;
const int VERIFY_EIO = 5;
const int VERIFY_EAGAIN = 11;
const int VERIFY_ENOMEM = 12;
const int VERIFY_EBUSY = 16;
const int VERIFY_EINVAL = 22;
const int VERIFY_ENOSPC = 28;
const int VERIFY_ENAMETOOLONG = 36;
const int VERIFY_EOPNOTSUPP = 95;
const int VERIFY_ETIMEDOUT = 110;
const long VERIFY_MAX_ERRNO = 4095;

// Block status codes (include/linux/blk_types.h)
const unsigned char VERIFY_BLK_STS_OK = 0;
const unsigned char VERIFY_BLK_STS_NOTSUPP = 1;
const unsigned char VERIFY_BLK_STS_TIMEOUT = 2;
const unsigned char VERIFY_BLK_STS_NOSPC = 3;
const unsigned char VERIFY_BLK_STS_RESOURCE = 9;
const unsigned char VERIFY_BLK_STS_IOERR = 10;
const unsigned char VERIFY_BLK_STS_AGAIN = 12;
"#
    .to_string()
}
