//! Memory management subsystem
//!
//! Page and folio descriptors with their reference counts, temporary
//! mappings, the per-file page cache and the dynamic per-CPU allocator.

pub mod folio;
pub mod mapping;
pub mod page;
pub mod percpu;

pub use folio::{folio_alloc, folio_get, folio_put, Folio};
pub use mapping::{read_mapping_folio, AddressSpace, AddressSpaceOperations};
pub use page::{
    alloc_page, alloc_pages, get_page, kmap, kmap_atomic, kmap_local_page, kunmap,
    kunmap_atomic, kunmap_local, put_page, Page, PageFlags,
};
pub use percpu::{
    alloc_percpu, free_percpu, get_cpu, num_online_cpus, per_cpu_ptr, put_cpu, CpuGuard, CpuId,
    PerCpu, PerCpuCounter,
};

static_assertions::assert_eq_size!(folio::Folio, page::Page);
