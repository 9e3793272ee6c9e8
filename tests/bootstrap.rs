//! Process bootstrap tests
//!
//! The runtime is installed once per process, so everything that depends
//! on the installed runtime lives in a single test.

use kshim::bootstrap::{init_tracing, install_runtime};
use kshim::config::{LogConfig, RuntimeConfig};
use kshim::kshim_core::RuntimeError;
use kshim::kshim_ffi::{GfpFlags, KernelError};
use kshim::kshim_linux_compat::percpu::rust_helper_num_online_cpus;
use kshim::{Config, InitError};

fn config(online_cpus: u32, page_limit: Option<usize>) -> Config {
    Config {
        runtime: RuntimeConfig {
            online_cpus,
            page_limit,
        },
        log: LogConfig {
            filter: "kshim=debug".to_string(),
        },
    }
}

#[test]
fn test_init_installs_configured_runtime() {
    kshim::init(&config(2, Some(1))).unwrap();
    assert_eq!(rust_helper_num_online_cpus(), 2);

    // one page fits the budget, two do not
    let page = kshim::kshim_mm::alloc_pages(GfpFlags::GFP_KERNEL, 0).unwrap();
    assert_eq!(
        kshim::kshim_mm::alloc_pages(GfpFlags::GFP_KERNEL, 1).unwrap_err(),
        KernelError::ENOMEM
    );
    // per-CPU chunks draw on the same budget
    assert_eq!(
        kshim::kshim_mm::alloc_percpu::<i64>().unwrap_err(),
        KernelError::ENOMEM
    );
    unsafe { kshim::kshim_mm::put_page(page) };
    let page = kshim::kshim_mm::alloc_pages(GfpFlags::GFP_KERNEL, 0).unwrap();
    unsafe { kshim::kshim_mm::put_page(page) };

    assert!(matches!(
        install_runtime(&config(4, None)),
        Err(InitError::Runtime(RuntimeError::AlreadyInstalled))
    ));
    assert!(matches!(init_tracing("info"), Err(InitError::Tracing(_))));
}

#[test]
fn test_invalid_cpu_count_is_rejected_before_install() {
    for cpus in [0, 65] {
        assert!(matches!(
            install_runtime(&config(cpus, None)),
            Err(InitError::Runtime(RuntimeError::InvalidCpuCount(n))) if n == cpus
        ));
    }
}
