//! Per-CPU helpers for `long long` counters

use kshim_ffi::{c_int, c_longlong, c_uint};

/// Linux equivalent: `num_online_cpus()`
#[no_mangle]
pub extern "C" fn rust_helper_num_online_cpus() -> c_uint {
    kshim_mm::num_online_cpus()
}

/// Linux equivalent: `alloc_percpu(long long)`
///
/// Zeroed on every CPU. NULL when out of memory.
#[no_mangle]
pub extern "C" fn rust_helper_alloc_percpu_longlong() -> *mut c_longlong {
    match kshim_mm::alloc_percpu::<c_longlong>() {
        Ok(p) => p.as_ptr(),
        Err(e) => {
            tracing::debug!(error = ?e, "alloc_percpu failed");
            core::ptr::null_mut()
        }
    }
}

/// Linux equivalent: `free_percpu(p)`
///
/// NULL is ignored.
///
/// # Safety
///
/// `p` must come from `rust_helper_alloc_percpu_longlong` and must not be
/// used afterwards.
#[no_mangle]
pub unsafe extern "C" fn rust_helper_free_percpu_longlong(p: *mut c_longlong) {
    kshim_mm::free_percpu(p);
}

/// Linux equivalent: `get_cpu()`
///
/// Disables preemption until `rust_helper_put_cpu`.
#[no_mangle]
pub extern "C" fn rust_helper_get_cpu() -> c_int {
    kshim_mm::get_cpu() as c_int
}

/// Linux equivalent: `put_cpu()`
#[no_mangle]
pub extern "C" fn rust_helper_put_cpu() {
    kshim_mm::put_cpu();
}

/// Linux equivalent: `per_cpu_ptr(p, cpu)`
///
/// Pure address arithmetic; `p` is not dereferenced.
#[no_mangle]
pub extern "C" fn rust_helper_per_cpu_ptr(p: *mut c_longlong, cpu: c_int) -> *mut c_longlong {
    if cpu < 0 {
        kshim_core::bug!("per_cpu_ptr: negative cpu {}", cpu);
    }
    kshim_mm::per_cpu_ptr(p, cpu as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_through_helpers() {
        let p = rust_helper_alloc_percpu_longlong();
        assert!(!p.is_null());
        let cpu = rust_helper_get_cpu();
        unsafe { *rust_helper_per_cpu_ptr(p, cpu) += 5 };
        rust_helper_put_cpu();

        let total: c_longlong = (0..rust_helper_num_online_cpus() as c_int)
            .map(|cpu| unsafe { *rust_helper_per_cpu_ptr(p, cpu) })
            .sum();
        assert_eq!(total, 5);
        unsafe { rust_helper_free_percpu_longlong(p) };
    }

    #[test]
    fn test_free_null() {
        unsafe { rust_helper_free_percpu_longlong(core::ptr::null_mut()) };
    }
}
