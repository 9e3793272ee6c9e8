//! Fatal invariant violations
//!
//! `BUG()` in the kernel stops the offending context. Here it is a logged
//! panic: with `panic = "abort"` (and across every `extern "C"` trampoline)
//! the process stops, in unit tests it can be observed.

/// Report a broken invariant and stop the current execution context.
#[macro_export]
macro_rules! bug {
    ($($arg:tt)+) => {
        $crate::bug::report(file!(), line!(), &::std::format!($($arg)+))
    };
}

/// `BUG_ON(cond)`
#[macro_export]
macro_rules! bug_on {
    ($cond:expr) => {
        if $cond {
            $crate::bug!("BUG_ON({})", stringify!($cond));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if $cond {
            $crate::bug!($($arg)+);
        }
    };
}

#[cold]
#[inline(never)]
pub fn report(file: &'static str, line: u32, msg: &str) -> ! {
    tracing::error!(target: "kshim::bug", file, line, "kernel BUG: {}", msg);
    panic!("kernel BUG at {file}:{line}: {msg}");
}

#[cfg(test)]
mod tests {
    #[test]
    #[should_panic(expected = "kernel BUG")]
    fn test_bug_panics() {
        crate::bug!("unreachable state {}", 3);
    }

    #[test]
    fn test_bug_on_false_is_silent() {
        crate::bug_on!(1 + 1 == 3);
    }

    #[test]
    #[should_panic(expected = "BUG_ON(2 > 1)")]
    fn test_bug_on_true() {
        crate::bug_on!(2 > 1);
    }
}
