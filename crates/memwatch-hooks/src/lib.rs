//! # memwatch-hooks
//!
//! LD_PRELOAD interception layer for address-space changes.
//! Every `mmap`, `munmap`, `mremap`, `shmat`, `shmdt`, `sbrk`, `brk` and
//! `madvise` issued by any code in the process (and, with the `gpu` feature,
//! the CUDA allocation entry points) is forwarded to its genuine
//! implementation and then reported to a registered [`EventSink`].
//!
//! # Recursion safety
//!
//! Wrappers run while the process is still bootstrapping, from inside
//! `dlsym`, and from inside the allocator. On any path reachable from a
//! wrapper:
//! - no heap allocation, no `String`/`Vec`/`format!`
//! - no Rust `thread_local!` (use the pthread-key guard in `event`)
//! - no `panic!`/`unwrap` (return the function's failure sentinel instead)
//! - log only through `hook_*!`, which formats into a stack buffer
//!
//! # Exported ABI
//!
//! For each hooked `f`:
//! - `memwatch_orig_f`: the genuine implementation
//! - `memwatch_override_f`: the interception wrapper
//! - `f` itself when built with the `symbol-override` feature

// Allow unsafe FFI functions without safety docs - these are inherently unsafe C ABI
#![allow(clippy::missing_safety_doc)]

// Macros must be defined before modules that use them
#[macro_use]
pub mod macros;

pub mod brk;
pub mod context;
pub mod event;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod hooks;
pub mod log;
pub mod publish;
pub mod registry;
pub mod resolver;
pub mod sync;
pub mod syscall;
pub mod telemetry;

pub use context::{install, install_with, HookContext, InstallError, CONTEXT};
pub use event::{EventSink, GpuOp, MemEvent};
pub use registry::{HookDescriptor, HookId, Sentinel};
pub use resolver::{DlsymNext, Original, ResolveError, SymbolLookup};

use libc::c_int;

/// Set the calling thread's errno.
#[inline(always)]
pub fn set_errno(e: c_int) {
    #[cfg(target_os = "linux")]
    unsafe {
        *libc::__errno_location() = e;
    }
    #[cfg(target_os = "macos")]
    unsafe {
        *libc::__error() = e;
    }
}

/// Read the calling thread's errno.
#[inline(always)]
pub fn errno() -> c_int {
    #[cfg(target_os = "linux")]
    unsafe {
        *libc::__errno_location()
    }
    #[cfg(target_os = "macos")]
    unsafe {
        *libc::__error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_roundtrips_on_this_thread() {
        set_errno(libc::EAGAIN);
        assert_eq!(errno(), libc::EAGAIN);
        std::thread::spawn(|| {
            set_errno(libc::EINVAL);
            assert_eq!(errno(), libc::EINVAL);
        })
        .join()
        .unwrap();
        assert_eq!(errno(), libc::EAGAIN);
    }
}
