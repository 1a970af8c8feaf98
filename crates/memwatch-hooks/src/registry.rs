//! Hooked function descriptors.
//!
//! One immutable entry per intercepted function: its C symbol, the value the
//! genuine function returns on failure, and the native call number when the
//! platform has one. The table is built at compile time and never changes.

use libc::{c_int, c_long, c_void};
use std::ffi::CStr;

/// `CUDA_ERROR_OUT_OF_MEMORY` from the driver API.
pub const CUDA_ERROR_OUT_OF_MEMORY: c_int = 2;
/// `cudaErrorMemoryAllocation` from the runtime API.
pub const CUDA_ERROR_MEMORY_ALLOCATION: c_int = 2;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookId {
    Mmap = 0,
    Munmap,
    Mremap,
    Shmat,
    Shmdt,
    Sbrk,
    Brk,
    Madvise,
    CuMemFree,
    CuMemFreeHost,
    CuMemAlloc,
    CuMemAllocManaged,
    CuMemAllocPitch,
    CuMemHostGetDevicePointer,
    CuMemHostRegister,
    CuMemHostUnregister,
    CudaFree,
    CudaFreeHost,
    CudaMalloc,
    CudaMallocManaged,
    CudaMallocPitch,
    CudaHostGetDevicePointer,
    CudaHostRegister,
    CudaHostUnregister,
}

impl HookId {
    pub const COUNT: usize = 24;

    pub const ALL: [HookId; Self::COUNT] = [
        HookId::Mmap,
        HookId::Munmap,
        HookId::Mremap,
        HookId::Shmat,
        HookId::Shmdt,
        HookId::Sbrk,
        HookId::Brk,
        HookId::Madvise,
        HookId::CuMemFree,
        HookId::CuMemFreeHost,
        HookId::CuMemAlloc,
        HookId::CuMemAllocManaged,
        HookId::CuMemAllocPitch,
        HookId::CuMemHostGetDevicePointer,
        HookId::CuMemHostRegister,
        HookId::CuMemHostUnregister,
        HookId::CudaFree,
        HookId::CudaFreeHost,
        HookId::CudaMalloc,
        HookId::CudaMallocManaged,
        HookId::CudaMallocPitch,
        HookId::CudaHostGetDevicePointer,
        HookId::CudaHostRegister,
        HookId::CudaHostUnregister,
    ];

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline(always)]
    pub const fn descriptor(self) -> &'static HookDescriptor {
        let table: &'static [HookDescriptor; HookId::COUNT] = &DESCRIPTORS;
        &table[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    pub const fn is_gpu(self) -> bool {
        self.descriptor().gpu
    }

    /// Hooks compiled into this build.
    pub fn enabled() -> impl Iterator<Item = HookId> {
        Self::ALL
            .into_iter()
            .filter(|id| cfg!(feature = "gpu") || !id.is_gpu())
    }
}

/// What a hooked function returns when it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    /// `(void *)-1`
    MapFailed,
    /// `-1`
    MinusOne,
    /// A status-code API's own error value
    Status(c_int),
}

#[derive(Debug)]
pub struct HookDescriptor {
    pub id: HookId,
    pub name: &'static str,
    pub symbol: &'static CStr,
    pub sentinel: Sentinel,
    pub syscall: Option<c_long>,
    pub gpu: bool,
}

impl HookDescriptor {
    pub const fn has_syscall(&self) -> bool {
        self.syscall.is_some()
    }
}

/// Typed view of a [`Sentinel`] for a wrapper's return type.
pub trait HookReturn: Copy {
    fn from_sentinel(sentinel: Sentinel) -> Self;
}

impl HookReturn for *mut c_void {
    fn from_sentinel(_sentinel: Sentinel) -> Self {
        libc::MAP_FAILED
    }
}

impl HookReturn for c_int {
    fn from_sentinel(sentinel: Sentinel) -> Self {
        match sentinel {
            Sentinel::MapFailed | Sentinel::MinusOne => -1,
            Sentinel::Status(code) => code,
        }
    }
}

#[cfg(all(
    feature = "raw-syscalls",
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
macro_rules! native {
    ($nr:ident) => {
        Some(libc::$nr)
    };
}

#[cfg(not(all(
    feature = "raw-syscalls",
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
)))]
macro_rules! native {
    ($nr:ident) => {
        None
    };
}

macro_rules! descriptor {
    ($id:ident, $name:literal, $sentinel:expr, $syscall:expr, gpu = $gpu:literal) => {
        HookDescriptor {
            id: HookId::$id,
            name: $name,
            symbol: unsafe { CStr::from_bytes_with_nul_unchecked(concat!($name, "\0").as_bytes()) },
            sentinel: $sentinel,
            syscall: $syscall,
            gpu: $gpu,
        }
    };
}

/// Indexed by `HookId as usize`.
pub const DESCRIPTORS: [HookDescriptor; HookId::COUNT] = [
    descriptor!(Mmap, "mmap", Sentinel::MapFailed, native!(SYS_mmap), gpu = false),
    descriptor!(Munmap, "munmap", Sentinel::MinusOne, native!(SYS_munmap), gpu = false),
    descriptor!(Mremap, "mremap", Sentinel::MapFailed, native!(SYS_mremap), gpu = false),
    descriptor!(Shmat, "shmat", Sentinel::MapFailed, native!(SYS_shmat), gpu = false),
    descriptor!(Shmdt, "shmdt", Sentinel::MinusOne, native!(SYS_shmdt), gpu = false),
    // sbrk is a libc construct on top of brk
    descriptor!(Sbrk, "sbrk", Sentinel::MapFailed, None, gpu = false),
    descriptor!(Brk, "brk", Sentinel::MinusOne, native!(SYS_brk), gpu = false),
    descriptor!(Madvise, "madvise", Sentinel::MinusOne, native!(SYS_madvise), gpu = false),
    descriptor!(CuMemFree, "cuMemFree", Sentinel::Status(CUDA_ERROR_OUT_OF_MEMORY), None, gpu = true),
    descriptor!(CuMemFreeHost, "cuMemFreeHost", Sentinel::Status(CUDA_ERROR_OUT_OF_MEMORY), None, gpu = true),
    descriptor!(CuMemAlloc, "cuMemAlloc", Sentinel::Status(CUDA_ERROR_OUT_OF_MEMORY), None, gpu = true),
    descriptor!(CuMemAllocManaged, "cuMemAllocManaged", Sentinel::Status(CUDA_ERROR_OUT_OF_MEMORY), None, gpu = true),
    descriptor!(CuMemAllocPitch, "cuMemAllocPitch", Sentinel::Status(CUDA_ERROR_OUT_OF_MEMORY), None, gpu = true),
    descriptor!(CuMemHostGetDevicePointer, "cuMemHostGetDevicePointer", Sentinel::Status(CUDA_ERROR_OUT_OF_MEMORY), None, gpu = true),
    descriptor!(CuMemHostRegister, "cuMemHostRegister", Sentinel::Status(CUDA_ERROR_OUT_OF_MEMORY), None, gpu = true),
    descriptor!(CuMemHostUnregister, "cuMemHostUnregister", Sentinel::Status(CUDA_ERROR_OUT_OF_MEMORY), None, gpu = true),
    descriptor!(CudaFree, "cudaFree", Sentinel::Status(CUDA_ERROR_MEMORY_ALLOCATION), None, gpu = true),
    descriptor!(CudaFreeHost, "cudaFreeHost", Sentinel::Status(CUDA_ERROR_MEMORY_ALLOCATION), None, gpu = true),
    descriptor!(CudaMalloc, "cudaMalloc", Sentinel::Status(CUDA_ERROR_MEMORY_ALLOCATION), None, gpu = true),
    descriptor!(CudaMallocManaged, "cudaMallocManaged", Sentinel::Status(CUDA_ERROR_MEMORY_ALLOCATION), None, gpu = true),
    descriptor!(CudaMallocPitch, "cudaMallocPitch", Sentinel::Status(CUDA_ERROR_MEMORY_ALLOCATION), None, gpu = true),
    descriptor!(CudaHostGetDevicePointer, "cudaHostGetDevicePointer", Sentinel::Status(CUDA_ERROR_MEMORY_ALLOCATION), None, gpu = true),
    descriptor!(CudaHostRegister, "cudaHostRegister", Sentinel::Status(CUDA_ERROR_MEMORY_ALLOCATION), None, gpu = true),
    descriptor!(CudaHostUnregister, "cudaHostUnregister", Sentinel::Status(CUDA_ERROR_MEMORY_ALLOCATION), None, gpu = true),
];
