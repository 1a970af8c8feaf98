//! CUDA driver and runtime allocation hooks.
//!
//! GPU entry points have no call number, so the genuine implementation is
//! always the next definition found by the lookup. When it cannot be found
//! (no CUDA library loaded, or resolution re-entered) the wrapper returns
//! the API's out-of-memory status and sets `ENOMEM`.

use crate::event::{GpuOp, MemEvent};
use crate::publish::Patch;
use crate::registry::HookId;
use libc::{c_int, c_uint, c_void, size_t};

#[allow(non_camel_case_types)]
pub type CUresult = c_int;
#[allow(non_camel_case_types)]
pub type CUdeviceptr = u64;
#[allow(non_camel_case_types)]
pub type cudaError_t = c_int;

/// Read an out-parameter the API filled in, or 0 if the call failed.
unsafe fn out<T: Copy + Default>(status: c_int, p: *const T) -> T {
    if status != 0 || p.is_null() {
        T::default()
    } else {
        *p
    }
}

unsafe fn out_ptr(status: c_int, p: *const *mut c_void) -> u64 {
    if status != 0 || p.is_null() {
        0
    } else {
        *p as u64
    }
}

fn gpu(hook: HookId, op: GpuOp, address: u64, length: usize, result: c_int) -> MemEvent {
    MemEvent::Gpu {
        hook,
        op,
        address,
        length,
        result,
    }
}

define_hooks! {
    cuMemFree: CuMemFree => memwatch_orig_cuMemFree, memwatch_override_cuMemFree;
    fn(dptr: CUdeviceptr) -> CUresult;
    real: unsafe extern "C" fn(CUdeviceptr) -> CUresult;
    event: |res| gpu(HookId::CuMemFree, GpuOp::Free, dptr, 0, res);

    cuMemFreeHost: CuMemFreeHost => memwatch_orig_cuMemFreeHost, memwatch_override_cuMemFreeHost;
    fn(p: *mut c_void) -> CUresult;
    real: unsafe extern "C" fn(*mut c_void) -> CUresult;
    event: |res| gpu(HookId::CuMemFreeHost, GpuOp::Free, p as u64, 0, res);

    cuMemAlloc: CuMemAlloc => memwatch_orig_cuMemAlloc, memwatch_override_cuMemAlloc;
    fn(dptr: *mut CUdeviceptr, bytesize: size_t) -> CUresult;
    real: unsafe extern "C" fn(*mut CUdeviceptr, size_t) -> CUresult;
    event: |res| gpu(HookId::CuMemAlloc, GpuOp::Alloc, out(res, dptr), bytesize, res);

    cuMemAllocManaged: CuMemAllocManaged => memwatch_orig_cuMemAllocManaged, memwatch_override_cuMemAllocManaged;
    fn(dptr: *mut CUdeviceptr, bytesize: size_t, flags: c_uint) -> CUresult;
    real: unsafe extern "C" fn(*mut CUdeviceptr, size_t, c_uint) -> CUresult;
    event: |res| gpu(HookId::CuMemAllocManaged, GpuOp::Alloc, out(res, dptr), bytesize, res);

    /// The allocation spans `*pitch * height` bytes.
    cuMemAllocPitch: CuMemAllocPitch => memwatch_orig_cuMemAllocPitch, memwatch_override_cuMemAllocPitch;
    fn(dptr: *mut CUdeviceptr, pitch: *mut size_t, width_in_bytes: size_t, height: size_t, element_size_bytes: c_uint) -> CUresult;
    real: unsafe extern "C" fn(*mut CUdeviceptr, *mut size_t, size_t, size_t, c_uint) -> CUresult;
    event: |res| gpu(
        HookId::CuMemAllocPitch,
        GpuOp::Alloc,
        out(res, dptr),
        out(res, pitch).saturating_mul(height),
        res,
    );

    cuMemHostGetDevicePointer: CuMemHostGetDevicePointer => memwatch_orig_cuMemHostGetDevicePointer, memwatch_override_cuMemHostGetDevicePointer;
    fn(pdptr: *mut CUdeviceptr, p: *mut c_void, flags: c_uint) -> CUresult;
    real: unsafe extern "C" fn(*mut CUdeviceptr, *mut c_void, c_uint) -> CUresult;
    event: |res| gpu(HookId::CuMemHostGetDevicePointer, GpuOp::DevicePointer, out(res, pdptr), 0, res);

    cuMemHostRegister: CuMemHostRegister => memwatch_orig_cuMemHostRegister, memwatch_override_cuMemHostRegister;
    fn(p: *mut c_void, bytesize: size_t, flags: c_uint) -> CUresult;
    real: unsafe extern "C" fn(*mut c_void, size_t, c_uint) -> CUresult;
    event: |res| gpu(HookId::CuMemHostRegister, GpuOp::HostRegister, p as u64, bytesize, res);

    cuMemHostUnregister: CuMemHostUnregister => memwatch_orig_cuMemHostUnregister, memwatch_override_cuMemHostUnregister;
    fn(p: *mut c_void) -> CUresult;
    real: unsafe extern "C" fn(*mut c_void) -> CUresult;
    event: |res| gpu(HookId::CuMemHostUnregister, GpuOp::HostUnregister, p as u64, 0, res);

    cudaFree: CudaFree => memwatch_orig_cudaFree, memwatch_override_cudaFree;
    fn(dev_ptr: *mut c_void) -> cudaError_t;
    real: unsafe extern "C" fn(*mut c_void) -> cudaError_t;
    event: |res| gpu(HookId::CudaFree, GpuOp::Free, dev_ptr as u64, 0, res);

    cudaFreeHost: CudaFreeHost => memwatch_orig_cudaFreeHost, memwatch_override_cudaFreeHost;
    fn(ptr: *mut c_void) -> cudaError_t;
    real: unsafe extern "C" fn(*mut c_void) -> cudaError_t;
    event: |res| gpu(HookId::CudaFreeHost, GpuOp::Free, ptr as u64, 0, res);

    cudaMalloc: CudaMalloc => memwatch_orig_cudaMalloc, memwatch_override_cudaMalloc;
    fn(dev_ptr: *mut *mut c_void, size: size_t) -> cudaError_t;
    real: unsafe extern "C" fn(*mut *mut c_void, size_t) -> cudaError_t;
    event: |res| gpu(HookId::CudaMalloc, GpuOp::Alloc, out_ptr(res, dev_ptr), size, res);

    cudaMallocManaged: CudaMallocManaged => memwatch_orig_cudaMallocManaged, memwatch_override_cudaMallocManaged;
    fn(dev_ptr: *mut *mut c_void, size: size_t, flags: c_uint) -> cudaError_t;
    real: unsafe extern "C" fn(*mut *mut c_void, size_t, c_uint) -> cudaError_t;
    event: |res| gpu(HookId::CudaMallocManaged, GpuOp::Alloc, out_ptr(res, dev_ptr), size, res);

    cudaMallocPitch: CudaMallocPitch => memwatch_orig_cudaMallocPitch, memwatch_override_cudaMallocPitch;
    fn(dev_ptr: *mut *mut c_void, pitch: *mut size_t, width: size_t, height: size_t) -> cudaError_t;
    real: unsafe extern "C" fn(*mut *mut c_void, *mut size_t, size_t, size_t) -> cudaError_t;
    event: |res| gpu(
        HookId::CudaMallocPitch,
        GpuOp::Alloc,
        out_ptr(res, dev_ptr),
        out(res, pitch).saturating_mul(height),
        res,
    );

    cudaHostGetDevicePointer: CudaHostGetDevicePointer => memwatch_orig_cudaHostGetDevicePointer, memwatch_override_cudaHostGetDevicePointer;
    fn(p_device: *mut *mut c_void, p_host: *mut c_void, flags: c_uint) -> cudaError_t;
    real: unsafe extern "C" fn(*mut *mut c_void, *mut c_void, c_uint) -> cudaError_t;
    event: |res| gpu(HookId::CudaHostGetDevicePointer, GpuOp::DevicePointer, out_ptr(res, p_device), 0, res);

    cudaHostRegister: CudaHostRegister => memwatch_orig_cudaHostRegister, memwatch_override_cudaHostRegister;
    fn(ptr: *mut c_void, size: size_t, flags: c_uint) -> cudaError_t;
    real: unsafe extern "C" fn(*mut c_void, size_t, c_uint) -> cudaError_t;
    event: |res| gpu(HookId::CudaHostRegister, GpuOp::HostRegister, ptr as u64, size, res);

    cudaHostUnregister: CudaHostUnregister => memwatch_orig_cudaHostUnregister, memwatch_override_cudaHostUnregister;
    fn(ptr: *mut c_void) -> cudaError_t;
    real: unsafe extern "C" fn(*mut c_void) -> cudaError_t;
    event: |res| gpu(HookId::CudaHostUnregister, GpuOp::HostUnregister, ptr as u64, 0, res);
}

pub const GPU_PATCHES: [Patch; 16] = [
    cuMemFree::PATCH,
    cuMemFreeHost::PATCH,
    cuMemAlloc::PATCH,
    cuMemAllocManaged::PATCH,
    cuMemAllocPitch::PATCH,
    cuMemHostGetDevicePointer::PATCH,
    cuMemHostRegister::PATCH,
    cuMemHostUnregister::PATCH,
    cudaFree::PATCH,
    cudaFreeHost::PATCH,
    cudaMalloc::PATCH,
    cudaMallocManaged::PATCH,
    cudaMallocPitch::PATCH,
    cudaHostGetDevicePointer::PATCH,
    cudaHostRegister::PATCH,
    cudaHostUnregister::PATCH,
];

/// Report the GPU hook set at install time.
pub(crate) fn announce(gpu_events: bool) {
    memwatch_config::log_gpu_info!(
        "CUDA allocation hooks compiled in",
        hooks = GPU_PATCHES.len(),
        events = gpu_events
    );
}
