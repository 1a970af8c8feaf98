//! Raw syscall invoker.
//!
//! Issues the operation straight to the kernel, bypassing libc and the
//! dynamic linker, so it can never land back in one of our wrappers.
//! x86_64 and AArch64 use inline assembly; other Linux targets go through
//! `libc::syscall`. Nothing here notifies observers.

use libc::{c_int, c_long, c_void};

/// Kernel return values in this range are `-errno`.
const MAX_ERRNO: isize = 4095;

/// Invoke syscall `nr` with up to six register-sized arguments.
/// Returns the raw kernel result (`-errno` on failure).
#[inline(always)]
pub unsafe fn invoke(nr: c_long, args: &[usize]) -> isize {
    let mut a = [0usize; 6];
    let n = args.len().min(6);
    a[..n].copy_from_slice(&args[..n]);
    syscall6(nr, a[0], a[1], a[2], a[3], a[4], a[5])
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
#[inline(always)]
pub unsafe fn syscall6(
    nr: c_long,
    a0: usize,
    a1: usize,
    a2: usize,
    a3: usize,
    a4: usize,
    a5: usize,
) -> isize {
    let ret: isize;
    std::arch::asm!(
        "syscall",
        inlateout("rax") nr as isize => ret,
        in("rdi") a0,
        in("rsi") a1,
        in("rdx") a2,
        in("r10") a3,
        in("r8") a4,
        in("r9") a5,
        lateout("rcx") _,
        lateout("r11") _,
        options(nostack),
    );
    ret
}

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
#[inline(always)]
pub unsafe fn syscall6(
    nr: c_long,
    a0: usize,
    a1: usize,
    a2: usize,
    a3: usize,
    a4: usize,
    a5: usize,
) -> isize {
    let ret: isize;
    std::arch::asm!(
        "svc #0",
        in("x8") nr,
        inlateout("x0") a0 as isize => ret,
        in("x1") a1,
        in("x2") a2,
        in("x3") a3,
        in("x4") a4,
        in("x5") a5,
        options(nostack),
    );
    ret
}

#[cfg(all(
    target_os = "linux",
    not(any(target_arch = "x86_64", target_arch = "aarch64"))
))]
#[inline(always)]
pub unsafe fn syscall6(
    nr: c_long,
    a0: usize,
    a1: usize,
    a2: usize,
    a3: usize,
    a4: usize,
    a5: usize,
) -> isize {
    let ret = libc::syscall(nr, a0, a1, a2, a3, a4, a5);
    if ret == -1 {
        -(crate::errno() as isize)
    } else {
        ret as isize
    }
}

#[cfg(not(target_os = "linux"))]
#[inline(always)]
pub unsafe fn syscall6(
    _nr: c_long,
    _a0: usize,
    _a1: usize,
    _a2: usize,
    _a3: usize,
    _a4: usize,
    _a5: usize,
) -> isize {
    -(libc::ENOSYS as isize)
}

/// Split a raw kernel result into a value or an errno.
#[inline(always)]
pub fn decode(ret: isize) -> Result<usize, c_int> {
    if (-MAX_ERRNO..0).contains(&ret) {
        Err(-ret as c_int)
    } else {
        Ok(ret as usize)
    }
}

/// Map a raw kernel result onto a libc-style return value, setting errno
/// on failure the way the libc wrapper would.
pub trait SyscallReturn: Copy {
    fn from_raw(ret: isize) -> Self;
}

impl SyscallReturn for *mut c_void {
    #[inline(always)]
    fn from_raw(ret: isize) -> Self {
        match decode(ret) {
            Ok(v) => v as *mut c_void,
            Err(e) => {
                crate::set_errno(e);
                libc::MAP_FAILED
            }
        }
    }
}

impl SyscallReturn for c_int {
    #[inline(always)]
    fn from_raw(ret: isize) -> Self {
        match decode(ret) {
            Ok(v) => v as c_int,
            Err(e) => {
                crate::set_errno(e);
                -1
            }
        }
    }
}

/// `brk(2)` as the kernel defines it: returns the new break on success and
/// the unchanged current break on failure. Never sets errno.
#[inline(always)]
pub unsafe fn brk(nr: c_long, addr: *mut c_void) -> *mut c_void {
    invoke(nr, &[addr as usize]) as *mut c_void
}
