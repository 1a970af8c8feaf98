//! In-process logger for the interception hot path.
//!
//! Lines are appended to a fixed 64 KiB ring with a single atomic
//! `fetch_add`; nothing allocates and nothing takes a lock, so it is safe to
//! log from inside `dlsym` or the allocator. With debug mirroring on, each
//! line is also written to stderr with `write(2)`.

use libc::{c_int, c_void};
use std::cell::UnsafeCell;
use std::ffi::CStr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

pub use memwatch_config::LogLevel;

pub static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
pub(crate) static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

#[inline(always)]
pub fn enabled(level: LogLevel) -> bool {
    LOG_LEVEL.load(Ordering::Relaxed) <= level as u8
}

pub fn level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Apply settings coming from the config crate.
pub fn configure(level: LogLevel, stderr: bool) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    DEBUG_ENABLED.store(stderr, Ordering::Relaxed);
}

/// Prime level and stderr mirroring from `MEMWATCH_LOG_LEVEL` and
/// `MEMWATCH_DEBUG` without allocating. Runs from the load-time constructor,
/// before any config file can be read.
pub unsafe fn init_from_env() {
    let debug_ptr = libc::getenv(c"MEMWATCH_DEBUG".as_ptr());
    if !debug_ptr.is_null() {
        DEBUG_ENABLED.store(true, Ordering::Relaxed);
    }

    let level_ptr = libc::getenv(c"MEMWATCH_LOG_LEVEL".as_ptr());
    if !level_ptr.is_null() {
        let level_bytes = CStr::from_ptr(level_ptr).to_bytes();
        if let Some(level) = parse_level(level_bytes) {
            LOG_LEVEL.store(level as u8, Ordering::Relaxed);
        }
    }
}

fn parse_level(bytes: &[u8]) -> Option<LogLevel> {
    let level = if bytes.eq_ignore_ascii_case(b"trace") {
        LogLevel::Trace
    } else if bytes.eq_ignore_ascii_case(b"debug") {
        LogLevel::Debug
    } else if bytes.eq_ignore_ascii_case(b"info") {
        LogLevel::Info
    } else if bytes.eq_ignore_ascii_case(b"warn") {
        LogLevel::Warn
    } else if bytes.eq_ignore_ascii_case(b"error") {
        LogLevel::Error
    } else if bytes.eq_ignore_ascii_case(b"off") {
        LogLevel::Off
    } else {
        return None;
    };
    Some(level)
}

pub(crate) fn emit(msg: &str) {
    LOGGER.log(msg);
    if DEBUG_ENABLED.load(Ordering::Relaxed) {
        unsafe {
            libc::write(2, msg.as_ptr() as *const c_void, msg.len());
        }
    }
}

pub(crate) const LOG_BUF_SIZE: usize = 64 * 1024;

pub struct Logger {
    buffer: UnsafeCell<[u8; LOG_BUF_SIZE]>,
    head: AtomicUsize,
}

// Writers claim disjoint byte ranges through `head`; torn lines are possible
// only once the ring wraps onto a line still being written.
unsafe impl Sync for Logger {}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    pub const fn new() -> Self {
        Self {
            buffer: UnsafeCell::new([0u8; LOG_BUF_SIZE]),
            head: AtomicUsize::new(0),
        }
    }

    pub fn log(&self, msg: &str) {
        let bytes = msg.as_bytes();
        if bytes.len() > LOG_BUF_SIZE {
            return;
        }

        let start = self.head.fetch_add(bytes.len(), Ordering::SeqCst);
        let base = self.buffer.get() as *mut u8;
        for (i, b) in bytes.iter().enumerate() {
            unsafe {
                *base.add((start + i) % LOG_BUF_SIZE) = *b;
            }
        }
    }

    /// Total bytes ever logged (not capped at the ring size).
    pub fn written(&self) -> usize {
        self.head.load(Ordering::SeqCst)
    }

    /// Copy the most recent bytes, oldest first, into `out`.
    pub fn copy_recent(&self, out: &mut [u8]) -> usize {
        let head = self.head.load(Ordering::SeqCst);
        let available = head.min(LOG_BUF_SIZE);
        let n = available.min(out.len());
        let base = self.buffer.get() as *const u8;
        for (i, slot) in out.iter_mut().take(n).enumerate() {
            unsafe {
                *slot = *base.add((head - n + i) % LOG_BUF_SIZE);
            }
        }
        n
    }

    /// Write the retained ring contents to `fd`, oldest first.
    pub fn dump(&self, fd: c_int) {
        let head = self.head.load(Ordering::SeqCst);
        let size = head.min(LOG_BUF_SIZE);
        let base = self.buffer.get() as *const u8;
        let start = (head - size) % LOG_BUF_SIZE;
        unsafe {
            if start + size <= LOG_BUF_SIZE {
                libc::write(fd, base.add(start) as *const c_void, size);
            } else {
                let first = LOG_BUF_SIZE - start;
                libc::write(fd, base.add(start) as *const c_void, first);
                libc::write(fd, base as *const c_void, size - first);
            }
        }
    }
}

pub static LOGGER: Logger = Logger::new();

/// Write the in-process log ring to `fd`.
#[no_mangle]
pub extern "C" fn memwatch_dump_log(fd: c_int) {
    LOGGER.dump(fd);
}

/// Load-time constructor: prime logging from the environment.
#[cfg(target_os = "linux")]
#[link_section = ".init_array"]
#[used]
pub static INIT_LOGGING_LINUX: unsafe extern "C" fn() = {
    unsafe extern "C" fn init() {
        init_from_env();
        hook_info!("loaded, log level {}", level().as_filter());
    }
    init
};
