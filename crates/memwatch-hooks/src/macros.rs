/// Format into a stack buffer and hand the line to the in-process logger.
/// Never allocates, so it is usable inside wrappers and while resolving.
#[macro_export]
macro_rules! hook_log_at_level {
    ($level:expr, $tag:expr, $($arg:tt)*) => {
        {
            if $crate::log::enabled($level) {
                use std::fmt::Write;
                let mut buf = [0u8; 512];
                let mut writer = $crate::macros::StackWriter::new(&mut buf);
                let pid = unsafe { libc::getpid() };
                let _ = write!(writer, "[memwatch][{}][{}] ", pid, $tag);
                let _ = write!(writer, $($arg)*);
                let _ = writeln!(writer);
                $crate::log::emit(writer.as_str());
            }
        }
    };
}

#[macro_export]
macro_rules! hook_trace { ($($arg:tt)*) => { $crate::hook_log_at_level!($crate::log::LogLevel::Trace, "TRACE", $($arg)*) }; }
#[macro_export]
macro_rules! hook_debug { ($($arg:tt)*) => { $crate::hook_log_at_level!($crate::log::LogLevel::Debug, "DEBUG", $($arg)*) }; }
#[macro_export]
macro_rules! hook_info { ($($arg:tt)*) => { $crate::hook_log_at_level!($crate::log::LogLevel::Info, "INFO", $($arg)*) }; }
#[macro_export]
macro_rules! hook_warn { ($($arg:tt)*) => { $crate::hook_log_at_level!($crate::log::LogLevel::Warn, "WARN", $($arg)*) }; }
#[macro_export]
macro_rules! hook_error { ($($arg:tt)*) => { $crate::hook_log_at_level!($crate::log::LogLevel::Error, "ERROR", $($arg)*) }; }

/// Generates the per-function plumbing for a hooked C function.
///
/// For each entry this expands to a module `$public` holding:
/// - `original(ctx, ..)`: reach the genuine implementation the way `ctx`
///   decides (raw syscall, resolved symbol, or sentinel + `ENOMEM`)
/// - `intercept(ctx, ..)`: call `original`, notify, keep errno intact
/// - `PATCH`: the `(symbol, wrapper)` pair for relocation patching
///
/// plus the exported `$orig` / `$wrapper` entry points bound to
/// [`CONTEXT`](crate::context::CONTEXT), and, with `symbol-override`,
/// `$public` itself.
///
/// `real` is the C type used to call a resolved symbol. It may be
/// variadic where the libc prototype is.
#[macro_export]
macro_rules! define_hooks {
    ($(
        $(#[$meta:meta])*
        $public:ident: $id:ident => $orig:ident, $wrapper:ident;
        fn($($arg:ident: $ty:ty),* $(,)?) -> $ret:ty;
        real: $real:ty;
        event: |$res:ident| $event:expr;
    )*) => {
        $(
            $(#[$meta])*
            #[allow(non_snake_case)]
            pub mod $public {
                use super::*;

                pub const ID: $crate::registry::HookId = $crate::registry::HookId::$id;

                pub type Real = $real;

                pub const PATCH: $crate::publish::Patch = $crate::publish::Patch::new(
                    ID,
                    super::$wrapper as *const libc::c_void,
                );

                #[inline]
                pub unsafe fn original<L: $crate::resolver::SymbolLookup>(
                    ctx: &$crate::context::HookContext<L>,
                    $($arg: $ty),*
                ) -> $ret {
                    match ctx.original(ID) {
                        $crate::resolver::Original::Symbol(sym) => {
                            let real = std::mem::transmute::<*mut libc::c_void, Real>(sym.as_ptr());
                            real($($arg),*)
                        }
                        $crate::resolver::Original::Syscall(nr) => {
                            let ret = $crate::syscall::invoke(nr, &[$($arg as usize),*]);
                            <$ret as $crate::syscall::SyscallReturn>::from_raw(ret)
                        }
                        $crate::resolver::Original::Unavailable(_) => {
                            $crate::set_errno(libc::ENOMEM);
                            <$ret as $crate::registry::HookReturn>::from_sentinel(
                                ID.descriptor().sentinel,
                            )
                        }
                    }
                }

                pub unsafe fn intercept<L: $crate::resolver::SymbolLookup>(
                    ctx: &$crate::context::HookContext<L>,
                    $($arg: $ty),*
                ) -> $ret {
                    ctx.intercept(
                        ID,
                        || original(ctx, $($arg),*),
                        |$res: $ret| $event,
                    )
                }
            }

            #[no_mangle]
            #[allow(non_snake_case)]
            pub unsafe extern "C" fn $orig($($arg: $ty),*) -> $ret {
                $public::original(&$crate::context::CONTEXT, $($arg),*)
            }

            #[no_mangle]
            #[allow(non_snake_case)]
            pub unsafe extern "C" fn $wrapper($($arg: $ty),*) -> $ret {
                $public::intercept(&$crate::context::CONTEXT, $($arg),*)
            }

            #[cfg(feature = "symbol-override")]
            #[no_mangle]
            #[allow(non_snake_case)]
            pub unsafe extern "C" fn $public($($arg: $ty),*) -> $ret {
                $wrapper($($arg),*)
            }
        )*
    };
}

/// `fmt::Write` over a caller-provided byte buffer. Output past the end is
/// dropped (on a char boundary) and remembered in `truncated()`.
pub struct StackWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    truncated: bool,
}

impl<'a> StackWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            truncated: false,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf[..self.pos]).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl<'a> std::fmt::Write for StackWriter<'a> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        let remaining = self.buf.len() - self.pos;
        let mut to_copy = std::cmp::min(s.len(), remaining);
        if to_copy < s.len() {
            self.truncated = true;
            while !s.is_char_boundary(to_copy) {
                to_copy -= 1;
            }
        }
        self.buf[self.pos..self.pos + to_copy].copy_from_slice(&s.as_bytes()[..to_copy]);
        self.pos += to_copy;
        Ok(())
    }
}
