//! JSON counters snapshot, formatted without allocating.

use crate::context::{HookContext, CONTEXT};
use crate::macros::StackWriter;
use crate::registry::HookId;
use crate::resolver::SymbolLookup;
use libc::{c_char, c_int};
use std::fmt::Write;

/// Write a JSON snapshot of `ctx` into `out`.
///
/// Returns `None` if `out` was too small to hold all of it.
pub fn write_snapshot<L: SymbolLookup>(ctx: &HookContext<L>, out: &mut StackWriter<'_>) -> Option<usize> {
    let stats = ctx.stats();
    let pid = unsafe { libc::getpid() };

    let _ = writeln!(out, "{{");
    let _ = writeln!(out, "  \"pid\": {},", pid);
    let _ = writeln!(out, "  \"installed\": {},", ctx.has_sink());
    let _ = writeln!(out, "  \"events_enabled\": {},", ctx.events_enabled());
    let _ = writeln!(out, "  \"prefer_raw_syscalls\": {},", ctx.prefers_syscall());
    let _ = writeln!(out, "  \"symbol_override\": {},", crate::publish::SYMBOL_OVERRIDE);
    let _ = writeln!(out, "  \"lookups\": {},", stats.lookups());
    let _ = writeln!(out, "  \"fallbacks\": {},", stats.fallbacks());
    let _ = writeln!(out, "  \"notifications\": {},", stats.notifications());
    let _ = writeln!(out, "  \"hooks\": {{");
    let mut first = true;
    for id in HookId::enabled() {
        if !first {
            let _ = writeln!(out, ",");
        }
        first = false;
        let _ = write!(
            out,
            "    \"{}\": {{ \"calls\": {}, \"resolved\": {}, \"syscall\": {} }}",
            id.name(),
            stats.calls(id),
            ctx.is_resolved(id),
            id.descriptor().has_syscall()
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "  }}");
    let _ = write!(out, "}}");

    if out.truncated() {
        None
    } else {
        Some(out.len())
    }
}

/// Copy a NUL-terminated JSON snapshot of the process-wide context into
/// `buf`. Returns its length, or -1 if `buf` is null or too small.
#[no_mangle]
pub unsafe extern "C" fn memwatch_get_telemetry(buf: *mut c_char, buf_size: usize) -> c_int {
    if buf.is_null() || buf_size == 0 {
        return -1;
    }

    let mut scratch = [0u8; 4096];
    let mut writer = StackWriter::new(&mut scratch);
    let Some(len) = write_snapshot(&CONTEXT, &mut writer) else {
        return -1;
    };
    if len >= buf_size {
        return -1;
    }

    std::ptr::copy_nonoverlapping(writer.as_str().as_ptr(), buf as *mut u8, len);
    *buf.add(len) = 0;
    len as c_int
}
