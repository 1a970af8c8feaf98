//! The process-wide hook context and sink installation.

use crate::event::{DispatchGuard, EventSink, MemEvent};
use crate::registry::HookId;
use crate::resolver::{DlsymNext, OrigSlot, SymbolLookup};
use crate::sync::ResolutionGuard;
use memwatch_config::{HooksConfig, LoggingConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("an event sink is already installed")]
    SinkAlreadySet,
}

/// Counters exposed through telemetry.
pub struct HookStats {
    calls: [AtomicU64; HookId::COUNT],
    lookups: AtomicU64,
    fallbacks: AtomicU64,
    notifications: AtomicU64,
}

impl Default for HookStats {
    fn default() -> Self {
        Self::new()
    }
}

impl HookStats {
    pub const fn new() -> Self {
        Self {
            calls: [const { AtomicU64::new(0) }; HookId::COUNT],
            lookups: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub(crate) fn record_call(&self, id: HookId) {
        self.calls[id.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn calls(&self, id: HookId) -> u64 {
        self.calls[id.index()].load(Ordering::Relaxed)
    }

    /// Symbol lookups actually performed (not cache hits).
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Calls that could not use a resolved symbol.
    pub fn fallbacks(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }
}

/// Everything the wrappers share: the resolution guard, one original-pointer
/// slot per hooked function, the sink and the runtime switches.
///
/// The exported wrappers use [`CONTEXT`]. Other instances are independent,
/// which is how tests observe resolution with an instrumented lookup.
pub struct HookContext<L: SymbolLookup = DlsymNext> {
    pub(crate) guard: ResolutionGuard,
    pub(crate) slots: [OrigSlot; HookId::COUNT],
    pub(crate) lookup: L,
    sink: OnceLock<&'static dyn EventSink>,
    events_enabled: AtomicBool,
    gpu_events: AtomicBool,
    prefer_syscall: AtomicBool,
    pub(crate) stats: HookStats,
}

pub static CONTEXT: HookContext<DlsymNext> = HookContext::new(DlsymNext);

impl<L: SymbolLookup> HookContext<L> {
    pub const fn new(lookup: L) -> Self {
        Self {
            guard: ResolutionGuard::new(),
            slots: [const { OrigSlot::new() }; HookId::COUNT],
            lookup,
            sink: OnceLock::new(),
            events_enabled: AtomicBool::new(true),
            gpu_events: AtomicBool::new(true),
            prefer_syscall: AtomicBool::new(true),
            stats: HookStats::new(),
        }
    }

    pub fn configure(&self, hooks: &HooksConfig) {
        self.set_events_enabled(hooks.enable_events);
        self.set_gpu_events(hooks.gpu_events);
        self.set_prefer_syscall(hooks.prefer_raw_syscalls);
    }

    /// Register the sink. Only the first registration takes effect.
    pub fn set_sink(&self, sink: &'static dyn EventSink) -> Result<(), InstallError> {
        self.sink
            .set(sink)
            .map_err(|_| InstallError::SinkAlreadySet)
    }

    pub fn has_sink(&self) -> bool {
        self.sink.get().is_some()
    }

    pub fn set_events_enabled(&self, on: bool) {
        self.events_enabled.store(on, Ordering::Relaxed);
    }

    pub fn events_enabled(&self) -> bool {
        self.events_enabled.load(Ordering::Relaxed)
    }

    pub fn set_gpu_events(&self, on: bool) {
        self.gpu_events.store(on, Ordering::Relaxed);
    }

    pub fn set_prefer_syscall(&self, on: bool) {
        self.prefer_syscall.store(on, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn prefers_syscall(&self) -> bool {
        self.prefer_syscall.load(Ordering::Relaxed)
    }

    pub fn guard(&self) -> &ResolutionGuard {
        &self.guard
    }

    pub fn stats(&self) -> &HookStats {
        &self.stats
    }

    /// Run the genuine call, then report it.
    ///
    /// The sink sees the real result after the call's effect is visible.
    /// The caller sees the errno the genuine call left, whatever the sink
    /// does to it.
    #[inline]
    pub fn intercept<R: Copy>(
        &self,
        id: HookId,
        call: impl FnOnce() -> R,
        describe: impl FnOnce(R) -> MemEvent,
    ) -> R {
        self.stats.record_call(id);
        let result = call();

        if !self.events_enabled.load(Ordering::Relaxed) {
            return result;
        }
        if id.is_gpu() && !self.gpu_events.load(Ordering::Relaxed) {
            return result;
        }
        let Some(sink) = self.sink.get() else {
            return result;
        };
        let Some(_dispatching) = DispatchGuard::enter() else {
            return result;
        };

        let saved = crate::errno();
        sink.notify(&describe(result));
        self.stats.record_notification();
        crate::set_errno(saved);
        result
    }
}

/// Register `sink` with the process-wide context, using the cached
/// configuration from `memwatch-config`.
pub fn install(sink: &'static dyn EventSink) -> Result<(), InstallError> {
    let config = memwatch_config::config();
    install_with(&config.hooks, &config.logging, sink)
}

/// Register `sink` with explicit settings.
pub fn install_with(
    hooks: &HooksConfig,
    logging: &LoggingConfig,
    sink: &'static dyn EventSink,
) -> Result<(), InstallError> {
    if logging.subscriber {
        memwatch_config::logging::init_logging(logging.level());
    }
    crate::log::configure(logging.level(), logging.stderr);
    CONTEXT.configure(hooks);
    memwatch_config::log_hooks_debug!(
        "hook switches applied",
        events = hooks.enable_events,
        gpu_events = hooks.gpu_events,
        level = logging.level().as_filter()
    );

    if let Err(err) = CONTEXT.set_sink(sink) {
        memwatch_config::log_hooks_warn!("event sink rejected", reason = tracing::field::display(&err));
        return Err(err);
    }

    memwatch_config::log_hooks_info!(
        "event sink installed",
        events = hooks.enable_events,
        prefer_raw_syscalls = hooks.prefer_raw_syscalls,
        gpu = cfg!(feature = "gpu"),
        symbol_override = cfg!(feature = "symbol-override")
    );
    #[cfg(feature = "gpu")]
    crate::gpu::announce(hooks.gpu_events);
    Ok(())
}
