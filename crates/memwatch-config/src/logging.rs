//! Structured logging utilities for memwatch components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//! These macros go through `tracing` and may allocate, so they belong on cold
//! paths only (install, configuration). The interception hot path has its own
//! allocation-free logger.
//!
//! # Usage
//!
//! ```ignore
//! use memwatch_config::log_hooks_info;
//!
//! log_hooks_info!("Event sink registered", hooks = 8);
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const HOOKS: &'static str = "HOOKS";
    pub const CONFIG: &'static str = "CONFIG";
    pub const GPU: &'static str = "GPU";
}

/// Log levels for runtime configuration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Off = 5,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            "off" | "none" => LogLevel::Off,
            _ => return None,
        };
        Some(level)
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Off,
        }
    }

    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

// === HOOKS logging macros ===

#[macro_export]
macro_rules! log_hooks_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::HOOKS, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_hooks_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::HOOKS, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_hooks_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::HOOKS, $($key = $value,)* $msg)
    };
}

// === GPU logging macros ===

#[macro_export]
macro_rules! log_gpu_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::GPU, $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
///
/// `RUST_LOG` wins over `level` when set. Returns false if a global
/// subscriber was already installed by the host process.
pub fn init_logging(level: LogLevel) -> bool {
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
