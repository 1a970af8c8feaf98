//! # memwatch-config
//!
//! Configuration management for the memwatch interception layer.
//!
//! Loads configuration from:
//! 1. `~/.memwatch/config.toml` (global)
//! 2. `.memwatch/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

pub use logging::LogLevel;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    // A poisoned lock still holds a fully written Config.
    CONFIG.read().unwrap_or_else(|e| e.into_inner())
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(|e| e.into_inner()) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hooks: HooksConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from standard locations, then the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let mut config =
            Self::load_from(global.as_deref(), Some(Path::new(".memwatch/config.toml")))?;
        config.apply_env_overrides_with(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load config from explicit global and project paths. Missing files are
    /// skipped. The environment is not consulted.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = global {
            if global_path.exists() {
                debug!(component = logging::Component::CONFIG, path = ?global_path, "loading global config");
                let contents = std::fs::read_to_string(global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        if let Some(project_path) = project {
            if project_path.exists() {
                debug!(component = logging::Component::CONFIG, path = ?project_path, "loading project config");
                let contents = std::fs::read_to_string(project_path)?;
                let project_config: PartialConfig = toml::from_str(&contents)?;
                config.merge(project_config);
            }
        }

        Ok(config)
    }

    /// Global config path: ~/.memwatch/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".memwatch/config.toml"))
    }

    /// Merge a project config over this one. Only keys the project file
    /// actually sets replace the global values.
    fn merge(&mut self, other: PartialConfig) {
        if let Some(hooks) = other.hooks {
            if let Some(v) = hooks.enable_events {
                self.hooks.enable_events = v;
            }
            if let Some(v) = hooks.prefer_raw_syscalls {
                self.hooks.prefer_raw_syscalls = v;
            }
            if let Some(v) = hooks.gpu_events {
                self.hooks.gpu_events = v;
            }
        }
        if let Some(logging) = other.logging {
            if let Some(v) = logging.level {
                self.logging.level = v;
            }
            if let Some(v) = logging.stderr {
                self.logging.stderr = v;
            }
            if let Some(v) = logging.subscriber {
                self.logging.subscriber = v;
            }
        }
    }

    /// Apply `MEMWATCH_*` overrides, reading variables through `lookup`.
    ///
    /// Values that do not parse as a flag or a level are ignored.
    pub fn apply_env_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str| lookup(name).as_deref().and_then(parse_flag);

        if let Some(v) = flag("MEMWATCH_ENABLE_EVENTS") {
            self.hooks.enable_events = v;
        }
        if let Some(v) = flag("MEMWATCH_PREFER_SYSCALLS") {
            self.hooks.prefer_raw_syscalls = v;
        }
        if let Some(v) = flag("MEMWATCH_GPU_EVENTS") {
            self.hooks.gpu_events = v;
        }
        if let Some(level) = lookup("MEMWATCH_LOG_LEVEL") {
            if LogLevel::parse(&level).is_some() {
                self.logging.level = level;
            }
        }
        if lookup("MEMWATCH_DEBUG").is_some() {
            self.logging.stderr = true;
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Interpret `1/true/yes/on` and `0/false/no/off`, ignoring case.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "y" => Some(true),
        "0" | "false" | "no" | "off" | "n" => Some(false),
        _ => None,
    }
}

/// Interception behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    /// Dispatch notifications to the registered event sink
    pub enable_events: bool,
    /// Forward straight to the raw syscall when the function has one
    pub prefer_raw_syscalls: bool,
    /// Dispatch notifications for GPU allocation hooks
    pub gpu_events: bool,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            enable_events: true,
            prefer_raw_syscalls: true,
            gpu_events: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error or off
    pub level: String,
    /// Mirror the in-process log ring to stderr
    pub stderr: bool,
    /// Install a tracing-subscriber fmt subscriber at install time
    pub subscriber: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            stderr: false,
            subscriber: false,
        }
    }
}

impl LoggingConfig {
    /// Parsed level, falling back to `Info` for unknown strings.
    pub fn level(&self) -> LogLevel {
        LogLevel::parse(&self.level).unwrap_or(LogLevel::Info)
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    hooks: Option<PartialHooks>,
    logging: Option<PartialLogging>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialHooks {
    enable_events: Option<bool>,
    prefer_raw_syscalls: Option<bool>,
    gpu_events: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialLogging {
    level: Option<String>,
    stderr: Option<bool>,
    subscriber: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.hooks.enable_events);
        assert!(config.hooks.prefer_raw_syscalls);
        assert_eq!(config.logging.level(), LogLevel::Info);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[hooks]"));
        assert!(toml_str.contains("[logging]"));
        assert!(toml_str.contains("prefer_raw_syscalls = true"));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag(" Yes "), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_merge_only_touches_set_keys() {
        let mut config = Config::default();
        config.logging.level = "debug".to_string();
        let project: PartialConfig = toml::from_str("[hooks]\nenable_events = false\n").unwrap();
        config.merge(project);
        assert!(!config.hooks.enable_events);
        assert!(config.hooks.prefer_raw_syscalls);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_env_overrides_ignore_unparseable_values() {
        let mut config = Config::default();
        config.apply_env_overrides_with(|name| match name {
            "MEMWATCH_ENABLE_EVENTS" => Some("maybe".to_string()),
            "MEMWATCH_LOG_LEVEL" => Some("chatty".to_string()),
            "MEMWATCH_GPU_EVENTS" => Some("off".to_string()),
            _ => None,
        });
        assert!(config.hooks.enable_events);
        assert_eq!(config.logging.level, "info");
        assert!(!config.hooks.gpu_events);
        assert!(!config.logging.stderr);
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        let logging = LoggingConfig {
            level: "chatty".to_string(),
            ..Default::default()
        };
        assert_eq!(logging.level(), LogLevel::Info);
    }
}
