//! Test environment abstraction for isolated config testing.
//!
//! Provides `ConfigFixture` to manage:
//! - A throwaway global config directory
//! - A throwaway project directory with its own `.memwatch/`
//!
//! # Usage
//!
//! ```ignore
//! use memwatch_config::testing::ConfigFixture;
//!
//! let fixture = ConfigFixture::new()?;
//! fixture.write_global("[hooks]\nenable_events = false\n")?;
//! let config = fixture.load_with_env(&[("MEMWATCH_LOG_LEVEL", "debug")])?;
//! ```

use crate::Config;
use std::path::PathBuf;
use tempfile::TempDir;

/// Isolated config locations backed by a temporary directory
pub struct ConfigFixture {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Stand-in for `~/.memwatch/config.toml`
    pub global_path: PathBuf,
    /// Stand-in for `<project>/.memwatch/config.toml`
    pub project_path: PathBuf,
}

impl ConfigFixture {
    /// Create a new isolated fixture. No config files exist yet.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let global_dir = root.join("home").join(".memwatch");
        let project_dir = root.join("project").join(".memwatch");
        std::fs::create_dir_all(&global_dir)?;
        std::fs::create_dir_all(&project_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            global_path: global_dir.join("config.toml"),
            project_path: project_dir.join("config.toml"),
        })
    }

    pub fn write_global(&self, contents: &str) -> anyhow::Result<()> {
        std::fs::write(&self.global_path, contents)?;
        Ok(())
    }

    pub fn write_project(&self, contents: &str) -> anyhow::Result<()> {
        std::fs::write(&self.project_path, contents)?;
        Ok(())
    }

    /// Load the global and project files. The process environment is not
    /// read, so results do not depend on the caller's `MEMWATCH_*` settings.
    pub fn load(&self) -> anyhow::Result<Config> {
        Ok(Config::load_from(
            Some(&self.global_path),
            Some(&self.project_path),
        )?)
    }

    /// Load the files, then apply `vars` as the environment layer.
    pub fn load_with_env(&self, vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let mut config = self.load()?;
        config.apply_env_overrides_with(|name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        });
        Ok(config)
    }
}
