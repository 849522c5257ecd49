//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};
use crate::configurations::DebugConfiguration;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Debugger binary settings
    #[serde(default)]
    pub debugger: DebuggerConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Output capture settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Limits on user-managed data
    #[serde(default)]
    pub limits: Limits,

    /// Stored launch profiles
    #[serde(default)]
    pub configurations: Vec<DebugConfiguration>,
}

/// How to start the MI debugger
#[derive(Debug, Deserialize, Clone)]
pub struct DebuggerConfig {
    /// Path to the debugger executable, or a name looked up in PATH
    #[serde(default = "default_debugger_path")]
    pub path: PathBuf,

    /// Arguments passed to the debugger; must select the MI interpreter
    #[serde(default = "default_debugger_args")]
    pub args: Vec<String>,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            path: default_debugger_path(),
            args: default_debugger_args(),
        }
    }
}

fn default_debugger_path() -> PathBuf {
    PathBuf::from("gdb")
}

fn default_debugger_args() -> Vec<String> {
    vec![
        "--interpreter=mi2".to_string(),
        "--nx".to_string(),
        "-q".to_string(),
    ]
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Time a command may stay unanswered before the watchdog asks what to do
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,

    /// Default timeout when waiting for the program to stop
    #[serde(default = "default_wait_stop")]
    pub wait_stop_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command_secs: default_command_secs(),
            wait_stop_secs: default_wait_stop(),
        }
    }
}

fn default_command_secs() -> u64 {
    40
}
fn default_wait_stop() -> u64 {
    300
}

/// Output capture configuration
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Maximum number of captured output lines kept per session (0 = unlimited)
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,

    /// Maximum characters shown for a variable value (0 = unlimited)
    #[serde(default)]
    pub value_char_limit: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
            value_char_limit: 0,
        }
    }
}

fn default_max_lines() -> usize {
    10_000
}

/// Limits on user-managed data
#[derive(Debug, Deserialize)]
pub struct Limits {
    /// Maximum number of stored debug configurations
    #[serde(default = "default_max_configurations")]
    pub max_configurations: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_configurations: default_max_configurations(),
        }
    }
}

fn default_max_configurations() -> usize {
    15
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Resolve the debugger executable for a launch profile
    ///
    /// A per-configuration override wins over the global setting. Bare names
    /// are searched in PATH; a missing binary is a launch failure.
    pub fn resolve_debugger(&self, profile: Option<&DebugConfiguration>) -> Result<PathBuf> {
        let path = profile
            .and_then(|p| p.debugger_path.clone())
            .unwrap_or_else(|| self.debugger.path.clone());

        if path.components().count() > 1 || path.is_absolute() {
            if path.exists() {
                Ok(path)
            } else {
                Err(Error::launch_failure(&path, "file does not exist"))
            }
        } else {
            which::which(&path).map_err(|e| Error::launch_failure(&path, e))
        }
    }

    /// Command timeout for a launch profile
    pub fn command_timeout(&self, profile: Option<&DebugConfiguration>) -> Duration {
        let secs = profile
            .and_then(|p| p.command_timeout_secs)
            .unwrap_or(self.timeouts.command_secs);
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.debugger.path, PathBuf::from("gdb"));
        assert!(config.debugger.args.contains(&"--interpreter=mi2".to_string()));
        assert_eq!(config.timeouts.command_secs, 40);
        assert_eq!(config.output.max_lines, 10_000);
        assert_eq!(config.limits.max_configurations, 15);
        assert!(config.configurations.is_empty());
    }

    #[test]
    fn test_profile_overrides() {
        let config = Config::from_toml(
            r#"
[timeouts]
command_secs = 60

[[configurations]]
name = "model"
program = "/tmp/Model"
args = ["-lv=LOG_STATS"]
command_timeout_secs = 5
"#,
        )
        .unwrap();
        let profile = &config.configurations[0];
        assert_eq!(config.command_timeout(None), Duration::from_secs(60));
        assert_eq!(config.command_timeout(Some(profile)), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_debugger_is_launch_failure() {
        let config = Config::from_toml(
            r#"
[debugger]
path = "/nonexistent/dir/gdb"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.resolve_debugger(None),
            Err(Error::LaunchFailure { .. })
        ));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::from_toml("[timeouts]\ncommand_secs = \"soon\""),
            Err(Error::ConfigParse(_))
        ));
    }
}
