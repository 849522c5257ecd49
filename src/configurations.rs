//! Named launch profiles
//!
//! Profiles are read from the `[[configurations]]` tables of the config file
//! and can be edited for the lifetime of the process. The number of stored
//! profiles is capped by `limits.max_configurations`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

/// A named launch profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugConfiguration {
    /// Unique name
    pub name: String,

    /// Program to debug
    pub program: PathBuf,

    /// Program arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory of the debuggee
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Debugger binary overriding the global `[debugger] path`
    #[serde(default)]
    pub debugger_path: Option<PathBuf>,

    /// Extra arguments appended to the debugger command line
    #[serde(default)]
    pub debugger_args: Vec<String>,

    /// Command timeout overriding `[timeouts] command_secs`
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
}

impl DebugConfiguration {
    /// A profile with only a program set
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            debugger_path: None,
            debugger_args: Vec::new(),
            command_timeout_secs: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Capped collection of launch profiles, in insertion order
#[derive(Debug)]
pub struct ConfigurationStore {
    configurations: Vec<DebugConfiguration>,
    max: usize,
}

impl ConfigurationStore {
    pub fn new(max: usize) -> Self {
        Self {
            configurations: Vec::new(),
            max,
        }
    }

    /// Build a store from loaded profiles; profiles past the cap are dropped
    pub fn from_loaded(configurations: Vec<DebugConfiguration>, max: usize) -> Self {
        let mut store = Self::new(max);
        for cfg in configurations {
            let name = cfg.name.clone();
            if let Err(e) = store.add(cfg) {
                tracing::warn!(name = %name, error = %e, "Ignoring debug configuration");
            }
        }
        store
    }

    pub fn add(&mut self, cfg: DebugConfiguration) -> Result<()> {
        if self.get(&cfg.name).is_some() {
            return Err(Error::ConfigurationExists(cfg.name));
        }
        if self.configurations.len() >= self.max {
            return Err(Error::ConfigurationLimit { max: self.max });
        }
        self.configurations.push(cfg);
        Ok(())
    }

    /// Replace the profile with the same name
    pub fn update(&mut self, cfg: DebugConfiguration) -> Result<()> {
        let slot = self
            .configurations
            .iter_mut()
            .find(|c| c.name == cfg.name)
            .ok_or_else(|| Error::ConfigurationNotFound(cfg.name.clone()))?;
        *slot = cfg;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<DebugConfiguration> {
        let index = self
            .configurations
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::ConfigurationNotFound(name.to_string()))?;
        Ok(self.configurations.remove(index))
    }

    pub fn get(&self, name: &str) -> Option<&DebugConfiguration> {
        self.configurations.iter().find(|c| c.name == name)
    }

    pub fn list(&self) -> &[DebugConfiguration] {
        &self.configurations
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }
}
