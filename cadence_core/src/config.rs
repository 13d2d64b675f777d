//! Application configuration file (TOML).
//!
//! Deserialised with `serde`, then structurally validated: non-empty names,
//! unique names per section, known initial state, sane thread settings.
//! Cross-references (signals, data sources, GAMs in threads) are resolved and
//! checked by [`RealTimeApplication::configure`](crate::application::RealTimeApplication::configure).

use std::collections::HashSet;
use std::path::Path;

use cadence_common::config::{ConfigError, ConfigLoader, SharedConfig};
use cadence_common::consts::{MAX_DIMENSIONS, MAX_THREADS_PER_STATE};
use cadence_common::tree::ConfigNode;
use serde::Deserialize;

use crate::scheduler::ErrorPolicy;

// ─── Sections ───────────────────────────────────────────────────────

/// The whole application file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplicationConfig {
    #[serde(default)]
    pub shared: SharedConfig,
    pub application: ApplicationSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub data_sources: Vec<DataSourceConfig>,
    #[serde(default)]
    pub functions: Vec<FunctionConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub states: Vec<StateConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplicationSection {
    pub name: String,
    /// State prepared by the host binary when `--state` is not given.
    pub initial_state: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSection {
    #[serde(default)]
    pub error_policy: ErrorPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSourceConfig {
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub signals: Vec<DeclaredSignal>,
    #[serde(default)]
    pub parameters: toml::Table,
}

/// Signal declared by a data source ahead of any GAM.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeclaredSignal {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub number_of_elements: Option<u32>,
    pub number_of_dimensions: Option<u8>,
    pub number_of_samples: Option<u32>,
    pub default: Option<toml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionConfig {
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub input_signals: Vec<SignalConfig>,
    #[serde(default)]
    pub output_signals: Vec<SignalConfig>,
    #[serde(default)]
    pub parameters: toml::Table,
}

/// GAM-side signal declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignalConfig {
    pub name: String,
    pub data_source: String,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub number_of_elements: Option<u32>,
    pub number_of_dimensions: Option<u8>,
    pub number_of_samples: Option<u32>,
    /// Data-source signal name, when it differs from `name`.
    pub alias: Option<String>,
    /// Inclusive `[first, last]` element ranges.
    pub ranges: Option<Vec<[u32; 2]>>,
    pub default: Option<toml::Value>,
}

impl SignalConfig {
    /// Name of the data-source signal this entry binds to.
    pub fn data_source_signal(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub functions: Vec<String>,
    #[serde(default)]
    pub parameters: toml::Table,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    pub name: String,
    #[serde(default)]
    pub threads: Vec<ThreadConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThreadConfig {
    pub name: String,
    pub functions: Vec<String>,
    /// Pacing period; free-running when absent.
    pub cycle_time_us: Option<u64>,
    /// CPU affinity (`rt` feature).
    pub cpu: Option<usize>,
    /// SCHED_FIFO priority (`rt` feature).
    pub priority: Option<i32>,
}

// ─── Parameter nodes ────────────────────────────────────────────────

impl DataSourceConfig {
    pub fn parameter_node(&self) -> ConfigNode {
        ConfigNode::new(
            format!("data_sources.{}.parameters", self.name),
            self.parameters.clone(),
        )
    }
}

impl FunctionConfig {
    pub fn parameter_node(&self) -> ConfigNode {
        ConfigNode::new(
            format!("functions.{}.parameters", self.name),
            self.parameters.clone(),
        )
    }
}

impl GroupConfig {
    pub fn parameter_node(&self) -> ConfigNode {
        ConfigNode::new(
            format!("groups.{}.parameters", self.name),
            self.parameters.clone(),
        )
    }
}

// ─── Loading ────────────────────────────────────────────────────────

/// Load and validate an application file.
pub fn load_config(path: &Path) -> Result<ApplicationConfig, ConfigError> {
    let config = ApplicationConfig::load(path)?;
    config.validate()?;
    Ok(config)
}

/// Parse and validate an application document (for tests and embedding).
pub fn load_config_from_str(content: &str) -> Result<ApplicationConfig, ConfigError> {
    let config = ApplicationConfig::load_str(content)?;
    config.validate()?;
    Ok(config)
}

// ─── Validation ─────────────────────────────────────────────────────

impl ApplicationConfig {
    /// Structural checks that need no registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        non_empty("application.name", &self.application.name)?;

        unique("data source", self.data_sources.iter().map(|d| d.name.as_str()))?;
        unique("function", self.functions.iter().map(|f| f.name.as_str()))?;
        unique("group", self.groups.iter().map(|g| g.name.as_str()))?;
        unique("state", self.states.iter().map(|s| s.name.as_str()))?;

        for ds in &self.data_sources {
            non_empty("data_sources.name", &ds.name)?;
            unique(
                &format!("signal of data source '{}'", ds.name),
                ds.signals.iter().map(|s| s.name.as_str()),
            )?;
            for s in &ds.signals {
                check_shape(
                    &format!("data_sources.{}.signals.{}", ds.name, s.name),
                    s.number_of_elements,
                    s.number_of_dimensions,
                    s.number_of_samples,
                )?;
            }
        }

        for f in &self.functions {
            non_empty("functions.name", &f.name)?;
            for (dir, list) in [("input_signals", &f.input_signals), ("output_signals", &f.output_signals)] {
                unique(
                    &format!("{dir} of '{}'", f.name),
                    list.iter().map(|s| s.name.as_str()),
                )?;
                for s in list.iter() {
                    let path = format!("functions.{}.{dir}.{}", f.name, s.name);
                    check_shape(&path, s.number_of_elements, s.number_of_dimensions, s.number_of_samples)?;
                    if let Some(ranges) = &s.ranges {
                        if ranges.is_empty() {
                            return Err(ConfigError::ValidationError(format!("{path}: empty ranges")));
                        }
                    }
                }
            }
        }

        for g in &self.groups {
            non_empty("groups.name", &g.name)?;
            unique(&format!("member of group '{}'", g.name), g.functions.iter().map(String::as_str))?;
        }

        for s in &self.states {
            non_empty("states.name", &s.name)?;
            if s.threads.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "state '{}' declares no threads",
                    s.name
                )));
            }
            if s.threads.len() > MAX_THREADS_PER_STATE {
                return Err(ConfigError::ValidationError(format!(
                    "state '{}' declares {} threads, at most {MAX_THREADS_PER_STATE} allowed",
                    s.name,
                    s.threads.len()
                )));
            }
            unique(
                &format!("thread of state '{}'", s.name),
                s.threads.iter().map(|t| t.name.as_str()),
            )?;
            for t in &s.threads {
                non_empty("states.threads.name", &t.name)?;
                if t.cycle_time_us == Some(0) {
                    return Err(ConfigError::ValidationError(format!(
                        "thread '{}' of state '{}': cycle_time_us must be positive",
                        t.name, s.name
                    )));
                }
                if let Some(p) = t.priority {
                    if !(1..=99).contains(&p) {
                        return Err(ConfigError::ValidationError(format!(
                            "thread '{}' of state '{}': priority {p} outside 1..=99",
                            t.name, s.name
                        )));
                    }
                }
            }
        }

        if let Some(initial) = &self.application.initial_state {
            if !self.states.iter().any(|s| &s.name == initial) {
                return Err(ConfigError::ValidationError(format!(
                    "initial_state '{initial}' is not a declared state"
                )));
            }
        }
        Ok(())
    }
}

fn non_empty(what: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::ValidationError(format!("{what} cannot be empty")));
    }
    Ok(())
}

fn unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for n in names {
        if !seen.insert(n) {
            return Err(ConfigError::ValidationError(format!("duplicate {kind} '{n}'")));
        }
    }
    Ok(())
}

fn check_shape(
    path: &str,
    elements: Option<u32>,
    dimensions: Option<u8>,
    samples: Option<u32>,
) -> Result<(), ConfigError> {
    if let Some(d) = dimensions {
        if d > MAX_DIMENSIONS {
            return Err(ConfigError::ValidationError(format!(
                "{path}: {d} dimensions exceed {MAX_DIMENSIONS}"
            )));
        }
        if d == 0 && elements.is_some_and(|e| e != 1) {
            return Err(ConfigError::ValidationError(format!(
                "{path}: a scalar (0 dimensions) has exactly one element"
            )));
        }
    }
    if samples == Some(0) {
        return Err(ConfigError::ValidationError(format!("{path}: zero samples")));
    }
    Ok(())
}
