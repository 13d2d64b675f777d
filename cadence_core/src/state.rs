//! Real-time states and threads.
//!
//! A state is a named set of threads; a thread is an ordered list of GAMs.
//! A GAM appears at most once per thread and in at most one thread of a
//! state, so every GAM of a state is executed by exactly one OS thread.

use std::collections::HashMap;
use std::time::Duration;

use crate::arena::{GamArena, GamHandle};
use crate::config::StateConfig;
use crate::error::ConfigurationError;

/// One OS thread worth of GAMs.
#[derive(Debug, Clone, PartialEq)]
pub struct RealTimeThread {
    name: String,
    functions: Vec<GamHandle>,
    cycle_time: Option<Duration>,
    cpu: Option<usize>,
    priority: Option<i32>,
}

impl RealTimeThread {
    pub fn new(name: impl Into<String>, functions: Vec<GamHandle>) -> Self {
        Self {
            name: name.into(),
            functions,
            cycle_time: None,
            cpu: None,
            priority: None,
        }
    }

    pub fn with_cycle_time(mut self, period: Option<Duration>) -> Self {
        self.cycle_time = period;
        self
    }

    pub fn with_rt(mut self, cpu: Option<usize>, priority: Option<i32>) -> Self {
        self.cpu = cpu;
        self.priority = priority;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// GAMs in execution order.
    pub fn functions(&self) -> &[GamHandle] {
        &self.functions
    }

    pub fn cycle_time(&self) -> Option<Duration> {
        self.cycle_time
    }

    pub fn cpu(&self) -> Option<usize> {
        self.cpu
    }

    pub fn priority(&self) -> Option<i32> {
        self.priority
    }
}

/// A named set of threads.
#[derive(Debug, Clone, PartialEq)]
pub struct RealTimeState {
    name: String,
    threads: Vec<RealTimeThread>,
}

impl RealTimeState {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> &[RealTimeThread] {
        &self.threads
    }

    pub fn thread(&self, name: &str) -> Option<&RealTimeThread> {
        self.threads.iter().find(|t| t.name == name)
    }

    /// Index of the thread executing `gam`, if the state uses it.
    pub fn thread_of(&self, gam: GamHandle) -> Option<usize> {
        self.threads.iter().position(|t| t.functions.contains(&gam))
    }

    pub fn contains(&self, gam: GamHandle) -> bool {
        self.thread_of(gam).is_some()
    }

    /// Every GAM of the state, thread by thread.
    pub fn functions(&self) -> impl Iterator<Item = GamHandle> + '_ {
        self.threads.iter().flat_map(|t| t.functions.iter().copied())
    }
}

/// All states of an application, by declaration order.
#[derive(Debug, Clone, Default)]
pub struct StateCatalogue {
    states: Vec<RealTimeState>,
    by_name: HashMap<String, usize>,
}

impl StateCatalogue {
    /// Resolve state declarations against the arena.
    pub fn build(configs: &[StateConfig], arena: &GamArena) -> Result<Self, ConfigurationError> {
        let mut catalogue = Self::default();
        for sc in configs {
            if catalogue.by_name.contains_key(&sc.name) {
                return Err(ConfigurationError::Duplicate {
                    kind: "state",
                    name: sc.name.clone(),
                });
            }
            if sc.threads.is_empty() {
                return Err(malformed(&sc.name, "no threads".to_string()));
            }
            let mut owner: HashMap<GamHandle, &str> = HashMap::new();
            let mut threads = Vec::with_capacity(sc.threads.len());
            for tc in &sc.threads {
                if threads.iter().any(|t: &RealTimeThread| t.name == tc.name) {
                    return Err(ConfigurationError::Duplicate {
                        kind: "thread",
                        name: format!("{}.{}", sc.name, tc.name),
                    });
                }
                if tc.functions.is_empty() {
                    return Err(malformed(&sc.name, format!("thread '{}' has no functions", tc.name)));
                }
                let mut functions = Vec::with_capacity(tc.functions.len());
                for f in &tc.functions {
                    let handle = arena.handle(f).ok_or_else(|| ConfigurationError::UnknownReference {
                        owner: format!("{}.{}", sc.name, tc.name),
                        kind: "function",
                        name: f.clone(),
                    })?;
                    if let Some(other) = owner.insert(handle, &tc.name) {
                        let reason = if other == tc.name {
                            format!("'{f}' appears twice in thread '{other}'")
                        } else {
                            format!("'{f}' appears in threads '{other}' and '{}'", tc.name)
                        };
                        return Err(malformed(&sc.name, reason));
                    }
                    functions.push(handle);
                }
                threads.push(
                    RealTimeThread::new(&tc.name, functions)
                        .with_cycle_time(tc.cycle_time_us.map(Duration::from_micros))
                        .with_rt(tc.cpu, tc.priority),
                );
            }
            catalogue.by_name.insert(sc.name.clone(), catalogue.states.len());
            catalogue.states.push(RealTimeState {
                name: sc.name.clone(),
                threads,
            });
        }
        Ok(catalogue)
    }

    pub fn get(&self, name: &str) -> Option<&RealTimeState> {
        self.index_of(name).and_then(|i| self.states.get(i))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn by_index(&self, idx: usize) -> Option<&RealTimeState> {
        self.states.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RealTimeState> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// GAMs referenced by no state.
    pub fn unused(&self, arena: &GamArena) -> Vec<GamHandle> {
        arena
            .iter()
            .map(|(h, _)| h)
            .filter(|h| !self.states.iter().any(|s| s.contains(*h)))
            .collect()
    }
}

fn malformed(state: &str, reason: String) -> ConfigurationError {
    ConfigurationError::MalformedState {
        state: state.to_string(),
        reason,
    }
}
