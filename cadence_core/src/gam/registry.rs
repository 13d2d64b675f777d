//! Class-name → factory registry for GAMs.

use std::collections::HashMap;

use cadence_common::tree::ConfigNode;

use super::{ConstantGam, GainGam, Gam, GamError, IoGam};

/// Builds a GAM from its instance name and parameter node.
pub type GamFactory =
    Box<dyn Fn(&str, &ConfigNode) -> Result<Box<dyn Gam>, GamError> + Send + Sync>;

/// Registry of available GAM classes.
///
/// Constructed at startup, populated via `register()`, and passed to
/// configuration by reference.
pub struct GamRegistry {
    factories: HashMap<&'static str, GamFactory>,
}

impl GamRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding `IOGAM`, `ConstantGAM` and `GainGAM`.
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        reg.register(super::io_gam::CLASS, IoGam::create);
        reg.register(super::constant_gam::CLASS, ConstantGam::create);
        reg.register(super::gain_gam::CLASS, GainGam::create);
        reg
    }

    /// Register a GAM factory.
    ///
    /// # Panics
    /// Panics if the class is already registered.
    pub fn register<F>(&mut self, class: &'static str, factory: F)
    where
        F: Fn(&str, &ConfigNode) -> Result<Box<dyn Gam>, GamError> + Send + Sync + 'static,
    {
        if self.factories.contains_key(class) {
            panic!("GAM class '{class}' is already registered");
        }
        self.factories.insert(class, Box::new(factory));
    }

    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    /// Instantiate `class`.
    ///
    /// # Errors
    /// `GamError::UnknownClass` if nothing is registered under `class`.
    pub fn create(&self, class: &str, name: &str, params: &ConfigNode) -> Result<Box<dyn Gam>, GamError> {
        let factory = self
            .factories
            .get(class)
            .ok_or_else(|| GamError::UnknownClass(class.to_string()))?;
        factory(name, params)
    }

    /// Registered class names.
    pub fn list_classes(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for GamRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
