//! Class-name → factory registry for data sources.
//!
//! Constructed at startup, populated via `register()`, and passed to
//! configuration by reference. No global state.

use std::collections::HashMap;

use cadence_common::tree::ConfigNode;

use super::{DataSource, DataSourceError, GamDataSource, SharedMemoryDataSource};

/// Builds a data source from its instance name and parameter node.
pub type DataSourceFactory =
    Box<dyn Fn(&str, &ConfigNode) -> Result<Box<dyn DataSource>, DataSourceError> + Send + Sync>;

/// Registry of available data-source classes.
pub struct DataSourceRegistry {
    factories: HashMap<&'static str, DataSourceFactory>,
}

impl DataSourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding the built-in classes.
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        reg.register(super::gam_data_source::CLASS, GamDataSource::create);
        reg.register(super::shared_memory::CLASS, SharedMemoryDataSource::create);
        reg
    }

    /// Register a class factory.
    ///
    /// # Panics
    /// Panics if the class is already registered.
    pub fn register<F>(&mut self, class: &'static str, factory: F)
    where
        F: Fn(&str, &ConfigNode) -> Result<Box<dyn DataSource>, DataSourceError>
            + Send
            + Sync
            + 'static,
    {
        if self.factories.contains_key(class) {
            panic!("Data source class '{class}' is already registered");
        }
        self.factories.insert(class, Box::new(factory));
    }

    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    /// Create an instance of `class`.
    ///
    /// # Errors
    /// `DataSourceError::UnknownClass` when nothing is registered under
    /// `class`, or whatever the factory returns.
    pub fn create(
        &self,
        class: &str,
        name: &str,
        params: &ConfigNode,
    ) -> Result<Box<dyn DataSource>, DataSourceError> {
        let factory = self
            .factories
            .get(class)
            .ok_or_else(|| DataSourceError::UnknownClass(class.to_string()))?;
        factory(name, params)
    }

    /// Registered class names.
    pub fn list_classes(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for DataSourceRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_classes() {
        let reg = DataSourceRegistry::default();
        let mut names = reg.list_classes();
        names.sort();
        assert_eq!(names, vec!["GAMDataSource", "SharedMemoryDataSource"]);

        let ds = reg
            .create("GAMDataSource", "DDB1", &ConfigNode::empty("p"))
            .unwrap();
        assert_eq!(ds.name(), "DDB1");
        assert_eq!(ds.number_of_buffers(), 2);
    }

    #[test]
    fn unknown_class() {
        let reg = DataSourceRegistry::new();
        assert!(matches!(
            reg.create("Nope", "x", &ConfigNode::empty("p")),
            Err(DataSourceError::UnknownClass(c)) if c == "Nope"
        ));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_registration_panics() {
        let mut reg = DataSourceRegistry::with_builtin();
        reg.register("GAMDataSource", GamDataSource::create);
    }
}
