//! GAM groups: shared, read-only context for a set of member GAMs.
//!
//! A group publishes one context object after `initialise`. For every state
//! transition it names the context its members run with in the next state;
//! the application has each member's hooks accept it and stages it for the
//! inactive buffer. Members install it from their own thread when the state
//! becomes active, so an aborted transition leaves nothing behind.

use std::collections::HashMap;

use cadence_common::tree::ConfigNode;
use tracing::debug;

use super::{GamError, SharedContext};

/// A named set of GAMs sharing one context.
pub trait GamGroup: Send {
    /// Read parameters and build the context.
    fn initialise(&mut self, params: &ConfigNode) -> Result<(), GamError>;

    /// The context published by `initialise`.
    fn context(&self) -> SharedContext;

    /// Context the members run with once `next` is active. Must not change
    /// the group: the transition may still be refused.
    fn prepare_next_state(&self, _current: Option<&str>, _next: &str) -> Result<SharedContext, GamError> {
        Ok(self.context())
    }
}

// ─── ParameterGroup ─────────────────────────────────────────────────

pub const PARAMETER_GROUP_CLASS: &str = "ParameterGroup";

/// Named numeric parameters shared by a group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterContext {
    values: HashMap<String, f64>,
}

impl ParameterContext {
    pub fn new(values: HashMap<String, f64>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Group whose context is a [`ParameterContext`] built from every numeric
/// entry of its `parameters` table.
#[derive(Debug)]
pub struct ParameterGroup {
    name: String,
    context: SharedContext,
}

impl ParameterGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: std::sync::Arc::new(ParameterContext::default()),
        }
    }

    pub fn create(name: &str) -> Result<Box<dyn GamGroup>, GamError> {
        Ok(Box::new(Self::new(name)))
    }
}

impl GamGroup for ParameterGroup {
    fn initialise(&mut self, params: &ConfigNode) -> Result<(), GamError> {
        let mut values = HashMap::with_capacity(params.len());
        for key in params.keys() {
            values.insert(key.to_string(), params.get_f64(key)?);
        }
        debug!(group = %self.name, parameters = values.len(), "parameter context built");
        self.context = std::sync::Arc::new(ParameterContext::new(values));
        Ok(())
    }

    fn context(&self) -> SharedContext {
        std::sync::Arc::clone(&self.context)
    }
}

// ─── Registry ───────────────────────────────────────────────────────

/// Builds a group from its instance name.
pub type GroupFactory = Box<dyn Fn(&str) -> Result<Box<dyn GamGroup>, GamError> + Send + Sync>;

/// Registry of available group classes.
pub struct GroupRegistry {
    factories: HashMap<&'static str, GroupFactory>,
}

impl GroupRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding `ParameterGroup`.
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        reg.register(PARAMETER_GROUP_CLASS, ParameterGroup::create);
        reg
    }

    /// Register a group factory.
    ///
    /// # Panics
    /// Panics if the class is already registered.
    pub fn register<F>(&mut self, class: &'static str, factory: F)
    where
        F: Fn(&str) -> Result<Box<dyn GamGroup>, GamError> + Send + Sync + 'static,
    {
        if self.factories.contains_key(class) {
            panic!("Group class '{class}' is already registered");
        }
        self.factories.insert(class, Box::new(factory));
    }

    /// Instantiate `class`.
    pub fn create(&self, class: &str, name: &str) -> Result<Box<dyn GamGroup>, GamError> {
        let factory = self
            .factories
            .get(class)
            .ok_or_else(|| GamError::UnknownClass(class.to_string()))?;
        factory(name)
    }

    pub fn list_classes(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gam::downcast_context;

    #[test]
    fn parameter_group_context() {
        let params = ConfigNode::parse("groups.Tuning.parameters", "kp = 2.0\nki = 1").unwrap();
        let mut group = GroupRegistry::default()
            .create("ParameterGroup", "Tuning")
            .unwrap();
        group.initialise(&params).unwrap();

        let ctx = group.context();
        let values = downcast_context::<ParameterContext>(&ctx).unwrap();
        assert_eq!(values.get("kp"), Some(2.0));
        assert_eq!(values.get("ki"), Some(1.0));
        assert_eq!(values.len(), 2);

        // Same object on every call and for every state.
        assert!(std::sync::Arc::ptr_eq(&ctx, &group.context()));
        let next = group.prepare_next_state(Some("A"), "B").unwrap();
        assert!(std::sync::Arc::ptr_eq(&ctx, &next));
    }

    #[test]
    fn non_numeric_parameter_rejected() {
        let params = ConfigNode::parse("groups.G.parameters", "mode = \"fast\"").unwrap();
        let mut group = ParameterGroup::new("G");
        assert!(matches!(group.initialise(&params), Err(GamError::Parameter(_))));
    }

    #[test]
    fn unknown_group_class() {
        assert!(matches!(
            GroupRegistry::new().create("X", "g"),
            Err(GamError::UnknownClass(_))
        ));
    }
}
