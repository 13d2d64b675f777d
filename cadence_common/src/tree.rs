//! Hierarchical configuration tree.
//!
//! A [`ConfigNode`] is a read-only view over one TOML table: leaves are typed
//! values, sub-tables are named child nodes. Components (GAMs, data sources,
//! groups) receive the node holding their own parameters and read it through
//! the typed getters below. Every error carries the dotted path of the key so
//! that configuration diagnostics point at the offending entry.

use crate::config::ConfigError;

/// Read-only node of the configuration tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigNode {
    path: String,
    table: toml::Table,
}

impl ConfigNode {
    /// Wrap an existing table located at `path`.
    pub fn new(path: impl Into<String>, table: toml::Table) -> Self {
        Self {
            path: path.into(),
            table,
        }
    }

    /// An empty node (component declared no parameters).
    pub fn empty(path: impl Into<String>) -> Self {
        Self::new(path, toml::Table::new())
    }

    /// Parse a TOML document into a root node.
    pub fn parse(path: impl Into<String>, source: &str) -> Result<Self, ConfigError> {
        let table: toml::Table =
            toml::from_str(source).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(Self::new(path, table))
    }

    /// Dotted path of this node.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Underlying table.
    pub fn table(&self) -> &toml::Table {
        &self.table
    }

    /// Number of direct entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when the node has no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// True when `key` exists (leaf or child).
    pub fn contains(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }

    /// Keys of the direct entries.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    /// Raw leaf value.
    pub fn value(&self, key: &str) -> Option<&toml::Value> {
        self.table.get(key)
    }

    /// Named child node, if `key` holds a table.
    pub fn child(&self, key: &str) -> Option<ConfigNode> {
        match self.table.get(key) {
            Some(toml::Value::Table(t)) => Some(Self::new(self.key_path(key), t.clone())),
            _ => None,
        }
    }

    /// String leaf.
    pub fn get_str(&self, key: &str) -> Result<&str, ConfigError> {
        match self.require(key)? {
            toml::Value::String(s) => Ok(s),
            _ => Err(self.wrong_type(key, "string")),
        }
    }

    /// Floating-point leaf; integer literals are accepted.
    pub fn get_f64(&self, key: &str) -> Result<f64, ConfigError> {
        match self.require(key)? {
            toml::Value::Float(v) => Ok(*v),
            toml::Value::Integer(v) => Ok(*v as f64),
            _ => Err(self.wrong_type(key, "number")),
        }
    }

    /// Integer leaf.
    pub fn get_i64(&self, key: &str) -> Result<i64, ConfigError> {
        match self.require(key)? {
            toml::Value::Integer(v) => Ok(*v),
            _ => Err(self.wrong_type(key, "integer")),
        }
    }

    /// Boolean leaf.
    pub fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        match self.require(key)? {
            toml::Value::Boolean(v) => Ok(*v),
            _ => Err(self.wrong_type(key, "boolean")),
        }
    }

    /// Array of numbers.
    pub fn get_f64_array(&self, key: &str) -> Result<Vec<f64>, ConfigError> {
        let toml::Value::Array(items) = self.require(key)? else {
            return Err(self.wrong_type(key, "array"));
        };
        items
            .iter()
            .map(|v| match v {
                toml::Value::Float(f) => Ok(*f),
                toml::Value::Integer(i) => Ok(*i as f64),
                _ => Err(self.wrong_type(key, "array of numbers")),
            })
            .collect()
    }

    /// Optional string leaf (absent → `None`, wrong kind → error).
    pub fn opt_str(&self, key: &str) -> Result<Option<&str>, ConfigError> {
        if self.contains(key) {
            self.get_str(key).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Floating-point leaf with a fallback when absent.
    pub fn get_f64_or(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        if self.contains(key) {
            self.get_f64(key)
        } else {
            Ok(default)
        }
    }

    fn require(&self, key: &str) -> Result<&toml::Value, ConfigError> {
        self.table.get(key).ok_or_else(|| ConfigError::MissingKey {
            path: self.key_path(key),
        })
    }

    fn wrong_type(&self, key: &str, expected: &'static str) -> ConfigError {
        ConfigError::WrongType {
            path: self.key_path(key),
            expected,
        }
    }

    fn key_path(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.path, key)
        }
    }
}
