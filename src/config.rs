//! Graph-definition YAML schema (spec.md §6).
//!
//! The on-disk loader (reading a path, watching for changes) is out of
//! scope (spec.md §1); this module only deserializes an already-parsed
//! `serde_yaml::Value` / document into typed structs, grounded in the
//! pack's `serde_yaml` usage for plugin/graph definitions.

use std::collections::HashMap;

use serde::Deserialize;

use crate::constants::{CORE_NOT_PINNED, PRIORITY_NONE};
use crate::error::{AxonError, Result};

/// `advanced:` block under one processor entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdvancedConfig {
    pub threadpriority: i16,
    pub threadcore: i32,
    pub buffer_sizes: HashMap<String, usize>,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            threadpriority: PRIORITY_NONE,
            threadcore: CORE_NOT_PINNED,
            buffer_sizes: HashMap::new(),
        }
    }
}

/// One `processors:` entry, keyed by a (possibly range-expandable) name
/// pattern in the enclosing map.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    pub class: String,
    #[serde(default = "default_options")]
    pub options: serde_yaml::Value,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

fn default_options() -> serde_yaml::Value {
    serde_yaml::Value::Null
}

/// One raw `<out> = <in>` entry under `connections:`. Components may use
/// name-range expansion (spec.md §6); expansion happens in `axon::address`,
/// not here.
#[derive(Debug, Clone)]
pub struct ConnectionRule {
    pub output: String,
    pub input: String,
}

impl ConnectionRule {
    pub fn parse(raw: &str) -> Result<Self> {
        let (output, input) = raw
            .split_once('=')
            .ok_or_else(|| AxonError::invalid_graph(format!("malformed connection rule: `{raw}`")))?;
        Ok(Self {
            output: output.trim().to_string(),
            input: input.trim().to_string(),
        })
    }
}

impl<'de> Deserialize<'de> for ConnectionRule {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        ConnectionRule::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// One `states:` entry: a group of `proc.state` references to be linked
/// together (spec.md §4.6 step 5).
pub type StateGroup = Vec<String>;

/// The full graph-definition document.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub processors: HashMap<String, ProcessorConfig>,
    pub connections: Vec<ConnectionRule>,
    pub states: Vec<StateGroup>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            processors: HashMap::new(),
            connections: Vec::new(),
            states: Vec::new(),
        }
    }
}

impl GraphConfig {
    pub fn from_value(value: serde_yaml::Value) -> Result<Self> {
        serde_yaml::from_value(value).map_err(AxonError::from)
    }

    pub fn from_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(AxonError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_graph() {
        let yaml = r#"
processors:
  source:
    class: TestSource
  sink:
    class: TestSink
    advanced:
      threadpriority: 80
      threadcore: 2
connections:
  - source.output = sink.input
states:
  - [source.threshold, sink.threshold]
"#;
        let config = GraphConfig::from_str(yaml).unwrap();
        assert_eq!(config.processors.len(), 2);
        assert_eq!(config.processors["sink"].advanced.threadpriority, 80);
        assert_eq!(config.connections.len(), 1);
        assert_eq!(config.connections[0].output, "source.output");
        assert_eq!(config.connections[0].input, "sink.input");
        assert_eq!(config.states, vec![vec!["source.threshold".to_string(), "sink.threshold".to_string()]]);
    }

    #[test]
    fn defaults_apply_when_advanced_omitted() {
        let yaml = r#"
processors:
  source:
    class: TestSource
"#;
        let config = GraphConfig::from_str(yaml).unwrap();
        let advanced = &config.processors["source"].advanced;
        assert_eq!(advanced.threadpriority, PRIORITY_NONE);
        assert_eq!(advanced.threadcore, CORE_NOT_PINNED);
    }

    #[test]
    fn rejects_malformed_connection_rule() {
        assert!(ConnectionRule::parse("no-equals-sign-here").is_err());
    }
}
