// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! api: Serializable description of a FlowKit graph.
//!
//! These types are plain data. They carry the port lists of every node in
//! `TAG:index:name` form, plus options, executor and stream-handler
//! selections. Nothing here is validated; `flowkit-engine` validates a
//! description when a graph is initialized from it.
//!
//! Descriptions are usually written in YAML and loaded with
//! [`GraphConfig::from_yaml`], but they can equally be built in code with the
//! builder helpers on [`NodeConfig`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// YAML graph format loading
pub mod yaml;

/// Options block tagged with the type key of the options struct it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedOptions {
    pub type_key: String,
    pub value: serde_json::Value,
}

impl TypedOptions {
    pub fn new(type_key: impl Into<String>, value: serde_json::Value) -> Self {
        Self { type_key: type_key.into(), value }
    }
}

/// Named input stream handler plus its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputStreamHandlerConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

impl InputStreamHandlerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), options: None }
    }
}

/// A named worker pool nodes can be assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub name: String,
    /// Worker thread count; defaults to the host's available parallelism.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<usize>,
}

/// One node of a graph: a calculator (or subgraph) plus its wiring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Unique node name. Assigned automatically when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Registered calculator or subgraph type.
    pub calculator: String,
    pub input_streams: Vec<String>,
    pub output_streams: Vec<String>,
    pub input_side_packets: Vec<String>,
    pub output_side_packets: Vec<String>,
    /// Untyped inline options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
    /// A single typed options block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options_ext: Option<TypedOptions>,
    /// A list of typed options blocks.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub node_options: Vec<TypedOptions>,
    /// Executor this node's invocations run on; the default pool when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_stream_handler: Option<InputStreamHandlerConfig>,
    /// Bindings from this node's option fields to fields of the enclosing
    /// subgraph's options (`node field -> graph field`).
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub option_values: IndexMap<String, String>,
}

impl NodeConfig {
    pub fn new(calculator: impl Into<String>) -> Self {
        Self { calculator: calculator.into(), ..Self::default() }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn input_stream(mut self, spec: impl Into<String>) -> Self {
        self.input_streams.push(spec.into());
        self
    }

    #[must_use]
    pub fn output_stream(mut self, spec: impl Into<String>) -> Self {
        self.output_streams.push(spec.into());
        self
    }

    #[must_use]
    pub fn input_side_packet(mut self, spec: impl Into<String>) -> Self {
        self.input_side_packets.push(spec.into());
        self
    }

    #[must_use]
    pub fn output_side_packet(mut self, spec: impl Into<String>) -> Self {
        self.output_side_packets.push(spec.into());
        self
    }

    #[must_use]
    pub fn options(mut self, options: serde_json::Value) -> Self {
        self.options = Some(options);
        self
    }

    #[must_use]
    pub fn executor(mut self, executor: impl Into<String>) -> Self {
        self.executor = Some(executor.into());
        self
    }

    #[must_use]
    pub fn input_stream_handler(mut self, handler: impl Into<String>) -> Self {
        self.input_stream_handler = Some(InputStreamHandlerConfig::new(handler));
        self
    }

    #[must_use]
    pub fn option_value(mut self, node_field: impl Into<String>, graph_field: impl Into<String>) -> Self {
        self.option_values.insert(node_field.into(), graph_field.into());
        self
    }

    /// Name used in messages before validation has assigned one.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.calculator)
    }
}

/// A complete graph, or the body of a registered subgraph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Registered name when this description is used as a subgraph.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Graph input streams (public interface of a subgraph).
    pub input_streams: Vec<String>,
    pub output_streams: Vec<String>,
    pub input_side_packets: Vec<String>,
    pub output_side_packets: Vec<String>,
    pub nodes: Vec<NodeConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub executors: Vec<ExecutorConfig>,
    /// Stream handler applied to every node, overriding per-node choices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_stream_handler: Option<InputStreamHandlerConfig>,
    /// Size of the default executor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<usize>,
    /// Queue depth at which graph input streams apply backpressure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<usize>,
    /// Defaults for a subgraph's options, overridden by call-site options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_options: Option<serde_json::Value>,
}

impl GraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn type_name(mut self, name: impl Into<String>) -> Self {
        self.type_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn input_stream(mut self, spec: impl Into<String>) -> Self {
        self.input_streams.push(spec.into());
        self
    }

    #[must_use]
    pub fn output_stream(mut self, spec: impl Into<String>) -> Self {
        self.output_streams.push(spec.into());
        self
    }

    #[must_use]
    pub fn input_side_packet(mut self, spec: impl Into<String>) -> Self {
        self.input_side_packets.push(spec.into());
        self
    }

    #[must_use]
    pub fn output_side_packet(mut self, spec: impl Into<String>) -> Self {
        self.output_side_packets.push(spec.into());
        self
    }

    #[must_use]
    pub fn node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub fn executor(mut self, name: impl Into<String>, num_threads: Option<usize>) -> Self {
        self.executors.push(ExecutorConfig { name: name.into(), num_threads });
        self
    }

    #[must_use]
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = Some(size);
        self
    }

    #[must_use]
    pub fn graph_options(mut self, options: serde_json::Value) -> Self {
        self.graph_options = Some(options);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_matches_json() {
        let built = GraphConfig::new().input_stream("in").output_stream("out").node(
            NodeConfig::new("PassThroughCalculator")
                .name("pass")
                .input_stream("in")
                .output_stream("out"),
        );

        let parsed: GraphConfig = serde_json::from_value(serde_json::json!({
            "input_streams": ["in"],
            "output_streams": ["out"],
            "nodes": [{
                "name": "pass",
                "calculator": "PassThroughCalculator",
                "input_streams": ["in"],
                "output_streams": ["out"]
            }]
        }))
        .unwrap();

        assert_eq!(built, parsed);
    }

    #[test]
    fn test_display_name_falls_back_to_calculator() {
        assert_eq!(NodeConfig::new("Foo").display_name(), "Foo");
        assert_eq!(NodeConfig::new("Foo").name("bar").display_name(), "bar");
    }
}
