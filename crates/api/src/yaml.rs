// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! YAML graph format parsing.
//!
//! Two shapes are accepted for the node list:
//! - **List**: `nodes: [ { name: a, calculator: ... }, ... ]`
//! - **Map**: `nodes: { a: { calculator: ... }, ... }` where the key is the node name
//!
//! Both compile to the same [`GraphConfig`]. Map order is preserved.

use super::{ExecutorConfig, GraphConfig, InputStreamHandlerConfig, NodeConfig};
use indexmap::IndexMap;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;

/// The `nodes` field in either of its accepted shapes.
///
/// Deserialized by hand rather than as an untagged enum: buffering would turn
/// plain scalars such as `y`, `no` or `1` into booleans and numbers before the
/// string-typed port lists ever see them.
#[derive(Debug)]
pub enum UserNodes {
    List(Vec<NodeConfig>),
    Named(IndexMap<String, NodeConfig>),
}

impl Default for UserNodes {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

struct UserNodesVisitor;

impl<'de> Visitor<'de> for UserNodesVisitor {
    type Value = UserNodes;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a list of nodes or a map from node name to node")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(UserNodes::default())
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(UserNodes::default())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut nodes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(node) = seq.next_element::<NodeConfig>()? {
            nodes.push(node);
        }
        Ok(UserNodes::List(nodes))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut nodes = IndexMap::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((name, node)) = map.next_entry::<String, NodeConfig>()? {
            if nodes.contains_key(&name) {
                return Err(de::Error::custom(format!("duplicate node '{name}'")));
            }
            nodes.insert(name, node);
        }
        Ok(UserNodes::Named(nodes))
    }
}

impl<'de> Deserialize<'de> for UserNodes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(UserNodesVisitor)
    }
}

/// The top-level structure of a user-written graph file.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct UserGraph {
    pub type_name: Option<String>,
    pub input_streams: Vec<String>,
    pub output_streams: Vec<String>,
    pub input_side_packets: Vec<String>,
    pub output_side_packets: Vec<String>,
    pub nodes: UserNodes,
    pub executors: Vec<ExecutorConfig>,
    pub input_stream_handler: Option<InputStreamHandlerConfig>,
    pub num_threads: Option<usize>,
    pub max_queue_size: Option<usize>,
    pub graph_options: Option<serde_json::Value>,
}

/// Converts a parsed user graph into a [`GraphConfig`].
///
/// # Errors
///
/// Returns an error if a map-form node also carries a `name` that differs from its key.
pub fn compile(graph: UserGraph) -> Result<GraphConfig, String> {
    let nodes = match graph.nodes {
        UserNodes::List(nodes) => nodes,
        UserNodes::Named(named) => named
            .into_iter()
            .map(|(key, mut node)| match node.name.as_deref() {
                Some(name) if name != key => {
                    Err(format!("Node '{key}' also declares a different name '{name}'"))
                },
                _ => {
                    node.name = Some(key);
                    Ok(node)
                },
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    Ok(GraphConfig {
        type_name: graph.type_name,
        input_streams: graph.input_streams,
        output_streams: graph.output_streams,
        input_side_packets: graph.input_side_packets,
        output_side_packets: graph.output_side_packets,
        nodes,
        executors: graph.executors,
        input_stream_handler: graph.input_stream_handler,
        num_threads: graph.num_threads,
        max_queue_size: graph.max_queue_size,
        graph_options: graph.graph_options,
    })
}

impl GraphConfig {
    /// Parses a YAML graph description.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message when the YAML is malformed or does not
    /// describe a graph.
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        let user: UserGraph =
            serde_saphyr::from_str(yaml).map_err(|e| format!("Invalid graph YAML: {e}"))?;
        compile(user)
    }
}
