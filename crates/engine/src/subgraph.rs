// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Subgraph expansion.
//!
//! A node whose calculator names a registered subgraph is replaced by a copy
//! of the subgraph's nodes:
//!
//! - the subgraph's public streams and side packets are renamed to whatever the
//!   call site wires to the same (tag, index)
//! - every other name inside the copy is prefixed with `<instance>__`, where
//!   `<instance>` is the call-site node name, so two instances never collide
//! - call-site inline options are merged over the template's `graph_options`
//!   and handed to inner nodes through their `option_values` bindings
//!
//! Expansion recurses into subgraphs used by subgraphs and gives up at
//! [`MAX_SUBGRAPH_EXPANSION_DEPTH`]. Templates are cloned, never modified.

use crate::constants::{MAX_SUBGRAPH_EXPANSION_DEPTH, SUBGRAPH_NAMESPACE_SEPARATOR};
use flowkit_api::{GraphConfig, NodeConfig};
use flowkit_core::tag_map::{parse_tag_index_name, TagIndexName};
use flowkit_core::{CalculatorRegistry, FlowKitError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Name given to a node that has none: `<calculator>_<position>`.
pub fn default_node_name(node: &NodeConfig, position: usize) -> String {
    node.name.clone().unwrap_or_else(|| format!("{}_{position}", node.calculator))
}

/// Returns `config` with every subgraph node replaced by its expansion.
///
/// Top-level `option_values` bindings are resolved against the graph's own
/// `graph_options`.
///
/// # Errors
///
/// Returns `FlowKitError::Configuration` when a call site does not match the
/// subgraph's interface, options cannot be merged, or expansion exceeds
/// [`MAX_SUBGRAPH_EXPANSION_DEPTH`].
pub fn expand_graph(config: &GraphConfig, registry: &CalculatorRegistry) -> Result<GraphConfig> {
    let options = match &config.graph_options {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(_) => {
            return Err(FlowKitError::Configuration(
                "graph_options must be a JSON object".to_string(),
            ));
        },
    };

    let mut nodes = Vec::with_capacity(config.nodes.len());
    for node in &config.nodes {
        let mut node = node.clone();
        apply_option_values(&mut node, &options)?;
        nodes.push(node);
    }

    let mut expanded = config.clone();
    expanded.nodes = expand_nodes(nodes, registry, 0)?;
    if expanded.nodes.len() != config.nodes.len() {
        tracing::debug!(
            before = config.nodes.len(),
            after = expanded.nodes.len(),
            "Expanded subgraphs"
        );
    }
    Ok(expanded)
}

fn expand_nodes(
    nodes: Vec<NodeConfig>,
    registry: &CalculatorRegistry,
    depth: usize,
) -> Result<Vec<NodeConfig>> {
    let mut out = Vec::with_capacity(nodes.len());
    for (position, node) in nodes.into_iter().enumerate() {
        let Some(template) = registry.subgraph(&node.calculator) else {
            out.push(node);
            continue;
        };
        if depth >= MAX_SUBGRAPH_EXPANSION_DEPTH {
            return Err(FlowKitError::Configuration(format!(
                "Subgraph '{}' exceeds the expansion depth limit of {MAX_SUBGRAPH_EXPANSION_DEPTH}; \
                 cycle suspected",
                node.calculator
            )));
        }
        let instance = default_node_name(&node, position);
        let inner = instantiate(&node, &instance, &template)?;
        out.extend(expand_nodes(inner, registry, depth + 1)?);
    }
    Ok(out)
}

/// Builds the renamed node list of one subgraph instance.
fn instantiate(
    call_site: &NodeConfig,
    instance: &str,
    template: &GraphConfig,
) -> Result<Vec<NodeConfig>> {
    let subgraph = &call_site.calculator;
    let mut names = Renamer::new(instance);
    names.bind(subgraph, "input stream", &template.input_streams, &call_site.input_streams)?;
    names.bind(subgraph, "output stream", &template.output_streams, &call_site.output_streams)?;
    names.bind_side(
        subgraph,
        "input side packet",
        &template.input_side_packets,
        &call_site.input_side_packets,
    )?;
    names.bind_side(
        subgraph,
        "output side packet",
        &template.output_side_packets,
        &call_site.output_side_packets,
    )?;

    let options = merge_options(instance, template.graph_options.as_ref(), call_site)?;

    let mut nodes = Vec::with_capacity(template.nodes.len());
    for (position, inner) in template.nodes.iter().enumerate() {
        let mut node = inner.clone();
        node.name = Some(names.prefixed(&default_node_name(inner, position)));
        node.input_streams = names.rename_streams(&inner.input_streams)?;
        node.output_streams = names.rename_streams(&inner.output_streams)?;
        node.input_side_packets = names.rename_side_packets(&inner.input_side_packets)?;
        node.output_side_packets = names.rename_side_packets(&inner.output_side_packets)?;
        if node.executor.is_none() {
            node.executor.clone_from(&call_site.executor);
        }
        apply_option_values(&mut node, &options)?;
        nodes.push(node);
    }
    Ok(nodes)
}

/// Maps names inside one subgraph instance to names in the enclosing graph.
struct Renamer<'a> {
    instance: &'a str,
    streams: HashMap<String, String>,
    side_packets: HashMap<String, String>,
}

impl<'a> Renamer<'a> {
    fn new(instance: &'a str) -> Self {
        Self { instance, streams: HashMap::new(), side_packets: HashMap::new() }
    }

    fn prefixed(&self, name: &str) -> String {
        format!("{}{SUBGRAPH_NAMESPACE_SEPARATOR}{name}", self.instance)
    }

    fn bind(
        &mut self,
        subgraph: &str,
        kind: &str,
        public: &[String],
        wired: &[String],
    ) -> Result<()> {
        let bindings = match_ports(subgraph, self.instance, kind, public, wired)?;
        self.streams.extend(bindings);
        Ok(())
    }

    fn bind_side(
        &mut self,
        subgraph: &str,
        kind: &str,
        public: &[String],
        wired: &[String],
    ) -> Result<()> {
        let bindings = match_ports(subgraph, self.instance, kind, public, wired)?;
        self.side_packets.extend(bindings);
        Ok(())
    }

    fn rename(&self, map: &HashMap<String, String>, specs: &[String]) -> Result<Vec<String>> {
        specs
            .iter()
            .map(|spec| {
                let parsed = parse_tag_index_name(spec)?;
                let name = map
                    .get(&parsed.name)
                    .cloned()
                    .unwrap_or_else(|| self.prefixed(&parsed.name));
                Ok(TagIndexName { name, ..parsed }.to_spec())
            })
            .collect()
    }

    fn rename_streams(&self, specs: &[String]) -> Result<Vec<String>> {
        self.rename(&self.streams, specs)
    }

    fn rename_side_packets(&self, specs: &[String]) -> Result<Vec<String>> {
        self.rename(&self.side_packets, specs)
    }
}

/// Pairs each public port of a template with the call-site port of the same
/// (tag, index). Public ports left unwired keep a private, prefixed name.
fn match_ports(
    subgraph: &str,
    instance: &str,
    kind: &str,
    public: &[String],
    wired: &[String],
) -> Result<HashMap<String, String>> {
    let key = |spec: &TagIndexName, position: usize| -> (String, usize) {
        if spec.tag.is_empty() {
            (String::new(), position)
        } else {
            (spec.tag.clone(), spec.index.unwrap_or(0))
        }
    };

    let mut call_site = HashMap::new();
    let mut untagged = 0;
    for spec in wired {
        let parsed = parse_tag_index_name(spec)?;
        let position = untagged;
        if parsed.tag.is_empty() {
            untagged += 1;
        }
        call_site.insert(key(&parsed, position), parsed.name);
    }

    let mut bindings = HashMap::new();
    let mut untagged = 0;
    for spec in public {
        let parsed = parse_tag_index_name(spec)?;
        let position = untagged;
        if parsed.tag.is_empty() {
            untagged += 1;
        }
        if let Some(outer) = call_site.remove(&key(&parsed, position)) {
            bindings.insert(parsed.name, outer);
        }
    }

    if let Some(((tag, index), name)) = call_site.into_iter().next() {
        let port = if tag.is_empty() { format!("#{index}") } else { format!("{tag}:{index}") };
        return Err(FlowKitError::Configuration(format!(
            "Node '{instance}' wires {kind} {port} ('{name}') which subgraph '{subgraph}' does not declare"
        )));
    }
    Ok(bindings)
}

/// Shallow-merges call-site options over the template defaults.
///
/// The call site may use any one of the three option forms. Typed blocks are
/// applied in order, so a later `node_options` entry wins over an earlier one.
fn merge_options(
    instance: &str,
    defaults: Option<&Value>,
    call_site: &NodeConfig,
) -> Result<Map<String, Value>> {
    let as_object = |value: Option<&Value>, what: &str| -> Result<Map<String, Value>> {
        match value {
            None | Some(Value::Null) => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(FlowKitError::Configuration(format!(
                "Subgraph instance '{instance}': {what} must be a JSON object"
            ))),
        }
    };

    let sources = [
        call_site.options.is_some(),
        call_site.options_ext.is_some(),
        !call_site.node_options.is_empty(),
    ];
    if sources.iter().filter(|&&set| set).count() > 1 {
        return Err(FlowKitError::Configuration(format!(
            "Subgraph instance '{instance}' specifies options in more than one of options, \
             options_ext and node_options"
        )));
    }

    let mut merged = as_object(defaults, "graph_options")?;
    merged.extend(as_object(call_site.options.as_ref(), "options")?);
    for typed in call_site.options_ext.iter().chain(&call_site.node_options) {
        let what = format!("options of type '{}'", typed.type_key);
        merged.extend(as_object(Some(&typed.value), &what)?);
    }
    Ok(merged)
}

/// Copies bound values from `options` into the node's own options.
///
/// Bindings whose source field is absent are left in place; resolved ones are
/// removed so an enclosing level never applies them twice.
fn apply_option_values(node: &mut NodeConfig, options: &Map<String, Value>) -> Result<()> {
    if node.option_values.is_empty() {
        return Ok(());
    }
    let node_name = node.display_name().to_string();
    let bindings = std::mem::take(&mut node.option_values);
    for (node_field, graph_field) in bindings {
        let Some(value) = options.get(&graph_field) else {
            node.option_values.insert(node_field, graph_field);
            continue;
        };
        let target = match node.options_ext.as_mut() {
            Some(typed) => &mut typed.value,
            None => node.options.get_or_insert_with(|| Value::Object(Map::new())),
        };
        if target.is_null() {
            *target = Value::Object(Map::new());
        }
        let Value::Object(fields) = target else {
            return Err(FlowKitError::Configuration(format!(
                "Node '{node_name}' binds option '{node_field}' but its options are not a JSON object"
            )));
        };
        fields.insert(node_field, value.clone());
    }
    Ok(())
}
