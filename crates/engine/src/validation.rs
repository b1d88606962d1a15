// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Graph validation.
//!
//! [`validate_graph`] turns a graph description into the immutable topology
//! the scheduler runs: subgraphs expanded, nodes named, contracts built, every
//! stream resolved to one producer and its consumers, and an open order that
//! respects stream and side-packet dependencies.

use crate::constants::DEFAULT_EXECUTOR_NAME;
use crate::stream_handler::InputStreamHandler;
use crate::subgraph::{default_node_name, expand_graph};
use flowkit_api::GraphConfig;
use flowkit_core::tag_map::{is_valid_name, parse_tag_index_name};
use flowkit_core::{CalculatorContract, CalculatorRegistry, FlowKitError, PacketType, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Where a stream's packets come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProducer {
    /// Fed by `add_packet_to_input_stream`.
    GraphInput,
    /// Output `output` (dense id) of node `node`.
    Node { node: usize, output: usize },
}

/// One resolved stream.
#[derive(Debug, Clone)]
pub struct ValidatedStream {
    pub name: String,
    pub producer: StreamProducer,
    /// `(node, input id)` of every consumer.
    pub consumers: Vec<(usize, usize)>,
    /// Type declared by the producer; `Any` for graph inputs.
    pub packet_type: PacketType,
}

/// One node with everything the scheduler needs to run it.
#[derive(Debug, Clone)]
pub struct ValidatedNode {
    pub name: String,
    pub contract: Arc<CalculatorContract>,
    pub handler: InputStreamHandler,
    pub executor: String,
    /// Stream index feeding each input id.
    pub input_streams: Vec<usize>,
    /// Stream index fed by each output id.
    pub output_streams: Vec<usize>,
}

impl ValidatedNode {
    pub fn is_source(&self) -> bool {
        self.input_streams.is_empty()
    }
}

/// The checked, fully expanded topology of a graph.
#[derive(Debug, Clone)]
pub struct ValidatedGraph {
    /// The description after subgraph expansion and automatic naming.
    pub config: GraphConfig,
    pub nodes: Vec<ValidatedNode>,
    pub streams: Vec<ValidatedStream>,
    pub stream_index: HashMap<String, usize>,
    /// Stream indices of the graph's input streams.
    pub graph_inputs: Vec<usize>,
    /// Stream indices of the graph's output streams.
    pub graph_outputs: Vec<usize>,
    /// Node indices in an order where producers precede consumers.
    pub open_order: Vec<usize>,
    /// Output side packet name to producing node.
    pub side_packet_producers: HashMap<String, usize>,
    /// Side packets some node consumes that no node produces.
    pub external_side_packets: Vec<String>,
}

impl ValidatedGraph {
    pub fn stream(&self, name: &str) -> Option<&ValidatedStream> {
        self.stream_index.get(name).map(|&i| &self.streams[i])
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    pub fn has_sources(&self) -> bool {
        self.nodes.iter().any(ValidatedNode::is_source)
    }
}

fn port_name(spec: &str) -> Result<String> {
    Ok(parse_tag_index_name(spec)?.name)
}

fn any_type() -> PacketType {
    let mut packet_type = PacketType::default();
    packet_type.set_any();
    packet_type
}

/// Expands and validates `config`.
///
/// `custom_executors` names executors supplied by the embedder; nodes may use
/// those in addition to the ones declared in the description.
///
/// # Errors
///
/// Returns `FlowKitError::Configuration` for structural problems and
/// `FlowKitError::Contract` for contract or edge type mismatches.
pub fn validate_graph(
    config: &GraphConfig,
    registry: &CalculatorRegistry,
    custom_executors: &HashSet<String>,
) -> Result<ValidatedGraph> {
    let mut config = expand_graph(config, registry)?;
    let executors = declared_executors(&config, custom_executors)?;

    // Names and contracts.
    let mut seen = HashSet::new();
    let mut nodes = Vec::with_capacity(config.nodes.len());
    for (position, node) in config.nodes.iter_mut().enumerate() {
        let name = default_node_name(node, position);
        if !is_valid_name(&name) {
            return Err(FlowKitError::Configuration(format!(
                "Node name '{name}' must match [A-Za-z_][A-Za-z0-9_]*"
            )));
        }
        if !seen.insert(name.clone()) {
            return Err(FlowKitError::Configuration(format!("Duplicate node name '{name}'")));
        }
        node.name = Some(name.clone());

        let contract = registry.build_contract(node)?;
        let handler = InputStreamHandler::resolve(
            config.input_stream_handler.as_ref(),
            contract.input_stream_handler(),
        )
        .map_err(|e| FlowKitError::Configuration(format!("Node '{name}': {e}")))?;

        let executor = node.executor.clone().unwrap_or_else(|| DEFAULT_EXECUTOR_NAME.to_string());
        if !executors.contains(&executor) {
            return Err(FlowKitError::Configuration(format!(
                "Node '{name}' uses executor '{executor}' which is not declared"
            )));
        }

        nodes.push(ValidatedNode {
            name,
            contract: Arc::new(contract),
            handler,
            executor,
            input_streams: Vec::new(),
            output_streams: Vec::new(),
        });
    }

    // Producers.
    let mut streams: Vec<ValidatedStream> = Vec::new();
    let mut stream_index: HashMap<String, usize> = HashMap::new();
    let mut add_stream = |name: String, producer: StreamProducer, packet_type: PacketType| {
        if let Some(&existing) = stream_index.get(&name) {
            let describe = |p: &StreamProducer| match p {
                StreamProducer::GraphInput => "the graph input".to_string(),
                StreamProducer::Node { node, .. } => format!("node '{}'", nodes[*node].name),
            };
            let existing: &ValidatedStream = &streams[existing];
            return Err(FlowKitError::Configuration(format!(
                "Stream '{name}' is produced by both {} and {}",
                describe(&existing.producer),
                describe(&producer)
            )));
        }
        stream_index.insert(name.clone(), streams.len());
        streams.push(ValidatedStream { name, producer, consumers: Vec::new(), packet_type });
        Ok(streams.len() - 1)
    };

    let mut graph_inputs = Vec::new();
    for spec in &config.input_streams {
        graph_inputs.push(add_stream(port_name(spec)?, StreamProducer::GraphInput, any_type())?);
    }
    let mut node_outputs = Vec::with_capacity(nodes.len());
    for (index, node) in nodes.iter().enumerate() {
        let types = node.contract.output_types();
        let mut outputs = Vec::with_capacity(types.num_entries());
        for entry in types.tag_map().entries() {
            let packet_type = types.get(entry.id).copied().unwrap_or_default();
            let producer = StreamProducer::Node { node: index, output: entry.id.value() };
            outputs.push(add_stream(entry.name.clone(), producer, packet_type)?);
        }
        node_outputs.push(outputs);
    }
    for (node, outputs) in nodes.iter_mut().zip(node_outputs) {
        node.output_streams = outputs;
    }

    // Consumers and edge types.
    let mut type_issues = Vec::new();
    for index in 0..nodes.len() {
        let contract = Arc::clone(&nodes[index].contract);
        let types = contract.input_types();
        let mut inputs = Vec::with_capacity(types.num_entries());
        for entry in types.tag_map().entries() {
            let Some(&stream) = stream_index.get(&entry.name) else {
                return Err(FlowKitError::Configuration(format!(
                    "Node '{}' consumes stream '{}' which nothing produces",
                    nodes[index].name, entry.name
                )));
            };
            let expected = types.get(entry.id).copied().unwrap_or_default();
            let produced = streams[stream].packet_type;
            if !produced.is_consistent_with(&expected) {
                type_issues.push(format!(
                    "stream '{}' carries {produced} but node '{}' input {} expects {expected}",
                    entry.name,
                    nodes[index].name,
                    types.tag_map().describe(entry.id)
                ));
            }
            streams[stream].consumers.push((index, entry.id.value()));
            inputs.push(stream);
        }
        nodes[index].input_streams = inputs;
    }
    if !type_issues.is_empty() {
        return Err(FlowKitError::contract_issues("edge types", &type_issues));
    }

    let mut graph_outputs = Vec::new();
    for spec in &config.output_streams {
        let name = port_name(spec)?;
        let stream = stream_index.get(&name).copied().ok_or_else(|| {
            FlowKitError::Configuration(format!(
                "Graph output stream '{name}' is not produced by anything"
            ))
        })?;
        graph_outputs.push(stream);
    }

    // Side packets.
    let mut side_packet_producers = HashMap::new();
    for (index, node) in nodes.iter().enumerate() {
        for name in node.contract.output_side_packet_types().tag_map().names() {
            if let Some(previous) = side_packet_producers.insert(name.to_string(), index) {
                return Err(FlowKitError::Configuration(format!(
                    "Side packet '{name}' is produced by both '{}' and '{}'",
                    nodes[previous].name, node.name
                )));
            }
        }
    }
    let mut external_side_packets = Vec::new();
    for node in &nodes {
        for name in node.contract.input_side_packet_types().tag_map().names() {
            if !side_packet_producers.contains_key(name)
                && !external_side_packets.iter().any(|n| n == name)
            {
                external_side_packets.push(name.to_string());
            }
        }
    }
    for spec in &config.output_side_packets {
        let name = port_name(spec)?;
        if !side_packet_producers.contains_key(&name) && !external_side_packets.contains(&name) {
            return Err(FlowKitError::Configuration(format!(
                "Graph output side packet '{name}' is not produced by any node"
            )));
        }
    }

    // Dependency order.
    let mut stream_edges: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for stream in &streams {
        if let StreamProducer::Node { node, .. } = stream.producer {
            stream_edges[node].extend(stream.consumers.iter().map(|&(consumer, _)| consumer));
        }
    }
    if topological_order(&stream_edges).is_none() {
        return Err(FlowKitError::Configuration(
            "Stream topology contains a cycle; back edges are not supported".to_string(),
        ));
    }
    let mut all_edges = stream_edges;
    for (consumer, node) in nodes.iter().enumerate() {
        for name in node.contract.input_side_packet_types().tag_map().names() {
            if let Some(&producer) = side_packet_producers.get(name) {
                all_edges[producer].push(consumer);
            }
        }
    }
    let open_order = topological_order(&all_edges).ok_or_else(|| {
        FlowKitError::Configuration("Side packet dependencies contain a cycle".to_string())
    })?;

    tracing::debug!(
        nodes = nodes.len(),
        streams = streams.len(),
        "Validated graph topology"
    );

    Ok(ValidatedGraph {
        config,
        nodes,
        streams,
        stream_index,
        graph_inputs,
        graph_outputs,
        open_order,
        side_packet_producers,
        external_side_packets,
    })
}

fn declared_executors(
    config: &GraphConfig,
    custom_executors: &HashSet<String>,
) -> Result<HashSet<String>> {
    let mut names: HashSet<String> = custom_executors.clone();
    names.insert(DEFAULT_EXECUTOR_NAME.to_string());
    let mut declared = HashSet::new();
    for executor in &config.executors {
        if !is_valid_name(&executor.name) {
            return Err(FlowKitError::Configuration(format!(
                "Executor name '{}' must match [A-Za-z_][A-Za-z0-9_]*",
                executor.name
            )));
        }
        if !declared.insert(executor.name.clone()) {
            return Err(FlowKitError::Configuration(format!(
                "Executor '{}' is declared twice",
                executor.name
            )));
        }
        if executor.num_threads == Some(0) {
            return Err(FlowKitError::Configuration(format!(
                "Executor '{}' needs at least one thread",
                executor.name
            )));
        }
        names.insert(executor.name.clone());
    }
    Ok(names)
}

/// Kahn's algorithm. Returns `None` when `edges` contain a cycle.
fn topological_order(edges: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut in_degree = vec![0_usize; edges.len()];
    for targets in edges {
        for &target in targets {
            in_degree[target] += 1;
        }
    }
    let mut ready: VecDeque<usize> = (0..edges.len()).filter(|&n| in_degree[n] == 0).collect();
    let mut order = Vec::with_capacity(edges.len());
    while let Some(node) = ready.pop_front() {
        order.push(node);
        for &target in &edges[node] {
            in_degree[target] -= 1;
            if in_degree[target] == 0 {
                ready.push_back(target);
            }
        }
    }
    (order.len() == edges.len()).then_some(order)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flowkit_api::NodeConfig;

    fn registry() -> CalculatorRegistry {
        let mut registry = CalculatorRegistry::new();
        flowkit_nodes::register_nodes(&mut registry);
        registry
    }

    fn validate(config: &GraphConfig) -> Result<ValidatedGraph> {
        validate_graph(config, &registry(), &HashSet::new())
    }

    fn passthrough(input: &str, output: &str) -> NodeConfig {
        NodeConfig::new("PassThroughCalculator").input_stream(input).output_stream(output)
    }

    #[test]
    fn test_linear_graph() {
        let config = GraphConfig::new()
            .input_stream("in")
            .output_stream("out")
            .node(passthrough("mid", "out"))
            .node(passthrough("in", "mid"));
        let graph = validate(&config).unwrap();

        assert_eq!(graph.nodes[0].name, "PassThroughCalculator_0");
        assert_eq!(graph.nodes[1].name, "PassThroughCalculator_1");
        assert_eq!(graph.open_order, vec![1, 0]);
        let mid = graph.stream("mid").unwrap();
        assert_eq!(mid.producer, StreamProducer::Node { node: 1, output: 0 });
        assert_eq!(mid.consumers, vec![(0, 0)]);
        assert!(!graph.has_sources());
    }

    #[test]
    fn test_unproduced_stream() {
        let config = GraphConfig::new().node(passthrough("nowhere", "out"));
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("'nowhere'"), "{err}");
    }

    #[test]
    fn test_double_producer() {
        let config = GraphConfig::new()
            .input_stream("in")
            .node(passthrough("in", "out"))
            .node(passthrough("in", "out"));
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("produced by both"), "{err}");
    }

    #[test]
    fn test_stream_cycle_rejected() {
        let config =
            GraphConfig::new().node(passthrough("a", "b")).node(passthrough("b", "a"));
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("cycle"), "{err}");
    }

    #[test]
    fn test_duplicate_and_invalid_names() {
        let config = GraphConfig::new()
            .input_stream("in")
            .node(passthrough("in", "a").name("same"))
            .node(passthrough("in", "b").name("same"));
        assert!(validate(&config).unwrap_err().to_string().contains("Duplicate node name"));

        let config = GraphConfig::new().input_stream("in").node(passthrough("in", "a").name("9lives"));
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_sources_and_external_side_packets() {
        let config = GraphConfig::new()
            .node(NodeConfig::new("CountingSourceCalculator").output_stream("nums"))
            .node(
                NodeConfig::new("CallbackCalculator")
                    .input_stream("nums")
                    .input_side_packet("CALLBACK:cb"),
            )
            .node(
                NodeConfig::new("SidePacketToStreamCalculator")
                    .input_side_packet("value")
                    .output_stream("AT_ZERO:zero"),
            );
        let graph = validate(&config).unwrap();
        assert!(graph.has_sources());
        assert_eq!(graph.external_side_packets, vec!["cb".to_string(), "value".to_string()]);
    }

    #[test]
    fn test_undeclared_executor() {
        let config = GraphConfig::new().input_stream("in").node(passthrough("in", "out").executor("gpu"));
        assert!(validate(&config).unwrap_err().to_string().contains("'gpu'"));

        let config = config.executor("gpu", Some(1));
        assert_eq!(validate(&config).unwrap().nodes[0].executor, "gpu");

        let mut custom = HashSet::new();
        custom.insert("gpu".to_string());
        let config = GraphConfig::new().input_stream("in").node(passthrough("in", "out").executor("gpu"));
        assert!(validate_graph(&config, &registry(), &custom).is_ok());
    }

    #[test]
    fn test_unknown_handler() {
        let config = GraphConfig::new()
            .input_stream("in")
            .node(passthrough("in", "out").input_stream_handler("NoSuchHandler"));
        assert!(matches!(validate(&config), Err(FlowKitError::Configuration(_))));
    }

    #[test]
    fn test_graph_output_must_exist() {
        let config = GraphConfig::new().input_stream("in").output_stream("missing");
        assert!(validate(&config).is_err());
    }
}
