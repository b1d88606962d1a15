// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! End-to-end runs of small pipelines.

use super::*;
use crate::{Engine, RunOutcome};
use flowkit_api::{GraphConfig, NodeConfig};
use flowkit_nodes::PacketCallback;
use serde_json::json;
use std::collections::HashMap;

fn counting_pipeline(count: u64) -> GraphConfig {
    GraphConfig::new()
        .node(
            NodeConfig::new("CountingSourceCalculator")
                .name("source")
                .output_stream("numbers")
                .options(json!({ "count": count })),
        )
        .node(
            NodeConfig::new("PassThroughCalculator")
                .name("relay")
                .input_stream("numbers")
                .output_stream("relayed"),
        )
        .node(
            NodeConfig::new("CallbackCalculator")
                .name("callback")
                .input_stream("relayed")
                .input_side_packet("CALLBACK:on_packet"),
        )
}

#[test]
fn test_counting_source_through_pass_through_to_callback() {
    init_tracing();
    let engine = Engine::new();
    let mut graph = engine.graph();
    graph.initialize(counting_pipeline(5)).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: PacketCallback = Arc::new(move |packet: &Packet| {
        sink.lock().push((packet.timestamp().value(), *packet.get::<i64>().unwrap()));
    });
    let side_packets = HashMap::from([("on_packet".to_string(), Packet::new(callback))]);

    assert_eq!(graph.run(side_packets).unwrap(), RunOutcome::Completed);
    assert_eq!(*seen.lock(), vec![(0, 0), (1, 1), (2, 2), (3, 3), (4, 4)]);
    assert!(graph.node_states().values().all(|s| *s == flowkit_core::NodeState::Closed));
}

#[test]
fn test_graph_can_run_twice() {
    init_tracing();
    let engine = Engine::new();
    let mut graph = engine.graph();
    graph.initialize(counting_pipeline(3)).unwrap();
    let relayed = observe(&graph, "relayed");

    for _ in 0..2 {
        let callback: PacketCallback = Arc::new(|_: &Packet| {});
        let side_packets = HashMap::from([("on_packet".to_string(), Packet::new(callback))]);
        assert_eq!(graph.run(side_packets).unwrap(), RunOutcome::Completed);
    }
    assert_eq!(int_values(&relayed.lock()), vec![0, 1, 2, 0, 1, 2]);
}

#[test]
fn test_graph_inputs_reach_poller_in_order() {
    init_tracing();
    let engine = Engine::new();
    let mut graph = engine.graph();
    graph
        .initialize(
            GraphConfig::new().input_stream("in").output_stream("out").node(
                NodeConfig::new("PassThroughCalculator").input_stream("in").output_stream("out"),
            ),
        )
        .unwrap();
    let mut poller = graph.add_output_stream_poller("out").unwrap();

    graph.start_run(HashMap::new(), HashMap::new()).unwrap();
    for ts in [1_i64, 4, 9] {
        graph.add_packet_to_input_stream("in", Packet::new(ts * 10).at(Timestamp::new(ts))).unwrap();
    }
    graph.close_all_input_streams().unwrap();
    assert_eq!(graph.wait_until_done().unwrap(), RunOutcome::Completed);

    let mut received = Vec::new();
    while let Some(packet) = poller.next() {
        received.push(packet);
    }
    assert_eq!(timestamps(&received), vec![1, 4, 9]);
    assert_eq!(int_values(&received), vec![10, 40, 90]);
}

#[test]
fn test_closed_silent_input_still_gets_invocations() {
    init_tracing();
    let (registry, log) = test_registry();
    let mut graph = CalculatorGraph::new(Arc::new(registry));
    graph
        .initialize(
            GraphConfig::new().input_stream("a").input_stream("b").node(
                NodeConfig::new("RecordingCalculator").name("recorder").input_stream("a").input_stream("b"),
            ),
        )
        .unwrap();

    graph.start_run(HashMap::new(), HashMap::new()).unwrap();
    graph.close_input_stream("b").unwrap();
    graph.add_packet_to_input_stream("a", Packet::new(1_i64).at(Timestamp::new(1))).unwrap();
    graph.add_packet_to_input_stream("a", Packet::new(2_i64).at(Timestamp::new(2))).unwrap();
    graph.close_input_stream("a").unwrap();
    graph.wait_until_done().unwrap();

    let processed: Vec<_> = log
        .lock()
        .iter()
        .filter_map(|e| match e {
            Event::Process { timestamp, present, .. } => Some((timestamp.value(), present.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(processed, vec![(1, vec![true, false]), (2, vec![true, false])]);
}

#[test]
fn test_default_handler_aligns_timestamps_across_inputs() {
    init_tracing();
    let (registry, log) = test_registry();
    let mut graph = CalculatorGraph::new(Arc::new(registry));
    graph
        .initialize(
            GraphConfig::new().input_stream("a").input_stream("b").node(
                NodeConfig::new("RecordingCalculator").name("recorder").input_stream("a").input_stream("b"),
            ),
        )
        .unwrap();

    graph.start_run(HashMap::new(), HashMap::new()).unwrap();
    graph.add_packet_to_input_stream("a", Packet::new(1_i64).at(Timestamp::new(1))).unwrap();
    graph.add_packet_to_input_stream("a", Packet::new(3_i64).at(Timestamp::new(3))).unwrap();
    graph.add_packet_to_input_stream("b", Packet::new(3_i64).at(Timestamp::new(3))).unwrap();
    graph.close_all_input_streams().unwrap();
    graph.wait_until_done().unwrap();

    let processed: Vec<_> = log
        .lock()
        .iter()
        .filter_map(|e| match e {
            Event::Process { timestamp, present, .. } => Some((timestamp.value(), present.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(processed, vec![(1, vec![true, false]), (3, vec![true, true])]);
}

#[test]
fn test_side_packets_flow_through_nodes() {
    init_tracing();
    let engine = Engine::new();
    let mut graph = engine.graph();
    graph
        .initialize(
            GraphConfig::new()
                .node(
                    NodeConfig::new("PassThroughCalculator")
                        .name("copy")
                        .input_side_packet("greeting")
                        .output_side_packet("copied"),
                )
                .node(
                    NodeConfig::new("SidePacketToStreamCalculator")
                        .name("to_stream")
                        .input_side_packet("copied")
                        .output_stream("AT_ZERO:stream"),
                ),
        )
        .unwrap();
    let stream = observe(&graph, "stream");

    let side_packets = HashMap::from([("greeting".to_string(), Packet::new("hello".to_string()))]);
    assert_eq!(graph.run(side_packets).unwrap(), RunOutcome::Completed);

    let copied = graph.output_side_packet("copied").unwrap();
    assert_eq!(copied.get::<String>().unwrap(), "hello");
    let packets = stream.lock();
    assert_eq!(timestamps(&packets), vec![0]);
    assert_eq!(packets[0].get::<String>().unwrap(), "hello");
}

#[test]
fn test_subgraph_instances_run_independently() {
    init_tracing();
    let relay = GraphConfig::new()
        .type_name("Relay")
        .input_stream("IN:in")
        .output_stream("OUT:out")
        .node(NodeConfig::new("PassThroughCalculator").name("a").input_stream("in").output_stream("mid"))
        .node(NodeConfig::new("PassThroughCalculator").name("b").input_stream("mid").output_stream("out"));
    let mut registry = CalculatorRegistry::new();
    flowkit_nodes::register_nodes(&mut registry);
    registry.register_subgraph("Relay", relay).unwrap();

    let mut graph = CalculatorGraph::new(Arc::new(registry));
    graph
        .initialize(
            GraphConfig::new()
                .input_stream("src")
                .node(NodeConfig::new("Relay").name("first").input_stream("IN:src").output_stream("OUT:x"))
                .node(NodeConfig::new("Relay").name("second").input_stream("IN:x").output_stream("OUT:y")),
        )
        .unwrap();
    let first_mid = observe(&graph, "first__mid");
    let second_mid = observe(&graph, "second__mid");
    let y = observe(&graph, "y");

    graph.start_run(HashMap::new(), HashMap::new()).unwrap();
    for ts in 0..3_i64 {
        graph.add_packet_to_input_stream("src", Packet::new(ts).at(Timestamp::new(ts))).unwrap();
    }
    graph.close_all_input_streams().unwrap();
    graph.wait_until_done().unwrap();

    assert_eq!(int_values(&first_mid.lock()), vec![0, 1, 2]);
    assert_eq!(int_values(&second_mid.lock()), vec![0, 1, 2]);
    assert_eq!(int_values(&y.lock()), vec![0, 1, 2]);
    assert!(graph.contract("first__a").is_some());
    assert!(graph.contract("second__b").is_some());
}

#[test]
fn test_equal_descriptions_build_equal_contracts() {
    let engine = Engine::new();
    let config = counting_pipeline(4);
    let mut first = engine.graph();
    let mut second = engine.graph();
    first.initialize(config.clone()).unwrap();
    second.initialize(config).unwrap();

    for node in ["source", "relay", "callback"] {
        assert_eq!(first.contract(node).unwrap(), second.contract(node).unwrap(), "{node}");
    }
}

#[test]
fn test_zero_node_graph_finishes_when_inputs_close() {
    let engine = Engine::new();
    let mut graph = engine.graph();
    graph.initialize(GraphConfig::new().input_stream("in").output_stream("in")).unwrap();
    let seen = observe(&graph, "in");

    graph.start_run(HashMap::new(), HashMap::new()).unwrap();
    graph.add_packet_to_input_stream("in", Packet::new(7_i64).at(Timestamp::new(0))).unwrap();
    graph.close_input_stream("in").unwrap();
    assert_eq!(graph.wait_until_done().unwrap(), RunOutcome::Completed);
    assert_eq!(int_values(&seen.lock()), vec![7]);
}
