// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Graphs loaded from YAML and run through the public engine API.

#![allow(clippy::unwrap_used)]

use flowkit_api::GraphConfig;
use flowkit_core::{Packet, Timestamp};
use flowkit_engine::{Engine, RunOutcome};
use std::collections::HashMap;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn test_counting_pipeline_from_yaml() {
    init_tracing();
    let yaml = r"
output_streams: [out]
nodes:
  source:
    calculator: CountingSourceCalculator
    output_streams: [numbers]
    options:
      count: 4
  pass:
    calculator: PassThroughCalculator
    input_streams: [numbers]
    output_streams: [out]
";
    let engine = Engine::new();
    let mut graph = engine.graph();
    graph.initialize(GraphConfig::from_yaml(yaml).unwrap()).unwrap();
    let mut poller = graph.add_output_stream_poller("out").unwrap();

    assert_eq!(graph.run(HashMap::new()).unwrap(), RunOutcome::Completed);

    let mut values = Vec::new();
    while let Some(packet) = poller.next() {
        assert_eq!(packet.timestamp().value(), *packet.get::<i64>().unwrap());
        values.push(*packet.get::<i64>().unwrap());
    }
    assert_eq!(values, vec![0, 1, 2, 3]);
}

#[test]
fn test_immediate_handler_does_not_wait_for_silent_inputs() {
    init_tracing();
    let yaml = r"
input_streams: [a, b]
output_streams: [x, y]
input_stream_handler:
  name: ImmediateInputStreamHandler
nodes:
  - name: pass
    calculator: PassThroughCalculator
    input_streams: [a, b]
    output_streams: [x, y]
";
    let engine = Engine::new();
    let mut graph = engine.graph();
    graph.initialize(GraphConfig::from_yaml(yaml).unwrap()).unwrap();
    let mut x = graph.add_output_stream_poller("x").unwrap();
    let mut y = graph.add_output_stream_poller("y").unwrap();

    graph.start_run(HashMap::new(), HashMap::new()).unwrap();
    graph.add_packet_to_input_stream("a", Packet::new(5_i64).at(Timestamp::new(5))).unwrap();
    graph.wait_until_idle().unwrap();
    let first = x.try_next().unwrap();
    assert_eq!(first.timestamp(), Timestamp::new(5));

    // The other input may still deliver older timestamps.
    graph.add_packet_to_input_stream("b", Packet::new(3_i64).at(Timestamp::new(3))).unwrap();
    graph.wait_until_idle().unwrap();
    assert_eq!(y.try_next().unwrap().timestamp(), Timestamp::new(3));

    graph.close_all_input_streams().unwrap();
    assert_eq!(graph.wait_until_done().unwrap(), RunOutcome::Completed);
}

#[test]
fn test_malformed_yaml_is_reported() {
    let err = GraphConfig::from_yaml("nodes: [").unwrap_err();
    assert!(err.contains("Invalid graph YAML"), "{err}");
}
