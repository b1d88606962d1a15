// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Graph services and executors.

use super::*;
use crate::{Executor, RunOutcome, Task, ThreadPoolExecutor};
use flowkit_api::{GraphConfig, NodeConfig};
use flowkit_core::GraphService;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

static GREETING: GraphService<String> = GraphService::new("test.greeting");

/// Copies the greeting service into its output side packet when present.
struct GreeterCalculator;

impl Calculator for GreeterCalculator {
    fn open(&mut self, cc: &mut CalculatorContext) -> Result<()> {
        if let Ok(greeting) = cc.service(&GREETING) {
            cc.output_side_packets().set_tag("", Packet::new(greeting.as_str().to_string()))?;
        }
        Ok(())
    }

    fn process(&mut self, _cc: &mut CalculatorContext) -> Result<ProcessOutcome> {
        Ok(ProcessOutcome::Stop)
    }
}

fn greeter_graph(optional: bool) -> CalculatorGraph {
    let mut registry = CalculatorRegistry::new();
    registry.register_with(
        "GreeterCalculator",
        move |cc| {
            let request = cc.use_service(&GREETING);
            if optional {
                request.optional();
            }
            cc.output_side_packets().index(0).set::<String>().optional();
            Ok(())
        },
        |_cc| Ok(Box::new(GreeterCalculator) as Box<dyn Calculator>),
    );
    let mut graph = CalculatorGraph::new(Arc::new(registry));
    graph
        .initialize(
            GraphConfig::new().node(NodeConfig::new("GreeterCalculator").name("greeter").output_side_packet("greeting")),
        )
        .unwrap();
    graph
}

#[test]
fn test_required_service_must_be_provided() {
    init_tracing();
    let mut graph = greeter_graph(false);
    let err = graph.run(HashMap::new()).unwrap_err();
    assert!(matches!(err, FlowKitError::Service(_)), "{err}");
    assert!(err.to_string().contains("test.greeting"), "{err}");

    graph.set_service_object(&GREETING, Arc::new("hello".to_string())).unwrap();
    assert_eq!(graph.run(HashMap::new()).unwrap(), RunOutcome::Completed);
    assert_eq!(graph.output_side_packet("greeting").unwrap().get::<String>().unwrap(), "hello");
}

#[test]
fn test_optional_service_may_be_absent() {
    init_tracing();
    let graph = greeter_graph(true);
    assert_eq!(graph.run(HashMap::new()).unwrap(), RunOutcome::Completed);
    assert!(graph.output_side_packet("greeting").is_err());
}

/// Forwards to a thread pool and counts scheduled tasks.
struct CountingExecutor {
    inner: ThreadPoolExecutor,
    scheduled: AtomicUsize,
}

impl Executor for CountingExecutor {
    fn schedule(&self, task: Task) {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        self.inner.schedule(task);
    }
}

#[test]
fn test_custom_executor_runs_tasks() {
    init_tracing();
    let executor = Arc::new(CountingExecutor {
        inner: ThreadPoolExecutor::new("custom", 1).unwrap(),
        scheduled: AtomicUsize::new(0),
    });
    let (registry, _log) = test_registry();
    let mut graph = CalculatorGraph::new(Arc::new(registry));
    graph.set_executor("custom", Arc::clone(&executor) as Arc<dyn Executor>).unwrap();
    graph
        .initialize(
            GraphConfig::new()
                .node(
                    NodeConfig::new("CountingSourceCalculator")
                        .name("source")
                        .output_stream("numbers")
                        .executor("custom")
                        .options(json!({ "count": 3 })),
                )
                .node(NodeConfig::new("SinkCalculator").input_stream("numbers")),
        )
        .unwrap();

    assert_eq!(graph.run(HashMap::new()).unwrap(), RunOutcome::Completed);
    // Three packets, the stop and the close.
    assert!(executor.scheduled.load(Ordering::SeqCst) >= 5);
}

#[test]
fn test_declared_executor_is_created() {
    init_tracing();
    let (registry, _log) = test_registry();
    let mut graph = CalculatorGraph::new(Arc::new(registry));
    graph
        .initialize(
            GraphConfig::new()
                .executor("io", Some(1))
                .input_stream("in")
                .output_stream("out")
                .node(NodeConfig::new("PassThroughCalculator").input_stream("in").output_stream("out").executor("io")),
        )
        .unwrap();
    let out = observe(&graph, "out");

    graph.start_run(HashMap::new(), HashMap::new()).unwrap();
    graph.add_packet_to_input_stream("in", Packet::new(1_i64).at(Timestamp::new(1))).unwrap();
    graph.close_all_input_streams().unwrap();
    graph.wait_until_done().unwrap();
    assert_eq!(int_values(&out.lock()), vec![1]);
}

#[test]
fn test_undeclared_executor_is_rejected() {
    let (registry, _log) = test_registry();
    let mut graph = CalculatorGraph::new(Arc::new(registry));
    let err = graph
        .initialize(GraphConfig::new().input_stream("in").node(
            NodeConfig::new("SinkCalculator").input_stream("in").executor("missing"),
        ))
        .unwrap_err();
    assert!(matches!(err, FlowKitError::Configuration(_)), "{err}");
}
