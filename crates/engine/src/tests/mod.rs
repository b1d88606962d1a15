// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Tests that run whole graphs through the scheduler.
//!
//! [`RecordingCalculator`] records every lifecycle call into a shared
//! [`EventLog`] and forwards its first input to its first output, with an
//! optional delay and injected failures.

#![allow(clippy::unwrap_used)]

mod pipeline;
mod services;

use crate::CalculatorGraph;
use flowkit_core::{
    Calculator, CalculatorContext, CalculatorContract, CalculatorRegistry, FlowKitError,
    NodeOptions, Packet, ProcessOutcome, Result, Timestamp,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(super) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Event {
    Open(String),
    Process { node: String, timestamp: Timestamp, present: Vec<bool> },
    Processed { node: String, timestamp: Timestamp },
    Close(String),
}

pub(super) type EventLog = Arc<Mutex<Vec<Event>>>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct RecordingOptions {
    delay_ms: u64,
    fail_open: bool,
    fail_at: Option<i64>,
}

impl NodeOptions for RecordingOptions {
    const TYPE_KEY: &'static str = "flowkit.test.RecordingOptions";
}

struct RecordingCalculator {
    node: String,
    options: RecordingOptions,
    log: EventLog,
}

impl Calculator for RecordingCalculator {
    fn open(&mut self, _cc: &mut CalculatorContext) -> Result<()> {
        self.log.lock().push(Event::Open(self.node.clone()));
        if self.options.fail_open {
            return Err(FlowKitError::Runtime("recorder refused to open".to_string()));
        }
        Ok(())
    }

    fn process(&mut self, cc: &mut CalculatorContext) -> Result<ProcessOutcome> {
        if cc.inputs().num_entries() == 0 {
            return Ok(ProcessOutcome::Stop);
        }
        let timestamp = cc.input_timestamp();
        let present = cc.inputs().iter().map(|(_, p)| !p.is_empty()).collect();
        self.log.lock().push(Event::Process { node: self.node.clone(), timestamp, present });

        if self.options.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.options.delay_ms));
        }
        if self.options.fail_at == Some(timestamp.value()) {
            return Err(FlowKitError::Runtime(format!("recorder failed at {timestamp}")));
        }

        let first = cc.inputs().iter().find(|(_, p)| !p.is_empty()).map(|(_, p)| p.clone());
        if let (Some(packet), false) = (first, cc.outputs().is_empty()) {
            cc.outputs().index(0)?.add_packet(packet)?;
        }
        self.log.lock().push(Event::Processed { node: self.node.clone(), timestamp });
        Ok(ProcessOutcome::Continue)
    }

    fn close(&mut self, _cc: &mut CalculatorContext) -> Result<()> {
        self.log.lock().push(Event::Close(self.node.clone()));
        Ok(())
    }
}

fn any_port_contract(cc: &mut CalculatorContract) -> Result<()> {
    let inputs: Vec<_> = cc.input_types().iter().map(|(id, _)| id).collect();
    for id in inputs {
        if let Some(slot) = cc.inputs().by_id(id) {
            slot.set_any();
        }
    }
    let outputs: Vec<_> = cc.output_types().iter().map(|(id, _)| id).collect();
    for id in outputs {
        if let Some(slot) = cc.outputs().by_id(id) {
            slot.set_any();
        }
    }
    Ok(())
}

/// Built-in calculators plus `RecordingCalculator` and `IntSinkCalculator`
/// (one `i64` input).
pub(super) fn test_registry() -> (CalculatorRegistry, EventLog) {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let mut registry = CalculatorRegistry::new();
    flowkit_nodes::register_nodes(&mut registry);

    let recorder_log = Arc::clone(&log);
    registry.register_with("RecordingCalculator", any_port_contract, move |cc| {
        Ok(Box::new(RecordingCalculator {
            node: cc.node_name().to_string(),
            options: cc.options_map().get_or_default()?,
            log: Arc::clone(&recorder_log),
        }) as Box<dyn Calculator>)
    });

    registry.register_with(
        "IntSinkCalculator",
        |cc| {
            cc.inputs().index(0).set::<i64>();
            Ok(())
        },
        |_cc| Ok(Box::new(flowkit_nodes::core::sink::SinkCalculator::default()) as Box<dyn Calculator>),
    );

    (registry, log)
}

/// Collects every packet of stream `name` through an observer.
pub(super) fn observe(graph: &CalculatorGraph, name: &str) -> Arc<Mutex<Vec<Packet>>> {
    let packets = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&packets);
    graph
        .observe_output_stream(name, move |packet| {
            sink.lock().push(packet.clone());
            Ok(())
        })
        .unwrap();
    packets
}

pub(super) fn int_values(packets: &[Packet]) -> Vec<i64> {
    packets.iter().map(|p| *p.get::<i64>().unwrap()).collect()
}

pub(super) fn timestamps(packets: &[Packet]) -> Vec<i64> {
    packets.iter().map(|p| p.timestamp().value()).collect()
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub(super) fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

pub(super) fn count_events(log: &EventLog, matches: impl Fn(&Event) -> bool) -> usize {
    log.lock().iter().filter(|e| matches(e)).count()
}
