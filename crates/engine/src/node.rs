// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-node runtime state and the lifecycle driver.
//!
//! A [`NodeRuntime`] lives as long as the graph. The calculator instance and
//! its [`CalculatorContext`] are recreated for every run and owned by whichever
//! worker currently runs the node; the scheduler guarantees that is at most one.

use crate::executor::Executor;
use crate::input_stream::InputStreamQueue;
use crate::stream_handler::{InputStreamHandler, Readiness};
use crate::validation::{StreamProducer, ValidatedNode, ValidatedStream};
use flowkit_core::{
    Calculator, CalculatorContext, CalculatorContract, NodeState, Packet, PacketSet, ProcessOutcome,
    Result, Timestamp,
};
use opentelemetry::metrics::Histogram;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Whether the node has a task queued or running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskPhase {
    Idle,
    Scheduled,
    Running,
}

/// Where the node is in the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    NotOpened,
    Opened,
    Closed,
}

/// Scheduling bookkeeping, guarded by one mutex per node.
#[derive(Debug)]
pub(crate) struct SchedState {
    pub phase: TaskPhase,
    pub lifecycle: Lifecycle,
    /// The calculator returned `Stop`; only `close` remains.
    pub stopped: bool,
    /// Offset declared in `open`, if any.
    pub offset: Option<i64>,
    /// Highest bound already propagated through the offset.
    pub propagated: Timestamp,
}

impl SchedState {
    const fn new() -> Self {
        Self {
            phase: TaskPhase::Idle,
            lifecycle: Lifecycle::NotOpened,
            stopped: false,
            offset: None,
            propagated: Timestamp::UNSET,
        }
    }
}

/// The next thing a node task will do.
#[derive(Debug)]
pub(crate) enum Action {
    Process { timestamp: Timestamp, inputs: PacketSet },
    ProcessSource,
    PropagateBound(Timestamp),
    Close,
}

/// The calculator and its context for one run.
pub(crate) struct NodeExec {
    pub calculator: Box<dyn Calculator>,
    pub context: CalculatorContext,
}

/// Packets and the new bound for one output stream after an invocation.
#[derive(Debug)]
pub(crate) struct OutputBatch {
    pub stream: usize,
    pub packets: Vec<Packet>,
    pub bound: Timestamp,
}

/// Lifecycle method being invoked, for spans and metrics.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Method {
    Open,
    Process,
    Close,
}

impl Method {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Process => "process",
            Self::Close => "close",
        }
    }
}

pub(crate) struct NodeRuntime {
    pub name: String,
    pub calculator: String,
    pub contract: Arc<CalculatorContract>,
    pub handler: InputStreamHandler,
    pub executor_name: String,
    pub input_streams: Vec<usize>,
    pub output_streams: Vec<usize>,
    pub sched: Mutex<SchedState>,
    pub queues: Mutex<Vec<InputStreamQueue>>,
    pub exec: Mutex<Option<NodeExec>>,
    pub state: Mutex<NodeState>,
    pub executor: Mutex<Option<Arc<dyn Executor>>>,
}

impl NodeRuntime {
    pub fn new(node: &ValidatedNode, streams: &[ValidatedStream]) -> Self {
        let queues = node
            .input_streams
            .iter()
            .map(|&stream| {
                let stream = &streams[stream];
                InputStreamQueue::new(&stream.name, stream.producer == StreamProducer::GraphInput)
            })
            .collect();
        Self {
            name: node.name.clone(),
            calculator: node.contract.calculator().to_string(),
            contract: Arc::clone(&node.contract),
            handler: node.handler,
            executor_name: node.executor.clone(),
            input_streams: node.input_streams.clone(),
            output_streams: node.output_streams.clone(),
            sched: Mutex::new(SchedState::new()),
            queues: Mutex::new(queues),
            exec: Mutex::new(None),
            state: Mutex::new(NodeState::Ready),
            executor: Mutex::new(None),
        }
    }

    pub fn is_source(&self) -> bool {
        self.input_streams.is_empty()
    }

    /// Clears per-run state before a new run.
    pub fn reset(&self) {
        *self.sched.lock() = SchedState::new();
        for queue in self.queues.lock().iter_mut() {
            queue.reset();
        }
        *self.exec.lock() = None;
    }

    /// Picks the next action, consuming inputs for a `Process` action.
    ///
    /// Must be called with `sched` locked. Returns the action and whether a
    /// bounded (graph input) queue shrank.
    pub fn next_action(&self, sched: &mut SchedState, aborting: bool) -> (Option<Action>, bool) {
        if sched.lifecycle != Lifecycle::Opened {
            return (None, false);
        }
        if aborting || sched.stopped {
            return (Some(Action::Close), false);
        }
        if self.is_source() {
            return (Some(Action::ProcessSource), false);
        }

        let mut queues = self.queues.lock();
        match self.handler.readiness(&queues) {
            Readiness::Done => (Some(Action::Close), false),
            Readiness::Ready(timestamp) => {
                let drained_bounded = queues
                    .iter()
                    .any(|q| q.is_bounded() && q.front_timestamp() == Some(timestamp));
                let inputs =
                    self.handler.take(timestamp, &mut queues, self.contract.input_types().tag_map());
                (Some(Action::Process { timestamp, inputs }), drained_bounded)
            },
            Readiness::NotReady => {
                let Some(offset) = sched.offset else {
                    return (None, false);
                };
                let settled = self.handler.settled_bound(&queues);
                let bound = offset_bound(settled, offset);
                if bound.is_range_value() && bound > sched.propagated {
                    sched.propagated = bound;
                    (Some(Action::PropagateBound(bound)), false)
                } else {
                    (None, false)
                }
            },
        }
    }
}

/// Lowest output timestamp still possible when no input below `settled` can
/// arrive and outputs are always `input + offset`.
pub(crate) fn offset_bound(settled: Timestamp, offset: i64) -> Timestamp {
    if settled.is_range_value() {
        let value = settled.value().saturating_add(offset);
        if value < Timestamp::MIN.value() {
            Timestamp::MIN
        } else if value > Timestamp::MAX.value() {
            Timestamp::POST_STREAM
        } else {
            Timestamp::new(value)
        }
    } else {
        settled
    }
}

impl NodeExec {
    /// Runs one lifecycle method inside the node's span and records its
    /// duration.
    pub fn invoke(
        &mut self,
        node: &NodeRuntime,
        method: Method,
        histogram: &Histogram<f64>,
    ) -> Result<ProcessOutcome> {
        let span = tracing::info_span!(
            "node_run",
            node.name = %node.name,
            node.calculator = %node.calculator,
            method = method.as_str()
        );
        let _entered = span.enter();

        let start_time = Instant::now();
        let result = match method {
            Method::Open => {
                self.context.allow_headers(true);
                let result = self.calculator.open(&mut self.context);
                self.context.allow_headers(false);
                result.map(|()| ProcessOutcome::Continue)
            },
            Method::Process => self.calculator.process(&mut self.context),
            Method::Close => {
                self.calculator.close(&mut self.context).map(|()| ProcessOutcome::Continue)
            },
        };
        let duration = start_time.elapsed();

        let status = if result.is_ok() { "ok" } else { "error" };
        let labels = [
            KeyValue::new("node.name", node.name.clone()),
            KeyValue::new("node.calculator", node.calculator.clone()),
            KeyValue::new("method", method.as_str()),
            KeyValue::new("status", status),
        ];
        histogram.record(duration.as_secs_f64(), &labels);

        if let Err(e) = &result {
            tracing::error!(error = %e, "Calculator {} failed", method.as_str());
        }
        result.map_err(|e| e.in_node(&node.name))
    }

    /// Moves everything the last invocation emitted out of the output shards.
    ///
    /// `floor` raises each stream's bound, for nodes with a timestamp offset.
    pub fn drain_outputs(&mut self, output_streams: &[usize], floor: Timestamp) -> Vec<OutputBatch> {
        self.context
            .outputs()
            .iter_mut()
            .zip(output_streams)
            .map(|(shard, &stream)| OutputBatch {
                stream,
                packets: shard.take_packets(),
                bound: shard.next_timestamp_bound().max(floor),
            })
            .collect()
    }

    /// Closes every output shard and drains what is left.
    pub fn finish_outputs(&mut self, output_streams: &[usize]) -> Vec<OutputBatch> {
        self.context.outputs().close_all();
        self.drain_outputs(output_streams, Timestamp::DONE)
    }
}
