// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The scheduler: shared run state, task dispatch and packet propagation.
//!
//! Every node has at most one task queued or running at a time. A task runs
//! one action (one `process` call, one bound propagation or the final
//! `close`), publishes the outputs to the consumer queues and then re-checks
//! whether the node is ready again. Producers that find a consumer idle
//! check its readiness themselves, so no wake-up is lost.
//!
//! Lock order: node `sched` before node `queues`; `space` before node
//! `queues`; `run` before stream `pollers`. No lock is held while a calculator
//! method runs except the node's own `exec` lock.

use crate::executor::{Executor, Task};
use crate::node::{offset_bound, Action, Lifecycle, Method, NodeExec, NodeRuntime, OutputBatch, SchedState, TaskPhase};
use crate::stream_handler::InputStreamHandler;
use crate::validation::{StreamProducer, ValidatedGraph};
use flowkit_core::state::state_helpers;
use flowkit_core::{
    Calculator, CalculatorContext, CollectionItemId, FlowKitError, NodeState, NodeStateUpdate,
    Packet, PacketSet, PacketType, ProcessOutcome, Result, ServiceMap, Timestamp, fill_packet_set,
};
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::{global, KeyValue};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Callback invoked for every packet of an observed stream.
pub type StreamCallback = Arc<dyn Fn(&Packet) -> Result<()> + Send + Sync>;

/// Observation points and propagation state of one stream.
pub(crate) struct StreamRuntime {
    pub name: String,
    pub consumers: Vec<(usize, usize)>,
    pub bound: Mutex<Timestamp>,
    pub header: Mutex<Option<Packet>>,
    pub observers: Mutex<Vec<StreamCallback>>,
    pub pollers: Mutex<Vec<mpsc::UnboundedSender<Packet>>>,
}

/// Admission state of one graph input stream.
pub(crate) struct GraphInputState {
    pub stream: usize,
    pub next_allowed: Timestamp,
    pub emitted_any: bool,
    pub closed: bool,
    /// Declared type of every consumer, labelled for error messages.
    pub consumer_types: Vec<(String, PacketType)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunPhase {
    NotStarted,
    Running,
    Finished,
}

pub(crate) struct RunState {
    pub phase: RunPhase,
    pub open_nodes: usize,
    pub error: Option<FlowKitError>,
    pub cancelled: bool,
}

pub(crate) struct GraphMetrics {
    pub invocation_duration: Histogram<f64>,
    pub packets_added: Counter<u64>,
}

impl GraphMetrics {
    fn new() -> Self {
        let meter = global::meter("flowkit_engine");
        Self {
            invocation_duration: meter
                .f64_histogram("node.process.duration")
                .with_description("Duration of calculator open, process and close calls")
                .with_unit("s")
                .build(),
            packets_added: meter
                .u64_counter("graph.packets.added")
                .with_description("Packets added to graph input streams")
                .build(),
        }
    }
}

/// Everything the worker tasks of one graph share.
pub(crate) struct GraphShared {
    pub nodes: Vec<NodeRuntime>,
    pub streams: Vec<StreamRuntime>,
    pub inputs: HashMap<String, Mutex<GraphInputState>>,
    pub has_sources: bool,
    pub max_queue_size: usize,
    pub run: Mutex<RunState>,
    pub run_cv: Condvar,
    pub in_flight: AtomicUsize,
    pub abort: Mutex<CancellationToken>,
    pub scheduling: AtomicBool,
    pub space: Mutex<()>,
    pub space_cv: Condvar,
    pub side_packets: Mutex<HashMap<String, Packet>>,
    pub subscribers: Mutex<Vec<mpsc::Sender<NodeStateUpdate>>>,
    pub metrics: GraphMetrics,
}

impl GraphShared {
    pub fn new(topology: &ValidatedGraph, max_queue_size: usize) -> Self {
        let nodes: Vec<NodeRuntime> =
            topology.nodes.iter().map(|n| NodeRuntime::new(n, &topology.streams)).collect();
        let streams = topology
            .streams
            .iter()
            .map(|s| StreamRuntime {
                name: s.name.clone(),
                consumers: s.consumers.clone(),
                bound: Mutex::new(Timestamp::PRE_STREAM),
                header: Mutex::new(None),
                observers: Mutex::new(Vec::new()),
                pollers: Mutex::new(Vec::new()),
            })
            .collect();
        let inputs = topology
            .graph_inputs
            .iter()
            .map(|&stream| {
                let validated = &topology.streams[stream];
                debug_assert_eq!(validated.producer, StreamProducer::GraphInput);
                let consumer_types = validated
                    .consumers
                    .iter()
                    .map(|&(node, input)| {
                        let types = topology.nodes[node].contract.input_types();
                        let id = CollectionItemId::new(input);
                        let label =
                            format!("node '{}' input {}", nodes[node].name, types.tag_map().describe(id));
                        (label, types.get(id).copied().unwrap_or_default())
                    })
                    .collect();
                let state = GraphInputState {
                    stream,
                    next_allowed: Timestamp::PRE_STREAM,
                    emitted_any: false,
                    closed: false,
                    consumer_types,
                };
                (validated.name.clone(), Mutex::new(state))
            })
            .collect();

        Self {
            nodes,
            streams,
            inputs,
            has_sources: topology.has_sources(),
            max_queue_size,
            run: Mutex::new(RunState {
                phase: RunPhase::NotStarted,
                open_nodes: 0,
                error: None,
                cancelled: false,
            }),
            run_cv: Condvar::new(),
            in_flight: AtomicUsize::new(0),
            abort: Mutex::new(CancellationToken::new()),
            scheduling: AtomicBool::new(false),
            space: Mutex::new(()),
            space_cv: Condvar::new(),
            side_packets: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            metrics: GraphMetrics::new(),
        }
    }

    // --- Run state ---

    pub fn is_running(&self) -> bool {
        self.run.lock().phase == RunPhase::Running
    }

    pub fn aborting(&self) -> bool {
        self.abort.lock().is_cancelled()
    }

    /// Resets all per-run state. Fails if a run is in progress.
    pub fn begin_run(&self, side_packets: HashMap<String, Packet>) -> Result<()> {
        let mut run = self.run.lock();
        if run.phase == RunPhase::Running {
            return Err(FlowKitError::InvalidState(
                "A run is already in progress; call wait_until_done first".to_string(),
            ));
        }
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            self.run_cv.wait(&mut run);
        }

        self.scheduling.store(false, Ordering::SeqCst);
        *self.abort.lock() = CancellationToken::new();
        for node in &self.nodes {
            node.reset();
            self.set_state(node, NodeState::Ready);
        }
        for stream in &self.streams {
            *stream.bound.lock() = Timestamp::PRE_STREAM;
            *stream.header.lock() = None;
        }
        for input in self.inputs.values() {
            let mut input = input.lock();
            input.next_allowed = Timestamp::PRE_STREAM;
            input.emitted_any = false;
            input.closed = false;
        }
        *self.side_packets.lock() = side_packets;

        run.phase = RunPhase::Running;
        run.open_nodes = self.nodes.len();
        run.error = None;
        run.cancelled = false;
        Ok(())
    }

    /// Ends a run whose nodes could not all be opened.
    pub fn fail_start(&self, error: FlowKitError) {
        let mut run = self.run.lock();
        run.error = Some(error);
        run.open_nodes = 0;
        self.finish_locked(&mut run);
    }

    /// Lets tasks run and schedules every node once.
    pub fn enable_scheduling(self: &Arc<Self>) {
        self.scheduling.store(true, Ordering::SeqCst);
        for index in 0..self.nodes.len() {
            self.schedule_if_ready(index);
        }
        self.finish_if_empty();
    }

    /// A graph without nodes is done once its inputs are closed.
    pub fn finish_if_empty(&self) {
        if !self.nodes.is_empty() || self.inputs.values().any(|i| !i.lock().closed) {
            return;
        }
        let mut run = self.run.lock();
        if run.phase == RunPhase::Running {
            self.finish_locked(&mut run);
        }
    }

    fn finish_locked(&self, run: &mut RunState) {
        run.phase = RunPhase::Finished;
        for stream in &self.streams {
            stream.pollers.lock().clear();
        }
        match &run.error {
            Some(e) => tracing::warn!(error = %e, "Graph run finished with an error"),
            None if run.cancelled => tracing::info!("Graph run cancelled"),
            None => tracing::info!("Graph run completed"),
        }
        self.run_cv.notify_all();
    }

    fn node_closed(&self) {
        let mut run = self.run.lock();
        run.open_nodes = run.open_nodes.saturating_sub(1);
        if run.open_nodes == 0 && run.phase == RunPhase::Running {
            self.finish_locked(&mut run);
        }
    }

    /// Keeps the first error of the run and aborts it.
    pub fn record_error(self: &Arc<Self>, error: FlowKitError) {
        {
            let mut run = self.run.lock();
            if run.error.is_none() {
                tracing::error!(error = %error, "Graph run failed");
                run.error = Some(error);
            } else {
                tracing::warn!(error = %error, "Additional error after the run already failed");
            }
        }
        self.abort_run();
    }

    pub fn cancel(self: &Arc<Self>) {
        {
            let mut run = self.run.lock();
            if run.phase != RunPhase::Running {
                return;
            }
            run.cancelled = true;
        }
        tracing::info!("Cancelling graph run");
        self.abort_run();
    }

    fn abort_run(self: &Arc<Self>) {
        self.abort.lock().cancel();
        self.notify_space();
        for index in 0..self.nodes.len() {
            self.schedule_if_ready(index);
        }
    }

    /// Error returned to callers that try to feed an aborted run.
    pub fn abort_error(&self) -> FlowKitError {
        let run = self.run.lock();
        match &run.error {
            Some(e) => FlowKitError::InvalidState(format!("The run failed: {e}")),
            None => FlowKitError::InvalidState("The run was cancelled".to_string()),
        }
    }

    pub fn has_error(&self) -> bool {
        self.run.lock().error.is_some()
    }

    // --- Node state ---

    pub fn set_state(&self, node: &NodeRuntime, state: NodeState) {
        let mut current = node.state.lock();
        if *current == state {
            return;
        }
        if !current.can_transition_to(&state) {
            tracing::debug!(node = %node.name, from = %*current, to = %state, "Unusual state transition");
        }
        *current = state.clone();
        drop(current);

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        for tx in subscribers.iter() {
            state_helpers::emit_state(tx, &node.name, state.clone());
        }
    }

    // --- Scheduling ---

    /// Schedules node `index` if it is idle and has something to do.
    pub fn schedule_if_ready(self: &Arc<Self>, index: usize) {
        if !self.scheduling.load(Ordering::SeqCst) {
            return;
        }
        let task = {
            let mut sched = self.nodes[index].sched.lock();
            if sched.phase != TaskPhase::Idle {
                return;
            }
            self.prepare(index, &mut sched)
        };
        if let Some((executor, task)) = task {
            executor.schedule(task);
        }
    }

    /// Picks the node's next action and wraps it in a task. Called with the
    /// node's `sched` lock held and its phase `Idle`.
    fn prepare(
        self: &Arc<Self>,
        index: usize,
        sched: &mut SchedState,
    ) -> Option<(Arc<dyn Executor>, Task)> {
        let node = &self.nodes[index];
        let (action, freed_space) = node.next_action(sched, self.aborting());
        if freed_space {
            self.notify_space();
        }
        let action = action?;
        let Some(executor) = node.executor.lock().clone() else {
            tracing::error!(node = %node.name, "Node has no executor; dropping task");
            return None;
        };
        sched.phase = TaskPhase::Scheduled;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::clone(self);
        Some((executor, Box::new(move || shared.run_task(index, action))))
    }

    fn run_task(self: &Arc<Self>, index: usize, action: Action) {
        let node = &self.nodes[index];
        node.sched.lock().phase = TaskPhase::Running;

        let action = match action {
            Action::Process { .. } | Action::ProcessSource if self.aborting() => Action::Close,
            other => other,
        };
        match action {
            Action::Process { timestamp, inputs } => self.run_process(index, Some((timestamp, inputs))),
            Action::ProcessSource => self.run_process(index, None),
            Action::PropagateBound(bound) => {
                for &stream in &node.output_streams {
                    self.publish(stream, Vec::new(), bound);
                }
            },
            Action::Close => {
                self.run_close(index);
                self.node_closed();
            },
        }

        let next = {
            let mut sched = node.sched.lock();
            sched.phase = TaskPhase::Idle;
            self.prepare(index, &mut sched)
        };
        if let Some((executor, task)) = next {
            executor.schedule(task);
        }

        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _run = self.run.lock();
            self.run_cv.notify_all();
        }
    }

    fn run_process(self: &Arc<Self>, index: usize, inputs: Option<(Timestamp, PacketSet)>) {
        let node = &self.nodes[index];
        let (result, batches, floor) = {
            let mut guard = node.exec.lock();
            let Some(exec) = guard.as_mut() else {
                return self.record_error(
                    FlowKitError::InvalidState("process scheduled before open".to_string())
                        .in_node(&node.name),
                );
            };
            let timestamp = match inputs {
                Some((timestamp, set)) => {
                    exec.context.set_inputs(timestamp, set);
                    Some(timestamp)
                },
                None => {
                    exec.context.clear_inputs();
                    None
                },
            };
            // Only the default handler guarantees later input sets are newer.
            let floor = match (timestamp, exec.context.offset()) {
                (Some(ts), Some(offset))
                    if ts.is_range_value() && node.handler == InputStreamHandler::Default =>
                {
                    offset_bound(ts.successor(), offset)
                },
                _ => Timestamp::UNSET,
            };

            self.set_state(node, NodeState::Processing);
            let result = exec.invoke(node, Method::Process, &self.metrics.invocation_duration);
            let batches = exec.drain_outputs(&node.output_streams, floor);
            (result, batches, floor)
        };

        {
            let mut sched = node.sched.lock();
            if floor > sched.propagated {
                sched.propagated = floor;
            }
            if result == Ok(ProcessOutcome::Stop) {
                sched.stopped = true;
            }
        }
        match result {
            Ok(outcome) => {
                if outcome == ProcessOutcome::Stop {
                    tracing::debug!(node = %node.name, "Node requested stop");
                }
                self.set_state(node, NodeState::Opened);
            },
            Err(e) => {
                self.set_state(node, NodeState::Failed { reason: e.to_string() });
                self.record_error(e);
            },
        }
        self.publish_batches(batches);
    }

    /// Runs `close`, flushes and closes the outputs, and stops accepting input.
    pub fn run_close(self: &Arc<Self>, index: usize) {
        let node = &self.nodes[index];
        let batches = {
            let mut guard = node.exec.lock();
            match guard.as_mut() {
                Some(exec) => {
                    exec.context.clear_inputs();
                    if let Err(e) = exec.invoke(node, Method::Close, &self.metrics.invocation_duration) {
                        self.set_state(node, NodeState::Failed { reason: e.to_string() });
                        self.record_error(e);
                    }
                    self.collect_side_packets(&mut exec.context);
                    exec.finish_outputs(&node.output_streams)
                },
                None => Vec::new(),
            }
        };

        let had_bounded = {
            let mut queues = node.queues.lock();
            let had_bounded = queues.iter().any(|q| q.is_bounded() && !q.is_empty());
            for queue in queues.iter_mut() {
                queue.discard();
            }
            had_bounded
        };
        if had_bounded {
            self.notify_space();
        }

        self.publish_batches(batches);
        node.sched.lock().lifecycle = Lifecycle::Closed;
        self.set_state(node, NodeState::Closed);
        tracing::debug!(node = %node.name, "Node closed");
    }

    /// Opens node `index` on the calling thread.
    pub fn open_node(
        self: &Arc<Self>,
        index: usize,
        calculator: Box<dyn Calculator>,
        services: ServiceMap,
    ) -> Result<()> {
        let node = &self.nodes[index];
        let side_packets = {
            let provided = self.side_packets.lock();
            fill_packet_set("input side packet", node.contract.input_side_packet_types(), &provided)
        }
        .map_err(|e| match e {
            FlowKitError::Contract(message) => {
                FlowKitError::Contract(format!("Node '{}': {message}", node.name))
            },
            other => other,
        })?;

        let tag_map = node.contract.input_types().tag_map();
        let mut headers = PacketSet::new(Arc::clone(tag_map));
        for (id, &stream) in node.input_streams.iter().enumerate() {
            if let Some(header) = self.streams[stream].header.lock().clone() {
                headers.set(CollectionItemId::new(id), header)?;
            }
        }

        let context =
            CalculatorContext::new(Arc::clone(&node.contract), side_packets, headers, services);
        let mut exec = NodeExec { calculator, context };
        if let Err(e) = exec.invoke(node, Method::Open, &self.metrics.invocation_duration) {
            self.set_state(node, NodeState::Failed { reason: e.to_string() });
            return Err(e);
        }

        for (shard, &stream) in exec.context.outputs().iter().zip(&node.output_streams) {
            if let Some(header) = shard.header() {
                *self.streams[stream].header.lock() = Some(header.clone());
            }
        }
        self.collect_side_packets(&mut exec.context);
        let offset = exec.context.offset();
        let batches = exec.drain_outputs(&node.output_streams, Timestamp::UNSET);

        {
            let mut sched = node.sched.lock();
            sched.lifecycle = Lifecycle::Opened;
            sched.offset = offset;
        }
        *node.exec.lock() = Some(exec);
        self.set_state(node, NodeState::Opened);
        self.publish_batches(batches);
        tracing::debug!(node = %node.name, "Node opened");
        Ok(())
    }

    fn collect_side_packets(&self, context: &mut CalculatorContext) {
        let mut side_packets = self.side_packets.lock();
        for (name, packet) in context.output_side_packets().iter_set() {
            side_packets.entry(name.to_string()).or_insert_with(|| packet.clone());
        }
    }

    // --- Propagation ---

    fn publish_batches(self: &Arc<Self>, batches: Vec<OutputBatch>) {
        for batch in batches {
            self.publish(batch.stream, batch.packets, batch.bound);
        }
    }

    /// Delivers packets and a new bound to observers, pollers and consumers.
    pub fn publish(self: &Arc<Self>, index: usize, packets: Vec<Packet>, bound: Timestamp) {
        let stream = &self.streams[index];
        {
            let mut current = stream.bound.lock();
            if packets.is_empty() && bound <= *current {
                return;
            }
            if let Some(first) = packets.first() {
                if first.timestamp() < *current {
                    let error = FlowKitError::StreamAdmission(format!(
                        "Packet at {} on stream '{}' is below the stream's timestamp bound {}",
                        first.timestamp(),
                        stream.name,
                        *current
                    ));
                    drop(current);
                    self.record_error(error);
                    return;
                }
            }
            let after_packets = packets
                .last()
                .map_or(Timestamp::UNSET, |p| p.timestamp().next_allowed_in_stream());
            *current = (*current).max(bound).max(after_packets);
        }
        let bound = *stream.bound.lock();

        if !packets.is_empty() {
            let observers = stream.observers.lock().clone();
            for observer in &observers {
                for packet in &packets {
                    if let Err(e) = observer(packet) {
                        self.record_error(FlowKitError::Runtime(format!(
                            "Observer of stream '{}' failed: {e}",
                            stream.name
                        )));
                    }
                }
            }
            stream
                .pollers
                .lock()
                .retain(|tx| packets.iter().all(|p| tx.send(p.clone()).is_ok()));
        }

        for &(node, input) in &stream.consumers {
            {
                let mut queues = self.nodes[node].queues.lock();
                let queue = &mut queues[input];
                for packet in &packets {
                    queue.push(packet.clone());
                }
                queue.set_bound(bound);
            }
            self.schedule_if_ready(node);
        }

        if bound == Timestamp::DONE {
            stream.pollers.lock().clear();
        }
    }

    // --- Graph inputs ---

    fn notify_space(&self) {
        let _guard = self.space.lock();
        self.space_cv.notify_all();
    }

    fn input_full(&self, stream: usize) -> bool {
        self.streams[stream]
            .consumers
            .iter()
            .any(|&(node, input)| self.nodes[node].queues.lock()[input].len() >= self.max_queue_size)
    }

    /// Admits one packet on a graph input stream.
    ///
    /// With `limit` set, a full consumer queue either blocks the caller
    /// (`block`) or fails with `ResourceExhausted`.
    pub fn add_input_packet(
        self: &Arc<Self>,
        name: &str,
        packet: Packet,
        limit: bool,
        block: bool,
    ) -> Result<()> {
        let input = self.inputs.get(name).ok_or_else(|| {
            FlowKitError::Configuration(format!("No graph input stream named '{name}'"))
        })?;
        if !self.is_running() {
            return Err(FlowKitError::InvalidState(format!(
                "Cannot add to input stream '{name}': the graph is not running"
            )));
        }
        let stream = input.lock().stream;

        if limit {
            let mut guard = self.space.lock();
            while self.input_full(stream) {
                if self.aborting() {
                    drop(guard);
                    return Err(self.abort_error());
                }
                if !block {
                    return Err(FlowKitError::ResourceExhausted(format!(
                        "Input stream '{name}' has a consumer queue at its limit of {}",
                        self.max_queue_size
                    )));
                }
                self.space_cv.wait(&mut guard);
            }
        }
        if self.aborting() {
            return Err(self.abort_error());
        }

        let mut state = input.lock();
        let ts = packet.timestamp();
        if state.closed {
            return Err(FlowKitError::StreamAdmission(format!(
                "Input stream '{name}' is closed; packet at {ts} rejected"
            )));
        }
        if packet.is_empty() {
            return Err(FlowKitError::StreamAdmission(format!(
                "Empty packet added to input stream '{name}'"
            )));
        }
        if !ts.is_allowed_in_stream() {
            return Err(FlowKitError::StreamAdmission(format!(
                "Timestamp {ts} is not allowed on input stream '{name}'"
            )));
        }
        if (ts == Timestamp::PRE_STREAM || ts == Timestamp::POST_STREAM) && state.emitted_any {
            return Err(FlowKitError::StreamAdmission(format!(
                "{ts} packet on input stream '{name}' must be its only packet"
            )));
        }
        if ts < state.next_allowed {
            return Err(FlowKitError::StreamAdmission(format!(
                "Timestamp {ts} on input stream '{name}' is not greater than the previous \
                 timestamp; the next allowed timestamp is {}",
                state.next_allowed
            )));
        }
        let mismatches: Vec<String> = state
            .consumer_types
            .iter()
            .filter_map(|(label, packet_type)| {
                packet_type.validate(&packet).err().map(|e| format!("{label}: {e}"))
            })
            .collect();
        if !mismatches.is_empty() {
            return Err(FlowKitError::contract_issues(
                &format!("input stream '{name}'"),
                &mismatches,
            ));
        }

        state.next_allowed = ts.next_allowed_in_stream();
        state.emitted_any = true;
        self.metrics.packets_added.add(1, &[KeyValue::new("stream", name.to_string())]);
        self.publish(stream, vec![packet], ts.next_allowed_in_stream());
        Ok(())
    }

    /// Marks a graph input stream as finished. Closing it again is a no-op,
    /// even after the run has ended.
    pub fn close_input(self: &Arc<Self>, name: &str) -> Result<()> {
        let input = self.inputs.get(name).ok_or_else(|| {
            FlowKitError::Configuration(format!("No graph input stream named '{name}'"))
        })?;
        if input.lock().closed {
            return Ok(());
        }
        if !self.is_running() {
            return Err(FlowKitError::InvalidState(format!(
                "Cannot close input stream '{name}': the graph is not running"
            )));
        }
        self.close_input_state(name, input);
        Ok(())
    }

    /// Closes every graph input stream that is still open.
    ///
    /// Callers check the run state once beforehand; the run may finish while
    /// the inputs are being closed.
    pub fn close_all_inputs(self: &Arc<Self>) {
        for (name, input) in &self.inputs {
            self.close_input_state(name, input);
        }
    }

    fn close_input_state(self: &Arc<Self>, name: &str, input: &Mutex<GraphInputState>) {
        let mut state = input.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        tracing::debug!(stream = %name, "Closing graph input stream");
        self.publish(state.stream, Vec::new(), Timestamp::DONE);
        drop(state);
        self.finish_if_empty();
    }

    /// Asks every source node to close after its current invocation.
    pub fn stop_sources(self: &Arc<Self>) {
        for (index, node) in self.nodes.iter().enumerate() {
            if node.is_source() {
                node.sched.lock().stopped = true;
                self.schedule_if_ready(index);
            }
        }
    }
}
