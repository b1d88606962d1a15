// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! [`CalculatorGraph`]: the public entry point for running a graph.
//!
//! A graph is initialized once from a [`GraphConfig`] and can then be run any
//! number of times, one run at a time:
//!
//! ```text
//! initialize → [observe / add pollers] → start_run → add packets → close inputs → wait_until_done
//! ```

use crate::config::{GraphRunConfig, InputStreamAddMode};
use crate::constants::DEFAULT_EXECUTOR_NAME;
use crate::executor::{default_num_threads, Executor, ThreadPoolExecutor};
use crate::scheduler::{GraphShared, RunPhase, StreamCallback};
use crate::validation::{validate_graph, ValidatedGraph};
use flowkit_api::GraphConfig;
use flowkit_core::{
    CalculatorContract, CalculatorRegistry, FlowKitError, GraphService, NodeState,
    NodeStateUpdate, Packet, Result, ServiceMap,
};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

/// How a run ended when it ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every node closed after its inputs were exhausted.
    Completed,
    /// The run was cancelled through [`CalculatorGraph::cancel`].
    Cancelled,
}

/// Pull-style access to one output stream.
///
/// The poller yields `None` once the stream is done or the run has finished.
#[derive(Debug)]
pub struct OutputStreamPoller {
    stream: String,
    receiver: mpsc::UnboundedReceiver<Packet>,
}

impl OutputStreamPoller {
    pub fn stream_name(&self) -> &str {
        &self.stream
    }

    /// Blocks until the next packet arrives or the stream ends.
    ///
    /// Must not be called from inside an async runtime.
    pub fn next(&mut self) -> Option<Packet> {
        self.receiver.blocking_recv()
    }

    /// Returns the next packet if one is already queued.
    pub fn try_next(&mut self) -> Option<Packet> {
        self.receiver.try_recv().ok()
    }

    /// Awaits the next packet.
    pub async fn recv(&mut self) -> Option<Packet> {
        self.receiver.recv().await
    }
}

/// A validated graph plus everything needed to run it.
pub struct CalculatorGraph {
    registry: Arc<CalculatorRegistry>,
    config: GraphRunConfig,
    services: ServiceMap,
    executors: HashMap<String, Arc<dyn Executor>>,
    custom_executors: HashSet<String>,
    base_side_packets: HashMap<String, Packet>,
    topology: Option<Arc<ValidatedGraph>>,
    shared: Option<Arc<GraphShared>>,
}

impl CalculatorGraph {
    pub fn new(registry: Arc<CalculatorRegistry>) -> Self {
        Self::with_config(registry, GraphRunConfig::default())
    }

    pub fn with_config(registry: Arc<CalculatorRegistry>, config: GraphRunConfig) -> Self {
        Self {
            registry,
            config,
            services: ServiceMap::new(),
            executors: HashMap::new(),
            custom_executors: HashSet::new(),
            base_side_packets: HashMap::new(),
            topology: None,
            shared: None,
        }
    }

    /// Expands, validates and prepares `config` for running.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::InvalidState` if the graph is already
    /// initialized, otherwise any validation error.
    pub fn initialize(&mut self, config: GraphConfig) -> Result<()> {
        self.initialize_with_side_packets(config, HashMap::new())
    }

    /// Like [`initialize`](Self::initialize), with side packets every run
    /// starts from.
    ///
    /// # Errors
    ///
    /// See [`initialize`](Self::initialize).
    pub fn initialize_with_side_packets(
        &mut self,
        config: GraphConfig,
        side_packets: HashMap<String, Packet>,
    ) -> Result<()> {
        if self.topology.is_some() {
            return Err(FlowKitError::InvalidState("Graph is already initialized".to_string()));
        }
        let topology = validate_graph(&config, &self.registry, &self.custom_executors)?;
        check_external_side_packets(&topology, &side_packets)?;

        if !self.custom_executors.contains(DEFAULT_EXECUTOR_NAME) {
            let num_threads = self
                .config
                .num_threads
                .or(topology.config.num_threads)
                .unwrap_or_else(default_num_threads);
            let pool = ThreadPoolExecutor::new(DEFAULT_EXECUTOR_NAME, num_threads)?;
            self.executors.insert(DEFAULT_EXECUTOR_NAME.to_string(), Arc::new(pool));
        }
        for declared in &topology.config.executors {
            if self.custom_executors.contains(&declared.name) {
                continue;
            }
            let num_threads = declared.num_threads.unwrap_or_else(default_num_threads);
            let pool = ThreadPoolExecutor::new(&declared.name, num_threads)?;
            self.executors.insert(declared.name.clone(), Arc::new(pool));
        }

        let max_queue_size = self.config.effective_max_queue_size(topology.config.max_queue_size);
        let shared = GraphShared::new(&topology, max_queue_size);
        tracing::info!(
            nodes = topology.nodes.len(),
            streams = topology.streams.len(),
            max_queue_size,
            "Graph initialized"
        );
        self.base_side_packets = side_packets;
        self.topology = Some(Arc::new(topology));
        self.shared = Some(Arc::new(shared));
        Ok(())
    }

    fn shared(&self) -> Result<&Arc<GraphShared>> {
        self.shared
            .as_ref()
            .ok_or_else(|| FlowKitError::InvalidState("Graph is not initialized".to_string()))
    }

    fn topology(&self) -> Result<&Arc<ValidatedGraph>> {
        self.topology
            .as_ref()
            .ok_or_else(|| FlowKitError::InvalidState("Graph is not initialized".to_string()))
    }

    fn ensure_idle(&self, what: &str) -> Result<()> {
        if self.shared.as_ref().is_some_and(|s| s.is_running()) {
            return Err(FlowKitError::InvalidState(format!("Cannot {what} while a run is in progress")));
        }
        Ok(())
    }

    /// The expanded graph description, once initialized.
    pub fn config(&self) -> Option<&GraphConfig> {
        self.topology.as_ref().map(|t| &t.config)
    }

    /// The contract of a node, once initialized.
    pub fn contract(&self, node: &str) -> Option<Arc<CalculatorContract>> {
        let topology = self.topology.as_ref()?;
        let index = topology.node_index(node)?;
        Some(Arc::clone(&topology.nodes[index].contract))
    }

    /// Provides a service object to the calculators of later runs.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::InvalidState` during a run.
    pub fn set_service_object<T: Any + Send + Sync>(
        &mut self,
        service: &GraphService<T>,
        object: Arc<T>,
    ) -> Result<()> {
        self.ensure_idle("set a service object")?;
        self.services.set(service, object);
        Ok(())
    }

    /// Supplies the executor for `name`, replacing the built-in pool.
    ///
    /// Executors set before [`initialize`](Self::initialize) may be used by
    /// nodes without being declared in the description.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::InvalidState` during a run.
    pub fn set_executor(&mut self, name: &str, executor: Arc<dyn Executor>) -> Result<()> {
        self.ensure_idle("set an executor")?;
        self.custom_executors.insert(name.to_string());
        self.executors.insert(name.to_string(), executor);
        Ok(())
    }

    /// Chooses what adding to a full graph input stream does.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::InvalidState` during a run.
    pub fn set_input_stream_add_mode(&mut self, mode: InputStreamAddMode) -> Result<()> {
        self.ensure_idle("change the input stream add mode")?;
        self.config.add_mode = mode;
        Ok(())
    }

    /// Calls `callback` for every packet on stream `name`, in timestamp order,
    /// for this and every later run. An error from the callback fails the run.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Configuration` for unknown streams and
    /// `FlowKitError::InvalidState` during a run.
    pub fn observe_output_stream(
        &self,
        name: &str,
        callback: impl Fn(&Packet) -> Result<()> + Send + Sync + 'static,
    ) -> Result<()> {
        self.ensure_idle("observe a stream")?;
        let index = self.stream_index(name)?;
        let callback: StreamCallback = Arc::new(callback);
        self.shared()?.streams[index].observers.lock().push(callback);
        Ok(())
    }

    /// Creates a poller for stream `name` covering the next run.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Configuration` for unknown streams and
    /// `FlowKitError::InvalidState` during a run.
    pub fn add_output_stream_poller(&self, name: &str) -> Result<OutputStreamPoller> {
        self.ensure_idle("add a poller")?;
        let index = self.stream_index(name)?;
        let (tx, receiver) = mpsc::unbounded_channel();
        self.shared()?.streams[index].pollers.lock().push(tx);
        Ok(OutputStreamPoller { stream: name.to_string(), receiver })
    }

    fn stream_index(&self, name: &str) -> Result<usize> {
        self.topology()?
            .stream_index
            .get(name)
            .copied()
            .ok_or_else(|| FlowKitError::Configuration(format!("Unknown stream '{name}'")))
    }

    /// Subscribes to node state changes.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::InvalidState` before initialization.
    pub fn subscribe_node_states(&self) -> Result<mpsc::Receiver<NodeStateUpdate>> {
        let (tx, rx) = mpsc::channel(self.config.subscriber_channel_capacity.max(1));
        self.shared()?.subscribers.lock().push(tx);
        Ok(rx)
    }

    /// Current state of every node.
    pub fn node_states(&self) -> HashMap<String, NodeState> {
        self.shared.as_ref().map_or_else(HashMap::new, |shared| {
            shared.nodes.iter().map(|n| (n.name.clone(), n.state.lock().clone())).collect()
        })
    }

    /// Opens every node and starts scheduling.
    ///
    /// `stream_headers` provides headers for graph input streams.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::InvalidState` if not initialized or already
    /// running, a side packet or service error, or the error of the first
    /// node whose `open` failed. Nodes opened before the failure are closed.
    pub fn start_run(
        &self,
        side_packets: HashMap<String, Packet>,
        stream_headers: HashMap<String, Packet>,
    ) -> Result<()> {
        let shared = self.shared()?;
        let topology = self.topology()?;
        self.ensure_idle("start a run")?;

        let mut all_side_packets = self.base_side_packets.clone();
        for (name, packet) in side_packets {
            if all_side_packets.contains_key(&name) {
                return Err(FlowKitError::Configuration(format!(
                    "Side packet '{name}' was provided both at initialization and at start"
                )));
            }
            all_side_packets.insert(name, packet);
        }
        check_external_side_packets(topology, &all_side_packets)?;
        for name in stream_headers.keys() {
            if !topology.graph_inputs.iter().any(|&s| topology.streams[s].name == *name) {
                return Err(FlowKitError::Configuration(format!(
                    "Header given for '{name}', which is not a graph input stream"
                )));
            }
        }

        let mut bound_services = Vec::with_capacity(shared.nodes.len());
        let mut issues = Vec::new();
        for node in &shared.nodes {
            match self.services.bind(&node.name, node.contract.service_requests()) {
                Ok(services) => bound_services.push(services),
                Err(FlowKitError::Service(message)) => issues.push(message),
                Err(other) => return Err(other),
            }
        }
        if !issues.is_empty() {
            return Err(FlowKitError::Service(issues.join("; ")));
        }
        let mut calculators = Vec::with_capacity(shared.nodes.len());
        for node in &shared.nodes {
            let executor = self.executors.get(&node.executor_name).ok_or_else(|| {
                FlowKitError::Configuration(format!(
                    "Node '{}' uses executor '{}' which was never created",
                    node.name, node.executor_name
                ))
            })?;
            *node.executor.lock() = Some(Arc::clone(executor));
            calculators.push(Some(self.registry.create(&node.contract)?));
        }

        shared.begin_run(all_side_packets)?;
        for (name, header) in stream_headers {
            if let Some(&index) = topology.stream_index.get(&name) {
                *shared.streams[index].header.lock() = Some(header);
            }
        }
        tracing::info!(nodes = shared.nodes.len(), "Starting graph run");

        let mut opened = Vec::with_capacity(topology.open_order.len());
        for &index in &topology.open_order {
            let Some(calculator) = calculators[index].take() else {
                continue;
            };
            let services = std::mem::take(&mut bound_services[index]);
            if let Err(e) = shared.open_node(index, calculator, services) {
                tracing::error!(node = %shared.nodes[index].name, error = %e, "Failed to open node");
                for &opened_index in opened.iter().rev() {
                    shared.run_close(opened_index);
                }
                shared.fail_start(e.clone());
                return Err(e);
            }
            opened.push(index);
        }

        shared.enable_scheduling();
        Ok(())
    }

    /// Adds a packet to a graph input stream.
    ///
    /// In the default mode this blocks while a consumer queue is full.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::StreamAdmission` for closed streams and
    /// out-of-order or disallowed timestamps, `FlowKitError::Contract` for
    /// packets of the wrong type, and `FlowKitError::InvalidState` when no run
    /// is accepting input.
    pub fn add_packet_to_input_stream(&self, name: &str, packet: Packet) -> Result<()> {
        let limit = self.config.add_mode == InputStreamAddMode::WaitTillNotFull;
        self.shared()?.add_input_packet(name, packet, limit, true)
    }

    /// Adds a packet without blocking.
    ///
    /// # Errors
    ///
    /// As [`add_packet_to_input_stream`](Self::add_packet_to_input_stream),
    /// plus `FlowKitError::ResourceExhausted` when a consumer queue is full.
    pub fn try_add_packet_to_input_stream(&self, name: &str, packet: Packet) -> Result<()> {
        self.shared()?.add_input_packet(name, packet, true, false)
    }

    /// Closes one graph input stream. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Configuration` for unknown streams and
    /// `FlowKitError::InvalidState` for an open stream when not running.
    pub fn close_input_stream(&self, name: &str) -> Result<()> {
        self.shared()?.close_input(name)
    }

    /// Closes every graph input stream. Streams that are already closed are
    /// skipped, so this succeeds even if the run ended in the meantime.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::InvalidState` if no run was ever started.
    pub fn close_all_input_streams(&self) -> Result<()> {
        let shared = self.shared()?;
        if shared.run.lock().phase == RunPhase::NotStarted {
            return Err(FlowKitError::InvalidState(
                "Cannot close input streams: no run was started".to_string(),
            ));
        }
        shared.close_all_inputs();
        Ok(())
    }

    /// Asks every source node to stop producing and close.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::InvalidState` when not running.
    pub fn close_all_packet_sources(&self) -> Result<()> {
        let shared = self.shared()?;
        if !shared.is_running() {
            return Err(FlowKitError::InvalidState("The graph is not running".to_string()));
        }
        shared.stop_sources();
        Ok(())
    }

    /// Aborts the current run. Invocations already running complete, then
    /// every opened node is closed. A no-op when no run is in progress.
    pub fn cancel(&self) {
        if let Some(shared) = &self.shared {
            shared.cancel();
        }
    }

    /// Whether the current or last run recorded an error.
    pub fn has_error(&self) -> bool {
        self.shared.as_ref().is_some_and(|s| s.has_error())
    }

    /// Blocks until every node has closed and no task is running.
    ///
    /// # Errors
    ///
    /// Returns the first error of the run, or `FlowKitError::InvalidState`
    /// if no run was started.
    pub fn wait_until_done(&self) -> Result<RunOutcome> {
        let shared = self.shared()?;
        let mut run = shared.run.lock();
        if run.phase == RunPhase::NotStarted {
            return Err(FlowKitError::InvalidState("No run was started".to_string()));
        }
        while run.phase != RunPhase::Finished || shared.in_flight.load(Ordering::SeqCst) > 0 {
            shared.run_cv.wait(&mut run);
        }
        if let Some(e) = &run.error {
            return Err(e.clone());
        }
        Ok(if run.cancelled { RunOutcome::Cancelled } else { RunOutcome::Completed })
    }

    /// Blocks until no node has anything left to do with the input added so
    /// far.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::InvalidState` for graphs with source nodes,
    /// which are never idle, and the run's error if it has failed.
    pub fn wait_until_idle(&self) -> Result<()> {
        let shared = self.shared()?;
        if shared.has_sources {
            return Err(FlowKitError::InvalidState(
                "wait_until_idle is not supported for graphs with source nodes".to_string(),
            ));
        }
        let mut run = shared.run.lock();
        while run.phase == RunPhase::Running && shared.in_flight.load(Ordering::SeqCst) > 0 {
            shared.run_cv.wait(&mut run);
        }
        match &run.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Starts a run, closes all inputs and waits for it to finish.
    ///
    /// # Errors
    ///
    /// See [`start_run`](Self::start_run) and
    /// [`wait_until_done`](Self::wait_until_done).
    pub fn run(&self, side_packets: HashMap<String, Packet>) -> Result<RunOutcome> {
        self.start_run(side_packets, HashMap::new())?;
        self.close_all_input_streams()?;
        self.wait_until_done()
    }

    /// An output side packet of the last run, or an input side packet.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::InvalidState` if the packet was never set.
    pub fn output_side_packet(&self, name: &str) -> Result<Packet> {
        self.shared()?.side_packets.lock().get(name).cloned().ok_or_else(|| {
            FlowKitError::InvalidState(format!("Side packet '{name}' has not been produced"))
        })
    }
}

/// Rejects provided side packets that a node also produces.
fn check_external_side_packets(
    topology: &ValidatedGraph,
    side_packets: &HashMap<String, Packet>,
) -> Result<()> {
    for name in side_packets.keys() {
        if let Some(&producer) = topology.side_packet_producers.get(name) {
            return Err(FlowKitError::Configuration(format!(
                "Side packet '{name}' is provided externally but also produced by node '{}'",
                topology.nodes[producer].name
            )));
        }
    }
    Ok(())
}

impl Drop for CalculatorGraph {
    fn drop(&mut self) {
        if let Some(shared) = &self.shared {
            if shared.is_running() {
                tracing::warn!("Graph dropped during a run; cancelling");
                shared.cancel();
                let _ = self.wait_until_done();
            }
        }
    }
}

impl fmt::Debug for CalculatorGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalculatorGraph")
            .field("initialized", &self.topology.is_some())
            .field("config", &self.config)
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
