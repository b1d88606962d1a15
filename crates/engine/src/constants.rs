// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Shared defaults for graph execution.
//!
//! [`GraphRunConfig`](crate::GraphRunConfig) and the graph description both
//! fall back to these values when nothing more specific is configured.
//!
//! # Queue Size Guidelines
//!
//! Queue sizes are measured in packets (not bytes). They only bound packets
//! added from outside the graph through `add_packet_to_input_stream`; streams
//! between nodes are unbounded.
//!
//! - **Higher limit** = more buffering, callers block less often
//! - **Lower limit** = less memory, callers feel backpressure sooner

// === Graph Inputs ===

/// Default per-consumer queue limit for graph input streams.
///
/// Once any consumer of a graph input stream holds this many packets,
/// `add_packet_to_input_stream` blocks (or `try_add_packet_to_input_stream`
/// refuses) until the consumer catches up.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;

// === Subgraphs ===

/// Maximum nesting depth of subgraph expansion.
///
/// A registered subgraph that (directly or indirectly) references itself would
/// otherwise expand forever; reaching this depth is reported as a suspected cycle.
pub const MAX_SUBGRAPH_EXPANSION_DEPTH: usize = 32;

/// Separator between a subgraph instance name and the internal names it prefixes.
pub const SUBGRAPH_NAMESPACE_SEPARATOR: &str = "__";

// === Executors ===

/// Name of the executor used by nodes that do not name one.
pub const DEFAULT_EXECUTOR_NAME: &str = "default";

/// Prefix for worker thread names; the executor name is appended.
pub const WORKER_THREAD_PREFIX: &str = "flowkit";

/// Fallback worker count when the available parallelism cannot be queried.
pub const FALLBACK_NUM_THREADS: usize = 4;

// === Observation ===

/// Default buffer size for node state subscriber channels.
///
/// Each subscriber gets a channel with this capacity; updates beyond it are
/// dropped rather than stalling the scheduler.
pub const DEFAULT_SUBSCRIBER_CHANNEL_CAPACITY: usize = 128;
