// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Run-time configuration for a [`CalculatorGraph`](crate::CalculatorGraph).

use crate::constants::{DEFAULT_MAX_QUEUE_SIZE, DEFAULT_SUBSCRIBER_CHANNEL_CAPACITY};
use serde::{Deserialize, Serialize};

/// What `add_packet_to_input_stream` does when a consumer queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputStreamAddMode {
    /// Block the caller until every consumer queue is below the limit.
    #[default]
    WaitTillNotFull,
    /// Ignore the limit.
    AddUnbounded,
}

/// Configuration for running a graph.
///
/// `None` fields fall back to the graph description, then to the defaults in
/// [`constants`](crate::constants).
#[derive(Debug, Clone)]
pub struct GraphRunConfig {
    /// Behaviour of graph input streams when a consumer queue is full.
    pub add_mode: InputStreamAddMode,
    /// Per-consumer queue limit for graph input streams (default: 100 packets)
    pub max_queue_size: Option<usize>,
    /// Worker threads of the default executor (default: available parallelism)
    pub num_threads: Option<usize>,
    /// Buffer size of node state subscriber channels (default: 128 updates)
    pub subscriber_channel_capacity: usize,
}

impl Default for GraphRunConfig {
    fn default() -> Self {
        Self {
            add_mode: InputStreamAddMode::default(),
            max_queue_size: None, // Uses graph.max_queue_size, then DEFAULT_MAX_QUEUE_SIZE
            num_threads: None,    // Uses graph.num_threads, then available parallelism
            subscriber_channel_capacity: DEFAULT_SUBSCRIBER_CHANNEL_CAPACITY,
        }
    }
}

impl GraphRunConfig {
    /// Queue limit after applying the graph description's value.
    pub fn effective_max_queue_size(&self, from_graph: Option<usize>) -> usize {
        self.max_queue_size.or(from_graph).unwrap_or(DEFAULT_MAX_QUEUE_SIZE).max(1)
    }
}
