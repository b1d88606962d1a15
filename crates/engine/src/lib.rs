// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! engine: Graph validation, subgraph expansion and the scheduler for FlowKit.
//!
//! A [`CalculatorGraph`] takes a [`GraphConfig`](flowkit_api::GraphConfig),
//! expands its subgraphs, checks every contract and edge, and then runs the
//! calculators on one or more thread pools, delivering packets in timestamp
//! order on every stream.

use flowkit_core::CalculatorRegistry;
use std::sync::Arc;

// --- Public Modules ---

pub mod config;
pub mod constants;
pub mod executor;
pub mod graph;
pub mod input_stream;
pub mod stream_handler;
pub mod subgraph;
pub mod validation;

mod node;
mod scheduler;

// Re-exports
pub use config::{GraphRunConfig, InputStreamAddMode};
pub use executor::{Executor, Task, ThreadPoolExecutor};
pub use graph::{CalculatorGraph, OutputStreamPoller, RunOutcome};
pub use scheduler::StreamCallback;
pub use stream_handler::InputStreamHandler;
pub use subgraph::expand_graph;
pub use validation::{validate_graph, ValidatedGraph};

/// Unified entry point holding the calculator registry graphs are built from.
pub struct Engine {
    pub registry: Arc<CalculatorRegistry>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an engine with every built-in calculator registered.
    pub fn new() -> Self {
        let mut registry = CalculatorRegistry::new();
        flowkit_nodes::register_nodes(&mut registry);
        Self { registry: Arc::new(registry) }
    }

    /// Creates an engine around a registry the caller has populated, for
    /// embedders with their own calculators and subgraphs.
    pub const fn with_registry(registry: Arc<CalculatorRegistry>) -> Self {
        Self { registry }
    }

    /// A fresh, uninitialized graph using this engine's registry.
    pub fn graph(&self) -> CalculatorGraph {
        CalculatorGraph::new(Arc::clone(&self.registry))
    }

    /// Like [`graph`](Self::graph), with explicit run settings.
    pub fn graph_with_config(&self, config: GraphRunConfig) -> CalculatorGraph {
        CalculatorGraph::with_config(Arc::clone(&self.registry), config)
    }
}

#[cfg(test)]
mod tests;
