// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for FlowKit.
//!
//! Every failure that can surface from graph construction or a run carries a
//! distinguishable kind plus a message. The kinds line up with the phase in
//! which the failure is detected:
//!
//! - configuration problems are found by `initialize` and never partially applied
//! - contract problems are found while building or filling a node's contract
//! - lifecycle problems come out of a calculator's `open`/`process`/`close`
//!
//! A source calculator stopping and a run being cancelled are *statuses*, not
//! errors; see `ProcessOutcome` and `RunOutcome`.

use thiserror::Error;

/// Main error type for FlowKit operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlowKitError {
    /// Malformed or ambiguous graph description.
    ///
    /// Examples:
    /// - A stream consumed by a node but produced by nobody
    /// - A name that fails the identifier grammar
    /// - An unregistered calculator or a subgraph expansion that looks cyclic
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A node's declared port types do not match what the graph wires to it.
    ///
    /// When several ports are wrong at once the message enumerates all of them.
    #[error("Contract error: {0}")]
    Contract(String),

    /// A packet was refused by a stream because of its timestamp.
    ///
    /// Examples:
    /// - Duplicate timestamp on one stream
    /// - Timestamp lower than the previous packet's
    /// - Packet added to a stream that is already closed
    #[error("Stream admission error: {0}")]
    StreamAdmission(String),

    /// A calculator's `open`, `process` or `close` failed.
    #[error("Node '{node}' failed: {message}")]
    Lifecycle { node: String, message: String },

    /// A required graph service was not provided, or was provided with the wrong type.
    #[error("Service error: {0}")]
    Service(String),

    /// An API call that is not valid in the graph's current state.
    ///
    /// Examples:
    /// - `add_packet_to_input_stream` before `start_run`
    /// - `initialize` called twice on the same graph
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A bounded queue refused a packet without blocking.
    #[error("Resource exhaustion: {0}")]
    ResourceExhausted(String),

    /// Generic runtime failure raised by calculator code.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl FlowKitError {
    /// Wraps this error as a lifecycle failure attributed to `node`.
    ///
    /// Errors that already are lifecycle failures are returned unchanged so the
    /// original node attribution survives.
    #[must_use]
    pub fn in_node(self, node: &str) -> Self {
        match self {
            Self::Lifecycle { .. } => self,
            other => Self::Lifecycle { node: node.to_string(), message: other.to_string() },
        }
    }

    /// Builds an aggregated contract error out of individual issues.
    pub fn contract_issues(context: &str, issues: &[String]) -> Self {
        Self::Contract(format!("{context}: {}", issues.join("; ")))
    }
}

/// Convenience type alias for Results using `FlowKitError`.
pub type Result<T> = std::result::Result<T, FlowKitError>;

// Allow conversion from FlowKitError to String
impl From<FlowKitError> for String {
    fn from(err: FlowKitError) -> Self {
        err.to_string()
    }
}

// Generic string errors default to Runtime
impl From<String> for FlowKitError {
    fn from(s: String) -> Self {
        Self::Runtime(s)
    }
}

impl From<&str> for FlowKitError {
    fn from(s: &str) -> Self {
        Self::Runtime(s.to_string())
    }
}
