// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Node lifecycle states and state-update helpers.
//!
//! ## State Machine
//!
//! ```text
//!   Uninitialized
//!        ↓  (contract built, calculator created)
//!      Ready ←──────────────────────┐
//!        ↓  open                    │ next run
//!     Opened ⇄ Processing           │
//!        ↓  close                   │
//!     Closed ───────────────────────┘
//!
//!   Opened / Processing ──(method error)──→ Failed ──(close)──→ Closed
//! ```
//!
//! `Failed` is only ever entered by the node whose method returned the error.
//! Every other opened node goes straight to `Closed` when the run aborts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Lifecycle state of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NodeState {
    /// Description parsed, contract not yet built.
    Uninitialized,
    /// Contract built and calculator instantiated; waiting for `open`.
    Ready,
    /// `open` succeeded; the node may be scheduled.
    Opened,
    /// A `process` invocation is running.
    Processing,
    /// `close` has run. Terminal for the current run.
    Closed,
    /// A lifecycle method of this node failed.
    Failed { reason: String },
}

impl NodeState {
    /// True once `open` has succeeded and `close` has not yet run.
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Opened | Self::Processing)
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether `self → next` is a legal transition.
    pub const fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized | Self::Closed, Self::Ready)
                | (Self::Ready | Self::Processing, Self::Opened)
                | (Self::Opened, Self::Processing)
                | (Self::Ready | Self::Opened | Self::Processing | Self::Failed { .. }, Self::Closed)
                | (Self::Ready | Self::Opened | Self::Processing, Self::Failed { .. })
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::Ready => f.write_str("ready"),
            Self::Opened => f.write_str("opened"),
            Self::Processing => f.write_str("processing"),
            Self::Closed => f.write_str("closed"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// A state change reported by the engine for one node.
#[derive(Debug, Clone)]
pub struct NodeStateUpdate {
    /// Name of the node reporting the state
    pub node_id: String,
    /// The new state of the node
    pub state: NodeState,
    /// When this state change occurred
    pub timestamp: SystemTime,
}

impl NodeStateUpdate {
    /// Creates a new state update with the current timestamp.
    #[inline]
    pub fn new(node_id: String, state: NodeState) -> Self {
        Self { node_id, state, timestamp: SystemTime::now() }
    }
}

/// Helper functions for emitting node state updates.
pub mod state_helpers {
    use super::{NodeState, NodeStateUpdate};
    use tokio::sync::mpsc;

    /// Emits a state update to the provided channel.
    /// Failures are silently ignored as state tracking is best-effort.
    #[inline]
    pub fn emit_state(state_tx: &mpsc::Sender<NodeStateUpdate>, node_id: &str, state: NodeState) {
        let _ = state_tx.try_send(NodeStateUpdate::new(node_id.to_string(), state));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_transitions() {
        assert!(NodeState::Uninitialized.can_transition_to(&NodeState::Ready));
        assert!(NodeState::Ready.can_transition_to(&NodeState::Opened));
        assert!(NodeState::Opened.can_transition_to(&NodeState::Processing));
        assert!(NodeState::Processing.can_transition_to(&NodeState::Opened));
        assert!(NodeState::Closed.can_transition_to(&NodeState::Ready));
        assert!(!NodeState::Closed.can_transition_to(&NodeState::Opened));
        assert!(!NodeState::Uninitialized.can_transition_to(&NodeState::Opened));
        let failed = NodeState::Failed { reason: "x".into() };
        assert!(failed.can_transition_to(&NodeState::Closed));
        assert!(!failed.can_transition_to(&NodeState::Opened));
    }

    #[test]
    fn test_emit_is_best_effort() {
        let (tx, mut rx) = mpsc::channel(1);
        state_helpers::emit_state(&tx, "a", NodeState::Opened);
        state_helpers::emit_state(&tx, "a", NodeState::Closed);
        let update = rx.try_recv().unwrap();
        assert_eq!(update.node_id, "a");
        assert_eq!(update.state, NodeState::Opened);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(NodeState::Failed { reason: "boom".into() }).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "failed", "reason": "boom" }));
    }
}
