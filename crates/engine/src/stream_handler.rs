// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Input stream handlers decide when a node's queued inputs form a complete
//! input set, and at which timestamp.

use crate::input_stream::InputStreamQueue;
use flowkit_api::InputStreamHandlerConfig;
use flowkit_core::{FlowKitError, PacketSet, Result, TagMap, Timestamp};
use std::fmt;
use std::sync::Arc;

/// Outcome of inspecting a node's input queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// More packets or bounds are needed.
    NotReady,
    /// An input set at this timestamp can be delivered.
    Ready(Timestamp),
    /// Every input is drained and closed.
    Done,
}

/// The built-in input stream handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputStreamHandler {
    /// Delivers the lowest pending timestamp once every input either holds a
    /// packet at it or is known not to.
    #[default]
    Default,
    /// Delivers the lowest queued timestamp without waiting on empty inputs.
    /// Timestamps may go backwards across different inputs.
    Immediate,
}

impl InputStreamHandler {
    pub const DEFAULT_NAME: &'static str = "DefaultInputStreamHandler";
    pub const IMMEDIATE_NAME: &'static str = "ImmediateInputStreamHandler";

    /// Looks a handler up by its registered name.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Configuration` for unknown names.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            Self::DEFAULT_NAME => Ok(Self::Default),
            Self::IMMEDIATE_NAME => Ok(Self::Immediate),
            other => Err(FlowKitError::Configuration(format!(
                "Unknown input stream handler '{other}' (expected {} or {})",
                Self::DEFAULT_NAME,
                Self::IMMEDIATE_NAME
            ))),
        }
    }

    /// Resolves the handler for a node. A graph-wide handler wins over the
    /// node's own choice, which wins over the calculator default.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Configuration` for unknown names.
    pub fn resolve(
        graph: Option<&InputStreamHandlerConfig>,
        node: Option<&InputStreamHandlerConfig>,
    ) -> Result<Self> {
        graph.or(node).map_or(Ok(Self::Default), |config| Self::from_name(&config.name))
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Default => Self::DEFAULT_NAME,
            Self::Immediate => Self::IMMEDIATE_NAME,
        }
    }

    /// Decides whether `queues` hold a deliverable input set.
    pub fn readiness(self, queues: &[InputStreamQueue]) -> Readiness {
        if queues.iter().all(InputStreamQueue::is_done) {
            return Readiness::Done;
        }
        let Some(earliest) = queues.iter().filter_map(InputStreamQueue::front_timestamp).min()
        else {
            return Readiness::NotReady;
        };
        match self {
            Self::Immediate => Readiness::Ready(earliest),
            Self::Default => {
                let settled = queues.iter().filter(|q| q.is_empty()).all(|q| q.bound() > earliest);
                if settled {
                    Readiness::Ready(earliest)
                } else {
                    Readiness::NotReady
                }
            },
        }
    }

    /// Pops the input set at `timestamp`. Inputs without a packet there get
    /// an empty packet.
    pub fn take(
        self,
        timestamp: Timestamp,
        queues: &mut [InputStreamQueue],
        tag_map: &Arc<TagMap>,
    ) -> PacketSet {
        let mut set = PacketSet::new(Arc::clone(tag_map));
        for ((_, slot), queue) in set.iter_mut().zip(queues.iter_mut()) {
            *slot = queue.pop_at(timestamp);
        }
        set
    }

    /// Lowest timestamp at which an input set could still be delivered, used
    /// to propagate bounds through nodes with a timestamp offset.
    pub fn settled_bound(self, queues: &[InputStreamQueue]) -> Timestamp {
        queues.iter().map(InputStreamQueue::settled_bound).min().unwrap_or(Timestamp::DONE)
    }
}

impl fmt::Display for InputStreamHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowkit_core::Packet;

    fn queues(n: usize) -> Vec<InputStreamQueue> {
        (0..n).map(|i| InputStreamQueue::new(format!("in{i}"), false)).collect()
    }

    fn push(queue: &mut InputStreamQueue, ts: i64) {
        queue.push(Packet::new(ts).at(Timestamp::new(ts)));
    }

    #[test]
    fn test_default_waits_for_bounds() {
        let mut q = queues(2);
        push(&mut q[0], 3);
        assert_eq!(InputStreamHandler::Default.readiness(&q), Readiness::NotReady);

        q[1].set_bound(Timestamp::new(3));
        assert_eq!(InputStreamHandler::Default.readiness(&q), Readiness::NotReady);

        q[1].set_bound(Timestamp::new(4));
        assert_eq!(InputStreamHandler::Default.readiness(&q), Readiness::Ready(Timestamp::new(3)));
    }

    #[test]
    fn test_default_delivers_empty_for_closed_input() {
        let mut q = queues(2);
        push(&mut q[0], 1);
        q[1].set_bound(Timestamp::DONE);
        let handler = InputStreamHandler::Default;
        assert_eq!(handler.readiness(&q), Readiness::Ready(Timestamp::new(1)));

        let tag_map = Arc::new(TagMap::new(&["in0", "in1"]).unwrap_or_default());
        let set = handler.take(Timestamp::new(1), &mut q, &tag_map);
        assert!(!set.index(0).map(Packet::is_empty).unwrap_or(true));
        assert!(set.index(1).map(Packet::is_empty).unwrap_or(false));

        q[0].set_bound(Timestamp::DONE);
        assert_eq!(handler.readiness(&q), Readiness::Done);
    }

    #[test]
    fn test_immediate_ignores_empty_inputs() {
        let mut q = queues(2);
        push(&mut q[1], 7);
        assert_eq!(InputStreamHandler::Immediate.readiness(&q), Readiness::Ready(Timestamp::new(7)));
    }

    #[test]
    fn test_resolution_order() {
        let graph = InputStreamHandlerConfig::new("ImmediateInputStreamHandler");
        let node = InputStreamHandlerConfig::new("DefaultInputStreamHandler");
        assert_eq!(
            InputStreamHandler::resolve(Some(&graph), Some(&node)).ok(),
            Some(InputStreamHandler::Immediate)
        );
        assert_eq!(
            InputStreamHandler::resolve(None, Some(&node)).ok(),
            Some(InputStreamHandler::Default)
        );
        let unknown = InputStreamHandlerConfig::new("SyncSetInputStreamHandler");
        assert!(InputStreamHandler::resolve(None, Some(&unknown)).is_err());
    }
}
