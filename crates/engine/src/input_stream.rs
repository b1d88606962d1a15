// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-node input stream queues.
//!
//! Each input of each node owns one [`InputStreamQueue`]. Producers append
//! packets and raise the queue's timestamp bound; the node's stream handler
//! pops packets once it decides an input set is complete.

use flowkit_core::{Packet, Timestamp};
use std::collections::VecDeque;

/// Packets waiting at one node input, plus what is known about future ones.
#[derive(Debug)]
pub struct InputStreamQueue {
    name: String,
    packets: VecDeque<Packet>,
    /// Lowest timestamp a packet not yet queued may carry.
    bound: Timestamp,
    /// Whether the stream is a graph input, subject to the queue limit.
    bounded: bool,
    /// Set when the owning node closed; later packets are discarded.
    discarding: bool,
}

impl InputStreamQueue {
    pub fn new(name: impl Into<String>, bounded: bool) -> Self {
        Self {
            name: name.into(),
            packets: VecDeque::new(),
            bound: Timestamp::PRE_STREAM,
            bounded,
            discarding: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn is_bounded(&self) -> bool {
        self.bounded
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Appends a packet. Its producer has already checked the ordering.
    pub fn push(&mut self, packet: Packet) {
        if self.discarding {
            return;
        }
        self.bound = self.bound.max(packet.timestamp().next_allowed_in_stream());
        self.packets.push_back(packet);
    }

    /// Raises the bound; lowering it is ignored.
    pub fn set_bound(&mut self, bound: Timestamp) {
        self.bound = self.bound.max(bound);
    }

    pub const fn bound(&self) -> Timestamp {
        self.bound
    }

    pub fn front_timestamp(&self) -> Option<Timestamp> {
        self.packets.front().map(Packet::timestamp)
    }

    /// Lowest timestamp this input may still deliver.
    pub fn settled_bound(&self) -> Timestamp {
        self.front_timestamp().unwrap_or(self.bound)
    }

    /// True when nothing is queued and nothing more can arrive.
    pub fn is_done(&self) -> bool {
        self.packets.is_empty() && self.bound == Timestamp::DONE
    }

    /// Pops the front packet if it is at `timestamp`, else returns an empty one.
    pub fn pop_at(&mut self, timestamp: Timestamp) -> Packet {
        if self.front_timestamp() == Some(timestamp) {
            if let Some(packet) = self.packets.pop_front() {
                return packet;
            }
        }
        Packet::empty().into_at(timestamp)
    }

    /// Drops queued packets and ignores later ones.
    pub fn discard(&mut self) {
        self.discarding = true;
        self.packets.clear();
        self.bound = Timestamp::DONE;
    }

    /// Restores the queue to its state before a run.
    pub fn reset(&mut self) {
        self.packets.clear();
        self.bound = Timestamp::PRE_STREAM;
        self.discarding = false;
    }
}
