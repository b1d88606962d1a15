// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The per-run context handed to every calculator method.
//!
//! A [`CalculatorContext`] is owned by its node for the whole run and is only
//! ever touched by the worker currently running one of that node's methods.
//! It exposes:
//!
//! - the input set being processed and its timestamp
//! - one [`OutputStreamShard`] per output stream, buffering what the method emits
//! - input side packets, and output side packets to be set during `open`
//! - the graph services bound for this node
//!
//! The engine drains the shards after every method returns and publishes the
//! packets and timestamp bounds to downstream queues.

use crate::contract::CalculatorContract;
use crate::error::{FlowKitError, Result};
use crate::options::NodeOptions;
use crate::packet::Packet;
use crate::packet_type::{PacketSet, PacketType, PacketTypeSet};
use crate::service::{GraphService, ServiceMap};
use crate::tag_map::{CollectionItemId, TagMap};
use crate::timestamp::Timestamp;
use std::any::Any;
use std::sync::Arc;

/// Buffers the packets one method invocation emits on one output stream.
///
/// Admission rules are enforced here, at emit time, so a calculator sees the
/// error from its own `add` call:
/// - timestamps strictly increase across the whole run
/// - `PreStream` / `PostStream` packets must be the only packet of the stream
/// - nothing may be added after [`Self::close`]
#[derive(Debug, Clone)]
pub struct OutputStreamShard {
    name: String,
    packet_type: PacketType,
    next_allowed: Timestamp,
    explicit_bound: Timestamp,
    emitted_any: bool,
    pending: Vec<Packet>,
    header: Option<Packet>,
    header_allowed: bool,
    closed: bool,
}

impl OutputStreamShard {
    fn new(name: String, packet_type: PacketType) -> Self {
        Self {
            name,
            packet_type,
            next_allowed: Timestamp::PRE_STREAM,
            explicit_bound: Timestamp::UNSET,
            emitted_any: false,
            pending: Vec::new(),
            header: None,
            header_allowed: false,
            closed: false,
        }
    }

    /// Stream name as wired in the graph.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Emits `value` at `timestamp`.
    ///
    /// # Errors
    ///
    /// See [`Self::add_packet`].
    pub fn add<T: Any + Send + Sync>(&mut self, value: T, timestamp: Timestamp) -> Result<()> {
        self.add_packet(Packet::new(value).into_at(timestamp))
    }

    /// Emits an already built packet.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::StreamAdmission` when the timestamp is not
    /// admissible and `FlowKitError::Contract` when the payload type does not
    /// match the declared output type.
    pub fn add_packet(&mut self, packet: Packet) -> Result<()> {
        let ts = packet.timestamp();
        if self.closed {
            return Err(FlowKitError::StreamAdmission(format!(
                "Output stream '{}' is closed; packet at {ts} rejected",
                self.name
            )));
        }
        if packet.is_empty() {
            return Err(FlowKitError::StreamAdmission(format!(
                "Empty packet added to output stream '{}'",
                self.name
            )));
        }
        if !ts.is_allowed_in_stream() {
            return Err(FlowKitError::StreamAdmission(format!(
                "Timestamp {ts} is not allowed on output stream '{}'",
                self.name
            )));
        }
        if (ts == Timestamp::PRE_STREAM || ts == Timestamp::POST_STREAM) && self.emitted_any {
            return Err(FlowKitError::StreamAdmission(format!(
                "{ts} packet on output stream '{}' must be its only packet",
                self.name
            )));
        }
        let floor = self.next_allowed.max(self.explicit_bound);
        if ts < floor {
            return Err(FlowKitError::StreamAdmission(format!(
                "Timestamp {ts} on output stream '{}' is below the next allowed timestamp {floor}",
                self.name
            )));
        }
        self.packet_type
            .validate(&packet)
            .map_err(|e| FlowKitError::Contract(format!("Output stream '{}': {e}", self.name)))?;

        self.next_allowed = ts.next_allowed_in_stream();
        self.emitted_any = true;
        self.pending.push(packet);
        Ok(())
    }

    /// Promises that no packet below `bound` will be emitted on this stream.
    pub fn set_next_timestamp_bound(&mut self, bound: Timestamp) {
        if !self.closed && bound > self.explicit_bound {
            self.explicit_bound = bound;
        }
    }

    /// Ends the stream for the rest of the run.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Sets the stream header. Only allowed while the node is opening.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::InvalidState` outside of `open`.
    pub fn set_header(&mut self, header: Packet) -> Result<()> {
        if !self.header_allowed {
            return Err(FlowKitError::InvalidState(format!(
                "Header of output stream '{}' can only be set during open",
                self.name
            )));
        }
        self.header = Some(header);
        Ok(())
    }

    pub const fn header(&self) -> Option<&Packet> {
        self.header.as_ref()
    }

    /// Lowest timestamp this stream may still carry; `DONE` once closed.
    pub fn next_timestamp_bound(&self) -> Timestamp {
        if self.closed {
            Timestamp::DONE
        } else {
            self.next_allowed.max(self.explicit_bound)
        }
    }

    /// Hands the buffered packets to the engine.
    pub fn take_packets(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.pending)
    }
}

/// All output shards of a node, addressable like a [`PacketSet`].
#[derive(Debug, Clone)]
pub struct OutputShards {
    tag_map: Arc<TagMap>,
    shards: Vec<OutputStreamShard>,
}

impl OutputShards {
    fn new(types: &PacketTypeSet) -> Self {
        let tag_map = Arc::clone(types.tag_map());
        let shards = tag_map
            .entries()
            .map(|e| {
                let packet_type = types.get(e.id).copied().unwrap_or_default();
                OutputStreamShard::new(e.name.clone(), packet_type)
            })
            .collect();
        Self { tag_map, shards }
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tag_map.has_tag(tag)
    }

    pub fn num_entries_for_tag(&self, tag: &str) -> usize {
        self.tag_map.num_entries_for_tag(tag)
    }

    /// Shard for `tag:0`.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Contract` when the port is not wired.
    pub fn tag(&mut self, tag: &str) -> Result<&mut OutputStreamShard> {
        self.get(tag, 0)
    }

    /// Shard for `tag:index`.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Contract` when the port is not wired.
    pub fn get(&mut self, tag: &str, index: usize) -> Result<&mut OutputStreamShard> {
        let id = self.tag_map.id(tag, index).ok_or_else(|| {
            FlowKitError::Contract(format!("No output stream '{tag}:{index}' is wired"))
        })?;
        Ok(&mut self.shards[id.value()])
    }

    /// Shard for the `index`-th untagged output.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Contract` when the port is not wired.
    pub fn index(&mut self, index: usize) -> Result<&mut OutputStreamShard> {
        self.get("", index)
    }

    pub fn by_id(&mut self, id: CollectionItemId) -> Option<&mut OutputStreamShard> {
        self.shards.get_mut(id.value())
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputStreamShard> {
        self.shards.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut OutputStreamShard> {
        self.shards.iter_mut()
    }

    /// Closes every output stream.
    pub fn close_all(&mut self) {
        for shard in &mut self.shards {
            shard.close();
        }
    }
}

/// Output side packets, each settable once per run.
#[derive(Debug, Clone)]
pub struct OutputSidePackets {
    types: PacketTypeSet,
    packets: Vec<Option<Packet>>,
}

impl OutputSidePackets {
    fn new(types: PacketTypeSet) -> Self {
        let packets = vec![None; types.num_entries()];
        Self { types, packets }
    }

    /// Sets `tag:0`.
    ///
    /// # Errors
    ///
    /// See [`Self::set`].
    pub fn set_tag(&mut self, tag: &str, packet: Packet) -> Result<()> {
        self.set(tag, 0, packet)
    }

    /// Sets `tag:index`.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Contract` for an unwired port or a type mismatch,
    /// and `FlowKitError::InvalidState` when the side packet was already set.
    pub fn set(&mut self, tag: &str, index: usize, packet: Packet) -> Result<()> {
        let tag_map = Arc::clone(self.types.tag_map());
        let id = tag_map.id(tag, index).ok_or_else(|| {
            FlowKitError::Contract(format!("No output side packet '{tag}:{index}' is wired"))
        })?;
        let port = tag_map.describe(id);
        if let Some(expected) = self.types.get(id) {
            expected
                .validate(&packet)
                .map_err(|e| FlowKitError::Contract(format!("Output side packet {port}: {e}")))?;
        }
        let slot = &mut self.packets[id.value()];
        if slot.is_some() {
            return Err(FlowKitError::InvalidState(format!(
                "Output side packet {port} was already set"
            )));
        }
        *slot = Some(packet);
        Ok(())
    }

    /// Side packets set so far, keyed by graph name.
    pub fn iter_set(&self) -> impl Iterator<Item = (&str, &Packet)> {
        self.types
            .tag_map()
            .entries()
            .zip(&self.packets)
            .filter_map(|(e, p)| p.as_ref().map(|p| (e.name.as_str(), p)))
    }

    /// Graph names of side packets that were never set.
    pub fn unset_names(&self) -> Vec<String> {
        self.types
            .tag_map()
            .entries()
            .zip(&self.packets)
            .filter(|(_, p)| p.is_none())
            .map(|(e, _)| e.name.clone())
            .collect()
    }
}

/// Everything a calculator method can see and do.
pub struct CalculatorContext {
    contract: Arc<CalculatorContract>,
    input_timestamp: Timestamp,
    inputs: PacketSet,
    input_headers: PacketSet,
    outputs: OutputShards,
    input_side_packets: PacketSet,
    output_side_packets: OutputSidePackets,
    services: ServiceMap,
    offset: Option<i64>,
}

impl CalculatorContext {
    /// Builds the context for one run of a node.
    pub fn new(
        contract: Arc<CalculatorContract>,
        input_side_packets: PacketSet,
        input_headers: PacketSet,
        services: ServiceMap,
    ) -> Self {
        let inputs = PacketSet::new(Arc::clone(contract.input_types().tag_map()));
        let outputs = OutputShards::new(contract.output_types());
        let output_side_packets =
            OutputSidePackets::new(contract.output_side_packet_types().clone());
        let offset = contract.timestamp_offset();
        Self {
            contract,
            input_timestamp: Timestamp::UNSET,
            inputs,
            input_headers,
            outputs,
            input_side_packets,
            output_side_packets,
            services,
            offset,
        }
    }

    pub fn node_name(&self) -> &str {
        self.contract.node_name()
    }

    pub fn calculator(&self) -> &str {
        self.contract.calculator()
    }

    pub fn contract(&self) -> &CalculatorContract {
        &self.contract
    }

    /// Timestamp of the input set being processed; `Unset` in `open` and for sources.
    pub const fn input_timestamp(&self) -> Timestamp {
        self.input_timestamp
    }

    pub const fn inputs(&self) -> &PacketSet {
        &self.inputs
    }

    /// Packet on input `tag:0` at the current timestamp (possibly empty).
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Contract` when the port is not wired.
    pub fn input(&self, tag: &str) -> Result<&Packet> {
        self.inputs.tag(tag)
    }

    pub const fn input_headers(&self) -> &PacketSet {
        &self.input_headers
    }

    pub fn outputs(&mut self) -> &mut OutputShards {
        &mut self.outputs
    }

    /// Shortcut for `outputs().tag(tag)`.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Contract` when the port is not wired.
    pub fn output(&mut self, tag: &str) -> Result<&mut OutputStreamShard> {
        self.outputs.tag(tag)
    }

    pub const fn input_side_packets(&self) -> &PacketSet {
        &self.input_side_packets
    }

    /// Input side packet `tag:0`.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Contract` when the port is not wired.
    pub fn side_packet(&self, tag: &str) -> Result<&Packet> {
        self.input_side_packets.tag(tag)
    }

    pub fn output_side_packets(&mut self) -> &mut OutputSidePackets {
        &mut self.output_side_packets
    }

    /// Typed options lookup.
    ///
    /// # Errors
    ///
    /// See [`crate::OptionsMap::get`].
    pub fn options<T: NodeOptions>(&self) -> Result<T> {
        self.contract.options()
    }

    /// A service this node requested in its contract.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Service` when the service was not requested,
    /// not provided, or has another type.
    pub fn service<T: Any + Send + Sync>(&self, service: &GraphService<T>) -> Result<Arc<T>> {
        self.services.get(service)
    }

    /// Declares that outputs are always `input timestamp + offset`, letting
    /// downstream bounds advance even when this node emits nothing.
    pub fn set_offset(&mut self, offset: i64) {
        self.offset = Some(offset);
    }

    pub const fn offset(&self) -> Option<i64> {
        self.offset
    }

    /// Installs the next input set. Called by the scheduler.
    pub fn set_inputs(&mut self, timestamp: Timestamp, inputs: PacketSet) {
        self.input_timestamp = timestamp;
        self.inputs = inputs;
    }

    /// Resets the input set to empty packets. Called by the scheduler.
    pub fn clear_inputs(&mut self) {
        self.input_timestamp = Timestamp::UNSET;
        self.inputs = PacketSet::new(Arc::clone(self.contract.input_types().tag_map()));
    }

    /// Opens or closes the window in which output headers may be set.
    pub fn allow_headers(&mut self, allowed: bool) {
        for shard in self.outputs.iter_mut() {
            shard.header_allowed = allowed;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flowkit_api::NodeConfig;

    fn context() -> CalculatorContext {
        let node = NodeConfig::new("X")
            .name("x")
            .input_stream("in")
            .output_stream("OUT:out")
            .output_side_packet("COUNT:count");
        let mut cc = CalculatorContract::initialize(&node).unwrap();
        cc.inputs().index(0).set_any();
        cc.outputs().tag("OUT").set::<i32>();
        cc.output_side_packets().tag("COUNT").set::<u64>();
        cc.validate().unwrap();
        let tag_map = Arc::new(TagMap::default());
        CalculatorContext::new(
            Arc::new(cc),
            PacketSet::new(Arc::clone(&tag_map)),
            PacketSet::new(tag_map),
            ServiceMap::new(),
        )
    }

    #[test]
    fn test_output_timestamps_must_increase() {
        let mut cc = context();
        let out = cc.output("OUT").unwrap();
        out.add(1_i32, Timestamp::new(3)).unwrap();
        out.add(2_i32, Timestamp::new(5)).unwrap();
        let dup = out.add(3_i32, Timestamp::new(5)).unwrap_err();
        assert!(matches!(dup, FlowKitError::StreamAdmission(_)));
        let back = out.add(4_i32, Timestamp::new(4)).unwrap_err();
        assert!(matches!(back, FlowKitError::StreamAdmission(_)));
        assert_eq!(out.take_packets().len(), 2);
        assert_eq!(out.next_timestamp_bound(), Timestamp::new(6));
    }

    #[test]
    fn test_output_type_is_checked() {
        let mut cc = context();
        let err = cc.output("OUT").unwrap().add("nope", Timestamp::new(0)).unwrap_err();
        assert!(matches!(err, FlowKitError::Contract(_)));
    }

    #[test]
    fn test_pre_stream_must_be_alone() {
        let mut cc = context();
        let out = cc.output("OUT").unwrap();
        out.add(1_i32, Timestamp::new(0)).unwrap();
        assert!(out.add(2_i32, Timestamp::PRE_STREAM).is_err());
        assert!(out.add(2_i32, Timestamp::POST_STREAM).is_err());
    }

    #[test]
    fn test_bounds_and_close() {
        let mut cc = context();
        let out = cc.output("OUT").unwrap();
        out.set_next_timestamp_bound(Timestamp::new(10));
        out.set_next_timestamp_bound(Timestamp::new(7));
        assert_eq!(out.next_timestamp_bound(), Timestamp::new(10));
        out.close();
        assert_eq!(out.next_timestamp_bound(), Timestamp::DONE);
        assert!(out.add(1_i32, Timestamp::new(20)).is_err());
    }

    #[test]
    fn test_explicit_bound_rejects_older_packets() {
        let mut cc = context();
        let out = cc.output("OUT").unwrap();
        out.set_next_timestamp_bound(Timestamp::new(10));
        let err = out.add(1_i32, Timestamp::new(5)).unwrap_err();
        assert!(matches!(err, FlowKitError::StreamAdmission(_)));
        out.add(2_i32, Timestamp::new(10)).unwrap();
        assert_eq!(out.take_packets().len(), 1);
        assert_eq!(out.next_timestamp_bound(), Timestamp::new(11));
    }

    #[test]
    fn test_headers_only_in_open() {
        let mut cc = context();
        assert!(cc.output("OUT").unwrap().set_header(Packet::new(0_i32)).is_err());
        cc.allow_headers(true);
        assert!(cc.output("OUT").unwrap().set_header(Packet::new(0_i32)).is_ok());
    }

    #[test]
    fn test_output_side_packet_set_once() {
        let mut cc = context();
        let side = cc.output_side_packets();
        assert!(side.set_tag("COUNT", Packet::new(1_i32)).is_err());
        side.set_tag("COUNT", Packet::new(1_u64)).unwrap();
        assert!(side.set_tag("COUNT", Packet::new(2_u64)).is_err());
        assert_eq!(side.iter_set().count(), 1);
        assert!(side.unset_names().is_empty());
    }
}
