// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-node build-time contract.
//!
//! [`CalculatorContract::initialize`] turns one node description into four
//! empty [`PacketTypeSet`]s plus resolved options. The calculator's static
//! contract routine then declares port types, service requests and an
//! optional timestamp offset. After the routine runs the contract is frozen
//! and shared by every run of the graph.

use crate::error::{FlowKitError, Result};
use crate::options::{NodeOptions, OptionsMap};
use crate::packet_type::PacketTypeSet;
use crate::service::{GraphService, GraphServiceRequest};
use crate::tag_map::TagMap;
use flowkit_api::{InputStreamHandlerConfig, NodeConfig};
use std::any::Any;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct CalculatorContract {
    node_name: String,
    calculator: String,
    inputs: PacketTypeSet,
    outputs: PacketTypeSet,
    input_side_packets: PacketTypeSet,
    output_side_packets: PacketTypeSet,
    options: OptionsMap,
    configured_handler: Option<InputStreamHandlerConfig>,
    default_handler: Option<InputStreamHandlerConfig>,
    service_requests: Vec<GraphServiceRequest>,
    timestamp_offset: Option<i64>,
}

fn tag_map(node: &NodeConfig, kind: &str, specs: &[String]) -> Result<Arc<TagMap>> {
    TagMap::new(specs).map(Arc::new).map_err(|e| {
        FlowKitError::Configuration(format!("Node '{}' {kind}: {e}", node.display_name()))
    })
}

impl CalculatorContract {
    /// Builds the tag maps and options of `node`. Port types are left unset.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Configuration` for malformed port lists or
    /// ambiguous options.
    pub fn initialize(node: &NodeConfig) -> Result<Self> {
        Ok(Self {
            node_name: node.display_name().to_string(),
            calculator: node.calculator.clone(),
            inputs: PacketTypeSet::new(tag_map(node, "input streams", &node.input_streams)?),
            outputs: PacketTypeSet::new(tag_map(node, "output streams", &node.output_streams)?),
            input_side_packets: PacketTypeSet::new(tag_map(
                node,
                "input side packets",
                &node.input_side_packets,
            )?),
            output_side_packets: PacketTypeSet::new(tag_map(
                node,
                "output side packets",
                &node.output_side_packets,
            )?),
            options: OptionsMap::from_node(node)?,
            configured_handler: node.input_stream_handler.clone(),
            default_handler: None,
            service_requests: Vec::new(),
            timestamp_offset: None,
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn calculator(&self) -> &str {
        &self.calculator
    }

    pub fn inputs(&mut self) -> &mut PacketTypeSet {
        &mut self.inputs
    }

    pub fn outputs(&mut self) -> &mut PacketTypeSet {
        &mut self.outputs
    }

    pub fn input_side_packets(&mut self) -> &mut PacketTypeSet {
        &mut self.input_side_packets
    }

    pub fn output_side_packets(&mut self) -> &mut PacketTypeSet {
        &mut self.output_side_packets
    }

    pub const fn input_types(&self) -> &PacketTypeSet {
        &self.inputs
    }

    pub const fn output_types(&self) -> &PacketTypeSet {
        &self.outputs
    }

    pub const fn input_side_packet_types(&self) -> &PacketTypeSet {
        &self.input_side_packets
    }

    pub const fn output_side_packet_types(&self) -> &PacketTypeSet {
        &self.output_side_packets
    }

    pub const fn options_map(&self) -> &OptionsMap {
        &self.options
    }

    /// Typed options lookup.
    ///
    /// # Errors
    ///
    /// See [`OptionsMap::get`].
    pub fn options<T: NodeOptions>(&self) -> Result<T> {
        self.options.get()
    }

    /// Replaces the options; used when subgraph expansion injects values.
    pub fn set_options(&mut self, options: OptionsMap) {
        self.options = options;
    }

    /// Default stream handler for this calculator. A handler named in the node
    /// description takes precedence.
    pub fn set_input_stream_handler(&mut self, name: impl Into<String>) {
        self.default_handler = Some(InputStreamHandlerConfig::new(name));
    }

    /// Handler chosen by the node description or, failing that, the calculator.
    pub fn input_stream_handler(&self) -> Option<&InputStreamHandlerConfig> {
        self.configured_handler.as_ref().or(self.default_handler.as_ref())
    }

    /// Requests a graph service. The returned request can be marked optional.
    pub fn use_service<T: Any>(&mut self, service: &GraphService<T>) -> &mut GraphServiceRequest {
        let position = match self.service_requests.iter().position(|r| r.key() == service.key()) {
            Some(position) => position,
            None => {
                self.service_requests.push(GraphServiceRequest::new(service));
                self.service_requests.len() - 1
            },
        };
        &mut self.service_requests[position]
    }

    pub fn service_requests(&self) -> &[GraphServiceRequest] {
        &self.service_requests
    }

    /// Declares that every output timestamp is the input timestamp plus `offset`,
    /// letting the scheduler propagate timestamp bounds downstream.
    pub fn set_timestamp_offset(&mut self, offset: i64) {
        self.timestamp_offset = Some(offset);
    }

    pub const fn timestamp_offset(&self) -> Option<i64> {
        self.timestamp_offset
    }

    /// Checks the four port sets after the contract routine ran.
    ///
    /// # Errors
    ///
    /// Returns one `FlowKitError::Contract` listing every undeclared wired port
    /// and every unconnected required port across all four sets.
    pub fn validate(&self) -> Result<()> {
        let mut issues = self.inputs.declaration_issues("input stream");
        issues.extend(self.outputs.declaration_issues("output stream"));
        issues.extend(self.input_side_packets.declaration_issues("input side packet"));
        issues.extend(self.output_side_packets.declaration_issues("output side packet"));
        if issues.is_empty() {
            Ok(())
        } else {
            Err(FlowKitError::contract_issues(
                &format!("Node '{}' ({})", self.node_name, self.calculator),
                &issues,
            ))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn contract_routine(cc: &mut CalculatorContract) {
        cc.inputs().tag("VIDEO").set::<String>();
        cc.inputs().tag("AUDIO").set::<String>();
        cc.outputs().index(0).set_any();
    }

    #[test]
    fn test_two_missing_inputs_reported_together() {
        let node = NodeConfig::new("Muxer").name("mux").output_stream("out");
        let mut cc = CalculatorContract::initialize(&node).unwrap();
        contract_routine(&mut cc);

        let message = cc.validate().unwrap_err().to_string();
        assert!(message.contains("VIDEO:0"), "{message}");
        assert!(message.contains("AUDIO:0"), "{message}");
    }

    #[test]
    fn test_initialize_is_deterministic() {
        let node = NodeConfig::new("Muxer")
            .input_stream("VIDEO:v")
            .input_stream("AUDIO:a")
            .output_stream("out");
        let mut first = CalculatorContract::initialize(&node).unwrap();
        let mut second = CalculatorContract::initialize(&node).unwrap();
        contract_routine(&mut first);
        contract_routine(&mut second);
        assert!(first.validate().is_ok());
        assert_eq!(first, second);
    }

    #[test]
    fn test_handler_precedence() {
        let node = NodeConfig::new("X");
        let mut cc = CalculatorContract::initialize(&node).unwrap();
        cc.set_input_stream_handler("ImmediateInputStreamHandler");
        assert_eq!(cc.input_stream_handler().unwrap().name, "ImmediateInputStreamHandler");

        let node = NodeConfig::new("X").input_stream_handler("DefaultInputStreamHandler");
        let mut cc = CalculatorContract::initialize(&node).unwrap();
        cc.set_input_stream_handler("ImmediateInputStreamHandler");
        assert_eq!(cc.input_stream_handler().unwrap().name, "DefaultInputStreamHandler");
    }

    #[test]
    fn test_use_service_dedups() {
        static SVC: GraphService<u32> = GraphService::new("test.Svc");
        let mut cc = CalculatorContract::initialize(&NodeConfig::new("X")).unwrap();
        cc.use_service(&SVC);
        cc.use_service(&SVC).optional();
        assert_eq!(cc.service_requests().len(), 1);
        assert!(cc.service_requests()[0].is_optional());
    }
}
