// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Test utilities for calculator testing
//!
//! [`CalculatorHarness`] drives one calculator through its lifecycle without
//! an engine: it builds the contract from a node description, hands the
//! calculator explicit input sets and collects everything written to the
//! output shards, keyed by stream name.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc, clippy::missing_errors_doc)]

use crate::register_nodes;
use flowkit_api::NodeConfig;
use flowkit_core::{
    fill_packet_set, Calculator, CalculatorContext, CalculatorContract, CalculatorRegistry, Packet,
    PacketSet, ProcessOutcome, Result, ServiceMap, TagMap, Timestamp,
};
use std::collections::HashMap;
use std::sync::Arc;

pub struct CalculatorHarness {
    contract: Arc<CalculatorContract>,
    calculator: Box<dyn Calculator>,
    context: Option<CalculatorContext>,
    side_packets: HashMap<String, Packet>,
    outputs: HashMap<String, Vec<Packet>>,
}

impl CalculatorHarness {
    /// Builds the contract and instance of `node` from the built-in registry.
    pub fn new(node: &NodeConfig) -> Result<Self> {
        let mut registry = CalculatorRegistry::new();
        register_nodes(&mut registry);
        let contract = registry.build_contract(node)?;
        let calculator = registry.create(&contract)?;
        Ok(Self {
            contract: Arc::new(contract),
            calculator,
            context: None,
            side_packets: HashMap::new(),
            outputs: HashMap::new(),
        })
    }

    /// Provides an input side packet by graph name.
    #[must_use]
    pub fn with_side_packet(mut self, name: &str, packet: Packet) -> Self {
        self.side_packets.insert(name.to_string(), packet);
        self
    }

    fn build_context(&self) -> CalculatorContext {
        let side_packets = fill_packet_set(
            "input side packet",
            self.contract.input_side_packet_types(),
            &self.side_packets,
        )
        .unwrap();
        let headers = PacketSet::new(Arc::clone(self.contract.input_types().tag_map()));
        CalculatorContext::new(Arc::clone(&self.contract), side_packets, headers, ServiceMap::new())
    }

    fn parts(&mut self) -> (&mut Box<dyn Calculator>, &mut CalculatorContext) {
        if self.context.is_none() {
            self.context = Some(self.build_context());
        }
        (&mut self.calculator, self.context.as_mut().unwrap())
    }

    fn collect(&mut self) {
        let Some(context) = self.context.as_mut() else {
            return;
        };
        for shard in context.outputs().iter_mut() {
            let name = shard.name().to_string();
            let packets = shard.take_packets();
            self.outputs.entry(name).or_default().extend(packets);
        }
    }

    pub fn open(&mut self) -> Result<()> {
        let (calculator, cc) = self.parts();
        cc.allow_headers(true);
        let result = calculator.open(cc);
        cc.allow_headers(false);
        self.collect();
        result
    }

    /// Runs `process` with the given packets (by input stream name) at `timestamp`.
    /// Inputs not listed receive empty packets.
    pub fn process(
        &mut self,
        timestamp: Timestamp,
        packets: &[(&str, Packet)],
    ) -> Result<ProcessOutcome> {
        let tag_map: Arc<TagMap> = Arc::clone(self.contract.input_types().tag_map());
        let mut inputs = PacketSet::new(Arc::clone(&tag_map));
        for (name, packet) in packets {
            let id = tag_map.id_for_name(name).unwrap();
            inputs.set(id, packet.at(timestamp))?;
        }
        let (calculator, cc) = self.parts();
        cc.set_inputs(timestamp, inputs);
        let result = calculator.process(cc);
        self.collect();
        result
    }

    /// Runs `process` on a calculator without inputs.
    pub fn process_source(&mut self) -> Result<ProcessOutcome> {
        let (calculator, cc) = self.parts();
        cc.clear_inputs();
        let result = calculator.process(cc);
        self.collect();
        result
    }

    pub fn close(&mut self) -> Result<()> {
        let (calculator, cc) = self.parts();
        let result = calculator.close(cc);
        self.collect();
        result
    }

    /// Everything emitted so far on the output stream `name`.
    pub fn output(&self, name: &str) -> Vec<Packet> {
        self.outputs.get(name).cloned().unwrap_or_default()
    }

    /// The output side packet `name`, once set.
    pub fn output_side_packet(&mut self, name: &str) -> Option<Packet> {
        self.context
            .as_mut()?
            .output_side_packets()
            .iter_set()
            .find(|(n, _)| *n == name)
            .map(|(_, p)| p.clone())
    }
}
