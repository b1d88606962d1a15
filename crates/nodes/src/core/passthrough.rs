// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use flowkit_core::{
    Calculator, CalculatorContext, CalculatorContract, CalculatorDefinition, FlowKitError,
    ProcessOutcome, Result,
};

/// Forwards every input to the output at the same position, unchanged.
///
/// Inputs and outputs are matched by tag and index, so `IN:0:a` feeds
/// `IN:0:b` and untagged inputs feed untagged outputs. Input side packets are
/// forwarded to output side packets the same way. Useful for testing graph
/// wiring and for renaming streams at subgraph boundaries.
#[derive(Default)]
pub struct PassThroughCalculator;

fn matching_tags(cc: &CalculatorContract, side: bool) -> Result<Vec<(String, usize)>> {
    let (inputs, outputs, kind) = if side {
        (cc.input_side_packet_types(), cc.output_side_packet_types(), "side packets")
    } else {
        (cc.input_types(), cc.output_types(), "streams")
    };
    let inputs: Vec<_> = inputs.tag_map().entries().map(|e| (e.tag.clone(), e.index)).collect();
    let outputs: Vec<_> = outputs.tag_map().entries().map(|e| (e.tag.clone(), e.index)).collect();
    if inputs != outputs {
        return Err(FlowKitError::Configuration(format!(
            "Node '{}' must have matching input and output {kind}",
            cc.node_name()
        )));
    }
    Ok(inputs)
}

impl CalculatorDefinition for PassThroughCalculator {
    fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
        for (tag, index) in matching_tags(cc, false)? {
            cc.inputs().get_mut(&tag, index).set_any();
            cc.outputs().get_mut(&tag, index).set_any();
        }
        for (tag, index) in matching_tags(cc, true)? {
            cc.input_side_packets().get_mut(&tag, index).set_any();
            cc.output_side_packets().get_mut(&tag, index).set_any();
        }
        cc.set_timestamp_offset(0);
        Ok(())
    }

    fn create(_cc: &CalculatorContract) -> Result<Self> {
        Ok(Self)
    }
}

impl Calculator for PassThroughCalculator {
    fn open(&mut self, cc: &mut CalculatorContext) -> Result<()> {
        let headers: Vec<_> = cc
            .input_headers()
            .iter()
            .filter(|(_, p)| !p.is_empty())
            .map(|(id, p)| (id, p.clone()))
            .collect();
        for (id, header) in headers {
            if let Some(shard) = cc.outputs().by_id(id) {
                shard.set_header(header)?;
            }
        }

        let side_packets: Vec<_> = cc
            .input_side_packets()
            .tag_map()
            .entries()
            .map(|e| (e.tag.clone(), e.index, e.id))
            .collect();
        for (tag, index, id) in side_packets {
            let packet = cc.input_side_packets().by_id(id).cloned().unwrap_or_default();
            if !packet.is_empty() {
                cc.output_side_packets().set(&tag, index, packet)?;
            }
        }
        Ok(())
    }

    fn process(&mut self, cc: &mut CalculatorContext) -> Result<ProcessOutcome> {
        if cc.inputs().num_entries() == 0 {
            // Side-packet-only pass-through has nothing to stream.
            return Ok(ProcessOutcome::Stop);
        }
        let packets: Vec<_> = cc
            .inputs()
            .iter()
            .filter(|(_, p)| !p.is_empty())
            .map(|(id, p)| (id, p.clone()))
            .collect();
        for (id, packet) in packets {
            if let Some(shard) = cc.outputs().by_id(id) {
                shard.add_packet(packet)?;
            }
        }
        Ok(ProcessOutcome::Continue)
    }
}

pub fn register(registry: &mut flowkit_core::CalculatorRegistry) {
    registry.register_with_description::<PassThroughCalculator>(
        "PassThroughCalculator",
        "Forwards each input stream and side packet to the output at the same tag and index.",
    );
}
