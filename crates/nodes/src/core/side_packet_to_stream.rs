// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Side packet to stream
//!
//! Turns each untagged input side packet into a single-packet stream. The
//! output tag chooses the timestamp:
//!
//! - `AT_PRESTREAM`: `Timestamp::PRE_STREAM`, emitted in `open`
//! - `AT_ZERO`: timestamp 0, emitted in `open`
//! - `AT_POSTSTREAM`: `Timestamp::POST_STREAM`, emitted in `close`
//!
//! Exactly one output tag must be used, with as many entries as there are
//! input side packets.

use flowkit_core::{
    Calculator, CalculatorContext, CalculatorContract, CalculatorDefinition, FlowKitError,
    ProcessOutcome, Result, Timestamp,
};

const OUTPUT_TAGS: [(&str, Timestamp); 3] = [
    ("AT_PRESTREAM", Timestamp::PRE_STREAM),
    ("AT_ZERO", Timestamp::new(0)),
    ("AT_POSTSTREAM", Timestamp::POST_STREAM),
];

#[derive(Debug)]
pub struct SidePacketToStreamCalculator {
    tag: &'static str,
    timestamp: Timestamp,
}

fn selected_tag(cc: &CalculatorContract) -> Result<(&'static str, Timestamp)> {
    let outputs = cc.output_types();
    let used: Vec<_> = OUTPUT_TAGS.iter().filter(|(tag, _)| outputs.has_tag(tag)).collect();
    match used.as_slice() {
        [(tag, ts)] if outputs.num_entries() == outputs.num_entries_for_tag(tag) => Ok((*tag, *ts)),
        _ => Err(FlowKitError::Configuration(format!(
            "Node '{}' must use exactly one of AT_PRESTREAM, AT_ZERO or AT_POSTSTREAM",
            cc.node_name()
        ))),
    }
}

impl CalculatorDefinition for SidePacketToStreamCalculator {
    fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
        let (tag, _) = selected_tag(cc)?;
        let count = cc.output_types().num_entries_for_tag(tag);
        if cc.input_side_packet_types().num_entries_for_tag("") != count
            || cc.input_side_packet_types().num_entries() != count
        {
            return Err(FlowKitError::Configuration(format!(
                "Node '{}' needs one untagged input side packet per {tag} output",
                cc.node_name()
            )));
        }
        if cc.input_types().num_entries() > 0 {
            return Err(FlowKitError::Configuration(format!(
                "Node '{}' takes no input streams",
                cc.node_name()
            )));
        }
        for index in 0..count {
            cc.input_side_packets().index(index).set_any();
            cc.outputs().get_mut(tag, index).set_any();
        }
        Ok(())
    }

    fn create(cc: &CalculatorContract) -> Result<Self> {
        let (tag, timestamp) = selected_tag(cc)?;
        Ok(Self { tag, timestamp })
    }
}

impl SidePacketToStreamCalculator {
    fn emit(&self, cc: &mut CalculatorContext) -> Result<()> {
        let count = cc.outputs().num_entries_for_tag(self.tag);
        for index in 0..count {
            let packet = cc.input_side_packets().index(index)?.at(self.timestamp);
            cc.outputs().get(self.tag, index)?.add_packet(packet)?;
        }
        Ok(())
    }
}

impl Calculator for SidePacketToStreamCalculator {
    fn open(&mut self, cc: &mut CalculatorContext) -> Result<()> {
        if self.timestamp != Timestamp::POST_STREAM {
            self.emit(cc)?;
        }
        Ok(())
    }

    fn process(&mut self, _cc: &mut CalculatorContext) -> Result<ProcessOutcome> {
        Ok(ProcessOutcome::Stop)
    }

    fn close(&mut self, cc: &mut CalculatorContext) -> Result<()> {
        if self.timestamp == Timestamp::POST_STREAM {
            self.emit(cc)?;
        }
        Ok(())
    }
}

pub fn register(registry: &mut flowkit_core::CalculatorRegistry) {
    registry.register_with_description::<SidePacketToStreamCalculator>(
        "SidePacketToStreamCalculator",
        "Emits each input side packet as a single-packet stream.",
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::CalculatorHarness;
    use flowkit_api::NodeConfig;
    use flowkit_core::Packet;

    #[test]
    fn test_prestream_in_open() {
        let node = NodeConfig::new("SidePacketToStreamCalculator")
            .input_side_packet("value")
            .output_stream("AT_PRESTREAM:out");
        let mut harness =
            CalculatorHarness::new(&node).unwrap().with_side_packet("value", Packet::new(9_i32));
        harness.open().unwrap();
        let out = harness.output("out");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp(), Timestamp::PRE_STREAM);
    }

    #[test]
    fn test_poststream_in_close() {
        let node = NodeConfig::new("SidePacketToStreamCalculator")
            .input_side_packet("value")
            .output_stream("AT_POSTSTREAM:out");
        let mut harness =
            CalculatorHarness::new(&node).unwrap().with_side_packet("value", Packet::new(9_i32));
        harness.open().unwrap();
        assert!(harness.output("out").is_empty());
        assert_eq!(harness.process_source().unwrap(), ProcessOutcome::Stop);
        harness.close().unwrap();
        assert_eq!(harness.output("out")[0].timestamp(), Timestamp::POST_STREAM);
    }

    #[test]
    fn test_requires_exactly_one_tag() {
        let node = NodeConfig::new("SidePacketToStreamCalculator")
            .input_side_packet("a")
            .input_side_packet("b")
            .output_stream("AT_ZERO:x")
            .output_stream("AT_POSTSTREAM:y");
        assert!(CalculatorHarness::new(&node).is_err());
    }
}
