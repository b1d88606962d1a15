// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Callback sink
//!
//! Hands every packet of its single input to a closure supplied as the
//! `CALLBACK` input side packet. The closure runs on the worker thread that
//! processes the node.

use flowkit_core::{
    Calculator, CalculatorContext, CalculatorContract, CalculatorDefinition, FlowKitError, Packet,
    ProcessOutcome, Result,
};
use std::sync::Arc;

/// Payload type of the `CALLBACK` side packet.
pub type PacketCallback = Arc<dyn Fn(&Packet) + Send + Sync>;

#[derive(Default)]
pub struct CallbackCalculator {
    callback: Option<PacketCallback>,
}

impl CalculatorDefinition for CallbackCalculator {
    fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
        cc.inputs().index(0).set_any();
        cc.input_side_packets().tag("CALLBACK").set::<PacketCallback>();
        Ok(())
    }

    fn create(_cc: &CalculatorContract) -> Result<Self> {
        Ok(Self::default())
    }
}

impl Calculator for CallbackCalculator {
    fn open(&mut self, cc: &mut CalculatorContext) -> Result<()> {
        self.callback = Some(Arc::clone(cc.side_packet("CALLBACK")?.get::<PacketCallback>()?));
        Ok(())
    }

    fn process(&mut self, cc: &mut CalculatorContext) -> Result<ProcessOutcome> {
        let callback = self
            .callback
            .as_ref()
            .ok_or_else(|| FlowKitError::InvalidState("process called before open".to_string()))?;
        let packet = cc.inputs().index(0)?;
        if !packet.is_empty() {
            callback(packet);
        }
        Ok(ProcessOutcome::Continue)
    }

    fn close(&mut self, _cc: &mut CalculatorContext) -> Result<()> {
        self.callback = None;
        Ok(())
    }
}

pub fn register(registry: &mut flowkit_core::CalculatorRegistry) {
    registry.register_with_description::<CallbackCalculator>(
        "CallbackCalculator",
        "Invokes the CALLBACK side packet for every input packet.",
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::CalculatorHarness;
    use flowkit_api::NodeConfig;
    use flowkit_core::Timestamp;
    use std::sync::Mutex;

    #[test]
    fn test_callback_sees_each_packet() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: PacketCallback = Arc::new(move |p: &Packet| {
            sink.lock().unwrap().push(p.timestamp());
        });

        let node = NodeConfig::new("CallbackCalculator")
            .input_stream("in")
            .input_side_packet("CALLBACK:cb");
        let mut harness =
            CalculatorHarness::new(&node).unwrap().with_side_packet("cb", Packet::new(callback));
        harness.open().unwrap();
        harness.process(Timestamp::new(1), &[("in", Packet::new(1_i32))]).unwrap();
        harness.process(Timestamp::new(2), &[]).unwrap();
        harness.process(Timestamp::new(3), &[("in", Packet::new(3_i32))]).unwrap();
        harness.close().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Timestamp::new(1), Timestamp::new(3)]);
    }
}
