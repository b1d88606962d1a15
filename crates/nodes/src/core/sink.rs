// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Sink calculator
//!
//! Accepts any packets on any number of inputs and discards them.
//! Useful as a terminal node for side-branches and for graph wiring where a
//! stream must be consumed.

use flowkit_core::{
    Calculator, CalculatorContext, CalculatorContract, CalculatorDefinition, ProcessOutcome, Result,
};

#[derive(Debug, Default)]
pub struct SinkCalculator {
    received: u64,
}

impl CalculatorDefinition for SinkCalculator {
    fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
        let ids: Vec<_> = cc.input_types().iter().map(|(id, _)| id).collect();
        for id in ids {
            if let Some(slot) = cc.inputs().by_id(id) {
                slot.set_any();
            }
        }
        Ok(())
    }

    fn create(_cc: &CalculatorContract) -> Result<Self> {
        Ok(Self::default())
    }
}

impl Calculator for SinkCalculator {
    fn process(&mut self, cc: &mut CalculatorContext) -> Result<ProcessOutcome> {
        if cc.inputs().num_entries() == 0 {
            return Ok(ProcessOutcome::Stop);
        }
        self.received += cc.inputs().iter().filter(|(_, p)| !p.is_empty()).count() as u64;
        Ok(ProcessOutcome::Continue)
    }

    fn close(&mut self, cc: &mut CalculatorContext) -> Result<()> {
        tracing::debug!(node = %cc.node_name(), received = self.received, "Sink closed");
        Ok(())
    }
}

pub fn register(registry: &mut flowkit_core::CalculatorRegistry) {
    registry.register_with_description::<SinkCalculator>(
        "SinkCalculator",
        "Consumes any number of input streams and discards every packet.",
    );
}
