// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Counting source
//!
//! Emits `start, start + 1, ...` on its single output, one packet per
//! `process` call, each at a timestamp equal to its position in the sequence
//! (`timestamp_start + i`). Stops after `count` packets.
//!
//! The count can also be supplied at run time through the optional
//! `MAX_COUNT` input side packet, which overrides the option.

use flowkit_core::{
    Calculator, CalculatorContext, CalculatorContract, CalculatorDefinition, FlowKitError,
    NodeOptions, ProcessOutcome, Result, Timestamp,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CountingSourceOptions {
    /// Number of packets to emit.
    pub count: u64,
    /// First emitted value.
    pub start: i64,
    /// Timestamp of the first packet.
    pub timestamp_start: i64,
    /// Fail the run from `process` after this many packets.
    pub error_after: Option<u64>,
}

impl Default for CountingSourceOptions {
    fn default() -> Self {
        Self { count: 10, start: 0, timestamp_start: 0, error_after: None }
    }
}

impl NodeOptions for CountingSourceOptions {
    const TYPE_KEY: &'static str = "flowkit.CountingSourceOptions";
}

#[derive(Debug)]
pub struct CountingSourceCalculator {
    options: CountingSourceOptions,
    emitted: u64,
}

impl CalculatorDefinition for CountingSourceCalculator {
    fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
        if cc.input_types().num_entries() > 0 {
            return Err(FlowKitError::Configuration(format!(
                "Node '{}' is a source and takes no input streams",
                cc.node_name()
            )));
        }
        cc.outputs().index(0).set::<i64>();
        cc.input_side_packets().tag("MAX_COUNT").set::<u64>().optional();
        Ok(())
    }

    fn create(cc: &CalculatorContract) -> Result<Self> {
        Ok(Self { options: cc.options_map().get_or_default()?, emitted: 0 })
    }
}

impl Calculator for CountingSourceCalculator {
    fn open(&mut self, cc: &mut CalculatorContext) -> Result<()> {
        if let Ok(limit) = cc.side_packet("MAX_COUNT") {
            if !limit.is_empty() {
                self.options.count = *limit.get::<u64>()?;
            }
        }
        self.emitted = 0;
        Ok(())
    }

    fn process(&mut self, cc: &mut CalculatorContext) -> Result<ProcessOutcome> {
        if self.options.error_after == Some(self.emitted) {
            return Err(FlowKitError::Runtime(format!(
                "Counting source failed after {} packets",
                self.emitted
            )));
        }
        if self.emitted >= self.options.count {
            return Ok(ProcessOutcome::Stop);
        }

        let offset = i64::try_from(self.emitted)
            .map_err(|_| FlowKitError::Runtime("Counting source overflowed".to_string()))?;
        let ts = Timestamp::new(self.options.timestamp_start.saturating_add(offset));
        cc.outputs().index(0)?.add(self.options.start.saturating_add(offset), ts)?;
        self.emitted += 1;
        Ok(ProcessOutcome::Continue)
    }
}

pub fn register(registry: &mut flowkit_core::CalculatorRegistry) {
    registry.register_with_description::<CountingSourceCalculator>(
        "CountingSourceCalculator",
        "Source that emits a sequence of integers, one per timestamp.",
    );
}
