// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The calculator capability.
//!
//! A calculator is the unit of computation in a graph. Its type provides a
//! static contract routine ([`CalculatorDefinition::get_contract`]) run once
//! per node at build time; its instances implement [`Calculator`], whose
//! methods are invoked by the engine:
//!
//! - `open` once per run, after input side packets are available
//! - `process` whenever the node's input stream handler has a deliverable
//!   input set (repeatedly, for source nodes)
//! - `close` exactly once per run, after inputs are exhausted or the run aborts
//!
//! Calls to one instance never overlap.

use crate::context::CalculatorContext;
use crate::contract::CalculatorContract;
use crate::error::Result;

/// Result of a successful `process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessOutcome {
    /// Keep scheduling this node.
    #[default]
    Continue,
    /// A source has nothing more to produce. Ends the node cleanly.
    Stop,
}

pub trait Calculator: Send {
    /// Prepares for a run. May emit packets, set output headers and output
    /// side packets, and call [`CalculatorContext::set_offset`].
    ///
    /// # Errors
    ///
    /// Any error aborts the run before processing starts.
    fn open(&mut self, _cc: &mut CalculatorContext) -> Result<()> {
        Ok(())
    }

    /// Handles one input set, or produces the next batch for a source.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the run.
    fn process(&mut self, cc: &mut CalculatorContext) -> Result<ProcessOutcome>;

    /// Finishes the run. May still emit packets.
    ///
    /// # Errors
    ///
    /// Reported as the run's error unless an earlier error is already recorded.
    fn close(&mut self, _cc: &mut CalculatorContext) -> Result<()> {
        Ok(())
    }
}

/// A calculator type that can be registered by type.
pub trait CalculatorDefinition: Calculator + Sized + 'static {
    /// Declares port types, service requests and defaults for one node.
    ///
    /// # Errors
    ///
    /// Returns an error when the node description cannot be served by this calculator.
    fn get_contract(cc: &mut CalculatorContract) -> Result<()>;

    /// Creates an instance for a node whose contract has been validated.
    ///
    /// # Errors
    ///
    /// Returns an error when the node's options are unusable.
    fn create(cc: &CalculatorContract) -> Result<Self>;
}
