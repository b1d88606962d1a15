// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Built-in calculators.
//!
//! These are generic wiring helpers, a counting source and
//! sinks. Domain calculators live in the embedding application and are
//! registered next to these.

use flowkit_core::CalculatorRegistry;

pub mod core;

#[cfg(test)]
pub mod test_utils;

pub use crate::core::callback::PacketCallback;
pub use crate::core::counting_source::CountingSourceOptions;

/// A single function to register all built-in calculators.
pub fn register_nodes(registry: &mut CalculatorRegistry) {
    core::register_core_nodes(registry);

    tracing::info!("Finished registering built-in calculators.");
}
