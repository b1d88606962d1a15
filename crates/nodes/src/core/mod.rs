// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use flowkit_core::CalculatorRegistry;

pub mod callback;
pub mod counting_source;
pub mod passthrough;
pub mod side_packet_to_stream;
pub mod sink;

/// Registers all available core calculators with the engine's main registry.
pub fn register_core_nodes(registry: &mut CalculatorRegistry) {
    passthrough::register(registry);
    sink::register(registry);
    callback::register(registry);
    counting_source::register(registry);
    side_packet_to_stream::register(registry);

    tracing::debug!("Finished registering core calculators.");
}
