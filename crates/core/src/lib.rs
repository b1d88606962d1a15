// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! FlowKit Core - Fundamental traits and data structures for dataflow graphs.
//!
//! This crate defines the abstractions every calculator and the engine share:
//!
//! ## Core Modules
//!
//! - [`tag_map`]: `TAG:index:name` port naming and dense ids
//! - [`timestamp`]: Packet timestamps and their sentinels
//! - [`packet`]: Timestamped, shared, type-erased payloads
//! - [`packet_type`]: Port type declarations and id-indexed packet sets
//! - [`options`]: Typed per-node options lookup
//! - [`service`]: Graph services shared by calculators
//! - [`contract`]: Per-node build-time contract
//! - [`calculator`]: The Calculator trait and its registration capability
//! - [`context`]: Per-run context handed to calculator methods
//! - [`registry`]: Calculator and subgraph registry
//! - [`state`]: Node state machine and lifecycle tracking
//! - [`error`]: Error types and handling
//!
//! ## Quick Start
//!
//! ```rust
//! use flowkit_core::{
//!     Calculator, CalculatorContext, CalculatorContract, CalculatorDefinition,
//!     CalculatorRegistry, ProcessOutcome, Result,
//! };
//!
//! struct Doubler;
//!
//! impl Calculator for Doubler {
//!     fn process(&mut self, cc: &mut CalculatorContext) -> Result<ProcessOutcome> {
//!         let ts = cc.input_timestamp();
//!         let value = *cc.inputs().index(0)?.get::<i64>()?;
//!         cc.outputs().index(0)?.add(value * 2, ts)?;
//!         Ok(ProcessOutcome::Continue)
//!     }
//! }
//!
//! impl CalculatorDefinition for Doubler {
//!     fn get_contract(cc: &mut CalculatorContract) -> Result<()> {
//!         cc.inputs().index(0).set::<i64>();
//!         cc.outputs().index(0).set::<i64>();
//!         Ok(())
//!     }
//!
//!     fn create(_cc: &CalculatorContract) -> Result<Self> {
//!         Ok(Self)
//!     }
//! }
//!
//! let mut registry = CalculatorRegistry::new();
//! registry.register::<Doubler>("DoublerCalculator");
//! ```

// Module declarations
pub mod calculator;
pub mod context;
pub mod contract;
pub mod error;
pub mod options;
pub mod packet;
pub mod packet_type;
pub mod registry;
pub mod service;
pub mod state;
pub mod tag_map;
pub mod timestamp;

// Convenience re-exports for commonly used types

// Error handling
pub use error::{FlowKitError, Result};

// Data model
pub use packet::{Packet, TypeTag};
pub use packet_type::{fill_packet_set, PacketSet, PacketType, PacketTypeSet};
pub use tag_map::{CollectionItemId, TagMap};
pub use timestamp::Timestamp;

// Calculator abstractions
pub use calculator::{Calculator, CalculatorDefinition, ProcessOutcome};
pub use context::{CalculatorContext, OutputStreamShard};
pub use contract::CalculatorContract;
pub use options::{NodeOptions, OptionsMap};
pub use service::{GraphService, GraphServiceRequest, ServiceMap};

// Registry
pub use registry::{CalculatorRegistry, RegistryEntry};

// State management
pub use state::{NodeState, NodeStateUpdate};
