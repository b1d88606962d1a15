// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Calculator and subgraph registry.
//!
//! - [`CalculatorRegistry`]: every calculator type and subgraph a graph may name
//! - [`RegistryEntry`]: serializable listing of what is registered
//!
//! Subgraphs are stored as immutable templates. Expansion always works on a
//! clone, so a template can be instantiated any number of times.

use crate::calculator::{Calculator, CalculatorDefinition};
use crate::contract::CalculatorContract;
use crate::error::{FlowKitError, Result};
use flowkit_api::{GraphConfig, NodeConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Contract routine of a registered calculator.
pub type ContractFn = Arc<dyn Fn(&mut CalculatorContract) -> Result<()> + Send + Sync>;

/// Instance factory of a registered calculator.
pub type CalculatorFactory =
    Arc<dyn Fn(&CalculatorContract) -> Result<Box<dyn Calculator>> + Send + Sync>;

/// What kind of thing a registered name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    Calculator,
    Subgraph,
}

/// A serializable listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    pub kind: RegistryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone)]
struct CalculatorInfo {
    contract: ContractFn,
    factory: CalculatorFactory,
    description: Option<String>,
}

/// Registered calculators and subgraph templates.
#[derive(Clone, Default)]
pub struct CalculatorRegistry {
    calculators: HashMap<String, CalculatorInfo>,
    subgraphs: HashMap<String, Arc<GraphConfig>>,
}

impl CalculatorRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a calculator type under `name`.
    pub fn register<C: CalculatorDefinition>(&mut self, name: &str) {
        self.register_with(name, C::get_contract, |cc| {
            C::create(cc).map(|c| Box::new(c) as Box<dyn Calculator>)
        });
    }

    /// Registers a calculator type with a description.
    pub fn register_with_description<C: CalculatorDefinition>(
        &mut self,
        name: &str,
        description: impl Into<String>,
    ) {
        self.register::<C>(name);
        if let Some(info) = self.calculators.get_mut(name) {
            info.description = Some(description.into());
        }
    }

    /// Registers a calculator from a contract routine and a factory closure.
    pub fn register_with<G, F>(&mut self, name: &str, get_contract: G, factory: F)
    where
        G: Fn(&mut CalculatorContract) -> Result<()> + Send + Sync + 'static,
        F: Fn(&CalculatorContract) -> Result<Box<dyn Calculator>> + Send + Sync + 'static,
    {
        tracing::debug!(calculator = %name, "Registering calculator");
        self.calculators.insert(
            name.to_string(),
            CalculatorInfo {
                contract: Arc::new(get_contract),
                factory: Arc::new(factory),
                description: None,
            },
        );
    }

    /// Registers a subgraph template.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Configuration` when `name` is already a
    /// calculator or the template names itself differently.
    pub fn register_subgraph(&mut self, name: &str, template: GraphConfig) -> Result<()> {
        if self.calculators.contains_key(name) {
            return Err(FlowKitError::Configuration(format!(
                "Cannot register subgraph '{name}': a calculator with that name exists"
            )));
        }
        if let Some(type_name) = template.type_name.as_deref() {
            if type_name != name {
                return Err(FlowKitError::Configuration(format!(
                    "Subgraph registered as '{name}' declares type_name '{type_name}'"
                )));
            }
        }
        tracing::debug!(subgraph = %name, nodes = template.nodes.len(), "Registering subgraph");
        self.subgraphs.insert(name.to_string(), Arc::new(template));
        Ok(())
    }

    pub fn is_calculator(&self, name: &str) -> bool {
        self.calculators.contains_key(name)
    }

    pub fn is_subgraph(&self, name: &str) -> bool {
        self.subgraphs.contains_key(name)
    }

    /// The registered template for a subgraph.
    pub fn subgraph(&self, name: &str) -> Option<Arc<GraphConfig>> {
        self.subgraphs.get(name).cloned()
    }

    /// Builds and validates the contract of one node.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Configuration` for unknown calculators or malformed
    /// port lists, and `FlowKitError::Contract` for declaration mismatches.
    pub fn build_contract(&self, node: &NodeConfig) -> Result<CalculatorContract> {
        let info = self.calculators.get(&node.calculator).ok_or_else(|| {
            FlowKitError::Configuration(format!(
                "Node '{}' uses unregistered calculator '{}'",
                node.display_name(),
                node.calculator
            ))
        })?;
        let mut contract = CalculatorContract::initialize(node)?;
        (info.contract)(&mut contract).map_err(|e| match e {
            FlowKitError::Configuration(_) | FlowKitError::Contract(_) => e,
            other => FlowKitError::Contract(format!(
                "Node '{}' contract routine failed: {other}",
                node.display_name()
            )),
        })?;
        contract.validate()?;
        Ok(contract)
    }

    /// Creates a calculator instance for a validated contract.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Configuration` for unknown calculators, or the
    /// factory's own error.
    pub fn create(&self, contract: &CalculatorContract) -> Result<Box<dyn Calculator>> {
        let info = self.calculators.get(contract.calculator()).ok_or_else(|| {
            FlowKitError::Configuration(format!(
                "Calculator '{}' is not registered",
                contract.calculator()
            ))
        })?;
        (info.factory)(contract)
    }

    /// Lists every registered name, sorted.
    pub fn definitions(&self) -> Vec<RegistryEntry> {
        let mut entries: Vec<RegistryEntry> = self
            .calculators
            .iter()
            .map(|(name, info)| RegistryEntry {
                name: name.clone(),
                kind: RegistryKind::Calculator,
                description: info.description.clone(),
            })
            .chain(self.subgraphs.keys().map(|name| RegistryEntry {
                name: name.clone(),
                kind: RegistryKind::Subgraph,
                description: None,
            }))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}
