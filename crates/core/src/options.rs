// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Resolved per-node options.
//!
//! A node description may carry options in exactly one of three places: an
//! untyped inline block, a single typed block (`options_ext`) or a list of
//! typed blocks (`node_options`). [`OptionsMap`] resolves them once at build
//! time and serves typed lookups keyed by [`NodeOptions::TYPE_KEY`].

use crate::error::{FlowKitError, Result};
use flowkit_api::NodeConfig;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// An options struct a calculator can look up from its [`OptionsMap`].
///
/// ```rust
/// use flowkit_core::NodeOptions;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, Default)]
/// #[serde(default)]
/// struct GainOptions {
///     gain: f32,
/// }
///
/// impl NodeOptions for GainOptions {
///     const TYPE_KEY: &'static str = "flowkit.GainOptions";
/// }
/// ```
pub trait NodeOptions: DeserializeOwned + Send + Sync + 'static {
    const TYPE_KEY: &'static str;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionsMap {
    inline: Option<serde_json::Value>,
    typed: HashMap<String, serde_json::Value>,
}

impl OptionsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the options of `node`.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Configuration` when options are given in more than
    /// one place, or when a typed list repeats a type key.
    pub fn from_node(node: &NodeConfig) -> Result<Self> {
        let sources = [node.options.is_some(), node.options_ext.is_some(), !node.node_options.is_empty()]
            .into_iter()
            .filter(|present| *present)
            .count();
        if sources > 1 {
            return Err(FlowKitError::Configuration(format!(
                "Node '{}' specifies options in more than one of options, options_ext and node_options",
                node.display_name()
            )));
        }

        let mut map = Self { inline: node.options.clone(), typed: HashMap::new() };
        for typed in node.options_ext.iter().chain(&node.node_options) {
            if map.typed.insert(typed.type_key.clone(), typed.value.clone()).is_some() {
                return Err(FlowKitError::Configuration(format!(
                    "Node '{}' has more than one options block of type '{}'",
                    node.display_name(),
                    typed.type_key
                )));
            }
        }
        Ok(map)
    }

    pub fn is_empty(&self) -> bool {
        self.inline.is_none() && self.typed.is_empty()
    }

    /// The untyped inline block, if any.
    pub const fn inline(&self) -> Option<&serde_json::Value> {
        self.inline.as_ref()
    }

    /// Replaces the inline block.
    pub fn set_inline(&mut self, value: serde_json::Value) {
        self.inline = Some(value);
    }

    /// True when a typed block for `T` is present.
    pub fn has<T: NodeOptions>(&self) -> bool {
        self.typed.contains_key(T::TYPE_KEY)
    }

    /// Looks up the options of type `T`.
    ///
    /// A typed block with `T::TYPE_KEY` wins; otherwise the inline block is
    /// deserialized as `T`.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Configuration` when no block is available or the
    /// block does not deserialize as `T`.
    pub fn get<T: NodeOptions>(&self) -> Result<T> {
        let value = self.typed.get(T::TYPE_KEY).or(self.inline.as_ref()).ok_or_else(|| {
            FlowKitError::Configuration(format!("No options of type '{}' were provided", T::TYPE_KEY))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            FlowKitError::Configuration(format!("Invalid options for '{}': {e}", T::TYPE_KEY))
        })
    }

    /// Like [`Self::get`] but falls back to `T::default()` when no block is present.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Configuration` when a present block is malformed.
    pub fn get_or_default<T: NodeOptions + Default>(&self) -> Result<T> {
        if self.inline.is_none() && !self.has::<T>() {
            return Ok(T::default());
        }
        self.get()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flowkit_api::TypedOptions;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, Default, PartialEq)]
    #[serde(default)]
    struct Gain {
        gain: f64,
    }

    impl NodeOptions for Gain {
        const TYPE_KEY: &'static str = "test.Gain";
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Label {
        text: String,
    }

    impl NodeOptions for Label {
        const TYPE_KEY: &'static str = "test.Label";
    }

    #[test]
    fn test_inline_lookup() {
        let node = NodeConfig::new("X").options(json!({ "gain": 2.0 }));
        let map = OptionsMap::from_node(&node).unwrap();
        assert_eq!(map.get::<Gain>().unwrap(), Gain { gain: 2.0 });
    }

    #[test]
    fn test_typed_list_lookup_is_keyed() {
        let mut node = NodeConfig::new("X");
        node.node_options = vec![
            TypedOptions::new("test.Gain", json!({ "gain": 0.5 })),
            TypedOptions::new("test.Label", json!({ "text": "hi" })),
        ];
        let map = OptionsMap::from_node(&node).unwrap();
        assert_eq!(map.get::<Gain>().unwrap().gain, 0.5);
        assert_eq!(map.get::<Label>().unwrap().text, "hi");
    }

    #[test]
    fn test_ambiguous_sources_rejected() {
        let mut node = NodeConfig::new("X").options(json!({}));
        node.options_ext = Some(TypedOptions::new("test.Gain", json!({})));
        let err = OptionsMap::from_node(&node).unwrap_err();
        assert!(matches!(err, FlowKitError::Configuration(_)));
    }

    #[test]
    fn test_missing_options_fail_explicitly() {
        let map = OptionsMap::from_node(&NodeConfig::new("X")).unwrap();
        assert!(map.get::<Label>().is_err());
        assert_eq!(map.get_or_default::<Gain>().unwrap(), Gain::default());
    }
}
