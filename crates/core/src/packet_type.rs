// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Port type declarations and id-indexed packet containers.
//!
//! - [`PacketType`]: what one port expects (unset, any, or a concrete type)
//! - [`PacketTypeSet`]: one `PacketType` per [`TagMap`] id, filled in by a
//!   calculator's contract routine
//! - [`PacketSet`]: concrete packets keyed by the same ids
//!
//! Contract routines address slots by tag, tag + index, or bare index. A slot
//! requested for a tag the graph does not wire is remembered as an *unwired
//! requirement* so that a missing connection is reported instead of silently
//! ignored (unless the slot is marked optional).

use crate::error::{FlowKitError, Result};
use crate::packet::{Packet, TypeTag};
use crate::tag_map::{CollectionItemId, TagMap};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum TypeSpec {
    #[default]
    Unset,
    Any,
    Exact(TypeTag),
}

/// The type expected on one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketType {
    spec: TypeSpec,
    optional: bool,
}

impl PacketType {
    /// Declares that this port carries `T`.
    pub fn set<T: Any>(&mut self) -> &mut Self {
        self.spec = TypeSpec::Exact(TypeTag::of::<T>());
        self
    }

    /// Declares that this port accepts any type.
    pub fn set_any(&mut self) -> &mut Self {
        self.spec = TypeSpec::Any;
        self
    }

    /// Marks the port as not required to be connected.
    pub fn optional(&mut self) -> &mut Self {
        self.optional = true;
        self
    }

    pub const fn is_set(&self) -> bool {
        !matches!(self.spec, TypeSpec::Unset)
    }

    pub const fn is_any(&self) -> bool {
        matches!(self.spec, TypeSpec::Any)
    }

    pub const fn is_optional(&self) -> bool {
        self.optional
    }

    /// Concrete type, if one was declared.
    pub const fn type_tag(&self) -> Option<TypeTag> {
        match self.spec {
            TypeSpec::Exact(tag) => Some(tag),
            _ => None,
        }
    }

    /// True when a producer of `self` can feed a consumer of `other`.
    ///
    /// `Any` on either side is compatible with everything; concrete types must match exactly.
    pub fn is_consistent_with(&self, other: &Self) -> bool {
        match (self.spec, other.spec) {
            (TypeSpec::Any, _) | (_, TypeSpec::Any) => true,
            (TypeSpec::Exact(a), TypeSpec::Exact(b)) => a == b,
            _ => false,
        }
    }

    /// Checks a concrete packet against this declaration. Empty packets always pass.
    ///
    /// # Errors
    ///
    /// Returns a description of the mismatch.
    pub fn validate(&self, packet: &Packet) -> std::result::Result<(), String> {
        let Some(actual) = packet.type_tag() else {
            return Ok(());
        };
        match self.spec {
            TypeSpec::Unset => Err("port type was never declared".to_string()),
            TypeSpec::Any => Ok(()),
            TypeSpec::Exact(expected) if expected == actual => Ok(()),
            TypeSpec::Exact(expected) => Err(format!("expected {expected}, got {actual}")),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.spec {
            TypeSpec::Unset => f.write_str("<unset>"),
            TypeSpec::Any => f.write_str("Any"),
            TypeSpec::Exact(tag) => write!(f, "{tag}"),
        }?;
        if self.optional {
            f.write_str(" (optional)")?;
        }
        Ok(())
    }
}

/// A port the contract routine declared but the graph description does not wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwiredPort {
    pub tag: String,
    pub index: usize,
    pub packet_type: PacketType,
}

/// One [`PacketType`] per id of a [`TagMap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketTypeSet {
    tag_map: Arc<TagMap>,
    types: Vec<PacketType>,
    unwired: Vec<UnwiredPort>,
}

impl PacketTypeSet {
    /// Creates a set with every slot unset.
    pub fn new(tag_map: Arc<TagMap>) -> Self {
        let types = vec![PacketType::default(); tag_map.num_entries()];
        Self { tag_map, types, unwired: Vec::new() }
    }

    pub fn tag_map(&self) -> &Arc<TagMap> {
        &self.tag_map
    }

    pub fn num_entries(&self) -> usize {
        self.types.len()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tag_map.has_tag(tag)
    }

    pub fn num_entries_for_tag(&self, tag: &str) -> usize {
        self.tag_map.num_entries_for_tag(tag)
    }

    /// Slot for `tag:0`.
    pub fn tag(&mut self, tag: &str) -> &mut PacketType {
        self.get_mut(tag, 0)
    }

    /// Slot for `tag:index`; recorded as an unwired requirement when the graph
    /// does not wire that port.
    pub fn get_mut(&mut self, tag: &str, index: usize) -> &mut PacketType {
        if let Some(id) = self.tag_map.id(tag, index) {
            return &mut self.types[id.value()];
        }
        let position = match self.unwired.iter().position(|u| u.tag == tag && u.index == index) {
            Some(position) => position,
            None => {
                self.unwired.push(UnwiredPort {
                    tag: tag.to_string(),
                    index,
                    packet_type: PacketType::default(),
                });
                self.unwired.len() - 1
            },
        };
        &mut self.unwired[position].packet_type
    }

    /// Slot for the `index`-th untagged port.
    pub fn index(&mut self, index: usize) -> &mut PacketType {
        self.get_mut("", index)
    }

    /// Slot by id; `None` when `id` does not belong to this set's tag map.
    pub fn by_id(&mut self, id: CollectionItemId) -> Option<&mut PacketType> {
        self.types.get_mut(id.value())
    }

    pub fn get(&self, id: CollectionItemId) -> Option<&PacketType> {
        self.types.get(id.value())
    }

    /// Iterates over `(id, type)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (CollectionItemId, &PacketType)> {
        self.types.iter().enumerate().map(|(i, t)| (CollectionItemId::new(i), t))
    }

    pub fn unwired(&self) -> &[UnwiredPort] {
        &self.unwired
    }

    /// Collects every problem left after the contract routine ran.
    ///
    /// Wired slots left unset are ports the calculator does not know about;
    /// unwired non-optional declarations are required ports nobody connected.
    pub fn declaration_issues(&self, kind: &str) -> Vec<String> {
        let mut issues = Vec::new();
        for (id, packet_type) in self.iter() {
            if !packet_type.is_set() {
                issues.push(format!(
                    "{kind} {} is wired but not declared by the calculator",
                    self.tag_map.describe(id)
                ));
            }
        }
        for unwired in &self.unwired {
            if unwired.packet_type.is_set() && !unwired.packet_type.is_optional() {
                let port = if unwired.tag.is_empty() {
                    format!("#{}", unwired.index)
                } else {
                    format!("{}:{}", unwired.tag, unwired.index)
                };
                issues.push(format!(
                    "required {kind} {port} ({}) is not connected",
                    unwired.packet_type
                ));
            }
        }
        issues
    }

    /// Convenience wrapper turning [`Self::declaration_issues`] into a result.
    ///
    /// # Errors
    ///
    /// Returns one aggregated `FlowKitError::Contract` listing every issue.
    pub fn validate_declared(&self, kind: &str) -> Result<()> {
        let issues = self.declaration_issues(kind);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(FlowKitError::contract_issues(kind, &issues))
        }
    }
}

/// Concrete packets keyed by the ids of a [`TagMap`].
#[derive(Debug, Clone)]
pub struct PacketSet {
    tag_map: Arc<TagMap>,
    packets: Vec<Packet>,
}

impl PacketSet {
    /// Creates a set of empty packets.
    pub fn new(tag_map: Arc<TagMap>) -> Self {
        let packets = vec![Packet::empty(); tag_map.num_entries()];
        Self { tag_map, packets }
    }

    pub fn tag_map(&self) -> &Arc<TagMap> {
        &self.tag_map
    }

    pub fn num_entries(&self) -> usize {
        self.packets.len()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tag_map.has_tag(tag)
    }

    /// Packet at `tag:0`.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Contract` if the tag is not wired.
    pub fn tag(&self, tag: &str) -> Result<&Packet> {
        self.get(tag, 0)
    }

    /// Packet at `tag:index`.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Contract` if that port is not wired.
    pub fn get(&self, tag: &str, index: usize) -> Result<&Packet> {
        self.tag_map
            .id(tag, index)
            .map(|id| &self.packets[id.value()])
            .ok_or_else(|| FlowKitError::Contract(format!("No port '{tag}:{index}' is wired")))
    }

    /// Packet at the `index`-th untagged port.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Contract` if that port is not wired.
    pub fn index(&self, index: usize) -> Result<&Packet> {
        self.get("", index)
    }

    pub fn by_id(&self, id: CollectionItemId) -> Option<&Packet> {
        self.packets.get(id.value())
    }

    /// Replaces the packet at `id`.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Contract` if `id` does not belong to this set's
    /// tag map.
    pub fn set(&mut self, id: CollectionItemId, packet: Packet) -> Result<()> {
        let len = self.packets.len();
        let slot = self.packets.get_mut(id.value()).ok_or_else(|| {
            FlowKitError::Contract(format!("Port id {} is out of range for {len} ports", id.value()))
        })?;
        *slot = packet;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (CollectionItemId, &Packet)> {
        self.packets.iter().enumerate().map(|(i, p)| (CollectionItemId::new(i), p))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (CollectionItemId, &mut Packet)> {
        self.packets.iter_mut().enumerate().map(|(i, p)| (CollectionItemId::new(i), p))
    }
}

/// Cross-checks the packets a graph provides for a node against its declared types.
///
/// `provided` is keyed by the names used in the graph description (the name
/// part of each `TAG:index:name` entry). Every problem is collected:
///
/// - a non-optional port with no provided packet is *missing*
/// - a port with a packet of the wrong type is a *mismatch*
/// - a wired port the contract never declared is *extra*
///
/// # Errors
///
/// Returns a single `FlowKitError::Contract` listing every problem.
#[allow(clippy::implicit_hasher)]
pub fn fill_packet_set(
    kind: &str,
    type_set: &PacketTypeSet,
    provided: &HashMap<String, Packet>,
) -> Result<PacketSet> {
    let tag_map = Arc::clone(type_set.tag_map());
    let mut set = PacketSet::new(Arc::clone(&tag_map));
    let mut issues = Vec::new();

    for entry in tag_map.entries() {
        let Some(expected) = type_set.get(entry.id) else {
            continue;
        };
        let port = tag_map.describe(entry.id);
        if !expected.is_set() {
            issues.push(format!("{kind} {port} is wired but not declared by the calculator"));
            continue;
        }
        match provided.get(&entry.name) {
            Some(packet) if !packet.is_empty() => match expected.validate(packet) {
                Ok(()) => set.set(entry.id, packet.clone())?,
                Err(mismatch) => issues.push(format!("{kind} {port}: {mismatch}")),
            },
            _ if expected.is_optional() => {},
            _ => issues.push(format!("{kind} {port} is missing")),
        }
    }

    if issues.is_empty() {
        Ok(set)
    } else {
        Err(FlowKitError::contract_issues(kind, &issues))
    }
}
