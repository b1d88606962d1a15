// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The timestamped, shared-ownership data unit flowing through a graph.
//!
//! A [`Packet`] is a cheap handle: the payload lives behind an `Arc` and is
//! never mutated, so cloning a packet (for fan-out to several consumers) is an
//! atomic refcount increment. Re-timestamping with [`Packet::at`] produces a new
//! handle to the same payload and leaves every other holder untouched.
//!
//! Payloads are type-erased, but every packet carries a [`TypeTag`] and every
//! typed access is a checked downcast.
//!
//! # Example
//! ```rust
//! use flowkit_core::{Packet, Timestamp};
//! let p = Packet::new(42_i32).at(Timestamp::new(7));
//! assert_eq!(*p.get::<i32>().unwrap(), 42);
//! assert!(p.get::<String>().is_err());
//! ```

use crate::error::{FlowKitError, Result};
use crate::timestamp::Timestamp;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Runtime description of a payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: Any>() -> Self {
        Self { id: TypeId::of::<T>(), name: std::any::type_name::<T>() }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn type_id(&self) -> TypeId {
        self.id
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[derive(Clone)]
struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    type_tag: TypeTag,
}

/// A timestamped handle to an immutable, type-erased payload.
///
/// The empty packet (see [`Packet::empty`]) stands for "no value at this
/// timestamp" and is what a calculator sees on an input that has nothing at
/// the timestamp being processed.
#[derive(Clone, Default)]
pub struct Packet {
    payload: Option<Payload>,
    timestamp: Timestamp,
}

impl Packet {
    /// Wraps `value` in a new packet with timestamp `Timestamp::UNSET`.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wraps an already shared value without copying it.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            payload: Some(Payload { value, type_tag: TypeTag::of::<T>() }),
            timestamp: Timestamp::UNSET,
        }
    }

    /// The empty packet.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns a packet sharing this payload at `timestamp`.
    #[must_use]
    pub fn at(&self, timestamp: Timestamp) -> Self {
        Self { payload: self.payload.clone(), timestamp }
    }

    /// Consuming variant of [`Packet::at`] that avoids a refcount round-trip.
    #[must_use]
    pub fn into_at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_none()
    }

    pub const fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Type of the payload, `None` for the empty packet.
    pub fn type_tag(&self) -> Option<TypeTag> {
        self.payload.as_ref().map(|p| p.type_tag)
    }

    /// Checks that the payload is a `T`.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Contract` if the packet is empty or holds another type.
    pub fn validate_as<T: Any>(&self) -> Result<()> {
        match &self.payload {
            None => Err(FlowKitError::Contract(format!(
                "Expected a packet of type {} but the packet is empty",
                std::any::type_name::<T>()
            ))),
            Some(p) if p.type_tag.type_id() == TypeId::of::<T>() => Ok(()),
            Some(p) => Err(FlowKitError::Contract(format!(
                "Expected a packet of type {} but received {}",
                std::any::type_name::<T>(),
                p.type_tag
            ))),
        }
    }

    /// Borrows the payload as a `T`.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Contract` if the packet is empty or holds another type.
    pub fn get<T: Any>(&self) -> Result<&T> {
        self.validate_as::<T>()?;
        self.payload
            .as_ref()
            .and_then(|p| p.value.downcast_ref::<T>())
            .ok_or_else(|| FlowKitError::Contract("Packet payload downcast failed".to_string()))
    }

    /// Returns a shared handle to the payload as a `T`.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Contract` if the packet is empty or holds another type.
    pub fn share<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.validate_as::<T>()?;
        let value = self
            .payload
            .as_ref()
            .map(|p| Arc::clone(&p.value))
            .ok_or_else(|| FlowKitError::Contract("Packet is empty".to_string()))?;
        value
            .downcast::<T>()
            .map_err(|_| FlowKitError::Contract("Packet payload downcast failed".to_string()))
    }

    /// True when both packets point at the same payload allocation.
    pub fn shares_payload_with(&self, other: &Self) -> bool {
        match (&self.payload, &other.payload) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a.value, &b.value),
            _ => false,
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Some(p) => write!(f, "Packet<{}>@{}", p.type_tag, self.timestamp),
            None => write!(f, "Packet<empty>@{}", self.timestamp),
        }
    }
}
