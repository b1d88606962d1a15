// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Graph services: shared external resources handed to calculators.
//!
//! A service is identified by a typed key, [`GraphService<T>`], usually held
//! in a `static`. Calculators request services in their contract routine; the
//! embedding application provides objects with
//! `CalculatorGraph::set_service_object` before the run starts. At start every
//! request is bound; a required request with no object aborts the run.

use crate::error::{FlowKitError, Result};
use crate::packet::TypeTag;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed key for a shared service.
///
/// ```rust
/// use flowkit_core::GraphService;
///
/// struct Clock;
/// static CLOCK: GraphService<Clock> = GraphService::new("flowkit.Clock");
/// assert_eq!(CLOCK.key(), "flowkit.Clock");
/// ```
pub struct GraphService<T> {
    key: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> GraphService<T> {
    pub const fn new(key: &'static str) -> Self {
        Self { key, _marker: PhantomData }
    }

    pub const fn key(&self) -> &'static str {
        self.key
    }
}

impl<T> Clone for GraphService<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for GraphService<T> {}

impl<T> fmt::Debug for GraphService<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GraphService({})", self.key)
    }
}

/// A calculator's declared dependency on a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphServiceRequest {
    key: &'static str,
    type_tag: TypeTag,
    optional: bool,
}

impl GraphServiceRequest {
    pub fn new<T: Any>(service: &GraphService<T>) -> Self {
        Self { key: service.key(), type_tag: TypeTag::of::<T>(), optional: false }
    }

    /// Lets the run start even when no object is provided.
    pub fn optional(&mut self) -> &mut Self {
        self.optional = true;
        self
    }

    pub const fn key(&self) -> &'static str {
        self.key
    }

    pub const fn is_optional(&self) -> bool {
        self.optional
    }

    pub const fn type_tag(&self) -> TypeTag {
        self.type_tag
    }
}

#[derive(Clone)]
struct ServiceEntry {
    object: Arc<dyn Any + Send + Sync>,
    type_tag: TypeTag,
}

/// Service objects keyed by service key.
#[derive(Clone, Default)]
pub struct ServiceMap {
    entries: HashMap<&'static str, ServiceEntry>,
}

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `object` under `service`, replacing any previous object.
    pub fn set<T: Any + Send + Sync>(&mut self, service: &GraphService<T>, object: Arc<T>) {
        self.entries.insert(service.key(), ServiceEntry { object, type_tag: TypeTag::of::<T>() });
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up the object for `service`.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Service` when the object is absent or of another type.
    pub fn get<T: Any + Send + Sync>(&self, service: &GraphService<T>) -> Result<Arc<T>> {
        let entry = self.entries.get(service.key()).ok_or_else(|| {
            FlowKitError::Service(format!("Service '{}' is not available", service.key()))
        })?;
        Arc::clone(&entry.object).downcast::<T>().map_err(|_| {
            FlowKitError::Service(format!(
                "Service '{}' holds {} but {} was requested",
                service.key(),
                entry.type_tag,
                std::any::type_name::<T>()
            ))
        })
    }

    /// Selects the objects a node requested, checking every request.
    ///
    /// # Errors
    ///
    /// Returns one `FlowKitError::Service` listing every required request that
    /// is missing and every object of the wrong type.
    pub fn bind(&self, node: &str, requests: &[GraphServiceRequest]) -> Result<Self> {
        let mut bound = Self::new();
        let mut issues = Vec::new();
        for request in requests {
            match self.entries.get(request.key()) {
                Some(entry) if entry.type_tag == request.type_tag() => {
                    bound.entries.insert(request.key(), entry.clone());
                },
                Some(entry) => issues.push(format!(
                    "service '{}' holds {} but {} was requested",
                    request.key(),
                    entry.type_tag,
                    request.type_tag()
                )),
                None if request.is_optional() => {},
                None => issues.push(format!("required service '{}' was not provided", request.key())),
            }
        }
        if issues.is_empty() {
            Ok(bound)
        } else {
            Err(FlowKitError::Service(format!("Node '{node}': {}", issues.join("; "))))
        }
    }
}

impl fmt::Debug for ServiceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}
