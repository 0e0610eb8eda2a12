// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed property deltas shared by replicas and agreements.
//!
//! A delta is a list of `(property, op, values)` changes. Property names are
//! resolved and values validated when the delta is built or converted, so a
//! bad key fails the whole call before anything is sent to a node.

use crate::client::Modification;
use crate::error::{Result, TopologyError};
use std::fmt;

/// How a change applies to the attribute's current values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PropertyOp {
    #[default]
    Replace,
    Add,
    /// Remove the listed values, or the whole attribute if none are listed.
    Remove,
}

/// A settable property of some configuration resource.
pub trait Property: Copy + Eq + fmt::Debug + Sized {
    /// The node attribute this property maps to.
    fn attribute(self) -> &'static str;

    /// Resolve a friendly name or attribute name (case-insensitive).
    fn lookup(name: &str) -> Option<Self>;

    /// Check values before they are sent.
    fn validate(self, _values: &[String]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChange<P> {
    pub property: P,
    pub op: PropertyOp,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDelta<P> {
    changes: Vec<PropertyChange<P>>,
}

impl<P> Default for PropertyDelta<P> {
    fn default() -> Self {
        Self { changes: Vec::new() }
    }
}

impl<P: Property> PropertyDelta<P> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, property: P, op: PropertyOp, values: Vec<String>) -> Self {
        self.changes.push(PropertyChange {
            property,
            op,
            values,
        });
        self
    }

    #[must_use]
    pub fn replace(self, property: P, value: impl Into<String>) -> Self {
        self.with(property, PropertyOp::Replace, vec![value.into()])
    }

    #[must_use]
    pub fn add(self, property: P, value: impl Into<String>) -> Self {
        self.with(property, PropertyOp::Add, vec![value.into()])
    }

    #[must_use]
    pub fn remove(self, property: P) -> Self {
        self.with(property, PropertyOp::Remove, Vec::new())
    }

    /// Build a delta from untyped keys.
    ///
    /// Any unknown key fails the whole delta with `InvalidProperty`.
    pub fn from_named<I, S>(changes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, PropertyOp, Vec<String>)>,
        S: AsRef<str>,
    {
        let mut delta = Self::new();
        for (name, op, values) in changes {
            let name = name.as_ref();
            let property =
                P::lookup(name).ok_or_else(|| TopologyError::InvalidProperty(name.to_string()))?;
            delta = delta.with(property, op, values);
        }
        Ok(delta)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertyChange<P>> {
        self.changes.iter()
    }

    pub fn contains(&self, property: P) -> bool {
        self.changes.iter().any(|c| c.property == property)
    }

    /// First value of the last `Replace`/`Add` of `property`.
    pub fn value_of(&self, property: P) -> Option<&str> {
        self.changes
            .iter()
            .rev()
            .find(|c| c.property == property && c.op != PropertyOp::Remove)
            .and_then(|c| c.values.first())
            .map(String::as_str)
    }

    /// Validate every change and convert to node modifications.
    pub fn to_modifications(&self) -> Result<Vec<Modification>> {
        self.changes
            .iter()
            .map(|c| {
                if c.op != PropertyOp::Remove {
                    if c.values.is_empty() {
                        return Err(TopologyError::InvalidProperty(format!(
                            "{:?} needs at least one value",
                            c.property
                        )));
                    }
                    c.property.validate(&c.values)?;
                }
                let attr = c.property.attribute();
                Ok(match c.op {
                    PropertyOp::Replace => Modification::replace(attr, c.values.clone()),
                    PropertyOp::Add => Modification::add(attr, c.values.clone()),
                    PropertyOp::Remove => Modification::delete(attr, c.values.clone()),
                })
            })
            .collect()
    }
}
