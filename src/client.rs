// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Directory node client seam.
//!
//! Defines the narrow interface the control plane needs from a directory
//! node: read an entry by DN, search, add, modify and delete. The transport,
//! authentication and wire codec live behind this trait and are provided by
//! the embedding application.
//!
//! # Example
//!
//! ```rust,no_run
//! use replication_topology::client::{
//!     BoxFuture, DirectoryNodeClient, Entry, Filter, Modification, SearchScope,
//! };
//!
//! struct MyTransport { /* ... */ }
//!
//! impl DirectoryNodeClient for MyTransport {
//!     fn get(&self, _dn: &str) -> BoxFuture<'_, Option<Entry>> {
//!         Box::pin(async move { Ok(None) })
//!     }
//!
//!     fn search(&self, _base: &str, _scope: SearchScope, _filter: &Filter) -> BoxFuture<'_, Vec<Entry>> {
//!         Box::pin(async move { Ok(vec![]) })
//!     }
//!
//!     fn add(&self, _entry: Entry) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn modify(&self, _dn: &str, _mods: Vec<Modification>) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn delete(&self, _dn: &str) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//! }
//! ```

use crate::dn;
use crate::error::{ResourceLocator, Result, TopologyError};
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Result type for raw node operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = ClientResult<T>> + Send + 'a>>;

/// Typed errors reported by a directory node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("No such object: {0}")]
    NoSuchObject(String),

    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    #[error("Insufficient access on {dn}: {message}")]
    InsufficientAccess { dn: String, message: String },

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Unwilling to perform on {dn}: {message}")]
    UnwillingToPerform { dn: String, message: String },

    #[error("Undefined attribute type {attribute} on {dn}")]
    UndefinedAttribute { dn: String, attribute: String },

    #[error("Attribute {attribute} on {dn} already holds the value")]
    AttributeOrValueExists { dn: String, attribute: String },

    #[error("Object class violation on {dn}: {message}")]
    ObjectClassViolation { dn: String, message: String },

    #[error("Operation not allowed on non-leaf: {0}")]
    NotAllowedOnNonLeaf(String),

    #[error("Server busy: {0}")]
    Busy(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("{0}")]
    Other(String),
}

impl ClientError {
    pub fn is_no_such_object(&self) -> bool {
        matches!(self, Self::NoSuchObject(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// Whether the node rejected an attribute it does not know.
    ///
    /// Older nodes answer a write of a newer attribute with one of these.
    pub fn is_attribute_rejection(&self) -> bool {
        matches!(
            self,
            Self::UndefinedAttribute { .. }
                | Self::ObjectClassViolation { .. }
                | Self::UnwillingToPerform { .. }
        )
    }
}

/// Attach a resource locator while lifting a [`ClientResult`].
pub(crate) trait ClientResultExt<T> {
    fn at(self, locator: &ResourceLocator) -> Result<T>;
}

impl<T> ClientResultExt<T> for ClientResult<T> {
    fn at(self, locator: &ResourceLocator) -> Result<T> {
        self.map_err(|e| TopologyError::from_client(e, locator.clone()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Entries and modifications
// ═══════════════════════════════════════════════════════════════════════════

/// A directory entry: DN plus multi-valued attributes.
///
/// Attribute names are case-insensitive and stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub dn: String,
    attrs: BTreeMap<String, Vec<String>>,
}

impl Entry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with_attr<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(name, values.into_iter().map(Into::into).collect());
        self
    }

    pub fn values(&self, name: &str) -> &[String] {
        self.attrs
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        !self.values(name).is_empty()
    }

    /// Case-insensitive value match.
    pub fn has_value(&self, name: &str, value: &str) -> bool {
        self.values(name).iter().any(|v| v.eq_ignore_ascii_case(value))
    }

    pub fn set(&mut self, name: &str, values: Vec<String>) {
        let key = name.to_ascii_lowercase();
        if values.is_empty() {
            self.attrs.remove(&key);
        } else {
            self.attrs.insert(key, values);
        }
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(String::as_str)
    }

    /// Apply one modification in place, the way a node would.
    pub fn apply(&mut self, m: &Modification) {
        let key = m.attribute.to_ascii_lowercase();
        match m.op {
            ModOp::Replace => self.set(&key, m.values.clone()),
            ModOp::Add => {
                let current = self.attrs.entry(key).or_default();
                for v in &m.values {
                    if !current.iter().any(|c| c.eq_ignore_ascii_case(v)) {
                        current.push(v.clone());
                    }
                }
            }
            ModOp::Delete => {
                if m.values.is_empty() {
                    self.attrs.remove(&key);
                } else if let Some(current) = self.attrs.get_mut(&key) {
                    current.retain(|c| !m.values.iter().any(|v| v.eq_ignore_ascii_case(c)));
                    if current.is_empty() {
                        self.attrs.remove(&key);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModOp {
    Add,
    Delete,
    Replace,
}

/// A single attribute change within a modify request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    pub op: ModOp,
    pub attribute: String,
    pub values: Vec<String>,
}

impl Modification {
    pub fn replace<I, S>(attribute: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op: ModOp::Replace,
            attribute: attribute.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add<I, S>(attribute: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op: ModOp::Add,
            attribute: attribute.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Delete the given values, or the whole attribute when `values` is empty.
    pub fn delete<I, S>(attribute: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op: ModOp::Delete,
            attribute: attribute.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Search
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}

/// Search filter, a small typed subset of the LDAP filter grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Equals(String, String),
    Present(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn equals(attr: &str, value: &str) -> Self {
        Self::Equals(attr.to_string(), value.to_string())
    }

    pub fn present(attr: &str) -> Self {
        Self::Present(attr.to_string())
    }

    /// Matches every entry.
    pub fn any() -> Self {
        Self::present("objectclass")
    }

    /// Evaluate against an in-memory entry.
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Self::Equals(attr, value) => entry.has_value(attr, value),
            Self::Present(attr) => entry.has_attr(attr),
            Self::And(parts) => parts.iter().all(|f| f.matches(entry)),
            Self::Or(parts) => parts.iter().any(|f| f.matches(entry)),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(attr, value) => write!(f, "({}={})", attr, value),
            Self::Present(attr) => write!(f, "({}=*)", attr),
            Self::And(parts) => {
                write!(f, "(&")?;
                for p in parts {
                    write!(f, "{}", p)?;
                }
                write!(f, ")")
            }
            Self::Or(parts) => {
                write!(f, "(|")?;
                for p in parts {
                    write!(f, "{}", p)?;
                }
                write!(f, ")")
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// The client trait
// ═══════════════════════════════════════════════════════════════════════════

/// Operations the control plane needs from one directory node.
///
/// Implementations must be cheap to share (`Arc`) and safe to call from
/// multiple tasks. No call is retried here; errors are reported as-is.
pub trait DirectoryNodeClient: Send + Sync + 'static {
    /// Read one entry. `Ok(None)` when it does not exist.
    fn get(&self, dn: &str) -> BoxFuture<'_, Option<Entry>>;

    fn search(&self, base: &str, scope: SearchScope, filter: &Filter) -> BoxFuture<'_, Vec<Entry>>;

    fn add(&self, entry: Entry) -> BoxFuture<'_, ()>;

    fn modify(&self, dn: &str, mods: Vec<Modification>) -> BoxFuture<'_, ()>;

    fn delete(&self, dn: &str) -> BoxFuture<'_, ()>;
}

/// Named handle to one directory node.
///
/// Wraps the client with per-call metrics and trace logging.
#[derive(Clone)]
pub struct NodeHandle {
    pub name: String,
    pub host: String,
    pub port: u16,
    client: Arc<dyn DirectoryNodeClient>,
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl NodeHandle {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        client: Arc<dyn DirectoryNodeClient>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            client,
        }
    }

    pub fn locator(&self) -> ResourceLocator {
        ResourceLocator::node(&self.name)
    }

    pub fn suffix_locator(&self, suffix: &str) -> ResourceLocator {
        ResourceLocator::suffix(&self.name, suffix)
    }

    pub async fn get(&self, dn: &str) -> ClientResult<Option<Entry>> {
        debug!(node = %self.name, dn = %dn, "get");
        let result = self.client.get(dn).await;
        metrics::record_node_op(&self.name, "get", result.is_ok());
        result
    }

    pub async fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &Filter,
    ) -> ClientResult<Vec<Entry>> {
        debug!(node = %self.name, base = %base, filter = %filter, "search");
        let result = self.client.search(base, scope, filter).await;
        metrics::record_node_op(&self.name, "search", result.is_ok());
        result
    }

    pub async fn add(&self, entry: Entry) -> ClientResult<()> {
        debug!(node = %self.name, dn = %entry.dn, "add");
        let result = self.client.add(entry).await;
        metrics::record_node_op(&self.name, "add", result.is_ok());
        result
    }

    pub async fn modify(&self, dn: &str, mods: Vec<Modification>) -> ClientResult<()> {
        debug!(node = %self.name, dn = %dn, mods = mods.len(), "modify");
        let result = self.client.modify(dn, mods).await;
        metrics::record_node_op(&self.name, "modify", result.is_ok());
        result
    }

    pub async fn delete(&self, dn: &str) -> ClientResult<()> {
        debug!(node = %self.name, dn = %dn, "delete");
        let result = self.client.delete(dn).await;
        metrics::record_node_op(&self.name, "delete", result.is_ok());
        result
    }

    /// Add an entry, treating "already exists" as success.
    ///
    /// Returns `true` if the entry was written by this call.
    pub async fn add_if_absent(&self, entry: Entry) -> ClientResult<bool> {
        match self.add(entry).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_already_exists() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete an entry, treating "no such object" as success.
    pub async fn delete_if_present(&self, dn: &str) -> ClientResult<bool> {
        match self.delete(dn).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_no_such_object() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Capabilities
// ═══════════════════════════════════════════════════════════════════════════

/// First server version that keeps the changelog inside each backend.
pub const PER_SUFFIX_CHANGELOG_VERSION: (u32, u32, u32) = (1, 4, 4);

/// What the node supports, as far as this crate cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCapabilities {
    pub version: Option<(u32, u32, u32)>,
    /// Per-suffix changelog under the backend, rather than one node-wide entry.
    pub per_suffix_changelog: bool,
}

impl NodeCapabilities {
    /// Read the root DSE and derive capabilities from `vendorVersion`.
    pub async fn probe(node: &NodeHandle) -> Result<Self> {
        let root = node.get(dn::ROOT_DSE).await.at(&node.locator())?;
        let caps = root
            .as_ref()
            .and_then(|e| e.first("vendorVersion"))
            .map(Self::from_vendor_version)
            .unwrap_or(Self::modern());
        debug!(node = %node.name, version = ?caps.version, per_suffix = caps.per_suffix_changelog, "Probed node capabilities");
        Ok(caps)
    }

    pub fn modern() -> Self {
        Self {
            version: None,
            per_suffix_changelog: true,
        }
    }

    /// Parse a vendor string such as `389-Directory/1.4.3.22 B2021.083.0000`.
    pub fn from_vendor_version(vendor: &str) -> Self {
        match parse_version(vendor) {
            Some(v) => Self {
                version: Some(v),
                per_suffix_changelog: v >= PER_SUFFIX_CHANGELOG_VERSION,
            },
            None => Self::modern(),
        }
    }
}

fn parse_version(vendor: &str) -> Option<(u32, u32, u32)> {
    let after_slash = vendor.rsplit_once('/').map_or(vendor, |(_, v)| v);
    let token = after_slash.split_whitespace().next()?;
    let mut parts = token.split('.').map(|p| p.parse::<u32>());
    let major = parts.next()?.ok()?;
    let minor = parts.next()?.ok()?;
    let patch = match parts.next() {
        Some(p) => p.ok()?,
        None => 0,
    };
    Some((major, minor, patch))
}
