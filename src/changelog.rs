// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change log configuration.
//!
//! A node needs a changelog before any of its replicas can supply changes.
//! Where it lives depends on the node version:
//!
//! - older nodes keep a single node-wide entry at `cn=changelog5,cn=config`
//! - 1.4.4 and later keep one `cn=changelog` entry under each backend
//!
//! [`ChangeLog::for_backend`] probes the node and picks the right one, so
//! callers never need to know which layout applies.

use crate::client::{ClientResultExt, Entry, Modification, NodeCapabilities, NodeHandle};
use crate::config::ReplicationDefaults;
use crate::dn;
use crate::error::Result;
use tracing::{info, warn};

pub const MAX_AGE_ATTR: &str = "nsslapd-changelogmaxage";
pub const MAX_ENTRIES_ATTR: &str = "nsslapd-changelogmaxentries";
pub const DIR_ATTR: &str = "nsslapd-changelogdir";

/// Where a node keeps its changelog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeLogLocation {
    /// One entry for the whole node.
    NodeWide,
    /// One entry under each backend.
    PerSuffix { backend: String },
}

impl ChangeLogLocation {
    pub fn from_capabilities(caps: &NodeCapabilities, backend: &str) -> Self {
        if caps.per_suffix_changelog {
            Self::PerSuffix {
                backend: backend.to_string(),
            }
        } else {
            Self::NodeWide
        }
    }

    pub fn dn(&self) -> String {
        match self {
            Self::NodeWide => dn::LEGACY_CHANGELOG_DN.to_string(),
            Self::PerSuffix { backend } => dn::backend_changelog_dn(backend),
        }
    }

    pub fn is_node_wide(&self) -> bool {
        matches!(self, Self::NodeWide)
    }
}

/// Handle to one node's changelog entry.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    pub node: NodeHandle,
    pub location: ChangeLogLocation,
}

impl ChangeLog {
    pub fn new(node: NodeHandle, location: ChangeLogLocation) -> Self {
        Self { node, location }
    }

    /// Probe the node and locate the changelog serving `backend`.
    pub async fn for_backend(node: &NodeHandle, backend: &str) -> Result<Self> {
        let caps = NodeCapabilities::probe(node).await?;
        Ok(Self::new(
            node.clone(),
            ChangeLogLocation::from_capabilities(&caps, backend),
        ))
    }

    pub fn dn(&self) -> String {
        self.location.dn()
    }

    pub async fn exists(&self) -> Result<bool> {
        let entry = self.node.get(&self.dn()).await.at(&self.node.locator())?;
        Ok(entry.is_some())
    }

    /// Create the changelog entry if it is missing.
    ///
    /// Returns `true` if this call created it.
    pub async fn ensure(&self, defaults: &ReplicationDefaults) -> Result<bool> {
        let dn = self.dn();
        if self.exists().await? {
            return Ok(false);
        }

        let mut entry = Entry::new(&dn)
            .with_attr("objectclass", ["top", "extensibleObject"])
            .with_attr("cn", [dn::rdn_value(&dn).unwrap_or_else(|| "changelog".to_string())]);
        if self.location.is_node_wide() {
            let dir = defaults
                .changelog_dir
                .clone()
                .unwrap_or_else(|| format!("/var/lib/dirsrv/slapd-{}/changelogdb", self.node.name));
            entry.set(DIR_ATTR, vec![dir]);
        }
        if let Some(max_age) = &defaults.changelog_max_age {
            entry.set(MAX_AGE_ATTR, vec![max_age.clone()]);
        }
        if let Some(max_entries) = defaults.changelog_max_entries {
            entry.set(MAX_ENTRIES_ATTR, vec![max_entries.to_string()]);
        }

        let created = self.node.add_if_absent(entry).await.at(&self.node.locator())?;
        if created {
            info!(node = %self.node.name, dn = %dn, "Changelog created");
        } else {
            warn!(node = %self.node.name, dn = %dn, "Changelog already exists");
        }
        Ok(created)
    }

    /// Delete the changelog entry. Returns `false` if it was already gone.
    pub async fn remove(&self) -> Result<bool> {
        let dn = self.dn();
        let removed = self.node.delete_if_present(&dn).await.at(&self.node.locator())?;
        if removed {
            info!(node = %self.node.name, dn = %dn, "Changelog removed");
        }
        Ok(removed)
    }

    /// Set the trimming policy. `None` clears that limit.
    pub async fn set_retention(&self, max_age: Option<&str>, max_entries: Option<u64>) -> Result<()> {
        let mods = vec![
            match max_age {
                Some(age) => Modification::replace(MAX_AGE_ATTR, [age]),
                None => Modification::delete(MAX_AGE_ATTR, Vec::<String>::new()),
            },
            match max_entries {
                Some(n) => Modification::replace(MAX_ENTRIES_ATTR, [n.to_string()]),
                None => Modification::delete(MAX_ENTRIES_ATTR, Vec::<String>::new()),
            },
        ];
        self.node
            .modify(&self.dn(), mods)
            .await
            .at(&self.node.locator())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_from_capabilities() {
        let old = NodeCapabilities::from_vendor_version("389-Directory/1.4.3.2");
        assert_eq!(
            ChangeLogLocation::from_capabilities(&old, "userRoot"),
            ChangeLogLocation::NodeWide
        );

        let new = NodeCapabilities::from_vendor_version("389-Directory/2.1.0");
        let location = ChangeLogLocation::from_capabilities(&new, "userRoot");
        assert_eq!(
            location.dn(),
            "cn=changelog,cn=userRoot,cn=ldbm database,cn=plugins,cn=config"
        );
        assert!(!location.is_node_wide());
    }

    #[test]
    fn test_node_wide_dn() {
        assert_eq!(ChangeLogLocation::NodeWide.dn(), "cn=changelog5,cn=config");
    }
}
