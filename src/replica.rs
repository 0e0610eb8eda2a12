// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replica configuration: one per (node, suffix).
//!
//! The role is stored on the node as a type code plus a flags bitfield:
//!
//! | Role     | nsDS5ReplicaType | nsDS5Flags | Replica ID      |
//! |----------|------------------|------------|-----------------|
//! | Supplier | 3                | 1          | 1..=65534       |
//! | Hub      | 2                | 1          | 65535           |
//! | Consumer | 2                | 0          | 65535           |
//!
//! Only suppliers originate changes, so only they carry a distinguishing ID;
//! it ends up embedded in every CSN they generate.
//!
//! Creation is idempotent: creating a replica that already exists merges the
//! explicitly supplied properties into it instead of failing. Suppliers and
//! hubs write a changelog, which is created before the replica entry.

use crate::agreement::{Agreement, AgreementRef};
use crate::changelog::ChangeLog;
use crate::client::{ClientError, ClientResultExt, Entry, Filter, Modification, NodeHandle, SearchScope};
use crate::config::ReplicationDefaults;
use crate::dn;
use crate::error::{ResourceLocator, Result, TopologyError};
use crate::metrics;
use crate::properties::{Property, PropertyDelta};
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};

pub const REPLICA_OBJECTCLASS: &str = "nsDS5Replica";

pub const ATTR_ROOT: &str = "nsDS5ReplicaRoot";
pub const ATTR_ID: &str = "nsDS5ReplicaId";
pub const ATTR_TYPE: &str = "nsDS5ReplicaType";
pub const ATTR_FLAGS: &str = "nsDS5Flags";
pub const ATTR_BIND_DN: &str = "nsDS5ReplicaBindDN";

/// Replica ID carried by hubs and consumers.
pub const SENTINEL_REPLICA_ID: u16 = 65535;

// ═══════════════════════════════════════════════════════════════════════════
// Roles and IDs
// ═══════════════════════════════════════════════════════════════════════════

/// Replication role, ordered by capability (`Consumer < Hub < Supplier`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReplicaRole {
    Consumer,
    Hub,
    Supplier,
}

impl ReplicaRole {
    pub fn type_code(self) -> u8 {
        match self {
            Self::Supplier => 3,
            Self::Hub | Self::Consumer => 2,
        }
    }

    pub fn flags(self) -> u8 {
        match self {
            Self::Consumer => 0,
            Self::Hub | Self::Supplier => 1,
        }
    }

    pub fn from_codes(type_code: u8, flags: u8) -> Option<Self> {
        match (type_code, flags) {
            (3, 1) => Some(Self::Supplier),
            (2, 1) => Some(Self::Hub),
            (2, 0) => Some(Self::Consumer),
            _ => None,
        }
    }

    /// Whether a replica in this role keeps a changelog.
    pub fn needs_changelog(self) -> bool {
        !matches!(self, Self::Consumer)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Supplier => "supplier",
            Self::Hub => "hub",
            Self::Consumer => "consumer",
        }
    }
}

impl fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplicaRole {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supplier" | "master" => Ok(Self::Supplier),
            "hub" => Ok(Self::Hub),
            "consumer" => Ok(Self::Consumer),
            _ => Err(TopologyError::InvalidRole(s.to_string())),
        }
    }
}

/// A replica ID validated against its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplicaId(u16);

impl ReplicaId {
    pub const SENTINEL: ReplicaId = ReplicaId(SENTINEL_REPLICA_ID);

    /// Validate `id` for `role`.
    ///
    /// Suppliers need `1 <= id < 65535`. Hubs and consumers accept only the
    /// sentinel, and get it when `id` is omitted.
    pub fn for_role(role: ReplicaRole, id: Option<i64>) -> Result<Self> {
        match (role, id) {
            (ReplicaRole::Supplier, None) => Err(TopologyError::MissingArgument("replica_id")),
            (ReplicaRole::Supplier, Some(n)) if (1..i64::from(SENTINEL_REPLICA_ID)).contains(&n) => {
                Ok(Self(n as u16))
            }
            (_, None) => Ok(Self::SENTINEL),
            (ReplicaRole::Hub | ReplicaRole::Consumer, Some(n)) if n == i64::from(SENTINEL_REPLICA_ID) => {
                Ok(Self::SENTINEL)
            }
            (role, Some(n)) => Err(TopologyError::InvalidReplicaId {
                role: role.to_string(),
                id: n,
            }),
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn is_sentinel(self) -> bool {
        self == Self::SENTINEL
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Properties
// ═══════════════════════════════════════════════════════════════════════════

/// Settable replica properties.
///
/// Role and ID are not here: they change through promote/demote only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaProperty {
    BindDn,
    BindDnGroup,
    BindDnGroupCheckInterval,
    PurgeDelay,
    TombstonePurgeInterval,
    PreciseTombstonePurging,
    Referral,
    ProtocolTimeout,
    BackoffMin,
    BackoffMax,
    ReleaseTimeout,
    LegacyConsumer,
}

const REPLICA_PROPERTIES: &[(ReplicaProperty, &str, &str)] = &[
    (ReplicaProperty::BindDn, "bind_dn", ATTR_BIND_DN),
    (ReplicaProperty::BindDnGroup, "bind_dn_group", "nsds5ReplicaBindDNGroup"),
    (ReplicaProperty::BindDnGroupCheckInterval, "bind_dn_group_check_interval", "nsds5ReplicaBindDNGroupCheckInterval"),
    (ReplicaProperty::PurgeDelay, "purge_delay", "nsds5ReplicaPurgeDelay"),
    (ReplicaProperty::TombstonePurgeInterval, "purge_interval", "nsds5ReplicaTombstonePurgeInterval"),
    (ReplicaProperty::PreciseTombstonePurging, "precise_purging", "nsds5ReplicaPreciseTombstonePurging"),
    (ReplicaProperty::Referral, "referral", "nsds5ReplicaReferral"),
    (ReplicaProperty::ProtocolTimeout, "protocol_timeout", "nsds5ReplicaProtocolTimeout"),
    (ReplicaProperty::BackoffMin, "backoff_min", "nsds5ReplicaBackoffMin"),
    (ReplicaProperty::BackoffMax, "backoff_max", "nsds5ReplicaBackoffMax"),
    (ReplicaProperty::ReleaseTimeout, "release_timeout", "nsds5ReplicaReleaseTimeout"),
    (ReplicaProperty::LegacyConsumer, "legacy_consumer", "nsds5ReplicaLegacyConsumer"),
];

impl Property for ReplicaProperty {
    fn attribute(self) -> &'static str {
        REPLICA_PROPERTIES
            .iter()
            .find(|(p, _, _)| *p == self)
            .map(|(_, _, attr)| *attr)
            .unwrap_or("")
    }

    fn lookup(name: &str) -> Option<Self> {
        REPLICA_PROPERTIES
            .iter()
            .find(|(_, friendly, attr)| {
                friendly.eq_ignore_ascii_case(name) || attr.eq_ignore_ascii_case(name)
            })
            .map(|(p, _, _)| *p)
    }

    fn validate(self, values: &[String]) -> Result<()> {
        let numeric = matches!(
            self,
            Self::BindDnGroupCheckInterval
                | Self::PurgeDelay
                | Self::TombstonePurgeInterval
                | Self::ProtocolTimeout
                | Self::BackoffMin
                | Self::BackoffMax
                | Self::ReleaseTimeout
        );
        let boolean = matches!(self, Self::PreciseTombstonePurging | Self::LegacyConsumer);
        for v in values {
            // -1 disables purging on some attributes
            if numeric && v.parse::<i64>().is_err() {
                return Err(TopologyError::InvalidProperty(format!(
                    "{} expects an integer, got {:?}",
                    self.attribute(),
                    v
                )));
            }
            if boolean && !matches!(v.to_ascii_lowercase().as_str(), "on" | "off") {
                return Err(TopologyError::InvalidProperty(format!(
                    "{} expects on/off, got {:?}",
                    self.attribute(),
                    v
                )));
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Replica handle
// ═══════════════════════════════════════════════════════════════════════════

/// Locator for a replica configured on a node.
#[derive(Debug, Clone)]
pub struct ReplicaRef {
    pub node: NodeHandle,
    /// Normalized suffix.
    pub suffix: String,
    pub dn: String,
    pub role: ReplicaRole,
    pub id: ReplicaId,
    /// Backend holding the suffix.
    pub backend: String,
}

impl ReplicaRef {
    pub fn locator(&self) -> ResourceLocator {
        ResourceLocator::suffix(&self.node.name, &self.suffix)
    }

    fn from_entry(node: &NodeHandle, suffix: &str, backend: String, entry: &Entry) -> Result<Self> {
        let role = role_from_entry(entry)?;
        let id = entry
            .first(ATTR_ID)
            .and_then(|v| v.parse::<u16>().ok())
            .map(ReplicaId)
            .ok_or_else(|| TopologyError::InvalidReplicaId {
                role: role.to_string(),
                id: entry.first(ATTR_ID).and_then(|v| v.parse().ok()).unwrap_or(-1),
            })?;
        Ok(Self {
            node: node.clone(),
            suffix: suffix.to_string(),
            dn: entry.dn.clone(),
            role,
            id,
            backend,
        })
    }
}

impl PartialEq for ReplicaRef {
    fn eq(&self, other: &Self) -> bool {
        self.node.name == other.node.name
            && self.suffix == other.suffix
            && self.role == other.role
            && self.id == other.id
    }
}

fn role_from_entry(entry: &Entry) -> Result<ReplicaRole> {
    let type_code = entry.first(ATTR_TYPE).and_then(|v| v.parse::<u8>().ok());
    let flags = entry.first(ATTR_FLAGS).and_then(|v| v.parse::<u8>().ok()).unwrap_or(0);
    type_code
        .and_then(|t| ReplicaRole::from_codes(t, flags))
        .ok_or_else(|| {
            TopologyError::InvalidRole(format!(
                "{}={:?} {}={}",
                ATTR_TYPE,
                entry.first(ATTR_TYPE),
                ATTR_FLAGS,
                flags
            ))
        })
}

/// Find the backend whose `nsslapd-suffix` is `suffix`.
pub async fn find_backend(node: &NodeHandle, suffix: &str) -> Result<Option<String>> {
    let filter = Filter::equals("nsslapd-suffix", suffix);
    let entries = match node.search(dn::LDBM_DN, SearchScope::OneLevel, &filter).await {
        Ok(entries) => entries,
        Err(e) if e.is_no_such_object() => Vec::new(),
        Err(e) => return Err(TopologyError::from_client(e, node.suffix_locator(suffix))),
    };
    Ok(entries.into_iter().find_map(|e| {
        e.first("cn")
            .map(str::to_string)
            .or_else(|| dn::rdn_value(&e.dn))
    }))
}

/// Create the replication bind identity if it does not exist.
///
/// Returns `true` if this call created it.
pub async fn ensure_bind_identity(node: &NodeHandle, bind_dn: &str, password: &str) -> Result<bool> {
    let locator = node.locator();
    if node.get(bind_dn).await.at(&locator)?.is_some() {
        return Ok(false);
    }
    let cn = dn::rdn_value(bind_dn).unwrap_or_else(|| "replication manager".to_string());
    let entry = Entry::new(bind_dn)
        .with_attr("objectclass", ["top", "person", "extensibleObject"])
        .with_attr("cn", [cn])
        .with_attr("sn", ["bind dn pseudo user"])
        .with_attr("userPassword", [password])
        .with_attr("nsIdleTimeout", ["0"])
        .with_attr("passwordExpirationTime", ["20381010000000Z"]);
    let created = node.add_if_absent(entry).await.at(&locator)?;
    if created {
        info!(node = %node.name, bind_dn = %bind_dn, "Replication bind identity created");
    }
    Ok(created)
}

// ═══════════════════════════════════════════════════════════════════════════
// Operations
// ═══════════════════════════════════════════════════════════════════════════

/// Replica lifecycle operations.
pub struct Replica;

impl Replica {
    /// Enable replication of `suffix` on `node`.
    ///
    /// Idempotent: an existing replica gets `properties` merged into it and
    /// keeps its role. The changelog follows the existing role, not `role`.
    pub async fn create(
        node: &NodeHandle,
        suffix: &str,
        role: ReplicaRole,
        replica_id: Option<i64>,
        properties: &PropertyDelta<ReplicaProperty>,
        defaults: &ReplicationDefaults,
    ) -> Result<ReplicaRef> {
        if suffix.trim().is_empty() {
            return Err(TopologyError::MissingArgument("suffix"));
        }
        let id = ReplicaId::for_role(role, replica_id)?;
        let overrides = properties.to_modifications()?;
        let suffix = dn::normalize_dn(suffix);
        let locator = node.suffix_locator(&suffix);

        let backend = find_backend(node, &suffix)
            .await?
            .ok_or_else(|| TopologyError::NoBackendForSuffix(locator.clone()))?;

        let replica_dn = dn::replica_dn(&suffix);
        if let Some(existing) = node.get(&replica_dn).await.at(&locator)? {
            warn!(node = %node.name, suffix = %suffix, "Replica already exists, merging properties");
            metrics::record_idempotent_hit("replica");
            let current = ReplicaRef::from_entry(node, &suffix, backend, &existing)?;
            if current.role != role {
                warn!(
                    node = %node.name,
                    suffix = %suffix,
                    existing = %current.role,
                    requested = %role,
                    "Existing replica has a different role; use promote/demote to change it"
                );
            }
            if current.role.needs_changelog() {
                ChangeLog::for_backend(node, &current.backend).await?.ensure(defaults).await?;
            }
            if !overrides.is_empty() {
                node.modify(&replica_dn, overrides).await.at(&locator)?;
            }
            return Ok(current);
        }

        if role.needs_changelog() {
            ChangeLog::for_backend(node, &backend).await?.ensure(defaults).await?;
        }

        let bind_dn = match properties.value_of(ReplicaProperty::BindDn) {
            Some(supplied) => supplied.to_string(),
            None => {
                ensure_bind_identity(node, &defaults.bind_dn, &defaults.bind_password).await?;
                defaults.bind_dn.clone()
            }
        };

        let mut entry = Entry::new(&replica_dn)
            .with_attr("objectclass", ["top", REPLICA_OBJECTCLASS, "extensibleobject"])
            .with_attr("cn", ["replica"])
            .with_attr(ATTR_ROOT, [suffix.clone()])
            .with_attr(ATTR_ID, [id.to_string()])
            .with_attr(ATTR_TYPE, [role.type_code().to_string()])
            .with_attr(ATTR_FLAGS, [role.flags().to_string()])
            .with_attr(ATTR_BIND_DN, [bind_dn]);
        for m in &overrides {
            entry.apply(m);
        }

        if !node.add_if_absent(entry).await.at(&locator)? {
            warn!(node = %node.name, suffix = %suffix, "Replica appeared concurrently");
            metrics::record_idempotent_hit("replica");
        } else {
            info!(node = %node.name, suffix = %suffix, role = %role, replica_id = id.get(), "Replica created");
            metrics::record_replica_lifecycle(&node.name, "created");
        }

        Ok(ReplicaRef {
            node: node.clone(),
            suffix,
            dn: replica_dn,
            role,
            id,
            backend,
        })
    }

    /// Look up the replica for `suffix`, if one is configured.
    pub async fn get(node: &NodeHandle, suffix: &str) -> Result<Option<ReplicaRef>> {
        let suffix = dn::normalize_dn(suffix);
        let locator = node.suffix_locator(&suffix);
        let Some(entry) = node.get(&dn::replica_dn(&suffix)).await.at(&locator)? else {
            return Ok(None);
        };
        let backend = find_backend(node, &suffix)
            .await?
            .ok_or_else(|| TopologyError::NoBackendForSuffix(locator.clone()))?;
        ReplicaRef::from_entry(node, &suffix, backend, &entry).map(Some)
    }

    pub async fn set_properties(
        replica: &ReplicaRef,
        delta: &PropertyDelta<ReplicaProperty>,
    ) -> Result<()> {
        let mods = delta.to_modifications()?;
        if mods.is_empty() {
            return Ok(());
        }
        replica
            .node
            .modify(&replica.dn, mods)
            .await
            .map_err(|e| not_found_as_no_replica(e, replica))
    }

    /// Current role, read fresh from the node.
    pub async fn role(replica: &ReplicaRef) -> Result<ReplicaRole> {
        let entry = replica
            .node
            .get(&replica.dn)
            .await
            .at(&replica.locator())?
            .ok_or_else(|| TopologyError::NoSuchReplica(replica.locator()))?;
        role_from_entry(&entry)
    }

    pub async fn agreements(replica: &ReplicaRef) -> Result<Vec<AgreementRef>> {
        Agreement::list(replica).await
    }

    /// Disable replication for the suffix.
    ///
    /// Deletes every owned agreement first, then the replica, then the
    /// changelog if nothing on the node still needs it.
    pub async fn disable(replica: &ReplicaRef) -> Result<()> {
        for agreement in Agreement::list(replica).await? {
            match replica.node.delete_if_present(&agreement.dn).await {
                Ok(_) => info!(node = %replica.node.name, agreement = %agreement.name, "Agreement deleted"),
                Err(e) => {
                    error!(node = %replica.node.name, agreement = %agreement.name, error = %e, "Failed to delete agreement");
                    return Err(TopologyError::from_client(e, agreement.locator()));
                }
            }
        }

        replica
            .node
            .delete(&replica.dn)
            .await
            .map_err(|e| not_found_as_no_replica(e, replica))?;
        info!(node = %replica.node.name, suffix = %replica.suffix, "Replica deleted");
        metrics::record_replica_lifecycle(&replica.node.name, "disabled");

        if replica.role.needs_changelog() {
            let changelog = ChangeLog::for_backend(&replica.node, &replica.backend).await?;
            let still_needed = changelog.location.is_node_wide()
                && remaining_changelog_users(&replica.node).await? > 0;
            if still_needed {
                info!(node = %replica.node.name, "Changelog still used by other replicas, keeping it");
            } else {
                changelog.remove().await?;
            }
        }

        Ok(())
    }

    /// Raise the role. `Consumer -> Hub`, `Consumer -> Supplier`, `Hub -> Supplier`.
    pub async fn promote(
        replica: &ReplicaRef,
        new_role: ReplicaRole,
        bind_dn: Option<&str>,
        replica_id: Option<i64>,
        defaults: &ReplicationDefaults,
    ) -> Result<ReplicaRef> {
        if new_role <= replica.role {
            return Err(TopologyError::InvalidRole(format!(
                "cannot promote {} to {}",
                replica.role, new_role
            )));
        }
        let id = ReplicaId::for_role(new_role, replica_id)?;

        ChangeLog::for_backend(&replica.node, &replica.backend)
            .await?
            .ensure(defaults)
            .await?;

        let mut mods = vec![
            Modification::replace(ATTR_TYPE, [new_role.type_code().to_string()]),
            Modification::replace(ATTR_FLAGS, [new_role.flags().to_string()]),
            Modification::replace(ATTR_ID, [id.to_string()]),
        ];
        if let Some(bind_dn) = bind_dn {
            mods.push(Modification::replace(ATTR_BIND_DN, [bind_dn]));
        }
        replica
            .node
            .modify(&replica.dn, mods)
            .await
            .map_err(|e| not_found_as_no_replica(e, replica))?;

        info!(node = %replica.node.name, suffix = %replica.suffix, from = %replica.role, to = %new_role, "Replica promoted");
        metrics::record_replica_lifecycle(&replica.node.name, "promoted");
        Ok(ReplicaRef {
            role: new_role,
            id,
            ..replica.clone()
        })
    }

    /// Lower the role. `Supplier -> Hub`, `Supplier -> Consumer`, `Hub -> Consumer`.
    pub async fn demote(replica: &ReplicaRef, new_role: ReplicaRole) -> Result<ReplicaRef> {
        if new_role >= replica.role {
            return Err(TopologyError::InvalidRole(format!(
                "cannot demote {} to {}",
                replica.role, new_role
            )));
        }
        let mods = vec![
            Modification::replace(ATTR_TYPE, [new_role.type_code().to_string()]),
            Modification::replace(ATTR_FLAGS, [new_role.flags().to_string()]),
            Modification::replace(ATTR_ID, [ReplicaId::SENTINEL.to_string()]),
        ];
        replica
            .node
            .modify(&replica.dn, mods)
            .await
            .map_err(|e| not_found_as_no_replica(e, replica))?;

        info!(node = %replica.node.name, suffix = %replica.suffix, from = %replica.role, to = %new_role, "Replica demoted");
        metrics::record_replica_lifecycle(&replica.node.name, "demoted");
        Ok(ReplicaRef {
            role: new_role,
            id: ReplicaId::SENTINEL,
            ..replica.clone()
        })
    }
}

fn not_found_as_no_replica(e: ClientError, replica: &ReplicaRef) -> TopologyError {
    if e.is_no_such_object() {
        TopologyError::NoSuchReplica(replica.locator())
    } else {
        TopologyError::from_client(e, replica.locator())
    }
}

/// Count replicas on the node that still write to the changelog.
async fn remaining_changelog_users(node: &NodeHandle) -> Result<usize> {
    let filter = Filter::equals("objectclass", REPLICA_OBJECTCLASS);
    let entries = node
        .search(dn::MAPPING_TREE_DN, SearchScope::Subtree, &filter)
        .await
        .at(&node.locator())?;
    Ok(entries
        .iter()
        .filter(|e| role_from_entry(e).is_ok_and(ReplicaRole::needs_changelog))
        .count())
}
