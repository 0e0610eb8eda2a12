// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Distinguished-name helpers and well-known configuration locations.
//!
//! ```text
//! cn=config
//! ├── cn=mapping tree
//! │   └── cn="<suffix>"                  mapping tree entry
//! │       └── cn=replica                 Replica
//! │           └── cn=meTo_host:port      Agreement
//! ├── cn=changelog5                      legacy node-wide ChangeLog
//! ├── cn=replication manager             default bind identity
//! └── cn=plugins
//!     └── cn=ldbm database
//!         └── cn=<backend>               nsslapd-suffix: <suffix>
//!             └── cn=changelog           per-suffix ChangeLog
//! ```

pub const ROOT_DSE: &str = "";
pub const CONFIG_DN: &str = "cn=config";
pub const MAPPING_TREE_DN: &str = "cn=mapping tree,cn=config";
pub const LDBM_DN: &str = "cn=ldbm database,cn=plugins,cn=config";
pub const LEGACY_CHANGELOG_DN: &str = "cn=changelog5,cn=config";
pub const DEFAULT_BIND_DN: &str = "cn=replication manager,cn=config";

/// `nsUniqueId` of the tombstone entry holding the database RUV.
pub const RUV_TOMBSTONE_ID: &str = "ffffffff-ffffffff-ffffffff-ffffffff";

/// Split a DN into its RDN components.
///
/// Commas inside double quotes or escaped with a backslash do not split.
pub fn split_rdns(dn: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&dn[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < dn.len() || !parts.is_empty() {
        parts.push(&dn[start..]);
    }
    parts
}

/// Canonical form used for comparisons and map keys.
///
/// Whitespace around `,` and `=` is dropped and the result lowercased.
pub fn normalize_dn(dn: &str) -> String {
    split_rdns(dn.trim())
        .into_iter()
        .map(|rdn| match rdn.split_once('=') {
            Some((attr, value)) => format!("{}={}", attr.trim(), value.trim()),
            None => rdn.trim().to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
        .to_ascii_lowercase()
}

/// The DN one level up, or `None` for a single-RDN or empty DN.
pub fn parent_dn(dn: &str) -> Option<String> {
    let rdns = split_rdns(dn);
    if rdns.len() < 2 {
        return None;
    }
    Some(rdns[1..].join(","))
}

/// Value of the leading RDN, with surrounding quotes removed.
pub fn rdn_value(dn: &str) -> Option<String> {
    let first = split_rdns(dn).into_iter().next()?;
    let (_, value) = first.split_once('=')?;
    Some(value.trim().trim_matches('"').to_string())
}

pub fn mapping_tree_dn(suffix: &str) -> String {
    format!("cn=\"{}\",{}", normalize_dn(suffix), MAPPING_TREE_DN)
}

pub fn replica_dn(suffix: &str) -> String {
    format!("cn=replica,{}", mapping_tree_dn(suffix))
}

pub fn agreement_dn(suffix: &str, name: &str) -> String {
    format!("cn={},{}", name, replica_dn(suffix))
}

pub fn backend_dn(backend: &str) -> String {
    format!("cn={},{}", backend, LDBM_DN)
}

/// Per-suffix changelog, kept under the backend entry.
pub fn backend_changelog_dn(backend: &str) -> String {
    format!("cn=changelog,{}", backend_dn(backend))
}
