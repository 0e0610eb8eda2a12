// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replica Update Vector.
//!
//! Each node keeps, per contributing replica ID, the range of that replica's
//! changes it has applied. The vector is stored in the multi-valued
//! `nsds50ruv` attribute of a tombstone entry under the suffix:
//!
//! ```text
//! {replicageneration} 5f3a1b2c000000010000
//! {replica 1 ldap://ldap1:389} 5f3a1b2c000000010000 5f3a1c99000300010000
//! {replica 2 ldap://ldap2:389}
//! {replica 3} 5f3a1b2d000000030000 5f3a1b2e000000030000          (legacy)
//! ```
//!
//! A replica that has not generated any change yet has no CSNs. Values this
//! module does not recognise are skipped with a debug log; parsing never
//! fails as a whole.
//!
//! Convergence: a node has applied change `c` once its element for
//! `c.replica_id` has `max_csn >= c`.

use crate::client::{ClientResultExt, Filter, NodeHandle, SearchScope};
use crate::csn::Csn;
use crate::dn;
use crate::error::{Result, TopologyError};
use futures::future::join_all;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const RUV_ATTR: &str = "nsds50ruv";
pub const RUV_LAST_MODIFIED_ATTR: &str = "nsruvReplicaLastModified";

/// Filter selecting the RUV tombstone entry.
pub fn tombstone_filter() -> Filter {
    Filter::And(vec![
        Filter::equals("nsUniqueId", dn::RUV_TOMBSTONE_ID),
        Filter::equals("objectclass", "nsTombstone"),
    ])
}

/// One replica's applied range as seen by the node holding the vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuvElement {
    pub replica_id: u16,
    pub url: Option<String>,
    pub min_csn: Option<Csn>,
    pub max_csn: Option<Csn>,
    /// Seconds since epoch of the last local update from this replica.
    pub last_modified: Option<u32>,
}

/// A replica that `other` is missing or behind on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuvLag {
    pub replica_id: u16,
    pub ours: Csn,
    pub theirs: Option<Csn>,
    /// Difference of CSN timestamps; zero when `theirs` is absent.
    pub lag_seconds: u32,
}

/// Parsed snapshot of one node's vector. Read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaUpdateVector {
    pub generation: Option<String>,
    elements: BTreeMap<u16, RuvElement>,
}

impl ReplicaUpdateVector {
    /// Parse `nsds50ruv` values.
    pub fn parse<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut ruv = Self::default();
        for value in values {
            match parse_value(value) {
                Some(Token::Generation(generation)) => ruv.generation = Some(generation),
                Some(Token::Element(element)) => {
                    ruv.elements.insert(element.replica_id, element);
                }
                None => debug!(value = %value, "Skipping unrecognised RUV value"),
            }
        }
        ruv
    }

    /// Parse `nsds50ruv` together with `nsruvReplicaLastModified`.
    pub fn parse_with_last_modified<'a, I, J>(values: I, last_modified: J) -> Self
    where
        I: IntoIterator<Item = &'a str>,
        J: IntoIterator<Item = &'a str>,
    {
        let mut ruv = Self::parse(values);
        for value in last_modified {
            match parse_last_modified(value) {
                Some((rid, ts)) => {
                    if let Some(element) = ruv.elements.get_mut(&rid) {
                        element.last_modified = Some(ts);
                    }
                }
                None => debug!(value = %value, "Skipping unrecognised RUV last-modified value"),
            }
        }
        ruv
    }

    pub fn get(&self, replica_id: u16) -> Option<&RuvElement> {
        self.elements.get(&replica_id)
    }

    pub fn elements(&self) -> impl Iterator<Item = &RuvElement> {
        self.elements.values()
    }

    pub fn replica_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.elements.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn max_csn_for(&self, replica_id: u16) -> Option<Csn> {
        self.elements.get(&replica_id).and_then(|e| e.max_csn)
    }

    /// Whether this vector covers `landmark`.
    pub fn is_converged(&self, landmark: &Csn) -> bool {
        self.max_csn_for(landmark.replica_id)
            .is_some_and(|max| max >= *landmark)
    }

    /// Replicas where `other` is missing changes this vector has.
    pub fn divergence(&self, other: &ReplicaUpdateVector) -> Vec<RuvLag> {
        self.elements
            .values()
            .filter_map(|ours| {
                let ours_max = ours.max_csn?;
                let theirs = other.max_csn_for(ours.replica_id);
                match theirs {
                    Some(t) if t >= ours_max => None,
                    Some(t) => Some(RuvLag {
                        replica_id: ours.replica_id,
                        ours: ours_max,
                        theirs: Some(t),
                        lag_seconds: ours_max.timestamp.saturating_sub(t.timestamp),
                    }),
                    None => Some(RuvLag {
                        replica_id: ours.replica_id,
                        ours: ours_max,
                        theirs: None,
                        lag_seconds: 0,
                    }),
                }
            })
            .collect()
    }

    /// Read the vector for `suffix` from `node`.
    ///
    /// Looks for the tombstone entry under the suffix first and falls back to
    /// the replica configuration entry, which older nodes populate instead.
    pub async fn fetch(node: &NodeHandle, suffix: &str) -> Result<Self> {
        let locator = node.suffix_locator(suffix);

        let tombstones = match node
            .search(suffix, SearchScope::Subtree, &tombstone_filter())
            .await
        {
            Ok(entries) => entries,
            Err(e) if e.is_no_such_object() => Vec::new(),
            Err(e) => return Err(TopologyError::from_client(e, locator)),
        };
        if let Some(entry) = tombstones.iter().find(|e| e.has_attr(RUV_ATTR)) {
            return Ok(Self::parse_with_last_modified(
                entry.values(RUV_ATTR).iter().map(String::as_str),
                entry.values(RUV_LAST_MODIFIED_ATTR).iter().map(String::as_str),
            ));
        }

        warn!(node = %node.name, suffix = %suffix, "No RUV tombstone entry, trying cn=replica");
        let replica = node.get(&dn::replica_dn(suffix)).await.at(&locator)?;
        match replica {
            Some(entry) if entry.has_attr(RUV_ATTR) => Ok(Self::parse(
                entry.values(RUV_ATTR).iter().map(String::as_str),
            )),
            _ => Err(TopologyError::RuvNotFound(locator)),
        }
    }

    /// Fetch the vector from every node concurrently.
    ///
    /// Any single failure fails the whole call; an unreachable node is never
    /// silently left out.
    pub async fn fetch_all(
        nodes: &[NodeHandle],
        suffix: &str,
    ) -> Result<Vec<(String, ReplicaUpdateVector)>> {
        let results = join_all(nodes.iter().map(|node| async move {
            Self::fetch(node, suffix)
                .await
                .map(|ruv| (node.name.clone(), ruv))
        }))
        .await;
        results.into_iter().collect()
    }
}

/// Whether `ruv` covers the landmark change.
pub fn is_converged(landmark: &Csn, ruv: &ReplicaUpdateVector) -> bool {
    ruv.is_converged(landmark)
}

enum Token {
    Generation(String),
    Element(RuvElement),
}

/// Split `{header} rest` into its two halves.
fn split_braced(value: &str) -> Option<(&str, &str)> {
    let value = value.trim();
    let inner = value.strip_prefix('{')?;
    let (header, rest) = inner.split_once('}')?;
    Some((header.trim(), rest.trim()))
}

fn parse_replica_header(header: &str) -> Option<(u16, Option<String>)> {
    let mut words = header.split_whitespace();
    if !words.next()?.eq_ignore_ascii_case("replica") {
        return None;
    }
    let rid = words.next()?.parse::<u16>().ok()?;
    let url = words.next().map(str::to_string);
    if words.next().is_some() {
        return None;
    }
    Some((rid, url))
}

fn parse_value(value: &str) -> Option<Token> {
    let (header, rest) = split_braced(value)?;

    if header.eq_ignore_ascii_case("replicageneration") {
        let generation = rest.split_whitespace().next()?;
        return Some(Token::Generation(generation.to_string()));
    }

    let (replica_id, url) = parse_replica_header(header)?;
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let (min_csn, max_csn, last_modified) = match tokens.as_slice() {
        [] => (None, None, None),
        [min, max] => (Some(min.parse().ok()?), Some(max.parse().ok()?), None),
        [min, max, lastmod] => (
            Some(min.parse().ok()?),
            Some(max.parse().ok()?),
            Some(u32::from_str_radix(lastmod, 16).ok()?),
        ),
        _ => return None,
    };

    Some(Token::Element(RuvElement {
        replica_id,
        url,
        min_csn,
        max_csn,
        last_modified,
    }))
}

fn parse_last_modified(value: &str) -> Option<(u16, u32)> {
    let (header, rest) = split_braced(value)?;
    let (rid, _) = parse_replica_header(header)?;
    let ts = u32::from_str_radix(rest.split_whitespace().next()?, 16).ok()?;
    Some((rid, ts))
}
