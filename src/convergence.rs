// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Convergence checks across a topology.
//!
//! Two ways to decide that every node has caught up with a supplier:
//!
//! - **Marker**: write a uniquely named landmark entry on the supplier and
//!   search every consumer for it. Cheap, and what day-to-day checks use.
//! - **RUV**: after writing the landmark, take the supplier's max CSN for its
//!   own replica ID and wait until every consumer's vector covers it. More
//!   round trips, but it is exact.
//!
//! [`audit`] compares vectors without writing anything.
//!
//! A node that cannot be read fails the whole check. Nodes are never skipped.

use crate::client::{ClientError, ClientResultExt, Entry, Filter, NodeHandle, SearchScope};
use crate::csn::Csn;
use crate::dn;
use crate::error::{Result, TopologyError};
use crate::metrics;
use crate::resilience::{poll_until, Cancellation, PollBudget};
use crate::ruv::{ReplicaUpdateVector, RuvLag};
use futures::future::join_all;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A marker entry whose arrival on a consumer proves propagation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Landmark {
    pub dn: String,
}

impl Landmark {
    /// A fresh landmark directly under `suffix`.
    pub fn unique(suffix: &str) -> Self {
        let suffix = dn::normalize_dn(suffix);
        Self {
            dn: format!("cn=repl-landmark-{},{}", Uuid::new_v4(), suffix),
        }
    }

    /// Use an existing DN as the landmark.
    pub fn at(dn: impl Into<String>) -> Self {
        Self { dn: dn.into() }
    }

    fn entry(&self) -> Entry {
        let cn = dn::rdn_value(&self.dn).unwrap_or_else(|| "repl-landmark".to_string());
        Entry::new(&self.dn)
            .with_attr("objectclass", ["top", "extensibleObject"])
            .with_attr("cn", [cn])
            .with_attr("description", ["replication convergence landmark"])
    }
}

/// Summary of a finished convergence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceReport {
    pub landmark: String,
    /// The supplier CSN consumers had to reach (RUV method only).
    pub csn: Option<Csn>,
    pub attempts: usize,
    pub elapsed: Duration,
    /// Consumers that were checked.
    pub nodes: Vec<String>,
}

async fn write_landmark(supplier: &NodeHandle, landmark: &Landmark) -> Result<()> {
    let written = supplier
        .add_if_absent(landmark.entry())
        .await
        .at(&supplier.locator())?;
    if !written {
        warn!(node = %supplier.name, landmark = %landmark.dn, "Landmark already present, reusing it");
    }
    debug!(node = %supplier.name, landmark = %landmark.dn, "Landmark written");
    Ok(())
}

async fn remove_landmark_from(supplier: &NodeHandle, landmark: &Landmark) {
    if let Err(e) = supplier.delete_if_present(&landmark.dn).await {
        warn!(node = %supplier.name, landmark = %landmark.dn, error = %e, "Failed to remove landmark");
    }
}

/// Whether `node` holds `landmark`. A missing parent is "not yet".
async fn holds_landmark(node: &NodeHandle, landmark: &str) -> Result<bool> {
    match node.search(landmark, SearchScope::Base, &Filter::any()).await {
        Ok(entries) => Ok(!entries.is_empty()),
        Err(ClientError::NoSuchObject(_)) => Ok(false),
        Err(e) => Err(TopologyError::from_client(e, node.locator())),
    }
}

/// Write `landmark` on `supplier` and wait until every consumer has it.
pub async fn wait_for_convergence(
    supplier: &NodeHandle,
    consumers: &[NodeHandle],
    landmark: &Landmark,
    budget: &PollBudget,
    cancel: &Cancellation,
    remove_landmark: bool,
) -> Result<ConvergenceReport> {
    let started = Instant::now();
    write_landmark(supplier, landmark).await?;

    let landmark_dn = landmark.dn.as_str();
    let result = poll_until(budget, cancel, &supplier.locator(), "landmark propagation", |attempt| async move {
        let seen = join_all(consumers.iter().map(|node| holds_landmark(node, landmark_dn))).await;
        let mut pending = Vec::new();
        for (node, seen) in consumers.iter().zip(seen) {
            if !seen? {
                pending.push(node.name.as_str());
            }
        }
        debug!(attempt, pending = ?pending, "Landmark poll");
        Ok(pending.is_empty().then_some(()))
    })
    .await;

    let elapsed = started.elapsed();
    let attempts = match &result {
        Ok((_, attempts)) => *attempts,
        Err(TopologyError::Timeout { attempts, .. }) => *attempts,
        Err(_) => 0,
    };
    metrics::record_convergence_check("marker", result.is_ok(), attempts, elapsed);
    result?;

    if remove_landmark {
        remove_landmark_from(supplier, landmark).await;
    }
    info!(
        supplier = %supplier.name,
        consumers = consumers.len(),
        attempts,
        elapsed_ms = elapsed.as_millis() as u64,
        "Topology converged on landmark"
    );
    Ok(ConvergenceReport {
        landmark: landmark.dn.clone(),
        csn: None,
        attempts,
        elapsed,
        nodes: consumers.iter().map(|n| n.name.clone()).collect(),
    })
}

/// Write a landmark and wait until every consumer's RUV covers it.
pub async fn wait_for_ruv_convergence(
    supplier: &NodeHandle,
    supplier_rid: u16,
    consumers: &[NodeHandle],
    suffix: &str,
    budget: &PollBudget,
    cancel: &Cancellation,
    remove_landmark: bool,
) -> Result<ConvergenceReport> {
    let started = Instant::now();
    let suffix = dn::normalize_dn(suffix);
    let landmark = Landmark::unique(&suffix);
    write_landmark(supplier, &landmark).await?;

    let supplier_ruv = ReplicaUpdateVector::fetch(supplier, &suffix).await?;
    let target = supplier_ruv
        .max_csn_for(supplier_rid)
        .ok_or_else(|| TopologyError::RuvNotFound(supplier.suffix_locator(&suffix)))?;
    debug!(supplier = %supplier.name, csn = %target, "Landmark CSN");

    let suffix_ref = suffix.as_str();
    let result = poll_until(budget, cancel, &supplier.suffix_locator(&suffix), "RUV convergence", |attempt| async move {
        let ruvs = ReplicaUpdateVector::fetch_all(consumers, suffix_ref).await?;
        let mut pending = Vec::new();
        for (name, ruv) in &ruvs {
            if !ruv.is_converged(&target) {
                let lag = ruv
                    .max_csn_for(supplier_rid)
                    .map_or(0, |c| target.timestamp.saturating_sub(c.timestamp));
                metrics::record_ruv_lag(name, supplier_rid, lag);
                pending.push(name.clone());
            }
        }
        debug!(attempt, pending = ?pending, "RUV poll");
        Ok(pending.is_empty().then_some(()))
    })
    .await;

    let elapsed = started.elapsed();
    let attempts = match &result {
        Ok((_, attempts)) => *attempts,
        Err(TopologyError::Timeout { attempts, .. }) => *attempts,
        Err(_) => 0,
    };
    metrics::record_convergence_check("ruv", result.is_ok(), attempts, elapsed);
    result?;

    if remove_landmark {
        remove_landmark_from(supplier, &landmark).await;
    }
    info!(supplier = %supplier.name, csn = %target, attempts, "Topology converged on RUV");
    Ok(ConvergenceReport {
        landmark: landmark.dn,
        csn: Some(target),
        attempts,
        elapsed,
        nodes: consumers.iter().map(|n| n.name.clone()).collect(),
    })
}

/// Compare every node's RUV with `reference` and report what each one lacks.
///
/// Nodes with nothing missing are left out of the result.
pub async fn audit(
    reference: &NodeHandle,
    others: &[NodeHandle],
    suffix: &str,
) -> Result<Vec<(String, Vec<RuvLag>)>> {
    let suffix = dn::normalize_dn(suffix);
    let ours = ReplicaUpdateVector::fetch(reference, &suffix).await?;
    let theirs = ReplicaUpdateVector::fetch_all(others, &suffix).await?;
    let report: Vec<_> = theirs
        .into_iter()
        .map(|(name, ruv)| (name, ours.divergence(&ruv)))
        .filter(|(_, lags)| !lags.is_empty())
        .collect();
    for (name, lags) in &report {
        for lag in lags {
            metrics::record_ruv_lag(name, lag.replica_id, lag.lag_seconds);
        }
        warn!(reference = %reference.name, node = %name, behind = lags.len(), "Node is behind");
    }
    Ok(report)
}
