// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Topology controller.
//!
//! Orchestrates replicas and agreements across nodes:
//!
//! ```text
//!  enable_replication ──► connect ──► schedule_edge ──► bootstrap
//!         (Replica)        (Edge)                        │
//!                                                        ▼
//!                                  pause_edge ◄──► resume_edge
//!                                                        │
//!                                  wait_for_convergence ◄┘
//!
//!  disable_replication ──► clean_ruv (retire the ID from every RUV)
//! ```
//!
//! The controller holds no node state between calls. Every read is fresh,
//! and the only thing it owns is its immutable configuration and a
//! cancellation signal that aborts any wait in progress.

mod types;

pub use types::{Edge, EdgeState, Mesh, MeshRole};

use crate::agreement::{Agreement, AgreementProperty, AgreementStatus, AgreementTarget, InitOutcome, PauseMechanism};
use crate::client::NodeHandle;
use crate::config::TopologyConfig;
use crate::convergence::{self, ConvergenceReport, Landmark};
use crate::error::{Result, TopologyError};
use crate::metrics;
use crate::properties::PropertyDelta;
use crate::replica::{Replica, ReplicaProperty, ReplicaRef, ReplicaRole};
use crate::resilience::{Cancellation, PollBudget};
use crate::ruv::RuvLag;
use crate::task::{CleanAllRuv, TaskStatus};
use std::collections::BTreeMap;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Drives replication setup, bootstrap and verification.
pub struct TopologyController {
    config: TopologyConfig,
    cancel: Cancellation,
}

impl TopologyController {
    /// Create a controller. The configuration is validated once, here.
    pub fn new(config: TopologyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: Cancellation::none(),
        })
    }

    /// Abort waits when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Replicas
    // ═══════════════════════════════════════════════════════════════════════

    /// Make `node` a replication participant for `suffix`.
    ///
    /// Creates the changelog and bind identity as needed. No agreement is
    /// created here.
    pub async fn enable_replication(
        &self,
        node: &NodeHandle,
        suffix: &str,
        role: ReplicaRole,
        replica_id: Option<i64>,
        bind_dn: Option<&str>,
    ) -> Result<ReplicaRef> {
        let mut properties = PropertyDelta::new();
        if let Some(bind_dn) = bind_dn {
            properties = properties.replace(ReplicaProperty::BindDn, bind_dn);
        }
        Replica::create(node, suffix, role, replica_id, &properties, &self.config.defaults).await
    }

    pub async fn disable_replication(&self, replica: &ReplicaRef) -> Result<()> {
        Replica::disable(replica).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Edges
    // ═══════════════════════════════════════════════════════════════════════

    /// Create the agreement `source -> target` for the source's suffix.
    pub async fn connect(
        &self,
        source: &ReplicaRef,
        target: &NodeHandle,
        properties: &PropertyDelta<AgreementProperty>,
    ) -> Result<Edge> {
        let target = AgreementTarget::new(&target.host, target.port, &source.suffix);
        let agreement = Agreement::create(source, &target, properties, &self.config.defaults).await?;
        Ok(Edge::new(agreement))
    }

    /// Set the edge's update window.
    pub async fn schedule_edge(&self, edge: &mut Edge, interval: &str) -> Result<()> {
        edge.ensure_can_transition(EdgeState::Scheduled)?;
        Agreement::schedule(&edge.agreement, interval).await?;
        edge.transition(EdgeState::Scheduled)
    }

    /// Run a total init on the edge and wait for it.
    ///
    /// A busy consumer is retried with backoff up to
    /// `bootstrap.max_busy_retries` times before `Busy` is returned. Any
    /// other failure leaves the edge `Failed` and returns `InitFailed`.
    /// Cancellation keeps the last state reached: `Initializing` while an
    /// init is pending, `Busy` during a busy backoff.
    pub async fn bootstrap(&self, edge: &mut Edge) -> Result<()> {
        edge.ensure_can_transition(EdgeState::Initializing)?;
        let started = Instant::now();
        let budget = self.config.bootstrap.poll_budget();
        let retry = self.config.bootstrap.busy_retry();
        let locator = edge.agreement.locator();

        let mut busy_retries = 0usize;
        loop {
            edge.transition(EdgeState::Initializing)?;
            let outcome = match self.init_once(edge, &budget).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(agreement = %edge.agreement.name, error = %e, "Bootstrap aborted");
                    if !matches!(e, TopologyError::Cancelled) {
                        edge.transition(EdgeState::Failed)?;
                    }
                    metrics::record_bootstrap_outcome(&edge.agreement.name, "failed", started.elapsed());
                    return Err(e);
                }
            };

            match outcome {
                InitOutcome::Done => {
                    edge.transition(EdgeState::Replicating)?;
                    metrics::record_bootstrap_outcome(&edge.agreement.name, "done", started.elapsed());
                    info!(
                        agreement = %edge.agreement.name,
                        busy_retries,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Bootstrap complete"
                    );
                    return Ok(());
                }
                InitOutcome::Failed { retryable: true, status } => {
                    edge.transition(EdgeState::Busy)?;
                    if busy_retries >= retry.max_attempts {
                        warn!(agreement = %edge.agreement.name, busy_retries, "Consumer still busy, giving up");
                        metrics::record_bootstrap_outcome(&edge.agreement.name, "busy", started.elapsed());
                        return Err(TopologyError::Busy { locator, status });
                    }
                    busy_retries += 1;
                    metrics::record_busy_retry(&edge.agreement.name);
                    let delay = retry.delay_for_attempt(busy_retries);
                    warn!(
                        agreement = %edge.agreement.name,
                        attempt = busy_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Consumer busy, re-issuing init"
                    );
                    if let Err(e) = self.cancel.sleep(delay).await {
                        warn!(agreement = %edge.agreement.name, busy_retries, "Bootstrap cancelled during busy backoff");
                        metrics::record_bootstrap_outcome(&edge.agreement.name, "failed", started.elapsed());
                        return Err(e);
                    }
                }
                InitOutcome::Failed { retryable: false, status } => {
                    edge.transition(EdgeState::Failed)?;
                    metrics::record_bootstrap_outcome(&edge.agreement.name, "failed", started.elapsed());
                    return Err(TopologyError::InitFailed { locator, status });
                }
            }
        }
    }

    async fn init_once(&self, edge: &Edge, budget: &PollBudget) -> Result<InitOutcome> {
        Agreement::init(&edge.agreement).await?;
        Agreement::wait_for_init(&edge.agreement, budget, &self.cancel).await
    }

    /// Stop updates on a replicating edge, then wait for the node to settle.
    pub async fn pause_edge(&self, edge: &mut Edge) -> Result<PauseMechanism> {
        edge.ensure_can_transition(EdgeState::Paused)?;
        let mechanism = Agreement::pause(&edge.agreement).await?;
        self.cancel.sleep(self.config.settle.pause_duration()).await?;
        edge.transition(EdgeState::Paused)?;
        Ok(mechanism)
    }

    pub async fn resume_edge(&self, edge: &mut Edge) -> Result<PauseMechanism> {
        edge.ensure_can_transition(EdgeState::Replicating)?;
        let mechanism = Agreement::resume(&edge.agreement).await?;
        self.cancel.sleep(self.config.settle.resume_duration()).await?;
        edge.transition(EdgeState::Replicating)?;
        Ok(mechanism)
    }

    pub async fn delete_edge(&self, edge: &mut Edge) -> Result<()> {
        edge.ensure_can_transition(EdgeState::Deleted)?;
        Agreement::delete(&edge.agreement).await?;
        edge.transition(EdgeState::Deleted)
    }

    /// Fresh status snapshot for the edge.
    pub async fn edge_status(&self, edge: &Edge) -> Result<AgreementStatus> {
        Agreement::status(&edge.agreement).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Meshes
    // ═══════════════════════════════════════════════════════════════════════

    /// Enable replication on every node and connect every ordered pair.
    ///
    /// Every node must have an entry in `roles` (keyed by node name).
    /// Consumers never source an agreement.
    pub async fn build_full_mesh(
        &self,
        nodes: &[NodeHandle],
        suffix: &str,
        roles: &BTreeMap<String, MeshRole>,
    ) -> Result<Mesh> {
        let mut planned = Vec::with_capacity(nodes.len());
        for node in nodes {
            let role = roles
                .get(&node.name)
                .copied()
                .ok_or_else(|| TopologyError::NoSuchNode(node.name.clone()))?;
            planned.push((node, role));
        }

        let mut mesh = Mesh::default();
        for (node, role) in &planned {
            let replica = self
                .enable_replication(node, suffix, role.role, role.replica_id, None)
                .await?;
            mesh.replicas.push(replica);
        }

        let no_properties = PropertyDelta::new();
        for source in &mesh.replicas {
            if source.role == ReplicaRole::Consumer {
                debug!(node = %source.node.name, "Consumer, not sourcing agreements");
                continue;
            }
            for (target, _) in &planned {
                if target.name == source.node.name {
                    continue;
                }
                let edge = self.connect(source, target, &no_properties).await?;
                mesh.edges.push(edge);
            }
        }

        info!(
            nodes = nodes.len(),
            edges = mesh.edges.len(),
            suffix = %suffix,
            "Full mesh built"
        );
        Ok(mesh)
    }

    /// Bootstrap every edge configured on `source`, one at a time.
    ///
    /// Stops at the first failure. Returns how many edges were bootstrapped.
    pub async fn bootstrap_from(&self, source: &str, edges: &mut [Edge]) -> Result<usize> {
        let mut done = 0;
        for edge in edges.iter_mut().filter(|e| e.source() == source) {
            self.bootstrap(edge).await?;
            done += 1;
        }
        if done == 0 {
            warn!(source = %source, "No edges to bootstrap");
        }
        Ok(done)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Convergence
    // ═══════════════════════════════════════════════════════════════════════

    /// Write a fresh landmark on `supplier` and wait until every consumer has it.
    pub async fn wait_for_convergence(
        &self,
        supplier: &NodeHandle,
        consumers: &[NodeHandle],
        suffix: &str,
    ) -> Result<ConvergenceReport> {
        let landmark = Landmark::unique(suffix);
        convergence::wait_for_convergence(
            supplier,
            consumers,
            &landmark,
            &self.config.convergence.poll_budget(),
            &self.cancel,
            self.config.convergence.remove_landmark,
        )
        .await
    }

    /// Like [`wait_for_convergence`](Self::wait_for_convergence), judged by RUVs.
    pub async fn wait_for_ruv_convergence(
        &self,
        supplier: &ReplicaRef,
        consumers: &[NodeHandle],
    ) -> Result<ConvergenceReport> {
        if supplier.role != ReplicaRole::Supplier {
            return Err(TopologyError::InvalidRole(format!(
                "{} is a {}, only suppliers originate changes",
                supplier.node.name, supplier.role
            )));
        }
        convergence::wait_for_ruv_convergence(
            &supplier.node,
            supplier.id.get(),
            consumers,
            &supplier.suffix,
            &self.config.convergence.poll_budget(),
            &self.cancel,
            self.config.convergence.remove_landmark,
        )
        .await
    }

    /// Report what each of `others` is missing compared to `reference`.
    pub async fn audit(
        &self,
        reference: &NodeHandle,
        others: &[NodeHandle],
        suffix: &str,
    ) -> Result<Vec<(String, Vec<RuvLag>)>> {
        convergence::audit(reference, others, suffix).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RUV maintenance
    // ═══════════════════════════════════════════════════════════════════════

    /// Remove `replica_id` from the RUV of `suffix` across the topology and
    /// wait for the task to finish.
    ///
    /// Run it from any remaining supplier after the retired supplier's
    /// replica was disabled.
    pub async fn clean_ruv(
        &self,
        node: &NodeHandle,
        suffix: &str,
        replica_id: i64,
        force: bool,
    ) -> Result<TaskStatus> {
        let task = CleanAllRuv::start(node, suffix, replica_id, force).await?;
        CleanAllRuv::wait(&task, &self.config.tasks.poll_budget(), &self.cancel).await
    }

    /// Abort a running clean of `replica_id` and wait for the abort to finish.
    pub async fn abort_clean_ruv(
        &self,
        node: &NodeHandle,
        suffix: &str,
        replica_id: i64,
        certify: bool,
    ) -> Result<TaskStatus> {
        let task = CleanAllRuv::abort(node, suffix, replica_id, certify).await?;
        CleanAllRuv::wait(&task, &self.config.tasks.poll_budget(), &self.cancel).await
    }
}
