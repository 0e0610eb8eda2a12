// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Replication Topology
//!
//! A control plane for configuring, bootstrapping and verifying multi-node
//! directory replication topologies.
//!
//! ## Architecture
//!
//! The crate never talks to the network itself. Every node is reached through
//! a [`DirectoryNodeClient`] the caller provides:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                         TopologyController                                │
//! │                                                                           │
//! │  ┌─────────────┐    ┌──────────────┐    ┌──────────────────────────────┐  │
//! │  │ Replica     │───►│ Agreement    │───►│ Bootstrap (init + poll)      │  │
//! │  │ + ChangeLog │    │ (edge)       │    │ busy retry with backoff      │  │
//! │  └─────────────┘    └──────────────┘    └──────────────────────────────┘  │
//! │         │                   │                        │                    │
//! │         ▼                   ▼                        ▼                    │
//! │  ┌─────────────┐    ┌──────────────┐    ┌──────────────────────────────┐  │
//! │  │ Properties  │    │ Schedule     │    │ Convergence (marker / RUV)   │  │
//! │  └─────────────┘    └──────────────┘    └──────────────────────────────┘  │
//! └───────────────────────────────────┬───────────────────────────────────────┘
//!                                     │ get / search / add / modify / delete
//!                                     ▼
//!                          DirectoryNodeClient (one per node)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replication_topology::{NodeHandle, ReplicaRole, TopologyConfig, TopologyController};
//! # async fn run(node1: NodeHandle, node2: NodeHandle) -> replication_topology::Result<()> {
//! let controller = TopologyController::new(TopologyConfig::default())?;
//! let suffix = "dc=example,dc=com";
//!
//! let supplier = controller
//!     .enable_replication(&node1, suffix, ReplicaRole::Supplier, Some(1), None)
//!     .await?;
//! controller
//!     .enable_replication(&node2, suffix, ReplicaRole::Consumer, None, None)
//!     .await?;
//!
//! let mut edge = controller.connect(&supplier, &node2, &Default::default()).await?;
//! controller.bootstrap(&mut edge).await?;
//! controller.wait_for_convergence(&node1, &[node2], suffix).await?;
//! # Ok(())
//! # }
//! ```

pub mod agreement;
pub mod changelog;
pub mod client;
pub mod config;
pub mod convergence;
pub mod csn;
pub mod dn;
pub mod error;
pub mod metrics;
pub mod properties;
pub mod replica;
pub mod resilience;
pub mod ruv;
pub mod schedule;
pub mod task;
pub mod topology;

// Re-exports for convenience
pub use agreement::{Agreement, AgreementProperty, AgreementRef, AgreementState, AgreementStatus, AgreementTarget, InitOutcome, PauseMechanism};
pub use changelog::{ChangeLog, ChangeLogLocation};
pub use client::{ClientError, DirectoryNodeClient, Entry, Filter, Modification, NodeCapabilities, NodeHandle, SearchScope};
pub use config::TopologyConfig;
pub use convergence::{ConvergenceReport, Landmark};
pub use csn::Csn;
pub use error::{ResourceLocator, Result, TopologyError};
pub use properties::{PropertyDelta, PropertyOp};
pub use replica::{Replica, ReplicaId, ReplicaProperty, ReplicaRef, ReplicaRole};
pub use resilience::{Cancellation, PollBudget};
pub use ruv::ReplicaUpdateVector;
pub use schedule::ScheduleWindow;
pub use task::{CleanAllRuv, TaskRef, TaskStatus};
pub use topology::{Edge, EdgeState, Mesh, MeshRole, TopologyController};
