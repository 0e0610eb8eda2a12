// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Edge state types.
//!
//! Each agreement driven by the controller is tracked as an [`Edge`] with an
//! explicit state.
//!
//! # State Transitions
//!
//! ```text
//!              schedule_edge()
//! Created ─────────────────────→ Scheduled
//!    │                               │
//!    │ bootstrap()                   │ bootstrap()
//!    └──────────────┬────────────────┘
//!                   ↓
//!             Initializing ←──── Busy (consumer busy, retry)
//!                   │   └───────→─┘
//!                   │
//!        ┌──────────┴──────────┐
//!        ↓ (succeeded)         ↓ (other failure)
//!   Replicating              Failed ──→ Initializing (bootstrap again)
//!     │     ↑
//!     ↓     │ resume_edge()
//!     Paused
//!
//! Any state ──delete_edge()──→ Deleted (terminal)
//! ```
//!
//! # State Descriptions
//!
//! - **Created**: Agreement entry exists. Nothing sent yet.
//! - **Scheduled**: An explicit update window was written.
//! - **Initializing**: Total init triggered, status being polled.
//! - **Busy**: The consumer refused the init; it will be re-issued.
//! - **Replicating**: Total init succeeded. Incremental updates flow within the window.
//! - **Paused**: Updates stopped by `pause_edge()`.
//! - **Failed**: Total init ended with a non-busy failure.
//! - **Deleted**: Agreement removed. No further transitions.

use crate::agreement::AgreementRef;
use crate::error::{Result, TopologyError};
use crate::metrics;
use crate::replica::{ReplicaRef, ReplicaRole};
use tracing::debug;

/// State of one replication edge.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeState {
    Created,
    Scheduled,
    Initializing,
    Busy,
    Replicating,
    Paused,
    Failed,
    Deleted,
}

impl EdgeState {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeState::Created => "Created",
            EdgeState::Scheduled => "Scheduled",
            EdgeState::Initializing => "Initializing",
            EdgeState::Busy => "Busy",
            EdgeState::Replicating => "Replicating",
            EdgeState::Paused => "Paused",
            EdgeState::Failed => "Failed",
            EdgeState::Deleted => "Deleted",
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: EdgeState) -> bool {
        use EdgeState::*;
        match (self, next) {
            (Deleted, _) => false,
            (_, Deleted) => true,
            (Created | Scheduled | Replicating | Failed, Scheduled) => true,
            (Created | Scheduled | Busy | Replicating | Failed, Initializing) => true,
            (Initializing, Busy | Replicating | Failed) => true,
            (Busy, Failed) => true,
            (Replicating, Paused) => true,
            (Paused, Replicating) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == EdgeState::Deleted
    }
}

impl std::fmt::Display for EdgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One agreement and where it is in its lifecycle.
#[derive(Debug, Clone)]
pub struct Edge {
    pub agreement: AgreementRef,
    state: EdgeState,
}

impl Edge {
    pub fn new(agreement: AgreementRef) -> Self {
        Self {
            agreement,
            state: EdgeState::Created,
        }
    }

    pub fn state(&self) -> EdgeState {
        self.state
    }

    /// Name of the node the agreement is configured on.
    pub fn source(&self) -> &str {
        &self.agreement.source.node.name
    }

    /// `host:port` of the agreement target.
    pub fn target(&self) -> String {
        format!("{}:{}", self.agreement.target.host, self.agreement.target.port)
    }

    /// Fail with `InvalidState` unless `next` is reachable from here.
    pub fn ensure_can_transition(&self, next: EdgeState) -> Result<()> {
        if self.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(TopologyError::InvalidState {
                expected: format!("a state that can move to {}", next),
                actual: self.state.to_string(),
            })
        }
    }

    pub(crate) fn transition(&mut self, next: EdgeState) -> Result<()> {
        self.ensure_can_transition(next)?;
        debug!(agreement = %self.agreement.name, from = %self.state, to = %next, "Edge transition");
        self.state = next;
        metrics::record_edge_transition(next.as_str());
        Ok(())
    }
}

/// Role and ID to give a node when building a mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshRole {
    pub role: ReplicaRole,
    pub replica_id: Option<i64>,
}

impl MeshRole {
    pub fn supplier(replica_id: i64) -> Self {
        Self {
            role: ReplicaRole::Supplier,
            replica_id: Some(replica_id),
        }
    }

    pub fn hub() -> Self {
        Self {
            role: ReplicaRole::Hub,
            replica_id: None,
        }
    }

    pub fn consumer() -> Self {
        Self {
            role: ReplicaRole::Consumer,
            replica_id: None,
        }
    }
}

/// Result of [`build_full_mesh`](super::TopologyController::build_full_mesh).
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub replicas: Vec<ReplicaRef>,
    pub edges: Vec<Edge>,
}

impl Mesh {
    /// Edges configured on `node`.
    pub fn edges_from<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source() == node)
    }

    pub fn replica(&self, node: &str) -> Option<&ReplicaRef> {
        self.replicas.iter().find(|r| r.node.name == node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [EdgeState; 8] = [
        EdgeState::Created,
        EdgeState::Scheduled,
        EdgeState::Initializing,
        EdgeState::Busy,
        EdgeState::Replicating,
        EdgeState::Paused,
        EdgeState::Failed,
        EdgeState::Deleted,
    ];

    #[test]
    fn test_edge_state_display() {
        assert_eq!(EdgeState::Created.to_string(), "Created");
        assert_eq!(EdgeState::Initializing.to_string(), "Initializing");
        assert_eq!(EdgeState::Replicating.to_string(), "Replicating");
        assert_eq!(EdgeState::Deleted.to_string(), "Deleted");
    }

    #[test]
    fn test_happy_path_transitions() {
        use EdgeState::*;
        let path = [Created, Scheduled, Initializing, Busy, Initializing, Replicating, Paused, Replicating, Deleted];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_deleted_is_terminal() {
        for next in ALL {
            assert!(!EdgeState::Deleted.can_transition_to(next));
        }
        assert!(EdgeState::Deleted.is_terminal());
    }

    #[test]
    fn test_every_live_state_can_be_deleted() {
        for state in ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(state.can_transition_to(EdgeState::Deleted));
        }
    }

    #[test]
    fn test_illegal_transitions() {
        use EdgeState::*;
        assert!(!Created.can_transition_to(Replicating));
        assert!(!Created.can_transition_to(Paused));
        assert!(!Paused.can_transition_to(Initializing));
        assert!(!Scheduled.can_transition_to(Paused));
        assert!(!Busy.can_transition_to(Replicating));
    }

    #[test]
    fn test_mesh_role_constructors() {
        assert_eq!(MeshRole::supplier(4).replica_id, Some(4));
        assert_eq!(MeshRole::hub().role, ReplicaRole::Hub);
        assert_eq!(MeshRole::consumer().replica_id, None);
    }
}
