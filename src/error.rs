// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the topology control plane.
//!
//! Errors are grouped by where they originate and whether the caller can do
//! anything about them. Node-originated errors always carry the
//! [`ResourceLocator`] of the resource involved, since this crate has no UI of
//! its own and automation must be able to attribute every failure precisely.
//!
//! # Error Categories
//!
//! | Category | Variants | Retry |
//! |----------|----------|-------|
//! | Validation | `InvalidRole`, `InvalidReplicaId`, `InvalidSchedule`, `InvalidProperty`, `MissingArgument` | Never (raised before any RPC) |
//! | NotFound | `NoSuchReplica`, `NoSuchAgreement`, `NoBackendForSuffix`, `NoSuchNode`, `RuvNotFound` | No |
//! | AccessDenied | `AccessDenied` | Never (same credentials cannot succeed) |
//! | Busy | `Busy` | Caller re-issues `init` + `wait_for_init` |
//! | Transient | `TransientNetwork` | Propagated; caller decides |
//! | Other | `InitFailed`, `TaskFailed`, `Timeout`, `Cancelled`, `InvalidState`, `Node`, `Config` | No |
//!
//! Use [`TopologyError::is_retryable()`] to detect the busy-bootstrap contract
//! and [`TopologyError::is_transient()`] for network failures.

use crate::client::ClientError;
use std::fmt;
use thiserror::Error;

/// Result type alias for topology operations.
pub type Result<T> = std::result::Result<T, TopologyError>;

/// Identifies the resource an error refers to.
///
/// Fields are filled in as far as the failing operation knows them: a
/// replica-level failure has no agreement, a node-level failure has neither.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLocator {
    /// Name of the node the RPC was issued against.
    pub node: String,
    /// Normalized suffix, if the operation is suffix-scoped.
    pub suffix: Option<String>,
    /// Agreement name, if the operation is agreement-scoped.
    pub agreement: Option<String>,
}

impl ResourceLocator {
    pub fn node(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            suffix: None,
            agreement: None,
        }
    }

    pub fn suffix(node: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            suffix: Some(suffix.into()),
            agreement: None,
        }
    }

    pub fn agreement(
        node: impl Into<String>,
        suffix: impl Into<String>,
        agreement: impl Into<String>,
    ) -> Self {
        Self {
            node: node.into(),
            suffix: Some(suffix.into()),
            agreement: Some(agreement.into()),
        }
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node={}", self.node)?;
        if let Some(suffix) = &self.suffix {
            write!(f, " suffix={}", suffix)?;
        }
        if let Some(agreement) = &self.agreement {
            write!(f, " agreement={}", agreement)?;
        }
        Ok(())
    }
}

/// Coarse classification of a [`TopologyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    AccessDenied,
    Busy,
    Transient,
    Other,
}

/// Errors raised by the topology control plane.
#[derive(Error, Debug)]
pub enum TopologyError {
    /// Role name not one of supplier/hub/consumer, or a promotion/demotion
    /// that does not move in the requested direction.
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    /// Replica ID does not satisfy the rules for the role.
    ///
    /// Suppliers need `1 <= id < 65535`; hubs and consumers carry the
    /// sentinel `65535`.
    #[error("Invalid replica ID {id} for role {role}")]
    InvalidReplicaId { role: String, id: i64 },

    /// Schedule interval failed client-side validation. No RPC was issued.
    #[error("Invalid schedule {interval:?}: {reason}")]
    InvalidSchedule { interval: String, reason: String },

    /// Unknown property name in a property delta. No RPC was issued.
    #[error("Invalid property: {0}")]
    InvalidProperty(String),

    /// A mandatory argument was empty or absent.
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("No replica configured ({0})")]
    NoSuchReplica(ResourceLocator),

    #[error("No such agreement ({0})")]
    NoSuchAgreement(ResourceLocator),

    #[error("No backend hosts suffix ({0})")]
    NoBackendForSuffix(ResourceLocator),

    #[error("No such node: {0}")]
    NoSuchNode(String),

    /// Neither the tombstone RUV entry nor the replica entry carried an RUV.
    #[error("RUV not found ({0})")]
    RuvNotFound(ResourceLocator),

    /// The node refused the operation for the bound identity.
    #[error("Access denied ({locator}): {message}")]
    AccessDenied {
        locator: ResourceLocator,
        message: String,
    },

    /// Bootstrap reported the consumer busy.
    ///
    /// The documented recovery is for the caller to re-issue `init` and
    /// wait again.
    #[error("Replica busy ({locator}): {status}")]
    Busy {
        locator: ResourceLocator,
        status: String,
    },

    /// Node unreachable or connection dropped.
    #[error("Network error ({locator}): {message}")]
    TransientNetwork {
        locator: ResourceLocator,
        message: String,
    },

    /// Bootstrap ended with a non-busy failure status.
    #[error("Total init failed ({locator}): {status}")]
    InitFailed {
        locator: ResourceLocator,
        status: String,
    },

    /// A directory task finished with a non-zero exit code.
    #[error("Task {task} failed with exit code {exit_code} ({locator}): {status}")]
    TaskFailed {
        locator: ResourceLocator,
        task: String,
        exit_code: i64,
        status: String,
    },

    /// A polling loop exhausted its budget.
    #[error("Timed out after {attempts} attempts waiting for {waiting_for} ({locator})")]
    Timeout {
        locator: ResourceLocator,
        waiting_for: String,
        attempts: usize,
    },

    /// The cancellation signal fired during a wait.
    #[error("Operation cancelled")]
    Cancelled,

    /// Edge state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Any other node-side failure.
    #[error("Node error ({locator}): {source}")]
    Node {
        locator: ResourceLocator,
        #[source]
        source: ClientError,
    },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TopologyError {
    /// Map a transport error into the topology taxonomy, attaching a locator.
    ///
    /// `NoSuchObject` maps to the generic [`TopologyError::Node`] variant;
    /// callers that know which resource is missing translate it themselves.
    pub fn from_client(source: ClientError, locator: ResourceLocator) -> Self {
        match source {
            ClientError::InsufficientAccess { message, .. } => Self::AccessDenied { locator, message },
            ClientError::InvalidCredentials(message) => Self::AccessDenied { locator, message },
            ClientError::Network(message) => Self::TransientNetwork { locator, message },
            ClientError::Busy(status) => Self::Busy { locator, status },
            other => Self::Node {
                locator,
                source: other,
            },
        }
    }

    pub fn invalid_schedule(interval: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            interval: interval.to_string(),
            reason: reason.into(),
        }
    }

    /// The locator of the resource involved, if the error came from a node.
    pub fn locator(&self) -> Option<&ResourceLocator> {
        match self {
            Self::NoSuchReplica(l)
            | Self::NoSuchAgreement(l)
            | Self::NoBackendForSuffix(l)
            | Self::RuvNotFound(l) => Some(l),
            Self::AccessDenied { locator, .. }
            | Self::Busy { locator, .. }
            | Self::TransientNetwork { locator, .. }
            | Self::InitFailed { locator, .. }
            | Self::TaskFailed { locator, .. }
            | Self::Timeout { locator, .. }
            | Self::Node { locator, .. } => Some(locator),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRole(_)
            | Self::InvalidReplicaId { .. }
            | Self::InvalidSchedule { .. }
            | Self::InvalidProperty(_)
            | Self::MissingArgument(_) => ErrorCategory::Validation,
            Self::NoSuchReplica(_)
            | Self::NoSuchAgreement(_)
            | Self::NoBackendForSuffix(_)
            | Self::NoSuchNode(_)
            | Self::RuvNotFound(_) => ErrorCategory::NotFound,
            Self::AccessDenied { .. } => ErrorCategory::AccessDenied,
            Self::Busy { .. } => ErrorCategory::Busy,
            Self::TransientNetwork { .. } => ErrorCategory::Transient,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error has a documented caller-driven retry contract.
    ///
    /// Only a busy bootstrap qualifies.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    /// Whether this error is a transport-level failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork { .. })
    }

    pub fn is_validation(&self) -> bool {
        self.category() == ErrorCategory::Validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_is_retryable() {
        let err = TopologyError::Busy {
            locator: ResourceLocator::agreement("node-1", "dc=example,dc=com", "meTo_host2:389"),
            status: "Error (18) Replication error acquiring replica: replica busy".to_string(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::Busy);
        assert!(err.to_string().contains("meTo_host2:389"));
    }

    #[test]
    fn test_access_denied_not_retryable() {
        let err = TopologyError::from_client(
            ClientError::InsufficientAccess {
                dn: "cn=replica".into(),
                message: "insufficient access".into(),
            },
            ResourceLocator::suffix("node-1", "dc=example,dc=com"),
        );
        assert!(matches!(err, TopologyError::AccessDenied { .. }));
        assert!(!err.is_retryable());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_network_is_transient() {
        let err = TopologyError::from_client(
            ClientError::Network("connection reset".into()),
            ResourceLocator::node("node-2"),
        );
        assert!(err.is_transient());
        assert!(!err.is_retryable());
        assert_eq!(err.locator().map(|l| l.node.as_str()), Some("node-2"));
    }

    #[test]
    fn test_validation_category() {
        let err = TopologyError::invalid_schedule("garbage", "bad format");
        assert!(err.is_validation());
        assert!(err.locator().is_none());

        let err = TopologyError::InvalidReplicaId {
            role: "supplier".into(),
            id: 0,
        };
        assert!(err.is_validation());
        assert!(err.to_string().contains("supplier"));
    }

    #[test]
    fn test_locator_display() {
        let l = ResourceLocator::agreement("n1", "dc=example,dc=com", "meTo_n2:389");
        assert_eq!(
            l.to_string(),
            "node=n1 suffix=dc=example,dc=com agreement=meTo_n2:389"
        );
        assert_eq!(ResourceLocator::node("n1").to_string(), "node=n1");
    }

    #[test]
    fn test_unknown_client_error_wrapped() {
        let err = TopologyError::from_client(
            ClientError::Other("server went away".into()),
            ResourceLocator::node("n1"),
        );
        assert!(matches!(err, TopologyError::Node { .. }));
        assert_eq!(err.category(), ErrorCategory::Other);
    }
}
