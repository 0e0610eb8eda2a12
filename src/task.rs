// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! CleanAllRUV: retiring a replica ID from every RUV in the topology.
//!
//! Disabling a supplier removes its replica entry but not its element in the
//! RUV of the other suppliers. The clean task removes it everywhere. An abort
//! task stops a clean that cannot finish, e.g. because a supplier is down.
//!
//! A task is an entry added under a container in `cn=tasks,cn=config`. The
//! node runs it in the background and reports on the entry itself:
//!
//! ```text
//!   add cn=cleanallruv_<id>,cn=cleanallruv,cn=tasks,cn=config
//!         │
//!         ▼
//!   nsTaskStatus: Cleaning rid(2)...        (running, no exit code yet)
//!         │
//!         ├──► nsTaskExitCode: 0            done
//!         ├──► nsTaskExitCode: <non-zero>   TaskFailed
//!         └──► entry removed                done, the task cleaned up after itself
//! ```

use crate::client::{ClientResultExt, Entry, NodeHandle};
use crate::dn;
use crate::error::{ResourceLocator, Result, TopologyError};
use crate::metrics;
use crate::replica::{ReplicaId, ReplicaRole};
use crate::resilience::{poll_until, Cancellation, PollBudget};
use tokio::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

pub const CLEANALLRUV_DN: &str = "cn=cleanallruv,cn=tasks,cn=config";
pub const ABORT_CLEANALLRUV_DN: &str = "cn=abort cleanallruv,cn=tasks,cn=config";

pub const ATTR_BASE_DN: &str = "replica-base-dn";
pub const ATTR_REPLICA_ID: &str = "replica-id";
pub const ATTR_FORCE: &str = "replica-force-cleaning";
pub const ATTR_CERTIFY: &str = "replica-certify-all";
pub const ATTR_EXIT_CODE: &str = "nsTaskExitCode";
pub const ATTR_STATUS: &str = "nsTaskStatus";
pub const ATTR_LOG: &str = "nsTaskLog";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    CleanAllRuv,
    AbortCleanAllRuv,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CleanAllRuv => "cleanallruv",
            Self::AbortCleanAllRuv => "abort_cleanallruv",
        }
    }

    /// Container the task entry is added under.
    pub fn container(self) -> &'static str {
        match self {
            Self::CleanAllRuv => CLEANALLRUV_DN,
            Self::AbortCleanAllRuv => ABORT_CLEANALLRUV_DN,
        }
    }
}

/// A task entry that was added to a node.
#[derive(Debug, Clone)]
pub struct TaskRef {
    pub node: NodeHandle,
    pub kind: TaskKind,
    pub name: String,
    pub dn: String,
    pub suffix: String,
    pub replica_id: ReplicaId,
}

impl TaskRef {
    pub fn locator(&self) -> ResourceLocator {
        self.node.suffix_locator(&self.suffix)
    }
}

/// Snapshot of a task entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStatus {
    /// False once the node has removed the entry.
    pub present: bool,
    pub exit_code: Option<i64>,
    pub status: Option<String>,
    pub log: Option<String>,
}

impl TaskStatus {
    fn from_entry(entry: Option<&Entry>) -> Self {
        let Some(entry) = entry else {
            return Self::default();
        };
        Self {
            present: true,
            // An exit code the node wrote but we cannot read is still a failure.
            exit_code: entry
                .first(ATTR_EXIT_CODE)
                .map(|v| v.trim().parse::<i64>().unwrap_or(-1)),
            status: entry.first(ATTR_STATUS).map(str::to_string),
            log: entry.first(ATTR_LOG).map(str::to_string),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.present || self.exit_code.is_some()
    }

    pub fn succeeded(&self) -> bool {
        self.is_complete() && self.exit_code.unwrap_or(0) == 0
    }
}

/// CleanAllRUV and abort task operations.
pub struct CleanAllRuv;

impl CleanAllRuv {
    /// Start cleaning `replica_id` from the RUV of `suffix` on every supplier
    /// reachable from `node`.
    ///
    /// With `force` the node cleans even if some suppliers are unreachable.
    pub async fn start(node: &NodeHandle, suffix: &str, replica_id: i64, force: bool) -> Result<TaskRef> {
        let force = if force { "yes" } else { "no" };
        Self::add_task(node, TaskKind::CleanAllRuv, suffix, replica_id, (ATTR_FORCE, force)).await
    }

    /// Abort a running clean of `replica_id`.
    ///
    /// With `certify` the abort only completes once every supplier confirmed it.
    pub async fn abort(node: &NodeHandle, suffix: &str, replica_id: i64, certify: bool) -> Result<TaskRef> {
        let certify = if certify { "yes" } else { "no" };
        Self::add_task(node, TaskKind::AbortCleanAllRuv, suffix, replica_id, (ATTR_CERTIFY, certify)).await
    }

    async fn add_task(
        node: &NodeHandle,
        kind: TaskKind,
        suffix: &str,
        replica_id: i64,
        option: (&str, &str),
    ) -> Result<TaskRef> {
        if suffix.trim().is_empty() {
            return Err(TopologyError::MissingArgument("suffix"));
        }
        // Only supplier IDs ever appear in a RUV.
        let replica_id = ReplicaId::for_role(ReplicaRole::Supplier, Some(replica_id))?;
        let suffix = dn::normalize_dn(suffix);
        let name = format!("{}_{}", kind.as_str(), Uuid::new_v4().simple());
        let task_dn = format!("cn={},{}", name, kind.container());

        let entry = Entry::new(&task_dn)
            .with_attr("objectclass", ["top", "extensibleObject"])
            .with_attr("cn", [name.clone()])
            .with_attr(ATTR_BASE_DN, [suffix.clone()])
            .with_attr(ATTR_REPLICA_ID, [replica_id.to_string()])
            .with_attr(option.0, [option.1]);
        node.add(entry).await.at(&node.suffix_locator(&suffix))?;

        info!(
            node = %node.name,
            suffix = %suffix,
            replica_id = replica_id.get(),
            task = %name,
            "{} task started",
            kind.as_str()
        );
        Ok(TaskRef {
            node: node.clone(),
            kind,
            name,
            dn: task_dn,
            suffix,
            replica_id,
        })
    }

    /// Fresh read of the task entry. A missing entry is a finished task.
    pub async fn status(task: &TaskRef) -> Result<TaskStatus> {
        let entry = task.node.get(&task.dn).await.at(&task.locator())?;
        Ok(TaskStatus::from_entry(entry.as_ref()))
    }

    /// Poll the task until it finishes.
    ///
    /// A non-zero exit code is `TaskFailed`.
    pub async fn wait(task: &TaskRef, budget: &PollBudget, cancel: &Cancellation) -> Result<TaskStatus> {
        let started = Instant::now();
        let locator = task.locator();
        let waiting_for = format!("{} task {}", task.kind.as_str(), task.name);
        let result = poll_until(budget, cancel, &locator, &waiting_for, |attempt| async move {
            let status = Self::status(task).await?;
            debug!(task = %task.name, attempt, status = ?status.status, "Task poll");
            Ok(status.is_complete().then_some(status))
        })
        .await;

        let status = match result {
            Ok((status, _)) => status,
            Err(e) => {
                metrics::record_task_outcome(task.kind.as_str(), false, started.elapsed());
                return Err(e);
            }
        };
        metrics::record_task_outcome(task.kind.as_str(), status.succeeded(), started.elapsed());

        if let Some(exit_code) = status.exit_code.filter(|code| *code != 0) {
            error!(
                node = %task.node.name,
                task = %task.name,
                exit_code,
                log = ?status.log,
                "{} task failed",
                task.kind.as_str()
            );
            return Err(TopologyError::TaskFailed {
                locator,
                task: task.name.clone(),
                exit_code,
                status: status.status.clone().unwrap_or_default(),
            });
        }

        info!(
            node = %task.node.name,
            task = %task.name,
            replica_id = task.replica_id.get(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "{} task finished",
            task.kind.as_str()
        );
        Ok(status)
    }
}
