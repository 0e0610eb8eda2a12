// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory directory node for testing.
//!
//! Records every call for assertions and behaves like a real node where the
//! controller depends on it:
//! - parents must exist on add, and only leaves can be deleted
//! - adding a value an attribute already holds fails
//! - `nsds5BeginReplicaRefresh: start` starts a scripted total init that
//!   advances one step per read of the agreement
//! - data writes on a tracked supplier get a CSN, update the local RUV and
//!   are replayed on downstream nodes
//! - a cleanallruv task advances one scripted step per read of its entry and,
//!   once it succeeds, drops the replica ID from this node's RUV and from
//!   downstream nodes
//!
//! Failures can be injected for the network, access control and the
//! `nsds5ReplicaEnabled` attribute.

#![allow(dead_code)]

use replication_topology::client::{
    BoxFuture, ClientError, ClientResult, DirectoryNodeClient, Entry, Filter, Modification, ModOp,
    NodeHandle, SearchScope,
};
use replication_topology::csn::Csn;
use replication_topology::dn;
use replication_topology::ruv::{ReplicaUpdateVector, RUV_ATTR};
use replication_topology::task::{self, ABORT_CLEANALLRUV_DN, CLEANALLRUV_DN};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const SUFFIX: &str = "dc=example,dc=com";
pub const BACKEND: &str = "userRoot";

const REFRESH_ATTR: &str = "nsds5BeginReplicaRefresh";
const INIT_STATUS_ATTR: &str = "nsds5replicaLastInitStatus";
const ENABLED_ATTR: &str = "nsds5ReplicaEnabled";
const CSN_EPOCH: u32 = 0x5f00_0000;

/// Which client operation was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    Search,
    Add,
    Modify,
    Delete,
}

impl Op {
    pub fn is_write(self) -> bool {
        matches!(self, Op::Add | Op::Modify | Op::Delete)
    }
}

/// A recorded client call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub op: Op,
    /// Normalized DN the call targeted.
    pub dn: String,
    /// Attributes written (add/modify only).
    pub attributes: Vec<String>,
    /// Children the target had when a delete was issued.
    pub children: usize,
}

/// One status observation of a scripted total init.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitStep {
    /// Refresh marker still set, no status yet.
    Running,
    /// Marker cleared and this status written.
    Status(String),
}

impl InitStep {
    pub fn succeeded() -> Self {
        Self::Status("Error (0) Total update succeeded".to_string())
    }

    pub fn busy() -> Self {
        Self::Status("Error (18) Replication error acquiring replica: replica busy".to_string())
    }

    pub fn failed() -> Self {
        Self::Status("Error (-11) Total update aborted: connection error".to_string())
    }
}

/// One observation of a scripted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStep {
    /// Status updated, no exit code yet.
    Running,
    /// Exit code and final status written.
    Exit(i64, String),
    /// The task removed its own entry.
    Removed,
}

impl TaskStep {
    pub fn succeeded() -> Self {
        Self::Exit(0, "Successfully cleaned rid".to_string())
    }

    pub fn failed() -> Self {
        Self::Exit(1, "Failed to clean rid: replica not reachable".to_string())
    }
}

struct ActiveTask {
    steps: VecDeque<TaskStep>,
    /// Suffix and replica ID to drop once a clean task succeeds.
    clean: Option<(String, u16)>,
}

struct ChangeTracking {
    suffix: String,
    replica_id: u16,
    next: u32,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    init_scripts: VecDeque<Vec<InitStep>>,
    active_inits: HashMap<String, VecDeque<InitStep>>,
    task_scripts: VecDeque<Vec<TaskStep>>,
    active_tasks: HashMap<String, ActiveTask>,
    tracking: Option<ChangeTracking>,
}

/// Mock implementation of DirectoryNodeClient that records all calls.
///
/// # Example
/// ```rust,ignore
/// let node = MockDirectory::new("ldap1");
/// node.add_backend(BACKEND, SUFFIX).await;
///
/// let handle = node.handle();
/// // Use in tests...
///
/// assert_eq!(node.count(Op::Add).await, 3);
/// ```
pub struct MockDirectory {
    pub name: String,
    state: Mutex<State>,
    calls: Mutex<Vec<RecordedCall>>,
    downstream: Mutex<Vec<Arc<MockDirectory>>>,
    network_down: AtomicBool,
    deny_writes: AtomicBool,
    reject_enabled_flag: AtomicBool,
    propagate: AtomicBool,
}

fn key(dn_str: &str) -> String {
    dn::normalize_dn(dn_str)
}

fn tombstone_dn(suffix: &str) -> String {
    format!("nsuniqueid={},{}", dn::RUV_TOMBSTONE_ID, key(suffix))
}

fn is_data(k: &str) -> bool {
    !k.is_empty() && !k.ends_with("cn=config") && !k.starts_with("nsuniqueid=")
}

fn under(k: &str, base: &str) -> bool {
    base.is_empty() || k == base || k.ends_with(&format!(",{}", base))
}

fn is_child(k: &str, parent: &str) -> bool {
    dn::parent_dn(k).map(|p| key(&p)) == Some(parent.to_string())
}

impl MockDirectory {
    /// A node with the config tree and a modern `vendorVersion`.
    pub fn new(name: &str) -> Arc<Self> {
        let mut state = State::default();
        for entry in [
            Entry::new("").with_attr("vendorVersion", ["389-Directory/2.4.5 B2024.100.0000"]),
            Entry::new("cn=config").with_attr("cn", ["config"]),
            Entry::new(dn::MAPPING_TREE_DN).with_attr("cn", ["mapping tree"]),
            Entry::new("cn=plugins,cn=config").with_attr("cn", ["plugins"]),
            Entry::new(dn::LDBM_DN).with_attr("cn", ["ldbm database"]),
            Entry::new("cn=tasks,cn=config").with_attr("cn", ["tasks"]),
            Entry::new(CLEANALLRUV_DN).with_attr("cn", ["cleanallruv"]),
            Entry::new(ABORT_CLEANALLRUV_DN).with_attr("cn", ["abort cleanallruv"]),
        ] {
            state.entries.insert(key(&entry.dn), entry);
        }
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(state),
            calls: Mutex::new(Vec::new()),
            downstream: Mutex::new(Vec::new()),
            network_down: AtomicBool::new(false),
            deny_writes: AtomicBool::new(false),
            reject_enabled_flag: AtomicBool::new(false),
            propagate: AtomicBool::new(true),
        })
    }

    /// A node with `SUFFIX` served by `BACKEND`.
    pub async fn with_suffix(name: &str) -> Arc<Self> {
        let node = Self::new(name);
        node.add_backend(BACKEND, SUFFIX).await;
        node
    }

    /// Handle addressing this node as `<name>:389`.
    pub fn handle(self: &Arc<Self>) -> NodeHandle {
        NodeHandle::new(&self.name, &self.name, 389, self.clone())
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    /// Add a backend, its mapping tree entry and the suffix entry.
    pub async fn add_backend(&self, backend: &str, suffix: &str) {
        let suffix = key(suffix);
        let rdn = dn::split_rdns(&suffix).first().map(|r| r.to_string()).unwrap_or_default();
        let (_, value) = rdn.split_once('=').unwrap_or(("dc", "example"));
        self.insert(
            Entry::new(dn::backend_dn(backend))
                .with_attr("objectclass", ["top", "extensibleObject", "nsBackendInstance"])
                .with_attr("cn", [backend])
                .with_attr("nsslapd-suffix", [suffix.clone()]),
        )
        .await;
        self.insert(
            Entry::new(dn::mapping_tree_dn(&suffix))
                .with_attr("objectclass", ["top", "extensibleObject", "nsMappingTree"])
                .with_attr("nsslapd-backend", [backend])
                .with_attr("nsslapd-state", ["backend"]),
        )
        .await;
        self.insert(
            Entry::new(suffix.clone())
                .with_attr("objectclass", ["top", "domain"])
                .with_attr("dc", [value]),
        )
        .await;
    }

    pub async fn set_vendor_version(&self, version: &str) {
        let mut state = self.state.lock().await;
        if let Some(root) = state.entries.get_mut("") {
            root.set("vendorVersion", vec![version.to_string()]);
        }
    }

    /// Insert an entry directly, bypassing checks and recording.
    pub async fn insert(&self, entry: Entry) {
        self.state.lock().await.entries.insert(key(&entry.dn), entry);
    }

    /// Write the RUV tombstone for `suffix`.
    pub async fn set_ruv(&self, suffix: &str, values: &[&str]) {
        self.insert(
            Entry::new(tombstone_dn(suffix))
                .with_attr("objectclass", ["top", "nsTombstone", "extensibleObject"])
                .with_attr("nsUniqueId", [dn::RUV_TOMBSTONE_ID])
                .with_attr(RUV_ATTR, values.iter().copied()),
        )
        .await;
    }

    /// Give data writes under `suffix` a CSN from `replica_id`.
    pub async fn track_changes(&self, suffix: &str, replica_id: u16) {
        let generation = format!("{{replicageneration}} {}", Csn::new(CSN_EPOCH, 0, replica_id, 0));
        let element = format!("{{replica {} ldap://{}:389}}", replica_id, self.name);
        self.set_ruv(suffix, &[generation.as_str(), element.as_str()]).await;
        self.state.lock().await.tracking = Some(ChangeTracking {
            suffix: key(suffix),
            replica_id,
            next: 1,
        });
    }

    /// Replay data writes (and total inits) on `other`.
    pub async fn replicate_to(&self, other: &Arc<MockDirectory>) {
        self.downstream.lock().await.push(other.clone());
    }

    /// Stop or restart replaying writes downstream.
    pub fn set_propagation(&self, on: bool) {
        self.propagate.store(on, Ordering::SeqCst);
    }

    /// Queue the status sequence for the next total init.
    ///
    /// Without a script an init reports running once, then succeeds.
    pub async fn script_init(&self, steps: Vec<InitStep>) {
        self.state.lock().await.init_scripts.push_back(steps);
    }

    /// Queue the step sequence for the next task added to this node.
    ///
    /// Without a script a task reports running once, then exits with 0.
    pub async fn script_task(&self, steps: Vec<TaskStep>) {
        self.state.lock().await.task_scripts.push_back(steps);
    }

    // =========================================================================
    // Failure injection
    // =========================================================================

    pub fn fail_network(&self, down: bool) {
        self.network_down.store(down, Ordering::SeqCst);
    }

    pub fn deny_writes(&self, deny: bool) {
        self.deny_writes.store(deny, Ordering::SeqCst);
    }

    /// Behave like an older node that does not know `nsds5ReplicaEnabled`.
    pub fn reject_enabled_flag(&self, reject: bool) {
        self.reject_enabled_flag.store(reject, Ordering::SeqCst);
    }

    // =========================================================================
    // Query Methods
    // =========================================================================

    pub async fn entry(&self, dn_str: &str) -> Option<Entry> {
        self.state.lock().await.entries.get(&key(dn_str)).cloned()
    }

    pub async fn contains(&self, dn_str: &str) -> bool {
        self.state.lock().await.entries.contains_key(&key(dn_str))
    }

    pub async fn children_of(&self, dn_str: &str) -> Vec<String> {
        let parent = key(dn_str);
        self.state
            .lock()
            .await
            .entries
            .keys()
            .filter(|k| is_child(k, &parent))
            .cloned()
            .collect()
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    pub async fn writes(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.op.is_write())
            .cloned()
            .collect()
    }

    pub async fn count(&self, op: Op) -> usize {
        self.calls.lock().await.iter().filter(|c| c.op == op).count()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn record(&self, op: Op, dn_str: &str, attributes: Vec<String>, children: usize) {
        self.calls.lock().await.push(RecordedCall {
            op,
            dn: key(dn_str),
            attributes,
            children,
        });
    }

    fn check_network(&self) -> ClientResult<()> {
        if self.network_down.load(Ordering::SeqCst) {
            return Err(ClientError::Network(format!("{}: connection refused", self.name)));
        }
        Ok(())
    }

    fn check_write(&self, dn_str: &str) -> ClientResult<()> {
        self.check_network()?;
        if self.deny_writes.load(Ordering::SeqCst) {
            return Err(ClientError::InsufficientAccess {
                dn: dn_str.to_string(),
                message: "write access denied".to_string(),
            });
        }
        Ok(())
    }

    /// Next CSN if `k` is a tracked data write.
    fn next_csn(state: &mut State, k: &str) -> Option<Csn> {
        let tracking = state.tracking.as_mut()?;
        if !is_data(k) || !under(k, &tracking.suffix) {
            return None;
        }
        let csn = Csn::new(CSN_EPOCH + tracking.next, 0, tracking.replica_id, 0);
        tracking.next += 1;
        Some(csn)
    }

    /// Advance the local RUV element for the CSN's replica.
    fn apply_csn(state: &mut State, node: &str, suffix: &str, csn: Csn) {
        let tombstone = key(&tombstone_dn(suffix));
        let entry = state.entries.entry(tombstone.clone()).or_insert_with(|| {
            Entry::new(tombstone.clone())
                .with_attr("objectclass", ["top", "nsTombstone", "extensibleObject"])
                .with_attr("nsUniqueId", [dn::RUV_TOMBSTONE_ID])
        });
        let current = entry.values(RUV_ATTR).to_vec();
        let ruv = ReplicaUpdateVector::parse(current.iter().map(String::as_str));
        let min = ruv
            .get(csn.replica_id)
            .and_then(|e| e.min_csn)
            .unwrap_or(csn);
        let url = ruv
            .get(csn.replica_id)
            .and_then(|e| e.url.clone())
            .unwrap_or_else(|| format!("ldap://{}:389", node));
        let mut values: Vec<String> = current
            .into_iter()
            .filter(|v| ReplicaUpdateVector::parse([v.as_str()]).get(csn.replica_id).is_none())
            .collect();
        values.push(format!("{{replica {} {}}} {} {}", csn.replica_id, url, min, csn));
        entry.set(RUV_ATTR, values);
    }

    /// Start a task whose entry was just added at `k`.
    fn register_task(state: &mut State, k: &str, entry: &Entry) {
        let Some(parent) = dn::parent_dn(k).map(|p| key(&p)) else {
            return;
        };
        let clean = if parent == key(CLEANALLRUV_DN) {
            let suffix = entry.first(task::ATTR_BASE_DN).map(key).unwrap_or_default();
            let rid = entry.first(task::ATTR_REPLICA_ID).and_then(|v| v.parse().ok());
            rid.map(|rid| (suffix, rid))
        } else if parent == key(ABORT_CLEANALLRUV_DN) {
            None
        } else {
            return;
        };
        let steps = state
            .task_scripts
            .pop_front()
            .unwrap_or_else(|| vec![TaskStep::Running, TaskStep::succeeded()]);
        state.active_tasks.insert(
            k.to_string(),
            ActiveTask {
                steps: steps.into(),
                clean,
            },
        );
    }

    /// Advance the task at `k`, returning what to clean if it just succeeded.
    fn advance_task(state: &mut State, k: &str) -> Option<(String, u16)> {
        let active = state.active_tasks.get_mut(k)?;
        let step = active.steps.pop_front();
        let clean = active.clean.clone();
        let drained = active.steps.is_empty();
        if drained {
            state.active_tasks.remove(k);
        }
        match step? {
            TaskStep::Running => {
                if let Some(entry) = state.entries.get_mut(k) {
                    entry.set(task::ATTR_STATUS, vec!["Task running".to_string()]);
                }
                None
            }
            TaskStep::Exit(code, status) => {
                if let Some(entry) = state.entries.get_mut(k) {
                    entry.set(task::ATTR_EXIT_CODE, vec![code.to_string()]);
                    entry.set(task::ATTR_STATUS, vec![status]);
                }
                if code == 0 {
                    clean
                } else {
                    None
                }
            }
            TaskStep::Removed => {
                state.entries.remove(k);
                clean
            }
        }
    }

    /// Drop `replica_id` from the RUV of `suffix` on this node.
    async fn purge_rid(&self, suffix: &str, replica_id: u16) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.entries.get_mut(&key(&tombstone_dn(suffix))) {
            let kept: Vec<String> = entry
                .values(RUV_ATTR)
                .iter()
                .filter(|v| ReplicaUpdateVector::parse([v.as_str()]).get(replica_id).is_none())
                .cloned()
                .collect();
            entry.set(RUV_ATTR, kept);
        }
    }

    async fn clean_rid_everywhere(&self, suffix: &str, replica_id: u16) {
        self.purge_rid(suffix, replica_id).await;
        let downstream = self.downstream.lock().await.clone();
        for node in downstream {
            node.purge_rid(suffix, replica_id).await;
        }
    }

    /// Apply a write that arrived by replication.
    async fn replay(&self, write: Replayed, csn: Option<(String, Csn)>) {
        let mut state = self.state.lock().await;
        match write {
            Replayed::Add(entry) => {
                state.entries.entry(key(&entry.dn)).or_insert(entry);
            }
            Replayed::Delete(k) => {
                state.entries.remove(&k);
            }
        }
        if let Some((suffix, csn)) = csn {
            Self::apply_csn(&mut state, &self.name, &suffix, csn);
        }
    }

    async fn push_downstream(&self, write: Replayed, csn: Option<(String, Csn)>) {
        if !self.propagate.load(Ordering::SeqCst) {
            return;
        }
        let downstream = self.downstream.lock().await.clone();
        for node in downstream {
            node.replay(write.clone(), csn.clone()).await;
        }
    }

    /// Copy every data entry to downstream nodes, as a total init does.
    async fn total_update(&self) {
        let data: Vec<Entry> = self
            .state
            .lock()
            .await
            .entries
            .iter()
            .filter(|(k, _)| is_data(k))
            .map(|(_, e)| e.clone())
            .collect();
        let downstream = self.downstream.lock().await.clone();
        for node in downstream {
            for entry in &data {
                node.replay(Replayed::Add(entry.clone()), None).await;
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Replayed {
    Add(Entry),
    Delete(String),
}

impl DirectoryNodeClient for MockDirectory {
    fn get(&self, dn_str: &str) -> BoxFuture<'_, Option<Entry>> {
        let dn_str = dn_str.to_string();
        Box::pin(async move {
            self.record(Op::Get, &dn_str, Vec::new(), 0).await;
            self.check_network()?;
            let k = key(&dn_str);
            let mut finished = false;
            let (entry, purge) = {
                let mut state = self.state.lock().await;
                let purge = Self::advance_task(&mut state, &k);
                let step = match state.active_inits.get_mut(&k) {
                    Some(steps) => {
                        let step = steps.pop_front();
                        if steps.is_empty() {
                            state.active_inits.remove(&k);
                        }
                        step
                    }
                    None => None,
                };
                if let (Some(InitStep::Status(text)), Some(entry)) = (step, state.entries.get_mut(&k)) {
                    entry.set(REFRESH_ATTR, Vec::new());
                    entry.set(INIT_STATUS_ATTR, vec![text.clone()]);
                    finished = text.to_ascii_lowercase().contains("succeeded");
                }
                (state.entries.get(&k).cloned(), purge)
            };
            if finished {
                self.total_update().await;
            }
            if let Some((suffix, replica_id)) = purge {
                self.clean_rid_everywhere(&suffix, replica_id).await;
            }
            Ok(entry)
        })
    }

    fn search(&self, base: &str, scope: SearchScope, filter: &Filter) -> BoxFuture<'_, Vec<Entry>> {
        let base = base.to_string();
        let filter = filter.clone();
        Box::pin(async move {
            self.record(Op::Search, &base, Vec::new(), 0).await;
            self.check_network()?;
            let base_key = key(&base);
            let state = self.state.lock().await;
            if !state.entries.contains_key(&base_key) {
                return Err(ClientError::NoSuchObject(base));
            }
            Ok(state
                .entries
                .iter()
                .filter(|(k, _)| match scope {
                    SearchScope::Base => **k == base_key,
                    SearchScope::OneLevel => is_child(k, &base_key),
                    SearchScope::Subtree => under(k, &base_key),
                })
                .filter(|(_, e)| filter.matches(e))
                .map(|(_, e)| e.clone())
                .collect())
        })
    }

    fn add(&self, entry: Entry) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let attributes = entry.attribute_names().map(str::to_string).collect();
            self.record(Op::Add, &entry.dn, attributes, 0).await;
            self.check_write(&entry.dn)?;
            let k = key(&entry.dn);
            let csn = {
                let mut state = self.state.lock().await;
                if state.entries.contains_key(&k) {
                    return Err(ClientError::AlreadyExists(entry.dn));
                }
                if let Some(parent) = dn::parent_dn(&k) {
                    if !state.entries.contains_key(&key(&parent)) {
                        return Err(ClientError::NoSuchObject(parent));
                    }
                }
                state.entries.insert(k.clone(), entry.clone());
                Self::register_task(&mut state, &k, &entry);
                let csn = Self::next_csn(&mut state, &k);
                if let Some(csn) = csn {
                    let suffix = state.tracking.as_ref().map(|t| t.suffix.clone()).unwrap_or_default();
                    Self::apply_csn(&mut state, &self.name, &suffix, csn);
                    Some((suffix, csn))
                } else {
                    None
                }
            };
            if is_data(&k) {
                self.push_downstream(Replayed::Add(entry), csn).await;
            }
            Ok(())
        })
    }

    fn modify(&self, dn_str: &str, mods: Vec<Modification>) -> BoxFuture<'_, ()> {
        let dn_str = dn_str.to_string();
        Box::pin(async move {
            let attributes = mods.iter().map(|m| m.attribute.clone()).collect();
            self.record(Op::Modify, &dn_str, attributes, 0).await;
            self.check_write(&dn_str)?;
            if self.reject_enabled_flag.load(Ordering::SeqCst) {
                if let Some(m) = mods.iter().find(|m| m.attribute.eq_ignore_ascii_case(ENABLED_ATTR)) {
                    return Err(ClientError::UndefinedAttribute {
                        dn: dn_str,
                        attribute: m.attribute.clone(),
                    });
                }
            }
            let k = key(&dn_str);
            let mut state = self.state.lock().await;
            let Some(entry) = state.entries.get_mut(&k) else {
                return Err(ClientError::NoSuchObject(dn_str));
            };
            for m in mods.iter().filter(|m| m.op == ModOp::Add) {
                let current = entry.values(&m.attribute);
                if m.values.iter().any(|v| current.iter().any(|c| c.eq_ignore_ascii_case(v))) {
                    return Err(ClientError::AttributeOrValueExists {
                        dn: dn_str,
                        attribute: m.attribute.clone(),
                    });
                }
            }
            for m in &mods {
                entry.apply(m);
            }
            let refresh = mods.iter().any(|m| {
                m.op != ModOp::Delete
                    && m.attribute.eq_ignore_ascii_case(REFRESH_ATTR)
                    && m.values.iter().any(|v| v == "start")
            });
            if refresh {
                entry.set(INIT_STATUS_ATTR, Vec::new());
                let steps = state
                    .init_scripts
                    .pop_front()
                    .unwrap_or_else(|| vec![InitStep::Running, InitStep::succeeded()]);
                state.active_inits.insert(k, steps.into());
            }
            Ok(())
        })
    }

    fn delete(&self, dn_str: &str) -> BoxFuture<'_, ()> {
        let dn_str = dn_str.to_string();
        Box::pin(async move {
            let k = key(&dn_str);
            let children = self
                .state
                .lock()
                .await
                .entries
                .keys()
                .filter(|c| is_child(c, &k))
                .count();
            self.record(Op::Delete, &dn_str, Vec::new(), children).await;
            self.check_write(&dn_str)?;
            let csn = {
                let mut state = self.state.lock().await;
                if !state.entries.contains_key(&k) {
                    return Err(ClientError::NoSuchObject(dn_str));
                }
                if children > 0 {
                    return Err(ClientError::NotAllowedOnNonLeaf(dn_str));
                }
                state.entries.remove(&k);
                let csn = Self::next_csn(&mut state, &k);
                if let Some(csn) = csn {
                    let suffix = state.tracking.as_ref().map(|t| t.suffix.clone()).unwrap_or_default();
                    Self::apply_csn(&mut state, &self.name, &suffix, csn);
                    Some((suffix, csn))
                } else {
                    None
                }
            };
            if is_data(&k) {
                self.push_downstream(Replayed::Delete(k), csn).await;
            }
            Ok(())
        })
    }
}
