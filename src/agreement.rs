// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication agreements: directional edges from a replica to a remote node.
//!
//! An agreement lives under its source replica entry and is named from a
//! template (`meTo_$host:$port` by default). Its lifecycle on the node:
//!
//! ```text
//!  create ──► schedule ──► init (nsds5BeginReplicaRefresh: start)
//!                              │
//!                              ▼
//!                     ┌── status polling ──┐
//!                     │                    │
//!               "succeeded"            "busy" ──► caller re-issues init
//!                     │
//!                     ▼
//!                incremental updates within the schedule window
//!                     │
//!           pause ◄───┴───► resume
//! ```
//!
//! Pausing prefers the `nsds5ReplicaEnabled` flag. Nodes that reject that
//! attribute get their schedule rewritten to [`ScheduleWindow::NEVER`]
//! instead, and resume restores the schedule that was replaced.

use crate::client::{ClientError, ClientResultExt, Entry, Filter, Modification, SearchScope};
use crate::config::ReplicationDefaults;
use crate::dn;
use crate::error::{ResourceLocator, Result, TopologyError};
use crate::metrics;
use crate::properties::{Property, PropertyDelta};
use crate::replica::ReplicaRef;
use crate::resilience::{poll_until, Cancellation, PollBudget};
use crate::schedule::ScheduleWindow;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const AGREEMENT_OBJECTCLASS: &str = "nsds5replicationagreement";

pub const ATTR_HOST: &str = "nsds5ReplicaHost";
pub const ATTR_PORT: &str = "nsds5ReplicaPort";
pub const ATTR_ROOT: &str = "nsDS5ReplicaRoot";
pub const ATTR_SCHEDULE: &str = "nsds5ReplicaUpdateSchedule";
pub const ATTR_ENABLED: &str = "nsds5ReplicaEnabled";
pub const ATTR_REFRESH: &str = "nsds5BeginReplicaRefresh";

pub const STATUS_UPDATE_IN_PROGRESS: &str = "nsds5replicaUpdateInProgress";
pub const STATUS_LAST_UPDATE_START: &str = "nsds5replicaLastUpdateStart";
pub const STATUS_LAST_UPDATE_END: &str = "nsds5replicaLastUpdateEnd";
pub const STATUS_LAST_UPDATE_STATUS: &str = "nsds5replicaLastUpdateStatus";
pub const STATUS_CHANGES_SENT: &str = "nsds5replicaChangesSentSinceStartup";
pub const STATUS_CHANGES_SKIPPED: &str = "nsds5replicaChangesSkippedSinceStartup";
pub const STATUS_LAST_INIT_START: &str = "nsds5replicaLastInitStart";
pub const STATUS_LAST_INIT_END: &str = "nsds5replicaLastInitEnd";
pub const STATUS_LAST_INIT_STATUS: &str = "nsds5replicaLastInitStatus";
pub const STATUS_REAP_ACTIVE: &str = "nsds5replicaReapActive";
pub const STATUS_MAX_CSN: &str = "nsds5AgmtMaxCSN";

// ═══════════════════════════════════════════════════════════════════════════
// Properties
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgreementProperty {
    /// Overrides the name template.
    Name,
    Description,
    BindDn,
    BindPassword,
    BindMethod,
    Transport,
    Timeout,
    Schedule,
    Enabled,
    /// Attributes left out of incremental updates.
    FractionalExclude,
    /// Attributes left out of total updates.
    FractionalExcludeTotal,
    /// Attributes whose sole change makes an update not worth sending.
    StripAttrs,
    BusyWaitTime,
    SessionPauseTime,
    FlowControlWindow,
    FlowControlPause,
}

const AGREEMENT_PROPERTIES: &[(AgreementProperty, &str, &str)] = &[
    (AgreementProperty::Name, "name", "cn"),
    (AgreementProperty::Description, "description", "description"),
    (AgreementProperty::BindDn, "bind_dn", "nsDS5ReplicaBindDN"),
    (AgreementProperty::BindPassword, "bind_password", "nsds5ReplicaCredentials"),
    (AgreementProperty::BindMethod, "bind_method", "nsds5ReplicaBindMethod"),
    (AgreementProperty::Transport, "transport", "nsds5ReplicaTransportInfo"),
    (AgreementProperty::Timeout, "timeout", "nsds5ReplicaTimeout"),
    (AgreementProperty::Schedule, "schedule", ATTR_SCHEDULE),
    (AgreementProperty::Enabled, "enabled", ATTR_ENABLED),
    (AgreementProperty::FractionalExclude, "fractional_exclude", "nsDS5ReplicatedAttributeList"),
    (AgreementProperty::FractionalExcludeTotal, "fractional_exclude_total", "nsDS5ReplicatedAttributeListTotal"),
    (AgreementProperty::StripAttrs, "strip_attrs", "nsds5ReplicaStripAttrs"),
    (AgreementProperty::BusyWaitTime, "busy_wait_time", "nsds5ReplicaBusyWaitTime"),
    (AgreementProperty::SessionPauseTime, "session_pause_time", "nsds5ReplicaSessionPauseTime"),
    (AgreementProperty::FlowControlWindow, "flow_control_window", "nsds5ReplicaFlowControlWindow"),
    (AgreementProperty::FlowControlPause, "flow_control_pause", "nsds5ReplicaFlowControlPause"),
];

const FRACTIONAL_PREFIX: &str = "(objectclass=*) $ EXCLUDE";

impl AgreementProperty {
    /// Value for the fractional exclusion attributes.
    pub fn fractional_list<S: AsRef<str>>(attrs: &[S]) -> String {
        let mut value = FRACTIONAL_PREFIX.to_string();
        for a in attrs {
            value.push(' ');
            value.push_str(a.as_ref());
        }
        value
    }
}

impl Property for AgreementProperty {
    fn attribute(self) -> &'static str {
        AGREEMENT_PROPERTIES
            .iter()
            .find(|(p, _, _)| *p == self)
            .map(|(_, _, attr)| *attr)
            .unwrap_or("")
    }

    fn lookup(name: &str) -> Option<Self> {
        AGREEMENT_PROPERTIES
            .iter()
            .find(|(_, friendly, attr)| {
                friendly.eq_ignore_ascii_case(name) || attr.eq_ignore_ascii_case(name)
            })
            .map(|(p, _, _)| *p)
    }

    fn validate(self, values: &[String]) -> Result<()> {
        match self {
            Self::Schedule => {
                if values.len() != 1 {
                    return Err(TopologyError::InvalidProperty(
                        "schedule takes exactly one value".into(),
                    ));
                }
                ScheduleWindow::parse(&values[0]).map(|_| ())
            }
            Self::Enabled => {
                if values.iter().all(|v| matches!(v.to_ascii_lowercase().as_str(), "on" | "off")) {
                    Ok(())
                } else {
                    Err(TopologyError::InvalidProperty(format!(
                        "{} expects on/off",
                        ATTR_ENABLED
                    )))
                }
            }
            Self::FractionalExclude | Self::FractionalExcludeTotal => {
                match values.iter().find(|v| !v.starts_with(FRACTIONAL_PREFIX)) {
                    Some(v) => Err(TopologyError::InvalidProperty(format!(
                        "fractional list {:?} must start with {:?}",
                        v, FRACTIONAL_PREFIX
                    ))),
                    None => Ok(()),
                }
            }
            Self::Timeout
            | Self::BusyWaitTime
            | Self::SessionPauseTime
            | Self::FlowControlWindow
            | Self::FlowControlPause => match values.iter().find(|v| v.parse::<u64>().is_err()) {
                Some(v) => Err(TopologyError::InvalidProperty(format!(
                    "{} expects a non-negative integer, got {:?}",
                    self.attribute(),
                    v
                ))),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// References
// ═══════════════════════════════════════════════════════════════════════════

/// Where an agreement sends changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgreementTarget {
    pub host: String,
    pub port: u16,
    /// Normalized suffix on the target. Must match the source replica's suffix.
    pub suffix: String,
}

impl AgreementTarget {
    pub fn new(host: impl Into<String>, port: u16, suffix: &str) -> Self {
        Self {
            host: host.into(),
            port,
            suffix: dn::normalize_dn(suffix),
        }
    }
}

/// Locator for one agreement.
///
/// Cheap to clone; clones share the schedule remembered by a fallback pause.
#[derive(Debug, Clone)]
pub struct AgreementRef {
    pub source: ReplicaRef,
    pub name: String,
    pub dn: String,
    pub target: AgreementTarget,
    paused_schedule: Arc<Mutex<Option<ScheduleWindow>>>,
}

impl PartialEq for AgreementRef {
    fn eq(&self, other: &Self) -> bool {
        self.source.node.name == other.source.node.name
            && dn::normalize_dn(&self.dn) == dn::normalize_dn(&other.dn)
            && self.target == other.target
    }
}

impl AgreementRef {
    fn new(source: ReplicaRef, name: String, dn: String, target: AgreementTarget) -> Self {
        Self {
            source,
            name,
            dn,
            target,
            paused_schedule: Arc::new(Mutex::new(None)),
        }
    }

    fn from_entry(source: &ReplicaRef, entry: &Entry) -> Self {
        let name = entry
            .first("cn")
            .map(str::to_string)
            .or_else(|| dn::rdn_value(&entry.dn))
            .unwrap_or_default();
        let target = AgreementTarget::new(
            entry.first(ATTR_HOST).unwrap_or_default(),
            entry.first(ATTR_PORT).and_then(|p| p.parse().ok()).unwrap_or(0),
            entry.first(ATTR_ROOT).unwrap_or(source.suffix.as_str()),
        );
        Self::new(source.clone(), name, entry.dn.clone(), target)
    }

    pub fn locator(&self) -> ResourceLocator {
        ResourceLocator::agreement(&self.source.node.name, &self.source.suffix, &self.name)
    }

    fn not_found(&self, e: ClientError) -> TopologyError {
        if e.is_no_such_object() {
            TopologyError::NoSuchAgreement(self.locator())
        } else {
            TopologyError::from_client(e, self.locator())
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Status
// ═══════════════════════════════════════════════════════════════════════════

/// Derived agreement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgreementState {
    Idle,
    Initializing,
    Replicating,
    Paused,
    Busy,
    Error,
}

impl fmt::Display for AgreementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Replicating => write!(f, "Replicating"),
            Self::Paused => write!(f, "Paused"),
            Self::Busy => write!(f, "Busy"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Best-effort snapshot of the agreement's progress attributes.
///
/// Every field tolerates the attribute being absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgreementStatus {
    pub enabled: bool,
    pub schedule: Option<String>,
    pub update_in_progress: bool,
    pub last_update_start: Option<String>,
    pub last_update_end: Option<String>,
    pub last_update_status: Option<String>,
    pub changes_sent: u64,
    pub changes_skipped: u64,
    /// The refresh trigger is still set: a total init is queued or running.
    pub init_in_progress: bool,
    pub last_init_start: Option<String>,
    pub last_init_end: Option<String>,
    pub last_init_status: Option<String>,
    pub reap_active: bool,
    pub max_csn: Option<String>,
}

fn parse_bool(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "on" | "1" | "yes")
    )
}

/// Leading numeric code of a status text, e.g. `Error (0) ...` or `0 ...`.
fn status_code(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix("Error (") {
        return rest.split(')').next()?.trim().parse().ok();
    }
    text.split_whitespace().next()?.parse().ok()
}

fn is_busy_text(text: &str) -> bool {
    text.to_ascii_lowercase().contains("busy")
}

impl AgreementStatus {
    pub fn from_entry(entry: &Entry) -> Self {
        let text = |attr: &str| entry.first(attr).map(str::to_string);
        let (changes_sent, changes_skipped) = parse_change_counts(entry.first(STATUS_CHANGES_SENT));
        // Some versions report skipped changes separately.
        let changes_skipped = entry
            .first(STATUS_CHANGES_SKIPPED)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(changes_skipped);
        Self {
            enabled: entry.first(ATTR_ENABLED).map_or(true, |v| parse_bool(Some(v))),
            schedule: text(ATTR_SCHEDULE),
            update_in_progress: parse_bool(entry.first(STATUS_UPDATE_IN_PROGRESS)),
            last_update_start: text(STATUS_LAST_UPDATE_START),
            last_update_end: text(STATUS_LAST_UPDATE_END),
            last_update_status: text(STATUS_LAST_UPDATE_STATUS),
            changes_sent,
            changes_skipped,
            init_in_progress: entry.has_attr(ATTR_REFRESH),
            last_init_start: text(STATUS_LAST_INIT_START),
            last_init_end: text(STATUS_LAST_INIT_END),
            last_init_status: text(STATUS_LAST_INIT_STATUS),
            reap_active: parse_bool(entry.first(STATUS_REAP_ACTIVE)),
            max_csn: text(STATUS_MAX_CSN),
        }
    }

    /// Derive the agreement state from this snapshot.
    pub fn state(&self) -> AgreementState {
        let schedule_never = self
            .schedule
            .as_deref()
            .and_then(|s| ScheduleWindow::parse(s).ok())
            .is_some_and(|w| w.is_never());
        if !self.enabled || schedule_never {
            return AgreementState::Paused;
        }
        if self.init_in_progress {
            return AgreementState::Initializing;
        }
        let statuses = [self.last_init_status.as_deref(), self.last_update_status.as_deref()];
        if statuses.iter().flatten().any(|s| is_busy_text(s)) {
            return AgreementState::Busy;
        }
        if statuses
            .iter()
            .flatten()
            .any(|s| status_code(s).is_some_and(|c| c != 0))
        {
            return AgreementState::Error;
        }
        if self.update_in_progress || self.changes_sent > 0 || self.max_csn.is_some() {
            return AgreementState::Replicating;
        }
        AgreementState::Idle
    }
}

/// Result of one total init.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    Done,
    Failed { retryable: bool, status: String },
}

impl InitOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Classify a status snapshot taken while a total init runs.
///
/// `None` means keep polling.
pub fn classify_init(status: &AgreementStatus) -> Option<InitOutcome> {
    if status.init_in_progress {
        return None;
    }
    let text = status.last_init_status.as_deref()?;
    let lower = text.to_ascii_lowercase();
    if lower.contains("busy") {
        return Some(InitOutcome::Failed {
            retryable: true,
            status: text.to_string(),
        });
    }
    if lower.contains("total update succeeded") {
        return Some(InitOutcome::Done);
    }
    if lower.contains("total update in progress") || status.update_in_progress {
        return None;
    }
    Some(InitOutcome::Failed {
        retryable: false,
        status: text.to_string(),
    })
}

/// Split `sessionIdx:sent/skipped ...` counters into totals.
///
/// A bare integer is taken as the sent count. Unparsable tokens count as 0
/// and totals saturate at `u64::MAX`.
pub fn parse_change_counts(value: Option<&str>) -> (u64, u64) {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return (0, 0);
    };
    if let Ok(n) = value.parse::<u64>() {
        return (n, 0);
    }
    value
        .split_whitespace()
        .filter_map(|token| {
            let (_, counts) = token.split_once(':')?;
            let (sent, skipped) = counts.split_once('/').unwrap_or((counts, "0"));
            Some((sent.parse::<u64>().ok()?, skipped.parse::<u64>().unwrap_or(0)))
        })
        .fold((0, 0), |(s, k), (sent, skipped)| {
            (s.saturating_add(sent), k.saturating_add(skipped))
        })
}

/// Sum of sent changes from a `nsds5replicaChangesSentSinceStartup` value.
pub fn parse_changes_sent(value: Option<&str>) -> u64 {
    parse_change_counts(value).0
}

/// How a pause or resume was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseMechanism {
    EnabledFlag,
    Schedule,
}

impl PauseMechanism {
    fn as_str(self) -> &'static str {
        match self {
            Self::EnabledFlag => "enabled_flag",
            Self::Schedule => "schedule",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Operations
// ═══════════════════════════════════════════════════════════════════════════

/// Agreement lifecycle operations.
pub struct Agreement;

impl Agreement {
    /// Create an agreement from `source` to `target`.
    ///
    /// Idempotent: if an agreement with the computed name already exists it
    /// is returned as-is and nothing is written. Unset properties come from
    /// `defaults`.
    pub async fn create(
        source: &ReplicaRef,
        target: &AgreementTarget,
        properties: &PropertyDelta<AgreementProperty>,
        defaults: &ReplicationDefaults,
    ) -> Result<AgreementRef> {
        if target.host.trim().is_empty() {
            return Err(TopologyError::MissingArgument("target host"));
        }
        if target.suffix != source.suffix {
            return Err(TopologyError::InvalidProperty(format!(
                "target suffix {} differs from replicated suffix {}",
                target.suffix, source.suffix
            )));
        }
        let overrides = properties.to_modifications()?;

        let name = properties
            .value_of(AgreementProperty::Name)
            .map(str::to_string)
            .unwrap_or_else(|| defaults.agreement_name(&target.host, target.port));
        let agreement_dn = dn::agreement_dn(&source.suffix, &name);
        let locator = ResourceLocator::agreement(&source.node.name, &source.suffix, &name);

        if source.node.get(&source.dn).await.at(&locator)?.is_none() {
            return Err(TopologyError::NoSuchReplica(source.locator()));
        }

        if let Some(existing) = source.node.get(&agreement_dn).await.at(&locator)? {
            warn!(node = %source.node.name, agreement = %name, "Agreement already exists");
            metrics::record_idempotent_hit("agreement");
            return Ok(AgreementRef::from_entry(source, &existing));
        }

        let mut entry = Entry::new(&agreement_dn)
            .with_attr("objectclass", ["top", AGREEMENT_OBJECTCLASS])
            .with_attr("cn", [name.clone()])
            .with_attr("description", [name.clone()])
            .with_attr(ATTR_ROOT, [source.suffix.clone()])
            .with_attr(ATTR_HOST, [target.host.clone()])
            .with_attr(ATTR_PORT, [target.port.to_string()])
            .with_attr(AgreementProperty::BindDn.attribute(), [defaults.bind_dn.clone()])
            .with_attr(AgreementProperty::BindPassword.attribute(), [defaults.bind_password.clone()])
            .with_attr(AgreementProperty::BindMethod.attribute(), [defaults.bind_method.clone()])
            .with_attr(AgreementProperty::Transport.attribute(), [defaults.transport.clone()])
            .with_attr(
                AgreementProperty::Timeout.attribute(),
                [defaults.agreement_timeout_sec.to_string()],
            );
        for m in &overrides {
            entry.apply(m);
        }

        if source.node.add_if_absent(entry).await.at(&locator)? {
            info!(
                node = %source.node.name,
                agreement = %name,
                peer = %format!("{}:{}", target.host, target.port),
                "Agreement created"
            );
        } else {
            warn!(node = %source.node.name, agreement = %name, "Agreement appeared concurrently");
            metrics::record_idempotent_hit("agreement");
        }

        Ok(AgreementRef::new(source.clone(), name, agreement_dn, target.clone()))
    }

    pub async fn get(source: &ReplicaRef, name: &str) -> Result<Option<AgreementRef>> {
        let locator = ResourceLocator::agreement(&source.node.name, &source.suffix, name);
        let entry = source
            .node
            .get(&dn::agreement_dn(&source.suffix, name))
            .await
            .at(&locator)?;
        Ok(entry.map(|e| AgreementRef::from_entry(source, &e)))
    }

    /// Every agreement owned by `source`.
    pub async fn list(source: &ReplicaRef) -> Result<Vec<AgreementRef>> {
        let filter = Filter::equals("objectclass", AGREEMENT_OBJECTCLASS);
        let entries = source
            .node
            .search(&source.dn, SearchScope::OneLevel, &filter)
            .await
            .map_err(|e| {
                if e.is_no_such_object() {
                    TopologyError::NoSuchReplica(source.locator())
                } else {
                    TopologyError::from_client(e, source.locator())
                }
            })?;
        Ok(entries
            .iter()
            .map(|e| AgreementRef::from_entry(source, e))
            .collect())
    }

    pub async fn delete(agreement: &AgreementRef) -> Result<()> {
        agreement
            .source
            .node
            .delete(&agreement.dn)
            .await
            .map_err(|e| agreement.not_found(e))?;
        info!(node = %agreement.source.node.name, agreement = %agreement.name, "Agreement deleted");
        Ok(())
    }

    pub async fn set_properties(
        agreement: &AgreementRef,
        delta: &PropertyDelta<AgreementProperty>,
    ) -> Result<()> {
        let mods = delta.to_modifications()?;
        if mods.is_empty() {
            return Ok(());
        }
        agreement
            .source
            .node
            .modify(&agreement.dn, mods)
            .await
            .map_err(|e| agreement.not_found(e))
    }

    /// Set the update window from its string form.
    ///
    /// The interval is validated before anything is sent.
    pub async fn schedule(agreement: &AgreementRef, interval: &str) -> Result<()> {
        let window = ScheduleWindow::parse(interval)?;
        Self::set_schedule(agreement, window).await
    }

    pub async fn set_schedule(agreement: &AgreementRef, window: ScheduleWindow) -> Result<()> {
        agreement
            .source
            .node
            .modify(
                &agreement.dn,
                vec![Modification::replace(ATTR_SCHEDULE, [window.to_string()])],
            )
            .await
            .map_err(|e| agreement.not_found(e))?;
        debug!(agreement = %agreement.name, schedule = %window, "Schedule set");
        Ok(())
    }

    /// Current update window. No schedule attribute means always.
    pub async fn read_schedule(agreement: &AgreementRef) -> Result<ScheduleWindow> {
        let entry = agreement
            .source
            .node
            .get(&agreement.dn)
            .await
            .at(&agreement.locator())?
            .ok_or_else(|| TopologyError::NoSuchAgreement(agreement.locator()))?;
        match entry.first(ATTR_SCHEDULE) {
            Some(s) => ScheduleWindow::parse(s),
            None => Ok(ScheduleWindow::ALWAYS),
        }
    }

    /// Stop sending updates.
    pub async fn pause(agreement: &AgreementRef) -> Result<PauseMechanism> {
        let mechanism = match Self::write_enabled(agreement, false).await? {
            true => PauseMechanism::EnabledFlag,
            false => {
                let current = Self::read_schedule(agreement).await?;
                if !current.is_never() {
                    *agreement.paused_schedule.lock().await = Some(current);
                }
                Self::set_schedule(agreement, ScheduleWindow::NEVER).await?;
                PauseMechanism::Schedule
            }
        };
        info!(agreement = %agreement.name, mechanism = mechanism.as_str(), "Agreement paused");
        metrics::record_pause_resume("pause", mechanism.as_str());
        Ok(mechanism)
    }

    /// Resume sending updates.
    pub async fn resume(agreement: &AgreementRef) -> Result<PauseMechanism> {
        let mechanism = match Self::write_enabled(agreement, true).await? {
            true => PauseMechanism::EnabledFlag,
            false => {
                let restored = agreement
                    .paused_schedule
                    .lock()
                    .await
                    .take()
                    .unwrap_or(ScheduleWindow::ALWAYS);
                Self::set_schedule(agreement, restored).await?;
                PauseMechanism::Schedule
            }
        };
        info!(agreement = %agreement.name, mechanism = mechanism.as_str(), "Agreement resumed");
        metrics::record_pause_resume("resume", mechanism.as_str());
        Ok(mechanism)
    }

    /// Write the enabled flag. `Ok(false)` if the node does not know it.
    async fn write_enabled(agreement: &AgreementRef, enabled: bool) -> Result<bool> {
        let value = if enabled { "on" } else { "off" };
        match agreement
            .source
            .node
            .modify(&agreement.dn, vec![Modification::replace(ATTR_ENABLED, [value])])
            .await
        {
            Ok(()) => Ok(true),
            Err(e) if e.is_attribute_rejection() => {
                warn!(
                    agreement = %agreement.name,
                    error = %e,
                    "Node rejected {}, falling back to schedule",
                    ATTR_ENABLED
                );
                Ok(false)
            }
            Err(e) => Err(agreement.not_found(e)),
        }
    }

    /// Trigger a total init. Completion is only visible through [`Agreement::status`].
    pub async fn init(agreement: &AgreementRef) -> Result<()> {
        agreement
            .source
            .node
            .modify(&agreement.dn, vec![Modification::replace(ATTR_REFRESH, ["start"])])
            .await
            .map_err(|e| agreement.not_found(e))?;
        info!(
            agreement = %agreement.name,
            peer = %format!("{}:{}", agreement.target.host, agreement.target.port),
            "Total init triggered"
        );
        Ok(())
    }

    /// Fresh read of the progress attributes.
    pub async fn status(agreement: &AgreementRef) -> Result<AgreementStatus> {
        let entry = agreement
            .source
            .node
            .get(&agreement.dn)
            .await
            .at(&agreement.locator())?
            .ok_or_else(|| TopologyError::NoSuchAgreement(agreement.locator()))?;
        Ok(AgreementStatus::from_entry(&entry))
    }

    /// Poll status until the total init finishes.
    ///
    /// A busy consumer yields `Failed { retryable: true }`; recovering from it
    /// means calling [`Agreement::init`] again.
    pub async fn wait_for_init(
        agreement: &AgreementRef,
        budget: &PollBudget,
        cancel: &Cancellation,
    ) -> Result<InitOutcome> {
        let (outcome, attempts) = poll_until(
            budget,
            cancel,
            &agreement.locator(),
            "total init",
            |attempt| async move {
                let status = Self::status(agreement).await?;
                metrics::record_init_poll(&agreement.name);
                debug!(
                    agreement = %agreement.name,
                    attempt,
                    refresh = status.init_in_progress,
                    status = ?status.last_init_status,
                    "Init poll"
                );
                Ok(classify_init(&status))
            },
        )
        .await?;

        match &outcome {
            InitOutcome::Done => info!(agreement = %agreement.name, attempts, "Total init complete"),
            InitOutcome::Failed { retryable, status } => warn!(
                agreement = %agreement.name,
                attempts,
                retryable,
                status = %status,
                "Total init failed"
            ),
        }
        Ok(outcome)
    }

    pub async fn changes_sent(agreement: &AgreementRef) -> Result<u64> {
        Ok(Self::status(agreement).await?.changes_sent)
    }
}
