// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the topology controller.
//!
//! A [`TopologyConfig`] is handed to
//! [`TopologyController::new()`](crate::TopologyController::new) once and never
//! mutated afterwards. Every field has a default, so an empty document is a
//! valid configuration.
//!
//! # Quick Start
//!
//! ```rust
//! use replication_topology::config::{TopologyConfig, ReplicationDefaults};
//!
//! let config = TopologyConfig {
//!     defaults: ReplicationDefaults {
//!         bind_password: "Secret123".into(),
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! assert_eq!(config.defaults.agreement_name("ldap2", 389), "meTo_ldap2:389");
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! TopologyConfig
//! ├── defaults: ReplicationDefaults    # Bind identity, transport, changelog policy
//! ├── bootstrap: BootstrapConfig       # Total-init polling and busy retries
//! ├── convergence: ConvergenceConfig   # Landmark polling
//! ├── tasks: TaskConfig                # CleanAllRUV task polling
//! └── settle: SettleConfig             # Delays after pause/resume
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "defaults": { "bind_dn": "cn=replication manager,cn=config", "bind_password": "Secret123" },
//!   "bootstrap": { "poll_interval": "2s", "max_busy_retries": 3 },
//!   "convergence": { "poll_interval": "500ms", "max_attempts": 60 }
//! }
//! ```

use crate::dn;
use crate::error::{Result, TopologyError};
use crate::resilience::{PollBudget, RetryConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed once to TopologyController::new()
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Values used for any property a create call leaves unset.
    #[serde(default)]
    pub defaults: ReplicationDefaults,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    #[serde(default)]
    pub convergence: ConvergenceConfig,

    #[serde(default)]
    pub tasks: TaskConfig,

    #[serde(default)]
    pub settle: SettleConfig,
}

impl TopologyConfig {
    /// Zero-delay settings with small budgets, for tests.
    pub fn for_testing() -> Self {
        Self {
            defaults: ReplicationDefaults {
                bind_password: "Secret123".to_string(),
                ..Default::default()
            },
            bootstrap: BootstrapConfig {
                poll_interval: "0s".to_string(),
                max_polls: 20,
                max_busy_retries: 3,
                busy_backoff_initial: "0s".to_string(),
                busy_backoff_max: "0s".to_string(),
            },
            convergence: ConvergenceConfig {
                poll_interval: "0s".to_string(),
                max_attempts: 10,
                remove_landmark: true,
            },
            tasks: TaskConfig {
                poll_interval: "0s".to_string(),
                max_polls: 10,
            },
            settle: SettleConfig {
                pause: "0s".to_string(),
                resume: "0s".to_string(),
            },
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| TopologyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| TopologyError::Config(e.to_string()))
    }

    /// Reject configurations that would silently fall back to defaults.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("bootstrap.poll_interval", &self.bootstrap.poll_interval),
            ("bootstrap.busy_backoff_initial", &self.bootstrap.busy_backoff_initial),
            ("bootstrap.busy_backoff_max", &self.bootstrap.busy_backoff_max),
            ("convergence.poll_interval", &self.convergence.poll_interval),
            ("tasks.poll_interval", &self.tasks.poll_interval),
            ("settle.pause", &self.settle.pause),
            ("settle.resume", &self.settle.resume),
        ];
        for (name, value) in durations {
            humantime::parse_duration(value).map_err(|e| {
                TopologyError::Config(format!("{}: invalid duration {:?}: {}", name, value, e))
            })?;
        }
        if self.defaults.bind_dn.trim().is_empty() {
            return Err(TopologyError::Config("defaults.bind_dn is empty".into()));
        }
        if self.defaults.agreement_name_template.trim().is_empty() {
            return Err(TopologyError::Config(
                "defaults.agreement_name_template is empty".into(),
            ));
        }
        if self.bootstrap.max_polls == 0
            || self.convergence.max_attempts == 0
            || self.tasks.max_polls == 0
        {
            return Err(TopologyError::Config("poll budgets must allow at least one attempt".into()));
        }
        Ok(())
    }
}

fn parse_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(fallback)
}

fn default_true() -> bool {
    true
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicationDefaults: properties applied when a create call leaves them unset
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationDefaults {
    /// Identity suppliers bind as, and that replicas accept updates from.
    #[serde(default = "default_bind_dn")]
    pub bind_dn: String,

    #[serde(default = "default_bind_password")]
    pub bind_password: String,

    /// `SIMPLE`, `SSLCLIENTAUTH`, `SASL/GSSAPI` or `SASL/DIGEST-MD5`.
    #[serde(default = "default_bind_method")]
    pub bind_method: String,

    /// `LDAP`, `LDAPS` or `StartTLS`.
    #[serde(default = "default_transport")]
    pub transport: String,

    /// Agreement connection timeout in seconds.
    #[serde(default = "default_agreement_timeout_sec")]
    pub agreement_timeout_sec: u64,

    /// `$host` and `$port` are substituted.
    #[serde(default = "default_agreement_name_template")]
    pub agreement_name_template: String,

    /// Directory for the legacy node-wide changelog.
    #[serde(default)]
    pub changelog_dir: Option<String>,

    /// Changelog max age, in the node's own syntax (e.g. `7d`).
    #[serde(default)]
    pub changelog_max_age: Option<String>,

    #[serde(default)]
    pub changelog_max_entries: Option<u64>,
}

fn default_bind_dn() -> String {
    dn::DEFAULT_BIND_DN.to_string()
}

fn default_bind_password() -> String {
    "password".to_string()
}

fn default_bind_method() -> String {
    "SIMPLE".to_string()
}

fn default_transport() -> String {
    "LDAP".to_string()
}

fn default_agreement_timeout_sec() -> u64 {
    120
}

fn default_agreement_name_template() -> String {
    "meTo_$host:$port".to_string()
}

impl Default for ReplicationDefaults {
    fn default() -> Self {
        Self {
            bind_dn: default_bind_dn(),
            bind_password: default_bind_password(),
            bind_method: default_bind_method(),
            transport: default_transport(),
            agreement_timeout_sec: default_agreement_timeout_sec(),
            agreement_name_template: default_agreement_name_template(),
            changelog_dir: None,
            changelog_max_age: None,
            changelog_max_entries: None,
        }
    }
}

impl ReplicationDefaults {
    pub fn agreement_name(&self, host: &str, port: u16) -> String {
        self.agreement_name_template
            .replace("$host", host)
            .replace("$port", &port.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BootstrapConfig: total init polling
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Delay between status reads, as a duration string (e.g. "1s").
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Status reads per wait before giving up with `Timeout`.
    #[serde(default = "default_max_polls")]
    pub max_polls: usize,

    /// Times a busy consumer is retried before `Busy` is returned.
    #[serde(default = "default_max_busy_retries")]
    pub max_busy_retries: usize,

    #[serde(default = "default_busy_backoff_initial")]
    pub busy_backoff_initial: String,

    #[serde(default = "default_busy_backoff_max")]
    pub busy_backoff_max: String,
}

fn default_poll_interval() -> String {
    "1s".to_string()
}

fn default_max_polls() -> usize {
    600
}

fn default_max_busy_retries() -> usize {
    5
}

fn default_busy_backoff_initial() -> String {
    "2s".to_string()
}

fn default_busy_backoff_max() -> String {
    "30s".to_string()
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_polls: default_max_polls(),
            max_busy_retries: default_max_busy_retries(),
            busy_backoff_initial: default_busy_backoff_initial(),
            busy_backoff_max: default_busy_backoff_max(),
        }
    }
}

impl BootstrapConfig {
    pub fn poll_interval_duration(&self) -> Duration {
        parse_or(&self.poll_interval, Duration::from_secs(1))
    }

    pub fn poll_budget(&self) -> PollBudget {
        PollBudget::new(self.poll_interval_duration(), self.max_polls)
    }

    /// Backoff between busy retries.
    pub fn busy_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_busy_retries,
            initial_delay: parse_or(&self.busy_backoff_initial, Duration::from_secs(2)),
            max_delay: parse_or(&self.busy_backoff_max, Duration::from_secs(30)),
            backoff_factor: 2.0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ConvergenceConfig: landmark polling
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default = "default_convergence_attempts")]
    pub max_attempts: usize,

    /// Delete the landmark entry from the supplier once every node has it.
    #[serde(default = "default_true")]
    pub remove_landmark: bool,
}

fn default_convergence_attempts() -> usize {
    30
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_attempts: default_convergence_attempts(),
            remove_landmark: true,
        }
    }
}

impl ConvergenceConfig {
    pub fn poll_budget(&self) -> PollBudget {
        PollBudget::new(
            parse_or(&self.poll_interval, Duration::from_secs(1)),
            self.max_attempts,
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TaskConfig: cleanallruv runs in the background on every supplier
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default = "default_max_polls")]
    pub max_polls: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_polls: default_max_polls(),
        }
    }
}

impl TaskConfig {
    pub fn poll_budget(&self) -> PollBudget {
        PollBudget::new(
            parse_or(&self.poll_interval, Duration::from_secs(1)),
            self.max_polls,
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SettleConfig: pause/resume take effect asynchronously on the node
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleConfig {
    #[serde(default = "default_settle")]
    pub pause: String,

    #[serde(default = "default_settle")]
    pub resume: String,
}

fn default_settle() -> String {
    "2s".to_string()
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            pause: default_settle(),
            resume: default_settle(),
        }
    }
}

impl SettleConfig {
    pub fn pause_duration(&self) -> Duration {
        parse_or(&self.pause, Duration::from_secs(2))
    }

    pub fn resume_duration(&self) -> Duration {
        parse_or(&self.resume, Duration::from_secs(2))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TopologyConfig::default();
        assert_eq!(config.defaults.bind_dn, "cn=replication manager,cn=config");
        assert_eq!(config.defaults.bind_method, "SIMPLE");
        assert_eq!(config.defaults.transport, "LDAP");
        assert_eq!(config.bootstrap.poll_interval_duration(), Duration::from_secs(1));
        assert_eq!(config.bootstrap.max_busy_retries, 5);
        assert!(config.convergence.remove_landmark);
        assert_eq!(config.settle.pause_duration(), Duration::from_secs(2));
        config.validate().unwrap();
    }

    #[test]
    fn test_agreement_name_template() {
        let defaults = ReplicationDefaults::default();
        assert_eq!(defaults.agreement_name("ldap2.example.com", 636), "meTo_ldap2.example.com:636");

        let custom = ReplicationDefaults {
            agreement_name_template: "to-$host".to_string(),
            ..Default::default()
        };
        assert_eq!(custom.agreement_name("ldap2", 389), "to-ldap2");
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = TopologyConfig::from_json("{}").unwrap();
        assert_eq!(config.defaults.agreement_name_template, "meTo_$host:$port");
        assert_eq!(config.convergence.max_attempts, 30);
    }

    #[test]
    fn test_partial_document() {
        let config = TopologyConfig::from_json(
            r#"{"bootstrap": {"poll_interval": "250ms", "max_busy_retries": 1}}"#,
        )
        .unwrap();
        assert_eq!(config.bootstrap.poll_interval_duration(), Duration::from_millis(250));
        assert_eq!(config.bootstrap.max_busy_retries, 1);
        assert_eq!(config.bootstrap.max_polls, 600);
    }

    #[test]
    fn test_json_round_trip() {
        let config = TopologyConfig::for_testing();
        let json = config.to_json().unwrap();
        let back = TopologyConfig::from_json(&json).unwrap();
        assert_eq!(back.defaults.bind_password, "Secret123");
        assert_eq!(back.bootstrap.max_polls, 20);
        assert_eq!(back.settle.resume_duration(), Duration::ZERO);
        assert_eq!(back.tasks.max_polls, 10);
    }

    #[test]
    fn test_task_budget() {
        let config = TopologyConfig::from_json(r#"{"tasks": {"poll_interval": "5s"}}"#).unwrap();
        let budget = config.tasks.poll_budget();
        assert_eq!(budget.interval, Duration::from_secs(5));
        assert_eq!(budget.max_attempts, Some(600));

        let err = TopologyConfig::from_json(r#"{"tasks": {"max_polls": 0}}"#).unwrap_err();
        assert!(matches!(err, TopologyError::Config(_)));
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let err = TopologyConfig::from_json(r#"{"settle": {"pause": "soon"}}"#).unwrap_err();
        assert!(matches!(err, TopologyError::Config(msg) if msg.contains("settle.pause")));
    }

    #[test]
    fn test_zero_budget_rejected() {
        let mut config = TopologyConfig::for_testing();
        config.convergence.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_busy_retry_from_config() {
        let retry = BootstrapConfig::default().busy_retry();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(retry.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn test_for_testing_has_no_delays() {
        let config = TopologyConfig::for_testing();
        assert_eq!(config.bootstrap.poll_budget().interval, Duration::ZERO);
        assert_eq!(config.convergence.poll_budget().max_attempts, Some(10));
        assert_eq!(config.bootstrap.busy_retry().delay_for_attempt(2), Duration::ZERO);
        config.validate().unwrap();
    }
}
