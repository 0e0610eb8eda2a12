// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience utilities: backoff, poll budgets and cancellation.
//!
//! Every waiting operation in this crate (bootstrap polling, convergence
//! checks) runs through [`poll_until`], which takes an explicit
//! [`PollBudget`] and a [`Cancellation`] signal. Nothing polls forever unless
//! the caller asks for it with [`PollBudget::unbounded`].
//!
//! # Example
//!
//! ```rust,no_run
//! use replication_topology::resilience::{Cancellation, PollBudget};
//! use std::time::Duration;
//!
//! let (shutdown_tx, cancel) = Cancellation::channel();
//! let budget = PollBudget::new(Duration::from_secs(1), 30);
//! // ... hand `cancel` and `budget` to a wait, flip `shutdown_tx` to abort
//! let _ = shutdown_tx.send(true);
//! ```

use crate::error::{ResourceLocator, Result, TopologyError};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Exponential backoff settings.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_attempts: usize,

    /// Initial delay before first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Patient retry for freshly started nodes.
    ///
    /// # Backoff Schedule
    ///
    /// ```text
    /// Attempt  Delay
    /// -------  -----
    /// 1        2s
    /// 2        3s
    /// 3        4.5s
    /// ...
    /// 10       60s (cap)
    /// ```
    pub fn startup() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_factor: 1.5,
        }
    }

    /// No delay at all, for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 2.0,
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let multiplier = self.backoff_factor.powi((attempt - 1) as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let delay = Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()));

        std::cmp::min(delay, self.max_delay)
    }
}

// =============================================================================
// Poll budgets
// =============================================================================

/// How long a polling loop may run.
#[derive(Debug, Clone, Copy)]
pub struct PollBudget {
    /// Sleep between observations.
    pub interval: Duration,
    /// Give up after this many observations. `None` means no attempt limit.
    pub max_attempts: Option<usize>,
    /// Give up once this instant has passed.
    pub deadline: Option<Instant>,
}

impl PollBudget {
    pub fn new(interval: Duration, max_attempts: usize) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts),
            deadline: None,
        }
    }

    /// Poll until success, failure or cancellation; the caller owns the deadline.
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Whether `attempts` observations have used up the budget.
    pub fn is_exhausted(&self, attempts: usize) -> bool {
        if self.max_attempts.is_some_and(|max| attempts >= max) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Shutdown signal observed by every wait.
///
/// Wraps a `watch::Receiver<bool>`; the wait aborts once the value is `true`.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    rx: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    /// A signal that never fires.
    pub fn none() -> Self {
        Self { rx: None }
    }

    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    /// Create a sender and the matching cancellation.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self::new(rx))
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Sleep for `duration`, returning `Cancelled` as soon as the signal fires.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        let Some(rx) = &self.rx else {
            tokio::time::sleep(duration).await;
            return Ok(());
        };
        if *rx.borrow() {
            return Err(TopologyError::Cancelled);
        }

        let mut rx = rx.clone();
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Sender dropped: the signal can no longer fire.
                        (&mut sleep).await;
                        return Ok(());
                    }
                    if *rx.borrow() {
                        return Err(TopologyError::Cancelled);
                    }
                }
            }
        }
    }
}

/// Repeatedly run `observe` until it yields a value.
///
/// `observe` receives the 1-indexed attempt number and returns `Ok(None)` to
/// keep polling. Errors end the loop immediately. Returns the value and the
/// number of attempts used, or `Timeout` once the budget is spent.
pub async fn poll_until<T, F, Fut>(
    budget: &PollBudget,
    cancel: &Cancellation,
    locator: &ResourceLocator,
    waiting_for: &str,
    mut observe: F,
) -> Result<(T, usize)>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let mut attempt = 0usize;
    loop {
        if cancel.is_cancelled() {
            return Err(TopologyError::Cancelled);
        }
        attempt += 1;
        if let Some(value) = observe(attempt).await? {
            return Ok((value, attempt));
        }
        if budget.is_exhausted(attempt) {
            return Err(TopologyError::Timeout {
                locator: locator.clone(),
                waiting_for: waiting_for.to_string(),
                attempts: attempt,
            });
        }
        debug!(attempt, waiting_for = %waiting_for, "Not yet, sleeping {:?}", budget.interval);
        cancel.sleep(budget.interval).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // RetryConfig Tests
    // =========================================================================

    #[test]
    fn test_retry_config_presets() {
        let default = RetryConfig::default();
        assert_eq!(default.max_attempts, 5);

        let startup = RetryConfig::startup();
        assert_eq!(startup.max_attempts, 10);
        assert_eq!(startup.backoff_factor, 1.5);

        let testing = RetryConfig::testing();
        assert_eq!(testing.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn test_delay_for_attempt_exponential() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_for_attempt_capped() {
        let config = RetryConfig {
            max_attempts: 100,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        };
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(60), Duration::from_secs(5));
    }

    // =========================================================================
    // PollBudget Tests
    // =========================================================================

    #[test]
    fn test_poll_budget_attempts() {
        let budget = PollBudget::new(Duration::ZERO, 3);
        assert!(!budget.is_exhausted(2));
        assert!(budget.is_exhausted(3));

        let unbounded = PollBudget::unbounded(Duration::ZERO);
        assert!(!unbounded.is_exhausted(usize::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_budget_deadline() {
        let budget = PollBudget::unbounded(Duration::from_secs(1)).with_timeout(Duration::from_secs(5));
        assert!(!budget.is_exhausted(1));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(budget.is_exhausted(1));
    }

    #[tokio::test]
    async fn test_poll_until_returns_value() {
        let budget = PollBudget::new(Duration::ZERO, 10);
        let (value, attempts) = poll_until(
            &budget,
            &Cancellation::none(),
            &ResourceLocator::node("n1"),
            "third attempt",
            |attempt| async move { Ok((attempt == 3).then_some("done")) },
        )
        .await
        .unwrap();
        assert_eq!(value, "done");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let budget = PollBudget::new(Duration::ZERO, 4);
        let err = poll_until(
            &budget,
            &Cancellation::none(),
            &ResourceLocator::node("n1"),
            "never",
            |_| async { Ok(None::<()>) },
        )
        .await
        .unwrap_err();
        match err {
            TopologyError::Timeout { attempts, locator, .. } => {
                assert_eq!(attempts, 4);
                assert_eq!(locator.node, "n1");
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_poll_until_propagates_error() {
        let budget = PollBudget::new(Duration::ZERO, 4);
        let err = poll_until(
            &budget,
            &Cancellation::none(),
            &ResourceLocator::node("n1"),
            "error",
            |_| async { Err::<Option<()>, _>(TopologyError::Config("boom".into())) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TopologyError::Config(_)));
    }

    // =========================================================================
    // Cancellation Tests
    // =========================================================================

    #[tokio::test]
    async fn test_cancellation_before_poll() {
        let (tx, cancel) = Cancellation::channel();
        tx.send(true).unwrap();
        assert!(cancel.is_cancelled());

        let err = poll_until(
            &PollBudget::unbounded(Duration::ZERO),
            &cancel,
            &ResourceLocator::node("n1"),
            "anything",
            |_| async { Ok(None::<()>) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TopologyError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let (tx, cancel) = Cancellation::channel();
        let handle = tokio::spawn(async move { cancel.sleep(Duration::from_secs(3600)).await });

        tokio::time::advance(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(TopologyError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_without_signal_completes() {
        let cancel = Cancellation::none();
        assert!(!cancel.is_cancelled());
        cancel.sleep(Duration::from_secs(10)).await.unwrap();
    }
}
