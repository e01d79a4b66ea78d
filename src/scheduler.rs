//! Outbound request scheduler.
//!
//! Every provider call goes through [`Scheduler::schedule`], which enforces
//! three limits at once:
//!
//! - a token bucket refilled to full at the start of every fixed window
//! - a ceiling on concurrently executing tasks
//! - a minimum spacing between consecutive dispatches
//!
//! Admission is FIFO. Waiters first queue on a fair semaphore for a
//! concurrency slot, then on a fair mutex guarding the [`RateBudget`]; the
//! mutex is held while waiting for tokens or spacing so later callers cannot
//! overtake.

use crate::error::{Result, SearchError};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::debug;

const MIN_WINDOW: Duration = Duration::from_millis(1);

/// Rate limits for outbound calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateConfig {
    /// Dispatches allowed per window.
    pub tokens_per_window: u32,
    /// Length of a refill window.
    pub window: Duration,
    /// Tasks allowed to execute at the same time.
    pub max_concurrent: usize,
    /// Minimum gap between two dispatches.
    pub min_spacing: Duration,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            tokens_per_window: 60,
            window: Duration::from_millis(60_000),
            max_concurrent: 5,
            min_spacing: Duration::from_millis(200),
        }
    }
}

impl RateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tokens_per_window == 0 {
            return Err(SearchError::Config(
                "tokens_per_window must be greater than 0".into(),
            ));
        }
        if self.window.is_zero() {
            return Err(SearchError::Config("window must be greater than 0".into()));
        }
        if self.max_concurrent == 0 {
            return Err(SearchError::Config(
                "max_concurrent must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct RateBudget {
    available_tokens: u32,
    window_reset_at: Instant,
    last_dispatch_at: Option<Instant>,
}

/// Releases the concurrency slot and the in-flight count when the task ends,
/// whether it succeeded, failed or panicked.
struct InFlightGuard<'a> {
    in_flight: &'a AtomicUsize,
    _permit: SemaphorePermit<'a>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Process-wide admission control for provider calls.
#[derive(Debug)]
pub struct Scheduler {
    config: RateConfig,
    slots: Semaphore,
    budget: Mutex<RateBudget>,
    in_flight: AtomicUsize,
    dispatched: AtomicU64,
}

impl Scheduler {
    /// Create a scheduler with a full token budget.
    ///
    /// Zero limits are raised to the smallest usable value (one token, one
    /// slot, a 1ms window); [`RateConfig::validate`] is the place to reject
    /// them outright.
    pub fn new(config: RateConfig) -> Self {
        let config = RateConfig {
            tokens_per_window: config.tokens_per_window.max(1),
            window: config.window.max(MIN_WINDOW),
            max_concurrent: config.max_concurrent.max(1),
            min_spacing: config.min_spacing,
        };
        let now = Instant::now();
        Self {
            slots: Semaphore::new(config.max_concurrent),
            budget: Mutex::new(RateBudget {
                available_tokens: config.tokens_per_window,
                window_reset_at: now + config.window,
                last_dispatch_at: None,
            }),
            in_flight: AtomicUsize::new(0),
            dispatched: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &RateConfig {
        &self.config
    }

    /// Tasks currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Total tasks admitted since construction.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Tokens left in the current window, without refilling.
    pub async fn available_tokens(&self) -> u32 {
        self.budget.lock().await.available_tokens
    }

    /// Run `task` once all limits allow it.
    ///
    /// The task's own error is returned unchanged. The scheduler never
    /// retries; the token spent on a failed task stays spent, but its
    /// concurrency slot is always released.
    pub async fn schedule<F, Fut, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| SearchError::Scheduler("scheduler has been shut down".into()))?;
        let _guard = self.admit(permit).await;
        task().await
    }

    /// Stop admitting new tasks. Queued and future calls fail with
    /// [`SearchError::Scheduler`]; running tasks finish normally.
    pub fn close(&self) {
        self.slots.close();
    }

    async fn admit<'a>(&'a self, permit: SemaphorePermit<'a>) -> InFlightGuard<'a> {
        let mut budget = self.budget.lock().await;

        loop {
            let now = Instant::now();
            while now >= budget.window_reset_at {
                budget.window_reset_at += self.config.window;
                budget.available_tokens = self.config.tokens_per_window;
            }
            if budget.available_tokens > 0 {
                break;
            }
            debug!(
                wait_ms = (budget.window_reset_at - now).as_millis() as u64,
                "token budget exhausted, waiting for refill"
            );
            tokio::time::sleep_until(budget.window_reset_at).await;
        }

        if let Some(last) = budget.last_dispatch_at {
            let earliest = last + self.config.min_spacing;
            if Instant::now() < earliest {
                tokio::time::sleep_until(earliest).await;
            }
        }

        budget.available_tokens -= 1;
        budget.last_dispatch_at = Some(Instant::now());
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.dispatched.fetch_add(1, Ordering::SeqCst);

        InFlightGuard {
            in_flight: &self.in_flight,
            _permit: permit,
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(RateConfig::default())
    }
}
