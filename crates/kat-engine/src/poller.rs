//! Convergence poller
//!
//! Answers "do all expectations hold right now?" repeatedly until yes, the
//! deadline passes, or the caller cancels. The first check runs immediately;
//! later checks run on a fixed interval.
//!
//! Within one check expectations are evaluated in order and evaluation stops
//! at the first unmet condition, so the reported mismatch is deterministic.
//! The most recent mismatch is kept and attached to the timeout error.

use crate::capability::ResourceStore;
use crate::error::{ConvergenceError, WaitEnd};
use crate::path::{self, ConditionOutcome, Observed};
use kat_scenario::{Expectation, ResourceRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;

/// Interval between checks when none is configured
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// One unmet condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    /// Resource the condition targets
    pub resource: ResourceRef,
    /// Condition path
    pub path: String,
    /// Expected value
    pub expected: Value,
    /// What was actually there
    pub observed: Observed,
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let want = path::canonical_string(&self.expected);
        match &self.observed {
            Observed::Value(v) => write!(
                f,
                "{} path {}: got {}, want {want}",
                self.resource,
                self.path,
                path::canonical_string(v)
            ),
            other => write!(f, "{} path {}: {other}, want {want}", self.resource, self.path),
        }
    }
}

/// Result of one pass over all expectations
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Every condition of every expectation holds
    Met,
    /// First unmet condition found this pass
    Unmet(Mismatch),
}

/// Successful convergence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Convergence {
    /// Number of checks performed, including the immediate one
    pub checks: u32,
    /// Time from the start of the wait to convergence
    pub elapsed: Duration,
}

/// Polls expectations against a resource store
#[derive(Clone)]
pub struct ConvergencePoller {
    store: Arc<dyn ResourceStore>,
    interval: Duration,
}

impl std::fmt::Debug for ConvergencePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvergencePoller")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl ConvergencePoller {
    /// Create poller; a zero interval falls back to [`DEFAULT_POLL_INTERVAL`]
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            interval
        };
        Self { store, interval }
    }

    /// Interval between checks
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until all expectations hold
    ///
    /// Checks once immediately, then every interval. Stops as soon as the
    /// deadline passes or `cancel` fires, including while a check is in
    /// flight.
    ///
    /// # Errors
    /// - `ConvergenceError::InvalidCondition` before any check if a condition
    ///   names no field
    /// - `ConvergenceError::Evaluation` at the deadline if the last mismatch
    ///   was a path/document shape mismatch
    /// - `ConvergenceError::Timeout` otherwise, carrying the last mismatch
    pub async fn wait(
        &self,
        expectations: &[Expectation],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Convergence, ConvergenceError> {
        reject_empty_paths(expectations)?;

        let start = Instant::now();
        let deadline = tokio::time::sleep_until(start + timeout);
        tokio::pin!(deadline);

        let mut ticker = tokio::time::interval_at(start + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut checks = 0u32;
        let mut last_mismatch: Option<Mismatch> = None;

        loop {
            checks += 1;
            match race(self.check_once(expectations), deadline.as_mut(), cancel).await {
                Ok(Tick::Met) => {
                    let elapsed = start.elapsed();
                    tracing::debug!(checks, ?elapsed, "expectations met");
                    return Ok(Convergence { checks, elapsed });
                }
                Ok(Tick::Unmet(mismatch)) => {
                    tracing::debug!(check = checks, %mismatch, "expectations not yet met");
                    last_mismatch = Some(mismatch);
                }
                Err(end) => return Err(stopped(end, start.elapsed(), last_mismatch)),
            }

            if let Err(end) = race(ticker.tick(), deadline.as_mut(), cancel).await {
                return Err(stopped(end, start.elapsed(), last_mismatch));
            }
        }
    }

    /// Evaluate all expectations once
    ///
    /// Stops at the first unmet condition. A resource that cannot be fetched
    /// counts as unmet.
    pub async fn check_once(&self, expectations: &[Expectation]) -> Tick {
        for expectation in expectations {
            if let Some(mismatch) = self.check_expectation(expectation).await {
                return Tick::Unmet(mismatch);
            }
        }
        Tick::Met
    }

    async fn check_expectation(&self, expectation: &Expectation) -> Option<Mismatch> {
        let resource = &expectation.resource;
        let document = match self.store.fetch(resource).await {
            Ok(doc) => doc,
            Err(e) => {
                let first = expectation.conditions.first();
                return Some(Mismatch {
                    resource: resource.clone(),
                    path: first.map(|c| c.path.clone()).unwrap_or_default(),
                    expected: first.map(|c| c.value.clone()).unwrap_or(Value::Null),
                    observed: if e.is_not_found() {
                        Observed::NotFound
                    } else {
                        Observed::FetchFailed(e.to_string())
                    },
                });
            }
        };

        expectation.conditions.iter().find_map(|condition| {
            match path::evaluate(&document, condition) {
                ConditionOutcome::Met => None,
                ConditionOutcome::Unmet(observed) => Some(Mismatch {
                    resource: resource.clone(),
                    path: condition.path.clone(),
                    expected: condition.value.clone(),
                    observed,
                }),
            }
        })
    }
}

async fn race<T>(
    work: impl Future<Output = T>,
    deadline: Pin<&mut Sleep>,
    cancel: &CancellationToken,
) -> Result<T, WaitEnd> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(WaitEnd::Cancelled),
        out = work => Ok(out),
        () = deadline => Err(WaitEnd::Deadline),
    }
}

fn stopped(end: WaitEnd, waited: Duration, last_mismatch: Option<Mismatch>) -> ConvergenceError {
    match last_mismatch {
        Some(mismatch) if end == WaitEnd::Deadline && mismatch.observed.is_structural() => {
            ConvergenceError::Evaluation { mismatch }
        }
        last_mismatch => ConvergenceError::Timeout {
            waited,
            reason: end,
            last_mismatch,
        },
    }
}

fn reject_empty_paths(expectations: &[Expectation]) -> Result<(), ConvergenceError> {
    for expectation in expectations {
        if let Some(condition) = expectation.conditions.iter().find(|c| c.is_path_empty()) {
            return Err(ConvergenceError::InvalidCondition {
                resource: expectation.resource.clone(),
                path: condition.path.clone(),
            });
        }
    }
    Ok(())
}
