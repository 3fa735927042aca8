//! Renewal scheduling.
//!
//! One loop-based task per managed certificate computes the remaining
//! validity, sleeps toward the safety-margin-adjusted deadline (in steps, so
//! no single timer exceeds [`max_timer_step`]), and renews when due. Renewal
//! failures are retried with doubling backoff; after the attempt budget is
//! exhausted the chain terminates and the failure is visible in the stats.
//!
//! [`max_timer_step`]: crate::config::KeeperConfig::max_timer_step

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::acme::CertificateMaterial;
use crate::config::CertificateRequest;
use crate::error::KeeperError;
use crate::keeper::Core;

// State constants for AtomicU8
const STATE_IDLE: u8 = 0;
const STATE_WAITING: u8 = 1;
const STATE_RENEWING: u8 = 2;
const STATE_FAILED: u8 = 3;

/// Observable state of the renewal chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalState {
    /// No chain armed, or the chain was replaced
    Idle,
    /// Sleeping toward the renewal deadline
    Waiting,
    /// A due renewal is in progress
    Renewing,
    /// The chain terminated after exhausting its retry budget
    Failed,
}

/// Lock-free counters and state for the renewal chain
#[derive(Debug, Default)]
pub struct SchedulerStats {
    state: AtomicU8,
    chained_waits: AtomicU64,
    renewals: AtomicU64,
    failed_attempts: AtomicU64,
}

impl SchedulerStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Current chain state
    pub fn state(&self) -> RenewalState {
        match self.state.load(Ordering::Acquire) {
            STATE_WAITING => RenewalState::Waiting,
            STATE_RENEWING => RenewalState::Renewing,
            STATE_FAILED => RenewalState::Failed,
            _ => RenewalState::Idle,
        }
    }

    /// Sleeps taken that did not yet reach the deadline
    pub fn chained_waits(&self) -> u64 {
        self.chained_waits.load(Ordering::Relaxed)
    }

    /// Completed renewals
    pub fn renewals(&self) -> u64 {
        self.renewals.load(Ordering::Relaxed)
    }

    /// Individual acquisition attempts that failed
    pub fn failed_attempts(&self) -> u64 {
        self.failed_attempts.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::Release);
    }
}

/// What the chain does next for a given certificate expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NextStep {
    /// The adjusted deadline has passed; renew without arming a timer
    RenewNow,
    /// Sleep for `step`; `reaches_deadline` is false for a chained wait
    Sleep {
        step: Duration,
        reaches_deadline: bool,
    },
}

/// Deadline arithmetic for one scheduling decision.
///
/// The deadline is always re-derived from the certificate's own expiry, so
/// process restarts and chained waits agree on when renewal is due.
pub(crate) fn next_step(
    not_after: DateTime<Utc>,
    safety_margin: chrono::Duration,
    max_timer_step: Duration,
    now: DateTime<Utc>,
) -> NextStep {
    let deadline = not_after - safety_margin;
    let remaining = deadline - now;

    if remaining <= chrono::Duration::zero() {
        return NextStep::RenewNow;
    }

    let remaining = remaining.to_std().unwrap_or(Duration::ZERO);
    if remaining > max_timer_step {
        NextStep::Sleep {
            step: max_timer_step,
            reaches_deadline: false,
        }
    } else {
        NextStep::Sleep {
            step: remaining,
            reaches_deadline: true,
        }
    }
}

/// Background renewal chain for one managed certificate
pub struct RenewalScheduler {
    core: Arc<Core>,
    stats: Arc<SchedulerStats>,
}

impl RenewalScheduler {
    pub(crate) fn new(core: Arc<Core>, stats: Arc<SchedulerStats>) -> Self {
        Self { core, stats }
    }

    /// Run the chain until the process exits or the retry budget is spent
    pub(crate) async fn run(self, mut material: CertificateMaterial, request: CertificateRequest) {
        info!(
            not_after = %material.not_after,
            common_name = %request.common_name,
            "renewal chain armed"
        );

        loop {
            let step = next_step(
                material.not_after,
                self.core.config.safety_margin,
                self.core.config.max_timer_step,
                Utc::now(),
            );

            match step {
                NextStep::RenewNow => {
                    self.stats.set_state(STATE_RENEWING);
                    info!(not_after = %material.not_after, "certificate due for renewal");

                    match self.renew(&request).await {
                        Ok(renewed) => {
                            self.stats.renewals.fetch_add(1, Ordering::Relaxed);
                            material = renewed;
                        }
                        Err(e) => {
                            error!(
                                error = %e,
                                common_name = %request.common_name,
                                "renewal failed after exhausting retries; chain terminated"
                            );
                            self.stats.set_state(STATE_FAILED);
                            return;
                        }
                    }
                }
                NextStep::Sleep {
                    step,
                    reaches_deadline,
                } => {
                    if reaches_deadline {
                        debug!(sleep_secs = step.as_secs(), "waiting for renewal deadline");
                    } else {
                        self.stats.chained_waits.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            sleep_secs = step.as_secs(),
                            "deadline beyond a single timer, waiting in steps"
                        );
                    }
                    self.stats.set_state(STATE_WAITING);
                    tokio::time::sleep(step).await;
                }
            }
        }
    }

    /// One due renewal: acquire, persist, notify, with bounded backoff
    /// around the acquisition.
    async fn renew(&self, request: &CertificateRequest) -> Result<CertificateMaterial, KeeperError> {
        let retry = &self.core.config.retry;
        let mut backoff = retry.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.core.acquire(request).await {
                Ok(material) => {
                    self.core.persist_and_emit(&material)?;
                    info!(
                        not_after = %material.not_after,
                        attempt,
                        "certificate renewed"
                    );
                    return Ok(material);
                }
                Err(e) => {
                    self.stats.failed_attempts.fetch_add(1, Ordering::Relaxed);
                    if attempt >= retry.max_attempts {
                        return Err(e);
                    }
                    warn!(
                        error = %e,
                        attempt,
                        retry_in_secs = backoff.as_secs(),
                        "renewal attempt failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = Ord::min(backoff * 2, retry.max_backoff);
                }
            }
        }
    }
}
