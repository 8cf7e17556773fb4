//! Poll policies for every wait site.
//!
//! All waits in offrender are "probe, sleep a fixed interval, probe again"
//! loops: cloud operations until terminal, the worker until ready, the
//! sentinel until present. A [`PollPolicy`] carries the interval and the
//! optional bounds; by default a policy never gives up.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Interval and bounds for a polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Fixed delay between two probes.
    pub interval: Duration,
    /// Give up after this many probes.
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed since the first probe.
    pub deadline: Option<Duration>,
    /// Operation name for logging.
    pub operation_name: String,
}

impl PollPolicy {
    /// Unbounded policy probing every `interval`.
    pub fn every(operation_name: impl Into<String>, interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            deadline: None,
            operation_name: operation_name.into(),
        }
    }

    /// Set the maximum number of probes.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the overall deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn exhausted(&self, attempts: u32, elapsed: Duration) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
            || self
                .deadline
                .is_some_and(|deadline| elapsed + self.interval > deadline)
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    Pending,
}

/// Progress of a polling loop, reported after every pending probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTick {
    pub attempt: u32,
    pub elapsed: Duration,
}

/// Why a polling loop ended without a ready value.
#[derive(Debug, Error)]
pub enum PollError<E> {
    /// The probe failed hard; no further probes were made.
    #[error("{0}")]
    Aborted(E),

    /// The policy's bounds were reached.
    #[error("gave up after {attempts} attempts ({elapsed:?})")]
    Exhausted { attempts: u32, elapsed: Duration },
}

/// Probe until ready, a hard failure, or the policy gives up.
///
/// `on_pending` runs after each sleep, so callers can report elapsed time.
pub async fn poll_until<T, E, F, Fut, R>(
    policy: &PollPolicy,
    mut probe: F,
    mut on_pending: R,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T>, E>>,
    R: FnMut(PollTick),
{
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match probe().await {
            Ok(Poll::Ready(value)) => return Ok(value),
            Ok(Poll::Pending) => {}
            Err(e) => return Err(PollError::Aborted(e)),
        }

        if policy.exhausted(attempt, start.elapsed()) {
            return Err(PollError::Exhausted {
                attempts: attempt,
                elapsed: start.elapsed(),
            });
        }

        debug!(
            operation = %policy.operation_name,
            attempt,
            "Not ready, retrying in {:?}",
            policy.interval
        );
        tokio::time::sleep(policy.interval).await;

        on_pending(PollTick {
            attempt,
            elapsed: start.elapsed(),
        });
    }
}
