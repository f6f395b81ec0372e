//! Background polling of the modem.
//!
//! One poller owns the [`StatusSource`] and is the only writer of the
//! registry. Each cycle is `Idle -> Fetching -> {Updating | BackingOff}`;
//! failures never end the loop, they only stretch the delay before the next
//! cycle.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::StatusSource;
use crate::config::PollConfig;
use crate::error::PollError;
use crate::parser;
use crate::registry::SharedRegistry;

/// Exponential backoff between poll cycles.
///
/// The delay after `n` consecutive failures is
/// `min(base * 2^min(n, max_exponent), max)`; a success resets it to `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_exponent: u32,
    failures: u32,
}

impl Backoff {
    pub const DEFAULT_MAX_EXPONENT: u32 = 6;

    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            max_exponent: Self::DEFAULT_MAX_EXPONENT,
            failures: 0,
        }
    }

    pub fn with_max_exponent(mut self, max_exponent: u32) -> Self {
        self.max_exponent = max_exponent;
        self
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay before the next cycle given the current failure count.
    pub fn next_delay(&self) -> Duration {
        let exponent = self.failures.min(self.max_exponent);
        self.base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max)
    }

    pub fn record_success(&mut self) -> Duration {
        self.failures = 0;
        self.next_delay()
    }

    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.next_delay()
    }
}

/// Where the poller is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Fetching,
    Updating,
    BackingOff,
}

/// The poll loop.
pub struct Poller<S> {
    source: S,
    registry: SharedRegistry,
    backoff: Backoff,
    /// Upper bound on one whole fetch, retries and re-login included.
    deadline: Duration,
    state: PollState,
}

impl<S: StatusSource> Poller<S> {
    pub fn new(source: S, registry: SharedRegistry, config: &PollConfig) -> Self {
        Self {
            source,
            registry,
            backoff: Backoff::new(config.interval(), config.max_backoff()),
            deadline: config.interval(),
            state: PollState::Idle,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Run one cycle and return the delay before the next one.
    pub async fn poll_once(&mut self) -> Duration {
        self.state = PollState::Fetching;
        let started = Instant::now();

        let result = match tokio::time::timeout(self.deadline, self.source.fetch_status()).await {
            Ok(Ok(payload)) => parser::parse(payload).map_err(PollError::from),
            Ok(Err(e)) => Err(PollError::from(e)),
            Err(_) => Err(PollError::Deadline(self.deadline.as_millis() as u64)),
        };

        let elapsed = started.elapsed();

        match result {
            Ok(snapshot) => {
                self.state = PollState::Updating;
                let samples = snapshot.samples().len();
                self.registry.update_with_duration(snapshot, elapsed);
                let delay = self.backoff.record_success();
                self.state = PollState::Idle;

                debug!(
                    samples,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Poll succeeded"
                );
                delay
            }
            Err(e) => {
                self.state = PollState::BackingOff;
                self.registry.record_failure_with_duration(&e, elapsed);
                let delay = self.backoff.record_failure();

                warn!(
                    error = %e,
                    kind = e.kind(),
                    consecutive_failures = self.backoff.failures(),
                    retry_in_ms = delay.as_millis() as u64,
                    "Poll failed"
                );
                delay
            }
        }
    }

    /// Poll until shutdown is signalled. The first cycle starts immediately.
    ///
    /// A cycle in flight when shutdown arrives is abandoned.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.backoff.base.as_millis() as u64,
            max_backoff_ms = self.backoff.max.as_millis() as u64,
            "Starting poller"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = tokio::select! {
                delay = self.poll_once() => delay,
                _ = shutdown.wait_for(|stop| *stop) => break,
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        info!("Poller stopped");
    }
}
