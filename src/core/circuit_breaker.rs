//! Per-dependency circuit breakers.
//!
//! Each named external dependency has its own breaker, created lazily on
//! first use:
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────► Open
//!     ▲                                │ recovery time elapsed,
//!     │ success                        │ next call attempted
//!     │                                ▼
//!     └──────────────────────────── HalfOpen ──── failure ───► Open
//! ```
//!
//! While open, calls fail with [`Error::CircuitOpen`] without running the
//! operation. Half-open admits a single trial call at a time. A trial that
//! is dropped before it completes re-opens the breaker and restarts the
//! recovery timer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use super::event_bus::EventBus;
use super::retry::RetryPolicy;
use crate::domain::EventPayload;
use crate::error::{Error, Result};

/// Breaker thresholds shared by all dependencies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,

    /// Time after the last failure before a trial call is allowed
    pub recovery_time: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_time: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

/// Snapshot of one dependency's breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    pub service_name: String,
    pub failure_count: u32,
    pub last_failure_time: Option<Instant>,
    pub status: BreakerStatus,
}

impl CircuitBreakerState {
    pub fn is_open(&self) -> bool {
        self.status == BreakerStatus::Open
    }
}

#[derive(Debug)]
struct Breaker {
    failure_count: u32,
    last_failure: Option<Instant>,
    status: BreakerStatus,
    trial_in_flight: bool,
}

impl Default for Breaker {
    fn default() -> Self {
        Self {
            failure_count: 0,
            last_failure: None,
            status: BreakerStatus::Closed,
            trial_in_flight: false,
        }
    }
}

enum Transition {
    Opened(u32),
    Closed,
}

/// Registry of breakers keyed by service name
pub struct CircuitBreakers {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Breaker>>,
    bus: Option<Arc<EventBus>>,
}

impl CircuitBreakers {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
            bus: None,
        }
    }

    /// Publish `CircuitOpened` / `CircuitClosed` on transitions
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Breaker>> {
        self.breakers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `operation` behind the breaker for `service`
    pub async fn call<T, F, Fut>(&self, service: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let trial = TrialGuard {
            breakers: self,
            service,
            armed: self.acquire(service)?,
        };

        let outcome = operation().await;
        trial.disarm();

        match outcome {
            Ok(value) => {
                self.record_success(service).await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure(service).await;
                Err(e)
            }
        }
    }

    /// Run `operation` behind the breaker, retrying retryable failures with
    /// backoff until the policy gives up or the breaker opens
    pub async fn call_with_retry<T, F, Fut>(
        &self,
        service: &str,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match self.call(service, || operation()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let open = matches!(e, Error::CircuitOpen { .. });
                    if open || !e.is_retryable() || !policy.should_retry(attempt) {
                        return Err(e);
                    }

                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        service,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "External call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Admit a call. Returns true when the call is the half-open trial.
    fn acquire(&self, service: &str) -> Result<bool> {
        let mut breakers = self.lock();
        let breaker = breakers.entry(service.to_string()).or_default();

        let rejected = || Error::CircuitOpen {
            service: service.to_string(),
        };

        match breaker.status {
            BreakerStatus::Closed => Ok(false),
            BreakerStatus::Open => {
                let cooled_down = breaker
                    .last_failure
                    .map_or(true, |at| at.elapsed() > self.config.recovery_time);
                if !cooled_down {
                    return Err(rejected());
                }
                breaker.status = BreakerStatus::HalfOpen;
                breaker.trial_in_flight = true;
                info!(service, "Circuit half-open, allowing trial call");
                Ok(true)
            }
            BreakerStatus::HalfOpen => {
                if breaker.trial_in_flight {
                    return Err(rejected());
                }
                breaker.trial_in_flight = true;
                Ok(true)
            }
        }
    }

    /// A trial that never reported back counts as a failure
    fn abandon_trial(&self, service: &str) {
        let mut breakers = self.lock();
        let Some(breaker) = breakers.get_mut(service) else {
            return;
        };
        if breaker.status == BreakerStatus::HalfOpen && breaker.trial_in_flight {
            breaker.status = BreakerStatus::Open;
            breaker.trial_in_flight = false;
            breaker.last_failure = Some(Instant::now());
            warn!(service, "Trial call abandoned, circuit re-opened");
        }
    }

    async fn record_success(&self, service: &str) {
        let transition = {
            let mut breakers = self.lock();
            let breaker = breakers.entry(service.to_string()).or_default();
            let was_closed = breaker.status == BreakerStatus::Closed;
            *breaker = Breaker::default();
            (!was_closed).then_some(Transition::Closed)
        };

        if let Some(transition) = transition {
            info!(service, "Circuit closed");
            self.announce(service, transition).await;
        }
    }

    async fn record_failure(&self, service: &str) {
        let transition = {
            let mut breakers = self.lock();
            let breaker = breakers.entry(service.to_string()).or_default();
            breaker.failure_count += 1;
            breaker.last_failure = Some(Instant::now());
            breaker.trial_in_flight = false;

            let should_open = match breaker.status {
                BreakerStatus::HalfOpen => true,
                BreakerStatus::Closed => breaker.failure_count >= self.config.failure_threshold,
                BreakerStatus::Open => false,
            };
            if should_open {
                breaker.status = BreakerStatus::Open;
            }
            should_open.then_some(Transition::Opened(breaker.failure_count))
        };

        if let Some(transition) = transition {
            warn!(
                service,
                recovery_ms = self.config.recovery_time.as_millis() as u64,
                "Circuit opened"
            );
            self.announce(service, transition).await;
        }
    }

    async fn announce(&self, service: &str, transition: Transition) {
        let Some(bus) = &self.bus else {
            return;
        };

        let payload = match transition {
            Transition::Opened(failures) => EventPayload::CircuitOpened {
                service: service.to_string(),
                failures,
            },
            Transition::Closed => EventPayload::CircuitClosed {
                service: service.to_string(),
            },
        };

        if let Err(e) = bus.publish(payload).await {
            warn!(service, error = %e, "Failed to publish circuit transition");
        }
    }

    /// Current state of one breaker, if it has been used
    pub fn state(&self, service: &str) -> Option<CircuitBreakerState> {
        self.lock().get(service).map(|b| snapshot(service, b))
    }

    /// States of all breakers, sorted by service name
    pub fn states(&self) -> Vec<CircuitBreakerState> {
        let mut states: Vec<_> = self
            .lock()
            .iter()
            .map(|(name, b)| snapshot(name, b))
            .collect();
        states.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        states
    }

    /// Force a breaker back to closed
    pub fn reset(&self, service: &str) {
        if let Some(breaker) = self.lock().get_mut(service) {
            *breaker = Breaker::default();
        }
    }
}

/// Re-opens the breaker if a half-open trial is dropped before it completes
struct TrialGuard<'a> {
    breakers: &'a CircuitBreakers,
    service: &'a str,
    armed: bool,
}

impl TrialGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breakers.abandon_trial(self.service);
        }
    }
}

fn snapshot(service: &str, breaker: &Breaker) -> CircuitBreakerState {
    CircuitBreakerState {
        service_name: service.to_string(),
        failure_count: breaker.failure_count,
        last_failure_time: breaker.last_failure,
        status: breaker.status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail() -> Result<()> {
        Err(Error::external("smtp", "connection refused"))
    }

    #[tokio::test]
    async fn test_breakers_are_independent() {
        let breakers = CircuitBreakers::new(BreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });

        let _ = breakers.call("smtp", || async { fail() }).await;
        assert!(breakers.state("smtp").unwrap().is_open());

        let result = breakers.call("ai", || async { Ok::<_, Error>(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(breakers.state("ai").unwrap().status, BreakerStatus::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breakers = CircuitBreakers::new(BreakerConfig::default());

        let _ = breakers.call("smtp", || async { fail() }).await;
        let _ = breakers.call("smtp", || async { fail() }).await;
        assert_eq!(breakers.state("smtp").unwrap().failure_count, 2);

        breakers
            .call("smtp", || async { Ok::<_, Error>(()) })
            .await
            .unwrap();
        assert_eq!(breakers.state("smtp").unwrap().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_at_non_retryable() {
        let breakers = CircuitBreakers::new(BreakerConfig::default());
        let mut calls = 0;

        let result: Result<()> = breakers
            .call_with_retry("ai", &RetryPolicy::default(), || {
                calls += 1;
                async { Err::<(), _>(Error::validation("bad prompt")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_reset() {
        let breakers = CircuitBreakers::new(BreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let _ = breakers.call("smtp", || async { fail() }).await;
        breakers.reset("smtp");
        assert_eq!(breakers.state("smtp").unwrap().status, BreakerStatus::Closed);
    }
}
