//! Central routing for classified failures.
//!
//! `handle_error` counts and logs the failure, publishes it on the bus,
//! raises an alert for CRITICAL severity, then tries the retry strategy
//! registered for the error code (retryable errors only). When there is no
//! strategy, or the strategy itself fails, the fallback registered for the
//! error kind runs; the default fallback only logs.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use super::event_bus::EventBus;
use crate::domain::EventPayload;
use crate::error::{ClassifiedError, ErrorKind, Severity};

/// Async recovery for one error code
pub type RetryStrategy =
    Arc<dyn Fn(ClassifiedError) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Last-resort handler for one error kind
pub type FallbackHandler = Arc<dyn Fn(&ClassifiedError) + Send + Sync>;

/// Number of alerts retained for `recent_alerts`
pub const ALERT_CAPACITY: usize = 100;

/// What `handle_error` did with a failure
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    /// The retry strategy succeeded with this value
    Recovered(Value),

    /// A fallback handler ran
    FallbackApplied,
}

/// An out-of-band alert raised for a CRITICAL failure
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    pub kind: ErrorKind,
    pub raised_at: DateTime<Utc>,
    pub context: HashMap<String, String>,
}

/// Error counters for health summaries
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStats {
    pub total: u64,
    pub by_kind: HashMap<ErrorKind, u64>,
    pub alerts: usize,
}

pub struct ErrorHandler {
    bus: Option<Arc<EventBus>>,
    strategies: RwLock<HashMap<String, RetryStrategy>>,
    fallbacks: RwLock<HashMap<ErrorKind, FallbackHandler>>,
    alerts: Mutex<VecDeque<Alert>>,
    counts: Mutex<HashMap<ErrorKind, u64>>,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self {
            bus: None,
            strategies: RwLock::new(HashMap::new()),
            fallbacks: RwLock::new(HashMap::new()),
            alerts: Mutex::new(VecDeque::new()),
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Publish `AgentError` / `SystemAlert` events for handled failures
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Register the recovery function for an error code
    pub fn register_retry_strategy<F, Fut>(&self, code: impl Into<String>, strategy: F)
    where
        F: Fn(ClassifiedError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let strategy: RetryStrategy = Arc::new(move |error| strategy(error).boxed());
        self.strategies
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(code.into(), strategy);
    }

    /// Register the fallback for an error kind
    pub fn register_fallback<F>(&self, kind: ErrorKind, fallback: F)
    where
        F: Fn(&ClassifiedError) + Send + Sync + 'static,
    {
        self.fallbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, Arc::new(fallback));
    }

    /// Route a failure through strategies and fallbacks.
    ///
    /// `agent_id` identifies the component that hit the failure, if any.
    pub async fn handle_error(&self, err: &ClassifiedError, agent_id: Option<&str>) -> Recovery {
        *self
            .counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(err.kind)
            .or_insert(0) += 1;

        match err.severity {
            Severity::High | Severity::Critical => {
                error!(code = %err.code, severity = %err.severity, agent = ?agent_id, "{}", err)
            }
            Severity::Low | Severity::Medium => {
                warn!(code = %err.code, severity = %err.severity, agent = ?agent_id, "{}", err)
            }
        }

        self.publish(EventPayload::AgentError {
            agent_id: agent_id.map(str::to_string),
            code: err.code.clone(),
            message: err.message.clone(),
            severity: err.severity,
        })
        .await;

        if err.is_critical() {
            self.raise_alert(err).await;
        }

        if err.retryable {
            let strategy = self
                .strategies
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(&err.code)
                .cloned();

            if let Some(strategy) = strategy {
                match strategy(err.clone()).await {
                    Ok(value) => {
                        info!(code = %err.code, "Recovered via retry strategy");
                        return Recovery::Recovered(value);
                    }
                    Err(e) => {
                        warn!(code = %err.code, error = %e, "Retry strategy failed, falling back");
                    }
                }
            }
        }

        let fallback = self
            .fallbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&err.kind)
            .cloned();

        match fallback {
            Some(fallback) => fallback(err),
            None => log_only(err),
        }

        Recovery::FallbackApplied
    }

    async fn raise_alert(&self, err: &ClassifiedError) {
        let alert = Alert {
            code: err.code.clone(),
            message: err.message.clone(),
            severity: err.severity,
            kind: err.kind,
            raised_at: Utc::now(),
            context: err.context.clone(),
        };

        error!(code = %alert.code, kind = ?alert.kind, "ALERT: {}", alert.message);

        {
            let mut alerts = self.alerts.lock().unwrap_or_else(|e| e.into_inner());
            alerts.push_back(alert);
            while alerts.len() > ALERT_CAPACITY {
                alerts.pop_front();
            }
        }

        self.publish(EventPayload::SystemAlert {
            code: err.code.clone(),
            message: err.message.clone(),
            severity: err.severity,
        })
        .await;
    }

    async fn publish(&self, payload: EventPayload) {
        if let Some(bus) = &self.bus {
            if let Err(e) = bus.publish(payload).await {
                warn!(error = %e, "Failed to publish error event");
            }
        }
    }

    /// Most recent alerts, newest first
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> ErrorStats {
        let by_kind = self.counts.lock().unwrap_or_else(|e| e.into_inner()).clone();
        ErrorStats {
            total: by_kind.values().sum(),
            by_kind,
            alerts: self.alerts.lock().unwrap_or_else(|e| e.into_inner()).len(),
        }
    }
}

fn log_only(err: &ClassifiedError) {
    info!(code = %err.code, kind = ?err.kind, "No recovery available: {}", err.message);
}
