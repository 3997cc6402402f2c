//! In-process publish/subscribe bus with bounded history.
//!
//! Every published event is appended to a FIFO history (oldest evicted
//! first) whether or not anybody listens. Subscribers for the event type are
//! snapshotted under the lock, then invoked concurrently outside it; each
//! invocation runs as its own task under a deadline, so a handler that
//! errors, panics or hangs is logged and counted but never reaches the
//! publisher or the other handlers.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::{Event, EventMetadata, EventPayload, EventType};
use crate::error::Result;

/// Boxed future returned by an event handler
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A subscribed event handler
pub type EventHandler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// Default number of events retained in history
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Bus settings
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Stamped into every event's metadata
    pub service_name: String,

    /// Stamped into every event's metadata
    pub environment: String,

    /// Maximum events kept in history
    pub history_capacity: usize,

    /// Deadline for a single handler invocation
    pub handler_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            service_name: "outreach".to_string(),
            environment: "development".to_string(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            handler_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct BusState {
    history: VecDeque<Event>,
    subscribers: HashMap<EventType, BTreeMap<u64, EventHandler>>,
    next_subscription: u64,
}

/// The event bus
pub struct EventBus {
    config: BusConfig,
    state: Arc<Mutex<BusState>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(BusState::default())),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Metadata for an event published by this bus
    pub fn metadata(&self, trace_id: Uuid) -> EventMetadata {
        EventMetadata {
            trace_id,
            service_name: self.config.service_name.clone(),
            environment: self.config.environment.clone(),
        }
    }

    /// Publish a payload under a fresh trace id
    pub async fn publish(&self, payload: EventPayload) -> Result<PublishReport> {
        self.publish_in_trace(payload, Uuid::new_v4()).await
    }

    /// Publish a payload as part of an existing trace
    pub async fn publish_in_trace(
        &self,
        payload: EventPayload,
        trace_id: Uuid,
    ) -> Result<PublishReport> {
        let event = Event::new(payload, self.metadata(trace_id));
        self.publish_event(event).await
    }

    /// Publish an untyped payload, checking it against the schema for `event_type`
    pub async fn publish_json(&self, event_type: EventType, data: Value) -> Result<PublishReport> {
        let payload = EventPayload::from_json(event_type, data).map_err(|e| {
            warn!(%event_type, error = %e, "Rejected event with invalid payload");
            e
        })?;
        self.publish(payload).await
    }

    /// Validate, record and fan out a fully built event.
    ///
    /// Returns once every handler invocation has settled.
    #[instrument(skip(self, event), fields(event_type = %event.event_type, event_id = %event.id))]
    pub async fn publish_event(&self, event: Event) -> Result<PublishReport> {
        if let Err(e) = event.validate() {
            warn!(error = %e, "Rejected invalid event");
            return Err(e);
        }

        let handlers: Vec<(u64, EventHandler)> = {
            let mut state = self.lock();
            state.history.push_back(event.clone());
            while state.history.len() > self.config.history_capacity {
                state.history.pop_front();
            }

            state
                .subscribers
                .get(&event.event_type)
                .map(|subs| subs.iter().map(|(id, h)| (*id, Arc::clone(h))).collect())
                .unwrap_or_default()
        };

        let deadline = self.config.handler_timeout;
        let invocations: Vec<_> = handlers
            .into_iter()
            .map(|(id, handler)| {
                let event = event.clone();
                let task =
                    tokio::spawn(async move { tokio::time::timeout(deadline, handler(event)).await });
                async move { (id, task.await) }
            })
            .collect();
        let outcomes = join_all(invocations).await;

        let mut report = PublishReport {
            event,
            delivered: 0,
            failed: 0,
        };

        for (subscription, outcome) in outcomes {
            match outcome {
                Ok(Ok(Ok(()))) => report.delivered += 1,
                Ok(Ok(Err(e))) => {
                    report.failed += 1;
                    warn!(subscription, error = %e, "Event handler failed");
                }
                Ok(Err(_)) => {
                    report.failed += 1;
                    warn!(
                        subscription,
                        timeout_ms = deadline.as_millis() as u64,
                        "Event handler timed out"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(subscription, error = %e, "Event handler panicked");
                }
            }
        }

        debug!(
            delivered = report.delivered,
            failed = report.failed,
            "Event published"
        );

        Ok(report)
    }

    /// Subscribe a handler to one event type.
    ///
    /// The returned [`Subscription`] is the capability to unsubscribe; dropping
    /// it leaves the handler subscribed.
    pub fn subscribe<F, Fut>(&self, event_type: EventType, handler: F) -> Subscription
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |event| handler(event).boxed());

        let mut state = self.lock();
        let id = state.next_subscription;
        state.next_subscription += 1;
        state
            .subscribers
            .entry(event_type)
            .or_default()
            .insert(id, handler);

        debug!(%event_type, subscription = id, "Handler subscribed");

        Subscription {
            id,
            event_type,
            state: Arc::downgrade(&self.state),
        }
    }

    /// Number of handlers currently subscribed to `event_type`
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.lock()
            .subscribers
            .get(&event_type)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Number of events currently held in history
    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    /// Events matching `filter`, oldest first.
    ///
    /// With a limit, the most recent matching events are kept.
    pub fn get_history(&self, filter: &HistoryFilter) -> Vec<Event> {
        let state = self.lock();
        let mut events: Vec<Event> = state
            .history
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();

        if let Some(limit) = filter.limit {
            if events.len() > limit {
                events.drain(..events.len() - limit);
            }
        }

        events
    }

    /// Breadth-first walk over history from `event_id`, at most `max_depth`
    /// hops, following [`are_related`]. Returns events in publish order;
    /// empty if the event is no longer in history.
    pub fn trace_event_chain(&self, event_id: Uuid, max_depth: usize) -> Vec<Event> {
        let history: Vec<Event> = self.lock().history.iter().cloned().collect();

        let Some(root) = history.iter().position(|e| e.id == event_id) else {
            return Vec::new();
        };

        let mut visited: HashSet<usize> = HashSet::from([root]);
        let mut frontier = vec![root];

        for _ in 0..max_depth {
            let mut next = Vec::new();
            for &current in &frontier {
                for (idx, candidate) in history.iter().enumerate() {
                    if !visited.contains(&idx) && are_related(&history[current], candidate) {
                        visited.insert(idx);
                        next.push(idx);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        let mut chain: Vec<usize> = visited.into_iter().collect();
        chain.sort_unstable();
        chain.into_iter().map(|idx| history[idx].clone()).collect()
    }
}

/// Correlation predicate for [`EventBus::trace_event_chain`].
///
/// Two events are related only when they share a trace id. No causal or
/// payload-based relation is inferred.
pub fn are_related(a: &Event, b: &Event) -> bool {
    a.metadata.trace_id == b.metadata.trace_id
}

/// Outcome of a publish once all handlers have settled
#[derive(Debug, Clone)]
pub struct PublishReport {
    /// The event as recorded in history
    pub event: Event,

    /// Handlers that completed successfully
    pub delivered: usize,

    /// Handlers that errored, panicked or timed out
    pub failed: usize,
}

/// Capability to remove a subscription
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    event_type: EventType,
    state: Weak<Mutex<BusState>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Remove the handler. Returns false if the bus is gone or the handler
    /// was already removed.
    pub fn unsubscribe(self) -> bool {
        let Some(state) = self.state.upgrade() else {
            return false;
        };
        let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
        let removed = state
            .subscribers
            .get_mut(&self.event_type)
            .map(|subs| subs.remove(&self.id).is_some())
            .unwrap_or(false);
        debug!(event_type = %self.event_type, subscription = self.id, removed, "Handler unsubscribed");
        removed
    }
}

/// Filter for [`EventBus::get_history`]
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub event_type: Option<EventType>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn since(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn until(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, event: &Event) -> bool {
        self.event_type.map_or(true, |t| event.event_type == t)
            && self.start_time.map_or(true, |start| event.timestamp >= start)
            && self.end_time.map_or(true, |end| event.timestamp <= end)
    }
}
