//! Agent abstraction and concrete agent variants.
//!
//! Every agent implements [`Agent`]: `initialize` once at registration,
//! `process` as the single entry point for actions, `handle_event` for
//! reactions to bus events and `receive` for agent-to-agent messages.
//! Shared lifecycle state (id, capabilities, the private state map and the
//! signal channel) lives in an [`AgentCore`] each variant embeds.
//!
//! Agents never touch each other's state. Cross-agent effects go through
//! [`AgentAddress`] (request/reply through the target's mailbox) or through
//! events on the bus.

pub mod affiliate;
pub mod compliance;
pub mod content;
pub mod dispatch;
pub mod email_config;
pub mod mailbox;
pub mod research;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::core::{CircuitBreakers, ErrorHandler, EventBus, Recovery, RetryPolicy};
use crate::domain::{AgentInput, AgentMessage, Event, EventPayload, EventType};
use crate::error::{Error, Result};

pub use affiliate::AffiliateAgent;
pub use compliance::ComplianceAgent;
pub use content::ContentAgent;
pub use dispatch::DispatchAgent;
pub use email_config::EmailConfigAgent;
pub use mailbox::{spawn_mailbox, AgentAddress};
pub use research::ResearchAgent;

/// Action names used by the canonical pipeline
pub mod actions {
    pub const RESEARCH: &str = "research";
    pub const GENERATE_CONTENT: &str = "generate-content";
    pub const CHECK_COMPLIANCE: &str = "check-compliance";
    pub const VALIDATE_CONTACT: &str = "validate-contact";
    pub const REGISTER_OPT_OUT: &str = "register-opt-out";
    pub const DISPATCH: &str = "dispatch";
    pub const DRAIN: &str = "drain";
    pub const QUEUE_STATUS: &str = "queue-status";
}

/// Breaker name for content model calls
pub const AI_SERVICE: &str = "ai";

/// Breaker name for outbound mail
pub const SMTP_SERVICE: &str = "smtp";

/// Notifications an agent emits about itself, outside the shared bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentSignal {
    StateChanged { agent_id: String, key: String },
    UnhandledEvent { agent_id: String, event_type: EventType },
}

const SIGNAL_CAPACITY: usize = 64;

/// State and identity common to all agents
pub struct AgentCore {
    id: String,
    name: String,
    capabilities: BTreeSet<String>,
    state: RwLock<HashMap<String, Value>>,
    signals: broadcast::Sender<AgentSignal>,
}

impl AgentCore {
    pub fn new<I, S>(id: impl Into<String>, name: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            state: RwLock::new(HashMap::new()),
            signals,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> Vec<String> {
        self.capabilities.iter().cloned().collect()
    }

    /// Advisory only: nothing enforces capabilities before `process`
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Write to the private state map and emit `StateChanged`
    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), value);
        self.emit(AgentSignal::StateChanged {
            agent_id: self.id.clone(),
            key,
        });
    }

    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn state_snapshot(&self) -> HashMap<String, Value> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Observe this agent's signals
    pub fn subscribe(&self) -> broadcast::Receiver<AgentSignal> {
        self.signals.subscribe()
    }

    pub fn emit(&self, signal: AgentSignal) {
        // no receivers is fine
        let _ = self.signals.send(signal);
    }

    /// Send a message to another agent and wait for its reply
    pub async fn communicate(&self, target: &AgentAddress, payload: Value) -> Result<Value> {
        debug!(from = %self.id, to = %target.agent_id(), "Agent message");
        target.deliver(AgentMessage::new(self.id.clone(), payload)).await
    }

    /// Ask another agent to perform `action` and wait for its reply
    pub async fn request(&self, target: &AgentAddress, action: &str, payload: Value) -> Result<Value> {
        debug!(from = %self.id, to = %target.agent_id(), action, "Agent request");
        target
            .deliver(AgentMessage::new(self.id.clone(), payload).with_action(action))
            .await
    }

    /// Error for an action this agent does not implement
    pub fn unsupported(&self, action: &str) -> Error {
        Error::UnsupportedAction {
            agent_id: self.id.clone(),
            action: action.to_string(),
        }
    }
}

/// The common contract of all agent variants
#[async_trait]
pub trait Agent: Send + Sync {
    fn core(&self) -> &AgentCore;

    fn id(&self) -> &str {
        self.core().id()
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn has_capability(&self, capability: &str) -> bool {
        self.core().has_capability(capability)
    }

    /// One-time setup. Must be safe to call more than once.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Perform an action
    async fn process(&self, input: AgentInput) -> Result<Value>;

    /// React to a bus event. The default only signals that it went unhandled.
    async fn handle_event(&self, event: &Event) -> Result<()> {
        self.core().emit(AgentSignal::UnhandledEvent {
            agent_id: self.id().to_string(),
            event_type: event.event_type,
        });
        Ok(())
    }

    /// Answer a message from another agent. The default acknowledges it.
    async fn receive(&self, message: AgentMessage) -> Result<Value> {
        Ok(json!({ "status": "received", "sender_id": message.sender_id }))
    }
}

/// Shared collaborators handed to concrete agents
#[derive(Clone)]
pub struct AgentServices {
    pub bus: Arc<EventBus>,
    pub breakers: Arc<CircuitBreakers>,
    pub errors: Arc<ErrorHandler>,
    pub retry: RetryPolicy,
}

impl AgentServices {
    /// Publish an event in the invocation's trace (or a new one)
    pub async fn publish(&self, payload: EventPayload, trace_id: Option<Uuid>) -> Result<()> {
        let trace_id = trace_id.unwrap_or_else(Uuid::new_v4);
        self.bus.publish_in_trace(payload, trace_id).await?;
        Ok(())
    }

    /// Route a failure through the error handler. A retry strategy that
    /// recovers turns the failure into its value; otherwise the error comes
    /// back unchanged.
    pub async fn report(&self, agent_id: &str, error: Error) -> Result<Value> {
        let classified = error.to_classified();
        match self.errors.handle_error(&classified, Some(agent_id)).await {
            Recovery::Recovered(value) => {
                debug!(agent = agent_id, code = %classified.code, "Failure recovered");
                Ok(value)
            }
            Recovery::FallbackApplied => Err(error),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_services() -> AgentServices {
    use crate::core::BreakerConfig;

    let bus = Arc::new(EventBus::default());
    AgentServices {
        breakers: Arc::new(CircuitBreakers::new(BreakerConfig::default()).with_event_bus(bus.clone())),
        errors: Arc::new(ErrorHandler::new().with_event_bus(bus.clone())),
        retry: RetryPolicy::none(),
        bus,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        core: AgentCore,
    }

    #[async_trait]
    impl Agent for Echo {
        fn core(&self) -> &AgentCore {
            &self.core
        }

        async fn process(&self, input: AgentInput) -> Result<Value> {
            match input.action.as_str() {
                "echo" => Ok(input.data),
                other => Err(self.core.unsupported(other)),
            }
        }
    }

    fn echo() -> Echo {
        Echo {
            core: AgentCore::new("echo", "Echo", ["echo"]),
        }
    }

    #[tokio::test]
    async fn test_unsupported_action() {
        let agent = echo();
        let err = agent
            .process(AgentInput::new("shout", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedAction { ref action, .. } if action == "shout"));
    }

    #[tokio::test]
    async fn test_set_state_emits_signal() {
        let agent = echo();
        let mut signals = agent.core().subscribe();

        agent.core().set_state("last", json!(1));

        assert_eq!(agent.core().get_state("last"), Some(json!(1)));
        assert_eq!(
            signals.recv().await.unwrap(),
            AgentSignal::StateChanged {
                agent_id: "echo".to_string(),
                key: "last".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_default_receive_acknowledges() {
        let agent = echo();
        let reply = agent
            .receive(AgentMessage::new("research", json!({ "hello": true })))
            .await
            .unwrap();
        assert_eq!(reply, json!({ "status": "received", "sender_id": "research" }));
    }

    #[test]
    fn test_capabilities_are_advisory() {
        let agent = echo();
        assert!(agent.has_capability("echo"));
        assert!(!agent.has_capability("dispatch"));
    }
}
