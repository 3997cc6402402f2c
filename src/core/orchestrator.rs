//! Agent registry and workflow execution.
//!
//! The orchestrator owns one mailbox per registered agent and drives
//! workflows through those mailboxes:
//! - steps run strictly in order, one at a time
//! - every event a run causes shares the run's trace id
//! - the first failing step aborts the run; collected results are dropped
//!   and the caller gets a single `WorkflowStep` error

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::error_handler::ErrorHandler;
use super::event_bus::{EventBus, Subscription};
use super::workflow::Workflow;
use crate::agents::{spawn_mailbox, Agent, AgentAddress};
use crate::agents::mailbox::MAILBOX_CAPACITY;
use crate::domain::{AgentInput, Contact, EventPayload, EventType};
use crate::error::{Error, Result};

struct Registered {
    agent: Arc<dyn Agent>,
    address: AgentAddress,
    task: JoinHandle<()>,
}

/// Registry of agents plus the workflow engine
pub struct Orchestrator {
    bus: Arc<EventBus>,
    errors: Arc<ErrorHandler>,
    agents: RwLock<BTreeMap<String, Registered>>,
}

impl Orchestrator {
    pub fn new(bus: Arc<EventBus>, errors: Arc<ErrorHandler>) -> Self {
        Self {
            bus,
            errors,
            agents: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn errors(&self) -> &Arc<ErrorHandler> {
        &self.errors
    }

    fn is_registered(&self, id: &str) -> bool {
        self.agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    /// Initialize an agent and start its mailbox
    #[instrument(skip(self, agent), fields(agent = %agent.id()))]
    pub async fn register_agent(&self, agent: Arc<dyn Agent>) -> Result<()> {
        let id = agent.id().to_string();
        if self.is_registered(&id) {
            return Err(Error::AgentExists { id });
        }

        if let Err(e) = agent.initialize().await {
            let err = match e {
                err @ Error::Initialization { .. } => err,
                other => Error::Initialization {
                    agent_id: id.clone(),
                    reason: other.to_string(),
                },
            };
            self.errors.handle_error(&err.to_classified(), Some(&id)).await;
            return Err(err);
        }

        {
            let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
            if agents.contains_key(&id) {
                return Err(Error::AgentExists { id });
            }
            let (address, task) = spawn_mailbox(agent.clone(), MAILBOX_CAPACITY);
            agents.insert(
                id.clone(),
                Registered {
                    agent: agent.clone(),
                    address,
                    task,
                },
            );
        }

        info!("Agent registered");
        self.publish(
            EventPayload::AgentInitialized {
                agent_id: id,
                name: agent.name().to_string(),
                capabilities: agent.core().capabilities(),
            },
            Uuid::new_v4(),
        )
        .await;

        Ok(())
    }

    /// Direct handle to an agent. Calls made through it bypass the mailbox.
    pub fn get_agent(&self, id: &str) -> Option<Arc<dyn Agent>> {
        self.agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|r| r.agent.clone())
    }

    /// Mailbox address of a registered agent
    pub fn address(&self, id: &str) -> Option<AgentAddress> {
        self.agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|r| r.address.clone())
    }

    fn require_address(&self, id: &str) -> Result<AgentAddress> {
        self.address(id)
            .ok_or_else(|| Error::AgentNotFound { id: id.to_string() })
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Ask `target_id` to perform `action` on behalf of `source_id` and wait
    /// for its reply
    pub async fn orchestrate_action(
        &self,
        source_id: &str,
        target_id: &str,
        action: &str,
        payload: Value,
    ) -> Result<Value> {
        let source = self
            .get_agent(source_id)
            .ok_or_else(|| Error::AgentNotFound {
                id: source_id.to_string(),
            })?;
        let target = self.require_address(target_id)?;

        debug!(source = source_id, target = target_id, action, "Orchestrating action");
        source.core().request(&target, action, payload).await
    }

    /// Forward bus events of the given types to an agent's `handle_event`
    pub fn subscribe_agent(&self, id: &str, event_types: &[EventType]) -> Result<Vec<Subscription>> {
        let address = self.require_address(id)?;

        Ok(event_types
            .iter()
            .map(|&event_type| {
                let address = address.clone();
                self.bus.subscribe(event_type, move |event| {
                    let address = address.clone();
                    async move { address.notify(event).await.map_err(anyhow::Error::from) }
                })
            })
            .collect())
    }

    /// Run every step of `workflow` in order and return their results.
    ///
    /// The workflow is validated before any step runs.
    #[instrument(skip(self, workflow), fields(workflow = %workflow.name))]
    pub async fn coordinate_workflow(&self, workflow: &Workflow) -> Result<Vec<Value>> {
        workflow.validate()?;

        let trace_id = Uuid::new_v4();
        info!(%trace_id, steps = workflow.steps.len(), "Starting workflow");
        self.publish(
            EventPayload::WorkflowStarted {
                workflow: workflow.name.clone(),
                steps: workflow.steps.len(),
            },
            trace_id,
        )
        .await;

        let mut results = Vec::with_capacity(workflow.steps.len());

        for (index, step) in workflow.steps.iter().enumerate() {
            debug!(index, agent = %step.agent_id, action = %step.action, "Running step");

            let outcome = match self.require_address(&step.agent_id) {
                Ok(address) => {
                    let input = AgentInput::new(step.action.clone(), step.payload.clone())
                        .in_trace(trace_id);
                    address.process(input).await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(value) => results.push(value),
                Err(source) => {
                    error!(index, agent = %step.agent_id, action = %step.action, error = %source, "Workflow step failed");

                    // agents report everything they raise past action dispatch
                    let unreported = matches!(
                        source,
                        Error::AgentNotFound { .. }
                            | Error::UnsupportedAction { .. }
                            | Error::MailboxClosed { .. }
                    );
                    if unreported {
                        self.errors
                            .handle_error(&source.to_classified(), Some(&step.agent_id))
                            .await;
                    }

                    self.publish(
                        EventPayload::WorkflowFailed {
                            workflow: workflow.name.clone(),
                            step: index,
                            agent_id: step.agent_id.clone(),
                            action: step.action.clone(),
                            error: source.to_string(),
                        },
                        trace_id,
                    )
                    .await;

                    return Err(Error::WorkflowStep {
                        index,
                        agent_id: step.agent_id.clone(),
                        action: step.action.clone(),
                        source: Box::new(source),
                    });
                }
            }
        }

        info!(%trace_id, "Workflow completed");
        self.publish(
            EventPayload::WorkflowCompleted {
                workflow: workflow.name.clone(),
                steps: workflow.steps.len(),
            },
            trace_id,
        )
        .await;

        Ok(results)
    }

    /// Run the canonical research, content, compliance, dispatch pipeline
    pub async fn run_outreach(&self, topic: &str, contact: &Contact) -> Result<Vec<Value>> {
        self.coordinate_workflow(&Workflow::outreach(topic, contact))
            .await
    }

    async fn publish(&self, payload: EventPayload, trace_id: Uuid) {
        if let Err(e) = self.bus.publish_in_trace(payload, trace_id).await {
            warn!(error = %e, "Failed to publish orchestrator event");
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        let agents = self.agents.get_mut().unwrap_or_else(|e| e.into_inner());
        for registered in agents.values() {
            registered.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentCore;
    use crate::domain::AgentMessage;
    use async_trait::async_trait;
    use serde_json::json;

    struct Greeter {
        core: AgentCore,
    }

    #[async_trait]
    impl Agent for Greeter {
        fn core(&self) -> &AgentCore {
            &self.core
        }

        async fn process(&self, input: AgentInput) -> Result<Value> {
            match input.action.as_str() {
                "greet" => Ok(json!({ "hello": self.core.id() })),
                other => Err(self.core.unsupported(other)),
            }
        }

        async fn receive(&self, message: AgentMessage) -> Result<Value> {
            match message.into_input() {
                Some(input) => self.process(input).await,
                None => Ok(Value::Null),
            }
        }
    }

    struct Broken {
        core: AgentCore,
    }

    #[async_trait]
    impl Agent for Broken {
        fn core(&self) -> &AgentCore {
            &self.core
        }

        async fn initialize(&self) -> Result<()> {
            Err(Error::validation("missing credentials"))
        }

        async fn process(&self, _input: AgentInput) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    fn greeter(id: &str) -> Arc<dyn Agent> {
        Arc::new(Greeter {
            core: AgentCore::new(id, "Greeter", ["greet"]),
        })
    }

    fn orchestrator() -> Orchestrator {
        let bus = Arc::new(EventBus::default());
        let errors = Arc::new(ErrorHandler::new().with_event_bus(bus.clone()));
        Orchestrator::new(bus, errors)
    }

    #[tokio::test]
    async fn test_register_publishes_initialized() {
        let orchestrator = orchestrator();
        orchestrator.register_agent(greeter("a")).await.unwrap();

        assert!(orchestrator.get_agent("a").is_some());
        assert_eq!(orchestrator.agent_ids(), vec!["a".to_string()]);
        let history = orchestrator
            .bus()
            .get_history(&crate::core::HistoryFilter::new().event_type(EventType::AgentInitialized));
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let orchestrator = orchestrator();
        orchestrator.register_agent(greeter("a")).await.unwrap();
        let err = orchestrator.register_agent(greeter("a")).await.unwrap_err();
        assert!(matches!(err, Error::AgentExists { .. }));
    }

    #[tokio::test]
    async fn test_failed_initialize_is_not_registered() {
        let orchestrator = orchestrator();
        let err = orchestrator
            .register_agent(Arc::new(Broken {
                core: AgentCore::new("broken", "Broken", Vec::<String>::new()),
            }))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Initialization { ref agent_id, .. } if agent_id == "broken"));
        assert!(orchestrator.get_agent("broken").is_none());
    }

    #[tokio::test]
    async fn test_orchestrate_action() {
        let orchestrator = orchestrator();
        orchestrator.register_agent(greeter("a")).await.unwrap();
        orchestrator.register_agent(greeter("b")).await.unwrap();

        let reply = orchestrator
            .orchestrate_action("a", "b", "greet", Value::Null)
            .await
            .unwrap();
        assert_eq!(reply, json!({ "hello": "b" }));

        let err = orchestrator
            .orchestrate_action("a", "missing", "greet", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AgentNotFound { ref id } if id == "missing"));

        let err = orchestrator
            .orchestrate_action("missing", "b", "greet", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AgentNotFound { ref id } if id == "missing"));
    }

    #[tokio::test]
    async fn test_workflow_shares_trace_id() {
        let orchestrator = orchestrator();
        orchestrator.register_agent(greeter("a")).await.unwrap();

        let workflow = Workflow::new(
            "greetings",
            vec![super::super::workflow::WorkflowStep::new("a", "greet", Value::Null)],
        );
        let results = orchestrator.coordinate_workflow(&workflow).await.unwrap();
        assert_eq!(results, vec![json!({ "hello": "a" })]);

        let completed = orchestrator
            .bus()
            .get_history(&crate::core::HistoryFilter::new().event_type(EventType::WorkflowCompleted));
        let chain = orchestrator.bus().trace_event_chain(completed[0].id, 10);
        let types: Vec<EventType> = chain.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::WorkflowStarted, EventType::WorkflowCompleted]);
    }
}
