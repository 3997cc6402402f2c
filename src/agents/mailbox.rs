//! Per-agent mailbox task.
//!
//! Each registered agent gets one task that owns an `Arc` of the agent and
//! handles envelopes one at a time, so invocations of a single agent never
//! overlap. Requests carry a oneshot reply channel; events are delivered
//! without waiting for the agent to react.
//!
//! An agent must not send a request to its own address from inside one of
//! its handlers: the mailbox is busy with the current envelope and the reply
//! would never come.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::Agent;
use crate::domain::{AgentInput, AgentMessage, Event};
use crate::error::{Error, Result};

/// Default number of envelopes buffered per agent
pub const MAILBOX_CAPACITY: usize = 64;

enum Envelope {
    Process {
        input: AgentInput,
        reply: oneshot::Sender<Result<Value>>,
    },
    Deliver {
        message: AgentMessage,
        reply: oneshot::Sender<Result<Value>>,
    },
    Event {
        event: Event,
    },
}

/// Cloneable handle for sending work to an agent's mailbox
#[derive(Clone)]
pub struct AgentAddress {
    agent_id: String,
    tx: mpsc::Sender<Envelope>,
}

impl AgentAddress {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn closed(&self) -> Error {
        Error::MailboxClosed {
            agent_id: self.agent_id.clone(),
        }
    }

    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<Value>>) -> Envelope,
    ) -> Result<Value> {
        let (reply, response) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| self.closed())?;
        response.await.map_err(|_| self.closed())?
    }

    /// Run `process` on the agent and wait for the result
    pub async fn process(&self, input: AgentInput) -> Result<Value> {
        self.request(|reply| Envelope::Process { input, reply }).await
    }

    /// Run `receive` on the agent and wait for the reply
    pub async fn deliver(&self, message: AgentMessage) -> Result<Value> {
        self.request(|reply| Envelope::Deliver { message, reply }).await
    }

    /// Queue an event for `handle_event` without waiting for it to run
    pub async fn notify(&self, event: Event) -> Result<()> {
        self.tx
            .send(Envelope::Event { event })
            .await
            .map_err(|_| self.closed())
    }
}

/// Start the mailbox task for `agent`.
///
/// The task ends once every [`AgentAddress`] for it has been dropped.
pub fn spawn_mailbox(agent: Arc<dyn Agent>, capacity: usize) -> (AgentAddress, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Envelope>(capacity);
    let address = AgentAddress {
        agent_id: agent.id().to_string(),
        tx,
    };

    let handle = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            match envelope {
                Envelope::Process { input, reply } => {
                    debug!(agent = %agent.id(), action = %input.action, "Processing");
                    let _ = reply.send(agent.process(input).await);
                }
                Envelope::Deliver { message, reply } => {
                    debug!(agent = %agent.id(), from = %message.sender_id, "Receiving message");
                    let _ = reply.send(agent.receive(message).await);
                }
                Envelope::Event { event } => {
                    if let Err(e) = agent.handle_event(&event).await {
                        warn!(
                            agent = %agent.id(),
                            event_type = %event.event_type,
                            error = %e,
                            "Agent failed to handle event"
                        );
                    }
                }
            }
        }
        debug!(agent = %agent.id(), "Mailbox closed");
    });

    (address, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentCore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counter {
        core: AgentCore,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl Agent for Counter {
        fn core(&self) -> &AgentCore {
            &self.core
        }

        async fn process(&self, _input: AgentInput) -> Result<Value> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(json!(now))
        }
    }

    #[tokio::test]
    async fn test_invocations_are_serialized() {
        let agent = Arc::new(Counter {
            core: AgentCore::new("counter", "Counter", Vec::<String>::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let (address, _task) = spawn_mailbox(agent.clone(), MAILBOX_CAPACITY);

        let calls = (0..5).map(|_| {
            let address = address.clone();
            async move { address.process(AgentInput::new("count", Value::Null)).await }
        });
        for result in futures::future::join_all(calls).await {
            assert!(result.is_ok());
        }

        assert_eq!(agent.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_mailbox() {
        let agent = Arc::new(Counter {
            core: AgentCore::new("counter", "Counter", Vec::<String>::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let (address, task) = spawn_mailbox(agent, MAILBOX_CAPACITY);
        task.abort();
        let _ = task.await;

        let err = address
            .process(AgentInput::new("count", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MailboxClosed { .. }));
    }
}
