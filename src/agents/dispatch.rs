//! Dispatch agent: admits outbound mail through the rate-limited queue and
//! hands admitted mail to the transport behind the `smtp` breaker.
//!
//! Drafts arrive as `ContentGenerated` events and are kept per topic, so a
//! dispatch step may name a topic instead of carrying the full text.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{actions, Agent, AgentCore, AgentServices, SMTP_SERVICE};
use crate::adapters::MailTransport;
use crate::core::{Admission, ComplianceGate, DispatchQueue};
use crate::domain::{AgentInput, Contact, Draft, Event, EventPayload, OutboundEmail};
use crate::error::{Error, Result};

/// Data accepted by the `dispatch` action
#[derive(Debug, Deserialize)]
struct DispatchRequest {
    contact: Contact,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

pub struct DispatchAgent {
    core: AgentCore,
    queue: Arc<DispatchQueue<OutboundEmail>>,
    gate: Arc<ComplianceGate>,
    transport: Arc<dyn MailTransport>,
    services: AgentServices,
    drafts: RwLock<HashMap<String, Draft>>,
}

impl DispatchAgent {
    pub const ID: &'static str = "dispatch";

    pub fn new(
        queue: Arc<DispatchQueue<OutboundEmail>>,
        gate: Arc<ComplianceGate>,
        transport: Arc<dyn MailTransport>,
        services: AgentServices,
    ) -> Self {
        Self {
            core: AgentCore::new(
                Self::ID,
                "Dispatch",
                [actions::DISPATCH, actions::DRAIN, actions::QUEUE_STATUS],
            ),
            queue,
            gate,
            transport,
            services,
            drafts: RwLock::new(HashMap::new()),
        }
    }

    pub fn queue(&self) -> &Arc<DispatchQueue<OutboundEmail>> {
        &self.queue
    }

    fn draft_for(&self, request: &DispatchRequest) -> Result<Draft> {
        if let (Some(subject), Some(body)) = (&request.subject, &request.body) {
            return Ok(Draft {
                subject: subject.clone(),
                body: body.clone(),
            });
        }

        let topic = request
            .topic
            .as_deref()
            .ok_or_else(|| Error::validation("dispatch requires either subject and body or a topic"))?;

        self.drafts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
            .cloned()
            .ok_or_else(|| Error::validation(format!("no draft generated for topic '{}'", topic)))
    }

    fn compose(&self, contact: &Contact, draft: Draft) -> OutboundEmail {
        let unsubscribe_url = self.gate.unsubscribe_url().map(str::to_string);
        let greeting = match &contact.name {
            Some(name) => format!("Hi {},\n\n", name),
            None => String::new(),
        };
        let mut body = format!("{}{}", greeting, draft.body);
        if let Some(url) = &unsubscribe_url {
            body.push_str(&format!("\n\nTo stop receiving these emails: {}\n", url));
        }

        OutboundEmail {
            to: contact.identifier(),
            subject: draft.subject,
            body,
            unsubscribe_url,
        }
    }

    async fn send(&self, email: &OutboundEmail, trace_id: Option<uuid::Uuid>) -> Result<String> {
        let message_id = self
            .services
            .breakers
            .call_with_retry(SMTP_SERVICE, &self.services.retry, || self.transport.send(email))
            .await?;

        self.gate
            .frequency_policy()
            .record_send(&Contact::new(email.to.clone()));

        info!(to = %email.to, %message_id, transport = self.transport.name(), "Email sent");
        self.services
            .publish(
                EventPayload::EmailSent {
                    recipient: email.to.clone(),
                    subject: email.subject.clone(),
                },
                trace_id,
            )
            .await?;

        Ok(message_id)
    }

    async fn dispatch(&self, input: &AgentInput) -> Result<Value> {
        let request: DispatchRequest = input.parse(None)?;

        let validation = self.gate.validate_contact(&request.contact);
        if let Some(reason) = validation.reason {
            return Err(Error::compliance(format!(
                "refusing to send to {}: {}",
                request.contact.identifier(),
                reason.as_str()
            )));
        }

        let draft = self.draft_for(&request)?;
        let email = self.compose(&request.contact, draft);

        match self.queue.try_send(email) {
            Admission::Sent(email) => {
                let message_id = self.send(&email, input.trace_id).await?;
                Ok(json!({ "status": "sent", "recipient": email.to, "message_id": message_id }))
            }
            Admission::Queued { position } => {
                let recipient = request.contact.identifier();
                self.services
                    .publish(
                        EventPayload::EmailQueued {
                            recipient: recipient.clone(),
                            position,
                        },
                        input.trace_id,
                    )
                    .await?;
                Ok(json!({ "status": "queued", "recipient": recipient, "position": position }))
            }
        }
    }

    /// Send backlog items the current window admits. Failed sends that no
    /// retry strategy recovers go back to the end of the backlog.
    async fn drain(&self, input: &AgentInput) -> Result<Value> {
        let admitted = self.queue.drain();
        let mut sent = 0usize;
        let mut failed = 0usize;

        for email in admitted {
            match self.send(&email, input.trace_id).await {
                Ok(_) => sent += 1,
                Err(e) => {
                    warn!(to = %email.to, error = %e, "Queued send failed");
                    if self.services.report(self.id(), e).await.is_ok() {
                        sent += 1;
                    } else {
                        failed += 1;
                        self.queue.queue(email);
                    }
                }
            }
        }

        self.core.set_state("last_drain_sent", json!(sent));
        Ok(json!({ "sent": sent, "failed": failed, "backlog": self.queue.backlog_len() }))
    }

    fn status(&self) -> Value {
        serde_json::to_value(self.queue.status()).unwrap_or(Value::Null)
    }
}

#[async_trait]
impl Agent for DispatchAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    async fn process(&self, input: AgentInput) -> Result<Value> {
        let result = match input.action.as_str() {
            actions::DISPATCH => self.dispatch(&input).await,
            actions::DRAIN => self.drain(&input).await,
            actions::QUEUE_STATUS => Ok(self.status()),
            other => return Err(self.core.unsupported(other)),
        };
        match result {
            Ok(value) => Ok(value),
            Err(e) => self.services.report(self.id(), e).await,
        }
    }

    async fn handle_event(&self, event: &Event) -> Result<()> {
        match &event.payload {
            EventPayload::ContentGenerated {
                topic,
                subject,
                body,
            } => {
                self.drafts.write().unwrap_or_else(|e| e.into_inner()).insert(
                    topic.clone(),
                    Draft {
                        subject: subject.clone(),
                        body: body.clone(),
                    },
                );
                self.core.set_state("last_draft_topic", json!(topic));
                Ok(())
            }
            _ => {
                self.core.emit(super::AgentSignal::UnhandledEvent {
                    agent_id: self.id().to_string(),
                    event_type: event.event_type,
                });
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::LogTransport;
    use crate::agents::test_services;
    use crate::core::RateLimitConfig;
    use std::time::Duration;

    fn agent(max_per_window: u32) -> (DispatchAgent, Arc<LogTransport>) {
        let transport = Arc::new(LogTransport::new());
        let queue = Arc::new(DispatchQueue::new(RateLimitConfig {
            max_per_window,
            window_duration: Duration::from_secs(3600),
        }));
        let gate = Arc::new(ComplianceGate::default().with_unsubscribe_url("https://example.com/u"));
        let agent = DispatchAgent::new(queue, gate, transport.clone(), test_services());
        (agent, transport)
    }

    fn request(email: &str) -> AgentInput {
        AgentInput::new(
            actions::DISPATCH,
            json!({ "contact": { "email": email }, "subject": "Hello", "body": "Body" }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_sends_then_queues() {
        let (agent, transport) = agent(1);

        let first = agent.process(request("a@x.com")).await.unwrap();
        assert_eq!(first["status"], "sent");

        let second = agent.process(request("b@x.com")).await.unwrap();
        assert_eq!(second["status"], "queued");
        assert_eq!(second["position"], 1);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("https://example.com/u"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_after_window_reset() {
        let (agent, transport) = agent(1);
        agent.process(request("a@x.com")).await.unwrap();
        agent.process(request("b@x.com")).await.unwrap();

        tokio::time::advance(Duration::from_secs(3600)).await;
        let result = agent
            .process(AgentInput::new(actions::DRAIN, Value::Null))
            .await
            .unwrap();

        assert_eq!(result, json!({ "sent": 1, "failed": 0, "backlog": 0 }));
        assert_eq!(transport.sent()[1].to, "b@x.com");
    }

    #[tokio::test]
    async fn test_refuses_opted_out_contact() {
        let (agent, transport) = agent(5);
        agent.gate.register_opt_out("a@x.com");

        let err = agent.process(request("a@x.com")).await.unwrap_err();
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::Compliance));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_uses_draft_from_event() {
        let (agent, transport) = agent(5);
        let event = Event::new(
            EventPayload::ContentGenerated {
                topic: "hiking".to_string(),
                subject: "Trail tips".to_string(),
                body: "Wear boots".to_string(),
            },
            agent.services.bus.metadata(uuid::Uuid::new_v4()),
        );
        agent.handle_event(&event).await.unwrap();

        agent
            .process(AgentInput::new(
                actions::DISPATCH,
                json!({ "contact": { "email": "a@x.com", "name": "Ana" }, "topic": "hiking" }),
            ))
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent[0].subject, "Trail tips");
        assert!(sent[0].body.starts_with("Hi Ana,"));
    }

    #[tokio::test]
    async fn test_missing_draft_is_validation_error() {
        let (agent, _) = agent(5);
        let err = agent
            .process(AgentInput::new(
                actions::DISPATCH,
                json!({ "contact": { "email": "a@x.com" }, "topic": "unknown" }),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::Validation));
    }
}
