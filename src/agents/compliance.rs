//! Compliance agent: the gate every contact passes before dispatch.
//!
//! `check-compliance` fails with a `Compliance` error when the contact is
//! not a valid send target or any compliance check does not hold, so a
//! workflow stops before its dispatch step. `ContactOptedOut` events are
//! applied to the opt-out registry.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use super::{actions, Agent, AgentCore, AgentServices};
use crate::core::ComplianceGate;
use crate::domain::{AgentInput, AgentMessage, Contact, Event, EventPayload};
use crate::error::{ClassifiedError, ErrorKind, Result};

pub struct ComplianceAgent {
    core: AgentCore,
    gate: Arc<ComplianceGate>,
    services: AgentServices,
}

impl ComplianceAgent {
    pub const ID: &'static str = "compliance";

    pub fn new(gate: Arc<ComplianceGate>, services: AgentServices) -> Self {
        Self {
            core: AgentCore::new(
                Self::ID,
                "Compliance",
                [
                    actions::CHECK_COMPLIANCE,
                    actions::VALIDATE_CONTACT,
                    actions::REGISTER_OPT_OUT,
                ],
            ),
            gate,
            services,
        }
    }

    pub fn gate(&self) -> &Arc<ComplianceGate> {
        &self.gate
    }

    async fn check(&self, input: &AgentInput) -> Result<Value> {
        let contact: Contact = input.parse(Some("contact"))?;

        let validation = self.gate.validate_contact(&contact);
        if let Some(reason) = validation.reason {
            warn!(contact = %contact.identifier(), ?reason, "Contact is not a valid send target");
            return Err(ClassifiedError::new(
                ErrorKind::Compliance,
                format!("contact {} is not a valid send target", contact.identifier()),
            )
            .with_context("reason", reason.as_str())
            .into());
        }

        let report = self.gate.check_compliance(&contact);
        self.services
            .publish(
                EventPayload::ComplianceChecked {
                    contact: contact.identifier(),
                    is_compliant: report.is_compliant,
                },
                input.trace_id,
            )
            .await?;

        if !report.is_compliant {
            let d = &report.details;
            return Err(ClassifiedError::new(
                ErrorKind::Compliance,
                format!("contact {} failed compliance checks", contact.identifier()),
            )
            .with_context("max_frequency_met", d.max_frequency_met.to_string())
            .with_context("opt_out_mechanism_present", d.opt_out_mechanism_present.to_string())
            .with_context("personal_data_protected", d.personal_data_protected.to_string())
            .into());
        }

        self.core.set_state("last_checked", json!(contact.identifier()));
        Ok(serde_json::to_value(report).unwrap_or(Value::Null))
    }

    fn validate(&self, input: &AgentInput) -> Result<Value> {
        let contact: Contact = input.parse(Some("contact"))?;
        Ok(serde_json::to_value(self.gate.validate_contact(&contact)).unwrap_or(Value::Null))
    }

    fn register_opt_out(&self, input: &AgentInput) -> Result<Value> {
        let identifier = input.str_field("contact")?;
        let status = self.gate.register_opt_out(identifier);
        self.core
            .set_state("opt_outs", json!(self.gate.opt_out_count()));
        Ok(json!({ "contact": identifier, "status": status }))
    }
}

#[async_trait]
impl Agent for ComplianceAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    async fn process(&self, input: AgentInput) -> Result<Value> {
        let result = match input.action.as_str() {
            actions::CHECK_COMPLIANCE => self.check(&input).await,
            actions::VALIDATE_CONTACT => self.validate(&input),
            actions::REGISTER_OPT_OUT => self.register_opt_out(&input),
            other => return Err(self.core.unsupported(other)),
        };
        match result {
            Ok(value) => Ok(value),
            Err(e) => self.services.report(self.id(), e).await,
        }
    }

    async fn handle_event(&self, event: &Event) -> Result<()> {
        match &event.payload {
            EventPayload::ContactOptedOut { contact } => {
                self.gate.register_opt_out(contact);
                self.core
                    .set_state("opt_outs", json!(self.gate.opt_out_count()));
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

    /// Messages naming an action are run as that action
    async fn receive(&self, message: AgentMessage) -> Result<Value> {
        let sender_id = message.sender_id.clone();
        match message.into_input() {
            Some(input) => self.process(input).await,
            None => Ok(json!({ "status": "received", "sender_id": sender_id })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_services;
    use crate::domain::EventMetadata;
    use crate::error::Error;
    use uuid::Uuid;

    fn agent() -> ComplianceAgent {
        let gate = ComplianceGate::default().with_unsubscribe_url("https://example.com/u");
        ComplianceAgent::new(Arc::new(gate), test_services())
    }

    #[tokio::test]
    async fn test_check_passes_for_consenting_contact() {
        let agent = agent();
        let result = agent
            .process(AgentInput::new(
                actions::CHECK_COMPLIANCE,
                json!({ "contact": { "email": "a@x.com" } }),
            ))
            .await
            .unwrap();
        assert_eq!(result["is_compliant"], json!(true));
    }

    #[tokio::test]
    async fn test_check_fails_for_opted_out_contact() {
        let agent = agent();
        agent
            .process(AgentInput::new(actions::REGISTER_OPT_OUT, json!({ "contact": "a@x.com" })))
            .await
            .unwrap();

        let err = agent
            .process(AgentInput::new(
                actions::CHECK_COMPLIANCE,
                json!({ "contact": { "email": "A@x.com" } }),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Compliance));
        assert_eq!(
            err.classified().unwrap().context.get("reason").map(String::as_str),
            Some("opted_out")
        );
    }

    #[tokio::test]
    async fn test_check_fails_without_consent() {
        let agent = agent();
        let err = agent
            .process(AgentInput::new(
                actions::CHECK_COMPLIANCE,
                json!({ "contact": { "email": "a@x.com", "consent": false } }),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Classified(ref e) if e.kind == ErrorKind::Compliance));
    }

    #[tokio::test]
    async fn test_opted_out_event_registers() {
        let agent = agent();
        let event = Event::new(
            EventPayload::ContactOptedOut {
                contact: "b@x.com".to_string(),
            },
            EventMetadata {
                trace_id: Uuid::new_v4(),
                service_name: "outreach".to_string(),
                environment: "test".to_string(),
            },
        );
        agent.handle_event(&event).await.unwrap();
        assert!(agent.gate().is_opted_out("b@x.com"));
    }

    #[tokio::test]
    async fn test_receive_routes_actions() {
        let agent = agent();
        let reply = agent
            .receive(
                AgentMessage::new("dispatch", json!({ "contact": { "email": "nobody" } }))
                    .with_action(actions::VALIDATE_CONTACT),
            )
            .await
            .unwrap();
        assert_eq!(reply, json!({ "is_valid": false, "reason": "invalid_email" }));
    }
}
