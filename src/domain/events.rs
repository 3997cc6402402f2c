//! Event types for the in-process event bus.
//!
//! Events are immutable once published. Each [`EventType`] has exactly one
//! [`EventPayload`] variant, so the payload shape is fixed by the type.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::contact::is_valid_email;
use crate::error::{Error, Result, Severity};

/// A single published event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// Type of event (always matches the payload variant)
    pub event_type: EventType,

    /// When the event was published
    pub timestamp: DateTime<Utc>,

    /// Typed payload
    pub payload: EventPayload,

    /// Correlation and origin
    pub metadata: EventMetadata,
}

impl Event {
    /// Create an event stamped with the current time
    pub fn new(payload: EventPayload, metadata: EventMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: payload.event_type(),
            timestamp: Utc::now(),
            payload,
            metadata,
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.metadata.trace_id
    }

    /// Check the metadata shape and the payload fields
    pub fn validate(&self) -> Result<()> {
        if self.event_type != self.payload.event_type() {
            return Err(Error::validation(format!(
                "event type '{}' does not match payload '{}'",
                self.event_type,
                self.payload.event_type()
            )));
        }
        self.metadata.validate()?;
        self.payload.validate()
    }
}

/// Metadata attached to every event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub trace_id: Uuid,
    pub service_name: String,
    pub environment: String,
}

impl EventMetadata {
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(Error::validation("event metadata is missing service_name"));
        }
        if self.environment.trim().is_empty() {
            return Err(Error::validation("event metadata is missing environment"));
        }
        Ok(())
    }
}

/// The closed set of event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    AgentInitialized,
    AgentError,
    ResearchCompleted,
    ContentGenerated,
    ComplianceChecked,
    ContactOptedOut,
    EmailQueued,
    EmailSent,
    AffiliateConversion,
    CircuitOpened,
    CircuitClosed,
    SystemAlert,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowStarted => "workflow_started",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed => "workflow_failed",
            Self::AgentInitialized => "agent_initialized",
            Self::AgentError => "agent_error",
            Self::ResearchCompleted => "research_completed",
            Self::ContentGenerated => "content_generated",
            Self::ComplianceChecked => "compliance_checked",
            Self::ContactOptedOut => "contact_opted_out",
            Self::EmailQueued => "email_queued",
            Self::EmailSent => "email_sent",
            Self::AffiliateConversion => "affiliate_conversion",
            Self::CircuitOpened => "circuit_opened",
            Self::CircuitClosed => "circuit_closed",
            Self::SystemAlert => "system_alert",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload for each event type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    WorkflowStarted {
        workflow: String,
        steps: usize,
    },
    WorkflowCompleted {
        workflow: String,
        steps: usize,
    },
    WorkflowFailed {
        workflow: String,
        step: usize,
        agent_id: String,
        action: String,
        error: String,
    },
    AgentInitialized {
        agent_id: String,
        name: String,
        #[serde(default)]
        capabilities: Vec<String>,
    },
    AgentError {
        #[serde(default)]
        agent_id: Option<String>,
        code: String,
        message: String,
        severity: Severity,
    },
    ResearchCompleted {
        topic: String,
        #[serde(default)]
        findings: Vec<String>,
    },
    ContentGenerated {
        topic: String,
        subject: String,
        #[serde(default)]
        body: String,
    },
    ComplianceChecked {
        contact: String,
        is_compliant: bool,
    },
    ContactOptedOut {
        contact: String,
    },
    EmailQueued {
        recipient: String,
        position: usize,
    },
    EmailSent {
        recipient: String,
        subject: String,
    },
    AffiliateConversion {
        program: String,
        amount: f64,
    },
    CircuitOpened {
        service: String,
        failures: u32,
    },
    CircuitClosed {
        service: String,
    },
    SystemAlert {
        code: String,
        message: String,
        severity: Severity,
    },
}

impl EventPayload {
    /// The event type this payload belongs to
    pub fn event_type(&self) -> EventType {
        match self {
            Self::WorkflowStarted { .. } => EventType::WorkflowStarted,
            Self::WorkflowCompleted { .. } => EventType::WorkflowCompleted,
            Self::WorkflowFailed { .. } => EventType::WorkflowFailed,
            Self::AgentInitialized { .. } => EventType::AgentInitialized,
            Self::AgentError { .. } => EventType::AgentError,
            Self::ResearchCompleted { .. } => EventType::ResearchCompleted,
            Self::ContentGenerated { .. } => EventType::ContentGenerated,
            Self::ComplianceChecked { .. } => EventType::ComplianceChecked,
            Self::ContactOptedOut { .. } => EventType::ContactOptedOut,
            Self::EmailQueued { .. } => EventType::EmailQueued,
            Self::EmailSent { .. } => EventType::EmailSent,
            Self::AffiliateConversion { .. } => EventType::AffiliateConversion,
            Self::CircuitOpened { .. } => EventType::CircuitOpened,
            Self::CircuitClosed { .. } => EventType::CircuitClosed,
            Self::SystemAlert { .. } => EventType::SystemAlert,
        }
    }

    /// Build a typed payload from an untyped JSON object.
    ///
    /// The object must have exactly the shape of the variant for `event_type`.
    pub fn from_json(event_type: EventType, data: serde_json::Value) -> Result<Self> {
        let tagged = serde_json::json!({ "type": event_type, "data": data });
        serde_json::from_value(tagged).map_err(|e| {
            Error::validation(format!("invalid payload for '{}': {}", event_type, e))
        })
    }

    /// Field-level checks that the type system cannot express
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::WorkflowStarted { workflow, .. }
            | Self::WorkflowCompleted { workflow, .. } => require("workflow", workflow),
            Self::WorkflowFailed {
                workflow,
                agent_id,
                action,
                ..
            } => {
                require("workflow", workflow)?;
                require("agent_id", agent_id)?;
                require("action", action)
            }
            Self::AgentInitialized { agent_id, name, .. } => {
                require("agent_id", agent_id)?;
                require("name", name)
            }
            Self::AgentError { code, message, .. } | Self::SystemAlert { code, message, .. } => {
                require("code", code)?;
                require("message", message)
            }
            Self::ResearchCompleted { topic, .. } => require("topic", topic),
            Self::ContentGenerated { topic, subject, .. } => {
                require("topic", topic)?;
                require("subject", subject)
            }
            Self::ComplianceChecked { contact, .. } | Self::ContactOptedOut { contact } => {
                require_email("contact", contact)
            }
            Self::EmailQueued {
                recipient,
                position,
            } => {
                require_email("recipient", recipient)?;
                if *position == 0 {
                    return Err(Error::validation("queue positions start at 1"));
                }
                Ok(())
            }
            Self::EmailSent { recipient, .. } => require_email("recipient", recipient),
            Self::AffiliateConversion { program, amount } => {
                require("program", program)?;
                if !amount.is_finite() || *amount < 0.0 {
                    return Err(Error::validation(format!(
                        "conversion amount must be a non-negative number, got {}",
                        amount
                    )));
                }
                Ok(())
            }
            Self::CircuitOpened { service, .. } | Self::CircuitClosed { service } => {
                require("service", service)
            }
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("payload field '{}' is empty", field)));
    }
    Ok(())
}

fn require_email(field: &str, value: &str) -> Result<()> {
    if !is_valid_email(value) {
        return Err(Error::validation(format!(
            "payload field '{}' is not an email address: '{}'",
            field, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn metadata() -> EventMetadata {
        EventMetadata {
            trace_id: Uuid::new_v4(),
            service_name: "outreach".to_string(),
            environment: "test".to_string(),
        }
    }

    #[test]
    fn test_event_type_follows_payload() {
        let event = Event::new(
            EventPayload::EmailSent {
                recipient: "a@x.com".to_string(),
                subject: "Hello".to_string(),
            },
            metadata(),
        );
        assert_eq!(event.event_type, EventType::EmailSent);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::new(
            EventPayload::ComplianceChecked {
                contact: "a@x.com".to_string(),
                is_compliant: true,
            },
            metadata(),
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "compliance_checked");
        assert_eq!(json["payload"]["type"], "compliance_checked");
        assert_eq!(json["payload"]["data"]["is_compliant"], true);

        let parsed: Event = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_from_json_checks_shape() {
        let payload = EventPayload::from_json(
            EventType::ContactOptedOut,
            serde_json::json!({ "contact": "a@x.com" }),
        )
        .unwrap();
        assert_eq!(payload.event_type(), EventType::ContactOptedOut);

        let err = EventPayload::from_json(
            EventType::EmailQueued,
            serde_json::json!({ "recipient": "a@x.com" }),
        )
        .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Validation));
    }

    #[test]
    fn test_payload_field_validation() {
        let bad_email = EventPayload::ContactOptedOut {
            contact: "not-an-email".to_string(),
        };
        assert!(bad_email.validate().is_err());

        let negative = EventPayload::AffiliateConversion {
            program: "books".to_string(),
            amount: -1.0,
        };
        assert!(negative.validate().is_err());

        let empty_topic = EventPayload::ResearchCompleted {
            topic: "  ".to_string(),
            findings: vec![],
        };
        assert!(empty_topic.validate().is_err());
    }

    #[test]
    fn test_metadata_validation() {
        let mut event = Event::new(
            EventPayload::CircuitClosed {
                service: "smtp".to_string(),
            },
            metadata(),
        );
        event.metadata.environment = String::new();
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_mismatched_type_rejected() {
        let mut event = Event::new(
            EventPayload::CircuitClosed {
                service: "smtp".to_string(),
            },
            metadata(),
        );
        event.event_type = EventType::CircuitOpened;
        assert!(event.validate().is_err());
    }
}
