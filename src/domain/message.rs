//! Inputs and messages exchanged with agents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Input to an agent's `process` entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInput {
    /// Action name (e.g. "research", "dispatch")
    pub action: String,

    /// Action-specific data
    #[serde(default)]
    pub data: Value,

    /// Trace the invocation belongs to, propagated to events it publishes
    #[serde(default)]
    pub trace_id: Option<Uuid>,
}

impl AgentInput {
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            action: action.into(),
            data,
            trace_id: None,
        }
    }

    pub fn in_trace(mut self, trace_id: Uuid) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Read a required string field from `data`
    pub fn str_field(&self, field: &str) -> crate::Result<&str> {
        self.data
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                crate::Error::validation(format!(
                    "action '{}' requires string field '{}'",
                    self.action, field
                ))
            })
    }

    /// Deserialize `data` (or one field of it) into a typed value
    pub fn parse<T: serde::de::DeserializeOwned>(&self, field: Option<&str>) -> crate::Result<T> {
        let value = match field {
            Some(name) => self.data.get(name).cloned().unwrap_or(Value::Null),
            None => self.data.clone(),
        };
        serde_json::from_value(value).map_err(|e| {
            crate::Error::validation(format!("invalid data for action '{}': {}", self.action, e))
        })
    }
}

/// An email ready to hand to a mail transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub unsubscribe_url: Option<String>,
}

/// Input to content composition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brief {
    pub topic: String,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub findings: Vec<String>,
}

/// Composed email content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub subject: String,
    pub body: String,
}

/// A message passed between agents via `communicate`/`receive`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Id of the sending agent
    pub sender_id: String,

    /// Requested action, if the message asks the receiver to do something
    #[serde(default)]
    pub action: Option<String>,

    #[serde(default)]
    pub payload: Value,

    #[serde(default)]
    pub trace_id: Option<Uuid>,
}

impl AgentMessage {
    pub fn new(sender_id: impl Into<String>, payload: Value) -> Self {
        Self {
            sender_id: sender_id.into(),
            action: None,
            payload,
            trace_id: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Convert a request-style message into a `process` input
    pub fn into_input(self) -> Option<AgentInput> {
        let action = self.action?;
        Some(AgentInput {
            action,
            data: self.payload,
            trace_id: self.trace_id,
        })
    }
}
