//! Workflow definitions and loading.
//!
//! A workflow is an ordered list of agent invocations run as one
//! all-or-nothing pipeline. Each step's payload is fixed by the definition;
//! step outputs are collected but never threaded into later steps.
//!
//! Workflows are defined in YAML:
//!
//! ```yaml
//! name: spring-campaign
//! steps:
//!   - agent_id: compliance
//!     action: check-compliance
//!     payload: { contact: { email: a@example.com } }
//!   - agent_id: dispatch
//!     action: dispatch
//!     payload: { contact: { email: a@example.com }, topic: hiking }
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agents::{actions, ComplianceAgent, ContentAgent, DispatchAgent, ResearchAgent};
use crate::domain::Contact;
use crate::error::{Error, Result};

/// A complete workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow name (used in events and logs)
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Steps, run strictly in order
    pub steps: Vec<WorkflowStep>,
}

/// A single agent invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Registered id of the target agent
    pub agent_id: String,

    /// Action passed to the agent's `process`
    pub action: String,

    #[serde(default)]
    pub payload: Value,
}

impl WorkflowStep {
    pub fn new(agent_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self {
            agent_id: agent_id.into(),
            action: action.into(),
            payload,
        }
    }
}

impl Workflow {
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps,
        }
    }

    /// Load a workflow from a YAML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a workflow from YAML content
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse workflow YAML")
    }

    /// The four-stage research, content, compliance, dispatch pipeline
    pub fn outreach(topic: &str, contact: &Contact) -> Self {
        let contact = json!(contact);
        Self {
            name: "outreach".to_string(),
            description: format!("Research, write and send an email about {}", topic),
            steps: vec![
                WorkflowStep::new(ResearchAgent::ID, actions::RESEARCH, json!({ "topic": topic })),
                WorkflowStep::new(
                    ContentAgent::ID,
                    actions::GENERATE_CONTENT,
                    json!({ "topic": topic }),
                ),
                WorkflowStep::new(
                    ComplianceAgent::ID,
                    actions::CHECK_COMPLIANCE,
                    json!({ "contact": contact }),
                ),
                WorkflowStep::new(
                    DispatchAgent::ID,
                    actions::DISPATCH,
                    json!({ "contact": contact, "topic": topic }),
                ),
            ],
        }
    }

    /// Check the definition before any step runs.
    ///
    /// Every `dispatch` step must come after a `check-compliance` step.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("workflow name cannot be empty"));
        }
        if self.steps.is_empty() {
            return Err(Error::validation(format!(
                "workflow '{}' must have at least one step",
                self.name
            )));
        }

        let mut compliance_checked = false;
        for (i, step) in self.steps.iter().enumerate() {
            if step.agent_id.trim().is_empty() || step.action.trim().is_empty() {
                return Err(Error::validation(format!(
                    "step {} of workflow '{}' needs an agent_id and an action",
                    i, self.name
                )));
            }

            match step.action.as_str() {
                actions::CHECK_COMPLIANCE => compliance_checked = true,
                actions::DISPATCH if !compliance_checked => {
                    return Err(Error::validation(format!(
                        "step {} of workflow '{}' dispatches before any compliance check",
                        i, self.name
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outreach_pipeline_is_valid() {
        let workflow = Workflow::outreach("hiking", &Contact::new("a@x.com"));
        assert_eq!(workflow.steps.len(), 4);
        assert!(workflow.validate().is_ok());
        assert_eq!(workflow.steps[3].payload["contact"]["email"], "a@x.com");
    }

    #[test]
    fn test_dispatch_before_compliance_rejected() {
        let workflow = Workflow::new(
            "bad",
            vec![
                WorkflowStep::new("dispatch", actions::DISPATCH, Value::Null),
                WorkflowStep::new("compliance", actions::CHECK_COMPLIANCE, Value::Null),
            ],
        );
        let err = workflow.validate().unwrap_err();
        assert!(err.to_string().contains("before any compliance check"));
    }

    #[test]
    fn test_empty_workflow_rejected() {
        assert!(Workflow::new("empty", vec![]).validate().is_err());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
name: test-workflow
description: A test
steps:
  - agent_id: research
    action: research
    payload:
      topic: rust
  - agent_id: email-config
    action: get-config
"#;
        let workflow = Workflow::from_yaml(yaml).unwrap();
        assert_eq!(workflow.name, "test-workflow");
        assert_eq!(workflow.steps[0].payload, json!({ "topic": "rust" }));
        assert_eq!(workflow.steps[1].payload, Value::Null);
    }
}
