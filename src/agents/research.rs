//! Research agent: gathers findings on a topic from the content model.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{actions, Agent, AgentCore, AgentServices, AI_SERVICE};
use crate::adapters::ContentModel;
use crate::domain::{AgentInput, EventPayload};
use crate::error::Result;

pub struct ResearchAgent {
    core: AgentCore,
    model: Arc<dyn ContentModel>,
    services: AgentServices,
}

impl ResearchAgent {
    pub const ID: &'static str = "research";

    pub fn new(model: Arc<dyn ContentModel>, services: AgentServices) -> Self {
        Self {
            core: AgentCore::new(Self::ID, "Research", [actions::RESEARCH]),
            model,
            services,
        }
    }

    async fn research(&self, input: &AgentInput) -> Result<Value> {
        let topic = input.str_field("topic")?;

        let findings = self
            .services
            .breakers
            .call_with_retry(AI_SERVICE, &self.services.retry, || self.model.research(topic))
            .await?;

        info!(topic, findings = findings.len(), model = self.model.name(), "Research completed");
        self.core.set_state("last_topic", json!(topic));

        self.services
            .publish(
                EventPayload::ResearchCompleted {
                    topic: topic.to_string(),
                    findings: findings.clone(),
                },
                input.trace_id,
            )
            .await?;

        Ok(json!({ "topic": topic, "findings": findings }))
    }
}

#[async_trait]
impl Agent for ResearchAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    async fn process(&self, input: AgentInput) -> Result<Value> {
        let result = match input.action.as_str() {
            actions::RESEARCH => self.research(&input).await,
            other => return Err(self.core.unsupported(other)),
        };
        match result {
            Ok(value) => Ok(value),
            Err(e) => self.services.report(self.id(), e).await,
        }
    }
}
