//! Content generation agent: turns a topic brief into an email draft.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{actions, Agent, AgentCore, AgentServices, AI_SERVICE};
use crate::adapters::ContentModel;
use crate::domain::{AgentInput, Brief, EventPayload};
use crate::error::{Error, Result};

pub struct ContentAgent {
    core: AgentCore,
    model: Arc<dyn ContentModel>,
    services: AgentServices,
}

impl ContentAgent {
    pub const ID: &'static str = "content";

    pub fn new(model: Arc<dyn ContentModel>, services: AgentServices) -> Self {
        Self {
            core: AgentCore::new(Self::ID, "Content Generation", [actions::GENERATE_CONTENT]),
            model,
            services,
        }
    }

    async fn generate(&self, input: &AgentInput) -> Result<Value> {
        let brief: Brief = input.parse(None)?;
        if brief.topic.trim().is_empty() {
            return Err(Error::validation("generate-content requires a topic"));
        }

        let draft = self
            .services
            .breakers
            .call_with_retry(AI_SERVICE, &self.services.retry, || self.model.compose(&brief))
            .await?;

        info!(topic = %brief.topic, subject = %draft.subject, "Content generated");
        self.core.set_state("last_subject", json!(draft.subject));

        self.services
            .publish(
                EventPayload::ContentGenerated {
                    topic: brief.topic.clone(),
                    subject: draft.subject.clone(),
                    body: draft.body.clone(),
                },
                input.trace_id,
            )
            .await?;

        Ok(json!({ "topic": brief.topic, "subject": draft.subject, "body": draft.body }))
    }
}

#[async_trait]
impl Agent for ContentAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    async fn process(&self, input: AgentInput) -> Result<Value> {
        let result = match input.action.as_str() {
            actions::GENERATE_CONTENT => self.generate(&input).await,
            other => return Err(self.core.unsupported(other)),
        };
        match result {
            Ok(value) => Ok(value),
            Err(e) => self.services.report(self.id(), e).await,
        }
    }
}
