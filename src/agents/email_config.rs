//! Email settings agent: holds sender identity used for outbound mail.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Agent, AgentCore, AgentServices};
use crate::domain::{is_valid_email, AgentInput};
use crate::error::{Error, Result};

pub const CONFIGURE: &str = "configure";
pub const GET_CONFIG: &str = "get-config";

const CONFIG_KEY: &str = "email_settings";

/// Sender identity for outbound mail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSettings {
    pub from_address: String,

    #[serde(default)]
    pub from_name: Option<String>,

    #[serde(default)]
    pub reply_to: Option<String>,
}

impl EmailSettings {
    fn validate(&self) -> Result<()> {
        if !is_valid_email(&self.from_address) {
            return Err(Error::validation(format!(
                "from_address '{}' is not a valid email",
                self.from_address
            )));
        }
        if let Some(reply_to) = &self.reply_to {
            if !is_valid_email(reply_to) {
                return Err(Error::validation(format!(
                    "reply_to '{}' is not a valid email",
                    reply_to
                )));
            }
        }
        Ok(())
    }
}

pub struct EmailConfigAgent {
    core: AgentCore,
    services: AgentServices,
}

impl EmailConfigAgent {
    pub const ID: &'static str = "email-config";

    pub fn new(services: AgentServices) -> Self {
        Self {
            core: AgentCore::new(Self::ID, "Email Configuration", [CONFIGURE, GET_CONFIG]),
            services,
        }
    }

    fn configure(&self, input: &AgentInput) -> Result<Value> {
        let settings: EmailSettings = input.parse(None)?;
        settings.validate()?;

        let value = serde_json::to_value(&settings).unwrap_or(Value::Null);
        self.core.set_state(CONFIG_KEY, value.clone());
        Ok(json!({ "status": "configured", "settings": value }))
    }

    fn get_config(&self) -> Result<Value> {
        self.core
            .get_state(CONFIG_KEY)
            .ok_or_else(|| Error::validation("email settings have not been configured"))
    }
}

#[async_trait]
impl Agent for EmailConfigAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    async fn process(&self, input: AgentInput) -> Result<Value> {
        let result = match input.action.as_str() {
            CONFIGURE => self.configure(&input),
            GET_CONFIG => self.get_config(),
            other => return Err(self.core.unsupported(other)),
        };
        match result {
            Ok(value) => Ok(value),
            Err(e) => self.services.report(self.id(), e).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_services;

    #[tokio::test]
    async fn test_configure_then_get() {
        let agent = EmailConfigAgent::new(test_services());
        assert!(agent.process(AgentInput::new(GET_CONFIG, Value::Null)).await.is_err());

        agent
            .process(AgentInput::new(
                CONFIGURE,
                json!({ "from_address": "team@example.com", "from_name": "Team" }),
            ))
            .await
            .unwrap();

        let settings = agent
            .process(AgentInput::new(GET_CONFIG, Value::Null))
            .await
            .unwrap();
        assert_eq!(settings["from_address"], "team@example.com");
        assert_eq!(settings["reply_to"], Value::Null);
    }

    #[tokio::test]
    async fn test_rejects_invalid_sender() {
        let agent = EmailConfigAgent::new(test_services());
        let err = agent
            .process(AgentInput::new(CONFIGURE, json!({ "from_address": "nope" })))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::Validation));
    }
}
