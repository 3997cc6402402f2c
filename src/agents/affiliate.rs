//! Affiliate agent: tracks affiliate programs, builds tracking links and
//! records conversions.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::{Agent, AgentCore, AgentServices};
use crate::domain::{AgentInput, EventPayload};
use crate::error::{Error, Result};

pub const REGISTER_PROGRAM: &str = "register-program";
pub const GENERATE_LINK: &str = "generate-link";
pub const RECORD_CONVERSION: &str = "record-conversion";
pub const LIST_PROGRAMS: &str = "list-programs";

/// A registered affiliate program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffiliateProgram {
    pub name: String,
    pub base_url: String,

    /// Fraction of each conversion paid out, in `[0, 1]`
    #[serde(default)]
    pub commission_rate: f64,

    #[serde(default)]
    pub conversions: u64,

    #[serde(default)]
    pub revenue: f64,
}

#[derive(Debug, Deserialize)]
struct ConversionRequest {
    program: String,
    amount: f64,
}

pub struct AffiliateAgent {
    core: AgentCore,
    services: AgentServices,
    programs: RwLock<BTreeMap<String, AffiliateProgram>>,
}

impl AffiliateAgent {
    pub const ID: &'static str = "affiliate";

    pub fn new(services: AgentServices) -> Self {
        Self {
            core: AgentCore::new(
                Self::ID,
                "Affiliate",
                [REGISTER_PROGRAM, GENERATE_LINK, RECORD_CONVERSION, LIST_PROGRAMS],
            ),
            services,
            programs: RwLock::new(BTreeMap::new()),
        }
    }

    fn program(&self, name: &str) -> Result<AffiliateProgram> {
        self.programs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| Error::validation(format!("unknown affiliate program '{}'", name)))
    }

    fn register(&self, input: &AgentInput) -> Result<Value> {
        let mut program: AffiliateProgram = input.parse(None)?;
        if program.name.trim().is_empty() {
            return Err(Error::validation("affiliate program name is empty"));
        }
        parse_base_url(&program.base_url)?;
        if !(0.0..=1.0).contains(&program.commission_rate) {
            return Err(Error::validation("commission_rate must be between 0 and 1"));
        }
        program.conversions = 0;
        program.revenue = 0.0;

        let count = {
            let mut programs = self.programs.write().unwrap_or_else(|e| e.into_inner());
            programs.insert(program.name.clone(), program.clone());
            programs.len()
        };
        self.core.set_state("programs", json!(count));
        info!(program = %program.name, "Affiliate program registered");

        Ok(serde_json::to_value(program).unwrap_or(Value::Null))
    }

    fn generate_link(&self, input: &AgentInput) -> Result<Value> {
        let program = self.program(input.str_field("program")?)?;
        let tracking_id = Uuid::new_v4().simple().to_string();

        let mut link = parse_base_url(&program.base_url)?;
        {
            let mut query = link.query_pairs_mut();
            query.append_pair("ref", &tracking_id);
            if let Ok(campaign) = input.str_field("campaign") {
                query.append_pair("campaign", campaign);
            }
        }

        Ok(json!({ "program": program.name, "link": link.as_str(), "tracking_id": tracking_id }))
    }

    async fn record_conversion(&self, input: &AgentInput) -> Result<Value> {
        let request: ConversionRequest = input.parse(None)?;
        if !request.amount.is_finite() || request.amount < 0.0 {
            return Err(Error::validation("conversion amount must be a non-negative number"));
        }

        let program = {
            let mut programs = self.programs.write().unwrap_or_else(|e| e.into_inner());
            let program = programs.get_mut(&request.program).ok_or_else(|| {
                Error::validation(format!("unknown affiliate program '{}'", request.program))
            })?;
            program.conversions += 1;
            program.revenue += request.amount;
            program.clone()
        };

        self.services
            .publish(
                EventPayload::AffiliateConversion {
                    program: program.name.clone(),
                    amount: request.amount,
                },
                input.trace_id,
            )
            .await?;

        Ok(json!({
            "program": program.name,
            "commission": request.amount * program.commission_rate,
            "conversions": program.conversions,
            "revenue": program.revenue,
        }))
    }

    fn list(&self) -> Value {
        let programs: Vec<AffiliateProgram> = self
            .programs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        serde_json::to_value(programs).unwrap_or(Value::Null)
    }
}

fn parse_base_url(base_url: &str) -> Result<Url> {
    match Url::parse(base_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
        _ => Err(Error::validation(format!(
            "affiliate base_url must be an http(s) URL, got '{}'",
            base_url
        ))),
    }
}

#[async_trait]
impl Agent for AffiliateAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    async fn process(&self, input: AgentInput) -> Result<Value> {
        let result = match input.action.as_str() {
            REGISTER_PROGRAM => self.register(&input),
            GENERATE_LINK => self.generate_link(&input),
            RECORD_CONVERSION => self.record_conversion(&input).await,
            LIST_PROGRAMS => Ok(self.list()),
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

    async fn with_program() -> AffiliateAgent {
        let agent = AffiliateAgent::new(test_services());
        agent
            .process(AgentInput::new(
                REGISTER_PROGRAM,
                json!({ "name": "books", "base_url": "https://shop.example.com/p?id=1", "commission_rate": 0.5 }),
            ))
            .await
            .unwrap();
        agent
    }

    #[tokio::test]
    async fn test_generate_link_appends_ref() {
        let agent = with_program().await;
        let result = agent
            .process(AgentInput::new(
                GENERATE_LINK,
                json!({ "program": "books", "campaign": "spring" }),
            ))
            .await
            .unwrap();

        let link = result["link"].as_str().unwrap();
        assert!(link.starts_with("https://shop.example.com/p?id=1&ref="));
        assert!(link.ends_with("&campaign=spring"));
    }

    #[tokio::test]
    async fn test_campaign_is_percent_encoded() {
        let agent = with_program().await;
        let result = agent
            .process(AgentInput::new(
                GENERATE_LINK,
                json!({ "program": "books", "campaign": "spring sale&x=1#top" }),
            ))
            .await
            .unwrap();

        let link = Url::parse(result["link"].as_str().unwrap()).unwrap();
        assert_eq!(link.fragment(), None);
        let pairs: Vec<(String, String)> = link.query_pairs().into_owned().collect();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0], ("id".to_string(), "1".to_string()));
        assert_eq!(pairs[1].0, "ref");
        assert_eq!(pairs[1].1, result["tracking_id"].as_str().unwrap());
        assert_eq!(
            pairs[2],
            ("campaign".to_string(), "spring sale&x=1#top".to_string())
        );
    }

    #[tokio::test]
    async fn test_record_conversion_accumulates() {
        let agent = with_program().await;
        let input = AgentInput::new(RECORD_CONVERSION, json!({ "program": "books", "amount": 50.0 }));
        agent.process(input.clone()).await.unwrap();
        let result = agent.process(input).await.unwrap();

        assert_eq!(result["conversions"], 2);
        assert_eq!(result["revenue"], 100.0);
        assert_eq!(result["commission"], 25.0);
    }

    #[tokio::test]
    async fn test_rejects_bad_program() {
        let agent = AffiliateAgent::new(test_services());
        let err = agent
            .process(AgentInput::new(
                REGISTER_PROGRAM,
                json!({ "name": "x", "base_url": "ftp://nope" }),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::Validation));

        let err = agent
            .process(AgentInput::new(RECORD_CONVERSION, json!({ "program": "x", "amount": 1.0 })))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::Validation));
    }
}
