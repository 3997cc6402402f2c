//! Offline content model producing deterministic text.
//!
//! Used by the CLI and tests in place of a hosted AI provider.

use async_trait::async_trait;

use super::ContentModel;
use crate::domain::{Brief, Draft};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct TemplateModel {
    /// Signature appended to every composed body
    signature: Option<String>,
}

impl TemplateModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signature(signature: impl Into<String>) -> Self {
        Self {
            signature: Some(signature.into()),
        }
    }
}

#[async_trait]
impl ContentModel for TemplateModel {
    fn name(&self) -> &str {
        "template"
    }

    async fn research(&self, topic: &str) -> Result<Vec<String>> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(Error::validation("research topic is empty"));
        }

        Ok(vec![
            format!("Interest in {} is growing", topic),
            format!("Readers want practical guides on {}", topic),
            format!("Comparisons of {} products convert well", topic),
        ])
    }

    async fn compose(&self, brief: &Brief) -> Result<Draft> {
        let audience = brief.audience.as_deref().unwrap_or("readers");
        let mut body = format!("Hello,\n\nWe put together a short note on {} for {}.\n", brief.topic, audience);

        if !brief.findings.is_empty() {
            body.push('\n');
            for finding in &brief.findings {
                body.push_str(&format!("- {}\n", finding));
            }
        }

        if let Some(signature) = &self.signature {
            body.push_str(&format!("\n{}\n", signature));
        }

        Ok(Draft {
            subject: format!("Ideas on {} for {}", brief.topic, audience),
            body,
        })
    }
}
