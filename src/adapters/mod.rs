//! Adapter interfaces for external systems.
//!
//! The core treats content generation and mail delivery as black boxes
//! reached through these traits. Calls to them are made behind the circuit
//! breaker by the agents that use them.

pub mod mail;
pub mod template;

use async_trait::async_trait;

use crate::domain::{Brief, Draft, OutboundEmail};
use crate::error::Result;

pub use mail::{LogTransport, WebhookConfig, WebhookTransport};
pub use template::TemplateModel;

/// Text generation backend used by research and content agents
#[async_trait]
pub trait ContentModel: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Gather findings about a topic
    async fn research(&self, topic: &str) -> Result<Vec<String>>;

    /// Write an outreach email from a brief
    async fn compose(&self, brief: &Brief) -> Result<Draft>;
}

/// Outbound mail delivery
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Deliver one email, returning the provider's message id
    async fn send(&self, email: &OutboundEmail) -> Result<String>;
}
