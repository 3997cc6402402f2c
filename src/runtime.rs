//! Process-scoped wiring of the coordination core.
//!
//! `Runtime::build` constructs every shared component once and hands it to
//! the agents that need it. The application entry point owns the result.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::adapters::{ContentModel, LogTransport, MailTransport, TemplateModel, WebhookTransport};
use crate::agents::{
    AffiliateAgent, AgentServices, ComplianceAgent, ContentAgent, DispatchAgent,
    EmailConfigAgent, ResearchAgent,
};
use crate::config::{Config, TransportConfig};
use crate::core::{
    CircuitBreakers, ComplianceGate, DispatchQueue, ErrorHandler, EventBus, Orchestrator,
    Subscription,
};
use crate::domain::{EventType, OutboundEmail};

/// The assembled runtime
pub struct Runtime {
    pub bus: Arc<EventBus>,
    pub errors: Arc<ErrorHandler>,
    pub breakers: Arc<CircuitBreakers>,
    pub gate: Arc<ComplianceGate>,
    pub queue: Arc<DispatchQueue<OutboundEmail>>,
    pub orchestrator: Orchestrator,

    /// Bus subscriptions that route events to agents
    pub subscriptions: Vec<Subscription>,
}

impl Runtime {
    /// Build with the adapters selected by `config`
    pub async fn build(config: &Config) -> Result<Self> {
        let transport: Arc<dyn MailTransport> = match &config.transport {
            TransportConfig::Log => Arc::new(LogTransport::new()),
            TransportConfig::Webhook(webhook) => Arc::new(WebhookTransport::new(webhook.clone())),
        };
        Self::build_with(config, Arc::new(TemplateModel::new()), transport).await
    }

    /// Build with explicit adapters
    pub async fn build_with(
        config: &Config,
        model: Arc<dyn ContentModel>,
        transport: Arc<dyn MailTransport>,
    ) -> Result<Self> {
        let bus = Arc::new(EventBus::new(config.bus_config()));
        let errors = Arc::new(ErrorHandler::new().with_event_bus(bus.clone()));
        let breakers =
            Arc::new(CircuitBreakers::new(config.breaker_config()).with_event_bus(bus.clone()));

        let mut gate = ComplianceGate::new(config.frequency_policy());
        if let Some(url) = &config.compliance.unsubscribe_url {
            gate = gate.with_unsubscribe_url(url.clone());
        }
        let gate = Arc::new(gate);
        let queue = Arc::new(DispatchQueue::new(config.rate_limit()));

        let services = AgentServices {
            bus: bus.clone(),
            breakers: breakers.clone(),
            errors: errors.clone(),
            retry: config.retry.clone(),
        };

        let orchestrator = Orchestrator::new(bus.clone(), errors.clone());
        orchestrator
            .register_agent(Arc::new(ResearchAgent::new(model.clone(), services.clone())))
            .await?;
        orchestrator
            .register_agent(Arc::new(ContentAgent::new(model, services.clone())))
            .await?;
        orchestrator
            .register_agent(Arc::new(ComplianceAgent::new(gate.clone(), services.clone())))
            .await?;
        orchestrator
            .register_agent(Arc::new(DispatchAgent::new(
                queue.clone(),
                gate.clone(),
                transport,
                services.clone(),
            )))
            .await?;
        orchestrator
            .register_agent(Arc::new(AffiliateAgent::new(services.clone())))
            .await?;
        orchestrator
            .register_agent(Arc::new(EmailConfigAgent::new(services)))
            .await?;

        let mut subscriptions =
            orchestrator.subscribe_agent(ComplianceAgent::ID, &[EventType::ContactOptedOut])?;
        subscriptions.extend(
            orchestrator.subscribe_agent(DispatchAgent::ID, &[EventType::ContentGenerated])?,
        );

        info!(
            agents = orchestrator.agent_ids().len(),
            environment = %config.environment,
            "Runtime ready"
        );

        Ok(Self {
            bus,
            errors,
            breakers,
            gate,
            queue,
            orchestrator,
            subscriptions,
        })
    }
}
