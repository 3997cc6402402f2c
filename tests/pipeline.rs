//! Outreach Pipeline Integration Tests
//!
//! The fully wired runtime running the research, content, compliance,
//! dispatch pipeline against offline adapters.

use std::sync::Arc;

use outreach::adapters::{LogTransport, TemplateModel};
use outreach::agents::{actions, AffiliateAgent, ComplianceAgent, DispatchAgent};
use outreach::core::HistoryFilter;
use outreach::domain::{AgentInput, EventPayload, EventType};
use outreach::{Config, Contact, Error, ErrorKind, Runtime};
use serde_json::json;

fn config() -> Config {
    let mut config = Config::default();
    config.compliance.unsubscribe_url = Some("https://example.com/unsubscribe".to_string());
    config.dispatch.max_per_window = 1;
    config
}

async fn runtime(config: &Config) -> (Runtime, Arc<LogTransport>) {
    let transport = Arc::new(LogTransport::new());
    let runtime = Runtime::build_with(config, Arc::new(TemplateModel::new()), transport.clone())
        .await
        .unwrap();
    (runtime, transport)
}

#[tokio::test]
async fn test_pipeline_sends_one_email() {
    let (runtime, transport) = runtime(&config()).await;

    let results = runtime
        .orchestrator
        .run_outreach("hiking", &Contact::new("Ana@Example.com").with_name("Ana"))
        .await
        .unwrap();

    assert_eq!(results.len(), 4);
    assert_eq!(results[3]["status"], "sent");

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ana@example.com");
    assert!(sent[0].body.starts_with("Hi Ana,"));
    assert!(sent[0].body.contains("https://example.com/unsubscribe"));

    let completed = runtime
        .bus
        .get_history(&HistoryFilter::new().event_type(EventType::WorkflowCompleted));
    let types: Vec<EventType> = runtime
        .bus
        .trace_event_chain(completed[0].id, 10)
        .iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        types,
        vec![
            EventType::WorkflowStarted,
            EventType::ResearchCompleted,
            EventType::ContentGenerated,
            EventType::ComplianceChecked,
            EventType::EmailSent,
            EventType::WorkflowCompleted,
        ]
    );
}

#[tokio::test]
async fn test_second_send_in_window_is_queued() {
    let (runtime, transport) = runtime(&config()).await;

    runtime
        .orchestrator
        .run_outreach("hiking", &Contact::new("a@x.com"))
        .await
        .unwrap();
    let results = runtime
        .orchestrator
        .run_outreach("hiking", &Contact::new("b@x.com"))
        .await
        .unwrap();

    assert_eq!(results[3], json!({ "status": "queued", "recipient": "b@x.com", "position": 1 }));
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(runtime.queue.backlog_len(), 1);
}

#[tokio::test]
async fn test_opted_out_contact_stops_before_dispatch() {
    let (runtime, transport) = runtime(&config()).await;
    runtime
        .bus
        .publish(EventPayload::ContactOptedOut {
            contact: "a@x.com".to_string(),
        })
        .await
        .unwrap();

    // the mailbox handles the event before this request
    let compliance = runtime.orchestrator.address(ComplianceAgent::ID).unwrap();
    let validation = compliance
        .process(AgentInput::new(
            actions::VALIDATE_CONTACT,
            json!({ "contact": { "email": "a@x.com" } }),
        ))
        .await
        .unwrap();
    assert_eq!(validation["reason"], "opted_out");

    let err = runtime
        .orchestrator
        .run_outreach("hiking", &Contact::new("a@x.com"))
        .await
        .unwrap_err();

    match &err {
        Error::WorkflowStep {
            index, agent_id, ..
        } => {
            assert_eq!(*index, 2);
            assert_eq!(agent_id, ComplianceAgent::ID);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind(), Some(ErrorKind::Compliance));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_missing_unsubscribe_link_is_not_compliant() {
    let (runtime, transport) = runtime(&Config::default()).await;

    let err = runtime
        .orchestrator
        .run_outreach("hiking", &Contact::new("a@x.com"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::Compliance));
    assert!(transport.sent().is_empty());
    let stats = runtime.errors.stats();
    assert_eq!(stats.by_kind.get(&ErrorKind::Compliance), Some(&1));
}

#[tokio::test]
async fn test_orchestrate_action_between_agents() {
    let (runtime, _) = runtime(&config()).await;

    let reply = runtime
        .orchestrator
        .orchestrate_action(
            DispatchAgent::ID,
            ComplianceAgent::ID,
            actions::VALIDATE_CONTACT,
            json!({ "contact": { "email": "nobody" } }),
        )
        .await
        .unwrap();
    assert_eq!(reply["reason"], "invalid_email");

    // agents without a bespoke protocol acknowledge
    let reply = runtime
        .orchestrator
        .orchestrate_action(ComplianceAgent::ID, AffiliateAgent::ID, "list-programs", json!({}))
        .await
        .unwrap();
    assert_eq!(reply, json!({ "status": "received", "sender_id": "compliance" }));
}

#[tokio::test]
async fn test_all_agents_registered() {
    let (runtime, _) = runtime(&config()).await;
    assert_eq!(
        runtime.orchestrator.agent_ids(),
        vec!["affiliate", "compliance", "content", "dispatch", "email-config", "research"]
    );
    let initialized = runtime
        .bus
        .get_history(&HistoryFilter::new().event_type(EventType::AgentInitialized));
    assert_eq!(initialized.len(), 6);
}
