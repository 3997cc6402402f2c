//! outreach - agent coordination core for compliant outreach pipelines
//!
//! Heterogeneous agents (research, content, compliance, dispatch, affiliate,
//! email settings) are driven through ordered workflows by an orchestrator
//! and talk to each other over an in-process event bus.
//!
//! # Architecture
//!
//! - Every state change of interest is published as a typed event and kept
//!   in bounded history; events of one workflow run share a trace id
//! - Each agent runs behind its own mailbox, so its invocations never overlap
//! - A compliance check must pass before any dispatch step
//! - Outbound sends are rate limited per window; excess sends queue
//! - External calls go through per-service circuit breakers
//!
//! # Modules
//!
//! - `domain`: Data structures (Event, EventPayload, Contact, AgentInput)
//! - `core`: Coordination machinery (EventBus, Orchestrator, DispatchQueue,
//!   ComplianceGate, CircuitBreakers, ErrorHandler)
//! - `agents`: The Agent trait and concrete agents
//! - `adapters`: Content model and mail transport integrations
//! - `runtime`: Wiring of all of the above from a `Config`
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the research -> content -> compliance -> dispatch pipeline
//! OUTREACH_UNSUBSCRIBE_URL=https://example.com/u \
//!     outreach run --topic hiking --email someone@example.com --events
//!
//! # Run a workflow file
//! outreach workflow campaign.yaml
//! ```

pub mod adapters;
pub mod agents;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod runtime;

// Re-export main types at crate root for convenience
pub use crate::config::Config;
pub use crate::core::{EventBus, Orchestrator, Workflow, WorkflowStep};
pub use agents::{Agent, AgentCore};
pub use domain::{Contact, Event, EventPayload, EventType};
pub use error::{ClassifiedError, Error, ErrorKind, Result, Severity};
pub use runtime::Runtime;
