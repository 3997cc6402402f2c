//! Coordination machinery.
//!
//! This module contains:
//! - EventBus: typed publish/subscribe with bounded history
//! - ErrorHandler and CircuitBreakers: failure routing and resilience
//! - DispatchQueue: windowed admission control for outbound sends
//! - ComplianceGate: opt-out registry and eligibility checks
//! - Workflow and Orchestrator: agent registry and sequential execution

pub mod circuit_breaker;
pub mod compliance;
pub mod dispatch_queue;
pub mod error_handler;
pub mod event_bus;
pub mod orchestrator;
pub mod retry;
pub mod workflow;

// Re-export commonly used types
pub use circuit_breaker::{BreakerConfig, BreakerStatus, CircuitBreakerState, CircuitBreakers};
pub use compliance::{
    AlwaysMet, ComplianceDetails, ComplianceGate, ComplianceReport, ContactValidation,
    FrequencyPolicy, InvalidReason, OptOutStatus, RollingWindowFrequency,
};
pub use dispatch_queue::{Admission, DispatchQueue, QueueStatus, RateLimitConfig, RateLimitWindow};
pub use error_handler::{Alert, ErrorHandler, ErrorStats, Recovery};
pub use event_bus::{are_related, BusConfig, EventBus, HistoryFilter, PublishReport, Subscription};
pub use orchestrator::Orchestrator;
pub use retry::RetryPolicy;
pub use workflow::{Workflow, WorkflowStep};
