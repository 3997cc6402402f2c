//! Error taxonomy shared by the coordination core.
//!
//! Failures that originate outside the core (validation of caller input,
//! compliance refusals, external services) are described by a
//! [`ClassifiedError`]: an [`ErrorKind`] plus a [`Severity`] and a
//! `retryable` flag. Structural failures of the core itself (unknown agent,
//! unsupported action, open circuit, failed workflow step) get their own
//! [`Error`] variants.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the coordination core
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error(transparent)]
    Classified(#[from] ClassifiedError),

    #[error("Agent not found: {id}")]
    AgentNotFound { id: String },

    #[error("Agent already registered: {id}")]
    AgentExists { id: String },

    #[error("Agent '{agent_id}' does not support action '{action}'")]
    UnsupportedAction { agent_id: String, action: String },

    #[error("Agent '{agent_id}' failed to initialize: {reason}")]
    Initialization { agent_id: String, reason: String },

    #[error("Circuit open for service '{service}'")]
    CircuitOpen { service: String },

    #[error("Agent '{agent_id}' mailbox is closed")]
    MailboxClosed { agent_id: String },

    #[error("Workflow step {index} ({agent_id}/{action}) failed: {source}")]
    WorkflowStep {
        index: usize,
        agent_id: String,
        action: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Shorthand for a validation failure
    pub fn validation(message: impl Into<String>) -> Self {
        ClassifiedError::new(ErrorKind::Validation, message).into()
    }

    /// Shorthand for a compliance refusal
    pub fn compliance(message: impl Into<String>) -> Self {
        ClassifiedError::new(ErrorKind::Compliance, message).into()
    }

    /// Shorthand for a failed call to an external dependency
    pub fn external(service: &str, message: impl Into<String>) -> Self {
        ClassifiedError::new(ErrorKind::ExternalService, message)
            .with_context("service", service)
            .into()
    }

    /// The classified error behind this one, if any
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            Self::Classified(e) => Some(e),
            Self::WorkflowStep { source, .. } => source.classified(),
            _ => None,
        }
    }

    /// The taxonomy kind, if this error carries one
    pub fn kind(&self) -> Option<ErrorKind> {
        self.classified().map(|e| e.kind)
    }

    /// Whether a retry may succeed
    pub fn is_retryable(&self) -> bool {
        self.classified().map(|e| e.retryable).unwrap_or(false)
    }

    /// Classify any core error so it can be routed through the error handler
    pub fn to_classified(&self) -> ClassifiedError {
        match self {
            Self::Classified(e) => e.clone(),
            Self::WorkflowStep { source, .. } => source.to_classified(),
            Self::CircuitOpen { service } => {
                ClassifiedError::new(ErrorKind::ExternalService, self.to_string())
                    .with_code("CIRCUIT_OPEN")
                    .with_retryable(false)
                    .with_context("service", service)
            }
            other => ClassifiedError::new(ErrorKind::System, other.to_string()),
        }
    }
}

/// The closed set of failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Compliance,
    Network,
    Authentication,
    RateLimit,
    System,
    ExternalService,
    EthicalViolation,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        Self::Validation,
        Self::Compliance,
        Self::Network,
        Self::Authentication,
        Self::RateLimit,
        Self::System,
        Self::ExternalService,
        Self::EthicalViolation,
    ];

    /// Severity assigned when the caller does not choose one
    pub fn default_severity(self) -> Severity {
        match self {
            Self::Validation => Severity::Low,
            Self::Network | Self::RateLimit | Self::ExternalService => Severity::Medium,
            Self::Compliance | Self::Authentication | Self::System => Severity::High,
            Self::EthicalViolation => Severity::Critical,
        }
    }

    /// Transient kinds are retryable by default
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::RateLimit | Self::ExternalService
        )
    }

    /// Error code used to look up retry strategies
    pub fn default_code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Compliance => "COMPLIANCE_ERROR",
            Self::Network => "NETWORK_ERROR",
            Self::Authentication => "AUTHENTICATION_ERROR",
            Self::RateLimit => "RATE_LIMIT_ERROR",
            Self::System => "SYSTEM_ERROR",
            Self::ExternalService => "EXTERNAL_SERVICE_ERROR",
            Self::EthicalViolation => "ETHICAL_VIOLATION",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "Validation error",
            Self::Compliance => "Compliance error",
            Self::Network => "Network error",
            Self::Authentication => "Authentication error",
            Self::RateLimit => "Rate limit error",
            Self::System => "System error",
            Self::ExternalService => "External service error",
            Self::EthicalViolation => "Ethical violation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// A failure placed in the taxonomy
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub severity: Severity,
    pub retryable: bool,
    /// Free-form diagnostic context (service name, agent id, ...)
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ClassifiedError {
    /// Create an error with the kind's default code, severity and retryability
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.default_code().to_string(),
            message: message.into(),
            severity: kind.default_severity(),
            retryable: kind.default_retryable(),
            context: HashMap::new(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}
