//! Opt-out registry and per-contact eligibility rules.
//!
//! An identifier in the opt-out set is never a valid send target for the
//! rest of the process lifetime. Compliance is the conjunction of three
//! independent checks:
//! - send frequency (pluggable via [`FrequencyPolicy`])
//! - an opt-out mechanism is offered (an unsubscribe URL is configured)
//! - personal data is protected (the contact gave consent)

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::{is_valid_email, normalize_email, Contact};

/// Decides whether a contact may be contacted again now
pub trait FrequencyPolicy: Send + Sync {
    /// True if another send stays within the allowed frequency
    fn frequency_met(&self, contact: &Contact) -> bool;

    /// Record a completed send
    fn record_send(&self, _contact: &Contact) {}
}

/// Base policy: frequency is always met
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysMet;

impl FrequencyPolicy for AlwaysMet {
    fn frequency_met(&self, _contact: &Contact) -> bool {
        true
    }
}

/// Caps sends per contact over a rolling window
pub struct RollingWindowFrequency {
    max_sends: usize,
    window: Duration,
    sends: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RollingWindowFrequency {
    pub fn new(max_sends: usize, window: Duration) -> Self {
        Self {
            max_sends,
            window,
            sends: Mutex::new(HashMap::new()),
        }
    }

    fn recent(&self, history: &mut VecDeque<Instant>, now: Instant) -> usize {
        while history
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) >= self.window)
        {
            history.pop_front();
        }
        history.len()
    }
}

impl FrequencyPolicy for RollingWindowFrequency {
    fn frequency_met(&self, contact: &Contact) -> bool {
        let mut sends = self.sends.lock().unwrap_or_else(|e| e.into_inner());
        match sends.get_mut(&contact.identifier()) {
            Some(history) => self.recent(history, Instant::now()) < self.max_sends,
            None => true,
        }
    }

    fn record_send(&self, contact: &Contact) {
        let now = Instant::now();
        let mut sends = self.sends.lock().unwrap_or_else(|e| e.into_inner());
        let history = sends.entry(contact.identifier()).or_default();
        self.recent(history, now);
        history.push_back(now);
    }
}

/// Result of [`ComplianceGate::check_compliance`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub is_compliant: bool,
    pub details: ComplianceDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceDetails {
    pub max_frequency_met: bool,
    pub opt_out_mechanism_present: bool,
    pub personal_data_protected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptOutStatus {
    Registered,
    AlreadyRegistered,
}

/// Why a contact is not a valid send target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    OptedOut,
    InvalidEmail,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OptedOut => "opted_out",
            Self::InvalidEmail => "invalid_email",
        }
    }
}

/// Result of [`ComplianceGate::validate_contact`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactValidation {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<InvalidReason>,
}

impl ContactValidation {
    fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    fn invalid(reason: InvalidReason) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason),
        }
    }
}

/// Opt-out registry plus eligibility checks
pub struct ComplianceGate {
    opt_outs: RwLock<HashSet<String>>,
    frequency: Arc<dyn FrequencyPolicy>,
    unsubscribe_url: Option<String>,
}

impl Default for ComplianceGate {
    fn default() -> Self {
        Self::new(Arc::new(AlwaysMet))
    }
}

impl ComplianceGate {
    pub fn new(frequency: Arc<dyn FrequencyPolicy>) -> Self {
        Self {
            opt_outs: RwLock::new(HashSet::new()),
            frequency,
            unsubscribe_url: None,
        }
    }

    /// Set the unsubscribe link included in outbound mail
    pub fn with_unsubscribe_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.unsubscribe_url = (!url.trim().is_empty()).then_some(url);
        self
    }

    pub fn unsubscribe_url(&self) -> Option<&str> {
        self.unsubscribe_url.as_deref()
    }

    pub fn frequency_policy(&self) -> &Arc<dyn FrequencyPolicy> {
        &self.frequency
    }

    pub fn check_compliance(&self, contact: &Contact) -> ComplianceReport {
        let details = ComplianceDetails {
            max_frequency_met: self.frequency.frequency_met(contact),
            opt_out_mechanism_present: self.unsubscribe_url.is_some(),
            personal_data_protected: contact.consent,
        };
        let is_compliant = details.max_frequency_met
            && details.opt_out_mechanism_present
            && details.personal_data_protected;

        debug!(contact = %contact.identifier(), is_compliant, ?details, "Compliance checked");

        ComplianceReport {
            is_compliant,
            details,
        }
    }

    /// Add an identifier to the opt-out set. Idempotent.
    pub fn register_opt_out(&self, identifier: &str) -> OptOutStatus {
        let identifier = normalize_email(identifier);
        let inserted = self
            .opt_outs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identifier.clone());

        if inserted {
            info!(contact = %identifier, "Opt-out registered");
            OptOutStatus::Registered
        } else {
            OptOutStatus::AlreadyRegistered
        }
    }

    pub fn is_opted_out(&self, identifier: &str) -> bool {
        self.opt_outs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&normalize_email(identifier))
    }

    pub fn opt_out_count(&self) -> usize {
        self.opt_outs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the contact may be selected as a send target
    pub fn validate_contact(&self, contact: &Contact) -> ContactValidation {
        if self.is_opted_out(&contact.email) {
            return ContactValidation::invalid(InvalidReason::OptedOut);
        }
        if !is_valid_email(&contact.email) {
            return ContactValidation::invalid(InvalidReason::InvalidEmail);
        }
        ContactValidation::valid()
    }
}
