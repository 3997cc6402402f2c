//! Outreach contacts and email address helpers.

use serde::{Deserialize, Serialize};

/// A person that may receive outreach
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Email address (also the opt-out identifier)
    pub email: String,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Whether the contact agreed to their data being processed
    #[serde(default = "default_consent")]
    pub consent: bool,
}

fn default_consent() -> bool {
    true
}

impl Contact {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
            consent: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn without_consent(mut self) -> Self {
        self.consent = false;
        self
    }

    /// Normalized identifier used for opt-out lookups
    pub fn identifier(&self) -> String {
        normalize_email(&self.email)
    }
}

/// Lowercase and trim an address so lookups are case-insensitive
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Minimal structural check: `local@domain.tld`, no whitespace
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }

    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };

    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}
