//! Domain types for the coordination core.
//!
//! This module contains the core data structures:
//! - Events: Immutable records broadcast on the event bus
//! - Contact: Outreach targets and address helpers
//! - Message: Agent inputs and agent-to-agent messages

pub mod contact;
pub mod events;
pub mod message;

pub use contact::{is_valid_email, normalize_email, Contact};
pub use events::{Event, EventMetadata, EventPayload, EventType};
pub use message::{AgentInput, AgentMessage, Brief, Draft, OutboundEmail};
