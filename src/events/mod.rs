//! # Transport Events
//!
//! Lifecycle notifications (table ready, receive and dispatch failures, reaped messages)
//! broadcast to whoever subscribes.

pub mod publisher;

pub use publisher::{EventPublisher, TransportEvent, TransportEventKind};
