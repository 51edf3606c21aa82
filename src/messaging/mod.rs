//! # Messaging Module
//!
//! Table-backed queue operations: message types, the send and dequeue engines, and queue
//! housekeeping. All engines share one [`ConnectionSource`](crate::database::ConnectionSource)
//! and one queue table.

pub mod admin;
pub mod message;
pub mod receiver;
pub mod sender;

pub use admin::{QueueAdmin, QueueMetrics};
pub use message::{validate_queue_name, OutgoingMessage, TransportMessage};
pub use receiver::{DequeueEngine, ReceivedMessage};
pub use sender::SendEngine;
