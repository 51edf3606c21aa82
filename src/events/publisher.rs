use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::constants::{defaults, events};

/// What happened inside the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportEventKind {
    /// Startup finished with a usable queue table
    TableReady { table: String, created: bool },
    /// A receive attempt failed before any message was claimed
    ReceiveFailed {
        queue: String,
        error: String,
        transient: bool,
    },
    /// The dispatcher rejected a message; its claim was rolled back
    DispatchFailed {
        queue: String,
        sequence_id: i64,
        error: String,
    },
    ExpiredMessagesReaped { queue: String, deleted: u64 },
}

impl TransportEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TableReady { .. } => events::TABLE_READY,
            Self::ReceiveFailed { .. } => events::RECEIVE_FAILED,
            Self::DispatchFailed { .. } => events::DISPATCH_FAILED,
            Self::ExpiredMessagesReaped { .. } => events::EXPIRED_MESSAGES_REAPED,
        }
    }
}

/// Event that has been published
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportEvent {
    pub kind: TransportEventKind,
    pub published_at: DateTime<Utc>,
}

impl TransportEvent {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Fan-out of transport events to any number of observers
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<TransportEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, kind: TransportEventKind) {
        let event = TransportEvent {
            kind,
            published_at: Utc::now(),
        };
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(defaults::EVENT_CHANNEL_CAPACITY)
    }
}
