//! # Transport Message Types
//!
//! The transport never interprets message bodies. A message is an opaque byte payload plus
//! a string-to-string header map; serialization is the pipeline's business.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::headers;
use crate::constants::limits::MAX_QUEUE_NAME_CHARS;
use crate::error::{TransportError, TransportResult};

/// A message on its way into the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// After this long in the queue the message is expired and never delivered
    pub time_to_be_received: Option<Duration>,
}

impl OutgoingMessage {
    /// Create a message, stamping a `msg-id` header when the caller did not provide one
    pub fn new(mut headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        headers
            .entry(headers::MESSAGE_ID.to_string())
            .or_insert_with(|| Uuid::new_v4().to_string());

        Self {
            headers,
            body,
            time_to_be_received: None,
        }
    }

    pub fn from_body(body: impl Into<Vec<u8>>) -> Self {
        Self::new(HashMap::new(), body.into())
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_time_to_be_received(mut self, ttl: Duration) -> Self {
        self.time_to_be_received = Some(ttl);
        self
    }

    pub fn message_id(&self) -> Option<&str> {
        self.headers.get(headers::MESSAGE_ID).map(String::as_str)
    }
}

/// A message as handed to a receiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMessage {
    /// Store-assigned ordering key
    pub sequence_id: i64,
    pub recipient_queue: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub visible_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TransportMessage {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn message_id(&self) -> Option<&str> {
        self.header(headers::MESSAGE_ID)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.header(headers::CORRELATION_ID)
    }
}

/// Row shape returned by the dequeue statement
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MessageRow {
    pub sequence_id: i64,
    pub recipient_queue: String,
    pub headers: sqlx::types::Json<serde_json::Value>,
    pub body: Vec<u8>,
    pub visible_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Fails with `Serialization` when the stored headers are not a string-to-string object,
/// e.g. a row written by something other than this transport.
impl TryFrom<MessageRow> for TransportMessage {
    type Error = TransportError;

    fn try_from(row: MessageRow) -> TransportResult<Self> {
        let headers: HashMap<String, String> = serde_json::from_value(row.headers.0)?;
        Ok(Self {
            sequence_id: row.sequence_id,
            recipient_queue: row.recipient_queue,
            headers,
            body: row.body,
            visible_at: row.visible_at,
            expires_at: row.expires_at,
        })
    }
}

/// Queue names are bound as parameters, so only emptiness, length and control characters matter
pub fn validate_queue_name(queue_name: &str) -> TransportResult<()> {
    if queue_name.trim().is_empty() {
        return Err(TransportError::invalid_queue_name(
            queue_name,
            "queue name must not be empty",
        ));
    }
    if queue_name.chars().count() > MAX_QUEUE_NAME_CHARS {
        return Err(TransportError::invalid_queue_name(
            queue_name,
            format!("queue name longer than {MAX_QUEUE_NAME_CHARS} characters"),
        ));
    }
    if queue_name.chars().any(char::is_control) {
        return Err(TransportError::invalid_queue_name(
            queue_name,
            "queue name contains control characters",
        ));
    }
    Ok(())
}
