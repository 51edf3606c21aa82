//! # Transport Constants
//!
//! Well-known header keys, SQL object naming, and configuration defaults shared across
//! the transport.

/// Header keys the transport reads or stamps on messages
pub mod headers {
    /// Unique message id, stamped with a UUID v4 when the sender leaves it out
    pub const MESSAGE_ID: &str = "msg-id";
    pub const CORRELATION_ID: &str = "correlation-id";
    pub const CONTENT_TYPE: &str = "content-type";
}

/// Transport event names
pub mod events {
    pub const TABLE_READY: &str = "transport.table_ready";
    pub const RECEIVE_FAILED: &str = "transport.receive_failed";
    pub const DISPATCH_FAILED: &str = "transport.dispatch_failed";
    pub const EXPIRED_MESSAGES_REAPED: &str = "transport.expired_messages_reaped";
}

/// Limits enforced on names and rows
pub mod limits {
    /// PostgreSQL truncates identifiers longer than this
    pub const MAX_IDENTIFIER_BYTES: usize = 63;
    pub const MAX_QUEUE_NAME_CHARS: usize = 200;
}

/// Configuration defaults
pub mod defaults {
    pub const OPERATION_TIMEOUT_MS: u64 = 30_000;
    pub const MAX_CONNECTIONS: u32 = 10;
    pub const WORKER_COUNT: usize = 1;
    pub const BACKOFF_INITIAL_MS: u64 = 100;
    pub const BACKOFF_MAX_MS: u64 = 1_000;
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const EXPIRED_CLEANUP_INTERVAL_MS: u64 = 60_000;
    pub const EXPIRED_CLEANUP_BATCH_SIZE: u32 = 100;
    pub const EVENT_CHANNEL_CAPACITY: usize = 1_000;
    pub const CONFIG_FILE: &str = "config/sql_transport";
    pub const ENV_PREFIX: &str = "SQL_TRANSPORT";
}
