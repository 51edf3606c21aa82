#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # SQL Transport
//!
//! Durable point-to-point message transport that keeps its queues in a PostgreSQL table.
//!
//! ## Overview
//!
//! Senders enqueue messages addressed to named queues; receivers poll and atomically claim
//! the next eligible message. There is no broker process and no scheduler: delayed delivery
//! is a future `visible_at`, and every cross-process guarantee comes from the database's
//! row locks (`FOR UPDATE SKIP LOCKED`).
//!
//! ## Guarantees
//!
//! - **No double delivery**: concurrent receivers never claim the same row
//! - **Transactional consumption**: a claimed row is removed exactly when the receiver's unit
//!   of work commits; a rollback puts it back at its original position
//! - **Ordered per queue**: the lowest `sequence_id` among eligible rows is delivered first
//! - **Database clock**: visibility and expiry are evaluated with `clock_timestamp()`
//!
//! ## Module Organization
//!
//! - [`transport`] - construction, one-way and full transports, receive loops
//! - [`messaging`] - message types, send and dequeue engines, queue administration
//! - [`database`] - connection sources and queue table bootstrap
//! - [`pipeline`] - dispatcher seam and deferred-delivery capability negotiation
//! - [`events`] - transport lifecycle events
//! - [`config`] - typed configuration and file/environment loading
//! - [`error`] - structured error handling
//! - [`logging`] - structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use sql_transport::{
//!     MessageDispatcher, OutgoingMessage, TransportBuilder, TransportConfig, TransportMessage,
//! };
//!
//! struct PrintDispatcher;
//!
//! #[async_trait::async_trait]
//! impl MessageDispatcher for PrintDispatcher {
//!     async fn dispatch(&self, message: &TransportMessage) -> anyhow::Result<()> {
//!         println!("received {} bytes", message.body.len());
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TransportConfig::full(
//!     "postgresql://localhost/app",
//!     "messages",
//!     "billing",
//! );
//! let transport = TransportBuilder::new(config).build().await?;
//!
//! transport
//!     .send("billing", &OutgoingMessage::from_body("hello"), Duration::ZERO)
//!     .await?;
//!
//! let receive_loop = transport.receiver()?.start_receiving(Arc::new(PrintDispatcher))?;
//! // ...
//! receive_loop.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Unit tests need nothing external. Integration tests under `tests/` run against the
//! database named by `DATABASE_URL` and skip when it is unset:
//!
//! ```bash
//! cargo test --lib
//! DATABASE_URL=postgresql://localhost/sql_transport_test cargo test
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod messaging;
pub mod pipeline;
pub mod transport;

pub use config::{
    BackoffConfig, ConnectionSourceConfig, ExpiredMessagesCleanupConfig, ReceiveMode,
    TransportConfig, TransportMode, TransportSettings,
};
pub use database::{connection_factory, ConnectionFactory, ScopedConnection, TableName};
pub use error::{TransportError, TransportResult};
pub use events::{EventPublisher, TransportEvent, TransportEventKind};
pub use messaging::{OutgoingMessage, QueueMetrics, ReceivedMessage, TransportMessage};
pub use pipeline::{
    configure_pipeline, DisabledTimeoutManager, IncomingPipeline, IncomingStep,
    MessageDispatcher, TimeoutManager, TimeoutManagerSlot, TransportCapabilities,
};
pub use transport::{
    BlockingReceiver, OneWayTransport, ReceiveLoop, SqlTransport, StopSignal, Transport,
    TransportBuilder,
};
