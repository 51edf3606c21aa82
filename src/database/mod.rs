//! # Database Layer
//!
//! Everything that talks to PostgreSQL below the messaging engines.
//!
//! - [`connection`] - connection sources and scoped units of work
//! - [`schema`] - queue table creation and shape verification
//! - [`error_codes`] - SQLSTATE codes the transport reacts to

pub mod connection;
pub mod error_codes;
pub mod schema;

pub use connection::{
    connection_factory, ConnectionFactory, ConnectionSource, FactoryConnectionSource,
    PooledConnectionSource, ScopedConnection,
};
pub use error_codes::PgErrorCode;
pub use schema::{SchemaManager, TableName, TableStatus};
