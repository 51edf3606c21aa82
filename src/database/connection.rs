//! # Connection Sources
//!
//! Every transport operation runs inside a [`ScopedConnection`]: one database transaction
//! with explicit commit/rollback boundaries. A [`ConnectionSource`] hands those out.
//!
//! Two sources exist:
//! - [`PooledConnectionSource`] opens a unit of work per operation from a connection string,
//!   backed by a lazily connected `PgPool`.
//! - [`FactoryConnectionSource`] asks a caller-supplied async factory, which lets the caller
//!   decide where the transaction comes from (its own pool, isolation level, session setup).
//!
//! Acquisition never retries. A failure surfaces immediately as a connectivity error and an
//! acquisition slower than the operation timeout surfaces as a transient timeout.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, warn};

use crate::config::{ConnectionSourceConfig, TransportConfig};
use crate::error::{TransportError, TransportResult};

/// Caller-supplied async factory producing a fresh unit of work
pub type ConnectionFactory = Arc<
    dyn Fn() -> BoxFuture<'static, Result<Transaction<'static, Postgres>, sqlx::Error>>
        + Send
        + Sync,
>;

/// Wrap an async closure as a [`ConnectionFactory`]
///
/// ```rust,no_run
/// use sql_transport::database::connection::connection_factory;
/// use sqlx::PgPool;
///
/// # fn example(pool: PgPool) {
/// let factory = connection_factory(move || {
///     let pool = pool.clone();
///     async move { pool.begin().await }
/// });
/// # }
/// ```
pub fn connection_factory<F, Fut>(factory: F) -> ConnectionFactory
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Transaction<'static, Postgres>, sqlx::Error>>
        + Send
        + 'static,
{
    Arc::new(move || Box::pin(factory()))
}

/// A connection bound to a single unit of work.
///
/// Dropping a scoped connection without calling [`commit`](Self::commit) rolls the
/// unit of work back.
pub struct ScopedConnection {
    transaction: Transaction<'static, Postgres>,
}

impl fmt::Debug for ScopedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedConnection").finish_non_exhaustive()
    }
}

impl ScopedConnection {
    pub fn new(transaction: Transaction<'static, Postgres>) -> Self {
        Self { transaction }
    }

    /// Connection to run statements on inside this unit of work
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.transaction
    }

    /// Make everything done in this unit of work permanent
    pub async fn commit(self) -> TransportResult<()> {
        self.transaction
            .commit()
            .await
            .map_err(|e| TransportError::from_sqlx("commit", e))
    }

    /// Undo everything done in this unit of work
    pub async fn rollback(self) -> TransportResult<()> {
        self.transaction
            .rollback()
            .await
            .map_err(|e| TransportError::from_sqlx("rollback", e))
    }
}

/// Hands out units of work against the backing store
#[async_trait]
pub trait ConnectionSource: Send + Sync + fmt::Debug {
    /// Begin a new unit of work
    async fn acquire(&self) -> TransportResult<ScopedConnection>;

    /// Bound applied to acquisition and to each transport statement
    fn operation_timeout(&self) -> Duration;
}

/// Unit of work per operation from a pooled connection string
#[derive(Debug, Clone)]
pub struct PooledConnectionSource {
    pool: PgPool,
    operation_timeout: Duration,
}

impl PooledConnectionSource {
    /// Build a lazily connected pool; nothing is dialled until the first acquire
    pub fn connect_lazy(
        connection_string: &str,
        max_connections: u32,
        operation_timeout: Duration,
    ) -> TransportResult<Self> {
        let options: PgConnectOptions = connection_string.parse().map_err(|e: sqlx::Error| {
            TransportError::configuration("connection_string", e.to_string())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(operation_timeout)
            .connect_lazy_with(options);

        debug!(max_connections, "Created lazily connected pool");
        Ok(Self {
            pool,
            operation_timeout,
        })
    }

    /// Share an existing pool (BYOP - Bring Your Own Pool)
    pub fn from_pool(pool: PgPool, operation_timeout: Duration) -> Self {
        Self {
            pool,
            operation_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ConnectionSource for PooledConnectionSource {
    async fn acquire(&self) -> TransportResult<ScopedConnection> {
        let timeout_ms = self.operation_timeout.as_millis() as u64;
        match tokio::time::timeout(self.operation_timeout, self.pool.begin()).await {
            Ok(Ok(transaction)) => Ok(ScopedConnection::new(transaction)),
            Ok(Err(sqlx::Error::PoolTimedOut)) => {
                Err(TransportError::timeout("acquire_connection", timeout_ms))
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to acquire connection from pool");
                Err(TransportError::connection(e.to_string()))
            }
            Err(_) => Err(TransportError::timeout("acquire_connection", timeout_ms)),
        }
    }

    fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }
}

/// Unit of work from a caller-supplied async factory
#[derive(Clone)]
pub struct FactoryConnectionSource {
    factory: ConnectionFactory,
    operation_timeout: Duration,
}

impl fmt::Debug for FactoryConnectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryConnectionSource")
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

impl FactoryConnectionSource {
    pub fn new(factory: ConnectionFactory, operation_timeout: Duration) -> Self {
        Self {
            factory,
            operation_timeout,
        }
    }
}

#[async_trait]
impl ConnectionSource for FactoryConnectionSource {
    async fn acquire(&self) -> TransportResult<ScopedConnection> {
        let timeout_ms = self.operation_timeout.as_millis() as u64;
        match tokio::time::timeout(self.operation_timeout, (self.factory)()).await {
            Ok(Ok(transaction)) => Ok(ScopedConnection::new(transaction)),
            Ok(Err(e)) => {
                warn!(error = %e, "Connection factory failed");
                Err(TransportError::connection(e.to_string()))
            }
            Err(_) => Err(TransportError::timeout("acquire_connection", timeout_ms)),
        }
    }

    fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }
}

/// Build the connection source described by `config`
pub fn connection_source_from_config(
    config: &TransportConfig,
) -> TransportResult<Arc<dyn ConnectionSource>> {
    let source: Arc<dyn ConnectionSource> = match &config.connection {
        ConnectionSourceConfig::ConnectionString(url) => Arc::new(
            PooledConnectionSource::connect_lazy(
                url,
                config.max_connections,
                config.operation_timeout,
            )?,
        ),
        ConnectionSourceConfig::Factory(factory) => Arc::new(FactoryConnectionSource::new(
            Arc::clone(factory),
            config.operation_timeout,
        )),
    };
    Ok(source)
}

/// Run a statement future under the operation timeout, mapping errors for `operation`
pub(crate) async fn with_timeout<T, F>(
    operation: &str,
    timeout: Duration,
    future: F,
) -> TransportResult<T>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result.map_err(|e| TransportError::from_sqlx(operation, e)),
        Err(_) => Err(TransportError::timeout(operation, timeout.as_millis() as u64)),
    }
}
