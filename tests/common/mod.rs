#![allow(dead_code)]

use std::time::Duration;

use sql_transport::{
    BackoffConfig, OneWayTransport, SqlTransport, TransportBuilder, TransportConfig,
};
use sqlx::PgPool;
use uuid::Uuid;

/// Test database utilities for transport integration tests.
///
/// Every instance owns a uniquely named queue table that [`TestDb::cleanup`] drops.
#[derive(Debug)]
pub struct TestDb {
    pub pool: PgPool,
    pub database_url: String,
    pub table_name: String,
}

impl TestDb {
    /// `DATABASE_URL`, or `None` (with a notice) when integration tests should be skipped
    pub fn database_url() -> Option<String> {
        match std::env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => Some(url),
            _ => {
                println!("DATABASE_URL not set - skipping database integration test");
                None
            }
        }
    }

    pub fn unique_table_name() -> String {
        format!("transport_test_{}", &Uuid::new_v4().simple().to_string()[..12])
    }

    pub async fn new() -> Option<Self> {
        let database_url = Self::database_url()?;
        Some(Self::connect(&database_url, &Self::unique_table_name()).await)
    }

    pub async fn connect(database_url: &str, table_name: &str) -> Self {
        let pool = PgPool::connect(database_url)
            .await
            .expect("connect to DATABASE_URL");
        Self {
            pool,
            database_url: database_url.to_string(),
            table_name: table_name.to_string(),
        }
    }

    /// Full transport config with fast polling and no background cleanup
    pub fn full_config(&self, input_queue: &str) -> TransportConfig {
        TransportConfig::full(&self.database_url, &self.table_name, input_queue)
            .with_operation_timeout(Duration::from_secs(5))
            .with_backoff(BackoffConfig::fixed(Duration::from_millis(20)))
            .with_expired_messages_cleanup(None)
    }

    pub fn one_way_config(&self) -> TransportConfig {
        TransportConfig::one_way(&self.database_url, &self.table_name)
            .with_operation_timeout(Duration::from_secs(5))
    }

    pub async fn full_transport(&self, input_queue: &str) -> SqlTransport {
        TransportBuilder::new(self.full_config(input_queue))
            .build()
            .await
            .expect("build full transport")
            .into_full()
            .expect("full transport")
    }

    pub async fn one_way_transport(&self) -> OneWayTransport {
        match TransportBuilder::new(self.one_way_config())
            .build()
            .await
            .expect("build one-way transport")
        {
            sql_transport::Transport::OneWay(transport) => transport,
            sql_transport::Transport::Full(_) => panic!("expected a one-way transport"),
        }
    }

    pub async fn row_count(&self, queue: &str) -> i64 {
        sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE recipient_queue = $1",
            self.table_name
        ))
        .bind(queue)
        .fetch_one(&self.pool)
        .await
        .expect("count rows")
    }

    pub async fn cleanup(&self) {
        sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", self.table_name))
            .execute(&self.pool)
            .await
            .expect("drop test table");
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
