//! # Queue Table Schema
//!
//! Owns the shape of the single table every queue lives in:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS "messages" (
//!     sequence_id     BIGSERIAL PRIMARY KEY,
//!     recipient_queue TEXT NOT NULL,
//!     headers         JSONB NOT NULL,
//!     body            BYTEA NOT NULL,
//!     visible_at      TIMESTAMPTZ NOT NULL,
//!     expires_at      TIMESTAMPTZ NULL
//! );
//! CREATE INDEX IF NOT EXISTS "messages_receive_idx"
//!     ON "messages" (recipient_queue, visible_at, sequence_id);
//! ```
//!
//! Creation is idempotent and tolerates a concurrent first run: when two instances race,
//! the loser's "already exists" failure is treated as success. An existing table with a
//! different shape is never migrated; it fails startup with [`TransportError::SchemaMismatch`].

use std::fmt;
use std::sync::Arc;

use sqlx::Row;
use tracing::{debug, info, instrument, warn};

use crate::constants::limits::MAX_IDENTIFIER_BYTES;
use crate::database::connection::{with_timeout, ConnectionSource};
use crate::database::error_codes::PgErrorCode;
use crate::error::{TransportError, TransportResult};

/// Expected `(column, information_schema data_type, nullable)` triples
const EXPECTED_COLUMNS: &[(&str, &str, bool)] = &[
    ("sequence_id", "bigint", false),
    ("recipient_queue", "text", false),
    ("headers", "jsonb", false),
    ("body", "bytea", false),
    ("visible_at", "timestamp with time zone", false),
    ("expires_at", "timestamp with time zone", true),
];

/// Columns the database must fill on insert, from a sequence default or as identity
const GENERATED_COLUMNS: &[&str] = &["sequence_id"];

/// A validated, optionally schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    /// Parse `table` or `schema.table`.
    ///
    /// Each part must be a plain identifier (`[A-Za-z_][A-Za-z0-9_]*`) of at most 63 bytes,
    /// so the name can be quoted into SQL without escaping.
    pub fn parse(raw: &str) -> TransportResult<Self> {
        let parts: Vec<&str> = raw.split('.').collect();
        let (schema, name) = match parts.as_slice() {
            [name] => (None, *name),
            [schema, name] => (Some(*schema), *name),
            _ => {
                return Err(TransportError::invalid_table_name(
                    raw,
                    "expected 'table' or 'schema.table'",
                ))
            }
        };

        if let Some(schema) = schema {
            validate_identifier(raw, schema)?;
        }
        validate_identifier(raw, name)?;

        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Quoted, possibly schema-qualified name for use in SQL text
    pub fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("\"{schema}\".\"{}\"", self.name),
            None => format!("\"{}\"", self.name),
        }
    }

    /// Quoted name of the receive index (indexes live in the table's schema)
    pub fn quoted_index_name(&self) -> String {
        format!("\"{}_receive_idx\"", self.name)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

fn validate_identifier(raw: &str, ident: &str) -> TransportResult<()> {
    if ident.is_empty() {
        return Err(TransportError::invalid_table_name(raw, "empty identifier"));
    }
    if ident.len() > MAX_IDENTIFIER_BYTES {
        return Err(TransportError::invalid_table_name(
            raw,
            format!("identifier longer than {MAX_IDENTIFIER_BYTES} bytes"),
        ));
    }
    let mut chars = ident.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(TransportError::invalid_table_name(
            raw,
            "identifiers may contain only ASCII letters, digits and underscores, and may not start with a digit",
        ));
    }
    Ok(())
}

/// Outcome of inspecting the catalog for the queue table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Missing,
    Compatible,
}

/// Creates and verifies the queue table
#[derive(Debug, Clone)]
pub struct SchemaManager {
    source: Arc<dyn ConnectionSource>,
    table: TableName,
}

impl SchemaManager {
    pub fn new(source: Arc<dyn ConnectionSource>, table: TableName) -> Self {
        Self { source, table }
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Create the table and its receive index when absent, then verify the shape.
    ///
    /// Safe to call repeatedly and from several instances at once. Returns `true` when this
    /// call created the table.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn ensure_table_exists(&self) -> TransportResult<bool> {
        if self.verify_table().await? == TableStatus::Compatible {
            debug!("Queue table already exists");
            return Ok(false);
        }

        let created = match self.create_table().await {
            Ok(()) => {
                info!("Created queue table");
                true
            }
            Err(CreateError::AlreadyExists(code)) => {
                debug!(sqlstate = %code, "Queue table created concurrently by another instance");
                false
            }
            Err(CreateError::Failed(e)) => return Err(e),
        };

        match self.verify_table().await? {
            TableStatus::Compatible => Ok(created),
            TableStatus::Missing => Err(TransportError::database(
                "ensure_table_exists",
                format!("table {} is still missing after creation", self.table),
            )),
        }
    }

    /// Verify an existing table without creating anything.
    ///
    /// Returns `Missing` when no such table exists and fails with `SchemaMismatch` when one
    /// exists with a different shape.
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn verify_table(&self) -> TransportResult<TableStatus> {
        let mut scoped = self.source.acquire().await?;
        let timeout = self.source.operation_timeout();

        let rows = with_timeout(
            "verify_table",
            timeout,
            sqlx::query(
                r#"
                SELECT column_name::text AS column_name,
                       data_type::text AS data_type,
                       is_nullable::text AS is_nullable,
                       column_default::text AS column_default,
                       is_identity::text AS is_identity
                FROM information_schema.columns
                WHERE table_schema = COALESCE($1::text, current_schema()::text)
                  AND table_name = $2::text
                "#,
            )
            .bind(self.table.schema())
            .bind(self.table.name())
            .fetch_all(scoped.connection()),
        )
        .await?;
        scoped.commit().await?;

        if rows.is_empty() {
            return Ok(TableStatus::Missing);
        }

        let columns: Vec<CatalogColumn> = rows
            .iter()
            .map(|row| {
                let nullable: String = row.get("is_nullable");
                let default: Option<String> = row.get("column_default");
                let identity: Option<String> = row.get("is_identity");
                CatalogColumn {
                    name: row.get("column_name"),
                    data_type: row.get("data_type"),
                    nullable: nullable == "YES",
                    generated: default.is_some_and(|d| d.starts_with("nextval("))
                        || identity.as_deref() == Some("YES"),
                }
            })
            .collect();

        check_columns(&self.table, &columns)?;
        Ok(TableStatus::Compatible)
    }

    async fn create_table(&self) -> Result<(), CreateError> {
        let mut scoped = self.source.acquire().await.map_err(CreateError::Failed)?;
        let timeout = self.source.operation_timeout();
        let table = self.table.quoted();

        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                sequence_id     BIGSERIAL PRIMARY KEY,
                recipient_queue TEXT NOT NULL,
                headers         JSONB NOT NULL,
                body            BYTEA NOT NULL,
                visible_at      TIMESTAMPTZ NOT NULL,
                expires_at      TIMESTAMPTZ NULL
            )
            "#
        );
        let create_index = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {table} (recipient_queue, visible_at, sequence_id)",
            self.table.quoted_index_name()
        );

        for (operation, statement) in [("create_table", create_table), ("create_index", create_index)]
        {
            let result = tokio::time::timeout(
                timeout,
                sqlx::query(&statement).execute(scoped.connection()),
            )
            .await;

            match result {
                Ok(Ok(_)) => {}
                Ok(Err(sqlx::Error::Database(db_err))) => {
                    let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
                    // Dropping `scoped` rolls the aborted transaction back.
                    if PgErrorCode::is_already_exists(&code) {
                        return Err(CreateError::AlreadyExists(code));
                    }
                    warn!(sqlstate = %code, error = %db_err, operation, "Schema statement failed");
                    return Err(CreateError::Failed(TransportError::database(
                        operation,
                        db_err.to_string(),
                    )));
                }
                Ok(Err(e)) => return Err(CreateError::Failed(TransportError::from_sqlx(operation, e))),
                Err(_) => {
                    return Err(CreateError::Failed(TransportError::timeout(
                        operation,
                        timeout.as_millis() as u64,
                    )))
                }
            }
        }

        scoped.commit().await.map_err(CreateError::Failed)
    }

    /// Drop the table and everything queued in it
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn drop_table(&self) -> TransportResult<()> {
        let mut scoped = self.source.acquire().await?;
        let statement = format!("DROP TABLE IF EXISTS {}", self.table.quoted());
        with_timeout(
            "drop_table",
            self.source.operation_timeout(),
            sqlx::query(&statement).execute(scoped.connection()),
        )
        .await?;
        scoped.commit().await?;
        warn!("Dropped queue table");
        Ok(())
    }
}

enum CreateError {
    AlreadyExists(String),
    Failed(TransportError),
}

/// One row of `information_schema.columns` for the queue table
#[derive(Debug, Clone)]
struct CatalogColumn {
    name: String,
    data_type: String,
    nullable: bool,
    /// Backed by a `nextval(...)` default or an identity
    generated: bool,
}

/// Compare catalog columns against the expected shape
fn check_columns(table: &TableName, columns: &[CatalogColumn]) -> TransportResult<()> {
    for (expected_name, expected_type, expected_nullable) in EXPECTED_COLUMNS {
        let Some(actual) = columns.iter().find(|c| c.name == *expected_name) else {
            return Err(TransportError::schema_mismatch(
                table.to_string(),
                format!("missing column {expected_name}"),
            ));
        };

        if actual.data_type != *expected_type {
            return Err(TransportError::schema_mismatch(
                table.to_string(),
                format!(
                    "column {expected_name} has type {}, expected {expected_type}",
                    actual.data_type
                ),
            ));
        }
        if actual.nullable != *expected_nullable {
            return Err(TransportError::schema_mismatch(
                table.to_string(),
                format!(
                    "column {expected_name} is {}, expected {}",
                    nullability(actual.nullable),
                    nullability(*expected_nullable)
                ),
            ));
        }
        if GENERATED_COLUMNS.contains(expected_name) && !actual.generated {
            return Err(TransportError::schema_mismatch(
                table.to_string(),
                format!("column {expected_name} has no sequence default or identity"),
            ));
        }
    }
    Ok(())
}

fn nullability(nullable: bool) -> &'static str {
    if nullable {
        "nullable"
    } else {
        "NOT NULL"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn expected() -> Vec<CatalogColumn> {
        EXPECTED_COLUMNS
            .iter()
            .map(|(name, data_type, nullable)| CatalogColumn {
                name: name.to_string(),
                data_type: data_type.to_string(),
                nullable: *nullable,
                generated: GENERATED_COLUMNS.contains(name),
            })
            .collect()
    }

    #[test]
    fn test_parse_plain_and_qualified_names() {
        let plain = TableName::parse("messages").unwrap();
        assert_eq!(plain.schema(), None);
        assert_eq!(plain.quoted(), "\"messages\"");
        assert_eq!(plain.quoted_index_name(), "\"messages_receive_idx\"");

        let qualified = TableName::parse("transport.messages").unwrap();
        assert_eq!(qualified.schema(), Some("transport"));
        assert_eq!(qualified.name(), "messages");
        assert_eq!(qualified.quoted(), "\"transport\".\"messages\"");
        assert_eq!(qualified.to_string(), "transport.messages");
    }

    #[test]
    fn test_reject_unsafe_names() {
        for raw in [
            "",
            "a.b.c",
            "1messages",
            "messages\"; DROP TABLE x; --",
            "mess ages",
            ".messages",
            "transport.",
        ] {
            assert!(
                matches!(
                    TableName::parse(raw),
                    Err(TransportError::InvalidTableName { .. })
                ),
                "{raw:?} should be rejected"
            );
        }

        let too_long = "m".repeat(64);
        assert!(TableName::parse(&too_long).is_err());
        assert!(TableName::parse(&"m".repeat(63)).is_ok());
    }

    #[test]
    fn test_matching_columns_pass() {
        let table = TableName::parse("messages").unwrap();
        let mut columns = expected();
        columns.push(CatalogColumn {
            name: "extra".to_string(),
            data_type: "text".to_string(),
            nullable: true,
            generated: false,
        });
        assert!(check_columns(&table, &columns).is_ok());
    }

    #[test]
    fn test_missing_column_is_a_mismatch() {
        let table = TableName::parse("messages").unwrap();
        let columns: Vec<_> = expected()
            .into_iter()
            .filter(|c| c.name != "visible_at")
            .collect();

        let err = check_columns(&table, &columns).unwrap_err();
        assert!(
            matches!(err, TransportError::SchemaMismatch { ref reason, .. } if reason.contains("visible_at"))
        );
    }

    #[test]
    fn test_wrong_type_or_nullability_is_a_mismatch() {
        let table = TableName::parse("messages").unwrap();

        let mut columns = expected();
        columns[3].data_type = "text".to_string();
        assert!(matches!(
            check_columns(&table, &columns),
            Err(TransportError::SchemaMismatch { .. })
        ));

        let mut columns = expected();
        columns[5].nullable = false;
        let err = check_columns(&table, &columns).unwrap_err();
        assert!(err.to_string().contains("expires_at"));
    }

    #[test]
    fn test_sequence_id_without_default_is_a_mismatch() {
        let table = TableName::parse("messages").unwrap();
        let mut columns = expected();
        columns[0].generated = false;

        let err = check_columns(&table, &columns).unwrap_err();
        assert!(
            matches!(err, TransportError::SchemaMismatch { ref reason, .. } if reason.contains("sequence_id"))
        );
    }

    proptest! {
        #[test]
        fn prop_valid_identifiers_parse(name in "[A-Za-z_][A-Za-z0-9_]{0,62}") {
            let table = TableName::parse(&name).unwrap();
            prop_assert_eq!(table.name(), name.as_str());
            prop_assert_eq!(table.quoted(), format!("\"{name}\""));
        }

        #[test]
        fn prop_quote_characters_never_accepted(prefix in "[a-z]{1,10}", suffix in "[a-z]{0,10}") {
            let raw = format!("{prefix}\"{suffix}");
            prop_assert!(TableName::parse(&raw).is_err());
        }
    }
}
