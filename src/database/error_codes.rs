//! PostgreSQL Error Codes
//!
//! SQLSTATE codes the transport reacts to. Everything else is reported as a plain
//! database error.
//!
//! Full list: <https://www.postgresql.org/docs/current/errcodes-appendix.html>

/// PostgreSQL SQLSTATE error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PgErrorCode;

impl PgErrorCode {
    /// Unique violation - Code 23505
    ///
    /// Raised against `pg_type` when two sessions run `CREATE TABLE IF NOT EXISTS`
    /// for the same table at the same moment.
    pub const UNIQUE_VIOLATION: &'static str = "23505";

    /// Duplicate table - Code 42P07
    ///
    /// Also covers relations such as indexes.
    pub const DUPLICATE_TABLE: &'static str = "42P07";

    /// Duplicate object - Code 42710
    pub const DUPLICATE_OBJECT: &'static str = "42710";

    /// Query canceled - Code 57014
    ///
    /// Raised when `statement_timeout` fires.
    pub const QUERY_CANCELED: &'static str = "57014";

    /// Check if the error signals that a concurrent session created the object first
    #[inline]
    pub fn is_already_exists(code: &str) -> bool {
        code == Self::DUPLICATE_TABLE
            || code == Self::DUPLICATE_OBJECT
            || code == Self::UNIQUE_VIOLATION
    }

    /// Class 08 (connection exception) and class 57P (operator intervention, e.g. server shutdown)
    #[inline]
    pub fn is_connection_exception(code: &str) -> bool {
        code.starts_with("08") || code.starts_with("57P") || code == Self::QUERY_CANCELED
    }
}
