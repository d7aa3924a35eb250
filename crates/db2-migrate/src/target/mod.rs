//! Target side of the migration: DB2 connection pool, DDL execution,
//! bulk inserts and catalog lookups.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[cfg(feature = "odbc")]
pub mod db2;

/// A single column value travelling from source to target.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

/// One row as read from the source, positionally aligned with the
/// table's column list.
pub type Row = Vec<SqlValue>;

/// Target column description, read from SYSCAT.COLUMNS. Drives value
/// sanitization in the transfer workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetColumn {
    pub name: String,
    /// DB2 type name, upper case (VARCHAR, DECIMAL, TIMESTAMP, ...).
    pub type_name: String,
    /// Declared length for character/binary types.
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub nullable: bool,
}

/// Operations the migration engine needs from the DB2 side.
///
/// `table_exists` results are cached per pool; callers that must observe
/// DDL executed moments earlier (idempotent create, index/trigger
/// dependency checks) pass `skip_cache = true` to force a catalog read.
#[async_trait]
pub trait TargetPool: Send + Sync {
    /// True when the table is present in SYSCAT.TABLES.
    async fn table_exists(&self, schema: &str, table: &str, skip_cache: bool) -> Result<bool>;

    /// Drop any cached existence answer for the given table.
    fn invalidate_existence(&self, schema: &str, table: &str);

    /// Direct SYSCAT.SEQUENCES lookup, never cached.
    async fn sequence_exists(&self, schema: &str, sequence: &str) -> Result<bool>;

    async fn schema_exists(&self, schema: &str) -> Result<bool>;

    /// Create the schema unless it already exists.
    async fn create_schema_if_absent(&self, schema: &str) -> Result<()>;

    /// Execute a single DDL statement. Commits on success, rolls back on
    /// failure.
    async fn execute_ddl(&self, object: &str, ddl: &str) -> Result<()>;

    /// Roll back any open work on the connection, then
    /// `TRUNCATE TABLE ... IMMEDIATE` and commit.
    async fn truncate(&self, schema: &str, table: &str) -> Result<()>;

    /// Insert a batch in one round trip. Returns the number of rows the
    /// driver reports as inserted. Errors leave the batch unapplied.
    async fn bulk_insert(
        &self,
        worker_id: usize,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64>;

    /// Insert a single row; used as the fallback after a failed bulk insert.
    async fn insert_row(
        &self,
        worker_id: usize,
        schema: &str,
        table: &str,
        columns: &[String],
        row: &Row,
    ) -> Result<()>;

    async fn row_count(&self, schema: &str, table: &str) -> Result<u64>;

    /// Column metadata from SYSCAT.COLUMNS, in ordinal order.
    async fn column_info(&self, schema: &str, table: &str) -> Result<Vec<TargetColumn>>;
}

/// Quote an identifier for DB2, doubling any embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
