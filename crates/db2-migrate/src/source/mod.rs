//! Source side of the migration: metadata, DDL and row extraction from
//! Oracle or SQL Server.

use async_trait::async_trait;

use crate::error::Result;
use crate::target::Row;

pub mod types;

#[cfg(feature = "odbc")]
pub mod mssql;
#[cfg(feature = "odbc")]
pub mod oracle;

pub use types::{Column, ObjectType, SequenceMeta, SourceType, TableMeta};

/// A finite stream of row batches from one table.
///
/// Implementations page with `OFFSET ... FETCH NEXT` so each batch is an
/// independent query; a consumer can re-invoke after a transient failure
/// and continue from the same offset.
#[async_trait]
pub trait RowStream: Send {
    /// The next batch, at most `batch_size` rows. `None` when the table
    /// is exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<Row>>>;
}

/// Read-only contract against the source database.
///
/// One implementation per dialect; the orchestrator selects it once at job
/// start from [`SourceType`] and never branches on dialect afterwards.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_type(&self) -> SourceType;

    async fn list_schemas(&self) -> Result<Vec<String>>;

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>>;

    async fn table_metadata(&self, schema: &str, table: &str) -> Result<TableMeta>;

    /// Open a batch stream over the table, ordered stably so offset
    /// pagination is repeatable.
    async fn row_stream(
        &self,
        schema: &str,
        table: &str,
        batch_size: usize,
    ) -> Result<Box<dyn RowStream>>;

    async fn row_count(&self, schema: &str, table: &str) -> Result<u64>;

    async fn list_sequences(&self, schema: &str) -> Result<Vec<String>>;

    async fn sequence_metadata(&self, schema: &str, sequence: &str) -> Result<SequenceMeta>;

    async fn list_triggers(&self, schema: &str) -> Result<Vec<String>>;

    /// Source DDL text for a trigger, or `None` when the dictionary holds
    /// no definition (the object is then skipped, not failed).
    async fn trigger_ddl(&self, schema: &str, trigger: &str) -> Result<Option<String>>;

    async fn list_views(&self, schema: &str) -> Result<Vec<String>>;

    async fn view_ddl(&self, schema: &str, view: &str) -> Result<Option<String>>;

    async fn list_indexes(&self, schema: &str) -> Result<Vec<String>>;

    async fn index_ddl(&self, schema: &str, index: &str) -> Result<Option<String>>;
}
