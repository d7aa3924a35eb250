//! Parallel, fault-tolerant table data transfer.
//!
//! One producer task reads fixed-size batches from the source into a
//! bounded queue; a pool of insert workers drains it, sanitizing every
//! value against the target column types and bulk-inserting each batch.
//! A failed bulk insert degrades to row-by-row inserts with a durable
//! failed-row log, so one bad row never sinks a batch. A stall monitor
//! and a hard wall-clock timeout guard each table; an incomplete final
//! count triggers at most `max_retries` truncate-and-retry rounds.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{MigrationConfig, SystemResources};
use crate::error::{MigrateError, Result};
use crate::source::SourceAdapter;
use crate::target::{Row, TargetColumn, TargetPool};
use crate::typemap;

mod failure_log;
mod sanitize;

pub use failure_log::FailureLog;
pub use sanitize::{sanitize_row, sanitize_value, LOB_CEILING};

/// Tuning for the transfer pipeline.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Rows per batch.
    pub batch_size: usize,
    /// Insert workers per table.
    pub workers: usize,
    /// Truncate-and-retry ceiling for incomplete tables.
    pub max_retries: u32,
    /// Interval between stall-monitor row-count polls.
    pub stall_poll: Duration,
    /// Consecutive unchanged polls before the table is declared stalled.
    pub stall_threshold: u32,
    /// Hard wall-clock limit per table.
    pub table_timeout: Duration,
    /// Mark results verified when counts match.
    pub verify: bool,
    /// Directory for failed-row logs.
    pub failure_log_dir: PathBuf,
    /// Pause before a truncate-and-retry round.
    pub retry_pause: Duration,
}

impl TransferConfig {
    pub fn from_migration(m: &MigrationConfig, resources: &SystemResources) -> Self {
        TransferConfig {
            batch_size: m.batch_size,
            workers: m.effective_workers(resources),
            max_retries: m.max_retries,
            stall_poll: Duration::from_secs(m.stall_poll_secs),
            stall_threshold: m.stall_threshold,
            table_timeout: Duration::from_secs(m.table_timeout_secs),
            verify: m.verify,
            failure_log_dir: PathBuf::from(&m.failure_log_dir),
            retry_pause: Duration::from_secs(3),
        }
    }

    /// Batches buffered ahead of the workers.
    pub fn queue_capacity(&self) -> usize {
        self.workers * 2
    }
}

/// Terminal state of one table migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Success,
    Failed,
    Skipped,
}

/// Outcome of [`TransferEngine::migrate_table`].
#[derive(Debug, Clone)]
pub struct TableMigrationResult {
    pub table: String,
    pub status: TableStatus,
    pub rows_migrated: u64,
    pub duration: Duration,
    pub error: Option<String>,
    pub verified: bool,
}

impl TableMigrationResult {
    fn new(table: &str) -> Self {
        TableMigrationResult {
            table: table.to_string(),
            status: TableStatus::Failed,
            rows_migrated: 0,
            duration: Duration::ZERO,
            error: None,
            verified: false,
        }
    }
}

/// Moves one table's rows from source to target.
pub struct TransferEngine {
    source: Arc<dyn SourceAdapter>,
    target: Arc<dyn TargetPool>,
    config: TransferConfig,
}

impl TransferEngine {
    pub fn new(
        source: Arc<dyn SourceAdapter>,
        target: Arc<dyn TargetPool>,
        config: TransferConfig,
    ) -> Self {
        TransferEngine {
            source,
            target,
            config,
        }
    }

    /// Migrate one table end to end: idempotent create, pipelined copy,
    /// count verification and bounded truncate-and-retry.
    pub async fn migrate_table(
        &self,
        source_schema: &str,
        target_schema: &str,
        table: &str,
    ) -> TableMigrationResult {
        let started = Instant::now();
        let mut result = TableMigrationResult::new(table);

        let expected = match self.source.row_count(source_schema, table).await {
            Ok(n) => n,
            Err(e) => {
                result.error = Some(e.format_detailed());
                result.duration = started.elapsed();
                return result;
            }
        };
        info!(table, expected, "starting table migration");

        let meta = match self.source.table_metadata(source_schema, table).await {
            Ok(m) => m,
            Err(e) => {
                warn!(table, error = %e, "metadata unavailable, skipping table");
                result.status = TableStatus::Skipped;
                result.error = Some(e.format_detailed());
                result.duration = started.elapsed();
                return result;
            }
        };

        // Re-runs must not touch an existing table's DDL.
        if let Err(e) = self.ensure_table(target_schema, table, &meta).await {
            result.error = Some(e.format_detailed());
            result.duration = started.elapsed();
            return result;
        }

        let columns = match self.target.column_info(target_schema, table).await {
            Ok(c) => Arc::new(c),
            Err(e) => {
                result.error = Some(e.format_detailed());
                result.duration = started.elapsed();
                return result;
            }
        };
        let column_names: Arc<Vec<String>> =
            Arc::new(columns.iter().map(|c| c.name.clone()).collect());

        let mut attempt = 0u32;
        loop {
            let pipeline_err = if expected == 0 {
                None
            } else {
                self.run_pipeline(
                    source_schema,
                    target_schema,
                    table,
                    expected,
                    Arc::clone(&columns),
                    Arc::clone(&column_names),
                )
                .await
                .err()
            };

            let observed = match self.target.row_count(target_schema, table).await {
                Ok(n) => n,
                Err(e) => {
                    result.error = Some(e.format_detailed());
                    result.duration = started.elapsed();
                    return result;
                }
            };
            result.rows_migrated = observed;

            if observed == expected {
                result.status = TableStatus::Success;
                result.verified = self.config.verify;
                result.error = None;
                result.duration = started.elapsed();
                info!(table, rows = observed, "table fully migrated");
                return result;
            }

            if observed > expected {
                // Never truncate data we cannot account for.
                warn!(
                    table,
                    observed, expected, "target holds more rows than expected, refusing retry"
                );
                result.status = TableStatus::Success;
                result.verified = false;
                result.error = None;
                result.duration = started.elapsed();
                return result;
            }

            let cause = pipeline_err
                .map(|e| e.format_detailed())
                .unwrap_or_else(|| {
                    format!("incomplete insert: only {observed}/{expected} rows")
                });

            if attempt >= self.config.max_retries {
                error!(table, observed, expected, "table migration failed: {cause}");
                result.status = TableStatus::Failed;
                result.error = Some(cause);
                result.duration = started.elapsed();
                return result;
            }

            attempt += 1;
            warn!(
                table,
                attempt,
                max = self.config.max_retries,
                "incomplete table, truncating and retrying: {cause}"
            );
            if let Err(e) = self.target.truncate(target_schema, table).await {
                result.status = TableStatus::Failed;
                result.error = Some(e.format_detailed());
                result.duration = started.elapsed();
                return result;
            }
            tokio::time::sleep(self.config.retry_pause).await;
        }
    }

    /// Create the target table unless a fresh catalog check says it is
    /// already there.
    async fn ensure_table(
        &self,
        target_schema: &str,
        table: &str,
        meta: &crate::source::TableMeta,
    ) -> Result<()> {
        if self.target.table_exists(target_schema, table, true).await? {
            info!(table, "table already exists on target, skipping DDL");
            return Ok(());
        }
        let mut target_meta = meta.clone();
        target_meta.schema = target_schema.to_string();
        let ddl = typemap::table_ddl(self.source.source_type(), &target_meta);
        self.target
            .execute_ddl(&format!("{target_schema}.{table}"), &ddl)
            .await?;
        self.target.invalidate_existence(target_schema, table);
        Ok(())
    }

    async fn run_pipeline(
        &self,
        source_schema: &str,
        target_schema: &str,
        table: &str,
        expected: u64,
        columns: Arc<Vec<TargetColumn>>,
        column_names: Arc<Vec<String>>,
    ) -> Result<()> {
        let (tx, rx) = async_channel::bounded::<Vec<Row>>(self.config.queue_capacity());
        let failure_log = Arc::new(FailureLog::new(
            &self.config.failure_log_dir,
            target_schema,
            table,
        ));

        let mut worker_handles: Vec<JoinHandle<Result<u64>>> = Vec::new();
        for worker_id in 0..self.config.workers {
            worker_handles.push(tokio::spawn(insert_worker(
                worker_id,
                rx.clone(),
                Arc::clone(&self.target),
                target_schema.to_string(),
                table.to_string(),
                Arc::clone(&columns),
                Arc::clone(&column_names),
                Arc::clone(&failure_log),
            )));
        }
        drop(rx);

        let producer = tokio::spawn(produce_batches(
            Arc::clone(&self.source),
            source_schema.to_string(),
            table.to_string(),
            self.config.batch_size,
            tx,
        ));

        let mut abort_handles: Vec<_> = worker_handles.iter().map(|h| h.abort_handle()).collect();
        abort_handles.push(producer.abort_handle());

        let drain = async move {
            producer.await??;
            let mut inserted = 0u64;
            for handle in worker_handles {
                inserted += handle.await??;
            }
            debug!(inserted, "pipeline drained");
            Ok::<(), MigrateError>(())
        };

        let monitor = self.stall_monitor(target_schema, table, expected);

        let outcome = tokio::time::timeout(self.config.table_timeout, async {
            tokio::select! {
                res = drain => res,
                err = monitor => Err(err),
            }
        })
        .await;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                for h in &abort_handles {
                    h.abort();
                }
                Err(e)
            }
            Err(_) => {
                for h in &abort_handles {
                    h.abort();
                }
                Err(MigrateError::Timeout {
                    table: table.to_string(),
                    seconds: self.config.table_timeout.as_secs(),
                })
            }
        }
    }

    /// Polls the target row count; resolves only when the count stops
    /// advancing for `stall_threshold` consecutive polls.
    async fn stall_monitor(&self, schema: &str, table: &str, expected: u64) -> MigrateError {
        let mut last_count = 0u64;
        let mut stalled_polls = 0u32;
        loop {
            tokio::time::sleep(self.config.stall_poll).await;
            let current = match self.target.row_count(schema, table).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(table, error = %e, "progress poll failed");
                    continue;
                }
            };
            debug!(table, current, expected, "progress poll");
            if current >= expected {
                // The drain side finishes the pipeline; nothing to flag.
                continue;
            }
            if current == last_count {
                stalled_polls += 1;
                if stalled_polls >= self.config.stall_threshold {
                    return MigrateError::Stall {
                        table: table.to_string(),
                        polls: stalled_polls,
                    };
                }
            } else {
                stalled_polls = 0;
                last_count = current;
            }
        }
    }
}

async fn produce_batches(
    source: Arc<dyn SourceAdapter>,
    schema: String,
    table: String,
    batch_size: usize,
    tx: async_channel::Sender<Vec<Row>>,
) -> Result<()> {
    let mut stream = source.row_stream(&schema, &table, batch_size).await?;
    while let Some(batch) = stream.next_batch().await? {
        if batch.is_empty() {
            continue;
        }
        if tx.send(batch).await.is_err() {
            // All workers are gone; nothing left to feed.
            break;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn insert_worker(
    worker_id: usize,
    rx: async_channel::Receiver<Vec<Row>>,
    target: Arc<dyn TargetPool>,
    schema: String,
    table: String,
    columns: Arc<Vec<TargetColumn>>,
    column_names: Arc<Vec<String>>,
    failure_log: Arc<FailureLog>,
) -> Result<u64> {
    let mut inserted = 0u64;
    while let Ok(batch) = rx.recv().await {
        let sanitized: Vec<Row> = batch.iter().map(|r| sanitize_row(r, &columns)).collect();
        match target
            .bulk_insert(worker_id, &schema, &table, &column_names, &sanitized)
            .await
        {
            Ok(n) => {
                inserted += n;
                debug!(worker_id, rows = n, table, "batch inserted");
            }
            Err(e) => {
                warn!(worker_id, table, error = %e, "bulk insert failed, row-by-row fallback");
                for (idx, row) in sanitized.iter().enumerate() {
                    match target
                        .insert_row(worker_id, &schema, &table, &column_names, row)
                        .await
                    {
                        Ok(()) => inserted += 1,
                        Err(row_err) => {
                            error!(worker_id, table, idx, error = %row_err, "row insert failed");
                            if let Err(log_err) = failure_log
                                .append(idx, &column_names, row, &row_err.to_string())
                                .await
                            {
                                debug!(error = %log_err, "could not record failed row");
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceType;
    use crate::testing::{id_name_columns, id_name_meta, id_name_rows, MockSource, MockTarget};
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> TransferConfig {
        TransferConfig {
            batch_size: 1000,
            workers: 3,
            max_retries: 1,
            stall_poll: Duration::from_millis(40),
            stall_threshold: 3,
            table_timeout: Duration::from_secs(10),
            verify: true,
            failure_log_dir: dir.path().to_path_buf(),
            retry_pause: Duration::from_millis(10),
        }
    }

    fn engine(source: MockSource, target: MockTarget, config: TransferConfig) -> TransferEngine {
        TransferEngine::new(Arc::new(source), Arc::new(target), config)
    }

    #[tokio::test]
    async fn migrates_all_rows_across_batches() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(SourceType::Oracle)
            .with_table(id_name_meta("HR", "EMP"), id_name_rows(2500));
        let target = Arc::new(
            MockTarget::new().with_pending_table("HR", "EMP", id_name_columns()),
        );
        let engine =
            TransferEngine::new(Arc::new(source), Arc::clone(&target) as _, test_config(&dir));

        let result = engine.migrate_table("HR", "HR", "EMP").await;

        assert_eq!(result.status, TableStatus::Success);
        assert_eq!(result.rows_migrated, 2500);
        assert!(result.verified);
        assert!(result.error.is_none());
        assert_eq!(target.stored_rows("HR", "EMP").len(), 2500);
        // table was created exactly once
        let ddl = target.executed_ddl();
        assert_eq!(ddl.len(), 1);
        assert!(ddl[0].1.starts_with("CREATE TABLE \"HR\".\"EMP\""));
    }

    #[tokio::test]
    async fn existing_table_gets_no_ddl() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(SourceType::Oracle)
            .with_table(id_name_meta("HR", "EMP"), id_name_rows(10));
        let target = Arc::new(
            MockTarget::new().with_existing_table("HR", "EMP", id_name_columns()),
        );
        let engine =
            TransferEngine::new(Arc::new(source), Arc::clone(&target) as _, test_config(&dir));

        let result = engine.migrate_table("HR", "HR", "EMP").await;

        assert_eq!(result.status, TableStatus::Success);
        assert!(target.executed_ddl().is_empty());
        assert_eq!(target.stored_rows("HR", "EMP").len(), 10);
    }

    #[tokio::test]
    async fn empty_table_succeeds_without_pipeline() {
        let dir = TempDir::new().unwrap();
        let source =
            MockSource::new(SourceType::Oracle).with_table(id_name_meta("HR", "EMPTY"), vec![]);
        let target = MockTarget::new().with_existing_table("HR", "EMPTY", id_name_columns());
        let engine = engine(source, target, test_config(&dir));

        let result = engine.migrate_table("HR", "HR", "EMPTY").await;
        assert_eq!(result.status, TableStatus::Success);
        assert_eq!(result.rows_migrated, 0);
    }

    #[tokio::test]
    async fn metadata_failure_skips_the_table() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(SourceType::Oracle)
            .with_table(id_name_meta("HR", "EMP"), id_name_rows(5))
            .with_broken_metadata("EMP");
        let target = MockTarget::new().with_pending_table("HR", "EMP", id_name_columns());
        let engine = engine(source, target, test_config(&dir));

        let result = engine.migrate_table("HR", "HR", "EMP").await;
        assert_eq!(result.status, TableStatus::Skipped);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn bulk_failure_falls_back_to_row_inserts() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(SourceType::Oracle)
            .with_table(id_name_meta("HR", "EMP"), id_name_rows(50));
        let target = Arc::new(
            MockTarget::new()
                .with_existing_table("HR", "EMP", id_name_columns())
                .failing_bulk("HR", "EMP"),
        );
        let engine =
            TransferEngine::new(Arc::new(source), Arc::clone(&target) as _, test_config(&dir));

        let result = engine.migrate_table("HR", "HR", "EMP").await;
        assert_eq!(result.status, TableStatus::Success);
        assert_eq!(target.stored_rows("HR", "EMP").len(), 50);
    }

    #[tokio::test]
    async fn failed_rows_are_logged_and_table_fails() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.max_retries = 0;
        // ids are DECIMAL after sanitization
        let source = MockSource::new(SourceType::Oracle)
            .with_table(id_name_meta("HR", "EMP"), id_name_rows(5));
        let target = MockTarget::new()
            .with_existing_table("HR", "EMP", id_name_columns())
            .failing_bulk("HR", "EMP")
            .failing_rows_with_first_value("2");
        let engine = engine(source, target, config);

        let result = engine.migrate_table("HR", "HR", "EMP").await;

        assert_eq!(result.status, TableStatus::Failed);
        assert_eq!(result.rows_migrated, 4);
        assert!(result.error.as_deref().unwrap().contains("4/5"));

        let log = std::fs::read_to_string(dir.path().join("failed_inserts_HR_EMP.log")).unwrap();
        let entry: serde_json::Value = serde_json::from_str(log.lines().next().unwrap()).unwrap();
        assert_eq!(entry["data"]["ID"], "2");
    }

    #[tokio::test]
    async fn incomplete_table_is_truncated_and_retried_once() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(SourceType::Oracle)
            .with_table(id_name_meta("HR", "EMP"), id_name_rows(5));
        // first attempt loses row 2, the retry inserts it
        let target = Arc::new(
            MockTarget::new()
                .with_existing_table("HR", "EMP", id_name_columns())
                .failing_bulk("HR", "EMP")
                .failing_rows_with_first_value_times("2", 1),
        );
        let engine =
            TransferEngine::new(Arc::new(source), Arc::clone(&target) as _, test_config(&dir));

        let result = engine.migrate_table("HR", "HR", "EMP").await;
        assert_eq!(result.status, TableStatus::Success);
        assert_eq!(result.rows_migrated, 5);
        assert_eq!(target.stored_rows("HR", "EMP").len(), 5);
    }

    #[tokio::test]
    async fn retry_is_refused_when_target_has_more_rows_than_expected() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(SourceType::Oracle)
            .with_table(id_name_meta("HR", "EMP"), id_name_rows(2));
        let target = Arc::new(
            MockTarget::new().with_existing_table("HR", "EMP", id_name_columns()),
        );
        // leftover rows from an earlier run
        target
            .bulk_insert(0, "HR", "EMP", &[], &id_name_rows(3))
            .await
            .unwrap();
        let engine =
            TransferEngine::new(Arc::new(source), Arc::clone(&target) as _, test_config(&dir));

        let result = engine.migrate_table("HR", "HR", "EMP").await;
        assert_eq!(result.status, TableStatus::Success);
        assert!(!result.verified);
        assert_eq!(result.rows_migrated, 5);
        // no truncation happened
        assert_eq!(target.stored_rows("HR", "EMP").len(), 5);
    }

    #[tokio::test]
    async fn stalled_table_fails_after_three_unchanged_polls() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.max_retries = 0;
        let source = MockSource::new(SourceType::Oracle)
            .with_table(id_name_meta("HR", "EMP"), id_name_rows(100));
        let target = MockTarget::new()
            .with_existing_table("HR", "EMP", id_name_columns())
            .hanging_inserts("HR", "EMP");
        let engine = engine(source, target, config);

        let result = engine.migrate_table("HR", "HR", "EMP").await;
        assert_eq!(result.status, TableStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("unchanged"));
    }

    #[tokio::test]
    async fn wall_clock_timeout_fails_the_table() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.max_retries = 0;
        config.table_timeout = Duration::from_millis(80);
        config.stall_threshold = 1000;
        let source = MockSource::new(SourceType::Oracle)
            .with_table(id_name_meta("HR", "EMP"), id_name_rows(100));
        let target = MockTarget::new()
            .with_existing_table("HR", "EMP", id_name_columns())
            .hanging_inserts("HR", "EMP");
        let engine = engine(source, target, config);

        let result = engine.migrate_table("HR", "HR", "EMP").await;
        assert_eq!(result.status, TableStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("Timeout"));
    }
}
