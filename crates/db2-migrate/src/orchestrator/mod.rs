//! Drives a schema migration through its phases and streams progress.
//!
//! The table flow runs Validating, MetadataDiscovery, CreatingObjects,
//! MigratingData and Verifying; the full flow appends sequences, a
//! cooldown, then triggers, indexes and views. Every per-object outcome
//! is merged into the status store the moment it is known and mirrored
//! onto the progress channel.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::artifacts::{DdlArchive, DdlSide};
use crate::config::{Config, SystemResources};
use crate::error::{MigrateError, Result};
use crate::source::{ObjectType, SequenceMeta, SourceAdapter, SourceType, TableMeta};
use crate::status::{StatusStore, StatusUpdate};
use crate::target::TargetPool;
use crate::transfer::{TableMigrationResult, TableStatus, TransferConfig, TransferEngine};
use crate::translate;
use crate::typemap;

/// Phases of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validating,
    MetadataDiscovery,
    CreatingObjects,
    MigratingData,
    Verifying,
    Done,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Validating => "validating",
            Phase::MetadataDiscovery => "metadata_discovery",
            Phase::CreatingObjects => "creating_objects",
            Phase::MigratingData => "migrating_data",
            Phase::Verifying => "verifying",
            Phase::Done => "done",
            Phase::Failed => "failed",
        }
    }
}

/// Events published on the progress channel. Channel closure marks the
/// end of the run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Phase(Phase),
    Message(String),
    ObjectDone {
        object_type: ObjectType,
        name: String,
        success: bool,
        detail: Option<String>,
    },
    Progress {
        completed: usize,
        total: usize,
    },
}

/// Success/failure tally for one dependent-object phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl PhaseSummary {
    fn record(&mut self, success: bool) {
        self.total += 1;
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Aggregate outcome of one run.
#[derive(Debug, Clone)]
pub struct SchemaMigrationResult {
    pub transaction_id: String,
    pub schema: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: Vec<TableMigrationResult>,
    pub sequences: PhaseSummary,
    pub triggers: PhaseSummary,
    pub indexes: PhaseSummary,
    pub views: PhaseSummary,
}

impl SchemaMigrationResult {
    pub fn migrated_tables(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| t.status == TableStatus::Success)
            .count()
    }

    pub fn failed_tables(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| t.status != TableStatus::Success)
            .count()
    }

    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_migrated).sum()
    }

    /// Percentage of tables fully migrated.
    pub fn success_rate(&self) -> f64 {
        if self.tables.is_empty() {
            return 0.0;
        }
        self.migrated_tables() as f64 / self.tables.len() as f64 * 100.0
    }
}

/// Knobs for the orchestrator beyond the transfer pipeline itself.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub schema: String,
    /// Schema objects are created in on the target. Defaults to the
    /// source schema.
    pub target_schema: Option<String>,
    /// Restrict the run to these tables; names compare case-insensitively.
    pub table_filter: Option<Vec<String>>,
    pub transfer: TransferConfig,
    /// Concurrent tables in discovery and data phases.
    pub table_parallelism: usize,
    /// Concurrent trigger migrations.
    pub trigger_parallelism: usize,
    /// Pause between the data phase and the dependent-object phases.
    pub cooldown: Duration,
    /// Attempts for view DDL execution.
    pub ddl_retries: u32,
    /// Base of the exponential backoff between view DDL attempts.
    pub ddl_retry_base: Duration,
}

impl OrchestratorConfig {
    pub fn from_config(config: &Config, resources: &SystemResources) -> Self {
        let m = &config.migration;
        OrchestratorConfig {
            schema: m.schema.to_uppercase(),
            target_schema: m.target_schema.as_ref().map(|s| s.to_uppercase()),
            table_filter: m
                .table_filter
                .as_ref()
                .map(|f| f.iter().map(|t| t.to_uppercase()).collect()),
            transfer: TransferConfig::from_migration(m, resources),
            table_parallelism: m.effective_table_parallelism(resources),
            trigger_parallelism: m.trigger_parallelism.max(1),
            cooldown: Duration::from_secs(m.cooldown_secs),
            ddl_retries: 3,
            ddl_retry_base: Duration::from_secs(1),
        }
    }

    /// Effective target schema for the job.
    pub fn target_schema(&self) -> &str {
        self.target_schema.as_deref().unwrap_or(&self.schema)
    }
}

/// Runs whole-schema migrations.
pub struct Orchestrator {
    source: Arc<dyn SourceAdapter>,
    target: Arc<dyn TargetPool>,
    status: Arc<dyn StatusStore>,
    archive: Arc<DdlArchive>,
    engine: Arc<TransferEngine>,
    config: OrchestratorConfig,
    progress: mpsc::Sender<ProgressEvent>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn SourceAdapter>,
        target: Arc<dyn TargetPool>,
        status: Arc<dyn StatusStore>,
        archive: Arc<DdlArchive>,
        config: OrchestratorConfig,
    ) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(256);
        let engine = Arc::new(TransferEngine::new(
            Arc::clone(&source),
            Arc::clone(&target),
            config.transfer.clone(),
        ));
        (
            Orchestrator {
                source,
                target,
                status,
                archive,
                engine,
                config,
                progress: tx,
            },
            rx,
        )
    }

    async fn emit(&self, event: ProgressEvent) {
        // A dropped receiver is not an error; the run continues headless.
        let _ = self.progress.send(event).await;
    }

    async fn merge_status(&self, transaction_id: &str, update: StatusUpdate) {
        if let Err(e) = self
            .status
            .merge(
                transaction_id,
                &self.config.schema,
                self.source.source_type(),
                update,
            )
            .await
        {
            warn!(transaction_id, error = %e, "status persistence failed");
        }
    }

    async fn record_object(
        &self,
        transaction_id: &str,
        object_type: ObjectType,
        name: &str,
        success: bool,
        detail: Option<String>,
    ) {
        let update = if success {
            StatusUpdate::success(object_type, name)
        } else {
            StatusUpdate::error(object_type, name)
        };
        self.merge_status(transaction_id, update).await;
        self.emit(ProgressEvent::ObjectDone {
            object_type,
            name: name.to_string(),
            success,
            detail,
        })
        .await;
    }

    /// Migrate tables and their data only.
    pub async fn run_tables(&self, transaction_id: Option<String>) -> Result<SchemaMigrationResult> {
        let transaction_id = transaction_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let started_at = Utc::now();

        let outcome = self.table_flow(&transaction_id).await;
        match outcome {
            Ok(tables) => {
                self.emit(ProgressEvent::Phase(Phase::Done)).await;
                Ok(SchemaMigrationResult {
                    transaction_id,
                    schema: self.config.schema.clone(),
                    started_at,
                    finished_at: Utc::now(),
                    tables,
                    sequences: PhaseSummary::default(),
                    triggers: PhaseSummary::default(),
                    indexes: PhaseSummary::default(),
                    views: PhaseSummary::default(),
                })
            }
            Err(e) => {
                self.emit(ProgressEvent::Phase(Phase::Failed)).await;
                self.emit(ProgressEvent::Message(e.format_detailed())).await;
                Err(e)
            }
        }
    }

    /// Migrate tables, then sequences, triggers, indexes and views.
    pub async fn run_full(&self, transaction_id: Option<String>) -> Result<SchemaMigrationResult> {
        let transaction_id = transaction_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let started_at = Utc::now();

        let tables = match self.table_flow(&transaction_id).await {
            Ok(t) => t,
            Err(e) => {
                self.emit(ProgressEvent::Phase(Phase::Failed)).await;
                self.emit(ProgressEvent::Message(e.format_detailed())).await;
                return Err(e);
            }
        };

        let sequences = self.sequence_phase(&transaction_id).await;

        // Let the catalog settle before dependent objects reference it.
        tokio::time::sleep(self.config.cooldown).await;

        let triggers = self.trigger_phase(&transaction_id).await;
        let indexes = self.index_phase(&transaction_id).await;
        let views = self.view_phase(&transaction_id).await;

        self.emit(ProgressEvent::Phase(Phase::Done)).await;
        self.emit(ProgressEvent::Message(format!(
            "migration complete for schema {}",
            self.config.schema
        )))
        .await;

        Ok(SchemaMigrationResult {
            transaction_id,
            schema: self.config.schema.clone(),
            started_at,
            finished_at: Utc::now(),
            tables,
            sequences,
            triggers,
            indexes,
            views,
        })
    }

    async fn table_flow(&self, transaction_id: &str) -> Result<Vec<TableMigrationResult>> {
        self.emit(ProgressEvent::Phase(Phase::Validating)).await;
        let table_names = self.validate().await?;
        info!(
            schema = %self.config.schema,
            tables = table_names.len(),
            "validation passed"
        );

        self.emit(ProgressEvent::Phase(Phase::MetadataDiscovery))
            .await;
        let (metas, skipped) = self.discover_metadata(transaction_id, &table_names).await;

        self.emit(ProgressEvent::Phase(Phase::CreatingObjects)).await;
        let creatable = self.create_tables(transaction_id, &metas).await;

        self.emit(ProgressEvent::Phase(Phase::MigratingData)).await;
        let mut results = self.migrate_data(transaction_id, &creatable).await;
        results.extend(skipped);

        if self.config.transfer.verify {
            self.emit(ProgressEvent::Phase(Phase::Verifying)).await;
            let verified = results
                .iter()
                .filter(|r| r.status == TableStatus::Success && r.verified)
                .count();
            self.emit(ProgressEvent::Message(format!(
                "verified {verified}/{} tables by row count",
                results.len()
            )))
            .await;
        }

        Ok(results)
    }

    /// Source must expose at least one table after filtering; the target
    /// schema must exist or be creatable.
    async fn validate(&self) -> Result<Vec<String>> {
        let mut tables = self.source.list_tables(&self.config.schema).await?;
        if let Some(filter) = &self.config.table_filter {
            let keep: HashSet<String> = filter.iter().map(|t| t.to_uppercase()).collect();
            tables.retain(|t| keep.contains(&t.to_uppercase()));
            if tables.is_empty() {
                return Err(MigrateError::metadata(
                    self.config.schema.clone(),
                    "no tables match the table filter",
                ));
            }
        }
        if tables.is_empty() {
            return Err(MigrateError::metadata(
                self.config.schema.clone(),
                "source schema has no tables",
            ));
        }
        let target_schema = self.config.target_schema();
        if !self.target.schema_exists(target_schema).await? {
            self.target.create_schema_if_absent(target_schema).await?;
        }
        Ok(tables)
    }

    /// Fetch table metadata in parallel. A failed table is reported and
    /// skipped; it never aborts the run.
    async fn discover_metadata(
        &self,
        transaction_id: &str,
        tables: &[String],
    ) -> (Vec<TableMeta>, Vec<TableMigrationResult>) {
        let semaphore = Arc::new(Semaphore::new(self.config.table_parallelism));
        let mut handles = Vec::with_capacity(tables.len());
        for table in tables {
            let source = Arc::clone(&self.source);
            let schema = self.config.schema.clone();
            let table = table.clone();
            let permit = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                let meta = source.table_metadata(&schema, &table).await;
                (table, meta)
            }));
        }

        let mut metas = Vec::new();
        let mut skipped = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((_, Ok(meta))) => metas.push(meta),
                Ok((table, Err(e))) => {
                    warn!(table, error = %e, "metadata discovery failed, skipping table");
                    self.record_object(
                        transaction_id,
                        ObjectType::Tables,
                        &table,
                        false,
                        Some(e.format_detailed()),
                    )
                    .await;
                    skipped.push(TableMigrationResult {
                        table,
                        status: TableStatus::Skipped,
                        rows_migrated: 0,
                        duration: Duration::ZERO,
                        error: Some(e.format_detailed()),
                        verified: false,
                    });
                }
                Err(join_err) => {
                    error!(error = %join_err, "metadata task panicked");
                }
            }
        }
        (metas, skipped)
    }

    /// Create target tables idempotently, fanning out over the same pool
    /// width as discovery. A failed creation drops the table from the
    /// data phase, never the run.
    async fn create_tables(&self, transaction_id: &str, metas: &[TableMeta]) -> Vec<TableMeta> {
        let semaphore = Arc::new(Semaphore::new(self.config.table_parallelism));
        let mut handles = Vec::with_capacity(metas.len());
        for meta in metas {
            let this = self.clone_refs();
            let meta = meta.clone();
            let permit = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                let outcome = this.create_table(&meta).await;
                (meta, outcome)
            }));
        }

        let mut creatable = Vec::with_capacity(metas.len());
        for handle in handles {
            match handle.await {
                Ok((meta, Ok(()))) => creatable.push(meta),
                Ok((meta, Err(e))) => {
                    error!(table = %meta.name, error = %e, "table creation failed");
                    self.record_object(
                        transaction_id,
                        ObjectType::Tables,
                        &meta.name,
                        false,
                        Some(e.format_detailed()),
                    )
                    .await;
                }
                Err(join_err) => {
                    error!(error = %join_err, "table creation task panicked");
                }
            }
        }
        creatable
    }

    /// Fan transfer jobs out over the table pool.
    async fn migrate_data(
        &self,
        transaction_id: &str,
        metas: &[TableMeta],
    ) -> Vec<TableMigrationResult> {
        let total = metas.len();
        let semaphore = Arc::new(Semaphore::new(self.config.table_parallelism));
        let mut handles = Vec::with_capacity(total);
        for meta in metas {
            let engine = Arc::clone(&self.engine);
            let source_schema = self.config.schema.clone();
            let target_schema = self.config.target_schema().to_string();
            let table = meta.name.clone();
            let permit = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                engine
                    .migrate_table(&source_schema, &target_schema, &table)
                    .await
            }));
        }

        let mut results = Vec::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok(result) => {
                    let success = result.status == TableStatus::Success;
                    self.record_object(
                        transaction_id,
                        ObjectType::Tables,
                        &result.table,
                        success,
                        result.error.clone(),
                    )
                    .await;
                    results.push(result);
                    self.emit(ProgressEvent::Progress {
                        completed: results.len(),
                        total,
                    })
                    .await;
                }
                Err(join_err) => {
                    error!(error = %join_err, "transfer task panicked");
                }
            }
        }
        results
    }

    /// Sequences migrate sequentially; continuity arithmetic is cheap and
    /// ordering failures are easier to read.
    async fn sequence_phase(&self, transaction_id: &str) -> PhaseSummary {
        let mut summary = PhaseSummary::default();
        let names = match self.source.list_sequences(&self.config.schema).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "could not list sequences");
                return summary;
            }
        };
        self.emit(ProgressEvent::Message(format!(
            "migrating {} sequences",
            names.len()
        )))
        .await;

        for name in names {
            let success = self.migrate_sequence(&name).await;
            let detail = success.as_ref().err().map(|e| e.format_detailed());
            self.record_object(
                transaction_id,
                ObjectType::Sequences,
                &name,
                success.is_ok(),
                detail,
            )
            .await;
            summary.record(success.is_ok());
        }
        summary
    }

    async fn migrate_sequence(&self, name: &str) -> Result<()> {
        let meta = self
            .source
            .sequence_metadata(&self.config.schema, name)
            .await?;
        let target_schema = self.config.target_schema();
        let target_ddl = translate::sequence_ddl(target_schema, &meta)?;
        let source_ddl = source_sequence_ddl(&self.config.schema, &meta);
        self.archive
            .save_pair(
                &self.config.schema,
                ObjectType::Sequences,
                name,
                &source_ddl,
                &target_ddl,
            )
            .await?;

        if self.target.sequence_exists(target_schema, name).await? {
            info!(sequence = name, "sequence already exists, skipping DDL");
            return Ok(());
        }
        self.target
            .execute_ddl(&format!("{target_schema}.{name}"), &target_ddl)
            .await
    }

    /// Triggers fan out over their own pool and share the cached table
    /// existence answers within the phase.
    async fn trigger_phase(&self, transaction_id: &str) -> PhaseSummary {
        let mut summary = PhaseSummary::default();
        let names = match self.source.list_triggers(&self.config.schema).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "could not list triggers");
                return summary;
            }
        };
        self.emit(ProgressEvent::Message(format!(
            "migrating {} triggers",
            names.len()
        )))
        .await;

        let semaphore = Arc::new(Semaphore::new(self.config.trigger_parallelism));
        let mut handles = Vec::with_capacity(names.len());
        for name in names {
            let permit = Arc::clone(&semaphore);
            let this = self.clone_refs();
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                let outcome = this.migrate_trigger(&name).await;
                (name, outcome)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((name, outcome)) => {
                    let detail = outcome.as_ref().err().map(|e| e.format_detailed());
                    self.record_object(
                        transaction_id,
                        ObjectType::Triggers,
                        &name,
                        outcome.is_ok(),
                        detail,
                    )
                    .await;
                    summary.record(outcome.is_ok());
                }
                Err(join_err) => {
                    error!(error = %join_err, "trigger task panicked");
                }
            }
        }
        summary
    }

    async fn index_phase(&self, transaction_id: &str) -> PhaseSummary {
        let mut summary = PhaseSummary::default();
        let names = match self.source.list_indexes(&self.config.schema).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "could not list indexes");
                return summary;
            }
        };
        self.emit(ProgressEvent::Message(format!(
            "migrating {} indexes",
            names.len()
        )))
        .await;

        for name in names {
            let outcome = self.migrate_index(&name).await;
            let detail = outcome.as_ref().err().map(|e| e.format_detailed());
            self.record_object(
                transaction_id,
                ObjectType::Indexes,
                &name,
                outcome.is_ok(),
                detail,
            )
            .await;
            summary.record(outcome.is_ok());
        }
        summary
    }

    async fn view_phase(&self, transaction_id: &str) -> PhaseSummary {
        let mut summary = PhaseSummary::default();
        let names = match self.source.list_views(&self.config.schema).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "could not list views");
                return summary;
            }
        };
        self.emit(ProgressEvent::Message(format!(
            "migrating {} views",
            names.len()
        )))
        .await;

        for name in names {
            let outcome = self.migrate_view(&name).await;
            let detail = outcome.as_ref().err().map(|e| e.format_detailed());
            self.record_object(
                transaction_id,
                ObjectType::Views,
                &name,
                outcome.is_ok(),
                detail,
            )
            .await;
            summary.record(outcome.is_ok());
        }
        summary
    }

    async fn migrate_index(&self, name: &str) -> Result<()> {
        let schema = &self.config.schema;
        let source_ddl = self
            .source
            .index_ddl(schema, name)
            .await?
            .ok_or_else(|| MigrateError::metadata(name, "index DDL not found"))?;

        let translation = translate::translate_index(name, &source_ddl)?;
        let target_schema = self.config.target_schema();
        let table_schema = remap_schema(&translation.table_schema, schema, target_schema);
        // Fresh catalog read; the index is useless without its table.
        if !self
            .target
            .table_exists(&table_schema, &translation.table, true)
            .await?
        {
            return Err(MigrateError::existence(
                name,
                format!("table {table_schema}.{} not on target", translation.table),
            ));
        }

        let ddl = retarget_ddl(&translation.ddl, schema, target_schema);
        self.archive
            .save_pair(schema, ObjectType::Indexes, name, &source_ddl, &ddl)
            .await?;
        self.target
            .execute_ddl(&format!("{target_schema}.{name}"), &ddl)
            .await
    }

    async fn migrate_view(&self, name: &str) -> Result<()> {
        let schema = &self.config.schema;
        let source_ddl = self
            .source
            .view_ddl(schema, name)
            .await?
            .ok_or_else(|| MigrateError::metadata(name, "view DDL not found"))?;

        let translation = translate::translate_view(name, &source_ddl)?;
        let target_schema = self.config.target_schema();

        let mut missing = Vec::new();
        let mut checked = HashSet::new();
        for (ref_schema, table) in &translation.referenced_tables {
            let ref_schema = match ref_schema {
                Some(s) => remap_schema(s, schema, target_schema),
                None => target_schema.to_string(),
            };
            if !checked.insert((ref_schema.clone(), table.clone())) {
                continue;
            }
            if !self.target.table_exists(&ref_schema, table, true).await? {
                missing.push(format!("{ref_schema}.{table}"));
            }
        }
        if !missing.is_empty() {
            return Err(MigrateError::existence(
                name,
                format!("missing referenced tables: {}", missing.join(", ")),
            ));
        }

        let ddl = retarget_ddl(&translation.ddl, schema, target_schema);
        self.archive
            .save_pair(schema, ObjectType::Views, name, &source_ddl, &ddl)
            .await?;

        // Views are last in the chain and occasionally race catalog
        // propagation, hence the backoff loop.
        let mut last_err = None;
        for attempt in 0..self.config.ddl_retries {
            match self
                .target
                .execute_ddl(&format!("{target_schema}.{name}"), &ddl)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(view = name, attempt, error = %e, "view DDL failed");
                    last_err = Some(e);
                    tokio::time::sleep(self.config.ddl_retry_base * 2u32.pow(attempt)).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| MigrateError::ddl(name, "view DDL failed")))
    }

    /// Cheap handle clone for spawned phase tasks.
    fn clone_refs(&self) -> OrchestratorRefs {
        OrchestratorRefs {
            source: Arc::clone(&self.source),
            target: Arc::clone(&self.target),
            archive: Arc::clone(&self.archive),
            schema: self.config.schema.clone(),
            target_schema: self.config.target_schema().to_string(),
        }
    }
}

/// Subset of orchestrator state usable from spawned tasks.
struct OrchestratorRefs {
    source: Arc<dyn SourceAdapter>,
    target: Arc<dyn TargetPool>,
    archive: Arc<DdlArchive>,
    schema: String,
    target_schema: String,
}

impl OrchestratorRefs {
    /// Archive the generated DDL, then create the table unless a fresh
    /// catalog check says it is already there.
    async fn create_table(&self, meta: &TableMeta) -> Result<()> {
        let mut target_meta = meta.clone();
        target_meta.schema = self.target_schema.clone();
        let ddl = typemap::table_ddl(self.source.source_type(), &target_meta);

        if let Err(e) = self
            .archive
            .save(
                DdlSide::Target,
                &self.schema,
                ObjectType::Tables,
                &meta.name,
                &ddl,
            )
            .await
        {
            warn!(table = %meta.name, error = %e, "could not archive table ddl");
        }

        if self
            .target
            .table_exists(&self.target_schema, &meta.name, true)
            .await?
        {
            info!(table = %meta.name, "table already present, keeping as is");
            return Ok(());
        }
        self.target
            .execute_ddl(&format!("{}.{}", self.target_schema, meta.name), &ddl)
            .await?;
        self.target
            .invalidate_existence(&self.target_schema, &meta.name);
        Ok(())
    }

    async fn migrate_trigger(&self, name: &str) -> Result<()> {
        let source_ddl = self
            .source
            .trigger_ddl(&self.schema, name)
            .await?
            .ok_or_else(|| MigrateError::metadata(name, "trigger DDL not found"))?;

        let target_schema = self.target_schema.as_str();
        let translation = match self.source.source_type() {
            SourceType::Oracle => {
                translate::translate_oracle_trigger(target_schema, name, &source_ddl)?
            }
            SourceType::SqlServer => {
                translate::translate_mssql_trigger(target_schema, name, &source_ddl)?
            }
        };

        let table_schema = match &translation.table_schema {
            Some(s) => remap_schema(s, &self.schema, target_schema),
            None => target_schema.to_string(),
        };
        // Cached answer is fine: the data phase created these tables
        // before the cooldown.
        if !self
            .target
            .table_exists(&table_schema, &translation.table, false)
            .await?
        {
            return Err(MigrateError::existence(
                name,
                format!("table {table_schema}.{} not on target", translation.table),
            ));
        }

        let ddl = retarget_ddl(&translation.ddl, &self.schema, target_schema);
        self.archive
            .save_pair(&self.schema, ObjectType::Triggers, name, &source_ddl, &ddl)
            .await?;
        self.target
            .execute_ddl(&format!("{target_schema}.{name}"), &ddl)
            .await
    }
}

/// Map a schema name appearing in source DDL onto the target side.
fn remap_schema(schema: &str, source: &str, target: &str) -> String {
    if schema.eq_ignore_ascii_case(source) {
        target.to_string()
    } else {
        schema.to_string()
    }
}

/// Rewrite source-schema qualifiers inside generated DDL when the job
/// targets a different schema.
fn retarget_ddl(ddl: &str, source: &str, target: &str) -> String {
    if source.eq_ignore_ascii_case(target) {
        return ddl.to_string();
    }
    ddl.replace(&format!("\"{source}\"."), &format!("\"{target}\"."))
        .replace(&format!(" {source}."), &format!(" {target}."))
}

/// Reconstructed source-dialect sequence DDL for the archive.
fn source_sequence_ddl(schema: &str, meta: &SequenceMeta) -> String {
    format!(
        "CREATE SEQUENCE {}.{}\nSTART WITH {}\nINCREMENT BY {}\nMINVALUE {}\nMAXVALUE {}\n{}\nCACHE {}",
        schema.to_uppercase(),
        meta.name.to_uppercase(),
        meta.last_value,
        meta.increment_by,
        meta.min_value,
        meta.max_value,
        if meta.cycle { "CYCLE" } else { "NOCYCLE" },
        meta.cache_size,
    )
}
