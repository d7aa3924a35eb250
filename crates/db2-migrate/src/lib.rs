//! Schema and data migration from Oracle / SQL Server to IBM DB2.
//!
//! The crate is organised around a handful of seams:
//!
//! - [`source::SourceAdapter`] reads metadata, DDL and row batches from the
//!   source database (Oracle or SQL Server).
//! - [`target::TargetPool`] executes DDL and bulk inserts against DB2.
//! - [`translate`] holds the pure DDL translators (views, triggers, indexes,
//!   sequences) that rewrite source dialect DDL into DB2 dialect.
//! - [`transfer::TransferEngine`] moves table data through a bounded batch
//!   queue with a worker pool, stall detection and bounded retry.
//! - [`orchestrator::Orchestrator`] drives the whole job through its phases
//!   and reports progress over a channel.
//! - [`status`] persists per-object success/error outcomes per transaction.
//!
//! Real database connectivity lives behind the non-default `odbc` feature;
//! everything else is testable in-process through the traits above.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod source;
pub mod status;
pub mod target;
pub mod transfer;
pub mod translate;
pub mod typemap;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{MigrateError, Result};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, Phase, PhaseSummary, ProgressEvent, SchemaMigrationResult,
};
pub use transfer::{TableMigrationResult, TableStatus};
