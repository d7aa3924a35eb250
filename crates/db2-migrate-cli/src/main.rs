//! db2-migrate CLI - Oracle / SQL Server to IBM DB2 schema migration.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, Level};

use db2_migrate::artifacts::DdlArchive;
use db2_migrate::config::SystemResources;
use db2_migrate::source::SourceAdapter;
use db2_migrate::status::{FileStatusStore, StatusStore};
use db2_migrate::target::TargetPool;
use db2_migrate::{
    Config, MigrateError, Orchestrator, OrchestratorConfig, ProgressEvent, SchemaMigrationResult,
};

#[derive(Parser)]
#[command(name = "db2-migrate")]
#[command(about = "Migrate Oracle / SQL Server schemas and data to IBM DB2")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Print per-object progress lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate tables and data only
    Run {
        /// Override the schema from the configuration file
        #[arg(long)]
        schema: Option<String>,

        /// Migrate into a different target schema (defaults to the source schema)
        #[arg(long)]
        target_schema: Option<String>,

        /// Migrate only these tables (comma separated)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Override the insert worker count
        #[arg(long)]
        workers: Option<usize>,

        /// Reuse a transaction id (continues its status document)
        #[arg(long)]
        transaction_id: Option<String>,
    },

    /// Migrate tables, data, sequences, triggers, indexes and views
    Full {
        #[arg(long)]
        schema: Option<String>,

        #[arg(long)]
        target_schema: Option<String>,

        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,

        #[arg(long)]
        workers: Option<usize>,

        #[arg(long)]
        transaction_id: Option<String>,
    },

    /// Show the status document for a transaction
    Status {
        transaction_id: String,
    },

    /// Check that the source schema is reachable and has tables
    Validate,

    /// Test source and target connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();
    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config).await?;
    info!("loaded configuration from {}", cli.config.display());

    match cli.command {
        Commands::Run {
            schema,
            target_schema,
            tables,
            workers,
            transaction_id,
        } => {
            apply_overrides(&mut config, schema, target_schema, tables, workers);
            let (orch, rx) = build_orchestrator(&config).await?;
            spawn_progress_printer(rx, cli.progress);
            let result = orch.run_tables(transaction_id).await?;
            print_result(&result, false);
        }

        Commands::Full {
            schema,
            target_schema,
            tables,
            workers,
            transaction_id,
        } => {
            apply_overrides(&mut config, schema, target_schema, tables, workers);
            let (orch, rx) = build_orchestrator(&config).await?;
            spawn_progress_printer(rx, cli.progress);
            let result = orch.run_full(transaction_id).await?;
            print_result(&result, true);
        }

        Commands::Status { transaction_id } => {
            let store = FileStatusStore::new(&config.migration.status_dir);
            match store.load(&transaction_id).await? {
                Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
                None => {
                    return Err(MigrateError::Status(format!(
                        "no status document for transaction {transaction_id}"
                    )))
                }
            }
        }

        Commands::Validate => {
            let source = build_source(&config).await?;
            let tables = source.list_tables(&config.migration.schema).await?;
            if tables.is_empty() {
                return Err(MigrateError::Config(format!(
                    "schema {} has no tables",
                    config.migration.schema
                )));
            }
            println!(
                "Schema {} is valid: {} tables found",
                config.migration.schema,
                tables.len()
            );
        }

        Commands::HealthCheck => {
            let mut healthy = true;
            match build_source(&config).await {
                Ok(_) => println!("  Source ({}): OK", config.source.source_type),
                Err(e) => {
                    healthy = false;
                    println!("  Source ({}): FAILED\n    {e}", config.source.source_type);
                }
            }
            match build_target(&config).await {
                Ok(_) => println!("  Target (DB2): OK"),
                Err(e) => {
                    healthy = false;
                    println!("  Target (DB2): FAILED\n    {e}");
                }
            }
            println!(
                "\n  Overall: {}",
                if healthy { "HEALTHY" } else { "UNHEALTHY" }
            );
            if !healthy {
                return Err(MigrateError::Config("health check failed".to_string()));
            }
        }
    }

    Ok(())
}

fn apply_overrides(
    config: &mut Config,
    schema: Option<String>,
    target_schema: Option<String>,
    tables: Vec<String>,
    workers: Option<usize>,
) {
    if let Some(schema) = schema {
        config.migration.schema = schema;
    }
    if let Some(target_schema) = target_schema {
        config.migration.target_schema = Some(target_schema);
    }
    if !tables.is_empty() {
        config.migration.table_filter = Some(tables);
    }
    if let Some(workers) = workers {
        config.migration.workers = Some(workers);
    }
}

async fn build_orchestrator(
    config: &Config,
) -> Result<(Orchestrator, tokio::sync::mpsc::Receiver<ProgressEvent>), MigrateError> {
    if config.migration.schema.is_empty() {
        return Err(MigrateError::Config(
            "migration.schema must be set (or pass --schema)".to_string(),
        ));
    }
    let source = build_source(config).await?;
    let target = build_target(config).await?;
    let status: Arc<dyn StatusStore> =
        Arc::new(FileStatusStore::new(&config.migration.status_dir));
    let archive = Arc::new(DdlArchive::new(config.migration.ddl_dir.clone()));
    let resources = SystemResources::detect();
    let orch_config = OrchestratorConfig::from_config(config, &resources);
    info!(
        schema = %orch_config.schema,
        workers = orch_config.transfer.workers,
        "orchestrator ready"
    );
    Ok(Orchestrator::new(source, target, status, archive, orch_config))
}

#[cfg(feature = "odbc")]
async fn build_source(config: &Config) -> Result<Arc<dyn SourceAdapter>, MigrateError> {
    use db2_migrate::source::SourceType;
    match config.source.source_type {
        SourceType::Oracle => Ok(Arc::new(
            db2_migrate::source::oracle::OracleOdbcSource::new(&config.source).await?,
        )),
        SourceType::SqlServer => Ok(Arc::new(
            db2_migrate::source::mssql::MssqlOdbcSource::new(&config.source).await?,
        )),
    }
}

#[cfg(feature = "odbc")]
async fn build_target(config: &Config) -> Result<Arc<dyn TargetPool>, MigrateError> {
    Ok(Arc::new(
        db2_migrate::target::db2::Db2Pool::connect(&config.target, &config.migration.schema)
            .await?,
    ))
}

#[cfg(not(feature = "odbc"))]
async fn build_source(_config: &Config) -> Result<Arc<dyn SourceAdapter>, MigrateError> {
    Err(MigrateError::Config(
        "this binary was built without database connectivity; \
         rebuild with --features odbc"
            .to_string(),
    ))
}

#[cfg(not(feature = "odbc"))]
async fn build_target(_config: &Config) -> Result<Arc<dyn TargetPool>, MigrateError> {
    Err(MigrateError::Config(
        "this binary was built without database connectivity; \
         rebuild with --features odbc"
            .to_string(),
    ))
}

/// Forward progress events to stderr. When `--progress` is off the
/// receiver is still drained so the orchestrator never blocks on a full
/// channel.
fn spawn_progress_printer(
    mut rx: tokio::sync::mpsc::Receiver<ProgressEvent>,
    print: bool,
) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !print {
                continue;
            }
            match event {
                ProgressEvent::Phase(phase) => eprintln!("phase: {}", phase.as_str()),
                ProgressEvent::Message(msg) => eprintln!("{msg}"),
                ProgressEvent::ObjectDone {
                    object_type,
                    name,
                    success,
                    detail,
                } => {
                    let mark = if success { "ok" } else { "error" };
                    match detail {
                        Some(detail) if !success => {
                            eprintln!("{}: {name} {mark} ({detail})", object_type.as_str())
                        }
                        _ => eprintln!("{}: {name} {mark}", object_type.as_str()),
                    }
                }
                ProgressEvent::Progress { completed, total } => {
                    eprintln!("tables: {completed}/{total}")
                }
            }
        }
    });
}

fn print_result(result: &SchemaMigrationResult, full: bool) {
    let duration = result.finished_at - result.started_at;
    println!("\nMigration completed");
    println!("  Transaction: {}", result.transaction_id);
    println!("  Schema: {}", result.schema);
    println!("  Duration: {:.2}s", duration.num_milliseconds() as f64 / 1000.0);
    println!(
        "  Tables: {}/{} ({:.1}%)",
        result.migrated_tables(),
        result.tables.len(),
        result.success_rate()
    );
    println!("  Rows: {}", result.total_rows());
    if full {
        println!(
            "  Sequences: {}/{}",
            result.sequences.succeeded, result.sequences.total
        );
        println!(
            "  Triggers: {}/{}",
            result.triggers.succeeded, result.triggers.total
        );
        println!(
            "  Indexes: {}/{}",
            result.indexes.succeeded, result.indexes.total
        );
        println!("  Views: {}/{}", result.views.succeeded, result.views.total);
    }
    let failed: Vec<&str> = result
        .tables
        .iter()
        .filter(|t| t.status != db2_migrate::TableStatus::Success)
        .map(|t| t.table.as_str())
        .collect();
    if !failed.is_empty() {
        println!("  Failed tables: {failed:?}");
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);
    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
