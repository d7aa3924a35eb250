use serde::{Deserialize, Serialize};

use crate::source::SourceType;

/// Top-level configuration, loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub host: String,
    pub port: u16,
    /// Database name (SQL Server) or service name (Oracle).
    pub database: String,
    pub username: String,
    pub password: String,
    /// ODBC driver name; defaults per dialect when omitted.
    #[serde(default)]
    pub odbc_driver: Option<String>,
}

impl SourceConfig {
    /// ODBC connection string for the source database.
    pub fn connection_string(&self) -> String {
        match self.source_type {
            SourceType::Oracle => {
                let driver = self.odbc_driver.as_deref().unwrap_or("Oracle ODBC Driver");
                format!(
                    "Driver={{{driver}}};DBQ=//{}:{}/{};UID={};PWD={};",
                    self.host, self.port, self.database, self.username, self.password
                )
            }
            SourceType::SqlServer => {
                let driver = self
                    .odbc_driver
                    .as_deref()
                    .unwrap_or("ODBC Driver 18 for SQL Server");
                format!(
                    "Driver={{{driver}}};Server={},{};Database={};UID={};PWD={};\
                     TrustServerCertificate=yes;",
                    self.host, self.port, self.database, self.username, self.password
                )
            }
        }
    }
}

/// DB2 target connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// SECURITY keyword for the DB2 CLI driver (for example `SSL`).
    #[serde(default)]
    pub security: Option<String>,
    #[serde(default)]
    pub odbc_driver: Option<String>,
}

impl TargetConfig {
    /// ODBC connection string for the DB2 target.
    pub fn connection_string(&self, current_schema: &str) -> String {
        let driver = self.odbc_driver.as_deref().unwrap_or("Db2");
        let mut dsn = format!(
            "Driver={{{driver}}};Database={};Hostname={};Port={};Uid={};Pwd={};",
            self.database, self.host, self.port, self.username, self.password
        );
        if let Some(security) = &self.security {
            dsn.push_str(&format!("Security={security};"));
        }
        dsn.push_str(&format!("CurrentSchema={};", current_schema.to_uppercase()));
        dsn
    }
}

/// Tuning knobs for a migration run. Worker counts left unset are
/// auto-tuned from the machine's core count at job start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Schema to migrate.
    #[serde(default)]
    pub schema: String,

    /// Target schema; defaults to the source schema when unset.
    #[serde(default)]
    pub target_schema: Option<String>,

    /// Migrate only the named tables; all tables when unset.
    #[serde(default)]
    pub table_filter: Option<Vec<String>>,

    /// Rows per batch through the transfer pipeline.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Insert workers per table. Auto: `min(12, cores)`.
    #[serde(default)]
    pub workers: Option<usize>,

    /// Concurrent tables in metadata discovery and data phases.
    #[serde(default)]
    pub table_parallelism: Option<usize>,

    /// Concurrent trigger migrations in the full flow.
    #[serde(default = "default_trigger_parallelism")]
    pub trigger_parallelism: usize,

    /// Truncate-and-retry ceiling for incomplete tables.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Seconds between stall-monitor row-count polls.
    #[serde(default = "default_stall_poll_secs")]
    pub stall_poll_secs: u64,

    /// Consecutive unchanged polls before a table is declared stalled.
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold: u32,

    /// Per-table wall-clock limit in seconds.
    #[serde(default = "default_table_timeout_secs")]
    pub table_timeout_secs: u64,

    /// Pause between the data phase and dependent-object phases.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Compare source and target row counts after each table.
    #[serde(default = "default_true")]
    pub verify: bool,

    /// Directory for per-transaction status documents.
    #[serde(default = "default_status_dir")]
    pub status_dir: String,

    /// Root of the source/target DDL archive trees.
    #[serde(default = "default_ddl_dir")]
    pub ddl_dir: String,

    /// Directory for per-table failed-row logs.
    #[serde(default = "default_failure_log_dir")]
    pub failure_log_dir: String,
}

fn default_batch_size() -> usize {
    1000
}
fn default_trigger_parallelism() -> usize {
    32
}
fn default_max_retries() -> u32 {
    1
}
fn default_stall_poll_secs() -> u64 {
    10
}
fn default_stall_threshold() -> u32 {
    3
}
fn default_table_timeout_secs() -> u64 {
    3600
}
fn default_cooldown_secs() -> u64 {
    3
}
fn default_true() -> bool {
    true
}
fn default_status_dir() -> String {
    "migration_status".to_string()
}
fn default_ddl_dir() -> String {
    "generated_ddls".to_string()
}
fn default_failure_log_dir() -> String {
    "logs".to_string()
}

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig {
            schema: String::new(),
            target_schema: None,
            table_filter: None,
            batch_size: default_batch_size(),
            workers: None,
            table_parallelism: None,
            trigger_parallelism: default_trigger_parallelism(),
            max_retries: default_max_retries(),
            stall_poll_secs: default_stall_poll_secs(),
            stall_threshold: default_stall_threshold(),
            table_timeout_secs: default_table_timeout_secs(),
            cooldown_secs: default_cooldown_secs(),
            verify: default_true(),
            status_dir: default_status_dir(),
            ddl_dir: default_ddl_dir(),
            failure_log_dir: default_failure_log_dir(),
        }
    }
}
