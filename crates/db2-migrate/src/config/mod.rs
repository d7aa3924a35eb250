//! Configuration loading, validation and worker auto-tuning.

use std::path::Path;

use sysinfo::System;
use tracing::info;

use crate::error::{MigrateError, Result};

mod types;

pub use types::{Config, MigrationConfig, SourceConfig, TargetConfig};

/// Worker-pool ceiling when auto-tuning from core count.
const MAX_AUTO_WORKERS: usize = 12;

/// Detected machine resources used for auto-tuning.
#[derive(Debug, Clone, Copy)]
pub struct SystemResources {
    pub cpu_cores: usize,
}

impl SystemResources {
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        let cpu_cores = sys.cpus().len().max(1);
        SystemResources { cpu_cores }
    }
}

impl Config {
    /// Load and validate a YAML configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let config = Self::from_yaml(&raw)?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.host.is_empty() {
            return Err(MigrateError::Config("source.host must be set".into()));
        }
        if self.source.database.is_empty() {
            return Err(MigrateError::Config("source.database must be set".into()));
        }
        if self.target.host.is_empty() {
            return Err(MigrateError::Config("target.host must be set".into()));
        }
        if self.target.database.is_empty() {
            return Err(MigrateError::Config("target.database must be set".into()));
        }
        if self.migration.batch_size == 0 {
            return Err(MigrateError::Config(
                "migration.batch_size must be at least 1".into(),
            ));
        }
        if self.migration.stall_threshold == 0 {
            return Err(MigrateError::Config(
                "migration.stall_threshold must be at least 1".into(),
            ));
        }
        if self.migration.stall_poll_secs == 0 {
            return Err(MigrateError::Config(
                "migration.stall_poll_secs must be at least 1".into(),
            ));
        }
        if self.migration.workers == Some(0) || self.migration.table_parallelism == Some(0) {
            return Err(MigrateError::Config(
                "worker counts must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }
}

impl MigrationConfig {
    /// Insert workers per table: explicit setting, else `min(12, cores)`.
    pub fn effective_workers(&self, resources: &SystemResources) -> usize {
        let n = self
            .workers
            .unwrap_or_else(|| resources.cpu_cores.min(MAX_AUTO_WORKERS));
        let n = n.max(1);
        info!(workers = n, "resolved insert worker count");
        n
    }

    /// Concurrent tables for metadata and data phases.
    pub fn effective_table_parallelism(&self, resources: &SystemResources) -> usize {
        self.table_parallelism
            .unwrap_or_else(|| resources.cpu_cores.min(MAX_AUTO_WORKERS))
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceType;

    const YAML: &str = r#"
source:
  type: oracle
  host: ora.example.com
  port: 1521
  database: ORCL
  username: scott
  password: tiger
target:
  host: db2.example.com
  port: 50001
  database: BLUDB
  username: db2inst1
  password: secret
  security: SSL
migration:
  schema: HR
  batch_size: 500
  workers: 4
"#;

    #[test]
    fn parses_yaml_with_defaults() {
        let c = Config::from_yaml(YAML).unwrap();
        assert_eq!(c.source.source_type, SourceType::Oracle);
        assert_eq!(c.migration.batch_size, 500);
        assert_eq!(c.migration.workers, Some(4));
        // defaulted fields
        assert_eq!(c.migration.stall_threshold, 3);
        assert_eq!(c.migration.stall_poll_secs, 10);
        assert_eq!(c.migration.max_retries, 1);
        assert!(c.migration.verify);
    }

    #[test]
    fn target_schema_and_table_filter_parse() {
        let yaml = YAML.replace(
            "  schema: HR",
            "  schema: HR\n  target_schema: HRX\n  table_filter: [EMP, DEPT]",
        );
        let c = Config::from_yaml(&yaml).unwrap();
        assert_eq!(c.migration.target_schema.as_deref(), Some("HRX"));
        assert_eq!(
            c.migration.table_filter,
            Some(vec!["EMP".to_string(), "DEPT".to_string()])
        );
        // unset stays unset
        let c = Config::from_yaml(YAML).unwrap();
        assert!(c.migration.target_schema.is_none());
        assert!(c.migration.table_filter.is_none());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let yaml = YAML.replace("batch_size: 500", "batch_size: 0");
        assert!(matches!(
            Config::from_yaml(&yaml),
            Err(MigrateError::Config(_))
        ));
    }

    #[test]
    fn missing_host_is_rejected() {
        let yaml = YAML.replace("host: ora.example.com", "host: \"\"");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn worker_auto_tuning_clamps_to_core_count() {
        let m = MigrationConfig::default();
        let small = SystemResources { cpu_cores: 4 };
        let big = SystemResources { cpu_cores: 64 };
        assert_eq!(m.effective_workers(&small), 4);
        assert_eq!(m.effective_workers(&big), 12);

        let explicit = MigrationConfig {
            workers: Some(20),
            ..MigrationConfig::default()
        };
        assert_eq!(explicit.effective_workers(&small), 20);
    }

    #[test]
    fn connection_strings_by_dialect() {
        let c = Config::from_yaml(YAML).unwrap();
        let s = c.source.connection_string();
        assert!(s.contains("DBQ=//ora.example.com:1521/ORCL"));
        let t = c.target.connection_string("hr");
        assert!(t.contains("Database=BLUDB"));
        assert!(t.contains("Security=SSL;"));
        assert!(t.contains("CurrentSchema=HR;"));
    }
}
