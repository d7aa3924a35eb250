use thiserror::Error;

/// Errors produced by the migration engine.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration loading or validation failure.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to open or reuse a database connection.
    #[error("Connection error ({context}): {message}")]
    Connection { message: String, context: String },

    /// Source metadata could not be fetched for an object.
    #[error("Metadata error for {object}: {message}")]
    Metadata { object: String, message: String },

    /// A DDL translator could not produce DB2 DDL for an object.
    /// Translation errors skip the object, they never abort the run.
    #[error("Translation error for {object}: {message}")]
    Translation { object: String, message: String },

    /// A referenced object does not exist on the target.
    #[error("Missing dependency for {object}: {message}")]
    Existence { object: String, message: String },

    /// Row insertion failed after the row-by-row fallback.
    #[error("Insert error for table {table}: {message}")]
    Insertion { table: String, message: String },

    /// The final target row count fell short of the expected count.
    #[error("Incomplete migration for {table}: expected {expected} rows, observed {observed}")]
    Incomplete {
        table: String,
        expected: u64,
        observed: u64,
    },

    /// Target row count stopped advancing during data transfer.
    #[error("Stall detected for table {table}: row count unchanged for {polls} polls")]
    Stall { table: String, polls: u32 },

    /// Per-table wall-clock timeout elapsed.
    #[error("Timeout migrating table {table} after {seconds}s")]
    Timeout { table: String, seconds: u64 },

    /// Status store persistence failure (after conflict retries).
    #[error("Status store error: {0}")]
    Status(String),

    /// DDL execution failed on the target.
    #[error("DDL error for {object}: {message}")]
    Ddl { object: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl MigrateError {
    pub fn connection(context: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Connection {
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn metadata(object: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Metadata {
            object: object.into(),
            message: message.into(),
        }
    }

    pub fn translation(object: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Translation {
            object: object.into(),
            message: message.into(),
        }
    }

    pub fn existence(object: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Existence {
            object: object.into(),
            message: message.into(),
        }
    }

    pub fn insertion(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Insertion {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn ddl(object: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Ddl {
            object: object.into(),
            message: message.into(),
        }
    }

    /// True when the error only affects a single object and the run should
    /// record it and continue with the remaining objects.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            MigrateError::Translation { .. }
                | MigrateError::Existence { .. }
                | MigrateError::Metadata { .. }
                | MigrateError::Ddl { .. }
        )
    }

    /// Render the error with its full source chain, one cause per line.
    pub fn format_detailed(&self) -> String {
        let mut out = format!("{self}");
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str(&format!("\n  caused by: {err}"));
            source = err.source();
        }
        out
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_build_expected_variants() {
        let e = MigrateError::translation("V_ORDERS", "unbalanced parentheses");
        assert!(matches!(e, MigrateError::Translation { .. }));
        assert!(e.to_string().contains("V_ORDERS"));
        assert!(e.is_skippable());

        let e = MigrateError::Stall {
            table: "EMP".into(),
            polls: 3,
        };
        assert!(!e.is_skippable());
    }

    #[test]
    fn format_detailed_includes_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let e = MigrateError::from(io);
        let detail = e.format_detailed();
        assert!(detail.starts_with("IO error"));
    }
}
