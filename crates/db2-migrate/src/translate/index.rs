//! Index DDL translation.
//!
//! DB2 accepts only the bare `CREATE [UNIQUE] INDEX name ON schema.table
//! (cols...)` form, so translation is whitelist-style removal of the
//! source dialect's physical-storage clauses followed by re-anchoring
//! the statement head with quoted identifiers.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{collapse_ws, normalize_brackets};
use crate::error::{MigrateError, Result};

/// Output of [`translate_index`].
#[derive(Debug, Clone)]
pub struct IndexTranslation {
    /// DB2 `CREATE [UNIQUE] INDEX` statement.
    pub ddl: String,
    /// Schema of the indexed table, for the pre-execution existence check.
    pub table_schema: String,
    pub table: String,
}

static STRIP_CLAUSES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Oracle physical storage
        r#"(?i)TABLESPACE\s+"?[^\s"]+"?"#,
        r"(?i)STORAGE\s*\([^)]+\)",
        r"(?i)PCTFREE\s+\d+",
        r"(?i)INITRANS\s+\d+",
        r"(?i)MAXTRANS\s+\d+",
        r"(?i)NOPARALLEL",
        r"(?i)PARALLEL",
        r"(?i)COMPUTE STATISTICS",
        // SQL Server options
        r"(?i)INCLUDE\s*\([^)]+\)",
        r"(?i)WITH\s*\([^)]+\)",
        r"(?i)ON\s+\[?[A-Za-z0-9_]+\]?\s+FILEGROUP\s+[A-Za-z0-9_\[\]]+",
        // Filtered indexes have no DB2 equivalent
        r"(?is)WHERE\s+.+$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static INDEX_HEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)CREATE\s+(UNIQUE\s+)?INDEX\s+"?(\w+)"?\s+ON\s+"?(\w+)"?\."?(\w+)"?"#).unwrap()
});

/// Translate an Oracle or SQL Server index DDL statement to DB2.
pub fn translate_index(index: &str, source_ddl: &str) -> Result<IndexTranslation> {
    let mut ddl = normalize_brackets(source_ddl.trim());
    for re in STRIP_CLAUSES.iter() {
        ddl = re.replace_all(&ddl, "").into_owned();
    }
    let ddl = collapse_ws(&ddl);

    let head = INDEX_HEAD.captures(&ddl).ok_or_else(|| {
        MigrateError::translation(index, "cannot parse CREATE INDEX head with schema.table")
    })?;

    let unique = if head.get(1).is_some() { "UNIQUE " } else { "" };
    let index_name = head[2].to_uppercase();
    let table_schema = head[3].to_uppercase();
    let table = head[4].to_uppercase();
    let rest = ddl[head.get(0).map(|m| m.end()).unwrap_or(0)..].trim();

    let mut out = format!(
        "CREATE {unique}INDEX \"{index_name}\" ON \"{table_schema}\".\"{table}\" {rest}"
    );
    let trimmed = out.trim_end().to_string();
    out = if trimmed.ends_with(';') {
        trimmed
    } else {
        format!("{trimmed};")
    };

    Ok(IndexTranslation {
        ddl: out,
        table_schema,
        table,
    })
}
