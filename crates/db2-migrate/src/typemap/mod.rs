//! Source-to-DB2 column type mapping and table DDL generation.
//!
//! DB2 limits drive the clamps here: CHAR tops out at 254, VARCHAR at
//! 32762 (page-size dependent, this is the safe bound), DECIMAL precision
//! at 31. Unknown source types fall back to VARCHAR(1024) so a table is
//! never rejected outright for one odd column.

use crate::source::{Column, SourceType, TableMeta};
use crate::target::quote_ident;

const CHAR_MAX: u32 = 254;
const VARCHAR_MAX: u32 = 32762;
const DECIMAL_MAX: u32 = 31;

/// Map an Oracle column type to its DB2 counterpart.
pub fn oracle_to_db2(
    data_type: &str,
    length: Option<u32>,
    precision: Option<u32>,
    scale: Option<i32>,
) -> String {
    let data_type = data_type.to_uppercase();
    match data_type.as_str() {
        "CHAR" | "NCHAR" => format!("CHAR({})", length.unwrap_or(1).min(CHAR_MAX)),
        "VARCHAR2" | "NVARCHAR2" => {
            format!("VARCHAR({})", length.unwrap_or(1).min(VARCHAR_MAX))
        }
        "NUMBER" => match (precision, scale) {
            (Some(p), Some(s)) => format!(
                "DECIMAL({}, {})",
                p.min(DECIMAL_MAX),
                (s.max(0) as u32).min(DECIMAL_MAX)
            ),
            (Some(p), None) => format!("DECIMAL({}, 0)", p.min(DECIMAL_MAX)),
            _ => "DECIMAL(31,0)".to_string(),
        },
        "DATE" => "DATE".to_string(),
        "CLOB" => "CLOB(2G)".to_string(),
        "NCLOB" => "DBCLOB(2G)".to_string(),
        "BLOB" => "BLOB(2G)".to_string(),
        "RAW" | "LONG RAW" => "BLOB(32767)".to_string(),
        "LONG" => "CLOB(32760)".to_string(),
        "FLOAT" | "BINARY_DOUBLE" => "DOUBLE".to_string(),
        "BINARY_FLOAT" => "REAL".to_string(),
        t if t.starts_with("TIMESTAMP") => "TIMESTAMP".to_string(),
        _ => "VARCHAR(1024)".to_string(),
    }
}

/// Map a SQL Server column type to its DB2 counterpart.
pub fn mssql_to_db2(
    data_type: &str,
    length: Option<u32>,
    precision: Option<u32>,
    scale: Option<i32>,
) -> String {
    let data_type = data_type.to_uppercase();
    match data_type.as_str() {
        "CHAR" | "NCHAR" => format!("CHAR({})", length.unwrap_or(1).min(CHAR_MAX)),
        "VARCHAR" | "NVARCHAR" | "VARCHAR2" | "NVARCHAR2" => {
            format!("VARCHAR({})", length.unwrap_or(255).min(VARCHAR_MAX))
        }
        "TEXT" | "NTEXT" => "CLOB(2G)".to_string(),
        "TINYTEXT" | "SMALLTEXT" => "CLOB(255)".to_string(),
        "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" => {
            "INTEGER".to_string()
        }
        "BIT" => "SMALLINT".to_string(),
        "FLOAT" | "REAL" | "DOUBLE" => "DOUBLE".to_string(),
        "NUMERIC" | "DECIMAL" | "DEC" => match (precision, scale) {
            (Some(p), Some(s)) => format!(
                "DECIMAL({}, {})",
                p.min(DECIMAL_MAX),
                (s.max(0) as u32).min(DECIMAL_MAX)
            ),
            (Some(p), None) => format!("DECIMAL({}, 0)", p.min(DECIMAL_MAX)),
            _ => "DECIMAL(31,0)".to_string(),
        },
        "DATE" => "DATE".to_string(),
        "TIME" => "TIME".to_string(),
        "DATETIME" | "DATETIME2" | "SMALLDATETIME" | "TIMESTAMP" => "TIMESTAMP".to_string(),
        "BINARY" | "VARBINARY" | "IMAGE" => "BLOB(32767)".to_string(),
        "XML" => "XML".to_string(),
        "UNIQUEIDENTIFIER" => "CHAR(36)".to_string(),
        _ => "VARCHAR(1024)".to_string(),
    }
}

/// Map one source column to a DB2 type by dialect.
pub fn map_column(source_type: SourceType, col: &Column) -> String {
    match source_type {
        SourceType::Oracle => oracle_to_db2(&col.data_type, col.length, col.precision, col.scale),
        SourceType::SqlServer => mssql_to_db2(&col.data_type, col.length, col.precision, col.scale),
    }
}

/// Generate `CREATE TABLE` DDL for DB2 from source table metadata.
pub fn table_ddl(source_type: SourceType, meta: &TableMeta) -> String {
    let cols: Vec<String> = meta
        .columns
        .iter()
        .map(|c| {
            let mut def = format!("    {} {}", quote_ident(&c.name), map_column(source_type, c));
            if !c.nullable {
                def.push_str(" NOT NULL");
            }
            def
        })
        .collect();
    format!(
        "CREATE TABLE {}.{} (\n{}\n)",
        quote_ident(&meta.schema),
        quote_ident(&meta.name),
        cols.join(",\n")
    )
}
