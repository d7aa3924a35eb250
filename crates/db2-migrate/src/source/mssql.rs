//! ODBC-based SQL Server source adapter.
//!
//! Requires the `odbc` feature and the Microsoft ODBC Driver for SQL
//! Server (`msodbcsql18`). Column metadata comes from
//! `INFORMATION_SCHEMA`, object definitions from `sys.sql_modules`, and
//! index DDL is reconstructed from `sys.indexes` since SQL Server stores
//! no CREATE INDEX text.

use std::sync::Arc;

use async_trait::async_trait;
use odbc_api::{buffers::TextRowSet, ConnectionOptions, Cursor, Environment, ResultSetMetadata};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::error::{MigrateError, Result};
use crate::source::{Column, RowStream, SequenceMeta, SourceAdapter, SourceType, TableMeta};
use crate::target::{Row, SqlValue};

/// Escape a SQL string literal. Doubles single quotes.
fn escape_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

/// Escape a bracketed identifier. Doubles right brackets.
fn escape_sql_ident(s: &str) -> String {
    s.replace(']', "]]")
}

pub struct MssqlOdbcSource {
    env: Arc<Environment>,
    connection_string: String,
    conn_mutex: Mutex<()>,
}

impl MssqlOdbcSource {
    pub async fn new(config: &SourceConfig) -> Result<Self> {
        let env = Environment::new().map_err(|e| {
            MigrateError::connection(
                "ODBC environment",
                format!(
                    "{e}. Make sure the Microsoft ODBC Driver for SQL Server is installed \
                     (Linux: apt install msodbcsql18)."
                ),
            )
        })?;

        let connection_string = config.connection_string();
        debug!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "connecting to SQL Server via ODBC"
        );

        {
            let conn = env
                .connect_with_connection_string(&connection_string, ConnectionOptions::default())
                .map_err(|e| MigrateError::connection("SQL Server connect", e.to_string()))?;
            conn.execute("SELECT 1", ())
                .map_err(|e| MigrateError::connection("SQL Server probe", e.to_string()))?;
        }
        info!(
            "connected to SQL Server {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(MssqlOdbcSource {
            env: Arc::new(env),
            connection_string,
            conn_mutex: Mutex::new(()),
        })
    }

    fn get_connection(&self) -> Result<odbc_api::Connection<'_>> {
        self.env
            .connect_with_connection_string(&self.connection_string, ConnectionOptions::default())
            .map_err(|e| MigrateError::connection("SQL Server connect", e.to_string()))
    }

    fn execute_query(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let conn = self.get_connection()?;
        fetch_text_rows(&conn, sql, 1000, 4096)
    }

    /// `OBJECT_DEFINITION` text for a module, or `None` when missing.
    async fn module_definition(&self, schema: &str, name: &str) -> Result<Option<String>> {
        let _lock = self.conn_mutex.lock().await;
        let sql = format!(
            "SELECT OBJECT_DEFINITION(OBJECT_ID('[{}].[{}]'))",
            escape_sql_ident(schema),
            escape_sql_ident(name)
        );
        let conn = self.get_connection()?;
        let rows = fetch_text_rows(&conn, &sql, 1, 1 << 20)?;
        Ok(rows.first().and_then(|r| text_at(r, 0)))
    }
}

fn fetch_text_rows(
    conn: &odbc_api::Connection<'_>,
    sql: &str,
    batch: usize,
    max_str_len: usize,
) -> Result<Vec<Vec<Option<String>>>> {
    let mut rows = Vec::new();
    if let Some(mut cursor) = conn
        .execute(sql, ())
        .map_err(|e| MigrateError::metadata(sql, format!("query failed: {e}")))?
    {
        let num_cols = cursor
            .num_result_cols()
            .map_err(|e| MigrateError::metadata(sql, format!("column count: {e}")))?
            as usize;
        let mut buffers = TextRowSet::for_cursor(batch, &mut cursor, Some(max_str_len))
            .map_err(|e| MigrateError::metadata(sql, format!("row buffer: {e}")))?;
        let mut row_cursor = cursor
            .bind_buffer(&mut buffers)
            .map_err(|e| MigrateError::metadata(sql, format!("bind buffer: {e}")))?;
        while let Some(batch) = row_cursor
            .fetch()
            .map_err(|e| MigrateError::metadata(sql, format!("fetch: {e}")))?
        {
            for row_idx in 0..batch.num_rows() {
                let mut row = Vec::with_capacity(num_cols);
                for col_idx in 0..num_cols {
                    row.push(
                        batch
                            .at(col_idx, row_idx)
                            .map(|bytes| String::from_utf8_lossy(bytes).to_string()),
                    );
                }
                rows.push(row);
            }
        }
    }
    Ok(rows)
}

fn text_at(row: &[Option<String>], idx: usize) -> Option<String> {
    row.get(idx).and_then(|v| v.clone())
}

fn parse_at<T: std::str::FromStr>(row: &[Option<String>], idx: usize) -> Option<T> {
    row.get(idx)
        .and_then(|v| v.as_ref())
        .and_then(|s| s.trim().parse().ok())
}

fn value_from_text(text: Option<String>, column: &Column) -> SqlValue {
    let Some(s) = text else {
        return SqlValue::Null;
    };
    match column.data_type.to_lowercase().as_str() {
        "bit" => match s.as_str() {
            "1" | "true" | "TRUE" => SqlValue::Bool(true),
            "0" | "false" | "FALSE" => SqlValue::Bool(false),
            _ => SqlValue::Null,
        },
        "tinyint" | "smallint" => s
            .trim()
            .parse::<i16>()
            .map(SqlValue::I16)
            .unwrap_or(SqlValue::Null),
        "int" => s
            .trim()
            .parse::<i32>()
            .map(SqlValue::I32)
            .unwrap_or(SqlValue::Null),
        "bigint" => s
            .trim()
            .parse::<i64>()
            .map(SqlValue::I64)
            .unwrap_or(SqlValue::Null),
        "float" | "real" => s
            .trim()
            .parse::<f64>()
            .map(SqlValue::F64)
            .unwrap_or(SqlValue::Null),
        "decimal" | "numeric" | "money" | "smallmoney" => {
            let cleaned = s.replace(['$', ','], "");
            cleaned
                .trim()
                .parse()
                .map(SqlValue::Decimal)
                .unwrap_or(SqlValue::Null)
        }
        "datetime" | "datetime2" | "smalldatetime" => {
            chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S"))
                .map(SqlValue::Timestamp)
                .unwrap_or_else(|_| SqlValue::Text(s))
        }
        "date" => chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(SqlValue::Date)
            .unwrap_or_else(|_| SqlValue::Text(s)),
        "time" => chrono::NaiveTime::parse_from_str(&s, "%H:%M:%S%.f")
            .or_else(|_| chrono::NaiveTime::parse_from_str(&s, "%H:%M:%S"))
            .map(SqlValue::Time)
            .unwrap_or_else(|_| SqlValue::Text(s)),
        "binary" | "varbinary" | "image" | "timestamp" => {
            let hex = s
                .strip_prefix("0x")
                .or_else(|| s.strip_prefix("0X"))
                .unwrap_or(&s);
            decode_hex(hex)
                .map(SqlValue::Bytes)
                .unwrap_or_else(|| SqlValue::Bytes(s.into_bytes()))
        }
        _ => SqlValue::Text(s),
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || s.is_empty() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

struct MssqlRowStream {
    env: Arc<Environment>,
    connection_string: String,
    sql_prefix: String,
    columns: Vec<Column>,
    batch_size: usize,
    offset: usize,
    done: bool,
}

#[async_trait]
impl RowStream for MssqlRowStream {
    async fn next_batch(&mut self) -> Result<Option<Vec<Row>>> {
        if self.done {
            return Ok(None);
        }
        let sql = format!(
            "{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            self.sql_prefix, self.offset, self.batch_size
        );
        let conn = self
            .env
            .connect_with_connection_string(&self.connection_string, ConnectionOptions::default())
            .map_err(|e| MigrateError::connection("SQL Server connect", e.to_string()))?;
        let text_rows = fetch_text_rows(&conn, &sql, self.batch_size, 65536)?;
        if text_rows.is_empty() {
            self.done = true;
            return Ok(None);
        }
        self.offset += text_rows.len();
        let rows = text_rows
            .into_iter()
            .map(|r| {
                r.into_iter()
                    .zip(self.columns.iter())
                    .map(|(text, col)| value_from_text(text, col))
                    .collect()
            })
            .collect();
        Ok(Some(rows))
    }
}

#[async_trait]
impl SourceAdapter for MssqlOdbcSource {
    fn source_type(&self) -> SourceType {
        SourceType::SqlServer
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        let _lock = self.conn_mutex.lock().await;
        let rows = self.execute_query(
            "SELECT name FROM sys.schemas \
             WHERE schema_id < 16384 AND name NOT IN ('sys', 'INFORMATION_SCHEMA') \
             ORDER BY name",
        )?;
        Ok(rows.iter().filter_map(|r| text_at(r, 0)).collect())
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let _lock = self.conn_mutex.lock().await;
        let sql = format!(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = '{}' AND TABLE_TYPE = 'BASE TABLE' \
             ORDER BY TABLE_NAME",
            escape_sql_string(schema)
        );
        let rows = self.execute_query(&sql)?;
        Ok(rows.iter().filter_map(|r| text_at(r, 0)).collect())
    }

    async fn table_metadata(&self, schema: &str, table: &str) -> Result<TableMeta> {
        let _lock = self.conn_mutex.lock().await;
        let sql = format!(
            "SELECT COLUMN_NAME, DATA_TYPE, CHARACTER_MAXIMUM_LENGTH, \
                    NUMERIC_PRECISION, NUMERIC_SCALE, IS_NULLABLE \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}' \
             ORDER BY ORDINAL_POSITION",
            escape_sql_string(schema),
            escape_sql_string(table)
        );
        let rows = self.execute_query(&sql)?;
        if rows.is_empty() {
            return Err(MigrateError::metadata(
                format!("{schema}.{table}"),
                "no columns in INFORMATION_SCHEMA.COLUMNS",
            ));
        }
        let columns = rows
            .iter()
            .map(|row| {
                // varchar(max) reports -1; treat it as unbounded.
                let length: Option<i64> = parse_at(row, 2);
                Column {
                    name: text_at(row, 0).unwrap_or_default(),
                    data_type: text_at(row, 1).unwrap_or_default(),
                    length: length.filter(|n| *n > 0).map(|n| n as u32),
                    precision: parse_at(row, 3),
                    scale: parse_at(row, 4),
                    nullable: text_at(row, 5).as_deref() == Some("YES"),
                }
            })
            .collect();
        Ok(TableMeta {
            schema: schema.to_uppercase(),
            name: table.to_uppercase(),
            columns,
        })
    }

    async fn row_stream(
        &self,
        schema: &str,
        table: &str,
        batch_size: usize,
    ) -> Result<Box<dyn RowStream>> {
        let meta = self.table_metadata(schema, table).await?;
        let col_list = meta
            .columns
            .iter()
            .map(|c| format!("[{}]", escape_sql_ident(&c.name)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql_prefix = format!(
            "SELECT {col_list} FROM [{}].[{}] ORDER BY 1",
            escape_sql_ident(schema),
            escape_sql_ident(table)
        );
        Ok(Box::new(MssqlRowStream {
            env: Arc::clone(&self.env),
            connection_string: self.connection_string.clone(),
            sql_prefix,
            columns: meta.columns,
            batch_size: batch_size.max(1),
            offset: 0,
            done: false,
        }))
    }

    async fn row_count(&self, schema: &str, table: &str) -> Result<u64> {
        let _lock = self.conn_mutex.lock().await;
        let sql = format!(
            "SELECT COUNT_BIG(*) FROM [{}].[{}] WITH (NOLOCK)",
            escape_sql_ident(schema),
            escape_sql_ident(table)
        );
        let rows = self.execute_query(&sql)?;
        Ok(rows.first().and_then(|r| parse_at(r, 0)).unwrap_or(0))
    }

    async fn list_sequences(&self, schema: &str) -> Result<Vec<String>> {
        let _lock = self.conn_mutex.lock().await;
        let sql = format!(
            "SELECT s.name FROM sys.sequences s \
             JOIN sys.schemas sc ON sc.schema_id = s.schema_id \
             WHERE sc.name = '{}' ORDER BY s.name",
            escape_sql_string(schema)
        );
        let rows = self.execute_query(&sql)?;
        Ok(rows.iter().filter_map(|r| text_at(r, 0)).collect())
    }

    async fn sequence_metadata(&self, schema: &str, sequence: &str) -> Result<SequenceMeta> {
        let _lock = self.conn_mutex.lock().await;
        let sql = format!(
            "SELECT CAST(s.current_value AS BIGINT), CAST(s.increment AS BIGINT), \
                    CAST(s.minimum_value AS BIGINT), CAST(s.maximum_value AS BIGINT), \
                    s.is_cycling, ISNULL(s.cache_size, 20) \
             FROM sys.sequences s \
             JOIN sys.schemas sc ON sc.schema_id = s.schema_id \
             WHERE sc.name = '{}' AND s.name = '{}'",
            escape_sql_string(schema),
            escape_sql_string(sequence)
        );
        let rows = self.execute_query(&sql)?;
        let row = rows.first().ok_or_else(|| {
            MigrateError::metadata(format!("{schema}.{sequence}"), "sequence not in sys.sequences")
        })?;
        Ok(SequenceMeta {
            name: sequence.to_uppercase(),
            last_value: parse_at(row, 0).unwrap_or(0),
            increment_by: parse_at(row, 1).unwrap_or(1),
            min_value: parse_at(row, 2).unwrap_or(1),
            max_value: parse_at(row, 3).unwrap_or(i64::MAX),
            cycle: text_at(row, 4).as_deref() == Some("1"),
            cache_size: parse_at(row, 5).unwrap_or(20),
        })
    }

    async fn list_triggers(&self, schema: &str) -> Result<Vec<String>> {
        let _lock = self.conn_mutex.lock().await;
        let sql = format!(
            "SELECT t.name FROM sys.triggers t \
             JOIN sys.objects o ON o.object_id = t.parent_id \
             JOIN sys.schemas sc ON sc.schema_id = o.schema_id \
             WHERE sc.name = '{}' AND t.is_ms_shipped = 0 \
             ORDER BY t.name",
            escape_sql_string(schema)
        );
        let rows = self.execute_query(&sql)?;
        Ok(rows.iter().filter_map(|r| text_at(r, 0)).collect())
    }

    async fn trigger_ddl(&self, schema: &str, trigger: &str) -> Result<Option<String>> {
        self.module_definition(schema, trigger).await
    }

    async fn list_views(&self, schema: &str) -> Result<Vec<String>> {
        let _lock = self.conn_mutex.lock().await;
        let sql = format!(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.VIEWS \
             WHERE TABLE_SCHEMA = '{}' ORDER BY TABLE_NAME",
            escape_sql_string(schema)
        );
        let rows = self.execute_query(&sql)?;
        Ok(rows.iter().filter_map(|r| text_at(r, 0)).collect())
    }

    async fn view_ddl(&self, schema: &str, view: &str) -> Result<Option<String>> {
        self.module_definition(schema, view).await
    }

    async fn list_indexes(&self, schema: &str) -> Result<Vec<String>> {
        let _lock = self.conn_mutex.lock().await;
        let sql = format!(
            "SELECT i.name FROM sys.indexes i \
             JOIN sys.objects o ON o.object_id = i.object_id \
             JOIN sys.schemas sc ON sc.schema_id = o.schema_id \
             WHERE sc.name = '{}' AND i.is_primary_key = 0 \
             AND i.is_unique_constraint = 0 AND i.type > 0 \
             AND o.type = 'U' AND i.name IS NOT NULL \
             ORDER BY i.name",
            escape_sql_string(schema)
        );
        let rows = self.execute_query(&sql)?;
        Ok(rows.iter().filter_map(|r| text_at(r, 0)).collect())
    }

    /// Reconstructed `CREATE INDEX` statement; SQL Server has no stored
    /// source text for indexes.
    async fn index_ddl(&self, schema: &str, index: &str) -> Result<Option<String>> {
        let _lock = self.conn_mutex.lock().await;
        let sql = format!(
            "SELECT o.name, i.is_unique, c.name, ic.is_included_column \
             FROM sys.indexes i \
             JOIN sys.objects o ON o.object_id = i.object_id \
             JOIN sys.schemas sc ON sc.schema_id = o.schema_id \
             JOIN sys.index_columns ic ON ic.object_id = i.object_id \
                AND ic.index_id = i.index_id \
             JOIN sys.columns c ON c.object_id = ic.object_id \
                AND c.column_id = ic.column_id \
             WHERE sc.name = '{}' AND i.name = '{}' \
             ORDER BY ic.key_ordinal",
            escape_sql_string(schema),
            escape_sql_string(index)
        );
        let rows = self.execute_query(&sql)?;
        let Some(first) = rows.first() else {
            return Ok(None);
        };
        let table = text_at(first, 0).unwrap_or_default();
        let unique = text_at(first, 1).as_deref() == Some("1");
        let mut key_cols = Vec::new();
        let mut include_cols = Vec::new();
        for row in &rows {
            let col = text_at(row, 2).unwrap_or_default();
            if text_at(row, 3).as_deref() == Some("1") {
                include_cols.push(col);
            } else {
                key_cols.push(col);
            }
        }
        let mut ddl = format!(
            "CREATE {}INDEX [{index}] ON [{schema}].[{table}] ({})",
            if unique { "UNIQUE " } else { "" },
            key_cols.join(", ")
        );
        if !include_cols.is_empty() {
            ddl.push_str(&format!(" INCLUDE ({})", include_cols.join(", ")));
        }
        Ok(Some(ddl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(data_type: &str) -> Column {
        Column {
            name: "C".into(),
            data_type: data_type.into(),
            length: None,
            precision: None,
            scale: None,
            nullable: true,
        }
    }

    #[test]
    fn bit_and_integers_retype() {
        assert_eq!(value_from_text(Some("1".into()), &col("bit")), SqlValue::Bool(true));
        assert_eq!(value_from_text(Some("7".into()), &col("int")), SqlValue::I32(7));
        assert_eq!(
            value_from_text(Some("9000000000".into()), &col("bigint")),
            SqlValue::I64(9_000_000_000)
        );
        assert_eq!(value_from_text(None, &col("int")), SqlValue::Null);
    }

    #[test]
    fn money_strips_currency_noise() {
        match value_from_text(Some("$1,234.56".into()), &col("money")) {
            SqlValue::Decimal(d) => assert_eq!(d.to_string(), "1234.56"),
            other => panic!("expected decimal, got {other:?}"),
        }
    }

    #[test]
    fn varbinary_decodes_hex() {
        match value_from_text(Some("0xCAFE".into()), &col("varbinary")) {
            SqlValue::Bytes(b) => assert_eq!(b, vec![0xCA, 0xFE]),
            other => panic!("expected bytes, got {other:?}"),
        }
    }
}
