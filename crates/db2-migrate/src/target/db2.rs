//! ODBC-backed DB2 target pool.
//!
//! Requires the `odbc` feature and the IBM DB2 CLI driver. Each transfer
//! worker gets its own connection, checked out of an arena keyed by
//! worker id and probed with `SELECT 1 FROM SYSIBM.SYSDUMMY1` before
//! reuse; a dead connection is discarded and replaced. Autocommit is off
//! so every operation commits or rolls back explicitly.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use odbc_api::{buffers::TextRowSet, Connection, ConnectionOptions, Cursor, Environment,
    ResultSetMetadata};
use tracing::{debug, warn};

use crate::config::TargetConfig;
use crate::error::{MigrateError, Result};
use crate::target::{quote_ident, Row, SqlValue, TargetColumn, TargetPool};

/// Connection slot used for DDL and catalog work, distinct from any
/// transfer worker id.
const ADMIN_WORKER: usize = usize::MAX;

fn escape_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

pub struct Db2Pool {
    // One ODBC environment per process; the pool outlives every
    // connection handed out, so the environment is leaked once.
    env: &'static Environment,
    connection_string: String,
    connections: Mutex<HashMap<usize, Connection<'static>>>,
    existence: Mutex<HashMap<(String, String), bool>>,
}

impl Db2Pool {
    pub async fn connect(config: &TargetConfig, current_schema: &str) -> Result<Self> {
        let env = Environment::new().map_err(|e| {
            MigrateError::connection(
                "ODBC environment",
                format!("{e}. Make sure the IBM DB2 CLI driver is installed."),
            )
        })?;
        let env: &'static Environment = Box::leak(Box::new(env));

        let connection_string = config.connection_string(current_schema);
        let pool = Db2Pool {
            env,
            connection_string,
            connections: Mutex::new(HashMap::new()),
            existence: Mutex::new(HashMap::new()),
        };
        // Fail fast on bad credentials or an unreachable host.
        let conn = pool.open_connection()?;
        pool.check_in(ADMIN_WORKER, conn);
        debug!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "connected to DB2"
        );
        Ok(pool)
    }

    fn open_connection(&self) -> Result<Connection<'static>> {
        let conn = self
            .env
            .connect_with_connection_string(&self.connection_string, ConnectionOptions::default())
            .map_err(|e| MigrateError::connection("DB2 connect", e.to_string()))?;
        conn.set_autocommit(false)
            .map_err(|e| MigrateError::connection("DB2 autocommit", e.to_string()))?;
        Ok(conn)
    }

    /// Take the worker's connection out of the arena, replacing it when
    /// the liveness probe fails.
    fn check_out(&self, worker_id: usize) -> Result<Connection<'static>> {
        let existing = self.connections.lock().expect("pool lock").remove(&worker_id);
        if let Some(conn) = existing {
            match conn.execute("SELECT 1 FROM SYSIBM.SYSDUMMY1", ()) {
                Ok(_) => {
                    let _ = conn.rollback();
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(worker_id, error = %e, "DB2 connection dead, reconnecting");
                }
            }
        }
        self.open_connection()
    }

    fn check_in(&self, worker_id: usize, conn: Connection<'static>) {
        self.connections
            .lock()
            .expect("pool lock")
            .insert(worker_id, conn);
    }

    fn query_text(&self, worker_id: usize, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let conn = self.check_out(worker_id)?;
        let result = fetch_text_rows(&conn, sql);
        let _ = conn.rollback();
        self.check_in(worker_id, conn);
        result
    }

    fn execute_on(&self, worker_id: usize, object: &str, sql: &str) -> Result<()> {
        let conn = self.check_out(worker_id)?;
        let outcome = conn.execute(sql, ());
        let result = match outcome {
            Ok(_) => conn
                .commit()
                .map_err(|e| MigrateError::ddl(object, format!("commit failed: {e}"))),
            Err(e) => {
                let _ = conn.rollback();
                Err(MigrateError::ddl(object, e.to_string()))
            }
        };
        self.check_in(worker_id, conn);
        result
    }
}

fn fetch_text_rows(conn: &Connection<'_>, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
    let mut rows = Vec::new();
    if let Some(mut cursor) = conn
        .execute(sql, ())
        .map_err(|e| MigrateError::metadata(sql, format!("query failed: {e}")))?
    {
        let num_cols = cursor
            .num_result_cols()
            .map_err(|e| MigrateError::metadata(sql, format!("column count: {e}")))?
            as usize;
        let mut buffers = TextRowSet::for_cursor(1000, &mut cursor, Some(4096))
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

/// Render a value as a DB2 SQL literal.
fn sql_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        SqlValue::I16(v) => v.to_string(),
        SqlValue::I32(v) => v.to_string(),
        SqlValue::I64(v) => v.to_string(),
        SqlValue::F64(v) => v.to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::Text(s) => format!("'{}'", escape_sql_string(s)),
        SqlValue::Bytes(b) => {
            let mut hex = String::with_capacity(b.len() * 2);
            for byte in b {
                hex.push_str(&format!("{byte:02X}"));
            }
            format!("BX'{hex}'")
        }
        SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        SqlValue::Time(t) => format!("'{}'", t.format("%H:%M:%S")),
        SqlValue::Timestamp(ts) => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S%.6f")),
    }
}

fn insert_statement(schema: &str, table: &str, columns: &[String], rows: &[Row]) -> String {
    let col_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let values = rows
        .iter()
        .map(|row| {
            let vals = row.iter().map(sql_literal).collect::<Vec<_>>().join(", ");
            format!("({vals})")
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {}.{} ({col_list}) VALUES {values}",
        quote_ident(&schema.to_uppercase()),
        quote_ident(&table.to_uppercase())
    )
}

#[async_trait]
impl TargetPool for Db2Pool {
    async fn table_exists(&self, schema: &str, table: &str, skip_cache: bool) -> Result<bool> {
        let key = (schema.to_uppercase(), table.to_uppercase());
        if !skip_cache {
            if let Some(cached) = self.existence.lock().expect("cache lock").get(&key) {
                return Ok(*cached);
            }
        }
        let sql = format!(
            "SELECT 1 FROM SYSCAT.TABLES WHERE TABSCHEMA = '{}' AND TABNAME = '{}'",
            escape_sql_string(&key.0),
            escape_sql_string(&key.1)
        );
        let exists = !self.query_text(ADMIN_WORKER, &sql)?.is_empty();
        self.existence.lock().expect("cache lock").insert(key, exists);
        Ok(exists)
    }

    fn invalidate_existence(&self, schema: &str, table: &str) {
        self.existence
            .lock()
            .expect("cache lock")
            .remove(&(schema.to_uppercase(), table.to_uppercase()));
    }

    async fn sequence_exists(&self, schema: &str, sequence: &str) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM SYSCAT.SEQUENCES WHERE SEQSCHEMA = '{}' AND SEQNAME = '{}'",
            escape_sql_string(&schema.to_uppercase()),
            escape_sql_string(&sequence.to_uppercase())
        );
        Ok(!self.query_text(ADMIN_WORKER, &sql)?.is_empty())
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM SYSCAT.SCHEMATA WHERE SCHEMANAME = '{}'",
            escape_sql_string(&schema.to_uppercase())
        );
        Ok(!self.query_text(ADMIN_WORKER, &sql)?.is_empty())
    }

    async fn create_schema_if_absent(&self, schema: &str) -> Result<()> {
        if self.schema_exists(schema).await? {
            return Ok(());
        }
        let ddl = format!("CREATE SCHEMA {}", quote_ident(&schema.to_uppercase()));
        self.execute_on(ADMIN_WORKER, schema, &ddl)
    }

    async fn execute_ddl(&self, object: &str, ddl: &str) -> Result<()> {
        self.execute_on(ADMIN_WORKER, object, ddl)
    }

    async fn truncate(&self, schema: &str, table: &str) -> Result<()> {
        let conn = self.check_out(ADMIN_WORKER)?;
        // TRUNCATE must open the transaction, so clear any pending work.
        let _ = conn.rollback();
        let sql = format!(
            "TRUNCATE TABLE {}.{} IMMEDIATE",
            quote_ident(&schema.to_uppercase()),
            quote_ident(&table.to_uppercase())
        );
        let result = match conn.execute(&sql, ()) {
            Ok(_) => conn.commit().map_err(|e| {
                MigrateError::insertion(
                    format!("{schema}.{table}"),
                    format!("truncate commit failed: {e}"),
                )
            }),
            Err(e) => {
                let _ = conn.rollback();
                Err(MigrateError::insertion(
                    format!("{schema}.{table}"),
                    format!("truncate failed: {e}"),
                ))
            }
        };
        self.check_in(ADMIN_WORKER, conn);
        result
    }

    async fn bulk_insert(
        &self,
        worker_id: usize,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = insert_statement(schema, table, columns, rows);
        let conn = self.check_out(worker_id)?;
        let result = match conn.execute(&sql, ()) {
            Ok(_) => conn
                .commit()
                .map(|_| rows.len() as u64)
                .map_err(|e| {
                    MigrateError::insertion(
                        format!("{schema}.{table}"),
                        format!("commit failed: {e}"),
                    )
                }),
            Err(e) => {
                let _ = conn.rollback();
                Err(MigrateError::insertion(
                    format!("{schema}.{table}"),
                    e.to_string(),
                ))
            }
        };
        self.check_in(worker_id, conn);
        result
    }

    async fn insert_row(
        &self,
        worker_id: usize,
        schema: &str,
        table: &str,
        columns: &[String],
        row: &Row,
    ) -> Result<()> {
        self.bulk_insert(worker_id, schema, table, columns, std::slice::from_ref(row))
            .await
            .map(|_| ())
    }

    async fn row_count(&self, schema: &str, table: &str) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}.{}",
            quote_ident(&schema.to_uppercase()),
            quote_ident(&table.to_uppercase())
        );
        let rows = self.query_text(ADMIN_WORKER, &sql)?;
        Ok(rows.first().and_then(|r| parse_at(r, 0)).unwrap_or(0))
    }

    async fn column_info(&self, schema: &str, table: &str) -> Result<Vec<TargetColumn>> {
        let sql = format!(
            "SELECT COLNAME, TYPENAME, LENGTH, SCALE, NULLS \
             FROM SYSCAT.COLUMNS \
             WHERE TABSCHEMA = '{}' AND TABNAME = '{}' \
             ORDER BY COLNO",
            escape_sql_string(&schema.to_uppercase()),
            escape_sql_string(&table.to_uppercase())
        );
        let rows = self.query_text(ADMIN_WORKER, &sql)?;
        if rows.is_empty() {
            return Err(MigrateError::metadata(
                format!("{schema}.{table}"),
                "no columns in SYSCAT.COLUMNS",
            ));
        }
        Ok(rows
            .iter()
            .map(|row| {
                let type_name = text_at(row, 1).unwrap_or_default();
                let length: Option<u32> = parse_at(row, 2);
                // SYSCAT stores DECIMAL precision in LENGTH.
                let precision = if type_name.starts_with("DECIMAL") {
                    length
                } else {
                    None
                };
                TargetColumn {
                    name: text_at(row, 0).unwrap_or_default(),
                    type_name,
                    length,
                    precision,
                    scale: parse_at(row, 3),
                    nullable: text_at(row, 4).as_deref() == Some("Y"),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_render_for_every_variant() {
        assert_eq!(sql_literal(&SqlValue::Null), "NULL");
        assert_eq!(sql_literal(&SqlValue::Bool(true)), "1");
        assert_eq!(sql_literal(&SqlValue::I64(-5)), "-5");
        assert_eq!(
            sql_literal(&SqlValue::Text("O'Brien".into())),
            "'O''Brien'"
        );
        assert_eq!(
            sql_literal(&SqlValue::Bytes(vec![0xDE, 0xAD])),
            "BX'DEAD'"
        );
    }

    #[test]
    fn insert_statement_quotes_and_joins() {
        let sql = insert_statement(
            "hr",
            "emp",
            &["ID".to_string(), "NAME".to_string()],
            &[
                vec![SqlValue::I64(1), SqlValue::Text("a".into())],
                vec![SqlValue::I64(2), SqlValue::Null],
            ],
        );
        assert_eq!(
            sql,
            "INSERT INTO \"HR\".\"EMP\" (\"ID\", \"NAME\") VALUES (1, 'a'), (2, NULL)"
        );
    }
}
