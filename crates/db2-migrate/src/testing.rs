//! In-process mock source and target used by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{MigrateError, Result};
use crate::source::{Column, RowStream, SequenceMeta, SourceAdapter, SourceType, TableMeta};
use crate::target::{Row, SqlValue, TargetColumn, TargetPool};

fn key(schema: &str, name: &str) -> (String, String) {
    (schema.to_uppercase(), name.to_uppercase())
}

/// Scripted source adapter.
pub struct MockSource {
    pub source_type: SourceType,
    tables: Mutex<Vec<TableMeta>>,
    rows: Mutex<HashMap<(String, String), Vec<Row>>>,
    sequences: Mutex<Vec<SequenceMeta>>,
    trigger_ddls: Mutex<HashMap<String, Option<String>>>,
    view_ddls: Mutex<HashMap<String, Option<String>>>,
    index_ddls: Mutex<HashMap<String, Option<String>>>,
    fail_metadata: Mutex<HashSet<String>>,
}

impl MockSource {
    pub fn new(source_type: SourceType) -> Self {
        MockSource {
            source_type,
            tables: Mutex::new(Vec::new()),
            rows: Mutex::new(HashMap::new()),
            sequences: Mutex::new(Vec::new()),
            trigger_ddls: Mutex::new(HashMap::new()),
            view_ddls: Mutex::new(HashMap::new()),
            index_ddls: Mutex::new(HashMap::new()),
            fail_metadata: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_table(self, meta: TableMeta, rows: Vec<Row>) -> Self {
        let k = key(&meta.schema, &meta.name);
        self.tables.lock().unwrap().push(meta);
        self.rows.lock().unwrap().insert(k, rows);
        self
    }

    pub fn with_sequence(self, meta: SequenceMeta) -> Self {
        self.sequences.lock().unwrap().push(meta);
        self
    }

    pub fn with_trigger(self, name: &str, ddl: Option<&str>) -> Self {
        self.trigger_ddls
            .lock()
            .unwrap()
            .insert(name.to_uppercase(), ddl.map(str::to_string));
        self
    }

    pub fn with_view(self, name: &str, ddl: Option<&str>) -> Self {
        self.view_ddls
            .lock()
            .unwrap()
            .insert(name.to_uppercase(), ddl.map(str::to_string));
        self
    }

    pub fn with_index(self, name: &str, ddl: Option<&str>) -> Self {
        self.index_ddls
            .lock()
            .unwrap()
            .insert(name.to_uppercase(), ddl.map(str::to_string));
        self
    }

    /// Make `table_metadata` fail for the named table.
    pub fn with_broken_metadata(self, table: &str) -> Self {
        self.fail_metadata
            .lock()
            .unwrap()
            .insert(table.to_uppercase());
        self
    }
}

/// Simple two-column metadata used by most tests.
pub fn id_name_meta(schema: &str, table: &str) -> TableMeta {
    TableMeta {
        schema: schema.to_string(),
        name: table.to_string(),
        columns: vec![
            Column {
                name: "ID".into(),
                data_type: "NUMBER".into(),
                length: None,
                precision: Some(10),
                scale: Some(0),
                nullable: false,
            },
            Column {
                name: "NAME".into(),
                data_type: "VARCHAR2".into(),
                length: Some(100),
                precision: None,
                scale: None,
                nullable: true,
            },
        ],
    }
}

/// Matching target-side columns for [`id_name_meta`].
pub fn id_name_columns() -> Vec<TargetColumn> {
    vec![
        TargetColumn {
            name: "ID".into(),
            type_name: "DECIMAL".into(),
            length: None,
            precision: Some(10),
            scale: Some(0),
            nullable: false,
        },
        TargetColumn {
            name: "NAME".into(),
            type_name: "VARCHAR".into(),
            length: Some(100),
            precision: None,
            scale: None,
            nullable: true,
        },
    ]
}

/// N rows shaped for [`id_name_meta`].
pub fn id_name_rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| {
            vec![
                SqlValue::I64(i as i64),
                SqlValue::Text(format!("row-{i}")),
            ]
        })
        .collect()
}

struct MockRowStream {
    batches: VecDeque<Vec<Row>>,
}

#[async_trait]
impl RowStream for MockRowStream {
    async fn next_batch(&mut self) -> Result<Option<Vec<Row>>> {
        Ok(self.batches.pop_front())
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    fn source_type(&self) -> SourceType {
        self.source_type
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        let mut schemas: Vec<String> = self
            .tables
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.schema.to_uppercase())
            .collect();
        schemas.sort();
        schemas.dedup();
        Ok(schemas)
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.schema.eq_ignore_ascii_case(schema))
            .map(|t| t.name.to_uppercase())
            .collect())
    }

    async fn table_metadata(&self, schema: &str, table: &str) -> Result<TableMeta> {
        if self
            .fail_metadata
            .lock()
            .unwrap()
            .contains(&table.to_uppercase())
        {
            return Err(MigrateError::metadata(
                format!("{schema}.{table}"),
                "dictionary query failed",
            ));
        }
        self.tables
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.schema.eq_ignore_ascii_case(schema) && t.name.eq_ignore_ascii_case(table))
            .cloned()
            .ok_or_else(|| MigrateError::metadata(format!("{schema}.{table}"), "unknown table"))
    }

    async fn row_stream(
        &self,
        schema: &str,
        table: &str,
        batch_size: usize,
    ) -> Result<Box<dyn RowStream>> {
        let rows = self
            .rows
            .lock()
            .unwrap()
            .get(&key(schema, table))
            .cloned()
            .unwrap_or_default();
        let batches = rows
            .chunks(batch_size.max(1))
            .map(|c| c.to_vec())
            .collect();
        Ok(Box::new(MockRowStream { batches }))
    }

    async fn row_count(&self, schema: &str, table: &str) -> Result<u64> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&key(schema, table))
            .map(|r| r.len() as u64)
            .unwrap_or(0))
    }

    async fn list_sequences(&self, _schema: &str) -> Result<Vec<String>> {
        Ok(self
            .sequences
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.name.to_uppercase())
            .collect())
    }

    async fn sequence_metadata(&self, schema: &str, sequence: &str) -> Result<SequenceMeta> {
        self.sequences
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(sequence))
            .cloned()
            .ok_or_else(|| {
                MigrateError::metadata(format!("{schema}.{sequence}"), "unknown sequence")
            })
    }

    async fn list_triggers(&self, _schema: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.trigger_ddls.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn trigger_ddl(&self, _schema: &str, trigger: &str) -> Result<Option<String>> {
        Ok(self
            .trigger_ddls
            .lock()
            .unwrap()
            .get(&trigger.to_uppercase())
            .cloned()
            .flatten())
    }

    async fn list_views(&self, _schema: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.view_ddls.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn view_ddl(&self, _schema: &str, view: &str) -> Result<Option<String>> {
        Ok(self
            .view_ddls
            .lock()
            .unwrap()
            .get(&view.to_uppercase())
            .cloned()
            .flatten())
    }

    async fn list_indexes(&self, _schema: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.index_ddls.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn index_ddl(&self, _schema: &str, index: &str) -> Result<Option<String>> {
        Ok(self
            .index_ddls
            .lock()
            .unwrap()
            .get(&index.to_uppercase())
            .cloned()
            .flatten())
    }
}

#[derive(Default)]
struct TargetState {
    existing: HashSet<(String, String)>,
    rows: HashMap<(String, String), Vec<Row>>,
    columns: HashMap<(String, String), Vec<TargetColumn>>,
    schemas: HashSet<String>,
    sequences: HashSet<(String, String)>,
    executed_ddl: Vec<(String, String)>,
}

/// Scripted in-memory target.
#[derive(Default)]
pub struct MockTarget {
    state: Mutex<TargetState>,
    fail_bulk: Mutex<HashSet<(String, String)>>,
    fail_first_values: Mutex<HashMap<String, Option<u32>>>,
    fail_ddl_containing: Mutex<Vec<String>>,
    hang_inserts: Mutex<HashSet<(String, String)>>,
}

impl MockTarget {
    pub fn new() -> Self {
        MockTarget::default()
    }

    /// Register a table that already exists on the target.
    pub fn with_existing_table(self, schema: &str, table: &str, columns: Vec<TargetColumn>) -> Self {
        {
            let mut s = self.state.lock().unwrap();
            s.existing.insert(key(schema, table));
            s.columns.insert(key(schema, table), columns);
            s.rows.insert(key(schema, table), Vec::new());
            s.schemas.insert(schema.to_uppercase());
        }
        self
    }

    /// Register column metadata for a table that DDL will create later.
    pub fn with_pending_table(self, schema: &str, table: &str, columns: Vec<TargetColumn>) -> Self {
        {
            let mut s = self.state.lock().unwrap();
            s.columns.insert(key(schema, table), columns);
            s.schemas.insert(schema.to_uppercase());
        }
        self
    }

    pub fn with_schema(self, schema: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .schemas
            .insert(schema.to_uppercase());
        self
    }

    /// Every bulk insert into the table fails, forcing the row fallback.
    pub fn failing_bulk(self, schema: &str, table: &str) -> Self {
        self.fail_bulk.lock().unwrap().insert(key(schema, table));
        self
    }

    /// Row inserts whose first column stringifies to `value` fail.
    pub fn failing_rows_with_first_value(self, value: &str) -> Self {
        self.fail_first_values
            .lock()
            .unwrap()
            .insert(value.to_string(), None);
        self
    }

    /// Like `failing_rows_with_first_value`, but only the first `times`
    /// inserts fail; later attempts succeed.
    pub fn failing_rows_with_first_value_times(self, value: &str, times: u32) -> Self {
        self.fail_first_values
            .lock()
            .unwrap()
            .insert(value.to_string(), Some(times));
        self
    }

    /// DDL containing the needle fails to execute.
    pub fn failing_ddl_containing(self, needle: &str) -> Self {
        self.fail_ddl_containing
            .lock()
            .unwrap()
            .push(needle.to_string());
        self
    }

    /// Inserts into the table never complete; drives the stall monitor.
    pub fn hanging_inserts(self, schema: &str, table: &str) -> Self {
        self.hang_inserts.lock().unwrap().insert(key(schema, table));
        self
    }

    pub fn executed_ddl(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().executed_ddl.clone()
    }

    pub fn stored_rows(&self, schema: &str, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .unwrap()
            .rows
            .get(&key(schema, table))
            .cloned()
            .unwrap_or_default()
    }

    fn first_value_fails(&self, row: &Row) -> bool {
        let mut fails = self.fail_first_values.lock().unwrap();
        if fails.is_empty() {
            return false;
        }
        let first = match row.first() {
            Some(SqlValue::Text(s)) => s.clone(),
            Some(SqlValue::I16(v)) => v.to_string(),
            Some(SqlValue::I32(v)) => v.to_string(),
            Some(SqlValue::I64(v)) => v.to_string(),
            Some(SqlValue::Decimal(d)) => d.to_string(),
            _ => return false,
        };
        match fails.get_mut(&first) {
            None => false,
            Some(None) => true,
            Some(Some(0)) => false,
            Some(Some(n)) => {
                *n -= 1;
                true
            }
        }
    }
}

#[async_trait]
impl TargetPool for MockTarget {
    async fn table_exists(&self, schema: &str, table: &str, _skip_cache: bool) -> Result<bool> {
        Ok(self.state.lock().unwrap().existing.contains(&key(schema, table)))
    }

    fn invalidate_existence(&self, _schema: &str, _table: &str) {}

    async fn sequence_exists(&self, schema: &str, sequence: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .sequences
            .contains(&key(schema, sequence)))
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .schemas
            .contains(&schema.to_uppercase()))
    }

    async fn create_schema_if_absent(&self, schema: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .schemas
            .insert(schema.to_uppercase());
        Ok(())
    }

    async fn execute_ddl(&self, object: &str, ddl: &str) -> Result<()> {
        for needle in self.fail_ddl_containing.lock().unwrap().iter() {
            if ddl.contains(needle.as_str()) {
                return Err(MigrateError::ddl(object, format!("rejected: {needle}")));
            }
        }
        let mut s = self.state.lock().unwrap();
        s.executed_ddl.push((object.to_string(), ddl.to_string()));
        let upper = ddl.trim_start().to_uppercase();
        if upper.starts_with("CREATE TABLE") || upper.starts_with("CREATE OR REPLACE VIEW") {
            if let Some((schema, name)) = object.split_once('.') {
                s.existing.insert(key(schema, name));
                s.rows.entry(key(schema, name)).or_default();
            }
        }
        if upper.starts_with("CREATE SEQUENCE") {
            if let Some((schema, name)) = object.split_once('.') {
                s.sequences.insert(key(schema, name));
            }
        }
        Ok(())
    }

    async fn truncate(&self, schema: &str, table: &str) -> Result<()> {
        if let Some(rows) = self.state.lock().unwrap().rows.get_mut(&key(schema, table)) {
            rows.clear();
        }
        Ok(())
    }

    async fn bulk_insert(
        &self,
        _worker_id: usize,
        schema: &str,
        table: &str,
        _columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        if self.hang_inserts.lock().unwrap().contains(&key(schema, table)) {
            std::future::pending::<()>().await;
        }
        if self.fail_bulk.lock().unwrap().contains(&key(schema, table)) {
            return Err(MigrateError::insertion(
                format!("{schema}.{table}"),
                "bulk rejected",
            ));
        }
        let mut s = self.state.lock().unwrap();
        let stored = s.rows.entry(key(schema, table)).or_default();
        stored.extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }

    async fn insert_row(
        &self,
        _worker_id: usize,
        schema: &str,
        table: &str,
        _columns: &[String],
        row: &Row,
    ) -> Result<()> {
        if self.first_value_fails(row) {
            return Err(MigrateError::insertion(
                format!("{schema}.{table}"),
                "row rejected",
            ));
        }
        self.state
            .lock()
            .unwrap()
            .rows
            .entry(key(schema, table))
            .or_default()
            .push(row.clone());
        Ok(())
    }

    async fn row_count(&self, schema: &str, table: &str) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .rows
            .get(&key(schema, table))
            .map(|r| r.len() as u64)
            .unwrap_or(0))
    }

    async fn column_info(&self, schema: &str, table: &str) -> Result<Vec<TargetColumn>> {
        self.state
            .lock()
            .unwrap()
            .columns
            .get(&key(schema, table))
            .cloned()
            .ok_or_else(|| {
                MigrateError::metadata(format!("{schema}.{table}"), "no target column info")
            })
    }
}
