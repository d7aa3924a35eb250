//! Durable log of rows that failed the row-by-row insert fallback.
//!
//! One JSON line per failed row in `failed_inserts_{SCHEMA}_{TABLE}.log`
//! so an operator can replay or inspect rejects after the run.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::target::{Row, SqlValue};

#[derive(Serialize)]
struct FailedRowEntry<'a> {
    index: usize,
    error: &'a str,
    data: serde_json::Map<String, serde_json::Value>,
}

/// Append-only failed-row log for one table.
pub struct FailureLog {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl FailureLog {
    pub fn new(dir: impl AsRef<Path>, schema: &str, table: &str) -> Self {
        let path = dir.as_ref().join(format!(
            "failed_inserts_{}_{}.log",
            schema.to_uppercase(),
            table.to_uppercase()
        ));
        FailureLog {
            path,
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record one failed row with its batch index and driver error.
    pub async fn append(
        &self,
        index: usize,
        columns: &[String],
        row: &Row,
        error: &str,
    ) -> Result<()> {
        let mut data = serde_json::Map::new();
        for (name, val) in columns.iter().zip(row.iter()) {
            data.insert(name.clone(), value_to_json(val));
        }
        let entry = FailedRowEntry { index, error, data };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(file);
        }
        let file = guard.as_mut().expect("opened above");
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn value_to_json(val: &SqlValue) -> serde_json::Value {
    use serde_json::Value;
    match val {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(b) => Value::from(*b),
        SqlValue::I16(v) => Value::from(*v),
        SqlValue::I32(v) => Value::from(*v),
        SqlValue::I64(v) => Value::from(*v),
        SqlValue::F64(v) => Value::from(*v),
        SqlValue::Decimal(d) => Value::from(d.to_string()),
        SqlValue::Text(s) => Value::from(s.clone()),
        SqlValue::Bytes(b) => Value::from(format!("<{} bytes>", b.len())),
        SqlValue::Date(d) => Value::from(d.format("%Y-%m-%d").to_string()),
        SqlValue::Time(t) => Value::from(t.format("%H:%M:%S").to_string()),
        SqlValue::Timestamp(ts) => Value::from(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn appends_one_json_line_per_row() {
        let dir = TempDir::new().unwrap();
        let log = FailureLog::new(dir.path(), "hr", "emp");
        let columns = vec!["ID".to_string(), "NAME".to_string()];

        log.append(
            0,
            &columns,
            &vec![SqlValue::I32(1), SqlValue::Text("a".into())],
            "SQL0302N value too large",
        )
        .await
        .unwrap();
        log.append(3, &columns, &vec![SqlValue::Null, SqlValue::Null], "boom")
            .await
            .unwrap();

        let content = std::fs::read_to_string(dir.path().join("failed_inserts_HR_EMP.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["index"], 0);
        assert_eq!(first["data"]["ID"], 1);
        assert_eq!(first["data"]["NAME"], "a");
        assert!(first["error"].as_str().unwrap().contains("SQL0302N"));
    }
}
