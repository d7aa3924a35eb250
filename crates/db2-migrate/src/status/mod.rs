//! Per-transaction migration status persistence.
//!
//! Every object outcome is written through [`StatusStore::merge`] as soon
//! as it is known, so a crash mid-run still leaves an accurate document
//! behind. Reclassification is idempotent: recording a name as success
//! removes it from the error list and vice versa, and a name never
//! appears in both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MigrateError, Result};
use crate::source::{ObjectType, SourceType};

/// Success/error name lists for one object category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectOutcome {
    #[serde(default)]
    pub success: Vec<String>,
    #[serde(default)]
    pub error: Vec<String>,
}

impl ObjectOutcome {
    fn record(&mut self, name: &str, succeeded: bool) {
        let (add, remove) = if succeeded {
            (&mut self.success, &mut self.error)
        } else {
            (&mut self.error, &mut self.success)
        };
        remove.retain(|n| n != name);
        if !add.iter().any(|n| n == name) {
            add.push(name.to_string());
        }
        add.sort();
    }

    fn contains(&self, name: &str) -> bool {
        self.success.iter().any(|n| n == name) || self.error.iter().any(|n| n == name)
    }
}

/// Aggregated outcomes across all object categories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationStatus {
    #[serde(default)]
    pub tables: ObjectOutcome,
    #[serde(default)]
    pub sequences: ObjectOutcome,
    #[serde(default)]
    pub triggers: ObjectOutcome,
    #[serde(default)]
    pub indexes: ObjectOutcome,
    #[serde(default)]
    pub views: ObjectOutcome,
}

impl MigrationStatus {
    pub fn outcome(&self, object_type: ObjectType) -> &ObjectOutcome {
        match object_type {
            ObjectType::Tables => &self.tables,
            ObjectType::Sequences => &self.sequences,
            ObjectType::Triggers => &self.triggers,
            ObjectType::Indexes => &self.indexes,
            ObjectType::Views => &self.views,
        }
    }

    fn outcome_mut(&mut self, object_type: ObjectType) -> &mut ObjectOutcome {
        match object_type {
            ObjectType::Tables => &mut self.tables,
            ObjectType::Sequences => &mut self.sequences,
            ObjectType::Triggers => &mut self.triggers,
            ObjectType::Indexes => &mut self.indexes,
            ObjectType::Views => &mut self.views,
        }
    }

    pub fn apply(&mut self, update: &StatusUpdate) {
        let outcome = self.outcome_mut(update.object_type);
        for name in &update.success {
            outcome.record(name, true);
        }
        for name in &update.error {
            outcome.record(name, false);
        }
    }

    /// True when `name` is listed at most once across success and error.
    /// Holds by construction; exposed for assertions.
    pub fn is_consistent(&self, object_type: ObjectType, name: &str) -> bool {
        let o = self.outcome(object_type);
        !(o.success.iter().any(|n| n == name) && o.error.iter().any(|n| n == name))
    }
}

/// One reclassification request for a single object category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub object_type: ObjectType,
    #[serde(default)]
    pub success: Vec<String>,
    #[serde(default)]
    pub error: Vec<String>,
}

impl StatusUpdate {
    pub fn success(object_type: ObjectType, name: impl Into<String>) -> Self {
        StatusUpdate {
            object_type,
            success: vec![name.into()],
            error: Vec::new(),
        }
    }

    pub fn error(object_type: ObjectType, name: impl Into<String>) -> Self {
        StatusUpdate {
            object_type,
            success: Vec::new(),
            error: vec![name.into()],
        }
    }
}

/// The persisted document, one per transaction id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDocument {
    pub id: String,
    pub schema: String,
    pub source_type: SourceType,
    pub status: MigrationStatus,
}

/// Read-merge-write persistence for [`StatusDocument`]s.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn merge(
        &self,
        transaction_id: &str,
        schema: &str,
        source_type: SourceType,
        update: StatusUpdate,
    ) -> Result<()>;

    async fn load(&self, transaction_id: &str) -> Result<Option<StatusDocument>>;
}

/// File-backed store: one JSON document per transaction id, written
/// atomically (temp file then rename). Write failures get a bounded
/// retry with a short pause, mirroring a conflict-retry loop.
pub struct FileStatusStore {
    root: PathBuf,
    max_retries: u32,
    retry_pause: Duration,
}

impl FileStatusStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileStatusStore {
            root: root.into(),
            max_retries: 5,
            retry_pause: Duration::from_millis(100),
        }
    }

    fn doc_path(&self, transaction_id: &str) -> PathBuf {
        self.root.join(format!("{transaction_id}.json"))
    }

    async fn read_doc(&self, path: &Path) -> Result<Option<StatusDocument>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_doc(&self, path: &Path, doc: &StatusDocument) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(doc)?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl StatusStore for FileStatusStore {
    async fn merge(
        &self,
        transaction_id: &str,
        schema: &str,
        source_type: SourceType,
        update: StatusUpdate,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.doc_path(transaction_id);

        let mut last_err = None;
        for attempt in 1..=self.max_retries {
            let mut doc = match self.read_doc(&path).await? {
                Some(doc) => doc,
                None => StatusDocument {
                    id: transaction_id.to_string(),
                    schema: schema.to_string(),
                    source_type,
                    status: MigrationStatus::default(),
                },
            };
            doc.status.apply(&update);

            match self.write_doc(&path, &doc).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(transaction_id, attempt, error = %e, "status write failed, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(self.retry_pause).await;
                }
            }
        }
        Err(MigrateError::Status(format!(
            "could not persist status for {transaction_id} after {} attempts: {}",
            self.max_retries,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn load(&self, transaction_id: &str) -> Result<Option<StatusDocument>> {
        self.read_doc(&self.doc_path(transaction_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn record_reclassifies_between_lists() {
        let mut o = ObjectOutcome::default();
        o.record("EMP", false);
        assert_eq!(o.error, vec!["EMP"]);

        o.record("EMP", true);
        assert_eq!(o.success, vec!["EMP"]);
        assert!(o.error.is_empty());

        // repeat is a no-op
        o.record("EMP", true);
        assert_eq!(o.success, vec!["EMP"]);
        assert!(o.contains("EMP"));
    }

    #[test]
    fn names_stay_sorted() {
        let mut o = ObjectOutcome::default();
        o.record("ZED", true);
        o.record("ALPHA", true);
        assert_eq!(o.success, vec!["ALPHA", "ZED"]);
    }

    #[test]
    fn apply_targets_the_right_category() {
        let mut s = MigrationStatus::default();
        s.apply(&StatusUpdate::success(ObjectType::Views, "V1"));
        s.apply(&StatusUpdate::error(ObjectType::Triggers, "T1"));
        assert_eq!(s.views.success, vec!["V1"]);
        assert_eq!(s.triggers.error, vec!["T1"]);
        assert!(s.tables.success.is_empty());
        assert!(s.is_consistent(ObjectType::Views, "V1"));
    }

    #[tokio::test]
    async fn merge_creates_then_updates_document() {
        let dir = TempDir::new().unwrap();
        let store = FileStatusStore::new(dir.path());

        store
            .merge(
                "tx1",
                "HR",
                SourceType::Oracle,
                StatusUpdate::error(ObjectType::Tables, "EMP"),
            )
            .await
            .unwrap();
        store
            .merge(
                "tx1",
                "HR",
                SourceType::Oracle,
                StatusUpdate::success(ObjectType::Tables, "EMP"),
            )
            .await
            .unwrap();

        let doc = store.load("tx1").await.unwrap().unwrap();
        assert_eq!(doc.id, "tx1");
        assert_eq!(doc.schema, "HR");
        assert_eq!(doc.source_type, SourceType::Oracle);
        assert_eq!(doc.status.tables.success, vec!["EMP"]);
        assert!(doc.status.tables.error.is_empty());
    }

    #[tokio::test]
    async fn load_missing_transaction_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FileStatusStore::new(dir.path());
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn document_round_trips_expected_json_shape() {
        let dir = TempDir::new().unwrap();
        let store = FileStatusStore::new(dir.path());
        store
            .merge(
                "tx2",
                "DBO",
                SourceType::SqlServer,
                StatusUpdate::success(ObjectType::Sequences, "ORDER_SEQ"),
            )
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("tx2.json")).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["source_type"], "sqlserver");
        assert_eq!(v["status"]["sequences"]["success"][0], "ORDER_SEQ");
    }
}
