//! On-disk archive of source and translated DDL.
//!
//! Two parallel trees under one root:
//! `{root}/source/{schema}/{object_type}/{name}.sql` holds the DDL as
//! fetched from the source dictionary and `{root}/target/...` the DB2
//! translation. Files are overwritten on re-migration so the archive
//! always reflects the latest run.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::source::ObjectType;

/// Which tree a DDL file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlSide {
    Source,
    Target,
}

impl DdlSide {
    fn as_str(&self) -> &'static str {
        match self {
            DdlSide::Source => "source",
            DdlSide::Target => "target",
        }
    }
}

/// Writer for the DDL archive trees.
pub struct DdlArchive {
    root: PathBuf,
}

impl DdlArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DdlArchive { root: root.into() }
    }

    pub fn path_for(
        &self,
        side: DdlSide,
        schema: &str,
        object_type: ObjectType,
        name: &str,
    ) -> PathBuf {
        self.root
            .join(side.as_str())
            .join(schema.to_uppercase())
            .join(object_type.as_str())
            .join(format!("{}.sql", name.to_uppercase()))
    }

    /// Write one DDL file, creating parent directories as needed.
    pub async fn save(
        &self,
        side: DdlSide,
        schema: &str,
        object_type: ObjectType,
        name: &str,
        ddl: &str,
    ) -> Result<()> {
        let path = self.path_for(side, schema, object_type, name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, ddl.as_bytes()).await?;
        debug!(path = %path.display(), "archived ddl");
        Ok(())
    }

    /// Archive the source DDL and its translation in one call.
    pub async fn save_pair(
        &self,
        schema: &str,
        object_type: ObjectType,
        name: &str,
        source_ddl: &str,
        target_ddl: &str,
    ) -> Result<()> {
        self.save(DdlSide::Source, schema, object_type, name, source_ddl)
            .await?;
        self.save(DdlSide::Target, schema, object_type, name, target_ddl)
            .await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn writes_both_trees() {
        let dir = TempDir::new().unwrap();
        let archive = DdlArchive::new(dir.path());

        archive
            .save_pair(
                "hr",
                ObjectType::Views,
                "v_emp",
                "CREATE VIEW ...",
                "CREATE OR REPLACE VIEW ...",
            )
            .await
            .unwrap();

        let src = dir.path().join("source/HR/views/V_EMP.sql");
        let tgt = dir.path().join("target/HR/views/V_EMP.sql");
        assert_eq!(std::fs::read_to_string(src).unwrap(), "CREATE VIEW ...");
        assert_eq!(
            std::fs::read_to_string(tgt).unwrap(),
            "CREATE OR REPLACE VIEW ..."
        );
    }

    #[tokio::test]
    async fn rerun_overwrites_previous_file() {
        let dir = TempDir::new().unwrap();
        let archive = DdlArchive::new(dir.path());

        archive
            .save(DdlSide::Target, "HR", ObjectType::Sequences, "S1", "old")
            .await
            .unwrap();
        archive
            .save(DdlSide::Target, "HR", ObjectType::Sequences, "S1", "new")
            .await
            .unwrap();

        let path = archive.path_for(DdlSide::Target, "HR", ObjectType::Sequences, "S1");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "new");
    }
}
