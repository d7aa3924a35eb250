use serde::{Deserialize, Serialize};

/// Which source dialect a job reads from. Chosen once at job start and
/// recorded in the status document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Oracle,
    #[serde(rename = "sqlserver")]
    SqlServer,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Oracle => "oracle",
            SourceType::SqlServer => "sqlserver",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Migratable object categories, in execution order for a full run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Tables,
    Sequences,
    Triggers,
    Indexes,
    Views,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Tables => "tables",
            ObjectType::Sequences => "sequences",
            ObjectType::Triggers => "triggers",
            ObjectType::Indexes => "indexes",
            ObjectType::Views => "views",
        }
    }
}

/// Source column description, as reported by ALL_TAB_COLUMNS or
/// INFORMATION_SCHEMA.COLUMNS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Source dialect type name, upper case (VARCHAR2, NUMBER, NVARCHAR, ...).
    pub data_type: String,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<i32>,
    pub nullable: bool,
}

/// Everything the engine needs to know about one source table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
}

/// Sequence state on the source, used to compute a continuous START WITH
/// on the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceMeta {
    pub name: String,
    /// Last value the source sequence handed out.
    pub last_value: i64,
    pub increment_by: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub cycle: bool,
    pub cache_size: i64,
}
