//! Trigger DDL translation for both source dialects.
//!
//! Oracle row triggers use `:NEW`/`:OLD` correlation names and PL/SQL
//! `:=` assignment; SQL Server triggers use the `INSERTED`/`DELETED`
//! pseudo-tables. Both are rewritten into DB2 SQL PL row triggers with a
//! synthesized REFERENCING clause.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::{MigrateError, Result};

/// Output of the trigger translators.
#[derive(Debug, Clone)]
pub struct TriggerTranslation {
    /// DB2 trigger DDL.
    pub ddl: String,
    /// Schema of the subject table, when the source DDL qualified it.
    pub table_schema: Option<String>,
    /// Table the trigger fires on; its existence is checked before the
    /// DDL is executed.
    pub table: String,
}

static TIMING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(BEFORE|AFTER|INSTEAD OF)\b").unwrap());
static EVENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(INSERT|UPDATE|DELETE)\b").unwrap());
static ON_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bON\s+(?:"?(\w+)"?\.)?"?(\w+)"?"#).unwrap());
static ORACLE_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\bBEGIN\b(.*?)\bEND\s*;").unwrap());
static MSSQL_BODY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)\bBEGIN\b(.*?)\bEND\b").unwrap());
static NEW_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i):NEW\.").unwrap());
static OLD_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i):OLD\.").unwrap());
static INSERTED_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bINSERTED\.").unwrap());
static DELETED_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bDELETED\.").unwrap());
static GO_KW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bGO\b").unwrap());
static NEXTVAL_DUAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)SELECT\s+(\w+)\.NEXTVAL\s+INTO\s+([\w.]+)\s+FROM\s+DUAL\s*;").unwrap()
});
static ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)((?:NEW_ROW|OLD_ROW)\.\w+|\b\w+\b)\s*:=\s*([^;]+);").unwrap()
});

/// Translate an Oracle row trigger to a DB2 SQL PL trigger.
pub fn translate_oracle_trigger(
    schema: &str,
    trigger: &str,
    source_ddl: &str,
) -> Result<TriggerTranslation> {
    let timing = TIMING
        .captures(source_ddl)
        .map(|c| c[1].to_uppercase())
        .unwrap_or_else(|| "AFTER".to_string());
    let events = detect_events(source_ddl);
    let (table_schema, table) = subject_table(trigger, source_ddl)?;

    let body = ORACLE_BODY
        .captures(source_ddl)
        .map(|c| c[1].trim().to_string())
        .ok_or_else(|| MigrateError::translation(trigger, "trigger body not found"))?;

    let body = NEW_REF.replace_all(&body, "NEW_ROW.");
    let body = OLD_REF.replace_all(&body, "OLD_ROW.");
    let body = NEXTVAL_DUAL.replace_all(&body, |caps: &Captures<'_>| {
        format!(
            "SELECT NEXT VALUE FOR {schema}.{} INTO {} FROM SYSIBM.SYSDUMMY1;",
            &caps[1], &caps[2]
        )
    });
    let body = ASSIGNMENT.replace_all(&body, "SET $1 = $2;");
    let body = reflow_statements(&body);

    let mut referencing = Vec::new();
    if events.iter().any(|e| e == "INSERT" || e == "UPDATE") {
        referencing.push("NEW AS NEW_ROW");
    }
    if events.iter().any(|e| e == "DELETE" || e == "UPDATE") {
        referencing.push("OLD AS OLD_ROW");
    }

    let event_clause = events.join(" OR ");
    let schema_up = schema.to_uppercase();
    let trigger_up = trigger.to_uppercase();
    let table_schema_up = table_schema.clone().unwrap_or_else(|| schema_up.clone());

    let ddl = format!(
        "CREATE OR REPLACE TRIGGER {schema_up}.{trigger_up}\n\
         {timing} {event_clause} ON {table_schema_up}.{table}\n\
         REFERENCING {}\n\
         FOR EACH ROW\n\
         BEGIN\n    {body}\nEND;",
        referencing.join(" ")
    );

    Ok(TriggerTranslation {
        ddl,
        table_schema,
        table,
    })
}

/// Translate a SQL Server trigger to a DB2 SQL PL trigger.
pub fn translate_mssql_trigger(
    schema: &str,
    trigger: &str,
    source_ddl: &str,
) -> Result<TriggerTranslation> {
    let timing = TIMING
        .captures(source_ddl)
        .map(|c| c[1].to_uppercase())
        .unwrap_or_else(|| "AFTER".to_string());
    let event = EVENT
        .captures(source_ddl)
        .map(|c| c[1].to_uppercase())
        .unwrap_or_else(|| "INSERT".to_string());
    let (table_schema, table) = subject_table(trigger, source_ddl)?;

    let body = MSSQL_BODY
        .captures(source_ddl)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| source_ddl.trim().to_string());
    let body = INSERTED_REF.replace_all(&body, "NEW.");
    let body = DELETED_REF.replace_all(&body, "OLD.");
    let body = GO_KW.replace_all(&body, "");
    let body = reflow_statements(&body);

    let schema_up = schema.to_uppercase();
    let trigger_up = trigger.to_uppercase();
    let table_schema_up = table_schema.clone().unwrap_or_else(|| schema_up.clone());

    let ddl = format!(
        "CREATE TRIGGER {schema_up}.{trigger_up}\n\
         {timing} {event} ON {table_schema_up}.{table}\n\
         REFERENCING NEW AS NEW OLD AS OLD\n\
         FOR EACH ROW MODE DB2\n\
         BEGIN ATOMIC\n    {body}\nEND"
    );

    Ok(TriggerTranslation {
        ddl,
        table_schema,
        table,
    })
}

/// Distinct DML events in first-occurrence order, INSERT by default.
fn detect_events(ddl: &str) -> Vec<String> {
    let mut events: Vec<String> = Vec::new();
    for caps in EVENT.captures_iter(ddl) {
        let ev = caps[1].to_uppercase();
        if !events.contains(&ev) {
            events.push(ev);
        }
    }
    if events.is_empty() {
        events.push("INSERT".to_string());
    }
    events
}

fn subject_table(trigger: &str, ddl: &str) -> Result<(Option<String>, String)> {
    let caps = ON_TABLE
        .captures(ddl)
        .ok_or_else(|| MigrateError::translation(trigger, "cannot resolve subject table"))?;
    Ok((
        caps.get(1).map(|m| m.as_str().to_uppercase()),
        caps[2].to_uppercase(),
    ))
}

/// One statement per line, each terminated with a semicolon.
fn reflow_statements(body: &str) -> String {
    let statements: Vec<&str> = body
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if statements.is_empty() {
        return String::new();
    }
    format!("{};", statements.join(";\n    "))
}
