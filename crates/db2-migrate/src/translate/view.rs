//! View DDL translation.
//!
//! DB2 requires an explicit column list on CREATE VIEW and rejects
//! duplicate column names, so the projection is parsed (parenthesis
//! aware, never a naive comma split), duplicate base names get `_1`,
//! `_2`, ... aliases, and the rebuilt statement carries the full list.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use super::{collapse_ws, normalize_brackets, rewrite_outer_joins, split_top_level_commas};
use crate::error::{MigrateError, Result};

/// Output of [`translate_view`].
#[derive(Debug, Clone)]
pub struct ViewTranslation {
    /// DB2 `CREATE OR REPLACE VIEW` statement.
    pub ddl: String,
    /// Final column names, post dedup.
    pub columns: Vec<String>,
    /// Tables referenced in FROM/JOIN clauses, `(schema, table)` with the
    /// schema `None` when unqualified. Checked for existence before the
    /// view DDL is executed.
    pub referenced_tables: Vec<(Option<String>, String)>,
}

static CREATE_VIEW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)CREATE\s+(OR\s+REPLACE\s+)?VIEW").unwrap());

static VIEW_HEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)^CREATE OR REPLACE VIEW\s+(?:"?(\w+)"?\.)?"?(\w+)"?\s+AS\s+(SELECT\s.+)$"#,
    )
    .unwrap()
});

static AS_ALIAS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)\s+AS\s+"?(\w+)"?$"#).unwrap());

static TABLE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:from|join)\s+([a-z0-9_.]+)").unwrap());

/// Translate an Oracle or SQL Server CREATE VIEW statement to DB2.
pub fn translate_view(view: &str, source_ddl: &str) -> Result<ViewTranslation> {
    let ddl = CREATE_VIEW.replace(source_ddl.trim(), "CREATE OR REPLACE VIEW");
    let ddl = collapse_ws(&normalize_brackets(&ddl));

    let head = VIEW_HEAD
        .captures(&ddl)
        .ok_or_else(|| MigrateError::translation(view, "cannot parse view name and SELECT"))?;

    let schema = head.get(1).map(|m| m.as_str().to_uppercase());
    let view_name = head[2].to_uppercase();
    let mut select_stmt = head[3].trim_end_matches(';').to_string();

    if select_stmt.contains("(+)") {
        select_stmt = rewrite_outer_joins(view, &select_stmt)?;
    }

    let full_view_name = match &schema {
        Some(s) => format!("\"{s}\".\"{view_name}\""),
        None => format!("\"{view_name}\""),
    };

    let (columns_part, rest_sql) = split_select_from(view, &select_stmt)?;
    let col_exprs = split_top_level_commas(&columns_part);

    let mut counts: HashMap<String, usize> = HashMap::new();
    for expr in &col_exprs {
        *counts.entry(base_name(expr)).or_insert(0) += 1;
    }

    let mut dup_counters: HashMap<String, usize> = HashMap::new();
    let mut final_names = Vec::with_capacity(col_exprs.len());
    let mut aliased_exprs = Vec::with_capacity(col_exprs.len());

    for expr in &col_exprs {
        let base = base_name(expr);
        let expr_clean = expr.trim_end_matches(';');
        if counts[&base] > 1 {
            let n = dup_counters.entry(base.clone()).or_insert(0);
            *n += 1;
            let alias = format!("{base}_{n}");
            aliased_exprs.push(format!("{expr_clean} AS \"{alias}\""));
            final_names.push(alias);
        } else {
            aliased_exprs.push(expr_clean.to_string());
            final_names.push(base);
        }
    }

    let quoted: Vec<String> = final_names.iter().map(|c| format!("\"{c}\"")).collect();
    let out = format!(
        "CREATE OR REPLACE VIEW {full_view_name} ({}) AS SELECT {} {};",
        quoted.join(", "),
        aliased_exprs.join(", "),
        rest_sql
    );

    let referenced_tables = extract_table_names(&out);

    Ok(ViewTranslation {
        ddl: out,
        columns: final_names,
        referenced_tables,
    })
}

/// Split the text after SELECT at the first top-level FROM keyword.
fn split_select_from(view: &str, select_sql: &str) -> Result<(String, String)> {
    let mut sql = select_sql.trim();
    if sql.len() >= 6 && sql[..6].eq_ignore_ascii_case("SELECT") {
        sql = sql[6..].trim_start();
    }

    let bytes = sql.as_bytes();
    let mut level = 0i32;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => level += 1,
            b')' => {
                if level > 0 {
                    level -= 1;
                }
            }
            b'F' | b'f' if level == 0 && sql[i..].len() >= 4 => {
                let word = &sql[i..i + 4];
                let at_start = i == 0 || bytes[i - 1].is_ascii_whitespace();
                let at_end = i + 4 == bytes.len() || bytes[i + 4].is_ascii_whitespace();
                if at_start && at_end && word.eq_ignore_ascii_case("FROM") {
                    return Ok((
                        sql[..i].trim_end().to_string(),
                        sql[i..].trim_start().to_string(),
                    ));
                }
            }
            _ => {}
        }
        i += 1;
    }

    Err(MigrateError::translation(
        view,
        "no top-level FROM in SELECT statement",
    ))
}

/// Derive the effective output name of one projection expression:
/// an `AS alias` wins, then a trailing bare alias, then the last
/// dot-qualified segment of the expression itself.
fn base_name(expr: &str) -> String {
    let expr = expr.trim();
    if let Some(caps) = AS_ALIAS.captures(expr) {
        return caps[1].to_uppercase();
    }
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() > 1 {
        return parts[parts.len() - 1].trim_matches('"').to_uppercase();
    }
    let unqualified = expr.rsplit('.').next().unwrap_or(expr);
    unqualified.trim_matches('"').to_uppercase()
}

/// Scan FROM/JOIN clauses for referenced table names.
fn extract_table_names(ddl: &str) -> Vec<(Option<String>, String)> {
    let lowered = ddl.to_lowercase();
    TABLE_REF
        .captures_iter(&lowered)
        .map(|caps| {
            let name = &caps[1];
            match name.split_once('.') {
                Some((schema, table)) => (Some(schema.to_uppercase()), table.to_uppercase()),
                None => (None, name.to_uppercase()),
            }
        })
        .collect()
}
