//! Oracle `(+)` implicit outer join rewriting.
//!
//! Only the two-table equality pattern is rewritten:
//!
//! ```sql
//! FROM t1 a, t2 b WHERE a.col = b.col(+)
//! -- becomes
//! FROM t1 a LEFT JOIN t2 b ON a.col = b.col
//! ```
//!
//! Anything beyond that (three or more tables, `(+)` on a non-equality
//! predicate, OR-connected conditions) yields a translation error so the
//! object is skipped rather than silently mistranslated.

use once_cell::sync::Lazy;
use regex::Regex;

use super::split_top_level_commas;
use crate::error::{MigrateError, Result};

static FROM_KW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bFROM\b").unwrap());
static CLAUSE_BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(WHERE|GROUP\s+BY|HAVING|ORDER\s+BY|UNION|FETCH|LIMIT)\b").unwrap()
});
static POST_WHERE_BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(GROUP\s+BY|HAVING|ORDER\s+BY|UNION|FETCH|LIMIT)\b").unwrap()
});
static OR_KW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bOR\b").unwrap());
static PLUS_ON_RIGHT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\w+)\s*\.\s*(\w+)\s*=\s*(\w+)\s*\.\s*(\w+)\s*\(\+\)$").unwrap()
});
static PLUS_ON_LEFT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\w+)\s*\.\s*(\w+)\s*\(\+\)\s*=\s*(\w+)\s*\.\s*(\w+)$").unwrap()
});

/// One FROM-list entry, `table [AS] alias` or a bare table name.
struct FromEntry {
    table: String,
    alias: String,
}

impl FromEntry {
    fn parse(entry: &str) -> Self {
        let tokens: Vec<&str> = entry.split_whitespace().collect();
        match tokens.as_slice() {
            [single] => FromEntry {
                table: (*single).to_string(),
                alias: (*single).to_string(),
            },
            [head @ .., kw, alias] if kw.eq_ignore_ascii_case("AS") => FromEntry {
                table: head.join(" "),
                alias: (*alias).to_string(),
            },
            [head @ .., alias] => FromEntry {
                table: head.join(" "),
                alias: (*alias).to_string(),
            },
            [] => FromEntry {
                table: String::new(),
                alias: String::new(),
            },
        }
    }

    fn render(&self) -> String {
        if self.table.eq_ignore_ascii_case(&self.alias) {
            self.table.clone()
        } else {
            format!("{} {}", self.table, self.alias)
        }
    }
}

/// Rewrite `(+)` outer joins in a SELECT statement to ANSI LEFT JOIN.
///
/// Returns the input unchanged when it contains no `(+)` marker.
pub fn rewrite_outer_joins(object: &str, sql: &str) -> Result<String> {
    if !sql.contains("(+)") {
        return Ok(sql.to_string());
    }

    let from_match = FROM_KW
        .find(sql)
        .ok_or_else(|| MigrateError::translation(object, "(+) present but no FROM clause"))?;

    let after_from = &sql[from_match.end()..];
    let (from_part, after) = match CLAUSE_BOUNDARY.find(after_from) {
        Some(m) => (&after_from[..m.start()], &after_from[m.start()..]),
        None => (after_from, ""),
    };

    let entries: Vec<FromEntry> = split_top_level_commas(from_part)
        .iter()
        .filter(|e| !e.is_empty())
        .map(|e| FromEntry::parse(e))
        .collect();

    if entries.len() != 2 {
        return Err(MigrateError::translation(
            object,
            format!(
                "(+) join over {} table(s); only the two-table form is supported",
                entries.len()
            ),
        ));
    }

    let after_upper = after.trim_start();
    if !after_upper[..after_upper.len().min(5)].eq_ignore_ascii_case("WHERE") {
        return Err(MigrateError::translation(
            object,
            "(+) marker outside a WHERE clause",
        ));
    }
    let where_and_rest = &after_upper[5..];
    let (where_body, trailing) = match POST_WHERE_BOUNDARY.find(where_and_rest) {
        Some(m) => (&where_and_rest[..m.start()], &where_and_rest[m.start()..]),
        None => (where_and_rest, ""),
    };

    if OR_KW.is_match(where_body) {
        return Err(MigrateError::translation(
            object,
            "(+) combined with OR conditions",
        ));
    }

    let mut join_pair: Option<(String, String)> = None;
    let mut on_conds: Vec<String> = Vec::new();
    let mut kept_conds: Vec<String> = Vec::new();

    for cond in split_top_level_and(where_body) {
        let cond = cond.trim();
        if cond.is_empty() {
            continue;
        }
        if !cond.contains("(+)") {
            kept_conds.push(cond.to_string());
            continue;
        }

        // `inner` keeps all its rows; `outer` carries the (+) marker.
        let (inner_alias, inner_col, outer_alias, outer_col) =
            if let Some(c) = PLUS_ON_RIGHT.captures(cond) {
                (
                    c[1].to_string(),
                    c[2].to_string(),
                    c[3].to_string(),
                    c[4].to_string(),
                )
            } else if let Some(c) = PLUS_ON_LEFT.captures(cond) {
                (
                    c[3].to_string(),
                    c[4].to_string(),
                    c[1].to_string(),
                    c[2].to_string(),
                )
            } else {
                return Err(MigrateError::translation(
                    object,
                    format!("unsupported (+) predicate: {cond}"),
                ));
            };

        let known = |alias: &str| entries.iter().any(|e| e.alias.eq_ignore_ascii_case(alias));
        if !known(&inner_alias) || !known(&outer_alias) {
            return Err(MigrateError::translation(
                object,
                format!("(+) predicate references unknown alias: {cond}"),
            ));
        }

        match &join_pair {
            None => join_pair = Some((inner_alias.clone(), outer_alias.clone())),
            Some((i, o))
                if i.eq_ignore_ascii_case(&inner_alias) && o.eq_ignore_ascii_case(&outer_alias) => {
            }
            Some(_) => {
                return Err(MigrateError::translation(
                    object,
                    "(+) predicates disagree on join direction",
                ));
            }
        }
        on_conds.push(format!(
            "{inner_alias}.{inner_col} = {outer_alias}.{outer_col}"
        ));
    }

    let (inner_alias, outer_alias) = join_pair
        .ok_or_else(|| MigrateError::translation(object, "(+) marker without a join predicate"))?;

    let entry_for = |alias: &str| {
        entries
            .iter()
            .find(|e| e.alias.eq_ignore_ascii_case(alias))
            .ok_or_else(|| {
                MigrateError::translation(object, format!("(+) join alias vanished: {alias}"))
            })
    };
    let inner = entry_for(&inner_alias)?;
    let outer = entry_for(&outer_alias)?;

    let mut out = String::new();
    out.push_str(sql[..from_match.start()].trim_end());
    out.push_str(&format!(
        " FROM {} LEFT JOIN {} ON {}",
        inner.render(),
        outer.render(),
        on_conds.join(" AND ")
    ));
    if !kept_conds.is_empty() {
        out.push_str(" WHERE ");
        out.push_str(&kept_conds.join(" AND "));
    }
    let trailing = trailing.trim();
    if !trailing.is_empty() {
        out.push(' ');
        out.push_str(trailing);
    }
    Ok(out.trim().to_string())
}

/// Split a WHERE body on top-level AND keywords.
fn split_top_level_and(body: &str) -> Vec<String> {
    let bytes = body.as_bytes();
    let mut out = Vec::new();
    let mut level = 0i32;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => level += 1,
            b')' => level -= 1,
            b'A' | b'a' if level == 0 && i + 3 <= bytes.len() => {
                let at_start = i == 0 || bytes[i - 1].is_ascii_whitespace();
                let at_end = i + 3 == bytes.len() || bytes[i + 3].is_ascii_whitespace();
                if at_start && at_end && body[i..i + 3].eq_ignore_ascii_case("AND") {
                    out.push(body[start..i].to_string());
                    start = i + 3;
                    i += 3;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }
    out.push(body[start..].to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_plus_marker_passes_through() {
        let sql = "SELECT * FROM EMP WHERE ID = 1";
        assert_eq!(rewrite_outer_joins("V", sql).unwrap(), sql);
    }

    #[test]
    fn plus_on_right_becomes_left_join() {
        let sql = "SELECT E.ID, D.NAME FROM EMP E, DEPT D WHERE E.DEPT_ID = D.ID(+)";
        let out = rewrite_outer_joins("V", sql).unwrap();
        assert_eq!(
            out,
            "SELECT E.ID, D.NAME FROM EMP E LEFT JOIN DEPT D ON E.DEPT_ID = D.ID"
        );
    }

    #[test]
    fn plus_on_left_flips_direction() {
        let sql = "SELECT * FROM EMP E, DEPT D WHERE D.ID(+) = E.DEPT_ID";
        let out = rewrite_outer_joins("V", sql).unwrap();
        assert!(out.contains("FROM EMP E LEFT JOIN DEPT D ON E.DEPT_ID = D.ID"));
    }

    #[test]
    fn other_conditions_stay_in_where() {
        let sql = "SELECT * FROM EMP E, DEPT D WHERE E.DEPT_ID = D.ID(+) AND E.ACTIVE = 1";
        let out = rewrite_outer_joins("V", sql).unwrap();
        assert!(out.contains("LEFT JOIN DEPT D ON E.DEPT_ID = D.ID"));
        assert!(out.ends_with("WHERE E.ACTIVE = 1"));
    }

    #[test]
    fn trailing_clauses_survive() {
        let sql = "SELECT * FROM EMP E, DEPT D WHERE E.DEPT_ID = D.ID(+) ORDER BY E.ID";
        let out = rewrite_outer_joins("V", sql).unwrap();
        assert!(out.ends_with("ORDER BY E.ID"));
    }

    #[test]
    fn three_tables_are_rejected() {
        let sql = "SELECT * FROM A, B, C WHERE A.X = B.X(+)";
        let err = rewrite_outer_joins("V", sql).unwrap_err();
        assert!(matches!(err, crate::error::MigrateError::Translation { .. }));
    }

    #[test]
    fn non_equality_plus_is_rejected() {
        let sql = "SELECT * FROM A, B WHERE A.X > B.X(+)";
        assert!(rewrite_outer_joins("V", sql).is_err());
    }

    #[test]
    fn or_conditions_are_rejected() {
        let sql = "SELECT * FROM A, B WHERE A.X = B.X(+) OR A.Y = 1";
        assert!(rewrite_outer_joins("V", sql).is_err());
    }
}
