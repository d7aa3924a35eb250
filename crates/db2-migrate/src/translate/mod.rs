//! Pure DDL translators from Oracle / SQL Server dialect to DB2.
//!
//! Every function here is text-in, text-out with no database access;
//! unresolvable input yields [`MigrateError::Translation`] so callers can
//! record the object as skipped and keep going.

use once_cell::sync::Lazy;
use regex::Regex;

mod index;
mod outer_join;
mod sequence;
mod trigger;
mod view;

pub use index::{translate_index, IndexTranslation};
pub use outer_join::rewrite_outer_joins;
pub use sequence::sequence_ddl;
pub use trigger::{translate_mssql_trigger, translate_oracle_trigger, TriggerTranslation};
pub use view::{translate_view, ViewTranslation};

static BRACKET_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]").unwrap());
static MULTI_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Rewrite SQL Server `[ident]` quoting to standard `"ident"` quoting.
pub(crate) fn normalize_brackets(sql: &str) -> String {
    BRACKET_IDENT.replace_all(sql, "\"$1\"").into_owned()
}

/// Collapse runs of whitespace (including newlines) to single spaces.
pub(crate) fn collapse_ws(sql: &str) -> String {
    MULTI_WS.replace_all(sql.trim(), " ").into_owned()
}

/// Split on commas that sit outside any parentheses.
pub(crate) fn split_top_level_commas(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut level = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => level += 1,
            ')' => level -= 1,
            ',' if level == 0 => {
                out.push(text[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(text[start..].trim().to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracket_normalization() {
        assert_eq!(
            normalize_brackets("SELECT [id], [full name] FROM [t]"),
            "SELECT \"id\", \"full name\" FROM \"t\""
        );
    }

    #[test]
    fn whitespace_collapse() {
        assert_eq!(collapse_ws("  a\n\tb   c "), "a b c");
    }
}
