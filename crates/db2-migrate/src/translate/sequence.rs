//! Sequence DDL generation with value continuity.
//!
//! The target sequence must never re-issue a value the source already
//! handed out, so START WITH is computed from the source's last value
//! plus its increment, floored at MINVALUE. A start value past MAXVALUE
//! is an error, not a wrap.

use crate::error::{MigrateError, Result};
use crate::source::SequenceMeta;
use crate::target::quote_ident;

/// Generate DB2 `CREATE SEQUENCE` DDL continuing from the source state.
pub fn sequence_ddl(schema: &str, meta: &SequenceMeta) -> Result<String> {
    let start_with = meta.last_value.saturating_add(meta.increment_by);
    if start_with > meta.max_value {
        return Err(MigrateError::translation(
            format!("{schema}.{}", meta.name),
            format!(
                "START WITH ({start_with}) exceeds MAXVALUE ({})",
                meta.max_value
            ),
        ));
    }
    let start_with = start_with.max(meta.min_value);
    let cache = meta.cache_size.max(1);
    let cycle = if meta.cycle { "CYCLE" } else { "NO CYCLE" };

    Ok(format!(
        "CREATE SEQUENCE {}.{} AS BIGINT\n\
         START WITH {start_with}\n\
         INCREMENT BY {}\n\
         MINVALUE {}\n\
         MAXVALUE {}\n\
         {cycle}\n\
         CACHE {cache}",
        quote_ident(&schema.to_uppercase()),
        quote_ident(&meta.name.to_uppercase()),
        meta.increment_by,
        meta.min_value,
        meta.max_value,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(last: i64, inc: i64, min: i64, max: i64) -> SequenceMeta {
        SequenceMeta {
            name: "ORDER_SEQ".into(),
            last_value: last,
            increment_by: inc,
            min_value: min,
            max_value: max,
            cycle: false,
            cache_size: 20,
        }
    }

    #[test]
    fn start_with_continues_past_last_value() {
        let ddl = sequence_ddl("HR", &meta(100, 1, 1, 9999)).unwrap();
        assert!(ddl.contains("START WITH 101"));
        assert!(ddl.contains("CREATE SEQUENCE \"HR\".\"ORDER_SEQ\" AS BIGINT"));
        assert!(ddl.contains("NO CYCLE"));
        assert!(ddl.contains("CACHE 20"));
    }

    #[test]
    fn start_with_is_floored_at_minvalue() {
        let ddl = sequence_ddl("HR", &meta(0, 1, 10, 9999)).unwrap();
        assert!(ddl.contains("START WITH 10"));
    }

    #[test]
    fn exceeding_maxvalue_is_an_error() {
        let err = sequence_ddl("HR", &meta(104, 1, 1, 104)).unwrap_err();
        assert!(matches!(err, MigrateError::Translation { .. }));
        assert!(err.to_string().contains("105"));
    }

    #[test]
    fn max_i64_does_not_overflow() {
        let ddl = sequence_ddl("HR", &meta(i64::MAX - 1, 1, 1, i64::MAX)).unwrap();
        assert!(ddl.contains(&format!("START WITH {}", i64::MAX)));
    }

    #[test]
    fn cache_floor_and_cycle_flag() {
        let mut m = meta(5, 2, 1, 100);
        m.cycle = true;
        m.cache_size = 0;
        let ddl = sequence_ddl("HR", &m).unwrap();
        assert!(ddl.contains("START WITH 7"));
        assert!(ddl.contains("\nCYCLE\n"));
        assert!(ddl.contains("CACHE 1"));
    }
}
