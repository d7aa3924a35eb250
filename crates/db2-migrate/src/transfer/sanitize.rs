//! Per-value sanitization against the target column type.
//!
//! Source drivers hand back values that DB2 will reject outright
//! (oversized strings, out-of-range integers, 26-digit timestamps), so
//! every value is coerced to the target column's family before insert.
//! Unconvertible values become NULL rather than failing the batch.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::target::{Row, SqlValue, TargetColumn};

/// Ceiling applied to LOB values, 1 MiB.
pub const LOB_CEILING: usize = 1024 * 1024;

const TIMESTAMP_WIDTH: usize = 19; // YYYY-MM-DD HH:MM:SS
const DATE_WIDTH: usize = 10;
const TIME_WIDTH: usize = 8;

/// Sanitize one value for one target column.
pub fn sanitize_value(val: &SqlValue, col: &TargetColumn) -> SqlValue {
    if val.is_null() {
        return SqlValue::Null;
    }
    let family = col.type_name.to_uppercase();

    if contains_any(&family, &["VARCHAR", "CHAR", "CLOB", "TEXT"]) {
        let s = stringify(val);
        let mut ceiling = col.length.map(|l| l as usize).unwrap_or(usize::MAX);
        if family.contains("CLOB") {
            ceiling = ceiling.min(LOB_CEILING);
        }
        return SqlValue::Text(truncate_chars(&s, ceiling));
    }

    if family.contains("BLOB") || contains_any(&family, &["BINARY", "VARBINARY"]) {
        let mut bytes = match val {
            SqlValue::Bytes(b) => b.clone(),
            other => stringify(other).into_bytes(),
        };
        bytes.truncate(LOB_CEILING);
        return SqlValue::Bytes(bytes);
    }

    if contains_any(&family, &["SMALLINT", "INTEGER", "BIGINT", "INT"]) {
        return sanitize_integer(val, &family);
    }

    if contains_any(&family, &["DECIMAL", "NUMERIC", "NUMBER"]) {
        return match val {
            SqlValue::Decimal(d) => SqlValue::Decimal(*d),
            SqlValue::I16(v) => SqlValue::Decimal(Decimal::from(*v)),
            SqlValue::I32(v) => SqlValue::Decimal(Decimal::from(*v)),
            SqlValue::I64(v) => SqlValue::Decimal(Decimal::from(*v)),
            SqlValue::Text(s) if s.trim().is_empty() => SqlValue::Null,
            other => match Decimal::from_str(stringify(other).trim()) {
                Ok(d) => SqlValue::Decimal(d),
                Err(_) => SqlValue::Null,
            },
        };
    }

    if contains_any(&family, &["FLOAT", "REAL", "DOUBLE"]) {
        return match val {
            SqlValue::F64(f) => SqlValue::F64(*f),
            SqlValue::I16(v) => SqlValue::F64(*v as f64),
            SqlValue::I32(v) => SqlValue::F64(*v as f64),
            SqlValue::I64(v) => SqlValue::F64(*v as f64),
            SqlValue::Text(s) if s.trim().is_empty() => SqlValue::Null,
            other => match stringify(other).trim().parse::<f64>() {
                Ok(f) => SqlValue::F64(f),
                Err(_) => SqlValue::Null,
            },
        };
    }

    if family.contains("TIMESTAMP") {
        if let SqlValue::Timestamp(ts) = val {
            return SqlValue::Timestamp(*ts);
        }
        return SqlValue::Text(truncate_chars(&stringify(val), TIMESTAMP_WIDTH));
    }
    if family.contains("DATE") {
        if let SqlValue::Date(d) = val {
            return SqlValue::Date(*d);
        }
        return SqlValue::Text(truncate_chars(&stringify(val), DATE_WIDTH));
    }
    if family.contains("TIME") {
        if let SqlValue::Time(t) = val {
            return SqlValue::Time(*t);
        }
        return SqlValue::Text(truncate_chars(&stringify(val), TIME_WIDTH));
    }

    SqlValue::Text(stringify(val))
}

/// Sanitize a whole row against the target column list, positionally.
pub fn sanitize_row(row: &Row, columns: &[TargetColumn]) -> Row {
    row.iter()
        .zip(columns.iter())
        .map(|(val, col)| sanitize_value(val, col))
        .collect()
}

fn sanitize_integer(val: &SqlValue, family: &str) -> SqlValue {
    let parsed: Option<i64> = match val {
        SqlValue::Bool(b) => Some(i64::from(*b)),
        SqlValue::I16(v) => Some(*v as i64),
        SqlValue::I32(v) => Some(*v as i64),
        SqlValue::I64(v) => Some(*v),
        SqlValue::F64(f) => Some(*f as i64),
        SqlValue::Decimal(d) => Some(d.to_f64().map(|f| f as i64).unwrap_or(0)),
        SqlValue::Text(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                s.parse::<i64>().ok().or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
            }
        }
        _ => None,
    };
    let Some(v) = parsed else {
        return SqlValue::Null;
    };

    if family.contains("SMALLINT") {
        SqlValue::I16(v.clamp(i16::MIN as i64, i16::MAX as i64) as i16)
    } else if family.contains("BIGINT") {
        SqlValue::I64(v)
    } else {
        SqlValue::I32(v.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn stringify(val: &SqlValue) -> String {
    match val {
        SqlValue::Null => String::new(),
        SqlValue::Bool(b) => b.to_string(),
        SqlValue::I16(v) => v.to_string(),
        SqlValue::I32(v) => v.to_string(),
        SqlValue::I64(v) => v.to_string(),
        SqlValue::F64(v) => v.to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::Text(s) => s.clone(),
        SqlValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        SqlValue::Time(t) => t.format("%H:%M:%S").to_string(),
        SqlValue::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(type_name: &str, length: Option<u32>) -> TargetColumn {
        TargetColumn {
            name: "C".into(),
            type_name: type_name.into(),
            length,
            precision: None,
            scale: None,
            nullable: true,
        }
    }

    #[test]
    fn oversized_string_is_truncated_to_column_length() {
        let v = sanitize_value(&SqlValue::Text("abcdef".into()), &col("VARCHAR", Some(3)));
        assert_eq!(v, SqlValue::Text("abc".into()));
    }

    #[test]
    fn smallint_clamps_to_i16_range() {
        let v = sanitize_value(&SqlValue::I64(100_000), &col("SMALLINT", None));
        assert_eq!(v, SqlValue::I16(i16::MAX));
        let v = sanitize_value(&SqlValue::I64(-100_000), &col("SMALLINT", None));
        assert_eq!(v, SqlValue::I16(i16::MIN));
    }

    #[test]
    fn integer_clamps_to_i32_range() {
        let v = sanitize_value(&SqlValue::I64(i64::MAX), &col("INTEGER", None));
        assert_eq!(v, SqlValue::I32(i32::MAX));
    }

    #[test]
    fn empty_string_numeric_becomes_null() {
        assert_eq!(
            sanitize_value(&SqlValue::Text("  ".into()), &col("INTEGER", None)),
            SqlValue::Null
        );
        assert_eq!(
            sanitize_value(&SqlValue::Text("".into()), &col("DECIMAL", None)),
            SqlValue::Null
        );
        assert_eq!(
            sanitize_value(&SqlValue::Text(" ".into()), &col("DOUBLE", None)),
            SqlValue::Null
        );
    }

    #[test]
    fn unparseable_number_becomes_null() {
        assert_eq!(
            sanitize_value(&SqlValue::Text("abc".into()), &col("BIGINT", None)),
            SqlValue::Null
        );
    }

    #[test]
    fn decimal_parses_from_string() {
        let v = sanitize_value(&SqlValue::Text("12.50".into()), &col("DECIMAL", None));
        assert_eq!(v, SqlValue::Decimal(Decimal::from_str("12.50").unwrap()));
    }

    #[test]
    fn timestamp_literal_is_cut_to_nineteen_chars() {
        let v = sanitize_value(
            &SqlValue::Text("2024-01-02 03:04:05.123456".into()),
            &col("TIMESTAMP", None),
        );
        assert_eq!(v, SqlValue::Text("2024-01-02 03:04:05".into()));
    }

    #[test]
    fn date_and_time_literal_widths() {
        let v = sanitize_value(
            &SqlValue::Text("2024-01-02T00:00:00".into()),
            &col("DATE", None),
        );
        assert_eq!(v, SqlValue::Text("2024-01-02".into()));
        let v = sanitize_value(
            &SqlValue::Text("03:04:05.999".into()),
            &col("TIME", None),
        );
        assert_eq!(v, SqlValue::Text("03:04:05".into()));
    }

    #[test]
    fn lob_values_are_capped_at_one_mebibyte() {
        let big = "x".repeat(LOB_CEILING + 10);
        let v = sanitize_value(&SqlValue::Text(big), &col("CLOB", None));
        match v {
            SqlValue::Text(s) => assert_eq!(s.len(), LOB_CEILING),
            other => panic!("unexpected {other:?}"),
        }

        let blob = vec![0u8; LOB_CEILING + 10];
        let v = sanitize_value(&SqlValue::Bytes(blob), &col("BLOB", None));
        match v {
            SqlValue::Bytes(b) => assert_eq!(b.len(), LOB_CEILING),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn null_passes_through() {
        assert_eq!(
            sanitize_value(&SqlValue::Null, &col("VARCHAR", Some(10))),
            SqlValue::Null
        );
    }

    #[test]
    fn row_sanitization_is_positional() {
        let cols = vec![col("SMALLINT", None), col("VARCHAR", Some(2))];
        let row = vec![SqlValue::I64(99_999), SqlValue::Text("hello".into())];
        let out = sanitize_row(&row, &cols);
        assert_eq!(out, vec![SqlValue::I16(i16::MAX), SqlValue::Text("he".into())]);
    }
}
