use bytes::BytesMut;
use postgres::types::{IsNull, ToSql, Type};

use crate::error::StoreError;

/// Backend-neutral SQL value. Covers the types the schema actually uses;
/// booleans are stored as integers on SQLite and as proper booleans on
/// PostgreSQL.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl rusqlite::types::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, Value as SqliteValue, ValueRef};
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqliteValue::Null),
            Value::Integer(v) => ToSqlOutput::Owned(SqliteValue::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(SqliteValue::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Bool(v) => ToSqlOutput::Owned(SqliteValue::Integer(i64::from(*v))),
        })
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Integer(v) => v.to_sql(ty, out),
            Value::Real(v) => v.to_sql(ty, out),
            Value::Text(v) => v.to_sql(ty, out),
            Value::Bool(v) => v.to_sql(ty, out),
        }
    }

    // Acceptance is per-variant; the checked path below delegates to the
    // wrapped type's own checks.
    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Integer(v) => v.to_sql_checked(ty, out),
            Value::Real(v) => v.to_sql_checked(ty, out),
            Value::Text(v) => v.to_sql_checked(ty, out),
            Value::Bool(v) => v.to_sql_checked(ty, out),
        }
    }
}

/// A decoded result row. Column positions match the SELECT list.
#[derive(Clone, Debug)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn value(
        &self,
        idx: usize,
        table: &'static str,
        column: &'static str,
    ) -> Result<&Value, StoreError> {
        self.values.get(idx).ok_or(StoreError::CorruptRow {
            table,
            column,
            detail: format!("column index {idx} out of range"),
        })
    }

    pub fn integer(
        &self,
        idx: usize,
        table: &'static str,
        column: &'static str,
    ) -> Result<i64, StoreError> {
        match self.value(idx, table, column)? {
            Value::Integer(v) => Ok(*v),
            other => Err(corrupt(table, column, "integer", other)),
        }
    }

    pub fn opt_integer(
        &self,
        idx: usize,
        table: &'static str,
        column: &'static str,
    ) -> Result<Option<i64>, StoreError> {
        match self.value(idx, table, column)? {
            Value::Null => Ok(None),
            Value::Integer(v) => Ok(Some(*v)),
            other => Err(corrupt(table, column, "integer", other)),
        }
    }

    pub fn text(
        &self,
        idx: usize,
        table: &'static str,
        column: &'static str,
    ) -> Result<String, StoreError> {
        match self.value(idx, table, column)? {
            Value::Text(v) => Ok(v.clone()),
            other => Err(corrupt(table, column, "text", other)),
        }
    }

    pub fn opt_text(
        &self,
        idx: usize,
        table: &'static str,
        column: &'static str,
    ) -> Result<Option<String>, StoreError> {
        match self.value(idx, table, column)? {
            Value::Null => Ok(None),
            Value::Text(v) => Ok(Some(v.clone())),
            other => Err(corrupt(table, column, "text", other)),
        }
    }

    /// Booleans come back as integers from SQLite and as booleans from
    /// PostgreSQL.
    pub fn boolean(
        &self,
        idx: usize,
        table: &'static str,
        column: &'static str,
    ) -> Result<bool, StoreError> {
        match self.value(idx, table, column)? {
            Value::Bool(v) => Ok(*v),
            Value::Integer(v) => Ok(*v != 0),
            other => Err(corrupt(table, column, "boolean", other)),
        }
    }
}

fn corrupt(table: &'static str, column: &'static str, expected: &str, got: &Value) -> StoreError {
    StoreError::CorruptRow {
        table,
        column,
        detail: format!("expected {expected}, got {got:?}"),
    }
}

/// Parse a JSON string column, returning CorruptRow on parse failure.
pub fn parse_json(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Escape LIKE special characters for safe pattern matching.
pub fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub(crate) fn row_from_sqlite(row: &rusqlite::Row<'_>, ncols: usize) -> Result<Row, StoreError> {
    use rusqlite::types::ValueRef;
    let mut values = Vec::with_capacity(ncols);
    for idx in 0..ncols {
        let value = match row.get_ref(idx)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Real(v) => Value::Real(v),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(_) => {
                return Err(StoreError::Database(format!(
                    "unexpected BLOB at column {idx}"
                )))
            }
        };
        values.push(value);
    }
    Ok(Row { values })
}

pub(crate) fn row_from_postgres(row: &postgres::Row) -> Result<Row, StoreError> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)?
                .map_or(Value::Null, Value::Bool)
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)?
                .map_or(Value::Null, Value::Integer)
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)?
                .map_or(Value::Null, |v| Value::Integer(i64::from(v)))
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)?
                .map_or(Value::Null, |v| Value::Integer(i64::from(v)))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx)?
                .map_or(Value::Null, Value::Real)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(idx)?
                .map_or(Value::Null, |v| Value::Real(f64::from(v)))
        } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR {
            row.try_get::<_, Option<String>>(idx)?
                .map_or(Value::Null, Value::Text)
        } else {
            return Err(StoreError::Database(format!(
                "unsupported column type {ty} at column {idx}"
            )));
        };
        values.push(value);
    }
    Ok(Row { values })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: Vec<Value>) -> Row {
        Row { values }
    }

    #[test]
    fn typed_accessors() {
        let r = row(vec![
            Value::Integer(7),
            Value::Text("hello".into()),
            Value::Null,
            Value::Bool(true),
        ]);
        assert_eq!(r.integer(0, "t", "a").unwrap(), 7);
        assert_eq!(r.text(1, "t", "b").unwrap(), "hello");
        assert_eq!(r.opt_text(2, "t", "c").unwrap(), None);
        assert!(r.boolean(3, "t", "d").unwrap());
    }

    #[test]
    fn boolean_accepts_sqlite_integers() {
        let r = row(vec![Value::Integer(1), Value::Integer(0)]);
        assert!(r.boolean(0, "t", "a").unwrap());
        assert!(!r.boolean(1, "t", "b").unwrap());
    }

    #[test]
    fn type_mismatch_is_corrupt_row() {
        let r = row(vec![Value::Text("seven".into())]);
        let err = r.integer(0, "media", "id").unwrap_err();
        assert!(matches!(
            err,
            StoreError::CorruptRow {
                table: "media",
                column: "id",
                ..
            }
        ));
    }

    #[test]
    fn out_of_range_index_is_corrupt_row() {
        let r = row(vec![]);
        assert!(r.integer(3, "t", "x").is_err());
    }

    #[test]
    fn option_conversions() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some(3i64)), Value::Integer(3));
        assert_eq!(Value::from("abc"), Value::Text("abc".into()));
    }

    #[test]
    fn escape_like_special_chars() {
        assert_eq!(escape_like("hello"), "hello");
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("foo_bar"), "foo\\_bar");
        assert_eq!(escape_like("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn parse_json_failure() {
        let result = parse_json("not valid json", "schedules", "args");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow {
                table: "schedules",
                column: "args",
                ..
            })
        ));
    }
}
