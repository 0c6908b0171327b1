//! The single durable record of how far this database has been migrated.
//!
//! Both operations run on the caller's connection, so they commit or roll
//! back with whatever transaction is currently open.

use crate::connect::Connection;
use crate::error::StoreError;
use crate::value::Value;

/// Read the recorded schema version, creating the record at 0 if absent.
pub fn current(conn: &mut Connection) -> Result<i64, StoreError> {
    let row = conn.query_opt("SELECT version FROM schema_version LIMIT 1", &[])?;
    match row {
        Some(row) => row.integer(0, "schema_version", "version"),
        None => {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES ($1)",
                &[Value::Integer(0)],
            )?;
            Ok(0)
        }
    }
}

/// Record a new version, update-or-insert.
pub fn record(conn: &mut Connection, version: i64) -> Result<(), StoreError> {
    let updated = conn.execute(
        "UPDATE schema_version SET version = $1",
        &[Value::Integer(version)],
    )?;
    if updated == 0 {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES ($1)",
            &[Value::Integer(version)],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::open_sqlite_in_memory;
    use crate::schema;

    fn test_conn() -> Connection {
        let mut conn = open_sqlite_in_memory().unwrap();
        schema::apply(&mut conn).unwrap();
        conn
    }

    #[test]
    fn defaults_to_zero_and_creates_record() {
        let mut conn = test_conn();
        assert_eq!(current(&mut conn).unwrap(), 0);
        // The record now exists; reading again must not insert a second row.
        assert_eq!(current(&mut conn).unwrap(), 0);
        let rows = conn
            .query("SELECT version FROM schema_version", &[])
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn record_then_read() {
        let mut conn = test_conn();
        record(&mut conn, 7).unwrap();
        assert_eq!(current(&mut conn).unwrap(), 7);
        record(&mut conn, 9).unwrap();
        assert_eq!(current(&mut conn).unwrap(), 9);
    }

    #[test]
    fn record_rolls_back_with_enclosing_transaction() {
        let mut conn = test_conn();
        record(&mut conn, 3).unwrap();
        conn.begin().unwrap();
        record(&mut conn, 4).unwrap();
        conn.rollback().unwrap();
        assert_eq!(current(&mut conn).unwrap(), 3);
    }
}
