//! Synchronous engine operations.
//!
//! Everything here runs on the engine's own thread, inside
//! `tokio_rusqlite::Connection::call`, one task at a time.

use std::path::Path;

use rusqlite::{Connection, DatabaseName};
use smallvec::SmallVec;

use super::params::Binding;
use super::types::{Columns, Row, Value};

/// Outcome of `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunResult {
    /// Rows changed by the most recent INSERT/UPDATE/DELETE
    pub changes: u64,
    /// Rowid of the most recent successful INSERT
    pub last_id: i64,
}

/// How many rows a step-through collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Collect {
    /// Step once, keep nothing.
    Nothing,
    /// Step once, keep the row if there is one.
    First,
    /// Step to exhaustion.
    All,
}

/// Rows produced by one execution, plus write metadata.
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub rows: Vec<Row>,
    pub run: RunResult,
}

/// Column names of a statement, without executing it.
pub(crate) fn columns(conn: &Connection, sql: &str) -> rusqlite::Result<Columns> {
    let stmt = conn.prepare_cached(sql)?;
    let columns: Columns = stmt.column_names().into_iter().map(String::from).collect();
    Ok(columns)
}

/// Prepare (cached), bind, step, and reset.
///
/// The cached statement is reset when it returns to the cache, so the cursor
/// never outlives one call.
pub(crate) fn execute(
    conn: &Connection,
    sql: &str,
    binding: Option<&Binding>,
    collect: Collect,
) -> rusqlite::Result<Outcome> {
    let mut stmt = conn.prepare_cached(sql)?;
    if let Some(binding) = binding {
        binding.apply(&mut stmt)?;
    }

    let columns: Columns = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows_data = Vec::new();
    {
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            if collect == Collect::Nothing {
                break;
            }
            let mut values: SmallVec<[Value; 16]> = SmallVec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(row.get_ref(i)?.into());
            }
            rows_data.push(Row::new(columns.clone(), values));
            if collect == Collect::First {
                break;
            }
        }
    }

    Ok(Outcome {
        rows: rows_data,
        run: write_metadata(conn),
    })
}

/// Execute semicolon-separated statements with no binding.
pub(crate) fn execute_batch(conn: &Connection, sql: &str) -> rusqlite::Result<()> {
    conn.execute_batch(sql)
}

/// Drop the cached compiled form of `sql`, leaving other cached statements alone.
pub(crate) fn evict(conn: &Connection, sql: &str) -> rusqlite::Result<()> {
    // Taking it out of the cache and discarding finalizes it
    conn.prepare_cached(sql)?.discard();
    Ok(())
}

fn write_metadata(conn: &Connection) -> RunResult {
    RunResult {
        changes: conn.changes(),
        last_id: conn.last_insert_rowid(),
    }
}

/// Replace the engine's contents with the snapshot at `path`.
pub(crate) fn load_snapshot(conn: &mut Connection, path: &Path) -> rusqlite::Result<()> {
    conn.restore(DatabaseName::Main, path, None::<fn(rusqlite::backup::Progress)>)
}

/// Write the engine's complete state as a snapshot at `path`.
pub(crate) fn store_snapshot(conn: &Connection, path: &Path) -> rusqlite::Result<()> {
    conn.backup(DatabaseName::Main, path, None)
}

/// Stop the engine from accepting writes.
pub(crate) fn set_query_only(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA query_only = ON;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        conn
    }

    #[test]
    fn test_execute_records_metadata() {
        let conn = conn();
        let binding = Binding::Positional(vec![Value::Text("a".to_string())]);
        let outcome = execute(
            &conn,
            "INSERT INTO t (name) VALUES (?)",
            Some(&binding),
            Collect::Nothing,
        )
        .unwrap();
        assert_eq!(outcome.run, RunResult { changes: 1, last_id: 1 });
        assert!(outcome.rows.is_empty());
    }

    #[test]
    fn test_collect_modes() {
        let conn = conn();
        conn.execute_batch("INSERT INTO t (name) VALUES ('a'), ('b'), ('c')")
            .unwrap();

        let all = execute(&conn, "SELECT name FROM t ORDER BY id", None, Collect::All).unwrap();
        assert_eq!(all.rows.len(), 3);

        let first = execute(&conn, "SELECT name FROM t ORDER BY id", None, Collect::First).unwrap();
        assert_eq!(first.rows.len(), 1);
        assert_eq!(first.rows[0].get("name"), Some(&Value::Text("a".to_string())));

        // Reused from the cache with a fresh cursor
        let again = execute(&conn, "SELECT name FROM t ORDER BY id", None, Collect::All).unwrap();
        assert_eq!(again.rows.len(), 3);
    }

    #[test]
    fn test_columns_without_executing() {
        let conn = conn();
        let cols = columns(&conn, "SELECT id, name FROM t").unwrap();
        assert_eq!(&cols[..], &["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn test_evict_then_reuse() {
        let conn = conn();
        let sql = "SELECT count(*) AS n FROM t";
        execute(&conn, sql, None, Collect::First).unwrap();
        evict(&conn, sql).unwrap();

        let outcome = execute(&conn, sql, None, Collect::First).unwrap();
        assert_eq!(outcome.rows[0].get("n"), Some(&Value::Integer(0)));
    }

    #[test]
    fn test_query_only() {
        let conn = conn();
        set_query_only(&conn).unwrap();
        assert!(conn.execute_batch("INSERT INTO t (name) VALUES ('x')").is_err());
        assert!(execute(&conn, "SELECT * FROM t", None, Collect::All).is_ok());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.db");

        let conn = conn();
        conn.execute_batch("INSERT INTO t (name) VALUES ('kept')").unwrap();
        store_snapshot(&conn, &path).unwrap();

        let mut restored = Connection::open_in_memory().unwrap();
        load_snapshot(&mut restored, &path).unwrap();
        let outcome = execute(&restored, "SELECT name FROM t", None, Collect::All).unwrap();
        assert_eq!(outcome.rows[0].get("name"), Some(&Value::Text("kept".to_string())));
    }
}
