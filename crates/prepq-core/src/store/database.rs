//! SQLite executor for prepared queries.
//!
//! Runs the `Prepared` commands produced by the substitution cache and
//! materializes result rows as ordered column -> [`Value`] maps.

use std::path::Path;

use indexmap::IndexMap;
use parking_lot::Mutex;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::Connection;

use crate::errors::{PrepqError, PrepqResult};
use crate::models::{canonical_naive, canonical_tz, Value};
use crate::query::normalize::Prepared;

/// One result row, columns in select order.
pub type Row = IndexMap<String, Value>;

// ---------------------------------------------------------------------------
// Value binding
// ---------------------------------------------------------------------------

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let out = match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Owned(SqlValue::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Timestamp(dt) => ToSqlOutput::Owned(SqlValue::Text(canonical_naive(dt))),
            Value::TimestampTz(dt) => ToSqlOutput::Owned(SqlValue::Text(canonical_tz(dt))),
            Value::List(_) | Value::Model(_) => {
                return Err(rusqlite::Error::ToSqlConversionFailure(
                    format!("{} values cannot be bound, normalize first", self.type_name()).into(),
                ))
            }
        };
        Ok(out)
    }
}

/// Convert the current row into a [`Row`] using the statement's column names.
fn row_to_values(row: &rusqlite::Row<'_>, col_names: &[String]) -> PrepqResult<Row> {
    let mut out = Row::with_capacity(col_names.len());
    for (i, name) in col_names.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Int(v),
            ValueRef::Real(v) => Value::Real(v),
            ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(_) => {
                return Err(PrepqError::Executor(format!(
                    "column {name} holds a blob"
                )))
            }
        };
        out.insert(name.clone(), value);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// A single SQLite connection shared behind a lock.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> PrepqResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(PrepqError::Io)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> PrepqResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run one or more parameterless statements (DDL, fixtures).
    pub fn execute_batch(&self, sql: &str) -> PrepqResult<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    /// Run a write statement; returns the number of changed rows.
    pub fn execute(&self, query: &Prepared) -> PrepqResult<usize> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &query.command,
            rusqlite::params_from_iter(query.params.iter()),
        )?;
        Ok(changed)
    }

    /// Run a query and collect every row.
    pub fn fetch_all(&self, query: &Prepared) -> PrepqResult<Vec<Row>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&query.command)?;
        let col_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let mut rows = stmt.query(rusqlite::params_from_iter(query.params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_values(row, &col_names)?);
        }
        Ok(out)
    }

    /// First row of the result, if any.
    pub fn fetch_one(&self, query: &Prepared) -> PrepqResult<Option<Row>> {
        Ok(self.fetch_all(query)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubstituteConfig;
    use crate::lazy::context::{empty_list_to_null, ValueContext};
    use crate::models::arguments;
    use crate::query::builder::{BuildArgs, BuiltQuery, FnBuilder, SelectBuilder};
    use crate::query::engine::SubstituteCache;
    use chrono::{NaiveDate, NaiveDateTime};

    const TABLE: &str = "testapp_testmodel";

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 6, day)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap()
    }

    /// Three rows: int 1 on day 1, ints 2 and 3 on day 2.
    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch(&format!(
            "CREATE TABLE {TABLE} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                int_field INTEGER NOT NULL DEFAULT 0,
                dt_field TEXT NOT NULL
            );"
        ))
        .unwrap();
        for (n, day) in [(1, 1), (2, 2), (3, 2)] {
            let insert = Prepared::new(
                format!("INSERT INTO {TABLE}(int_field, dt_field) VALUES (?, ?)"),
                vec![Value::Int(n), Value::from(ts(day))],
            );
            assert_eq!(db.execute(&insert).unwrap(), 1);
        }
        db
    }

    fn filter_test_model(table: &str, args: &BuildArgs) -> PrepqResult<BuiltQuery> {
        let mut select = SelectBuilder::new(table, &["id", "int_field", "dt_field"]);
        if let Some(ints) = args.get("integers") {
            if !ints.is_null()? {
                select = select.filter_in("int_field", ints)?;
            }
        }
        if let Some(dt) = args.get("dt") {
            if !dt.is_null()? {
                select = select.filter_eq("dt_field", dt);
            }
        }
        Ok(select.order_by("id").build())
    }

    type BuildFn = fn(&str, &BuildArgs) -> PrepqResult<BuiltQuery>;

    fn cached(config: SubstituteConfig) -> SubstituteCache<FnBuilder<str, BuildFn>> {
        SubstituteCache::with_config(
            FnBuilder::new("filter_test_model", filter_test_model as BuildFn),
            config,
        )
        .with_preprocessor(empty_list_to_null(&["integers"]))
    }

    fn int_fields(rows: &[Row]) -> Vec<Value> {
        rows.iter().map(|row| row["int_field"].clone()).collect()
    }

    #[test]
    fn cached_query_returns_first_row() {
        let db = setup_db();
        let engine = cached(SubstituteConfig::default());
        let first = engine
            .call(TABLE, arguments([("integers", Value::from(vec![1]))]))
            .unwrap();
        let row = db.fetch_one(first.query()).unwrap().unwrap();
        assert_eq!(row["int_field"], Value::Int(1));
        assert_eq!(engine.cache().len(), 1);

        let second = engine
            .call(TABLE, arguments([("integers", Value::from(vec![1]))]))
            .unwrap();
        assert!(second.is_hit());
        assert_eq!(db.fetch_one(second.query()).unwrap().unwrap()["id"], Value::Int(1));
    }

    #[test]
    fn hit_rows_match_direct_rows() {
        let db = setup_db();
        let engine = cached(SubstituteConfig::production());
        let direct = cached(SubstituteConfig::disabled());

        engine
            .call(TABLE, arguments([("integers", Value::from(vec![1])), ("dt", Value::from(ts(1)))]))
            .unwrap();

        let args = arguments([("integers", Value::from(vec![1, 2, 3])), ("dt", Value::from(ts(2)))]);
        let hit = engine.call(TABLE, args.clone()).unwrap();
        assert!(hit.is_hit());
        let expected = direct.call(TABLE, args).unwrap();

        let got = db.fetch_all(hit.query()).unwrap();
        assert_eq!(got, db.fetch_all(expected.query()).unwrap());
        assert_eq!(int_fields(&got), vec![Value::Int(2), Value::Int(3)]);
        assert_eq!(got[0]["dt_field"], Value::Text("2023-06-02 08:30:00".into()));
    }

    #[test]
    fn empty_list_means_no_constraint_after_preprocessing() {
        let db = setup_db();
        let engine = cached(SubstituteConfig::default());
        let outcome = engine
            .call(TABLE, arguments([("integers", Value::List(vec![]))]))
            .unwrap();
        assert_eq!(db.fetch_all(outcome.query()).unwrap().len(), 3);
    }

    #[test]
    fn lists_cannot_be_bound() {
        let db = setup_db();
        let query = Prepared::new(
            format!("SELECT id FROM {TABLE} WHERE int_field IN (?)"),
            vec![Value::from(vec![1, 2])],
        );
        assert!(matches!(db.fetch_all(&query), Err(PrepqError::Sqlite(_))));
    }

    #[test]
    fn scoped_caller_context_wraps_engine_calls() {
        let db = setup_db();
        let engine = SubstituteCache::with_config(
            FnBuilder::new("filter_test_model", filter_test_model as BuildFn),
            SubstituteConfig::default(),
        );
        let pre = [empty_list_to_null(&["integers"])];
        let row = ValueContext::scoped(&pre, arguments([("integers", Value::List(vec![]))]), |args| -> PrepqResult<Option<Row>> {
            let outcome = engine.call(TABLE, args.clone())?;
            db.fetch_one(outcome.query())
        })
        .unwrap()
        .unwrap();
        assert_eq!(row["id"], Value::Int(1));
    }

    #[test]
    fn blobs_are_rejected() {
        let db = setup_db();
        let query = Prepared::new("SELECT x'00ff' AS b", vec![]);
        assert!(matches!(db.fetch_all(&query), Err(PrepqError::Executor(_))));
    }

    #[test]
    fn open_on_disk_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");
        let db = Database::open(&path).unwrap();
        db.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();
        db.execute(&Prepared::new(
            "INSERT INTO t(name) VALUES (?)",
            vec![Value::from("alice")],
        ))
        .unwrap();
        drop(db);

        let reopened = Database::open(&path).unwrap();
        let rows = reopened
            .fetch_all(&Prepared::new("SELECT id, name FROM t", vec![]))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], Value::from("alice"));
    }

    #[test]
    fn open_under_a_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let err = Database::open(blocker.join("nested").join("cache.db")).err().unwrap();
        assert!(matches!(err, PrepqError::Io(_)));
    }
}
