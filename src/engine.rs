//! SQLite execution helpers shared by the socket handler and the one-shot
//! HTTP path: JSON argument binding, row materialization, statement
//! validation.

use base64::{engine::general_purpose, Engine as _};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Statement, ToSql};
use serde_json::{Map, Number, Value};

/// Convert one JSON argument into a SQLite value.
///
/// Booleans bind as 0/1 integers, the way the embedded bindings the wire
/// format originated from treat them. Arrays and objects bind as their JSON
/// text.
pub fn json_to_sqlite(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Convert one SQLite column value into JSON. Blobs become base64 strings;
/// non-finite reals have no JSON representation and become null.
pub fn sqlite_to_json(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Number(i.into()),
        SqlValue::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(general_purpose::STANDARD.encode(b)),
    }
}

fn bind_args(args: &[Value]) -> Vec<SqlValue> {
    args.iter().map(json_to_sqlite).collect()
}

/// Run `stmt` with positional `args` and materialize every row as a JSON
/// object keyed by column name. Positional values bind by 1-based index,
/// which SQLite also honors for named placeholders such as `:id`.
fn collect_rows(stmt: &mut Statement<'_>, args: &[Value]) -> rusqlite::Result<Vec<Value>> {
    let params = bind_args(args);
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|v| v as &dyn ToSql).collect();

    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();

    let mut rows = stmt.query(&param_refs[..])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut object = Map::with_capacity(column_names.len());
        for (idx, name) in column_names.iter().enumerate() {
            let value: SqlValue = row.get(idx)?;
            object.insert(name.clone(), sqlite_to_json(value));
        }
        out.push(Value::Object(object));
    }
    Ok(out)
}

/// Compile `sql` without executing it. Used by `prepare` so that invalid SQL
/// fails at handle allocation time; the compiled statement stays in the
/// connection's cache for the executions that follow.
pub fn validate(conn: &Connection, sql: &str) -> rusqlite::Result<()> {
    let _ = conn.prepare_cached(sql)?;
    Ok(())
}

/// One-shot execution: plain `prepare`, dropped after use, so transient
/// statements never occupy the cache that backs live handles.
pub fn query_all(conn: &Connection, sql: &str, args: &[Value]) -> rusqlite::Result<Vec<Value>> {
    let mut stmt = conn.prepare(sql)?;
    collect_rows(&mut stmt, args)
}

/// Execute a prepared statement through the connection's statement cache and
/// return every row.
pub fn query_cached_all(
    conn: &Connection,
    sql: &str,
    args: &[Value],
) -> rusqlite::Result<Vec<Value>> {
    let mut stmt = conn.prepare_cached(sql)?;
    collect_rows(&mut stmt, args)
}

/// Execute a prepared statement and return the first row, if any.
pub fn query_cached_get(
    conn: &Connection,
    sql: &str,
    args: &[Value],
) -> rusqlite::Result<Option<Value>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = collect_rows(&mut stmt, args)?;
    if rows.is_empty() {
        Ok(None)
    } else {
        Ok(Some(rows.remove(0)))
    }
}
