use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde_json::Value;

use crate::auth::{self, AuthError, Session};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

pub fn require_db<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Opens the workspace connection and checks the request's session token.
pub fn require_session<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<(&'a Connection, Session), Value> {
    let conn = require_db(state, req)?;
    let token = req.session.as_ref().map(|c| c.token.as_str());
    match auth::resolve_session(conn, token, Utc::now()) {
        Ok(session) => Ok((conn, session)),
        Err(AuthError::Db(e)) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
        Err(e) => {
            tracing::warn!(method = %req.method, reason = %e, "session rejected");
            Err(err(&req.id, "unauthorized", e.to_string(), None))
        }
    }
}

pub fn required_str(req: &Request, key: &str) -> Result<String, Value> {
    match req.params.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::String(_)) => Err(err(
            &req.id,
            "bad_params",
            format!("{key} must not be empty"),
            None,
        )),
        Some(v) if !v.is_null() => Err(err(
            &req.id,
            "bad_params",
            format!("{key} must be a string"),
            None,
        )),
        _ => Err(err(&req.id, "bad_params", format!("missing {key}"), None)),
    }
}

/// Missing, null and blank strings all read as `None`.
pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let t = s.trim();
            Ok((!t.is_empty()).then(|| t.to_string()))
        }
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{key} must be a string or null"),
            None,
        )),
    }
}

pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{key} must be an integer"),
                None,
            )
        }),
    }
}

pub fn optional_date(req: &Request, key: &str) -> Result<Option<String>, Value> {
    let Some(raw) = optional_str(req, key)? else {
        return Ok(None);
    };
    match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        Ok(d) => Ok(Some(d.format("%Y-%m-%d").to_string())),
        Err(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{key} must be a YYYY-MM-DD date"),
            None,
        )),
    }
}

/// Accepts JSON numbers and numeric strings (`"20"`).
pub fn number_like(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn exists(conn: &Connection, sql: &str, param: &str) -> rusqlite::Result<bool> {
    use rusqlite::OptionalExtension;
    let hit: Option<i64> = conn.query_row(sql, [param], |r| r.get(0)).optional()?;
    Ok(hit.is_some())
}
