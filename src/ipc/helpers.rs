use crate::ipc::error::{calc_err, err};
use crate::ipc::types::{AppState, Request};
use crate::students::{self, StudentRef};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        Some(_) => Err(err(&req.id, "bad_params", format!("{} must not be empty", key), None)),
        None => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => match v.as_str() {
            Some(s) => Ok(Some(s.trim().to_string()).filter(|s| !s.is_empty())),
            None => Err(err(
                &req.id,
                "bad_params",
                format!("{} must be a string or null", key),
                None,
            )),
        },
    }
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing numeric {}", key), None))
}

/// Present-but-not-a-number is an error, not a default.
pub fn optional_f64(req: &Request, key: &str) -> Result<Option<f64>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a number", key),
                Some(json!({ "key": key, "value": v })),
            )
        }),
    }
}

pub fn require_course(conn: &Connection, req: &Request) -> Result<String, serde_json::Value> {
    let course_id = required_str(req, "courseId")?;
    let found = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional();
    match found {
        Ok(Some(_)) => Ok(course_id),
        Ok(None) => Err(err(
            &req.id,
            "not_found",
            "course not found",
            Some(json!({ "courseId": course_id })),
        )),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

/// Every handler taking `studentId` goes through here, so a user id or email works too.
pub fn resolve_student(conn: &Connection, req: &Request) -> Result<StudentRef, serde_json::Value> {
    let any_id = required_str(req, "studentId")?;
    students::resolve_student(conn, &any_id).map_err(|e| calc_err(&req.id, e))
}
