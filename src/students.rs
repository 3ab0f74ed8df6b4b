use crate::calc::CalcError;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchedBy {
    StudentId,
    UserId,
    Email,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRef {
    pub student_id: String,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub display_name: String,
    pub matched_by: MatchedBy,
}

fn lookup(
    conn: &Connection,
    where_clause: &str,
    key: &str,
    matched_by: MatchedBy,
) -> Result<Option<StudentRef>, CalcError> {
    let sql = format!(
        "SELECT id, user_id, email, last_name, first_name FROM students WHERE {}",
        where_clause
    );
    conn.query_row(&sql, [key], |r| {
        let last: String = r.get(3)?;
        let first: String = r.get(4)?;
        Ok(StudentRef {
            student_id: r.get(0)?,
            user_id: r.get(1)?,
            email: r.get(2)?,
            display_name: format!("{}, {}", last, first),
            matched_by,
        })
    })
    .optional()
    .map_err(CalcError::db)
}

/// Precedence: student id, then user id, then email (case-insensitive).
pub fn resolve_student(conn: &Connection, any_id: &str) -> Result<StudentRef, CalcError> {
    let key = any_id.trim();
    if key.is_empty() {
        return Err(CalcError::new("bad_params", "student identifier must not be empty"));
    }

    if let Some(s) = lookup(conn, "id = ?", key, MatchedBy::StudentId)? {
        return Ok(s);
    }
    if let Some(s) = lookup(conn, "user_id = ?", key, MatchedBy::UserId)? {
        return Ok(s);
    }
    if key.contains('@') {
        if let Some(s) = lookup(conn, "LOWER(email) = LOWER(?)", key, MatchedBy::Email)? {
            return Ok(s);
        }
    }

    Err(CalcError::new("not_found", "student not found").with_details(json!({ "studentId": key })))
}
