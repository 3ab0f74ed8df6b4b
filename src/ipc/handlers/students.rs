use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str, resolve_student};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let fields = (|| {
        Ok::<_, serde_json::Value>((
            required_str(req, "firstName")?,
            required_str(req, "lastName")?,
            optional_str(req, "userId")?,
            optional_str(req, "email")?,
            optional_str(req, "studentNumber")?,
        ))
    })();
    let (first_name, last_name, user_id, email, student_number) = match fields {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Some(e) = email.as_deref() {
        if !e.contains('@') {
            return err(&req.id, "bad_params", "email must contain '@'", Some(json!({ "email": e })));
        }
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, user_id, email, first_name, last_name, student_number)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&student_id, &user_id, &email, &first_name, &last_name, &student_number),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match resolve_student(conn, req) {
        Ok(s) => ok(&req.id, json!({ "student": s })),
        Err(e) => e,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.resolve" => Some(handle_students_resolve(state, req)),
        _ => None,
    }
}
