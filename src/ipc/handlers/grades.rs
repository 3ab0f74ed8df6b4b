use crate::grades::{self, GradeStatus, GradeWrite, LatePenalty};
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::{
    db_conn, optional_str, require_course, required_f64, required_str, resolve_student,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn parse_status(req: &Request) -> Result<Option<GradeStatus>, serde_json::Value> {
    let Some(raw) = optional_str(req, "status")? else {
        return Ok(None);
    };
    GradeStatus::parse(&raw).map(Some).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "status must be one of: draft, published, returned",
            Some(json!({ "status": raw })),
        )
    })
}

fn parse_late_penalty(req: &Request) -> Result<Option<LatePenalty>, serde_json::Value> {
    match req.params.get("latePenalty") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => serde_json::from_value(v.clone()).map(Some).map_err(|e| {
            err(&req.id, "bad_params", format!("invalid latePenalty: {}", e), None)
        }),
    }
}

fn handle_grades_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student = match resolve_student(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let fields = (|| {
        Ok::<_, serde_json::Value>((
            required_str(req, "assignmentId")?,
            required_f64(req, "pointsEarned")?,
            parse_status(req)?,
            optional_str(req, "feedback")?,
            parse_late_penalty(req)?,
            optional_str(req, "reason")?,
        ))
    })();
    let (assignment_id, points, status, feedback, late_penalty, reason) = match fields {
        Ok(v) => v,
        Err(e) => return e,
    };

    let write = GradeWrite {
        student_id: student.student_id,
        assignment_id,
        points,
        status,
        feedback,
        late_penalty,
        reason,
    };
    match grades::upsert_grade(conn, &write) {
        Ok(g) => ok(&req.id, json!({ "grade": g })),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_grades_publish(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let ids: Vec<String> = if let Some(raw) = req.params.get("gradeIds") {
        match serde_json::from_value(raw.clone()) {
            Ok(v) => v,
            Err(_) => {
                return err(&req.id, "bad_params", "gradeIds must be an array of strings", None)
            }
        }
    } else if req.params.get("courseId").is_some() {
        let course_id = match require_course(conn, req) {
            Ok(v) => v,
            Err(e) => return e,
        };
        match grades::grade_ids_for_course(conn, &course_id) {
            Ok(v) => v,
            Err(e) => return calc_err(&req.id, e),
        }
    } else {
        return err(&req.id, "bad_params", "missing gradeIds or courseId", None);
    };

    match grades::set_status(conn, &ids, GradeStatus::Published) {
        Ok(changed) => ok(&req.id, json!({ "published": changed })),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student = match resolve_student(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let include_all = req
        .params
        .get("includeAll")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    match grades::list_grades(conn, &student.student_id, &course_id, include_all) {
        Ok(rows) => ok(&req.id, json!({ "grades": rows })),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_grades_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let grade_id = match required_str(req, "gradeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match grades::load_grade(conn, &grade_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                "grade not found",
                Some(json!({ "gradeId": grade_id })),
            )
        }
        Err(e) => return calc_err(&req.id, e),
    }
    match grades::history(conn, &grade_id) {
        Ok(revisions) => ok(&req.id, json!({ "gradeId": grade_id, "revisions": revisions })),
        Err(e) => calc_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.upsert" => Some(handle_grades_upsert(state, req)),
        "grades.publish" => Some(handle_grades_publish(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.history" => Some(handle_grades_history(state, req)),
        _ => None,
    }
}
