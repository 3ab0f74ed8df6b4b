use crate::calc;
use crate::grading::{self, GradePoints};
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::{db_conn, required_f64, required_str, resolve_student};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_final_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    match calc::compute_final_grade(conn, &student.student_id, &course_id) {
        Ok(fg) => ok(&req.id, json!({ "finalGrade": fg })),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_letter_grade(req: &Request) -> serde_json::Value {
    let percentage = match required_f64(req, "percentage") {
        Ok(v) => v,
        Err(e) => return e,
    };
    ok(
        &req.id,
        json!({ "percentage": percentage, "letterGrade": grading::letter_grade(percentage) }),
    )
}

fn handle_grade_points(state: &mut AppState, req: &Request) -> serde_json::Value {
    let letter = match req.params.get("letterGrade").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing letterGrade", None),
    };
    let raw = grading::grade_points(&letter);
    let known = matches!(raw, GradePoints::Known(_));
    match state.config.grading.unknown_letter.resolve(raw) {
        Ok(points) => ok(
            &req.id,
            json!({ "letterGrade": letter, "gradePoints": points, "known": known }),
        ),
        Err(letter) => err(
            &req.id,
            "unknown_letter_grade",
            "letter grade has no grade-point value",
            Some(json!({ "letterGrade": letter })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calc.finalGrade" => Some(handle_final_grade(state, req)),
        "grading.letterGrade" => Some(handle_letter_grade(req)),
        "grading.gradePoints" => Some(handle_grade_points(state, req)),
        _ => None,
    }
}
