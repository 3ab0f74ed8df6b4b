use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::{db_conn, required_str, resolve_student};
use crate::ipc::types::{AppState, Request};
use crate::transcript;
use serde_json::json;

fn handle_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student = match resolve_student(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester = match required_str(req, "semester") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match transcript::generate_transcript(
        conn,
        &state.config,
        &student.student_id,
        &academic_year,
        &semester,
    ) {
        Ok(t) => ok(&req.id, json!({ "transcript": t })),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_mark_official(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let transcript_id = match required_str(req, "transcriptId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match transcript::mark_official(conn, &transcript_id) {
        Ok(t) => ok(&req.id, json!({ "transcript": t })),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let transcript_id = match required_str(req, "transcriptId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match transcript::load_transcript(conn, &transcript_id) {
        Ok(Some(t)) => ok(&req.id, json!({ "transcript": t })),
        Ok(None) => err(
            &req.id,
            "not_found",
            "transcript not found",
            Some(json!({ "transcriptId": transcript_id })),
        ),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student = match resolve_student(conn, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    match transcript::list_transcripts(conn, &student.student_id) {
        Ok(rows) => ok(
            &req.id,
            json!({ "studentId": student.student_id, "transcripts": rows }),
        ),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_verify(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let code = match required_str(req, "verificationCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match transcript::verify(conn, &code) {
        Ok(v) => ok(&req.id, json!(v)),
        Err(e) => calc_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "transcripts.generate" => Some(handle_generate(state, req)),
        "transcripts.markOfficial" => Some(handle_mark_official(state, req)),
        "transcripts.get" => Some(handle_get(state, req)),
        "transcripts.list" => Some(handle_list(state, req)),
        "transcripts.verify" => Some(handle_verify(state, req)),
        _ => None,
    }
}
