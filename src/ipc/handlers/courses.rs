use crate::calc;
use crate::categories::{self, CategoryConfig, CategoryInput};
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::{
    db_conn, optional_f64, optional_str, require_course, required_f64, required_str,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let fields = (|| {
        Ok::<_, serde_json::Value>((
            required_str(req, "code")?,
            required_str(req, "name")?,
            required_str(req, "academicYear")?,
            required_str(req, "semester")?,
            optional_str(req, "instructor")?,
        ))
    })();
    let (code, name, academic_year, semester, instructor) = match fields {
        Ok(v) => v,
        Err(e) => return e,
    };
    let credits = match optional_f64(req, "credits") {
        Ok(v) => v.unwrap_or(0.0),
        Err(e) => return e,
    };
    if !credits.is_finite() || credits < 0.0 {
        return err(
            &req.id,
            "bad_params",
            "credits must be a non-negative number",
            Some(json!({ "credits": credits })),
        );
    }

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, code, name, credits, instructor, academic_year, semester)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&course_id, &code, &name, credits, &instructor, &academic_year, &semester),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(&req.id, json!({ "courseId": course_id, "code": code, "name": name }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           c.id, c.code, c.name, c.credits, c.instructor, c.academic_year, c.semester,
           (SELECT COUNT(*) FROM assignments a WHERE a.course_id = c.id) AS assignment_count,
           (SELECT COALESCE(SUM(weight), 0) FROM grade_categories gc WHERE gc.course_id = c.id) AS total_weight
         FROM courses c
         ORDER BY c.academic_year, c.semester, c.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "code": row.get::<_, String>(1)?,
                "name": row.get::<_, String>(2)?,
                "credits": row.get::<_, f64>(3)?,
                "instructor": row.get::<_, Option<String>>(4)?,
                "academicYear": row.get::<_, String>(5)?,
                "semester": row.get::<_, String>(6)?,
                "assignmentCount": row.get::<_, i64>(7)?,
                "categoryWeightTotal": row.get::<_, f64>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_assignments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match require_course(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let fields = (|| {
        Ok::<_, serde_json::Value>((
            required_str(req, "title")?,
            required_str(req, "type")?,
            required_f64(req, "maxPoints")?,
            optional_str(req, "dueDate")?,
        ))
    })();
    let (title, category_type, max_points, due_date) = match fields {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !max_points.is_finite() || max_points <= 0.0 {
        return err(
            &req.id,
            "bad_params",
            "maxPoints must be > 0",
            Some(json!({ "maxPoints": max_points })),
        );
    }

    let assignment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO assignments(id, course_id, title, category_type, max_points, due_date)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&assignment_id, &course_id, &title, &category_type, max_points, &due_date),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "assignments" })),
        );
    }

    ok(&req.id, json!({ "assignmentId": assignment_id }))
}

fn handle_categories_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match require_course(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("categories") else {
        return err(&req.id, "bad_params", "missing categories", None);
    };
    let inputs: Vec<CategoryInput> = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("invalid categories: {}", e), None),
    };
    let config = match CategoryConfig::new(inputs) {
        Ok(c) => c,
        Err(e) => return calc_err(&req.id, e),
    };
    if let Err(e) = categories::replace_categories(conn, &course_id, &config) {
        return calc_err(&req.id, e);
    }

    ok(
        &req.id,
        json!({
            "courseId": course_id,
            "categories": config.rules(),
            "totalWeight": config.total_weight(),
        }),
    )
}

fn handle_categories_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match require_course(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match calc::load_category_rules(conn, &course_id) {
        Ok(rules) => ok(&req.id, json!({ "courseId": course_id, "categories": rules })),
        Err(e) => calc_err(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "assignments.create" => Some(handle_assignments_create(state, req)),
        "categories.set" => Some(handle_categories_set(state, req)),
        "categories.list" => Some(handle_categories_list(state, req)),
        _ => None,
    }
}
