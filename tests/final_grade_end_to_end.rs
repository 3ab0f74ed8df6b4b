use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

fn create_course(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    code: &str,
    credits: f64,
    academic_year: &str,
    semester: &str,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        &format!("course-{}-{}", code, semester),
        "courses.create",
        json!({
            "code": code,
            "name": format!("{} course", code),
            "credits": credits,
            "instructor": "Dr. Rivera",
            "academicYear": academic_year,
            "semester": semester,
        }),
    );
    str_field(&res, "courseId")
}

fn create_assignment(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    course_id: &str,
    category: &str,
    title: &str,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        &format!("asg-{}", title),
        "assignments.create",
        json!({
            "courseId": course_id,
            "title": title,
            "type": category,
            "maxPoints": 100.0,
        }),
    );
    str_field(&res, "assignmentId")
}

fn publish_score(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_id: &str,
    assignment_id: &str,
    points: f64,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        &format!("grade-{}-{}", assignment_id, points),
        "grades.upsert",
        json!({
            "studentId": student_id,
            "assignmentId": assignment_id,
            "pointsEarned": points,
            "status": "published",
        }),
    );
    str_field(&res["grade"], "id")
}

fn final_grade(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student_id: &str,
    course_id: &str,
) -> serde_json::Value {
    let res = request_ok(
        stdin,
        reader,
        id,
        "calc.finalGrade",
        json!({ "studentId": student_id, "courseId": course_id }),
    );
    res["finalGrade"].clone()
}

#[test]
fn drop_lowest_and_weights_produce_documented_example() {
    let workspace = tempfile::tempdir().expect("temp dir");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );

    let course_id = create_course(&mut stdin, &mut reader, "CS101", 3.0, "2025-2026", "Fall");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "cats",
        "categories.set",
        json!({
            "courseId": course_id,
            "categories": [
                { "name": "Assignments", "type": "assignment", "weight": 40, "dropLowest": 1 },
                { "name": "Exams", "type": "exam", "weight": 60, "dropLowest": 0 }
            ]
        }),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "stu",
        "students.create",
        json!({ "firstName": "Ada", "lastName": "Byron" }),
    );
    let student_id = str_field(&student, "studentId");

    for (title, points) in [("hw1", 60.0), ("hw2", 70.0), ("hw3", 100.0)] {
        let a = create_assignment(&mut stdin, &mut reader, &course_id, "assignment", title);
        publish_score(&mut stdin, &mut reader, &student_id, &a, points);
    }
    for (title, points) in [("midterm", 80.0), ("final", 90.0)] {
        let a = create_assignment(&mut stdin, &mut reader, &course_id, "exam", title);
        publish_score(&mut stdin, &mut reader, &student_id, &a, points);
    }

    let fg = final_grade(&mut stdin, &mut reader, "fg", &student_id, &course_id);
    let pct = fg["finalPercentage"].as_f64().expect("finalPercentage");
    assert!((pct - 85.0).abs() < 1e-9, "got {}", pct);
    assert_eq!(fg["letterGrade"], "B");

    let cats = fg["categories"].as_array().expect("categories");
    assert_eq!(cats.len(), 2);
    assert_eq!(cats[0]["type"], "assignment");
    assert_eq!(cats[0]["count"], 2);
    assert!((cats[0]["average"].as_f64().unwrap() - 85.0).abs() < 1e-9);
    assert!((cats[1]["average"].as_f64().unwrap() - 85.0).abs() < 1e-9);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn drafts_are_ignored_and_missing_categories_renormalize() {
    let workspace = tempfile::tempdir().expect("temp dir");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.path().to_string_lossy() }),
    );

    let course_id = create_course(&mut stdin, &mut reader, "BIO200", 4.0, "2025-2026", "Fall");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "cats",
        "categories.set",
        json!({
            "courseId": course_id,
            "categories": [
                { "name": "Labs", "type": "lab", "weight": 60 },
                { "name": "Project", "type": "project", "weight": 40 }
            ]
        }),
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "stu",
        "students.create",
        json!({ "firstName": "Grace", "lastName": "Hopper" }),
    );
    let student_id = str_field(&student, "studentId");

    let empty = final_grade(&mut stdin, &mut reader, "fg0", &student_id, &course_id);
    assert_eq!(empty["finalPercentage"], 0.0);
    assert_eq!(empty["letterGrade"], "F");

    let lab = create_assignment(&mut stdin, &mut reader, &course_id, "lab", "lab1");
    publish_score(&mut stdin, &mut reader, &student_id, &lab, 92.0);

    // Draft project grade: must not count.
    let proj = create_assignment(&mut stdin, &mut reader, &course_id, "project", "proj1");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "draft",
        "grades.upsert",
        json!({ "studentId": student_id, "assignmentId": proj, "pointsEarned": 10.0 }),
    );

    let fg = final_grade(&mut stdin, &mut reader, "fg1", &student_id, &course_id);
    assert!((fg["finalPercentage"].as_f64().unwrap() - 92.0).abs() < 1e-9);
    assert_eq!(fg["letterGrade"], "A-");
    assert_eq!(fg["categories"].as_array().map(|a| a.len()), Some(1));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "pub",
        "grades.publish",
        json!({ "courseId": course_id }),
    );
    let fg = final_grade(&mut stdin, &mut reader, "fg2", &student_id, &course_id);
    // (92 * 60 + 10 * 40) / 100
    assert!((fg["finalPercentage"].as_f64().unwrap() - 59.2).abs() < 1e-9);
    assert_eq!(fg["letterGrade"], "F");

    let e = request(
        &mut stdin,
        &mut reader,
        "missing",
        "calc.finalGrade",
        json!({ "studentId": student_id, "courseId": "nope" }),
    );
    assert_eq!(e["error"]["code"], "not_found");

    drop(stdin);
    let _ = child.wait();
}
