use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "gradebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            credits REAL NOT NULL DEFAULT 0,
            instructor TEXT,
            academic_year TEXT NOT NULL,
            semester TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_term ON courses(academic_year, semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            user_id TEXT UNIQUE,
            email TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            student_number TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_students_email ON students(LOWER(email))",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            title TEXT NOT NULL,
            category_type TEXT NOT NULL,
            max_points REAL NOT NULL,
            due_date TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_course ON assignments(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_categories(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            name TEXT NOT NULL,
            type_tag TEXT NOT NULL,
            weight REAL NOT NULL,
            drop_lowest INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(course_id, type_tag)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_categories_course ON grade_categories(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            assignment_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            raw_points REAL NOT NULL,
            points_earned REAL NOT NULL,
            max_points REAL NOT NULL,
            percentage REAL NOT NULL,
            letter_grade TEXT NOT NULL,
            status TEXT NOT NULL,
            late_penalty_applied INTEGER NOT NULL DEFAULT 0,
            late_penalty_percentage REAL NOT NULL DEFAULT 0,
            feedback TEXT,
            graded_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(assignment_id) REFERENCES assignments(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(student_id, assignment_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student_course ON grades(student_id, course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_revisions(
            id TEXT PRIMARY KEY,
            grade_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            points_earned REAL NOT NULL,
            percentage REAL NOT NULL,
            letter_grade TEXT NOT NULL,
            feedback TEXT,
            recorded_at TEXT NOT NULL,
            reason TEXT,
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            UNIQUE(grade_id, seq)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transcripts(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            semester TEXT NOT NULL,
            courses_json TEXT NOT NULL,
            semester_gpa REAL NOT NULL,
            cumulative_gpa REAL NOT NULL,
            total_credits REAL NOT NULL,
            total_grade_points REAL NOT NULL,
            academic_standing TEXT NOT NULL,
            honors_json TEXT NOT NULL,
            verification_code TEXT NOT NULL UNIQUE,
            is_official INTEGER NOT NULL DEFAULT 0,
            digital_signature TEXT,
            generated_at TEXT NOT NULL,
            official_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, academic_year, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transcripts_student ON transcripts(student_id)",
        [],
    )?;

    Ok(conn)
}
