use crate::calc::{self, CalcError};
use crate::config::{CumulativeScope, WorkspaceConfig};
use crate::grading::{self, round_2_decimals};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const DEANS_LIST: &str = "Dean's List";
const DEANS_LIST_MIN_GPA: f64 = 3.8;
// Credit-weighted sums can land one ULP under an exact threshold (3.3 and 0.7 over 6 credits).
const GPA_EPSILON: f64 = 1e-9;

fn at_least(gpa: f64, threshold: f64) -> bool {
    gpa + GPA_EPSILON >= threshold
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcademicStanding {
    Good,
    Warning,
    Probation,
    Suspension,
}

impl AcademicStanding {
    pub fn from_gpa(gpa: f64) -> Self {
        if at_least(gpa, 2.0) {
            AcademicStanding::Good
        } else if at_least(gpa, 1.5) {
            AcademicStanding::Warning
        } else if at_least(gpa, 1.0) {
            AcademicStanding::Probation
        } else {
            AcademicStanding::Suspension
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AcademicStanding::Good => "Good Standing",
            AcademicStanding::Warning => "Academic Warning",
            AcademicStanding::Probation => "Academic Probation",
            AcademicStanding::Suspension => "Academic Suspension",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseFinalGrade {
    /// Display value, 2 decimals.
    pub percentage: f64,
    /// The value `letter_grade` was derived from.
    pub unrounded_percentage: f64,
    pub letter_grade: String,
    pub grade_points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptCourse {
    pub course_id: String,
    pub course_code: String,
    pub course_name: String,
    pub instructor: Option<String>,
    pub credits: f64,
    /// Absent when none of the course's categories has a published grade.
    pub final_grade: Option<CourseFinalGrade>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Honor {
    #[serde(rename = "type")]
    pub kind: String,
    pub academic_year: String,
    pub semester: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub id: String,
    pub student_id: String,
    pub academic_year: String,
    pub semester: String,
    pub courses: Vec<TranscriptCourse>,
    #[serde(rename = "semesterGPA")]
    pub semester_gpa: f64,
    #[serde(rename = "cumulativeGPA")]
    pub cumulative_gpa: f64,
    pub total_credits: f64,
    pub total_grade_points: f64,
    pub academic_standing: String,
    pub honors: Vec<Honor>,
    pub verification_code: String,
    pub is_official: bool,
    pub digital_signature: Option<String>,
    pub generated_at: String,
    pub official_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpaTotals {
    pub gpa: f64,
    pub total_credits: f64,
    pub total_grade_points: f64,
}

pub fn semester_totals(courses: &[TranscriptCourse]) -> GpaTotals {
    let mut total_credits = 0.0_f64;
    let mut total_grade_points = 0.0_f64;
    for c in courses {
        let Some(fg) = &c.final_grade else {
            continue;
        };
        total_credits += c.credits;
        total_grade_points += fg.grade_points * c.credits;
    }
    GpaTotals {
        gpa: if total_credits > 0.0 {
            total_grade_points / total_credits
        } else {
            0.0
        },
        total_credits,
        total_grade_points,
    }
}

pub fn honors_for(gpa: f64, academic_year: &str, semester: &str) -> Vec<Honor> {
    if at_least(gpa, DEANS_LIST_MIN_GPA) {
        vec![Honor {
            kind: DEANS_LIST.to_string(),
            academic_year: academic_year.to_string(),
            semester: semester.to_string(),
        }]
    } else {
        Vec::new()
    }
}

pub fn signature(transcript_id: &str, verification_code: &str, official_at: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(transcript_id.as_bytes());
    hasher.update(b":");
    hasher.update(verification_code.as_bytes());
    hasher.update(b":");
    hasher.update(official_at.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn new_verification_code(len: usize) -> String {
    let hex = Uuid::new_v4().simple().to_string().to_ascii_uppercase();
    hex[..len.min(hex.len())].to_string()
}

struct ScopedCourse {
    id: String,
    code: String,
    name: String,
    credits: f64,
    instructor: Option<String>,
}

fn courses_in_scope(
    conn: &Connection,
    student_id: &str,
    academic_year: &str,
    semester: &str,
) -> Result<Vec<ScopedCourse>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT c.id, c.code, c.name, c.credits, c.instructor
             FROM courses c
             JOIN grades g ON g.course_id = c.id
             WHERE g.student_id = ? AND g.status = 'published'
               AND c.academic_year = ? AND c.semester = ?
             ORDER BY c.code, c.id",
        )
        .map_err(CalcError::db)?;
    stmt.query_map((student_id, academic_year, semester), |r| {
        Ok(ScopedCourse {
            id: r.get(0)?,
            code: r.get(1)?,
            name: r.get(2)?,
            credits: r.get(3)?,
            instructor: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(CalcError::db)
}

fn course_line(
    conn: &Connection,
    cfg: &WorkspaceConfig,
    student_id: &str,
    course: ScopedCourse,
) -> Result<Option<TranscriptCourse>, CalcError> {
    let graded = calc::load_category_rules(conn, &course.id).and_then(|rules| {
        let samples = calc::load_published_samples(conn, student_id, &course.id)?;
        Ok(calc::final_grade_from_samples(student_id, &course.id, &samples, &rules))
    });
    let fg = match graded {
        Ok(fg) => fg,
        Err(e) => {
            tracing::warn!(course_id = %course.id, error = %e.message, "skipping course in transcript");
            return Ok(None);
        }
    };

    let final_grade = if fg.categories.is_empty() {
        None
    } else {
        let points = cfg
            .grading
            .unknown_letter
            .resolve(grading::grade_points(&fg.letter_grade))
            .map_err(|letter| {
                CalcError::new("unknown_letter_grade", "letter grade has no grade-point value")
                    .with_details(json!({ "letterGrade": letter, "courseId": course.id }))
            })?;
        Some(CourseFinalGrade {
            percentage: round_2_decimals(fg.final_percentage),
            unrounded_percentage: fg.final_percentage,
            letter_grade: fg.letter_grade,
            grade_points: points,
        })
    };

    Ok(Some(TranscriptCourse {
        course_id: course.id,
        course_code: course.code,
        course_name: course.name,
        instructor: course.instructor,
        credits: course.credits,
        final_grade,
    }))
}

pub fn build_courses(
    conn: &Connection,
    cfg: &WorkspaceConfig,
    student_id: &str,
    academic_year: &str,
    semester: &str,
) -> Result<Vec<TranscriptCourse>, CalcError> {
    let mut out = Vec::new();
    for course in courses_in_scope(conn, student_id, academic_year, semester)? {
        if let Some(line) = course_line(conn, cfg, student_id, course)? {
            out.push(line);
        }
    }
    Ok(out)
}

fn official_error(transcript_id: &str) -> CalcError {
    CalcError::new("transcript_official", "transcript is official and can no longer change")
        .with_details(json!({ "transcriptId": transcript_id }))
}

/// Upsert keyed on (student, year, semester). Id and verification code survive regeneration.
pub fn generate_transcript(
    conn: &Connection,
    cfg: &WorkspaceConfig,
    student_id: &str,
    academic_year: &str,
    semester: &str,
) -> Result<Transcript, CalcError> {
    let existing: Option<(String, bool)> = conn
        .query_row(
            "SELECT id, is_official FROM transcripts
             WHERE student_id = ? AND academic_year = ? AND semester = ?",
            (student_id, academic_year, semester),
            |r| Ok((r.get(0)?, r.get::<_, i64>(1)? != 0)),
        )
        .optional()
        .map_err(CalcError::db)?;
    if let Some((id, true)) = &existing {
        return Err(official_error(id));
    }

    let courses = build_courses(conn, cfg, student_id, academic_year, semester)?;
    let totals = semester_totals(&courses);
    let standing = AcademicStanding::from_gpa(totals.gpa);
    let honors = honors_for(totals.gpa, academic_year, semester);
    let courses_json = serde_json::to_string(&courses)
        .map_err(|e| CalcError::new("serialize_failed", e.to_string()))?;
    let honors_json = serde_json::to_string(&honors)
        .map_err(|e| CalcError::new("serialize_failed", e.to_string()))?;
    let generated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;

    let new_id = Uuid::new_v4().to_string();
    let code = new_verification_code(cfg.transcripts.verification_code_len);
    let changed = tx
        .execute(
            "INSERT INTO transcripts(
               id, student_id, academic_year, semester, courses_json, semester_gpa,
               cumulative_gpa, total_credits, total_grade_points, academic_standing,
               honors_json, verification_code, is_official, generated_at)
             VALUES(?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?, 0, ?)
             ON CONFLICT(student_id, academic_year, semester) DO UPDATE SET
               courses_json = excluded.courses_json,
               semester_gpa = excluded.semester_gpa,
               total_credits = excluded.total_credits,
               total_grade_points = excluded.total_grade_points,
               academic_standing = excluded.academic_standing,
               honors_json = excluded.honors_json,
               generated_at = excluded.generated_at
             WHERE transcripts.is_official = 0",
            rusqlite::params![
                new_id,
                student_id,
                academic_year,
                semester,
                courses_json,
                totals.gpa,
                totals.total_credits,
                totals.total_grade_points,
                standing.as_str(),
                honors_json,
                code,
                generated_at,
            ],
        )
        .map_err(|e| CalcError::new("db_insert_failed", e.to_string()))?;
    if changed == 0 {
        // Marked official between the read above and this write.
        let _ = tx.rollback();
        return Err(official_error(
            existing.as_ref().map(|(id, _)| id.as_str()).unwrap_or_default(),
        ));
    }

    let id: String = tx
        .query_row(
            "SELECT id FROM transcripts WHERE student_id = ? AND academic_year = ? AND semester = ?",
            (student_id, academic_year, semester),
            |r| r.get(0),
        )
        .map_err(CalcError::db)?;

    let cumulative_sql = match cfg.transcripts.cumulative_scope {
        CumulativeScope::All => {
            "SELECT COALESCE(SUM(total_grade_points), 0), COALESCE(SUM(total_credits), 0)
             FROM transcripts WHERE student_id = ?1"
        }
        CumulativeScope::Official => {
            "SELECT COALESCE(SUM(total_grade_points), 0), COALESCE(SUM(total_credits), 0)
             FROM transcripts WHERE student_id = ?1 AND (is_official = 1 OR id = ?2)"
        }
    };
    let (cum_points, cum_credits): (f64, f64) = match cfg.transcripts.cumulative_scope {
        CumulativeScope::All => tx.query_row(cumulative_sql, [student_id], |r| {
            Ok((r.get(0)?, r.get(1)?))
        }),
        CumulativeScope::Official => tx.query_row(cumulative_sql, (student_id, &id), |r| {
            Ok((r.get(0)?, r.get(1)?))
        }),
    }
    .map_err(CalcError::db)?;
    let cumulative_gpa = if cum_credits > 0.0 {
        cum_points / cum_credits
    } else {
        0.0
    };
    tx.execute(
        "UPDATE transcripts SET cumulative_gpa = ? WHERE id = ?",
        (cumulative_gpa, &id),
    )
    .map_err(|e| CalcError::new("db_update_failed", e.to_string()))?;

    tx.commit()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;

    tracing::info!(
        transcript_id = %id,
        student_id = %student_id,
        academic_year = %academic_year,
        semester = %semester,
        courses = courses.len(),
        semester_gpa = totals.gpa,
        "transcript generated"
    );

    load_transcript(conn, &id)?.ok_or_else(|| CalcError::new("not_found", "transcript not found"))
}

/// One-way. Stamps the signature; grades are not recomputed.
pub fn mark_official(conn: &Connection, transcript_id: &str) -> Result<Transcript, CalcError> {
    let Some(t) = load_transcript(conn, transcript_id)? else {
        return Err(CalcError::new("not_found", "transcript not found")
            .with_details(json!({ "transcriptId": transcript_id })));
    };
    if t.is_official {
        return Err(official_error(transcript_id));
    }

    let official_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let sig = signature(&t.id, &t.verification_code, &official_at);
    let changed = conn
        .execute(
            "UPDATE transcripts
             SET is_official = 1, official_at = ?, digital_signature = ?
             WHERE id = ? AND is_official = 0",
            (&official_at, &sig, transcript_id),
        )
        .map_err(|e| CalcError::new("db_update_failed", e.to_string()))?;
    if changed == 0 {
        return Err(official_error(transcript_id));
    }

    tracing::info!(transcript_id = %transcript_id, "transcript marked official");
    load_transcript(conn, transcript_id)?
        .ok_or_else(|| CalcError::new("not_found", "transcript not found"))
}

const TRANSCRIPT_COLUMNS: &str = "id, student_id, academic_year, semester, courses_json,
    semester_gpa, cumulative_gpa, total_credits, total_grade_points, academic_standing,
    honors_json, verification_code, is_official, digital_signature, generated_at, official_at";

struct TranscriptRow {
    t: Transcript,
    courses_json: String,
    honors_json: String,
}

fn read_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<TranscriptRow> {
    Ok(TranscriptRow {
        t: Transcript {
            id: r.get(0)?,
            student_id: r.get(1)?,
            academic_year: r.get(2)?,
            semester: r.get(3)?,
            courses: Vec::new(),
            semester_gpa: r.get(5)?,
            cumulative_gpa: r.get(6)?,
            total_credits: r.get(7)?,
            total_grade_points: r.get(8)?,
            academic_standing: r.get(9)?,
            honors: Vec::new(),
            verification_code: r.get(11)?,
            is_official: r.get::<_, i64>(12)? != 0,
            digital_signature: r.get(13)?,
            generated_at: r.get(14)?,
            official_at: r.get(15)?,
        },
        courses_json: r.get(4)?,
        honors_json: r.get(10)?,
    })
}

fn finish_row(row: TranscriptRow) -> Result<Transcript, CalcError> {
    let mut t = row.t;
    t.courses = serde_json::from_str(&row.courses_json).map_err(|e| {
        CalcError::new("corrupt_document", e.to_string()).with_details(json!({ "transcriptId": t.id }))
    })?;
    t.honors = serde_json::from_str(&row.honors_json).map_err(|e| {
        CalcError::new("corrupt_document", e.to_string()).with_details(json!({ "transcriptId": t.id }))
    })?;
    Ok(t)
}

fn load_one(conn: &Connection, where_clause: &str, key: &str) -> Result<Option<Transcript>, CalcError> {
    let sql = format!("SELECT {} FROM transcripts WHERE {}", TRANSCRIPT_COLUMNS, where_clause);
    let row = conn
        .query_row(&sql, [key], read_row)
        .optional()
        .map_err(CalcError::db)?;
    row.map(finish_row).transpose()
}

pub fn load_transcript(conn: &Connection, transcript_id: &str) -> Result<Option<Transcript>, CalcError> {
    load_one(conn, "id = ?", transcript_id)
}

pub fn load_transcript_by_code(conn: &Connection, code: &str) -> Result<Option<Transcript>, CalcError> {
    load_one(conn, "verification_code = ?", code.trim())
}

pub fn list_transcripts(conn: &Connection, student_id: &str) -> Result<Vec<Transcript>, CalcError> {
    let sql = format!(
        "SELECT {} FROM transcripts WHERE student_id = ? ORDER BY academic_year, semester",
        TRANSCRIPT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(CalcError::db)?;
    let rows = stmt
        .query_map([student_id], read_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)?;
    rows.into_iter().map(finish_row).collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub valid: bool,
    pub is_official: bool,
    pub signature_valid: bool,
    pub transcript: Option<serde_json::Value>,
}

pub fn verify(conn: &Connection, code: &str) -> Result<Verification, CalcError> {
    let Some(t) = load_transcript_by_code(conn, code)? else {
        return Ok(Verification {
            valid: false,
            is_official: false,
            signature_valid: false,
            transcript: None,
        });
    };
    let signature_valid = match (&t.digital_signature, &t.official_at) {
        (Some(sig), Some(at)) if t.is_official => *sig == signature(&t.id, &t.verification_code, at),
        _ => false,
    };
    Ok(Verification {
        valid: true,
        is_official: t.is_official,
        signature_valid,
        transcript: Some(json!({
            "id": t.id,
            "studentId": t.student_id,
            "academicYear": t.academic_year,
            "semester": t.semester,
            "semesterGPA": t.semester_gpa,
            "cumulativeGPA": t.cumulative_gpa,
            "totalCredits": t.total_credits,
            "academicStanding": t.academic_standing,
            "officialAt": t.official_at,
        })),
    })
}
