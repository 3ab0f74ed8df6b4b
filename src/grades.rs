use crate::calc::CalcError;
use crate::grading;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeStatus {
    Draft,
    Published,
    Returned,
}

impl GradeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GradeStatus::Draft => "draft",
            GradeStatus::Published => "published",
            GradeStatus::Returned => "returned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(GradeStatus::Draft),
            "published" => Some(GradeStatus::Published),
            "returned" => Some(GradeStatus::Returned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LatePenalty {
    pub applied: bool,
    pub percentage: f64,
}

impl LatePenalty {
    pub fn apply(&self, raw_points: f64) -> f64 {
        if self.applied {
            raw_points * (1.0 - self.percentage / 100.0)
        } else {
            raw_points
        }
    }
}

#[derive(Debug, Clone)]
pub struct GradeWrite {
    pub student_id: String,
    pub assignment_id: String,
    pub points: f64,
    pub status: Option<GradeStatus>,
    pub feedback: Option<String>,
    /// `None` keeps whatever penalty the existing entry carries.
    pub late_penalty: Option<LatePenalty>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    pub id: String,
    pub student_id: String,
    pub assignment_id: String,
    pub course_id: String,
    pub category: String,
    pub raw_points: f64,
    pub points_earned: f64,
    pub max_points: f64,
    pub percentage: f64,
    pub letter_grade: String,
    pub status: String,
    pub late_penalty: LatePenalty,
    pub feedback: Option<String>,
    pub graded_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRevision {
    pub seq: i64,
    pub points_earned: f64,
    pub percentage: f64,
    pub letter_grade: String,
    pub feedback: Option<String>,
    pub recorded_at: String,
    pub reason: Option<String>,
}

/// No clamping: a misreported maxPoints can push this past 100 or below 0.
pub fn percentage(points_earned: f64, max_points: f64) -> f64 {
    points_earned / max_points * 100.0
}

struct PriorGrade {
    id: String,
    points_earned: f64,
    percentage: f64,
    letter_grade: String,
    feedback: Option<String>,
    status: String,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Insert or update one (student, assignment) entry. An update appends the prior state
/// to the revision log first.
pub fn upsert_grade(conn: &Connection, w: &GradeWrite) -> Result<GradeEntry, CalcError> {
    if !w.points.is_finite() {
        return Err(CalcError::new("bad_params", "pointsEarned must be a finite number"));
    }
    let assignment: Option<(String, f64)> = conn
        .query_row(
            "SELECT course_id, max_points FROM assignments WHERE id = ?",
            [&w.assignment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(CalcError::db)?;
    let Some((course_id, max_points)) = assignment else {
        return Err(CalcError::new("not_found", "assignment not found")
            .with_details(json!({ "assignmentId": w.assignment_id })));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;

    let prior: Option<(PriorGrade, LatePenalty)> = tx
        .query_row(
            "SELECT id, points_earned, percentage, letter_grade, feedback, status,
                    late_penalty_applied, late_penalty_percentage
             FROM grades WHERE student_id = ? AND assignment_id = ?",
            (&w.student_id, &w.assignment_id),
            |r| {
                Ok((
                    PriorGrade {
                        id: r.get(0)?,
                        points_earned: r.get(1)?,
                        percentage: r.get(2)?,
                        letter_grade: r.get(3)?,
                        feedback: r.get(4)?,
                        status: r.get(5)?,
                    },
                    LatePenalty {
                        applied: r.get::<_, i64>(6)? != 0,
                        percentage: r.get(7)?,
                    },
                ))
            },
        )
        .optional()
        .map_err(CalcError::db)?;

    let late_penalty = w
        .late_penalty
        .or_else(|| prior.as_ref().map(|(_, lp)| *lp))
        .unwrap_or_default();
    if late_penalty.applied && !(0.0..=100.0).contains(&late_penalty.percentage) {
        return Err(CalcError::new("bad_params", "latePenalty.percentage must be between 0 and 100")
            .with_details(json!({ "percentage": late_penalty.percentage })));
    }
    let points_earned = late_penalty.apply(w.points);
    let pct = percentage(points_earned, max_points);
    let letter = grading::letter_grade(pct);
    let stamp = now();

    let grade_id = match prior.map(|(p, _)| p) {
        Some(PriorGrade {
            id,
            points_earned: prev_points,
            percentage: prev_pct,
            letter_grade: prev_letter,
            feedback: prev_feedback,
            status: prev_status,
        }) => {
            let seq: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(seq), 0) + 1 FROM grade_revisions WHERE grade_id = ?",
                    [&id],
                    |r| r.get(0),
                )
                .map_err(CalcError::db)?;
            tx.execute(
                "INSERT INTO grade_revisions(id, grade_id, seq, points_earned, percentage, letter_grade, feedback, recorded_at, reason)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    id,
                    seq,
                    prev_points,
                    prev_pct,
                    prev_letter,
                    prev_feedback,
                    stamp,
                    w.reason,
                ],
            )
            .map_err(|e| {
                CalcError::new("db_insert_failed", e.to_string())
                    .with_details(json!({ "table": "grade_revisions" }))
            })?;

            let status = w
                .status
                .map(|s| s.as_str().to_string())
                .unwrap_or(prev_status);
            let feedback = w.feedback.clone().or(prev_feedback);
            tx.execute(
                "UPDATE grades SET
                   raw_points = ?, points_earned = ?, max_points = ?, percentage = ?,
                   letter_grade = ?, status = ?, late_penalty_applied = ?,
                   late_penalty_percentage = ?, feedback = ?, updated_at = ?
                 WHERE id = ?",
                rusqlite::params![
                    w.points,
                    points_earned,
                    max_points,
                    pct,
                    letter,
                    status,
                    late_penalty.applied as i64,
                    late_penalty.percentage,
                    feedback,
                    stamp,
                    id,
                ],
            )
            .map_err(|e| CalcError::new("db_update_failed", e.to_string()))?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            let status = w.status.unwrap_or(GradeStatus::Draft);
            tx.execute(
                "INSERT INTO grades(id, student_id, assignment_id, course_id, raw_points, points_earned,
                   max_points, percentage, letter_grade, status, late_penalty_applied,
                   late_penalty_percentage, feedback, graded_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    id,
                    w.student_id,
                    w.assignment_id,
                    course_id,
                    w.points,
                    points_earned,
                    max_points,
                    pct,
                    letter,
                    status.as_str(),
                    late_penalty.applied as i64,
                    late_penalty.percentage,
                    w.feedback,
                    stamp,
                    stamp,
                ],
            )
            .map_err(|e| {
                CalcError::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "grades" }))
            })?;
            id
        }
    };

    tx.commit()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;

    load_grade(conn, &grade_id)?.ok_or_else(|| CalcError::new("not_found", "grade not found"))
}

const GRADE_COLUMNS: &str = "g.id, g.student_id, g.assignment_id, g.course_id, a.category_type,
    g.raw_points, g.points_earned, g.max_points, g.percentage, g.letter_grade, g.status,
    g.late_penalty_applied, g.late_penalty_percentage, g.feedback, g.graded_at, g.updated_at";

fn read_grade(r: &rusqlite::Row<'_>) -> rusqlite::Result<GradeEntry> {
    Ok(GradeEntry {
        id: r.get(0)?,
        student_id: r.get(1)?,
        assignment_id: r.get(2)?,
        course_id: r.get(3)?,
        category: r.get(4)?,
        raw_points: r.get(5)?,
        points_earned: r.get(6)?,
        max_points: r.get(7)?,
        percentage: r.get(8)?,
        letter_grade: r.get(9)?,
        status: r.get(10)?,
        late_penalty: LatePenalty {
            applied: r.get::<_, i64>(11)? != 0,
            percentage: r.get(12)?,
        },
        feedback: r.get(13)?,
        graded_at: r.get(14)?,
        updated_at: r.get(15)?,
    })
}

pub fn load_grade(conn: &Connection, grade_id: &str) -> Result<Option<GradeEntry>, CalcError> {
    let sql = format!(
        "SELECT {} FROM grades g JOIN assignments a ON a.id = g.assignment_id WHERE g.id = ?",
        GRADE_COLUMNS
    );
    conn.query_row(&sql, [grade_id], read_grade)
        .optional()
        .map_err(CalcError::db)
}

pub fn list_grades(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    include_unpublished: bool,
) -> Result<Vec<GradeEntry>, CalcError> {
    let sql = format!(
        "SELECT {} FROM grades g JOIN assignments a ON a.id = g.assignment_id
         WHERE g.student_id = ? AND g.course_id = ? AND (? OR g.status = 'published')
         ORDER BY a.due_date, a.id",
        GRADE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(CalcError::db)?;
    stmt.query_map((student_id, course_id, include_unpublished), read_grade)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CalcError::db)
}

/// Status changes are not grade changes and do not touch the revision log.
pub fn set_status(conn: &Connection, grade_ids: &[String], status: GradeStatus) -> Result<usize, CalcError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;
    let stamp = now();
    let mut changed = 0;
    for id in grade_ids {
        changed += tx
            .execute(
                "UPDATE grades SET status = ?, updated_at = ? WHERE id = ? AND status <> ?",
                (status.as_str(), &stamp, id, status.as_str()),
            )
            .map_err(|e| CalcError::new("db_update_failed", e.to_string()))?;
    }
    tx.commit()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;
    Ok(changed)
}

pub fn grade_ids_for_course(conn: &Connection, course_id: &str) -> Result<Vec<String>, CalcError> {
    let mut stmt = conn
        .prepare("SELECT id FROM grades WHERE course_id = ? ORDER BY id")
        .map_err(CalcError::db)?;
    stmt.query_map([course_id], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<String>, _>>())
        .map_err(CalcError::db)
}

pub fn history(conn: &Connection, grade_id: &str) -> Result<Vec<GradeRevision>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT seq, points_earned, percentage, letter_grade, feedback, recorded_at, reason
             FROM grade_revisions WHERE grade_id = ? ORDER BY seq",
        )
        .map_err(CalcError::db)?;
    stmt.query_map([grade_id], |r| {
        Ok(GradeRevision {
            seq: r.get(0)?,
            points_earned: r.get(1)?,
            percentage: r.get(2)?,
            letter_grade: r.get(3)?,
            feedback: r.get(4)?,
            recorded_at: r.get(5)?,
            reason: r.get(6)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(CalcError::db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_is_not_clamped() {
        assert!((percentage(45.0, 50.0) - 90.0).abs() < 1e-9);
        assert!((percentage(60.0, 50.0) - 120.0).abs() < 1e-9);
        assert!(percentage(-5.0, 50.0) < 0.0);
    }

    #[test]
    fn late_penalty_scales_points() {
        let p = LatePenalty { applied: true, percentage: 10.0 };
        assert!((p.apply(80.0) - 72.0).abs() < 1e-9);
        let off = LatePenalty { applied: false, percentage: 10.0 };
        assert_eq!(off.apply(80.0), 80.0);
    }

    #[test]
    fn status_parse() {
        assert_eq!(GradeStatus::parse(" Published "), Some(GradeStatus::Published));
        assert_eq!(GradeStatus::parse("returned"), Some(GradeStatus::Returned));
        assert_eq!(GradeStatus::parse("final"), None);
    }
}
