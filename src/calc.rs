use crate::grading;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

/// One published grade, reduced to what the aggregator reads.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeSample {
    pub category: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRule {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub weight: f64,
    pub drop_lowest: u32,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAggregate {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub name: String,
    pub average: f64,
    pub weight: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalGrade {
    pub student_id: String,
    pub course_id: String,
    pub categories: Vec<CategoryAggregate>,
    pub final_percentage: f64,
    pub letter_grade: String,
}

fn same_category(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// `None` when no sample belongs to the category: it stays out of the weight sum.
/// Dropping every sample leaves an average of 0.
pub fn aggregate_category(samples: &[GradeSample], rule: &CategoryRule) -> Option<CategoryAggregate> {
    let mut values: Vec<f64> = samples
        .iter()
        .filter(|s| same_category(&s.category, &rule.type_tag))
        .map(|s| s.percentage)
        .collect();
    if values.is_empty() {
        return None;
    }

    values.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    let keep = values.len().saturating_sub(rule.drop_lowest as usize);
    values.truncate(keep);

    let average = if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / (values.len() as f64)
    };

    Some(CategoryAggregate {
        type_tag: rule.type_tag.clone(),
        name: rule.name.clone(),
        average,
        weight: rule.weight,
        count: values.len(),
    })
}

/// Renormalizes against the weight actually represented, so categories summing to 60
/// still produce a 0-100 result.
pub fn combine_categories(aggregates: &[CategoryAggregate]) -> f64 {
    let mut weighted = 0.0_f64;
    let mut total_weight = 0.0_f64;
    for a in aggregates {
        weighted += a.average * a.weight / 100.0;
        total_weight += a.weight;
    }
    if total_weight > 0.0 {
        weighted / total_weight * 100.0
    } else {
        0.0
    }
}

pub fn final_grade_from_samples(
    student_id: &str,
    course_id: &str,
    samples: &[GradeSample],
    rules: &[CategoryRule],
) -> FinalGrade {
    let categories: Vec<CategoryAggregate> = rules
        .iter()
        .filter_map(|r| aggregate_category(samples, r))
        .collect();
    let final_percentage = combine_categories(&categories);
    FinalGrade {
        student_id: student_id.to_string(),
        course_id: course_id.to_string(),
        categories,
        final_percentage,
        letter_grade: grading::letter_grade(final_percentage).to_string(),
    }
}

pub fn load_category_rules(conn: &Connection, course_id: &str) -> Result<Vec<CategoryRule>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT name, type_tag, weight, drop_lowest, sort_order
             FROM grade_categories
             WHERE course_id = ?
             ORDER BY sort_order, type_tag",
        )
        .map_err(CalcError::db)?;
    stmt.query_map([course_id], |r| {
        Ok(CategoryRule {
            name: r.get(0)?,
            type_tag: r.get(1)?,
            weight: r.get(2)?,
            drop_lowest: r.get::<_, i64>(3)?.max(0) as u32,
            sort_order: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(CalcError::db)
}

pub fn load_published_samples(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> Result<Vec<GradeSample>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT a.category_type, g.percentage
             FROM grades g
             JOIN assignments a ON a.id = g.assignment_id
             WHERE g.student_id = ? AND g.course_id = ? AND g.status = 'published'
             ORDER BY a.due_date, a.id",
        )
        .map_err(CalcError::db)?;
    stmt.query_map((student_id, course_id), |r| {
        Ok(GradeSample {
            category: r.get(0)?,
            percentage: r.get(1)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(CalcError::db)
}

pub fn compute_final_grade(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> Result<FinalGrade, CalcError> {
    let course: Option<String> = conn
        .query_row("SELECT id FROM courses WHERE id = ?", [course_id], |r| r.get(0))
        .optional()
        .map_err(CalcError::db)?;
    if course.is_none() {
        return Err(CalcError::new("not_found", "course not found")
            .with_details(serde_json::json!({ "courseId": course_id })));
    }

    let rules = load_category_rules(conn, course_id)?;
    let samples = load_published_samples(conn, student_id, course_id)?;
    Ok(final_grade_from_samples(student_id, course_id, &samples, &rules))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(category: &str, percentage: f64) -> GradeSample {
        GradeSample {
            category: category.to_string(),
            percentage,
        }
    }

    fn rule(type_tag: &str, weight: f64, drop_lowest: u32) -> CategoryRule {
        CategoryRule {
            name: type_tag.to_string(),
            type_tag: type_tag.to_string(),
            weight,
            drop_lowest,
            sort_order: 0,
        }
    }

    #[test]
    fn no_drop_is_plain_mean() {
        let samples = vec![sample("quiz", 50.0), sample("quiz", 70.0), sample("quiz", 90.0)];
        let agg = aggregate_category(&samples, &rule("quiz", 100.0, 0)).expect("aggregate");
        assert!((agg.average - 70.0).abs() < 1e-9);
        assert_eq!(agg.count, 3);
    }

    #[test]
    fn drops_lowest_values() {
        let samples = vec![sample("hw", 60.0), sample("hw", 100.0), sample("hw", 70.0)];
        let agg = aggregate_category(&samples, &rule("hw", 40.0, 1)).expect("aggregate");
        assert!((agg.average - 85.0).abs() < 1e-9);
        assert_eq!(agg.count, 2);
    }

    #[test]
    fn dropping_everything_yields_zero_not_absence() {
        let samples = vec![sample("hw", 95.0), sample("hw", 88.0)];
        for drop in [2, 3, 50] {
            let agg = aggregate_category(&samples, &rule("hw", 40.0, drop)).expect("aggregate");
            assert_eq!(agg.average, 0.0);
            assert_eq!(agg.count, 0);
        }
    }

    #[test]
    fn category_without_samples_is_absent() {
        let samples = vec![sample("exam", 80.0)];
        assert!(aggregate_category(&samples, &rule("project", 30.0, 0)).is_none());
    }

    #[test]
    fn category_match_ignores_case_and_padding() {
        let samples = vec![sample(" Exam", 80.0)];
        assert!(aggregate_category(&samples, &rule("exam ", 30.0, 0)).is_some());
    }

    #[test]
    fn end_to_end_example_is_a_b() {
        let samples = vec![
            sample("assignment", 60.0),
            sample("assignment", 70.0),
            sample("assignment", 100.0),
            sample("exam", 80.0),
            sample("exam", 90.0),
        ];
        let rules = vec![rule("assignment", 40.0, 1), rule("exam", 60.0, 0)];
        let fg = final_grade_from_samples("s", "c", &samples, &rules);
        assert!((fg.final_percentage - 85.0).abs() < 1e-9);
        assert_eq!(fg.letter_grade, "B");
    }

    #[test]
    fn uniform_weight_scaling_does_not_change_result() {
        let aggs = |w: [f64; 3]| {
            vec![
                CategoryAggregate { type_tag: "a".into(), name: "a".into(), average: 72.0, weight: w[0], count: 1 },
                CategoryAggregate { type_tag: "b".into(), name: "b".into(), average: 91.5, weight: w[1], count: 1 },
                CategoryAggregate { type_tag: "c".into(), name: "c".into(), average: 64.25, weight: w[2], count: 1 },
            ]
        };
        let full = combine_categories(&aggs([40.0, 40.0, 20.0]));
        let half = combine_categories(&aggs([20.0, 20.0, 10.0]));
        assert!((full - half).abs() < 1e-9);
    }

    #[test]
    fn partial_weight_is_renormalized() {
        let samples = vec![sample("exam", 90.0)];
        let rules = vec![rule("exam", 60.0, 0), rule("project", 40.0, 0)];
        let fg = final_grade_from_samples("s", "c", &samples, &rules);
        assert!((fg.final_percentage - 90.0).abs() < 1e-9);
        assert_eq!(fg.categories.len(), 1);
    }

    #[test]
    fn no_grades_anywhere_is_zero() {
        let fg = final_grade_from_samples("s", "c", &[], &[rule("exam", 100.0, 0)]);
        assert_eq!(fg.final_percentage, 0.0);
        assert_eq!(fg.letter_grade, "F");
        assert!(fg.categories.is_empty());
    }

    #[test]
    fn zero_weight_categories_contribute_nothing() {
        let samples = vec![sample("exam", 50.0), sample("bonus", 100.0)];
        let rules = vec![rule("exam", 100.0, 0), rule("bonus", 0.0, 0)];
        let fg = final_grade_from_samples("s", "c", &samples, &rules);
        assert!((fg.final_percentage - 50.0).abs() < 1e-9);
    }
}
