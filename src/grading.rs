use serde::{Deserialize, Serialize};

/// Percentage breakpoints, highest first. Anything below the last band is an F.
const LETTER_BANDS: [(f64, &str); 12] = [
    (97.0, "A+"),
    (93.0, "A"),
    (90.0, "A-"),
    (87.0, "B+"),
    (83.0, "B"),
    (80.0, "B-"),
    (77.0, "C+"),
    (73.0, "C"),
    (70.0, "C-"),
    (67.0, "D+"),
    (63.0, "D"),
    (60.0, "D-"),
];

const GRADE_POINTS: [(&str, f64); 13] = [
    ("A+", 4.0),
    ("A", 4.0),
    ("A-", 3.7),
    ("B+", 3.3),
    ("B", 3.0),
    ("B-", 2.7),
    ("C+", 2.3),
    ("C", 2.0),
    ("C-", 1.7),
    ("D+", 1.3),
    ("D", 1.0),
    ("D-", 0.7),
    ("F", 0.0),
];

pub fn letter_grade(percentage: f64) -> &'static str {
    for (min, letter) in LETTER_BANDS {
        if percentage >= min {
            return letter;
        }
    }
    "F"
}

#[derive(Debug, Clone, PartialEq)]
pub enum GradePoints {
    Known(f64),
    Unknown(String),
}

pub fn grade_points(letter: &str) -> GradePoints {
    let t = letter.trim().to_ascii_uppercase();
    GRADE_POINTS
        .iter()
        .find(|(l, _)| *l == t)
        .map(|(_, p)| GradePoints::Known(*p))
        .unwrap_or_else(|| GradePoints::Unknown(letter.to_string()))
}

/// What to do when a letter grade has no grade-point value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownLetterPolicy {
    #[default]
    Zero,
    Reject,
}

impl UnknownLetterPolicy {
    /// `Err` carries the offending letter.
    pub fn resolve(self, points: GradePoints) -> Result<f64, String> {
        match points {
            GradePoints::Known(p) => Ok(p),
            GradePoints::Unknown(letter) => match self {
                UnknownLetterPolicy::Zero => {
                    tracing::warn!(letter = %letter, "unknown letter grade, using 0.0 grade points");
                    Ok(0.0)
                }
                UnknownLetterPolicy::Reject => Err(letter),
            },
        }
    }
}

pub fn round_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
