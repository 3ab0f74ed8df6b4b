pub mod calc;
pub mod core;
pub mod courses;
pub mod grades;
pub mod students;
pub mod transcripts;
