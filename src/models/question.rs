// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

/// One selectable option of a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: i64,
    pub content: String,
}

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,

    /// Owning test.
    pub test_id: i64,

    /// Section this question belongs to, when the test is split into sections.
    pub section_id: Option<i64>,

    /// Ordering within the test.
    pub position: i32,

    /// The text content of the question.
    pub content: String,

    /// Ordered options. Stored as a JSON array in the database.
    #[sqlx(json)]
    pub options: Vec<QuestionOption>,

    pub correct_option_id: i64,

    /// Points awarded for a correct answer.
    pub marks: f64,

    /// Suggested time budget shown to the student.
    pub expected_time_seconds: Option<i32>,

    /// Explanation of the correct answer, revealed only after submission.
    pub explanation: Option<String>,

    pub active: bool,
}

/// DTO for sending question to client (excludes answer and explanation).
#[derive(Debug, Clone, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub section_id: Option<i64>,
    pub content: String,
    pub options: Vec<QuestionOption>,
    pub marks: f64,
    pub expected_time_seconds: Option<i32>,
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            section_id: q.section_id,
            content: q.content.clone(),
            options: q.options.clone(),
            marks: q.marks,
            expected_time_seconds: q.expected_time_seconds,
        }
    }
}
