// src/models/attempt.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::question::{PublicQuestion, QuestionOption};

/// Lifecycle of an attempt. Both submitted states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    AutoSubmitted,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "IN_PROGRESS",
            AttemptStatus::Submitted => "SUBMITTED",
            AttemptStatus::AutoSubmitted => "AUTO_SUBMITTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::InProgress)
    }
}

impl TryFrom<String> for AttemptStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "IN_PROGRESS" => Ok(Self::InProgress),
            "SUBMITTED" => Ok(Self::Submitted),
            "AUTO_SUBMITTED" => Ok(Self::AutoSubmitted),
            other => Err(format!("unknown attempt status '{other}'")),
        }
    }
}

/// Per-question state inside an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: i64,
    /// `None` means unanswered.
    pub selected_option_id: Option<i64>,
    /// Only meaningful once the attempt is submitted.
    pub is_correct: bool,
    pub time_spent_seconds: i64,
    pub marked_for_review: bool,
}

impl AnswerRecord {
    pub fn new(question_id: i64) -> Self {
        Self {
            question_id,
            selected_option_id: None,
            is_correct: false,
            time_spent_seconds: 0,
            marked_for_review: false,
        }
    }
}

/// Where a section's countdown stands.
///
/// While in progress, wall-clock time is split into `banked_seconds` (closed run
/// windows) plus the open window starting at `running_since`. A paused section
/// has no open window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SectionTiming {
    NotStarted,
    InProgress {
        started_at: DateTime<Utc>,
        banked_seconds: i64,
        running_since: Option<DateTime<Utc>>,
    },
    Completed {
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub section_id: i64,
    pub time_spent_seconds: i64,
    #[serde(flatten)]
    pub timing: SectionTiming,
}

impl SectionRecord {
    pub fn not_started(section_id: i64) -> Self {
        Self {
            section_id,
            time_spent_seconds: 0,
            timing: SectionTiming::NotStarted,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self.timing, SectionTiming::InProgress { .. })
    }
}

/// Result of grading an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub total_score: f64,
    pub total_correct: i64,
    pub total_wrong: i64,
    pub total_unanswered: i64,
    pub total_time_seconds: i64,
}

/// One student's timed run through a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: i64,
    pub user_id: i64,
    pub category_id: i64,
    pub test_id: i64,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// `None` while explicitly paused.
    pub last_active_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub total_paused_seconds: i64,
    pub current_section_id: Option<i64>,
    /// Ordered as the sections are taken.
    pub sections: Vec<SectionRecord>,
    /// Ordered as the questions are presented.
    pub answers: Vec<AnswerRecord>,
    pub result: Option<ScoreSummary>,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
}

impl Attempt {
    pub fn is_paused(&self) -> bool {
        self.last_active_at.is_none()
    }

    pub fn answer(&self, question_id: i64) -> Option<&AnswerRecord> {
        self.answers.iter().find(|a| a.question_id == question_id)
    }

    pub fn section_mut(&mut self, section_id: i64) -> Option<&mut SectionRecord> {
        self.sections.iter_mut().find(|s| s.section_id == section_id)
    }

    pub fn current_section_mut(&mut self) -> Option<&mut SectionRecord> {
        let id = self.current_section_id?;
        self.section_mut(id)
    }

    pub fn question_ids(&self) -> Vec<i64> {
        self.answers.iter().map(|a| a.question_id).collect()
    }
}

/// DTO for starting (or resuming) an attempt.
#[derive(Debug, Deserialize, Validate)]
pub struct StartAttemptRequest {
    #[validate(range(min = 1))]
    pub test_id: i64,
    #[serde(default)]
    pub force_new: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAnswerRequest {
    pub selected_option_id: Option<i64>,
    #[serde(default)]
    pub marked_for_review: bool,
    #[serde(default)]
    #[validate(range(min = 0, max = 86_400, message = "time_increment must be between 0 and 86400 seconds"))]
    pub time_increment: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewFlagRequest {
    pub marked_for_review: bool,
    #[serde(default)]
    #[validate(range(min = 0, max = 86_400, message = "time_increment must be between 0 and 86400 seconds"))]
    pub time_increment: i64,
}

/// Time spent on the question the student was looking at when leaving a section or the test.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct TrailingTimeRequest {
    pub question_id: Option<i64>,
    #[validate(range(min = 0, max = 86_400, message = "time_increment must be between 0 and 86400 seconds"))]
    pub time_increment: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct SubmitAttemptRequest {
    pub reason: Option<String>,
    pub question_id: Option<i64>,
    #[validate(range(min = 0, max = 86_400, message = "time_increment must be between 0 and 86400 seconds"))]
    pub time_increment: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListAttemptsQuery {
    pub test_id: Option<i64>,
}

/// Returned when an attempt is started or resumed.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptSummary {
    pub attempt: Attempt,
    /// True when an existing in-progress attempt was returned instead of a new one.
    pub resumed: bool,
    pub duration_minutes: i32,
    pub questions: Vec<PublicQuestion>,
}

/// Live clock readings for an attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingSnapshot {
    pub elapsed_seconds: i64,
    pub remaining_seconds: i64,
    pub total_paused_seconds: i64,
    pub is_paused: bool,
}

/// Full state of an attempt as shown to its owner.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptView {
    pub attempt: Attempt,
    pub duration_minutes: i32,
    pub timing: TimingSnapshot,
    pub questions: Vec<PublicQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SectionSubmitResult {
    SectionSubmitted {
        completed_section_id: i64,
        time_spent_seconds: i64,
        next_section_id: i64,
    },
    TestCompleted {
        completed_section_id: i64,
        test_completed: bool,
        summary: ScoreSummary,
    },
}

/// Answer to a section-timer poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerStatus {
    pub status: AttemptStatus,
    pub section_id: Option<i64>,
    pub section_elapsed_seconds: i64,
    /// `None` when the active section has no own duration.
    pub section_remaining_seconds: Option<i64>,
    pub time_expired: bool,
    /// Set when this poll closed an expired section.
    pub section_result: Option<SectionSubmitResult>,
    pub attempt_timing: TimingSnapshot,
}

/// Post-submission review of one question.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionReview {
    pub question_id: i64,
    pub section_id: Option<i64>,
    pub content: String,
    pub options: Vec<QuestionOption>,
    pub selected_option_id: Option<i64>,
    pub correct_option_id: Option<i64>,
    pub is_correct: bool,
    pub marks: f64,
    pub time_spent_seconds: i64,
    pub marked_for_review: bool,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeepDive {
    pub attempt_id: i64,
    pub status: AttemptStatus,
    pub summary: Option<ScoreSummary>,
    pub questions: Vec<QuestionReview>,
}
