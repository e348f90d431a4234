// src/models/leaderboard.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'leaderboard_entries' table in the database.
/// One row per (category, test, user) holding that user's best result.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub id: i64,
    pub category_id: i64,
    pub test_id: i64,
    pub user_id: i64,
    pub best_score: f64,
    /// Attempt that produced `best_score`.
    pub attempt_id: i64,
    /// Total time of that attempt; faster wins ties.
    pub attempt_time_seconds: i64,
    /// Derived from a full sort of the group, never authoritative on its own.
    pub rank: i64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// What happened to the leaderboard after a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankOutcome {
    /// True when the entry was created or its best score improved.
    pub updated: bool,
    pub rank: Option<i64>,
    pub best_score: f64,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<i64>,
}

/// DTO for the administrative re-rank.
#[derive(Debug, Deserialize, Validate)]
pub struct RecalculateRanksRequest {
    #[validate(range(min = 1))]
    pub category_id: i64,
    pub test_id: Option<i64>,
}
