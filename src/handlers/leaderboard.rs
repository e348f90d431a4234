// src/handlers/leaderboard.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    config::DEFAULT_LEADERBOARD_LIMIT,
    engine::ExamEngine,
    error::AppError,
    models::leaderboard::{LeaderboardQuery, RecalculateRanksRequest},
};

/// Ranked entries of one (category, test) group.
pub async fn get_leaderboard(
    State(engine): State<Arc<ExamEngine>>,
    Path((category_id, test_id)): Path<(i64, i64)>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT);
    if limit < 1 {
        return Err(AppError::BadRequest("limit must be positive".to_string()));
    }

    let entries = engine
        .ranker()
        .leaderboard(category_id, test_id, limit)
        .await?;
    Ok(Json(entries))
}

/// Re-sorts a category's groups after manual data fixes.
/// Admin only.
pub async fn recalculate_ranks(
    State(engine): State<Arc<ExamEngine>>,
    Json(payload): Json<RecalculateRanksRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let count = engine
        .ranker()
        .recalculate_ranks(payload.category_id, payload.test_id)
        .await?;
    Ok(Json(serde_json::json!({ "count": count })))
}

/// Removes a leaderboard entry and re-ranks its group.
/// Admin only.
pub async fn delete_entry(
    State(engine): State<Arc<ExamEngine>>,
    Path(entry_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    engine.ranker().delete_entry(entry_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Auto-submits attempts that outlived their test's duration.
/// Admin only.
pub async fn sweep_stale_attempts(
    State(engine): State<Arc<ExamEngine>>,
) -> Result<impl IntoResponse, AppError> {
    let submitted = engine.sweep_stale_attempts().await?;
    Ok(Json(serde_json::json!({ "submitted": submitted })))
}
