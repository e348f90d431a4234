// src/handlers/attempt.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    engine::{ExamEngine, TrailingTime},
    error::AppError,
    models::attempt::{
        ListAttemptsQuery, ReviewFlagRequest, StartAttemptRequest, SubmitAttemptRequest,
        TrailingTimeRequest, UpdateAnswerRequest,
    },
    utils::jwt::Claims,
};

/// Starts an attempt on a test.
///
/// Returns 201 with a fresh attempt, or 200 with the caller's open attempt
/// when one exists and `force_new` is not set.
pub async fn start_attempt(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<StartAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let user_id = claims.user_id()?;

    let summary = engine
        .start_attempt(user_id, payload.test_id, payload.force_new)
        .await?;

    let status = if summary.resumed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(summary)))
}

/// Lists the caller's attempts, newest first.
pub async fn list_attempts(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListAttemptsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let attempts = engine.list_attempts(claims.user_id()?, query.test_id).await?;
    Ok(Json(attempts))
}

/// Full attempt state. Registers time away from the test as paused time.
pub async fn get_attempt(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let view = engine.get_attempt(attempt_id, claims.user_id()?).await?;
    Ok(Json(view))
}

pub async fn update_answer(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path((attempt_id, question_id)): Path<(i64, i64)>,
    Json(payload): Json<UpdateAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let record = engine
        .update_answer(
            attempt_id,
            claims.user_id()?,
            question_id,
            payload.selected_option_id,
            payload.marked_for_review,
            payload.time_increment,
        )
        .await?;
    Ok(Json(record))
}

pub async fn update_review_flag(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path((attempt_id, question_id)): Path<(i64, i64)>,
    Json(payload): Json<ReviewFlagRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let record = engine
        .update_review_flag(
            attempt_id,
            claims.user_id()?,
            question_id,
            payload.marked_for_review,
            payload.time_increment,
        )
        .await?;
    Ok(Json(record))
}

pub async fn submit_section(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path((attempt_id, section_id)): Path<(i64, i64)>,
    payload: Option<Json<TrailingTimeRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    payload.validate()?;

    let result = engine
        .submit_section(
            attempt_id,
            claims.user_id()?,
            section_id,
            TrailingTime::new(payload.question_id, payload.time_increment),
        )
        .await?;
    Ok(Json(result))
}

/// Section countdown poll. Closes the section when its time is up.
pub async fn check_section_timer(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let status = engine
        .check_section_timer(attempt_id, claims.user_id()?)
        .await?;
    Ok(Json(status))
}

pub async fn pause_attempt(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let timing = engine.pause(attempt_id, claims.user_id()?).await?;
    Ok(Json(timing))
}

pub async fn resume_attempt(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let timing = engine.resume(attempt_id, claims.user_id()?).await?;
    Ok(Json(timing))
}

/// Grades and closes the attempt. The body is optional.
pub async fn submit_attempt(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
    payload: Option<Json<SubmitAttemptRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    payload.validate()?;

    let summary = engine
        .submit(
            attempt_id,
            claims.user_id()?,
            payload.reason.as_deref(),
            TrailingTime::new(payload.question_id, payload.time_increment),
        )
        .await?;
    Ok(Json(summary))
}

/// Post-submission review with correct answers and explanations.
pub async fn get_deep_dive(
    State(engine): State<Arc<ExamEngine>>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let review = engine.deep_dive(attempt_id, claims.user_id()?).await?;
    Ok(Json(review))
}
