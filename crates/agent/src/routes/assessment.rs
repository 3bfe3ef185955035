//! Assessment Routes

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use lecture_api::SessionId;
use session::{Assessment, AssessmentResult, AssessmentSubmission};

use crate::{AppError, AppState};

pub async fn attach(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
    Json(assessment): Json<Assessment>,
) -> Result<Json<serde_json::Value>, AppError> {
    let questions = assessment.questions.len();
    state.controller.attach_assessment(id, assessment)?;
    Ok(Json(serde_json::json!({ "success": true, "questions": questions })))
}

pub async fn submit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
    Json(submission): Json<AssessmentSubmission>,
) -> Result<Json<AssessmentResult>, AppError> {
    Ok(Json(state.controller.submit_assessment(id, &submission)?))
}
