//! Lecture Routes

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use attendance::AttendanceSummary;
use event_bus::{LiveLecture, RoomKey};
use lecture_api::{AttendanceStatus, RecognizeFacesResponse, SessionId};
use serde::{Deserialize, Serialize};
use session::{LectureConfig, LectureSession, SessionError, SessionOutcome};

use crate::{AppError, AppState};

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub success: bool,
    pub session_id: SessionId,
    pub room: RoomKey,
}

#[derive(Debug, Deserialize)]
pub struct EndRequest {
    pub session_id: SessionId,
}

#[derive(Debug, Serialize)]
pub struct EndResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: SessionOutcome,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub count: usize,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            count: data.len(),
            data,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OverrideBody {
    pub student_id: i64,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(config): Json<LectureConfig>,
) -> Result<(StatusCode, Json<StartResponse>), AppError> {
    let room = config.room();
    let session_id = state.controller.start(config).await?;
    Ok((
        StatusCode::CREATED,
        Json(StartResponse {
            success: true,
            session_id,
            room,
        }),
    ))
}

pub async fn end(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EndRequest>,
) -> Result<Json<EndResponse>, AppError> {
    let outcome = state.controller.end(request.session_id).await?;
    Ok(Json(EndResponse {
        success: true,
        outcome,
    }))
}

pub async fn current(State(state): State<Arc<AppState>>) -> Json<ListResponse<LectureSession>> {
    Json(ListResponse::new(state.controller.current()))
}

/// Lectures announced in joined rooms, started or scheduled
pub async fn live(State(state): State<Arc<AppState>>) -> Json<ListResponse<LiveLecture>> {
    Json(ListResponse::new(state.live().list()))
}

pub async fn get_lecture(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
) -> Result<Json<LectureSession>, AppError> {
    state
        .controller
        .get(id)
        .or_else(|| state.controller.history().into_iter().find(|s| s.id == id))
        .map(Json)
        .ok_or(AppError::Session(SessionError::UnknownSession(id)))
}

pub async fn attendance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
) -> Result<Json<AttendanceSummary>, AppError> {
    Ok(Json(state.controller.attendance_summary(id)?))
}

pub async fn override_attendance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
    Json(body): Json<OverrideBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .controller
        .override_attendance(id, body.student_id, body.status, body.notes)
        .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn recognize(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
) -> Result<Json<RecognizeFacesResponse>, AppError> {
    Ok(Json(state.controller.recognize_now(id).await?))
}
