//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use session::SessionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Event bus disabled")]
    BusDisabled,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Session(e) => match e {
                SessionError::SessionConflict(_) => StatusCode::CONFLICT,
                SessionError::UnknownSession(_) => StatusCode::NOT_FOUND,
                SessionError::CameraUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                SessionError::Capture(_) => StatusCode::SERVICE_UNAVAILABLE,
                SessionError::Api(_) => StatusCode::BAD_GATEWAY,
                SessionError::InvalidConfig(_) | SessionError::InvalidAssessment(_) => {
                    StatusCode::BAD_REQUEST
                }
                SessionError::NoAssessment(_) | SessionError::InvalidTransition { .. } => {
                    StatusCode::CONFLICT
                }
                SessionError::Attendance(attendance::AttendanceError::NotRostered(_)) => {
                    StatusCode::NOT_FOUND
                }
                SessionError::Attendance(attendance::AttendanceError::InvalidOverride(_)) => {
                    StatusCode::BAD_REQUEST
                }
                SessionError::Attendance(_)
                | SessionError::Scheduler(_)
                | SessionError::Monitor(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::BusDisabled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), %message, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), %message, "Request rejected");
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "status": status.as_u16(),
                "message": message,
            }
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::CameraError;
    use event_bus::RoomKey;
    use lecture_api::ApiError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                SessionError::SessionConflict(RoomKey::new("10", None)),
                StatusCode::CONFLICT,
            ),
            (SessionError::UnknownSession(4), StatusCode::NOT_FOUND),
            (
                SessionError::CameraUnavailable(CameraError::Unavailable("no device".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                SessionError::Api(ApiError::Http("timeout".into())),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(AppError::from(error).status_code(), status);
        }
    }
}
