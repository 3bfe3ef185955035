//! HTTP client for the lecture backend

use std::time::Duration;

use async_trait::async_trait;
use camera_capture::EncodedImage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::paths;
use crate::types::{
    AttendanceStatus, BackgroundAttendanceResponse, EmotionAnalysis, EndLectureResponse,
    OverrideRequest, RecognizeFacesResponse, SessionId, StartLectureRequest,
    StartLectureResponse, Student,
};

/// Default timeout for backend calls
const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Backend operations used by the session engine
#[async_trait]
pub trait LectureApi: Send + Sync {
    async fn start_lecture(&self, request: &StartLectureRequest) -> Result<StartLectureResponse, ApiError>;

    async fn end_lecture(&self, session_id: SessionId) -> Result<EndLectureResponse, ApiError>;

    /// Silent checkpoint recognition; the backend records what it saw
    async fn background_attendance(
        &self,
        session_id: SessionId,
        checkpoint_number: u32,
        image: &EncodedImage,
    ) -> Result<BackgroundAttendanceResponse, ApiError>;

    async fn recognize_faces(&self, image: &EncodedImage) -> Result<RecognizeFacesResponse, ApiError>;

    async fn analyze_emotion(
        &self,
        image: &EncodedImage,
        student_name: Option<&str>,
    ) -> Result<EmotionAnalysis, ApiError>;

    async fn fetch_roster(&self, class_id: &str, section_id: &str) -> Result<Vec<Student>, ApiError>;

    async fn mark_attendance(&self, name: &str, status: AttendanceStatus) -> Result<(), ApiError>;

    async fn override_attendance(&self, request: &OverrideRequest) -> Result<(), ApiError>;
}

/// API client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL including the API prefix (e.g., "http://localhost:5000/api")
    pub base_url: String,
    /// Per-request timeout
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// reqwest-backed implementation of [`LectureApi`]
pub struct HttpLectureApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLectureApi {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ApiError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R, ApiError> {
        debug!("POST {}", path);
        let response = self.client.post(self.url(path)).json(body).send().await?;
        let value = Self::read_body(response).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(format!("{}: {}", path, e)))
    }

    /// Read a JSON body, turning HTTP and `success: false` failures into errors
    async fn read_body(response: reqwest::Response) -> Result<Value, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = response.json().await?;
        if value.get("success").and_then(Value::as_bool) == Some(false) {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unspecified")
                .to_string();
            return Err(ApiError::Rejected(message));
        }
        Ok(value)
    }
}

#[async_trait]
impl LectureApi for HttpLectureApi {
    async fn start_lecture(&self, request: &StartLectureRequest) -> Result<StartLectureResponse, ApiError> {
        self.post(paths::LECTURE_START, request).await
    }

    async fn end_lecture(&self, session_id: SessionId) -> Result<EndLectureResponse, ApiError> {
        self.post(paths::LECTURE_END, &json!({ "session_id": session_id })).await
    }

    async fn background_attendance(
        &self,
        session_id: SessionId,
        checkpoint_number: u32,
        image: &EncodedImage,
    ) -> Result<BackgroundAttendanceResponse, ApiError> {
        let body = json!({
            "session_id": session_id,
            "checkpoint_number": checkpoint_number,
            "image": image.to_data_url(),
        });
        self.post(paths::BACKGROUND_ATTENDANCE, &body).await
    }

    async fn recognize_faces(&self, image: &EncodedImage) -> Result<RecognizeFacesResponse, ApiError> {
        self.post(paths::RECOGNIZE_FACES, &json!({ "image": image.to_data_url() }))
            .await
    }

    async fn analyze_emotion(
        &self,
        image: &EncodedImage,
        student_name: Option<&str>,
    ) -> Result<EmotionAnalysis, ApiError> {
        let body = json!({
            "image": image.to_data_url(),
            "student_name": student_name,
        });
        self.post(paths::ANALYZE_EMOTION, &body).await
    }

    async fn fetch_roster(&self, class_id: &str, section_id: &str) -> Result<Vec<Student>, ApiError> {
        let response = self
            .client
            .get(self.url(paths::STUDENTS))
            .query(&[("class_id", class_id), ("section_id", section_id)])
            .send()
            .await?;
        let mut value = Self::read_body(response).await?;

        // Either a bare list or the `{success, data}` envelope
        if let Some(data) = value.get_mut("data") {
            value = data.take();
        }
        let roster: Vec<Student> =
            serde_json::from_value(value).map_err(|e| ApiError::Decode(format!("roster: {}", e)))?;
        if roster.is_empty() {
            warn!("Roster for class {} section {} is empty", class_id, section_id);
        }
        Ok(roster)
    }

    async fn mark_attendance(&self, name: &str, status: AttendanceStatus) -> Result<(), ApiError> {
        let _: Value = self
            .post(paths::MARK_ATTENDANCE, &json!({ "name": name, "status": status }))
            .await?;
        Ok(())
    }

    async fn override_attendance(&self, request: &OverrideRequest) -> Result<(), ApiError> {
        let _: Value = self.post(paths::ATTENDANCE_OVERRIDE, request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let api = HttpLectureApi::new(&ApiConfig {
            base_url: "http://school.local/api/".to_string(),
            timeout_ms: 1000,
        })
        .unwrap();
        assert_eq!(api.url(paths::LECTURE_START), "http://school.local/api/lectures/start");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_http_error() {
        let api = HttpLectureApi::new(&ApiConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_ms: 500,
        })
        .unwrap();
        let err = api.end_lecture(1).await.unwrap_err();
        assert!(matches!(err, ApiError::Http(_)));
    }
}
