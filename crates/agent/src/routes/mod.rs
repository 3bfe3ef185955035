pub mod assessment;
pub mod events;
pub mod lectures;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use camera_capture::{CaptureConfig, FrameCaptureClient, SyntheticProvider};
    use lecture_api::MockLectureApi;
    use serde_json::{json, Value};
    use session::{ControllerConfig, SessionController};
    use tower::ServiceExt;

    use crate::{create_router, AppState};

    struct TestApp {
        router: Router,
        provider: Arc<SyntheticProvider>,
    }

    fn app() -> TestApp {
        let provider = Arc::new(SyntheticProvider::new());
        let camera = Arc::new(FrameCaptureClient::new(provider.clone(), CaptureConfig::default()));
        let api = Arc::new(MockLectureApi::with_roster(MockLectureApi::roster_of(&[
            "Alice", "Bob",
        ])));
        let controller = SessionController::new(camera, api, None, ControllerConfig::default());
        let state = Arc::new(AppState::new(controller, None));
        TestApp {
            router: create_router(state),
            provider,
        }
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn lecture() -> Value {
        json!({
            "class_id": "10",
            "section_id": "A",
            "subject": "Physics",
            "chapter": "Optics",
            "checkpoint_interval_seconds": 300
        })
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let (status, body) = send(&app.router, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["components"]["bus"], "disabled");
    }

    #[tokio::test]
    async fn test_start_conflict_end() {
        let app = app();
        let (status, body) = send(&app.router, "POST", "/api/v1/lectures/start", Some(lecture())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["room"], "class_10_A");
        let id = body["session_id"].as_i64().unwrap();

        let (status, _) = send(&app.router, "POST", "/api/v1/lectures/start", Some(lecture())).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app.router, "GET", "/api/v1/lectures/current", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let (status, body) = send(
            &app.router,
            "POST",
            "/api/v1/lectures/end",
            Some(json!({ "session_id": id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["attendance"].as_array().unwrap().len(), 2);
        assert_eq!(body["session"]["state"], "completed");
        assert_eq!(app.provider.release_count(), 1);

        let (status, body) = send(
            &app.router,
            "POST",
            "/api/v1/lectures/end",
            Some(json!({ "session_id": id })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, body) = send(&app.router, "GET", &format!("/api/v1/lectures/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "completed");
    }

    #[tokio::test]
    async fn test_camera_unavailable_is_503() {
        let app = app();
        app.provider.fail_all();
        let (status, _) = send(&app.router, "POST", "/api/v1/lectures/start", Some(lecture())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_invalid_lecture_is_400() {
        let app = app();
        let mut body = lecture();
        body["subject"] = json!("");
        let (status, _) = send(&app.router, "POST", "/api/v1/lectures/start", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_assessment_over_http() {
        let app = app();
        let (_, body) = send(&app.router, "POST", "/api/v1/lectures/start", Some(lecture())).await;
        let id = body["session_id"].as_i64().unwrap();

        let assessment = json!({
            "questions": [
                { "prompt": "Unit of lens power?", "options": ["Dioptre", "Watt"], "answer": 0 }
            ],
            "duration_minutes": 5
        });
        let (status, _) = send(
            &app.router,
            "POST",
            &format!("/api/v1/lectures/{}/assessment", id),
            Some(assessment),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(
            &app.router,
            "POST",
            "/api/v1/lectures/end",
            Some(json!({ "session_id": id })),
        )
        .await;
        assert_eq!(body["assessment_pending"], true);

        let (status, body) = send(
            &app.router,
            "POST",
            &format!("/api/v1/lectures/{}/assessment/submit", id),
            Some(json!({ "answers": [0] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["score"], 1);
    }

    #[tokio::test]
    async fn test_override_unknown_student_is_404() {
        let app = app();
        let (_, body) = send(&app.router, "POST", "/api/v1/lectures/start", Some(lecture())).await;
        let id = body["session_id"].as_i64().unwrap();

        let (status, _) = send(
            &app.router,
            "POST",
            &format!("/api/v1/lectures/{}/override", id),
            Some(json!({ "student_id": 2, "status": "Present" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app.router,
            "POST",
            &format!("/api/v1/lectures/{}/override", id),
            Some(json!({ "student_id": 77, "status": "Present" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_partial_override_is_400() {
        let app = app();
        let (_, body) = send(&app.router, "POST", "/api/v1/lectures/start", Some(lecture())).await;
        let id = body["session_id"].as_i64().unwrap();

        let (status, _) = send(
            &app.router,
            "POST",
            &format!("/api/v1/lectures/{}/override", id),
            Some(json!({ "student_id": 1, "status": "Partial" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(
            &app.router,
            "POST",
            "/api/v1/lectures/end",
            Some(json!({ "session_id": id })),
        )
        .await;
        assert!(body["attendance"]
            .as_array()
            .unwrap()
            .iter()
            .all(|r| r["status"] != "Partial"));
    }

    #[tokio::test]
    async fn test_recent_events_require_bus() {
        let app = app();
        let (status, _) = send(&app.router, "GET", "/api/v1/events/recent", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = send(&app.router, "GET", "/api/v1/lectures/live", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);
    }
}
