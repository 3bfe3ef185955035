//! Scriptable in-memory backend (no server required)

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use camera_capture::EncodedImage;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::client::LectureApi;
use crate::error::ApiError;
use crate::types::{
    AttendanceStatus, BackgroundAttendanceResponse, EmotionAnalysis, EndLectureResponse,
    OverrideRequest, RecognizeFacesResponse, RecognizedStudent, SessionId, StartLectureRequest,
    StartLectureResponse, Student,
};

/// Record of a call made against the mock
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Start(StartLectureRequest),
    End(SessionId),
    Background {
        session_id: SessionId,
        checkpoint_number: u32,
    },
    Recognize,
    Emotion {
        student_name: Option<String>,
    },
    Roster {
        class_id: String,
        section_id: String,
    },
    Mark {
        name: String,
        status: AttendanceStatus,
    },
    Override(OverrideRequest),
}

#[derive(Default)]
struct Script {
    start_failure: Option<ApiError>,
    end_failure: Option<ApiError>,
    roster_failure: Option<ApiError>,
    recognitions: VecDeque<Result<Vec<RecognizedStudent>, ApiError>>,
    emotions: VecDeque<Result<EmotionAnalysis, ApiError>>,
    faces: RecognizeFacesResponse,
    roster: Vec<Student>,
    latency: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
}

/// In-memory [`LectureApi`] with scripted responses and a call log
pub struct MockLectureApi {
    next_session_id: AtomicI64,
    script: Mutex<Script>,
    calls: Mutex<Vec<ApiCall>>,
}

impl MockLectureApi {
    pub fn new() -> Self {
        Self {
            next_session_id: AtomicI64::new(1),
            script: Mutex::new(Script::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_roster(roster: Vec<Student>) -> Self {
        let mock = Self::new();
        mock.set_roster(roster);
        mock
    }

    /// Roster built from names, ids and roll numbers assigned in order
    pub fn roster_of(names: &[&str]) -> Vec<Student> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| Student {
                id: i as i64 + 1,
                roll_number: format!("R{:03}", i + 1),
                name: name.to_string(),
            })
            .collect()
    }

    pub fn set_roster(&self, roster: Vec<Student>) {
        self.with_script(|s| s.roster = roster);
    }

    pub fn fail_start(&self, error: ApiError) {
        self.with_script(|s| s.start_failure = Some(error));
    }

    pub fn fail_end(&self, error: ApiError) {
        self.with_script(|s| s.end_failure = Some(error));
    }

    pub fn fail_roster(&self, error: ApiError) {
        self.with_script(|s| s.roster_failure = Some(error));
    }

    /// Queue the result of the next background attendance call.
    /// Calls beyond the queue recognize nobody.
    pub fn push_recognition(&self, result: Result<Vec<RecognizedStudent>, ApiError>) {
        self.with_script(|s| s.recognitions.push_back(result));
    }

    pub fn push_emotion(&self, result: Result<EmotionAnalysis, ApiError>) {
        self.with_script(|s| s.emotions.push_back(result));
    }

    pub fn set_faces(&self, faces: RecognizeFacesResponse) {
        self.with_script(|s| s.faces = faces);
    }

    /// Delay every background attendance response
    pub fn set_latency(&self, latency: Duration) {
        self.with_script(|s| s.latency = Some(latency));
    }

    /// Block background attendance responses until [`MockLectureApi::release_held`]
    pub fn hold_background(&self) {
        self.with_script(|s| s.gate = Some(Arc::new(Semaphore::new(0))));
    }

    /// Let `count` held background responses through
    pub fn release_held(&self, count: usize) {
        let gate = self.script.lock().ok().and_then(|s| s.gate.clone());
        if let Some(gate) = gate {
            gate.add_permits(count);
        }
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Checkpoint numbers sent for a session, in call order
    pub fn checkpoint_numbers(&self, session_id: SessionId) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Background {
                    session_id: id,
                    checkpoint_number,
                } if id == session_id => Some(checkpoint_number),
                _ => None,
            })
            .collect()
    }

    fn with_script<T>(&self, f: impl FnOnce(&mut Script) -> T) -> Option<T> {
        self.script.lock().ok().map(|mut s| f(&mut s))
    }

    fn log(&self, call: ApiCall) {
        debug!("Mock API call: {:?}", call);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    /// Neutral, attentive, unidentified sample
    pub fn attentive_sample() -> EmotionAnalysis {
        EmotionAnalysis {
            emotion: "Neutral".to_string(),
            is_attentive: true,
            student_name: None,
            detection_quality: None,
            avg_confidence: 0.8,
            distraction_reason: None,
        }
    }
}

impl Default for MockLectureApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LectureApi for MockLectureApi {
    async fn start_lecture(&self, request: &StartLectureRequest) -> Result<StartLectureResponse, ApiError> {
        self.log(ApiCall::Start(request.clone()));
        if let Some(err) = self.with_script(|s| s.start_failure.clone()).flatten() {
            return Err(err);
        }
        Ok(StartLectureResponse {
            session_id: self.next_session_id.fetch_add(1, Ordering::AcqRel),
        })
    }

    async fn end_lecture(&self, session_id: SessionId) -> Result<EndLectureResponse, ApiError> {
        self.log(ApiCall::End(session_id));
        match self.with_script(|s| s.end_failure.clone()).flatten() {
            Some(err) => Err(err),
            None => Ok(EndLectureResponse::default()),
        }
    }

    async fn background_attendance(
        &self,
        session_id: SessionId,
        checkpoint_number: u32,
        _image: &EncodedImage,
    ) -> Result<BackgroundAttendanceResponse, ApiError> {
        self.log(ApiCall::Background {
            session_id,
            checkpoint_number,
        });

        let (latency, gate, scripted) = self
            .with_script(|s| (s.latency, s.gate.clone(), s.recognitions.pop_front()))
            .unwrap_or((None, None, None));

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(gate) = gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| ApiError::Http(e.to_string()))?;
            permit.forget();
        }

        let students = scripted.unwrap_or_else(|| Ok(Vec::new()))?;
        Ok(BackgroundAttendanceResponse {
            recognized_count: students.len(),
            students,
        })
    }

    async fn recognize_faces(&self, _image: &EncodedImage) -> Result<RecognizeFacesResponse, ApiError> {
        self.log(ApiCall::Recognize);
        Ok(self.with_script(|s| s.faces.clone()).unwrap_or_default())
    }

    async fn analyze_emotion(
        &self,
        _image: &EncodedImage,
        student_name: Option<&str>,
    ) -> Result<EmotionAnalysis, ApiError> {
        self.log(ApiCall::Emotion {
            student_name: student_name.map(str::to_string),
        });
        self.with_script(|s| s.emotions.pop_front())
            .flatten()
            .unwrap_or_else(|| Ok(Self::attentive_sample()))
    }

    async fn fetch_roster(&self, class_id: &str, section_id: &str) -> Result<Vec<Student>, ApiError> {
        self.log(ApiCall::Roster {
            class_id: class_id.to_string(),
            section_id: section_id.to_string(),
        });
        match self.with_script(|s| (s.roster_failure.clone(), s.roster.clone())) {
            Some((Some(err), _)) => Err(err),
            Some((None, roster)) => Ok(roster),
            None => Ok(Vec::new()),
        }
    }

    async fn mark_attendance(&self, name: &str, status: AttendanceStatus) -> Result<(), ApiError> {
        self.log(ApiCall::Mark {
            name: name.to_string(),
            status,
        });
        Ok(())
    }

    async fn override_attendance(&self, request: &OverrideRequest) -> Result<(), ApiError> {
        self.log(ApiCall::Override(request.clone()));
        Ok(())
    }
}
