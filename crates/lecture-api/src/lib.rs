//! Lecture Backend API
//!
//! Typed async client for the REST backend that performs recognition,
//! emotion inference and persistence. The [`LectureApi`] trait is the seam
//! used by the session engine; [`HttpLectureApi`] talks to the real server
//! and [`MockLectureApi`] is a scriptable stand-in for tests.

mod client;
mod error;
mod mock;
mod types;

pub use client::{ApiConfig, HttpLectureApi, LectureApi};
pub use error::ApiError;
pub use mock::{ApiCall, MockLectureApi};
pub use types::{
    AttendanceStatus, BackgroundAttendanceResponse, DetectedFace, EmotionAnalysis,
    EndLectureResponse, FaceLocation, OverrideRequest, RecognizeFacesResponse, RecognizedStudent,
    SessionId, StartLectureRequest, StartLectureResponse, Student, UNKNOWN_LABEL,
};

/// REST paths relative to the configured base URL
pub mod paths {
    pub const LECTURE_START: &str = "/lectures/start";
    pub const LECTURE_END: &str = "/lectures/end";
    pub const BACKGROUND_ATTENDANCE: &str = "/lectures/attendance/background";
    pub const ATTENDANCE_OVERRIDE: &str = "/lectures/attendance/override";
    pub const RECOGNIZE_FACES: &str = "/recognize_faces";
    pub const ANALYZE_EMOTION: &str = "/analyze-emotion";
    pub const STUDENTS: &str = "/students";
    pub const MARK_ATTENDANCE: &str = "/mark_attendance_batch";
}
