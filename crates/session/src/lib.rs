//! Live Lecture Session Engine
//!
//! Owns the lecture lifecycle `setup -> active -> (test) -> completed`:
//! - Room reservation and camera acquisition at start
//! - Attendance checkpoints and attentiveness sampling over one shared stream
//! - Synchronous camera release and attendance finalization at end
//! - Room-scoped lifecycle broadcasts and operator-facing observers
//! - Timed assessment after the lecture

mod assessment;
mod controller;
mod error;
mod events;
mod state;
mod store;

pub use assessment::{Assessment, AssessmentResult, AssessmentSubmission, Question};
pub use controller::{ControllerConfig, SessionController, SessionOutcome};
pub use error::SessionError;
pub use events::{SessionEvent, SessionObserver};
pub use state::{LectureConfig, LectureSession, SessionState};
