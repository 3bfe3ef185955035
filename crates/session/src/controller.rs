//! Session Controller Implementation

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use attendance::{
    AggregatorConfig, AttendanceRecord, AttendanceSummary, Checkpoint, RecognitionResultAggregator,
};
use attentiveness::{AttentivenessMonitor, AttentivenessSample, MonitorConfig, SessionReport};
use camera_capture::FrameCaptureClient;
use checkpoint_scheduler::{
    CheckpointScheduler, CheckpointSink, SchedulerConfig, TestCheckpointResult, TestResultSink,
};
use event_bus::{RealtimeEvent, RealtimeEventBus, RoomKey};
use lecture_api::{
    AttendanceStatus, LectureApi, OverrideRequest, RecognizeFacesResponse, SessionId,
    StartLectureRequest, Student,
};
use periodic_task::{PeriodicTask, Schedule};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::assessment::{Assessment, AssessmentResult, AssessmentSubmission};
use crate::error::SessionError;
use crate::events::{SessionEvent, SessionObserver};
use crate::state::{LectureConfig, LectureSession, SessionState};
use crate::store::SessionStore;

/// Controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Delay of the startup test checkpoint (default: 3000ms)
    pub first_checkpoint_delay_ms: u64,
    pub aggregator: AggregatorConfig,
    pub monitor: MonitorConfig,
    /// Assessment duration when the assessment names none (default: 5 min)
    pub assessment_timeout_secs: u64,
    /// Completed sessions kept for queries
    pub history_limit: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            first_checkpoint_delay_ms: 3000,
            aggregator: AggregatorConfig::default(),
            monitor: MonitorConfig::default(),
            assessment_timeout_secs: 300,
            history_limit: 20,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        self.monitor
            .validate()
            .map_err(|e| SessionError::InvalidConfig(e.to_string()))
    }
}

/// Everything `end` produces
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub session: LectureSession,
    pub attendance: Vec<AttendanceRecord>,
    pub summary: AttendanceSummary,
    /// Recognized names missing from the roster
    pub unrostered: Vec<String>,
    pub report: SessionReport,
    /// Backend summary, `null` when the end call failed
    pub server_summary: serde_json::Value,
    pub assessment_pending: bool,
}

struct Inner {
    camera: Arc<FrameCaptureClient>,
    api: Arc<dyn LectureApi>,
    bus: Option<Arc<RealtimeEventBus>>,
    config: ControllerConfig,
    sessions: Mutex<HashMap<SessionId, SessionStore>>,
    /// Rooms with a start in progress
    starting: Mutex<HashSet<RoomKey>>,
    history: Mutex<VecDeque<LectureSession>>,
    observers: Mutex<Vec<SessionObserver>>,
}

/// Drives lectures from start to completion. Cheap to clone.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds a room while a start is in progress
struct Reservation<'a> {
    inner: &'a Inner,
    room: RoomKey,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        lock(&self.inner.starting).remove(&self.room);
    }
}

impl SessionController {
    pub fn new(
        camera: Arc<FrameCaptureClient>,
        api: Arc<dyn LectureApi>,
        bus: Option<Arc<RealtimeEventBus>>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                camera,
                api,
                bus,
                config,
                sessions: Mutex::new(HashMap::new()),
                starting: Mutex::new(HashSet::new()),
                history: Mutex::new(VecDeque::new()),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn add_observer(&self, observer: SessionObserver) {
        lock(&self.inner.observers).push(observer);
    }

    /// Start a lecture and its capture loops
    pub async fn start(&self, config: LectureConfig) -> Result<SessionId, SessionError> {
        config.validate()?;
        self.inner.config.validate()?;
        let inner = &self.inner;
        let room = config.room();
        let reservation = inner.reserve(&room)?;

        let lease = inner.camera.acquire(None).await.map_err(|e| {
            error!("Cannot start lecture in {}: {}", room, e);
            SessionError::CameraUnavailable(e)
        })?;

        let request = StartLectureRequest {
            class_id: config.class_id.clone(),
            section_id: config.section_id.clone(),
            subject: config.subject.clone(),
            title: config.title.clone(),
            checkpoint_interval: config.checkpoint_interval_seconds,
        };
        let session_id = match inner.api.start_lecture(&request).await {
            Ok(response) => response.session_id,
            Err(e) => {
                lease.release();
                error!("Backend refused lecture start in {}: {}", room, e);
                return Err(SessionError::Api(e));
            }
        };

        let mut events = Vec::new();
        let mut session = LectureSession::new(session_id, &config);
        let mut aggregator =
            RecognitionResultAggregator::new(session_id, inner.config.aggregator.clone());
        match inner.api.fetch_roster(&config.class_id, &config.section_id).await {
            Ok(roster) => aggregator.set_roster(roster),
            Err(e) => {
                warn!("Session {} roster fetch failed: {}", session_id, e);
                events.push(soft_failure(session_id, "fetch_roster", &e));
            }
        }

        let from = session.transition(SessionState::Active)?;
        events.push(SessionEvent::StateChanged {
            session_id,
            from,
            to: SessionState::Active,
        });

        let scheduler = Arc::new(CheckpointScheduler::new(
            Arc::clone(&inner.camera),
            Arc::clone(&inner.api),
            SchedulerConfig {
                interval: Duration::from_secs(config.checkpoint_interval_seconds),
                first_checkpoint_delay: Duration::from_millis(inner.config.first_checkpoint_delay_ms),
            },
        ));
        let monitor = Arc::new(AttentivenessMonitor::new(
            Arc::clone(&inner.camera),
            Arc::clone(&inner.api),
            inner.config.monitor.clone(),
        ));
        let stream = lease.share();

        {
            let mut sessions = lock(&inner.sessions);
            sessions.insert(
                session_id,
                SessionStore::new(
                    session,
                    lease,
                    aggregator,
                    Arc::clone(&scheduler),
                    Arc::clone(&monitor),
                ),
            );
        }
        // The active session now holds the room
        drop(reservation);

        let weak = Arc::downgrade(inner);
        let started = scheduler
            .start(
                session_id,
                Arc::clone(&stream),
                checkpoint_sink(weak.clone()),
                test_result_sink(weak.clone(), session_id),
            )
            .map_err(SessionError::from)
            .and_then(|()| {
                monitor
                    .start(session_id, stream, sample_sink(weak))
                    .map_err(SessionError::from)
            });
        if let Err(e) = started {
            error!("Session {} loops failed to start: {}", session_id, e);
            if let Some(store) = lock(&inner.sessions).remove(&session_id) {
                store.stop_capture();
            }
            return Err(e);
        }

        if let Some(bus) = &inner.bus {
            if let Err(e) = bus.join_room(&room).await {
                warn!("Session {} could not join {}: {}", session_id, room, e);
            }
            let event =
                RealtimeEvent::lecture_started(room.clone(), session_id, &config.title, &config.subject);
            if let Err(e) = bus.broadcast(&event).await {
                warn!("Session {} start broadcast failed: {}", session_id, e);
                events.push(soft_failure(session_id, "broadcast_started", &e));
            }
        }

        info!(
            "Lecture {} started in {} ({} / {}), checkpoints every {}s",
            session_id, room, config.subject, config.title, config.checkpoint_interval_seconds
        );
        inner.emit_all(events);
        Ok(session_id)
    }

    /// End an active lecture. The camera is released before any network call.
    pub async fn end(&self, session_id: SessionId) -> Result<SessionOutcome, SessionError> {
        let inner = &self.inner;
        let mut events = Vec::new();

        let (mut aggregator, monitor, session, to) = {
            let mut sessions = lock(&inner.sessions);
            let store = sessions
                .get_mut(&session_id)
                .filter(|s| s.is_active())
                .ok_or(SessionError::UnknownSession(session_id))?;
            let aggregator = store
                .aggregator
                .take()
                .ok_or(SessionError::UnknownSession(session_id))?;

            store.stop_capture();

            let to = match store.assessment.as_ref() {
                Some(assessment) => {
                    let duration = assessment
                        .duration(Duration::from_secs(inner.config.assessment_timeout_secs));
                    store.assessment_timer = Some(assessment_timer(
                        Arc::downgrade(inner),
                        session_id,
                        duration,
                    ));
                    SessionState::Test
                }
                None => SessionState::Completed,
            };
            let from = store.session.transition(to)?;
            events.push(SessionEvent::StateChanged { session_id, from, to });
            (aggregator, Arc::clone(&store.monitor), store.session.clone(), to)
        };
        info!("Lecture {} ended; camera released", session_id);

        // Network work from here on; failures are soft
        match inner.api.fetch_roster(&session.class_id, &session.section_id).await {
            Ok(roster) if !roster.is_empty() => aggregator.set_roster(roster),
            Ok(_) => debug!("Session {} roster refresh returned nothing", session_id),
            Err(e) => {
                warn!("Session {} roster refresh failed: {}", session_id, e);
                events.push(soft_failure(session_id, "refresh_roster", &e));
            }
        }
        let attendance = aggregator.finalize()?;
        let summary = aggregator.summary();
        let unrostered = aggregator.unrostered();
        if !unrostered.is_empty() {
            warn!(
                "Session {} recognized {} names not on the roster",
                session_id,
                unrostered.len()
            );
        }

        let report = monitor
            .compile_report()
            .unwrap_or_else(|| SessionReport::empty(session_id));

        let server_summary = match inner.api.end_lecture(session_id).await {
            Ok(response) => response.summary,
            Err(e) => {
                warn!("Session {} end call failed: {}", session_id, e);
                events.push(soft_failure(session_id, "end_lecture", &e));
                serde_json::Value::Null
            }
        };

        if let Some(e) = persist_attendance(inner.api.as_ref(), &attendance).await {
            events.push(soft_failure(session_id, "persist_attendance", &e));
        }

        if let Some(bus) = &inner.bus {
            let room = session.room();
            if let Err(e) = bus.broadcast(&RealtimeEvent::lecture_ended(room.clone(), session_id)).await {
                warn!("Session {} end broadcast failed: {}", session_id, e);
                events.push(soft_failure(session_id, "broadcast_ended", &e));
            }
            if !inner.room_in_use(&room) {
                if let Err(e) = bus.leave_room(&room).await {
                    debug!("Leaving {} failed: {}", room, e);
                }
            }
        }

        if to == SessionState::Completed {
            inner.complete(session_id);
        }

        info!(
            "Lecture {} outcome: {} records, {} attentiveness entries{}",
            session_id,
            attendance.len(),
            report.per_student.len(),
            if to == SessionState::Test { ", assessment pending" } else { "" }
        );
        inner.emit_all(events);

        Ok(SessionOutcome {
            session,
            attendance,
            summary,
            unrostered,
            report,
            server_summary,
            assessment_pending: to == SessionState::Test,
        })
    }

    /// End every live session. Pending assessments finish as timed out.
    pub async fn shutdown(&self) -> usize {
        let active: Vec<SessionId> = {
            let sessions = lock(&self.inner.sessions);
            sessions
                .values()
                .filter(|s| s.is_active())
                .map(|s| s.session.id)
                .collect()
        };

        let mut ended = 0;
        for session_id in active {
            match self.end(session_id).await {
                Ok(_) => ended += 1,
                Err(e) => warn!("Shutdown could not end session {}: {}", session_id, e),
            }
        }
        // Includes sessions that just entered Test above
        let testing: Vec<SessionId> = {
            let sessions = lock(&self.inner.sessions);
            sessions
                .values()
                .filter(|s| s.session.state == SessionState::Test)
                .map(|s| s.session.id)
                .collect()
        };
        for session_id in testing {
            if self.inner.finish_assessment(session_id, None).is_ok() {
                ended += 1;
            }
        }

        // Anything still present is released on drop of its lease
        let leftover: Vec<SessionStore> = {
            let mut sessions = lock(&self.inner.sessions);
            sessions.drain().map(|(_, store)| store).collect()
        };
        for store in &leftover {
            store.stop_capture();
        }

        info!("Session controller shut down ({} sessions ended)", ended);
        ended
    }

    /// Attach an assessment to run once the lecture ends
    pub fn attach_assessment(
        &self,
        session_id: SessionId,
        assessment: Assessment,
    ) -> Result<(), SessionError> {
        assessment.validate()?;
        let mut sessions = lock(&self.inner.sessions);
        let store = sessions
            .get_mut(&session_id)
            .filter(|s| s.is_active())
            .ok_or(SessionError::UnknownSession(session_id))?;
        info!(
            "Session {} assessment attached ({} questions)",
            session_id,
            assessment.questions.len()
        );
        store.assessment = Some(assessment);
        Ok(())
    }

    /// Score the pending assessment and complete the session
    pub fn submit_assessment(
        &self,
        session_id: SessionId,
        submission: &AssessmentSubmission,
    ) -> Result<AssessmentResult, SessionError> {
        self.inner.finish_assessment(session_id, Some(submission))
    }

    /// Teacher decision for one student; wins over recognition at finalize
    pub async fn override_attendance(
        &self,
        session_id: SessionId,
        student_id: i64,
        status: AttendanceStatus,
        notes: Option<String>,
    ) -> Result<(), SessionError> {
        let checkpoint_number = {
            let mut sessions = lock(&self.inner.sessions);
            let store = sessions
                .get_mut(&session_id)
                .filter(|s| s.is_active())
                .ok_or(SessionError::UnknownSession(session_id))?;
            let aggregator = store
                .aggregator
                .as_mut()
                .ok_or(SessionError::UnknownSession(session_id))?;
            aggregator.override_status(student_id, status)?;
            store.last_checkpoint_number()
        };

        let request = OverrideRequest {
            session_id,
            student_id,
            checkpoint_number,
            status,
            notes,
        };
        if let Err(e) = self.inner.api.override_attendance(&request).await {
            warn!("Session {} override not persisted: {}", session_id, e);
            self.inner
                .emit(&soft_failure(session_id, "override_attendance", &e));
        }
        Ok(())
    }

    /// Ad-hoc recognition for the operator; not fed to attendance
    pub async fn recognize_now(
        &self,
        session_id: SessionId,
    ) -> Result<RecognizeFacesResponse, SessionError> {
        let stream = {
            let sessions = lock(&self.inner.sessions);
            let store = sessions
                .get(&session_id)
                .filter(|s| s.is_active())
                .ok_or(SessionError::UnknownSession(session_id))?;
            store.lease.share()
        };
        let image = self
            .inner
            .camera
            .capture_frame(&stream)
            .await
            .map_err(SessionError::Capture)?;
        let response = self.inner.api.recognize_faces(&image).await?;
        debug!(
            "Session {} ad-hoc recognition: {} faces",
            session_id,
            response.faces.len()
        );
        Ok(response)
    }

    pub fn get(&self, session_id: SessionId) -> Option<LectureSession> {
        lock(&self.inner.sessions)
            .get(&session_id)
            .map(|s| s.session.clone())
    }

    /// Live sessions (setup, active or test), by id
    pub fn current(&self) -> Vec<LectureSession> {
        let mut live: Vec<LectureSession> = lock(&self.inner.sessions)
            .values()
            .filter(|s| !s.session.state.is_terminal())
            .map(|s| s.session.clone())
            .collect();
        live.sort_by_key(|s| s.id);
        live
    }

    /// Recently completed sessions, oldest first
    pub fn history(&self) -> Vec<LectureSession> {
        lock(&self.inner.history).iter().cloned().collect()
    }

    pub fn attendance_summary(&self, session_id: SessionId) -> Result<AttendanceSummary, SessionError> {
        lock(&self.inner.sessions)
            .get(&session_id)
            .and_then(|s| s.aggregator.as_ref())
            .map(RecognitionResultAggregator::summary)
            .ok_or(SessionError::UnknownSession(session_id))
    }

    pub fn roster(&self, session_id: SessionId) -> Result<Vec<Student>, SessionError> {
        lock(&self.inner.sessions)
            .get(&session_id)
            .and_then(|s| s.aggregator.as_ref())
            .map(|a| a.roster().to_vec())
            .ok_or(SessionError::UnknownSession(session_id))
    }

    pub fn checkpoints(&self, session_id: SessionId) -> Result<Vec<Checkpoint>, SessionError> {
        lock(&self.inner.sessions)
            .get(&session_id)
            .map(|s| s.checkpoints.clone())
            .ok_or(SessionError::UnknownSession(session_id))
    }

    pub fn test_result(
        &self,
        session_id: SessionId,
    ) -> Result<Option<TestCheckpointResult>, SessionError> {
        lock(&self.inner.sessions)
            .get(&session_id)
            .map(|s| s.test_result.clone())
            .ok_or(SessionError::UnknownSession(session_id))
    }
}

impl Inner {
    fn reserve(&self, room: &RoomKey) -> Result<Reservation<'_>, SessionError> {
        let sessions = lock(&self.sessions);
        let mut starting = lock(&self.starting);
        let occupied = sessions
            .values()
            .any(|s| s.holds_room() && s.session.room() == *room);
        if occupied || !starting.insert(room.clone()) {
            warn!("Lecture start refused: {} is occupied", room);
            return Err(SessionError::SessionConflict(room.clone()));
        }
        Ok(Reservation {
            inner: self,
            room: room.clone(),
        })
    }

    fn room_in_use(&self, room: &RoomKey) -> bool {
        let occupied = lock(&self.sessions)
            .values()
            .any(|s| s.holds_room() && s.session.room() == *room);
        occupied || lock(&self.starting).contains(room)
    }

    fn accept_checkpoint(&self, checkpoint: Checkpoint) {
        let session_id = checkpoint.session_id;
        let event = {
            let mut sessions = lock(&self.sessions);
            match sessions.get_mut(&session_id).filter(|s| s.is_active()) {
                Some(store) => match store.record_checkpoint(checkpoint) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Session {} checkpoint rejected: {}", session_id, e);
                        return;
                    }
                },
                None => discard(session_id, "checkpoint"),
            }
        };
        self.emit(&event);
    }

    fn accept_test_result(&self, session_id: SessionId, result: TestCheckpointResult) {
        let event = {
            let mut sessions = lock(&self.sessions);
            match sessions.get_mut(&session_id).filter(|s| s.is_active()) {
                Some(store) => {
                    if let TestCheckpointResult::Failed(e) = &result {
                        error!("Session {} startup checkpoint failed: {}", session_id, e);
                    }
                    store.test_result = Some(result.clone());
                    SessionEvent::TestCheckpoint { session_id, result }
                }
                None => discard(session_id, "test_checkpoint"),
            }
        };
        self.emit(&event);
    }

    fn accept_sample(&self, sample: AttentivenessSample) {
        let session_id = sample.session_id;
        let stale = {
            let sessions = lock(&self.sessions);
            match sessions.get(&session_id).filter(|s| s.is_active()) {
                Some(store) => {
                    store.monitor.record(sample);
                    None
                }
                None => Some(discard(session_id, "attentiveness_sample")),
            }
        };
        if let Some(event) = stale {
            self.emit(&event);
        }
    }

    fn finish_assessment(
        &self,
        session_id: SessionId,
        submission: Option<&AssessmentSubmission>,
    ) -> Result<AssessmentResult, SessionError> {
        let (result, from) = {
            let mut sessions = lock(&self.sessions);
            let store = sessions
                .get_mut(&session_id)
                .ok_or(SessionError::UnknownSession(session_id))?;
            if store.session.state != SessionState::Test {
                return Err(SessionError::NoAssessment(session_id));
            }
            let assessment = store
                .assessment
                .as_ref()
                .ok_or(SessionError::NoAssessment(session_id))?;
            let result = match submission {
                Some(submission) => assessment.score(submission),
                None => assessment.timed_out(),
            };
            let from = store.session.transition(SessionState::Completed)?;
            (result, from)
        };
        self.complete(session_id);

        if result.timed_out {
            info!("Session {} assessment timed out", session_id);
        } else {
            info!(
                "Session {} assessment scored {}/{}",
                session_id, result.score, result.total_questions
            );
        }
        self.emit_all(vec![
            SessionEvent::StateChanged {
                session_id,
                from,
                to: SessionState::Completed,
            },
            SessionEvent::AssessmentFinished {
                session_id,
                result: result.clone(),
            },
        ]);
        Ok(result)
    }

    /// Discard the session-scoped store, keeping the session in history
    fn complete(&self, session_id: SessionId) {
        let store = lock(&self.sessions).remove(&session_id);
        if let Some(store) = store {
            let mut history = lock(&self.history);
            history.push_back(store.session.clone());
            while history.len() > self.config.history_limit {
                history.pop_front();
            }
            debug!("Session {} store discarded", session_id);
        }
    }

    fn emit(&self, event: &SessionEvent) {
        let observers = lock(&self.observers).clone();
        for observer in observers {
            observer(event);
        }
    }

    fn emit_all(&self, events: Vec<SessionEvent>) {
        for event in &events {
            self.emit(event);
        }
    }
}

fn discard(session_id: SessionId, source: &'static str) -> SessionEvent {
    metrics::counter!("stale_responses_discarded_total").increment(1);
    debug!("Discarded stale {} for session {}", source, session_id);
    SessionEvent::StaleDiscarded { session_id, source }
}

fn soft_failure(session_id: SessionId, operation: &'static str, error: &impl ToString) -> SessionEvent {
    SessionEvent::SoftFailure {
        session_id,
        operation,
        error: error.to_string(),
    }
}

/// Returns the last error, if any record failed
async fn persist_attendance(
    api: &dyn LectureApi,
    records: &[AttendanceRecord],
) -> Option<lecture_api::ApiError> {
    let mut failed = 0;
    let mut last_error = None;
    for record in records {
        if let Err(e) = api.mark_attendance(&record.name, record.status).await {
            failed += 1;
            last_error = Some(e);
        }
    }
    if failed > 0 {
        warn!("{} of {} attendance records not persisted", failed, records.len());
    }
    last_error
}

fn checkpoint_sink(inner: Weak<Inner>) -> CheckpointSink {
    Arc::new(move |checkpoint: Checkpoint| {
        if let Some(inner) = inner.upgrade() {
            inner.accept_checkpoint(checkpoint);
        }
    })
}

fn test_result_sink(inner: Weak<Inner>, session_id: SessionId) -> TestResultSink {
    Arc::new(move |result: TestCheckpointResult| {
        if let Some(inner) = inner.upgrade() {
            inner.accept_test_result(session_id, result);
        }
    })
}

fn sample_sink(inner: Weak<Inner>) -> attentiveness::SampleSink {
    Arc::new(move |sample: AttentivenessSample| {
        if let Some(inner) = inner.upgrade() {
            inner.accept_sample(sample);
        }
    })
}

fn assessment_timer(inner: Weak<Inner>, session_id: SessionId, duration: Duration) -> PeriodicTask {
    PeriodicTask::start(
        format!("assessment-{}", session_id),
        Schedule::once(duration),
        move |_| {
            if let Some(inner) = inner.upgrade() {
                if let Err(e) = inner.finish_assessment(session_id, None) {
                    debug!("Assessment timeout for session {} ignored: {}", session_id, e);
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendance::AttendanceError;
    use camera_capture::{CaptureConfig, SyntheticProvider};
    use event_bus::{BusConfig, LoopbackBroker, LoopbackTransport};
    use lecture_api::{ApiCall, ApiError, DetectedFace, MockLectureApi, RecognizedStudent};

    use crate::assessment::Question;

    struct Harness {
        controller: SessionController,
        provider: Arc<SyntheticProvider>,
        api: Arc<MockLectureApi>,
        broker: Arc<LoopbackBroker>,
        events: Arc<Mutex<Vec<SessionEvent>>>,
    }

    impl Harness {
        fn events(&self) -> Vec<SessionEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    async fn harness(roster: &[&str]) -> Harness {
        let provider = Arc::new(SyntheticProvider::new());
        let camera = Arc::new(FrameCaptureClient::new(provider.clone(), CaptureConfig::default()));
        let api = Arc::new(MockLectureApi::with_roster(MockLectureApi::roster_of(roster)));

        let broker = LoopbackBroker::new();
        let bus = Arc::new(RealtimeEventBus::new(
            Arc::new(LoopbackTransport::new(&broker)),
            BusConfig::default(),
        ));
        bus.connect().await.unwrap();
        bus.watch_connection().wait_for(|c| *c).await.unwrap();

        let controller =
            SessionController::new(camera, api.clone(), Some(bus), ControllerConfig::default());
        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = Arc::clone(&events);
            controller.add_observer(Arc::new(move |event: &SessionEvent| {
                events.lock().unwrap().push(event.clone());
            }));
        }

        Harness {
            controller,
            provider,
            api,
            broker,
            events,
        }
    }

    fn lecture() -> LectureConfig {
        LectureConfig::new("10", "A", "Physics", "Optics")
    }

    fn status_of(outcome: &SessionOutcome, name: &str) -> AttendanceStatus {
        outcome
            .attendance
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.status)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_alice_bob_carol_scenario() {
        let h = harness(&["Alice", "Bob", "Carol"]).await;
        h.api.push_recognition(Ok(vec![RecognizedStudent::new("Alice", 0.9)]));
        h.api.push_recognition(Ok(vec![RecognizedStudent::new("Bob", 0.8)]));
        h.api.push_recognition(Ok(vec![]));

        let id = h.controller.start(lecture().with_interval(10)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(h.controller.checkpoints(id).unwrap().len(), 3);

        let outcome = h.controller.end(id).await.unwrap();
        assert_eq!(h.api.checkpoint_numbers(id), vec![1, 2, 3]);
        assert_eq!(status_of(&outcome, "Alice"), AttendanceStatus::Present);
        assert_eq!(status_of(&outcome, "Bob"), AttendanceStatus::Present);
        assert_eq!(status_of(&outcome, "Carol"), AttendanceStatus::Absent);
        assert_eq!(outcome.summary.total_checkpoints, 3);
        assert_eq!(outcome.session.state, SessionState::Completed);
        assert!(outcome.session.ended_at.is_some());
        assert!(!outcome.assessment_pending);

        let marked: Vec<ApiCall> = h
            .api
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ApiCall::Mark { .. }))
            .collect();
        assert_eq!(marked.len(), 3);

        let result = h.controller.test_result(id);
        assert_eq!(result, Err(SessionError::UnknownSession(id)));
        assert_eq!(h.controller.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_test_checkpoint_surfaced_to_observers() {
        let h = harness(&["Alice"]).await;
        h.api.push_recognition(Ok(vec![RecognizedStudent::new("Alice", 0.9)]));
        let id = h.controller.start(lecture()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(matches!(
            h.controller.test_result(id).unwrap(),
            Some(TestCheckpointResult::Completed(ref c)) if c.checkpoint_number == 1
        ));
        assert!(h.events().iter().any(|e| matches!(
            e,
            SessionEvent::CheckpointRecorded { checkpoint_number: 1, is_test: true, accepted: 1, .. }
        )));
        h.controller.end(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_double_start_conflicts() {
        let h = harness(&[]).await;
        let id = h.controller.start(lecture()).await.unwrap();

        assert_eq!(
            h.controller.start(lecture()).await,
            Err(SessionError::SessionConflict(RoomKey::new("10", Some("A"))))
        );
        assert_eq!(h.provider.acquire_count(), 1);

        let other = h
            .controller
            .start(LectureConfig::new("10", "B", "Physics", "Optics"))
            .await
            .unwrap();
        assert_ne!(id, other);
        assert_eq!(h.controller.current().len(), 2);
        h.controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_starts_one_wins() {
        let h = harness(&[]).await;
        let (a, b) = tokio::join!(h.controller.start(lecture()), h.controller.start(lecture()));
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(h.controller.current().len(), 1);
        h.controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_camera_unavailable_never_activates() {
        let h = harness(&[]).await;
        h.provider.fail_all();

        let result = h.controller.start(lecture()).await;
        assert!(matches!(result, Err(SessionError::CameraUnavailable(_))));
        assert!(!h.api.calls().iter().any(|c| matches!(c, ApiCall::Start(_))));
        assert!(h.controller.current().is_empty());
    }

    #[tokio::test]
    async fn test_zero_sampling_interval_rejected_before_camera() {
        let provider = Arc::new(SyntheticProvider::new());
        let camera = Arc::new(FrameCaptureClient::new(provider.clone(), CaptureConfig::default()));
        let api = Arc::new(MockLectureApi::new());
        let config = ControllerConfig {
            monitor: MonitorConfig {
                interval_ms: 0,
                ..MonitorConfig::default()
            },
            ..ControllerConfig::default()
        };
        let controller = SessionController::new(camera, api.clone(), None, config);

        let result = controller.start(lecture()).await;
        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
        assert_eq!(provider.acquire_count(), 0);
        assert!(api.calls().is_empty());
        assert!(controller.current().is_empty());
    }

    #[tokio::test]
    async fn test_backend_refusal_releases_camera() {
        let h = harness(&[]).await;
        h.api.fail_start(ApiError::Http("connection refused".into()));

        let result = h.controller.start(lecture()).await;
        assert!(matches!(result, Err(SessionError::Api(_))));
        assert_eq!(h.provider.release_count(), 1);
        assert!(h.controller.current().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_leaves_camera_alone() {
        let h = harness(&[]).await;
        let id = h.controller.start(lecture()).await.unwrap();

        assert_eq!(
            h.controller.end(id + 100).await.unwrap_err(),
            SessionError::UnknownSession(id + 100)
        );
        assert_eq!(h.provider.release_count(), 0);
        assert_eq!(h.controller.get(id).unwrap().state, SessionState::Active);
        h.controller.end(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_camera_released_exactly_once() {
        let h = harness(&["Alice"]).await;
        let id = h.controller.start(lecture()).await.unwrap();

        h.controller.end(id).await.unwrap();
        assert_eq!(h.provider.release_count(), 1);
        assert_eq!(
            h.controller.end(id).await.unwrap_err(),
            SessionError::UnknownSession(id)
        );
        h.controller.shutdown().await;
        assert_eq!(h.provider.release_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_samples_empty_report() {
        let h = harness(&["Alice"]).await;
        let id = h.controller.start(lecture()).await.unwrap();
        let outcome = h.controller.end(id).await.unwrap();

        assert!(outcome.report.is_empty());
        assert_eq!(status_of(&outcome, "Alice"), AttendanceStatus::Absent);
    }

    #[tokio::test]
    async fn test_lifecycle_broadcasts_to_room() {
        let h = harness(&[]).await;
        let id = h.controller.start(lecture()).await.unwrap();
        h.controller.end(id).await.unwrap();

        let topic = RoomKey::new("10", Some("A")).topic();
        let published = h.broker.published_topics();
        assert_eq!(published.iter().filter(|t| **t == topic).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_response_after_next_session_started() {
        let h = harness(&["Alice"]).await;
        h.api.hold_background();
        h.api.push_recognition(Ok(vec![RecognizedStudent::new("Alice", 0.9)]));

        let s1 = h.controller.start(lecture()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(h.api.checkpoint_numbers(s1), vec![1]);

        let outcome = h.controller.end(s1).await.unwrap();
        assert_eq!(status_of(&outcome, "Alice"), AttendanceStatus::Absent);

        let s2 = h.controller.start(lecture()).await.unwrap();
        h.api.release_held(1);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(h.events().iter().any(|e| matches!(
            e,
            SessionEvent::StaleDiscarded { session_id, source: "checkpoint" } if *session_id == s1
        )));
        assert_eq!(h.controller.attendance_summary(s2).unwrap().total_checkpoints, 0);
        assert!(h.controller.checkpoints(s2).unwrap().is_empty());

        h.api.release_held(8);
        h.controller.end(s2).await.unwrap();
    }

    #[tokio::test]
    async fn test_roster_failure_is_soft() {
        let h = harness(&["Alice"]).await;
        h.api.fail_roster(ApiError::Http("timeout".into()));

        let id = h.controller.start(lecture()).await.unwrap();
        assert!(h.events().iter().any(|e| matches!(
            e,
            SessionEvent::SoftFailure { operation: "fetch_roster", .. }
        )));
        assert!(h.controller.roster(id).unwrap().is_empty());
        h.controller.end(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_override_wins_at_finalize() {
        let h = harness(&["Alice", "Bob"]).await;
        let id = h.controller.start(lecture()).await.unwrap();

        h.controller
            .override_attendance(id, 2, AttendanceStatus::Present, Some("arrived late".into()))
            .await
            .unwrap();
        assert_eq!(
            h.controller
                .override_attendance(id, 99, AttendanceStatus::Present, None)
                .await,
            Err(SessionError::Attendance(AttendanceError::NotRostered(99)))
        );

        let outcome = h.controller.end(id).await.unwrap();
        let bob = outcome.attendance.iter().find(|r| r.name == "Bob").unwrap();
        assert_eq!(bob.status, AttendanceStatus::Present);
        assert!(bob.teacher_override);
        assert!(h
            .api
            .calls()
            .iter()
            .any(|c| matches!(c, ApiCall::Override(req) if req.student_id == 2)));
    }

    #[tokio::test]
    async fn test_recognize_now_bypasses_attendance() {
        let h = harness(&["Alice"]).await;
        h.api.set_faces(RecognizeFacesResponse {
            faces: vec![DetectedFace {
                name: "Alice".to_string(),
                confidence: 0.95,
                location: None,
            }],
        });
        let id = h.controller.start(lecture()).await.unwrap();

        let response = h.controller.recognize_now(id).await.unwrap();
        assert_eq!(response.faces.len(), 1);
        let outcome = h.controller.end(id).await.unwrap();
        assert_eq!(status_of(&outcome, "Alice"), AttendanceStatus::Absent);
    }

    fn assessment() -> Assessment {
        Assessment {
            questions: vec![
                Question {
                    prompt: "Focal length of a plane mirror?".to_string(),
                    options: vec!["Zero".to_string(), "Infinite".to_string()],
                    answer: 1,
                },
                Question {
                    prompt: "Unit of power of a lens?".to_string(),
                    options: vec!["Dioptre".to_string(), "Metre".to_string()],
                    answer: 0,
                },
            ],
            duration_minutes: Some(1),
        }
    }

    #[tokio::test]
    async fn test_assessment_submission_completes_session() {
        let h = harness(&[]).await;
        let id = h.controller.start(lecture()).await.unwrap();
        h.controller.attach_assessment(id, assessment()).unwrap();

        let outcome = h.controller.end(id).await.unwrap();
        assert!(outcome.assessment_pending);
        assert_eq!(outcome.session.state, SessionState::Test);
        assert_eq!(h.controller.get(id).unwrap().state, SessionState::Test);
        assert_eq!(h.provider.release_count(), 1);

        // The room is free while the assessment runs
        let next = h.controller.start(lecture()).await.unwrap();

        let result = h
            .controller
            .submit_assessment(
                id,
                &AssessmentSubmission {
                    student_id: None,
                    answers: vec![Some(1), Some(1)],
                },
            )
            .unwrap();
        assert_eq!(result.score, 1);
        assert!(h.controller.get(id).is_none());
        assert_eq!(
            h.controller
                .submit_assessment(id, &AssessmentSubmission { student_id: None, answers: vec![] }),
            Err(SessionError::UnknownSession(id))
        );
        h.controller.end(next).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_assessment_timeout_completes_session() {
        let h = harness(&[]).await;
        let id = h.controller.start(lecture()).await.unwrap();
        h.controller.attach_assessment(id, assessment()).unwrap();
        h.controller.end(id).await.unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(h.controller.get(id).is_none());
        assert!(h.events().iter().any(|e| matches!(
            e,
            SessionEvent::AssessmentFinished { result, .. } if result.timed_out
        )));
        assert_eq!(h.controller.history().last().unwrap().state, SessionState::Completed);
    }

    #[tokio::test]
    async fn test_submit_without_assessment() {
        let h = harness(&[]).await;
        let id = h.controller.start(lecture()).await.unwrap();
        let submission = AssessmentSubmission {
            student_id: None,
            answers: vec![],
        };
        assert_eq!(
            h.controller.submit_assessment(id, &submission),
            Err(SessionError::NoAssessment(id))
        );
        h.controller.end(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_ends_every_session() {
        let h = harness(&[]).await;
        h.controller.start(lecture()).await.unwrap();
        h.controller
            .start(LectureConfig::new("11", "B", "Maths", "Algebra"))
            .await
            .unwrap();

        assert_eq!(h.controller.shutdown().await, 2);
        assert!(h.controller.current().is_empty());
        assert_eq!(h.provider.release_count(), 2);
    }
}
