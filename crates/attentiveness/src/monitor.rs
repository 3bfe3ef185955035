//! Attentiveness Monitor Implementation

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use camera_capture::{CameraError, CameraStream, FrameCaptureClient};
use lecture_api::{LectureApi, SessionId};
use periodic_task::{PeriodicTask, Schedule};
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::report::{AttentivenessSample, SessionReport};
use crate::MonitorError;

/// Receives every sample the monitor produces
pub type SampleSink = Arc<dyn Fn(AttentivenessSample) + Send + Sync>;

struct RunState {
    session_id: SessionId,
    stream: Arc<CameraStream>,
    camera: Arc<FrameCaptureClient>,
    api: Arc<dyn LectureApi>,
    on_sample: SampleSink,
    in_flight: AtomicBool,
    skipped: AtomicU64,
}

struct Run {
    state: Arc<RunState>,
    timer: PeriodicTask,
}

/// Samples attentiveness on an independent timer
pub struct AttentivenessMonitor {
    camera: Arc<FrameCaptureClient>,
    api: Arc<dyn LectureApi>,
    config: MonitorConfig,
    run: Mutex<Option<Run>>,
    /// Accepted samples of the most recent session
    samples: Mutex<(Option<SessionId>, Vec<AttentivenessSample>)>,
}

impl AttentivenessMonitor {
    pub fn new(
        camera: Arc<FrameCaptureClient>,
        api: Arc<dyn LectureApi>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            camera,
            api,
            config,
            run: Mutex::new(None),
            samples: Mutex::new((None, Vec::new())),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Start sampling. Clears samples of any previous session.
    pub fn start(
        &self,
        session_id: SessionId,
        stream: Arc<CameraStream>,
        on_sample: SampleSink,
    ) -> Result<(), MonitorError> {
        self.config.validate()?;
        let mut run = lock(&self.run);
        if let Some(existing) = run.as_ref() {
            return Err(MonitorError::AlreadyRunning(existing.state.session_id));
        }

        *lock(&self.samples) = (Some(session_id), Vec::new());

        let state = Arc::new(RunState {
            session_id,
            stream,
            camera: Arc::clone(&self.camera),
            api: Arc::clone(&self.api),
            on_sample,
            in_flight: AtomicBool::new(false),
            skipped: AtomicU64::new(0),
        });
        let timer = {
            let state = Arc::clone(&state);
            PeriodicTask::start(
                format!("attentiveness-{}", session_id),
                Schedule::every(self.config.interval()),
                move |_| on_tick(&state),
            )
        };

        info!(
            "Attentiveness sampling started for session {} every {:?}",
            session_id,
            self.config.interval()
        );
        *run = Some(Run { state, timer });
        Ok(())
    }

    /// Cancel the timer. Idempotent; samples stay available for the report.
    pub fn stop(&self) -> bool {
        match lock(&self.run).take() {
            Some(run) => {
                run.timer.cancel();
                info!(
                    "Attentiveness sampling stopped for session {} ({} ticks skipped)",
                    run.state.session_id,
                    run.state.skipped.load(Ordering::Acquire)
                );
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.run).is_some()
    }

    /// Keep a sample for the report. Samples of other sessions are refused.
    pub fn record(&self, sample: AttentivenessSample) -> bool {
        let mut guard = lock(&self.samples);
        if guard.0 != Some(sample.session_id) {
            debug!(
                "Attentiveness sample for session {} refused",
                sample.session_id
            );
            return false;
        }
        guard.1.push(sample);
        true
    }

    pub fn samples(&self) -> Vec<AttentivenessSample> {
        lock(&self.samples).1.clone()
    }

    pub fn sample_count(&self) -> usize {
        lock(&self.samples).1.len()
    }

    /// Report over the recorded samples of the most recent session
    pub fn compile_report(&self) -> Option<SessionReport> {
        let guard = lock(&self.samples);
        let session_id = guard.0?;
        let report = SessionReport::compile(session_id, &guard.1, &self.config);
        info!(
            "Attentiveness report for session {}: {} samples, {} students",
            session_id,
            guard.1.len(),
            report.per_student.len()
        );
        Some(report)
    }
}

impl Drop for AttentivenessMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn on_tick(state: &Arc<RunState>) {
    if state.in_flight.swap(true, Ordering::AcqRel) {
        state.skipped.fetch_add(1, Ordering::AcqRel);
        debug!("Session {} attentiveness tick skipped", state.session_id);
        return;
    }

    let state = Arc::clone(state);
    tokio::spawn(async move {
        sample_once(&state).await;
        state.in_flight.store(false, Ordering::Release);
    });
}

async fn sample_once(state: &RunState) {
    let image = match state.camera.capture_frame(&state.stream).await {
        Ok(image) => image,
        Err(CameraError::FrameNotReady) => return,
        Err(e) => {
            warn!("Session {} attentiveness capture failed: {}", state.session_id, e);
            return;
        }
    };

    match state.api.analyze_emotion(&image, None).await {
        Ok(analysis) => {
            let sample = AttentivenessSample::from_analysis(state.session_id, &analysis);
            debug!(
                "Session {} sample: {} attentive={} ({:?})",
                state.session_id, sample.emotion_label, sample.is_attentive, sample.student_id
            );
            metrics::counter!("attentiveness_samples_total").increment(1);
            (state.on_sample)(sample);
        }
        Err(e) => warn!("Session {} emotion analysis failed: {}", state.session_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::{CaptureConfig, SyntheticProvider};
    use lecture_api::{ApiError, EmotionAnalysis, MockLectureApi};
    use std::time::Duration;

    async fn setup() -> (
        Arc<AttentivenessMonitor>,
        Arc<MockLectureApi>,
        camera_capture::StreamLease,
    ) {
        let provider = Arc::new(SyntheticProvider::new());
        let camera = Arc::new(FrameCaptureClient::new(provider, CaptureConfig::default()));
        let lease = camera.acquire(None).await.unwrap();
        let api = Arc::new(MockLectureApi::new());
        let monitor = Arc::new(AttentivenessMonitor::new(
            camera,
            api.clone(),
            MonitorConfig::single_subject(),
        ));
        (monitor, api, lease)
    }

    fn recording_sink(monitor: &Arc<AttentivenessMonitor>) -> SampleSink {
        let monitor = Arc::clone(monitor);
        Arc::new(move |sample: AttentivenessSample| {
            monitor.record(sample);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_every_interval() {
        let (monitor, _api, lease) = setup().await;
        monitor.start(1, lease.share(), recording_sink(&monitor)).unwrap();

        tokio::time::sleep(Duration::from_millis(7000)).await;
        monitor.stop();
        assert_eq!(monitor.sample_count(), 3);

        let report = monitor.compile_report().unwrap();
        let you = report.student("You").unwrap();
        assert_eq!(you.sample_count, 3);
        assert_eq!(you.attentive_percentage, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_refuses_to_start() {
        let provider = Arc::new(SyntheticProvider::new());
        let camera = Arc::new(FrameCaptureClient::new(provider, CaptureConfig::default()));
        let lease = camera.acquire(None).await.unwrap();
        let monitor = Arc::new(AttentivenessMonitor::new(
            camera,
            Arc::new(MockLectureApi::new()),
            MonitorConfig {
                interval_ms: 0,
                ..MonitorConfig::default()
            },
        ));

        let result = monitor.start(1, lease.share(), recording_sink(&monitor));
        assert!(matches!(result, Err(MonitorError::InvalidConfig(_))));
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_analysis_is_soft() {
        let (monitor, api, lease) = setup().await;
        api.push_emotion(Err(ApiError::Http("timeout".into())));
        api.push_emotion(Ok(EmotionAnalysis {
            is_attentive: false,
            ..MockLectureApi::attentive_sample()
        }));
        monitor.start(1, lease.share(), recording_sink(&monitor)).unwrap();

        tokio::time::sleep(Duration::from_millis(5000)).await;
        monitor.stop();
        let samples = monitor.samples();
        assert_eq!(samples.len(), 1);
        assert!(!samples[0].is_attentive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_samples_after_stop() {
        let (monitor, _api, lease) = setup().await;
        monitor.start(1, lease.share(), recording_sink(&monitor)).unwrap();
        assert!(monitor.stop());
        assert!(!monitor.stop());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(monitor.sample_count(), 0);
        assert!(monitor.compile_report().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_refuses_other_session() {
        let (monitor, _api, lease) = setup().await;
        monitor.start(5, lease.share(), Arc::new(|_: AttentivenessSample| {})).unwrap();

        let stale = AttentivenessSample::from_analysis(4, &MockLectureApi::attentive_sample());
        assert!(!monitor.record(stale));
        monitor.stop();
    }
}
