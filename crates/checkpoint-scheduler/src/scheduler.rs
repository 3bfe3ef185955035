//! Checkpoint Scheduler Implementation

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use attendance::Checkpoint;
use camera_capture::{CameraError, CameraStream, FrameCaptureClient};
use lecture_api::{LectureApi, SessionId};
use periodic_task::{PeriodicTask, Schedule};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::CheckpointError;

/// Receives every delivered checkpoint, in number order
pub type CheckpointSink = Arc<dyn Fn(Checkpoint) + Send + Sync>;

/// Receives the outcome of the startup test checkpoint
pub type TestResultSink = Arc<dyn Fn(TestCheckpointResult) + Send + Sync>;

/// Configuration for the checkpoint scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Time between interval checkpoints (default: 5 minutes)
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Delay of the test checkpoint after start (default: 3 s)
    #[serde(with = "duration_millis")]
    pub first_checkpoint_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            first_checkpoint_delay: Duration::from_secs(3),
        }
    }
}

impl SchedulerConfig {
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }
}

/// Outcome of the startup test checkpoint
#[derive(Debug, Clone, PartialEq)]
pub enum TestCheckpointResult {
    Completed(Checkpoint),
    Failed(CheckpointError),
}

/// State of one scheduler run, shared with in-flight captures
struct RunState {
    session_id: SessionId,
    stream: Arc<CameraStream>,
    camera: Arc<FrameCaptureClient>,
    api: Arc<dyn LectureApi>,
    on_checkpoint: CheckpointSink,
    on_test_result: TestResultSink,
    /// Set while a capture/recognition round trip is outstanding
    in_flight: AtomicBool,
    /// Next checkpoint number to allocate
    next_number: AtomicU32,
    skipped: AtomicU64,
}

struct Run {
    state: Arc<RunState>,
    interval_timer: PeriodicTask,
    test_timer: PeriodicTask,
}

/// Checkpoint scheduler for one session at a time
pub struct CheckpointScheduler {
    camera: Arc<FrameCaptureClient>,
    api: Arc<dyn LectureApi>,
    config: SchedulerConfig,
    run: Mutex<Option<Run>>,
}

impl CheckpointScheduler {
    pub fn new(
        camera: Arc<FrameCaptureClient>,
        api: Arc<dyn LectureApi>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            camera,
            api,
            config,
            run: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Start checkpoints for a session over a shared stream handle
    pub fn start(
        &self,
        session_id: SessionId,
        stream: Arc<CameraStream>,
        on_checkpoint: CheckpointSink,
        on_test_result: TestResultSink,
    ) -> Result<(), CheckpointError> {
        let mut run = self.lock_run();
        if let Some(existing) = run.as_ref() {
            return Err(CheckpointError::AlreadyRunning(existing.state.session_id));
        }

        let state = Arc::new(RunState {
            session_id,
            stream,
            camera: Arc::clone(&self.camera),
            api: Arc::clone(&self.api),
            on_checkpoint,
            on_test_result,
            in_flight: AtomicBool::new(false),
            next_number: AtomicU32::new(1),
            skipped: AtomicU64::new(0),
        });

        let test_timer = {
            let state = Arc::clone(&state);
            PeriodicTask::start(
                format!("checkpoint-test-{}", session_id),
                Schedule::once(self.config.first_checkpoint_delay),
                move |_| on_tick(&state, true),
            )
        };
        let interval_timer = {
            let state = Arc::clone(&state);
            PeriodicTask::start(
                format!("checkpoint-{}", session_id),
                Schedule::every(self.config.interval),
                move |_| on_tick(&state, false),
            )
        };

        info!(
            "Checkpoints started for session {} (interval {:?}, test after {:?})",
            session_id, self.config.interval, self.config.first_checkpoint_delay
        );
        *run = Some(Run {
            state,
            interval_timer,
            test_timer,
        });
        Ok(())
    }

    /// Cancel both timers. In-flight checkpoints still deliver. Idempotent.
    pub fn stop(&self) -> bool {
        match self.lock_run().take() {
            Some(run) => {
                run.test_timer.cancel();
                run.interval_timer.cancel();
                info!(
                    "Checkpoints stopped for session {} ({} issued, {} ticks skipped)",
                    run.state.session_id,
                    run.state.next_number.load(Ordering::Acquire) - 1,
                    run.state.skipped.load(Ordering::Acquire)
                );
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_run().is_some()
    }

    /// Session of the current run
    pub fn session_id(&self) -> Option<SessionId> {
        self.lock_run().as_ref().map(|r| r.state.session_id)
    }

    /// Ticks skipped because a capture was in flight
    pub fn skipped_ticks(&self) -> u64 {
        self.lock_run()
            .as_ref()
            .map(|r| r.state.skipped.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Checkpoint numbers allocated so far in the current run
    pub fn issued(&self) -> u32 {
        self.lock_run()
            .as_ref()
            .map(|r| r.state.next_number.load(Ordering::Acquire) - 1)
            .unwrap_or(0)
    }

    fn lock_run(&self) -> std::sync::MutexGuard<'_, Option<Run>> {
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CheckpointScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn on_tick(state: &Arc<RunState>, is_test: bool) {
    if state.in_flight.swap(true, Ordering::AcqRel) {
        state.skipped.fetch_add(1, Ordering::AcqRel);
        metrics::counter!("checkpoint_ticks_skipped_total").increment(1);
        debug!(
            "Session {} checkpoint tick skipped: capture in flight",
            state.session_id
        );
        if is_test {
            (state.on_test_result)(TestCheckpointResult::Failed(CheckpointError::Busy));
        }
        return;
    }

    let state = Arc::clone(state);
    tokio::spawn(async move {
        run_checkpoint(&state, is_test).await;
        state.in_flight.store(false, Ordering::Release);
    });
}

async fn run_checkpoint(state: &RunState, is_test: bool) {
    let image = match state.camera.capture_frame(&state.stream).await {
        Ok(image) => image,
        Err(CameraError::FrameNotReady) => {
            debug!("Session {} checkpoint tick: frame not ready", state.session_id);
            if is_test {
                (state.on_test_result)(TestCheckpointResult::Failed(CheckpointError::FrameNotReady));
            }
            return;
        }
        Err(e) => {
            warn!("Session {} checkpoint capture failed: {}", state.session_id, e);
            if is_test {
                (state.on_test_result)(TestCheckpointResult::Failed(CheckpointError::Camera(e)));
            }
            return;
        }
    };

    // Allocated only after a successful capture so numbers stay gapless
    let number = state.next_number.fetch_add(1, Ordering::AcqRel);
    debug!(
        "Session {} checkpoint {} captured ({} bytes)",
        state.session_id,
        number,
        image.len()
    );

    let checkpoint = match state
        .api
        .background_attendance(state.session_id, number, &image)
        .await
    {
        Ok(response) => {
            info!(
                "Session {} checkpoint {}: {} recognized",
                state.session_id, number, response.recognized_count
            );
            let checkpoint = Checkpoint::new(state.session_id, number, is_test, response.students);
            if is_test {
                (state.on_test_result)(TestCheckpointResult::Completed(checkpoint.clone()));
            }
            checkpoint
        }
        Err(e) => {
            if is_test {
                error!("Session {} test checkpoint failed: {}", state.session_id, e);
                (state.on_test_result)(TestCheckpointResult::Failed(CheckpointError::Api(e)));
            } else {
                warn!("Session {} checkpoint {} failed: {}", state.session_id, number, e);
            }
            Checkpoint::empty(state.session_id, number, is_test)
        }
    };

    metrics::counter!("checkpoints_delivered_total").increment(1);
    (state.on_checkpoint)(checkpoint);
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::{CaptureConfig, ReadyState, StreamLease, SyntheticProvider};
    use lecture_api::{ApiError, MockLectureApi, RecognizedStudent};
    use proptest::prelude::*;

    struct Harness {
        provider: Arc<SyntheticProvider>,
        api: Arc<MockLectureApi>,
        scheduler: CheckpointScheduler,
        lease: StreamLease,
        delivered: Arc<Mutex<Vec<Checkpoint>>>,
        tests: Arc<Mutex<Vec<TestCheckpointResult>>>,
    }

    impl Harness {
        async fn new(interval_secs: u64) -> Self {
            let provider = Arc::new(SyntheticProvider::new());
            let camera = Arc::new(FrameCaptureClient::new(
                provider.clone(),
                CaptureConfig::default(),
            ));
            let lease = camera.acquire(None).await.unwrap();
            let api = Arc::new(MockLectureApi::new());
            let scheduler = CheckpointScheduler::new(
                camera,
                api.clone(),
                SchedulerConfig::with_interval(Duration::from_secs(interval_secs)),
            );
            Self {
                provider,
                api,
                scheduler,
                lease,
                delivered: Arc::new(Mutex::new(Vec::new())),
                tests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn start(&self, session_id: SessionId) {
            let delivered = Arc::clone(&self.delivered);
            let tests = Arc::clone(&self.tests);
            self.scheduler
                .start(
                    session_id,
                    self.lease.share(),
                    Arc::new(move |c: Checkpoint| delivered.lock().unwrap().push(c)),
                    Arc::new(move |r: TestCheckpointResult| tests.lock().unwrap().push(r)),
                )
                .unwrap();
        }

        fn numbers(&self) -> Vec<u32> {
            self.delivered
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.checkpoint_number)
                .collect()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_numbering_is_gapless() {
        let h = Harness::new(10).await;
        h.start(1);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(h.numbers(), vec![1, 2, 3, 4]);
        assert!(h.delivered.lock().unwrap()[0].is_test);
        assert!(h.delivered.lock().unwrap()[1..].iter().all(|c| !c.is_test));
        assert_eq!(h.scheduler.issued(), 4);
        h.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_ticks_skipped() {
        let h = Harness::new(10).await;
        h.api.set_latency(Duration::from_secs(25));
        h.start(1);

        // Test checkpoint in flight from 3 s to 28 s; ticks at 10 and 20 skip
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(h.scheduler.skipped_ticks(), 2);
        assert_eq!(h.numbers(), vec![1]);
        assert_eq!(h.api.checkpoint_numbers(1), vec![1, 2]);
        h.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_test_checkpoint_surfaced() {
        let h = Harness::new(10).await;
        h.api.push_recognition(Err(ApiError::Http("connection refused".into())));
        h.api.push_recognition(Ok(vec![RecognizedStudent::new("Alice", 0.9)]));
        h.start(1);

        tokio::time::sleep(Duration::from_secs(15)).await;
        let tests = h.tests.lock().unwrap().clone();
        assert_eq!(tests.len(), 1);
        assert!(matches!(tests[0], TestCheckpointResult::Failed(CheckpointError::Api(_))));

        let delivered = h.delivered.lock().unwrap().clone();
        assert_eq!(delivered.len(), 2);
        assert!(delivered[0].recognized.is_empty());
        assert_eq!(delivered[1].recognized[0].name, "Alice");
        h.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_not_ready_allocates_no_number() {
        let h = Harness::new(10).await;
        h.provider.set_ready_state(ReadyState::HaveMetadata);
        h.start(1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(
            h.tests.lock().unwrap().clone(),
            vec![TestCheckpointResult::Failed(CheckpointError::FrameNotReady)]
        );
        assert_eq!(h.scheduler.issued(), 0);

        h.provider.set_ready_state(ReadyState::HaveEnoughData);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.numbers(), vec![1]);
        assert!(!h.delivered.lock().unwrap()[0].is_test);
        h.scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_halts_ticks() {
        let h = Harness::new(10).await;
        h.start(1);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(h.scheduler.stop());
        assert!(!h.scheduler.stop());
        assert!(!h.scheduler.is_running());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.numbers(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_rejected_while_running() {
        let h = Harness::new(10).await;
        h.start(1);
        let result = h.scheduler.start(
            2,
            h.lease.share(),
            Arc::new(|_: Checkpoint| {}),
            Arc::new(|_: TestCheckpointResult| {}),
        );
        assert_eq!(result, Err(CheckpointError::AlreadyRunning(1)));
        h.scheduler.stop();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Each entry is one tick (test tick first): (frame ready, backend answers)
        #[test]
        fn prop_numbers_follow_captured_frames(
            ticks in proptest::collection::vec((any::<bool>(), any::<bool>()), 1..8)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();

            let (numbers, issued, calls, first_is_test) = runtime.block_on(async {
                let h = Harness::new(10).await;
                for (ready, answers) in &ticks {
                    if *ready {
                        h.api.push_recognition(if *answers {
                            Ok(vec![RecognizedStudent::new("Alice", 0.9)])
                        } else {
                            Err(ApiError::Http("timeout".into()))
                        });
                    }
                }
                h.start(1);

                // Test tick at 3 s, interval ticks at 10 s, 20 s, ...
                for (i, (ready, _)) in ticks.iter().enumerate() {
                    h.provider.set_ready_state(if *ready {
                        ReadyState::HaveEnoughData
                    } else {
                        ReadyState::HaveMetadata
                    });
                    let wait = if i == 0 { 4 } else if i == 1 { 7 } else { 10 };
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }

                let issued = h.scheduler.issued();
                h.scheduler.stop();
                let first_is_test = h.delivered.lock().unwrap().first().map(|c| c.is_test);
                (h.numbers(), issued, h.api.checkpoint_numbers(1), first_is_test)
            });

            let captured = ticks.iter().filter(|(ready, _)| *ready).count() as u32;
            let expected: Vec<u32> = (1..=captured).collect();
            prop_assert_eq!(&numbers, &expected);
            prop_assert_eq!(&calls, &expected);
            prop_assert_eq!(issued, captured);
            if captured > 0 {
                prop_assert_eq!(first_is_test, Some(ticks[0].0));
            }
        }
    }
}
