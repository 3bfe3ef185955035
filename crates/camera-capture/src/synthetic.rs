//! Synthetic capture provider emitting generated frames (no hardware required)

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::debug;

use crate::frame::VideoFrame;
use crate::provider::{CaptureConstraints, CaptureProvider, DeviceInfo, Facing};
use crate::stream::{CameraStream, ReadyState, VideoSurface, VideoTrack};
use crate::CameraError;

const FRAME_WIDTH: u32 = 64;
const FRAME_HEIGHT: u32 = 48;

/// Test double for camera hardware with failure injection and call counters
pub struct SyntheticProvider {
    devices: Vec<DeviceInfo>,
    failing: Mutex<HashSet<&'static str>>,
    dead: Mutex<HashSet<&'static str>>,
    fail_all: Mutex<bool>,
    attempts: Mutex<Vec<&'static str>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    ready_state: Arc<AtomicU8>,
}

impl SyntheticProvider {
    /// Provider with one environment-facing and one user-facing camera
    pub fn new() -> Self {
        Self::with_devices(vec![
            DeviceInfo {
                id: "synthetic-room".to_string(),
                label: "Synthetic Room Camera".to_string(),
                facing: Facing::Environment,
                max_width: 1920,
                max_height: 1080,
            },
            DeviceInfo {
                id: "synthetic-desk".to_string(),
                label: "Synthetic Desk Camera".to_string(),
                facing: Facing::User,
                max_width: 1280,
                max_height: 720,
            },
        ])
    }

    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices,
            failing: Mutex::new(HashSet::new()),
            dead: Mutex::new(HashSet::new()),
            fail_all: Mutex::new(false),
            attempts: Mutex::new(Vec::new()),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            ready_state: Arc::new(AtomicU8::new(ReadyState::HaveEnoughData as u8)),
        }
    }

    /// Make acquisitions with the given constraint kind fail
    pub fn fail_on(&self, kind: &'static str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(kind);
        }
    }

    /// Make every acquisition fail
    pub fn fail_all(&self) {
        if let Ok(mut flag) = self.fail_all.lock() {
            *flag = true;
        }
    }

    /// Acquisitions with this kind succeed but carry only ended tracks
    pub fn dead_tracks_on(&self, kind: &'static str) {
        if let Ok(mut dead) = self.dead.lock() {
            dead.insert(kind);
        }
    }

    /// Ready state reported by every surface of this provider
    pub fn set_ready_state(&self, state: ReadyState) {
        self.ready_state.store(state as u8, Ordering::Release);
    }

    /// Constraint kinds tried so far, in order
    pub fn attempted(&self) -> Vec<&'static str> {
        self.attempts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn acquire_count(&self) -> usize {
        self.acquired.load(Ordering::Acquire)
    }

    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::Acquire)
    }

    fn is_failing(&self, kind: &'static str) -> bool {
        let all = self.fail_all.lock().map(|f| *f).unwrap_or(false);
        all || self
            .failing
            .lock()
            .map(|f| f.contains(kind))
            .unwrap_or(false)
    }

    fn is_dead(&self, kind: &'static str) -> bool {
        self.dead.lock().map(|d| d.contains(kind)).unwrap_or(false)
    }
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureProvider for SyntheticProvider {
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, CameraError> {
        Ok(self.devices.clone())
    }

    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<CameraStream, CameraError> {
        let kind = constraints.kind();
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(kind);
        }

        if self.is_failing(kind) {
            return Err(CameraError::Open(format!("{} rejected by synthetic device", kind)));
        }

        let device = constraints
            .select(&self.devices)
            .cloned()
            .ok_or_else(|| CameraError::Open(format!("no device satisfies {}", kind)))?;

        let track = if self.is_dead(kind) {
            VideoTrack::ended(device.label.clone())
        } else {
            VideoTrack::new(device.label.clone())
        };

        self.acquired.fetch_add(1, Ordering::AcqRel);
        debug!("Synthetic stream opened on {} via {}", device.id, kind);

        let surface = Arc::new(SyntheticSurface {
            ready_state: Arc::clone(&self.ready_state),
            sequence: AtomicU32::new(0),
        });
        Ok(CameraStream::new(device, constraints.clone(), vec![track], surface))
    }

    fn release(&self, stream: &CameraStream) {
        stream.stop_tracks();
        self.released.fetch_add(1, Ordering::AcqRel);
    }
}

/// Surface producing a moving gradient
struct SyntheticSurface {
    ready_state: Arc<AtomicU8>,
    sequence: AtomicU32,
}

impl VideoSurface for SyntheticSurface {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready_state.load(Ordering::Acquire))
    }

    fn draw(&self) -> Option<VideoFrame> {
        if !self.ready_state().can_draw() {
            return None;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel);
        let shift = (sequence % 256) as u8;

        let mut data = Vec::with_capacity((FRAME_WIDTH * FRAME_HEIGHT * 3) as usize);
        for y in 0..FRAME_HEIGHT {
            for x in 0..FRAME_WIDTH {
                data.push((x as u8).wrapping_mul(4).wrapping_add(shift));
                data.push((y as u8).wrapping_mul(5));
                data.push(shift);
            }
        }

        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Some(VideoFrame::new(data, FRAME_WIDTH, FRAME_HEIGHT, timestamp_ms, sequence))
    }
}
