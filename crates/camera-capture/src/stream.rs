//! Camera stream handle, tracks and scoped release

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::frame::VideoFrame;
use crate::provider::{CaptureConstraints, CaptureProvider, DeviceInfo};

/// Readiness of the video surface backing a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ReadyState {
    HaveNothing = 0,
    HaveMetadata = 1,
    HaveCurrentData = 2,
    HaveFutureData = 3,
    HaveEnoughData = 4,
}

impl ReadyState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::HaveNothing,
            1 => ReadyState::HaveMetadata,
            2 => ReadyState::HaveCurrentData,
            3 => ReadyState::HaveFutureData,
            _ => ReadyState::HaveEnoughData,
        }
    }

    /// A frame can be drawn once decoded dimensions exist
    pub fn can_draw(self) -> bool {
        self >= ReadyState::HaveCurrentData
    }
}

/// Source of decoded frames for a stream
pub trait VideoSurface: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    /// Draw the current frame (None if nothing decodable)
    fn draw(&self) -> Option<VideoFrame>;
}

/// One video track of a stream
#[derive(Debug)]
pub struct VideoTrack {
    label: String,
    live: AtomicBool,
}

impl VideoTrack {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            live: AtomicBool::new(true),
        }
    }

    /// Track that ended before it delivered anything
    pub fn ended(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            live: AtomicBool::new(false),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Stop the track. Returns true if it was live.
    pub fn stop(&self) -> bool {
        self.live.swap(false, Ordering::AcqRel)
    }
}

/// An acquired camera stream
pub struct CameraStream {
    id: Uuid,
    device: DeviceInfo,
    constraints: CaptureConstraints,
    tracks: Vec<VideoTrack>,
    surface: Arc<dyn VideoSurface>,
}

impl CameraStream {
    pub fn new(
        device: DeviceInfo,
        constraints: CaptureConstraints,
        tracks: Vec<VideoTrack>,
        surface: Arc<dyn VideoSurface>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device,
            constraints,
            tracks,
            surface,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Constraints that produced this stream
    pub fn constraints(&self) -> &CaptureConstraints {
        &self.constraints
    }

    pub fn tracks(&self) -> &[VideoTrack] {
        &self.tracks
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    pub fn is_live(&self) -> bool {
        self.live_tracks() > 0
    }

    pub fn surface(&self) -> &dyn VideoSurface {
        self.surface.as_ref()
    }

    /// Stop every track, returning how many were still live
    pub fn stop_tracks(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }
}

impl std::fmt::Debug for CameraStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraStream")
            .field("id", &self.id)
            .field("device", &self.device.id)
            .field("constraints", &self.constraints)
            .field("live_tracks", &self.live_tracks())
            .finish()
    }
}

/// Owning handle for an acquired stream.
///
/// Only the lease can release the device. Loops get read handles through
/// [`StreamLease::share`]. Release happens exactly once: explicitly via
/// [`StreamLease::release`] or on drop.
pub struct StreamLease {
    stream: Arc<CameraStream>,
    provider: Arc<dyn CaptureProvider>,
    released: AtomicBool,
}

impl StreamLease {
    pub(crate) fn new(stream: CameraStream, provider: Arc<dyn CaptureProvider>) -> Self {
        Self {
            stream: Arc::new(stream),
            provider,
            released: AtomicBool::new(false),
        }
    }

    /// Read-only handle for frame sampling
    pub fn share(&self) -> Arc<CameraStream> {
        Arc::clone(&self.stream)
    }

    pub fn stream(&self) -> &CameraStream {
        &self.stream
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Stop all tracks. Synchronous; later calls are no-ops.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            debug!("Stream {} already released", self.stream.id());
            return false;
        }
        self.provider.release(&self.stream);
        info!(
            "Released camera stream {} ({})",
            self.stream.id(),
            self.stream.device().id
        );
        true
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for StreamLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLease")
            .field("stream", &self.stream)
            .field("released", &self.is_released())
            .finish()
    }
}
