//! Camera Capture Library for Live Lectures
//!
//! Acquires a classroom camera through an injected capability provider and
//! produces encoded stills on demand.
//! Supports:
//! - Ordered constraint fallback (explicit device, environment, high-res, user, any)
//! - Readiness-checked frame capture with fixed-quality JPEG encoding
//! - Scoped stream release through [`StreamLease`]

pub mod client;
pub mod frame;
pub mod provider;
pub mod snapshot;
pub mod stream;
pub mod synthetic;

pub use client::FrameCaptureClient;
pub use frame::{EncodedImage, VideoFrame};
pub use provider::{CaptureConstraints, CaptureProvider, DeviceInfo, Facing};
pub use snapshot::SnapshotProvider;
pub use stream::{CameraStream, ReadyState, StreamLease, VideoSurface, VideoTrack};
pub use synthetic::SyntheticProvider;

use thiserror::Error;

/// Camera error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// No device/constraint combination produced a live track
    #[error("No working camera configuration (tried: {0})")]
    Unavailable(String),

    /// Video surface has no decoded frame yet
    #[error("Frame not ready")]
    FrameNotReady,

    /// A single acquisition attempt failed
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Device enumeration failed: {0}")]
    Enumerate(String),
}

impl CameraError {
    /// Transient errors are retried by the next scheduler tick
    pub fn is_transient(&self) -> bool {
        matches!(self, CameraError::FrameNotReady)
    }
}

/// Capture configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device to try first (e.g., a device id reported by `devices()`)
    pub preferred_device: Option<String>,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Width requested by the high-resolution fallback
    pub high_res_width: u32,
    /// Height requested by the high-resolution fallback
    pub high_res_height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            preferred_device: None,
            jpeg_quality: 80,
            high_res_width: 1280,
            high_res_height: 720,
        }
    }
}

impl CaptureConfig {
    /// Config pinned to a specific device
    pub fn with_device(device_id: impl Into<String>) -> Self {
        Self {
            preferred_device: Some(device_id.into()),
            ..Default::default()
        }
    }
}
