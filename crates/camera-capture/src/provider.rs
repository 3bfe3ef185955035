//! Capability provider interface and capture constraints

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::stream::CameraStream;
use crate::CameraError;

/// Which way a camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    /// Rear/room-facing camera
    Environment,
    /// Front/operator-facing camera
    User,
    Unknown,
}

/// Enumerated capture device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    /// Empty until a permission grant has been observed
    pub label: String,
    pub facing: Facing,
    pub max_width: u32,
    pub max_height: u32,
}

/// One entry of the acquisition fallback chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureConstraints {
    DeviceId(String),
    FacingEnvironment,
    HighResolution { width: u32, height: u32 },
    FacingUser,
    Unconstrained,
}

impl CaptureConstraints {
    /// Ordered chain tried by `FrameCaptureClient::acquire`
    pub fn fallback_chain(preferred: Option<&str>, width: u32, height: u32) -> Vec<Self> {
        let mut chain = Vec::with_capacity(5);
        if let Some(id) = preferred.filter(|id| !id.is_empty()) {
            chain.push(CaptureConstraints::DeviceId(id.to_string()));
        }
        chain.push(CaptureConstraints::FacingEnvironment);
        chain.push(CaptureConstraints::HighResolution { width, height });
        chain.push(CaptureConstraints::FacingUser);
        chain.push(CaptureConstraints::Unconstrained);
        chain
    }

    /// Short name for logs and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureConstraints::DeviceId(_) => "device_id",
            CaptureConstraints::FacingEnvironment => "environment",
            CaptureConstraints::HighResolution { .. } => "high_resolution",
            CaptureConstraints::FacingUser => "user",
            CaptureConstraints::Unconstrained => "any",
        }
    }

    /// Pick a device satisfying these constraints
    pub fn select<'a>(&self, devices: &'a [DeviceInfo]) -> Option<&'a DeviceInfo> {
        match self {
            CaptureConstraints::DeviceId(id) => devices.iter().find(|d| &d.id == id),
            CaptureConstraints::FacingEnvironment => {
                devices.iter().find(|d| d.facing == Facing::Environment)
            }
            CaptureConstraints::FacingUser => devices.iter().find(|d| d.facing == Facing::User),
            CaptureConstraints::HighResolution { width, height } => devices
                .iter()
                .find(|d| d.max_width >= *width && d.max_height >= *height),
            CaptureConstraints::Unconstrained => devices.first(),
        }
    }
}

/// Injected camera capability: enumerate, acquire, release
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, CameraError>;

    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<CameraStream, CameraError>;

    /// Stop every track of the stream
    fn release(&self, stream: &CameraStream) {
        stream.stop_tracks();
    }
}
