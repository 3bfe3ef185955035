//! Snapshot-directory provider
//!
//! Treats each still image in a directory as a device. An external grabber
//! keeps the files fresh; every draw re-reads the file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::frame::VideoFrame;
use crate::provider::{CaptureConstraints, CaptureProvider, DeviceInfo, Facing};
use crate::stream::{CameraStream, ReadyState, VideoSurface, VideoTrack};
use crate::CameraError;

const EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct SnapshotProvider {
    dir: PathBuf,
}

impl SnapshotProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn scan(dir: &Path) -> Result<Vec<(DeviceInfo, PathBuf)>, CameraError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CameraError::Enumerate(format!("{}: {}", dir.display(), e)))?;

        let mut devices = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if !is_image {
                continue;
            }

            let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let (max_width, max_height) = match image::image_dimensions(&path) {
                Ok(dims) => dims,
                Err(e) => {
                    warn!("Skipping unreadable snapshot {}: {}", path.display(), e);
                    continue;
                }
            };

            devices.push((
                DeviceInfo {
                    label: format!("Snapshot {}", stem),
                    facing: facing_from_name(&stem),
                    id: stem,
                    max_width,
                    max_height,
                },
                path,
            ));
        }

        devices.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        Ok(devices)
    }

    async fn scan_async(&self) -> Result<Vec<(DeviceInfo, PathBuf)>, CameraError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || Self::scan(&dir))
            .await
            .map_err(|e| CameraError::Enumerate(format!("scan worker join failed: {}", e)))?
    }
}

fn facing_from_name(name: &str) -> Facing {
    let name = name.to_ascii_lowercase();
    if ["room", "back", "env"].iter().any(|k| name.contains(k)) {
        Facing::Environment
    } else if ["front", "user", "desk"].iter().any(|k| name.contains(k)) {
        Facing::User
    } else {
        Facing::Unknown
    }
}

#[async_trait]
impl CaptureProvider for SnapshotProvider {
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, CameraError> {
        Ok(self.scan_async().await?.into_iter().map(|(d, _)| d).collect())
    }

    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<CameraStream, CameraError> {
        let found = self.scan_async().await?;
        let devices: Vec<DeviceInfo> = found.iter().map(|(d, _)| d.clone()).collect();

        let device = constraints
            .select(&devices)
            .cloned()
            .ok_or_else(|| CameraError::Open(format!("no snapshot satisfies {}", constraints.kind())))?;
        let path = found
            .into_iter()
            .find(|(d, _)| d.id == device.id)
            .map(|(_, p)| p)
            .ok_or_else(|| CameraError::Open(format!("snapshot {} vanished", device.id)))?;

        debug!("Snapshot stream opened on {}", path.display());
        let surface = Arc::new(SnapshotSurface {
            path,
            sequence: AtomicU32::new(0),
        });
        Ok(CameraStream::new(
            device.clone(),
            constraints.clone(),
            vec![VideoTrack::new(device.label)],
            surface,
        ))
    }
}

struct SnapshotSurface {
    path: PathBuf,
    sequence: AtomicU32,
}

impl VideoSurface for SnapshotSurface {
    fn ready_state(&self) -> ReadyState {
        match image::image_dimensions(&self.path) {
            Ok(_) => ReadyState::HaveEnoughData,
            Err(_) => ReadyState::HaveNothing,
        }
    }

    fn draw(&self) -> Option<VideoFrame> {
        let image = match image::open(&self.path) {
            Ok(image) => image.to_rgb8(),
            Err(e) => {
                debug!("Snapshot {} not decodable: {}", self.path.display(), e);
                return None;
            }
        };
        let (width, height) = image.dimensions();
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Some(VideoFrame::new(
            image.into_raw(),
            width,
            height,
            timestamp_ms,
            self.sequence.fetch_add(1, Ordering::AcqRel),
        ))
    }
}
