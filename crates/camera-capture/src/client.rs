//! Frame capture client over an injected provider

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::frame::EncodedImage;
use crate::provider::{CaptureConstraints, CaptureProvider, DeviceInfo};
use crate::stream::{CameraStream, StreamLease};
use crate::{CameraError, CaptureConfig};

/// Acquires streams with constraint fallback and captures encoded stills
pub struct FrameCaptureClient {
    provider: Arc<dyn CaptureProvider>,
    config: CaptureConfig,
    /// Set after the first successful acquisition
    permission_granted: AtomicBool,
}

impl FrameCaptureClient {
    pub fn new(provider: Arc<dyn CaptureProvider>, config: CaptureConfig) -> Self {
        Self {
            provider,
            config,
            permission_granted: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn permission_granted(&self) -> bool {
        self.permission_granted.load(Ordering::Acquire)
    }

    /// List devices. Labels stay blank until a stream was granted once.
    pub async fn devices(&self) -> Result<Vec<DeviceInfo>, CameraError> {
        let mut devices = self.provider.enumerate().await?;
        if !self.permission_granted() {
            for device in &mut devices {
                device.label.clear();
            }
        }
        Ok(devices)
    }

    /// Acquire a stream, trying each constraint set in order.
    ///
    /// `preferred_device` overrides the configured preferred device.
    pub async fn acquire(&self, preferred_device: Option<&str>) -> Result<StreamLease, CameraError> {
        let preferred = preferred_device.or(self.config.preferred_device.as_deref());
        let chain = CaptureConstraints::fallback_chain(
            preferred,
            self.config.high_res_width,
            self.config.high_res_height,
        );

        let mut attempts = Vec::with_capacity(chain.len());
        for constraints in chain {
            match self.provider.acquire(&constraints).await {
                Ok(stream) if stream.is_live() => {
                    self.permission_granted.store(true, Ordering::Release);
                    info!(
                        "Camera acquired via {} constraints on device {}",
                        constraints.kind(),
                        stream.device().id
                    );
                    return Ok(StreamLease::new(stream, Arc::clone(&self.provider)));
                }
                Ok(stream) => {
                    warn!(
                        "Camera {} returned no live video track, trying next",
                        constraints.kind()
                    );
                    self.provider.release(&stream);
                    attempts.push(format!("{}: no live track", constraints.kind()));
                }
                Err(e) => {
                    debug!("Camera {} attempt failed: {}", constraints.kind(), e);
                    attempts.push(format!("{}: {}", constraints.kind(), e));
                }
            }
        }

        Err(CameraError::Unavailable(attempts.join("; ")))
    }

    /// Draw and encode the current frame of a stream
    pub async fn capture_frame(&self, stream: &CameraStream) -> Result<EncodedImage, CameraError> {
        if !stream.is_live() || !stream.surface().ready_state().can_draw() {
            return Err(CameraError::FrameNotReady);
        }

        let frame = stream.surface().draw().ok_or(CameraError::FrameNotReady)?;
        let quality = self.config.jpeg_quality;

        tokio::task::spawn_blocking(move || frame.encode_jpeg(quality))
            .await
            .map_err(|e| CameraError::Encode(format!("encoder worker join failed: {}", e)))?
    }

    /// Release a stream lease. Returns false if it was already released.
    pub fn release(&self, lease: &StreamLease) -> bool {
        lease.release()
    }
}
