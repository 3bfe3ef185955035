//! Video frame types and encoding

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::CameraError;

/// Decoded RGB video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (milliseconds since epoch)
    pub timestamp_ms: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ms: u64, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ms,
            sequence,
        }
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.data
            .get(idx..idx + 3)
            .map(|p| [p[0], p[1], p[2]])
    }

    /// Whether the buffer matches the declared dimensions
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == (self.width as usize) * (self.height as usize) * 3
    }

    /// Encode the frame as JPEG with the given quality
    pub fn encode_jpeg(&self, quality: u8) -> Result<EncodedImage, CameraError> {
        if !self.is_well_formed() {
            return Err(CameraError::Encode(format!(
                "buffer of {} bytes does not match {}x{}",
                self.data.len(),
                self.width,
                self.height
            )));
        }

        let mut bytes = Vec::with_capacity(self.data.len() / 8);
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
        encoder
            .encode(&self.data, self.width, self.height, ExtendedColorType::Rgb8)
            .map_err(|e| CameraError::Encode(e.to_string()))?;

        Ok(EncodedImage {
            bytes,
            mime: "image/jpeg",
            width: self.width,
            height: self.height,
            captured_at_ms: self.timestamp_ms,
        })
    }
}

/// Compressed still ready for upload
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
    pub width: u32,
    pub height: u32,
    pub captured_at_ms: u64,
}

impl EncodedImage {
    /// `data:` URL form expected by the recognition endpoints
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
