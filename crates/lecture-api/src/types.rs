//! Request and response bodies

use serde::{Deserialize, Deserializer, Serialize};

/// Backend lecture session identifier
pub type SessionId = i64;

/// Label the recognizer uses for faces it could not match
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Attendance status as stored by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Partial,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
            AttendanceStatus::Partial => "Partial",
        }
    }
}

/// Roster entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    #[serde(default)]
    pub roll_number: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartLectureRequest {
    pub class_id: String,
    pub section_id: String,
    pub subject: String,
    pub title: String,
    /// Seconds between attendance checkpoints
    pub checkpoint_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartLectureResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndLectureResponse {
    /// Server-side attentiveness summary, passed through untouched
    #[serde(default)]
    pub summary: serde_json::Value,
}

/// One identity recognized at a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedStudent {
    pub name: String,
    /// Normalized to 0.0..=1.0
    #[serde(deserialize_with = "deserialize_confidence")]
    pub confidence: f32,
}

impl RecognizedStudent {
    pub fn new(name: impl Into<String>, confidence: f32) -> Self {
        Self {
            name: name.into(),
            confidence,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.name.trim().is_empty() || self.name.trim().eq_ignore_ascii_case(UNKNOWN_LABEL)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackgroundAttendanceResponse {
    #[serde(default)]
    pub recognized_count: usize,
    #[serde(default)]
    pub students: Vec<RecognizedStudent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceLocation {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub name: String,
    #[serde(deserialize_with = "deserialize_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub location: Option<FaceLocation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognizeFacesResponse {
    #[serde(default)]
    pub faces: Vec<DetectedFace>,
}

/// Emotion/attentiveness classification of one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionAnalysis {
    /// May carry a status suffix, e.g. `"Neutral | Distracted (Looking away)"`
    pub emotion: String,
    pub is_attentive: bool,
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub detection_quality: Option<serde_json::Value>,
    #[serde(default, alias = "confidence", deserialize_with = "deserialize_confidence")]
    pub avg_confidence: f32,
    #[serde(default)]
    pub distraction_reason: Option<String>,
}

impl EmotionAnalysis {
    /// Emotion label without any status suffix
    pub fn base_emotion(&self) -> &str {
        self.emotion.split('|').next().unwrap_or("").trim()
    }

    /// Identified subject, if the detector matched one
    pub fn identity(&self) -> Option<&str> {
        self.student_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty() && !n.eq_ignore_ascii_case(UNKNOWN_LABEL))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub session_id: SessionId,
    pub student_id: i64,
    pub checkpoint_number: u32,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Confidence arrives as 0.87, 87.5 or "87.5%"
fn deserialize_confidence<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    let value = match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n,
        Raw::Text(s) => {
            let trimmed = s.trim();
            let (digits, percent) = match trimmed.strip_suffix('%') {
                Some(d) => (d.trim(), true),
                None => (trimmed, false),
            };
            let parsed: f64 = digits.parse().map_err(serde::de::Error::custom)?;
            if percent {
                parsed / 100.0
            } else {
                parsed
            }
        }
    };

    Ok(normalize_confidence(value))
}

fn normalize_confidence(value: f64) -> f32 {
    let scaled = if value > 1.0 { value / 100.0 } else { value };
    scaled.clamp(0.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_formats() {
        let parsed: Vec<RecognizedStudent> = serde_json::from_str(
            r#"[{"name":"A","confidence":"87.5%"},{"name":"B","confidence":0.6},{"name":"C","confidence":72}]"#,
        )
        .unwrap();
        assert!((parsed[0].confidence - 0.875).abs() < 1e-6);
        assert!((parsed[1].confidence - 0.6).abs() < 1e-6);
        assert!((parsed[2].confidence - 0.72).abs() < 1e-6);
    }

    #[test]
    fn test_bad_confidence_string_fails() {
        let parsed: Result<RecognizedStudent, _> =
            serde_json::from_str(r#"{"name":"A","confidence":"high"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_unknown_label() {
        assert!(RecognizedStudent::new("unknown", 0.9).is_unknown());
        assert!(RecognizedStudent::new("  ", 0.9).is_unknown());
        assert!(!RecognizedStudent::new("Alice", 0.9).is_unknown());
    }

    #[test]
    fn test_emotion_accepts_backend_shape() {
        let analysis: EmotionAnalysis = serde_json::from_str(
            r#"{"success":true,"emotion":"Neutral | Distracted (Looking away)","is_attentive":false,
                "confidence":"64%","student_name":"Unknown","distraction_reason":"Looking away"}"#,
        )
        .unwrap();
        assert_eq!(analysis.base_emotion(), "Neutral");
        assert_eq!(analysis.identity(), None);
        assert!((analysis.avg_confidence - 0.64).abs() < 1e-6);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&AttendanceStatus::Present).unwrap(),
            "\"Present\""
        );
    }
}
