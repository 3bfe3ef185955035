//! Attentiveness samples and the end-of-session report

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use lecture_api::{EmotionAnalysis, SessionId};
use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;

/// One classified frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentivenessSample {
    pub session_id: SessionId,
    /// Identity matched by the backend, if any
    pub student_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub emotion_label: String,
    pub is_attentive: bool,
    pub confidence: f32,
}

impl AttentivenessSample {
    pub fn from_analysis(session_id: SessionId, analysis: &EmotionAnalysis) -> Self {
        Self {
            session_id,
            student_id: analysis.identity().map(str::to_string),
            timestamp: Utc::now(),
            emotion_label: analysis.base_emotion().to_string(),
            is_attentive: analysis.is_attentive,
            confidence: analysis.avg_confidence,
        }
    }
}

/// Per-student aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAttentiveness {
    pub student_id: String,
    /// Seconds between the first and last sample
    pub total_time_seconds: i64,
    /// Rounded share of attentive samples (0-100)
    pub attentive_percentage: u32,
    pub sample_count: usize,
    /// Most frequent emotion label
    pub dominant_emotion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub per_student: Vec<StudentAttentiveness>,
}

impl SessionReport {
    pub fn empty(session_id: SessionId) -> Self {
        Self {
            session_id,
            per_student: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.per_student.is_empty()
    }

    pub fn student(&self, student_id: &str) -> Option<&StudentAttentiveness> {
        self.per_student.iter().find(|s| s.student_id == student_id)
    }

    /// Group samples of one session by student
    pub fn compile(
        session_id: SessionId,
        samples: &[AttentivenessSample],
        config: &MonitorConfig,
    ) -> Self {
        let mut groups: BTreeMap<&str, Vec<&AttentivenessSample>> = BTreeMap::new();
        for sample in samples.iter().filter(|s| s.session_id == session_id) {
            let key = sample
                .student_id
                .as_deref()
                .unwrap_or_else(|| config.unidentified_label());
            groups.entry(key).or_default().push(sample);
        }

        let per_student = groups
            .into_iter()
            .map(|(student_id, samples)| summarize(student_id, &samples))
            .collect();

        Self {
            session_id,
            per_student,
        }
    }
}

fn summarize(student_id: &str, samples: &[&AttentivenessSample]) -> StudentAttentiveness {
    let total = samples.len();
    let attentive = samples.iter().filter(|s| s.is_attentive).count();

    let first = samples.iter().map(|s| s.timestamp).min();
    let last = samples.iter().map(|s| s.timestamp).max();
    let total_time_seconds = match (first, last) {
        (Some(first), Some(last)) => (last - first).num_seconds(),
        _ => 0,
    };

    let mut emotions: HashMap<&str, usize> = HashMap::new();
    for sample in samples {
        *emotions.entry(sample.emotion_label.as_str()).or_default() += 1;
    }
    let dominant_emotion = emotions
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(e, _)| e.to_string())
        .unwrap_or_default();

    StudentAttentiveness {
        student_id: student_id.to_string(),
        total_time_seconds,
        attentive_percentage: (attentive as f64 / total as f64 * 100.0).round() as u32,
        sample_count: total,
        dominant_emotion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(student: Option<&str>, offset_secs: i64, attentive: bool, emotion: &str) -> AttentivenessSample {
        let base = DateTime::parse_from_rfc3339("2024-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        AttentivenessSample {
            session_id: 1,
            student_id: student.map(str::to_string),
            timestamp: base + Duration::seconds(offset_secs),
            emotion_label: emotion.to_string(),
            is_attentive: attentive,
            confidence: 0.8,
        }
    }

    #[test]
    fn test_zero_samples_empty_report() {
        let report = SessionReport::compile(1, &[], &MonitorConfig::default());
        assert!(report.is_empty());
    }

    #[test]
    fn test_percentage_and_duration() {
        let samples = vec![
            sample(Some("Alice"), 0, true, "Neutral"),
            sample(Some("Alice"), 2, true, "Happy"),
            sample(Some("Alice"), 4, false, "Neutral"),
        ];
        let report = SessionReport::compile(1, &samples, &MonitorConfig::default());
        let alice = report.student("Alice").unwrap();
        assert_eq!(alice.attentive_percentage, 67);
        assert_eq!(alice.total_time_seconds, 4);
        assert_eq!(alice.sample_count, 3);
        assert_eq!(alice.dominant_emotion, "Neutral");
    }

    #[test]
    fn test_unidentified_label_depends_on_mode() {
        let samples = vec![sample(None, 0, true, "Neutral"), sample(None, 2, false, "Sad")];

        let classroom = SessionReport::compile(1, &samples, &MonitorConfig::default());
        assert_eq!(classroom.per_student.len(), 1);
        assert_eq!(classroom.per_student[0].student_id, "Unknown");
        assert_eq!(classroom.per_student[0].attentive_percentage, 50);

        let single = SessionReport::compile(1, &samples, &MonitorConfig::single_subject());
        assert_eq!(single.per_student[0].student_id, "You");
    }

    #[test]
    fn test_other_sessions_ignored() {
        let mut other = sample(Some("Bob"), 0, true, "Neutral");
        other.session_id = 2;
        let report = SessionReport::compile(1, &[other], &MonitorConfig::default());
        assert!(report.is_empty());
    }
}
