//! Post-lecture multiple-choice assessment

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub prompt: String,
    pub options: Vec<String>,
    /// Index into `options`
    pub answer: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub questions: Vec<Question>,
    /// Falls back to the controller's assessment timeout when absent
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

impl Assessment {
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            questions,
            duration_minutes: None,
        }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.questions.is_empty() {
            return Err(SessionError::InvalidAssessment("no questions".to_string()));
        }
        for (i, question) in self.questions.iter().enumerate() {
            if question.options.len() < 2 {
                return Err(SessionError::InvalidAssessment(format!(
                    "question {} needs at least two options",
                    i + 1
                )));
            }
            if question.answer >= question.options.len() {
                return Err(SessionError::InvalidAssessment(format!(
                    "question {} answer out of range",
                    i + 1
                )));
            }
        }
        if self.duration_minutes == Some(0) {
            return Err(SessionError::InvalidAssessment("duration must be positive".to_string()));
        }
        Ok(())
    }

    pub fn duration(&self, fallback: Duration) -> Duration {
        self.duration_minutes
            .map(|m| Duration::from_secs(u64::from(m) * 60))
            .unwrap_or(fallback)
    }

    /// Missing answers count as wrong; extra answers are ignored
    pub fn score(&self, submission: &AssessmentSubmission) -> AssessmentResult {
        let correct = self
            .questions
            .iter()
            .zip(submission.answers.iter())
            .filter(|(q, a)| **a == Some(q.answer))
            .count();
        AssessmentResult::new(correct, self.questions.len(), false)
    }

    pub fn timed_out(&self) -> AssessmentResult {
        AssessmentResult::new(0, self.questions.len(), true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentSubmission {
    #[serde(default)]
    pub student_id: Option<i64>,
    /// One entry per question; `None` is unanswered
    pub answers: Vec<Option<usize>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub score: usize,
    pub total_questions: usize,
    pub percentage: f32,
    pub timed_out: bool,
    pub finished_at: DateTime<Utc>,
}

impl AssessmentResult {
    fn new(score: usize, total_questions: usize, timed_out: bool) -> Self {
        let percentage = if total_questions == 0 {
            0.0
        } else {
            score as f32 / total_questions as f32 * 100.0
        };
        Self {
            score,
            total_questions,
            percentage,
            timed_out,
            finished_at: Utc::now(),
        }
    }
}
