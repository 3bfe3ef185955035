//! Checkpoint recognition results

use chrono::{DateTime, Utc};
use lecture_api::{RecognizedStudent, SessionId};
use serde::{Deserialize, Serialize};

/// One attendance sample of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: SessionId,
    /// Starts at 1, +1 per checkpoint of the session
    pub checkpoint_number: u32,
    pub captured_at: DateTime<Utc>,
    /// First checkpoint issued shortly after start to verify the pipeline
    pub is_test: bool,
    pub recognized: Vec<RecognizedStudent>,
}

impl Checkpoint {
    pub fn new(
        session_id: SessionId,
        checkpoint_number: u32,
        is_test: bool,
        recognized: Vec<RecognizedStudent>,
    ) -> Self {
        Self {
            session_id,
            checkpoint_number,
            captured_at: Utc::now(),
            is_test,
            recognized,
        }
    }

    /// Checkpoint whose recognition call failed
    pub fn empty(session_id: SessionId, checkpoint_number: u32, is_test: bool) -> Self {
        Self::new(session_id, checkpoint_number, is_test, Vec::new())
    }

    pub fn recognized_count(&self) -> usize {
        self.recognized.len()
    }
}

/// Key used to match recognized names against the roster
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Alice   Smith "), "alice smith");
        assert_eq!(normalize_name("BOB"), normalize_name("bob"));
    }

    #[test]
    fn test_checkpoint_wire_shape() {
        let checkpoint = Checkpoint::new(7, 2, false, vec![RecognizedStudent::new("Alice", 0.9)]);
        let json = serde_json::to_value(&checkpoint).unwrap();
        assert_eq!(json["checkpoint_number"], 2);
        assert_eq!(json["recognized"][0]["name"], "Alice");
    }
}
