//! Recognition Result Aggregator

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use lecture_api::{AttendanceStatus, SessionId, Student};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checkpoint::{normalize_name, Checkpoint};
use crate::AttendanceError;

/// Aggregator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Minimum recognition confidence counted as a sighting (default: 0.65)
    pub confidence_threshold: f32,
    /// Checkpoint presence ratio for Present in the summary (default: 0.80)
    pub present_ratio: f32,
    /// Checkpoint presence ratio for Partial in the summary (default: 0.50)
    pub partial_ratio: f32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.65,
            present_ratio: 0.80,
            partial_ratio: 0.50,
        }
    }
}

/// Final attendance row for one rostered student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub session_id: SessionId,
    pub student_id: i64,
    pub roll_number: String,
    pub name: String,
    pub status: AttendanceStatus,
    pub marked_at: DateTime<Utc>,
    pub teacher_override: bool,
}

/// Checkpoint presence of one student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentSummary {
    pub student_id: i64,
    pub name: String,
    pub checkpoints_present: usize,
    pub percentage: f32,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceSummary {
    pub session_id: SessionId,
    pub total_checkpoints: usize,
    pub students: Vec<StudentSummary>,
}

/// Sightings of one normalized name
#[derive(Debug, Clone)]
struct Sighting {
    /// Name as first reported by the recognizer
    display_name: String,
    checkpoints: BTreeSet<u32>,
    best_confidence: f32,
}

/// Reconciles checkpoint results into attendance.
///
/// Presence is the OR over every checkpoint of the session: a student seen
/// once above the threshold is present. Names that match nobody on the
/// roster never become rows.
pub struct RecognitionResultAggregator {
    /// Configuration
    config: AggregatorConfig,
    /// Session this aggregator belongs to
    session_id: SessionId,
    /// Current class roster
    roster: Vec<Student>,
    /// Sightings by normalized name
    seen: HashMap<String, Sighting>,
    /// Checkpoint numbers recorded so far
    checkpoints: BTreeSet<u32>,
    /// Teacher overrides by student id
    overrides: HashMap<i64, AttendanceStatus>,
    finalized: bool,
}

impl RecognitionResultAggregator {
    pub fn new(session_id: SessionId, config: AggregatorConfig) -> Self {
        debug!("Creating aggregator for session {} with config: {:?}", session_id, config);
        Self {
            config,
            session_id,
            roster: Vec::new(),
            seen: HashMap::new(),
            checkpoints: BTreeSet::new(),
            overrides: HashMap::new(),
            finalized: false,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Replace the roster used for reconciliation
    pub fn set_roster(&mut self, roster: Vec<Student>) {
        info!("Session {} roster: {} students", self.session_id, roster.len());
        self.roster = roster;
    }

    pub fn roster(&self) -> &[Student] {
        &self.roster
    }

    /// Union a checkpoint into the seen set. Returns the number of accepted sightings.
    pub fn record(&mut self, checkpoint: &Checkpoint) -> Result<usize, AttendanceError> {
        if checkpoint.session_id != self.session_id {
            return Err(AttendanceError::SessionMismatch {
                expected: self.session_id,
                got: checkpoint.session_id,
            });
        }
        if self.finalized {
            return Err(AttendanceError::Finalized(self.session_id));
        }

        let number = checkpoint.checkpoint_number;
        let expected = self.checkpoints.last().map(|n| n + 1).unwrap_or(1);
        if number != expected {
            warn!(
                "Session {} checkpoint {} out of sequence (expected {})",
                self.session_id, number, expected
            );
        }
        self.checkpoints.insert(number);

        let mut accepted = 0;
        for student in &checkpoint.recognized {
            if student.is_unknown() {
                continue;
            }
            if student.confidence < self.config.confidence_threshold {
                debug!(
                    "Sighting of {} dropped: confidence {} < threshold {}",
                    student.name, student.confidence, self.config.confidence_threshold
                );
                continue;
            }

            let sighting = self
                .seen
                .entry(normalize_name(&student.name))
                .or_insert_with(|| Sighting {
                    display_name: student.name.trim().to_string(),
                    checkpoints: BTreeSet::new(),
                    best_confidence: 0.0,
                });
            sighting.checkpoints.insert(number);
            sighting.best_confidence = sighting.best_confidence.max(student.confidence);
            accepted += 1;
        }

        debug!(
            "Session {} checkpoint {}: {}/{} sightings accepted",
            self.session_id,
            number,
            accepted,
            checkpoint.recognized.len()
        );
        Ok(accepted)
    }

    /// Record a teacher decision; it wins over recognition at finalize
    pub fn override_status(
        &mut self,
        student_id: i64,
        status: AttendanceStatus,
    ) -> Result<(), AttendanceError> {
        if self.finalized {
            return Err(AttendanceError::Finalized(self.session_id));
        }
        if status == AttendanceStatus::Partial {
            return Err(AttendanceError::InvalidOverride(status.as_str()));
        }
        if !self.roster.iter().any(|s| s.id == student_id) {
            return Err(AttendanceError::NotRostered(student_id));
        }
        info!(
            "Session {} override: student {} -> {}",
            self.session_id,
            student_id,
            status.as_str()
        );
        self.overrides.insert(student_id, status);
        Ok(())
    }

    /// Produce one record per rostered student, in roster order. Once only.
    pub fn finalize(&mut self) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        if self.finalized {
            return Err(AttendanceError::Finalized(self.session_id));
        }
        self.finalized = true;

        let marked_at = Utc::now();
        let records: Vec<AttendanceRecord> = self
            .roster
            .iter()
            .map(|student| {
                let (status, teacher_override) = match self.overrides.get(&student.id) {
                    Some(status) => (*status, true),
                    None if self.was_seen(&student.name) => (AttendanceStatus::Present, false),
                    None => (AttendanceStatus::Absent, false),
                };
                AttendanceRecord {
                    session_id: self.session_id,
                    student_id: student.id,
                    roll_number: student.roll_number.clone(),
                    name: student.name.clone(),
                    status,
                    marked_at,
                    teacher_override,
                }
            })
            .collect();

        let present = records
            .iter()
            .filter(|r| r.status == AttendanceStatus::Present)
            .count();
        info!(
            "Session {} attendance finalized: {}/{} present over {} checkpoints",
            self.session_id,
            present,
            records.len(),
            self.checkpoints.len()
        );
        Ok(records)
    }

    /// Per-student presence across checkpoints
    pub fn summary(&self) -> AttendanceSummary {
        let total = self.checkpoints.len();
        let students = self
            .roster
            .iter()
            .map(|student| {
                let present = self
                    .seen
                    .get(&normalize_name(&student.name))
                    .map(|s| s.checkpoints.len())
                    .unwrap_or(0);
                let ratio = if total == 0 {
                    0.0
                } else {
                    present as f32 / total as f32
                };
                let status = if ratio >= self.config.present_ratio {
                    AttendanceStatus::Present
                } else if ratio >= self.config.partial_ratio {
                    AttendanceStatus::Partial
                } else {
                    AttendanceStatus::Absent
                };
                StudentSummary {
                    student_id: student.id,
                    name: student.name.clone(),
                    checkpoints_present: present,
                    percentage: (ratio * 1000.0).round() / 10.0,
                    status,
                }
            })
            .collect();

        AttendanceSummary {
            session_id: self.session_id,
            total_checkpoints: total,
            students,
        }
    }

    /// Recognized names that match nobody on the roster
    pub fn unrostered(&self) -> Vec<String> {
        let rostered: BTreeSet<String> = self.roster.iter().map(|s| normalize_name(&s.name)).collect();
        let mut names: Vec<String> = self
            .seen
            .iter()
            .filter(|(key, _)| !rostered.contains(*key))
            .map(|(_, s)| s.display_name.clone())
            .collect();
        names.sort();
        names
    }

    /// Every accepted name, sorted
    pub fn seen(&self) -> Vec<String> {
        let mut names: Vec<String> = self.seen.values().map(|s| s.display_name.clone()).collect();
        names.sort();
        names
    }

    /// Highest accepted confidence for a name
    pub fn best_confidence(&self, name: &str) -> Option<f32> {
        self.seen.get(&normalize_name(name)).map(|s| s.best_confidence)
    }

    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.len()
    }

    fn was_seen(&self, name: &str) -> bool {
        self.seen.contains_key(&normalize_name(name))
    }
}
