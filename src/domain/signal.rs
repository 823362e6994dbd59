//! Signal payloads
//!
//! A signal carries a partial state record. Every field it carries overwrites the
//! matching field of the running instance's record; absent fields are left alone.

use serde::{Deserialize, Serialize};

use super::state::{StateRecord, Status, Step};

/// Partial update delivered to a running process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_send_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
}

impl StatePatch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch that only sets the status
    pub fn status(status: impl Into<Status>) -> Self {
        Self::new().with_status(status)
    }

    pub fn with_status(mut self, status: impl Into<Status>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_next_step(mut self, step: impl Into<Step>) -> Self {
        self.next_step = Some(step.into());
        self
    }

    pub fn with_next_send_date(mut self, at_ms: i64) -> Self {
        self.next_send_date = Some(at_ms);
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = Some(iterations);
        self
    }

    /// Check if the patch carries no fields
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.next_step.is_none()
            && self.next_send_date.is_none()
            && self.iterations.is_none()
    }

    /// Overwrite the present fields and flag the deadline for re-evaluation
    ///
    /// The dirty flag is raised even for an empty patch: any delivered signal is a
    /// reason to re-check timing.
    pub fn apply_to(&self, record: &mut StateRecord) {
        if let Some(status) = &self.status {
            record.status = status.clone();
        }
        if let Some(step) = &self.next_step {
            record.next_step = step.clone();
        }
        if let Some(at) = self.next_send_date {
            record.next_send_date = at;
        }
        if let Some(iterations) = self.iterations {
            record.iterations = iterations;
        }
        record.deadline_dirty = true;
    }
}

/// What happened to a delivered signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalReceipt {
    /// Fields were written and waiters woken
    Applied,
    /// The record is sealed by an abort; nothing changed
    Ignored,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patch_deserializes_partial_payload() {
        let patch: StatePatch = serde_json::from_value(json!({"status": "started"})).unwrap();
        assert_eq!(patch.status, Some(Status::Started));
        assert!(patch.next_step.is_none());
        assert!(patch.next_send_date.is_none());
    }

    #[test]
    fn test_patch_accepts_unrecognized_values() {
        let patch: StatePatch =
            serde_json::from_value(json!({"status": "on-hold", "nextStep": "fax"})).unwrap();
        assert_eq!(patch.status, Some(Status::Unrecognized("on-hold".into())));
        assert_eq!(patch.next_step, Some(Step::Unrecognized("fax".into())));
    }

    #[test]
    fn test_apply_overwrites_only_present_fields() {
        let mut record = StateRecord {
            next_send_date: 42,
            ..StateRecord::default()
        };
        StatePatch::status("started").apply_to(&mut record);

        assert_eq!(record.status, Status::Started);
        assert_eq!(record.next_step, Step::FirstContact);
        assert_eq!(record.next_send_date, 42);
        assert!(record.deadline_dirty);
    }

    #[test]
    fn test_apply_empty_patch_still_marks_dirty() {
        let mut record = StateRecord::default();
        let patch = StatePatch::new();
        assert!(patch.is_empty());
        patch.apply_to(&mut record);
        assert!(record.deadline_dirty);
        assert_eq!(record.status, Status::Stopped);
    }

    #[test]
    fn test_builder_sets_all_fields() {
        let mut record = StateRecord::default();
        StatePatch::new()
            .with_status(Status::Started)
            .with_next_step(Step::Escalation)
            .with_next_send_date(7)
            .with_iterations(3)
            .apply_to(&mut record);

        assert_eq!(record.status, Status::Started);
        assert_eq!(record.next_step, Step::Escalation);
        assert_eq!(record.next_send_date, 7);
        assert_eq!(record.iterations, 3);
    }

    #[test]
    fn test_patch_serialization_skips_absent_fields() {
        let json = serde_json::to_value(StatePatch::new().with_next_send_date(5)).unwrap();
        assert_eq!(json, json!({"nextSendDate": 5}));
    }
}
