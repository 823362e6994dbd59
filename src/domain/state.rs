//! Process state record and related types
//!
//! The StateRecord is the mutable control state of one subject's PRR process. The
//! control loop is its only structural writer; signals overwrite fields in place and
//! queries read copies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Completed cycles allowed in one execution before it checkpoints and restarts
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;

/// Lifecycle status of the process, as set by external actors
///
/// Values outside the recognized set arrive from signals unvalidated and are kept
/// verbatim in `Unrecognized`; the control loop treats them as "not started".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    /// Automation is running
    Started,
    /// Paused; resumes from `next_step` on the next start
    Stopped,
    /// Terminal for the process instance
    Abort,
    Unrecognized(String),
}

impl Status {
    pub fn as_str(&self) -> &str {
        match self {
            Status::Started => "started",
            Status::Stopped => "stopped",
            Status::Abort => "abort",
            Status::Unrecognized(s) => s,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, Status::Started)
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Status::Abort)
    }

    /// Returns true for the statuses that end an activation wait
    pub fn is_activating(&self) -> bool {
        matches!(self, Status::Started | Status::Abort)
    }
}

impl From<String> for Status {
    fn from(s: String) -> Self {
        match s.as_str() {
            "started" => Status::Started,
            "stopped" => Status::Stopped,
            "abort" => Status::Abort,
            _ => Status::Unrecognized(s),
        }
    }
}

impl From<&str> for Status {
    fn from(s: &str) -> Self {
        Status::from(s.to_string())
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        match status {
            Status::Unrecognized(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The step the control loop will attempt next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Step {
    FirstContact,
    SecondContact,
    Escalation,
    Unrecognized(String),
}

impl Step {
    pub fn as_str(&self) -> &str {
        match self {
            Step::FirstContact => "firstContact",
            Step::SecondContact => "secondContact",
            Step::Escalation => "escalation",
            Step::Unrecognized(s) => s,
        }
    }

    /// Successor in the fixed cycle firstContact → secondContact → escalation → firstContact
    pub fn next(&self) -> Option<Step> {
        match self {
            Step::FirstContact => Some(Step::SecondContact),
            Step::SecondContact => Some(Step::Escalation),
            Step::Escalation => Some(Step::FirstContact),
            Step::Unrecognized(_) => None,
        }
    }

    /// The executor call that performs this step
    pub fn activity(&self) -> Option<Activity> {
        match self {
            Step::FirstContact => Some(Activity::FirstContact),
            Step::SecondContact => Some(Activity::SecondContact),
            Step::Escalation => Some(Activity::Escalation),
            Step::Unrecognized(_) => None,
        }
    }
}

impl From<String> for Step {
    fn from(s: String) -> Self {
        match s.as_str() {
            "firstContact" => Step::FirstContact,
            "secondContact" => Step::SecondContact,
            "escalation" => Step::Escalation,
            _ => Step::Unrecognized(s),
        }
    }
}

impl From<&str> for Step {
    fn from(s: &str) -> Self {
        Step::from(s.to_string())
    }
}

impl From<Step> for String {
    fn from(step: Step) -> Self {
        match step {
            Step::Unrecognized(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named side-effecting calls made through the step executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Activity {
    FirstContact,
    SecondContact,
    Escalation,
    /// Computes the deadline gating the first contact
    NextSendDate,
}

impl Activity {
    pub fn name(&self) -> &'static str {
        match self {
            Activity::FirstContact => "firstContact",
            Activity::SecondContact => "secondContact",
            Activity::Escalation => "escalation",
            Activity::NextSendDate => "nextSendDate",
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of records the request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "PO")]
    Po,
    Contacts,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Po => f.write_str("PO"),
            Category::Contacts => f.write_str("Contacts"),
        }
    }
}

/// Fixed parameters of a process, passed to every executor call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessParams {
    pub subject_id: String,
    pub category: Category,
}

impl ProcessParams {
    pub fn new(subject_id: impl Into<String>, category: Category) -> Self {
        Self {
            subject_id: subject_id.into(),
            category,
        }
    }

    /// Stable identity key of the process for this subject
    pub fn key(&self) -> String {
        crate::id::process_key(&self.subject_id)
    }
}

/// Control state of one process instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
    pub status: Status,
    pub next_step: Step,
    /// Earliest send instant for the first contact (Unix ms)
    pub next_send_date: i64,
    /// Set by every signal; tells a pending send-window wait to re-evaluate
    pub deadline_dirty: bool,
    /// Cycles completed in the current execution
    pub iterations: u32,
}

impl Default for StateRecord {
    fn default() -> Self {
        Self {
            status: Status::Stopped,
            next_step: Step::FirstContact,
            next_send_date: 0,
            deadline_dirty: false,
            iterations: 0,
        }
    }
}

impl StateRecord {
    /// Build the initial record of an execution, optionally carrying state forward
    pub fn seeded(seed: Option<StateRecord>) -> Self {
        match seed {
            Some(seed) => seed.checkpoint_seed(),
            None => Self::default(),
        }
    }

    /// Copy handed to a successor execution
    pub fn checkpoint_seed(&self) -> Self {
        Self {
            iterations: 0,
            deadline_dirty: false,
            ..self.clone()
        }
    }

    /// True while the process is started and `step` is the next one to run
    pub fn is_at(&self, step: &Step) -> bool {
        self.status.is_started() && self.next_step == *step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&Status::Started).unwrap(), "\"started\"");
        assert_eq!(serde_json::to_string(&Status::Abort).unwrap(), "\"abort\"");
        assert_eq!(
            serde_json::from_str::<Status>("\"stopped\"").unwrap(),
            Status::Stopped
        );
    }

    #[test]
    fn test_unrecognized_status_is_kept_verbatim() {
        let status: Status = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(status, Status::Unrecognized("paused".to_string()));
        assert!(!status.is_started());
        assert!(!status.is_activating());
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"paused\"");
    }

    #[test]
    fn test_step_cycle() {
        assert_eq!(Step::FirstContact.next(), Some(Step::SecondContact));
        assert_eq!(Step::SecondContact.next(), Some(Step::Escalation));
        assert_eq!(Step::Escalation.next(), Some(Step::FirstContact));
        assert_eq!(Step::from("thirdEmail").next(), None);
    }

    #[test]
    fn test_step_activity_mapping() {
        assert_eq!(Step::Escalation.activity(), Some(Activity::Escalation));
        assert_eq!(Step::from("bogus").activity(), None);
        assert_eq!(Activity::NextSendDate.name(), "nextSendDate");
    }

    #[test]
    fn test_default_record() {
        let record = StateRecord::default();
        assert_eq!(record.status, Status::Stopped);
        assert_eq!(record.next_step, Step::FirstContact);
        assert_eq!(record.next_send_date, 0);
        assert!(!record.deadline_dirty);
        assert_eq!(record.iterations, 0);
    }

    #[test]
    fn test_record_wire_shape_is_camel_case() {
        let json = serde_json::to_value(StateRecord::default()).unwrap();
        assert_eq!(json["nextStep"], "firstContact");
        assert_eq!(json["nextSendDate"], 0);
        assert_eq!(json["deadlineDirty"], false);
    }

    #[test]
    fn test_checkpoint_seed_resets_iterations_only() {
        let record = StateRecord {
            status: Status::Started,
            next_step: Step::Escalation,
            next_send_date: 1_700_000_000_000,
            deadline_dirty: true,
            iterations: 50,
        };
        let seed = record.checkpoint_seed();
        assert_eq!(seed.iterations, 0);
        assert!(!seed.deadline_dirty);
        assert_eq!(seed.status, record.status);
        assert_eq!(seed.next_step, record.next_step);
        assert_eq!(seed.next_send_date, record.next_send_date);
    }

    #[test]
    fn test_is_at_requires_started() {
        let mut record = StateRecord::default();
        assert!(!record.is_at(&Step::FirstContact));
        record.status = Status::Started;
        assert!(record.is_at(&Step::FirstContact));
        assert!(!record.is_at(&Step::SecondContact));
    }

    #[test]
    fn test_process_params_key_and_category() {
        let params = ProcessParams::new("123", Category::Po);
        assert_eq!(params.key(), "process-123");
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["category"], "PO");
        assert_eq!(json["subjectId"], "123");
    }
}
