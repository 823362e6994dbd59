//! Identity and time helpers
//!
//! Workflow instances are addressed by a stable key derived from the subject, so
//! that every execution of the same logical process resolves to the same key.

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Identity key for the process driving a subject
///
/// Format: `process-{subject_id}`
pub fn process_key(subject_id: &str) -> String {
    format!("process-{}", subject_id)
}
