use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::{ApplicationKind, Scalar};
use crate::errors::ErrorKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
    pub success: bool,
    pub error: String,
    pub kind: Option<ErrorKind>,
}

impl ActionOutcome {
    pub fn duration_ms(&self) -> i64 {
        (self.end - self.start).whole_milliseconds() as i64
    }
}

/// One per `ApplicationSpec`, §3. Appended to the Executor's results
/// sequence in plan order, never mutated once `DONE` is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub app_name: String,
    pub app_kind: ApplicationKind,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
    pub screenshots: Vec<String>,
    pub videos: Vec<String>,
    pub metrics: HashMap<String, Scalar>,
    pub success: bool,
    pub error: String,
    pub action_outcomes: Vec<ActionOutcome>,
}

impl TestResult {
    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).whole_milliseconds() as i64
    }

    /// Invariant 2 from §3: `success` implies an empty error and every
    /// action outcome having succeeded.
    pub fn is_internally_consistent(&self) -> bool {
        if self.success && !self.error.is_empty() {
            return false;
        }
        if self.success && self.action_outcomes.iter().any(|a| !a.success) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_ms_matches_wall_clock_delta() {
        let start = OffsetDateTime::UNIX_EPOCH;
        let end = start + time::Duration::milliseconds(1500);
        let result = TestResult {
            app_name: "a".into(),
            app_kind: ApplicationKind::Web,
            start_time: start,
            end_time: end,
            screenshots: vec![],
            videos: vec![],
            metrics: HashMap::new(),
            success: true,
            error: String::new(),
            action_outcomes: vec![],
        };
        assert_eq!(result.duration_ms(), 1500);
        assert!(result.is_internally_consistent());
    }

    #[test]
    fn success_with_nonempty_error_is_inconsistent() {
        let start = OffsetDateTime::UNIX_EPOCH;
        let result = TestResult {
            app_name: "a".into(),
            app_kind: ApplicationKind::Web,
            start_time: start,
            end_time: start,
            screenshots: vec![],
            videos: vec![],
            metrics: HashMap::new(),
            success: true,
            error: "boom".into(),
            action_outcomes: vec![],
        };
        assert!(!result.is_internally_consistent());
    }
}
