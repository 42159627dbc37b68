//! Error taxonomy.
//!
//! `DriverError` is what a single browser interaction can fail with.
//! `TaskFault` is scoped to one task and always ends up as an `Outcome`.
//! `FatalError` is the only kind that aborts a run.

use std::time::Duration;
use thiserror::Error;

use crate::types::{Outcome, ToggleObservation, ToggleState, truncate_message};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("browser error: {0}")]
    Browser(String),
}

impl DriverError {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        DriverError::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Absence or slowness the flow anticipates, as opposed to a broken browser.
    pub fn is_expected_absence(&self) -> bool {
        matches!(
            self,
            DriverError::ElementNotFound(_) | DriverError::Timeout { .. }
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FatalError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("no usable browser engine: {0}")]
    EngineUnavailable(String),

    #[error("run panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskFault {
    #[error("Toggle element not found (timeout waiting for element after retry)")]
    ElementNotFound,

    #[error("save control not found")]
    SaveControlMissing { before: ToggleState },

    #[error("Failed to set toggle to {desired}. Current state: {}", observation.after)]
    PostconditionMismatch {
        desired: ToggleState,
        observation: ToggleObservation,
    },

    #[error("{0}")]
    Unexpected(#[from] DriverError),
}

impl TaskFault {
    /// Converts the fault into the task's terminal outcome.
    ///
    /// `observed` carries whatever was read before the flow broke; it is only
    /// used for unexpected faults, the other variants carry their own states.
    pub fn into_outcome(self, observed: ToggleObservation, message_limit: usize) -> Outcome {
        let message = self.to_string();
        match self {
            TaskFault::ElementNotFound => Outcome::not_found(message),
            TaskFault::SaveControlMissing { before } => Outcome::failed(
                ToggleObservation {
                    before,
                    after: ToggleState::Unknown,
                },
                message,
            ),
            TaskFault::PostconditionMismatch { observation, .. } => {
                Outcome::failed(observation, message)
            }
            TaskFault::Unexpected(_) => {
                Outcome::error(observed, truncate_message(&message, message_limit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OutcomeStatus;

    #[test]
    fn unexpected_fault_message_is_truncated() {
        let fault = TaskFault::from(DriverError::Browser("x".repeat(300)));
        let outcome = fault.into_outcome(ToggleObservation::default(), 100);
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert!(outcome.message.chars().count() <= 103);
    }

    #[test]
    fn save_missing_reports_unknown_after() {
        let outcome = TaskFault::SaveControlMissing {
            before: ToggleState::On,
        }
        .into_outcome(ToggleObservation::default(), 100);
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.observation.before, ToggleState::On);
        assert_eq!(outcome.observation.after, ToggleState::Unknown);
        assert!(outcome.message.contains("save control not found"));
    }

    #[test]
    fn timeouts_count_as_expected_absence() {
        assert!(DriverError::timeout("toggle", Duration::from_secs(1)).is_expected_absence());
        assert!(!DriverError::Browser("gone".into()).is_expected_absence());
    }
}
