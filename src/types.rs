use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Login pair for the target site. The password never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One row of work: a settings page to visit and what to do with its toggle.
///
/// `desired_state == None` means inspect only. A task carrying a `skip_reason`
/// is reported as skipped without ever opening a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub url: String,
    pub credential: Credential,
    pub desired_state: Option<bool>,
    pub skip_reason: Option<String>,
}

impl Task {
    pub fn new(url: impl Into<String>, user_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credential: Credential {
                user_id: user_id.into(),
                password: password.into(),
            },
            desired_state: None,
            skip_reason: None,
        }
    }

    pub fn with_desired_state(mut self, desired: Option<bool>) -> Self {
        self.desired_state = desired;
        self
    }

    pub fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.skip_reason = Some(reason.into());
        self
    }

    /// Last path segment of the URL, used in progress lines and summaries.
    pub fn short_name(&self) -> &str {
        short_url(&self.url)
    }
}

pub fn short_url(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Observed state of a toggle control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToggleState {
    On,
    Off,
    #[default]
    Unknown,
}

impl ToggleState {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            ToggleState::On => Some(true),
            ToggleState::Off => Some(false),
            ToggleState::Unknown => None,
        }
    }

    pub fn matches(self, desired: bool) -> bool {
        self.as_bool() == Some(desired)
    }
}

impl From<bool> for ToggleState {
    fn from(checked: bool) -> Self {
        if checked { ToggleState::On } else { ToggleState::Off }
    }
}

impl fmt::Display for ToggleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToggleState::On => "ON",
            ToggleState::Off => "OFF",
            ToggleState::Unknown => "UNKNOWN",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToggleObservation {
    pub before: ToggleState,
    pub after: ToggleState,
}

impl ToggleObservation {
    pub fn unchanged(state: ToggleState) -> Self {
        Self {
            before: state,
            after: state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Failed,
    Error,
    Skipped,
    NotFound,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutcomeStatus::Success => "SUCCESS",
            OutcomeStatus::Failed => "FAILED",
            OutcomeStatus::Error => "ERROR",
            OutcomeStatus::Skipped => "SKIPPED",
            OutcomeStatus::NotFound => "NOT_FOUND",
        })
    }
}

/// Terminal classification of a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub observation: ToggleObservation,
    pub message: String,
    pub recorded_at: DateTime<Local>,
}

impl Outcome {
    pub fn new(status: OutcomeStatus, observation: ToggleObservation, message: impl Into<String>) -> Self {
        Self {
            status,
            observation,
            message: message.into(),
            recorded_at: Local::now(),
        }
    }

    pub fn success(observation: ToggleObservation, message: impl Into<String>) -> Self {
        Self::new(OutcomeStatus::Success, observation, message)
    }

    pub fn failed(observation: ToggleObservation, message: impl Into<String>) -> Self {
        Self::new(OutcomeStatus::Failed, observation, message)
    }

    pub fn error(observation: ToggleObservation, message: impl Into<String>) -> Self {
        Self::new(OutcomeStatus::Error, observation, message)
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self::new(OutcomeStatus::Skipped, ToggleObservation::default(), message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(OutcomeStatus::NotFound, ToggleObservation::default(), message)
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Whether the run only reads toggles or drives them to a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Inspect,
    Enforce { desired: bool },
}

impl RunMode {
    pub fn desired_state(self) -> Option<bool> {
        match self {
            RunMode::Inspect => None,
            RunMode::Enforce { desired } => Some(desired),
        }
    }
}

/// Parses the human spelling of a toggle value ("ON", " off ").
pub fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

/// Char-boundary safe truncation, marked with a trailing ellipsis when cut.
pub fn truncate_message(message: &str, limit: usize) -> String {
    if message.chars().count() <= limit {
        return message.to_string();
    }
    let mut cut: String = message.chars().take(limit).collect();
    cut.push_str("...");
    cut
}

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const ERROR_MESSAGE_MAX_CHARS: usize = 100;
pub const SUMMARY_MESSAGE_MAX_CHARS: usize = 50;
