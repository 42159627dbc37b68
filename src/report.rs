//! Outcome accumulation, the final report and its file export.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::errors::FatalError;
use crate::types::{Outcome, OutcomeStatus, RunMode, Task, ToggleState, short_url, truncate_message};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write CSV report: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to write JSON report: {0}")]
    Json(#[from] serde_json::Error),
}

/// One row of the exported report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub url: String,
    pub user_id: String,
    pub status: OutcomeStatus,
    pub desired_state: Option<ToggleState>,
    pub state_before: ToggleState,
    pub state_after: ToggleState,
    pub message: String,
    pub recorded_at: DateTime<Local>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub error: usize,
    pub skipped: usize,
    pub not_found: usize,
    pub on: usize,
    pub off: usize,
    pub unknown: usize,
}

impl Counts {
    fn tally(records: &[OutcomeRecord]) -> Self {
        let mut counts = Counts {
            total: records.len(),
            ..Counts::default()
        };
        for record in records {
            match record.status {
                OutcomeStatus::Success => counts.success += 1,
                OutcomeStatus::Failed => counts.failed += 1,
                OutcomeStatus::Error => counts.error += 1,
                OutcomeStatus::Skipped => counts.skipped += 1,
                OutcomeStatus::NotFound => counts.not_found += 1,
            }
            match (record.status, record.state_after) {
                (OutcomeStatus::Success, ToggleState::On) => counts.on += 1,
                (OutcomeStatus::Success, ToggleState::Off) => counts.off += 1,
                _ => counts.unknown += 1,
            }
        }
        counts
    }
}

/// Owned accumulator handed to the dispatcher. `finalize` consumes it.
pub struct ResultAggregator {
    mode: RunMode,
    records: Vec<OutcomeRecord>,
}

impl ResultAggregator {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            records: Vec::new(),
        }
    }

    pub fn record(&mut self, task: &Task, outcome: Outcome) {
        self.records.push(OutcomeRecord {
            url: task.url.clone(),
            user_id: task.credential.user_id.clone(),
            status: outcome.status,
            desired_state: task.desired_state.map(ToggleState::from),
            state_before: outcome.observation.before,
            state_after: outcome.observation.after,
            message: outcome.message,
            recorded_at: outcome.recorded_at,
        });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn finalize(self, abort: Option<&FatalError>) -> Report {
        let counts = Counts::tally(&self.records);
        info!(
            "Summary - Total: {}, Success: {}, Failed: {}, Errors: {}, Skipped: {}, Not found: {}",
            counts.total, counts.success, counts.failed, counts.error, counts.skipped, counts.not_found
        );
        Report {
            mode: self.mode,
            counts,
            records: self.records,
            aborted: abort.map(|e| e.to_string()),
            generated_at: Local::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub mode: RunMode,
    pub counts: Counts,
    pub records: Vec<OutcomeRecord>,
    /// Reason the run stopped early, if it did.
    pub aborted: Option<String>,
    pub generated_at: DateTime<Local>,
}

impl Report {
    /// No task-local problems and no fatal abort.
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none() && self.counts.success == self.counts.total
    }

    pub fn issues(&self) -> impl Iterator<Item = &OutcomeRecord> {
        self.records.iter().filter(|r| r.status != OutcomeStatus::Success)
    }

    /// Console summary. Every non-success record is listed with a shortened message.
    pub fn summary(&self, message_limit: usize) -> String {
        let rule = "=".repeat(60);
        let thin = "-".repeat(60);
        let c = &self.counts;
        let mut out = String::new();

        let _ = writeln!(out, "{}", rule);
        match self.mode {
            RunMode::Inspect => {
                let _ = writeln!(out, "                  TOGGLE STATUS REPORT");
                let _ = writeln!(out, "{}", rule);
                let _ = writeln!(out, "  Total URLs:       {}", c.total);
                let _ = writeln!(out, "  Toggle ON:        {}", c.on);
                let _ = writeln!(out, "  Toggle OFF:       {}", c.off);
                let _ = writeln!(out, "  Unknown:          {}", c.unknown);
                let _ = writeln!(out, "{}", rule);
                let _ = writeln!(out, "  DETAILED STATUS:");
                for record in &self.records {
                    let (icon, label) = match (record.status, record.state_after) {
                        (OutcomeStatus::Success, ToggleState::On) => ("+", "ON".to_string()),
                        (OutcomeStatus::Success, ToggleState::Off) => ("-", "OFF".to_string()),
                        (status, _) => ("?", status.to_string()),
                    };
                    let _ = writeln!(out, "  [{}] {:<9} | {}", icon, label, short_url(&record.url));
                }
            }
            RunMode::Enforce { desired } => {
                let _ = writeln!(out, "          EXECUTION SUMMARY (target: {})", ToggleState::from(desired));
                let _ = writeln!(out, "{}", rule);
                let all_good = if c.total > 0 && c.success == c.total { " (all good!)" } else { "" };
                let _ = writeln!(out, "  Total processed:  {}", c.total);
                let _ = writeln!(out, "  Successful:       {}{}", c.success, all_good);
                let _ = writeln!(out, "  Failed:           {}", c.failed);
                let _ = writeln!(out, "  Errors:           {}", c.error);
                let _ = writeln!(out, "  Not found:        {}", c.not_found);
                let _ = writeln!(out, "  Skipped:          {}", c.skipped);
            }
        }
        let _ = writeln!(out, "{}", rule);

        if self.issues().next().is_some() {
            let _ = writeln!(out, "\n  ISSUES FOUND:");
            let _ = writeln!(out, "{}", thin);
            for record in self.issues() {
                let _ = writeln!(out, "  [X] {} ({})", short_url(&record.url), record.status);
                let _ = writeln!(out, "      {}", truncate_message(&record.message, message_limit));
            }
            let _ = writeln!(out, "{}", thin);
        }

        if let Some(reason) = &self.aborted {
            let _ = writeln!(out, "\n  RUN ABORTED: {}", reason);
            let _ = writeln!(out, "{}", rule);
        }

        out
    }

    /// Writes the report as JSON for a `.json` path and as CSV records otherwise.
    pub fn write_to(&self, path: &Path) -> Result<(), ReportError> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            let writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(writer, self)?;
        } else {
            let mut writer = csv::Writer::from_path(path)?;
            for record in &self.records {
                writer.serialize(record)?;
            }
            writer.flush()?;
        }
        info!("Results saved to: {}", path.display());
        Ok(())
    }
}
