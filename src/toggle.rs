//! Read-modify-verify of a single boolean control.
//!
//! `observe` finds the control (with one reload retry) and reads it. `apply`
//! compares against the desired state and only clicks when they differ, then
//! saves and re-reads to verify. Every task-local failure ends up as an
//! `Outcome`; nothing escapes to the caller.

use std::time::Duration;
use tracing::{info, warn};

use crate::config::{RunConfig, Timing};
use crate::driver::{ClickMode, ElementHandle, PageDriver, stabilize};
use crate::errors::{DriverError, TaskFault};
use crate::locator::{ElementLocator, Intent};
use crate::overlay::OverlayDismisser;
use crate::types::{Outcome, ToggleObservation, ToggleState};

/// The control as found by `observe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    pub handle: ElementHandle,
    pub state: ToggleState,
}

pub struct ToggleMachine<'a> {
    locator: &'a ElementLocator,
    dismisser: OverlayDismisser<'a>,
    timing: &'a Timing,
    message_limit: usize,
}

impl<'a> ToggleMachine<'a> {
    pub fn new(locator: &'a ElementLocator, config: &'a RunConfig) -> Self {
        let timing = &config.timing;
        Self {
            locator,
            dismisser: OverlayDismisser::new(
                locator,
                Duration::from_millis(timing.overlay_click_settle_ms),
                Duration::from_millis(timing.escape_settle_ms),
            ),
            timing,
            message_limit: config.message_max_chars,
        }
    }

    /// Settles the page, clears overlays and reads the toggle.
    ///
    /// A control that does not show up gets exactly one reload-and-retry
    /// before the task is declared `ElementNotFound`.
    pub fn observe<P: PageDriver + ?Sized>(&self, page: &P) -> Result<Observed, TaskFault> {
        self.prepare(page);

        let wait = Duration::from_millis(self.timing.toggle_wait_ms);
        let handle = match self.locator.wait_for(page, Intent::Toggle, wait) {
            Ok(handle) => handle,
            Err(e) if e.is_expected_absence() => {
                info!("Toggle not found, refreshing page and retrying...");
                page.reload(Duration::from_millis(self.timing.navigation_timeout_ms))?;
                self.prepare(page);
                match self.locator.wait_for(page, Intent::Toggle, wait) {
                    Ok(handle) => handle,
                    Err(e) if e.is_expected_absence() => {
                        info!("Toggle not found after retry");
                        return Err(TaskFault::ElementNotFound);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        let state = ToggleState::from(page.is_checked(&handle)?);
        Ok(Observed { handle, state })
    }

    /// Drives the page's toggle to `desired`, or only reports it when `None`.
    pub fn apply<P: PageDriver + ?Sized>(&self, page: &P, desired: Option<bool>) -> Outcome {
        let mut observation = ToggleObservation::default();
        match self.drive(page, desired, &mut observation) {
            Ok(outcome) => outcome,
            Err(fault) => {
                if let TaskFault::Unexpected(ref e) = fault {
                    warn!("Error: {}", e);
                }
                fault.into_outcome(observation, self.message_limit)
            }
        }
    }

    fn drive<P: PageDriver + ?Sized>(
        &self,
        page: &P,
        desired: Option<bool>,
        observation: &mut ToggleObservation,
    ) -> Result<Outcome, TaskFault> {
        let observed = self.observe(page)?;
        let before = observed.state;
        observation.before = before;

        let Some(desired) = desired else {
            info!("Toggle state: {}", before);
            return Ok(Outcome::success(
                ToggleObservation::unchanged(before),
                format!("Toggle is {}", before),
            ));
        };
        let target = ToggleState::from(desired);
        info!("Toggle state before: {}, Desired: {}", before, target);

        if before.matches(desired) {
            info!("Already in desired state, no action needed");
            return Ok(Outcome::success(
                ToggleObservation::unchanged(before),
                format!("Already in desired state: {}", target),
            ));
        }

        self.dismisser.dismiss(page);
        self.click_with_fallback(page, &observed.handle)?;
        info!("Toggle clicked");
        page.pause(Duration::from_millis(self.timing.toggle_click_settle_ms));

        self.dismisser.dismiss(page);
        let save = self
            .locator
            .locate(page, Intent::Save)?
            .ok_or(TaskFault::SaveControlMissing { before })?;
        self.click_with_fallback(page, &save)?;
        info!("Save clicked");

        stabilize(
            page,
            Duration::from_millis(self.timing.save_idle_timeout_ms),
            Duration::from_millis(self.timing.save_settle_ms),
        );

        // The page may redraw after saving; give the control time to come back.
        let wait = Duration::from_millis(self.timing.toggle_wait_ms);
        let after = match self.locator.wait_for(page, Intent::Toggle, wait) {
            Ok(handle) => ToggleState::from(page.is_checked(&handle)?),
            Err(e) if e.is_expected_absence() => ToggleState::Unknown,
            Err(e) => return Err(e.into()),
        };
        observation.after = after;
        info!("Toggle state after: {}", after);

        if after.matches(desired) {
            Ok(Outcome::success(
                *observation,
                format!("Toggle set to {} (was {})", target, before),
            ))
        } else {
            Err(TaskFault::PostconditionMismatch {
                desired: target,
                observation: *observation,
            })
        }
    }

    fn prepare<P: PageDriver + ?Sized>(&self, page: &P) {
        stabilize(
            page,
            Duration::from_millis(self.timing.network_idle_timeout_ms),
            Duration::from_millis(self.timing.settle_ms),
        );
        self.dismisser.dismiss(page);
    }

    /// Some controls sit under layers that swallow real mouse events; those
    /// get a script click instead.
    fn click_with_fallback<P: PageDriver + ?Sized>(
        &self,
        page: &P,
        handle: &ElementHandle,
    ) -> Result<(), DriverError> {
        if let Err(e) = page.click(handle, ClickMode::Native) {
            info!("Normal click failed ({}), trying force click...", e);
            page.click(handle, ClickMode::Forced)?;
        }
        Ok(())
    }
}
