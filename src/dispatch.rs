//! Batch-by-batch processing of the task list inside one session.
//!
//! Each batch opens its pages first, lets them load together, then evaluates
//! them one at a time in task order. Every page of a batch is closed before
//! the next batch opens anything, which caps open pages at the batch size.

use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info};

use crate::config::RunConfig;
use crate::driver::{BrowserEngine, PageDriver, PageGuard};
use crate::locator::ElementLocator;
use crate::report::ResultAggregator;
use crate::session::Session;
use crate::toggle::ToggleMachine;
use crate::types::{Outcome, OutcomeStatus, Task, ToggleObservation, truncate_message};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Opening,
    Checking,
    Finished(OutcomeStatus),
}

/// Progress notifications. Purely informational; nothing waits on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    BatchStarted {
        number: usize,
        total: usize,
        size: usize,
    },
    Task {
        index: usize,
        total: usize,
        url: String,
        stage: Stage,
    },
}

pub type EventSender = UnboundedSender<DispatchEvent>;

enum Slot<P: PageDriver> {
    Open(PageGuard<P>),
    Done(Outcome),
}

pub struct BatchDispatcher<'a> {
    locator: &'a ElementLocator,
    config: &'a RunConfig,
    events: Option<&'a EventSender>,
}

impl<'a> BatchDispatcher<'a> {
    pub fn new(locator: &'a ElementLocator, config: &'a RunConfig) -> Self {
        Self {
            locator,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<&'a EventSender>) -> Self {
        self.events = events;
        self
    }

    /// Processes every task and records exactly one outcome per task, in order.
    ///
    /// The first task runs on the session's login page, which is already
    /// parked on its URL; all other tasks get a fresh page.
    pub fn run<E: BrowserEngine>(
        &self,
        session: &mut Session<'_, E>,
        tasks: &[Task],
        aggregator: &mut ResultAggregator,
    ) {
        let Some(first) = tasks.first() else {
            return;
        };
        let mut landing = session.take_landing(&first.url);
        if first.skip_reason.is_some() {
            landing = None;
        }

        let batch_size = self.config.batch_size.max(1);
        let total = tasks.len();
        let total_batches = total.div_ceil(batch_size);
        info!(
            "Step 2: Processing {} URLs in {} batches of up to {} URLs each",
            total, total_batches, batch_size
        );

        for (number, batch) in tasks.chunks(batch_size).enumerate() {
            self.emit(DispatchEvent::BatchStarted {
                number: number + 1,
                total: total_batches,
                size: batch.len(),
            });
            info!(
                "Processing batch {}/{} ({} URLs)...",
                number + 1,
                total_batches,
                batch.len()
            );
            self.run_batch(session, batch, number * batch_size, total, landing.take(), aggregator);
        }
    }

    fn run_batch<E: BrowserEngine>(
        &self,
        session: &Session<'_, E>,
        batch: &[Task],
        start: usize,
        total: usize,
        mut landing: Option<PageGuard<E::Page>>,
        aggregator: &mut ResultAggregator,
    ) {
        let timing = &self.config.timing;
        let navigation = Duration::from_millis(timing.navigation_timeout_ms);

        let mut slots: Vec<Slot<E::Page>> = Vec::with_capacity(batch.len());
        for (offset, task) in batch.iter().enumerate() {
            self.emit_task(start + offset, total, task, Stage::Opening);

            if let Some(reason) = &task.skip_reason {
                slots.push(Slot::Done(Outcome::skipped(reason.clone())));
                continue;
            }
            if offset == 0 {
                if let Some(page) = landing.take() {
                    slots.push(Slot::Open(page));
                    continue;
                }
            }

            match session.open_page(&task.url, navigation) {
                Ok(page) => {
                    info!("Opened: {}", task.short_name());
                    slots.push(Slot::Open(page));
                }
                Err(e) => {
                    error!("Failed to open {}: {}", task.short_name(), e);
                    let message = truncate_message(&e.to_string(), self.config.message_max_chars);
                    slots.push(Slot::Done(Outcome::error(
                        ToggleObservation::default(),
                        format!("Failed to open page: {}", message),
                    )));
                }
            }
        }

        let opened = slots.iter().filter(|s| matches!(s, Slot::Open(_))).count();
        if opened > 0 {
            info!("Waiting for {} pages to load...", opened);
            let idle = Duration::from_millis(timing.batch_idle_timeout_ms);
            for slot in &slots {
                if let Slot::Open(page) = slot {
                    let _ = page.wait_for_network_idle(idle);
                }
            }
        }

        let machine = ToggleMachine::new(self.locator, self.config);
        for (offset, (slot, task)) in slots.into_iter().zip(batch).enumerate() {
            let index = start + offset;
            let outcome = match slot {
                Slot::Done(outcome) => outcome,
                Slot::Open(page) => {
                    self.emit_task(index, total, task, Stage::Checking);
                    let outcome = self.evaluate(&machine, &*page, task);
                    drop(page);
                    outcome
                }
            };

            info!(
                "Result for {}: {} - {}",
                task.short_name(),
                outcome.status,
                outcome.message
            );
            self.emit_task(index, total, task, Stage::Finished(outcome.status));
            aggregator.record(task, outcome);
        }
    }

    fn evaluate<P: PageDriver + ?Sized>(&self, machine: &ToggleMachine<'_>, page: &P, task: &Task) -> Outcome {
        if let Err(e) = page.bring_to_front() {
            error!("Error processing {}: {}", task.short_name(), e);
            let message = truncate_message(&e.to_string(), self.config.message_max_chars);
            return Outcome::error(ToggleObservation::default(), format!("Error: {}", message));
        }
        page.pause(Duration::from_millis(self.config.timing.focus_settle_ms));
        machine.apply(page, task.desired_state)
    }

    fn emit_task(&self, index: usize, total: usize, task: &Task, stage: Stage) {
        self.emit(DispatchEvent::Task {
            index,
            total,
            url: task.url.clone(),
            stage,
        });
    }

    fn emit(&self, event: DispatchEvent) {
        if let Some(events) = self.events {
            let _ = events.send(event);
        }
    }
}
