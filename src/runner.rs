//! One complete run: launch, establish the session, dispatch, tear down, report.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tracing::{error, info};

use crate::config::RunConfig;
use crate::dispatch::{BatchDispatcher, EventSender};
use crate::driver::BrowserEngine;
use crate::errors::{DriverError, FatalError};
use crate::locator::ElementLocator;
use crate::report::{Report, ResultAggregator};
use crate::session::SessionManager;
use crate::types::{RunMode, Task};

/// Runs every task and always returns a finalized report.
///
/// Fatal conditions (no engine, failed login) stop processing but still go
/// through teardown and finalization, so outcomes collected so far survive.
/// An empty task list never launches a browser.
pub fn execute<E, L>(
    config: &RunConfig,
    mode: RunMode,
    tasks: &[Task],
    launch: L,
    events: Option<&EventSender>,
) -> Report
where
    E: BrowserEngine,
    L: FnOnce() -> Result<E, DriverError>,
{
    let mut aggregator = ResultAggregator::new(mode);

    let abort = if tasks.is_empty() {
        info!("No URLs to process");
        None
    } else {
        // A panic must not lose the outcomes recorded so far. The engine is
        // dropped during unwinding, which closes the browser.
        panic::catch_unwind(AssertUnwindSafe(|| {
            drive(config, tasks, launch, events, &mut aggregator)
        }))
        .unwrap_or_else(|payload| Err(FatalError::Panicked(panic_message(payload.as_ref()))))
        .err()
    };

    if let Some(e) = &abort {
        error!("Run aborted: {}", e);
    }
    aggregator.finalize(abort.as_ref())
}

fn drive<E, L>(
    config: &RunConfig,
    tasks: &[Task],
    launch: L,
    events: Option<&EventSender>,
    aggregator: &mut ResultAggregator,
) -> Result<(), FatalError>
where
    E: BrowserEngine,
    L: FnOnce() -> Result<E, DriverError>,
{
    info!("Starting browser...");
    let engine = launch().map_err(|e| FatalError::EngineUnavailable(e.to_string()))?;
    info!("Using: {}", engine.name());

    let result = process(&engine, config, tasks, events, aggregator);
    engine.shutdown();
    result
}

fn process<E: BrowserEngine>(
    engine: &E,
    config: &RunConfig,
    tasks: &[Task],
    events: Option<&EventSender>,
    aggregator: &mut ResultAggregator,
) -> Result<(), FatalError> {
    let locator = ElementLocator::new(
        config.locator.clone(),
        Duration::from_millis(config.timing.poll_interval_ms),
    );
    let mut session = SessionManager::new(&locator, &config.timing).establish(engine, &tasks[0])?;

    BatchDispatcher::new(&locator, config)
        .with_events(events)
        .run(&mut session, tasks, aggregator);
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
