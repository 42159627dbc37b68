//! Browser capability the core is written against.
//!
//! Every wait takes an explicit bound. The production implementation lives in
//! `chrome.rs`; tests use a scripted fake.

use std::ops::Deref;
use std::time::Duration;
use tracing::debug;

use crate::errors::DriverError;
use crate::locator::Candidate;

/// CSS selector addressing one concrete element that a `Candidate` resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    selector: String,
}

impl ElementHandle {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
        }
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickMode {
    /// Real mouse events at the element's center.
    Native,
    /// `element.click()` from script; goes through click-intercepting layers.
    Forced,
}

pub trait PageDriver {
    fn goto(&self, url: &str, timeout: Duration) -> Result<(), DriverError>;
    fn reload(&self, timeout: Duration) -> Result<(), DriverError>;
    fn bring_to_front(&self) -> Result<(), DriverError>;
    fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), DriverError>;
    fn pause(&self, duration: Duration);

    /// First element matching the candidate, if any.
    fn resolve(&self, candidate: &Candidate) -> Result<Option<ElementHandle>, DriverError>;
    fn is_visible(&self, element: &ElementHandle) -> Result<bool, DriverError>;
    fn click(&self, element: &ElementHandle, mode: ClickMode) -> Result<(), DriverError>;
    fn fill(&self, element: &ElementHandle, text: &str) -> Result<(), DriverError>;
    fn is_checked(&self, element: &ElementHandle) -> Result<bool, DriverError>;
    fn press_key(&self, key: &str) -> Result<(), DriverError>;
    fn run_script(&self, script: &str) -> Result<(), DriverError>;
    fn close(&self) -> Result<(), DriverError>;
}

/// One browser instance with one browsing context. Pages share its cookies.
pub trait BrowserEngine {
    type Page: PageDriver;

    fn name(&self) -> &str;
    fn new_page(&self) -> Result<Self::Page, DriverError>;
    fn shutdown(self);
}

/// Owns an open page and closes it when dropped, whatever path the caller took.
pub struct PageGuard<P: PageDriver> {
    page: P,
}

impl<P: PageDriver> PageGuard<P> {
    pub fn new(page: P) -> Self {
        Self { page }
    }
}

impl<P: PageDriver> Deref for PageGuard<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.page
    }
}

impl<P: PageDriver> Drop for PageGuard<P> {
    fn drop(&mut self) {
        if let Err(e) = self.page.close() {
            debug!("page close failed: {}", e);
        }
    }
}

/// Polls a page load check until it reports the same settled snapshot for a
/// quiet window, or gives up after `timeout`.
///
/// The check returns `None` while the document is still loading. Navigation
/// and script errors count as "still loading", since a redirect tears the
/// document down under the check; any other error ends the wait. Attempts are
/// counted from the poll interval like `ElementLocator::wait_for`.
pub fn wait_until_settled<P, F>(
    page: &P,
    timeout: Duration,
    poll: Duration,
    quiet: Duration,
    mut check: F,
) -> Result<(), DriverError>
where
    P: PageDriver + ?Sized,
    F: FnMut() -> Result<Option<String>, DriverError>,
{
    let poll_ms = poll.as_millis().max(1);
    let attempts = (timeout.as_millis() / poll_ms).max(1);
    let quiet_polls = (quiet.as_millis() / poll_ms).max(1);

    let mut last: Option<String> = None;
    let mut stable = 0;
    for attempt in 0..attempts {
        let snapshot = match check() {
            Ok(snapshot) => snapshot,
            Err(DriverError::Navigation(reason)) | Err(DriverError::Script(reason)) => {
                debug!("document replaced while waiting for idle: {}", reason);
                None
            }
            Err(e) => return Err(e),
        };

        match snapshot {
            Some(current) if last.as_deref() == Some(current.as_str()) => {
                stable += 1;
                if stable >= quiet_polls {
                    return Ok(());
                }
            }
            other => {
                last = other;
                stable = 0;
            }
        }
        if attempt + 1 < attempts {
            page.pause(poll);
        }
    }
    Err(DriverError::timeout("network idle", timeout))
}

/// Bounded network-idle wait followed by a fixed settle.
///
/// The idle wait is best-effort here: a timeout is logged, not returned.
pub fn stabilize<P: PageDriver + ?Sized>(page: &P, idle_timeout: Duration, settle: Duration) {
    if let Err(e) = page.wait_for_network_idle(idle_timeout) {
        debug!("page still loading, continuing: {}", e);
    }
    page.pause(settle);
}
