use std::time::Duration;
use tracing::{debug, info};

use crate::driver::{ClickMode, PageDriver};
use crate::locator::{ElementLocator, Intent};

/// Best-effort removal of guides, tooltips and modals sitting on top of the page.
pub struct OverlayDismisser<'a> {
    locator: &'a ElementLocator,
    click_settle: Duration,
    escape_settle: Duration,
}

impl<'a> OverlayDismisser<'a> {
    pub fn new(locator: &'a ElementLocator, click_settle: Duration, escape_settle: Duration) -> Self {
        Self {
            locator,
            click_settle,
            escape_settle,
        }
    }

    /// Returns true when a close control was clicked. Never fails.
    ///
    /// A successful click ends the attempt; otherwise Escape is sent and the
    /// known overlay nodes are removed from the DOM.
    pub fn dismiss<P: PageDriver + ?Sized>(&self, page: &P) -> bool {
        for candidate in self.locator.candidates(Intent::OverlayClose) {
            let handle = match page.resolve(candidate) {
                Ok(Some(handle)) => handle,
                Ok(None) => continue,
                Err(e) => {
                    debug!("overlay candidate {} failed: {}", candidate, e);
                    continue;
                }
            };
            if !page.is_visible(&handle).unwrap_or(false) {
                continue;
            }
            match page.click(&handle, ClickMode::Forced) {
                Ok(()) => {
                    info!("Dismissed overlay using: {}", candidate);
                    page.pause(self.click_settle);
                    return true;
                }
                Err(e) => debug!("overlay close {} not clickable: {}", candidate, e),
            }
        }

        match page.press_key("Escape") {
            Ok(()) => page.pause(self.escape_settle),
            Err(e) => debug!("escape failed: {}", e),
        }

        let markers = &self.locator.profile().overlay_markers;
        if !markers.is_empty() {
            if let Err(e) = page.run_script(&removal_script(markers)) {
                debug!("overlay removal script failed: {}", e);
            }
        }

        false
    }
}

fn removal_script(markers: &[String]) -> String {
    let selector = serde_json::to_string(&markers.join(", ")).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "(() => {{ document.querySelectorAll({}).forEach(el => el.remove()); return true; }})()",
        selector
    )
}
