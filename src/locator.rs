//! Intent-based element lookup.
//!
//! Each UI intent maps to an ordered list of candidates; the first candidate
//! that resolves on the page wins. The lists live in a serializable
//! `LocatorProfile`, so a changed site layout is a config change.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::driver::{ElementHandle, PageDriver};
use crate::errors::DriverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    LoginUsername,
    LoginPassword,
    LoginSubmit,
    Toggle,
    Save,
    OverlayClose,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Intent::LoginUsername => "login username field",
            Intent::LoginPassword => "login password field",
            Intent::LoginSubmit => "login submit control",
            Intent::Toggle => "toggle control",
            Intent::Save => "save control",
            Intent::OverlayClose => "overlay close control",
        })
    }
}

/// A single way of finding an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Candidate {
    /// Plain CSS selector.
    Css { selector: String },
    /// First `tag` element whose trimmed text contains `text`.
    Text { tag: String, text: String },
    /// Element with exactly `label` as text, then the closest ancestor (up to
    /// `levels` up) that contains a `target` match.
    Labelled {
        label: String,
        target: String,
        #[serde(default = "default_label_levels")]
        levels: u8,
    },
}

fn default_label_levels() -> u8 {
    1
}

impl Candidate {
    pub fn css(selector: impl Into<String>) -> Self {
        Candidate::Css {
            selector: selector.into(),
        }
    }

    pub fn text(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Candidate::Text {
            tag: tag.into(),
            text: text.into(),
        }
    }

    pub fn labelled(label: impl Into<String>, target: impl Into<String>) -> Self {
        Candidate::Labelled {
            label: label.into(),
            target: target.into(),
            levels: default_label_levels(),
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Candidate::Css { selector } => write!(f, "{}", selector),
            Candidate::Text { tag, text } => write!(f, "{}:has-text({:?})", tag, text),
            Candidate::Labelled { label, target, .. } => {
                write!(f, "text={:?} >> .. >> {}", label, target)
            }
        }
    }
}

/// Candidate lists per intent, plus the login signature and overlay markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorProfile {
    pub login_markers: Vec<Candidate>,
    pub login_username: Vec<Candidate>,
    pub login_password: Vec<Candidate>,
    pub login_submit: Vec<Candidate>,
    pub toggle: Vec<Candidate>,
    pub save: Vec<Candidate>,
    pub overlay_close: Vec<Candidate>,
    /// CSS selectors of overlay nodes that are removed outright as a last resort.
    pub overlay_markers: Vec<String>,
}

impl Default for LocatorProfile {
    /// Integration settings page of the attribution dashboard, with its Pendo guides.
    fn default() -> Self {
        Self {
            login_markers: vec![
                Candidate::css(r#"input[type="password"]"#),
                Candidate::css(r#"form[action*="login"]"#),
                Candidate::css(r#"form[action*="signin"]"#),
                Candidate::css(r#"form[action*="auth"]"#),
                Candidate::css("#login-form"),
                Candidate::css(".login-form"),
            ],
            login_username: vec![
                Candidate::css(r#"input[placeholder*="email" i]"#),
                Candidate::css(r#"input[type="email"]"#),
                Candidate::css(r#"input[name="email"]"#),
                Candidate::css(r#"input[name="username"]"#),
            ],
            login_password: vec![
                Candidate::css(r#"input[placeholder*="password" i]"#),
                Candidate::css(r#"input[type="password"]"#),
            ],
            login_submit: vec![
                Candidate::text("button", "Login"),
                Candidate::text("button", "Log in"),
                Candidate::text("button", "Sign in"),
                Candidate::css(r#"button[type="submit"]"#),
            ],
            toggle: vec![Candidate::labelled(
                "In-app event postbacks",
                r#"input[type="checkbox"]"#,
            )],
            save: vec![
                Candidate::text("button", "Save Integration"),
                Candidate::text("button", "Save"),
            ],
            overlay_close: vec![
                Candidate::css(r#"[id^="pendo-close-guide-"]"#),
                Candidate::css("[data-pendo-close-guide]"),
                Candidate::css("button._pendo-close-guide"),
                Candidate::css("._pendo-close-guide"),
                Candidate::css(r#"[class*="pendo"] button[aria-label*="close" i]"#),
                Candidate::css(r#"[class*="pendo"] [class*="close"]"#),
                Candidate::css("#pendo-base button"),
                Candidate::css("._pendo-step-container button"),
            ],
            overlay_markers: vec![
                "#pendo-base".to_string(),
                r#"[class*="pendo-backdrop"]"#.to_string(),
                "._pendo-step-container".to_string(),
            ],
        }
    }
}

impl LocatorProfile {
    pub fn candidates(&self, intent: Intent) -> &[Candidate] {
        match intent {
            Intent::LoginUsername => &self.login_username,
            Intent::LoginPassword => &self.login_password,
            Intent::LoginSubmit => &self.login_submit,
            Intent::Toggle => &self.toggle,
            Intent::Save => &self.save,
            Intent::OverlayClose => &self.overlay_close,
        }
    }
}

pub struct ElementLocator {
    profile: LocatorProfile,
    poll_interval: Duration,
}

impl ElementLocator {
    pub fn new(profile: LocatorProfile, poll_interval: Duration) -> Self {
        Self {
            profile,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn profile(&self) -> &LocatorProfile {
        &self.profile
    }

    pub fn candidates(&self, intent: Intent) -> &[Candidate] {
        self.profile.candidates(intent)
    }

    /// First candidate for `intent` that resolves right now.
    ///
    /// A candidate the page rejects as a bad query is skipped; a broken
    /// browser connection is returned as an error.
    pub fn locate<P: PageDriver + ?Sized>(
        &self,
        page: &P,
        intent: Intent,
    ) -> Result<Option<ElementHandle>, DriverError> {
        first_match(page, self.candidates(intent))
    }

    /// Polls `locate` until it succeeds or `timeout` is used up.
    ///
    /// The number of attempts is derived from the timeout, not from wall-clock
    /// time, so the bound holds even when the driver's pause is instantaneous.
    pub fn wait_for<P: PageDriver + ?Sized>(
        &self,
        page: &P,
        intent: Intent,
        timeout: Duration,
    ) -> Result<ElementHandle, DriverError> {
        let attempts = (timeout.as_millis() / self.poll_interval.as_millis()).max(1);
        for attempt in 0..attempts {
            if let Some(handle) = self.locate(page, intent)? {
                return Ok(handle);
            }
            if attempt + 1 < attempts {
                page.pause(self.poll_interval);
            }
        }
        Err(DriverError::timeout(intent.to_string(), timeout))
    }

    /// Whether the page carries any of the login markers.
    pub fn is_login_page<P: PageDriver + ?Sized>(&self, page: &P) -> Result<bool, DriverError> {
        Ok(first_match(page, &self.profile.login_markers)?.is_some())
    }
}

fn first_match<P: PageDriver + ?Sized>(
    page: &P,
    candidates: &[Candidate],
) -> Result<Option<ElementHandle>, DriverError> {
    for candidate in candidates {
        match page.resolve(candidate) {
            Ok(Some(handle)) => return Ok(Some(handle)),
            Ok(None) => {}
            Err(DriverError::Script(reason)) => {
                debug!("candidate {} rejected: {}", candidate, reason);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}
