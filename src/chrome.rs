//! `headless_chrome` implementation of the browser capability.

use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BrowserOptions;
use crate::driver::{BrowserEngine, ClickMode, ElementHandle, PageDriver, wait_until_settled};
use crate::errors::DriverError;
use crate::locator::Candidate;

const IDLE_QUIET_WINDOW: Duration = Duration::from_millis(500);
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Protocol errors raised because the page navigated away under the call.
const TEARDOWN_MARKERS: [&str; 4] = [
    "execution context was destroyed",
    "cannot find context",
    "inspected target navigated",
    "context with specified id",
];

/// Whitespace-collapsing normaliser shared by the text finders.
const SQUASH_JS: &str = "const squash = s => (s || '').replace(/\\s+/g, ' ').trim();";

/// One Chrome instance, attached or launched. Every page is a tab in its
/// default browser context, so they all share the login cookies.
pub struct ChromeEngine {
    browser: Browser,
    label: String,
}

impl ChromeEngine {
    /// Attach endpoint first, then the configured executable, then detected
    /// installs, then the driver's own discovery.
    pub fn launch(options: &BrowserOptions) -> Result<Self, DriverError> {
        if let Some(url) = &options.attach_url {
            info!("Attempting to attach to existing Chrome at {}", url);
            match Browser::connect(url.clone()) {
                Ok(browser) => {
                    info!("Attached to existing Chrome");
                    return Ok(Self {
                        browser,
                        label: format!("chrome (attached at {})", url),
                    });
                }
                Err(e) => warn!("Could not attach: {}", e),
            }
        }

        let mut failures = Vec::new();
        for path in executables(options) {
            debug!("trying browser executable {}", path.display());
            match start(options, &path) {
                Ok(browser) => {
                    return Ok(Self {
                        browser,
                        label: format!("chrome ({})", path.display()),
                    });
                }
                Err(e) => {
                    warn!("Could not start {}: {}", path.display(), e);
                    failures.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        if failures.is_empty() {
            return Err(DriverError::Browser(
                "Chrome executable not found. Please ensure Google Chrome or Chromium is installed.".to_string(),
            ));
        }
        Err(DriverError::Browser(failures.join("; ")))
    }
}

fn start(options: &BrowserOptions, path: &std::path::Path) -> anyhow::Result<Browser> {
    let launch = LaunchOptions {
        headless: options.headless,
        path: Some(path.to_path_buf()),
        args: vec![
            OsStr::new("--no-first-run"),
            OsStr::new("--no-default-browser-check"),
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-infobars"),
        ],
        idle_browser_timeout: Duration::from_millis(options.idle_browser_timeout_ms),
        ..Default::default()
    };
    Browser::new(launch)
}

/// Candidate executables in trial order, without duplicates.
fn executables(options: &BrowserOptions) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = Vec::new();
    let mut push = |path: PathBuf| {
        if !found.contains(&path) {
            found.push(path);
        }
    };

    if let Some(path) = &options.chrome_path {
        push(path.clone());
    }
    for path in installed_browsers() {
        push(path);
    }
    match headless_chrome::browser::default_executable() {
        Ok(path) => push(path),
        Err(e) => debug!("driver executable discovery failed: {}", e),
    }
    found
}

fn installed_browsers() -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        r"C:\Program Files\Google\Chrome\Application\chrome.exe",
        r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    ]
    .iter()
    .map(PathBuf::from)
    .collect();

    if let Some(local) = dirs::data_local_dir() {
        candidates.push(
            local
                .join("Google")
                .join("Chrome")
                .join("Application")
                .join("chrome.exe"),
        );
    }
    candidates.retain(|p| p.exists());
    candidates
}

impl BrowserEngine for ChromeEngine {
    type Page = ChromePage;

    fn name(&self) -> &str {
        &self.label
    }

    fn new_page(&self) -> Result<ChromePage, DriverError> {
        let tab = self.browser.new_tab().map_err(browser_error)?;
        Ok(ChromePage { tab })
    }

    fn shutdown(self) {
        info!("Closing browser...");
        drop(self.browser);
    }
}

pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    /// Runs a function body in the page and returns its JSON result.
    ///
    /// Thrown exceptions come back as `DriverError::Script`.
    fn eval(&self, body: &str) -> Result<Value, DriverError> {
        let wrapped = format!(
            "(() => {{ try {{ return JSON.stringify({{ ok: (() => {{ {} }})() }}); }} \
             catch (e) {{ return JSON.stringify({{ err: String(e) }}); }} }})()",
            body
        );
        let remote = self.tab.evaluate(&wrapped, false).map_err(evaluate_error)?;
        let raw = remote
            .value
            .and_then(|v| v.as_str().map(String::from))
            .ok_or_else(|| DriverError::Script("script returned no value".to_string()))?;

        let mut parsed: Value =
            serde_json::from_str(&raw).map_err(|e| DriverError::Script(e.to_string()))?;
        if let Some(err) = parsed.get("err") {
            return Err(DriverError::Script(err.as_str().unwrap_or("unknown").to_string()));
        }
        Ok(parsed.get_mut("ok").map(Value::take).unwrap_or(Value::Null))
    }

    fn eval_on(&self, element: &ElementHandle, body: &str) -> Result<Value, DriverError> {
        let value = self.eval(&format!(
            "const el = document.querySelector({}); if (!el) return {{ missing: true }}; {}",
            js_string(element.selector()),
            body
        ))?;
        if value.get("missing").is_some() {
            return Err(DriverError::ElementNotFound(element.selector().to_string()));
        }
        Ok(value)
    }
}

impl PageDriver for ChromePage {
    fn goto(&self, url: &str, timeout: Duration) -> Result<(), DriverError> {
        self.tab.set_default_timeout(timeout);
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(|e| DriverError::Navigation(format!("{}: {}", url, e)))?;
        Ok(())
    }

    fn reload(&self, timeout: Duration) -> Result<(), DriverError> {
        self.tab.set_default_timeout(timeout);
        self.tab
            .reload(false, None)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(|e| DriverError::Navigation(format!("reload: {}", e)))?;
        Ok(())
    }

    fn bring_to_front(&self) -> Result<(), DriverError> {
        self.tab.activate().map_err(browser_error)?;
        Ok(())
    }

    /// Waits until the document is complete and no new resource entries have
    /// appeared for a quiet window.
    fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), DriverError> {
        wait_until_settled(self, timeout, IDLE_POLL, IDLE_QUIET_WINDOW, || {
            let snapshot = self.eval(
                "return document.readyState + '|' + performance.getEntriesByType('resource').length;",
            )?;
            Ok(snapshot
                .as_str()
                .filter(|s| s.starts_with("complete|"))
                .map(String::from))
        })
    }

    fn pause(&self, duration: Duration) {
        thread::sleep(duration);
    }

    fn resolve(&self, candidate: &Candidate) -> Result<Option<ElementHandle>, DriverError> {
        let body = format!(
            "const el = (() => {{ {} }})(); \
             if (!el) return null; \
             let ref = el.getAttribute('data-sweep-ref'); \
             if (!ref) {{ window.__sweepRef = (window.__sweepRef || 0) + 1; ref = String(window.__sweepRef); el.setAttribute('data-sweep-ref', ref); }} \
             return '[data-sweep-ref=\"' + ref + '\"]';",
            finder(candidate)
        );
        Ok(self.eval(&body)?.as_str().map(ElementHandle::new))
    }

    fn is_visible(&self, element: &ElementHandle) -> Result<bool, DriverError> {
        let value = self.eval_on(
            element,
            "if (el.offsetParent === null && el.tagName !== 'BODY' && el.tagName !== 'HTML') return false; \
             const s = getComputedStyle(el); \
             return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0';",
        )?;
        Ok(value.as_bool().unwrap_or(false))
    }

    fn click(&self, element: &ElementHandle, mode: ClickMode) -> Result<(), DriverError> {
        match mode {
            ClickMode::Native => {
                self.tab
                    .find_element(element.selector())
                    .map_err(|_| DriverError::ElementNotFound(element.selector().to_string()))?
                    .click()
                    .map_err(browser_error)?;
            }
            ClickMode::Forced => {
                self.eval_on(element, "el.click(); return true;")?;
            }
        }
        Ok(())
    }

    fn fill(&self, element: &ElementHandle, text: &str) -> Result<(), DriverError> {
        let input = self
            .tab
            .find_element(element.selector())
            .map_err(|_| DriverError::ElementNotFound(element.selector().to_string()))?;
        input.click().map_err(browser_error)?;
        self.eval_on(element, "el.value = ''; return true;")?;
        input.type_into(text).map_err(browser_error)?;
        Ok(())
    }

    fn is_checked(&self, element: &ElementHandle) -> Result<bool, DriverError> {
        let value = self.eval_on(
            element,
            "return el.checked === true || el.getAttribute('aria-checked') === 'true';",
        )?;
        Ok(value.as_bool().unwrap_or(false))
    }

    fn press_key(&self, key: &str) -> Result<(), DriverError> {
        self.tab.press_key(key).map_err(browser_error)?;
        Ok(())
    }

    fn run_script(&self, script: &str) -> Result<(), DriverError> {
        self.eval(&format!("return {};", script))?;
        Ok(())
    }

    fn close(&self) -> Result<(), DriverError> {
        self.tab.close(false).map_err(browser_error)?;
        Ok(())
    }
}

/// Script body returning the first element the candidate matches, or null.
fn finder(candidate: &Candidate) -> String {
    match candidate {
        Candidate::Css { selector } => {
            format!("return document.querySelector({});", js_string(selector))
        }
        Candidate::Text { tag, text } => format!(
            "{} const want = squash({}).toLowerCase(); \
             return [...document.querySelectorAll({})] \
               .find(e => squash(e.textContent).toLowerCase().includes(want)) || null;",
            SQUASH_JS,
            js_string(text),
            js_string(tag)
        ),
        Candidate::Labelled { label, target, levels } => format!(
            "{} const want = squash({}); const target = {}; \
             const label = [...document.querySelectorAll('body *')] \
               .filter(e => squash(e.textContent) === want) \
               .find(e => ![...e.children].some(c => squash(c.textContent) === want)); \
             if (!label) return null; \
             let node = label; \
             for (let i = 0; i <= {} && node; i++) {{ \
               const hit = node.matches(target) ? node : node.querySelector(target); \
               if (hit) return hit; \
               node = node.parentElement; \
             }} \
             return null;",
            SQUASH_JS,
            js_string(label),
            js_string(target),
            levels
        ),
    }
}

fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn browser_error(e: anyhow::Error) -> DriverError {
    DriverError::Browser(e.to_string())
}

fn evaluate_error(e: anyhow::Error) -> DriverError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if TEARDOWN_MARKERS.iter().any(|marker| lower.contains(marker)) {
        DriverError::Navigation(message)
    } else {
        DriverError::Browser(message)
    }
}
