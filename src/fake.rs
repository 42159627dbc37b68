//! Scripted in-memory browser used by the unit tests.
//!
//! Sites are keyed by URL and only understand CSS candidates naming element
//! ids from `test_profile()`. All pages share one engine state, the same way
//! real tabs share one browsing context.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use std::time::Duration;

use crate::config::RunConfig;
use crate::driver::{BrowserEngine, ClickMode, ElementHandle, PageDriver, wait_until_settled};
use crate::errors::DriverError;
use crate::locator::{Candidate, ElementLocator, LocatorProfile};

pub fn test_profile() -> LocatorProfile {
    LocatorProfile {
        login_markers: vec![Candidate::css("#login-form")],
        login_username: vec![Candidate::css("#user")],
        login_password: vec![Candidate::css("#pass")],
        login_submit: vec![Candidate::css("#submit")],
        toggle: vec![Candidate::css("#toggle")],
        save: vec![Candidate::css("#save")],
        overlay_close: vec![Candidate::css("#overlay-close")],
        overlay_markers: vec!["#overlay".to_string()],
    }
}

pub fn test_locator() -> ElementLocator {
    ElementLocator::new(test_profile(), Duration::from_millis(100))
}

pub fn test_config() -> RunConfig {
    let mut config = RunConfig::default();
    config.locator = test_profile();
    config.timing.poll_interval_ms = 100;
    config
}

#[derive(Debug, Clone)]
pub struct FakeSite {
    elements: BTreeSet<String>,
    toggle: Option<bool>,
    toggle_after_reload: bool,
    toggle_click_works: bool,
    save: bool,
    save_commits: bool,
    native_click_fails: bool,
    login: Option<(String, String)>,
    overlay: bool,
    open_fails: bool,
    idle_times_out: bool,
    read_fails: bool,
    redirect_after_login: bool,
    overlay_after_toggle: bool,
    hidden_after_save: usize,
    front_fails: bool,
    read_panics: bool,
}

impl FakeSite {
    /// A settings page with a working toggle in the given state and a save button.
    pub fn settings(checked: bool) -> Self {
        Self {
            elements: BTreeSet::new(),
            toggle: Some(checked),
            toggle_after_reload: false,
            toggle_click_works: true,
            save: true,
            save_commits: true,
            native_click_fails: false,
            login: None,
            overlay: false,
            open_fails: false,
            idle_times_out: false,
            read_fails: false,
            redirect_after_login: false,
            overlay_after_toggle: false,
            hidden_after_save: 0,
            front_fails: false,
            read_panics: false,
        }
    }

    pub fn with_element(mut self, selector: &str) -> Self {
        self.elements.insert(selector.to_string());
        self
    }

    pub fn without_toggle(mut self) -> Self {
        self.toggle = None;
        self
    }

    pub fn toggle_after_reload(mut self) -> Self {
        self.toggle_after_reload = true;
        self
    }

    pub fn sticky_toggle(mut self) -> Self {
        self.toggle_click_works = false;
        self
    }

    pub fn without_save(mut self) -> Self {
        self.save = false;
        self
    }

    pub fn native_click_fails(mut self) -> Self {
        self.native_click_fails = true;
        self
    }

    pub fn behind_login(mut self, user: &str, password: &str) -> Self {
        self.login = Some((user.to_string(), password.to_string()));
        self
    }

    pub fn with_overlay(mut self) -> Self {
        self.overlay = true;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.open_fails = true;
        self
    }

    pub fn slow_idle(mut self) -> Self {
        self.idle_times_out = true;
        self
    }

    pub fn failing_reads(mut self) -> Self {
        self.read_fails = true;
        self
    }

    /// Accepted logins replace the document twice before it settles.
    pub fn redirect_after_login(mut self) -> Self {
        self.redirect_after_login = true;
        self
    }

    /// A guide pops up again once the toggle is clicked.
    pub fn overlay_after_toggle(mut self) -> Self {
        self.overlay_after_toggle = true;
        self
    }

    /// The toggle is missing from the first lookup after saving.
    pub fn redraw_after_save(mut self) -> Self {
        self.hidden_after_save = 1;
        self
    }

    /// Saving leaves a page without the toggle.
    pub fn vanishes_after_save(mut self) -> Self {
        self.hidden_after_save = usize::MAX;
        self
    }

    pub fn failing_front(mut self) -> Self {
        self.front_fails = true;
        self
    }

    pub fn panicking_reads(mut self) -> Self {
        self.read_panics = true;
        self
    }
}

#[derive(Default)]
struct EngineState {
    sites: HashMap<String, FakeSite>,
    committed: HashMap<String, bool>,
    logged_in: bool,
    open_pages: usize,
    max_open_pages: usize,
    pages_created: usize,
    pauses: usize,
    actions: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Rc<RefCell<EngineState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_site(self, url: &str, site: FakeSite) -> Self {
        {
            let mut state = self.state.borrow_mut();
            if let Some(checked) = site.toggle {
                state.committed.insert(url.to_string(), checked);
            }
            state.sites.insert(url.to_string(), site);
        }
        self
    }

    pub fn actions(&self) -> Vec<String> {
        self.state.borrow().actions.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter(|a| a.starts_with("click "))
            .collect()
    }

    pub fn pauses(&self) -> usize {
        self.state.borrow().pauses
    }

    pub fn open_pages(&self) -> usize {
        self.state.borrow().open_pages
    }

    pub fn max_open_pages(&self) -> usize {
        self.state.borrow().max_open_pages
    }

    pub fn pages_created(&self) -> usize {
        self.state.borrow().pages_created
    }

    pub fn committed(&self, url: &str) -> Option<bool> {
        self.state.borrow().committed.get(url).copied()
    }

    pub fn logged_in(&self) -> bool {
        self.state.borrow().logged_in
    }

    fn log(&self, action: String) {
        self.state.borrow_mut().actions.push(action);
    }
}

impl BrowserEngine for FakeEngine {
    type Page = FakePage;

    fn name(&self) -> &str {
        "fake"
    }

    fn new_page(&self) -> Result<FakePage, DriverError> {
        {
            let mut state = self.state.borrow_mut();
            state.open_pages += 1;
            state.pages_created += 1;
            state.max_open_pages = state.max_open_pages.max(state.open_pages);
        }
        Ok(FakePage {
            engine: self.clone(),
            url: RefCell::new(None),
            reloaded: Cell::new(false),
            pending: Cell::new(None),
            overlay_open: Cell::new(false),
            filled: RefCell::new(HashMap::new()),
            closed: Cell::new(false),
            torn_down_reads: Cell::new(0),
            hidden_toggle_lookups: Cell::new(0),
        })
    }

    fn shutdown(self) {
        self.log("shutdown".to_string());
    }
}

pub struct FakePage {
    engine: FakeEngine,
    url: RefCell<Option<String>>,
    reloaded: Cell<bool>,
    pending: Cell<Option<bool>>,
    overlay_open: Cell<bool>,
    filled: RefCell<HashMap<String, String>>,
    closed: Cell<bool>,
    torn_down_reads: Cell<usize>,
    hidden_toggle_lookups: Cell<usize>,
}

impl FakePage {
    fn site(&self) -> Option<FakeSite> {
        let url = self.url.borrow().clone()?;
        self.engine.state.borrow().sites.get(&url).cloned()
    }

    fn current_url(&self) -> String {
        self.url.borrow().clone().unwrap_or_default()
    }

    fn login_shown(&self, site: &FakeSite) -> bool {
        site.login.is_some() && !self.engine.logged_in()
    }

    fn toggle_value(&self) -> Option<bool> {
        let site = self.site()?;
        if self.login_shown(&site) || site.toggle.is_none() {
            return None;
        }
        if site.toggle_after_reload && !self.reloaded.get() {
            return None;
        }
        self.pending
            .get()
            .or_else(|| self.engine.committed(&self.current_url()))
    }

    fn present(&self, selector: &str) -> bool {
        let Some(site) = self.site() else {
            return false;
        };
        let login = self.login_shown(&site);
        match selector {
            "#login-form" | "#user" | "#pass" | "#submit" => login,
            "#toggle" => self.toggle_value().is_some(),
            "#save" => site.save && self.toggle_value().is_some(),
            "#overlay-close" => self.overlay_open.get(),
            other => site.elements.contains(other),
        }
    }
}

impl PageDriver for FakePage {
    fn goto(&self, url: &str, _timeout: Duration) -> Result<(), DriverError> {
        self.engine.log(format!("goto {}", url));
        *self.url.borrow_mut() = Some(url.to_string());
        self.reloaded.set(false);
        self.pending.set(None);
        let site = self.site();
        if site.as_ref().is_some_and(|s| s.open_fails) {
            return Err(DriverError::Navigation(format!("net::ERR_CONNECTION_REFUSED at {}", url)));
        }
        self.overlay_open.set(site.is_some_and(|s| s.overlay));
        Ok(())
    }

    fn reload(&self, _timeout: Duration) -> Result<(), DriverError> {
        self.engine.log(format!("reload {}", self.current_url()));
        self.reloaded.set(true);
        self.pending.set(None);
        self.overlay_open.set(self.site().is_some_and(|s| s.overlay));
        Ok(())
    }

    fn bring_to_front(&self) -> Result<(), DriverError> {
        self.engine.log(format!("front {}", self.current_url()));
        if self.site().is_some_and(|s| s.front_fails) {
            return Err(DriverError::Browser("Target closed".to_string()));
        }
        Ok(())
    }

    fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), DriverError> {
        let never_settles = self.site().is_some_and(|s| s.idle_times_out);
        wait_until_settled(
            self,
            timeout,
            Duration::from_millis(100),
            Duration::from_millis(500),
            || {
                let pending = self.torn_down_reads.get();
                if pending > 0 {
                    self.torn_down_reads.set(pending - 1);
                    return Err(DriverError::Navigation(
                        "Execution context was destroyed.".to_string(),
                    ));
                }
                Ok((!never_settles).then(|| "complete|0".to_string()))
            },
        )
    }

    fn pause(&self, _duration: Duration) {
        self.engine.state.borrow_mut().pauses += 1;
    }

    fn resolve(&self, candidate: &Candidate) -> Result<Option<ElementHandle>, DriverError> {
        let Candidate::Css { selector } = candidate else {
            return Ok(None);
        };
        self.engine.log(format!("find {} {}", selector, self.current_url()));
        if selector.starts_with("!!") {
            return Err(DriverError::Script(format!("invalid selector {}", selector)));
        }
        if selector == "#toggle" && self.hidden_toggle_lookups.get() > 0 {
            self.hidden_toggle_lookups.set(self.hidden_toggle_lookups.get() - 1);
            return Ok(None);
        }
        Ok(self.present(selector).then(|| ElementHandle::new(selector.clone())))
    }

    fn is_visible(&self, element: &ElementHandle) -> Result<bool, DriverError> {
        Ok(self.present(element.selector()))
    }

    fn click(&self, element: &ElementHandle, mode: ClickMode) -> Result<(), DriverError> {
        let selector = element.selector();
        self.engine.log(format!("click {} {:?}", selector, mode));
        let site = self.site().ok_or_else(|| DriverError::ElementNotFound(selector.to_string()))?;
        if site.native_click_fails && mode == ClickMode::Native {
            return Err(DriverError::Browser("click intercepted by overlay".to_string()));
        }
        match selector {
            "#toggle" => {
                if site.toggle_click_works {
                    let current = self.toggle_value().unwrap_or(false);
                    self.pending.set(Some(!current));
                }
                if site.overlay_after_toggle {
                    self.overlay_open.set(true);
                }
            }
            "#save" if site.save_commits => {
                if let Some(value) = self.pending.get() {
                    let url = self.current_url();
                    self.engine.state.borrow_mut().committed.insert(url, value);
                }
                self.hidden_toggle_lookups.set(site.hidden_after_save);
            }
            "#submit" => {
                let filled = self.filled.borrow();
                let accepted = site.login.as_ref().is_some_and(|(user, pass)| {
                    filled.get("#user") == Some(user) && filled.get("#pass") == Some(pass)
                });
                if accepted {
                    self.engine.state.borrow_mut().logged_in = true;
                    if site.redirect_after_login {
                        self.torn_down_reads.set(2);
                    }
                }
            }
            "#overlay-close" => self.overlay_open.set(false),
            _ => {}
        }
        Ok(())
    }

    fn fill(&self, element: &ElementHandle, text: &str) -> Result<(), DriverError> {
        self.engine.log(format!("fill {}", element.selector()));
        self.filled
            .borrow_mut()
            .insert(element.selector().to_string(), text.to_string());
        Ok(())
    }

    fn is_checked(&self, element: &ElementHandle) -> Result<bool, DriverError> {
        if self.site().is_some_and(|s| s.read_fails) {
            return Err(DriverError::Browser("Target closed".to_string()));
        }
        if self.site().is_some_and(|s| s.read_panics) {
            panic!("toggle read crashed");
        }
        self.toggle_value()
            .ok_or_else(|| DriverError::ElementNotFound(element.selector().to_string()))
    }

    fn press_key(&self, key: &str) -> Result<(), DriverError> {
        self.engine.log(format!("key {}", key));
        Ok(())
    }

    fn run_script(&self, _script: &str) -> Result<(), DriverError> {
        self.engine.log("script".to_string());
        self.overlay_open.set(false);
        Ok(())
    }

    fn close(&self) -> Result<(), DriverError> {
        if !self.closed.replace(true) {
            self.engine.log(format!("close {}", self.current_url()));
            self.engine.state.borrow_mut().open_pages -= 1;
        }
        Ok(())
    }
}
