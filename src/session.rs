use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Timing;
use crate::driver::{BrowserEngine, ClickMode, PageDriver, PageGuard};
use crate::errors::{DriverError, FatalError};
use crate::locator::{ElementLocator, Intent};
use crate::types::{Credential, Task};

/// The one authenticated browsing context of a run.
///
/// Only `SessionManager::establish` creates one, so holding a `Session` means
/// login already went through. The page used for login stays open, parked on
/// the first task's URL, until the dispatcher adopts it.
pub struct Session<'e, E: BrowserEngine> {
    engine: &'e E,
    landing: Option<PageGuard<E::Page>>,
    landing_url: String,
}

impl<'e, E: BrowserEngine> Session<'e, E> {
    /// Opens a new page in the session's context and navigates it.
    ///
    /// On navigation failure the page is closed before the error is returned.
    pub fn open_page(&self, url: &str, timeout: Duration) -> Result<PageGuard<E::Page>, DriverError> {
        let page = PageGuard::new(self.engine.new_page()?);
        page.goto(url, timeout)?;
        Ok(page)
    }

    /// Hands over the login page if it is parked on `url`.
    pub fn take_landing(&mut self, url: &str) -> Option<PageGuard<E::Page>> {
        if self.landing_url == url {
            self.landing.take()
        } else {
            None
        }
    }
}

pub struct SessionManager<'a> {
    locator: &'a ElementLocator,
    timing: &'a Timing,
}

impl<'a> SessionManager<'a> {
    pub fn new(locator: &'a ElementLocator, timing: &'a Timing) -> Self {
        Self { locator, timing }
    }

    /// Logs in against the first task's target, or confirms the context is
    /// already authenticated.
    pub fn establish<'e, E: BrowserEngine>(
        &self,
        engine: &'e E,
        first: &Task,
    ) -> Result<Session<'e, E>, FatalError> {
        info!("Step 1: Logging in...");
        let page = engine
            .new_page()
            .map(PageGuard::new)
            .map_err(|e| FatalError::Auth(format!("could not open login page: {}", e)))?;

        self.visit(&*page, &first.url);

        let on_login = self.locator.is_login_page(&*page).map_err(auth_error)?;
        if on_login {
            self.login(&*page, &first.credential)?;
            self.visit(&*page, &first.url);
        } else {
            info!("Already logged in (session active)");
        }

        info!("Login complete - Session established");
        Ok(Session {
            engine,
            landing: Some(page),
            landing_url: first.url.clone(),
        })
    }

    /// Navigation trouble here is tolerated; the toggle flow has its own retry.
    fn visit<P: PageDriver + ?Sized>(&self, page: &P, url: &str) {
        if let Err(e) = page.goto(url, Duration::from_millis(self.timing.navigation_timeout_ms)) {
            info!("Page load timeout, continuing: {}", e);
        }
        if let Err(e) =
            page.wait_for_network_idle(Duration::from_millis(self.timing.network_idle_timeout_ms))
        {
            debug!("login page still loading: {}", e);
        }
    }

    fn login<P: PageDriver + ?Sized>(&self, page: &P, credential: &Credential) -> Result<(), FatalError> {
        info!("Attempting login for user: {}", credential.user_id);

        self.fill(page, Intent::LoginUsername, &credential.user_id)?;
        self.fill(page, Intent::LoginPassword, &credential.password)?;

        match self.locator.locate(page, Intent::LoginSubmit).map_err(auth_error)? {
            Some(submit) => {
                if let Err(e) = page.click(&submit, ClickMode::Native) {
                    warn!("login submit click failed: {}", e);
                }
            }
            None => warn!("no {} found", Intent::LoginSubmit),
        }

        page.pause(Duration::from_millis(self.timing.login_pre_settle_ms));
        page.wait_for_network_idle(Duration::from_millis(self.timing.login_idle_timeout_ms))
            .map_err(|e| FatalError::Auth(format!("login did not settle: {}", e)))?;
        page.pause(Duration::from_millis(self.timing.login_post_settle_ms));

        if self.locator.is_login_page(page).map_err(auth_error)? {
            return Err(FatalError::Auth(
                "login form still visible after submit; check credentials".to_string(),
            ));
        }

        info!("Login successful");
        Ok(())
    }

    /// Each credential field is optional to find.
    fn fill<P: PageDriver + ?Sized>(&self, page: &P, intent: Intent, value: &str) -> Result<(), FatalError> {
        match self.locator.locate(page, intent).map_err(auth_error)? {
            Some(field) => {
                if let Err(e) = page.fill(&field, value) {
                    warn!("could not fill {}: {}", intent, e);
                }
            }
            None => warn!("no {} found", intent),
        }
        Ok(())
    }
}

fn auth_error(e: DriverError) -> FatalError {
    FatalError::Auth(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeEngine, FakeSite, test_config, test_locator};

    const URL: &str = "https://hq.example.com/apps/first";

    #[test]
    fn active_session_skips_login() {
        let engine = FakeEngine::new().with_site(URL, FakeSite::settings(true));
        let config = test_config();
        let locator = test_locator();
        let manager = SessionManager::new(&locator, &config.timing);

        let mut session = manager.establish(&engine, &Task::new(URL, "u", "p")).unwrap();
        assert!(!engine.actions().iter().any(|a| a.starts_with("fill")));
        assert!(session.take_landing("https://elsewhere").is_none());
        assert!(session.take_landing(URL).is_some());
        assert_eq!(engine.open_pages(), 0);
    }

    #[test]
    fn logs_in_once_and_returns_to_first_url() {
        let engine = FakeEngine::new().with_site(URL, FakeSite::settings(true).behind_login("alice", "s3cret"));
        let config = test_config();
        let locator = test_locator();
        let manager = SessionManager::new(&locator, &config.timing);

        let session = manager
            .establish(&engine, &Task::new(URL, "alice", "s3cret"))
            .unwrap();
        assert!(engine.logged_in());
        let actions = engine.actions();
        assert!(actions.contains(&"fill #user".to_string()));
        assert!(actions.contains(&"fill #pass".to_string()));
        assert!(actions.contains(&"click #submit Native".to_string()));
        assert_eq!(actions.iter().filter(|a| *a == &format!("goto {}", URL)).count(), 2);
        drop(session);
        assert_eq!(engine.open_pages(), 0);
    }

    #[test]
    fn rejected_credentials_are_fatal() {
        let engine = FakeEngine::new().with_site(URL, FakeSite::settings(true).behind_login("alice", "s3cret"));
        let config = test_config();
        let locator = test_locator();
        let manager = SessionManager::new(&locator, &config.timing);

        let err = manager
            .establish(&engine, &Task::new(URL, "alice", "wrong"))
            .err()
            .unwrap();
        assert!(matches!(err, FatalError::Auth(ref m) if m.contains("still visible")));
        assert_eq!(engine.open_pages(), 0);
    }

    #[test]
    fn redirect_during_post_login_wait_is_not_fatal() {
        let engine = FakeEngine::new().with_site(
            URL,
            FakeSite::settings(true).behind_login("alice", "s3cret").redirect_after_login(),
        );
        let config = test_config();
        let locator = test_locator();
        let manager = SessionManager::new(&locator, &config.timing);

        let session = manager.establish(&engine, &Task::new(URL, "alice", "s3cret"));
        assert!(session.is_ok(), "{:?}", session.err());
        assert!(engine.logged_in());
    }

    #[test]
    fn login_that_never_settles_is_fatal() {
        let engine = FakeEngine::new().with_site(
            URL,
            FakeSite::settings(true).behind_login("alice", "s3cret").slow_idle(),
        );
        let config = test_config();
        let locator = test_locator();
        let manager = SessionManager::new(&locator, &config.timing);

        let err = manager
            .establish(&engine, &Task::new(URL, "alice", "s3cret"))
            .err()
            .unwrap();
        assert!(matches!(err, FatalError::Auth(ref m) if m.contains("did not settle")));
    }
}
