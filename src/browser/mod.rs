//! Browser capability for probes and synthetic flows.
//!
//! The probe executor and flow engine drive an injected, narrow automation
//! interface (navigate, wait-for-element, click, screenshot) rather than a
//! concrete automation backend. The default implementation is the
//! reqwest-based [`HttpBrowser`]; tests use a scripted mock.

mod http;

pub use http::*;

use std::time::Duration;
use thiserror::Error;

/// Browser operation error types.
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("navigation timed out after {0:?}")]
    Timeout(Duration),
    #[error("navigation error: {0}")]
    Navigation(String),
    #[error("selector {0:?} not found")]
    SelectorNotFound(String),
    #[error("session error: {0}")]
    Session(String),
}

/// Readiness policy for a navigation.
///
/// A page counts as settled once no more than `max_inflight` connections have
/// been active for `quiet_period`, bounded by `timeout` overall. The quiet
/// period is a heuristic knob; drivers that cannot observe in-flight
/// connections treat response completion as settled, and `timeout` is the
/// only hard guarantee.
#[derive(Debug, Clone)]
pub struct NavigationWait {
    pub timeout: Duration,
    pub quiet_period: Duration,
    pub max_inflight: usize,
}

impl NavigationWait {
    /// Policy with the given hard bound and default settle heuristics.
    pub fn bounded(timeout: Duration) -> Self {
        Self {
            timeout,
            quiet_period: Duration::from_millis(500),
            max_inflight: 2,
        }
    }
}

impl Default for NavigationWait {
    fn default() -> Self {
        Self::bounded(Duration::from_secs(10))
    }
}

/// Factory for page sessions. Each probe or flow acquires its own session;
/// sessions are never shared or reused.
pub trait Browser {
    type Session: PageSession;

    /// Acquire a fresh session. Release happens when the session is dropped,
    /// on every exit path of the caller.
    async fn open_session(&self) -> Result<Self::Session, BrowserError>;
}

/// One live page session. All operations suspend on a single outstanding
/// network/browser action and are bounded by the supplied waits.
pub trait PageSession {
    /// Navigate to `url` and wait for readiness. Returns the HTTP status of
    /// the navigation response.
    async fn goto(&mut self, url: &str, wait: &NavigationWait) -> Result<u16, BrowserError>;

    /// Wait up to `timeout` for an element matching `selector` to appear.
    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    /// Click the element matching `selector` and wait for the resulting
    /// navigation under the given policy.
    async fn click_and_wait(
        &mut self,
        selector: &str,
        wait: &NavigationWait,
    ) -> Result<(), BrowserError>;

    /// Whether any of the given selectors matches the current page.
    async fn find_any(&mut self, selectors: &[&str]) -> Result<bool, BrowserError>;

    /// Capture a failure artifact of the current page.
    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError>;
}

#[cfg(test)]
pub mod mock {
    //! Scripted browser used by probe and flow tests.

    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Shared script + call log. URLs without an entry in `nav` succeed
    /// with status 200.
    #[derive(Default)]
    pub struct Script {
        pub nav: HashMap<String, Result<u16, String>>,
        pub present_selectors: HashSet<String>,
        pub clickable_selectors: HashSet<String>,
        pub page_markers: HashSet<String>,
    }

    #[derive(Default)]
    pub struct ScriptedBrowser {
        script: Arc<Script>,
        pub calls: Arc<Mutex<Vec<String>>>,
        pub sessions_opened: Arc<AtomicUsize>,
        pub sessions_live: Arc<AtomicUsize>,
    }

    impl ScriptedBrowser {
        pub fn new(script: Script) -> Self {
            Self {
                script: Arc::new(script),
                ..Default::default()
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    pub struct ScriptedSession {
        script: Arc<Script>,
        calls: Arc<Mutex<Vec<String>>>,
        live: Arc<AtomicUsize>,
    }

    impl Drop for ScriptedSession {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl Browser for ScriptedBrowser {
        type Session = ScriptedSession;

        async fn open_session(&self) -> Result<Self::Session, BrowserError> {
            self.sessions_opened.fetch_add(1, Ordering::SeqCst);
            self.sessions_live.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedSession {
                script: self.script.clone(),
                calls: self.calls.clone(),
                live: self.sessions_live.clone(),
            })
        }
    }

    impl PageSession for ScriptedSession {
        async fn goto(&mut self, url: &str, _wait: &NavigationWait) -> Result<u16, BrowserError> {
            self.calls.lock().unwrap().push(format!("goto {url}"));
            match self.script.nav.get(url) {
                Some(Ok(status)) => Ok(*status),
                Some(Err(msg)) => Err(BrowserError::Navigation(msg.clone())),
                None => Ok(200),
            }
        }

        async fn wait_for_selector(
            &mut self,
            selector: &str,
            timeout: Duration,
        ) -> Result<(), BrowserError> {
            self.calls.lock().unwrap().push(format!("wait {selector}"));
            if self.script.present_selectors.contains(selector) {
                Ok(())
            } else {
                Err(BrowserError::Timeout(timeout))
            }
        }

        async fn click_and_wait(
            &mut self,
            selector: &str,
            _wait: &NavigationWait,
        ) -> Result<(), BrowserError> {
            self.calls.lock().unwrap().push(format!("click {selector}"));
            if self.script.clickable_selectors.contains(selector) {
                Ok(())
            } else {
                Err(BrowserError::SelectorNotFound(selector.to_string()))
            }
        }

        async fn find_any(&mut self, selectors: &[&str]) -> Result<bool, BrowserError> {
            self.calls.lock().unwrap().push("find_any".to_string());
            Ok(selectors
                .iter()
                .any(|s| self.script.page_markers.contains(*s)))
        }

        async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
            self.calls.lock().unwrap().push("screenshot".to_string());
            Ok(b"scripted-artifact".to_vec())
        }
    }
}
