//! Synthetic checkout flows.
//!
//! A bounded linear state machine per site: homepage, optional product /
//! add-to-cart / proceed-to-checkout interactions, a cart-or-checkout
//! navigation with a single fallback, then verification against fixed
//! checkout markers. Each step carries an explicit policy (fatal, optional,
//! fallback) instead of nested error handling, so the skip and fallback
//! edges are auditable and testable from the recorded trace.

use crate::browser::{Browser, NavigationWait, PageSession};
use crate::config::{SiteDescriptor, SiteRegistry};
use crate::store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Readiness bound for the initial homepage load. Failure here is fatal.
const HOMEPAGE_TIMEOUT: Duration = Duration::from_secs(15);
/// Readiness bound for every later navigation (clicks, cart, checkout).
const NAV_TIMEOUT: Duration = Duration::from_secs(10);
/// Wait bound for an optional step's target element.
const SELECTOR_TIMEOUT: Duration = Duration::from_secs(5);

/// Markers whose presence on the final page counts as a reached checkout.
pub const CHECKOUT_MARKERS: [&str; 5] = [
    r#"input[name="email"]"#,
    "#email",
    ".checkout-form",
    r#"[data-testid="checkout"]"#,
    ".checkout",
];

/// States of the per-site flow, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Homepage,
    ProductPage,
    AddToCart,
    CartOrCheckout,
    ProceedToCheckout,
    Verify,
}

/// How a single step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step performed its interaction or navigation.
    Advanced,
    /// Optional step skipped (no selector configured, element absent, or
    /// interaction failed); the flow continues.
    Skipped(String),
    /// `/cart` failed and the single `/checkout` fallback succeeded.
    FellBack,
    /// Terminal failure (fatal homepage load or verification miss).
    Failed(String),
}

/// One entry of the recorded step trace.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub state: FlowState,
    pub outcome: StepOutcome,
}

/// Outcome of one synthetic flow. One per enabled site per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticFlowResult {
    pub client: String,
    pub domain: String,
    pub success: bool,
    /// Wall clock from flow start to terminal state, artifact capture
    /// included.
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure artifact path; present only when the flow failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Result plus step trace, for callers that audit the transition path.
#[derive(Debug)]
pub struct FlowReport {
    pub result: SyntheticFlowResult,
    pub trace: Vec<StepRecord>,
}

/// Runs the checkout state machine for every synthetic-enabled site.
pub struct SyntheticFlowEngine<B> {
    browser: B,
    screenshots_dir: PathBuf,
}

impl<B: Browser> SyntheticFlowEngine<B> {
    pub fn new<P: Into<PathBuf>>(browser: B, screenshots_dir: P) -> Self {
        Self {
            browser,
            screenshots_dir: screenshots_dir.into(),
        }
    }

    /// Run flows for all enabled sites, strictly sequentially. Disabled
    /// sites produce no result.
    pub async fn run(&self, registry: &SiteRegistry) -> Vec<SyntheticFlowResult> {
        let mut results = Vec::new();

        for site in &registry.sites {
            if !site.synthetic_enabled() {
                tracing::debug!(client = %site.client, "synthetic flow disabled, skipping");
                continue;
            }
            tracing::info!(client = %site.client, domain = %site.domain, "running synthetic flow");
            let report = self.run_flow(site).await;
            if report.result.success {
                tracing::info!(
                    client = %site.client,
                    ms = report.result.duration_ms,
                    "synthetic flow succeeded"
                );
            } else {
                tracing::warn!(
                    client = %site.client,
                    error = report.result.error.as_deref().unwrap_or("-"),
                    "synthetic flow failed"
                );
            }
            results.push(report.result);
        }

        results
    }

    /// Execute one site's flow. The session is acquired once and released
    /// exactly once when this scope ends, whichever state the flow
    /// terminated in.
    pub async fn run_flow(&self, site: &SiteDescriptor) -> FlowReport {
        let start = Instant::now();
        let mut trace = Vec::new();

        let (error, screenshot) = match self.browser.open_session().await {
            Ok(mut session) => {
                let error = self.drive(&mut session, site, &mut trace).await;
                let screenshot = match &error {
                    Some(_) => self.capture_artifact(&mut session, &site.client).await,
                    None => None,
                };
                (error, screenshot)
                // session dropped here, on success and failure alike
            }
            Err(e) => (Some(format!("failed to open browser session: {e}")), None),
        };

        FlowReport {
            result: SyntheticFlowResult {
                client: site.client.clone(),
                domain: site.domain.clone(),
                success: error.is_none(),
                duration_ms: start.elapsed().as_millis() as u64,
                error,
                screenshot,
                timestamp: Utc::now(),
            },
            trace,
        }
    }

    /// Walk the state table. Returns the failure diagnostic, or `None` when
    /// verification succeeded.
    async fn drive(
        &self,
        session: &mut B::Session,
        site: &SiteDescriptor,
        trace: &mut Vec<StepRecord>,
    ) -> Option<String> {
        let selectors = site
            .synthetic
            .as_ref()
            .map(|s| s.selectors.clone())
            .unwrap_or_default();
        let nav = NavigationWait::bounded(NAV_TIMEOUT);

        // Homepage: the only fatal step. No recovery, no later steps.
        let homepage = format!("https://{}/", site.domain);
        match session
            .goto(&homepage, &NavigationWait::bounded(HOMEPAGE_TIMEOUT))
            .await
        {
            Ok(_) => trace.push(StepRecord {
                state: FlowState::Homepage,
                outcome: StepOutcome::Advanced,
            }),
            Err(e) => {
                let msg = format!("homepage load failed: {e}");
                trace.push(StepRecord {
                    state: FlowState::Homepage,
                    outcome: StepOutcome::Failed(msg.clone()),
                });
                return Some(msg);
            }
        }

        self.optional_step(
            session,
            FlowState::ProductPage,
            selectors.product_link.as_deref(),
            &nav,
            trace,
        )
        .await;
        self.optional_step(
            session,
            FlowState::AddToCart,
            selectors.add_to_cart.as_deref(),
            &nav,
            trace,
        )
        .await;

        // Cart, then exactly one fallback to checkout; failure of both is a
        // degraded path, not an abort.
        let cart = format!("https://{}/cart", site.domain);
        let outcome = match session.goto(&cart, &nav).await {
            Ok(_) => StepOutcome::Advanced,
            Err(cart_err) => {
                tracing::debug!(client = %site.client, error = %cart_err, "cart unavailable, trying checkout");
                let checkout = format!("https://{}/checkout", site.domain);
                match session.goto(&checkout, &nav).await {
                    Ok(_) => StepOutcome::FellBack,
                    Err(checkout_err) => StepOutcome::Skipped(format!(
                        "cart and checkout unavailable: {cart_err}; {checkout_err}"
                    )),
                }
            }
        };
        trace.push(StepRecord {
            state: FlowState::CartOrCheckout,
            outcome,
        });

        self.optional_step(
            session,
            FlowState::ProceedToCheckout,
            selectors.proceed_checkout.as_deref(),
            &nav,
            trace,
        )
        .await;

        // Verify: any checkout marker on the final page means success.
        match session.find_any(&CHECKOUT_MARKERS).await {
            Ok(true) => {
                trace.push(StepRecord {
                    state: FlowState::Verify,
                    outcome: StepOutcome::Advanced,
                });
                None
            }
            Ok(false) => {
                let msg = "no checkout marker found on final page".to_string();
                trace.push(StepRecord {
                    state: FlowState::Verify,
                    outcome: StepOutcome::Failed(msg.clone()),
                });
                Some(msg)
            }
            Err(e) => {
                let msg = format!("verification failed: {e}");
                trace.push(StepRecord {
                    state: FlowState::Verify,
                    outcome: StepOutcome::Failed(msg.clone()),
                });
                Some(msg)
            }
        }
    }

    /// Best-effort interaction step: wait for the configured selector, click
    /// it, wait for the resulting navigation. Any miss is a skip, never a
    /// flow failure.
    async fn optional_step(
        &self,
        session: &mut B::Session,
        state: FlowState,
        selector: Option<&str>,
        nav: &NavigationWait,
        trace: &mut Vec<StepRecord>,
    ) {
        let Some(selector) = selector else {
            trace.push(StepRecord {
                state,
                outcome: StepOutcome::Skipped("no selector configured".to_string()),
            });
            return;
        };

        let attempt = async {
            session.wait_for_selector(selector, SELECTOR_TIMEOUT).await?;
            session.click_and_wait(selector, nav).await
        };

        let outcome = match attempt.await {
            Ok(()) => StepOutcome::Advanced,
            Err(e) => {
                tracing::debug!(state = ?state, selector, error = %e, "optional step skipped");
                StepOutcome::Skipped(e.to_string())
            }
        };
        trace.push(StepRecord { state, outcome });
    }

    async fn capture_artifact(&self, session: &mut B::Session, client: &str) -> Option<String> {
        let bytes = match session.screenshot().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(client, error = %e, "failed to capture failure screenshot");
                return None;
            }
        };
        match store::save_screenshot(&self.screenshots_dir, client, &bytes) {
            Ok(path) => {
                tracing::info!(client, path = %path.display(), "failure screenshot saved");
                Some(path.display().to_string())
            }
            Err(e) => {
                tracing::warn!(client, error = %e, "failed to save failure screenshot");
                None
            }
        }
    }
}

/// Convenience for tests and callers inspecting fallback behavior.
impl StepOutcome {
    pub fn is_skip(&self) -> bool {
        matches!(self, StepOutcome::Skipped(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::{Script, ScriptedBrowser};
    use std::sync::atomic::Ordering;

    const SITE_JSON: &str = r##"{
        "sites": [
            {
                "client": "acme",
                "domain": "shop.acme.test",
                "urls": [{ "name": "homepage", "path": "/" }],
                "synthetic": {
                    "enabled": true,
                    "selectors": {
                        "product_link": ".product-card a",
                        "add_to_cart": "#add-to-cart",
                        "proceed_checkout": "#go-to-checkout"
                    }
                }
            }
        ]
    }"##;

    fn site() -> SiteDescriptor {
        SiteRegistry::from_json(SITE_JSON).unwrap().sites[0].clone()
    }

    fn happy_script() -> Script {
        let mut script = Script::default();
        for sel in [".product-card a", "#add-to-cart", "#go-to-checkout"] {
            script.present_selectors.insert(sel.to_string());
            script.clickable_selectors.insert(sel.to_string());
        }
        script.page_markers.insert(".checkout-form".to_string());
        script
    }

    fn engine(script: Script, dir: &std::path::Path) -> SyntheticFlowEngine<ScriptedBrowser> {
        SyntheticFlowEngine::new(ScriptedBrowser::new(script), dir)
    }

    #[tokio::test]
    async fn test_full_flow_success() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(happy_script(), dir.path());
        let report = engine.run_flow(&site()).await;

        assert!(report.result.success);
        assert!(report.result.error.is_none());
        assert!(report.result.screenshot.is_none());

        let outcomes: Vec<&StepOutcome> = report.trace.iter().map(|s| &s.outcome).collect();
        assert!(outcomes.iter().all(|o| **o == StepOutcome::Advanced));
        assert_eq!(report.trace.len(), 6);
    }

    #[tokio::test]
    async fn test_homepage_failure_is_fatal_but_captures_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut script = happy_script();
        script.nav.insert(
            "https://shop.acme.test/".to_string(),
            Err("connection refused".to_string()),
        );
        let browser = ScriptedBrowser::new(script);
        let calls = browser.calls.clone();
        let live = browser.sessions_live.clone();
        let engine = SyntheticFlowEngine::new(browser, dir.path());

        let report = engine.run_flow(&site()).await;

        assert!(!report.result.success);
        assert!(report
            .result
            .error
            .as_deref()
            .unwrap()
            .contains("homepage load failed"));
        // Artifact still captured on the fatal path.
        let screenshot = report.result.screenshot.as_deref().unwrap();
        assert!(std::path::Path::new(screenshot).exists());

        // No steps after the fatal homepage failure.
        assert_eq!(report.trace.len(), 1);
        assert_eq!(report.trace[0].state, FlowState::Homepage);
        let calls = calls.lock().unwrap().clone();
        assert!(!calls.iter().any(|c| c.contains("/cart")));

        // Session released exactly once.
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cart_failure_falls_back_to_checkout_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut script = happy_script();
        script.nav.insert(
            "https://shop.acme.test/cart".to_string(),
            Err("404ish".to_string()),
        );
        let browser = ScriptedBrowser::new(script);
        let calls = browser.calls.clone();
        let engine = SyntheticFlowEngine::new(browser, dir.path());

        let report = engine.run_flow(&site()).await;

        assert!(report.result.success);
        let cart_step = report
            .trace
            .iter()
            .find(|s| s.state == FlowState::CartOrCheckout)
            .unwrap();
        assert_eq!(cart_step.outcome, StepOutcome::FellBack);

        let calls = calls.lock().unwrap().clone();
        let checkout_navs = calls
            .iter()
            .filter(|c| *c == "goto https://shop.acme.test/checkout")
            .count();
        assert_eq!(checkout_navs, 1);
    }

    #[tokio::test]
    async fn test_both_cart_and_checkout_down_still_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let mut script = happy_script();
        script.nav.insert(
            "https://shop.acme.test/cart".to_string(),
            Err("down".to_string()),
        );
        script.nav.insert(
            "https://shop.acme.test/checkout".to_string(),
            Err("down".to_string()),
        );
        let engine = engine(script, dir.path());

        let report = engine.run_flow(&site()).await;

        // Flow does not abort here; verification still runs (and in this
        // script the marker is still present).
        assert!(report.result.success);
        let cart_step = report
            .trace
            .iter()
            .find(|s| s.state == FlowState::CartOrCheckout)
            .unwrap();
        assert!(cart_step.outcome.is_skip());
        assert!(report
            .trace
            .iter()
            .any(|s| s.state == FlowState::Verify && s.outcome == StepOutcome::Advanced));
    }

    #[tokio::test]
    async fn test_missing_optional_selector_skips_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        let mut script = happy_script();
        // Product link never appears: wait times out, step skips.
        script.present_selectors.remove(".product-card a");
        let engine = engine(script, dir.path());

        let report = engine.run_flow(&site()).await;

        assert!(report.result.success);
        let product = report
            .trace
            .iter()
            .find(|s| s.state == FlowState::ProductPage)
            .unwrap();
        assert!(product.outcome.is_skip());
    }

    #[tokio::test]
    async fn test_verification_miss_fails_with_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut script = happy_script();
        script.page_markers.clear();
        let engine = engine(script, dir.path());

        let report = engine.run_flow(&site()).await;

        assert!(!report.result.success);
        assert!(report
            .result
            .error
            .as_deref()
            .unwrap()
            .contains("no checkout marker"));
        assert!(report.result.screenshot.is_some());
    }

    #[tokio::test]
    async fn test_run_skips_disabled_sites() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SiteRegistry::from_json(
            r#"{
                "sites": [
                    { "client": "globex", "domain": "globex.test", "urls": [] },
                    {
                        "client": "acme",
                        "domain": "shop.acme.test",
                        "urls": [],
                        "synthetic": { "enabled": true, "selectors": {} }
                    }
                ]
            }"#,
        )
        .unwrap();

        let mut script = Script::default();
        script.page_markers.insert("#email".to_string());
        let engine = engine(script, dir.path());

        let results = engine.run(&registry).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].client, "acme");
        assert!(results[0].success);
    }
}
