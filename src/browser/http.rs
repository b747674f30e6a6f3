//! reqwest-backed browser driver.
//!
//! Drives navigation over plain HTTP: a navigation is one GET with the full
//! body read, selector waits are matched against the fetched document, and
//! clicks follow anchor hrefs. There is no script runtime; the failure
//! artifact is the final page source.

use super::{Browser, BrowserError, NavigationWait, PageSession};
use regex::Regex;
use std::time::Duration;

/// User agent sent on every navigation, to avoid bot-detection blocks.
const USER_AGENT: &str =
    "Mozilla/5.0 (compatible; FlowSentry/1.0; +https://github.com/dvasilev-git/flowsentry)";

/// Browser implementation over a shared reqwest client. Each session gets a
/// clone of the client (cheap handle clone) and its own page state.
pub struct HttpBrowser {
    client: reqwest::Client,
}

impl HttpBrowser {
    pub fn new() -> Result<Self, BrowserError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BrowserError::Session(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Browser for HttpBrowser {
    type Session = HttpSession;

    async fn open_session(&self) -> Result<Self::Session, BrowserError> {
        Ok(HttpSession {
            client: self.client.clone(),
            current_url: None,
            body: String::new(),
        })
    }
}

/// One page session: the last navigated URL and its document.
pub struct HttpSession {
    client: reqwest::Client,
    current_url: Option<reqwest::Url>,
    body: String,
}

impl HttpSession {
    async fn fetch(&mut self, url: &str, wait: &NavigationWait) -> Result<u16, BrowserError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| BrowserError::Navigation(format!("invalid url {url}: {e}")))?;

        // The whole navigation (request + body) shares one hard bound. The
        // quiet-period heuristic needs connection visibility this driver does
        // not have; response completion counts as settled.
        let response = tokio::time::timeout(wait.timeout, async {
            let response = self.client.get(parsed.clone()).send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        })
        .await
        .map_err(|_| BrowserError::Timeout(wait.timeout))?;

        let (status, body) = response.map_err(|e| {
            if e.is_timeout() {
                BrowserError::Timeout(wait.timeout)
            } else {
                BrowserError::Navigation(e.to_string())
            }
        })?;

        self.current_url = Some(parsed);
        self.body = body;
        Ok(status)
    }
}

impl PageSession for HttpSession {
    async fn goto(&mut self, url: &str, wait: &NavigationWait) -> Result<u16, BrowserError> {
        self.fetch(url, wait).await
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        // Static documents never gain elements, so there is nothing to poll
        // for; absence now is absence at the timeout.
        let _ = timeout;
        if selector_matches(&self.body, selector) {
            Ok(())
        } else {
            Err(BrowserError::SelectorNotFound(selector.to_string()))
        }
    }

    async fn click_and_wait(
        &mut self,
        selector: &str,
        wait: &NavigationWait,
    ) -> Result<(), BrowserError> {
        if !selector_matches(&self.body, selector) {
            return Err(BrowserError::SelectorNotFound(selector.to_string()));
        }

        // Anchors navigate; anything else (buttons wired to scripts) has no
        // observable effect without a script runtime.
        if let Some(href) = find_anchor_href(&self.body, selector) {
            let target = match &self.current_url {
                Some(base) => base
                    .join(&href)
                    .map_err(|e| BrowserError::Navigation(format!("bad href {href}: {e}")))?,
                None => reqwest::Url::parse(&href)
                    .map_err(|e| BrowserError::Navigation(format!("bad href {href}: {e}")))?,
            };
            self.fetch(target.as_str(), wait).await?;
        }
        Ok(())
    }

    async fn find_any(&mut self, selectors: &[&str]) -> Result<bool, BrowserError> {
        Ok(selectors.iter().any(|s| selector_matches(&self.body, s)))
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
        Ok(self.body.clone().into_bytes())
    }
}

/// One condition of a compound selector part.
enum Cond {
    Id(String),
    Class(String),
    Attr { name: String, value: Option<String> },
}

impl Cond {
    fn matches(&self, tag: &str) -> bool {
        let pattern = match self {
            Cond::Id(id) => format!(r#"(?i)\bid\s*=\s*["']?{}["'\s>]"#, regex::escape(id)),
            Cond::Class(class) => format!(
                r#"(?i)\bclass\s*=\s*["'][^"']*\b{}\b"#,
                regex::escape(class)
            ),
            Cond::Attr { name, value } => match value {
                Some(v) => format!(
                    r#"(?i)\b{}\s*=\s*["']?{}["'\s>]"#,
                    regex::escape(name),
                    regex::escape(v)
                ),
                None => format!(r#"(?i)\b{}\b"#, regex::escape(name)),
            },
        };
        Regex::new(&pattern).map(|re| re.is_match(tag)).unwrap_or(false)
    }
}

/// Parse one compound selector part (`input[name="email"]`, `.checkout`,
/// `#email`) into a tag name and conditions.
fn parse_compound(part: &str) -> (Option<String>, Vec<Cond>) {
    let mut tag = String::new();
    let mut conds = Vec::new();
    let mut chars = part.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c == '#' || c == '.' || c == '[' {
            break;
        }
        tag.push(c);
        chars.next();
    }

    while let Some(c) = chars.next() {
        match c {
            '#' | '.' => {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n == '#' || n == '.' || n == '[' {
                        break;
                    }
                    name.push(n);
                    chars.next();
                }
                if c == '#' {
                    conds.push(Cond::Id(name));
                } else {
                    conds.push(Cond::Class(name));
                }
            }
            '[' => {
                let mut inner = String::new();
                for n in chars.by_ref() {
                    if n == ']' {
                        break;
                    }
                    inner.push(n);
                }
                let (name, value) = match inner.split_once('=') {
                    Some((n, v)) => (
                        n.trim().to_string(),
                        Some(v.trim().trim_matches(['"', '\'']).to_string()),
                    ),
                    None => (inner.trim().to_string(), None),
                };
                conds.push(Cond::Attr { name, value });
            }
            _ => {}
        }
    }

    let tag = tag.trim().to_string();
    if tag.is_empty() || tag == "*" {
        (None, conds)
    } else {
        (Some(tag), conds)
    }
}

/// Whether a CSS-ish selector matches anywhere in the document. Supports
/// comma lists, descendant combinators (each part must match somewhere),
/// tag, `#id`, `.class` and `[attr=value]` conditions.
fn selector_matches(html: &str, selector: &str) -> bool {
    selector.split(',').any(|alt| {
        let alt = alt.trim();
        !alt.is_empty()
            && alt
                .split_whitespace()
                .all(|part| compound_matches(html, part))
    })
}

fn compound_matches(html: &str, part: &str) -> bool {
    let (tag, conds) = parse_compound(part);
    let tag_pattern = match &tag {
        Some(t) => format!(r"(?is)<{}\b[^>]*>", regex::escape(t)),
        None => r"(?is)<[a-zA-Z][^>]*>".to_string(),
    };
    let Ok(re) = Regex::new(&tag_pattern) else {
        return false;
    };
    let matched = re
        .find_iter(html)
        .any(|m| conds.iter().all(|c| c.matches(m.as_str())));
    matched
}

/// Find the `href` of the first anchor matched by `selector`, if the
/// selector targets (or contains) an anchor.
fn find_anchor_href(html: &str, selector: &str) -> Option<String> {
    let anchor_re = Regex::new(r#"(?is)<a\b[^>]*\bhref\s*=\s*["']([^"']+)["'][^>]*>"#).ok()?;

    for alt in selector.split(',') {
        let parts: Vec<&str> = alt.split_whitespace().collect();
        let Some(last) = parts.last() else { continue };
        let (tag, conds) = parse_compound(last);

        for cap in anchor_re.captures_iter(html) {
            let tag_text = cap.get(0).map(|m| m.as_str()).unwrap_or("");
            let tag_ok = tag.as_deref().map(|t| t.eq_ignore_ascii_case("a")).unwrap_or(true);
            if tag_ok && conds.iter().all(|c| c.matches(tag_text)) {
                return cap.get(1).map(|m| m.as_str().to_string());
            }
        }
    }
    None
}
