//! Rendered page fetching for JavaScript-driven sources.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::BROWSER_USER_AGENT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    /// No more than two open connections for 500ms.
    NetworkIdle,
}

impl WaitUntil {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitUntil::Load => "load",
            WaitUntil::DomContentLoaded => "domcontentloaded",
            WaitUntil::NetworkIdle => "networkidle2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Font,
    Stylesheet,
    Media,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub timeout: Duration,
    pub wait_until: WaitUntil,
    pub blocked: Vec<ResourceType>,
    /// Render is ready once any of these matches.
    pub wait_for_selectors: Vec<String>,
    pub selector_timeout: Duration,
    /// Extra idle time for late client-side rendering.
    pub settle: Duration,
    pub user_agent: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            wait_until: WaitUntil::NetworkIdle,
            blocked: vec![ResourceType::Image, ResourceType::Font, ResourceType::Stylesheet],
            wait_for_selectors: Vec::new(),
            selector_timeout: Duration::from_secs(15),
            settle: Duration::from_secs(8),
            user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

impl RenderOptions {
    pub fn waiting_for(mut self, selectors: Vec<String>) -> Self {
        self.wait_for_selectors = selectors;
        self
    }

    /// Upper bound for one render including settle time.
    pub fn budget(&self) -> Duration {
        self.timeout + self.settle + self.selector_timeout
    }
}

/// HTML snapshot of a page after client-side rendering.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub url: String,
    pub html: String,
}

/// Backend that loads a page in a real browser and returns its DOM. The
/// browser session must be released before `render` returns or when the
/// returned future is dropped.
#[async_trait]
pub trait RenderedPageFetcher: Send + Sync {
    async fn render(&self, url: &str, opts: &RenderOptions) -> Result<RenderedPage>;
}

/// Browserless-compatible `/content` endpoint. Every call gets a fresh
/// browser context that the service tears down after responding.
#[derive(Clone)]
pub struct BrowserRenderService {
    endpoint: String,
    token: Option<String>,
    client: Client,
}

impl BrowserRenderService {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            endpoint: format!("{}/content", base_url.trim_end_matches('/')),
            token,
            client: Client::new(),
        }
    }

    /// `BROWSER_RENDER_URL` (+ optional `BROWSER_RENDER_TOKEN`), if set.
    pub fn from_env() -> Option<Self> {
        let base = std::env::var("BROWSER_RENDER_URL").ok()?;
        if base.trim().is_empty() {
            return None;
        }
        let token = std::env::var("BROWSER_RENDER_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        Some(Self::new(base.trim(), token))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GotoOptions {
    wait_until: &'static str,
    timeout: u64,
}

#[derive(Serialize)]
struct WaitForSelector {
    selector: String,
    timeout: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentRequest<'a> {
    url: &'a str,
    goto_options: GotoOptions,
    reject_resource_types: &'a [ResourceType],
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_for_selector: Option<WaitForSelector>,
    wait_for_timeout: u64,
    user_agent: &'a str,
}

#[async_trait]
impl RenderedPageFetcher for BrowserRenderService {
    async fn render(&self, url: &str, opts: &RenderOptions) -> Result<RenderedPage> {
        // A selector list waits for whichever candidate shows up first;
        // one unparsable entry would void the whole list.
        let valid: Vec<&str> = opts
            .wait_for_selectors
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty() && scraper::Selector::parse(s).is_ok())
            .collect();
        let body = ContentRequest {
            url,
            goto_options: GotoOptions {
                wait_until: opts.wait_until.as_str(),
                timeout: opts.timeout.as_millis() as u64,
            },
            reject_resource_types: &opts.blocked,
            wait_for_selector: (!valid.is_empty()).then(|| WaitForSelector {
                selector: valid.join(", "),
                timeout: opts.selector_timeout.as_millis() as u64,
            }),
            wait_for_timeout: opts.settle.as_millis() as u64,
            user_agent: &opts.user_agent,
        };

        let mut req = self
            .client
            .post(&self.endpoint)
            .timeout(opts.budget())
            .json(&body);
        if let Some(t) = &self.token {
            req = req.query(&[("token", t.as_str())]);
        }
        debug!(target: "scrape", url, endpoint = %self.endpoint, "render requested");

        let rsp = req.send().await.context("render service request")?;
        let status = rsp.status();
        if !status.is_success() {
            let detail = rsp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "render service returned {status}: {}",
                detail.chars().take(200).collect::<String>()
            ));
        }
        let html = rsp.text().await.context("render service body")?;
        Ok(RenderedPage {
            url: url.to_string(),
            html,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn posts_browserless_content_request() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/content")
            .match_query(mockito::Matcher::UrlEncoded("token".into(), "secret".into()))
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "url": "https://game.test/news",
                "gotoOptions": {"waitUntil": "networkidle2", "timeout": 60000},
                "rejectResourceTypes": ["image", "font", "stylesheet"],
                "waitForSelector": {"selector": ".card, a[href*='patch']"},
                "waitForTimeout": 8000
            })))
            .with_status(200)
            .with_body("<html><body><div class=\"card\">ok</div></body></html>")
            .create_async()
            .await;

        let svc = BrowserRenderService::new(&format!("{}/", server.url()), Some("secret".into()));
        let opts = RenderOptions::default().waiting_for(vec![
            ".card".into(),
            "[[bad".into(),
            "a[href*='patch']".into(),
        ]);
        let page = svc.render("https://game.test/news", &opts).await.unwrap();
        assert!(page.html.contains("card"));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/content")
            .with_status(408)
            .with_body("timeout")
            .create_async()
            .await;
        let svc = BrowserRenderService::new(&server.url(), None);
        let err = svc
            .render("https://game.test", &RenderOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("408"));
    }
}
