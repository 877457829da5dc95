//! Narrow browser-automation seam.
//!
//! The acquirer's login flows speak this trait only; the chromiumoxide
//! implementation below is the single place that touches CDP. Tests drive
//! the flows against scripted fakes. Every acquisition gets a fresh browser
//! process so one wedged login cannot poison the next.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::human::DragPlan;

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("element not found: {0}")]
    MissingElement(String),
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// One live page in a dedicated browser context.
#[async_trait]
pub trait BrowserContext: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;
    async fn current_url(&mut self) -> Result<String, BrowserError>;
    /// Poll until the current URL contains `marker` or the budget runs out.
    async fn wait_for_url_contains(
        &mut self,
        marker: &str,
        budget: Duration,
    ) -> Result<bool, BrowserError>;
    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), BrowserError>;
    async fn click(&mut self, selector: &str) -> Result<(), BrowserError>;
    async fn exists(&mut self, selector: &str) -> Result<bool, BrowserError>;
    async fn eval(&mut self, script: &str) -> Result<JsonValue, BrowserError>;
    /// Press-move-release along a pre-computed trajectory.
    async fn drag(&mut self, plan: &DragPlan) -> Result<(), BrowserError>;
    async fn cookies(&mut self) -> Result<Vec<(String, String)>, BrowserError>;
    async fn local_storage(&mut self, key: &str) -> Result<Option<String>, BrowserError>;
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn launch_context(&self) -> Result<Box<dyn BrowserContext>, BrowserError>;
}

/// Headless-Chrome driver.
pub struct ChromiumDriver {
    headless: bool,
}

impl ChromiumDriver {
    pub fn new() -> Self {
        Self { headless: true }
    }

    /// Headful mode for operator-attended logins.
    pub fn headful() -> Self {
        Self { headless: false }
    }
}

impl Default for ChromiumDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn launch_context(&self) -> Result<Box<dyn BrowserContext>, BrowserError> {
        let mut builder = BrowserConfig::builder().no_sandbox();
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;
        let event_loop = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        Ok(Box::new(ChromiumContext {
            browser,
            page,
            event_loop,
        }))
    }
}

struct ChromiumContext {
    browser: Browser,
    page: Page,
    event_loop: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl BrowserContext for ChromiumContext {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        debug!(url, "browser navigate");
        self.page
            .goto(url)
            .await
            .map_err(|err| BrowserError::Navigation(err.to_string()))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|err| BrowserError::Navigation(err.to_string()))?;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        let url = self
            .page
            .url()
            .await
            .map_err(|err| BrowserError::Protocol(err.to_string()))?;
        url.ok_or_else(|| BrowserError::Protocol("page has no url".to_string()))
    }

    async fn wait_for_url_contains(
        &mut self,
        marker: &str,
        budget: Duration,
    ) -> Result<bool, BrowserError> {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            if self.current_url().await?.contains(marker) {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::MissingElement(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|err| BrowserError::Protocol(err.to_string()))?;
        element
            .type_str(text)
            .await
            .map_err(|err| BrowserError::Protocol(err.to_string()))?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::MissingElement(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|err| BrowserError::Protocol(err.to_string()))?;
        Ok(())
    }

    async fn exists(&mut self, selector: &str) -> Result<bool, BrowserError> {
        Ok(self.page.find_element(selector).await.is_ok())
    }

    async fn eval(&mut self, script: &str) -> Result<JsonValue, BrowserError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|err| BrowserError::Script(err.to_string()))?;
        Ok(result.value().cloned().unwrap_or(JsonValue::Null))
    }

    async fn drag(&mut self, plan: &DragPlan) -> Result<(), BrowserError> {
        self.dispatch_mouse(DispatchMouseEventType::MousePressed, plan.from.0, plan.from.1)
            .await?;
        for step in &plan.steps {
            self.dispatch_mouse(DispatchMouseEventType::MouseMoved, step.x, step.y)
                .await?;
            tokio::time::sleep(step.pause).await;
        }
        let (end_x, end_y) = plan.end();
        self.dispatch_mouse(DispatchMouseEventType::MouseReleased, end_x, end_y)
            .await
    }

    async fn cookies(&mut self) -> Result<Vec<(String, String)>, BrowserError> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|err| BrowserError::Protocol(err.to_string()))?;
        Ok(cookies
            .into_iter()
            .map(|cookie| (cookie.name, cookie.value))
            .collect())
    }

    async fn local_storage(&mut self, key: &str) -> Result<Option<String>, BrowserError> {
        let script = format!(
            "window.localStorage.getItem({})",
            serde_json::Value::String(key.to_string())
        );
        match self.eval(&script).await? {
            JsonValue::String(value) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    async fn close(self: Box<Self>) {
        let mut browser = self.browser;
        let _ = browser.close().await;
        let _ = browser.wait().await;
        self.event_loop.abort();
    }
}

impl ChromiumContext {
    async fn dispatch_mouse(
        &self,
        kind: DispatchMouseEventType,
        x: f64,
        y: f64,
    ) -> Result<(), BrowserError> {
        let params = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(BrowserError::Protocol)?;
        self.page
            .execute(params)
            .await
            .map_err(|err| BrowserError::Protocol(err.to_string()))?;
        Ok(())
    }
}
