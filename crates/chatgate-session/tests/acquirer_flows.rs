//! Login-flow behavior against a scripted fake browser.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use chatgate_common::ProviderCredentials;
use chatgate_session::human::DragPlan;
use chatgate_session::{
    AcquireError, AcquireHints, BrowserAcquirer, BrowserContext, BrowserDriver, BrowserError,
    SessionAcquirer,
};

#[derive(Default)]
struct PageState {
    current_url: String,
    navigations: Vec<String>,
    filled: Vec<(String, String)>,
    clicked: Vec<String>,
    drags: usize,
    /// Selectors that `exists` answers true for.
    present: HashSet<String>,
    /// URL the page lands on after the submit button is clicked.
    url_after_submit: Option<String>,
    cookies: Vec<(String, String)>,
    storage: HashMap<String, String>,
    /// Storage reads to swallow before values become visible.
    storage_delay_reads: u32,
    storage_reads: u32,
}

#[derive(Clone, Default)]
struct FakeDriver {
    state: Arc<Mutex<PageState>>,
    launch_delay: Option<Duration>,
    launches: Arc<Mutex<usize>>,
}

struct FakeContext {
    state: Arc<Mutex<PageState>>,
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn launch_context(&self) -> Result<Box<dyn BrowserContext>, BrowserError> {
        *self.launches.lock().unwrap() += 1;
        if let Some(delay) = self.launch_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Box::new(FakeContext {
            state: self.state.clone(),
        }))
    }
}

#[async_trait]
impl BrowserContext for FakeContext {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        let mut state = self.state.lock().unwrap();
        state.current_url = url.to_string();
        state.navigations.push(url.to_string());
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        Ok(self.state.lock().unwrap().current_url.clone())
    }

    async fn wait_for_url_contains(
        &mut self,
        marker: &str,
        _budget: Duration,
    ) -> Result<bool, BrowserError> {
        Ok(self.state.lock().unwrap().current_url.contains(marker))
    }

    async fn fill(&mut self, selector: &str, text: &str) -> Result<(), BrowserError> {
        self.state
            .lock()
            .unwrap()
            .filled
            .push((selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError> {
        let mut state = self.state.lock().unwrap();
        state.clicked.push(selector.to_string());
        if selector.contains("submit")
            && let Some(url) = state.url_after_submit.clone()
        {
            state.current_url = url;
        }
        Ok(())
    }

    async fn exists(&mut self, selector: &str) -> Result<bool, BrowserError> {
        Ok(self.state.lock().unwrap().present.contains(selector))
    }

    async fn eval(&mut self, script: &str) -> Result<JsonValue, BrowserError> {
        // The only script the flows need an answer for is the slider
        // geometry probe.
        if script.contains("getBoundingClientRect") {
            return Ok(serde_json::json!({
                "x": 20.0, "y": 300.0, "width": 40.0, "height": 40.0
            }));
        }
        Ok(JsonValue::Null)
    }

    async fn drag(&mut self, _plan: &DragPlan) -> Result<(), BrowserError> {
        self.state.lock().unwrap().drags += 1;
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<(String, String)>, BrowserError> {
        Ok(self.state.lock().unwrap().cookies.clone())
    }

    async fn local_storage(&mut self, key: &str) -> Result<Option<String>, BrowserError> {
        let mut state = self.state.lock().unwrap();
        state.storage_reads += 1;
        if state.storage_reads <= state.storage_delay_reads {
            return Ok(None);
        }
        Ok(state.storage.get(key).cloned())
    }

    async fn close(self: Box<Self>) {}
}

fn acquirer(driver: &FakeDriver) -> BrowserAcquirer {
    BrowserAcquirer::new(Arc::new(driver.clone()), None, 3600, Duration::from_secs(5))
}

fn login_credentials() -> ProviderCredentials {
    ProviderCredentials {
        email: Some("ops@example.com".to_string()),
        password: Some("hunter2".to_string()),
        static_token: None,
    }
}

fn fake_jwt() -> String {
    use base64::Engine;
    let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    format!(
        "{}.{}.sig",
        b64.encode(br#"{"alg":"HS256"}"#),
        b64.encode(serde_json::json!({"exp": 4_000_000_000_i64}).to_string())
    )
}

#[tokio::test]
async fn glm_login_harvests_cookies_and_token() {
    let driver = FakeDriver::default();
    {
        let mut state = driver.state.lock().unwrap();
        state.url_after_submit = Some("https://chat.z.ai/c/new".to_string());
        state.cookies = vec![("acw_tc".to_string(), "abc".to_string())];
        state.storage.insert("token".to_string(), fake_jwt());
    }

    let bundle = acquirer(&driver)
        .acquire("glm", &login_credentials(), AcquireHints::default())
        .await
        .unwrap();

    assert_eq!(bundle.provider_id, "glm");
    assert_eq!(bundle.cookies.get("acw_tc").map(String::as_str), Some("abc"));
    assert!(bundle.bearer_token.is_some());
    assert_eq!(
        bundle.extra.get("token_source").map(String::as_str),
        Some("local_storage")
    );
}

#[tokio::test]
async fn glm_token_extraction_retries_before_succeeding() {
    let driver = FakeDriver::default();
    {
        let mut state = driver.state.lock().unwrap();
        state.url_after_submit = Some("https://chat.z.ai/c/new".to_string());
        state.cookies = vec![("acw_tc".to_string(), "abc".to_string())];
        state.storage.insert("token".to_string(), fake_jwt());
        state.storage_delay_reads = 2;
    }

    let bundle = acquirer(&driver)
        .acquire("glm", &login_credentials(), AcquireHints::default())
        .await
        .unwrap();

    assert!(bundle.bearer_token.is_some());
    assert!(driver.state.lock().unwrap().storage_reads >= 3);
}

#[tokio::test]
async fn glm_falls_back_to_cookie_only_bundle() {
    let driver = FakeDriver::default();
    {
        let mut state = driver.state.lock().unwrap();
        state.url_after_submit = Some("https://chat.z.ai/c/new".to_string());
        state.cookies = vec![("acw_tc".to_string(), "abc".to_string())];
    }

    let bundle = acquirer(&driver)
        .acquire("glm", &login_credentials(), AcquireHints::default())
        .await
        .unwrap();

    assert_eq!(bundle.bearer_token, None);
    assert_eq!(
        bundle.extra.get("token_source").map(String::as_str),
        Some("cookie")
    );
}

#[tokio::test]
async fn slider_challenge_triggers_humanized_drag() {
    let driver = FakeDriver::default();
    {
        let mut state = driver.state.lock().unwrap();
        state.url_after_submit = Some("https://chat.z.ai/c/new".to_string());
        state.cookies = vec![("acw_tc".to_string(), "abc".to_string())];
        state.storage.insert("token".to_string(), fake_jwt());
        state.present.insert(".geetest_slider_button".to_string());
    }

    acquirer(&driver)
        .acquire("glm", &login_credentials(), AcquireHints::default())
        .await
        .unwrap();

    assert_eq!(driver.state.lock().unwrap().drags, 1);
}

#[tokio::test]
async fn qwen_requires_the_credential_cookie() {
    let driver = FakeDriver::default();
    {
        let mut state = driver.state.lock().unwrap();
        state.url_after_submit = Some("https://chat.qwen.ai/".to_string());
        state.cookies = vec![("other".to_string(), "x".to_string())];
        state.storage.insert("token".to_string(), "raw-tok".to_string());
    }

    let err = acquirer(&driver)
        .acquire("qwen", &login_credentials(), AcquireHints::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AcquireError::HarvestFailed(_)));
}

#[tokio::test]
async fn qwen_stores_raw_token_and_cookie_in_extra() {
    let driver = FakeDriver::default();
    {
        let mut state = driver.state.lock().unwrap();
        state.url_after_submit = Some("https://chat.qwen.ai/".to_string());
        state.cookies = vec![("ssxmod_itna".to_string(), "mod-v".to_string())];
        state.storage.insert("token".to_string(), "raw-tok".to_string());
    }

    let bundle = acquirer(&driver)
        .acquire("qwen", &login_credentials(), AcquireHints::default())
        .await
        .unwrap();

    assert_eq!(bundle.extra.get("raw_token").map(String::as_str), Some("raw-tok"));
    assert_eq!(bundle.extra.get("cookie_value").map(String::as_str), Some("mod-v"));
}

#[tokio::test]
async fn k2_without_credentials_takes_guest_session() {
    let driver = FakeDriver::default();
    driver.state.lock().unwrap().cookies = vec![("kimi_sid".to_string(), "guest".to_string())];

    let bundle = acquirer(&driver)
        .acquire("k2", &ProviderCredentials::default(), AcquireHints::default())
        .await
        .unwrap();

    assert_eq!(bundle.bearer_token, None);
    assert!(bundle.has_cookies());
    let state = driver.state.lock().unwrap();
    assert!(state.navigations.iter().any(|url| url == "https://www.kimi.com/"));
    assert!(state.filled.is_empty());
}

#[tokio::test]
async fn static_token_skips_the_browser_entirely() {
    let driver = FakeDriver::default();
    let credentials = ProviderCredentials {
        static_token: Some("pasted-token".to_string()),
        ..Default::default()
    };

    let bundle = acquirer(&driver)
        .acquire("glm", &credentials, AcquireHints::default())
        .await
        .unwrap();

    assert_eq!(bundle.bearer_token.as_deref(), Some("pasted-token"));
    assert_eq!(*driver.launches.lock().unwrap(), 0);
}

#[tokio::test]
async fn slow_login_times_out_with_navigation_error() {
    let driver = FakeDriver {
        launch_delay: Some(Duration::from_secs(30)),
        ..Default::default()
    };
    let acquirer = BrowserAcquirer::new(
        Arc::new(driver),
        None,
        3600,
        Duration::from_millis(50),
    );

    let err = acquirer
        .acquire("glm", &login_credentials(), AcquireHints::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AcquireError::NavigationTimeout(_)));
}
