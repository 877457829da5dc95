//! Provider login flows.
//!
//! Each flow drives the same skeleton: navigate to the login page, fill the
//! form, clear whatever challenge the page raises, submit, wait for the
//! dashboard, harvest cookies and storage. The per-provider modules own the
//! selectors and the post-processing that turns a harvested page into a
//! usable [`SessionBundle`].

pub mod glm;
pub mod k2;
pub mod qwen;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use chatgate_common::ProviderCredentials;

use crate::acquirer::{AcquireError, AcquireHints, SessionAcquirer};
use crate::browser::{BrowserContext, BrowserDriver, BrowserError};
use crate::bundle::SessionBundle;
use crate::human::plan_drag;
use crate::solver::{ChallengeKind, ChallengeSolver};

impl From<BrowserError> for AcquireError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Launch(message) => AcquireError::BrowserLaunchFailed(message),
            BrowserError::Navigation(message) => AcquireError::NavigationTimeout(message),
            BrowserError::MissingElement(message)
            | BrowserError::Script(message)
            | BrowserError::Protocol(message) => AcquireError::HarvestFailed(message),
        }
    }
}

/// Static description of one provider's login page.
pub(crate) struct LoginPage {
    pub login_url: &'static str,
    pub email_selector: &'static str,
    pub password_selector: &'static str,
    pub submit_selector: &'static str,
    /// URL fragment that marks a completed login.
    pub logged_in_marker: &'static str,
    /// Element shown next to the form on bad credentials.
    pub rejection_selector: &'static str,
}

/// Browser-driven [`SessionAcquirer`].
pub struct BrowserAcquirer {
    driver: Arc<dyn BrowserDriver>,
    solver: Option<Arc<ChallengeSolver>>,
    ttl_secs: u64,
    timeout: Duration,
}

impl BrowserAcquirer {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        solver: Option<Arc<ChallengeSolver>>,
        ttl_secs: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            driver,
            solver,
            ttl_secs,
            timeout,
        }
    }

    /// Salvage a bundle from an operator-supplied, already-logged-in page.
    pub async fn extract_only(
        &self,
        ctx: &mut dyn BrowserContext,
        provider_id: &str,
    ) -> Result<SessionBundle, AcquireError> {
        match provider_id {
            glm::PROVIDER_ID => glm::harvest(ctx, self.ttl_secs).await,
            qwen::PROVIDER_ID => qwen::harvest(ctx, self.ttl_secs).await,
            k2::PROVIDER_ID => k2::harvest(ctx, self.ttl_secs).await,
            other => Err(AcquireError::HarvestFailed(format!(
                "no login flow registered for provider `{other}`"
            ))),
        }
    }

    async fn run_flow(
        &self,
        provider_id: &str,
        credentials: &ProviderCredentials,
        hints: AcquireHints,
    ) -> Result<SessionBundle, AcquireError> {
        let mut ctx = self.driver.launch_context().await?;
        let result = self
            .dispatch(ctx.as_mut(), provider_id, credentials, hints)
            .await;
        ctx.close().await;
        result
    }

    async fn dispatch(
        &self,
        ctx: &mut dyn BrowserContext,
        provider_id: &str,
        credentials: &ProviderCredentials,
        hints: AcquireHints,
    ) -> Result<SessionBundle, AcquireError> {
        match provider_id {
            glm::PROVIDER_ID => {
                glm::login(ctx, credentials, self.solver.as_deref(), self.ttl_secs).await
            }
            qwen::PROVIDER_ID => {
                qwen::login(ctx, credentials, self.solver.as_deref(), self.ttl_secs).await
            }
            k2::PROVIDER_ID => {
                k2::login(
                    ctx,
                    credentials,
                    self.solver.as_deref(),
                    self.ttl_secs,
                    hints.prefer_guest,
                )
                .await
            }
            other => Err(AcquireError::HarvestFailed(format!(
                "no login flow registered for provider `{other}`"
            ))),
        }
    }
}

#[async_trait]
impl SessionAcquirer for BrowserAcquirer {
    async fn acquire(
        &self,
        provider_id: &str,
        credentials: &ProviderCredentials,
        hints: AcquireHints,
    ) -> Result<SessionBundle, AcquireError> {
        if let Some(token) = credentials.static_token.as_deref() {
            debug!(
                provider = provider_id,
                token = %chatgate_common::redact::fingerprint(token),
                "using operator-supplied static token"
            );
            return Ok(SessionBundle::from_static_token(
                provider_id,
                token,
                self.ttl_secs,
            ));
        }

        match tokio::time::timeout(self.timeout, self.run_flow(provider_id, credentials, hints))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(AcquireError::NavigationTimeout(format!(
                "login did not complete within {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// Shared login skeleton: form fill, challenge, submit, dashboard wait.
pub(crate) async fn submit_login(
    ctx: &mut dyn BrowserContext,
    page: &LoginPage,
    credentials: &ProviderCredentials,
    solver: Option<&ChallengeSolver>,
) -> Result<(), AcquireError> {
    let email = credentials
        .email
        .as_deref()
        .ok_or_else(|| AcquireError::CredentialsRejected("email not configured".to_string()))?;
    let password = credentials
        .password
        .as_deref()
        .ok_or_else(|| AcquireError::CredentialsRejected("password not configured".to_string()))?;

    ctx.navigate(page.login_url).await?;
    ctx.fill(page.email_selector, email).await?;
    ctx.fill(page.password_selector, password).await?;

    clear_challenge(ctx, page.login_url, solver).await?;

    ctx.click(page.submit_selector).await?;
    if ctx
        .wait_for_url_contains(page.logged_in_marker, Duration::from_secs(15))
        .await?
    {
        return Ok(());
    }

    if ctx.exists(page.rejection_selector).await? {
        return Err(AcquireError::CredentialsRejected(
            "provider reported invalid email or password".to_string(),
        ));
    }
    Err(AcquireError::NavigationTimeout(
        "login submitted but dashboard never appeared".to_string(),
    ))
}

const SLIDER_HANDLE_SELECTORS: &[&str] = &[
    ".geetest_slider_button",
    ".slider-btn",
    ".nc_iconfont.btn_slide",
];
const SITE_KEY_PROBES: &[(&str, ChallengeKind)] = &[
    (".g-recaptcha[data-sitekey]", ChallengeKind::Recaptcha),
    (".h-captcha[data-sitekey]", ChallengeKind::Hcaptcha),
    (".cf-turnstile[data-sitekey]", ChallengeKind::Turnstile),
];

async fn clear_challenge(
    ctx: &mut dyn BrowserContext,
    page_url: &str,
    solver: Option<&ChallengeSolver>,
) -> Result<(), AcquireError> {
    for &selector in SLIDER_HANDLE_SELECTORS {
        if ctx.exists(selector).await? {
            debug!(selector, "slider challenge detected");
            return drag_slider(ctx, selector).await;
        }
    }

    for &(selector, kind) in SITE_KEY_PROBES {
        if !ctx.exists(selector).await? {
            continue;
        }
        let Some(solver) = solver else {
            return Err(AcquireError::ChallengeUnsolved(
                "page raised a challenge but no solver service is configured".to_string(),
            ));
        };
        let site_key = read_site_key(ctx, selector).await?;
        let token = solver.solve(kind, &site_key, page_url).await?;
        splice_token(ctx, kind, &token).await?;
        return Ok(());
    }

    Ok(())
}

/// Locate the handle and its track, then drag with a humanized trajectory.
/// Instant jumps are scored and rejected server-side.
async fn drag_slider(ctx: &mut dyn BrowserContext, handle_selector: &str) -> Result<(), AcquireError> {
    let handle = element_rect(ctx, handle_selector)
        .await?
        .ok_or_else(|| AcquireError::ChallengeUnsolved("slider handle vanished".to_string()))?;
    let track = element_rect(ctx, ".geetest_slider_track, .slider-track, .nc-lang-cnt")
        .await?
        .unwrap_or(Rect {
            x: handle.x,
            y: handle.y,
            width: 260.0,
            height: handle.height,
        });

    let from = (
        handle.x + handle.width / 2.0,
        handle.y + handle.height / 2.0,
    );
    let to = (track.x + track.width - handle.width / 2.0, from.1);
    ctx.drag(&plan_drag(from, to)).await?;

    // Give the widget a beat to verify the trail before the form submits.
    tokio::time::sleep(Duration::from_millis(600)).await;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

async fn element_rect(
    ctx: &mut dyn BrowserContext,
    selector: &str,
) -> Result<Option<Rect>, AcquireError> {
    let script = format!(
        "(() => {{ const el = document.querySelector({sel}); if (!el) return null; \
         const r = el.getBoundingClientRect(); \
         return {{x: r.x, y: r.y, width: r.width, height: r.height}}; }})()",
        sel = serde_json::Value::String(selector.to_string())
    );
    let value = ctx.eval(&script).await?;
    if value.is_null() {
        return Ok(None);
    }
    let rect = Rect {
        x: value.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0),
        y: value.get("y").and_then(|v| v.as_f64()).unwrap_or(0.0),
        width: value.get("width").and_then(|v| v.as_f64()).unwrap_or(0.0),
        height: value.get("height").and_then(|v| v.as_f64()).unwrap_or(0.0),
    };
    Ok(Some(rect))
}

async fn read_site_key(
    ctx: &mut dyn BrowserContext,
    selector: &str,
) -> Result<String, AcquireError> {
    let script = format!(
        "document.querySelector({sel})?.getAttribute('data-sitekey')",
        sel = serde_json::Value::String(selector.to_string())
    );
    match ctx.eval(&script).await? {
        serde_json::Value::String(key) if !key.is_empty() => Ok(key),
        _ => Err(AcquireError::ChallengeUnsolved(
            "challenge widget has no site key".to_string(),
        )),
    }
}

/// Write the solved token into the field the widget's callback reads.
async fn splice_token(
    ctx: &mut dyn BrowserContext,
    kind: ChallengeKind,
    token: &str,
) -> Result<(), AcquireError> {
    let field = match kind {
        ChallengeKind::Recaptcha => "g-recaptcha-response",
        ChallengeKind::Hcaptcha => "h-captcha-response",
        ChallengeKind::Turnstile => "cf-turnstile-response",
    };
    let script = format!(
        "(() => {{ const el = document.querySelector('[name={field}]'); \
         if (el) {{ el.value = {token}; el.dispatchEvent(new Event('change')); }} }})()",
        token = serde_json::Value::String(token.to_string())
    );
    ctx.eval(&script).await?;
    Ok(())
}

/// Cookie harvest shared by every provider flow.
pub(crate) async fn harvest_cookies(
    ctx: &mut dyn BrowserContext,
    bundle: &mut SessionBundle,
) -> Result<(), AcquireError> {
    let cookies = ctx.cookies().await?;
    if cookies.is_empty() {
        warn!(provider = %bundle.provider_id, "login page yielded no cookies");
    }
    for (name, value) in cookies {
        bundle.cookies.insert(name, value);
    }
    Ok(())
}
