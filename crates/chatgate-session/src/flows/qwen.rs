//! Qwen-family login.
//!
//! The chat API authenticates with a compressed credential derived from the
//! raw bearer token and one anti-bot cookie. Compression happens at send
//! time in the adapter; the bundle stores both raw pieces in `extra` so the
//! cached session stays decompressible.

use tracing::debug;

use chatgate_common::ProviderCredentials;

use crate::acquirer::AcquireError;
use crate::browser::BrowserContext;
use crate::bundle::SessionBundle;
use crate::solver::ChallengeSolver;

use super::{LoginPage, harvest_cookies, submit_login};

pub const PROVIDER_ID: &str = "qwen";

/// `extra` keys the adapter reads back at send time.
pub const EXTRA_RAW_TOKEN: &str = "raw_token";
pub const EXTRA_COOKIE_VALUE: &str = "cookie_value";

const LOGIN_PAGE: LoginPage = LoginPage {
    login_url: "https://chat.qwen.ai/auth?action=signin",
    email_selector: "input[name='email']",
    password_selector: "input[name='password']",
    submit_selector: "button[type='submit']",
    logged_in_marker: "chat.qwen.ai",
    rejection_selector: ".ant-message-error, .login-error",
};

const TOKEN_STORAGE_KEY: &str = "token";
/// The anti-bot cookie whose value joins the compressed credential.
const CREDENTIAL_COOKIE: &str = "ssxmod_itna";

pub(super) async fn login(
    ctx: &mut dyn BrowserContext,
    credentials: &ProviderCredentials,
    solver: Option<&ChallengeSolver>,
    ttl_secs: u64,
) -> Result<SessionBundle, AcquireError> {
    submit_login(ctx, &LOGIN_PAGE, credentials, solver).await?;
    harvest(ctx, ttl_secs).await
}

pub(super) async fn harvest(
    ctx: &mut dyn BrowserContext,
    ttl_secs: u64,
) -> Result<SessionBundle, AcquireError> {
    let mut bundle = SessionBundle::new(PROVIDER_ID, ttl_secs);
    harvest_cookies(ctx, &mut bundle).await?;

    let token = ctx
        .local_storage(TOKEN_STORAGE_KEY)
        .await?
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            AcquireError::HarvestFailed("login finished without a bearer token".to_string())
        })?;

    let cookie_value = bundle.cookies.get(CREDENTIAL_COOKIE).cloned().ok_or_else(|| {
        AcquireError::HarvestFailed(format!(
            "required `{CREDENTIAL_COOKIE}` cookie missing from login"
        ))
    })?;

    debug!("captured raw token and credential cookie");
    bundle.bearer_token = Some(token.clone());
    bundle.extra.insert(EXTRA_RAW_TOKEN.to_string(), token);
    bundle
        .extra
        .insert(EXTRA_COOKIE_VALUE.to_string(), cookie_value);
    Ok(bundle)
}
