//! GLM-family login.
//!
//! A successful login yields both cookies and a JWT in localStorage. The
//! JWT sometimes lands a moment after the dashboard renders, so extraction
//! retries before falling back to a cookie-only bundle, which the chat
//! endpoints accept.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tracing::{debug, warn};

use chatgate_common::ProviderCredentials;

use crate::acquirer::AcquireError;
use crate::browser::BrowserContext;
use crate::bundle::SessionBundle;
use crate::solver::ChallengeSolver;

use super::{LoginPage, harvest_cookies, submit_login};

pub const PROVIDER_ID: &str = "glm";

const LOGIN_PAGE: LoginPage = LoginPage {
    login_url: "https://chat.z.ai/auth",
    email_selector: "input[name='email']",
    password_selector: "input[type='password']",
    submit_selector: "button[type='submit']",
    logged_in_marker: "chat.z.ai/c",
    rejection_selector: ".error-message, [data-testid='login-error']",
};

const TOKEN_STORAGE_KEY: &str = "token";
const TOKEN_RETRIES: u32 = 3;
const TOKEN_RETRY_BACKOFF: Duration = Duration::from_millis(300);

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

    match extract_token(ctx).await? {
        Some(jwt) => {
            // Never cache a session past the token's own expiry.
            if let Some(exp) = jwt_exp(&jwt)
                && exp < bundle.expires_at
            {
                bundle.expires_at = exp;
            }
            bundle.bearer_token = Some(jwt);
            bundle
                .extra
                .insert("token_source".to_string(), "local_storage".to_string());
        }
        None => {
            if !bundle.has_cookies() {
                return Err(AcquireError::HarvestFailed(
                    "login produced neither a token nor cookies".to_string(),
                ));
            }
            warn!("token never appeared in localStorage; caching cookie-only session");
            bundle
                .extra
                .insert("token_source".to_string(), "cookie".to_string());
        }
    }

    if !bundle.is_well_formed() {
        return Err(AcquireError::HarvestFailed(
            "harvested session already expired".to_string(),
        ));
    }
    Ok(bundle)
}

async fn extract_token(ctx: &mut dyn BrowserContext) -> Result<Option<String>, AcquireError> {
    for attempt in 1..=TOKEN_RETRIES {
        if let Some(token) = ctx.local_storage(TOKEN_STORAGE_KEY).await?
            && !token.is_empty()
        {
            debug!(attempt, "token found in localStorage");
            return Ok(Some(token));
        }
        tokio::time::sleep(TOKEN_RETRY_BACKOFF).await;
    }
    Ok(None)
}

/// `exp` claim of an unverified JWT, seconds since epoch. The token is
/// treated as opaque otherwise.
pub(crate) fn jwt_exp(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_i64()
}
