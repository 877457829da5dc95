//! K2-family login.
//!
//! Login is optional here: a guest session (cookies only, no token) is a
//! valid bundle. Authenticated login is attempted only when the operator
//! configured credentials and the caller did not ask for a guest.

use tracing::debug;

use chatgate_common::ProviderCredentials;

use crate::acquirer::AcquireError;
use crate::browser::BrowserContext;
use crate::bundle::SessionBundle;
use crate::solver::ChallengeSolver;

use super::{LoginPage, harvest_cookies, submit_login};

pub const PROVIDER_ID: &str = "k2";

const CHAT_URL: &str = "https://www.kimi.com/";

const LOGIN_PAGE: LoginPage = LoginPage {
    login_url: "https://www.kimi.com/login",
    email_selector: "input[name='email']",
    password_selector: "input[type='password']",
    submit_selector: "button[type='submit']",
    logged_in_marker: "kimi.com/chat",
    rejection_selector: ".login-error, .toast-error",
};

const TOKEN_STORAGE_KEY: &str = "access_token";

pub(super) async fn login(
    ctx: &mut dyn BrowserContext,
    credentials: &ProviderCredentials,
    solver: Option<&ChallengeSolver>,
    ttl_secs: u64,
    prefer_guest: bool,
) -> Result<SessionBundle, AcquireError> {
    if !prefer_guest && credentials.has_login() {
        submit_login(ctx, &LOGIN_PAGE, credentials, solver).await?;
        return harvest(ctx, ttl_secs).await;
    }

    debug!("no credentials configured; taking a guest session");
    ctx.navigate(CHAT_URL).await?;
    let bundle = harvest(ctx, ttl_secs).await?;
    if !bundle.has_cookies() {
        return Err(AcquireError::HarvestFailed(
            "guest visit set no cookies".to_string(),
        ));
    }
    Ok(bundle)
}

pub(super) async fn harvest(
    ctx: &mut dyn BrowserContext,
    ttl_secs: u64,
) -> Result<SessionBundle, AcquireError> {
    let mut bundle = SessionBundle::new(PROVIDER_ID, ttl_secs);
    harvest_cookies(ctx, &mut bundle).await?;

    // Present only on authenticated sessions; guests run on cookies alone.
    if let Some(token) = ctx.local_storage(TOKEN_STORAGE_KEY).await?
        && !token.is_empty()
    {
        bundle.bearer_token = Some(token);
    }
    Ok(bundle)
}
