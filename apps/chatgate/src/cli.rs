use std::path::PathBuf;

use clap::Parser;

use chatgate_common::{GatewayConfigPatch, ProviderCredentials};

#[derive(Parser)]
#[command(name = "chatgate", about = "OpenAI-compatible gateway over browser-session chat providers")]
pub(crate) struct Cli {
    #[arg(long, env = "CHATGATE_HOST", default_value = "0.0.0.0")]
    pub(crate) host: String,
    #[arg(long, env = "CHATGATE_PORT", default_value_t = 8790)]
    pub(crate) port: u16,
    /// API key clients must present; omit for open access.
    #[arg(long, env = "CHATGATE_AUTH_TOKEN")]
    pub(crate) auth_token: Option<String>,
    #[arg(long, env = "CHATGATE_SKIP_AUTH")]
    pub(crate) skip_auth: bool,
    /// Allow guest credential synthesis when a provider pool is empty.
    #[arg(long, env = "CHATGATE_ANONYMOUS_MODE")]
    pub(crate) anonymous_mode: bool,
    #[arg(long, env = "CHATGATE_DATA_DIR", default_value = "./data")]
    pub(crate) data_dir: PathBuf,
    /// Session bundle lifetime in seconds.
    #[arg(long, env = "CHATGATE_SESSION_TTL")]
    pub(crate) session_ttl: Option<u64>,
    /// Symmetric key for session encryption; omitting it stores plaintext.
    #[arg(long, env = "CHATGATE_SESSION_KEY")]
    pub(crate) session_key: Option<String>,
    #[arg(long, env = "CHATGATE_POOL_FAILURE_THRESHOLD")]
    pub(crate) pool_failure_threshold: Option<u32>,
    #[arg(long, env = "CHATGATE_POOL_RECOVERY_TIMEOUT")]
    pub(crate) pool_recovery_timeout: Option<u64>,
    /// 2Captcha-style solver base URL.
    #[arg(long, env = "CHATGATE_CAPTCHA_SERVICE")]
    pub(crate) captcha_service: Option<String>,
    #[arg(long, env = "CHATGATE_CAPTCHA_API_KEY")]
    pub(crate) captcha_api_key: Option<String>,
    /// Per-request wall-clock limit in seconds.
    #[arg(long, env = "CHATGATE_REQUEST_DEADLINE")]
    pub(crate) request_deadline: Option<u64>,
    /// Browser login budget in seconds (up to 180).
    #[arg(long, env = "CHATGATE_ACQUIRE_TIMEOUT")]
    pub(crate) acquire_timeout: Option<u64>,
    #[arg(long, env = "CHATGATE_DEBUG")]
    pub(crate) debug_logging: bool,
    /// Outbound proxy for upstream egress.
    #[arg(long, env = "CHATGATE_PROXY")]
    pub(crate) proxy: Option<String>,
}

const PROVIDERS: &[&str] = &["glm", "qwen", "k2"];

impl Cli {
    pub(crate) fn into_patch(self) -> GatewayConfigPatch {
        let mut patch = GatewayConfigPatch {
            host: Some(self.host),
            listen_port: Some(self.port),
            auth_token: self.auth_token,
            skip_auth: self.skip_auth.then_some(true),
            anonymous_mode: self.anonymous_mode.then_some(true),
            data_dir: Some(self.data_dir),
            session_ttl: self.session_ttl,
            session_key: self.session_key,
            pool_failure_threshold: self.pool_failure_threshold,
            pool_recovery_timeout: self.pool_recovery_timeout,
            captcha_service: self.captcha_service,
            captcha_api_key: self.captcha_api_key,
            request_deadline: self.request_deadline,
            acquire_timeout: self.acquire_timeout,
            debug_logging: self.debug_logging.then_some(true),
            proxy: self.proxy,
            ..Default::default()
        };
        for provider in PROVIDERS {
            let credentials = provider_credentials_from_env(provider);
            if credentials != ProviderCredentials::default() {
                patch
                    .provider_credentials
                    .insert(provider.to_string(), credentials);
            }
        }
        patch
    }
}

/// `CHATGATE_GLM_EMAIL` / `_PASSWORD` / `_TOKEN` and friends.
fn provider_credentials_from_env(provider: &str) -> ProviderCredentials {
    let upper = provider.to_ascii_uppercase();
    let var = |suffix: &str| {
        std::env::var(format!("CHATGATE_{upper}_{suffix}"))
            .ok()
            .filter(|value| !value.is_empty())
    };
    ProviderCredentials {
        email: var("EMAIL"),
        password: var("PASSWORD"),
        static_token: var("TOKEN"),
    }
}
