use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GatewayConfigError {
    #[error("missing required config field: {0}")]
    MissingField(&'static str),
    #[error("invalid config value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// Operator-supplied login material for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Static token that skips browser login entirely when present.
    #[serde(default)]
    pub static_token: Option<String>,
}

impl ProviderCredentials {
    pub fn has_login(&self) -> bool {
        self.email.is_some() && self.password.is_some()
    }
}

/// Final, merged gateway configuration used by the running process.
///
/// Merge order: CLI > ENV > defaults. Immutable after bootstrap; components
/// receive it by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub listen_port: u16,
    /// Optional API key clients must present as `Authorization: Bearer`.
    pub auth_token: Option<String>,
    /// Disables client-side auth entirely.
    pub skip_auth: bool,
    /// Allow guest credential synthesis when a provider pool is empty.
    pub anonymous_mode: bool,
    /// Data directory; sessions live under `<data>/sessions`,
    /// token files under `<data>/tokens`.
    pub data_dir: PathBuf,
    /// Bundle lifetime in seconds.
    pub session_ttl: u64,
    /// Symmetric key for bundle encryption. Absence means plaintext storage.
    pub session_key: Option<String>,
    pub pool_failure_threshold: u32,
    pub pool_recovery_timeout: u64,
    /// External challenge solver ("2captcha"-style) base URL.
    pub captcha_service: Option<String>,
    pub captcha_api_key: Option<String>,
    /// Per-request wall-clock limit in seconds.
    pub request_deadline: u64,
    /// Browser login budget in seconds; stretched when a solver is in use.
    pub acquire_timeout: u64,
    pub debug_logging: bool,
    /// Optional outbound proxy for upstream egress.
    pub proxy: Option<String>,
    #[serde(default)]
    pub provider_credentials: HashMap<String, ProviderCredentials>,
}

impl GatewayConfig {
    pub fn session_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn token_dir(&self) -> PathBuf {
        self.data_dir.join("tokens")
    }

    pub fn request_deadline_duration(&self) -> Duration {
        Duration::from_secs(self.request_deadline)
    }

    pub fn acquire_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout)
    }

    pub fn credentials_for(&self, provider_id: &str) -> ProviderCredentials {
        self.provider_credentials
            .get(provider_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Optional layer used while merging CLI and environment inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayConfigPatch {
    pub host: Option<String>,
    pub listen_port: Option<u16>,
    pub auth_token: Option<String>,
    pub skip_auth: Option<bool>,
    pub anonymous_mode: Option<bool>,
    pub data_dir: Option<PathBuf>,
    pub session_ttl: Option<u64>,
    pub session_key: Option<String>,
    pub pool_failure_threshold: Option<u32>,
    pub pool_recovery_timeout: Option<u64>,
    pub captcha_service: Option<String>,
    pub captcha_api_key: Option<String>,
    pub request_deadline: Option<u64>,
    pub acquire_timeout: Option<u64>,
    pub debug_logging: Option<bool>,
    pub proxy: Option<String>,
    pub provider_credentials: HashMap<String, ProviderCredentials>,
}

impl GatewayConfigPatch {
    pub fn overlay(&mut self, other: GatewayConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.listen_port.is_some() {
            self.listen_port = other.listen_port;
        }
        if other.auth_token.is_some() {
            self.auth_token = other.auth_token;
        }
        if other.skip_auth.is_some() {
            self.skip_auth = other.skip_auth;
        }
        if other.anonymous_mode.is_some() {
            self.anonymous_mode = other.anonymous_mode;
        }
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        if other.session_ttl.is_some() {
            self.session_ttl = other.session_ttl;
        }
        if other.session_key.is_some() {
            self.session_key = other.session_key;
        }
        if other.pool_failure_threshold.is_some() {
            self.pool_failure_threshold = other.pool_failure_threshold;
        }
        if other.pool_recovery_timeout.is_some() {
            self.pool_recovery_timeout = other.pool_recovery_timeout;
        }
        if other.captcha_service.is_some() {
            self.captcha_service = other.captcha_service;
        }
        if other.captcha_api_key.is_some() {
            self.captcha_api_key = other.captcha_api_key;
        }
        if other.request_deadline.is_some() {
            self.request_deadline = other.request_deadline;
        }
        if other.acquire_timeout.is_some() {
            self.acquire_timeout = other.acquire_timeout;
        }
        if other.debug_logging.is_some() {
            self.debug_logging = other.debug_logging;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        for (provider, creds) in other.provider_credentials {
            self.provider_credentials.insert(provider, creds);
        }
    }

    pub fn into_config(self) -> Result<GatewayConfig, GatewayConfigError> {
        let session_ttl = self.session_ttl.unwrap_or(12 * 60 * 60);
        if session_ttl == 0 {
            return Err(GatewayConfigError::InvalidValue {
                field: "session_ttl",
                message: "must be positive".to_string(),
            });
        }
        let acquire_timeout = match self.acquire_timeout {
            Some(value) if value > 180 => {
                return Err(GatewayConfigError::InvalidValue {
                    field: "acquire_timeout",
                    message: "capped at 180 seconds".to_string(),
                });
            }
            Some(value) => value,
            // Challenge solving needs the long budget.
            None if self.captcha_service.is_some() => 180,
            None => 30,
        };
        Ok(GatewayConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            listen_port: self.listen_port.unwrap_or(8790),
            auth_token: self.auth_token.filter(|value| !value.is_empty()),
            skip_auth: self.skip_auth.unwrap_or(false),
            anonymous_mode: self.anonymous_mode.unwrap_or(false),
            data_dir: self
                .data_dir
                .ok_or(GatewayConfigError::MissingField("data_dir"))?,
            session_ttl,
            session_key: self.session_key.filter(|value| !value.is_empty()),
            pool_failure_threshold: self.pool_failure_threshold.unwrap_or(3),
            pool_recovery_timeout: self.pool_recovery_timeout.unwrap_or(1800),
            captcha_service: self.captcha_service,
            captcha_api_key: self.captcha_api_key,
            request_deadline: self.request_deadline.unwrap_or(120),
            acquire_timeout,
            debug_logging: self.debug_logging.unwrap_or(false),
            proxy: self.proxy,
            provider_credentials: self.provider_credentials,
        })
    }
}

impl From<GatewayConfig> for GatewayConfigPatch {
    fn from(value: GatewayConfig) -> Self {
        Self {
            host: Some(value.host),
            listen_port: Some(value.listen_port),
            auth_token: value.auth_token,
            skip_auth: Some(value.skip_auth),
            anonymous_mode: Some(value.anonymous_mode),
            data_dir: Some(value.data_dir),
            session_ttl: Some(value.session_ttl),
            session_key: value.session_key,
            pool_failure_threshold: Some(value.pool_failure_threshold),
            pool_recovery_timeout: Some(value.pool_recovery_timeout),
            captcha_service: value.captcha_service,
            captcha_api_key: value.captcha_api_key,
            request_deadline: Some(value.request_deadline),
            acquire_timeout: Some(value.acquire_timeout),
            debug_logging: Some(value.debug_logging),
            proxy: value.proxy,
            provider_credentials: value.provider_credentials,
        }
    }
}
