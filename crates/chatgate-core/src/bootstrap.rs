//! Process wiring: build the store, pool, adapters, registry, and acquirer
//! from a merged [`GatewayConfig`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use chatgate_common::{GatewayConfig, unix_now};
use chatgate_provider_core::{
    Credential, CredentialPool, ModelRegistry, PoolConfig, ProviderAdapter, RegistryError,
    parse_token_lines,
};
use chatgate_provider_impl::{
    GlmAdapter, K2Adapter, QwenAdapter, UpstreamClientConfig, WreqUpstreamClient,
};
use chatgate_session::solver::ChallengeSolver;
use chatgate_session::{BrowserAcquirer, ChromiumDriver, SessionStore};

use crate::engine::Engine;
use crate::state::GatewayState;

const POOL_TICK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("io failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("upstream client init failed: {0}")]
    Client(String),
    #[error("challenge solver init failed: {0}")]
    Solver(String),
}

pub struct Bootstrap {
    pub engine: Arc<Engine>,
    pub state: Arc<GatewayState>,
}

pub async fn bootstrap(config: GatewayConfig) -> Result<Bootstrap, BootstrapError> {
    for dir in [config.session_dir(), config.token_dir()] {
        std::fs::create_dir_all(&dir).map_err(|source| BootstrapError::Io {
            path: dir.clone(),
            source,
        })?;
    }

    let upstream = Arc::new(
        WreqUpstreamClient::new(UpstreamClientConfig {
            proxy: config.proxy.clone(),
            ..UpstreamClientConfig::default()
        })
        .map_err(|err| BootstrapError::Client(err.to_string()))?,
    );

    let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
        Arc::new(GlmAdapter::new(upstream.clone())),
        Arc::new(QwenAdapter::new(upstream.clone())),
        Arc::new(K2Adapter::new(upstream.clone())),
    ];
    let registry = Arc::new(ModelRegistry::build(adapters)?);

    let pool = Arc::new(CredentialPool::new(PoolConfig {
        failure_threshold: config.pool_failure_threshold,
        recovery_timeout_secs: config.pool_recovery_timeout as i64,
    }));
    load_credentials(&config, &pool, &registry.provider_ids());

    let store = Arc::new(SessionStore::new(
        config.session_dir(),
        config.session_ttl,
        config.session_key.clone(),
    ));

    let solver = match (&config.captcha_service, &config.captcha_api_key) {
        (Some(base_url), Some(api_key)) => Some(Arc::new(
            ChallengeSolver::new(base_url.clone(), api_key.clone())
                .map_err(|err| BootstrapError::Solver(err.to_string()))?,
        )),
        _ => None,
    };
    let acquirer = Arc::new(BrowserAcquirer::new(
        Arc::new(ChromiumDriver::new()),
        solver,
        config.session_ttl,
        config.acquire_timeout_duration(),
    ));

    let state = Arc::new(GatewayState {
        config,
        registry,
        pool,
        store,
        acquirer,
    });
    spawn_pool_tick(state.pool.clone());
    log_startup(&state);

    Ok(Bootstrap {
        engine: Arc::new(Engine::new(state.clone())),
        state,
    })
}

fn load_credentials(config: &GatewayConfig, pool: &CredentialPool, providers: &[String]) {
    for provider in providers {
        let path = config.token_dir().join(format!("{provider}.tokens"));
        let mut loaded = 0usize;
        if let Ok(text) = std::fs::read_to_string(&path) {
            for credential in parse_token_lines(&text) {
                pool.insert(provider.clone(), credential);
                loaded += 1;
            }
        }

        let creds = config.credentials_for(provider);
        if let Some(token) = creds.static_token.as_deref() {
            pool.insert(provider.clone(), Credential::token(token));
            loaded += 1;
        }
        if creds.has_login() {
            // Browser-login-backed credential; the session store owns the
            // actual bundle.
            pool.insert(provider.clone(), Credential::session_ref());
            loaded += 1;
        }
        if loaded > 0 {
            info!(provider = %provider, count = loaded, "credentials loaded");
        }
    }
}

fn spawn_pool_tick(pool: Arc<CredentialPool>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(POOL_TICK_INTERVAL);
        loop {
            interval.tick().await;
            pool.tick(unix_now());
        }
    });
}

fn log_startup(state: &GatewayState) {
    let models = state.registry.list_models();
    info!(
        providers = state.registry.provider_ids().len(),
        models = models.len(),
        session_dir = %state.config.session_dir().display(),
        encrypted = state.config.session_key.is_some(),
        anonymous_mode = state.config.anonymous_mode,
        "chatgate ready"
    );
}
