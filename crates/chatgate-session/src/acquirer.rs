use async_trait::async_trait;

use chatgate_common::ProviderCredentials;

use crate::bundle::SessionBundle;

/// Why an acquisition failed. The pool and the adapters treat these
/// differently: rejected credentials cool the pool entry down, an unsolved
/// challenge is an operator problem, the rest are transient.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("provider rejected the configured credentials: {0}")]
    CredentialsRejected(String),
    #[error("login challenge could not be solved: {0}")]
    ChallengeUnsolved(String),
    #[error("headless browser failed to launch: {0}")]
    BrowserLaunchFailed(String),
    #[error("login navigation timed out: {0}")]
    NavigationTimeout(String),
    #[error("could not harvest a usable session: {0}")]
    HarvestFailed(String),
}

/// Caller-side knobs for a single acquisition.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcquireHints {
    /// Skip authenticated login and produce a guest bundle, for providers
    /// that permit it. Set by the pool when synthesizing an ephemeral
    /// credential.
    pub prefer_guest: bool,
}

/// Produces a fresh [`SessionBundle`] for a provider.
///
/// The production implementation drives a browser; tests substitute fakes.
#[async_trait]
pub trait SessionAcquirer: Send + Sync {
    async fn acquire(
        &self,
        provider_id: &str,
        credentials: &ProviderCredentials,
        hints: AcquireHints,
    ) -> Result<SessionBundle, AcquireError>;
}
