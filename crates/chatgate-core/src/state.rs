use std::sync::Arc;

use chatgate_common::GatewayConfig;
use chatgate_provider_core::{CredentialPool, ModelRegistry};
use chatgate_session::{SessionAcquirer, SessionStore};

/// Everything the engine shares across requests. Constructed once at
/// bootstrap and passed by reference; there is no process-wide implicit
/// state beyond this.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub registry: Arc<ModelRegistry>,
    pub pool: Arc<CredentialPool>,
    pub store: Arc<SessionStore>,
    pub acquirer: Arc<dyn SessionAcquirer>,
}
