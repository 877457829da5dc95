pub mod config;
pub mod redact;

use serde::{Deserialize, Serialize};

pub use config::{GatewayConfig, GatewayConfigError, GatewayConfigPatch, ProviderCredentials};

/// Per-request trace id, also surfaced as `x-chatgate-request-id`.
///
/// v7 so ids sort by arrival time in logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Seconds since epoch. The gateway never needs sub-second session math.
pub fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Milliseconds since epoch, used by upstream payloads that want them.
pub fn unix_now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
