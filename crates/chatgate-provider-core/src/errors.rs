use serde::{Deserialize, Serialize};

pub type AdapterResult<T> = Result<T, AdapterError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Dns,
    Tls,
    Other,
}

/// Typed failures crossing the adapter boundary. Only the router converts
/// these into the OpenAI error envelope; the engine uses the variants to
/// decide retry and pool bookkeeping.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("unsupported content part: {0}")]
    UnsupportedContentPart(String),
    /// Upstream 401/403 on a supposedly valid session.
    #[error("upstream rejected credentials ({status}): {message}")]
    AuthRejected { status: u16, message: String },
    #[error("upstream rate limited")]
    RateLimited { retry_after: Option<u64> },
    /// Non-auth upstream HTTP error, usually 5xx.
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("upstream timed out: {0}")]
    Timeout(String),
    #[error("upstream transport failure: {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    #[error("upstream response could not be parsed: {0}")]
    InvalidResponse(String),
    #[error("operation not supported by this provider: {0}")]
    Unsupported(&'static str),
}

impl AdapterError {
    /// Whether the engine may retry the same request on a different
    /// credential without operator involvement.
    pub fn is_auth(&self) -> bool {
        matches!(self, AdapterError::AuthRejected { .. })
    }

    pub fn is_retryable_upstream(&self) -> bool {
        matches!(
            self,
            AdapterError::RateLimited { .. } | AdapterError::Upstream { status: 500..=599, .. }
        )
    }
}
