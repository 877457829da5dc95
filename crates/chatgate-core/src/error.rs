use chatgate_protocol::openai::error::ErrorEnvelope;
use chatgate_provider_core::AdapterError;
use chatgate_session::{AcquireError, StoreError};

/// The client-facing error taxonomy. Lower layers speak their own typed
/// errors; everything funnels through here exactly once, at the edge.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("upstream rate limited")]
    UpstreamRateLimited,
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("upstream timed out")]
    UpstreamTimeout,
    /// Login CAPTCHA could not be solved; operator action required.
    #[error("login challenge unsolved: {0}")]
    ChallengeUnsolved(String),
    #[error("internal error")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::BadRequest(_) => 400,
            GatewayError::UnknownModel(_) => 404,
            GatewayError::AuthenticationFailed(_) => 401,
            GatewayError::UpstreamRateLimited => 429,
            GatewayError::UpstreamUnavailable(_) => 502,
            GatewayError::UpstreamTimeout => 504,
            GatewayError::ChallengeUnsolved(_) => 503,
            GatewayError::Internal(_) => 500,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "invalid_request_error",
            GatewayError::UnknownModel(_) => "invalid_request_error",
            GatewayError::AuthenticationFailed(_) => "authentication_error",
            GatewayError::UpstreamRateLimited => "rate_limit_error",
            GatewayError::UpstreamUnavailable(_)
            | GatewayError::UpstreamTimeout
            | GatewayError::ChallengeUnsolved(_) => "upstream_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    fn code(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::UnknownModel(_) => "model_not_found",
            GatewayError::AuthenticationFailed(_) => "authentication_failed",
            GatewayError::UpstreamRateLimited => "rate_limited",
            GatewayError::UpstreamUnavailable(_) => "upstream_unavailable",
            GatewayError::UpstreamTimeout => "upstream_timeout",
            GatewayError::ChallengeUnsolved(_) => "challenge_unsolved",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// Client-visible message. Internal errors never leak detail; the
    /// request id is enough to find the server-side log line.
    pub fn envelope(&self, request_id: &str) -> ErrorEnvelope {
        let message = match self {
            GatewayError::Internal(_) => {
                format!("internal error (request id: {request_id})")
            }
            GatewayError::ChallengeUnsolved(_) => format!(
                "login challenge could not be solved; operator action required (request id: {request_id})"
            ),
            other => format!("{other} (request id: {request_id})"),
        };
        ErrorEnvelope::new(message, self.kind(), Some(self.code().to_string()))
    }
}

impl From<AdapterError> for GatewayError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::UnknownModel(model) => GatewayError::UnknownModel(model),
            AdapterError::UnsupportedContentPart(kind) => {
                GatewayError::BadRequest(format!("unsupported content part: {kind}"))
            }
            AdapterError::AuthRejected { status, .. } => GatewayError::AuthenticationFailed(
                format!("upstream rejected the session ({status})"),
            ),
            AdapterError::RateLimited { .. } => GatewayError::UpstreamRateLimited,
            AdapterError::Upstream { status, message } => {
                GatewayError::UpstreamUnavailable(format!("upstream answered {status}: {message}"))
            }
            AdapterError::Timeout(_) => GatewayError::UpstreamTimeout,
            AdapterError::Transport { message, .. } => GatewayError::UpstreamUnavailable(message),
            AdapterError::InvalidResponse(message) => GatewayError::UpstreamUnavailable(message),
            AdapterError::Unsupported(what) => {
                GatewayError::BadRequest(format!("not supported: {what}"))
            }
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Acquire(acquire) => acquire.into(),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl From<AcquireError> for GatewayError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::ChallengeUnsolved(message) => GatewayError::ChallengeUnsolved(message),
            // Every other acquisition failure means no usable credential.
            other => GatewayError::AuthenticationFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_mirror_the_error_class() {
        assert_eq!(GatewayError::BadRequest("x".into()).status(), 400);
        assert_eq!(GatewayError::UnknownModel("m".into()).status(), 404);
        assert_eq!(GatewayError::AuthenticationFailed("x".into()).status(), 401);
        assert_eq!(GatewayError::UpstreamRateLimited.status(), 429);
        assert_eq!(GatewayError::UpstreamUnavailable("x".into()).status(), 502);
        assert_eq!(GatewayError::UpstreamTimeout.status(), 504);
        assert_eq!(GatewayError::ChallengeUnsolved("x".into()).status(), 503);
    }

    #[test]
    fn internal_detail_never_reaches_the_envelope() {
        let err = GatewayError::Internal("db password leaked".to_string());
        let envelope = err.envelope("req-1");
        assert!(!envelope.error.message.contains("password"));
        assert!(envelope.error.message.contains("req-1"));
    }

    #[test]
    fn every_envelope_carries_the_request_id() {
        let err = GatewayError::UnknownModel("nope".to_string());
        let envelope = err.envelope("req-42");
        assert!(envelope.error.message.contains("req-42"));
        assert_eq!(envelope.error.code.as_deref(), Some("model_not_found"));
    }
}
