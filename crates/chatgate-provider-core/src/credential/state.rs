use serde::{Deserialize, Serialize};

pub type CredentialId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    Active,
    Cooldown,
    /// Operator-set; terminal until the operator re-enables.
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialValue {
    /// Raw bearer/session token pasted by the operator.
    Token(String),
    /// Backed by the session store; the engine materializes the bundle.
    SessionRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub value: CredentialValue,
    /// Higher is preferred; ties rotate round-robin.
    pub priority: i32,
    /// Guest credentials synthesized when the pool runs dry. Discarded
    /// outright on auth failure instead of cooling down.
    pub ephemeral: bool,
}

impl Credential {
    pub fn token(value: impl Into<String>) -> Self {
        Self {
            value: CredentialValue::Token(value.into()),
            priority: 0,
            ephemeral: false,
        }
    }

    pub fn session_ref() -> Self {
        Self {
            value: CredentialValue::SessionRef,
            priority: 0,
            ephemeral: false,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Weak handle issued at checkout. Must flow back through
/// [`super::CredentialPool::report`] with an outcome so the pool can keep
/// its health bookkeeping truthful.
#[derive(Debug, Clone)]
pub struct CredentialHandle {
    pub id: CredentialId,
    pub provider_id: String,
    pub value: CredentialValue,
    pub ephemeral: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Also reported on client-initiated cancellation.
    Success,
    TransientFailure,
    AuthFailure,
}
