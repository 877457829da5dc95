mod pool;
mod state;

pub use pool::{CredentialPool, PoolConfig, PoolCounts, parse_token_lines};
pub use state::{
    Credential, CredentialHandle, CredentialId, CredentialState, CredentialValue, Outcome,
};
