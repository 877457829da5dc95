//! Core provider abstractions for chatgate.
//!
//! This crate intentionally does **not** depend on axum or any concrete HTTP
//! client. Adapters consume typed OpenAI requests plus a borrowed session
//! bundle and produce chunk streams; a higher layer performs the IO wiring.

pub mod credential;
pub mod errors;
pub mod model;
pub mod provider;
pub mod registry;

pub use credential::{
    Credential, CredentialHandle, CredentialId, CredentialState, CredentialValue, Outcome,
    PoolConfig, PoolCounts, CredentialPool, parse_token_lines,
};
pub use errors::{AdapterError, AdapterResult, TransportErrorKind};
pub use model::{FeatureFlag, ModelDescriptor, ParsedModel, RouteTarget, parse_model_name};
pub use provider::{AdapterResponse, ChunkStream, ProviderAdapter, RequestContext};
pub use registry::{ModelRegistry, RegistryError};
