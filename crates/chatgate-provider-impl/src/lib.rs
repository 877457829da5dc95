//! Concrete provider adapters.
//!
//! Each adapter owns the full translation for one provider family: OpenAI
//! request in, proprietary upstream request out, proprietary stream in,
//! OpenAI chunks out. Everything upstream-facing goes through the
//! [`upstream::UpstreamClient`] seam so adapters test against fakes.

pub mod aspect;
pub mod glm;
pub mod k2;
pub mod qwen;
pub mod streaming;
pub mod upstream;

pub use glm::GlmAdapter;
pub use k2::K2Adapter;
pub use qwen::QwenAdapter;
pub use upstream::{
    HttpMethod, UpstreamBody, UpstreamClient, UpstreamClientConfig, UpstreamRequest,
    UpstreamResponse, WreqUpstreamClient, send_with_backoff,
};
