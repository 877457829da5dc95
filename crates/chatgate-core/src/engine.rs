//! Request orchestration: registry lookup, credential checkout, session
//! materialization, adapter invocation, outcome reporting, and the single
//! auth-failure retry.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{info, warn};

use chatgate_protocol::openai::chat::request::ChatCompletionRequest;
use chatgate_protocol::openai::chat::response::ChatCompletionResponse;
use chatgate_protocol::openai::images::{ImageGenerationRequest, ImageGenerationResponse};
use chatgate_protocol::openai::models::{ListModelsResponse, ListObjectType, Model, ModelObjectType};
use chatgate_provider_core::{
    AdapterResponse, CredentialHandle, CredentialValue, Outcome, PoolCounts, RequestContext,
};
use chatgate_session::{AcquireHints, SessionBundle};

use crate::error::GatewayError;
use crate::state::GatewayState;
use crate::stream_pipe::pipe_sse;

#[derive(Debug)]
pub enum EngineResponse {
    /// SSE-framed bytes, `data: [DONE]` included.
    Stream(mpsc::Receiver<Bytes>),
    Completion(Box<ChatCompletionResponse>),
    Images(ImageGenerationResponse),
}

pub struct Engine {
    state: Arc<GatewayState>,
}

impl Engine {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    pub fn list_models(&self) -> ListModelsResponse {
        let data = self
            .state
            .registry
            .list_models()
            .into_iter()
            .map(|descriptor| Model {
                id: descriptor.public_name,
                object: ModelObjectType::Model,
                created: None,
                owned_by: descriptor.provider_id,
            })
            .collect();
        ListModelsResponse {
            object: ListObjectType::List,
            data,
        }
    }

    pub fn pool_counts(&self) -> Vec<(String, PoolCounts)> {
        self.state
            .registry
            .provider_ids()
            .into_iter()
            .map(|provider| {
                let counts = self.state.pool.counts(&provider);
                (provider, counts)
            })
            .collect()
    }

    pub async fn chat(
        &self,
        ctx: &RequestContext,
        request: ChatCompletionRequest,
    ) -> Result<EngineResponse, GatewayError> {
        if request.messages.is_empty() {
            return Err(GatewayError::BadRequest(
                "messages must not be empty".to_string(),
            ));
        }
        let Some((adapter, route)) = self.state.registry.resolve(&request.model) else {
            return Err(GatewayError::UnknownModel(request.model.clone()));
        };
        let provider = route.descriptor.provider_id.clone();

        let mut auth_retry_used = false;
        loop {
            let handle = self.checkout(&provider)?;
            let session = match self.materialize(&handle).await {
                Ok(session) => session,
                Err(err) => {
                    self.state.pool.report(&handle, Outcome::TransientFailure);
                    return Err(err);
                }
            };

            let attempt = tokio::time::timeout(
                ctx.deadline,
                adapter.complete(ctx, &route, &request, &session),
            )
            .await;

            match attempt {
                Err(_) => {
                    self.state.pool.report(&handle, Outcome::TransientFailure);
                    return Err(GatewayError::UpstreamTimeout);
                }
                Ok(Ok(response)) => {
                    return Ok(self.finish(response, handle, ctx));
                }
                Ok(Err(err)) if err.is_auth() => {
                    // The cached session is dead: drop it, mark the
                    // credential, and rerun once with a fresh checkout.
                    warn!(
                        request_id = %ctx.request_id,
                        provider = %provider,
                        "upstream rejected session; invalidating and rotating"
                    );
                    self.state.store.invalidate(&provider).await;
                    self.state.pool.report(&handle, Outcome::AuthFailure);
                    if !auth_retry_used {
                        auth_retry_used = true;
                        continue;
                    }
                    return Err(err.into());
                }
                Ok(Err(err)) => {
                    let outcome = if err.is_retryable_upstream()
                        || matches!(
                            err,
                            chatgate_provider_core::AdapterError::Transport { .. }
                                | chatgate_provider_core::AdapterError::Timeout(_)
                        ) {
                        Outcome::TransientFailure
                    } else {
                        // Request-shaped problems are not the credential's
                        // fault.
                        Outcome::Success
                    };
                    self.state.pool.report(&handle, outcome);
                    return Err(err.into());
                }
            }
        }
    }

    /// `/v1/images/generations`: reshaped into a chat call against an
    /// `-image`-suffixed model.
    pub async fn images(
        &self,
        ctx: &RequestContext,
        request: ImageGenerationRequest,
    ) -> Result<ImageGenerationResponse, GatewayError> {
        let model = request
            .model
            .clone()
            .ok_or_else(|| GatewayError::BadRequest("model is required".to_string()))?;
        let Some((_, route)) = self.state.registry.resolve(&model) else {
            return Err(GatewayError::UnknownModel(model));
        };
        if !route.is_generation() {
            return Err(GatewayError::BadRequest(format!(
                "model `{model}` is not an image generation model"
            )));
        }

        let mut extra = serde_json::Map::new();
        if let Some(size) = &request.size {
            extra.insert("size".to_string(), serde_json::Value::String(size.clone()));
        }
        if let Some(n) = request.n {
            extra.insert("n".to_string(), serde_json::Value::from(n));
        }
        let chat_request: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": request.prompt}],
            "extra_body": serde_json::Value::Object(extra),
        }))
        .map_err(|err| GatewayError::Internal(err.to_string()))?;

        match self.chat(ctx, chat_request).await? {
            EngineResponse::Images(images) => Ok(images),
            _ => Err(GatewayError::Internal(
                "generation model returned a non-image response".to_string(),
            )),
        }
    }

    fn checkout(&self, provider: &str) -> Result<CredentialHandle, GatewayError> {
        if let Some(handle) = self.state.pool.checkout(provider) {
            return Ok(handle);
        }
        if self.state.config.anonymous_mode {
            return Ok(self.state.pool.synthesize_guest(provider));
        }
        // Mandated behavior: surface immediately rather than queue.
        Err(GatewayError::AuthenticationFailed(format!(
            "no active credentials for provider `{provider}`"
        )))
    }

    async fn materialize(&self, handle: &CredentialHandle) -> Result<SessionBundle, GatewayError> {
        match &handle.value {
            CredentialValue::Token(token) => Ok(SessionBundle::from_static_token(
                &handle.provider_id,
                token,
                self.state.store.ttl_secs(),
            )),
            CredentialValue::SessionRef => {
                let credentials = self.state.config.credentials_for(&handle.provider_id);
                let hints = AcquireHints {
                    prefer_guest: handle.ephemeral,
                };
                self.state
                    .store
                    .get_or_acquire(
                        &handle.provider_id,
                        self.state.acquirer.as_ref(),
                        &credentials,
                        hints,
                    )
                    .await
                    .map_err(GatewayError::from)
            }
        }
    }

    fn finish(
        &self,
        response: AdapterResponse,
        handle: CredentialHandle,
        ctx: &RequestContext,
    ) -> EngineResponse {
        match response {
            AdapterResponse::Stream(chunks) => {
                info!(request_id = %ctx.request_id, "streaming response started");
                EngineResponse::Stream(pipe_sse(
                    chunks,
                    self.state.pool.clone(),
                    handle,
                    ctx.request_id.clone(),
                ))
            }
            AdapterResponse::Completion(envelope) => {
                self.state.pool.report(&handle, Outcome::Success);
                EngineResponse::Completion(envelope)
            }
            AdapterResponse::Images(images) => {
                self.state.pool.report(&handle, Outcome::Success);
                EngineResponse::Images(images)
            }
        }
    }
}
