//! GLM-family adapter.
//!
//! The public model names map onto internal API identifiers that never
//! appear in the UI; the table below is static and versioned with the
//! upstream deployment. Thinking and web search ride in a `features`
//! object on the request.

pub mod stream;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;

use chatgate_common::unix_now;
use chatgate_protocol::openai::chat::request::ChatCompletionRequest;
use chatgate_protocol::openai::chat::types::{ContentPart, MessageContent};
use chatgate_provider_core::provider::reject_unsupported_parts;
use chatgate_provider_core::{
    AdapterError, AdapterResponse, AdapterResult, FeatureFlag, ModelDescriptor, ProviderAdapter,
    RequestContext, RouteTarget,
};
use chatgate_session::SessionBundle;

use crate::streaming::{collect_stream, spawn_translation};
use crate::upstream::{UpstreamBody, UpstreamClient, UpstreamRequest, send_with_backoff};
use stream::GlmStreamTranslator;

pub const PROVIDER_ID: &str = "glm";

const DEFAULT_BASE_URL: &str = "https://chat.z.ai";
const CHAT_PATH: &str = "/api/chat/completions";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0 Safari/537.36";

/// Public name → internal API model id.
const MODEL_TABLE: &[(&str, &str)] = &[
    ("GLM-4.5", "0727-360B-API"),
    ("GLM-4.6", "GLM-4-6-API-V1"),
];
/// `-Air` swaps to the lightweight deployment.
const AIR_UPSTREAM: &str = "0727-106B-API";

pub struct GlmAdapter {
    client: Arc<dyn UpstreamClient>,
    base_url: String,
}

impl GlmAdapter {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn upstream_model(route: &RouteTarget) -> String {
        if route.has(FeatureFlag::Air) {
            return AIR_UPSTREAM.to_string();
        }
        route.descriptor.upstream_name.clone()
    }

    fn build_request(
        &self,
        ctx: &RequestContext,
        route: &RouteTarget,
        request: &ChatCompletionRequest,
        session: &SessionBundle,
    ) -> AdapterResult<UpstreamRequest> {
        let messages = request
            .messages
            .iter()
            .map(|message| {
                Ok(json!({
                    "role": message.role.as_str(),
                    "content": flatten_text_content(message.content.as_ref())?,
                }))
            })
            .collect::<AdapterResult<Vec<_>>>()?;

        let mut body = json!({
            "stream": true,
            "model": Self::upstream_model(route),
            "messages": messages,
            "chat_id": "local",
            "id": ctx.request_id,
            "features": {
                "enable_thinking": route.has(FeatureFlag::Thinking),
                "enable_web_search": route.has(FeatureFlag::Search),
            },
        });
        if let Some(temperature) = request.temperature {
            body["params"]["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["params"]["top_p"] = json!(top_p);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["params"]["max_tokens"] = json!(max_tokens);
        }

        let payload = serde_json::to_vec(&body)
            .map_err(|err| AdapterError::InvalidResponse(err.to_string()))?;
        let mut req = UpstreamRequest::post_json(
            format!("{}{CHAT_PATH}", self.base_url),
            Bytes::from(payload),
            true,
        );
        req.set_header("user-agent", USER_AGENT);
        req.set_header("origin", &self.base_url);
        req.set_header("referer", &format!("{}/", self.base_url));
        req.set_header("x-request-id", &ctx.request_id);
        if session.has_cookies() {
            req.set_header("cookie", &session.cookie_header());
        }
        if let Some(token) = &session.bearer_token {
            req.set_header("authorization", &format!("Bearer {token}"));
        }
        Ok(req)
    }
}

#[async_trait]
impl ProviderAdapter for GlmAdapter {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn supported_models(&self) -> Vec<ModelDescriptor> {
        let mut models: Vec<ModelDescriptor> = MODEL_TABLE
            .iter()
            .map(|(public, upstream)| ModelDescriptor::new(*public, PROVIDER_ID, *upstream))
            .collect();
        models.push(
            ModelDescriptor::new("GLM-4.5-Air", PROVIDER_ID, AIR_UPSTREAM)
                .with_flags([FeatureFlag::Air]),
        );
        models
    }

    async fn complete(
        &self,
        ctx: &RequestContext,
        route: &RouteTarget,
        request: &ChatCompletionRequest,
        session: &SessionBundle,
    ) -> AdapterResult<AdapterResponse> {
        reject_unsupported_parts(request)?;
        if route.is_generation() {
            return Err(AdapterError::Unsupported("glm media generation"));
        }

        let upstream_req = self.build_request(ctx, route, request, session)?;
        let response = send_with_backoff(self.client.as_ref(), &upstream_req).await?;
        let UpstreamBody::Stream(body) = response.body else {
            return Err(AdapterError::InvalidResponse(
                "upstream answered a stream request with a plain body".to_string(),
            ));
        };

        let created = unix_now();
        let chunk_id = format!("chatcmpl-{}", ctx.request_id);
        let translator = GlmStreamTranslator::new(
            chunk_id.clone(),
            route.public_name.clone(),
            created,
        );
        let chunks = spawn_translation(body, translator);

        if request.is_stream() {
            return Ok(AdapterResponse::Stream(chunks));
        }
        let envelope = collect_stream(chunks, chunk_id, created, route.public_name.clone()).await?;
        Ok(AdapterResponse::Completion(Box::new(envelope)))
    }
}

/// GLM chat takes plain text; anything else in the parts list is a hard
/// error rather than a silent drop.
fn flatten_text_content(content: Option<&MessageContent>) -> AdapterResult<String> {
    match content {
        None => Ok(String::new()),
        Some(MessageContent::Text(text)) => Ok(text.clone()),
        Some(MessageContent::Parts(parts)) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    ContentPart::Text { text } => out.push_str(text),
                    ContentPart::ImageUrl { .. } => {
                        return Err(AdapterError::UnsupportedContentPart(
                            "image_url".to_string(),
                        ));
                    }
                    ContentPart::File { .. } => {
                        return Err(AdapterError::UnsupportedContentPart("file".to_string()));
                    }
                    ContentPart::Unknown(_) => {
                        return Err(AdapterError::UnsupportedContentPart(
                            "<untyped>".to_string(),
                        ));
                    }
                }
            }
            Ok(out)
        }
    }
}
