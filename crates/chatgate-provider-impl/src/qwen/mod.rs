//! Qwen-family adapter.
//!
//! The chat endpoint is strict about its request shape: every call carries a
//! fresh `session_id`, a `chat_id` minted through the session-creation
//! endpoint, and a `feature_config` block. Omitting any of them is an
//! upstream 400. Credentials travel as a gzip+base64 compression of the raw
//! token and one cookie value.

pub mod compress;
pub mod stream;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value as JsonValue, json};

use chatgate_common::{unix_now, unix_now_millis};
use chatgate_protocol::openai::chat::request::ChatCompletionRequest;
use chatgate_protocol::openai::chat::types::{ContentPart, MessageContent};
use chatgate_protocol::openai::images::{ImageDatum, ImageGenerationResponse};
use chatgate_provider_core::provider::reject_unsupported_parts;
use chatgate_provider_core::{
    AdapterError, AdapterResponse, AdapterResult, FeatureFlag, ModelDescriptor, ProviderAdapter,
    RequestContext, RouteTarget,
};
use chatgate_session::SessionBundle;
use chatgate_session::flows::qwen::{EXTRA_COOKIE_VALUE, EXTRA_RAW_TOKEN};

use crate::aspect::aspect_ratio;
use crate::streaming::{collect_stream, collect_text, spawn_translation};
use crate::upstream::{UpstreamBody, UpstreamClient, UpstreamRequest, send_with_backoff};
use stream::QwenStreamTranslator;

pub const PROVIDER_ID: &str = "qwen";

const DEFAULT_BASE_URL: &str = "https://chat.qwen.ai";
const NEW_CHAT_PATH: &str = "/api/v1/chats/new";
const COMPLETIONS_PATH: &str = "/api/chat/completions";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0 Safari/537.36";
const DEFAULT_THINKING_BUDGET: i64 = 60;
const DEFAULT_IMAGE_SIZE: &str = "1024x1024";

const MODEL_TABLE: &[(&str, &str)] = &[
    ("qwen3-max", "qwen3-max"),
    ("qwen3-coder", "qwen3-coder-plus"),
];

pub struct QwenAdapter {
    client: Arc<dyn UpstreamClient>,
    base_url: String,
}

impl QwenAdapter {
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

    /// Mint a `chat_id` through the session-creation endpoint.
    async fn create_chat(
        &self,
        ctx: &RequestContext,
        chat_type: &str,
        session: &SessionBundle,
    ) -> AdapterResult<String> {
        let body = json!({"chat_type": chat_type, "title": "New Chat"});
        let payload = serde_json::to_vec(&body)
            .map_err(|err| AdapterError::InvalidResponse(err.to_string()))?;
        let mut req = UpstreamRequest::post_json(
            format!("{}{NEW_CHAT_PATH}", self.base_url),
            Bytes::from(payload),
            false,
        );
        self.apply_auth(&mut req, ctx, session)?;

        let response = send_with_backoff(self.client.as_ref(), &req).await?;
        let bytes = response.into_bytes().await;
        let value: JsonValue = serde_json::from_slice(&bytes)
            .map_err(|err| AdapterError::InvalidResponse(err.to_string()))?;
        value
            .pointer("/data/id")
            .or_else(|| value.get("id"))
            .and_then(|id| id.as_str())
            .map(|id| id.to_string())
            .ok_or_else(|| {
                AdapterError::InvalidResponse("chat creation reply carried no id".to_string())
            })
    }

    fn apply_auth(
        &self,
        req: &mut UpstreamRequest,
        ctx: &RequestContext,
        session: &SessionBundle,
    ) -> AdapterResult<()> {
        req.set_header("user-agent", USER_AGENT);
        req.set_header("origin", &self.base_url);
        req.set_header("referer", &format!("{}/", self.base_url));
        req.set_header("x-request-id", &ctx.request_id);
        if session.has_cookies() {
            req.set_header("cookie", &session.cookie_header());
        }

        // Preferred: compressed raw_token|cookie_value credential.
        let raw_token = session.extra.get(EXTRA_RAW_TOKEN);
        let cookie_value = session.extra.get(EXTRA_COOKIE_VALUE);
        if let (Some(token), Some(cookie)) = (raw_token, cookie_value) {
            let compressed = compress::compress_credential(token, cookie).map_err(|err| {
                AdapterError::InvalidResponse(format!("credential compression failed: {err}"))
            })?;
            req.set_header("authorization", &format!("Bearer {compressed}"));
            return Ok(());
        }
        // Static-token bundles skip the compression scheme.
        if let Some(token) = &session.bearer_token {
            req.set_header("authorization", &format!("Bearer {token}"));
            return Ok(());
        }
        Err(AdapterError::AuthRejected {
            status: 401,
            message: "session bundle lacks credential material".to_string(),
        })
    }

    fn build_body(
        route: &RouteTarget,
        request: &ChatCompletionRequest,
        chat_id: &str,
        chat_type: &str,
    ) -> AdapterResult<JsonValue> {
        let generation = route.is_generation();
        let mut files = Vec::new();
        let messages = request
            .messages
            .iter()
            .map(|message| {
                let text = qwen_text_content(message.content.as_ref(), generation, &mut files)?;
                Ok(json!({
                    "role": message.role.as_str(),
                    "content": text,
                    "chat_type": "text",
                    "extra": {},
                }))
            })
            .collect::<AdapterResult<Vec<_>>>()?;

        let thinking = route.has(FeatureFlag::Thinking);
        let mut feature_config = json!({
            "output_schema": "phase",
            "thinking_enabled": thinking,
        });
        if thinking {
            let budget = request
                .extra_body
                .as_ref()
                .and_then(|extra| extra.get("thinking_budget"))
                .and_then(|value| value.as_i64())
                .unwrap_or(DEFAULT_THINKING_BUDGET);
            feature_config["thinking_budget"] = json!(budget);
        }

        let mut body = json!({
            "stream": true,
            "incremental_output": true,
            "model": route.descriptor.upstream_name,
            "messages": messages,
            "session_id": uuid::Uuid::new_v4().to_string(),
            "chat_id": chat_id,
            "parent_id": JsonValue::Null,
            "chat_mode": "normal",
            "timestamp": unix_now_millis(),
            "chat_type": chat_type,
            "feature_config": feature_config,
        });

        if generation {
            let size = request
                .extra_body
                .as_ref()
                .and_then(|extra| extra.get("size"))
                .and_then(|value| value.as_str())
                .unwrap_or(DEFAULT_IMAGE_SIZE)
                .to_string();
            body["size"] = json!(size);
            if let Some(ratio) = aspect_ratio(&size) {
                body["image_gen_config"] = json!({"aspect_ratio": ratio});
            }
            if !files.is_empty() {
                body["files"] = json!(files);
            }
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        Ok(body)
    }
}

/// Suffix flags → upstream `chat_type`.
fn chat_type_for(route: &RouteTarget) -> &'static str {
    if route.has(FeatureFlag::ImageEdit) {
        "image_edit"
    } else if route.has(FeatureFlag::Image) {
        "t2i"
    } else if route.has(FeatureFlag::Video) {
        "t2v"
    } else if route.has(FeatureFlag::Search) {
        "search"
    } else {
        "t2t"
    }
}

#[async_trait]
impl ProviderAdapter for QwenAdapter {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn supported_models(&self) -> Vec<ModelDescriptor> {
        MODEL_TABLE
            .iter()
            .map(|(public, upstream)| ModelDescriptor::new(*public, PROVIDER_ID, *upstream))
            .collect()
    }

    async fn complete(
        &self,
        ctx: &RequestContext,
        route: &RouteTarget,
        request: &ChatCompletionRequest,
        session: &SessionBundle,
    ) -> AdapterResult<AdapterResponse> {
        reject_unsupported_parts(request)?;

        let chat_type = chat_type_for(route);
        let chat_id = self.create_chat(ctx, chat_type, session).await?;
        let body = Self::build_body(route, request, &chat_id, chat_type)?;
        let payload = serde_json::to_vec(&body)
            .map_err(|err| AdapterError::InvalidResponse(err.to_string()))?;

        let url = format!(
            "{}{COMPLETIONS_PATH}?chat_id={chat_id}",
            self.base_url
        );
        let mut req = UpstreamRequest::post_json(url, Bytes::from(payload), true);
        self.apply_auth(&mut req, ctx, session)?;

        let response = send_with_backoff(self.client.as_ref(), &req).await?;
        let UpstreamBody::Stream(upstream_body) = response.body else {
            return Err(AdapterError::InvalidResponse(
                "upstream answered a stream request with a plain body".to_string(),
            ));
        };

        let created = unix_now();
        let chunk_id = format!("chatcmpl-{}", ctx.request_id);
        let translator =
            QwenStreamTranslator::new(chunk_id.clone(), route.public_name.clone(), created);
        let chunks = spawn_translation(upstream_body, translator);

        if route.is_generation() {
            // Media runs buffer to completion and come back as URL envelopes.
            let text = collect_text(chunks).await?;
            let data: Vec<ImageDatum> = text
                .split_whitespace()
                .filter(|candidate| candidate.starts_with("http"))
                .map(|url| ImageDatum {
                    url: Some(url.to_string()),
                    b64_json: None,
                    revised_prompt: None,
                })
                .collect();
            if data.is_empty() {
                return Err(AdapterError::InvalidResponse(
                    "generation stream carried no media urls".to_string(),
                ));
            }
            return Ok(AdapterResponse::Images(ImageGenerationResponse {
                created,
                data,
            }));
        }

        if request.is_stream() {
            return Ok(AdapterResponse::Stream(chunks));
        }
        let envelope = collect_stream(chunks, chunk_id, created, route.public_name.clone()).await?;
        Ok(AdapterResponse::Completion(Box::new(envelope)))
    }
}

/// Text flattening; reference images are collected for `image_edit` runs
/// and rejected otherwise.
fn qwen_text_content(
    content: Option<&MessageContent>,
    generation: bool,
    files: &mut Vec<String>,
) -> AdapterResult<String> {
    match content {
        None => Ok(String::new()),
        Some(MessageContent::Text(text)) => Ok(text.clone()),
        Some(MessageContent::Parts(parts)) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    ContentPart::Text { text } => out.push_str(text),
                    ContentPart::ImageUrl { image_url } if generation => {
                        files.push(image_url.url.clone());
                    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn route_with(flags: &[FeatureFlag]) -> RouteTarget {
        RouteTarget {
            public_name: "qwen3-max".to_string(),
            descriptor: ModelDescriptor::new("qwen3-max", PROVIDER_ID, "qwen3-max"),
            flags: flags.iter().copied().collect::<BTreeSet<_>>(),
        }
    }

    #[test]
    fn chat_type_follows_suffix_flags() {
        assert_eq!(chat_type_for(&route_with(&[])), "t2t");
        assert_eq!(chat_type_for(&route_with(&[FeatureFlag::Image])), "t2i");
        assert_eq!(
            chat_type_for(&route_with(&[FeatureFlag::ImageEdit])),
            "image_edit"
        );
        assert_eq!(chat_type_for(&route_with(&[FeatureFlag::Video])), "t2v");
        assert_eq!(chat_type_for(&route_with(&[FeatureFlag::Search])), "search");
        // Edit wins over plain image when both ride the name.
        assert_eq!(
            chat_type_for(&route_with(&[FeatureFlag::Image, FeatureFlag::ImageEdit])),
            "image_edit"
        );
    }
}
