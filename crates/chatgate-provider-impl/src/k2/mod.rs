//! K2-family adapter.
//!
//! The only adapter that runs happily on a guest session: cookies alone are
//! a valid credential, and the bearer token is attached only when the
//! bundle carries one. The stream dialect is event-tagged and already
//! incremental.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use chatgate_common::unix_now;
use chatgate_protocol::openai::chat::request::ChatCompletionRequest;
use chatgate_protocol::openai::chat::stream::ChatCompletionChunk;
use chatgate_protocol::openai::chat::types::{ContentPart, FinishReason, MessageContent};
use chatgate_provider_core::provider::reject_unsupported_parts;
use chatgate_provider_core::{
    AdapterError, AdapterResponse, AdapterResult, FeatureFlag, ModelDescriptor, ProviderAdapter,
    RequestContext, RouteTarget,
};
use chatgate_session::SessionBundle;

use crate::streaming::{
    StreamTranslator, collect_stream, content_chunk, reasoning_chunk, role_chunk,
    spawn_translation,
};
use crate::upstream::{UpstreamBody, UpstreamClient, UpstreamRequest, send_with_backoff};

pub const PROVIDER_ID: &str = "k2";

const DEFAULT_BASE_URL: &str = "https://www.kimi.com";
const CHAT_PATH: &str = "/api/chat/completions";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0 Safari/537.36";

const MODEL_TABLE: &[(&str, &str)] = &[("kimi-k2", "k2")];

pub struct K2Adapter {
    client: Arc<dyn UpstreamClient>,
    base_url: String,
}

impl K2Adapter {
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
}

#[async_trait]
impl ProviderAdapter for K2Adapter {
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
        if route.is_generation() {
            return Err(AdapterError::Unsupported("k2 media generation"));
        }

        let messages = request
            .messages
            .iter()
            .map(|message| {
                Ok(json!({
                    "role": message.role.as_str(),
                    "content": text_only_content(message.content.as_ref())?,
                }))
            })
            .collect::<AdapterResult<Vec<_>>>()?;

        let body = json!({
            "model": route.descriptor.upstream_name,
            "messages": messages,
            "stream": true,
            "use_search": route.has(FeatureFlag::Search),
            "use_deep_think": route.has(FeatureFlag::Thinking),
        });
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
        // Guests run on cookies alone.
        if let Some(token) = &session.bearer_token {
            req.set_header("authorization", &format!("Bearer {token}"));
        }

        let response = send_with_backoff(self.client.as_ref(), &req).await?;
        let UpstreamBody::Stream(upstream_body) = response.body else {
            return Err(AdapterError::InvalidResponse(
                "upstream answered a stream request with a plain body".to_string(),
            ));
        };

        let created = unix_now();
        let chunk_id = format!("chatcmpl-{}", ctx.request_id);
        let translator =
            K2StreamTranslator::new(chunk_id.clone(), route.public_name.clone(), created);
        let chunks = spawn_translation(upstream_body, translator);

        if request.is_stream() {
            return Ok(AdapterResponse::Stream(chunks));
        }
        let envelope = collect_stream(chunks, chunk_id, created, route.public_name.clone()).await?;
        Ok(AdapterResponse::Completion(Box::new(envelope)))
    }
}

fn text_only_content(content: Option<&MessageContent>) -> AdapterResult<String> {
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

#[derive(Debug, Deserialize)]
struct K2Event {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

struct K2StreamTranslator {
    id: String,
    model: String,
    created: i64,
    sent_role: bool,
    finished: bool,
}

impl K2StreamTranslator {
    fn new(id: String, model: String, created: i64) -> Self {
        Self {
            id,
            model,
            created,
            sent_role: false,
            finished: false,
        }
    }
}

impl StreamTranslator for K2StreamTranslator {
    fn on_data(&mut self, data: &str) -> Vec<ChatCompletionChunk> {
        let event: K2Event = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "skipping malformed k2 chunk");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        if !self.sent_role {
            self.sent_role = true;
            out.push(role_chunk(&self.id, self.created, &self.model));
        }

        match (event.event.as_deref(), event.text) {
            (Some("cmpl"), Some(text)) if !text.is_empty() => {
                out.push(content_chunk(&self.id, self.created, &self.model, text));
            }
            (Some("think"), Some(text)) if !text.is_empty() => {
                out.push(reasoning_chunk(&self.id, self.created, &self.model, text));
            }
            (Some("all_done"), _) => {
                self.finished = true;
                out.push(ChatCompletionChunk::finish(
                    self.id.clone(),
                    self.created,
                    self.model.clone(),
                    FinishReason::Stop,
                ));
            }
            _ => {}
        }
        out
    }

    fn finish(&mut self) -> Vec<ChatCompletionChunk> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut out = Vec::new();
        if !self.sent_role {
            self.sent_role = true;
            out.push(role_chunk(&self.id, self.created, &self.model));
        }
        out.push(ChatCompletionChunk::finish(
            self.id.clone(),
            self.created,
            self.model.clone(),
            FinishReason::Stop,
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tags_route_text_and_reasoning() {
        let mut t = K2StreamTranslator::new("c".to_string(), "kimi-k2".to_string(), 0);
        let chunks = t.on_data(r#"{"event":"cmpl","text":"hello"}"#);
        assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("hello"));

        let chunks = t.on_data(r#"{"event":"think","text":"pondering"}"#);
        assert_eq!(
            chunks[0].choices[0].delta.reasoning_content.as_deref(),
            Some("pondering")
        );

        let chunks = t.on_data(r#"{"event":"all_done"}"#);
        assert_eq!(
            chunks[0].choices[0].finish_reason,
            Some(FinishReason::Stop)
        );
        assert!(t.finish().is_empty());
    }

    #[test]
    fn unknown_events_are_ignored() {
        let mut t = K2StreamTranslator::new("c".to_string(), "kimi-k2".to_string(), 0);
        let chunks = t.on_data(r#"{"event":"ping"}"#);
        // Only the role lead-in.
        assert_eq!(chunks.len(), 1);
    }
}
