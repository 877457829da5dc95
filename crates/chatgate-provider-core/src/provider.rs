use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use chatgate_protocol::openai::chat::request::ChatCompletionRequest;
use chatgate_protocol::openai::chat::response::ChatCompletionResponse;
use chatgate_protocol::openai::chat::stream::ChatCompletionChunk;
use chatgate_protocol::openai::images::ImageGenerationResponse;
use chatgate_session::SessionBundle;

use crate::errors::{AdapterError, AdapterResult};
use crate::model::{ModelDescriptor, RouteTarget};

/// Translated chunks flowing out of an adapter. Channel closure marks the
/// end of the stream; the streaming pipe appends the `[DONE]` sentinel.
pub type ChunkStream = mpsc::Receiver<Result<ChatCompletionChunk, AdapterError>>;

/// Per-request transient state threaded through the adapter call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// Remaining wall-clock budget for the whole request.
    pub deadline: Duration,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, deadline: Duration) -> Self {
        Self {
            request_id: request_id.into(),
            deadline,
        }
    }
}

#[derive(Debug)]
pub enum AdapterResponse {
    /// Incremental OpenAI-shaped chunks.
    Stream(ChunkStream),
    /// Fully assembled envelope for non-streaming calls.
    Completion(Box<ChatCompletionResponse>),
    /// Image/video generation result; always buffered to completion.
    Images(ImageGenerationResponse),
}

/// One upstream provider kind.
///
/// `complete` receives a borrowed session bundle; adapters never persist or
/// mutate credentials themselves. Reporting outcomes back to the pool is the
/// engine's job.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider_id(&self) -> &'static str;

    fn supported_models(&self) -> Vec<ModelDescriptor>;

    async fn complete(
        &self,
        ctx: &RequestContext,
        route: &RouteTarget,
        request: &ChatCompletionRequest,
        session: &SessionBundle,
    ) -> AdapterResult<AdapterResponse>;
}

/// Reject the request before any upstream IO if a message carries a part
/// this gateway cannot express upstream. Silently dropping parts would
/// corrupt the conversation.
pub fn reject_unsupported_parts(request: &ChatCompletionRequest) -> AdapterResult<()> {
    use chatgate_protocol::openai::chat::types::{ContentPart, MessageContent};
    for message in &request.messages {
        let Some(MessageContent::Parts(parts)) = &message.content else {
            continue;
        };
        for part in parts {
            if let ContentPart::Unknown(value) = part {
                let kind = value
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("<untyped>");
                return Err(AdapterError::UnsupportedContentPart(kind.to_string()));
            }
        }
    }
    Ok(())
}
