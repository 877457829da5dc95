//! Stream-translation helpers shared by the adapters.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use chatgate_protocol::openai::chat::response::{
    AssistantMessage, ChatChoice, ChatCompletionObjectType, ChatCompletionResponse,
};
use chatgate_protocol::openai::chat::stream::ChatCompletionChunk;
use chatgate_protocol::openai::chat::types::{ChatRole, FinishReason, StreamDelta, Usage};
use chatgate_protocol::sse::SseParser;
use chatgate_provider_core::{AdapterResult, ChunkStream};

/// Emits only the unseen suffix of cumulative upstream text.
///
/// Several dialects resend the whole assistant message on every chunk; the
/// public stream must carry deltas. When upstream text is not an extension
/// of what was already emitted (an edit), the full replacement is emitted
/// rather than dropped.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    seen: String,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delta(&mut self, cumulative: &str) -> Option<String> {
        if cumulative == self.seen {
            return None;
        }
        let delta = match cumulative.strip_prefix(self.seen.as_str()) {
            Some(suffix) if !suffix.is_empty() => suffix.to_string(),
            Some(_) => return None,
            None => cumulative.to_string(),
        };
        self.seen = cumulative.to_string();
        Some(delta)
    }

    /// Pass-through for dialects that are already incremental.
    pub fn push_incremental(&mut self, delta: &str) {
        self.seen.push_str(delta);
    }

    pub fn total(&self) -> &str {
        &self.seen
    }
}

/// Assembles a stream of chunks into the single envelope a non-streaming
/// call returns. The concatenation invariant (stream deltas == non-stream
/// content) falls out of using the same chunks for both paths.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    content: String,
    reasoning: String,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &ChatCompletionChunk) {
        if let Some(usage) = &chunk.usage {
            self.usage = Some(usage.clone());
        }
        for choice in &chunk.choices {
            if let Some(content) = &choice.delta.content {
                self.content.push_str(content);
            }
            if let Some(reasoning) = &choice.delta.reasoning_content {
                self.reasoning.push_str(reasoning);
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
        }
    }

    pub fn finish(self, id: String, created: i64, model: String) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id,
            object: ChatCompletionObjectType::ChatCompletion,
            created,
            model,
            choices: vec![ChatChoice {
                index: 0,
                message: AssistantMessage {
                    role: ChatRole::Assistant,
                    content: (!self.content.is_empty()).then_some(self.content),
                    reasoning_content: (!self.reasoning.is_empty()).then_some(self.reasoning),
                    tool_calls: None,
                },
                // Streams cut off by upstream EOF read as truncated.
                finish_reason: self.finish_reason.unwrap_or(FinishReason::Length),
            }],
            usage: self.usage,
        }
    }
}

/// The leading chunk every translated stream starts with.
pub fn role_chunk(id: &str, created: i64, model: &str) -> ChatCompletionChunk {
    ChatCompletionChunk::single(
        id.to_string(),
        created,
        model.to_string(),
        StreamDelta {
            role: Some(ChatRole::Assistant),
            content: Some(String::new()),
            ..Default::default()
        },
    )
}

pub fn content_chunk(id: &str, created: i64, model: &str, content: String) -> ChatCompletionChunk {
    ChatCompletionChunk::single(
        id.to_string(),
        created,
        model.to_string(),
        StreamDelta {
            content: Some(content),
            ..Default::default()
        },
    )
}

pub fn reasoning_chunk(
    id: &str,
    created: i64,
    model: &str,
    reasoning: String,
) -> ChatCompletionChunk {
    ChatCompletionChunk::single(
        id.to_string(),
        created,
        model.to_string(),
        StreamDelta {
            reasoning_content: Some(reasoning),
            ..Default::default()
        },
    )
}

/// One provider dialect's stream translation state machine.
pub trait StreamTranslator: Send + 'static {
    /// Translate one SSE `data:` payload. Malformed payloads should log and
    /// return nothing rather than kill the stream.
    fn on_data(&mut self, data: &str) -> Vec<ChatCompletionChunk>;
    /// Flush at end of stream (terminal chunk with `finish_reason` if the
    /// dialect never sent one).
    fn finish(&mut self) -> Vec<ChatCompletionChunk>;
}

/// Drive a raw upstream body through an SSE parser and a translator,
/// producing the adapter's chunk stream. Dropping the returned receiver
/// stops the upstream read within one chunk.
pub fn spawn_translation(
    mut body: mpsc::Receiver<Bytes>,
    mut translator: impl StreamTranslator,
) -> ChunkStream {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut parser = SseParser::new();
        while let Some(bytes) = body.recv().await {
            for event in parser.push_bytes(&bytes) {
                if event.is_done() {
                    for chunk in translator.finish() {
                        let _ = tx.send(Ok(chunk)).await;
                    }
                    return;
                }
                for chunk in translator.on_data(&event.data) {
                    if tx.send(Ok(chunk)).await.is_err() {
                        debug!("chunk receiver dropped; halting upstream translation");
                        return;
                    }
                }
            }
        }
        for event in parser.finish() {
            if event.is_done() {
                break;
            }
            for chunk in translator.on_data(&event.data) {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        }
        for chunk in translator.finish() {
            let _ = tx.send(Ok(chunk)).await;
        }
    });
    rx
}

/// Collect a chunk stream into the non-streaming envelope.
pub async fn collect_stream(
    mut rx: ChunkStream,
    id: String,
    created: i64,
    model: String,
) -> AdapterResult<ChatCompletionResponse> {
    let mut acc = ResponseAccumulator::new();
    while let Some(item) = rx.recv().await {
        match item {
            Ok(chunk) => acc.push_chunk(&chunk),
            Err(err) => return Err(err),
        }
    }
    Ok(acc.finish(id, created, model))
}

/// Collect a chunk stream's content into plain text, for generation targets
/// whose buffered output carries URLs.
pub async fn collect_text(mut rx: ChunkStream) -> AdapterResult<String> {
    let mut out = String::new();
    while let Some(item) = rx.recv().await {
        match item {
            Ok(chunk) => {
                for choice in &chunk.choices {
                    if let Some(content) = &choice.delta.content {
                        out.push_str(content);
                    }
                }
            }
            Err(err) => return Err(err),
        }
    }
    Ok(out)
}
