//! Qwen stream dialect → OpenAI chunks.
//!
//! This dialect is already incremental (`incremental_output` is forced on
//! in the request), so deltas pass through; the work here is phase routing
//! and termination detection.

use serde::Deserialize;
use tracing::warn;

use chatgate_protocol::openai::chat::stream::ChatCompletionChunk;
use chatgate_protocol::openai::chat::types::{FinishReason, Usage};

use crate::streaming::{StreamTranslator, content_chunk, reasoning_chunk, role_chunk};

#[derive(Debug, Deserialize)]
struct QwenEvent {
    #[serde(default)]
    choices: Vec<QwenChoice>,
    #[serde(default)]
    usage: Option<QwenUsage>,
}

#[derive(Debug, Deserialize)]
struct QwenChoice {
    #[serde(default)]
    delta: QwenDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct QwenDelta {
    #[serde(default)]
    content: Option<String>,
    /// `think` or `answer`.
    #[serde(default)]
    phase: Option<String>,
    /// `finished` marks the last chunk.
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QwenUsage {
    #[serde(default)]
    input_tokens: i64,
    #[serde(default)]
    output_tokens: i64,
}

pub struct QwenStreamTranslator {
    id: String,
    model: String,
    created: i64,
    sent_role: bool,
    finished: bool,
    usage: Option<Usage>,
}

impl QwenStreamTranslator {
    pub fn new(id: String, model: String, created: i64) -> Self {
        Self {
            id,
            model,
            created,
            sent_role: false,
            finished: false,
            usage: None,
        }
    }

    fn terminal_chunk(&mut self) -> ChatCompletionChunk {
        self.finished = true;
        let mut chunk = ChatCompletionChunk::finish(
            self.id.clone(),
            self.created,
            self.model.clone(),
            FinishReason::Stop,
        );
        chunk.usage = self.usage.take();
        chunk
    }
}

impl StreamTranslator for QwenStreamTranslator {
    fn on_data(&mut self, data: &str) -> Vec<ChatCompletionChunk> {
        let event: QwenEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "skipping malformed qwen chunk");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        if !self.sent_role {
            self.sent_role = true;
            out.push(role_chunk(&self.id, self.created, &self.model));
        }
        if let Some(usage) = event.usage {
            self.usage = Some(Usage {
                prompt_tokens: usage.input_tokens,
                completion_tokens: usage.output_tokens,
                total_tokens: usage.input_tokens + usage.output_tokens,
            });
        }

        let mut finish = false;
        for choice in event.choices {
            if let Some(content) = choice.delta.content
                && !content.is_empty()
            {
                out.push(if choice.delta.phase.as_deref() == Some("think") {
                    reasoning_chunk(&self.id, self.created, &self.model, content)
                } else {
                    content_chunk(&self.id, self.created, &self.model, content)
                });
            }
            if choice.delta.status.as_deref() == Some("finished")
                || choice.finish_reason.is_some()
            {
                finish = true;
            }
        }
        if finish && !self.finished {
            let terminal = self.terminal_chunk();
            out.push(terminal);
        }
        out
    }

    fn finish(&mut self) -> Vec<ChatCompletionChunk> {
        if self.finished {
            return Vec::new();
        }
        let mut out = Vec::new();
        if !self.sent_role {
            self.sent_role = true;
            out.push(role_chunk(&self.id, self.created, &self.model));
        }
        let terminal = self.terminal_chunk();
        out.push(terminal);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatgate_protocol::openai::chat::types::ChatRole;

    fn translator() -> QwenStreamTranslator {
        QwenStreamTranslator::new("chatcmpl-q".to_string(), "qwen3-max".to_string(), 1)
    }

    fn delta_event(phase: &str, content: &str) -> String {
        serde_json::json!({
            "choices": [{"delta": {"role": "assistant", "phase": phase, "content": content}}]
        })
        .to_string()
    }

    #[test]
    fn incremental_deltas_pass_through() {
        let mut t = translator();
        let first = t.on_data(&delta_event("answer", "Hel"));
        assert_eq!(first[0].choices[0].delta.role, Some(ChatRole::Assistant));
        assert_eq!(first[1].choices[0].delta.content.as_deref(), Some("Hel"));

        let second = t.on_data(&delta_event("answer", "lo"));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].choices[0].delta.content.as_deref(), Some("lo"));
    }

    #[test]
    fn think_phase_maps_to_reasoning() {
        let mut t = translator();
        let chunks = t.on_data(&delta_event("think", "hmm"));
        assert_eq!(
            chunks[1].choices[0].delta.reasoning_content.as_deref(),
            Some("hmm")
        );
    }

    #[test]
    fn finished_status_terminates_with_usage() {
        let mut t = translator();
        t.on_data(&delta_event("answer", "hi"));
        let chunks = t.on_data(
            &serde_json::json!({
                "choices": [{"delta": {"status": "finished"}}],
                "usage": {"input_tokens": 10, "output_tokens": 3}
            })
            .to_string(),
        );
        let last = chunks.last().unwrap();
        assert_eq!(last.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(last.usage.as_ref().unwrap().total_tokens, 13);
        assert!(t.finish().is_empty());
    }
}
