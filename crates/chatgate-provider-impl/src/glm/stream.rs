//! GLM stream dialect → OpenAI chunks.
//!
//! Upstream resends the *cumulative* phase text on most chunks, so the
//! translator diffs against what it already emitted. Thinking-phase text is
//! routed to `reasoning_content`, answer-phase text to `content`.

use serde::Deserialize;
use tracing::warn;

use chatgate_protocol::openai::chat::stream::ChatCompletionChunk;
use chatgate_protocol::openai::chat::types::{FinishReason, Usage};

use crate::streaming::{
    DeltaTracker, StreamTranslator, content_chunk, reasoning_chunk, role_chunk,
};

#[derive(Debug, Deserialize)]
struct GlmEvent {
    #[serde(default)]
    data: Option<GlmEventData>,
}

#[derive(Debug, Deserialize)]
struct GlmEventData {
    #[serde(default)]
    phase: Option<String>,
    /// Cumulative text of the current phase.
    #[serde(default)]
    content: Option<String>,
    /// Incremental form some deployments send instead.
    #[serde(default)]
    delta_content: Option<String>,
    #[serde(default)]
    usage: Option<GlmUsage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct GlmUsage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
}

pub struct GlmStreamTranslator {
    id: String,
    model: String,
    created: i64,
    sent_role: bool,
    finished: bool,
    answer: DeltaTracker,
    thinking: DeltaTracker,
    usage: Option<Usage>,
}

impl GlmStreamTranslator {
    pub fn new(id: String, model: String, created: i64) -> Self {
        Self {
            id,
            model,
            created,
            sent_role: false,
            finished: false,
            answer: DeltaTracker::new(),
            thinking: DeltaTracker::new(),
            usage: None,
        }
    }

    fn lead_in(&mut self, out: &mut Vec<ChatCompletionChunk>) {
        if !self.sent_role {
            self.sent_role = true;
            out.push(role_chunk(&self.id, self.created, &self.model));
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

impl StreamTranslator for GlmStreamTranslator {
    fn on_data(&mut self, data: &str) -> Vec<ChatCompletionChunk> {
        let event: GlmEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(err) => {
                // One malformed chunk must not kill the stream.
                warn!(error = %err, "skipping malformed glm chunk");
                return Vec::new();
            }
        };
        let Some(payload) = event.data else {
            return Vec::new();
        };

        let mut out = Vec::new();
        self.lead_in(&mut out);

        if let Some(usage) = payload.usage {
            self.usage = Some(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.prompt_tokens + usage.completion_tokens,
            });
        }

        let thinking_phase = payload.phase.as_deref() == Some("thinking");
        let tracker = if thinking_phase {
            &mut self.thinking
        } else {
            &mut self.answer
        };

        let delta = if let Some(incremental) = payload.delta_content {
            tracker.push_incremental(&incremental);
            (!incremental.is_empty()).then_some(incremental)
        } else if let Some(cumulative) = payload.content {
            tracker.delta(&cumulative)
        } else {
            None
        };

        if let Some(delta) = delta {
            out.push(if thinking_phase {
                reasoning_chunk(&self.id, self.created, &self.model, delta)
            } else {
                content_chunk(&self.id, self.created, &self.model, delta)
            });
        }

        if payload.done && !self.finished {
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
        self.lead_in(&mut out);
        let terminal = self.terminal_chunk();
        out.push(terminal);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatgate_protocol::openai::chat::types::ChatRole;

    fn translator() -> GlmStreamTranslator {
        GlmStreamTranslator::new("chatcmpl-t".to_string(), "GLM-4.5".to_string(), 1)
    }

    fn event(phase: &str, content: &str, done: bool) -> String {
        serde_json::json!({
            "data": {"phase": phase, "content": content, "done": done}
        })
        .to_string()
    }

    #[test]
    fn first_chunk_carries_the_assistant_role() {
        let mut t = translator();
        let chunks = t.on_data(&event("answer", "Hi", false));
        assert_eq!(chunks[0].choices[0].delta.role, Some(ChatRole::Assistant));
        assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("Hi"));
    }

    #[test]
    fn cumulative_content_is_deduplicated() {
        let mut t = translator();
        t.on_data(&event("answer", "Hel", false));
        let chunks = t.on_data(&event("answer", "Hello", false));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("lo"));

        // Identical resend produces nothing.
        assert!(t.on_data(&event("answer", "Hello", false)).is_empty());
    }

    #[test]
    fn thinking_phase_routes_to_reasoning_content() {
        let mut t = translator();
        t.on_data(&event("thinking", "mulling", false));
        let chunks = t.on_data(&event("answer", "42", false));
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("42"));

        let mut t = translator();
        let chunks = t.on_data(&event("thinking", "mulling", false));
        assert_eq!(
            chunks[1].choices[0].delta.reasoning_content.as_deref(),
            Some("mulling")
        );
        assert_eq!(chunks[1].choices[0].delta.content, None);
    }

    #[test]
    fn done_flag_emits_stop() {
        let mut t = translator();
        let chunks = t.on_data(&event("answer", "done now", true));
        let last = chunks.last().unwrap();
        assert_eq!(last.choices[0].finish_reason, Some(FinishReason::Stop));
        // Subsequent EOF flush adds nothing.
        assert!(t.finish().is_empty());
    }

    #[test]
    fn malformed_chunk_is_skipped() {
        let mut t = translator();
        assert!(t.on_data("{oops").is_empty());
        let chunks = t.on_data(&event("answer", "fine", false));
        assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("fine"));
    }

    #[test]
    fn eof_without_done_still_terminates() {
        let mut t = translator();
        t.on_data(&event("answer", "partial", false));
        let chunks = t.finish();
        assert_eq!(
            chunks.last().unwrap().choices[0].finish_reason,
            Some(FinishReason::Stop)
        );
    }
}
