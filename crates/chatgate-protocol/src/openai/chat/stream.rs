use serde::{Deserialize, Serialize};

use crate::openai::chat::types::{FinishReason, StreamDelta, Usage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatCompletionChunkObjectType {
    #[serde(rename = "chat.completion.chunk")]
    ChatCompletionChunk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: ChatCompletionChunkObjectType,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChatChunkChoice {
    pub index: i64,
    pub delta: StreamDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl ChatCompletionChunk {
    /// Single-choice chunk; this gateway never fans a request out to n>1.
    pub fn single(id: String, created: i64, model: String, delta: StreamDelta) -> Self {
        Self {
            id,
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created,
            model,
            choices: vec![ChatChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage: None,
        }
    }

    pub fn finish(id: String, created: i64, model: String, reason: FinishReason) -> Self {
        Self {
            id,
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created,
            model,
            choices: vec![ChatChunkChoice {
                index: 0,
                delta: StreamDelta::default(),
                finish_reason: Some(reason),
            }],
            usage: None,
        }
    }
}
