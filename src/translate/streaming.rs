//! State machine for translating Anthropic stream events into `OpenAI` SSE chunks.
//!
//! The [`StreamTranslator`] processes Anthropic [`StreamEvent`]s one at a time and
//! emits at most one `ChatCompletionChunk` per event. The Messages API numbers all
//! content blocks sequentially (text and tool use interleaved) while Chat Completions
//! numbers only tool calls, contiguously from zero, so the translator keeps its own
//! tool-call counter and a block-index → tool-call-index map.

use std::collections::HashMap;

use super::anthropic_types::{Delta, ResponseContentBlock, StreamEvent};
use super::openai_types::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, ChunkToolCall, ChunkToolCallFunction,
};
use super::response::map_stop_reason;

/// Translates one call's upstream events into `OpenAI` chunks.
///
/// Usage:
///   let mut translator = StreamTranslator::new();
///   for event in anthropic_events {
///       if let Some(chunk) = translator.process_event(&event) {
///           // send chunk as an SSE `data:` line
///       }
///   }
///   // then send `data: [DONE]`
#[derive(Debug)]
pub struct StreamTranslator {
    message_id: String,
    model: String,
    created: i64,
    next_tool_index: u32,
    block_to_tool: HashMap<usize, u32>,
}

impl Default for StreamTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTranslator {
    pub fn new() -> Self {
        Self::with_created(chrono::Utc::now().timestamp())
    }

    pub fn with_created(created: i64) -> Self {
        Self {
            message_id: String::new(),
            model: String::new(),
            created,
            next_tool_index: 0,
            block_to_tool: HashMap::new(),
        }
    }

    /// Process a single upstream event, returning the chunk to forward, if any.
    pub fn process_event(&mut self, event: &StreamEvent) -> Option<ChatCompletionChunk> {
        match event {
            StreamEvent::MessageStart { message } => {
                self.message_id.clone_from(&message.id);
                self.model.clone_from(&message.model);
                Some(self.make_chunk(
                    ChunkDelta {
                        role: Some("assistant".to_string()),
                        content: Some(String::new()),
                        tool_calls: None,
                    },
                    None,
                ))
            }

            StreamEvent::ContentBlockStart {
                index,
                content_block: ResponseContentBlock::ToolUse { id, name, .. },
            } => {
                let tool_index = self.next_tool_index;
                self.next_tool_index += 1;
                self.block_to_tool.insert(*index, tool_index);

                Some(self.make_tool_chunk(ChunkToolCall {
                    index: tool_index,
                    id: Some(id.clone()),
                    call_type: Some("function".to_string()),
                    function: ChunkToolCallFunction {
                        name: Some(name.clone()),
                        arguments: Some(String::new()),
                    },
                }))
            }

            StreamEvent::ContentBlockDelta {
                delta: Delta::TextDelta { text },
                ..
            } => Some(self.make_chunk(
                ChunkDelta {
                    content: Some(text.clone()),
                    ..ChunkDelta::default()
                },
                None,
            )),

            StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta { partial_json },
            } => {
                // A fragment for a block we never saw start is dropped.
                let tool_index = *self.block_to_tool.get(index)?;
                Some(self.make_tool_chunk(ChunkToolCall {
                    index: tool_index,
                    id: None,
                    call_type: None,
                    function: ChunkToolCallFunction {
                        name: None,
                        arguments: Some(partial_json.clone()),
                    },
                }))
            }

            StreamEvent::MessageDelta { delta, .. } => Some(self.make_chunk(
                ChunkDelta::default(),
                Some(map_stop_reason(delta.stop_reason.as_deref())),
            )),

            StreamEvent::ContentBlockStart { .. }
            | StreamEvent::ContentBlockDelta { .. }
            | StreamEvent::ContentBlockStop { .. }
            | StreamEvent::MessageStop
            | StreamEvent::Ping
            | StreamEvent::Error { .. }
            | StreamEvent::Unknown => None,
        }
    }

    /// Number of tool calls announced so far.
    pub fn tool_call_count(&self) -> u32 {
        self.next_tool_index
    }

    fn make_tool_chunk(&self, call: ChunkToolCall) -> ChatCompletionChunk {
        self.make_chunk(
            ChunkDelta {
                tool_calls: Some(vec![call]),
                ..ChunkDelta::default()
            },
            None,
        )
    }

    fn make_chunk(&self, delta: ChunkDelta, finish_reason: Option<&str>) -> ChatCompletionChunk {
        let id = if self.message_id.is_empty() {
            let uuid = uuid::Uuid::new_v4().simple().to_string();
            format!("chatcmpl-{}", &uuid[..8])
        } else {
            self.message_id.clone()
        };

        ChatCompletionChunk {
            id,
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(String::from),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::{MessageDeltaBody, MessagesResponse};

    fn message_start() -> StreamEvent {
        StreamEvent::MessageStart {
            message: MessagesResponse {
                id: "msg_stream".to_string(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: "claude-sonnet-4-5-20250929".to_string(),
                stop_reason: None,
                stop_sequence: None,
                usage: Default::default(),
            },
        }
    }

    fn text_start(index: usize) -> StreamEvent {
        StreamEvent::ContentBlockStart {
            index,
            content_block: ResponseContentBlock::Text {
                text: String::new(),
            },
        }
    }

    fn tool_start(index: usize, id: &str, name: &str) -> StreamEvent {
        StreamEvent::ContentBlockStart {
            index,
            content_block: ResponseContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input: serde_json::json!({}),
            },
        }
    }

    fn text_delta(index: usize, text: &str) -> StreamEvent {
        StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::TextDelta {
                text: text.to_string(),
            },
        }
    }

    fn json_delta(index: usize, partial: &str) -> StreamEvent {
        StreamEvent::ContentBlockDelta {
            index,
            delta: Delta::InputJsonDelta {
                partial_json: partial.to_string(),
            },
        }
    }

    fn message_delta(stop_reason: &str) -> StreamEvent {
        StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason.to_string()),
                stop_sequence: None,
            },
            usage: None,
        }
    }

    fn tool_calls(chunk: &ChatCompletionChunk) -> &[ChunkToolCall] {
        chunk.choices[0].delta.tool_calls.as_deref().unwrap_or_default()
    }

    #[test]
    fn test_simple_text_stream() {
        let mut translator = StreamTranslator::with_created(1_700_000_000);

        let events = [
            message_start(),
            text_start(0),
            text_delta(0, "Hi"),
            StreamEvent::ContentBlockStop { index: 0 },
            message_delta("end_turn"),
            StreamEvent::MessageStop,
        ];
        let chunks: Vec<_> = events
            .iter()
            .map(|e| translator.process_event(e))
            .collect();

        assert!(chunks[1].is_none());
        assert!(chunks[3].is_none());
        assert!(chunks[5].is_none());

        let role = chunks[0].as_ref().unwrap();
        assert_eq!(role.id, "msg_stream");
        assert_eq!(role.object, "chat.completion.chunk");
        assert_eq!(role.created, 1_700_000_000);
        assert_eq!(role.model, "claude-sonnet-4-5-20250929");
        assert_eq!(role.choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(role.choices[0].delta.content.as_deref(), Some(""));
        assert!(role.choices[0].finish_reason.is_none());

        let text = chunks[2].as_ref().unwrap();
        assert_eq!(text.choices[0].delta.content.as_deref(), Some("Hi"));
        assert!(text.choices[0].delta.role.is_none());

        let finish = chunks[4].as_ref().unwrap();
        assert_eq!(finish.choices[0].delta, ChunkDelta::default());
        assert_eq!(finish.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_tool_indices_skip_text_blocks() {
        let mut translator = StreamTranslator::new();
        translator.process_event(&message_start());

        assert!(translator.process_event(&text_start(0)).is_none());

        let first = translator.process_event(&tool_start(1, "toolu_a", "search")).unwrap();
        let second = translator.process_event(&tool_start(2, "toolu_b", "fetch")).unwrap();

        assert_eq!(tool_calls(&first)[0].index, 0);
        assert_eq!(tool_calls(&first)[0].id.as_deref(), Some("toolu_a"));
        assert_eq!(tool_calls(&first)[0].call_type.as_deref(), Some("function"));
        assert_eq!(tool_calls(&first)[0].function.name.as_deref(), Some("search"));
        assert_eq!(tool_calls(&first)[0].function.arguments.as_deref(), Some(""));
        assert_eq!(tool_calls(&second)[0].index, 1);
        assert_eq!(translator.tool_call_count(), 2);

        let args = translator.process_event(&json_delta(2, "{\"url\":")).unwrap();
        assert_eq!(tool_calls(&args)[0].index, 1);
        assert!(tool_calls(&args)[0].id.is_none());
        assert_eq!(tool_calls(&args)[0].function.arguments.as_deref(), Some("{\"url\":"));

        let args = translator.process_event(&json_delta(1, "{}")).unwrap();
        assert_eq!(tool_calls(&args)[0].index, 0);
    }

    #[test]
    fn test_tool_indices_are_contiguous_with_interleaved_text() {
        let mut translator = StreamTranslator::new();
        let mut seen = Vec::new();
        for block in 0..7 {
            let event = if block % 2 == 0 {
                text_start(block)
            } else {
                tool_start(block, &format!("toolu_{block}"), "t")
            };
            if let Some(chunk) = translator.process_event(&event) {
                seen.push(tool_calls(&chunk)[0].index);
            }
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_unmapped_json_delta_is_dropped() {
        let mut translator = StreamTranslator::new();
        translator.process_event(&message_start());
        assert!(translator.process_event(&json_delta(3, "{}")).is_none());
    }

    #[test]
    fn test_ignored_events() {
        let mut translator = StreamTranslator::new();
        let thinking = StreamEvent::ContentBlockDelta {
            index: 0,
            delta: Delta::Other,
        };
        assert!(translator.process_event(&thinking).is_none());
        assert!(translator.process_event(&StreamEvent::Ping).is_none());
        assert!(translator.process_event(&StreamEvent::Unknown).is_none());
    }

    #[test]
    fn test_finish_reason_for_tool_use() {
        let mut translator = StreamTranslator::new();
        translator.process_event(&message_start());
        let chunk = translator.process_event(&message_delta("tool_use")).unwrap();
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("tool_calls"));

        let chunk = translator.process_event(&message_delta("max_tokens")).unwrap();
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("length"));
    }

    #[test]
    fn test_chunk_id_before_message_start() {
        let mut translator = StreamTranslator::new();
        let chunk = translator.process_event(&text_delta(0, "early")).unwrap();
        assert!(chunk.id.starts_with("chatcmpl-"));
        assert_eq!(chunk.id.len(), "chatcmpl-".len() + 8);
    }
}
