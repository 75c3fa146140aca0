//! Translate `OpenAI` Chat Completions requests into Anthropic Messages API requests.
//!
//! Handles system messages, multi-part content (text, data-URI images), tool calls,
//! tool results, and tool choice mapping. Several `OpenAI` messages can collapse into
//! one Anthropic message: tool results fold into the preceding user turn, and a final
//! pass merges same-role neighbours because the Messages API requires strict
//! user/assistant alternation.

use std::collections::HashMap;
use std::hash::BuildHasher;

use super::anthropic_types::{
    ContentBlock, ImageSource, Message, MessageContent, MessagesRequest, Role, Tool, ToolChoice,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatMessage, ChatRole, ChatTool, ChatToolCall,
    ChatToolChoice, ContentPart,
};

/// Subscription tokens are only honoured when the system prompt starts with this.
pub const SYSTEM_PREAMBLE: &str = "You are Claude Code, Anthropic's official CLI for Claude.";

pub const DEFAULT_MAX_TOKENS: u64 = 8192;

/// Translate an `OpenAI` Chat Completions request into an Anthropic Messages request.
/// Pure function: takes the request, alias table and default model, returns the
/// translated request.
pub fn openai_to_anthropic<S: BuildHasher>(
    req: &ChatCompletionRequest,
    model_map: &HashMap<String, String, S>,
    default_model: &str,
) -> MessagesRequest {
    let (system_parts, messages) = translate_messages(&req.messages);

    let system = if system_parts.is_empty() {
        SYSTEM_PREAMBLE.to_string()
    } else {
        format!("{SYSTEM_PREAMBLE}\n\n{}", system_parts.join("\n\n"))
    };

    let tools = req
        .tools
        .as_ref()
        .filter(|tools| !tools.is_empty())
        .map(|tools| tools.iter().map(translate_tool).collect());

    MessagesRequest {
        model: resolve_model(&req.model, model_map, default_model),
        max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: Some(system),
        messages,
        temperature: req.temperature,
        top_p: req.top_p,
        stop_sequences: req.stop.clone().map(|s| s.into_vec()),
        tools,
        tool_choice: req.tool_choice.as_ref().and_then(translate_tool_choice),
        stream: req.stream.unwrap_or(true),
    }
}

/// Native model ids pass through, aliases are looked up, anything else falls back
/// to the default.
pub fn resolve_model<S: BuildHasher>(
    model: &str,
    model_map: &HashMap<String, String, S>,
    default_model: &str,
) -> String {
    if model.starts_with("claude-") {
        return model.to_string();
    }
    model_map
        .get(model)
        .cloned()
        .unwrap_or_else(|| default_model.to_string())
}

/// Walk the inbound messages once, pulling system text aside, then enforce
/// alternation on what remains.
fn translate_messages(messages: &[ChatMessage]) -> (Vec<String>, Vec<Message>) {
    let mut system_parts = Vec::new();
    let mut converted: Vec<Message> = Vec::new();

    for msg in messages {
        match msg.role {
            ChatRole::System => {
                let text = msg.content.as_ref().map(ChatContent::as_text).unwrap_or_default();
                if !text.is_empty() {
                    system_parts.push(text);
                }
            }
            ChatRole::Tool => push_tool_result(&mut converted, msg),
            ChatRole::Assistant => converted.push(translate_assistant_message(msg)),
            ChatRole::User => converted.push(Message {
                role: Role::User,
                content: convert_content(msg.content.as_ref()),
            }),
        }
    }

    (system_parts, merge_consecutive_roles(converted))
}

fn push_tool_result(converted: &mut Vec<Message>, msg: &ChatMessage) {
    let result = ContentBlock::ToolResult {
        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
        content: msg.content.as_ref().map(ChatContent::as_text).unwrap_or_default(),
    };

    match converted.last_mut() {
        Some(last) if last.role == Role::User => {
            let content = std::mem::replace(&mut last.content, MessageContent::Blocks(Vec::new()));
            let mut blocks = content.into_blocks();
            blocks.push(result);
            last.content = MessageContent::Blocks(blocks);
        }
        _ => converted.push(Message {
            role: Role::User,
            content: MessageContent::Blocks(vec![result]),
        }),
    }
}

fn translate_assistant_message(msg: &ChatMessage) -> Message {
    let mut blocks = match convert_content(msg.content.as_ref()) {
        MessageContent::Text(t) if t.is_empty() => Vec::new(),
        MessageContent::Text(t) => vec![ContentBlock::Text { text: t }],
        MessageContent::Blocks(b) => b,
    };

    if let Some(ref tool_calls) = msg.tool_calls {
        blocks.extend(tool_calls.iter().map(translate_tool_call));
    }

    // An empty assistant turn is still emitted so turn order survives.
    let content = if blocks.is_empty() {
        MessageContent::Text(String::new())
    } else {
        MessageContent::Blocks(blocks)
    };

    Message {
        role: Role::Assistant,
        content,
    }
}

/// Malformed or partial argument JSON from the client becomes an empty object.
fn translate_tool_call(tc: &ChatToolCall) -> ContentBlock {
    let arguments = if tc.function.arguments.trim().is_empty() {
        "{}"
    } else {
        tc.function.arguments.as_str()
    };
    let input = serde_json::from_str::<serde_json::Value>(arguments)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));

    ContentBlock::ToolUse {
        id: tc.id.clone(),
        name: tc.function.name.clone(),
        input,
    }
}

fn convert_content(content: Option<&ChatContent>) -> MessageContent {
    let parts = match content {
        None => return MessageContent::Text(String::new()),
        Some(ChatContent::Text(t)) => return MessageContent::Text(t.clone()),
        Some(ChatContent::Parts(parts)) => parts,
    };

    let mut blocks = Vec::new();
    for part in parts {
        match part {
            ContentPart::Text { text } if !text.is_empty() => {
                blocks.push(ContentBlock::Text { text: text.clone() });
            }
            ContentPart::Text { .. } => {}
            ContentPart::ImageUrl { image_url } => {
                // Remote URLs have no Messages API equivalent and are dropped.
                if let Some(source) = parse_data_uri(&image_url.url) {
                    blocks.push(ContentBlock::Image { source });
                }
            }
        }
    }

    collapse_blocks(blocks)
}

fn collapse_blocks(mut blocks: Vec<ContentBlock>) -> MessageContent {
    if blocks.len() == 1 {
        if let ContentBlock::Text { text } = &mut blocks[0] {
            return MessageContent::Text(std::mem::take(text));
        }
    }
    MessageContent::Blocks(blocks)
}

/// Parse `data:image/<subtype>;base64,<data>`.
fn parse_data_uri(url: &str) -> Option<ImageSource> {
    let rest = url.strip_prefix("data:")?;
    let (media_type, data) = rest.split_once(";base64,")?;
    let subtype = media_type.strip_prefix("image/")?;
    if subtype.is_empty() || subtype.contains(';') || data.is_empty() {
        return None;
    }

    Some(ImageSource {
        source_type: "base64".to_string(),
        media_type: media_type.to_string(),
        data: data.to_string(),
    })
}

fn merge_consecutive_roles(messages: Vec<Message>) -> Vec<Message> {
    let mut merged: Vec<Message> = Vec::with_capacity(messages.len());

    for msg in messages {
        match merged.last_mut() {
            Some(last) if last.role == msg.role => {
                let content = std::mem::replace(&mut last.content, MessageContent::Blocks(Vec::new()));
                let mut blocks = content.into_blocks();
                blocks.extend(msg.content.into_blocks());
                last.content = MessageContent::Blocks(blocks);
            }
            _ => merged.push(msg),
        }
    }

    merged
}

fn translate_tool(tool: &ChatTool) -> Tool {
    Tool {
        name: tool.function.name.clone(),
        description: tool.function.description.clone(),
        input_schema: tool
            .function
            .parameters
            .clone()
            .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
    }
}

fn translate_tool_choice(tc: &ChatToolChoice) -> Option<ToolChoice> {
    match tc {
        ChatToolChoice::Mode(mode) => match mode.as_str() {
            "auto" => Some(ToolChoice::Auto),
            "required" => Some(ToolChoice::Any),
            _ => None,
        },
        ChatToolChoice::Object(obj) => match (obj.choice_type.as_str(), &obj.function) {
            ("function", Some(f)) if !f.name.is_empty() => Some(ToolChoice::Tool {
                name: f.name.clone(),
            }),
            // Cursor sends {"type": "auto"}
            ("auto", _) => Some(ToolChoice::Auto),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DEFAULT: &str = "claude-sonnet-4-5-20250929";

    fn aliases() -> HashMap<String, String> {
        HashMap::from([
            ("gpt-4o".to_string(), DEFAULT.to_string()),
            ("gpt-4-turbo".to_string(), "claude-opus-4-6".to_string()),
        ])
    }

    fn request(body: serde_json::Value) -> ChatCompletionRequest {
        serde_json::from_value(body).unwrap()
    }

    fn translate(body: serde_json::Value) -> MessagesRequest {
        openai_to_anthropic(&request(body), &aliases(), DEFAULT)
    }

    #[test]
    fn test_resolve_model() {
        let map = aliases();
        assert_eq!(resolve_model("claude-opus-4-6", &map, DEFAULT), "claude-opus-4-6");
        assert_eq!(resolve_model("gpt-4-turbo", &map, DEFAULT), "claude-opus-4-6");
        assert_eq!(resolve_model("some-unknown-model", &map, DEFAULT), DEFAULT);
    }

    #[test]
    fn test_single_user_message_defaults() {
        let result = translate(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false
        }));

        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].role, Role::User);
        assert_eq!(result.messages[0].content, MessageContent::Text("hi".to_string()));
        assert_eq!(result.max_tokens, 8192);
        assert_eq!(result.system.as_deref(), Some(SYSTEM_PREAMBLE));
        assert!(!result.stream);
        assert!(result.temperature.is_none());
        assert!(result.tools.is_none());
    }

    #[test]
    fn test_system_messages_join_after_preamble() {
        let result = translate(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "You are helpful."},
                {"role": "system", "content": [{"type": "text", "text": "Be concise."}]},
                {"role": "user", "content": "hi"}
            ]
        }));

        assert_eq!(
            result.system.unwrap(),
            format!("{SYSTEM_PREAMBLE}\n\nYou are helpful.\n\nBe concise.")
        );
        assert_eq!(result.messages.len(), 1);
        assert!(result.stream);
    }

    #[test]
    fn test_malformed_tool_arguments_become_empty_object() {
        let result = translate(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "go"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function",
                     "function": {"name": "search", "arguments": "{bad"}}
                ]}
            ]
        }));

        let MessageContent::Blocks(blocks) = &result.messages[1].content else {
            panic!("assistant content should be blocks");
        };
        assert_eq!(
            blocks[0],
            ContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "search".to_string(),
                input: json!({}),
            }
        );
    }

    #[test]
    fn test_tool_results_merge_into_user_turn() {
        let result = translate(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "content": "Checking.", "tool_calls": [
                    {"id": "call_a", "type": "function",
                     "function": {"name": "weather", "arguments": "{\"city\":\"Paris\"}"}},
                    {"id": "call_b", "type": "function",
                     "function": {"name": "weather", "arguments": "{\"city\":\"Rome\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_a", "content": "sunny"},
                {"role": "tool", "tool_call_id": "call_b", "content": "rain"},
                {"role": "user", "content": "thanks"}
            ]
        }));

        assert_eq!(result.messages.len(), 3);
        assert_eq!(result.messages[2].role, Role::User);
        assert_eq!(
            result.messages[2].content,
            MessageContent::Blocks(vec![
                ContentBlock::ToolResult {
                    tool_use_id: "call_a".to_string(),
                    content: "sunny".to_string(),
                },
                ContentBlock::ToolResult {
                    tool_use_id: "call_b".to_string(),
                    content: "rain".to_string(),
                },
                ContentBlock::Text {
                    text: "thanks".to_string()
                },
            ])
        );

        let MessageContent::Blocks(assistant) = &result.messages[1].content else {
            panic!("assistant content should be blocks");
        };
        assert_eq!(assistant.len(), 3);
        assert!(matches!(&assistant[2], ContentBlock::ToolUse { input, .. } if input["city"] == "Rome"));
    }

    #[test]
    fn test_tool_result_after_user_text_promotes_string() {
        let result = translate(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "context"},
                {"role": "tool", "tool_call_id": "call_x", "content": "42"}
            ]
        }));

        assert_eq!(result.messages.len(), 1);
        assert_eq!(
            result.messages[0].content,
            MessageContent::Blocks(vec![
                ContentBlock::Text {
                    text: "context".to_string()
                },
                ContentBlock::ToolResult {
                    tool_use_id: "call_x".to_string(),
                    content: "42".to_string(),
                },
            ])
        );
    }

    #[test]
    fn test_roles_strictly_alternate() {
        let result = translate(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "assistant", "content": "a"},
                {"role": "assistant", "content": ""},
                {"role": "user", "content": "b"},
                {"role": "system", "content": "ignored for alternation"},
                {"role": "user", "content": "c"},
                {"role": "tool", "tool_call_id": "t", "content": "d"},
                {"role": "assistant", "content": null},
                {"role": "user", "content": "e"},
                {"role": "user", "content": "f"}
            ]
        }));

        for pair in result.messages.windows(2) {
            assert_ne!(pair[0].role, pair[1].role);
        }
        assert_eq!(result.messages.len(), 4);
        assert_eq!(
            result.messages[3].content,
            MessageContent::Blocks(vec![
                ContentBlock::Text { text: "e".to_string() },
                ContentBlock::Text { text: "f".to_string() },
            ])
        );
    }

    #[test]
    fn test_empty_assistant_turn_is_kept() {
        let result = translate(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "a"},
                {"role": "assistant", "content": null},
                {"role": "user", "content": "b"}
            ]
        }));

        assert_eq!(result.messages.len(), 3);
        assert_eq!(result.messages[1].content, MessageContent::Text(String::new()));
    }

    #[test]
    fn test_images_keep_data_uris_only() {
        let result = translate(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "what is this?"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,iVBORw0KGgo="}},
                {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}}
            ]}]
        }));

        assert_eq!(
            result.messages[0].content,
            MessageContent::Blocks(vec![
                ContentBlock::Text {
                    text: "what is this?".to_string()
                },
                ContentBlock::Image {
                    source: ImageSource {
                        source_type: "base64".to_string(),
                        media_type: "image/png".to_string(),
                        data: "iVBORw0KGgo=".to_string(),
                    }
                },
            ])
        );
    }

    #[test]
    fn test_single_text_part_collapses_to_string() {
        let result = translate(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "only text"},
                {"type": "image_url", "image_url": {"url": "https://example.com/x.png"}}
            ]}]
        }));

        assert_eq!(
            result.messages[0].content,
            MessageContent::Text("only text".to_string())
        );
    }

    #[test]
    fn test_parse_data_uri_rejects_non_images() {
        assert!(parse_data_uri("data:text/plain;base64,aGk=").is_none());
        assert!(parse_data_uri("data:image/png,raw").is_none());
        assert!(parse_data_uri("https://example.com/a.png").is_none());
        assert!(parse_data_uri("data:image/jpeg;base64,/9j/").is_some());
    }

    #[test]
    fn test_sampling_and_stop_fields() {
        let result = translate(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 100,
            "temperature": 0.2,
            "top_p": 0.9,
            "stop": "END"
        }));

        assert_eq!(result.max_tokens, 100);
        assert_eq!(result.temperature, Some(0.2));
        assert_eq!(result.top_p, Some(0.9));
        assert_eq!(result.stop_sequences, Some(vec!["END".to_string()]));
    }

    #[test]
    fn test_tools_and_default_schema() {
        let result = translate(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [
                {"type": "function", "function": {
                    "name": "get_weather",
                    "description": "Weather for a city",
                    "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
                }},
                {"type": "function", "function": {"name": "now"}}
            ]
        }));

        let tools = result.tools.unwrap();
        assert_eq!(tools[0].name, "get_weather");
        assert_eq!(tools[0].description.as_deref(), Some("Weather for a city"));
        assert_eq!(tools[0].input_schema["properties"]["city"]["type"], "string");
        assert_eq!(tools[1].input_schema, json!({"type": "object", "properties": {}}));
    }

    #[test]
    fn test_tool_choice_mapping() {
        let choice = |value: serde_json::Value| {
            translate(json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": "hi"}],
                "tool_choice": value
            }))
            .tool_choice
        };

        assert_eq!(choice(json!("none")), None);
        assert_eq!(choice(json!("auto")), Some(ToolChoice::Auto));
        assert_eq!(choice(json!({"type": "auto"})), Some(ToolChoice::Auto));
        assert_eq!(choice(json!("required")), Some(ToolChoice::Any));
        assert_eq!(
            choice(json!({"type": "function", "function": {"name": "lookup"}})),
            Some(ToolChoice::Tool {
                name: "lookup".to_string()
            })
        );
        assert_eq!(choice(json!("sometimes")), None);
        assert_eq!(choice(json!({"type": "mystery"})), None);
    }
}
